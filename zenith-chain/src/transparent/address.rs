//! Transparent Address types.

use std::{fmt, io};

use ripemd160::{Digest, Ripemd160};
use sha2::{Digest as Sha2Digest, Sha256};

use crate::{
    parameters::Network,
    serialization::{SerializationError, WireDeserialize, WireSerialize},
};

/// Magic numbers used to identify what networks the Addresses
/// are associated with.
mod magics {
    pub mod p2sh {
        pub const MAINNET: [u8; 2] = [0x20, 0x96];
        pub const TESTNET: [u8; 2] = [0x20, 0x92];
    }

    pub mod p2pkh {
        pub const MAINNET: [u8; 2] = [0x20, 0x89];
        pub const TESTNET: [u8; 2] = [0x20, 0x98];
    }
}

/// Transparent addresses.
///
/// A two-byte network prefix is prepended to the hash to specify the address
/// type. The result is then hashed with sha256d, the first four bytes of the
/// output are appended as a checksum, and the result is Base58Check encoded.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub enum Address {
    /// P2SH (Pay to Script Hash) addresses
    PayToScriptHash {
        /// Production, test, or other network
        network: Network,
        /// 20 bytes specifying a script hash.
        script_hash: [u8; 20],
    },
    /// P2PKH (Pay to Public Key Hash) addresses
    PayToPublicKeyHash {
        /// Production, test, or other network
        network: Network,
        /// 20 bytes specifying a public key hash, which is a RIPEMD-160
        /// hash of a SHA-256 hash of a compressed ECDSA key encoding.
        pub_key_hash: [u8; 20],
    },
}

impl Address {
    /// The hash160 of a compressed public key encoding.
    pub fn hash_pub_key(pub_key_bytes: &[u8]) -> [u8; 20] {
        let sha = Sha256::digest(pub_key_bytes);
        let ripe = Ripemd160::digest(&sha);
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&ripe);
        hash
    }

    pub fn from_pub_key_hash(network: Network, pub_key_hash: [u8; 20]) -> Address {
        Address::PayToPublicKeyHash {
            network,
            pub_key_hash,
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut debug_struct = f.debug_struct("TransparentAddress");

        match self {
            Address::PayToScriptHash {
                network,
                script_hash,
            } => debug_struct
                .field("network", network)
                .field("script_hash", &hex::encode(script_hash))
                .finish(),
            Address::PayToPublicKeyHash {
                network,
                pub_key_hash,
            } => debug_struct
                .field("network", network)
                .field("pub_key_hash", &hex::encode(pub_key_hash))
                .finish(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut bytes = io::Cursor::new(Vec::new());
        let _ = self.wire_serialize(&mut bytes);

        f.write_str(&bs58::encode(bytes.get_ref()).with_check().into_string())
    }
}

impl std::str::FromStr for Address {
    type Err = SerializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result = &bs58::decode(s).with_check(None).into_vec();

        match result {
            Ok(bytes) => Self::wire_deserialize(&bytes[..]),
            Err(_) => Err(SerializationError::Parse("t-addr decoding error")),
        }
    }
}

impl WireSerialize for Address {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        match self {
            Address::PayToScriptHash {
                network,
                script_hash,
            } => {
                match *network {
                    Network::Mainnet => writer.write_all(&magics::p2sh::MAINNET[..])?,
                    _ => writer.write_all(&magics::p2sh::TESTNET[..])?,
                }
                writer.write_all(script_hash)?
            }
            Address::PayToPublicKeyHash {
                network,
                pub_key_hash,
            } => {
                match *network {
                    Network::Mainnet => writer.write_all(&magics::p2pkh::MAINNET[..])?,
                    _ => writer.write_all(&magics::p2pkh::TESTNET[..])?,
                }
                writer.write_all(pub_key_hash)?
            }
        }
        Ok(())
    }
}

impl WireDeserialize for Address {
    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let mut version_bytes = [0u8; 2];
        reader.read_exact(&mut version_bytes)?;

        let mut hash_bytes = [0u8; 20];
        reader.read_exact(&mut hash_bytes)?;

        match version_bytes {
            magics::p2sh::MAINNET => Ok(Address::PayToScriptHash {
                network: Network::Mainnet,
                script_hash: hash_bytes,
            }),
            magics::p2sh::TESTNET => Ok(Address::PayToScriptHash {
                network: Network::Testnet,
                script_hash: hash_bytes,
            }),
            magics::p2pkh::MAINNET => Ok(Address::PayToPublicKeyHash {
                network: Network::Mainnet,
                pub_key_hash: hash_bytes,
            }),
            magics::p2pkh::TESTNET => Ok(Address::PayToPublicKeyHash {
                network: Network::Testnet,
                pub_key_hash: hash_bytes,
            }),
            _ => Err(SerializationError::Parse("bad t-addr version/type")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_roundtrips_through_base58check() {
        let addr = Address::from_pub_key_hash(Network::Mainnet, [0x11; 20]);
        let encoded = addr.to_string();
        let decoded: Address = encoded.parse().unwrap();
        assert_eq!(addr, decoded);
    }
}
