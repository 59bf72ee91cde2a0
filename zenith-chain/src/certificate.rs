//! Withdrawal certificates: the transaction-like objects through which a
//! sidechain attests its state on the mainchain and pays backward
//! transfers.

use std::io;

use serde::{Deserialize, Serialize};

use crate::{
    amount::{Amount, Error as AmountError, NonNegative},
    cached::Cached,
    serialization::{sha256d, SerializationError, WireDeserialize, WireSerialize},
    sidechain::{FieldElement, ScProof, Scid},
    transaction,
    transparent::{self, Script},
};

/// Version code of withdrawal certificates.
pub const SC_CERT_VERSION: i32 = -5;

/// A backward transfer: a certificate output paying a mainchain address on
/// behalf of a sidechain exit.
///
/// Backward transfers are always pay-to-public-key-hash; the sidechain has
/// no way to express other scripts.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BackwardTransfer {
    /// The transferred value.
    pub value: Amount<NonNegative>,
    /// The hash of the paid public key.
    pub pk_dest: [u8; 20],
}

impl BackwardTransfer {
    /// The P2PKH lock script equivalent of this backward transfer.
    pub fn lock_script(&self) -> Script {
        // OP_DUP OP_HASH160 <pk_dest> OP_EQUALVERIFY OP_CHECKSIG
        let mut script = Vec::with_capacity(25);
        script.extend_from_slice(&[0x76, 0xa9, 0x14]);
        script.extend_from_slice(&self.pk_dest);
        script.extend_from_slice(&[0x88, 0xac]);
        Script(script)
    }

    /// The transparent output equivalent of this backward transfer.
    pub fn to_output(&self) -> transparent::Output {
        transparent::Output {
            value: self.value,
            lock_script: self.lock_script(),
        }
    }
}

impl WireSerialize for BackwardTransfer {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.value.wire_serialize(&mut writer)?;
        writer.write_all(&self.pk_dest)
    }
}

impl WireDeserialize for BackwardTransfer {
    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let value = WireDeserialize::wire_deserialize(&mut reader)?;
        let mut pk_dest = [0u8; 20];
        reader.read_exact(&mut pk_dest)?;
        Ok(BackwardTransfer { value, pk_dest })
    }
}

/// A withdrawal certificate for one sidechain and one epoch.
///
/// A certificate spends transparent inputs to pay its fee, may produce
/// ordinary change outputs, and carries the backward transfers vouched for
/// by its SNARK proof. The change outputs come first; the position of the
/// first backward transfer is the split point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// The certificate version; always `SC_CERT_VERSION` on the wire.
    pub version: i32,
    /// The attested sidechain.
    pub scid: Scid,
    /// The withdrawal epoch this certificate refers to.
    pub epoch_number: u32,
    /// The certificate's quality. Within one (scid, epoch), strictly higher
    /// quality supersedes lower.
    pub quality: u64,
    /// The cumulative sidechain-transaction-commitment tree root at the end
    /// of the referenced epoch. For non-ceasing sidechains this pins the
    /// referenced mainchain height.
    pub end_epoch_cum_tree_root: FieldElement,
    /// The SNARK proof of the attestation.
    pub proof: ScProof,
    /// Values for the custom field-element slots declared at sidechain
    /// creation.
    pub custom_fields: Vec<FieldElement>,
    /// The transparent inputs paying the mainchain fee.
    pub inputs: Vec<transparent::Input>,
    /// Ordinary change outputs; spendable like transaction outputs.
    pub outputs: Vec<transparent::Output>,
    /// The backward transfers, indexed after `outputs`; spendable only once
    /// mature, and voided if a better-quality certificate supersedes this
    /// one.
    pub backward_transfers: Vec<BackwardTransfer>,
    /// The minimum fee forward transfers to this sidechain must pay while
    /// this certificate is the active one.
    pub forward_transfer_sc_fee: Amount<NonNegative>,
    /// The minimum fee backward-transfer requests must pay while this
    /// certificate is the active one.
    pub mainchain_bwt_request_sc_fee: Amount<NonNegative>,
    hash: Cached<transaction::Hash>,
}

impl Certificate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scid: Scid,
        epoch_number: u32,
        quality: u64,
        end_epoch_cum_tree_root: FieldElement,
        proof: ScProof,
        custom_fields: Vec<FieldElement>,
        inputs: Vec<transparent::Input>,
        outputs: Vec<transparent::Output>,
        backward_transfers: Vec<BackwardTransfer>,
        forward_transfer_sc_fee: Amount<NonNegative>,
        mainchain_bwt_request_sc_fee: Amount<NonNegative>,
    ) -> Certificate {
        Certificate {
            version: SC_CERT_VERSION,
            scid,
            epoch_number,
            quality,
            end_epoch_cum_tree_root,
            proof,
            custom_fields,
            inputs,
            outputs,
            backward_transfers,
            forward_transfer_sc_fee,
            mainchain_bwt_request_sc_fee,
            hash: Cached::new(),
        }
    }

    /// Get the hash of this certificate. Shares the transaction hash
    /// namespace, since outpoints may reference certificate outputs.
    pub fn hash(&self) -> transaction::Hash {
        if let Some(hash) = self.hash.value() {
            return hash;
        }
        let mut hash_writer = sha256d::Writer::default();
        self.wire_serialize(&mut hash_writer)
            .expect("sha256d::Writer is infallible");
        transaction::Hash(hash_writer.finish())
    }

    /// Index of the first backward-transfer output in the unified output
    /// numbering.
    pub fn first_bwt_pos(&self) -> usize {
        self.outputs.len()
    }

    /// Whether the output at position `n` is a backward transfer.
    pub fn is_backward_transfer(&self, n: usize) -> bool {
        n >= self.first_bwt_pos()
    }

    /// Total number of outputs, change and backward transfers combined.
    pub fn output_count(&self) -> usize {
        self.outputs.len() + self.backward_transfers.len()
    }

    /// The output at unified position `n`, materializing backward transfers
    /// as their P2PKH form.
    pub fn output_at(&self, n: usize) -> Option<transparent::Output> {
        if n < self.outputs.len() {
            Some(self.outputs[n].clone())
        } else {
            self.backward_transfers
                .get(n - self.outputs.len())
                .map(BackwardTransfer::to_output)
        }
    }

    /// Every outpoint spent by this certificate's inputs.
    pub fn spent_outpoints(&self) -> impl Iterator<Item = transparent::OutPoint> + '_ {
        self.inputs
            .iter()
            .filter_map(transparent::Input::outpoint)
    }

    /// Total value of the backward transfers: the amount this certificate
    /// withdraws from the sidechain balance when it is top quality.
    pub fn bwt_total(&self) -> Result<Amount<NonNegative>, AmountError> {
        self.backward_transfers.iter().map(|bt| &bt.value).sum()
    }

    /// Total value of the change outputs.
    pub fn change_total(&self) -> Result<Amount<NonNegative>, AmountError> {
        self.outputs.iter().map(|out| &out.value).sum()
    }
}

impl WireSerialize for Certificate {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.version.wire_serialize(&mut writer)?;
        self.scid.wire_serialize(&mut writer)?;
        self.epoch_number.wire_serialize(&mut writer)?;
        self.quality.wire_serialize(&mut writer)?;
        self.end_epoch_cum_tree_root.wire_serialize(&mut writer)?;
        self.proof.wire_serialize(&mut writer)?;
        self.custom_fields.wire_serialize(&mut writer)?;
        self.inputs.wire_serialize(&mut writer)?;
        self.outputs.wire_serialize(&mut writer)?;
        self.backward_transfers.wire_serialize(&mut writer)?;
        self.forward_transfer_sc_fee.wire_serialize(&mut writer)?;
        self.mainchain_bwt_request_sc_fee.wire_serialize(&mut writer)
    }
}

impl WireDeserialize for Certificate {
    fn wire_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        let mut reader = crate::transaction::HashReader::new(reader);

        let version = i32::wire_deserialize(&mut reader)?;
        if version != SC_CERT_VERSION {
            return Err(SerializationError::Parse("unknown certificate version"));
        }
        let scid = Scid::wire_deserialize(&mut reader)?;
        let epoch_number = u32::wire_deserialize(&mut reader)?;
        let quality = u64::wire_deserialize(&mut reader)?;
        let end_epoch_cum_tree_root = FieldElement::wire_deserialize(&mut reader)?;
        let proof = ScProof::wire_deserialize(&mut reader)?;
        let custom_fields = WireDeserialize::wire_deserialize(&mut reader)?;
        let inputs = WireDeserialize::wire_deserialize(&mut reader)?;
        let outputs = WireDeserialize::wire_deserialize(&mut reader)?;
        let backward_transfers = WireDeserialize::wire_deserialize(&mut reader)?;
        let forward_transfer_sc_fee = WireDeserialize::wire_deserialize(&mut reader)?;
        let mainchain_bwt_request_sc_fee = WireDeserialize::wire_deserialize(&mut reader)?;

        let hash = transaction::Hash(reader.finish());

        Ok(Certificate {
            version,
            scid,
            epoch_number,
            quality,
            end_epoch_cum_tree_root,
            proof,
            custom_fields,
            inputs,
            outputs,
            backward_transfers,
            forward_transfer_sc_fee,
            mainchain_bwt_request_sc_fee,
            hash: Cached::from(hash),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryInto;

    fn demo_cert() -> Certificate {
        Certificate::new(
            Scid([3; 32]),
            0,
            5,
            FieldElement([7; 32]),
            ScProof(vec![1, 2, 3]),
            vec![],
            vec![],
            vec![transparent::Output {
                value: 10_000i64.try_into().unwrap(),
                lock_script: Script(vec![0x51]),
            }],
            vec![
                BackwardTransfer {
                    value: 40_000_000i64.try_into().unwrap(),
                    pk_dest: [8; 20],
                },
                BackwardTransfer {
                    value: 60_000_000i64.try_into().unwrap(),
                    pk_dest: [9; 20],
                },
            ],
            Amount::zero(),
            Amount::zero(),
        )
    }

    #[test]
    fn bwt_split_point() {
        let cert = demo_cert();
        assert_eq!(cert.first_bwt_pos(), 1);
        assert!(!cert.is_backward_transfer(0));
        assert!(cert.is_backward_transfer(1));
        assert!(cert.is_backward_transfer(2));
        assert_eq!(cert.output_count(), 3);
    }

    #[test]
    fn bwt_total_sums_backward_transfers_only() {
        let cert = demo_cert();
        assert_eq!(cert.bwt_total().unwrap().zatoshi(), 100_000_000);
        assert_eq!(cert.change_total().unwrap().zatoshi(), 10_000);
    }

    #[test]
    fn backward_transfer_materializes_as_p2pkh() {
        let cert = demo_cert();
        let out = cert.output_at(1).unwrap();
        assert_eq!(out.lock_script.0[0..3], [0x76, 0xa9, 0x14]);
        assert_eq!(out.lock_script.0.len(), 25);
    }

    #[test]
    fn roundtrip() {
        let cert = demo_cert();
        let bytes = cert.wire_serialize_to_vec().unwrap();
        let parsed = Certificate::wire_deserialize(&bytes[..]).unwrap();
        assert_eq!(parsed, cert);
        assert_eq!(parsed.hash(), cert.hash());
    }
}
