//! Fixed byte vectors shared across test suites.

use lazy_static::lazy_static;

lazy_static! {
    /// A deterministic 32-byte seed, hex "00..1f".
    pub static ref SEED_32: Vec<u8> = (0u8..32).collect();

    /// An arbitrary DER-encoded ECDSA signature (without a sighash byte),
    /// syntactically valid but meaningless.
    pub static ref DUMMY_DER_SIG: Vec<u8> = hex::decode(
        "3045022100c219a522e65ca8500ebe05a70d5a49d840ccc15f2afa4ee9df783f06b2a322310220489a46c37feb33f52c586da25c70113b8eea41216440eb84771cb67a67fdb68c"
    )
    .expect("hard-coded hex decodes");

    /// A compressed secp256k1 public key.
    pub static ref DUMMY_PUB_KEY: Vec<u8> = hex::decode(
        "02a673638cb9587cb68ea08dbef685c6f2d2a751a8b3c6f2a7e9a4999e6e4bfaf5"
    )
    .expect("hard-coded hex decodes");
}
