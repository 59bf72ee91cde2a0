//! The script opcodes the interpreter understands.
//!
//! Values match the inherited Bitcoin assignments; `OP_CHECKBLOCKATHEIGHT`
//! occupies the first NOP slot repurposed for replay protection.

// push value
pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;

// control
pub const OP_NOP: u8 = 0x61;
pub const OP_VERIFY: u8 = 0x69;
pub const OP_RETURN: u8 = 0x6a;

// stack ops
pub const OP_DUP: u8 = 0x76;
pub const OP_DROP: u8 = 0x75;

// bit logic
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;

// crypto
pub const OP_SHA256: u8 = 0xa8;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
pub const OP_CHECKMULTISIG: u8 = 0xae;
pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

// replay protection
pub const OP_CHECKBLOCKATHEIGHT: u8 = 0xb4;

/// The largest single data push allowed.
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;

/// The largest script the evaluator accepts.
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// The largest number of non-push operations per script.
pub const MAX_OPS_PER_SCRIPT: usize = 201;

/// The most public keys allowed in a multisig.
pub const MAX_PUBKEYS_PER_MULTISIG: usize = 20;
