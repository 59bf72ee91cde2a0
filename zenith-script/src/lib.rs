//! Script evaluation and standard-template classification.
//!
//! Scripts are carried as opaque bytecode by `zenith-chain`; this crate
//! interprets them. It provides the stack-machine evaluator, the policy-time
//! standard templates (including the replay-protection variants carrying
//! `OP_CHECKBLOCKATHEIGHT`), sig-op counting, and the signature-checker
//! seam that connects evaluation back to transactions and the active chain.

mod error;
mod interpreter;
pub mod opcodes;
pub mod standard;

pub use error::ScriptError;
pub use interpreter::{
    verify_script, ChainHistory, SignatureChecker, TransactionSignatureChecker, VerificationFlags,
};
pub use standard::{classify, is_standard, CheckBlockAtHeightParams, TxOutType};

use zenith_chain::transparent::Script;

/// Count the signature operations in a script.
///
/// `accurate` uses the preceding small integer for multisig counts (used for
/// P2SH inner scripts); otherwise multisig counts as 20.
pub fn sigop_count(script: &Script, accurate: bool) -> u64 {
    use opcodes::*;

    let mut count = 0u64;
    let mut last_opcode: Option<u8> = None;
    let mut iter = interpreter::ScriptIter::new(script.as_bytes());
    while let Some(Ok((opcode, _data))) = iter.next() {
        match opcode {
            OP_CHECKSIG | OP_CHECKSIGVERIFY => count += 1,
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                match last_opcode {
                    Some(op) if accurate && (OP_1..=OP_16).contains(&op) => {
                        count += (op - OP_1 + 1) as u64;
                    }
                    _ => count += 20,
                }
            }
            _ => {}
        }
        last_opcode = Some(opcode);
    }
    count
}
