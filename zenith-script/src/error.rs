use thiserror::Error;

/// Script evaluation failures.
///
/// Every variant maps to an `invalid` consensus verdict with the script
/// category; the distinction matters for logging and reject reasons.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("script is larger than the maximum script size")]
    ScriptSize,
    #[error("data push is larger than the maximum element size")]
    PushSize,
    #[error("script contains too many operations")]
    OpCount,
    #[error("stack exhausted by operation")]
    InvalidStackOperation,
    #[error("unknown or disabled opcode {0:#04x}")]
    BadOpcode(u8),
    #[error("truncated data push")]
    BadPush,
    #[error("OP_VERIFY failed")]
    Verify,
    #[error("OP_EQUALVERIFY failed")]
    EqualVerify,
    #[error("OP_RETURN encountered")]
    OpReturn,
    #[error("signature check failed")]
    SigFailure,
    #[error("malformed signature encoding")]
    SigEncoding,
    #[error("malformed public key encoding")]
    PubKeyEncoding,
    #[error("multisig key count out of range")]
    PubKeyCount,
    #[error("multisig signature count out of range")]
    SigCount,
    #[error("script number is not minimally encoded or too large")]
    ScriptNumber,
    #[error("referenced block at height {0} not found in the active chain")]
    CheckBlockAtHeightNotFound(u32),
    #[error("referenced block hash does not end with the committed suffix")]
    CheckBlockAtHeightMismatch,
    #[error("script evaluated without error but finished with a false top element")]
    EvalFalse,
    #[error("stack not clean after evaluation")]
    CleanStack,
}
