//! The validation error taxonomy.
//!
//! Every validation call produces a [`ValidationState`]: a three-valued
//! verdict carrying a DoS score, a wire-visible reject code, a short
//! reason, and a corruption flag. `Invalid` is a consensus verdict;
//! `Error` is an operational failure (disk, verifier unavailable) that
//! never implies peer misbehavior.

use thiserror::Error;

use zenith_chain::{amount, block, sidechain::Scid, transaction};

/// Wire-visible "reject" message codes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, displaydoc::Display)]
#[repr(u8)]
pub enum RejectCode {
    /// ok
    ValidationOk = 0x00,
    /// malformed
    Malformed = 0x01,
    /// invalid
    Invalid = 0x10,
    /// obsolete
    Obsolete = 0x11,
    /// duplicate
    Duplicate = 0x12,
    /// non-standard
    NonStandard = 0x40,
    /// insufficient fee
    InsufficientFee = 0x42,
    /// checkblockatheight not found
    CheckBlockAtHeightNotFound = 0x44,
    /// sidechain not found
    ScidNotFound = 0x45,
    /// insufficient sidechain funds
    InsufficientScidFunds = 0x46,
    /// absurdly high fee
    AbsurdlyHighFee = 0x47,
    /// has conflicts
    HasConflicts = 0x48,
    /// no coins for input
    NoCoinsForInput = 0x49,
    /// proof verification failed
    ProofVerificationFailed = 0x4a,
    /// sidechain cumulative commitment tree mismatch
    ScCumCommTree = 0x4b,
    /// active certificate data hash mismatch
    ActiveCertDataHash = 0x4c,
}

impl RejectCode {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// The verdict of a validation call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationState {
    /// Everything ok.
    Valid,
    /// A network rule was violated; the object is bad.
    Invalid {
        /// How much this failure should count against the sending peer,
        /// 0-100.
        dos: u8,
        code: RejectCode,
        reason: String,
        /// Set when the failure may indicate local data corruption rather
        /// than a bad peer (e.g. a failed undo replay).
        corruption_possible: bool,
    },
    /// An operational failure: the verdict is unknown and the operation
    /// aborted. Does not contribute to DoS scoring.
    Error { reason: String },
}

impl ValidationState {
    pub fn invalid(dos: u8, code: RejectCode, reason: impl Into<String>) -> ValidationState {
        ValidationState::Invalid {
            dos,
            code,
            reason: reason.into(),
            corruption_possible: false,
        }
    }

    pub fn error(reason: impl Into<String>) -> ValidationState {
        ValidationState::Error {
            reason: reason.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationState::Valid)
    }

    pub fn dos_score(&self) -> u8 {
        match self {
            ValidationState::Invalid { dos, .. } => *dos,
            _ => 0,
        }
    }

    pub fn reject_code(&self) -> RejectCode {
        match self {
            ValidationState::Invalid { code, .. } => *code,
            _ => RejectCode::ValidationOk,
        }
    }
}

impl From<&ValidationError> for ValidationState {
    fn from(error: &ValidationError) -> ValidationState {
        ValidationState::Invalid {
            dos: error.dos_score(),
            code: error.reject_code(),
            reason: error.to_string(),
            corruption_possible: false,
        }
    }
}

/// Context-free and contextual transaction failures.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction has no inputs")]
    NoInputs,
    #[error("transaction has no outputs")]
    NoOutputs,
    #[error("transaction is oversized")]
    Oversized,
    #[error("transaction spends the same input twice")]
    DuplicateInputs,
    #[error("coinbase transaction found where none is allowed")]
    UnexpectedCoinbase,
    #[error("coinbase has an invalid shape")]
    BadCoinbaseShape,
    #[error("coinbase script sig out of length bounds")]
    BadCoinbaseScriptSigLength,
    #[error("coinbase may not carry joinsplits")]
    CoinbaseHasJoinSplits,
    #[error("coinbase may not carry crosschain data")]
    CoinbaseHasSidechainPayload,
    #[error("joinsplit moves value both in and out of the shielded pool")]
    BothVpubsNonZero,
    #[error("transaction reveals the same nullifier twice")]
    DuplicateNullifier,
    #[error("invalid joinsplit binding signature")]
    BadJoinSplitSignature,
    #[error("amount arithmetic failed: {0}")]
    Amount(#[from] amount::Error),
    #[error("output below the dust threshold")]
    Dust,
    #[error("nonstandard output script")]
    NonStandardScript,
    #[error("transaction is not final")]
    NotFinal,
    #[error("no coins for spent outpoint {0:?}")]
    MissingInputs(Vec<zenith_chain::transparent::OutPoint>),
    #[error("spend of immature coinbase or backward-transfer output")]
    ImmatureSpend,
    #[error("inputs are smaller than outputs")]
    ValueOutOfRange,
    #[error("unknown commitment-tree anchor")]
    UnknownAnchor,
    #[error("shielded nullifier already spent")]
    NullifierReused,
    #[error("conflicts with an in-pool or confirmed spend")]
    Conflict,
    #[error("fee below the relay threshold")]
    FeeTooLow,
    #[error("absurdly high fee")]
    AbsurdFee,
    #[error("script verification failed: {0}")]
    Script(#[from] zenith_script::ScriptError),
    #[error("replay protection points at an unknown block")]
    CheckBlockAtHeightNotFound,
}

/// Sidechain-rule failures, raised by transactions and certificates.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum SidechainRuleError {
    #[error("sidechain {0} already exists")]
    ScidAlreadyExists(Scid),
    #[error("sidechain {0} not found")]
    ScidNotFound(Scid),
    #[error("sidechain {0} is not alive")]
    ScidNotAlive(Scid),
    #[error("sidechain {0} is not ceased")]
    ScidNotCeased(Scid),
    #[error("malformed certificate verification key")]
    BadCertVk,
    #[error("malformed ceased verification key")]
    BadCeasedVk,
    #[error("withdrawal epoch length out of range")]
    BadEpochLength,
    #[error("invalid custom field configuration")]
    BadFieldConfig,
    #[error("negative initial sidechain fee")]
    NegativeFee,
    #[error("forward transfer below the sidechain minimum fee")]
    ForwardTransferFeeTooLow,
    #[error("backward-transfer request below the sidechain minimum fee")]
    BwtRequestFeeTooLow,
    #[error("request data length does not match the sidechain declaration")]
    BadMbtrDataLength,
    #[error("csw nullifier already used for sidechain {0}")]
    CswNullifierReused(Scid),
    #[error("csw total exceeds the balance of sidechain {0}")]
    InsufficientScidFunds(Scid),
    #[error("too many unconfirmed csw inputs for sidechain {0}")]
    TooManyCswInputs(Scid),
    #[error("sidechain {0} does not support ceased withdrawals")]
    CswUnsupported(Scid),
}

/// Certificate-specific failures.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum CertificateError {
    #[error("malformed or missing certificate proof")]
    BadProof,
    #[error("certificate epoch or timing not admissible")]
    BadTiming,
    #[error("certificate quality conflicts with the pool")]
    QualityConflict,
    #[error("end-epoch cumulative commitment root does not resolve to a block")]
    UnknownCumCommTree,
    #[error("certificate ordering within the block is not canonical")]
    NonCanonicalOrder,
    #[error("lower-quality certificate depends on a better one")]
    DependsOnBetterQuality,
    #[error("active certificate data hash mismatch")]
    ActiveCertDataHashMismatch,
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    SidechainRule(#[from] SidechainRuleError),
}

/// Block-level failures.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum BlockError {
    #[error("block has no transactions")]
    NoTransactions,
    #[error("the first transaction must be the only coinbase")]
    BadCoinbasePosition,
    #[error("block is oversized")]
    Oversized,
    #[error("too many signature operations")]
    TooManySigOps,
    #[error("merkle root mismatch")]
    BadMerkleRoot,
    #[error("duplicate transaction in block")]
    DuplicateTransaction,
    #[error("invalid difficulty threshold")]
    InvalidDifficulty,
    #[error("hash does not satisfy the difficulty target")]
    DifficultyFilter,
    #[error("invalid equihash solution")]
    BadEquihashSolution,
    #[error("block time too far in the future")]
    TimeTooFarAhead,
    #[error("block time is before the median of the previous blocks")]
    TimeTooEarly,
    #[error("coinbase does not commit to the block height")]
    WrongEmbeddedHeight,
    #[error("coinbase pays more than the subsidy plus fees")]
    BadSubsidy,
    #[error("unknown parent block {0:?}")]
    OrphanBlock(block::Hash),
    #[error("block at height {0:?} failed to connect: {1}")]
    ConnectFailed(block::Height, String),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Certificate(#[from] CertificateError),
}

/// The top-level validation error, as returned by the admission and block
/// pipelines.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    SidechainRule(#[from] SidechainRuleError),
    #[error(transparent)]
    Certificate(#[from] CertificateError),
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error("proof verification failed for {0}")]
    ProofVerificationFailed(transaction::Hash),
}

impl ValidationError {
    /// The DoS score of this failure, per the taxonomy: structural 10-100,
    /// script and proof and sidechain rules 100, policy and unconfirmed
    /// conflicts 0.
    pub fn dos_score(&self) -> u8 {
        use TransactionError::*;
        match self {
            ValidationError::Transaction(error) => match error {
                NoInputs | NoOutputs | Oversized | DuplicateInputs | BadCoinbaseShape
                | BadCoinbaseScriptSigLength | CoinbaseHasJoinSplits
                | CoinbaseHasSidechainPayload | UnexpectedCoinbase => 10,
                BothVpubsNonZero | DuplicateNullifier | Amount(_) | ValueOutOfRange => 100,
                BadJoinSplitSignature | Script(_) => 100,
                NullifierReused | Conflict => 0,
                Dust | NonStandardScript | FeeTooLow | AbsurdFee => 0,
                NotFinal | ImmatureSpend => 0,
                MissingInputs(_) => 0,
                UnknownAnchor => 10,
                CheckBlockAtHeightNotFound => 0,
            },
            ValidationError::SidechainRule(_) => 100,
            ValidationError::Certificate(error) => match error {
                CertificateError::Transaction(inner) => {
                    ValidationError::Transaction(inner.clone()).dos_score()
                }
                CertificateError::QualityConflict => 0,
                _ => 100,
            },
            ValidationError::Block(_) => 100,
            ValidationError::ProofVerificationFailed(_) => 100,
        }
    }

    /// The wire reject code of this failure.
    pub fn reject_code(&self) -> RejectCode {
        use TransactionError::*;
        match self {
            ValidationError::Transaction(error) => match error {
                NoInputs | NoOutputs | DuplicateInputs | Oversized | BadCoinbaseShape
                | BadCoinbaseScriptSigLength | CoinbaseHasJoinSplits
                | CoinbaseHasSidechainPayload => RejectCode::Malformed,
                Dust | NonStandardScript => RejectCode::NonStandard,
                FeeTooLow => RejectCode::InsufficientFee,
                AbsurdFee => RejectCode::AbsurdlyHighFee,
                NullifierReused | Conflict => RejectCode::HasConflicts,
                MissingInputs(_) => RejectCode::NoCoinsForInput,
                CheckBlockAtHeightNotFound => RejectCode::CheckBlockAtHeightNotFound,
                _ => RejectCode::Invalid,
            },
            ValidationError::SidechainRule(error) => match error {
                SidechainRuleError::ScidNotFound(_) => RejectCode::ScidNotFound,
                SidechainRuleError::InsufficientScidFunds(_) => {
                    RejectCode::InsufficientScidFunds
                }
                SidechainRuleError::CswNullifierReused(_) => RejectCode::HasConflicts,
                SidechainRuleError::TooManyCswInputs(_) => RejectCode::NonStandard,
                _ => RejectCode::Invalid,
            },
            ValidationError::Certificate(error) => match error {
                CertificateError::UnknownCumCommTree => RejectCode::ScCumCommTree,
                CertificateError::ActiveCertDataHashMismatch => RejectCode::ActiveCertDataHash,
                CertificateError::QualityConflict => RejectCode::HasConflicts,
                CertificateError::Transaction(inner) => {
                    ValidationError::Transaction(inner.clone()).reject_code()
                }
                CertificateError::SidechainRule(inner) => {
                    ValidationError::SidechainRule(inner.clone()).reject_code()
                }
                _ => RejectCode::Invalid,
            },
            ValidationError::Block(_) => RejectCode::Invalid,
            ValidationError::ProofVerificationFailed(_) => RejectCode::ProofVerificationFailed,
        }
    }
}
