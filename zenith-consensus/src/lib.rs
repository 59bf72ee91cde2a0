//! Consensus validation for zenith.
//!
//! This crate holds policy and consensus rules: the context-free check
//! functions, the contextual checks against a coin view and the active
//! chain, the nine-stage mempool admission pipeline, script and proof
//! verification, and the chain controller that connects and disconnects
//! blocks with undo and drives reorgs.
//!
//! State mechanism lives in `zenith-state`; the object store lives in
//! `zenith-mempool`. Everything here returns verdicts.

pub mod admission;
pub mod chain_control;
pub mod check;
pub mod contextual;
pub mod error;
pub mod proof;
pub mod script_verify;
pub mod subsidy;

pub use admission::{accept_certificate, accept_transaction, AdmissionFlags, AdmissionOutcome};
pub use chain_control::{ChainContext, ChainController};
pub use error::{
    BlockError, CertificateError, RejectCode, SidechainRuleError, TransactionError,
    ValidationError, ValidationState,
};
pub use proof::{
    BatchVerifier, ProofVerification, ProofVerifier, StructuralVerifier, VerifyOutcome,
};
