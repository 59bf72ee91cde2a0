//! Wallet- and indexer-facing notifications.
//!
//! Events are delivered in mempool-admission or block-traversal order and
//! never reordered; consumers that drop behind miss events rather than
//! reorder them.

use std::sync::Arc;

use zenith_chain::{
    block, certificate::Certificate, sidechain::Scid, transaction::{self, Transaction},
};

/// Whether a confirmed certificate's backward transfers are active or
/// voided by a better-quality certificate.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BwtState {
    BwtOn,
    BwtOff,
}

/// The status update emitted for every certificate a connected or
/// disconnected block touches.
#[derive(Clone, Debug)]
pub struct CertStatusInfo {
    pub scid: Scid,
    pub cert_hash: transaction::Hash,
    pub epoch: u32,
    pub quality: u64,
    pub bwt_state: BwtState,
}

/// One ordered sync event.
#[derive(Clone, Debug)]
pub enum SyncEvent {
    /// A transaction entered the mempool or a block.
    Transaction {
        transaction: Arc<Transaction>,
        in_block: Option<block::Hash>,
    },
    /// A certificate entered the mempool or a block.
    Certificate {
        certificate: Arc<Certificate>,
        in_block: Option<block::Hash>,
    },
    /// A certificate's backward-transfer state changed.
    CertStatus(CertStatusInfo),
    /// The active tip changed.
    TipChanged {
        hash: block::Hash,
        height: block::Height,
    },
}

/// The sending half handed to the validation pipelines.
pub type SyncSender = tokio::sync::mpsc::UnboundedSender<SyncEvent>;

/// Create a notification channel.
pub fn channel() -> (SyncSender, tokio::sync::mpsc::UnboundedReceiver<SyncEvent>) {
    tokio::sync::mpsc::unbounded_channel()
}
