//! Mempool entries: the stored object plus its admission metadata.

use std::sync::Arc;

use zenith_chain::{
    amount::{Amount, NonNegative},
    block,
    certificate::Certificate,
    transaction::{self, Transaction},
    transparent,
};

/// A transaction in the pool, with the metadata recorded at admission.
#[derive(Clone, Debug)]
pub struct TxEntry {
    pub tx: Arc<Transaction>,
    /// Fee paid by this transaction.
    pub fee: Amount<NonNegative>,
    /// Serialized size in bytes.
    pub size: usize,
    /// Unix time of admission.
    pub time: i64,
    /// Priority at admission; ages with the height delta and the value of
    /// confirmed inputs.
    pub start_priority: f64,
    /// The value of confirmed inputs, used for priority aging.
    pub input_value: Amount<NonNegative>,
    /// Active chain height at admission.
    pub height: block::Height,
}

impl TxEntry {
    /// The priority at `current_height`: aged by the input value per byte.
    pub fn priority(&self, current_height: block::Height) -> f64 {
        let delta_height = current_height.0.saturating_sub(self.height.0) as f64;
        let aged = delta_height * self.input_value.zatoshi() as f64 / self.size.max(1) as f64;
        self.start_priority + aged
    }

    /// Fee rate in zatoshi per 1000 bytes.
    pub fn fee_rate(&self) -> u64 {
        (self.fee.zatoshi() as u64).saturating_mul(1000) / self.size.max(1) as u64
    }
}

/// A certificate in the pool, with the metadata recorded at admission.
#[derive(Clone, Debug)]
pub struct CertEntry {
    pub cert: Arc<Certificate>,
    pub fee: Amount<NonNegative>,
    pub size: usize,
    pub time: i64,
    pub height: block::Height,
}

impl CertEntry {
    pub fn fee_rate(&self) -> u64 {
        (self.fee.zatoshi() as u64).saturating_mul(1000) / self.size.max(1) as u64
    }
}

/// A reference to either kind of pool object.
///
/// Transactions and certificates share the hash namespace and most queries,
/// so the derived indexes store this tagged handle.
#[derive(Clone, Debug)]
pub enum MempoolObject {
    Tx(Arc<Transaction>),
    Cert(Arc<Certificate>),
}

impl MempoolObject {
    pub fn hash(&self) -> transaction::Hash {
        match self {
            MempoolObject::Tx(tx) => tx.hash(),
            MempoolObject::Cert(cert) => cert.hash(),
        }
    }

    /// Every outpoint this object spends.
    pub fn spent_outpoints(&self) -> Vec<transparent::OutPoint> {
        match self {
            MempoolObject::Tx(tx) => tx.spent_outpoints().collect(),
            MempoolObject::Cert(cert) => cert.spent_outpoints().collect(),
        }
    }

    pub fn as_tx(&self) -> Option<&Arc<Transaction>> {
        match self {
            MempoolObject::Tx(tx) => Some(tx),
            MempoolObject::Cert(_) => None,
        }
    }

    pub fn as_cert(&self) -> Option<&Arc<Certificate>> {
        match self {
            MempoolObject::Tx(_) => None,
            MempoolObject::Cert(cert) => Some(cert),
        }
    }
}
