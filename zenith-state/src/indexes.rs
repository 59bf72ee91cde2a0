//! Write records for the optional secondary indexes.
//!
//! The index stores themselves (and their query surfaces) live outside
//! this core; the core's obligation is the write contract: when a block
//! connects or disconnects, it produces one batch of typed entries per
//! enabled index and hands it to the registered writer, in block order.

use zenith_chain::{block, transaction, transparent};

/// `txindex`: txid → the block and in-block position that confirmed it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxIndexEntry {
    pub txid: transaction::Hash,
    pub block: block::Hash,
    pub height: block::Height,
    pub position: usize,
}

/// `spentindex`: outpoint → the spender.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpentIndexEntry {
    pub outpoint: transparent::OutPoint,
    pub spender: transaction::Hash,
    pub input_index: usize,
    pub height: block::Height,
}

/// `addressindex` / `addressunspentindex`: script pattern → touch.
///
/// Keys are the raw script-hash bytes, as the address indexes key on the
/// hashed script rather than any human-readable encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressIndexEntry {
    pub script_key: Vec<u8>,
    pub txid: transaction::Hash,
    pub output_index: u32,
    pub value: i64,
    pub height: block::Height,
    /// Negative values mark spends.
    pub spending: bool,
}

/// `maturityheightindex`: certificate bwt maturity height → cert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaturityHeightIndexEntry {
    pub maturity_height: block::Height,
    pub cert_hash: transaction::Hash,
}

/// `timestampindex`: block time → block hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimestampIndexEntry {
    pub timestamp: i64,
    pub block: block::Hash,
}

/// Everything one connected block contributes to the secondary indexes.
#[derive(Clone, Debug, Default)]
pub struct IndexBatch {
    pub tx_entries: Vec<TxIndexEntry>,
    pub spent_entries: Vec<SpentIndexEntry>,
    pub address_entries: Vec<AddressIndexEntry>,
    pub maturity_entries: Vec<MaturityHeightIndexEntry>,
    pub timestamp_entries: Vec<TimestampIndexEntry>,
}

impl IndexBatch {
    pub fn is_empty(&self) -> bool {
        self.tx_entries.is_empty()
            && self.spent_entries.is_empty()
            && self.address_entries.is_empty()
            && self.maturity_entries.is_empty()
            && self.timestamp_entries.is_empty()
    }
}

/// The consumer side of the write contract.
///
/// Writers receive batches strictly in block order; a disconnect hands
/// back the same batch the connect produced, for reversal.
pub trait IndexWriter: Send {
    fn block_connected(&mut self, batch: &IndexBatch);
    fn block_disconnected(&mut self, batch: &IndexBatch);
}
