//! Fee estimation from observed confirmations.
//!
//! Tracks, for each admitted transaction, the fee rate and priority at
//! admission; when a block confirms some of them, the blocks-to-confirm
//! delta files the sample into a per-target history. Estimates answer with
//! the median fee rate of the history at the requested target.

use std::collections::HashMap;

use zenith_chain::{block, transaction};

use crate::entry::TxEntry;

/// The highest confirmation target tracked.
const MAX_TARGET: usize = 25;

/// How many samples each target bucket retains.
const SAMPLES_PER_TARGET: usize = 100;

#[derive(Clone, Debug)]
struct PendingSample {
    height: block::Height,
    fee_rate: u64,
    priority: f64,
}

/// The rolling fee estimator.
#[derive(Default)]
pub struct FeeEstimator {
    /// Samples waiting for confirmation, by txid.
    pending: HashMap<transaction::Hash, PendingSample>,
    /// Confirmed fee-rate samples, bucketed by blocks-to-confirm.
    fee_samples: Vec<Vec<u64>>,
    /// Confirmed priority samples, bucketed by blocks-to-confirm.
    priority_samples: Vec<Vec<f64>>,
}

impl FeeEstimator {
    pub fn new() -> FeeEstimator {
        FeeEstimator {
            pending: HashMap::new(),
            fee_samples: vec![Vec::new(); MAX_TARGET],
            priority_samples: vec![Vec::new(); MAX_TARGET],
        }
    }

    /// Record an admission.
    pub fn process_admission(&mut self, entry: &TxEntry) {
        self.ensure_buckets();
        self.pending.insert(
            entry.tx.hash(),
            PendingSample {
                height: entry.height,
                fee_rate: entry.fee_rate(),
                priority: entry.start_priority,
            },
        );
    }

    /// Forget a removed (unconfirmed) transaction.
    pub fn process_removal(&mut self, hash: &transaction::Hash) {
        self.pending.remove(hash);
    }

    /// File confirmation samples for the pool entries a block included.
    pub fn process_block(&mut self, height: block::Height, included: &[TxEntry]) {
        self.ensure_buckets();
        for entry in included {
            let sample = match self.pending.remove(&entry.tx.hash()) {
                Some(sample) => sample,
                None => continue,
            };
            let blocks_to_confirm = height.0.saturating_sub(sample.height.0).max(1) as usize;
            if blocks_to_confirm > MAX_TARGET {
                continue;
            }
            let bucket = blocks_to_confirm - 1;
            push_capped(&mut self.fee_samples[bucket], sample.fee_rate);
            push_capped(&mut self.priority_samples[bucket], sample.priority);
        }
    }

    /// The estimated fee rate (zatoshi per 1000 bytes) to confirm within
    /// `target` blocks, or `None` without enough data.
    pub fn estimate_fee(&self, target: usize) -> Option<u64> {
        let target = target.clamp(1, MAX_TARGET);
        // aggregate everything at or under the target
        let mut samples: Vec<u64> = self
            .fee_samples
            .iter()
            .take(target)
            .flatten()
            .copied()
            .collect();
        if samples.len() < 10 {
            return None;
        }
        samples.sort_unstable();
        Some(samples[samples.len() / 2])
    }

    /// The estimated priority to confirm within `target` blocks.
    pub fn estimate_priority(&self, target: usize) -> Option<f64> {
        let target = target.clamp(1, MAX_TARGET);
        let mut samples: Vec<f64> = self
            .priority_samples
            .iter()
            .take(target)
            .flatten()
            .copied()
            .collect();
        if samples.len() < 10 {
            return None;
        }
        samples.sort_by(|a, b| a.partial_cmp(b).expect("priorities are finite"));
        Some(samples[samples.len() / 2])
    }

    fn ensure_buckets(&mut self) {
        if self.fee_samples.is_empty() {
            self.fee_samples = vec![Vec::new(); MAX_TARGET];
            self.priority_samples = vec![Vec::new(); MAX_TARGET];
        }
    }
}

fn push_capped<T>(bucket: &mut Vec<T>, sample: T) {
    if bucket.len() == SAMPLES_PER_TARGET {
        bucket.remove(0);
    }
    bucket.push(sample);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryInto;
    use std::sync::Arc;
    use zenith_chain::transaction::{LockTime, Transaction};

    fn entry(fee: i64, size: usize, height: u32) -> TxEntry {
        // vary the locktime so each tx hashes differently
        TxEntry {
            tx: Arc::new(Transaction::new(
                1,
                vec![],
                vec![],
                LockTime::Height(block::Height(height)),
            )),
            fee: fee.try_into().unwrap(),
            size,
            time: 0,
            start_priority: 0.0,
            input_value: 0i64.try_into().unwrap(),
            height: block::Height(height),
        }
    }

    #[test]
    fn estimates_need_enough_samples() {
        let est = FeeEstimator::new();
        assert_eq!(est.estimate_fee(2), None);
    }

    #[test]
    fn median_of_next_block_confirmations() {
        let mut est = FeeEstimator::new();
        let mut entries = Vec::new();
        for i in 0..20 {
            let entry = entry(1_000 + i, 1_000, 100);
            est.process_admission(&entry);
            entries.push(entry);
        }
        est.process_block(block::Height(101), &entries);

        let estimate = est.estimate_fee(1).unwrap();
        // fee rates are ~ (1000+i) zat/kB; the median sits mid-range
        assert!(estimate >= 1_005 && estimate <= 1_015, "{}", estimate);
    }
}
