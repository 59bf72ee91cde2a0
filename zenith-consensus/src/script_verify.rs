//! Script verification for whole objects, with bounded parallelism for
//! block connect.
//!
//! Per-input checks are pure closures over (coin, script, flags); the
//! parallel path fans them out over a semaphore sized by `-par` and
//! rejoins before the block commits.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::trace;

use zenith_chain::{block, transaction::Transaction, transparent};
use zenith_script::{
    verify_script, ChainHistory, ScriptError, TransactionSignatureChecker, VerificationFlags,
};
use zenith_state::CoinView;

use crate::error::{TransactionError, ValidationError};

/// A fully resolved input check, ready to run on any thread.
#[derive(Clone, Debug)]
pub struct PendingScriptCheck {
    pub tx: Arc<Transaction>,
    pub input_index: usize,
    pub lock_script: transparent::Script,
    pub flags: VerificationFlags,
}

impl PendingScriptCheck {
    fn run<H: ChainHistory>(&self, history: &H) -> Result<(), ScriptError> {
        let checker = TransactionSignatureChecker {
            tx: &self.tx,
            input_index: self.input_index,
        };
        let unlock_script = match &self.tx.inputs[self.input_index] {
            transparent::Input::PrevOut { unlock_script, .. } => unlock_script,
            transparent::Input::Coinbase { .. } => return Ok(()),
        };
        verify_script(unlock_script, &self.lock_script, self.flags, &checker, history)
    }
}

/// Resolve every input of `tx` against `view` into pending checks.
pub fn collect_checks<V: CoinView>(
    tx: &Arc<Transaction>,
    view: &V,
    flags: VerificationFlags,
) -> Result<Vec<PendingScriptCheck>, ValidationError> {
    let mut checks = Vec::with_capacity(tx.inputs.len());
    for (input_index, input) in tx.inputs.iter().enumerate() {
        let outpoint = match input.outpoint() {
            Some(outpoint) => outpoint,
            None => continue,
        };
        let coin = view
            .coins(&outpoint.hash)
            .ok()
            .flatten()
            .ok_or_else(|| TransactionError::MissingInputs(vec![outpoint]))?;
        let output = coin
            .output(outpoint.index)
            .ok_or_else(|| TransactionError::MissingInputs(vec![outpoint]))?;
        checks.push(PendingScriptCheck {
            tx: tx.clone(),
            input_index,
            lock_script: output.lock_script.clone(),
            flags,
        });
    }
    Ok(checks)
}

/// Run the checks inline, on the caller thread. Used at admission, where
/// each object carries few inputs.
pub fn run_inline<H: ChainHistory>(
    checks: &[PendingScriptCheck],
    history: &H,
) -> Result<(), ValidationError> {
    for check in checks {
        check
            .run(history)
            .map_err(TransactionError::Script)?;
    }
    Ok(())
}

/// A snapshot of the active chain's hashes, cheap to clone across worker
/// tasks.
#[derive(Clone, Debug)]
pub struct ChainSnapshot {
    hashes: Arc<Vec<block::Hash>>,
}

impl ChainSnapshot {
    pub fn new(hashes: Vec<block::Hash>) -> ChainSnapshot {
        ChainSnapshot {
            hashes: Arc::new(hashes),
        }
    }
}

impl ChainHistory for ChainSnapshot {
    fn block_hash_at(&self, height: block::Height) -> Option<block::Hash> {
        self.hashes.get(height.0 as usize).copied()
    }

    fn tip_height(&self) -> block::Height {
        block::Height((self.hashes.len() as u32).saturating_sub(1))
    }
}

/// Fan the checks out over at most `parallelism` concurrent blocking
/// tasks, rejoining before returning. The first failure wins.
pub async fn run_parallel(
    checks: Vec<PendingScriptCheck>,
    history: ChainSnapshot,
    parallelism: usize,
) -> Result<(), ValidationError> {
    let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
    let mut handles = Vec::with_capacity(checks.len());

    trace!(
        checks = checks.len(),
        parallelism,
        "running script checks in parallel"
    );

    for check in checks {
        let permit = semaphore.clone().acquire_owned().await.expect(
            "script-check semaphore is never closed",
        );
        let history = history.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let result = check.run(&history);
            drop(permit);
            result
        }));
    }

    for handle in handles {
        handle
            .await
            .expect("script-check tasks do not panic")
            .map_err(TransactionError::Script)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryInto;
    use zenith_chain::transaction::LockTime;
    use zenith_chain::transparent::{Input, OutPoint, Output, Script};
    use zenith_state::{Coin, MemoryState, StateDelta, WriteableCoinView};

    fn anyone_can_spend_chain() -> (MemoryState, Arc<Transaction>) {
        let mut base = MemoryState::default();
        let source = Transaction::new(
            1,
            vec![],
            vec![Output {
                value: 1_000i64.try_into().unwrap(),
                // OP_1: trivially true
                lock_script: Script(vec![0x51]),
            }],
            LockTime::unlocked(),
        );
        let source_hash = source.hash();
        let mut delta = StateDelta::default();
        delta
            .coins
            .insert(source_hash, Some(Coin::from_tx(&source, block::Height(1))));
        base.batch_write(delta).unwrap();

        let spender = Arc::new(Transaction::new(
            1,
            vec![Input::PrevOut {
                outpoint: OutPoint {
                    hash: source_hash,
                    index: 0,
                },
                unlock_script: Script(vec![]),
                sequence: 0,
            }],
            vec![Output {
                value: 900i64.try_into().unwrap(),
                lock_script: Script(vec![0x51]),
            }],
            LockTime::unlocked(),
        ));
        (base, spender)
    }

    #[test]
    fn inline_checks_pass_for_trivial_scripts() {
        let (base, spender) = anyone_can_spend_chain();
        let checks =
            collect_checks(&spender, &base, VerificationFlags::consensus()).unwrap();
        assert_eq!(checks.len(), 1);
        let history = ChainSnapshot::new(vec![block::Hash([0; 32]); 3]);
        run_inline(&checks, &history).unwrap();
    }

    #[tokio::test]
    async fn parallel_checks_pass_for_trivial_scripts() {
        let (base, spender) = anyone_can_spend_chain();
        let checks =
            collect_checks(&spender, &base, VerificationFlags::consensus()).unwrap();
        let history = ChainSnapshot::new(vec![block::Hash([0; 32]); 3]);
        run_parallel(checks, history, 4).await.unwrap();
    }
}
