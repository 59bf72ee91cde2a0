//! The mempool admission pipeline.
//!
//! Nine stages, any failure terminating with an error kind and DoS score:
//! context-free checks, standardness, mempool conflict rejection, coin
//! availability, script verification, sidechain contextual checks, fee
//! gating, proof verification, and the commit into the pool.
//!
//! Callers hold `cs_main` before `cs_mempool` across a call, as everywhere
//! else.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, trace};

use zenith_chain::{
    amount::{Amount, NonNegative},
    block,
    certificate::Certificate,
    parameters::DEFAULT_MIN_RELAY_TX_FEE,
    transaction::Transaction,
};

use zenith_mempool::{CertEntry, Mempool, MempoolCoinView, ReferencedHeights, TxEntry};
use zenith_script::{ChainHistory, VerificationFlags};
use zenith_state::{ChainState, CoinView, WriteableCoinView};

use crate::check;
use crate::contextual;
use crate::error::{CertificateError, TransactionError, ValidationError};
use crate::proof::{self, BatchVerifier, ProofJob, ProofVerification, ProofVerifier, VerifyOutcome};
use crate::script_verify;

/// Configuration of one admission call.
#[derive(Clone, Debug)]
pub struct AdmissionFlags {
    /// Skip the fee gate for high-priority transactions.
    pub limit_free: bool,
    /// Reject fees past `ABSURD_FEE_MULTIPLIER` times the relay floor.
    pub reject_absurd_fee: bool,
    /// Require standard output scripts.
    pub require_standard: bool,
    /// How to treat SNARK proofs.
    pub proof_verification: ProofVerification,
    /// The relay fee floor, zatoshi per 1000 bytes.
    pub min_relay_fee: u64,
    /// Relay bound on transparent inputs per transaction; `None` disables
    /// it.
    pub max_tx_inputs: Option<usize>,
}

impl Default for AdmissionFlags {
    fn default() -> Self {
        AdmissionFlags {
            limit_free: true,
            reject_absurd_fee: true,
            require_standard: true,
            proof_verification: ProofVerification::Async,
            min_relay_fee: DEFAULT_MIN_RELAY_TX_FEE,
            max_tx_inputs: None,
        }
    }
}

/// A fee this many times past the relay floor is a likely user error.
const ABSURD_FEE_MULTIPLIER: u64 = 10_000;

/// What the pipeline decided.
#[derive(Debug)]
pub enum AdmissionOutcome {
    /// Fully validated and committed.
    Valid,
    /// Committed with proofs still in flight; each receiver resolves with
    /// the batch verifier's verdict. On a failed verdict the caller must
    /// remove the object and its dependents.
    PartiallyValidated(Vec<oneshot::Receiver<VerifyOutcome>>),
    /// Not committed: inputs missing; route to the orphan pool.
    MissingInputs(Vec<zenith_chain::transparent::OutPoint>),
}

/// `ChainHistory` over the active chain, for replay-protection checks.
pub struct ActiveChainHistory<'a, V> {
    pub chain: &'a ChainState<V>,
}

impl<'a, V: WriteableCoinView> ChainHistory for ActiveChainHistory<'a, V> {
    fn block_hash_at(&self, height: block::Height) -> Option<block::Hash> {
        self.chain.hash_at(height)
    }

    fn tip_height(&self) -> block::Height {
        self.chain.tip_height().unwrap_or(block::Height(0))
    }
}

/// Run the admission pipeline for a loose transaction.
#[allow(clippy::too_many_arguments)]
pub fn accept_transaction<V, R, P>(
    chain: &ChainState<V>,
    mempool: &mut Mempool,
    resolver: &R,
    verifier: &Arc<P>,
    batcher: Option<&BatchVerifier>,
    flags: &AdmissionFlags,
    tx: Arc<Transaction>,
) -> Result<AdmissionOutcome, ValidationError>
where
    V: WriteableCoinView,
    R: ReferencedHeights,
    P: ProofVerifier,
{
    let hash = tx.hash();
    let tip_height = chain.tip_height().unwrap_or(block::Height(0));

    // stage 1: context-free
    check::transaction::check(&tx)?;
    if tx.is_coinbase() {
        return Err(TransactionError::UnexpectedCoinbase.into());
    }

    // stage 2: standardness
    if flags.require_standard {
        let history = ActiveChainHistory { chain };
        contextual::outputs_are_standard(&tx.outputs, &history, flags.min_relay_fee, false)?;
    }
    if let Some(limit) = flags.max_tx_inputs {
        if tx.inputs.len() > limit {
            return Err(TransactionError::NonStandardScript.into());
        }
    }

    // stage 3: mempool conflicts
    if mempool.contains(&hash) {
        return Err(TransactionError::Conflict.into());
    }
    if !mempool.check_incoming_tx_conflicts(&tx) {
        return Err(TransactionError::Conflict.into());
    }

    // stages 4 and 6 read through the mempool-composed view
    let view = MempoolCoinView::new(&chain.coins, mempool, resolver);

    if view
        .have_coins(&hash)
        .map_err(|_| TransactionError::Conflict)?
    {
        return Err(TransactionError::Conflict.into());
    }

    // stage 4: coin availability and maturity
    let value_in_transparent =
        match contextual::inputs_are_available(tx.spent_outpoints(), &view, tip_height) {
            Ok(value) => value,
            Err(ValidationError::Transaction(TransactionError::MissingInputs(missing))) => {
                trace!(%hash, missing = missing.len(), "missing inputs, orphan candidate");
                return Ok(AdmissionOutcome::MissingInputs(missing));
            }
            Err(error) => return Err(error),
        };
    contextual::shielded_requirements(&tx, &view)?;

    // stage 5: script verification with the policy flag set
    let script_flags = if flags.require_standard {
        VerificationFlags::standard()
    } else {
        VerificationFlags::consensus()
    };
    let checks = script_verify::collect_checks(&tx, &view, script_flags)?;
    let history = ActiveChainHistory { chain };
    script_verify::run_inline(&checks, &history)?;

    // stage 6: sidechain contextual checks
    contextual::transaction_sidechain_rules(&tx, &view, mempool, &chain.params)?;

    // stage 7: fee gating, with any operator prioritisation applied
    let fee = compute_fee(&tx, value_in_transparent)?;
    let size = tx.len();
    let priority = initial_priority(value_in_transparent, size);
    let (priority_delta, fee_delta) = mempool.deltas_for(&hash);
    gate_fee(
        apply_fee_delta(fee, fee_delta),
        size,
        priority + priority_delta,
        flags,
        &mempool.fee_estimator,
    )?;

    // stage 8: proof verification
    let jobs = csw_proof_jobs(&tx, &view)?;
    let pending = run_proof_stage(jobs, flags.proof_verification, verifier, batcher, hash)?;

    // stage 9: commit
    let entry = TxEntry {
        tx,
        fee,
        size,
        time: chrono::Utc::now().timestamp(),
        start_priority: priority,
        input_value: value_in_transparent,
        height: tip_height,
    };
    mempool
        .add_tx_unchecked(entry)
        .map_err(|_| TransactionError::Conflict)?;
    debug!(%hash, "transaction accepted to mempool");

    Ok(match pending {
        Some(pending) => AdmissionOutcome::PartiallyValidated(pending),
        None => AdmissionOutcome::Valid,
    })
}

/// Run the admission pipeline for a loose certificate.
#[allow(clippy::too_many_arguments)]
pub fn accept_certificate<V, R, P>(
    chain: &ChainState<V>,
    mempool: &mut Mempool,
    resolver: &R,
    verifier: &Arc<P>,
    batcher: Option<&BatchVerifier>,
    flags: &AdmissionFlags,
    cert: Arc<Certificate>,
) -> Result<AdmissionOutcome, ValidationError>
where
    V: WriteableCoinView,
    R: ReferencedHeights,
    P: ProofVerifier,
{
    let hash = cert.hash();
    let tip_height = chain.tip_height().unwrap_or(block::Height(0));

    // stage 1: context-free
    check::certificate::check(&cert)?;

    // stage 2: standardness of change outputs
    if flags.require_standard {
        let history = ActiveChainHistory { chain };
        contextual::outputs_are_standard(&cert.outputs, &history, flags.min_relay_fee, false)?;
    }

    // stage 3: mempool conflicts (including the quality-dependency rule)
    if !mempool.check_incoming_cert_conflicts(&cert) {
        return Err(CertificateError::QualityConflict.into());
    }

    let view = MempoolCoinView::new(&chain.coins, mempool, resolver);

    // stage 4: coin availability and maturity
    let value_in =
        match contextual::inputs_are_available(cert.spent_outpoints(), &view, tip_height) {
            Ok(value) => value,
            Err(ValidationError::Transaction(TransactionError::MissingInputs(missing))) => {
                return Ok(AdmissionOutcome::MissingInputs(missing));
            }
            Err(error) => return Err(error),
        };

    // stage 5: script verification over the certificate's inputs
    // (certificates reuse the transaction sighash over their own encoding;
    // the checker consumes the same shape)
    // Certificate inputs are rare change spends; check them inline.
    // The transaction-shaped checker needs a Transaction; certificates
    // carry their own inputs, so the script stage builds a shim.
    let shim = certificate_input_shim(&cert);
    let checks = script_verify::collect_checks(&shim, &view, VerificationFlags::standard())?;
    let history = ActiveChainHistory { chain };
    script_verify::run_inline(&checks, &history)?;

    // stage 6: sidechain contextual checks
    contextual::certificate_sidechain_rules(&cert, &view, mempool, resolver, tip_height)?;

    // stage 7: fee gating, with any operator prioritisation applied
    let change = cert
        .change_total()
        .map_err(TransactionError::from)?;
    let fee = (value_in - change).map_err(|_| TransactionError::ValueOutOfRange)?;
    // certificates are priced like transactions but never free
    let size = 1_000.max(cert.proof.0.len());
    let (_priority_delta, fee_delta) = mempool.deltas_for(&hash);
    if fee_rate(apply_fee_delta(fee, fee_delta), size) < flags.min_relay_fee {
        return Err(TransactionError::FeeTooLow.into());
    }

    // stage 8: proof verification
    let record = view
        .sidechain(&cert.scid)
        .ok()
        .flatten()
        .ok_or(CertificateError::BadTiming)?;
    let job = ProofJob::Certificate {
        cert: cert.clone(),
        vk: record.cert_vk.clone(),
        constant: record.constant,
    };
    let pending =
        run_proof_stage(vec![job], flags.proof_verification, verifier, batcher, hash)?;

    // stage 9: commit
    let entry = CertEntry {
        cert,
        fee,
        size,
        time: chrono::Utc::now().timestamp(),
        height: tip_height,
    };
    mempool
        .add_cert_unchecked(entry)
        .map_err(|_| CertificateError::QualityConflict)?;
    debug!(%hash, "certificate accepted to mempool");

    Ok(match pending {
        Some(pending) => AdmissionOutcome::PartiallyValidated(pending),
        None => AdmissionOutcome::Valid,
    })
}

/// Proof jobs for a transaction: one per csw input, against the ceased
/// verification key of its sidechain.
fn csw_proof_jobs<V: CoinView>(
    tx: &Arc<Transaction>,
    view: &V,
) -> Result<Vec<ProofJob>, ValidationError> {
    let mut jobs = Vec::new();
    for csw in tx.csw_inputs() {
        let record = view
            .sidechain(&csw.scid)
            .ok()
            .flatten()
            .ok_or(crate::error::SidechainRuleError::ScidNotFound(csw.scid))?;
        let vk = record
            .ceased_vk
            .clone()
            .ok_or(crate::error::SidechainRuleError::CswUnsupported(csw.scid))?;
        jobs.push(ProofJob::Csw {
            tx_hash: tx.hash(),
            input: csw.clone(),
            vk,
        });
    }
    Ok(jobs)
}

fn run_proof_stage<P: ProofVerifier>(
    jobs: Vec<ProofJob>,
    mode: ProofVerification,
    verifier: &Arc<P>,
    batcher: Option<&BatchVerifier>,
    subject: zenith_chain::transaction::Hash,
) -> Result<Option<Vec<oneshot::Receiver<VerifyOutcome>>>, ValidationError> {
    if jobs.is_empty() {
        return Ok(None);
    }
    match mode {
        ProofVerification::Disabled => Ok(None),
        ProofVerification::Sync => {
            for job in &jobs {
                if proof::verify_now(verifier.as_ref(), job) == VerifyOutcome::Failed {
                    return Err(ValidationError::ProofVerificationFailed(subject));
                }
            }
            Ok(None)
        }
        ProofVerification::Async => {
            let batcher =
                batcher.expect("async proof verification requires a running batch verifier");
            Ok(Some(
                jobs.into_iter().map(|job| batcher.submit(job)).collect(),
            ))
        }
    }
}

fn compute_fee(
    tx: &Transaction,
    value_in_transparent: Amount<NonNegative>,
) -> Result<Amount<NonNegative>, ValidationError> {
    let intrinsic = tx.intrinsic_balance().map_err(TransactionError::from)?;
    // a negative sum means inputs are smaller than outputs
    (value_in_transparent + intrinsic)
        .map_err(|_| TransactionError::ValueOutOfRange.into())
}

fn initial_priority(value_in: Amount<NonNegative>, size: usize) -> f64 {
    value_in.zatoshi() as f64 / size.max(1) as f64
}

/// Fold an operator fee adjustment into the fee used for gating, clamping
/// to the valid amount range. The stored entry keeps the real fee.
fn apply_fee_delta(fee: Amount<NonNegative>, fee_delta: i64) -> Amount<NonNegative> {
    use std::convert::TryInto;
    let adjusted = fee
        .zatoshi()
        .saturating_add(fee_delta)
        .clamp(0, zenith_chain::amount::MAX_MONEY);
    adjusted
        .try_into()
        .expect("clamped value is inside the valid range")
}

fn fee_rate(fee: Amount<NonNegative>, size: usize) -> u64 {
    (fee.zatoshi() as u64).saturating_mul(1000) / size.max(1) as u64
}

fn gate_fee(
    fee: Amount<NonNegative>,
    size: usize,
    priority: f64,
    flags: &AdmissionFlags,
    estimator: &zenith_mempool::FeeEstimator,
) -> Result<(), ValidationError> {
    let rate = fee_rate(fee, size);

    if rate < flags.min_relay_fee {
        // the free-relay path: sufficient priority may stand in for fee
        let floor = estimator.estimate_priority(1).unwrap_or(0.0);
        let free_allowed = flags.limit_free && priority > floor && priority > 0.0;
        if !free_allowed {
            return Err(TransactionError::FeeTooLow.into());
        }
    }

    if flags.reject_absurd_fee
        && rate > flags.min_relay_fee.saturating_mul(ABSURD_FEE_MULTIPLIER)
    {
        return Err(TransactionError::AbsurdFee.into());
    }
    Ok(())
}

/// Build a transaction-shaped view of a certificate's transparent inputs,
/// so the script checker can evaluate them.
fn certificate_input_shim(cert: &Certificate) -> Arc<Transaction> {
    use zenith_chain::transaction::LockTime;
    Arc::new(Transaction::new(
        1,
        cert.inputs.clone(),
        cert.outputs.clone(),
        LockTime::unlocked(),
    ))
}
