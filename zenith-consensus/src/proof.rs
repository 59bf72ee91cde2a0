//! SNARK proof verification.
//!
//! The circuits themselves are external; this module owns the seam. Proofs
//! are verified in one of three modes: disabled (trusted contexts and
//! tests), synchronously on the caller thread, or asynchronously through
//! the batching task. Batched results re-enter the admission pipeline at
//! its proof stage: a failure evicts the object and its pool dependents.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use zenith_chain::{
    certificate::Certificate,
    sidechain::{FieldElement, ScVk},
    transaction::{self, CswInput},
};

/// How the admission pipeline treats proofs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProofVerification {
    /// Accept without verification.
    Disabled,
    /// Verify on the caller thread before admission.
    Sync,
    /// Queue for the batch verifier; admit as partially validated.
    Async,
}

/// The outcome of a (batched) verification.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VerifyOutcome {
    Verified,
    Failed,
}

/// One queued verification job.
#[derive(Clone, Debug)]
pub enum ProofJob {
    Certificate {
        cert: Arc<Certificate>,
        vk: ScVk,
        constant: Option<FieldElement>,
    },
    Csw {
        tx_hash: transaction::Hash,
        input: CswInput,
        vk: ScVk,
    },
}

impl ProofJob {
    /// The pool object this job vouches for.
    pub fn subject(&self) -> transaction::Hash {
        match self {
            ProofJob::Certificate { cert, .. } => cert.hash(),
            ProofJob::Csw { tx_hash, .. } => *tx_hash,
        }
    }
}

/// The external verifier entry point.
///
/// Implementations wrap the proving-system library; tests substitute maps
/// of predetermined verdicts.
pub trait ProofVerifier: Send + Sync + 'static {
    fn verify(&self, job: &ProofJob) -> VerifyOutcome;
}

/// A test verifier with per-subject verdicts, defaulting to `Verified`.
#[derive(Default)]
pub struct FixedVerifier {
    verdicts: Mutex<HashMap<transaction::Hash, VerifyOutcome>>,
}

impl FixedVerifier {
    pub fn failing_for(subjects: impl IntoIterator<Item = transaction::Hash>) -> FixedVerifier {
        let verdicts = subjects
            .into_iter()
            .map(|subject| (subject, VerifyOutcome::Failed))
            .collect();
        FixedVerifier {
            verdicts: Mutex::new(verdicts),
        }
    }
}

impl ProofVerifier for FixedVerifier {
    fn verify(&self, job: &ProofJob) -> VerifyOutcome {
        self.verdicts
            .lock()
            .expect("verdict map is never poisoned")
            .get(&job.subject())
            .copied()
            .unwrap_or(VerifyOutcome::Verified)
    }
}

/// A verifier that accepts any structurally well-formed proof.
///
/// The default stand-in while no proving-system backend is linked: it
/// enforces the size and shape bounds but vouches for nothing
/// cryptographic. Deployments wire a real backend behind [`ProofVerifier`].
pub struct StructuralVerifier;

impl ProofVerifier for StructuralVerifier {
    fn verify(&self, job: &ProofJob) -> VerifyOutcome {
        let well_formed = match job {
            ProofJob::Certificate { cert, vk, .. } => {
                cert.proof.is_well_formed() && vk.is_well_formed()
            }
            ProofJob::Csw { input, vk, .. } => {
                input.proof.is_well_formed() && vk.is_well_formed()
            }
        };
        if well_formed {
            VerifyOutcome::Verified
        } else {
            VerifyOutcome::Failed
        }
    }
}

/// A queued job plus its result channel.
struct QueuedJob {
    job: ProofJob,
    result: oneshot::Sender<VerifyOutcome>,
}

/// The batching front of the proof verifier.
///
/// Jobs accumulate until the batch is full or the queue idles, then the
/// whole batch runs on the dedicated verifier task. The shutdown flag is
/// polled between batches, never inside one.
pub struct BatchVerifier {
    queue: mpsc::UnboundedSender<QueuedJob>,
}

/// The largest batch handed to the external verifier in one call.
const MAX_BATCH: usize = 32;

impl BatchVerifier {
    /// Spawn the verifier task on the current tokio runtime.
    pub fn spawn<P: ProofVerifier>(
        verifier: Arc<P>,
        shutdown: Arc<std::sync::atomic::AtomicBool>,
    ) -> BatchVerifier {
        let (queue, mut rx) = mpsc::unbounded_channel::<QueuedJob>();

        tokio::spawn(async move {
            let mut batch: Vec<QueuedJob> = Vec::with_capacity(MAX_BATCH);
            loop {
                if shutdown.load(std::sync::atomic::Ordering::SeqCst) {
                    info!("proof verifier shutting down");
                    break;
                }

                // wait for the first job, then drain greedily up to the
                // batch bound
                match rx.recv().await {
                    Some(job) => batch.push(job),
                    None => break,
                }
                while batch.len() < MAX_BATCH {
                    match rx.try_recv() {
                        Ok(job) => batch.push(job),
                        Err(_) => break,
                    }
                }

                debug!(jobs = batch.len(), "verifying proof batch");
                metrics::counter!("consensus.proof.batches", 1);
                for queued in batch.drain(..) {
                    let outcome = verifier.verify(&queued.job);
                    if outcome == VerifyOutcome::Failed {
                        warn!(subject = %queued.job.subject(), "proof verification failed");
                    }
                    let _ = queued.result.send(outcome);
                }
            }
        });

        BatchVerifier { queue }
    }

    /// Queue a job; the returned receiver resolves with the verdict.
    pub fn submit(&self, job: ProofJob) -> oneshot::Receiver<VerifyOutcome> {
        let (result, receiver) = oneshot::channel();
        if self.queue.send(QueuedJob { job, result }).is_err() {
            // verifier is gone; the receiver will report Closed and the
            // caller treats it as an operational error
        }
        receiver
    }
}

/// Verify synchronously, on the caller thread.
pub fn verify_now<P: ProofVerifier>(verifier: &P, job: &ProofJob) -> VerifyOutcome {
    verifier.verify(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use zenith_chain::amount::Amount;
    use zenith_chain::sidechain::{ScProof, Scid};

    fn cert_job(salt: u8) -> ProofJob {
        ProofJob::Certificate {
            cert: Arc::new(Certificate::new(
                Scid([salt; 32]),
                0,
                1,
                FieldElement([salt; 32]),
                ScProof(vec![salt]),
                vec![],
                vec![],
                vec![],
                vec![],
                Amount::zero(),
                Amount::zero(),
            )),
            vk: ScVk(vec![1; 8]),
            constant: None,
        }
    }

    #[tokio::test]
    async fn batch_verifier_resolves_submitted_jobs() {
        let job_ok = cert_job(1);
        let job_bad = cert_job(2);
        let verifier = Arc::new(FixedVerifier::failing_for(vec![job_bad.subject()]));
        let shutdown = Arc::new(AtomicBool::new(false));
        let batcher = BatchVerifier::spawn(verifier, shutdown);

        let ok = batcher.submit(job_ok);
        let bad = batcher.submit(job_bad);

        assert_eq!(ok.await.unwrap(), VerifyOutcome::Verified);
        assert_eq!(bad.await.unwrap(), VerifyOutcome::Failed);
    }
}
