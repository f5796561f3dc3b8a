//! Parallel script verification
//!
//! Script execution itself belongs to the interpreter collaborator; this
//! module owns the fan-out. Input checks are independent of one another, so
//! they run across a scoped worker pool. Workers stop early once any input
//! fails (a per-run kill switch) or the caller's cancellation flag is
//! raised; the verdict is collected deterministically (lowest failing job
//! wins) before the chain view moves.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{ConsensusError, Result};
use crate::types::{Transaction, TxOut};

/// External script interpreter seam.
pub trait ScriptVerifier: Send + Sync {
    /// Verify the signature script of `input_index` against the output it
    /// spends.
    fn verify_input(&self, tx: &Transaction, input_index: usize, spent_output: &TxOut) -> bool;
}

/// One pending input verification.
pub struct ScriptJob<'a> {
    pub tx: &'a Transaction,
    pub tx_index: usize,
    pub input_index: usize,
    pub spent_output: TxOut,
}

/// Run every job through the verifier across `workers` threads.
///
/// Returns the first failure in (tx_index, input_index) order, regardless of
/// which worker observed it first. `cancel` is the caller's cancellation
/// flag and is only ever read; worker early-exit after a failure rides on a
/// kill switch local to this run, so one bad input does not poison later
/// runs sharing the flag.
pub fn validate_script_jobs(
    jobs: &[ScriptJob<'_>],
    verifier: &dyn ScriptVerifier,
    workers: usize,
    cancel: &AtomicBool,
) -> Result<()> {
    if jobs.is_empty() {
        return Ok(());
    }
    let workers = workers.max(1).min(jobs.len());
    let next_job = AtomicUsize::new(0);
    let abort = AtomicBool::new(false);
    let first_failure: Mutex<Option<(usize, usize)>> = Mutex::new(None);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                if abort.load(Ordering::Relaxed) || cancel.load(Ordering::Relaxed) {
                    return;
                }
                let index = next_job.fetch_add(1, Ordering::Relaxed);
                if index >= jobs.len() {
                    return;
                }
                let job = &jobs[index];
                if !verifier.verify_input(job.tx, job.input_index, &job.spent_output) {
                    let mut failure = first_failure.lock().unwrap();
                    let key = (job.tx_index, job.input_index);
                    if failure.map_or(true, |existing| key < existing) {
                        *failure = Some(key);
                    }
                    abort.store(true, Ordering::Relaxed);
                    return;
                }
            });
        }
    });

    let first_failure = *first_failure.lock().unwrap();
    match first_failure {
        Some((tx_index, input_index)) => Err(ConsensusError::InvalidTx(format!(
            "script verification failed for transaction {} input {}",
            tx_index, input_index
        ))),
        None if cancel.load(Ordering::Relaxed) => Err(ConsensusError::Internal(
            "script verification cancelled".to_string(),
        )),
        None => Ok(()),
    }
}
