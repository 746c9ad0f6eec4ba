//! Caller-side driver for [`Uploader`].
//!
//! Works through every queued batch: `next` until the head queue is fully
//! uploaded, then `done_uploads`. A master version conflict restarts the batch
//! with `first = true`. Retryable errors, and conflicts after the first one in
//! a row, back off and count against the policy's limit.

use tracing::{info, warn};

use super::backoff::RetryPolicy;
use super::upload::{
    DoneUploadsCompletion, NextCompletion, NextResult, UploadError, Uploader,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub files_uploaded: usize,
    pub deletions_uploaded: usize,
    pub batches_finalized: usize,
    pub conflicts: usize,
    pub retries: usize,
}

enum Step {
    Continue,
    Conflict,
    Finalized,
    Finished,
}

pub struct UploadRunner {
    uploader: Uploader,
    policy: RetryPolicy,
}

impl UploadRunner {
    pub fn new(uploader: Uploader, policy: RetryPolicy) -> Self {
        Self { uploader, policy }
    }

    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    /// Runs until no upload queue is left.
    pub async fn drain(&self) -> Result<RunSummary, UploadError> {
        let mut summary = RunSummary::default();
        let mut first = true;
        let mut failures = 0u32;
        let mut conflicts = 0u32;

        loop {
            match self.step(first, &mut summary).await {
                Ok(Step::Continue) => {
                    first = false;
                    failures = 0;
                    conflicts = 0;
                }
                Ok(Step::Finalized) => {
                    first = true;
                    failures = 0;
                    conflicts = 0;
                }
                Ok(Step::Conflict) => {
                    first = true;
                    failures = 0;
                    conflicts += 1;
                    // The first conflict restarts at once; later ones count as failures.
                    if conflicts > 1 {
                        let repeats = conflicts - 1;
                        if !self.policy.allows_retry(repeats) {
                            return Err(UploadError::RepeatedConflicts {
                                attempts: conflicts,
                            });
                        }
                        let delay = self.policy.delay(repeats - 1);
                        warn!(
                            conflicts,
                            delay_ms = delay.as_millis() as u64,
                            "master version conflict again, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Ok(Step::Finished) => {
                    info!(
                        files_uploaded = summary.files_uploaded,
                        deletions_uploaded = summary.deletions_uploaded,
                        batches_finalized = summary.batches_finalized,
                        "upload queues drained"
                    );
                    return Ok(summary);
                }
                Err(err) => {
                    failures += 1;
                    if !err.is_retryable() || !self.policy.allows_retry(failures) {
                        return Err(err);
                    }
                    let delay = self.policy.delay(failures - 1);
                    warn!(
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        "upload step failed, retrying: {err}"
                    );
                    summary.retries += 1;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn step(&self, first: bool, summary: &mut RunSummary) -> Result<Step, UploadError> {
        match self.uploader.next(first).await? {
            NextResult::NoUploads => Ok(Step::Finished),
            NextResult::Started(pending) => match pending.completion().await? {
                NextCompletion::FileUploaded(_) => {
                    summary.files_uploaded += 1;
                    Ok(Step::Continue)
                }
                NextCompletion::UploadDeletion { .. } => {
                    summary.deletions_uploaded += 1;
                    Ok(Step::Continue)
                }
                NextCompletion::MasterVersionUpdate => {
                    summary.conflicts += 1;
                    Ok(Step::Conflict)
                }
            },
            NextResult::AllUploadsCompleted => match self.uploader.done_uploads().await? {
                DoneUploadsCompletion::DoneUploads { .. } => {
                    summary.batches_finalized += 1;
                    Ok(Step::Finalized)
                }
                DoneUploadsCompletion::MasterVersionUpdate => {
                    summary.conflicts += 1;
                    Ok(Step::Conflict)
                }
            },
        }
    }
}
