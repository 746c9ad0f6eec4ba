//! Upload coordination.
//!
//! [`Uploader::next`] picks the next tracker of the head queue, marks it
//! `uploading` and dispatches exactly one server call on a spawned task. The
//! task applies the response in a fresh transaction and its result is handed
//! back through [`PendingUpload`]. Once every tracker of the head queue is
//! `uploaded`, [`Uploader::done_uploads`] finalizes the batch.
//!
//! Only one tracker may be `uploading` at any time. The coordinator never
//! retries on its own; callers call `next` again.

use std::sync::Arc;

use syncserver_core::ClientError;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use super::directory::{self, LocalStateError};
use super::events::{self, SyncEvent};
use super::master_version::{Fenced, MasterVersion, UploadReceipt};
use super::queue::{FileTracker, TrackerOperation, UploadStatus};
use super::store::{StoreError, UploadStore};
use super::transport::{FileToDelete, FileToUpload, ServerApi};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("another file is already uploading")]
    AlreadyUploadingAFile,
    #[error(transparent)]
    LocalState(#[from] LocalStateError),
    #[error("there is no upload queue to finalize")]
    NoUploadQueue,
    #[error("upload queue {queue_id} still has {pending} unfinished file(s)")]
    UploadsPending { queue_id: i64, pending: usize },
    #[error("transport error: {0}")]
    Transport(#[from] ClientError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("upload task failed: {0}")]
    Task(#[from] JoinError),
    #[error("master version still superseded after {attempts} consecutive conflicts")]
    RepeatedConflicts { attempts: u32 },
}

impl UploadError {
    /// Whether calling `next` again may succeed without outside intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Transport(err) => err.is_retryable(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncAttributes {
    pub file_uuid: String,
    pub mime_type: String,
    pub creation_date: OffsetDateTime,
    pub update_date: OffsetDateTime,
    pub app_meta_data: Option<String>,
}

#[derive(Debug)]
pub enum NextResult {
    Started(PendingUpload),
    NoUploads,
    AllUploadsCompleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextCompletion {
    FileUploaded(SyncAttributes),
    UploadDeletion { file_uuid: String },
    /// The server was at another master version. The whole queue has been
    /// reset and the new version adopted.
    MasterVersionUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneUploadsCompletion {
    DoneUploads { number_transferred: i64 },
    MasterVersionUpdate,
}

/// The in-flight server call started by [`Uploader::next`]. Its result is
/// delivered exactly once, even if this handle is dropped unawaited.
#[derive(Debug)]
pub struct PendingUpload {
    file_uuid: String,
    handle: JoinHandle<Result<NextCompletion, UploadError>>,
}

impl PendingUpload {
    pub fn file_uuid(&self) -> &str {
        &self.file_uuid
    }

    pub async fn completion(self) -> Result<NextCompletion, UploadError> {
        self.handle.await?
    }
}

enum Dispatch {
    Upload(FileToUpload),
    Deletion(FileToDelete),
}

#[derive(Clone)]
pub struct Uploader {
    store: UploadStore,
    server: Arc<dyn ServerApi>,
    events: broadcast::Sender<SyncEvent>,
}

impl Uploader {
    pub fn new(store: UploadStore, server: Arc<dyn ServerApi>) -> Self {
        Self {
            store,
            server,
            events: events::channel(),
        }
    }

    pub fn store(&self) -> &UploadStore {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Starts the next upload or deletion of the head queue.
    ///
    /// `first` marks the first call of a batch and triggers a
    /// [`SyncEvent::WillStartUploads`] notification.
    pub async fn next(&self, first: bool) -> Result<NextResult, UploadError> {
        let mut txn = self.store.begin().await?;
        let Some(queue) = txn.head_queue().await? else {
            return Ok(NextResult::NoUploads);
        };

        if txn.count_uploading().await? > 0 {
            error!(queue_id = queue.id, "refusing to start: a file is already uploading");
            return Err(UploadError::AlreadyUploadingAFile);
        }

        let pending = queue.pending_counts();
        let Some(tracker) = queue.next_upload().cloned() else {
            return Ok(NextResult::AllUploadsCompleted);
        };

        // Versions come from the directory as it is now, not as it was when
        // the tracker was enqueued.
        let entry = txn.directory_entry(&tracker.file_uuid).await?;
        let dispatch = match &tracker.operation {
            TrackerOperation::Deletion => {
                let file_version = directory::deletion_version(&tracker.file_uuid, entry.as_ref())
                    .inspect_err(|err| error!(file_uuid = %tracker.file_uuid, "cannot delete: {err}"))?;
                Dispatch::Deletion(FileToDelete {
                    file_uuid: tracker.file_uuid.clone(),
                    file_version,
                })
            }
            TrackerOperation::Upload(content) => {
                let file_version = directory::upload_version(entry.as_ref());
                txn.set_file_version(tracker.id, file_version).await?;
                Dispatch::Upload(FileToUpload {
                    file_uuid: tracker.file_uuid.clone(),
                    mime_type: content.mime_type.clone(),
                    local_path: content.local_path.clone(),
                    app_meta_data: content.app_meta_data.clone(),
                    file_version,
                    undelete: tracker.upload_undeletion(),
                })
            }
        };

        if !txn.mark_uploading(tracker.id).await? {
            error!(tracker_id = tracker.id, "refusing to start: a file is already uploading");
            return Err(UploadError::AlreadyUploadingAFile);
        }
        let master_version = txn.master_version().await?;
        txn.commit().await?;

        if first {
            let _ = self.events.send(SyncEvent::WillStartUploads {
                number_file_uploads: pending.file_uploads,
                number_upload_deletions: pending.upload_deletions,
            });
        }

        let file_uuid = tracker.file_uuid.clone();
        let uploader = self.clone();
        let handle = tokio::spawn(async move {
            let tracker_id = tracker.id;
            let worker = uploader.clone();
            // The inner task isolates panics so the tracker is still released.
            let outcome = tokio::spawn(async move {
                worker
                    .dispatch(tracker, queue.id, dispatch, master_version)
                    .await
            })
            .await
            .unwrap_or_else(|err| Err(UploadError::Task(err)));
            if outcome.is_err() {
                uploader.release(tracker_id).await;
            }
            outcome
        });
        Ok(NextResult::Started(PendingUpload { file_uuid, handle }))
    }

    /// Returns a tracker that is still `uploading` to `not_started` after any
    /// failed completion. Re-sending an accepted upload is harmless.
    async fn release(&self, tracker_id: i64) {
        let released = async {
            let mut txn = self.store.begin().await?;
            let released = txn.release_uploading(tracker_id).await?;
            txn.commit().await?;
            Ok::<_, StoreError>(released)
        }
        .await;
        match released {
            Ok(true) => debug!(tracker_id, "tracker returned to not started"),
            Ok(false) => {}
            Err(err) => error!(tracker_id, "could not return tracker to not started: {err}"),
        }
    }

    async fn dispatch(
        self,
        tracker: FileTracker,
        queue_id: i64,
        dispatch: Dispatch,
        master_version: MasterVersion,
    ) -> Result<NextCompletion, UploadError> {
        match dispatch {
            Dispatch::Upload(file) => {
                info!(
                    file_uuid = %file.file_uuid,
                    file_version = file.file_version,
                    %master_version,
                    "uploading file"
                );
                let outcome = self.server.upload_file(&file, master_version).await;
                match self.settle(&tracker, queue_id, outcome).await? {
                    Fenced::Accepted(receipt) => self.file_uploaded(&tracker, file, receipt).await,
                    Fenced::Superseded(_) => Ok(NextCompletion::MasterVersionUpdate),
                }
            }
            Dispatch::Deletion(file) => {
                info!(
                    file_uuid = %file.file_uuid,
                    file_version = file.file_version,
                    %master_version,
                    "uploading deletion"
                );
                let outcome = self.server.upload_deletion(&file, master_version).await;
                match self.settle(&tracker, queue_id, outcome).await? {
                    Fenced::Accepted(()) => {
                        let mut txn = self.store.begin().await?;
                        txn.set_status(tracker.id, UploadStatus::Uploaded).await?;
                        txn.commit().await?;
                        Ok(NextCompletion::UploadDeletion {
                            file_uuid: file.file_uuid,
                        })
                    }
                    Fenced::Superseded(_) => Ok(NextCompletion::MasterVersionUpdate),
                }
            }
        }
    }

    /// Handles the failure and conflict outcomes shared by uploads and
    /// deletions, leaving only the accepted case to the caller.
    async fn settle<T>(
        &self,
        tracker: &FileTracker,
        queue_id: i64,
        outcome: Result<Fenced<T>, ClientError>,
    ) -> Result<Fenced<T>, UploadError> {
        match outcome {
            Ok(Fenced::Superseded(version)) => {
                self.adopt_master_version(queue_id, version).await?;
                Ok(Fenced::Superseded(version))
            }
            Ok(accepted) => Ok(accepted),
            Err(err) => {
                warn!(file_uuid = %tracker.file_uuid, "server call failed: {err}");
                Err(err.into())
            }
        }
    }

    async fn file_uploaded(
        &self,
        tracker: &FileTracker,
        file: FileToUpload,
        receipt: UploadReceipt,
    ) -> Result<NextCompletion, UploadError> {
        let mut txn = self.store.begin().await?;
        txn.set_status(tracker.id, UploadStatus::Uploaded).await?;
        let app_meta_data = match file.app_meta_data {
            Some(app_meta_data) => Some(app_meta_data),
            None => txn
                .directory_entry(&file.file_uuid)
                .await?
                .and_then(|entry| entry.app_meta_data),
        };
        txn.commit().await?;

        info!(
            file_uuid = %file.file_uuid,
            size_in_bytes = receipt.size_in_bytes,
            "file uploaded"
        );
        Ok(NextCompletion::FileUploaded(SyncAttributes {
            file_uuid: file.file_uuid,
            mime_type: file.mime_type,
            creation_date: receipt.creation_date,
            update_date: receipt.update_date,
            app_meta_data,
        }))
    }

    /// Conflict handling: the whole queue starts over under the server's
    /// master version.
    async fn adopt_master_version(
        &self,
        queue_id: i64,
        version: MasterVersion,
    ) -> Result<(), StoreError> {
        let mut txn = self.store.begin().await?;
        let reset = txn.reset_queue(queue_id).await?;
        txn.set_master_version(version).await?;
        txn.commit().await?;
        debug!(queue_id, %version, reset, "adopted server master version");
        Ok(())
    }

    /// Finalizes the head queue once all of its trackers are `uploaded`.
    ///
    /// On success the local master version moves forward by one, the
    /// confirmed changes land in the directory and the queue is retired.
    pub async fn done_uploads(&self) -> Result<DoneUploadsCompletion, UploadError> {
        let (queue, master_version) = {
            let mut txn = self.store.begin().await?;
            let queue = txn.head_queue().await?.ok_or(UploadError::NoUploadQueue)?;
            if !queue.all_uploaded() {
                return Err(UploadError::UploadsPending {
                    queue_id: queue.id,
                    pending: queue.trackers.len() - queue.count_with_status(UploadStatus::Uploaded),
                });
            }
            let master_version = txn.master_version().await?;
            txn.rollback().await?;
            (queue, master_version)
        };

        info!(queue_id = queue.id, %master_version, "finalizing uploads");
        match self.server.done_uploads(master_version).await? {
            Fenced::Accepted(number_transferred) => {
                let mut txn = self.store.begin().await?;
                txn.set_master_version(master_version.finalized()).await?;
                for tracker in &queue.trackers {
                    let existing = txn.directory_entry(&tracker.file_uuid).await?;
                    if let Some(entry) = directory::confirm(existing, tracker) {
                        txn.upsert_directory_entry(&entry).await?;
                    }
                }
                txn.retire_queue(queue.id).await?;
                txn.commit().await?;
                info!(queue_id = queue.id, number_transferred, "uploads finalized");
                Ok(DoneUploadsCompletion::DoneUploads { number_transferred })
            }
            Fenced::Superseded(version) => {
                self.adopt_master_version(queue.id, version).await?;
                Ok(DoneUploadsCompletion::MasterVersionUpdate)
            }
        }
    }
}

#[cfg(test)]
#[path = "upload_tests.rs"]
mod tests;
