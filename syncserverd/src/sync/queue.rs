use std::collections::HashSet;
use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("file uuid is not a valid UUID: {0}")]
    InvalidFileUuid(String),
    #[error("mime type is empty for file {0}")]
    EmptyMimeType(String),
    #[error("upload batch is empty")]
    EmptyBatch,
    #[error("file {0} appears more than once in the batch")]
    DuplicateFile(String),
    #[error("invalid upload status: {0}")]
    InvalidStatus(String),
}

/// Lifecycle of a single tracker. `Uploaded` is terminal; every failure
/// returns the tracker to `NotStarted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    NotStarted,
    Uploading,
    Uploaded,
}

impl UploadStatus {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::NotStarted => "not_started",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Uploaded => "uploaded",
        }
    }

    pub(crate) fn parse(value: &str) -> Result<Self, QueueError> {
        match value {
            "not_started" => Ok(UploadStatus::NotStarted),
            "uploading" => Ok(UploadStatus::Uploading),
            "uploaded" => Ok(UploadStatus::Uploaded),
            other => Err(QueueError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadContent {
    pub mime_type: String,
    /// Borrowed reference into the file store; the content is not owned here.
    pub local_path: PathBuf,
    pub app_meta_data: Option<String>,
    pub undelete: bool,
    pub file_size_bytes: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerOperation {
    Upload(UploadContent),
    Deletion,
}

/// Enqueue input for one file. Constructed through [`NewFileTracker::upload`]
/// or [`NewFileTracker::deletion`] so the file uuid is always well-formed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFileTracker {
    pub(crate) file_uuid: String,
    pub(crate) operation: TrackerOperation,
}

impl NewFileTracker {
    pub fn upload(
        file_uuid: &str,
        mime_type: impl Into<String>,
        local_path: impl Into<PathBuf>,
    ) -> Result<Self, QueueError> {
        let file_uuid = validate_file_uuid(file_uuid)?;
        let mime_type = mime_type.into();
        if mime_type.trim().is_empty() {
            return Err(QueueError::EmptyMimeType(file_uuid));
        }
        Ok(Self {
            file_uuid,
            operation: TrackerOperation::Upload(UploadContent {
                mime_type,
                local_path: local_path.into(),
                app_meta_data: None,
                undelete: false,
                file_size_bytes: None,
            }),
        })
    }

    pub fn deletion(file_uuid: &str) -> Result<Self, QueueError> {
        Ok(Self {
            file_uuid: validate_file_uuid(file_uuid)?,
            operation: TrackerOperation::Deletion,
        })
    }

    /// Ignored for deletions.
    pub fn with_app_meta_data(mut self, app_meta_data: Option<String>) -> Self {
        if let TrackerOperation::Upload(content) = &mut self.operation {
            content.app_meta_data = app_meta_data;
        }
        self
    }

    /// Ignored for deletions; undeletion only applies to uploads.
    pub fn with_undelete(mut self, undelete: bool) -> Self {
        if let TrackerOperation::Upload(content) = &mut self.operation {
            content.undelete = undelete;
        }
        self
    }

    pub fn with_file_size(mut self, file_size_bytes: i64) -> Self {
        if let TrackerOperation::Upload(content) = &mut self.operation {
            content.file_size_bytes = Some(file_size_bytes);
        }
        self
    }

    pub fn file_uuid(&self) -> &str {
        &self.file_uuid
    }

    pub fn operation(&self) -> &TrackerOperation {
        &self.operation
    }
}

fn validate_file_uuid(file_uuid: &str) -> Result<String, QueueError> {
    Uuid::parse_str(file_uuid).map_err(|_| QueueError::InvalidFileUuid(file_uuid.to_string()))?;
    Ok(file_uuid.to_string())
}

pub(crate) fn validate_batch(batch: &[NewFileTracker]) -> Result<(), QueueError> {
    if batch.is_empty() {
        return Err(QueueError::EmptyBatch);
    }
    let mut seen = HashSet::with_capacity(batch.len());
    for tracker in batch {
        if !seen.insert(tracker.file_uuid.as_str()) {
            return Err(QueueError::DuplicateFile(tracker.file_uuid.clone()));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTracker {
    pub id: i64,
    pub queue_id: i64,
    pub file_uuid: String,
    pub operation: TrackerOperation,
    /// Resolved when the tracker is dispatched, never at enqueue time.
    pub file_version: Option<i64>,
    pub status: UploadStatus,
}

impl FileTracker {
    pub fn delete_on_server(&self) -> bool {
        matches!(self.operation, TrackerOperation::Deletion)
    }

    pub fn upload_undeletion(&self) -> bool {
        matches!(&self.operation, TrackerOperation::Upload(content) if content.undelete)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub file_uploads: usize,
    pub upload_deletions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadQueue {
    pub id: i64,
    pub created: i64,
    /// Ordered by enqueue order.
    pub trackers: Vec<FileTracker>,
}

impl UploadQueue {
    pub fn next_upload(&self) -> Option<&FileTracker> {
        self.trackers
            .iter()
            .find(|tracker| tracker.status == UploadStatus::NotStarted)
    }

    pub fn pending_counts(&self) -> PendingCounts {
        self.trackers
            .iter()
            .filter(|tracker| tracker.status == UploadStatus::NotStarted)
            .fold(PendingCounts::default(), |mut counts, tracker| {
                if tracker.delete_on_server() {
                    counts.upload_deletions += 1;
                } else {
                    counts.file_uploads += 1;
                }
                counts
            })
    }

    pub fn count_with_status(&self, status: UploadStatus) -> usize {
        self.trackers
            .iter()
            .filter(|tracker| tracker.status == status)
            .count()
    }

    pub fn all_uploaded(&self) -> bool {
        self.trackers
            .iter()
            .all(|tracker| tracker.status == UploadStatus::Uploaded)
    }
}
