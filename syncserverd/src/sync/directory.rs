use thiserror::Error;

use super::queue::{FileTracker, TrackerOperation};

/// The local view of what the server is known to hold for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub file_uuid: String,
    pub mime_type: Option<String>,
    pub file_version: Option<i64>,
    pub app_meta_data: Option<String>,
    pub deleted: bool,
}

impl DirectoryEntry {
    pub fn new(file_uuid: impl Into<String>) -> Self {
        Self {
            file_uuid: file_uuid.into(),
            mime_type: None,
            file_version: None,
            app_meta_data: None,
            deleted: false,
        }
    }
}

/// The local mirror disagrees with what a queued operation needs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LocalStateError {
    #[error("no directory entry for file {0}")]
    CouldNotFindFileUuid(String),
    #[error("directory entry for file {0} has no version")]
    VersionForFileWasNil(String),
}

/// `0` for a file the server has never confirmed, otherwise one past the
/// confirmed version.
pub fn upload_version(entry: Option<&DirectoryEntry>) -> i64 {
    match entry.and_then(|entry| entry.file_version) {
        Some(version) => version + 1,
        None => 0,
    }
}

pub fn deletion_version(
    file_uuid: &str,
    entry: Option<&DirectoryEntry>,
) -> Result<i64, LocalStateError> {
    let entry = entry.ok_or_else(|| LocalStateError::CouldNotFindFileUuid(file_uuid.to_string()))?;
    entry
        .file_version
        .ok_or_else(|| LocalStateError::VersionForFileWasNil(file_uuid.to_string()))
}

/// Folds a server-confirmed tracker into the entry it affected. Returns `None`
/// when there is nothing to record, as for a deletion of an unknown file.
pub fn confirm(existing: Option<DirectoryEntry>, tracker: &FileTracker) -> Option<DirectoryEntry> {
    match &tracker.operation {
        TrackerOperation::Upload(content) => {
            let mut entry = existing.unwrap_or_else(|| DirectoryEntry::new(&tracker.file_uuid));
            entry.mime_type = Some(content.mime_type.clone());
            if tracker.file_version.is_some() {
                entry.file_version = tracker.file_version;
            }
            if content.app_meta_data.is_some() {
                entry.app_meta_data = content.app_meta_data.clone();
            }
            entry.deleted = false;
            Some(entry)
        }
        TrackerOperation::Deletion => existing.map(|mut entry| {
            entry.deleted = true;
            entry
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::queue::{NewFileTracker, UploadStatus};

    const FILE: &str = "33333333-3333-4333-8333-333333333333";

    fn entry(version: Option<i64>) -> DirectoryEntry {
        DirectoryEntry {
            file_version: version,
            app_meta_data: Some("old".into()),
            ..DirectoryEntry::new(FILE)
        }
    }

    fn tracker(new: NewFileTracker, file_version: Option<i64>) -> FileTracker {
        FileTracker {
            id: 1,
            queue_id: 1,
            file_uuid: new.file_uuid,
            operation: new.operation,
            file_version,
            status: UploadStatus::Uploaded,
        }
    }

    #[test]
    fn new_file_uploads_version_zero() {
        assert_eq!(upload_version(None), 0);
        assert_eq!(upload_version(Some(&entry(None))), 0);
    }

    #[test]
    fn existing_file_uploads_next_version() {
        assert_eq!(upload_version(Some(&entry(Some(4)))), 5);
    }

    #[test]
    fn deletion_needs_entry_and_version() {
        assert_eq!(
            deletion_version(FILE, None),
            Err(LocalStateError::CouldNotFindFileUuid(FILE.into()))
        );
        assert_eq!(
            deletion_version(FILE, Some(&entry(None))),
            Err(LocalStateError::VersionForFileWasNil(FILE.into()))
        );
        assert_eq!(deletion_version(FILE, Some(&entry(Some(3)))), Ok(3));
    }

    #[test]
    fn confirm_upload_keeps_existing_app_meta_data_when_absent() {
        let upload = NewFileTracker::upload(FILE, "image/png", "/tmp/x.png").unwrap();
        let confirmed = confirm(Some(entry(Some(1))), &tracker(upload, Some(2))).unwrap();
        assert_eq!(confirmed.file_version, Some(2));
        assert_eq!(confirmed.app_meta_data.as_deref(), Some("old"));
        assert_eq!(confirmed.mime_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn confirm_upload_clears_app_meta_data_with_empty_string() {
        let upload = NewFileTracker::upload(FILE, "image/png", "/tmp/x.png")
            .unwrap()
            .with_app_meta_data(Some(String::new()));
        let confirmed = confirm(Some(entry(Some(1))), &tracker(upload, Some(2))).unwrap();
        assert_eq!(confirmed.app_meta_data.as_deref(), Some(""));
    }

    #[test]
    fn confirm_undeleting_upload_clears_deleted_flag() {
        let mut deleted = entry(Some(1));
        deleted.deleted = true;
        let upload = NewFileTracker::upload(FILE, "image/png", "/tmp/x.png")
            .unwrap()
            .with_undelete(true);
        let confirmed = confirm(Some(deleted), &tracker(upload, Some(2))).unwrap();
        assert!(!confirmed.deleted);
    }

    #[test]
    fn confirm_deletion_marks_entry() {
        let deletion = NewFileTracker::deletion(FILE).unwrap();
        assert!(confirm(Some(entry(Some(3))), &tracker(deletion.clone(), None))
            .unwrap()
            .deleted);
        assert_eq!(confirm(None, &tracker(deletion, None)), None);
    }
}
