use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

pub const FILE_UUID_KEY: &str = "fileUUID";
pub const MIME_TYPE_KEY: &str = "mimeType";
pub const APP_META_DATA_KEY: &str = "appMetaData";
pub const FILE_VERSION_KEY: &str = "fileVersion";
pub const MASTER_VERSION_KEY: &str = "masterVersion";
pub const UNDELETE_SERVER_FILE_KEY: &str = "undeleteServerFile";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("file uuid is not a valid UUID: {0}")]
    InvalidFileUuid(String),
    #[error("mime type is empty")]
    EmptyMimeType,
    #[error("file version is negative: {0}")]
    NegativeFileVersion(i64),
    #[error("response is missing required field `{0}`")]
    MissingField(&'static str),
}

fn parse_file_uuid(file_uuid: &str) -> Result<String, WireError> {
    Uuid::parse_str(file_uuid).map_err(|_| WireError::InvalidFileUuid(file_uuid.to_string()))?;
    Ok(file_uuid.to_string())
}

fn check_file_version(file_version: i64) -> Result<i64, WireError> {
    if file_version < 0 {
        return Err(WireError::NegativeFileVersion(file_version));
    }
    Ok(file_version)
}

/// Upload of one file version, fenced by the caller's master version.
///
/// `app_meta_data` of `None` leaves the server's value untouched, while
/// `Some("")` clears it. The file content itself is sent as the request body
/// and is not part of this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFileRequest {
    file_uuid: String,
    mime_type: String,
    app_meta_data: Option<String>,
    file_version: i64,
    master_version: i64,
    undelete_server_file: bool,
}

impl UploadFileRequest {
    pub fn new(
        file_uuid: &str,
        mime_type: impl Into<String>,
        file_version: i64,
        master_version: i64,
    ) -> Result<Self, WireError> {
        let mime_type = mime_type.into();
        if mime_type.trim().is_empty() {
            return Err(WireError::EmptyMimeType);
        }
        Ok(Self {
            file_uuid: parse_file_uuid(file_uuid)?,
            mime_type,
            app_meta_data: None,
            file_version: check_file_version(file_version)?,
            master_version,
            undelete_server_file: false,
        })
    }

    pub fn with_app_meta_data(mut self, app_meta_data: Option<String>) -> Self {
        self.app_meta_data = app_meta_data;
        self
    }

    pub fn with_undelete(mut self, undelete: bool) -> Self {
        self.undelete_server_file = undelete;
        self
    }

    pub fn file_uuid(&self) -> &str {
        &self.file_uuid
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn app_meta_data(&self) -> Option<&str> {
        self.app_meta_data.as_deref()
    }

    pub fn file_version(&self) -> i64 {
        self.file_version
    }

    pub fn master_version(&self) -> i64 {
        self.master_version
    }

    pub fn undelete_server_file(&self) -> bool {
        self.undelete_server_file
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            (FILE_UUID_KEY, self.file_uuid.clone()),
            (MIME_TYPE_KEY, self.mime_type.clone()),
            (FILE_VERSION_KEY, self.file_version.to_string()),
            (MASTER_VERSION_KEY, self.master_version.to_string()),
        ];
        if let Some(app_meta_data) = &self.app_meta_data {
            pairs.push((APP_META_DATA_KEY, app_meta_data.clone()));
        }
        if self.undelete_server_file {
            pairs.push((UNDELETE_SERVER_FILE_KEY, "1".to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFileResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<i64>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub creation_date: Option<OffsetDateTime>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub update_date: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_version_update: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadFileResult {
    Success {
        size_in_bytes: i64,
        creation_date: OffsetDateTime,
        update_date: OffsetDateTime,
    },
    ServerMasterVersionUpdate(i64),
}

impl UploadFileResponse {
    /// A present `masterVersionUpdate` means the upload was rejected and
    /// nothing else in the response is meaningful.
    pub fn into_result(self) -> Result<UploadFileResult, WireError> {
        if let Some(master_version) = self.master_version_update {
            return Ok(UploadFileResult::ServerMasterVersionUpdate(master_version));
        }
        Ok(UploadFileResult::Success {
            size_in_bytes: self
                .size_in_bytes
                .ok_or(WireError::MissingField("sizeInBytes"))?,
            creation_date: self
                .creation_date
                .ok_or(WireError::MissingField("creationDate"))?,
            update_date: self
                .update_date
                .ok_or(WireError::MissingField("updateDate"))?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadDeletionRequest {
    file_uuid: String,
    file_version: i64,
    master_version: i64,
}

impl UploadDeletionRequest {
    pub fn new(file_uuid: &str, file_version: i64, master_version: i64) -> Result<Self, WireError> {
        Ok(Self {
            file_uuid: parse_file_uuid(file_uuid)?,
            file_version: check_file_version(file_version)?,
            master_version,
        })
    }

    pub fn file_uuid(&self) -> &str {
        &self.file_uuid
    }

    pub fn file_version(&self) -> i64 {
        self.file_version
    }

    pub fn master_version(&self) -> i64 {
        self.master_version
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (FILE_UUID_KEY, self.file_uuid.clone()),
            (FILE_VERSION_KEY, self.file_version.to_string()),
            (MASTER_VERSION_KEY, self.master_version.to_string()),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDeletionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_version_update: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadDeletionResult {
    Success,
    ServerMasterVersionUpdate(i64),
}

impl UploadDeletionResponse {
    pub fn into_result(self) -> UploadDeletionResult {
        match self.master_version_update {
            Some(master_version) => UploadDeletionResult::ServerMasterVersionUpdate(master_version),
            None => UploadDeletionResult::Success,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoneUploadsRequest {
    pub master_version: i64,
}

impl DoneUploadsRequest {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![(MASTER_VERSION_KEY, self.master_version.to_string())]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneUploadsResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_uploads_transferred: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_version_update: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneUploadsResult {
    Success { number_uploads_transferred: i64 },
    ServerMasterVersionUpdate(i64),
}

impl DoneUploadsResponse {
    pub fn into_result(self) -> Result<DoneUploadsResult, WireError> {
        if let Some(master_version) = self.master_version_update {
            return Ok(DoneUploadsResult::ServerMasterVersionUpdate(master_version));
        }
        let number_uploads_transferred = self
            .number_uploads_transferred
            .ok_or(WireError::MissingField("numberUploadsTransferred"))?;
        Ok(DoneUploadsResult::Success {
            number_uploads_transferred,
        })
    }
}
