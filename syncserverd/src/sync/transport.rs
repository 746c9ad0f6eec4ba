use std::path::PathBuf;

use async_trait::async_trait;
use syncserver_core::{
    ClientError, DoneUploadsRequest, SyncServerClient, UploadDeletionRequest, UploadFileRequest,
};

use super::master_version::{Fenced, MasterVersion, UploadReceipt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileToUpload {
    pub file_uuid: String,
    pub mime_type: String,
    pub local_path: PathBuf,
    pub app_meta_data: Option<String>,
    pub file_version: i64,
    pub undelete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileToDelete {
    pub file_uuid: String,
    pub file_version: i64,
}

/// The three mutating server calls, each fenced by the caller's master
/// version. A mismatch is reported as [`Fenced::Superseded`], never as an
/// error.
#[async_trait]
pub trait ServerApi: Send + Sync {
    async fn upload_file(
        &self,
        file: &FileToUpload,
        master_version: MasterVersion,
    ) -> Result<Fenced<UploadReceipt>, ClientError>;

    async fn upload_deletion(
        &self,
        file: &FileToDelete,
        master_version: MasterVersion,
    ) -> Result<Fenced<()>, ClientError>;

    /// Returns the number of uploads the server committed.
    async fn done_uploads(&self, master_version: MasterVersion)
    -> Result<Fenced<i64>, ClientError>;
}

#[async_trait]
impl ServerApi for SyncServerClient {
    async fn upload_file(
        &self,
        file: &FileToUpload,
        master_version: MasterVersion,
    ) -> Result<Fenced<UploadReceipt>, ClientError> {
        let request = UploadFileRequest::new(
            &file.file_uuid,
            file.mime_type.as_str(),
            file.file_version,
            master_version.get(),
        )?
        .with_app_meta_data(file.app_meta_data.clone())
        .with_undelete(file.undelete);
        let result = SyncServerClient::upload_file(self, &request, &file.local_path).await?;
        Ok(result.into())
    }

    async fn upload_deletion(
        &self,
        file: &FileToDelete,
        master_version: MasterVersion,
    ) -> Result<Fenced<()>, ClientError> {
        let request =
            UploadDeletionRequest::new(&file.file_uuid, file.file_version, master_version.get())?;
        let result = SyncServerClient::upload_deletion(self, &request).await?;
        Ok(result.into())
    }

    async fn done_uploads(
        &self,
        master_version: MasterVersion,
    ) -> Result<Fenced<i64>, ClientError> {
        let request = DoneUploadsRequest {
            master_version: master_version.get(),
        };
        let result = SyncServerClient::done_uploads(self, &request).await?;
        Ok(result.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FILE: &str = "44444444-4444-4444-8444-444444444444";

    #[tokio::test]
    async fn client_upload_is_fenced_by_master_version() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/UploadFile"))
            .and(query_param("masterVersion", "2"))
            .and(query_param("fileVersion", "0"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "masterVersionUpdate": 3 })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let local_path = dir.path().join("a.txt");
        std::fs::write(&local_path, b"a").unwrap();

        let client = SyncServerClient::new(&server.uri(), "token").unwrap();
        let api: &dyn ServerApi = &client;
        let fenced = api
            .upload_file(
                &FileToUpload {
                    file_uuid: FILE.into(),
                    mime_type: "text/plain".into(),
                    local_path,
                    app_meta_data: None,
                    file_version: 0,
                    undelete: false,
                },
                MasterVersion::new(2),
            )
            .await
            .unwrap();

        assert_eq!(fenced, Fenced::Superseded(MasterVersion::new(3)));
    }

    #[tokio::test]
    async fn client_done_uploads_reports_transfer_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/DoneUploads"))
            .and(query_param("masterVersion", "5"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "numberUploadsTransferred": 4 })),
            )
            .mount(&server)
            .await;

        let client = SyncServerClient::new(&server.uri(), "token").unwrap();
        let api: &dyn ServerApi = &client;
        assert_eq!(
            api.done_uploads(MasterVersion::new(5)).await.unwrap(),
            Fenced::Accepted(4)
        );
    }

    #[tokio::test]
    async fn client_rejects_malformed_uuid_before_sending() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = SyncServerClient::new(&server.uri(), "token").unwrap();
        let api: &dyn ServerApi = &client;
        let err = api
            .upload_deletion(
                &FileToDelete {
                    file_uuid: "nope".into(),
                    file_version: 1,
                },
                MasterVersion::new(0),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Wire(_)));
    }
}
