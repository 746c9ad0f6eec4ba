use serde_json::json;
use syncserver_core::{
    ApiErrorClass, ClientError, DoneUploadsRequest, DoneUploadsResult, StatusCode,
    SyncServerClient, UploadDeletionRequest, UploadDeletionResult, UploadFileRequest,
    UploadFileResult, WireError,
};
use tempfile::tempdir;
use wiremock::matchers::{body_bytes, header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FILE_UUID: &str = "6a0c4f3e-57d4-4f6b-8f43-1b2a9c0d7e11";

#[tokio::test]
async fn upload_file_sends_fields_and_content() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/UploadFile"))
        .and(header("authorization", "Bearer test-token"))
        .and(header("content-type", "image/jpeg"))
        .and(query_param("fileUUID", FILE_UUID))
        .and(query_param("mimeType", "image/jpeg"))
        .and(query_param("fileVersion", "1"))
        .and(query_param("masterVersion", "4"))
        .and(query_param("appMetaData", "{\"title\":\"Cat\"}"))
        .and(query_param_is_missing("undeleteServerFile"))
        .and(body_bytes(b"jpeg-bytes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sizeInBytes": 10,
            "creationDate": "2024-01-01T00:00:00Z",
            "updateDate": "2024-01-03T00:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let source = dir.path().join("cat.jpg");
    std::fs::write(&source, b"jpeg-bytes").unwrap();

    let client = SyncServerClient::new(&server.uri(), "test-token").unwrap();
    let request = UploadFileRequest::new(FILE_UUID, "image/jpeg", 1, 4)
        .unwrap()
        .with_app_meta_data(Some("{\"title\":\"Cat\"}".into()));
    let result = client.upload_file(&request, &source).await.unwrap();

    match result {
        UploadFileResult::Success {
            size_in_bytes,
            creation_date,
            update_date,
        } => {
            assert_eq!(size_in_bytes, 10);
            assert!(creation_date < update_date);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn upload_file_sends_undelete_flag() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/UploadFile"))
        .and(query_param("undeleteServerFile", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sizeInBytes": 1,
            "creationDate": "2024-01-01T00:00:00Z",
            "updateDate": "2024-01-01T00:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let source = dir.path().join("a.txt");
    std::fs::write(&source, b"a").unwrap();

    let client = SyncServerClient::new(&server.uri(), "test-token").unwrap();
    let request = UploadFileRequest::new(FILE_UUID, "text/plain", 0, 0)
        .unwrap()
        .with_undelete(true);
    client.upload_file(&request, &source).await.unwrap();
}

#[tokio::test]
async fn upload_file_reports_master_version_update() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/UploadFile"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "masterVersionUpdate": 7 })),
        )
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let source = dir.path().join("a.txt");
    std::fs::write(&source, b"a").unwrap();

    let client = SyncServerClient::new(&server.uri(), "test-token").unwrap();
    let request = UploadFileRequest::new(FILE_UUID, "text/plain", 0, 3).unwrap();
    let result = client.upload_file(&request, &source).await.unwrap();

    assert_eq!(result, UploadFileResult::ServerMasterVersionUpdate(7));
}

#[tokio::test]
async fn upload_file_rejects_incomplete_success_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/UploadFile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sizeInBytes": 1 })))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let source = dir.path().join("a.txt");
    std::fs::write(&source, b"a").unwrap();

    let client = SyncServerClient::new(&server.uri(), "test-token").unwrap();
    let request = UploadFileRequest::new(FILE_UUID, "text/plain", 0, 0).unwrap();
    let err = client.upload_file(&request, &source).await.unwrap_err();

    assert!(matches!(
        err,
        ClientError::Wire(WireError::MissingField("creationDate"))
    ));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn upload_file_fails_for_missing_source() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let client = SyncServerClient::new(&server.uri(), "test-token").unwrap();
    let request = UploadFileRequest::new(FILE_UUID, "text/plain", 0, 0).unwrap();
    let err = client
        .upload_file(&request, &dir.path().join("missing.txt"))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Io(_)));
}

#[tokio::test]
async fn upload_deletion_sends_version_and_master_version() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/UploadDeletion"))
        .and(header("authorization", "Bearer test-token"))
        .and(query_param("fileUUID", FILE_UUID))
        .and(query_param("fileVersion", "3"))
        .and(query_param("masterVersion", "9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let client = SyncServerClient::new(&server.uri(), "test-token").unwrap();
    let request = UploadDeletionRequest::new(FILE_UUID, 3, 9).unwrap();
    let result = client.upload_deletion(&request).await.unwrap();

    assert_eq!(result, UploadDeletionResult::Success);
}

#[tokio::test]
async fn upload_deletion_reports_master_version_update() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/UploadDeletion"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "masterVersionUpdate": 12 })),
        )
        .mount(&server)
        .await;

    let client = SyncServerClient::new(&server.uri(), "test-token").unwrap();
    let request = UploadDeletionRequest::new(FILE_UUID, 0, 11).unwrap();
    let result = client.upload_deletion(&request).await.unwrap();

    assert_eq!(result, UploadDeletionResult::ServerMasterVersionUpdate(12));
}

#[tokio::test]
async fn done_uploads_returns_transfer_count() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/DoneUploads"))
        .and(query_param("masterVersion", "5"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "numberUploadsTransferred": 2 })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = SyncServerClient::new(&server.uri(), "test-token").unwrap();
    let result = client
        .done_uploads(&DoneUploadsRequest { master_version: 5 })
        .await
        .unwrap();

    assert_eq!(
        result,
        DoneUploadsResult::Success {
            number_uploads_transferred: 2
        }
    );
}

#[tokio::test]
async fn done_uploads_reports_master_version_update() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/DoneUploads"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "masterVersionUpdate": 6 })),
        )
        .mount(&server)
        .await;

    let client = SyncServerClient::new(&server.uri(), "test-token").unwrap();
    let result = client
        .done_uploads(&DoneUploadsRequest { master_version: 5 })
        .await
        .unwrap();

    assert_eq!(result, DoneUploadsResult::ServerMasterVersionUpdate(6));
}

#[tokio::test]
async fn api_errors_carry_status_and_classification() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/DoneUploads"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let client = SyncServerClient::new(&server.uri(), "test-token").unwrap();
    let err = client
        .done_uploads(&DoneUploadsRequest { master_version: 0 })
        .await
        .unwrap_err();

    match &err {
        ClientError::Api { status, body } => {
            assert_eq!(*status, StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(body, "maintenance");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.classification(), Some(ApiErrorClass::Transient));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn unauthorized_is_not_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/UploadDeletion"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = SyncServerClient::new(&server.uri(), "bad-token").unwrap();
    let request = UploadDeletionRequest::new(FILE_UUID, 0, 0).unwrap();
    let err = client.upload_deletion(&request).await.unwrap_err();

    assert_eq!(err.classification(), Some(ApiErrorClass::Auth));
    assert!(!err.is_retryable());
}
