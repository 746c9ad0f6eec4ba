use std::path::Path;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use url::Url;

use crate::wire::{
    DoneUploadsRequest, DoneUploadsResponse, DoneUploadsResult, UploadDeletionRequest,
    UploadDeletionResponse, UploadDeletionResult, UploadFileRequest, UploadFileResponse,
    UploadFileResult, WireError,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wire format error: {0}")]
    Wire(#[from] WireError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct SyncServerClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl SyncServerClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_http(Client::new(), base_url, token)
    }

    pub fn with_http(
        http: Client,
        base_url: &str,
        token: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    /// Streams the file at `source` as the request body. Re-sending an
    /// identical file/version is answered with a plain success by the server.
    pub async fn upload_file(
        &self,
        request: &UploadFileRequest,
        source: &Path,
    ) -> Result<UploadFileResult, ClientError> {
        let mut url = self.endpoint("/UploadFile")?;
        url.query_pairs_mut().extend_pairs(request.query_pairs());
        let file = tokio::fs::File::open(source).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .header(CONTENT_TYPE, request.mime_type())
            .body(body)
            .send()
            .await?;
        let payload: UploadFileResponse = Self::handle_response(response).await?;
        Ok(payload.into_result()?)
    }

    pub async fn upload_deletion(
        &self,
        request: &UploadDeletionRequest,
    ) -> Result<UploadDeletionResult, ClientError> {
        let mut url = self.endpoint("/UploadDeletion")?;
        url.query_pairs_mut().extend_pairs(request.query_pairs());
        let response = self
            .http
            .delete(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        let payload: UploadDeletionResponse = Self::handle_response(response).await?;
        Ok(payload.into_result())
    }

    pub async fn done_uploads(
        &self,
        request: &DoneUploadsRequest,
    ) -> Result<DoneUploadsResult, ClientError> {
        let mut url = self.endpoint("/DoneUploads")?;
        url.query_pairs_mut().extend_pairs(request.query_pairs());
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        let payload: DoneUploadsResponse = Self::handle_response(response).await?;
        Ok(payload.into_result()?)
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ClientError::Api { status, body })
        }
    }
}

impl ClientError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            ClientError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    /// Network-level failures and transient API statuses are worth another
    /// attempt; malformed requests and responses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Request(err) => !err.is_decode() && !err.is_builder(),
            ClientError::Api { .. } => matches!(
                self.classification(),
                Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
            ),
            ClientError::Url(_) | ClientError::Io(_) | ClientError::Wire(_) => false,
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(status, StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_EARLY)
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}
