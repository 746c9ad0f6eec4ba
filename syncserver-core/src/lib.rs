mod client;
mod wire;

pub use client::{ApiErrorClass, ClientError, SyncServerClient};
pub use reqwest::StatusCode;
pub use wire::{
    DoneUploadsRequest, DoneUploadsResponse, DoneUploadsResult, UploadDeletionRequest,
    UploadDeletionResponse, UploadDeletionResult, UploadFileRequest, UploadFileResponse,
    UploadFileResult, WireError,
};
