use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use syncserver_core::SyncServerClient;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::sync::events::SyncEvent;
use crate::sync::master_version::MasterVersion;
use crate::sync::queue::{NewFileTracker, UploadQueue, UploadStatus};
use crate::sync::runner::{RunSummary, UploadRunner};
use crate::sync::store::UploadStore;
use crate::sync::upload::Uploader;

/// Upload request as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadArgs {
    pub file_uuid: String,
    pub mime_type: String,
    pub path: PathBuf,
    pub app_meta_data: Option<String>,
    pub undelete: bool,
}

pub struct DaemonRuntime {
    runner: UploadRunner,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: ClientConfig) -> anyhow::Result<Self> {
        let store = open_store(&config).await?;
        // Nothing can be in flight before the runner starts.
        let recovered = store
            .recover_interrupted()
            .await
            .context("failed to recover interrupted uploads")?;
        if recovered > 0 {
            warn!(recovered, "reset uploads interrupted by a previous run");
        }
        let client = SyncServerClient::new(&config.server_url, config.token.clone())
            .context("failed to build sync server client")?;
        let uploader = Uploader::new(store, Arc::new(client));
        Ok(Self {
            runner: UploadRunner::new(uploader, config.retry_policy()),
        })
    }

    pub fn store(&self) -> &UploadStore {
        self.runner.uploader().store()
    }

    /// Uploads every queued batch, then returns.
    pub async fn run(self) -> anyhow::Result<RunSummary> {
        let mut events = self.runner.uploader().subscribe();
        let progress = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SyncEvent::WillStartUploads {
                        number_file_uploads,
                        number_upload_deletions,
                    }) => info!(
                        number_file_uploads,
                        number_upload_deletions, "starting upload batch"
                    ),
                    Err(RecvError::Lagged(skipped)) => debug!(skipped, "progress events dropped"),
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let result = self.runner.drain().await;
        drop(self.runner);
        let _ = progress.await;
        result.context("upload run failed")
    }
}

pub async fn open_store(config: &ClientConfig) -> anyhow::Result<UploadStore> {
    let store = match &config.db_path {
        Some(path) => {
            debug!(path = %path.display(), "opening upload store");
            UploadStore::open(path).await
        }
        None => UploadStore::new_default().await,
    };
    store.context("failed to open upload store")
}

pub async fn enqueue_upload(store: &UploadStore, args: UploadArgs) -> anyhow::Result<i64> {
    let metadata = tokio::fs::metadata(&args.path)
        .await
        .with_context(|| format!("cannot read {}", args.path.display()))?;
    anyhow::ensure!(metadata.is_file(), "{} is not a file", args.path.display());
    let size = i64::try_from(metadata.len()).unwrap_or(i64::MAX);
    let tracker = NewFileTracker::upload(&args.file_uuid, args.mime_type, args.path)?
        .with_app_meta_data(args.app_meta_data)
        .with_undelete(args.undelete)
        .with_file_size(size);
    Ok(store.enqueue(&[tracker]).await?)
}

pub async fn enqueue_delete(store: &UploadStore, file_uuid: &str) -> anyhow::Result<i64> {
    let tracker = NewFileTracker::deletion(file_uuid)?;
    Ok(store.enqueue(&[tracker]).await?)
}

pub async fn status_report(store: &UploadStore) -> anyhow::Result<String> {
    let master_version = store.master_version().await?;
    let queues = store.queues().await?;
    Ok(format_status(master_version, &queues))
}

fn format_status(master_version: MasterVersion, queues: &[UploadQueue]) -> String {
    let mut out = format!("master version: {master_version}\n");
    if queues.is_empty() {
        out.push_str("no pending uploads\n");
        return out;
    }
    for queue in queues {
        let deletions = queue
            .trackers
            .iter()
            .filter(|tracker| tracker.delete_on_server())
            .count();
        out.push_str(&format!(
            "queue {}: {} file(s), {} deletion(s); not_started={} uploading={} uploaded={}\n",
            queue.id,
            queue.trackers.len() - deletions,
            deletions,
            queue.count_with_status(UploadStatus::NotStarted),
            queue.count_with_status(UploadStatus::Uploading),
            queue.count_with_status(UploadStatus::Uploaded),
        ));
    }
    out
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
