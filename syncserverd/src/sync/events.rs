use tokio::sync::broadcast;

/// Informational progress notifications. Nobody is required to listen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    WillStartUploads {
        number_file_uploads: usize,
        number_upload_deletions: usize,
    },
}

const EVENT_CAPACITY: usize = 64;

pub(crate) fn channel() -> broadcast::Sender<SyncEvent> {
    broadcast::channel(EVENT_CAPACITY).0
}
