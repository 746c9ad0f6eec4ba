//! Account-wide optimistic concurrency fence.
//!
//! Every mutating call carries the master version the client last saw. The
//! server applies the call only when that value matches its own; otherwise it
//! rejects the call without partial effect and hands back its current value.
//! A rejected client adopts the new value wholesale and retries. The local
//! value only moves forward by one after a successful finalize.

use syncserver_core::{DoneUploadsResult, UploadDeletionResult, UploadFileResult};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MasterVersion(i64);

impl MasterVersion {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    /// Value the server moves to once a finalize fenced by `self` succeeds.
    pub const fn finalized(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl std::fmt::Display for MasterVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a call fenced by a master version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fenced<T> {
    Accepted(T),
    /// The server is at a different epoch; nothing was applied.
    Superseded(MasterVersion),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReceipt {
    pub size_in_bytes: i64,
    pub creation_date: OffsetDateTime,
    pub update_date: OffsetDateTime,
}

impl From<UploadFileResult> for Fenced<UploadReceipt> {
    fn from(result: UploadFileResult) -> Self {
        match result {
            UploadFileResult::Success {
                size_in_bytes,
                creation_date,
                update_date,
            } => Fenced::Accepted(UploadReceipt {
                size_in_bytes,
                creation_date,
                update_date,
            }),
            UploadFileResult::ServerMasterVersionUpdate(version) => {
                Fenced::Superseded(MasterVersion::new(version))
            }
        }
    }
}

impl From<UploadDeletionResult> for Fenced<()> {
    fn from(result: UploadDeletionResult) -> Self {
        match result {
            UploadDeletionResult::Success => Fenced::Accepted(()),
            UploadDeletionResult::ServerMasterVersionUpdate(version) => {
                Fenced::Superseded(MasterVersion::new(version))
            }
        }
    }
}

impl From<DoneUploadsResult> for Fenced<i64> {
    fn from(result: DoneUploadsResult) -> Self {
        match result {
            DoneUploadsResult::Success {
                number_uploads_transferred,
            } => Fenced::Accepted(number_uploads_transferred),
            DoneUploadsResult::ServerMasterVersionUpdate(version) => {
                Fenced::Superseded(MasterVersion::new(version))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalized_moves_forward_by_one() {
        assert_eq!(MasterVersion::new(4).finalized(), MasterVersion::new(5));
        assert_eq!(
            MasterVersion::new(i64::MAX).finalized(),
            MasterVersion::new(i64::MAX)
        );
    }

    #[test]
    fn server_update_becomes_superseded() {
        let fenced: Fenced<i64> = DoneUploadsResult::ServerMasterVersionUpdate(7).into();
        assert_eq!(fenced, Fenced::Superseded(MasterVersion::new(7)));

        let fenced: Fenced<()> = UploadDeletionResult::ServerMasterVersionUpdate(3).into();
        assert_eq!(fenced, Fenced::Superseded(MasterVersion::new(3)));
    }

    #[test]
    fn accepted_done_uploads_carries_transfer_count() {
        let fenced: Fenced<i64> = DoneUploadsResult::Success {
            number_uploads_transferred: 2,
        }
        .into();
        assert_eq!(fenced, Fenced::Accepted(2));
    }
}
