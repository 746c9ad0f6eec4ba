use std::{
    fs,
    path::{Path, PathBuf},
};

use sqlx::{
    Row, Sqlite, SqliteConnection, SqlitePool, Transaction,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqliteRow},
};
use thiserror::Error;
use time::OffsetDateTime;

use super::directory::DirectoryEntry;
use super::master_version::MasterVersion;
use super::queue::{
    FileTracker, NewFileTracker, QueueError, TrackerOperation, UploadContent, UploadQueue,
    UploadStatus, validate_batch,
};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const TRACKER_COLUMNS: &str = "id, queue_id, file_uuid, mime_type, app_meta_data, file_version, delete_on_server, upload_undeletion, status, local_path, file_size_bytes";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("upload tracker {0} has no mime type or local path")]
    IncompleteTracker(i64),
}

/// SQLite-backed home of upload queues, directory entries and the master
/// version. Every multi-row change goes through a [`StoreTxn`].
#[derive(Clone)]
pub struct UploadStore {
    pool: SqlitePool,
}

impl UploadStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn new_default() -> Result<Self, StoreError> {
        Self::open(&default_db_path()?).await
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Opens a scoped transaction. Dropping it without [`StoreTxn::commit`]
    /// rolls every change back.
    pub async fn begin(&self) -> Result<StoreTxn, StoreError> {
        Ok(StoreTxn {
            tx: self.pool.begin().await?,
        })
    }

    /// Appends one batch as a new queue at the tail. Either the whole batch is
    /// stored or none of it.
    pub async fn enqueue(&self, batch: &[NewFileTracker]) -> Result<i64, StoreError> {
        validate_batch(batch)?;
        let mut txn = self.begin().await?;
        let created = OffsetDateTime::now_utc().unix_timestamp();
        let queue_id = sqlx::query("INSERT INTO upload_queues (created) VALUES (?1)")
            .bind(created)
            .execute(&mut *txn.tx)
            .await?
            .last_insert_rowid();

        for tracker in batch {
            insert_tracker(&mut txn.tx, queue_id, tracker).await?;
        }
        txn.commit().await?;
        Ok(queue_id)
    }

    pub async fn queues(&self) -> Result<Vec<UploadQueue>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query("SELECT id, created FROM upload_queues ORDER BY id ASC")
            .fetch_all(&mut *conn)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            out.push(UploadQueue {
                id,
                created: row.try_get("created")?,
                trackers: fetch_trackers(&mut conn, id).await?,
            });
        }
        Ok(out)
    }

    pub async fn directory_entry(
        &self,
        file_uuid: &str,
    ) -> Result<Option<DirectoryEntry>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch_directory_entry(&mut conn, file_uuid).await
    }

    pub async fn upsert_directory_entry(&self, entry: &DirectoryEntry) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        write_directory_entry(&mut conn, entry).await
    }

    pub async fn master_version(&self) -> Result<MasterVersion, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch_master_version(&mut conn).await
    }

    pub async fn count_uploading(&self) -> Result<i64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        count_uploading(&mut conn).await
    }

    /// Returns trackers left `uploading` by an interrupted process to
    /// `not_started`. Only valid while no upload of this store is in flight.
    pub async fn recover_interrupted(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE file_trackers SET status = ?1 WHERE status = ?2")
            .bind(UploadStatus::NotStarted.as_str())
            .bind(UploadStatus::Uploading.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

pub struct StoreTxn {
    tx: Transaction<'static, Sqlite>,
}

impl StoreTxn {
    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }

    /// Oldest queue still present, with its trackers in enqueue order.
    pub async fn head_queue(&mut self) -> Result<Option<UploadQueue>, StoreError> {
        let row = sqlx::query("SELECT id, created FROM upload_queues ORDER BY id ASC LIMIT 1")
            .fetch_optional(&mut *self.tx)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: i64 = row.try_get("id")?;
        Ok(Some(UploadQueue {
            id,
            created: row.try_get("created")?,
            trackers: fetch_trackers(&mut self.tx, id).await?,
        }))
    }

    pub async fn count_uploading(&mut self) -> Result<i64, StoreError> {
        count_uploading(&mut self.tx).await
    }

    /// Moves a `not_started` tracker to `uploading`, but only while no other
    /// tracker anywhere is uploading. Returns whether the tracker moved.
    pub async fn mark_uploading(&mut self, tracker_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE file_trackers SET status = ?1
             WHERE id = ?2
               AND status = ?3
               AND NOT EXISTS (SELECT 1 FROM file_trackers WHERE status = ?1)",
        )
        .bind(UploadStatus::Uploading.as_str())
        .bind(tracker_id)
        .bind(UploadStatus::NotStarted.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Moves the tracker back to `not_started` if it is still `uploading`.
    pub async fn release_uploading(&mut self, tracker_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE file_trackers SET status = ?1 WHERE id = ?2 AND status = ?3")
            .bind(UploadStatus::NotStarted.as_str())
            .bind(tracker_id)
            .bind(UploadStatus::Uploading.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn set_status(
        &mut self,
        tracker_id: i64,
        status: UploadStatus,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE file_trackers SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(tracker_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn set_file_version(
        &mut self,
        tracker_id: i64,
        file_version: i64,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE file_trackers SET file_version = ?1 WHERE id = ?2")
            .bind(file_version)
            .bind(tracker_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /// Returns every tracker of the queue to `not_started`.
    pub async fn reset_queue(&mut self, queue_id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE file_trackers SET status = ?1 WHERE queue_id = ?2")
            .bind(UploadStatus::NotStarted.as_str())
            .bind(queue_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn retire_queue(&mut self, queue_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM file_trackers WHERE queue_id = ?1")
            .bind(queue_id)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query("DELETE FROM upload_queues WHERE id = ?1")
            .bind(queue_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn directory_entry(
        &mut self,
        file_uuid: &str,
    ) -> Result<Option<DirectoryEntry>, StoreError> {
        fetch_directory_entry(&mut self.tx, file_uuid).await
    }

    pub async fn upsert_directory_entry(
        &mut self,
        entry: &DirectoryEntry,
    ) -> Result<(), StoreError> {
        write_directory_entry(&mut self.tx, entry).await
    }

    pub async fn master_version(&mut self) -> Result<MasterVersion, StoreError> {
        fetch_master_version(&mut self.tx).await
    }

    pub async fn set_master_version(&mut self, version: MasterVersion) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO master_version (id, version) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET version = excluded.version",
        )
        .bind(version.get())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

async fn insert_tracker(
    conn: &mut SqliteConnection,
    queue_id: i64,
    tracker: &NewFileTracker,
) -> Result<(), StoreError> {
    let (mime_type, app_meta_data, delete_on_server, undelete, local_path, file_size_bytes) =
        match tracker.operation() {
            TrackerOperation::Upload(content) => (
                Some(content.mime_type.as_str()),
                content.app_meta_data.as_deref(),
                false,
                content.undelete,
                Some(content.local_path.to_string_lossy().into_owned()),
                content.file_size_bytes,
            ),
            TrackerOperation::Deletion => (None, None, true, false, None, None),
        };

    sqlx::query(
        "INSERT INTO file_trackers (
            queue_id,
            file_uuid,
            mime_type,
            app_meta_data,
            file_version,
            delete_on_server,
            upload_undeletion,
            status,
            local_path,
            file_size_bytes
        )
        VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(queue_id)
    .bind(tracker.file_uuid())
    .bind(mime_type)
    .bind(app_meta_data)
    .bind(delete_on_server)
    .bind(undelete)
    .bind(UploadStatus::NotStarted.as_str())
    .bind(local_path)
    .bind(file_size_bytes)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn fetch_trackers(
    conn: &mut SqliteConnection,
    queue_id: i64,
) -> Result<Vec<FileTracker>, StoreError> {
    let rows = sqlx::query(&format!(
        "SELECT {TRACKER_COLUMNS} FROM file_trackers WHERE queue_id = ?1 ORDER BY id ASC"
    ))
    .bind(queue_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(tracker_from_row).collect()
}

fn tracker_from_row(row: &SqliteRow) -> Result<FileTracker, StoreError> {
    let id: i64 = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let delete_on_server: bool = row.try_get("delete_on_server")?;
    let operation = if delete_on_server {
        TrackerOperation::Deletion
    } else {
        let mime_type: Option<String> = row.try_get("mime_type")?;
        let local_path: Option<String> = row.try_get("local_path")?;
        let (Some(mime_type), Some(local_path)) = (mime_type, local_path) else {
            return Err(StoreError::IncompleteTracker(id));
        };
        TrackerOperation::Upload(UploadContent {
            mime_type,
            local_path: PathBuf::from(local_path),
            app_meta_data: row.try_get("app_meta_data")?,
            undelete: row.try_get("upload_undeletion")?,
            file_size_bytes: row.try_get("file_size_bytes")?,
        })
    };

    Ok(FileTracker {
        id,
        queue_id: row.try_get("queue_id")?,
        file_uuid: row.try_get("file_uuid")?,
        operation,
        file_version: row.try_get("file_version")?,
        status: UploadStatus::parse(&status)?,
    })
}

async fn count_uploading(conn: &mut SqliteConnection) -> Result<i64, StoreError> {
    let row = sqlx::query("SELECT COUNT(*) AS uploading FROM file_trackers WHERE status = ?1")
        .bind(UploadStatus::Uploading.as_str())
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.try_get("uploading")?)
}

async fn fetch_directory_entry(
    conn: &mut SqliteConnection,
    file_uuid: &str,
) -> Result<Option<DirectoryEntry>, StoreError> {
    let row = sqlx::query(
        "SELECT file_uuid, mime_type, file_version, app_meta_data, deleted FROM directory_entries WHERE file_uuid = ?1",
    )
    .bind(file_uuid)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(DirectoryEntry {
        file_uuid: row.try_get("file_uuid")?,
        mime_type: row.try_get("mime_type")?,
        file_version: row.try_get("file_version")?,
        app_meta_data: row.try_get("app_meta_data")?,
        deleted: row.try_get("deleted")?,
    }))
}

async fn write_directory_entry(
    conn: &mut SqliteConnection,
    entry: &DirectoryEntry,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO directory_entries (file_uuid, mime_type, file_version, app_meta_data, deleted)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(file_uuid) DO UPDATE SET
            mime_type = excluded.mime_type,
            file_version = excluded.file_version,
            app_meta_data = excluded.app_meta_data,
            deleted = excluded.deleted",
    )
    .bind(&entry.file_uuid)
    .bind(&entry.mime_type)
    .bind(entry.file_version)
    .bind(&entry.app_meta_data)
    .bind(entry.deleted)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn fetch_master_version(conn: &mut SqliteConnection) -> Result<MasterVersion, StoreError> {
    let row = sqlx::query("SELECT version FROM master_version WHERE id = 1")
        .fetch_optional(&mut *conn)
        .await?;
    let version = match row {
        Some(row) => row.try_get("version")?,
        None => 0,
    };
    Ok(MasterVersion::new(version))
}

fn default_db_path() -> Result<PathBuf, StoreError> {
    let mut path = dirs::data_dir().ok_or(StoreError::MissingDataDir)?;
    path.push("syncserver");
    path.push("uploads.db");
    Ok(path)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
