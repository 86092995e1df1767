use async_trait::async_trait;

use crate::snapshot::{ChannelRow, ChannelStatus, ErrorLogRow, StorageSnapshot};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("row not found: {0}")]
    NotFound(&'static str),
}

/// Storage is used for:
/// - bootstrap (load_snapshot)
/// - channel status writes (auto-disable) and admin channel mutations
/// - balance settlement write-behind
/// - error-log persistence (append-only)
///
/// Runtime reads must NOT hit DB; the relay reads from in-memory snapshots.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Entity-first schema sync. Enabled by default at bootstrap.
    async fn sync(&self) -> StorageResult<()>;

    async fn load_snapshot(&self) -> StorageResult<StorageSnapshot>;

    // Channels
    async fn upsert_channel(&self, row: &ChannelRow) -> StorageResult<i64>;
    async fn delete_channel(&self, channel_id: i64) -> StorageResult<()>;
    async fn set_channel_status(
        &self,
        channel_id: i64,
        status: ChannelStatus,
        reason: Option<&str>,
    ) -> StorageResult<()>;

    /// Apply a settled quota delta to the user's balance row and the token's
    /// remaining quota. Negative delta debits, positive refunds.
    async fn apply_quota_delta(
        &self,
        user_id: i64,
        token_id: i64,
        delta: i64,
    ) -> StorageResult<()>;

    async fn append_error_log(&self, row: &ErrorLogRow) -> StorageResult<()>;
}
