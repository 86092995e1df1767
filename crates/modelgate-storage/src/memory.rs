use std::sync::Mutex;

use async_trait::async_trait;

use crate::snapshot::{ChannelRow, ChannelStatus, ErrorLogRow, StorageSnapshot};
use crate::storage::{Storage, StorageError, StorageResult};

/// In-memory storage for tests and single-process demos. Mirrors the
/// persistent implementation's semantics without a database.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    snapshot: StorageSnapshot,
    error_logs: Vec<ErrorLogRow>,
    next_channel_id: i64,
}

impl MemoryStorage {
    pub fn new(snapshot: StorageSnapshot) -> Self {
        let next_channel_id = snapshot
            .channels
            .iter()
            .map(|c| c.id)
            .max()
            .unwrap_or(0)
            + 1;
        Self {
            inner: Mutex::new(MemoryState {
                snapshot,
                error_logs: Vec::new(),
                next_channel_id,
            }),
        }
    }

    pub fn error_logs(&self) -> Vec<ErrorLogRow> {
        self.inner.lock().expect("memory storage lock").error_logs.clone()
    }

    pub fn channel_status(&self, channel_id: i64) -> Option<ChannelStatus> {
        self.inner
            .lock()
            .expect("memory storage lock")
            .snapshot
            .channels
            .iter()
            .find(|c| c.id == channel_id)
            .map(|c| c.status)
    }

    pub fn user_quota(&self, user_id: i64) -> Option<i64> {
        self.inner
            .lock()
            .expect("memory storage lock")
            .snapshot
            .users
            .iter()
            .find(|u| u.id == user_id)
            .map(|u| u.quota)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn sync(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn load_snapshot(&self) -> StorageResult<StorageSnapshot> {
        Ok(self.inner.lock().expect("memory storage lock").snapshot.clone())
    }

    async fn upsert_channel(&self, row: &ChannelRow) -> StorageResult<i64> {
        let mut state = self.inner.lock().expect("memory storage lock");
        if let Some(existing) = state
            .snapshot
            .channels
            .iter_mut()
            .find(|c| c.id == row.id)
        {
            *existing = row.clone();
            return Ok(row.id);
        }
        let mut row = row.clone();
        if row.id == 0 {
            row.id = state.next_channel_id;
            state.next_channel_id += 1;
        }
        let id = row.id;
        state.snapshot.channels.push(row);
        Ok(id)
    }

    async fn delete_channel(&self, channel_id: i64) -> StorageResult<()> {
        let mut state = self.inner.lock().expect("memory storage lock");
        state.snapshot.channels.retain(|c| c.id != channel_id);
        Ok(())
    }

    async fn set_channel_status(
        &self,
        channel_id: i64,
        status: ChannelStatus,
        _reason: Option<&str>,
    ) -> StorageResult<()> {
        let mut state = self.inner.lock().expect("memory storage lock");
        let channel = state
            .snapshot
            .channels
            .iter_mut()
            .find(|c| c.id == channel_id)
            .ok_or(StorageError::NotFound("channel"))?;
        channel.status = status;
        Ok(())
    }

    async fn apply_quota_delta(
        &self,
        user_id: i64,
        token_id: i64,
        delta: i64,
    ) -> StorageResult<()> {
        let mut state = self.inner.lock().expect("memory storage lock");
        let user = state
            .snapshot
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(StorageError::NotFound("user"))?;
        user.quota = user.quota.saturating_add(delta);
        if let Some(token) = state
            .snapshot
            .tokens
            .iter_mut()
            .find(|t| t.id == token_id)
            && !token.unlimited_quota
        {
            token.remain_quota = token.remain_quota.saturating_add(delta);
        }
        Ok(())
    }

    async fn append_error_log(&self, row: &ErrorLogRow) -> StorageResult<()> {
        self.inner
            .lock()
            .expect("memory storage lock")
            .error_logs
            .push(row.clone());
        Ok(())
    }
}
