use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{error, warn};

use modelgate_storage::{ChannelStatus, ErrorLogRow, Storage};

use crate::channel::Channel;
use crate::error::RelayError;
use crate::registry::ChannelRegistry;
use crate::relay_info::RelayInfo;

/// Append-only error-log writer. Submissions go through a bounded queue and
/// a background task; the request path never waits on the database. Overflow
/// drops the row and counts it.
pub struct ErrorLogSink {
    tx: mpsc::Sender<ErrorLogRow>,
    dropped: AtomicU64,
}

impl ErrorLogSink {
    pub fn new(storage: Arc<dyn Storage>, capacity: usize) -> Arc<Self> {
        let (tx, mut rx) = mpsc::channel::<ErrorLogRow>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(row) = rx.recv().await {
                if let Err(err) = storage.append_error_log(&row).await {
                    warn!(event = "error_log_write_failed", error = %err);
                }
            }
        });
        Arc::new(Self {
            tx,
            dropped: AtomicU64::new(0),
        })
    }

    pub fn submit(&self, row: ErrorLogRow) {
        if self.tx.try_send(row).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub fn error_log_row(info: &RelayInfo, channel: &Channel, err: &RelayError) -> ErrorLogRow {
    ErrorLogRow {
        user_id: info.user_id,
        token_id: info.token_id,
        channel_id: channel.id,
        model: info.origin_model.clone(),
        error_code: err.kind().code().to_string(),
        status_code: i32::from(err.status().as_u16()),
        message: err.message().to_string(),
        other_json: serde_json::json!({
            "use_channel": info.use_channel,
            "channel_name": channel.name,
            "channel_type": channel.channel_type,
            "attempt": info.attempt,
        }),
        created_at: OffsetDateTime::now_utc(),
    }
}

/// Disable a channel after a fatal classification. Fire-and-forget: routing
/// flips immediately via the registry; the row update follows best-effort.
pub fn disable_channel_async(
    registry: Arc<ChannelRegistry>,
    storage: Arc<dyn Storage>,
    channel_id: i64,
    reason: String,
) {
    registry.set_status(channel_id, ChannelStatus::AutoDisabled);
    tokio::spawn(async move {
        error!(
            event = "channel_auto_disabled",
            channel_id,
            reason = %reason,
        );
        if let Err(err) = storage
            .set_channel_status(channel_id, ChannelStatus::AutoDisabled, Some(&reason))
            .await
        {
            warn!(event = "channel_disable_persist_failed", channel_id, error = %err);
        }
    });
}
