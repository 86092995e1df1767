use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

/// Channel lifecycle status as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Enabled,
    Disabled,
    /// Disabled by the gateway itself after a fatal upstream classification.
    AutoDisabled,
}

impl ChannelStatus {
    pub fn is_enabled(self) -> bool {
        matches!(self, ChannelStatus::Enabled)
    }
}

#[derive(Debug, Clone)]
pub struct ChannelRow {
    pub id: i64,
    /// Provider family tag ("openai", "anthropic", "gemini", "task", ...).
    pub channel_type: String,
    pub name: String,
    pub base_url: String,
    pub key: String,
    /// Models this channel serves.
    pub models: Vec<String>,
    /// Groups this channel belongs to.
    pub groups: Vec<String>,
    pub status: ChannelStatus,
    /// Selection weight; higher draws more traffic.
    pub priority: u32,
    pub fallback_channel_id: Option<i64>,
    /// Per-channel setting block (`allow_all_retry`, model remaps, ...).
    pub settings_json: JsonValue,
    pub auto_ban: bool,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub group: String,
    pub quota: i64,
    pub enabled: bool,
    pub admin: bool,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct TokenRow {
    pub id: i64,
    pub user_id: i64,
    pub key: String,
    pub name: String,
    pub unlimited_quota: bool,
    pub remain_quota: i64,
    /// CIDR allow list; empty means no restriction.
    pub ip_allow_list: Vec<String>,
    /// Group override; empty means the owner's group.
    pub group: String,
    /// Per-model allow list; empty means all models.
    pub model_allow_list: Vec<String>,
    pub cross_group_retry: bool,
    pub enabled: bool,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct ErrorLogRow {
    pub user_id: i64,
    pub token_id: i64,
    pub channel_id: i64,
    pub model: String,
    pub error_code: String,
    pub status_code: i32,
    pub message: String,
    pub other_json: JsonValue,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct StorageSnapshot {
    pub channels: Vec<ChannelRow>,
    pub users: Vec<UserRow>,
    pub tokens: Vec<TokenRow>,
}

impl Default for ChannelStatus {
    fn default() -> Self {
        ChannelStatus::Enabled
    }
}
