use std::collections::HashMap;

use serde::Deserialize;

use modelgate_storage::{ChannelRow, ChannelStatus};

/// Per-channel setting block, decoded from the row's JSON settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelSettings {
    /// Opt the channel into retrying every error class (400 stays terminal).
    #[serde(default)]
    pub allow_all_retry: bool,
    /// Logical model name -> upstream model name remaps.
    #[serde(default)]
    pub model_mapping: HashMap<String, String>,
}

/// Immutable snapshot of one configured upstream endpoint. The registry
/// clones these behind `Arc`; nothing mutates a `Channel` after publish.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: i64,
    pub channel_type: String,
    pub name: String,
    pub base_url: String,
    pub key: String,
    pub models: Vec<String>,
    pub groups: Vec<String>,
    pub status: ChannelStatus,
    pub priority: u32,
    pub fallback_channel_id: Option<i64>,
    pub settings: ChannelSettings,
    pub auto_ban: bool,
}

impl Channel {
    pub fn from_row(row: &ChannelRow) -> Self {
        let settings =
            serde_json::from_value(row.settings_json.clone()).unwrap_or_default();
        Self {
            id: row.id,
            channel_type: row.channel_type.clone(),
            name: row.name.clone(),
            base_url: row.base_url.clone(),
            key: row.key.clone(),
            models: row.models.clone(),
            groups: row.groups.clone(),
            status: row.status,
            priority: row.priority,
            fallback_channel_id: row.fallback_channel_id,
            settings,
            auto_ban: row.auto_ban,
        }
    }

    /// Minimal channel built from an explicit pin whose id is unknown to the
    /// registry. Dispatch is still attempted; validity is the caller's
    /// responsibility.
    pub fn stub(id: i64, channel_type: &str, name: &str) -> Self {
        Self {
            id,
            channel_type: channel_type.to_string(),
            name: name.to_string(),
            base_url: String::new(),
            key: String::new(),
            models: Vec::new(),
            groups: Vec::new(),
            status: ChannelStatus::Enabled,
            priority: 0,
            fallback_channel_id: None,
            settings: ChannelSettings::default(),
            auto_ban: false,
        }
    }

    pub fn supports_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Upstream model name after the channel's remap table.
    pub fn remap_model<'a>(&'a self, model: &'a str) -> &'a str {
        self.settings
            .model_mapping
            .get(model)
            .map(String::as_str)
            .unwrap_or(model)
    }
}
