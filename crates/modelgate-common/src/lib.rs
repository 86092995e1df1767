use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged global configuration used by the running process.
///
/// Merge order: CLI > ENV > defaults. All relay components receive typed
/// values from here; nothing in the engine reads the environment directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Database DSN used for this process.
    pub dsn: String,
    /// Optional outbound proxy (for upstream egress).
    pub proxy: Option<String>,
    pub relay: RelayConfig,
}

/// Tunables for the relay engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Retries allowed after the first attempt.
    pub retry_times: u32,
    /// Request bodies above this are rejected with 413.
    pub max_body_bytes: usize,
    /// Whether prompt tokens are counted with a tokenizer before dispatch.
    pub count_tokens: bool,
    /// Whether request text is scanned against `sensitive_words`.
    pub check_sensitive: bool,
    pub sensitive_words: Vec<String>,
    /// Whether classified upstream errors are appended to the error log.
    pub error_log_enabled: bool,
    /// Reservations neither settled nor refunded within this window are
    /// swept back to the user's balance.
    pub reservation_ttl_secs: u64,
    /// Per-group price multipliers; a group absent here uses 1.0.
    pub group_ratio: std::collections::HashMap<String, f64>,
    /// Per-model price ratios (model_ratio, completion_ratio).
    pub model_ratio: std::collections::HashMap<String, ModelRatio>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRatio {
    pub model_ratio: f64,
    pub completion_ratio: f64,
    /// Fixed quota charged per call instead of per-token pricing.
    #[serde(default)]
    pub per_call_price: Option<f64>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            retry_times: 3,
            max_body_bytes: 32 * 1024 * 1024,
            count_tokens: true,
            check_sensitive: false,
            sensitive_words: Vec::new(),
            error_log_enabled: true,
            reservation_ttl_secs: 600,
            group_ratio: std::collections::HashMap::new(),
            model_ratio: std::collections::HashMap::new(),
        }
    }
}

/// Optional layer used for merging global config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dsn: Option<String>,
    pub proxy: Option<String>,
    pub relay: Option<RelayConfig>,
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.dsn.is_some() {
            self.dsn = other.dsn;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
        if other.relay.is_some() {
            self.relay = other.relay;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(3000),
            dsn: self.dsn.ok_or(GlobalConfigError::MissingField("dsn"))?,
            proxy: self.proxy,
            relay: self.relay.unwrap_or_default(),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            dsn: Some(value.dsn),
            proxy: value.proxy,
            relay: Some(value.relay),
        }
    }
}
