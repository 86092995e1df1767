use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use http::{HeaderMap, StatusCode};

use modelgate_common::RelayConfig;
use modelgate_storage::{StorageSnapshot, TokenRow, UserRow};

use crate::select::PinnedChannel;

/// Outcome of token authentication, attached to the request for the relay.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: i64,
    pub token_id: i64,
    pub token_name: String,
    /// Resolved routing group (token override or owner group).
    pub group: String,
    pub unlimited_quota: bool,
    /// Token-level remaining quota at auth time; unchecked when unlimited.
    pub remain_quota: i64,
    pub cross_group_retry: bool,
    pub is_admin: bool,
    /// Empty means every model is allowed.
    pub model_allow_list: Vec<String>,
    /// Admin-only channel pin parsed from the key suffix.
    pub pinned: Option<PinnedChannel>,
}

#[derive(Debug)]
pub struct AuthError {
    pub status: StatusCode,
    pub message: String,
}

impl AuthError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }
}

#[derive(Debug, Default)]
pub struct AuthSnapshot {
    tokens_by_key: HashMap<String, TokenRow>,
    users_by_id: HashMap<i64, UserRow>,
}

impl AuthSnapshot {
    pub fn from_storage(snapshot: &StorageSnapshot) -> Self {
        Self {
            tokens_by_key: snapshot
                .tokens
                .iter()
                .map(|t| (t.key.clone(), t.clone()))
                .collect(),
            users_by_id: snapshot.users.iter().map(|u| (u.id, u.clone())).collect(),
        }
    }
}

/// Bearer-credential authenticator over a lock-free snapshot. Replaced
/// wholesale when tokens or users change.
pub struct TokenAuth {
    snapshot: ArcSwap<AuthSnapshot>,
    config: ArcSwap<RelayConfig>,
}

impl TokenAuth {
    pub fn new(snapshot: AuthSnapshot, config: RelayConfig) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
            config: ArcSwap::from_pointee(config),
        }
    }

    pub fn replace_snapshot(&self, snapshot: AuthSnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }

    pub fn replace_config(&self, config: RelayConfig) {
        self.config.store(Arc::new(config));
    }

    /// Authenticate a relay request. `path` and `query_key` feed the
    /// per-endpoint key sources; `client_ip` feeds the CIDR allow list.
    pub fn authenticate(
        &self,
        headers: &HeaderMap,
        path: &str,
        query_key: Option<&str>,
        client_ip: Option<IpAddr>,
    ) -> Result<AuthContext, AuthError> {
        let raw_key = extract_key(headers, path, query_key)
            .ok_or_else(|| AuthError::unauthorized("missing api key"))?;
        let (key, pin) = split_pinned(&raw_key);

        let snapshot = self.snapshot.load();
        let token = snapshot
            .tokens_by_key
            .get(key)
            .ok_or_else(|| AuthError::unauthorized("invalid api key"))?;
        if !token.enabled {
            return Err(AuthError::unauthorized("api key disabled"));
        }

        if !token.ip_allow_list.is_empty() {
            let ip = client_ip
                .ok_or_else(|| AuthError::forbidden("client ip could not be determined"))?;
            if !token.ip_allow_list.iter().any(|cidr| ip_in_cidr(ip, cidr)) {
                return Err(AuthError::forbidden(
                    "client ip is not in the token's allow list",
                ));
            }
        }

        let user = snapshot
            .users_by_id
            .get(&token.user_id)
            .ok_or_else(|| AuthError::forbidden("token owner not found"))?;
        if !user.enabled {
            return Err(AuthError::forbidden("user is disabled"));
        }

        let group = self.resolve_group(token, user)?;

        let pinned = match pin {
            Some(channel_id) if user.admin => Some(PinnedChannel {
                id: channel_id,
                channel_type: String::new(),
                name: String::new(),
            }),
            Some(_) => {
                return Err(AuthError::forbidden(
                    "channel pinning is restricted to admin users",
                ));
            }
            None => None,
        };

        Ok(AuthContext {
            user_id: user.id,
            token_id: token.id,
            token_name: token.name.clone(),
            group,
            unlimited_quota: token.unlimited_quota,
            remain_quota: token.remain_quota,
            cross_group_retry: token.cross_group_retry,
            is_admin: user.admin,
            model_allow_list: token.model_allow_list.clone(),
            pinned,
        })
    }

    fn resolve_group(&self, token: &TokenRow, user: &UserRow) -> Result<String, AuthError> {
        if token.group.is_empty() {
            return Ok(user.group.clone());
        }
        let config = self.config.load();
        // `auto` defers group choice to routing; any other override must be
        // a priced group.
        if token.group != "auto"
            && !config.group_ratio.is_empty()
            && !config.group_ratio.contains_key(&token.group)
        {
            return Err(AuthError::forbidden(format!(
                "group {} is not available",
                token.group
            )));
        }
        Ok(token.group.clone())
    }
}

/// Key sources in precedence order: WebSocket subprotocol, `x-api-key` on
/// messages paths, `x-goog-api-key` / `?key=` on generate-content paths,
/// then the bearer header.
fn extract_key(headers: &HeaderMap, path: &str, query_key: Option<&str>) -> Option<String> {
    if let Some(protocols) = header_str(headers, "sec-websocket-protocol") {
        for part in protocols.split(',') {
            let part = part.trim();
            if let Some(key) = part.strip_prefix("openai-insecure-api-key.") {
                return Some(strip_prefixes(key));
            }
        }
    }
    if path.contains("/v1/messages")
        && let Some(key) = header_str(headers, "x-api-key")
    {
        return Some(strip_prefixes(key));
    }
    if path.contains("/v1beta/") || path.contains(":generateContent") || path.contains(":embedContent") {
        if let Some(key) = header_str(headers, "x-goog-api-key") {
            return Some(strip_prefixes(key));
        }
        if let Some(key) = query_key {
            return Some(strip_prefixes(key));
        }
    }
    let auth = header_str(headers, "authorization")?;
    let token = auth
        .strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .unwrap_or(auth);
    Some(strip_prefixes(token.trim()))
}

fn strip_prefixes(key: &str) -> String {
    key.trim().trim_start_matches("sk-").to_string()
}

/// `<token-key>[-<pinned-channel-id>]`: a trailing numeric segment is an
/// admin channel pin, anything else is part of the key.
fn split_pinned(key: &str) -> (&str, Option<i64>) {
    if let Some((head, tail)) = key.rsplit_once('-')
        && !tail.is_empty()
        && tail.chars().all(|c| c.is_ascii_digit())
        && let Ok(channel_id) = tail.parse::<i64>()
    {
        return (head, Some(channel_id));
    }
    (key, None)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Membership test against one `a.b.c.d/len` (or bare address) entry.
fn ip_in_cidr(ip: IpAddr, cidr: &str) -> bool {
    let (network, len) = match cidr.split_once('/') {
        Some((network, len)) => {
            let Ok(len) = len.parse::<u32>() else {
                return false;
            };
            (network, len)
        }
        None => (cidr, u32::MAX),
    };
    let Ok(network) = network.parse::<IpAddr>() else {
        return false;
    };
    match (ip, network) {
        (IpAddr::V4(ip), IpAddr::V4(network)) => {
            let len = len.min(32);
            let mask = if len == 0 {
                0
            } else {
                u32::MAX << (32 - len)
            };
            u32::from(ip) & mask == u32::from(network) & mask
        }
        (IpAddr::V6(ip), IpAddr::V6(network)) => {
            let len = len.min(128);
            let mask = if len == 0 {
                0
            } else {
                u128::MAX << (128 - len)
            };
            u128::from(ip) & mask == u128::from(network) & mask
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use time::OffsetDateTime;

    fn snapshot(token_group: &str, admin: bool, ip_allow: &[&str]) -> AuthSnapshot {
        let now = OffsetDateTime::now_utc();
        AuthSnapshot {
            tokens_by_key: HashMap::from([(
                "abc123".to_string(),
                TokenRow {
                    id: 7,
                    user_id: 1,
                    key: "abc123".to_string(),
                    name: "tok".to_string(),
                    unlimited_quota: false,
                    remain_quota: 1000,
                    ip_allow_list: ip_allow.iter().map(|s| s.to_string()).collect(),
                    group: token_group.to_string(),
                    model_allow_list: Vec::new(),
                    cross_group_retry: false,
                    enabled: true,
                    updated_at: now,
                },
            )]),
            users_by_id: HashMap::from([(
                1,
                UserRow {
                    id: 1,
                    username: "u".to_string(),
                    group: "default".to_string(),
                    quota: 1000,
                    enabled: true,
                    admin,
                    updated_at: now,
                },
            )]),
        }
    }

    fn bearer(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {key}")).unwrap(),
        );
        headers
    }

    #[test]
    fn bearer_key_authenticates() {
        let auth = TokenAuth::new(snapshot("", false, &[]), RelayConfig::default());
        let ctx = auth
            .authenticate(&bearer("sk-abc123"), "/v1/chat/completions", None, None)
            .unwrap();
        assert_eq!(ctx.user_id, 1);
        assert_eq!(ctx.group, "default");
        assert!(ctx.pinned.is_none());
    }

    #[test]
    fn admin_pin_suffix_is_parsed() {
        let auth = TokenAuth::new(snapshot("", true, &[]), RelayConfig::default());
        let ctx = auth
            .authenticate(&bearer("sk-abc123-42"), "/v1/chat/completions", None, None)
            .unwrap();
        assert_eq!(ctx.pinned.unwrap().id, 42);
    }

    #[test]
    fn non_admin_pin_is_forbidden() {
        let auth = TokenAuth::new(snapshot("", false, &[]), RelayConfig::default());
        let err = auth
            .authenticate(&bearer("sk-abc123-42"), "/v1/chat/completions", None, None)
            .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn websocket_subprotocol_key_is_accepted() {
        let auth = TokenAuth::new(snapshot("", false, &[]), RelayConfig::default());
        let mut headers = HeaderMap::new();
        headers.insert(
            "sec-websocket-protocol",
            HeaderValue::from_static("realtime, openai-insecure-api-key.sk-abc123"),
        );
        let ctx = auth
            .authenticate(&headers, "/v1/realtime", None, None)
            .unwrap();
        assert_eq!(ctx.token_id, 7);
    }

    #[test]
    fn x_api_key_works_on_messages_paths_only() {
        let auth = TokenAuth::new(snapshot("", false, &[]), RelayConfig::default());
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("sk-abc123"));
        assert!(auth.authenticate(&headers, "/v1/messages", None, None).is_ok());
        assert!(
            auth.authenticate(&headers, "/v1/chat/completions", None, None)
                .is_err()
        );
    }

    #[test]
    fn query_key_works_on_generate_content_paths() {
        let auth = TokenAuth::new(snapshot("", false, &[]), RelayConfig::default());
        let headers = HeaderMap::new();
        let ctx = auth
            .authenticate(
                &headers,
                "/v1beta/models/gemini-pro:generateContent",
                Some("sk-abc123"),
                None,
            )
            .unwrap();
        assert_eq!(ctx.token_id, 7);
    }

    #[test]
    fn ip_allow_list_is_enforced() {
        let auth = TokenAuth::new(
            snapshot("", false, &["10.0.0.0/8"]),
            RelayConfig::default(),
        );
        let inside: IpAddr = "10.1.2.3".parse().unwrap();
        let outside: IpAddr = "192.168.1.1".parse().unwrap();
        assert!(
            auth.authenticate(&bearer("sk-abc123"), "/v1/chat/completions", None, Some(inside))
                .is_ok()
        );
        let err = auth
            .authenticate(&bearer("sk-abc123"), "/v1/chat/completions", None, Some(outside))
            .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn group_override_must_be_priced() {
        let mut config = RelayConfig::default();
        config.group_ratio.insert("vip".to_string(), 2.0);
        let auth = TokenAuth::new(snapshot("vip", false, &[]), config);
        let ctx = auth
            .authenticate(&bearer("sk-abc123"), "/v1/chat/completions", None, None)
            .unwrap();
        assert_eq!(ctx.group, "vip");

        let mut config = RelayConfig::default();
        config.group_ratio.insert("other".to_string(), 1.0);
        let auth = TokenAuth::new(snapshot("vip", false, &[]), config);
        assert!(
            auth.authenticate(&bearer("sk-abc123"), "/v1/chat/completions", None, None)
                .is_err()
        );
    }
}
