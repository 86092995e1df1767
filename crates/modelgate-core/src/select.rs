use std::sync::Arc;

use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::channel::Channel;
use crate::error::RelayError;
use crate::registry::ChannelRegistry;

/// Explicit pin carried by the request (URL key suffix or middleware hint).
#[derive(Debug, Clone)]
pub struct PinnedChannel {
    pub id: i64,
    pub channel_type: String,
    pub name: String,
}

pub struct SelectContext<'a> {
    pub group: &'a str,
    pub model: &'a str,
    /// `X-Request-Id` (or `request_id`) header for sticky hash routing.
    pub request_id: Option<&'a str>,
    pub pinned: Option<&'a PinnedChannel>,
    /// Channel ids already attempted this request.
    pub excluded: &'a [i64],
    pub attempt: u32,
}

/// Pick a channel for the current attempt.
///
/// Precedence: explicit pin, then the last failed channel's fallback, then
/// deterministic request-id hash, then priority-weighted random. The
/// exclusion set guarantees no channel is dispatched twice per request.
pub fn select(
    registry: &ChannelRegistry,
    ctx: &SelectContext<'_>,
) -> Result<Arc<Channel>, RelayError> {
    if let Some(pin) = ctx.pinned {
        // The pin bypasses eligibility entirely; an unknown id still gets a
        // stub so admins can probe channels that have not been cached yet.
        return Ok(registry.lookup_by_id(pin.id).unwrap_or_else(|| {
            warn!(
                event = "select_pinned_stub",
                channel_id = pin.id,
                "pinned channel not in registry, dispatching with stub"
            );
            Arc::new(Channel::stub(pin.id, &pin.channel_type, &pin.name))
        }));
    }

    if ctx.attempt > 0
        && let Some(fallback) = fallback_of_last_failed(registry, ctx)
    {
        info!(
            event = "select_fallback",
            channel_id = fallback.id,
            "routing retry to the failed channel's fallback"
        );
        return Ok(fallback);
    }

    let eligible = registry.eligible(ctx.group, ctx.model);
    if eligible.is_empty() {
        return Err(RelayError::no_channel_available(ctx.group, ctx.model));
    }

    if let Some(request_id) = ctx.request_id {
        let index = stable_index(request_id, eligible.len());
        let candidate = &eligible[index];
        if !ctx.excluded.contains(&candidate.id) {
            info!(
                event = "select_hash",
                channel_id = candidate.id,
                request_id = %request_id,
                "sticky-routed by request id"
            );
            return Ok(candidate.clone());
        }
        // Hash landed on an excluded channel: reselect rather than re-hash.
    }

    let pool: Vec<&Arc<Channel>> = eligible
        .iter()
        .filter(|ch| !ctx.excluded.contains(&ch.id))
        .collect();
    if pool.is_empty() {
        return Err(RelayError::no_channel_available(ctx.group, ctx.model));
    }
    let weights: Vec<u32> = pool.iter().map(|ch| ch.priority).collect();
    Ok(pool[pick_weighted_index(&weights)].clone())
}

/// On a retry, prefer the just-failed channel's nominated fallback. Honoured
/// at most once per fallback id per request via the exclusion set.
fn fallback_of_last_failed(
    registry: &ChannelRegistry,
    ctx: &SelectContext<'_>,
) -> Option<Arc<Channel>> {
    let last_failed = *ctx.excluded.last()?;
    let failed = registry.lookup_by_id(last_failed)?;
    let fallback_id = failed.fallback_channel_id?;
    if ctx.excluded.contains(&fallback_id) {
        warn!(
            event = "select_fallback_skipped",
            channel_id = fallback_id,
            "fallback already attempted, continuing normal selection"
        );
        return None;
    }
    let fallback = registry.lookup_by_id(fallback_id)?;
    if !fallback.status.is_enabled() {
        return None;
    }
    if !fallback.supports_model(ctx.model) {
        return None;
    }
    Some(fallback)
}

/// Stable digest of the request id into a pool index, so retries of the same
/// request id sticky-route while the eligible set is unchanged.
fn stable_index(request_id: &str, len: usize) -> usize {
    let digest = Sha256::digest(request_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % len as u64) as usize
}

fn pick_weighted_index(weights: &[u32]) -> usize {
    let total: u64 = weights.iter().map(|w| u64::from(*w)).sum();
    if total == 0 {
        return rand::rng().random_range(0..weights.len());
    }
    let mut roll = rand::rng().random_range(0..total);
    for (index, weight) in weights.iter().enumerate() {
        let weight = u64::from(*weight);
        if roll < weight {
            return index;
        }
        roll -= weight;
    }
    weights.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelSettings;
    use modelgate_storage::ChannelStatus;

    fn channel(id: i64, priority: u32, fallback: Option<i64>) -> Channel {
        Channel {
            id,
            channel_type: "openai".to_string(),
            name: format!("c{id}"),
            base_url: "https://upstream.example".to_string(),
            key: "k".to_string(),
            models: vec!["m".to_string()],
            groups: vec!["default".to_string()],
            status: ChannelStatus::Enabled,
            priority,
            fallback_channel_id: fallback,
            settings: ChannelSettings::default(),
            auto_ban: false,
        }
    }

    fn ctx<'a>(excluded: &'a [i64], request_id: Option<&'a str>, attempt: u32) -> SelectContext<'a> {
        SelectContext {
            group: "default",
            model: "m",
            request_id,
            pinned: None,
            excluded,
            attempt,
        }
    }

    #[test]
    fn hash_routing_is_deterministic() {
        let registry =
            ChannelRegistry::new([channel(1, 1, None), channel(2, 1, None), channel(3, 1, None)]);
        let first = select(&registry, &ctx(&[], Some("abc-123"), 0)).unwrap();
        for _ in 0..16 {
            let again = select(&registry, &ctx(&[], Some("abc-123"), 0)).unwrap();
            assert_eq!(first.id, again.id);
        }
    }

    #[test]
    fn hash_hit_on_excluded_falls_back_to_random() {
        let registry =
            ChannelRegistry::new([channel(1, 1, None), channel(2, 1, None), channel(3, 1, None)]);
        let sticky = select(&registry, &ctx(&[], Some("abc-123"), 0)).unwrap();
        let excluded = [sticky.id];
        for _ in 0..16 {
            let other = select(&registry, &ctx(&excluded, Some("abc-123"), 1)).unwrap();
            assert_ne!(other.id, sticky.id);
        }
    }

    #[test]
    fn fallback_is_preferred_on_retry() {
        let registry = ChannelRegistry::new([channel(1, 10, Some(9)), channel(9, 1, None)]);
        let excluded = [1];
        let chosen = select(&registry, &ctx(&excluded, None, 1)).unwrap();
        assert_eq!(chosen.id, 9);
    }

    #[test]
    fn fallback_is_used_at_most_once() {
        let registry = ChannelRegistry::new([
            channel(1, 1, Some(9)),
            channel(9, 1, Some(1)),
            channel(2, 1, None),
        ]);
        // Both 1 and 9 already failed; 9's fallback (1) is excluded too, so
        // normal selection must take over.
        let excluded = [1, 9];
        let chosen = select(&registry, &ctx(&excluded, None, 2)).unwrap();
        assert_eq!(chosen.id, 2);
    }

    #[test]
    fn disabled_fallback_is_ignored() {
        let mut fb = channel(9, 1, None);
        fb.status = ChannelStatus::Disabled;
        let registry = ChannelRegistry::new([channel(1, 1, Some(9)), fb, channel(2, 1, None)]);
        let excluded = [1];
        let chosen = select(&registry, &ctx(&excluded, None, 1)).unwrap();
        assert_eq!(chosen.id, 2);
    }

    #[test]
    fn exhausted_pool_is_no_channel_available() {
        let registry = ChannelRegistry::new([channel(1, 1, None)]);
        let excluded = [1];
        let err = select(&registry, &ctx(&excluded, None, 1)).unwrap_err();
        assert!(err.options().skip_retry);
    }

    #[test]
    fn pinned_unknown_id_yields_stub() {
        let registry = ChannelRegistry::new([]);
        let pin = PinnedChannel {
            id: 77,
            channel_type: "openai".to_string(),
            name: "pinned".to_string(),
        };
        let mut context = ctx(&[], None, 0);
        context.pinned = Some(&pin);
        let chosen = select(&registry, &context).unwrap();
        assert_eq!(chosen.id, 77);
        assert!(chosen.base_url.is_empty());
    }

    #[test]
    fn weighted_random_never_picks_excluded() {
        let registry = ChannelRegistry::new([channel(1, 1000, None), channel(2, 1, None)]);
        let excluded = [1];
        for _ in 0..32 {
            let chosen = select(&registry, &ctx(&excluded, None, 1)).unwrap();
            assert_eq!(chosen.id, 2);
        }
    }
}
