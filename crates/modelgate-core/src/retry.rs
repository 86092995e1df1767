use std::time::Duration;

use crate::error::RelayError;

/// Inputs the retry decision needs about the attempt that just failed.
pub struct RetryContext {
    pub attempts_remaining: u32,
    /// Pinned requests never retry across channels.
    pub pinned: bool,
    /// The failed channel's `allow_all_retry` setting.
    pub allow_all_retry: bool,
}

/// Whether the orchestrator should dispatch another attempt.
pub fn should_retry(error: &RelayError, ctx: &RetryContext) -> bool {
    if error.options().skip_retry {
        return false;
    }
    if ctx.attempts_remaining == 0 {
        return false;
    }
    if ctx.pinned {
        return false;
    }
    if error.options().channel_fatal {
        return true;
    }
    let status = error.status().as_u16();
    // A 400 means the request itself is malformed; no channel can heal it,
    // not even under allow_all_retry.
    if status == 400 {
        return false;
    }
    if ctx.allow_all_retry {
        return true;
    }
    match status {
        429 | 307 => true,
        // 504/524 are the upstream's own timeout verdicts.
        504 | 524 => false,
        500..=599 => true,
        408 => false,
        200..=299 => false,
        _ => true,
    }
}

/// Brief jittered pause before re-selection, scaled by attempt number.
pub async fn backoff_sleep(attempt: u32) {
    let base_ms = 50u64.saturating_mul(u64::from(attempt.min(4)));
    let jitter = rand::random::<u64>() % (base_ms + 1);
    tokio::time::sleep(Duration::from_millis(base_ms + jitter)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::StatusCode;

    fn ctx(attempts_remaining: u32) -> RetryContext {
        RetryContext {
            attempts_remaining,
            pinned: false,
            allow_all_retry: false,
        }
    }

    fn upstream(status: u16) -> RelayError {
        RelayError::upstream(StatusCode::from_u16(status).unwrap(), Bytes::new())
    }

    #[test]
    fn status_table_matches_policy() {
        assert!(should_retry(&upstream(429), &ctx(2)));
        assert!(should_retry(&upstream(307), &ctx(2)));
        assert!(should_retry(&upstream(500), &ctx(2)));
        assert!(should_retry(&upstream(502), &ctx(2)));
        assert!(!should_retry(&upstream(504), &ctx(2)));
        assert!(!should_retry(&upstream(524), &ctx(2)));
        assert!(!should_retry(&upstream(408), &ctx(2)));
        assert!(!should_retry(&upstream(400), &ctx(2)));
    }

    #[test]
    fn budget_exhaustion_stops_retries() {
        assert!(!should_retry(&upstream(500), &ctx(0)));
    }

    #[test]
    fn pinned_requests_never_retry() {
        let mut context = ctx(2);
        context.pinned = true;
        assert!(!should_retry(&upstream(500), &context));
    }

    #[test]
    fn skip_retry_seals_even_retryable_statuses() {
        let err = upstream(429).with_skip_retry();
        assert!(!should_retry(&err, &ctx(2)));
    }

    #[test]
    fn channel_fatal_overrides_status() {
        // 401 marks the channel fatal; the request should move on.
        assert!(should_retry(&upstream(401), &ctx(2)));
    }

    #[test]
    fn allow_all_retry_covers_odd_statuses_but_not_400() {
        let mut context = ctx(2);
        context.allow_all_retry = true;
        assert!(should_retry(&upstream(418), &context));
        assert!(!should_retry(&upstream(400), &context));
    }
}
