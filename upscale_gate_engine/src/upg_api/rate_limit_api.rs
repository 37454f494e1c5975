use std::fmt::Debug;

use log::*;

use crate::{
    clock::SharedClock,
    db_types::RateLimitDecision,
    traits::{RateLimitError, RateLimitStore},
};

pub const MINUTE_MS: i64 = 60_000;
pub const DAY_MS: i64 = 86_400_000;

/// One fixed window: at most `max_requests` per `window_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimit {
    pub max_requests: u32,
    pub window_ms: i64,
}

impl WindowLimit {
    pub fn per_minute(max_requests: u32) -> Self {
        Self { max_requests, window_ms: MINUTE_MS }
    }

    pub fn per_day(max_requests: u32) -> Self {
        Self { max_requests, window_ms: DAY_MS }
    }
}

/// The limits applied to a single endpoint. Both windows must admit a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointLimits {
    pub per_minute: WindowLimit,
    pub per_day: WindowLimit,
}

impl EndpointLimits {
    pub fn new(per_minute: u32, per_day: u32) -> Self {
        Self { per_minute: WindowLimit::per_minute(per_minute), per_day: WindowLimit::per_day(per_day) }
    }
}

/// The rate-limit identity of a caller on an endpoint.
pub fn identity_key(client_address: &str, install_id: &str, endpoint: &str) -> String {
    format!("{client_address}:{install_id}:{endpoint}")
}

/// `RateLimitApi` checks callers against a per-minute and a per-day fixed window.
///
/// The minute window is checked first. A request rejected by the minute window is not counted against the day
/// window, but a request admitted by the minute window and rejected by the day window has still used up a slot in the
/// minute window.
#[derive(Clone)]
pub struct RateLimitApi<B> {
    store: B,
    clock: SharedClock,
}

impl<B> Debug for RateLimitApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RateLimitApi")
    }
}

impl<B> RateLimitApi<B> {
    pub fn new(store: B, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &B {
        &self.store
    }
}

impl<B> RateLimitApi<B>
where B: RateLimitStore
{
    /// Counts a request against a single window.
    pub async fn check(&self, identifier: &str, limit: WindowLimit) -> Result<RateLimitDecision, RateLimitError> {
        let now = self.clock.now_millis();
        self.store.check_window(identifier, limit.max_requests, limit.window_ms, now).await
    }

    /// Counts a request against both windows of `limits`. A denial carries the `reset_at` of the window that denied
    /// it. When both admit, the decision with fewer remaining requests is returned.
    pub async fn check_endpoint(
        &self,
        identifier: &str,
        limits: &EndpointLimits,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let minute = self.check(&format!("{identifier}:minute"), limits.per_minute).await?;
        if !minute.allowed {
            debug!("🚦️ {identifier} hit the per-minute limit. Resets at {}", minute.reset_at);
            return Ok(minute);
        }
        let day = self.check(&format!("{identifier}:day"), limits.per_day).await?;
        if !day.allowed {
            debug!("🚦️ {identifier} hit the per-day limit. Resets at {}", day.reset_at);
            return Ok(day);
        }
        trace!("🚦️ {identifier} admitted. {} left this minute, {} today", minute.remaining, day.remaining);
        Ok(if day.remaining < minute.remaining { day } else { minute })
    }

    /// Drops closed windows from the store.
    pub async fn purge_expired(&self) -> Result<usize, RateLimitError> {
        self.store.purge_expired(self.clock.now_millis()).await
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;

    use super::*;
    use crate::{
        clock::{Clock, MockClock},
        memory::MemoryStore,
    };

    fn api() -> (RateLimitApi<MemoryStore>, MockClock) {
        let clock = MockClock::from_secs(1_700_000_000);
        (RateLimitApi::new(MemoryStore::new(), clock.shared()), clock)
    }

    #[tokio::test]
    async fn fixed_window_resets_after_reset_at() {
        let (api, clock) = api();
        let limit = WindowLimit { max_requests: 3, window_ms: 1_000 };
        let mut allowed = vec![];
        for _ in 0..4 {
            allowed.push(api.check("id", limit).await.unwrap().allowed);
            clock.advance(Duration::milliseconds(100));
        }
        assert_eq!(allowed, [true, true, true, false]);
        clock.advance(Duration::milliseconds(700));
        let d = api.check("id", limit).await.unwrap();
        assert!(d.allowed);
        assert_eq!(d.count, 1);
    }

    #[tokio::test]
    async fn fifth_call_in_a_minute_is_denied() {
        let (api, clock) = api();
        let limits = EndpointLimits::new(4, 100);
        let id = identity_key("10.0.0.1", "abc123", "upscale");
        for _ in 0..4 {
            assert!(api.check_endpoint(&id, &limits).await.unwrap().allowed);
            clock.advance(Duration::seconds(5));
        }
        let d = api.check_endpoint(&id, &limits).await.unwrap();
        assert!(!d.allowed);
        assert!(d.reset_at > clock.now_millis());
        // Other callers are unaffected
        let other = identity_key("10.0.0.2", "abc123", "upscale");
        assert!(api.check_endpoint(&other, &limits).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn day_window_outlasts_minute_window() {
        let (api, clock) = api();
        let limits = EndpointLimits::new(10, 2);
        assert!(api.check_endpoint("x", &limits).await.unwrap().allowed);
        assert!(api.check_endpoint("x", &limits).await.unwrap().allowed);
        let d = api.check_endpoint("x", &limits).await.unwrap();
        assert!(!d.allowed);
        clock.advance(Duration::minutes(5));
        let d = api.check_endpoint("x", &limits).await.unwrap();
        assert!(!d.allowed);
        assert!(d.reset_at - clock.now_millis() > MINUTE_MS);
        clock.advance(Duration::days(1));
        assert!(api.check_endpoint("x", &limits).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn tightest_window_is_reported() {
        let (api, _) = api();
        let d = api.check_endpoint("y", &EndpointLimits::new(5, 3)).await.unwrap();
        assert_eq!(d.remaining, 2);
        assert_eq!(identity_key("1.2.3.4", "i", "token"), "1.2.3.4:i:token");
    }

    #[tokio::test]
    async fn purge_uses_the_clock() {
        let (api, clock) = api();
        api.check("z", WindowLimit::per_minute(1)).await.unwrap();
        assert_eq!(api.purge_expired().await.unwrap(), 0);
        clock.advance(Duration::minutes(2));
        assert_eq!(api.purge_expired().await.unwrap(), 1);
    }
}
