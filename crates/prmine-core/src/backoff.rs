//! Rate-limit aware retry loop shared by every remote call.
//!
//! One call is an explicit bounded loop:
//!
//! - before each attempt, pause for the cooldown if the tracked quota is
//!   below the low-water mark
//! - 200 refreshes the quota and returns the body
//! - 404 is absent, never retried
//! - 403/429 sleeps until the quota resets (at least the floor), then gets
//!   exactly one final attempt
//! - 5xx and transport failures back off `2^attempt` seconds up to
//!   `max_attempts`, then give up
//! - anything else is absent

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::config::RetrySettings;

/// Quota reported by GitHub before any response has been seen.
pub const INITIAL_QUOTA: u64 = 5000;

/// What the transport saw on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    /// `X-RateLimit-Remaining`
    pub rate_remaining: Option<u64>,
    /// `X-RateLimit-Reset`, unix seconds
    pub rate_reset: Option<i64>,
    pub body: String,
}

/// One HTTP GET. `Err` means the request never produced a status
/// (timeout, connection failure).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<RawResponse>;
}

/// Remaining-quota bookkeeping plus the API call counter.
#[derive(Debug)]
pub struct RateLimitTracker {
    remaining: AtomicU64,
    reset: AtomicI64,
    calls: AtomicU64,
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self {
            remaining: AtomicU64::new(INITIAL_QUOTA),
            reset: AtomicI64::new(0),
            calls: AtomicU64::new(0),
        }
    }
}

impl RateLimitTracker {
    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Relaxed)
    }

    pub fn reset_at(&self) -> i64 {
        self.reset.load(Ordering::Relaxed)
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn count_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    fn observe(&self, response: &RawResponse) {
        if let Some(remaining) = response.rate_remaining {
            self.remaining.store(remaining, Ordering::Relaxed);
        }
        if let Some(reset) = response.rate_reset {
            self.reset.store(reset, Ordering::Relaxed);
        }
    }
}

/// A [`Transport`] wrapped in the retry protocol.
pub struct RetryingClient<T> {
    transport: T,
    policy: RetrySettings,
    tracker: RateLimitTracker,
}

impl<T: Transport> RetryingClient<T> {
    pub fn new(transport: T, policy: RetrySettings) -> Self {
        Self {
            transport,
            policy,
            tracker: RateLimitTracker::default(),
        }
    }

    pub fn tracker(&self) -> &RateLimitTracker {
        &self.tracker
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// GET and decode a JSON body. `None` on absence or malformed JSON.
    pub async fn get_json<D: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Option<D> {
        let body = self.call_with_backoff(url, query).await?;
        match serde_json::from_str(&body) {
            Ok(value) => Some(value),
            Err(e) => {
                error!("Malformed JSON from {}: {}", url, e);
                None
            }
        }
    }

    /// Run the retry loop and return the 200 body, if any.
    pub async fn call_with_backoff(&self, url: &str, query: &[(&str, String)]) -> Option<String> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt: u32 = 0;
        let mut quota_retry_used = false;

        loop {
            if self.tracker.remaining() < self.policy.low_water_mark {
                warn!(
                    "API rate limit low: {} remaining, waiting {:?}",
                    self.tracker.remaining(),
                    self.policy.cooldown()
                );
                sleep(self.policy.cooldown()).await;
            }

            let result = self.transport.get(url, query).await;
            self.tracker.count_call();

            let transient = match result {
                Ok(response) => match response.status {
                    200 => {
                        self.tracker.observe(&response);
                        return Some(response.body);
                    }
                    404 => {
                        debug!("Resource not found: {}", url);
                        return None;
                    }
                    403 | 429 => {
                        if quota_retry_used {
                            error!("Rate limit still exceeded for {}, giving up", url);
                            return None;
                        }
                        quota_retry_used = true;
                        let wait = self.quota_wait(response.rate_reset);
                        error!("Rate limit exceeded, waiting {:?}", wait);
                        sleep(wait).await;
                        // One final attempt, no further backoff.
                        attempt = max_attempts - 1;
                        continue;
                    }
                    status if (500..600).contains(&status) => format!("server error {status}"),
                    status => {
                        error!("API request failed: {} - {}", status, response.body);
                        return None;
                    }
                },
                Err(e) => format!("request failed: {e}"),
            };

            attempt += 1;
            if attempt >= max_attempts {
                error!("{} for {} after {} attempts", transient, url, attempt);
                return None;
            }
            let delay = Duration::from_secs(1u64 << (attempt - 1));
            warn!("{} for {}, retrying in {:?}", transient, url, delay);
            sleep(delay).await;
        }
    }

    fn quota_wait(&self, reset: Option<i64>) -> Duration {
        let reset = reset.unwrap_or_else(|| self.tracker.reset_at());
        let until_reset = reset - chrono::Utc::now().timestamp();
        let secs = until_reset.max(self.policy.quota_floor_secs as i64).max(0);
        Duration::from_secs(secs as u64)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Replays a fixed script of responses and records requested URLs.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        script: Mutex<VecDeque<Result<RawResponse, String>>>,
        pub(crate) requests: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(script: Vec<Result<RawResponse, String>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    pub(crate) fn response(status: u16, body: &str) -> Result<RawResponse, String> {
        Ok(RawResponse {
            status,
            rate_remaining: Some(4000),
            rate_reset: None,
            body: body.to_string(),
        })
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<RawResponse> {
            let q: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
            self.requests.lock().unwrap().push(format!("{}?{}", url, q.join("&")));
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(r)) => Ok(r),
                Some(Err(e)) => Err(anyhow::anyhow!(e)),
                None => Ok(RawResponse {
                    status: 404,
                    rate_remaining: None,
                    rate_reset: None,
                    body: String::new(),
                }),
            }
        }
    }

    fn client(script: Vec<Result<RawResponse, String>>) -> RetryingClient<ScriptedTransport> {
        RetryingClient::new(ScriptedTransport::new(script), RetrySettings::default())
    }

    fn attempts(c: &RetryingClient<ScriptedTransport>) -> usize {
        c.transport.requests.lock().unwrap().len()
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_refreshes_quota() {
        let c = client(vec![Ok(RawResponse {
            status: 200,
            rate_remaining: Some(1234),
            rate_reset: Some(1_700_000_000),
            body: "[1,2]".to_string(),
        })]);
        let v: Vec<u32> = c.get_json("u", &[]).await.unwrap();
        assert_eq!(v, vec![1, 2]);
        assert_eq!(c.tracker().remaining(), 1234);
        assert_eq!(c.tracker().reset_at(), 1_700_000_000);
        assert_eq!(c.tracker().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_retried() {
        let c = client(vec![response(404, ""), response(200, "{}")]);
        assert!(c.call_with_backoff("u", &[]).await.is_none());
        assert_eq!(attempts(&c), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_back_off_then_succeed() {
        let c = client(vec![response(503, ""), response(502, ""), response(200, "ok")]);
        let start = Instant::now();
        assert_eq!(c.call_with_backoff("u", &[]).await.as_deref(), Some("ok"));
        assert_eq!(attempts(&c), 3);
        // 1s after the first failure, 2s after the second
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_exhaust_attempts() {
        let c = client(vec![response(500, ""), response(500, ""), response(500, ""), response(200, "late")]);
        assert!(c.call_with_backoff("u", &[]).await.is_none());
        assert_eq!(attempts(&c), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_back_off() {
        let c = client(vec![Err("timeout".to_string()), response(200, "ok")]);
        let start = Instant::now();
        assert_eq!(c.call_with_backoff("u", &[]).await.as_deref(), Some("ok"));
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exhaustion_sleeps_then_retries_once() {
        let c = client(vec![response(403, ""), response(200, "ok")]);
        let start = Instant::now();
        assert_eq!(c.call_with_backoff("u", &[]).await.as_deref(), Some("ok"));
        assert!(start.elapsed() >= Duration::from_secs(3600));
        assert_eq!(attempts(&c), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_retry_granted_once() {
        let c = client(vec![response(429, ""), response(403, ""), response(200, "ok")]);
        assert!(c.call_with_backoff("u", &[]).await.is_none());
        assert_eq!(attempts(&c), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_attempt_after_quota_does_not_back_off() {
        let c = client(vec![response(403, ""), response(503, ""), response(200, "ok")]);
        assert!(c.call_with_backoff("u", &[]).await.is_none());
        assert_eq!(attempts(&c), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_quota_triggers_cooldown() {
        let c = client(vec![
            Ok(RawResponse {
                status: 200,
                rate_remaining: Some(10),
                rate_reset: None,
                body: "1".to_string(),
            }),
            response(200, "2"),
        ]);
        c.call_with_backoff("u", &[]).await.unwrap();
        let start = Instant::now();
        c.call_with_backoff("u", &[]).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(60));
        assert_eq!(c.tracker().remaining(), 4000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_status_and_bad_json_are_absent() {
        let c = client(vec![response(422, "nope"), response(200, "{not json")]);
        assert!(c.call_with_backoff("u", &[]).await.is_none());
        assert!(c.get_json::<serde_json::Value>("u", &[]).await.is_none());
        assert_eq!(attempts(&c), 2);
    }
}
