//! Rolling-window request/token budget.
//!
//! Each call goes through two phases against the limiter: `release` reclaims
//! budget once the window has elapsed, then `check_availability` decides
//! admission without mutating anything. Consumption is charged afterwards by
//! `update`, once a response has actually come back.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Default length of the rolling window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Source of wall-clock time for window arithmetic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Budget counters for the current window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterState {
    pub limit_requests: Option<u32>,
    pub limit_tokens: Option<u64>,
    pub consumed_requests: u32,
    pub consumed_tokens: u64,
    pub window_start: DateTime<Utc>,
}

impl RateLimiterState {
    fn has_capacity(&self, input_tokens: u32, output_tokens: u32) -> bool {
        let requests_ok = self
            .limit_requests
            .map_or(true, |limit| self.consumed_requests < limit);
        let tokens_ok = self.limit_tokens.map_or(true, |limit| {
            self.consumed_tokens
                .saturating_add(u64::from(input_tokens))
                .saturating_add(u64::from(output_tokens))
                <= limit
        });
        requests_ok && tokens_ok
    }
}

struct Inner {
    state: RateLimiterState,
    /// Server time minus local time, learned from response `Date` headers.
    clock_offset: TimeDelta,
}

/// Tracks consumption against optional request and token limits.
///
/// All operations take one short lock, so concurrent invocations sharing a
/// limiter never lose updates.
pub struct RateLimiter {
    window: TimeDelta,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl RateLimiter {
    /// Create a limiter with the default 60 second window.
    pub fn new(limit_requests: Option<u32>, limit_tokens: Option<u64>) -> Self {
        Self::with_clock(
            limit_requests,
            limit_tokens,
            DEFAULT_WINDOW,
            Arc::new(SystemClock),
        )
    }

    /// Create a limiter with a custom window and clock.
    pub fn with_clock(
        limit_requests: Option<u32>,
        limit_tokens: Option<u64>,
        window: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let window_start = clock.now();
        let (limit_requests, limit_tokens) = configured(limit_requests, limit_tokens);
        Self {
            window: TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX),
            clock,
            inner: Mutex::new(Inner {
                state: RateLimiterState {
                    limit_requests,
                    limit_tokens,
                    consumed_requests: 0,
                    consumed_tokens: 0,
                    window_start,
                },
                clock_offset: TimeDelta::zero(),
            }),
        }
    }

    fn now(&self, inner: &Inner) -> DateTime<Utc> {
        self.clock.now() + inner.clock_offset
    }

    fn release_locked(&self, inner: &mut Inner) {
        let now = self.now(inner);
        if now - inner.state.window_start >= self.window {
            inner.state.consumed_requests = 0;
            inner.state.consumed_tokens = 0;
            inner.state.window_start = now;
        }
    }

    /// Reset the counters if the window has elapsed. Idempotent within a window.
    pub fn release(&self) {
        let mut inner = self.inner.lock();
        self.release_locked(&mut inner);
    }

    /// Whether a call with these token counts fits the remaining budget.
    pub fn check_availability(&self, input_tokens: u32, estimated_output_tokens: u32) -> bool {
        self.inner
            .lock()
            .state
            .has_capacity(input_tokens, estimated_output_tokens)
    }

    /// `release` followed by `check_availability` under a single lock.
    pub fn admit(&self, input_tokens: u32, estimated_output_tokens: u32) -> bool {
        let mut inner = self.inner.lock();
        self.release_locked(&mut inner);
        inner
            .state
            .has_capacity(input_tokens, estimated_output_tokens)
    }

    /// Charge one completed request.
    ///
    /// `total_tokens` is added when the response reported usage. A server
    /// timestamp moves window arithmetic onto the server's clock; offsets under
    /// a second are ignored since `Date` only has second resolution. The first
    /// charge of a window also re-anchors `window_start` to the server time.
    pub fn update(&self, response_time: Option<DateTime<Utc>>, total_tokens: Option<u64>) {
        let mut inner = self.inner.lock();

        if let Some(server_now) = response_time {
            let offset = server_now - self.clock.now();
            inner.clock_offset = if offset.abs() >= TimeDelta::seconds(1) {
                offset
            } else {
                TimeDelta::zero()
            };
            if inner.state.consumed_requests == 0 {
                inner.state.window_start = server_now;
            }
        }

        inner.state.consumed_requests = inner.state.consumed_requests.saturating_add(1);
        if let Some(tokens) = total_tokens {
            inner.state.consumed_tokens = inner.state.consumed_tokens.saturating_add(tokens);
        }
    }

    /// Replace the supplied limits; `None` or 0 keeps the current one.
    pub fn set_limits(&self, limit_requests: Option<u32>, limit_tokens: Option<u64>) {
        let (limit_requests, limit_tokens) = configured(limit_requests, limit_tokens);
        let mut inner = self.inner.lock();
        if limit_requests.is_some() {
            inner.state.limit_requests = limit_requests;
        }
        if limit_tokens.is_some() {
            inner.state.limit_tokens = limit_tokens;
        }
    }

    /// Copy of the current counters.
    pub fn snapshot(&self) -> RateLimiterState {
        self.inner.lock().state.clone()
    }

    /// Length of the rolling window.
    pub fn window(&self) -> Duration {
        self.window.to_std().unwrap_or(Duration::MAX)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("window", &self.window)
            .field("state", &self.snapshot())
            .finish_non_exhaustive()
    }
}

/// A zero limit means the limit is not configured.
fn configured(
    limit_requests: Option<u32>,
    limit_tokens: Option<u64>,
) -> (Option<u32>, Option<u64>) {
    (
        limit_requests.filter(|l| *l != 0),
        limit_tokens.filter(|l| *l != 0),
    )
}

/// Parse an HTTP `Date` header value.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
