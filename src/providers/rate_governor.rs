//! Per-endpoint-class request cadence
//!
//! Every (marketplace, endpoint class) pair gets its own GCRA limiter with a
//! burst of one, so two admissions in the same class are never closer than
//! the configured minimum interval, no matter how many callers are waiting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use governor::{
    clock::Clock, middleware::NoOpMiddleware, state::InMemoryState, state::NotKeyed, Quota,
    RateLimiter,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RateLimitSettings;
use crate::domain::MarketplaceId;

/// Endpoint classes with independent cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointClass {
    General,
    Content,
    Statistics,
    Analytics,
    Prices,
    ReportSubmit,
    ReportPoll,
    ReportDownload,
}

impl std::fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EndpointClass::General => "general",
            EndpointClass::Content => "content",
            EndpointClass::Statistics => "statistics",
            EndpointClass::Analytics => "analytics",
            EndpointClass::Prices => "prices",
            EndpointClass::ReportSubmit => "report_submit",
            EndpointClass::ReportPoll => "report_poll",
            EndpointClass::ReportDownload => "report_download",
        };
        write!(f, "{}", name)
    }
}

/// Limiter key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateKey {
    pub marketplace: MarketplaceId,
    pub class: EndpointClass,
}

impl RateKey {
    pub fn new(marketplace: MarketplaceId, class: EndpointClass) -> Self {
        RateKey { marketplace, class }
    }
}

/// Outcome of a non-blocking admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted,
    Wait(Duration),
}

/// Governor clock backed by tokio's timer clock.
///
/// With a paused tokio runtime this clock only advances when the runtime
/// auto-advances or `tokio::time::advance` is called.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now().into_std()
    }
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, TokioClock, NoOpMiddleware<Instant>>;

/// A class budget: its interval and the limiter holding the next eligible time
struct RateBudget {
    interval: Duration,
    /// `None` when the interval is zero (unlimited)
    limiter: Option<DirectLimiter>,
}

/// Rate governor shared by every caller of one transport
pub struct RateGovernor {
    limits: RateLimitSettings,
    budgets: DashMap<RateKey, Arc<RateBudget>>,
    clock: TokioClock,
}

impl RateGovernor {
    pub fn new(limits: RateLimitSettings) -> Self {
        RateGovernor {
            limits,
            budgets: DashMap::new(),
            clock: TokioClock,
        }
    }

    /// Configured minimum interval for a key
    pub fn interval(&self, key: RateKey) -> Duration {
        self.limits.interval(key.marketplace, key.class)
    }

    fn budget(&self, key: RateKey) -> Arc<RateBudget> {
        if let Some(budget) = self.budgets.get(&key) {
            return budget.clone();
        }

        self.budgets
            .entry(key)
            .or_insert_with(|| {
                let interval = self.interval(key);
                let limiter = Quota::with_period(interval)
                    .map(|quota| RateLimiter::direct_with_clock(quota, &self.clock));
                Arc::new(RateBudget { interval, limiter })
            })
            .clone()
    }

    /// Try to take the slot for `key` without waiting.
    ///
    /// `Granted` consumes the slot; `Wait` reports how long until the next
    /// one opens and leaves the budget untouched.
    pub fn try_admit(&self, key: RateKey) -> Admission {
        let budget = self.budget(key);
        let Some(limiter) = budget.limiter.as_ref() else {
            return Admission::Granted;
        };

        match limiter.check() {
            Ok(()) => Admission::Granted,
            Err(not_until) => Admission::Wait(not_until.wait_time_from(self.clock.now())),
        }
    }

    /// Wait until `key` admits one request. Returns the total time waited.
    ///
    /// Dropping the returned future releases nothing because a waiter holds
    /// no slot until it is granted.
    pub async fn admit(&self, key: RateKey) -> Duration {
        let started = tokio::time::Instant::now();

        loop {
            match self.try_admit(key) {
                Admission::Granted => return started.elapsed(),
                Admission::Wait(wait) => {
                    debug!(
                        marketplace = %key.marketplace,
                        class = %key.class,
                        wait_ms = wait.as_millis() as u64,
                        "Waiting for rate budget"
                    );
                    // Never spin on a zero wait
                    tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
                }
            }
        }
    }

    /// Number of classes that have been touched so far
    pub fn tracked_classes(&self) -> usize {
        self.budgets.len()
    }

    /// Minimum interval of an already-created budget
    pub fn budget_interval(&self, key: RateKey) -> Option<Duration> {
        self.budgets.get(&key).map(|b| b.interval)
    }
}
