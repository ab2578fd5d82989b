//! Clock abstraction so polling delays and timeouts can be tested without
//! real time passing

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Source of time and delays for the orchestrator
#[async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic time, used for timeouts and cadences
    fn now(&self) -> Instant;

    /// Wall-clock time, used for persisted timestamps
    fn utc_now(&self) -> DateTime<Utc>;

    /// Suspend for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Real system clock backed by tokio timers
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
