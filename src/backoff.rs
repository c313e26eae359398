//! Flood-control-aware retry layer.
//!
//! Every remote call goes through [`Backoff::execute`]; nothing else
//! in the crate sleeps or retries on its own. Pacing state is scoped
//! to the owning account (one controller per account), never global.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::RngExt;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::consts::{BACKOFF_MULTIPLIER, MAX_INTERVAL, MAX_RETRIES, MAX_WAIT};
use crate::error::{PlatformError, PlatformResult};
use crate::stats::AccountStats;

/// Minimum spacing between calls of the same class.
const MIN_CALL_INTERVAL: Duration = Duration::from_millis(500);

/// Groups calls that share a pacing timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallClass {
    /// Entity resolution and metadata lookups.
    Resolve,
    /// Join, leave, membership checks.
    Membership,
    /// Message fetches.
    Fetch,
    /// Outbound comments.
    Send,
    /// Outbound reactions.
    React,
}

#[derive(Debug)]
struct PacerState {
    last: Option<Instant>,
    interval: Duration,
}

pub struct Backoff {
    cancel: CancelToken,
    stats: Arc<AccountStats>,
    min_interval: Duration,
    pacers: Mutex<HashMap<CallClass, PacerState>>,
}

impl Backoff {
    pub fn new(cancel: CancelToken, stats: Arc<AccountStats>) -> Self {
        Self::with_min_interval(cancel, stats, MIN_CALL_INTERVAL)
    }

    pub fn with_min_interval(
        cancel: CancelToken,
        stats: Arc<AccountStats>,
        min_interval: Duration,
    ) -> Self {
        Self {
            cancel,
            stats,
            min_interval,
            pacers: Mutex::new(HashMap::new()),
        }
    }

    /// Run `op`, retrying rate-limit and transient failures, spacing
    /// attempts by the class's pacing interval. Permanent failures
    /// return immediately; cancellation aborts any wait.
    pub async fn execute<T, F, Fut>(&self, class: CallClass, op: F) -> PlatformResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = PlatformResult<T>>,
    {
        for attempt in 1..=MAX_RETRIES {
            if self.cancel.is_cancelled() {
                return Err(PlatformError::Cancelled);
            }
            self.pace(class).await?;

            match op().await {
                Ok(value) => return Ok(value),
                Err(PlatformError::RateLimited { wait }) => {
                    let clamped = wait.min(MAX_WAIT);
                    if clamped < wait {
                        warn!(
                            class = ?class,
                            requested = wait.as_secs(),
                            clamped = clamped.as_secs(),
                            "rate-limit wait clamped"
                        );
                    }
                    if attempt == MAX_RETRIES {
                        self.stats.record_error();
                        return Err(PlatformError::RateLimited { wait: clamped });
                    }
                    warn!(
                        class = ?class,
                        attempt,
                        wait = clamped.as_secs(),
                        "rate limited, waiting"
                    );
                    self.stats.record_flood_wait(clamped.as_secs());
                    if !self.cancel.sleep(clamped).await {
                        return Err(PlatformError::Cancelled);
                    }
                    self.grow_interval(class);
                }
                Err(PlatformError::Transient(msg)) => {
                    if attempt == MAX_RETRIES {
                        self.stats.record_error();
                        return Err(PlatformError::Transient(msg));
                    }
                    let jitter = Duration::from_millis(rand::rng().random_range(1000..=3000));
                    debug!(class = ?class, attempt, error = %msg, "transient failure, retrying");
                    if !self.cancel.sleep(jitter).await {
                        return Err(PlatformError::Cancelled);
                    }
                }
                Err(err @ PlatformError::Permanent(_)) => return Err(err),
                Err(PlatformError::Cancelled) => return Err(PlatformError::Cancelled),
            }
        }
        unreachable!("retry loop always returns")
    }

    /// Wait out whatever remains of the class's pacing interval.
    async fn pace(&self, class: CallClass) -> PlatformResult<()> {
        let wait = {
            let mut pacers = self.pacers.lock().unwrap();
            let pacer = pacers.entry(class).or_insert(PacerState {
                last: None,
                interval: self.min_interval,
            });
            match pacer.last {
                Some(at) => pacer.interval.saturating_sub(at.elapsed()),
                None => Duration::ZERO,
            }
        };
        if !wait.is_zero() && !self.cancel.sleep(wait).await {
            return Err(PlatformError::Cancelled);
        }
        if let Some(pacer) = self.pacers.lock().unwrap().get_mut(&class) {
            pacer.last = Some(Instant::now());
        }
        Ok(())
    }

    fn grow_interval(&self, class: CallClass) {
        let mut pacers = self.pacers.lock().unwrap();
        if let Some(pacer) = pacers.get_mut(&class) {
            pacer.interval = pacer.interval.mul_f64(BACKOFF_MULTIPLIER).min(MAX_INTERVAL);
        }
    }

    /// Current pacing interval for a class (observability, tests).
    pub fn interval(&self, class: CallClass) -> Duration {
        self.pacers
            .lock()
            .unwrap()
            .get(&class)
            .map(|p| p.interval)
            .unwrap_or(self.min_interval)
    }
}
