//! Resource guards
//!
//! Every call into an external resource (embedding provider, NLP tables,
//! catalog and index files) runs through a guard that enforces a hard
//! timeout, reports a structured outcome, and tracks cumulative failures.
//! Once a resource fails `failure_threshold` times inside the sliding
//! `failure_window`, its feature flag flips off for the rest of the process
//! (or until a manual reset).

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Structured result of a guarded call.
#[derive(Debug)]
pub enum Outcome<T> {
    Ok(T),
    TimedOut,
    Failed { kind: &'static str, message: String },
}

impl<T> Outcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Outcome::Ok(value) => Some(value),
            _ => None,
        }
    }
}

/// Failure-window bookkeeping plus the process-lifetime disable flag for a
/// single external resource. Shared via `Arc`; flag updates are
/// compare-and-swap, so readers never block behind a failing caller.
pub struct ResourceGuard {
    name: &'static str,
    timeout: Duration,
    failure_threshold: usize,
    failure_window: Duration,
    disabled: AtomicBool,
    failures: Mutex<VecDeque<Instant>>,
}

impl ResourceGuard {
    pub fn new(
        name: &'static str,
        timeout: Duration,
        failure_threshold: usize,
        failure_window: Duration,
    ) -> Self {
        Self {
            name,
            timeout,
            failure_threshold,
            failure_window,
            disabled: AtomicBool::new(false),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Create a guard that starts disabled (feature off by configuration).
    pub fn disabled(name: &'static str) -> Self {
        let guard = Self::new(name, Duration::ZERO, 0, Duration::ZERO);
        guard.disabled.store(true, Ordering::SeqCst);
        guard
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    /// Manually re-enable a tripped resource and clear its failure history.
    pub fn reset(&self) {
        self.disabled.store(false, Ordering::SeqCst);
        if let Ok(mut failures) = self.failures.lock() {
            failures.clear();
        }
    }

    /// Record one failure; returns true when this failure tripped the flag.
    pub fn record_failure(&self) -> bool {
        let now = Instant::now();
        let tripped = {
            let Ok(mut failures) = self.failures.lock() else { return false };
            failures.push_back(now);
            while let Some(&oldest) = failures.front() {
                if now.duration_since(oldest) > self.failure_window {
                    failures.pop_front();
                } else {
                    break;
                }
            }
            failures.len() >= self.failure_threshold && self.failure_threshold > 0
        };

        if tripped
            && self
                .disabled
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            warn!(resource = self.name, "resource disabled after cumulative failures");
            return true;
        }
        false
    }

    /// Run a fallible future under this guard's timeout. Failures and
    /// timeouts feed the failure window; the outcome is logged with the
    /// caller's request id.
    pub async fn call<T, E, F>(&self, request_id: &str, future: F) -> Outcome<T>
    where
        E: std::fmt::Display,
        F: Future<Output = std::result::Result<T, E>>,
    {
        if self.is_disabled() {
            debug!(resource = self.name, request_id, "guarded call skipped: disabled");
            return Outcome::Failed {
                kind: "disabled",
                message: format!("{} is disabled", self.name),
            };
        }

        match tokio::time::timeout(self.timeout, future).await {
            Ok(Ok(value)) => {
                debug!(resource = self.name, request_id, outcome = "ok", "guarded call");
                Outcome::Ok(value)
            }
            Ok(Err(e)) => {
                let message = e.to_string();
                warn!(
                    resource = self.name,
                    request_id,
                    outcome = "error",
                    error = %message,
                    "guarded call failed"
                );
                self.record_failure();
                Outcome::Failed { kind: "upstream", message }
            }
            Err(_) => {
                warn!(
                    resource = self.name,
                    request_id,
                    outcome = "timeout",
                    timeout_ms = self.timeout.as_millis() as u64,
                    "guarded call timed out"
                );
                self.record_failure();
                Outcome::TimedOut
            }
        }
    }
}

/// Retry schedule for embedding calls: exponential backoff from `base`,
/// capped at `cap`. Attempt 0 has no delay.
pub fn backoff_delay(attempt: usize, base: Duration, cap: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 1u32 << (attempt - 1).min(16);
    base.saturating_mul(factor).min(cap)
}

// ============================================================================
// TESTS
// ============================================================================
