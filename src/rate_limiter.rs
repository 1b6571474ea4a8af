//! Per-provider sliding-window admission control.
//!
//! State is process-local. Each provider has its own window behind its own
//! mutex, so unrelated providers never contend; the outer map lock is held
//! only long enough to find or create a window.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::{Clock, seconds};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rate limit of {limit} requests per {period_secs}s exceeded for {provider}")]
pub struct RateLimitExceeded {
    pub provider: String,
    pub limit: u32,
    pub period_secs: u64,
    /// Time until the oldest entry leaves the window.
    pub retry_after: Duration,
}

type Window = VecDeque<DateTime<Utc>>;

pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, Arc<Mutex<Window>>>>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn allowed(&self, provider: &str, limit: u32, period_secs: u64) -> bool {
        self.with_window(provider, period_secs, |window, _| window.len() < limit as usize)
    }

    /// Admits and records one request, or rejects it without recording.
    pub fn record(
        &self,
        provider: &str,
        limit: u32,
        period_secs: u64,
    ) -> Result<(), RateLimitExceeded> {
        self.with_window(provider, period_secs, |window, now| {
            if window.len() >= limit as usize {
                let retry_after = window
                    .front()
                    .map(|oldest| {
                        let expires = *oldest + seconds(period_secs);
                        (expires - now).to_std().unwrap_or_default()
                    })
                    .unwrap_or_default();
                return Err(RateLimitExceeded {
                    provider: provider.to_string(),
                    limit,
                    period_secs,
                    retry_after,
                });
            }
            window.push_back(now);
            Ok(())
        })
    }

    pub fn remaining(&self, provider: &str, limit: u32, period_secs: u64) -> u32 {
        let count = self.current_count(provider, period_secs);
        limit.saturating_sub(count)
    }

    pub fn current_count(&self, provider: &str, period_secs: u64) -> u32 {
        self.with_window(provider, period_secs, |window, _| {
            u32::try_from(window.len()).unwrap_or(u32::MAX)
        })
    }

    pub fn reset(&self, provider: &str) {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows.remove(provider);
    }

    pub fn reset_all(&self) {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows.clear();
    }

    fn window_for(&self, provider: &str) -> Arc<Mutex<Window>> {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(windows.entry(provider.to_string()).or_default())
    }

    /// Runs `f` inside the provider's critical section after pruning.
    fn with_window<T>(
        &self,
        provider: &str,
        period_secs: u64,
        f: impl FnOnce(&mut Window, DateTime<Utc>) -> T,
    ) -> T {
        let window = self.window_for(provider);
        let mut window = window.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();
        prune(&mut window, now, period_secs);
        f(&mut window, now)
    }
}

fn prune(window: &mut Window, now: DateTime<Utc>, period_secs: u64) {
    let period = seconds(period_secs);
    while let Some(oldest) = window.front() {
        if now - *oldest > period {
            window.pop_front();
        } else {
            break;
        }
    }
}

