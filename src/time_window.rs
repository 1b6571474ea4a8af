use std::sync::Arc;

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TimestampError {
    #[error("timestamp is {age_secs}s old, tolerance is {tolerance_secs}s")]
    TooOld { age_secs: i64, tolerance_secs: i64 },
    #[error("timestamp is {skew_secs}s in the future, tolerance is {tolerance_secs}s")]
    TooFarInFuture { skew_secs: i64, tolerance_secs: i64 },
}

/// Symmetric tolerance check around the current time, used for replay
/// protection of signed timestamps.
#[derive(Clone)]
pub struct TimeWindowValidator {
    clock: Arc<dyn Clock>,
}

impl TimeWindowValidator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// `|now - timestamp| <= tolerance`, inclusive at the boundary.
    pub fn is_valid(&self, timestamp: i64, tolerance_secs: u64) -> bool {
        self.validate(timestamp, tolerance_secs).is_ok()
    }

    pub fn validate(&self, timestamp: i64, tolerance_secs: u64) -> Result<(), TimestampError> {
        let now = self.clock.now().timestamp();
        let tolerance = i64::try_from(tolerance_secs).unwrap_or(i64::MAX);
        let delta = now.saturating_sub(timestamp);

        if delta > tolerance {
            return Err(TimestampError::TooOld {
                age_secs: delta,
                tolerance_secs: tolerance,
            });
        }
        if delta < 0 && delta.saturating_neg() > tolerance {
            return Err(TimestampError::TooFarInFuture {
                skew_secs: delta.saturating_neg(),
                tolerance_secs: tolerance,
            });
        }
        Ok(())
    }

    pub fn now_unix(&self) -> i64 {
        self.clock.now().timestamp()
    }
}
