use chrono::{DateTime, Utc};

/// Whole seconds left until `expires_at`, never negative.
pub fn remaining_seconds(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    let millis = (expires_at - now).num_milliseconds();
    if millis <= 0 {
        return 0;
    }
    u32::try_from(millis / 1000).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountdownTick {
    /// `None` means the attempt has no limit (or is not armed yet)
    pub remaining_seconds: Option<u32>,
    pub expired: bool,
    /// True on exactly one tick per attempt
    pub time_up: bool,
}

/// Attempt-level countdown.
///
/// The reported remaining time only ever decreases, even if the corrected
/// clock jumps backwards after a drift refresh, and the time-up signal is
/// raised once.
#[derive(Debug, Clone, Default)]
pub struct AttemptCountdown {
    expires_at: Option<DateTime<Utc>>,
    last_remaining: Option<u32>,
    fired: bool,
}

impl AttemptCountdown {
    pub fn new(expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            expires_at,
            last_remaining: None,
            fired: false,
        }
    }

    /// Sets the deadline if none is known yet. A deadline is never replaced.
    pub fn arm(&mut self, expires_at: Option<DateTime<Utc>>) {
        if self.expires_at.is_none() {
            self.expires_at = expires_at;
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// Marks the signal as consumed without a tick, e.g. when the attempt
    /// was closed by another trigger.
    pub fn suppress(&mut self) {
        self.fired = true;
        self.last_remaining = self.expires_at.map(|_| 0);
    }

    pub fn tick(&mut self, now: DateTime<Utc>) -> CountdownTick {
        let Some(expires_at) = self.expires_at else {
            return CountdownTick::default();
        };

        let computed = remaining_seconds(expires_at, now);
        let remaining = match self.last_remaining {
            Some(previous) => computed.min(previous),
            None => computed,
        };
        self.last_remaining = Some(remaining);

        let expired = remaining == 0;
        let time_up = expired && !self.fired;
        if time_up {
            self.fired = true;
        }

        CountdownTick {
            remaining_seconds: Some(remaining),
            expired,
            time_up,
        }
    }
}
