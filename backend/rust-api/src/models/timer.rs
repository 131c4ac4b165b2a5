use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AttemptStatus;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TimerEvent {
    TimerTick(TimerTick),
    TimeExpired(TimeExpired),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimerTick {
    pub attempt_id: String,
    pub remaining_seconds: Option<u32>,
    pub question_timers: Vec<QuestionTimerState>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimeExpired {
    pub attempt_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: Option<AttemptStatus>,
    pub message: String,
}

impl TimerEvent {
    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            TimerEvent::TimerTick(_) => "timer-tick",
            TimerEvent::TimeExpired(_) => "time-expired",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct QuestionTimerState {
    pub question_id: String,
    pub limit_seconds: u32,
    pub remaining_seconds: u32,
    pub expired: bool,
}

/// Result of one 1 Hz tick of an attempt.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct TickReport {
    /// `None` when the attempt has no limit or is not armed yet
    pub remaining_seconds: Option<u32>,
    pub expired: bool,
    /// Set only on the tick where the attempt deadline was first observed
    pub time_up: bool,
    /// Questions whose own timer ran out on this tick
    pub expired_questions: Vec<String>,
    pub question_timers: Vec<QuestionTimerState>,
}

impl TickReport {
    pub fn needs_settlement(&self) -> bool {
        self.time_up || !self.expired_questions.is_empty()
    }
}
