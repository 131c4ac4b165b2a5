use chrono::{DateTime, Utc};

use crate::models::content::Step;
use crate::models::timer::QuestionTimerState;

#[derive(Debug, Clone)]
struct QuestionTimer {
    question_id: String,
    limit_seconds: u32,
    armed_at: DateTime<Utc>,
    remaining_seconds: u32,
    expired: bool,
}

impl QuestionTimer {
    fn remaining_at(&self, now: DateTime<Utc>) -> u32 {
        let elapsed_ms = (now - self.armed_at).num_milliseconds().max(0);
        let elapsed = u32::try_from(elapsed_ms / 1000).unwrap_or(u32::MAX);
        self.limit_seconds.saturating_sub(elapsed)
    }

    fn state(&self) -> QuestionTimerState {
        QuestionTimerState {
            question_id: self.question_id.clone(),
            limit_seconds: self.limit_seconds,
            remaining_seconds: self.remaining_seconds,
            expired: self.expired,
        }
    }
}

/// Per-question countdowns of the step currently on screen.
///
/// A set belongs to one display of one step. Showing a step again builds a
/// new set; nothing carries over from the previous one.
#[derive(Debug, Clone, Default)]
pub struct QuestionTimerSet {
    timers: Vec<QuestionTimer>,
}

impl QuestionTimerSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn for_step(step: &Step, now: DateTime<Utc>) -> Self {
        let timers = if step.is_time_critical() {
            step.questions
                .iter()
                .filter_map(|q| {
                    let limit = q.time_limit_seconds.filter(|limit| *limit > 0)?;
                    Some(QuestionTimer {
                        question_id: q.id.clone(),
                        limit_seconds: limit,
                        armed_at: now,
                        remaining_seconds: limit,
                        expired: false,
                    })
                })
                .collect()
        } else {
            Vec::new()
        };

        Self { timers }
    }

    /// Advances every timer and returns the questions that expired on this tick.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut newly_expired = Vec::new();
        for timer in self.timers.iter_mut().filter(|t| !t.expired) {
            timer.remaining_seconds = timer.remaining_at(now).min(timer.remaining_seconds);
            if timer.remaining_seconds == 0 {
                timer.expired = true;
                newly_expired.push(timer.question_id.clone());
            }
        }
        newly_expired
    }

    pub fn is_expired(&self, question_id: &str) -> bool {
        self.timers
            .iter()
            .any(|t| t.question_id == question_id && t.expired)
    }

    pub fn snapshot(&self) -> Vec<QuestionTimerState> {
        self.timers.iter().map(QuestionTimer::state).collect()
    }
}
