use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::errors::EngineError;
use crate::metrics::HINTS_REVEALED_TOTAL;
use crate::models::content::Question;
use crate::models::hint::{HintReveal, HintUsage};
use crate::storage::HintUsageStore;
use crate::utils::lock;

#[derive(Debug, Default)]
struct LedgerState {
    used: HashMap<String, u32>,
    last_request: Option<DateTime<Utc>>,
}

/// Reveals hints strictly in order and records how many each question used.
pub struct HintLedger {
    attempt_id: String,
    store: Arc<dyn HintUsageStore>,
    penalty_points: u32,
    debounce: TimeDelta,
    state: Mutex<LedgerState>,
}

impl HintLedger {
    pub fn new(
        attempt_id: &str,
        store: Arc<dyn HintUsageStore>,
        penalty_points: u32,
        debounce_ms: u64,
    ) -> Self {
        Self {
            attempt_id: attempt_id.to_string(),
            store,
            penalty_points,
            debounce: TimeDelta::milliseconds(i64::try_from(debounce_ms).unwrap_or(i64::MAX)),
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn seed(&self, usage: HashMap<String, u32>) {
        lock(&self.state).used.extend(usage);
    }

    pub fn used(&self, question_id: &str) -> u32 {
        lock(&self.state).used.get(question_id).copied().unwrap_or(0)
    }

    pub fn total_used(&self) -> u32 {
        lock(&self.state).used.values().sum()
    }

    /// Reveals the next hint of `question`.
    ///
    /// `Ok(None)` when nothing can be revealed: the question has no hints
    /// left, or the request came within the debounce window of the previous one.
    /// The caller checks answered/expired state before asking.
    pub async fn request(
        &self,
        question: &Question,
        now: DateTime<Utc>,
    ) -> Result<Option<HintReveal>, EngineError> {
        let cap = u32::try_from(question.hints.len()).unwrap_or(u32::MAX);

        {
            let mut state = lock(&self.state);
            if let Some(last) = state.last_request {
                if now - last < self.debounce {
                    tracing::debug!(
                        "Hint request for {} debounced in attempt {}",
                        question.id,
                        self.attempt_id
                    );
                    return Ok(None);
                }
            }
            state.last_request = Some(now);

            if state.used.get(&question.id).copied().unwrap_or(0) >= cap {
                return Ok(None);
            }
        }

        // Not retried: a lost reply to a successful increment would reveal two hints
        let Some(used) = self
            .store
            .increment_if_below(&self.attempt_id, &question.id, cap)
            .await?
        else {
            lock(&self.state).used.insert(question.id.clone(), cap);
            return Ok(None);
        };

        {
            let mut state = lock(&self.state);
            let entry = state.used.entry(question.id.clone()).or_insert(0);
            *entry = (*entry).max(used);
        }

        let revealed = (used as usize)
            .checked_sub(1)
            .and_then(|index| question.hints.get(index));
        let Some(hint_text) = revealed.cloned() else {
            return Ok(None);
        };

        HINTS_REVEALED_TOTAL.inc();
        tracing::info!(
            "Hint {}/{} revealed: attempt={}, question={}",
            used,
            cap,
            self.attempt_id,
            question.id
        );

        Ok(Some(HintReveal {
            question_id: question.id.clone(),
            hint_text,
            hints_used: used,
            hints_remaining: cap.saturating_sub(used),
            penalty_points: self.penalty_points,
        }))
    }

    /// Usage per question, with the texts revealed so far.
    pub fn usage<'a>(&self, questions: impl IntoIterator<Item = &'a Question>) -> Vec<HintUsage> {
        let state = lock(&self.state);
        questions
            .into_iter()
            .filter_map(|q| {
                let used = state.used.get(&q.id).copied().filter(|n| *n > 0)?;
                Some(HintUsage {
                    question_id: q.id.clone(),
                    used,
                    revealed: q.hints.iter().take(used as usize).cloned().collect(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryHintStore;
    use chrono::TimeZone;

    fn question(hints: &[&str]) -> Question {
        Question {
            id: "q1".into(),
            prompt: String::new(),
            options: vec!["a".into(), "b".into()],
            correct_option: 0,
            hints: hints.iter().map(|h| h.to_string()).collect(),
            time_limit_seconds: None,
            roles: vec![],
            is_critical: false,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap()
    }

    fn ledger() -> HintLedger {
        HintLedger::new("a1", Arc::new(MemoryHintStore::new()), 5, 600)
    }

    #[tokio::test]
    async fn hints_are_revealed_in_order_up_to_the_cap() {
        let ledger = ledger();
        let q = question(&["primera", "segunda"]);

        let first = ledger.request(&q, t0()).await.unwrap().unwrap();
        let second = ledger
            .request(&q, t0() + TimeDelta::seconds(1))
            .await
            .unwrap()
            .unwrap();
        let third = ledger.request(&q, t0() + TimeDelta::seconds(2)).await.unwrap();

        assert_eq!(first.hint_text, "primera");
        assert_eq!(second.hint_text, "segunda");
        assert_eq!(second.hints_remaining, 0);
        assert!(third.is_none());
        assert_eq!(ledger.total_used(), 2);
        assert_eq!(ledger.usage([&q])[0].revealed, vec!["primera", "segunda"]);
    }

    #[tokio::test]
    async fn rapid_repeat_is_debounced() {
        let ledger = ledger();
        let q = question(&["primera", "segunda"]);

        assert!(ledger.request(&q, t0()).await.unwrap().is_some());
        assert!(ledger
            .request(&q, t0() + TimeDelta::milliseconds(200))
            .await
            .unwrap()
            .is_none());
        assert_eq!(ledger.used("q1"), 1);
    }

    #[tokio::test]
    async fn question_without_hints_reveals_nothing() {
        let ledger = ledger();
        assert!(ledger.request(&question(&[]), t0()).await.unwrap().is_none());
        assert_eq!(ledger.total_used(), 0);
    }
}
