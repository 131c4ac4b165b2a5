use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::answer_service::AnswerRecorder;
use super::countdown::{remaining_seconds, AttemptCountdown};
use super::finalizer::{FinalizeTrigger, Finalizer};
use super::hint_service::HintLedger;
use super::question_timers::QuestionTimerSet;
use super::Engine;
use crate::errors::EngineError;
use crate::metrics::ATTEMPTS_ACTIVE;
use crate::models::answer::{RetryPendingResponse, SubmitOutcome};
use crate::models::content::{Question, QuestionView, Step, StepView};
use crate::models::hint::HintReveal;
use crate::models::timer::TickReport;
use crate::models::{ArmOutcome, Attempt, AttemptStatus, AttemptView, FinishOutcome};
use crate::utils::lock;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

fn ensure_active(attempt: &Attempt) -> Result<(), EngineError> {
    if attempt.status.is_terminal() {
        return Err(EngineError::AttemptNotActive {
            status: attempt.status,
        });
    }
    Ok(())
}

/// Live state of one attempt inside this process.
///
/// `tick` only touches local state and never waits on the stores. Every
/// persistence call happens outside the short-lived locks, so a slow write
/// cannot hold up the countdown.
pub struct AttemptSession {
    engine: Engine,
    finalizer: Arc<Finalizer>,
    attempt_id: String,
    attempt: Mutex<Attempt>,
    steps: Vec<Step>,
    questions: HashMap<String, Question>,
    countdown: Mutex<AttemptCountdown>,
    timers: Mutex<QuestionTimerSet>,
    answers: AnswerRecorder,
    hints: HintLedger,
    /// Serialises finalizers of this process and remembers their result
    finish_gate: tokio::sync::Mutex<Option<FinishOutcome>>,
    expiry_pending: AtomicBool,
    counted_active: AtomicBool,
}

impl AttemptSession {
    pub async fn load(
        engine: Engine,
        finalizer: Arc<Finalizer>,
        attempt: Attempt,
    ) -> Result<Self, EngineError> {
        let steps = engine
            .content
            .get_steps(&attempt.scenario_id, &attempt.role)
            .await?;
        let questions = steps
            .iter()
            .flat_map(|s| s.questions.iter())
            .map(|q| (q.id.clone(), q.clone()))
            .collect();

        let answers = AnswerRecorder::new(&attempt.id, engine.answers.clone(), RetryConfig::default());
        answers.seed(engine.answers.list_answers(&attempt.id).await?);

        let hints = HintLedger::new(
            &attempt.id,
            engine.hints.clone(),
            engine.settings.hint_penalty_points,
            engine.settings.hint_debounce_ms,
        );
        hints.seed(engine.hints.usage(&attempt.id).await?);

        let mut countdown = AttemptCountdown::new(attempt.expires_at);
        let active = !attempt.status.is_terminal();
        if active {
            ATTEMPTS_ACTIVE.inc();
        } else {
            countdown.suppress();
        }

        Ok(Self {
            attempt_id: attempt.id.clone(),
            attempt: Mutex::new(attempt),
            engine,
            finalizer,
            steps,
            questions,
            countdown: Mutex::new(countdown),
            timers: Mutex::new(QuestionTimerSet::empty()),
            answers,
            hints,
            finish_gate: tokio::sync::Mutex::new(None),
            expiry_pending: AtomicBool::new(false),
            counted_active: AtomicBool::new(active),
        })
    }

    pub fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    pub fn attempt(&self) -> Attempt {
        lock(&self.attempt).clone()
    }

    pub fn status(&self) -> AttemptStatus {
        lock(&self.attempt).status
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.engine.settings.tick_interval_ms)
    }

    /// Adopts a freshly read row, e.g. after a reconciliation on load.
    pub fn refresh(&self, row: Attempt) {
        if row.status.is_terminal() {
            self.mark_terminal(row);
            return;
        }
        lock(&self.countdown).arm(row.expires_at);
        *lock(&self.attempt) = row;
    }

    /// Stamps start time and deadline on first call; later calls report the
    /// existing pair.
    pub async fn arm(&self) -> Result<ArmOutcome, EngineError> {
        let current = self.attempt();
        ensure_active(&current)?;
        if let Some(started_at) = current.started_at {
            return Ok(ArmOutcome {
                started_at,
                expires_at: current.expires_at,
                armed_now: false,
            });
        }

        let now = self.engine.clock.authoritative_now().await;
        let expires_at = current
            .time_limit_seconds
            .filter(|secs| *secs > 0)
            .map(|secs| now + TimeDelta::seconds(i64::from(secs)));

        let armed_now = retry_async_with_config(RetryConfig::default(), || async {
            self.engine
                .attempts
                .arm_if_unset(&self.attempt_id, now, expires_at)
                .await
        })
        .await?;

        let row = if armed_now {
            Attempt {
                started_at: Some(now),
                expires_at,
                ..current
            }
        } else {
            self.engine
                .attempts
                .get_attempt(&self.attempt_id)
                .await?
                .ok_or_else(|| EngineError::AttemptNotFound(self.attempt_id.clone()))?
        };

        if row.status.is_terminal() {
            let status = row.status;
            self.mark_terminal(row);
            return Err(EngineError::AttemptNotActive { status });
        }

        let started_at = row.started_at.unwrap_or(now);
        let expires_at = row.expires_at;
        self.refresh(row);

        if armed_now {
            tracing::info!(
                "Attempt {} armed: started_at={}, expires_at={:?}",
                self.attempt_id,
                started_at,
                expires_at
            );
        } else {
            tracing::debug!("Attempt {} was already armed elsewhere", self.attempt_id);
        }

        Ok(ArmOutcome {
            started_at,
            expires_at,
            armed_now,
        })
    }

    /// Advances the attempt countdown and the question timers of the current step.
    pub fn tick(&self) -> TickReport {
        let now = self.engine.clock.corrected_now();
        let terminal = self.status().is_terminal();

        let countdown = lock(&self.countdown).tick(now);
        let (expired_questions, question_timers) = {
            let mut timers = lock(&self.timers);
            let newly_expired = if terminal { Vec::new() } else { timers.tick(now) };
            (newly_expired, timers.snapshot())
        };

        if countdown.time_up {
            tracing::info!("Attempt {} reached its deadline", self.attempt_id);
        }

        TickReport {
            remaining_seconds: countdown.remaining_seconds,
            expired: countdown.expired,
            time_up: countdown.time_up,
            expired_questions,
            question_timers,
        }
    }

    /// Carries out what a tick observed: locks timed-out questions and
    /// finalizes on the attempt deadline.
    pub async fn settle(&self, report: &TickReport) -> Result<Option<FinishOutcome>, EngineError> {
        // A failed lock stays queued as pending and is flushed by the finalizer
        let locked = if report.expired_questions.is_empty() {
            Ok(Vec::new())
        } else {
            let now = self.engine.clock.corrected_now();
            self.answers
                .lock_unanswered(&report.expired_questions, now)
                .await
        };

        if report.time_up || self.expiry_pending.load(Ordering::SeqCst) {
            self.expiry_pending.store(true, Ordering::SeqCst);
            let outcome = self.finish_on_expiry().await?;
            self.expiry_pending.store(false, Ordering::SeqCst);
            return Ok(Some(outcome));
        }

        locked?;
        Ok(None)
    }

    /// One tick followed by its consequences. Failures are logged and retried
    /// on a later tick; they never reach the countdown consumer.
    pub async fn tick_and_settle(&self) -> TickReport {
        let report = self.tick();
        let needs_retry = self.expiry_pending.load(Ordering::SeqCst) && !self.status().is_terminal();
        if report.needs_settlement() || needs_retry {
            if let Err(e) = self.settle(&report).await {
                tracing::warn!(
                    "Could not settle tick for attempt {}, will retry: {}",
                    self.attempt_id,
                    e
                );
            }
        }
        report
    }

    /// Displays step `index`, replacing the question timers of any previous display.
    pub fn show_step(&self, index: usize) -> Result<StepView, EngineError> {
        ensure_active(&self.attempt())?;
        let step = self
            .steps
            .get(index)
            .ok_or(EngineError::StepNotFound(index))?;

        let now = self.engine.clock.corrected_now();
        let timers = QuestionTimerSet::for_step(step, now);
        let question_timers = timers.snapshot();
        *lock(&self.timers) = timers;

        let questions = step
            .questions
            .iter()
            .map(|q| QuestionView {
                id: q.id.clone(),
                prompt: q.prompt.clone(),
                options: q.options.clone(),
                hints_available: q.hints.len(),
                time_limit_seconds: q.time_limit_seconds,
                is_critical: q.is_critical,
                answered: self.answers.is_answered(&q.id),
            })
            .collect();

        Ok(StepView {
            index,
            step_id: step.id.clone(),
            description: step.description.clone(),
            time_critical: step.is_time_critical(),
            questions,
            question_timers,
        })
    }

    fn question(&self, question_id: &str) -> Result<&Question, EngineError> {
        self.questions
            .get(question_id)
            .ok_or_else(|| EngineError::QuestionNotFound(question_id.to_string()))
    }

    /// Rejects the request once the attempt or the question ran out of time.
    /// Question timers are caught up here, so a limit that passed without a
    /// tick still locks the question before the request is refused.
    async fn ensure_time_left(
        &self,
        attempt: &Attempt,
        question_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if lock(&self.countdown).has_fired() || attempt.is_expired_at(now) {
            return Err(EngineError::TimeExpired);
        }

        let (newly_expired, expired) = {
            let mut timers = lock(&self.timers);
            let newly_expired = timers.tick(now);
            (newly_expired, timers.is_expired(question_id))
        };
        if !newly_expired.is_empty() {
            if let Err(e) = self.answers.lock_unanswered(&newly_expired, now).await {
                tracing::warn!(
                    "Timed-out questions of attempt {} kept pending: {}",
                    self.attempt_id,
                    e
                );
            }
        }

        if expired {
            return Err(EngineError::QuestionExpired(question_id.to_string()));
        }
        Ok(())
    }

    /// Before the deadline only a complete attempt may close as `finalized`.
    fn ensure_finishable(
        &self,
        attempt: &Attempt,
        requested: Option<AttemptStatus>,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if requested == Some(AttemptStatus::Abandoned)
            || attempt.is_expired_at(now)
            || lock(&self.countdown).has_fired()
        {
            return Ok(());
        }
        let answered = self.answers.answered_count();
        let total = self.questions.len();
        if answered < total {
            return Err(EngineError::AttemptIncomplete { answered, total });
        }
        Ok(())
    }

    pub async fn submit_answer(
        &self,
        question_id: &str,
        option_index: u32,
    ) -> Result<SubmitOutcome, EngineError> {
        let attempt = self.attempt();
        ensure_active(&attempt)?;
        if !attempt.is_armed() {
            return Err(EngineError::AttemptNotArmed);
        }
        let question = self.question(question_id)?;

        if let Some(existing) = self.answers.get(question_id) {
            return Ok(SubmitOutcome {
                accepted: true,
                is_correct: existing.is_correct,
                already_answered: true,
            });
        }

        let now = self.engine.clock.corrected_now();
        self.ensure_time_left(&attempt, question_id, now).await?;

        self.answers.submit(question, option_index, now).await
    }

    pub async fn request_hint(&self, question_id: &str) -> Result<Option<HintReveal>, EngineError> {
        let attempt = self.attempt();
        ensure_active(&attempt)?;
        if !attempt.is_armed() {
            return Err(EngineError::AttemptNotArmed);
        }
        let question = self.question(question_id)?;

        if self.answers.is_answered(question_id) {
            return Ok(None);
        }

        let now = self.engine.clock.corrected_now();
        self.ensure_time_left(&attempt, question_id, now).await?;

        self.hints.request(question, now).await
    }

    pub async fn retry_pending(&self) -> RetryPendingResponse {
        self.answers.retry_pending().await
    }

    pub async fn finish(&self, status: Option<AttemptStatus>) -> Result<FinishOutcome, EngineError> {
        self.close(FinalizeTrigger::Manual(status)).await
    }

    pub async fn finish_on_expiry(&self) -> Result<FinishOutcome, EngineError> {
        self.close(FinalizeTrigger::Expiry).await
    }

    async fn close(&self, trigger: FinalizeTrigger) -> Result<FinishOutcome, EngineError> {
        let mut gate = self.finish_gate.lock().await;
        if let Some(done) = gate.as_ref() {
            return Ok(FinishOutcome {
                superseded: true,
                ..done.clone()
            });
        }

        let attempt = self.attempt();
        if attempt.status.is_terminal() {
            let outcome = FinishOutcome::from_terminal(&attempt);
            *gate = Some(outcome.clone());
            return Ok(outcome);
        }

        let now = self.engine.clock.authoritative_now().await;
        if let FinalizeTrigger::Manual(requested) = trigger {
            if !attempt.is_armed() {
                return Err(EngineError::AttemptNotArmed);
            }
            self.ensure_finishable(&attempt, requested, now)?;
        }

        self.answers.flush_pending().await?;

        let outcome = self.finalizer.finalize(&attempt, trigger, now).await?;

        let row = match self.engine.attempts.get_attempt(&self.attempt_id).await {
            Ok(Some(row)) if row.status.is_terminal() => row,
            _ => Attempt {
                status: outcome.status,
                finished_at: Some(now),
                correct_count: Some(outcome.correct_count),
                total_count: Some(outcome.total_count),
                score: Some(outcome.score),
                ..attempt
            },
        };
        self.mark_terminal(row);

        *gate = Some(outcome.clone());
        Ok(outcome)
    }

    fn mark_terminal(&self, row: Attempt) {
        lock(&self.countdown).suppress();
        *lock(&self.timers) = QuestionTimerSet::empty();
        *lock(&self.attempt) = row;
        if self.counted_active.swap(false, Ordering::SeqCst) {
            ATTEMPTS_ACTIVE.dec();
        }
    }

    pub fn view(&self, was_already_expired: bool) -> AttemptView {
        let attempt = self.attempt();
        let remaining = attempt.expires_at.map(|expires_at| {
            if attempt.status.is_terminal() {
                0
            } else {
                remaining_seconds(expires_at, self.engine.clock.corrected_now())
            }
        });
        let ordered = self.steps.iter().flat_map(|s| s.questions.iter());

        AttemptView {
            was_already_expired,
            total_questions: self.questions.len(),
            answers: self.answers.snapshot(),
            hints: self.hints.usage(ordered),
            pending_answers: self.answers.pending_count(),
            remaining_seconds: remaining,
            attempt,
        }
    }
}

impl std::fmt::Debug for AttemptSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttemptSession")
            .field("attempt_id", &self.attempt_id)
            .finish_non_exhaustive()
    }
}

impl Drop for AttemptSession {
    fn drop(&mut self) {
        if self.counted_active.swap(false, Ordering::SeqCst) {
            ATTEMPTS_ACTIVE.dec();
        }
    }
}
