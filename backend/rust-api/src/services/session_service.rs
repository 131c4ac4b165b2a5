use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::attempt_session::AttemptSession;
use super::finalizer::Finalizer;
use super::reconciliation::ReconciliationSweep;
use super::Engine;
use crate::errors::EngineError;
use crate::metrics::ATTEMPTS_TOTAL;
use crate::models::content::normalize_role;
use crate::models::{
    Attempt, AttemptStatus, AttemptSummary, CreateAttemptRequest, CreateAttemptResponse,
    FinishOutcome, NewAttempt,
};
use crate::storage::StoreError;

/// Entry point for attempts: creation, loading with reconciliation, and the
/// registry of sessions live in this process.
pub struct SessionService {
    engine: Engine,
    finalizer: Arc<Finalizer>,
    sweep: ReconciliationSweep,
    sessions: RwLock<HashMap<String, Arc<AttemptSession>>>,
}

impl SessionService {
    pub fn new(engine: Engine) -> Self {
        let finalizer = Arc::new(Finalizer::new(
            engine.attempts.clone(),
            engine.answers.clone(),
            engine.hints.clone(),
            engine.content.clone(),
            engine.settings.hint_penalty_points,
        ));
        let sweep = ReconciliationSweep::new(engine.clone(), finalizer.clone());

        Self {
            engine,
            finalizer,
            sweep,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the learner's open attempt on the scenario, or creates a new
    /// unarmed one.
    pub async fn start_or_resume(
        &self,
        req: CreateAttemptRequest,
    ) -> Result<CreateAttemptResponse, EngineError> {
        // An expired leftover must not block a fresh start
        if let Some(open) = self
            .sweep
            .sweep_open_attempt(&req.learner_id, &req.scenario_id)
            .await?
        {
            return Ok(Self::resumed(open));
        }

        let settings = &self.engine.settings;
        if !req.privileged {
            let previous = self
                .engine
                .attempts
                .list_attempts(&req.learner_id, &req.scenario_id)
                .await?;
            if previous.len() >= settings.max_attempts_per_scenario as usize {
                tracing::info!(
                    "Learner {} reached the attempt limit on scenario {}",
                    req.learner_id,
                    req.scenario_id
                );
                return Err(EngineError::AttemptLimitReached {
                    limit: settings.max_attempts_per_scenario,
                });
            }
        }

        let time_limit_seconds = self.time_budget(&req).await?;
        let role = normalize_role(req.role.as_deref().unwrap_or_default());

        let created = self
            .engine
            .attempts
            .create_attempt(NewAttempt {
                learner_id: req.learner_id.clone(),
                scenario_id: req.scenario_id.clone(),
                role: role.clone(),
                time_limit_seconds: Some(time_limit_seconds),
                created_at: self.engine.clock.corrected_now(),
            })
            .await;

        match created {
            Ok(attempt_id) => {
                ATTEMPTS_TOTAL.with_label_values(&["created"]).inc();
                tracing::info!(
                    "Attempt created: {} for learner {} on scenario {} (role '{}', {}s)",
                    attempt_id,
                    req.learner_id,
                    req.scenario_id,
                    role,
                    time_limit_seconds
                );
                Ok(CreateAttemptResponse {
                    attempt_id,
                    resumed: false,
                    time_limit_seconds: Some(time_limit_seconds),
                    expires_at: None,
                })
            }
            // A concurrent start won; hand back its attempt
            Err(StoreError::OpenAttemptExists) => {
                let open = self
                    .engine
                    .attempts
                    .find_open_attempt(&req.learner_id, &req.scenario_id)
                    .await?
                    .ok_or(EngineError::Persistence(StoreError::OpenAttemptExists))?;
                Ok(Self::resumed(open))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn resumed(open: Attempt) -> CreateAttemptResponse {
        ATTEMPTS_TOTAL.with_label_values(&["resumed"]).inc();
        tracing::info!(
            "Resuming attempt {} for learner {}",
            open.id,
            open.learner_id
        );
        CreateAttemptResponse {
            attempt_id: open.id,
            resumed: true,
            time_limit_seconds: open.time_limit_seconds,
            expires_at: open.expires_at,
        }
    }

    async fn time_budget(&self, req: &CreateAttemptRequest) -> Result<u32, EngineError> {
        let settings = &self.engine.settings;
        let requested = req.time_limit_minutes.filter(|_| req.privileged);

        let seconds = match requested {
            Some(minutes) => minutes.saturating_mul(60),
            None => match self.engine.content.estimated_minutes(&req.scenario_id).await? {
                Some(minutes) if minutes > 0 => minutes.saturating_mul(60),
                _ => settings.default_time_limit_seconds,
            },
        };

        Ok(seconds.max(settings.min_time_limit_seconds))
    }

    /// Loads an attempt, closing it first if its deadline passed unobserved.
    /// The flag tells whether this load did the closing.
    pub async fn open(&self, attempt_id: &str) -> Result<(Arc<AttemptSession>, bool), EngineError> {
        let reconciled = self.sweep.reconcile(attempt_id).await?;

        let existing = self.sessions.read().await.get(attempt_id).cloned();
        if let Some(session) = existing {
            session.refresh(reconciled.attempt);
            if session.status().is_terminal() {
                self.sessions.write().await.remove(attempt_id);
            }
            return Ok((session, reconciled.was_already_expired));
        }

        let was_already_expired = reconciled.was_already_expired;
        let session = Arc::new(
            AttemptSession::load(
                self.engine.clone(),
                self.finalizer.clone(),
                reconciled.attempt,
            )
            .await?,
        );

        if session.status().is_terminal() {
            return Ok((session, was_already_expired));
        }

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(attempt_id.to_string())
            .or_insert(session)
            .clone();
        Ok((session, was_already_expired))
    }

    /// Live session for mutating calls; loads (and reconciles) on first use.
    pub async fn session(&self, attempt_id: &str) -> Result<Arc<AttemptSession>, EngineError> {
        let existing = self.sessions.read().await.get(attempt_id).cloned();
        if let Some(session) = existing {
            return Ok(session);
        }
        let (session, _) = self.open(attempt_id).await?;
        Ok(session)
    }

    pub async fn finish(
        &self,
        attempt_id: &str,
        status: Option<AttemptStatus>,
    ) -> Result<FinishOutcome, EngineError> {
        let session = self.session(attempt_id).await?;
        let outcome = session.finish(status).await?;
        self.release_if_terminal(&session).await;
        Ok(outcome)
    }

    /// Drops a closed session from the registry. Holders of the `Arc` keep it.
    pub async fn release_if_terminal(&self, session: &AttemptSession) {
        if session.status().is_terminal() {
            self.sessions.write().await.remove(session.attempt_id());
        }
    }

    /// Closes sessions whose deadline passed with nobody watching and drops
    /// every terminal one. Sessions whose close fails stay for the next pass.
    pub async fn sweep_registry(&self) -> usize {
        let now = self.engine.clock.corrected_now();
        let stale: Vec<Arc<AttemptSession>> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.status().is_terminal() || s.attempt().is_expired_at(now))
            .cloned()
            .collect();

        for session in stale.iter().filter(|s| !s.status().is_terminal()) {
            session.tick_and_settle().await;
        }

        let mut sessions = self.sessions.write().await;
        let mut evicted = 0;
        for session in stale.iter().filter(|s| s.status().is_terminal()) {
            if sessions.remove(session.attempt_id()).is_some() {
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::debug!("Evicted {} closed sessions from the registry", evicted);
        }
        evicted
    }

    pub async fn live_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn history(
        &self,
        learner_id: &str,
        scenario_id: &str,
    ) -> Result<Vec<AttemptSummary>, EngineError> {
        let attempts = self
            .engine
            .attempts
            .list_attempts(learner_id, scenario_id)
            .await?;
        Ok(attempts.iter().map(AttemptSummary::from).collect())
    }
}
