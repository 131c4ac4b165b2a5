use std::sync::Arc;

use super::finalizer::{FinalizeTrigger, Finalizer};
use super::Engine;
use crate::errors::EngineError;
use crate::metrics::RECONCILIATIONS_TOTAL;
use crate::models::{Attempt, FinishOutcome};

#[derive(Debug, Clone)]
pub struct Reconciled {
    /// Row as it stands after the sweep
    pub attempt: Attempt,
    /// The deadline had passed while nobody was watching, and this sweep closed it
    pub was_already_expired: bool,
    pub outcome: Option<FinishOutcome>,
}

/// Closes attempts whose deadline passed while the learner was away.
///
/// Runs when an attempt is loaded, never on a timer, and always against the
/// server clock. Safe to run from several processes at once.
pub struct ReconciliationSweep {
    engine: Engine,
    finalizer: Arc<Finalizer>,
}

impl ReconciliationSweep {
    pub fn new(engine: Engine, finalizer: Arc<Finalizer>) -> Self {
        Self { engine, finalizer }
    }

    pub async fn reconcile(&self, attempt_id: &str) -> Result<Reconciled, EngineError> {
        let attempt = self
            .engine
            .attempts
            .get_attempt(attempt_id)
            .await?
            .ok_or_else(|| EngineError::AttemptNotFound(attempt_id.to_string()))?;

        self.reconcile_attempt(attempt).await
    }

    pub async fn reconcile_attempt(&self, attempt: Attempt) -> Result<Reconciled, EngineError> {
        if attempt.status.is_terminal() {
            RECONCILIATIONS_TOTAL.with_label_values(&["terminal"]).inc();
            return Ok(Reconciled {
                attempt,
                was_already_expired: false,
                outcome: None,
            });
        }

        let now = self.engine.clock.authoritative_now().await;
        if !attempt.is_expired_at(now) {
            RECONCILIATIONS_TOTAL.with_label_values(&["active"]).inc();
            return Ok(Reconciled {
                attempt,
                was_already_expired: false,
                outcome: None,
            });
        }

        tracing::info!(
            "Attempt {} expired at {:?} while unobserved, closing it",
            attempt.id,
            attempt.expires_at
        );
        let outcome = self
            .finalizer
            .finalize(&attempt, FinalizeTrigger::Expiry, now)
            .await?;

        let closed = self
            .engine
            .attempts
            .get_attempt(&attempt.id)
            .await?
            .ok_or_else(|| EngineError::AttemptNotFound(attempt.id.clone()))?;

        RECONCILIATIONS_TOTAL.with_label_values(&["closed"]).inc();
        Ok(Reconciled {
            attempt: closed,
            was_already_expired: true,
            outcome: Some(outcome),
        })
    }

    /// Closes the learner's open attempt on `scenario_id` if it has expired.
    /// Returns the attempt that is still open afterwards, if any.
    pub async fn sweep_open_attempt(
        &self,
        learner_id: &str,
        scenario_id: &str,
    ) -> Result<Option<Attempt>, EngineError> {
        let Some(open) = self
            .engine
            .attempts
            .find_open_attempt(learner_id, scenario_id)
            .await?
        else {
            return Ok(None);
        };

        let reconciled = self.reconcile_attempt(open).await?;
        if reconciled.attempt.status.is_terminal() {
            return Ok(None);
        }
        Ok(Some(reconciled.attempt))
    }
}
