use chrono::TimeDelta;
use clinsim_api::{
    models::{timer::TickReport, Attempt, AttemptStatus},
    storage::{AnswerStore, AttemptStore},
    EngineError,
};

mod common;

use common::{learner, short_request, start_request, TestEngine, CORRECT_OPTIONS, SCENARIO_ID};

#[tokio::test]
async fn test_concurrent_arming_persists_one_deadline() {
    let t = TestEngine::new();
    let first = t.service();
    let second = t.service();

    let id = first
        .start_or_resume(start_request(&learner()))
        .await
        .unwrap()
        .attempt_id;
    let a = first.session(&id).await.unwrap();
    let b = second.session(&id).await.unwrap();

    let (ra, rb) = tokio::join!(a.arm(), b.arm());
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert!(ra.armed_now ^ rb.armed_now, "exactly one caller arms");
    assert_eq!(ra.started_at, rb.started_at);
    assert_eq!(ra.expires_at, rb.expires_at);

    let row = t.attempts.get_attempt(&id).await.unwrap().unwrap();
    assert_eq!(row.started_at, Some(ra.started_at));
    assert_eq!(
        row.expires_at,
        Some(t.clock.current() + TimeDelta::seconds(600))
    );

    // Re-arming reports the same pair
    let again = a.arm().await.unwrap();
    assert!(!again.armed_now);
    assert_eq!(again.expires_at, ra.expires_at);
}

#[tokio::test]
async fn test_countdown_never_increases_or_goes_negative() {
    let t = TestEngine::new();
    let service = t.service();
    let id = service
        .start_or_resume(start_request(&learner()))
        .await
        .unwrap()
        .attempt_id;
    let session = service.session(&id).await.unwrap();
    session.arm().await.unwrap();

    let mut last = session.tick().remaining_seconds.unwrap();
    assert_eq!(last, 600);

    for step in [5, 1, -3, 10, -20, 250, -1, 400, 30] {
        t.clock.advance_secs(step);
        let remaining = session.tick().remaining_seconds.unwrap();
        assert!(remaining <= last, "{} went up to {}", last, remaining);
        last = remaining;
    }
    assert_eq!(last, 0);
}

#[tokio::test]
async fn test_time_up_fires_once_and_closes_incomplete_attempt() {
    let t = TestEngine::new();
    let service = t.service();
    let id = service
        .start_or_resume(start_request(&learner()))
        .await
        .unwrap()
        .attempt_id;
    let session = service.session(&id).await.unwrap();
    session.arm().await.unwrap();
    session.submit_answer("q1", 0).await.unwrap();

    t.clock.advance_secs(601);
    let report = session.tick_and_settle().await;
    assert!(report.time_up);
    assert!(report.expired);
    assert_eq!(report.remaining_seconds, Some(0));

    for _ in 0..5 {
        t.clock.advance_secs(1);
        let report = session.tick_and_settle().await;
        assert!(!report.time_up);
        assert!(report.expired);
    }

    assert_eq!(session.status(), AttemptStatus::Abandoned);
    let row = t.attempts.get_attempt(&id).await.unwrap().unwrap();
    assert_eq!(row.status, AttemptStatus::Abandoned);
    assert_eq!(row.correct_count, Some(1));
    assert_eq!(row.score, Some(20));
}

#[tokio::test]
async fn test_second_submission_keeps_first_answer() {
    let t = TestEngine::new();
    let service = t.service();
    let id = service
        .start_or_resume(start_request(&learner()))
        .await
        .unwrap()
        .attempt_id;
    let session = service.session(&id).await.unwrap();
    session.arm().await.unwrap();

    let first = session.submit_answer("q1", 0).await.unwrap();
    assert!(first.accepted);
    assert!(first.is_correct);
    assert!(!first.already_answered);

    let second = session.submit_answer("q1", 2).await.unwrap();
    assert!(second.already_answered);
    assert!(second.is_correct);

    let stored = t.answers.list_answers(&id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].selected_option, Some(0));
    assert!(stored[0].is_correct);
}

#[tokio::test]
async fn test_hints_are_revealed_in_order_until_exhausted() {
    let t = TestEngine::new();
    let service = t.service();
    let id = service
        .start_or_resume(start_request(&learner()))
        .await
        .unwrap()
        .attempt_id;
    let session = service.session(&id).await.unwrap();
    session.arm().await.unwrap();

    let first = session.request_hint("q1").await.unwrap().unwrap();
    assert_eq!(first.hint_text, "Check the lactate");
    assert_eq!(first.hints_used, 1);
    assert_eq!(first.hints_remaining, 1);
    assert_eq!(first.penalty_points, 5);

    // Inside the debounce window nothing is revealed
    assert!(session.request_hint("q1").await.unwrap().is_none());

    t.clock.advance_secs(1);
    let second = session.request_hint("q1").await.unwrap().unwrap();
    assert_eq!(second.hint_text, "Think about perfusion");
    assert_eq!(second.hints_remaining, 0);

    t.clock.advance_secs(1);
    assert!(session.request_hint("q1").await.unwrap().is_none());

    let usage = session.view(false).hints;
    let q1 = usage.iter().find(|u| u.question_id == "q1").unwrap();
    assert_eq!(q1.used, 2);
    assert_eq!(q1.revealed, vec!["Check the lactate", "Think about perfusion"]);
}

#[tokio::test]
async fn test_no_hint_after_question_is_answered() {
    let t = TestEngine::new();
    let service = t.service();
    let id = service
        .start_or_resume(start_request(&learner()))
        .await
        .unwrap()
        .attempt_id;
    let session = service.session(&id).await.unwrap();
    session.arm().await.unwrap();

    session.submit_answer("q2", 1).await.unwrap();
    assert!(session.request_hint("q2").await.unwrap().is_none());
    assert!(session.request_hint("q3").await.unwrap().is_none());
}

#[tokio::test]
async fn test_finish_applies_hint_penalty_to_score() {
    let t = TestEngine::new();
    let service = t.service();
    let id = service
        .start_or_resume(start_request(&learner()))
        .await
        .unwrap()
        .attempt_id;
    let session = service.session(&id).await.unwrap();
    session.arm().await.unwrap();

    for question in ["q1", "q1", "q2"] {
        session.request_hint(question).await.unwrap().unwrap();
        t.clock.advance_secs(1);
    }

    // Four of five correct: 80 - 3 * 5
    for (question, correct) in CORRECT_OPTIONS.iter().take(4) {
        session.submit_answer(question, *correct).await.unwrap();
    }
    session.submit_answer("q5", 0).await.unwrap();

    let outcome = service.finish(&id, None).await.unwrap();
    assert_eq!(outcome.correct_count, 4);
    assert_eq!(outcome.total_count, 5);
    assert_eq!(outcome.score, 65);
    assert_eq!(outcome.status, AttemptStatus::Finalized);
    assert!(!outcome.superseded);
}

#[tokio::test]
async fn test_racing_finishes_agree_on_one_result() {
    let t = TestEngine::new();
    let service = t.service();
    let id = service
        .start_or_resume(start_request(&learner()))
        .await
        .unwrap()
        .attempt_id;
    let session = service.session(&id).await.unwrap();
    session.arm().await.unwrap();
    session.submit_answer("q1", 0).await.unwrap();
    session.submit_answer("q2", 0).await.unwrap();
    t.clock.advance_secs(601);

    let (manual, expiry) = tokio::join!(session.finish(None), session.finish_on_expiry());
    let (manual, expiry) = (manual.unwrap(), expiry.unwrap());

    assert!(manual.superseded ^ expiry.superseded);
    assert_eq!(manual.score, expiry.score);
    assert_eq!(manual.status, expiry.status);
    assert_eq!(manual.status, AttemptStatus::Abandoned);
    assert_eq!(manual.score, 20);

    // A finish from another process reads the stored row back
    let other = t.service().finish(&id, Some(AttemptStatus::Finalized)).await.unwrap();
    assert!(other.superseded);
    assert_eq!(other.score, manual.score);
    assert_eq!(other.status, manual.status);

    let row = t.attempts.get_attempt(&id).await.unwrap().unwrap();
    assert_eq!(row.score, Some(manual.score));
    assert_eq!(row.status, manual.status);
}

async fn answer_and_walk_away(t: &TestEngine, answered: usize) -> String {
    let service = t.service();
    let id = service
        .start_or_resume(short_request(&learner()))
        .await
        .unwrap()
        .attempt_id;
    let session = service.session(&id).await.unwrap();
    session.arm().await.unwrap();
    for (question, correct) in CORRECT_OPTIONS.iter().take(answered) {
        session.submit_answer(question, *correct).await.unwrap();
    }
    t.clock.advance_secs(120);
    id
}

#[tokio::test]
async fn test_stale_complete_attempt_is_finalized_on_load() {
    let t = TestEngine::new();
    let id = answer_and_walk_away(&t, 5).await;

    let (session, was_already_expired) = t.service().open(&id).await.unwrap();
    assert!(was_already_expired);
    assert_eq!(session.status(), AttemptStatus::Finalized);

    let view = session.view(was_already_expired);
    assert_eq!(view.attempt.score, Some(100));
    assert_eq!(view.attempt.total_count, Some(5));
    assert_eq!(view.remaining_seconds, Some(0));
}

#[tokio::test]
async fn test_stale_incomplete_attempt_is_abandoned_on_load() {
    let t = TestEngine::new();
    let id = answer_and_walk_away(&t, 3).await;

    let (session, was_already_expired) = t.service().open(&id).await.unwrap();
    assert!(was_already_expired);
    assert_eq!(session.status(), AttemptStatus::Abandoned);

    let row = t.attempts.get_attempt(&id).await.unwrap().unwrap();
    assert_eq!(row.correct_count, Some(3));
    assert_eq!(row.score, Some(60));

    // Loading again reports the terminal row, not a second expiry
    let (_, again) = t.service().open(&id).await.unwrap();
    assert!(!again);
}

#[tokio::test]
async fn test_attempt_without_limit_never_expires() {
    let t = TestEngine::new();
    let id = "open-ended".to_string();
    t.attempts.put(Attempt {
        id: id.clone(),
        learner_id: learner(),
        scenario_id: SCENARIO_ID.to_string(),
        role: "medico".to_string(),
        status: AttemptStatus::InProgress,
        time_limit_seconds: None,
        started_at: None,
        expires_at: None,
        finished_at: None,
        correct_count: None,
        total_count: None,
        score: None,
        created_at: t.clock.current(),
    });

    let service = t.service();
    let session = service.session(&id).await.unwrap();
    for _ in 0..3 {
        t.clock.advance_secs(3600);
        assert_eq!(session.tick_and_settle().await, TickReport::default());
    }

    let armed = session.arm().await.unwrap();
    assert!(armed.armed_now);
    assert_eq!(armed.expires_at, None);

    t.clock.advance_secs(86_400);
    let report = session.tick_and_settle().await;
    assert_eq!(report.remaining_seconds, None);
    assert!(!report.time_up);
    assert_eq!(session.view(false).remaining_seconds, None);
    assert_eq!(session.status(), AttemptStatus::InProgress);
}

#[tokio::test]
async fn test_start_resumes_open_attempt() {
    let t = TestEngine::new();
    let service = t.service();
    let learner_id = learner();

    let created = service
        .start_or_resume(start_request(&learner_id))
        .await
        .unwrap();
    assert!(!created.resumed);
    assert_eq!(created.time_limit_seconds, Some(600));
    assert_eq!(created.expires_at, None);

    let resumed = service
        .start_or_resume(start_request(&learner_id))
        .await
        .unwrap();
    assert!(resumed.resumed);
    assert_eq!(resumed.attempt_id, created.attempt_id);
}

#[tokio::test]
async fn test_custom_budget_only_for_privileged_callers() {
    let t = TestEngine::new();
    let service = t.service();

    let mut ignored = start_request(&learner());
    ignored.time_limit_minutes = Some(2);
    let ignored = service.start_or_resume(ignored).await.unwrap();
    assert_eq!(ignored.time_limit_seconds, Some(600));

    let custom = service
        .start_or_resume(short_request(&learner()))
        .await
        .unwrap();
    assert_eq!(custom.time_limit_seconds, Some(60));
}

#[tokio::test]
async fn test_expired_leftover_does_not_block_new_attempt() {
    let t = TestEngine::new();
    let service = t.service();
    let learner_id = learner();

    let old = service
        .start_or_resume(start_request(&learner_id))
        .await
        .unwrap()
        .attempt_id;
    service.session(&old).await.unwrap().arm().await.unwrap();
    t.clock.advance_secs(700);

    let fresh = t
        .service()
        .start_or_resume(start_request(&learner_id))
        .await
        .unwrap();
    assert!(!fresh.resumed);
    assert_ne!(fresh.attempt_id, old);

    let old_row = t.attempts.get_attempt(&old).await.unwrap().unwrap();
    assert_eq!(old_row.status, AttemptStatus::Abandoned);

    let history = service.history(&learner_id, SCENARIO_ID).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, fresh.attempt_id);
}

#[tokio::test]
async fn test_attempt_limit_applies_to_learners_only() {
    let t = TestEngine::new();
    let service = t.service();
    let learner_id = learner();

    for _ in 0..3 {
        let id = service
            .start_or_resume(start_request(&learner_id))
            .await
            .unwrap()
            .attempt_id;
        service.session(&id).await.unwrap().arm().await.unwrap();
        service
            .finish(&id, Some(AttemptStatus::Abandoned))
            .await
            .unwrap();
    }

    let err = service
        .start_or_resume(start_request(&learner_id))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AttemptLimitReached { limit: 3 }));

    let mut privileged = start_request(&learner_id);
    privileged.privileged = true;
    let created = service.start_or_resume(privileged).await.unwrap();
    assert!(!created.resumed);
}

#[tokio::test]
async fn test_role_decides_question_total() {
    let t = TestEngine::new();
    let service = t.service();

    let medico = service
        .start_or_resume(start_request(&learner()))
        .await
        .unwrap()
        .attempt_id;
    let (session, _) = service.open(&medico).await.unwrap();
    assert_eq!(session.attempt().role, "medico");
    assert_eq!(session.view(false).total_questions, 5);
    assert_eq!(session.steps().len(), 3);

    let mut request = start_request(&learner());
    request.role = Some("Farmacéutica".to_string());
    let farmacia = service.start_or_resume(request).await.unwrap().attempt_id;
    let (session, _) = service.open(&farmacia).await.unwrap();
    assert_eq!(session.view(false).total_questions, 6);

    session.arm().await.unwrap();
    let err = session.submit_answer("q7", 0).await.unwrap_err();
    assert!(matches!(err, EngineError::QuestionNotFound(_)));
}

#[tokio::test]
async fn test_failed_answer_write_is_kept_and_flushed_later() {
    let t = TestEngine::new();
    let service = t.service();
    let id = service
        .start_or_resume(start_request(&learner()))
        .await
        .unwrap()
        .attempt_id;
    let session = service.session(&id).await.unwrap();
    session.arm().await.unwrap();

    t.answers.set_fail_writes(true);
    let err = session.submit_answer("q1", 0).await.unwrap_err();
    assert!(matches!(err, EngineError::Persistence(_)));
    assert_eq!(session.view(false).pending_answers, 1);

    // The learner's choice is kept locally
    let again = session.submit_answer("q1", 1).await.unwrap();
    assert!(again.already_answered);
    assert!(again.is_correct);

    // Finishing cannot score an answer the store has not seen
    let err = session
        .finish(Some(AttemptStatus::Abandoned))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Persistence(_)));
    assert_eq!(session.status(), AttemptStatus::InProgress);

    t.answers.set_fail_writes(false);
    let flushed = session.retry_pending().await;
    assert_eq!(flushed.flushed, 1);
    assert_eq!(flushed.pending, 0);

    let outcome = session.finish(Some(AttemptStatus::Abandoned)).await.unwrap();
    assert_eq!(outcome.status, AttemptStatus::Abandoned);
    assert_eq!(outcome.correct_count, 1);
    assert_eq!(outcome.score, 20);
}

#[tokio::test]
async fn test_question_timer_locks_unanswered_question() {
    let t = TestEngine::new();
    let service = t.service();
    let id = service
        .start_or_resume(start_request(&learner()))
        .await
        .unwrap()
        .attempt_id;
    let session = service.session(&id).await.unwrap();
    session.arm().await.unwrap();

    let step = session.show_step(2).unwrap();
    assert!(step.time_critical);
    assert_eq!(step.question_timers.len(), 1);
    assert_eq!(step.question_timers[0].remaining_seconds, 30);

    t.clock.advance_secs(31);
    let report = session.tick_and_settle().await;
    assert_eq!(report.expired_questions, vec!["q5".to_string()]);
    assert!(report.question_timers[0].expired);

    let stored = t.answers.list_answers(&id).await.unwrap();
    let locked = stored.iter().find(|a| a.question_id == "q5").unwrap();
    assert_eq!(locked.selected_option, None);
    assert!(!locked.is_correct);

    let late = session.submit_answer("q5", 1).await.unwrap();
    assert!(late.already_answered);
    assert!(!late.is_correct);

    // Redisplay starts a fresh timer but the lock stays
    let step = session.show_step(2).unwrap();
    assert_eq!(step.question_timers[0].remaining_seconds, 30);
    assert!(step.questions[0].answered);

    // Timed-out answers count as answered for completeness, not as correct
    for (question, correct) in CORRECT_OPTIONS.iter().take(4) {
        session.submit_answer(question, *correct).await.unwrap();
    }
    let outcome = session.finish_on_expiry().await.unwrap();
    assert_eq!(outcome.status, AttemptStatus::Finalized);
    assert_eq!(outcome.correct_count, 4);
}

#[tokio::test]
async fn test_mutations_are_guarded() {
    let t = TestEngine::new();
    let service = t.service();
    let id = service
        .start_or_resume(start_request(&learner()))
        .await
        .unwrap()
        .attempt_id;
    let session = service.session(&id).await.unwrap();

    let err = session.submit_answer("q1", 0).await.unwrap_err();
    assert!(matches!(err, EngineError::AttemptNotArmed));
    let err = session.request_hint("q1").await.unwrap_err();
    assert!(matches!(err, EngineError::AttemptNotArmed));

    session.arm().await.unwrap();

    let err = session.submit_answer("q1", 3).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidOption { option: 3, .. }));
    let err = session.submit_answer("missing", 0).await.unwrap_err();
    assert!(matches!(err, EngineError::QuestionNotFound(_)));
    let err = session.show_step(9).unwrap_err();
    assert!(matches!(err, EngineError::StepNotFound(9)));

    // Past the deadline but before any tick observed it
    t.clock.advance_secs(601);
    let err = session.submit_answer("q1", 0).await.unwrap_err();
    assert!(matches!(err, EngineError::TimeExpired));

    let closed = session.finish(None).await.unwrap();
    assert_eq!(closed.status, AttemptStatus::Abandoned);
    let err = session.submit_answer("q1", 0).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::AttemptNotActive {
            status: AttemptStatus::Abandoned
        }
    ));
    let err = session.arm().await.unwrap_err();
    assert!(matches!(err, EngineError::AttemptNotActive { .. }));
}

#[tokio::test]
async fn test_arming_survives_unreachable_server_clock() {
    let t = TestEngine::new();
    let service = t.service();
    let id = service
        .start_or_resume(start_request(&learner()))
        .await
        .unwrap()
        .attempt_id;
    let session = service.session(&id).await.unwrap();

    t.clock.set_available(false);
    let armed = session.arm().await.unwrap();
    assert!(armed.armed_now);
    assert_eq!(
        armed.expires_at,
        Some(t.clock.current() + TimeDelta::seconds(600))
    );
}

#[tokio::test]
async fn test_unknown_attempt_is_not_found() {
    let t = TestEngine::new();
    let err = t.service().open("nope").await.unwrap_err();
    assert!(matches!(err, EngineError::AttemptNotFound(_)));
}

#[tokio::test]
async fn test_late_manual_finish_matches_expiry_outcome() {
    let t = TestEngine::new();
    let service = t.service();
    let id = service
        .start_or_resume(start_request(&learner()))
        .await
        .unwrap()
        .attempt_id;
    let session = service.session(&id).await.unwrap();
    session.arm().await.unwrap();
    session.submit_answer("q1", 0).await.unwrap();

    // No tick saw the deadline; the learner presses finish afterwards
    t.clock.advance_secs(601);
    let outcome = session.finish(None).await.unwrap();
    assert_eq!(outcome.status, AttemptStatus::Abandoned);
    assert_eq!(outcome.score, 20);

    let row = t.attempts.get_attempt(&id).await.unwrap().unwrap();
    assert_eq!(row.status, AttemptStatus::Abandoned);
}

#[tokio::test]
async fn test_incomplete_attempt_cannot_be_finalized_early() {
    let t = TestEngine::new();
    let service = t.service();
    let id = service
        .start_or_resume(start_request(&learner()))
        .await
        .unwrap()
        .attempt_id;
    let session = service.session(&id).await.unwrap();
    session.arm().await.unwrap();
    session.submit_answer("q1", 0).await.unwrap();

    for requested in [None, Some(AttemptStatus::Finalized)] {
        let err = session.finish(requested).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::AttemptIncomplete {
                answered: 1,
                total: 5
            }
        ));
    }
    assert_eq!(session.status(), AttemptStatus::InProgress);

    let outcome = service
        .finish(&id, Some(AttemptStatus::Abandoned))
        .await
        .unwrap();
    assert_eq!(outcome.status, AttemptStatus::Abandoned);
    assert_eq!(outcome.score, 20);
}

#[tokio::test]
async fn test_unarmed_attempt_cannot_be_finished() {
    let t = TestEngine::new();
    let service = t.service();
    let id = service
        .start_or_resume(start_request(&learner()))
        .await
        .unwrap()
        .attempt_id;

    for requested in [None, Some(AttemptStatus::Abandoned)] {
        let err = service.finish(&id, requested).await.unwrap_err();
        assert!(matches!(err, EngineError::AttemptNotArmed));
    }

    let row = t.attempts.get_attempt(&id).await.unwrap().unwrap();
    assert_eq!(row.status, AttemptStatus::InProgress);
    assert_eq!(row.started_at, None);
    assert_eq!(row.finished_at, None);
}

#[tokio::test]
async fn test_question_limit_holds_without_ticks() {
    let t = TestEngine::new();
    let service = t.service();
    let id = service
        .start_or_resume(start_request(&learner()))
        .await
        .unwrap()
        .attempt_id;
    let session = service.session(&id).await.unwrap();
    session.arm().await.unwrap();
    session.show_step(2).unwrap();

    t.clock.advance_secs(45);
    let err = session.submit_answer("q5", 1).await.unwrap_err();
    assert!(matches!(err, EngineError::QuestionExpired(ref q) if q == "q5"));

    let stored = t.answers.list_answers(&id).await.unwrap();
    let locked = stored.iter().find(|a| a.question_id == "q5").unwrap();
    assert_eq!(locked.selected_option, None);
    assert!(!locked.is_correct);

    let late = session.submit_answer("q5", 1).await.unwrap();
    assert!(late.already_answered);
    assert!(!late.is_correct);
    assert!(session.request_hint("q5").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failed_finalize_keeps_attempt_open_until_next_tick() {
    let t = TestEngine::new();
    let service = t.service();
    let id = service
        .start_or_resume(start_request(&learner()))
        .await
        .unwrap()
        .attempt_id;
    let session = service.session(&id).await.unwrap();
    session.arm().await.unwrap();
    session.submit_answer("q1", 0).await.unwrap();

    t.attempts.set_fail_writes(true);
    t.clock.advance_secs(601);
    let report = session.tick_and_settle().await;
    assert!(report.time_up);
    assert_eq!(session.status(), AttemptStatus::InProgress);

    let err = session.finish(None).await.unwrap_err();
    assert!(matches!(err, EngineError::Persistence(_)));
    let row = t.attempts.get_attempt(&id).await.unwrap().unwrap();
    assert_eq!(row.status, AttemptStatus::InProgress);
    assert_eq!(row.finished_at, None);

    // The store is back; the next tick completes the pending close
    t.attempts.set_fail_writes(false);
    t.clock.advance_secs(1);
    let report = session.tick_and_settle().await;
    assert!(!report.time_up);
    assert_eq!(session.status(), AttemptStatus::Abandoned);

    let row = t.attempts.get_attempt(&id).await.unwrap().unwrap();
    assert_eq!(row.status, AttemptStatus::Abandoned);
    assert_eq!(row.score, Some(20));
}

#[tokio::test]
async fn test_hint_write_failure_is_reported() {
    let t = TestEngine::new();
    let service = t.service();
    let id = service
        .start_or_resume(start_request(&learner()))
        .await
        .unwrap()
        .attempt_id;
    let session = service.session(&id).await.unwrap();
    session.arm().await.unwrap();

    t.hints.set_fail_writes(true);
    let err = session.request_hint("q1").await.unwrap_err();
    assert!(matches!(err, EngineError::Persistence(_)));

    t.hints.set_fail_writes(false);
    t.clock.advance_secs(1);
    let hint = session.request_hint("q1").await.unwrap().unwrap();
    assert_eq!(hint.hint_text, "Check the lactate");
    assert_eq!(hint.hints_used, 1);
}

#[tokio::test]
async fn test_registry_sweep_closes_unwatched_attempts() {
    let t = TestEngine::new();
    let service = t.service();

    let short = service
        .start_or_resume(short_request(&learner()))
        .await
        .unwrap()
        .attempt_id;
    let long = service
        .start_or_resume(start_request(&learner()))
        .await
        .unwrap()
        .attempt_id;
    for id in [&short, &long] {
        service.session(id).await.unwrap().arm().await.unwrap();
    }
    assert_eq!(service.live_sessions().await, 2);
    assert_eq!(service.sweep_registry().await, 0);

    t.clock.advance_secs(61);
    assert_eq!(service.sweep_registry().await, 1);
    assert_eq!(service.live_sessions().await, 1);

    let row = t.attempts.get_attempt(&short).await.unwrap().unwrap();
    assert_eq!(row.status, AttemptStatus::Abandoned);
    let row = t.attempts.get_attempt(&long).await.unwrap().unwrap();
    assert_eq!(row.status, AttemptStatus::InProgress);
}
