//! Agent session lifecycle: start, end, log transitions and the inactivity sweep

mod common;

use chrono::Duration;

use common::test_center;
use sc_case_engine::agent::AgentSessionStatus;
use sc_case_engine::error::CaseEngineError;
use sc_case_engine::types::{AgentId, CaseStatus, WorkGroupId};

#[tokio::test]
async fn test_second_session_for_same_agent_is_rejected() {
    let center = test_center().await;
    let first = center.start_agent("alice", None, &["support"]).await;

    let err = center
        .engine
        .sessions()
        .create_and_start_session("alice", "phone-alice-2", true, None, Vec::<WorkGroupId>::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CaseEngineError::DuplicateActiveSession { ref agent_id } if agent_id.0 == "alice"));

    center.engine.sessions().end_session(first.id).await.unwrap();
    let second = center.start_agent("alice", None, &["support"]).await;
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn test_end_session_blocked_while_case_assigned() {
    let center = test_center().await;
    let session = center.start_agent("alice", None, &["support"]).await;
    let case = center.open_electronic_case("support").await;
    assert_eq!(center.current_case_of(&session).await, Some(case.id));

    let err = center.engine.sessions().end_session(session.id).await.unwrap_err();
    match err {
        CaseEngineError::CannotEndSession {
            agent_session_id,
            case_id,
        } => {
            assert_eq!(agent_session_id, session.id);
            assert_eq!(case_id, case.id);
        }
        other => panic!("unexpected error: {other}"),
    }

    center.engine.cases().close_case(case.id, None).await.unwrap();
    let wrapped_up = center.engine.sessions().find_session(session.id).await.unwrap().unwrap();
    assert_eq!(wrapped_up.status(), AgentSessionStatus::WrapUp);
    assert_eq!(wrapped_up.current_case_id(), Some(case.id));

    center.engine.sessions().end_session(session.id).await.unwrap();
    let ended = center.engine.sessions().find_session(session.id).await.unwrap().unwrap();
    assert!(!ended.is_active());
}

#[tokio::test]
async fn test_unassigned_case_returns_to_queue_for_manual_pickup() {
    let center = test_center().await;
    let session = center.start_agent("alice", None, &["support"]).await;
    let case = center.open_electronic_case("support").await;
    assert_eq!(center.current_case_of(&session).await, Some(case.id));

    center.tick();
    let reopened = center.engine.cases().unassign_case(case.id).await.unwrap();
    assert_eq!(reopened.status, CaseStatus::Open);
    assert_eq!(reopened.assigned_agent_id, None);

    // A passive case seen on the queue before waits for a human
    let entry = center.engine.queue().find_active_entry(case.id).await.unwrap().unwrap();
    assert!(!entry.automatically_assign);
    assert_eq!(center.current_case_of(&session).await, None);

    center.engine.sessions().end_session(session.id).await.unwrap();
}

#[tokio::test]
async fn test_log_history_is_append_only() {
    let center = test_center().await;
    let session = center.start_agent("alice", None, &["support"]).await;
    center.tick();
    let case = center.open_electronic_case("support").await;
    center.tick();
    center
        .engine
        .sessions()
        .update_agent_session_log_entry(session.id, AgentSessionStatus::Break, Some(case.id), None)
        .await
        .unwrap();

    let history = center.engine.sessions().log_history(session.id).await.unwrap();
    let statuses: Vec<_> = history.iter().map(|entry| entry.status).collect();
    assert_eq!(
        statuses,
        vec![AgentSessionStatus::Ready, AgentSessionStatus::Busy, AgentSessionStatus::Break]
    );
    assert_eq!(history.iter().filter(|entry| entry.is_current()).count(), 1);
    assert!(history.last().unwrap().is_current());
    assert_eq!(history[1].case_id, Some(case.id));
}

#[tokio::test]
async fn test_unknown_agent_has_no_active_session() {
    let center = test_center().await;
    let err = center
        .engine
        .sessions()
        .find_active_session_for_agent(&AgentId::from("nobody"))
        .await
        .unwrap_err();
    assert!(matches!(err, CaseEngineError::NoActiveSession { .. }));

    let session = center.start_agent("alice", None, &[]).await;
    center.engine.sessions().end_session(session.id).await.unwrap();
    let err = center
        .engine
        .sessions()
        .set_initial_agent_session_log_entry(session.id)
        .await
        .unwrap_err();
    assert!(matches!(err, CaseEngineError::NoActiveSession { .. }));
}

#[tokio::test]
async fn test_inactivity_sweep_ends_only_stale_sessions() {
    let center = test_center().await;
    let stale = center.start_agent("alice", None, &["support"]).await;
    center.clock.advance(Duration::hours(9));
    let fresh = center.start_agent("bob", None, &["support"]).await;

    let report = center.engine.logout_inactive_sessions().await.unwrap();
    assert_eq!(report.ended, vec![stale.id]);
    assert!(report.is_clean());

    let err = center
        .engine
        .sessions()
        .find_active_session_for_agent(&stale.agent_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CaseEngineError::NoActiveSession { .. }));
    assert_eq!(
        center.engine.sessions().find_active_session_for_agent(&fresh.agent_id).await.unwrap().id,
        fresh.id
    );

    let report = center.engine.logout_inactive_sessions().await.unwrap();
    assert!(report.ended.is_empty());
}

#[tokio::test]
async fn test_inactivity_sweep_releases_held_case() {
    let center = test_center().await;
    let stale = center.start_agent("alice", None, &["support"]).await;
    let case = center.open_electronic_case("support").await;
    assert_eq!(center.current_case_of(&stale).await, Some(case.id));

    center.clock.advance(Duration::hours(9));
    let report = center.engine.logout_inactive_sessions().await.unwrap();
    assert_eq!(report.ended, vec![stale.id]);

    let case = center.engine.cases().find_case(case.id).await.unwrap().unwrap();
    assert_eq!(case.status, CaseStatus::Open);
    assert!(center.engine.queue().is_queued(case.id).await.unwrap());
}

#[tokio::test]
async fn test_automatic_assignment_toggle() {
    let center = test_center().await;
    let session = center.start_manual_agent("alice", &["support"]).await;
    let case = center.open_electronic_case("support").await;
    assert_eq!(center.current_case_of(&session).await, None);

    center
        .engine
        .sessions()
        .assign_cases_automatically(session.id, true, Some(1))
        .await
        .unwrap();
    let report = center.engine.process_case_queue().await.unwrap();

    assert_eq!(report.assignments.len(), 1);
    assert_eq!(report.assignments[0].case_id, case.id);
    assert_eq!(center.current_case_of(&session).await, Some(case.id));
}

#[tokio::test]
async fn test_taking_a_queued_case_assigns_it_exclusively() {
    let center = test_center().await;
    let alice = center.start_manual_agent("alice", &["support"]).await;
    let case = center.open_electronic_case("support").await;
    assert!(center.engine.queue().is_queued(case.id).await.unwrap());

    center.tick();
    center
        .engine
        .sessions()
        .update_agent_session_log_entry(alice.id, AgentSessionStatus::Busy, Some(case.id), None)
        .await
        .unwrap();

    let taken = center.engine.cases().find_case(case.id).await.unwrap().unwrap();
    assert_eq!(taken.status, CaseStatus::Assigned);
    assert_eq!(taken.assigned_agent_id, Some(alice.agent_id.clone()));
    assert!(!center.engine.queue().is_queued(case.id).await.unwrap());

    // An automatic agent arriving later must not receive the same case
    let bob = center.start_agent("bob", None, &["support"]).await;
    assert_eq!(center.current_case_of(&bob).await, None);
    assert_eq!(center.current_case_of(&alice).await, Some(case.id));

    let carol = center.start_manual_agent("carol", &["support"]).await;
    let err = center
        .engine
        .sessions()
        .update_agent_session_log_entry(carol.id, AgentSessionStatus::Busy, Some(case.id), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CaseEngineError::InvalidState(_)));
    assert_eq!(center.current_case_of(&carol).await, None);
}

#[tokio::test]
async fn test_scheduled_or_closed_case_cannot_be_taken() {
    let center = test_center().await;
    let alice = center.start_manual_agent("alice", &["support"]).await;

    let scheduled = center.open_electronic_case("support").await;
    center
        .engine
        .schedule()
        .schedule_case(scheduled.id, center.now() + Duration::hours(2))
        .await
        .unwrap();
    let err = center
        .engine
        .sessions()
        .update_agent_session_log_entry(alice.id, AgentSessionStatus::Busy, Some(scheduled.id), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CaseEngineError::InvalidState(_)));
    assert!(center.engine.schedule().is_scheduled(scheduled.id).await.unwrap());

    let closed = center.open_electronic_case("support").await;
    center.engine.cases().close_case(closed.id, None).await.unwrap();
    let err = center
        .engine
        .sessions()
        .update_agent_session_log_entry(alice.id, AgentSessionStatus::Busy, Some(closed.id), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CaseEngineError::InvalidState(_)));

    assert_eq!(center.current_case_of(&alice).await, None);
    let history = center.engine.sessions().log_history(alice.id).await.unwrap();
    assert_eq!(history.len(), 1);
}
