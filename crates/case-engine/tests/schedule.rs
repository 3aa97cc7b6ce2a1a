//! Scheduling cases for later and moving them back onto the queue

mod common;

use chrono::Duration;

use common::test_center;
use sc_case_engine::error::CaseEngineError;
use sc_case_engine::types::CaseStatus;

#[tokio::test]
async fn test_scheduled_case_leaves_queue_until_requeued() {
    let center = test_center().await;
    let case = center.open_electronic_case("support").await;
    assert!(center.engine.queue().is_queued(case.id).await.unwrap());

    let due_at = center.now() + Duration::hours(2);
    let entry = center.engine.schedule().schedule_case(case.id, due_at).await.unwrap();
    assert_eq!(entry.due_at, due_at);
    assert!(!center.engine.queue().is_queued(case.id).await.unwrap());
    assert!(center.engine.schedule().is_scheduled(case.id).await.unwrap());

    center.tick();
    let queued = center.engine.schedule().queue_scheduled_case(case.id).await.unwrap();
    assert!(!queued.automatically_assign);
    assert!(center.engine.queue().is_queued(case.id).await.unwrap());
    assert!(!center.engine.schedule().is_scheduled(case.id).await.unwrap());
}

#[tokio::test]
async fn test_unscheduled_case_is_rejected() {
    let center = test_center().await;
    let case = center.open_electronic_case("support").await;

    let err = center.engine.schedule().queue_scheduled_case(case.id).await.unwrap_err();
    assert!(matches!(err, CaseEngineError::CaseNotScheduled { case_id } if case_id == case.id));

    let session = center.start_manual_agent("alice", &["support"]).await;
    let err = center
        .engine
        .schedule()
        .assign_scheduled_case(case.id, session.id)
        .await
        .unwrap_err();
    assert!(matches!(err, CaseEngineError::CaseNotScheduled { .. }));

    let err = center
        .engine
        .schedule()
        .reschedule_case(case.id, center.now())
        .await
        .unwrap_err();
    assert!(matches!(err, CaseEngineError::CaseNotScheduled { .. }));
}

#[tokio::test]
async fn test_assign_scheduled_case_bypasses_queue() {
    let center = test_center().await;
    let case = center.open_electronic_case("support").await;
    center
        .engine
        .schedule()
        .schedule_case(case.id, center.now() + Duration::days(1))
        .await
        .unwrap();

    let session = center.start_manual_agent("alice", &["support"]).await;
    let log_entry = center
        .engine
        .schedule()
        .assign_scheduled_case(case.id, session.id)
        .await
        .unwrap();
    assert_eq!(log_entry.case_id, Some(case.id));

    let case = center.engine.cases().find_case(case.id).await.unwrap().unwrap();
    assert_eq!(case.status, CaseStatus::Assigned);
    assert_eq!(case.assigned_agent_id, Some(session.agent_id.clone()));
    assert!(!center.engine.schedule().is_scheduled(case.id).await.unwrap());
    assert!(!center.engine.queue().is_queued(case.id).await.unwrap());
}

#[tokio::test]
async fn test_reschedule_moves_due_time() {
    let center = test_center().await;
    let case = center.open_electronic_case("support").await;
    let first_due = center.now() + Duration::hours(1);
    let scheduled = center.engine.schedule().schedule_case(case.id, first_due).await.unwrap();

    let later = first_due + Duration::hours(3);
    let rescheduled = center.engine.schedule().reschedule_case(case.id, later).await.unwrap();
    assert_eq!(rescheduled.id, scheduled.id);
    assert_eq!(
        center
            .engine
            .schedule()
            .find_schedule_entry(case.id)
            .await
            .unwrap()
            .unwrap()
            .due_at,
        later
    );
}

#[tokio::test]
async fn test_due_cases_are_queued_by_sweep() {
    let center = test_center().await;
    let soon = center.open_electronic_case("support").await;
    let later = center.open_electronic_case("support").await;
    let now = center.now();
    center
        .engine
        .schedule()
        .schedule_case(soon.id, now + Duration::minutes(30))
        .await
        .unwrap();
    center
        .engine
        .schedule()
        .schedule_case(later.id, now + Duration::hours(5))
        .await
        .unwrap();

    let report = center.engine.queue_due_cases().await.unwrap();
    assert!(report.queued.is_empty());

    center.clock.advance(Duration::hours(1));
    let report = center.engine.queue_due_cases().await.unwrap();
    assert_eq!(report.queued, vec![soon.id]);
    assert!(report.skipped.is_empty());
    assert!(report.failed.is_empty());

    assert!(center.engine.queue().is_queued(soon.id).await.unwrap());
    assert!(center.engine.schedule().is_scheduled(later.id).await.unwrap());
}

#[tokio::test]
async fn test_closing_case_cancels_schedule() {
    let center = test_center().await;
    let case = center.open_electronic_case("support").await;
    center
        .engine
        .schedule()
        .schedule_case(case.id, center.now() + Duration::hours(1))
        .await
        .unwrap();

    center.engine.cases().close_case(case.id, None).await.unwrap();
    assert!(!center.engine.schedule().is_scheduled(case.id).await.unwrap());

    center.clock.advance(Duration::hours(2));
    let report = center.engine.queue_due_cases().await.unwrap();
    assert!(report.queued.is_empty());
}
