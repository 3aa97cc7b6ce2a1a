//! Case queue ordering, automatic assignment flags and entry uniqueness

mod common;

use common::{drain, test_center};
use sc_case_engine::error::CaseEngineError;
use sc_case_engine::types::{AssignmentClass, WorkGroupId};

#[tokio::test]
async fn test_live_calls_come_before_older_electronic_cases() {
    let center = test_center().await;

    let electronic = center.open_electronic_case("support").await;
    center.tick();
    let call = center.incoming_call("ch-1").await;
    let telephony = center.open_telephony_case("support", call.id).await;

    let queued = center.engine.queue().get_all().await.unwrap();
    let order: Vec<_> = queued.iter().map(|queued| queued.case_id()).collect();
    assert_eq!(order, vec![telephony.id, electronic.id]);
    assert_eq!(queued[0].class, AssignmentClass::Interactive);
    assert_eq!(queued[1].class, AssignmentClass::Passive);
}

#[tokio::test]
async fn test_fifo_within_class() {
    let center = test_center().await;
    let mut opened = Vec::new();
    for _ in 0..3 {
        opened.push(center.open_electronic_case("support").await.id);
        center.tick();
    }

    let queued = center.engine.queue().get_assignable_passive_cases_by_prio().await.unwrap();
    let order: Vec<_> = queued.iter().map(|queued| queued.case_id()).collect();
    assert_eq!(order, opened);
    assert!(center
        .engine
        .queue()
        .get_assignable_interactive_cases_by_prio()
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_requeued_passive_case_waits_for_manual_pickup() {
    let center = test_center().await;
    let case = center.open_electronic_case("support").await;
    let first = center.engine.queue().find_active_entry(case.id).await.unwrap().unwrap();
    assert!(first.automatically_assign);

    center.tick();
    assert!(center.engine.queue().dequeue_by_case(case.id).await.unwrap());
    assert!(!center.engine.queue().dequeue_by_case(case.id).await.unwrap());

    center.tick();
    let second = center.engine.queue().enqueue(case.id).await.unwrap();
    assert!(!second.automatically_assign);
    assert!(center
        .engine
        .queue()
        .get_assignable_cases(AssignmentClass::Passive)
        .await
        .unwrap()
        .is_empty());

    let initial = center
        .engine
        .queue()
        .find_initial_queue_entry_by_case(case.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(initial.id, first.id);
}

#[tokio::test]
async fn test_requeued_live_call_stays_automatic() {
    let center = test_center().await;
    let call = center.incoming_call("ch-1").await;
    let case = center.open_telephony_case("support", call.id).await;

    center.tick();
    center.engine.queue().dequeue_by_case(case.id).await.unwrap();
    center.tick();
    let entry = center.engine.queue().enqueue(case.id).await.unwrap();
    assert!(entry.automatically_assign);
}

#[tokio::test]
async fn test_enqueue_is_idempotent() {
    let center = test_center().await;
    let case = center.open_electronic_case("support").await;
    let mut rx = center.broadcaster.subscribe();

    let existing = center.engine.queue().find_active_entry(case.id).await.unwrap().unwrap();
    let again = center.engine.queue().enqueue(case.id).await.unwrap();
    assert_eq!(again.id, existing.id);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_concurrent_enqueue_and_dequeue_keep_one_entry() {
    let center = test_center().await;
    let case = center.open_electronic_case("support").await;

    let mut tasks = Vec::new();
    for i in 0..20 {
        let queue = center.engine.queue().clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                queue.enqueue(case.id).await.map(|_| ())
            } else {
                queue.dequeue_by_case(case.id).await.map(|_| ())
            }
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let active = center
        .engine
        .queue()
        .get_all()
        .await
        .unwrap()
        .into_iter()
        .filter(|queued| queued.case_id() == case.id)
        .count();
    assert!(active <= 1);
}

#[tokio::test]
async fn test_only_open_unassigned_cases_are_queued() {
    let center = test_center().await;
    let case = center.open_electronic_case("support").await;
    center.engine.cases().close_case(case.id, Some("spam".to_string())).await.unwrap();
    assert!(!center.engine.queue().is_queued(case.id).await.unwrap());

    let err = center.engine.queue().enqueue(case.id).await.unwrap_err();
    assert!(matches!(err, CaseEngineError::InvalidState(_)));
}

#[tokio::test]
async fn test_filter_by_work_groups() {
    let center = test_center().await;
    let support = center.open_electronic_case("support").await;
    center.tick();
    let sales = center.open_electronic_case("sales").await;
    center.tick();
    center.open_electronic_case("billing").await;

    let queued = center
        .engine
        .queue()
        .get_all_by_work_groups(&[WorkGroupId::from("sales"), WorkGroupId::from("support")])
        .await
        .unwrap();
    let order: Vec<_> = queued.iter().map(|queued| queued.case_id()).collect();
    assert_eq!(order, vec![support.id, sales.id]);
}

#[tokio::test]
async fn test_orphaned_cases_are_requeued() {
    let center = test_center().await;
    let case = center.open_electronic_case("support").await;
    center.engine.queue().dequeue_by_case(case.id).await.unwrap();

    let requeued = center.engine.requeue_orphaned_cases().await.unwrap();
    assert_eq!(requeued, vec![case.id]);
    assert!(center.engine.queue().is_queued(case.id).await.unwrap());
    assert!(center.engine.requeue_orphaned_cases().await.unwrap().is_empty());
}
