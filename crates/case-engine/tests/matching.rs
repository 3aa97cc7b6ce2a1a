//! Case-to-agent matching: priorities, work groups, classes and broadcasts

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::{drain, test_center, test_center_with};
use sc_case_engine::agent::AgentSessionStatus;
use sc_case_engine::config::{EngineConfig, MatchingMode};
use sc_case_engine::routing::MatchOutcome;
use sc_case_engine::types::{AssignmentClass, CaseId, CaseStatus};

#[tokio::test]
async fn test_cases_go_to_highest_priority_agent_first() {
    let center = test_center().await;
    let bob = center.start_agent("bob", Some(2), &["support"]).await;
    let carol = center.start_agent("carol", None, &["support"]).await;
    let alice = center.start_agent("alice", Some(1), &["support"]).await;

    let first = center.open_electronic_case("support").await;
    assert_eq!(center.current_case_of(&alice).await, Some(first.id));
    assert_eq!(center.current_case_of(&bob).await, None);

    center.tick();
    let second = center.open_electronic_case("support").await;
    assert_eq!(center.current_case_of(&bob).await, Some(second.id));

    center.tick();
    let third = center.open_electronic_case("support").await;
    assert_eq!(center.current_case_of(&carol).await, Some(third.id));

    let case = center.engine.cases().find_case(third.id).await.unwrap().unwrap();
    assert_eq!(case.status, CaseStatus::Assigned);
    assert_eq!(case.assigned_agent_id, Some(carol.agent_id));
}

#[tokio::test]
async fn test_agents_only_receive_their_work_groups() {
    let center = test_center().await;
    let alice = center.start_agent("alice", None, &["sales"]).await;
    let case = center.open_electronic_case("support").await;

    assert_eq!(center.current_case_of(&alice).await, None);
    assert!(center.engine.queue().is_queued(case.id).await.unwrap());

    let bob = center.start_agent("bob", None, &["support", "billing"]).await;
    assert_eq!(center.current_case_of(&bob).await, Some(case.id));
    assert!(!center.engine.queue().is_queued(case.id).await.unwrap());
}

#[tokio::test]
async fn test_live_call_beats_older_electronic_case() {
    let center = test_center().await;
    let alice = center.start_manual_agent("alice", &["support"]).await;

    let electronic = center.open_electronic_case("support").await;
    center.tick();
    let call = center.incoming_call("ch-1").await;
    let telephony = center.open_telephony_case("support", call.id).await;
    assert_eq!(center.current_case_of(&alice).await, None);

    center
        .engine
        .sessions()
        .assign_cases_automatically(alice.id, true, None)
        .await
        .unwrap();
    let report = center.engine.process_case_queue().await.unwrap();

    assert_eq!(report.assignments.len(), 1);
    assert_eq!(report.assignments[0].case_id, telephony.id);
    assert_eq!(report.assignments[0].class, AssignmentClass::Interactive);
    assert_eq!(report.assigned_count(AssignmentClass::Passive), 0);
    assert_eq!(center.current_case_of(&alice).await, Some(telephony.id));
    assert!(center.engine.queue().is_queued(electronic.id).await.unwrap());
}

#[tokio::test]
async fn test_agent_gets_next_case_once_ready_again() {
    let center = test_center().await;
    let alice = center.start_agent("alice", None, &["support"]).await;
    let first = center.open_electronic_case("support").await;
    center.tick();
    let second = center.open_electronic_case("support").await;
    assert_eq!(center.current_case_of(&alice).await, Some(first.id));
    assert!(center.engine.queue().is_queued(second.id).await.unwrap());

    center.tick();
    center.engine.cases().close_case(first.id, None).await.unwrap();
    let session = center.engine.sessions().find_session(alice.id).await.unwrap().unwrap();
    assert_eq!(session.status(), AgentSessionStatus::WrapUp);
    assert!(center.engine.queue().is_queued(second.id).await.unwrap());

    center.tick();
    center
        .engine
        .sessions()
        .update_agent_session_log_entry(alice.id, AgentSessionStatus::Ready, None, None)
        .await
        .unwrap();
    assert_eq!(center.current_case_of(&alice).await, Some(second.id));

    let closed = center.engine.cases().find_case(first.id).await.unwrap().unwrap();
    assert_eq!(closed.status, CaseStatus::Closed);
}

#[tokio::test]
async fn test_agent_on_break_is_skipped() {
    let center = test_center().await;
    let alice = center.start_agent("alice", None, &["support"]).await;
    center
        .engine
        .sessions()
        .update_agent_session_log_entry(alice.id, AgentSessionStatus::Break, None, None)
        .await
        .unwrap();

    let case = center.open_electronic_case("support").await;
    assert_eq!(center.current_case_of(&alice).await, None);

    let report = center.engine.process_case_queue().await.unwrap();
    assert!(report.assignments.is_empty());
    assert!(center.engine.queue().is_queued(case.id).await.unwrap());
}

#[tokio::test]
async fn test_assignment_is_broadcast() {
    let center = test_center().await;
    let alice = center.start_agent("alice", None, &["support"]).await;
    let mut rx = center.broadcaster.subscribe();

    let case = center.open_electronic_case("support").await;
    let messages = drain(&mut rx);

    let assigned = messages
        .iter()
        .find(|message| message.event == "sc.agentSession.caseAssigned")
        .expect("assignment should be broadcast");
    assert_eq!(assigned.channel, format!("sc.agentSession.{}", alice.id));
    assert_eq!(assigned.payload["caseId"], serde_json::json!(case.id));

    assert!(messages.iter().any(|message| message.event == "sc.queue.changed"));
    assert!(messages
        .iter()
        .any(|message| message.event == "sc.case.changed" && message.channel == format!("sc.case.{}", case.id)));
}

#[tokio::test]
async fn test_background_runner_assigns_cases() {
    let mut config = EngineConfig::default();
    config.matching.mode = MatchingMode::Background;
    config.matching.debounce_ms = 10;
    let mut center = test_center_with(config).await;
    center.engine.start().await.unwrap();

    let alice = center.start_agent("alice", None, &["support"]).await;
    let case = center.open_electronic_case("support").await;

    let mut assigned = None;
    for _ in 0..100 {
        assigned = center.current_case_of(&alice).await;
        if assigned.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(assigned, Some(case.id));

    center.engine.stop().await.unwrap();
    assert!(!center.engine.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_passes_assign_each_case_once() {
    let center = test_center().await;

    let mut cases = Vec::new();
    for _ in 0..10 {
        center.tick();
        cases.push(center.open_electronic_case("support").await);
    }
    let mut agents = Vec::new();
    for name in ["alice", "bob", "carol", "dave", "erin"] {
        let session = center.start_manual_agent(name, &["support"]).await;
        // Toggling emits no event, so nothing is matched yet
        center
            .engine
            .sessions()
            .assign_cases_automatically(session.id, true, None)
            .await
            .unwrap();
        agents.push(session);
    }
    assert_eq!(center.engine.queue().get_all().await.unwrap().len(), 10);

    let passes: Vec<_> = (0..8)
        .map(|_| {
            let matcher = Arc::clone(center.engine.matcher());
            tokio::spawn(async move { matcher.assign_cases_to_agents().await })
        })
        .collect();

    let mut total = 0;
    for pass in passes {
        total += pass.await.unwrap().unwrap().assignments.len();
    }
    assert_eq!(total, agents.len());

    let mut holders: HashMap<CaseId, usize> = HashMap::new();
    for agent in &agents {
        let held = center.current_case_of(agent).await.expect("every agent should hold a case");
        *holders.entry(held).or_default() += 1;
    }
    assert_eq!(holders.len(), agents.len());
    assert!(holders.values().all(|count| *count == 1));

    for case in &cases {
        let stored = center.engine.cases().find_case(case.id).await.unwrap().unwrap();
        let queued = center.engine.queue().is_queued(case.id).await.unwrap();
        assert_eq!(stored.status == CaseStatus::Assigned, holders.contains_key(&case.id));
        assert_ne!(queued, holders.contains_key(&case.id));
    }
}

#[tokio::test]
async fn test_try_match_rejects_case_that_left_the_queue() {
    let center = test_center().await;
    let alice = center.start_manual_agent("alice", &["support"]).await;
    let dequeued = center.open_electronic_case("support").await;
    center.tick();
    let closed = center.open_electronic_case("support").await;

    center.engine.queue().dequeue_by_case(dequeued.id).await.unwrap();
    center.engine.cases().close_case(closed.id, None).await.unwrap();
    center
        .engine
        .sessions()
        .assign_cases_automatically(alice.id, true, None)
        .await
        .unwrap();

    for case_id in [dequeued.id, closed.id] {
        let outcome = center
            .engine
            .matcher()
            .try_match(case_id, alice.id, AssignmentClass::Passive)
            .await
            .unwrap();
        assert!(matches!(outcome, MatchOutcome::CaseUnavailable));
    }

    assert_eq!(center.current_case_of(&alice).await, None);
    let dequeued = center.engine.cases().find_case(dequeued.id).await.unwrap().unwrap();
    assert_eq!(dequeued.status, CaseStatus::Open);
    assert_eq!(dequeued.assigned_agent_id, None);
    let closed = center.engine.cases().find_case(closed.id).await.unwrap().unwrap();
    assert_eq!(closed.status, CaseStatus::Closed);
}

#[tokio::test]
async fn test_try_match_rejects_unavailable_session() {
    let center = test_center().await;
    let ended = center.start_manual_agent("alice", &["support"]).await;
    center.engine.sessions().end_session(ended.id).await.unwrap();

    let busy = center.start_manual_agent("bob", &["support"]).await;
    let held = center.open_electronic_case("support").await;
    center
        .engine
        .sessions()
        .update_agent_session_log_entry(busy.id, AgentSessionStatus::Busy, Some(held.id), None)
        .await
        .unwrap();
    center
        .engine
        .sessions()
        .assign_cases_automatically(busy.id, true, None)
        .await
        .unwrap();

    center.tick();
    let waiting = center.open_electronic_case("support").await;
    assert!(center.engine.queue().is_queued(waiting.id).await.unwrap());

    for agent_session_id in [ended.id, busy.id] {
        let outcome = center
            .engine
            .matcher()
            .try_match(waiting.id, agent_session_id, AssignmentClass::Passive)
            .await
            .unwrap();
        assert!(matches!(outcome, MatchOutcome::SessionUnavailable));
    }

    assert!(center.engine.queue().is_queued(waiting.id).await.unwrap());
    assert_eq!(center.current_case_of(&busy).await, Some(held.id));
    let waiting = center.engine.cases().find_case(waiting.id).await.unwrap().unwrap();
    assert_eq!(waiting.status, CaseStatus::Open);
}
