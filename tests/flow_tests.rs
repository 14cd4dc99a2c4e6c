// Flow tests for switchboard
//
// Drive HierarchicalFlow end to end over the in-memory store with a
// scripted completion service.

mod common;

use common::mocks::{build_hierarchy, store, FailingExecutionStore, MockCompletion};
use rstest::rstest;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use switchboard::agents::specialist::GENERIC_FALLBACK;
use switchboard::agents::{
    FlowContext, FlowSettings, HierarchicalFlow, InboundMessage, RefinementPolicy,
};
use switchboard::db::{ExecutionStore, InMemoryStore};
use switchboard::hierarchy::{AgentKind, ScopeId};
use switchboard::memory::{BoundedHistory, HistoryLimits};
use switchboard::tools::KindToolExecutor;
use switchboard::types::AppError;

fn flow_with(
    store: Arc<InMemoryStore>,
    executions: Arc<dyn ExecutionStore>,
    completion: Arc<MockCompletion>,
    settings: FlowSettings,
    history: Option<Arc<BoundedHistory>>,
) -> HierarchicalFlow {
    let mut builder = FlowContext::builder()
        .repository(store)
        .executions(executions)
        .completion(completion)
        .tools(Arc::new(KindToolExecutor::new()))
        .settings(settings);
    if let Some(history) = history {
        builder = builder.history(history);
    }
    HierarchicalFlow::new(builder.build().expect("flow context"))
}

fn flow(store: Arc<InMemoryStore>, completion: Arc<MockCompletion>) -> HierarchicalFlow {
    flow_with(
        store.clone(),
        store,
        completion,
        FlowSettings::default(),
        None,
    )
}

fn message(scope: &str, text: &str) -> InboundMessage {
    InboundMessage::new(ScopeId::new(scope).unwrap(), text)
}

// ============================================================================
// Routing scenarios
// ============================================================================

#[tokio::test]
async fn test_router_answers_when_scope_has_no_departments() {
    let store = store();
    let ids = build_hierarchy(&store, "shop", &[]);
    let completion = Arc::new(MockCompletion::new().with_text("Hello from the front desk"));

    let outcome = flow(store.clone(), completion.clone())
        .handle(message("shop", "hi"))
        .await
        .unwrap();

    assert_eq!(outcome.reply, "Hello from the front desk");
    assert_eq!(outcome.chain.len(), 1);
    assert_eq!(outcome.chain[0].agent_id, ids.router);
    assert_eq!(outcome.responder.role, AgentKind::Router);
    assert_eq!(completion.structured_count(), 0);
    assert_eq!(completion.text_count(), 1);

    let records = store.executions();
    assert_eq!(records.len(), 1);
    assert!(records[0].success);
    assert_eq!(records[0].origin_agent_id, Some(ids.router.clone()));
    assert_eq!(outcome.execution_id, Some(records[0].id.clone()));
}

#[tokio::test]
async fn test_selected_department_without_specialists_answers() {
    let store = store();
    let ids = build_hierarchy(&store, "shop", &[0, 0]);
    let chosen = ids.departments[1].clone();
    let completion = Arc::new(
        MockCompletion::new()
            .with_selection(chosen.as_str())
            .with_text("Billing here, how can I help?"),
    );

    let outcome = flow(store.clone(), completion.clone())
        .handle(message("shop", "my invoice is wrong"))
        .await
        .unwrap();

    assert_eq!(outcome.reply, "Billing here, how can I help?");
    let chain: Vec<_> = outcome.chain.iter().map(|e| e.agent_id.clone()).collect();
    assert_eq!(chain, vec![ids.router.clone(), chosen]);
    assert_eq!(outcome.responder.role, AgentKind::Parent);
    // Department replies are not reviewed under the default policy.
    assert_eq!(completion.text_count(), 1);
}

#[tokio::test]
async fn test_specialist_reply_is_refined_by_router() {
    let store = store();
    let ids = build_hierarchy(&store, "shop", &[2]);
    let specialist = ids.specialists[0][1].clone();
    let completion = Arc::new(
        MockCompletion::new()
            .with_selection(specialist.as_str())
            .with_text("X")
            .with_text("Y"),
    );

    let outcome = flow(store.clone(), completion.clone())
        .handle(message("shop", "do you have size 42?"))
        .await
        .unwrap();

    assert_eq!(outcome.reply, "Y");
    let chain: Vec<_> = outcome.chain.iter().map(|e| e.agent_id.clone()).collect();
    assert_eq!(
        chain,
        vec![ids.router.clone(), ids.departments[0].clone(), specialist.clone()]
    );
    assert_eq!(outcome.responder.agent_id, specialist);

    // One department: no organization call. Two specialists: one call.
    assert_eq!(completion.structured_count(), 1);
    assert_eq!(completion.text_count(), 2);
    let review = completion.prompts().last().cloned().unwrap();
    assert!(review.contains("Draft reply:\nX"));
    assert!(review.contains("do you have size 42?"));

    let record = &store.executions()[0];
    assert_eq!(record.final_response.as_deref(), Some("Y"));
    assert_eq!(record.chain.len(), 3);
}

#[tokio::test]
async fn test_missing_router_is_not_found_and_logged() {
    let store = store();
    let completion = Arc::new(MockCompletion::new());

    let err = flow(store.clone(), completion.clone())
        .handle(message("abc123", "hello?"))
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(err.to_string().contains("abc123"));
    assert_eq!(completion.text_count(), 0);

    let records = store.executions();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert!(records[0].chain.is_empty());
    assert!(records[0].origin_agent_id.is_none());
    assert!(records[0].error_message.as_deref().unwrap().contains("abc123"));
    assert_eq!(err.execution_id, Some(records[0].id.clone()));
}

#[tokio::test]
async fn test_inactive_router_is_not_found() {
    let store = store();
    let ids = build_hierarchy(&store, "shop", &[1]);
    store.with_arena(|arena| arena.deactivate(&ids.router).unwrap());

    let err = flow(store.clone(), Arc::new(MockCompletion::new()))
        .handle(message("shop", "hello?"))
        .await
        .unwrap_err();

    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_failing_completion_still_completes() {
    let store = store();
    let ids = build_hierarchy(&store, "shop", &[0, 0]);
    let completion = Arc::new(MockCompletion::failing());

    let outcome = flow(store.clone(), completion.clone())
        .handle(message("shop", "anyone there?"))
        .await
        .unwrap();

    // Lowest priority value wins the fallback.
    assert_eq!(outcome.chain.len(), 2);
    assert_eq!(outcome.chain[1].agent_id, ids.departments[0]);
    assert_eq!(outcome.reply, GENERIC_FALLBACK);

    let records = store.executions();
    assert_eq!(records.len(), 1);
    assert!(records[0].success);
}

#[tokio::test]
async fn test_invalid_selection_falls_back_to_router() {
    let store = store();
    let ids = build_hierarchy(&store, "shop", &[1, 1]);
    let completion = Arc::new(
        MockCompletion::new()
            .with_selection("not-an-object-id")
            .with_text("I can help with that myself"),
    );

    let outcome = flow(store, completion)
        .handle(message("shop", "hello"))
        .await
        .unwrap();

    assert_eq!(outcome.reply, "I can help with that myself");
    assert_eq!(outcome.chain.len(), 1);
    assert_eq!(outcome.responder.agent_id, ids.router);
}

#[tokio::test]
async fn test_missing_specialist_selection_falls_back_to_department() {
    let store = store();
    let ids = build_hierarchy(&store, "shop", &[3]);
    let completion = Arc::new(
        MockCompletion::new()
            .with_structured(serde_json::json!({ "agent": "whoever" }))
            .with_text("Department answer"),
    );

    let outcome = flow(store, completion)
        .handle(message("shop", "hello"))
        .await
        .unwrap();

    assert_eq!(outcome.reply, "Department answer");
    assert_eq!(outcome.responder.agent_id, ids.departments[0]);
    assert_eq!(outcome.chain.len(), 2);
}

// ============================================================================
// Chain ordering and logging
// ============================================================================

#[rstest]
#[case::router_only(&[])]
#[case::single_department(&[0])]
#[case::single_specialist(&[1])]
#[case::wide(&[2, 3, 0])]
#[tokio::test]
async fn test_chain_depth_never_decreases(#[case] shape: &[usize]) {
    let store = store();
    build_hierarchy(&store, "shop", shape);
    let completion = Arc::new(MockCompletion::failing());

    let outcome = flow(store.clone(), completion)
        .handle(message("shop", "hi"))
        .await
        .unwrap();

    let depths: Vec<u8> = outcome.chain.iter().map(|e| e.role.depth()).collect();
    assert!(depths.windows(2).all(|w| w[0] < w[1]), "{:?}", depths);
    assert_eq!(outcome.chain[0].role, AgentKind::Router);

    let records = store.executions();
    assert_eq!(records.len(), 1);
    assert!(records[0].chain_is_ordered());
}

#[tokio::test]
async fn test_one_record_per_message() {
    let store = store();
    build_hierarchy(&store, "shop", &[1]);
    let flow = flow(store.clone(), Arc::new(MockCompletion::new()));

    for i in 0..3 {
        flow.handle(message("shop", &format!("message {}", i)))
            .await
            .unwrap();
    }
    let _ = flow.handle(message("elsewhere", "lost")).await;

    let records = store.executions();
    assert_eq!(records.len(), 4);
    assert_eq!(records.iter().filter(|r| r.success).count(), 3);
}

#[tokio::test]
async fn test_logging_failure_does_not_fail_flow() {
    let store = store();
    build_hierarchy(&store, "shop", &[]);
    let failing = Arc::new(FailingExecutionStore::default());
    let flow = flow_with(
        store,
        failing.clone(),
        Arc::new(MockCompletion::new().with_text("still here")),
        FlowSettings::default(),
        None,
    );

    let outcome = flow.handle(message("shop", "hi")).await.unwrap();

    assert_eq!(outcome.reply, "still here");
    assert!(outcome.execution_id.is_none());
    assert_eq!(failing.attempts.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Timeout and cancellation
// ============================================================================

#[tokio::test]
async fn test_request_timeout_writes_failed_record() {
    let store = store();
    let ids = build_hierarchy(&store, "shop", &[]);
    let completion = Arc::new(MockCompletion::new().with_delay(Duration::from_millis(500)));
    let settings = FlowSettings {
        request_timeout: Duration::from_millis(50),
        ..FlowSettings::default()
    };
    let flow = flow_with(store.clone(), store.clone(), completion, settings, None);

    let err = flow.handle(message("shop", "slow")).await.unwrap_err();

    assert!(matches!(err.source, AppError::Timeout(_)));
    let records = store.executions();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert_eq!(records[0].chain.len(), 1);
    assert_eq!(records[0].chain[0].agent_id, ids.router);
    assert_eq!(err.execution_id, Some(records[0].id.clone()));
}

#[tokio::test]
async fn test_cancellation_stops_flow() {
    let store = store();
    build_hierarchy(&store, "shop", &[]);
    let completion = Arc::new(MockCompletion::new().with_delay(Duration::from_secs(5)));
    let flow = flow(store.clone(), completion);

    let err = flow
        .handle_with_cancel(
            message("shop", "never mind"),
            tokio::time::sleep(Duration::from_millis(30)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err.source, AppError::Cancelled(_)));
    let records = store.executions();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert!(records[0].error_message.as_deref().unwrap().contains("cancelled"));
}

// ============================================================================
// History and refinement policy
// ============================================================================

#[tokio::test]
async fn test_history_is_rendered_into_next_turn() {
    let store = store();
    build_hierarchy(&store, "shop", &[]);
    let history = Arc::new(BoundedHistory::new(HistoryLimits::default()).unwrap());
    let completion = Arc::new(
        MockCompletion::new()
            .with_text("We open at 9")
            .with_text("Until 6"),
    );
    let flow = flow_with(
        store.clone(),
        store,
        completion.clone(),
        FlowSettings::default(),
        Some(history.clone()),
    );

    flow.handle(message("shop", "when do you open?").with_conversation("5511999"))
        .await
        .unwrap();
    flow.handle(message("shop", "and close?").with_conversation("5511999"))
        .await
        .unwrap();

    let prompts = completion.prompts();
    assert!(!prompts[0].contains("Previous conversation"));
    assert!(prompts[1].contains("--- Previous conversation ---"));
    assert!(prompts[1].contains("User: when do you open?"));
    assert!(prompts[1].contains("Agent: We open at 9"));
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_history_is_kept_per_conversation() {
    let store = store();
    build_hierarchy(&store, "shop", &[]);
    let history = Arc::new(BoundedHistory::default());
    let completion = Arc::new(MockCompletion::new());
    let flow = flow_with(
        store.clone(),
        store,
        completion.clone(),
        FlowSettings::default(),
        Some(history.clone()),
    );

    flow.handle(message("shop", "first customer").with_conversation("a"))
        .await
        .unwrap();
    flow.handle(message("shop", "second customer").with_conversation("b"))
        .await
        .unwrap();

    assert!(!completion.prompts()[1].contains("first customer"));
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_failed_flow_is_not_remembered() {
    let store = store();
    let history = Arc::new(BoundedHistory::default());
    let flow = flow_with(
        store.clone(),
        store,
        Arc::new(MockCompletion::new()),
        FlowSettings::default(),
        Some(history.clone()),
    );

    let _ = flow.handle(message("nowhere", "hello")).await;
    assert!(history.is_empty());
}

#[tokio::test]
async fn test_any_delegate_policy_reviews_department_reply() {
    let store = store();
    build_hierarchy(&store, "shop", &[0]);
    let completion = Arc::new(
        MockCompletion::new()
            .with_text("draft")
            .with_text("polished"),
    );
    let settings = FlowSettings {
        refinement: RefinementPolicy::AnyDelegate,
        ..FlowSettings::default()
    };
    let flow = flow_with(store.clone(), store, completion.clone(), settings, None);

    let outcome = flow.handle(message("shop", "hi")).await.unwrap();

    assert_eq!(outcome.reply, "polished");
    assert_eq!(outcome.responder.role, AgentKind::Parent);
    assert_eq!(completion.text_count(), 2);
}

#[tokio::test]
async fn test_failed_refinement_keeps_specialist_draft() {
    let store = store();
    build_hierarchy(&store, "shop", &[1]);
    let completion = Arc::new(
        MockCompletion::new()
            .with_text("the draft")
            .with_text_error("provider down"),
    );

    let outcome = flow(store, completion)
        .handle(message("shop", "hi"))
        .await
        .unwrap();

    assert_eq!(outcome.reply, "the draft");
}
