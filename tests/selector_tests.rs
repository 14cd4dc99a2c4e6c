// Selector tests for switchboard
//
// AgentSelector against a stubbed completion service: validation of the
// returned ID, short-circuits and the priority fallback.

mod common;

use common::mocks::MockCompletion;
use rstest::rstest;
use serde_json::json;
use std::sync::Arc;
use switchboard::agents::{AgentSelector, SelectionKind};
use switchboard::hierarchy::{Agent, GenerationConfig, ScopeId};

fn router() -> Agent {
    Agent::router(&ScopeId::new("shop").unwrap(), "Front Desk", "You greet customers.")
}

fn departments(router: &Agent) -> Vec<Agent> {
    vec![
        Agent::department(router, "sales", "Sales", "Sells things").with_priority(2),
        Agent::department(router, "support", "Support", "Fixes things").with_priority(0),
        Agent::department(router, "billing", "Billing", "").with_priority(1),
    ]
}

#[rstest]
#[case::empty("")]
#[case::too_short("abc123")]
#[case::uppercase("65F0A1B2C3D4E5F6A7B8C9D0")]
#[case::not_hex("zzzzzzzzzzzzzzzzzzzzzzzz")]
#[case::too_long("65f0a1b2c3d4e5f6a7b8c9d0ff")]
#[case::well_formed_unknown("65f0a1b2c3d4e5f6a7b8c9d0")]
#[tokio::test]
async fn test_malformed_or_unknown_id_selects_nothing(#[case] returned: &str) {
    let router = router();
    let candidates = departments(&router);
    let completion = Arc::new(MockCompletion::new().with_selection(returned));
    let selector = AgentSelector::new(completion.clone());

    let selected = selector
        .select(&router, &candidates, "hi", SelectionKind::Organization)
        .await;

    assert!(selected.is_none());
    assert_eq!(completion.structured_count(), 1);
}

#[rstest]
#[case::wrong_field(json!({ "agent": "x" }))]
#[case::extra_field(json!({ "agent_id": "x", "reason": "because" }))]
#[case::not_an_object(json!("65f0a1b2c3d4e5f6a7b8c9d0"))]
#[case::number(json!({ "agent_id": 42 }))]
#[tokio::test]
async fn test_wrong_output_shape_selects_nothing(#[case] output: serde_json::Value) {
    let router = router();
    let candidates = departments(&router);
    let selector = AgentSelector::new(Arc::new(MockCompletion::new().with_structured(output)));

    let selected = selector
        .select(&router, &candidates, "hi", SelectionKind::Organization)
        .await;

    assert!(selected.is_none());
}

#[tokio::test]
async fn test_valid_id_selects_candidate() {
    let router = router();
    let candidates = departments(&router);
    let target = candidates[2].clone();
    let padded = format!("  {}\n", target.id);
    let completion = Arc::new(MockCompletion::new().with_selection(&padded));
    let selector = AgentSelector::new(completion.clone());

    let selected = selector
        .select(&router, &candidates, "my invoice", SelectionKind::Organization)
        .await
        .unwrap();

    assert_eq!(selected.id, target.id);
    assert_eq!(completion.temperatures(), vec![0.1]);
    assert_eq!(completion.systems(), vec![Some("You greet customers.".to_string())]);
}

#[tokio::test]
async fn test_prompt_lists_every_candidate() {
    let router = router();
    let candidates = departments(&router);
    let completion = Arc::new(MockCompletion::new().with_selection("nope"));
    let selector = AgentSelector::new(completion.clone());

    selector
        .select(&router, &candidates, "where is my parcel?", SelectionKind::Organization)
        .await;

    let prompt = completion.prompts().remove(0);
    for candidate in &candidates {
        assert!(prompt.contains(&format!("ID: {}", candidate.id)), "{}", prompt);
    }
    assert!(prompt.contains("where is my parcel?"));
    // Billing has no persona, so it gets a synthesized description.
    assert!(prompt.contains("Principal agent of department billing"));
}

#[rstest]
#[case::organization(SelectionKind::Organization)]
#[case::specialist(SelectionKind::Specialist)]
#[tokio::test]
async fn test_empty_candidates_skip_model(#[case] kind: SelectionKind) {
    let completion = Arc::new(MockCompletion::new());
    let selector = AgentSelector::new(completion.clone());

    let selected = selector.select(&router(), &[], "hi", kind).await;

    assert!(selected.is_none());
    assert_eq!(completion.structured_count(), 0);
    assert_eq!(completion.text_count(), 0);
}

#[tokio::test]
async fn test_single_candidate_skips_model() {
    let router = router();
    let only = vec![Agent::department(&router, "support", "Support", "")];
    let completion = Arc::new(MockCompletion::failing());
    let selector = AgentSelector::new(completion.clone());

    let selected = selector
        .select(&router, &only, "hi", SelectionKind::Organization)
        .await
        .unwrap();

    assert_eq!(selected.id, only[0].id);
    assert_eq!(completion.structured_count(), 0);
}

#[tokio::test]
async fn test_failure_falls_back_to_lowest_priority() {
    let router = router();
    let candidates = departments(&router);
    let completion = Arc::new(MockCompletion::failing());
    let selector = AgentSelector::new(completion.clone());

    for _ in 0..5 {
        let selected = selector
            .select(&router, &candidates, "hi", SelectionKind::Organization)
            .await
            .unwrap();
        assert_eq!(selected.name, "Support");
    }
    assert_eq!(completion.structured_count(), 5);
}

#[tokio::test]
async fn test_fallback_ties_keep_input_order() {
    let router = router();
    let candidates = vec![
        Agent::department(&router, "a", "First", "").with_priority(1),
        Agent::department(&router, "b", "Second", "").with_priority(1),
    ];
    let selector = AgentSelector::new(Arc::new(MockCompletion::failing()));

    let selected = selector
        .select(&router, &candidates, "hi", SelectionKind::Organization)
        .await
        .unwrap();

    assert_eq!(selected.name, "First");
}

#[tokio::test]
async fn test_selection_temperature_overrides_agent_config() {
    let router = router().with_config(GenerationConfig {
        model: Some("gpt-4o-mini".to_string()),
        temperature: Some(0.9),
        ..Default::default()
    });
    let candidates = departments(&router);
    let completion = Arc::new(MockCompletion::new().with_selection(candidates[0].id.as_str()));
    let selector = AgentSelector::new(completion.clone());

    selector
        .select(&router, &candidates, "hi", SelectionKind::Organization)
        .await
        .unwrap();

    // Selection always runs cold, whatever the agent's own temperature.
    assert_eq!(completion.temperatures(), vec![0.1]);
}
