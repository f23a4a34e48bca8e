//! 规则引擎集成测试
//!
//! 测试规则加载、编译、评估和动作执行的完整流程。

use pacing_shared::{EngineConfig, ExecutionStrategy};
use rule_engine::{
    ActionKind, ErrorKind, FALLBACK_RULE, InMemorySource, JsonFileSource, MemorySink,
    Orchestrator, RuleCompiler, RuleDefinition, RunSummary,
};
use serde_json::{Value, json};
use std::sync::Arc;

const STRATEGIES: [ExecutionStrategy; 2] = [
    ExecutionStrategy::RuleParallel,
    ExecutionStrategy::RecordSequential,
];

fn rule(value: Value) -> RuleDefinition {
    serde_json::from_value(value).unwrap()
}

fn under_pacing_rule() -> RuleDefinition {
    rule(json!({
        "name": "under_pacing",
        "condition": {"all": [
            {"field": "impressions_delivered", "operator": "<", "value_field": "impression_goal"}
        ]},
        "actions": [
            {"type": "update", "target_field": "pacing_osi", "expression": "impressions_delivered / impression_goal"}
        ]
    }))
}

async fn run_with(
    strategy: ExecutionStrategy,
    rules: Vec<RuleDefinition>,
    records: Vec<Value>,
) -> (RunSummary, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let config = EngineConfig {
        strategy,
        ..Default::default()
    };
    let orchestrator = Orchestrator::new(config, sink.clone());
    (orchestrator.run(rules, records).await, sink)
}

#[tokio::test]
async fn test_pacing_osi_updated_from_expression() {
    for strategy in STRATEGIES {
        let (summary, sink) = run_with(
            strategy,
            vec![under_pacing_rule()],
            vec![json!({"campaign_id": "c-1", "impressions_delivered": 500, "impression_goal": 1000})],
        )
        .await;

        assert!(summary.is_success(), "{}: {:?}", strategy, summary.errors);
        assert_eq!(summary.matched_pairs, 1);

        let outcome = &summary.outcomes[0];
        assert!(outcome.matched);
        assert_eq!(outcome.actions_applied.len(), 1);
        assert_eq!(outcome.actions_applied[0].target.as_deref(), Some("pacing_osi"));
        assert_eq!(outcome.actions_applied[0].value, Some(json!(0.5)));
        assert_eq!(
            outcome.updated_fact.as_ref().unwrap()["pacing_osi"],
            json!(0.5)
        );

        let updates = sink.records_of(ActionKind::Update);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].fact_id.as_deref(), Some("c-1"));
    }
}

#[tokio::test]
async fn test_all_matching_rules_reported() {
    let second = rule(json!({
        "name": "behind_goal_alert",
        "condition": {"any": [
            {"field": "impressions_delivered", "operator": "<=", "value": 600},
            {"field": "priority_level", "operator": ">", "value": 100}
        ]},
        "actions": [{"type": "alert", "message": "behind goal"}]
    }));

    for strategy in STRATEGIES {
        let (summary, sink) = run_with(
            strategy,
            vec![under_pacing_rule(), second.clone()],
            vec![json!({"campaign_id": 7, "impressions_delivered": 500, "impression_goal": 1000})],
        )
        .await;

        assert_eq!(summary.total_pairs, 2);
        assert_eq!(summary.matched_pairs, 2);
        assert_eq!(summary.actions_succeeded, 2);
        assert_eq!(summary.outcomes_for("under_pacing").count(), 1);
        assert_eq!(summary.outcomes_for("behind_goal_alert").count(), 1);
        assert!(summary.outcomes.iter().all(|o| o.actions_applied.len() == 1));
        assert_eq!(sink.len(), 2);
    }
}

#[tokio::test]
async fn test_failed_update_leaves_fact_and_later_actions_run() {
    let rule = rule(json!({
        "name": "broken_update",
        "condition": {"all": [{"field": "impressions_delivered", "operator": ">", "value": 0}]},
        "actions": [
            {"type": "update", "target_field": "pacing_osi", "expression": "impressions_delivered / budget_cap"},
            {"type": "alert", "message": "still runs"}
        ]
    }));
    let record = json!({"campaign_id": 1, "impressions_delivered": 500, "impression_goal": 1000});

    for strategy in STRATEGIES {
        let (summary, sink) = run_with(strategy, vec![rule.clone()], vec![record.clone()]).await;

        assert!(!summary.is_success());
        assert_eq!(summary.error_count(ErrorKind::ExpressionEvaluation), 1);
        let error = &summary.errors[0];
        assert_eq!(error.rule_name.as_deref(), Some("broken_update"));
        assert_eq!(error.action, Some(ActionKind::Update));
        assert!(error.fragment.as_deref().unwrap().contains("budget_cap"));

        let outcome = &summary.outcomes[0];
        assert!(outcome.matched);
        assert!(outcome.updated_fact.is_none());
        assert_eq!(outcome.actions_applied.len(), 1);
        assert_eq!(outcome.actions_applied[0].action, ActionKind::Alert);

        assert!(sink.records_of(ActionKind::Update).is_empty());
        assert_eq!(sink.records_of(ActionKind::Alert).len(), 1);
    }
}

#[tokio::test]
async fn test_fallback_for_unidentified_fact() {
    for strategy in STRATEGIES {
        let (summary, sink) = run_with(
            strategy,
            vec![under_pacing_rule()],
            vec![json!({"impressions_delivered": 5000, "impression_goal": 1000})],
        )
        .await;

        assert_eq!(summary.fallback_matches, 1);
        assert_eq!(summary.total_pairs, 1);
        let fallback: Vec<_> = summary.outcomes_for(FALLBACK_RULE).collect();
        assert_eq!(fallback.len(), 1);
        assert!(fallback[0].matched);
        assert!(fallback[0].fallback);
        assert!(fallback[0].actions_applied.is_empty());
        assert!(fallback[0].fact_id.is_none());
        assert!(sink.is_empty());
    }
}

#[tokio::test]
async fn test_two_rules_three_facts() {
    let rules = vec![
        under_pacing_rule(),
        rule(json!({
            "name": "needs_recipient",
            "condition": {"all": [{"field": "priority_level", "operator": "==", "value": 9}]},
            "actions": [
                {"type": "notify", "recipient": " ", "template": "campaign ${campaign_name}"},
                {"type": "redistribute", "params": {"shift": 0.2}}
            ]
        })),
    ];
    let records = vec![
        json!({"campaign_id": 1, "campaign_name": "spring", "impressions_delivered": 100, "impression_goal": 1000, "priority_level": 9}),
        json!({"campaign_id": 2, "campaign_name": "summer", "impressions_delivered": 900, "impression_goal": 1000, "priority_level": 9}),
        json!({"campaign_id": 3, "campaign_name": "autumn", "impressions_delivered": 2000, "impression_goal": 1000, "priority_level": 1}),
    ];

    for strategy in STRATEGIES {
        let (summary, sink) = run_with(strategy, rules.clone(), records.clone()).await;

        assert_eq!(summary.total_pairs, 6, "{}", strategy);
        assert_eq!(summary.matched_pairs, 4);
        assert_eq!(summary.error_count(ErrorKind::MissingRecipient), 2);
        // 每个匹配对中失败的通知不影响其它动作
        assert_eq!(summary.actions_succeeded, 4);
        assert_eq!(sink.records_of(ActionKind::Redistribute).len(), 2);
        assert_eq!(sink.records_of(ActionKind::Update).len(), 2);
    }
}

#[tokio::test]
async fn test_unsupported_operator_never_evaluated() {
    let bad = rule(json!({
        "name": "regex_rule",
        "condition": {"all": [{"field": "campaign_name", "operator": "matches", "value": "^s"}]},
        "actions": [{"type": "alert", "message": "never"}]
    }));

    let err = RuleCompiler::new().compile(&bad).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedOperator);

    for strategy in STRATEGIES {
        let (summary, sink) = run_with(
            strategy,
            vec![bad.clone(), under_pacing_rule()],
            vec![json!({"campaign_id": 1, "campaign_name": "spring", "impressions_delivered": 1, "impression_goal": 2})],
        )
        .await;

        assert_eq!(summary.rules_registered, 1);
        assert_eq!(summary.total_pairs, 1);
        assert_eq!(summary.outcomes_for("regex_rule").count(), 0);
        assert_eq!(summary.error_count(ErrorKind::UnsupportedOperator), 1);
        assert!(sink.records_of(ActionKind::Alert).is_empty());
    }
}

#[tokio::test]
async fn test_run_from_json_files() {
    let dir = std::env::temp_dir().join(format!("rule-engine-it-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let rules_path = dir.join("rules.json");
    let records_path = dir.join("records.json");

    std::fs::write(
        &rules_path,
        json!([
            {"id": 1, "type": "pacing", "rule": {
                "name": "under_pacing",
                "condition": {"all": [
                    {"field": "impressions_delivered", "operator": "<", "value_field": "impression_goal"}
                ]},
                "actions": [
                    {"type": "update", "target_field": "pacing_osi", "expression": "impressions_delivered / impression_goal"}
                ]
            }},
            {"name": "missing_condition", "actions": []}
        ])
        .to_string(),
    )
    .unwrap();
    std::fs::write(
        &records_path,
        json!({
            "campaigns": [{"id": 10, "name": "spring"}],
            "line_items": [
                {"campaign_id": 10, "line_item_id": "li-1", "impressions_delivered": 250, "impression_goal": 1000},
                {"campaign_id": 10, "line_item_id": "li-2", "impressions_delivered": 2000, "impression_goal": 1000},
                {"campaign_id": 99, "line_item_id": "orphan", "impressions_delivered": 1, "impression_goal": 2}
            ]
        })
        .to_string(),
    )
    .unwrap();

    let source = JsonFileSource::new(&rules_path, &records_path);
    let orchestrator = Orchestrator::new(EngineConfig::default(), Arc::new(MemorySink::new()));
    let summary = orchestrator.run_from_source(&source).await.unwrap();

    assert_eq!(summary.records_evaluated, 2);
    assert_eq!(summary.total_pairs, 2);
    assert_eq!(summary.matched_pairs, 1);
    assert_eq!(summary.error_count(ErrorKind::Compile), 1);

    let matched = summary.outcomes.iter().find(|o| o.matched).unwrap();
    assert_eq!(
        matched.updated_fact.as_ref().unwrap()["pacing_osi"],
        json!(0.25)
    );
    assert_eq!(
        matched.updated_fact.as_ref().unwrap()["campaign_name"],
        json!("spring")
    );

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_summary_serializes_error_codes() {
    let source = InMemorySource::new(
        vec![rule(json!({
            "name": "notify_without_recipient",
            "condition": {"all": [{"field": "campaign_id", "operator": "!=", "value": null}]},
            "actions": [{"type": "notify", "template": "hi"}]
        }))],
        vec![json!({"campaign_id": 1})],
    );
    let orchestrator = Orchestrator::new(EngineConfig::default(), Arc::new(MemorySink::new()));
    let summary = orchestrator.run_from_source(&source).await.unwrap();

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["errors"][0]["kind"], "MISSING_RECIPIENT");
    assert_eq!(json["matched_pairs"], 1);
    assert_eq!(json["strategy"], "record_sequential");
}
