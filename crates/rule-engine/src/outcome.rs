//! 评估结果与运行汇总

use crate::error::{ActionError, ErrorKind, RuleError};
use crate::models::ActionKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// 单个动作的执行结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub action: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ActionResult {
    pub fn new(action: ActionKind) -> Self {
        Self {
            action,
            target: None,
            value: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }
}

/// 运行中记录的错误
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fact_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionKind>,
    /// 表达式错误对应的子表达式
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragment: Option<String>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            rule_name: None,
            fact_id: None,
            action: None,
            fragment: None,
        }
    }

    pub fn from_action_error(action: ActionKind, err: &ActionError) -> Self {
        Self {
            action: Some(action),
            fragment: err.fragment().map(str::to_string),
            ..Self::new(err.kind(), err.to_string())
        }
    }

    pub fn from_rule_error(err: &RuleError) -> Self {
        Self::new(err.kind(), err.to_string())
    }

    pub fn with_rule(mut self, rule_name: impl Into<String>) -> Self {
        self.rule_name = Some(rule_name.into());
        self
    }

    pub fn with_fact(mut self, fact_id: impl Into<String>) -> Self {
        self.fact_id = Some(fact_id.into());
        self
    }
}

/// 一个 (规则, 事实) 对的评估结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationOutcome {
    pub rule_name: String,
    pub fact_id: Option<String>,
    pub fact_index: usize,
    pub matched: bool,
    /// 回退规则产生的结果
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
    pub actions_applied: Vec<ActionResult>,
    pub errors: Vec<ErrorRecord>,
    /// 至少一个更新动作成功时，更新后的事实副本
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_fact: Option<Value>,
}

impl EvaluationOutcome {
    pub fn new(rule_name: impl Into<String>, fact_id: Option<String>, fact_index: usize) -> Self {
        Self {
            rule_name: rule_name.into(),
            fact_id,
            fact_index,
            matched: false,
            fallback: false,
            actions_applied: Vec::new(),
            errors: Vec::new(),
            updated_fact: None,
        }
    }
}

/// 一次运行的汇总
///
/// "运行结束"与"运行成功"是两回事：只要有任何错误，`is_success` 即为 false。
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub strategy: String,
    pub started_at: DateTime<Utc>,
    pub rules_registered: usize,
    pub records_evaluated: usize,
    pub total_pairs: usize,
    pub matched_pairs: usize,
    pub fallback_matches: usize,
    pub actions_succeeded: usize,
    pub actions_failed: usize,
    pub skipped_records: usize,
    pub errors: Vec<ErrorRecord>,
    pub outcomes: Vec<EvaluationOutcome>,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn new(strategy: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            strategy: strategy.into(),
            started_at: Utc::now(),
            rules_registered: 0,
            records_evaluated: 0,
            total_pairs: 0,
            matched_pairs: 0,
            fallback_matches: 0,
            actions_succeeded: 0,
            actions_failed: 0,
            skipped_records: 0,
            errors: Vec::new(),
            outcomes: Vec::new(),
            elapsed_ms: 0,
        }
    }

    /// 合并一个评估结果
    pub fn record(&mut self, outcome: EvaluationOutcome) {
        if outcome.fallback {
            self.fallback_matches += 1;
        } else {
            self.total_pairs += 1;
            if outcome.matched {
                self.matched_pairs += 1;
            }
        }
        self.actions_succeeded += outcome.actions_applied.len();
        self.actions_failed += outcome
            .errors
            .iter()
            .filter(|e| e.action.is_some())
            .count();
        self.errors.extend(outcome.errors.iter().cloned());
        self.outcomes.push(outcome);
    }

    pub fn record_error(&mut self, error: ErrorRecord) {
        self.errors.push(error);
    }

    /// 按 (事实位置, 规则名) 排序结果，使输出与调度顺序无关
    pub fn sort_outcomes(&mut self) {
        self.outcomes
            .sort_by(|a, b| (a.fact_index, &a.rule_name).cmp(&(b.fact_index, &b.rule_name)));
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error_count(&self, kind: ErrorKind) -> usize {
        self.errors.iter().filter(|e| e.kind == kind).count()
    }

    pub fn outcomes_for<'a>(
        &'a self,
        rule_name: &'a str,
    ) -> impl Iterator<Item = &'a EvaluationOutcome> + 'a {
        self.outcomes.iter().filter(move |o| o.rule_name == rule_name)
    }
}
