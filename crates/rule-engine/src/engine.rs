//! 规则引擎
//!
//! 引擎实例持有私有的规则注册表，按注册顺序保存编译后的规则。一次运行期间
//! 注册表只读，可通过 `Arc` 在任务间共享。

use crate::actions::ActionExecutor;
use crate::compiler::{CompiledRule, RuleCompiler};
use crate::error::{Result, RuleError};
use crate::fact::Fact;
use crate::models::RuleDefinition;
use crate::outcome::EvaluationOutcome;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// 回退规则名称：事实缺少识别键时触发，不执行任何动作
pub const FALLBACK_RULE: &str = "default";

/// 评估单条规则的条件，不执行动作
pub fn evaluate_rule(rule: &CompiledRule, fact: &Fact) -> EvaluationOutcome {
    let mut outcome = EvaluationOutcome::new(rule.name(), fact.id().map(str::to_string), fact.index());
    outcome.matched = rule.matches(fact);
    debug!(
        rule_name = %rule.name(),
        fact_id = %fact.label(),
        matched = outcome.matched,
        "规则评估完成"
    );
    outcome
}

/// 对已匹配的结果执行规则动作，动作作用于事实的工作副本
pub async fn apply_actions(
    rule: &CompiledRule,
    fact: &Fact,
    outcome: &mut EvaluationOutcome,
    executor: &ActionExecutor,
) {
    if !outcome.matched || rule.actions().is_empty() {
        return;
    }

    let report = executor.execute_all(rule, Some(fact.clone())).await;
    outcome.actions_applied.extend(report.applied);
    outcome.errors.extend(report.errors);
    if report.updated {
        outcome.updated_fact = report.fact.map(Fact::into_value);
    }
}

/// 回退规则：事实没有任何识别键时产生一个已匹配、无动作的结果
pub fn fallback_outcome(fact: &Fact) -> Option<EvaluationOutcome> {
    if fact.id().is_some() {
        return None;
    }

    info!(fact_id = %fact.label(), "事实缺少识别键，触发回退规则");
    let mut outcome = EvaluationOutcome::new(FALLBACK_RULE, None, fact.index());
    outcome.matched = true;
    outcome.fallback = true;
    Some(outcome)
}

/// 规则引擎
#[derive(Debug, Default)]
pub struct RuleEngine {
    compiler: RuleCompiler,
    rules: Vec<Arc<CompiledRule>>,
    names: HashSet<String>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 编译并注册规则
    #[instrument(skip(self, definition), fields(rule_name = %definition.name))]
    pub fn register(&mut self, definition: &RuleDefinition) -> Result<()> {
        self.ensure_unique(&definition.name)?;
        let compiled = self.compiler.compile(definition)?;
        self.insert(compiled);
        Ok(())
    }

    /// 批量注册，单条失败不影响其它规则
    #[instrument(skip(self, definitions))]
    pub fn register_batch(&mut self, definitions: &[RuleDefinition]) -> Vec<(String, RuleError)> {
        let mut errors = Vec::new();

        for definition in definitions {
            if let Err(e) = self.register(definition) {
                warn!(rule_name = %definition.name, error = %e, "规则注册失败");
                errors.push((definition.name.clone(), e));
            }
        }

        info!(
            "批量注册完成: {} 成功, {} 失败",
            definitions.len() - errors.len(),
            errors.len()
        );
        errors
    }

    fn ensure_unique(&self, name: &str) -> Result<()> {
        if name == FALLBACK_RULE || self.names.contains(name) {
            return Err(RuleError::DuplicateRuleName(name.to_string()));
        }
        Ok(())
    }

    fn insert(&mut self, rule: CompiledRule) {
        info!(
            rule_name = %rule.name(),
            actions = rule.actions().len(),
            fields = rule.required_fields.len(),
            "规则已注册"
        );
        self.names.insert(rule.name().to_string());
        self.rules.push(Arc::new(rule));
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<CompiledRule>> {
        self.rules.iter().find(|r| r.name() == name).cloned()
    }

    /// 按注册顺序返回规则
    pub fn rules(&self) -> &[Arc<CompiledRule>] {
        &self.rules
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// 按注册顺序评估所有规则的条件，不执行动作
    pub fn evaluate<'a>(
        &'a self,
        fact: &'a Fact,
    ) -> impl Iterator<Item = (&'a Arc<CompiledRule>, EvaluationOutcome)> + 'a {
        self.rules
            .iter()
            .map(move |rule| (rule, evaluate_rule(rule, fact)))
    }

    /// 按注册顺序评估所有规则并执行所有匹配规则的动作
    ///
    /// 每条规则产生一个结果；事实缺少识别键时额外附加回退规则的结果。
    #[instrument(skip_all, fields(fact_id = %fact.label()))]
    pub async fn dispatch(&self, fact: &Fact, executor: &ActionExecutor) -> Vec<EvaluationOutcome> {
        let mut outcomes = Vec::with_capacity(self.rules.len() + 1);

        for (rule, mut outcome) in self.evaluate(fact) {
            apply_actions(rule, fact, &mut outcome, executor).await;
            outcomes.push(outcome);
        }

        outcomes.extend(fallback_outcome(fact));
        outcomes
    }

    /// 注册表统计信息
    pub fn stats(&self) -> RuleEngineStats {
        let rules_count = self.rules.len();
        let total_fields: usize = self.rules.iter().map(|r| r.required_fields.len()).sum();
        let distinct_fields = self
            .rules
            .iter()
            .flat_map(|r| r.required_fields.iter())
            .collect::<HashSet<_>>()
            .len();
        let total_actions = self.rules.iter().map(|r| r.actions().len()).sum();

        RuleEngineStats {
            rules_count,
            total_fields,
            distinct_fields,
            total_actions,
            avg_fields_per_rule: if rules_count > 0 {
                total_fields as f64 / rules_count as f64
            } else {
                0.0
            },
        }
    }
}

/// 规则注册表统计信息
#[derive(Debug, Clone, Serialize)]
pub struct RuleEngineStats {
    /// 规则总数
    pub rules_count: usize,
    /// 各规则引用字段数之和
    pub total_fields: usize,
    /// 去重后的引用字段数
    pub distinct_fields: usize,
    pub total_actions: usize,
    /// 平均每条规则引用的字段数
    pub avg_fields_per_rule: f64,
}
