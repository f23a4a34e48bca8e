//! 批处理编排
//!
//! 两种互斥的执行策略：
//! - 规则并行：有界工作池，每个工作者独立编译一条规则，并在全部事实上评估
//! - 记录顺序：单一控制流按注册顺序遍历 事实 × 规则，匹配规则的动作作为延迟
//!   单元放入有界任务集，运行结束前全部等待完成
//!
//! 跨工作者或跨延迟单元的执行顺序不作保证；汇总中的结果按 (事实位置, 规则名) 排序。

use crate::actions::{ActionExecutor, ActionSink};
use crate::compiler::{CompiledRule, RuleCompiler};
use crate::engine::{RuleEngine, apply_actions, evaluate_rule, fallback_outcome};
use crate::error::{ErrorKind, RuleError};
use crate::fact::Fact;
use crate::models::RuleDefinition;
use crate::outcome::{ErrorRecord, EvaluationOutcome, RunSummary};
use crate::source::{DataSource, RuleBatch};
use futures::FutureExt;
use pacing_shared::{EngineConfig, ExecutionStrategy};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, instrument, warn};

/// 批处理编排器
pub struct Orchestrator {
    config: EngineConfig,
    executor: ActionExecutor,
}

impl Orchestrator {
    pub fn new(config: EngineConfig, sink: Arc<dyn ActionSink>) -> Self {
        let executor = ActionExecutor::new(sink, config.action_timeout());
        Self { config, executor }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 从数据源读取规则和记录并运行
    ///
    /// 数据源不可用时整体失败；之后的任何错误都只进入汇总。
    #[instrument(skip_all, fields(strategy = %self.config.strategy))]
    pub async fn run_from_source(&self, source: &dyn DataSource) -> Result<RunSummary, RuleError> {
        let batch = source.fetch_rule_definitions().await?;
        let records = source.fetch_records().await?;
        Ok(self.run_batch(batch, records).await)
    }

    pub async fn run(&self, definitions: Vec<RuleDefinition>, records: Vec<Value>) -> RunSummary {
        self.run_batch(RuleBatch::new(definitions), records).await
    }

    /// 注册规则、转换记录并按配置的策略评估所有 (规则, 事实) 对
    #[instrument(skip_all, fields(strategy = %self.config.strategy))]
    pub async fn run_batch(&self, batch: RuleBatch, records: Vec<Value>) -> RunSummary {
        let started = Instant::now();
        let mut summary = RunSummary::new(self.config.strategy.to_string());

        for rejected in &batch.rejected {
            let mut record = ErrorRecord::new(
                ErrorKind::Compile,
                format!("第 {} 条规则结构不合法: {}", rejected.index, rejected.reason),
            );
            record.rule_name = rejected.name.clone();
            summary.record_error(record);
        }

        let mut engine = RuleEngine::new();
        for (rule_name, e) in engine.register_batch(&batch.definitions) {
            summary.record_error(ErrorRecord::from_rule_error(&e).with_rule(rule_name));
        }
        summary.rules_registered = engine.len();

        let facts = self.prepare_facts(records, &mut summary);
        summary.records_evaluated = facts.len();

        for fact in &facts {
            if let Some(outcome) = fallback_outcome(fact) {
                summary.record(outcome);
            }
        }

        info!(
            rules = engine.len(),
            facts = facts.len(),
            pairs = engine.len() * facts.len(),
            "开始评估"
        );

        match self.config.strategy {
            ExecutionStrategy::RuleParallel => {
                let definitions = engine
                    .rules()
                    .iter()
                    .map(|rule| rule.definition().clone())
                    .collect();
                self.run_rule_parallel(definitions, facts, &mut summary)
                    .await;
            }
            ExecutionStrategy::RecordSequential => {
                self.run_record_sequential(Arc::new(engine), facts, &mut summary)
                    .await;
            }
        }

        summary.sort_outcomes();
        summary.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            run_id = %summary.run_id,
            total_pairs = summary.total_pairs,
            matched_pairs = summary.matched_pairs,
            fallback_matches = summary.fallback_matches,
            actions_succeeded = summary.actions_succeeded,
            actions_failed = summary.actions_failed,
            errors = summary.errors.len(),
            elapsed_ms = summary.elapsed_ms,
            "运行结束"
        );
        summary
    }

    /// 记录转换为事实，无法转换的记录跳过并记入汇总
    fn prepare_facts(&self, records: Vec<Value>, summary: &mut RunSummary) -> Vec<Fact> {
        records
            .into_iter()
            .enumerate()
            .filter_map(
                |(index, record)| match Fact::from_record(index, record, &self.config.identity_keys) {
                    Ok(fact) => Some(fact),
                    Err(e) => {
                        warn!(index, error = %e, "记录已跳过");
                        summary.skipped_records += 1;
                        summary.record_error(ErrorRecord::from_rule_error(&e));
                        None
                    }
                },
            )
            .collect()
    }

    /// 规则并行：每个工作者拥有自己编译的规则实例
    async fn run_rule_parallel(
        &self,
        definitions: Vec<RuleDefinition>,
        facts: Vec<Fact>,
        summary: &mut RunSummary,
    ) {
        let facts = Arc::new(facts);
        let workers_limit = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let mut workers = JoinSet::new();

        for definition in definitions {
            let facts = Arc::clone(&facts);
            let workers_limit = Arc::clone(&workers_limit);
            let executor = self.executor.clone();

            workers.spawn(async move {
                let rule_name = definition.name.clone();
                let work = async move {
                    let _permit = workers_limit
                        .acquire_owned()
                        .await
                        .map_err(|e| format!("工作池已关闭: {}", e))?;

                    let rule = RuleCompiler::new()
                        .compile(&definition)
                        .map_err(|e| e.to_string())?;
                    debug!(rule_name = %rule.name(), definition = ?definition, "规则定义");
                    info!(rule_name = %rule.name(), facts = facts.len(), "开始评估规则");

                    let mut outcomes = Vec::with_capacity(facts.len());
                    for fact in facts.iter() {
                        let mut outcome = evaluate_rule(&rule, fact);
                        apply_isolated(&rule, fact, &mut outcome, &executor).await;
                        outcomes.push(outcome);
                    }
                    Ok::<_, String>(outcomes)
                };

                let result = AssertUnwindSafe(work)
                    .catch_unwind()
                    .await
                    .map_err(panic_message)
                    .and_then(|r| r);
                (rule_name, result)
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((_, Ok(outcomes))) => {
                    for outcome in outcomes {
                        summary.record(outcome);
                    }
                }
                Ok((rule_name, Err(reason))) => {
                    error!(rule_name = %rule_name, error = %reason, "规则工作者失败");
                    summary.record_error(
                        ErrorRecord::new(ErrorKind::Dispatch, reason).with_rule(rule_name),
                    );
                }
                Err(e) => record_join_error(summary, e),
            }
        }
    }

    /// 记录顺序：条件同步评估，动作作为延迟单元执行
    async fn run_record_sequential(
        &self,
        engine: Arc<RuleEngine>,
        facts: Vec<Fact>,
        summary: &mut RunSummary,
    ) {
        let pending_limit = Arc::new(Semaphore::new(self.config.max_pending_actions.max(1)));
        let mut units: JoinSet<EvaluationOutcome> = JoinSet::new();

        for fact in facts {
            let fact = Arc::new(fact);

            for (rule, outcome) in engine.evaluate(&fact) {
                if !outcome.matched || rule.actions().is_empty() {
                    summary.record(outcome);
                    continue;
                }

                // 待执行单元已满时在此等待
                let permit = match Arc::clone(&pending_limit).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        let mut outcome = outcome;
                        outcome.errors.push(
                            ErrorRecord::new(ErrorKind::Dispatch, format!("动作队列已关闭: {}", e))
                                .with_rule(rule.name()),
                        );
                        summary.record(outcome);
                        continue;
                    }
                };

                let rule = Arc::clone(rule);
                let fact = Arc::clone(&fact);
                let executor = self.executor.clone();

                units.spawn(async move {
                    let _permit = permit;
                    let mut outcome = outcome;
                    apply_isolated(&rule, &fact, &mut outcome, &executor).await;
                    outcome
                });

                while let Some(done) = units.try_join_next() {
                    collect_unit(summary, done);
                }
            }
        }

        while let Some(done) = units.join_next().await {
            collect_unit(summary, done);
        }
    }
}

/// 执行一个 (规则, 事实) 对的动作，panic 只记入该对的结果
async fn apply_isolated(
    rule: &CompiledRule,
    fact: &Fact,
    outcome: &mut EvaluationOutcome,
    executor: &ActionExecutor,
) {
    let applied = AssertUnwindSafe(apply_actions(rule, fact, &mut *outcome, executor))
        .catch_unwind()
        .await;

    if let Err(panic) = applied {
        let reason = panic_message(panic);
        error!(
            rule_name = %rule.name(),
            fact_id = %fact.label(),
            error = %reason,
            "动作执行 panic"
        );
        let mut record = ErrorRecord::new(ErrorKind::Dispatch, reason).with_rule(rule.name());
        record.fact_id = fact.id().map(str::to_string);
        outcome.errors.push(record);
    }
}

fn collect_unit(summary: &mut RunSummary, done: Result<EvaluationOutcome, JoinError>) {
    match done {
        Ok(outcome) => summary.record(outcome),
        Err(e) => record_join_error(summary, e),
    }
}

fn record_join_error(summary: &mut RunSummary, e: JoinError) {
    error!(error = %e, "任务异常结束");
    summary.record_error(ErrorRecord::new(ErrorKind::Dispatch, e.to_string()));
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("任务 panic: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("任务 panic: {}", s)
    } else {
        "任务 panic".to_string()
    }
}
