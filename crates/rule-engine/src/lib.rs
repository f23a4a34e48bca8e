//! 投放节奏规则引擎
//!
//! 对广告活动记录批量评估声明式规则：
//! - JSON 规则定义，ALL/ANY 条件树，字段与字面量或字段与字段比较
//! - 规则编译为谓词闭包，短路求值
//! - 受限表达式语言驱动的字段更新，以及再分配、告警、通知动作
//! - 规则并行 / 记录顺序两种执行策略，结果汇总为一次运行报告

pub mod actions;
pub mod cli;
pub mod compiler;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod expression;
pub mod fact;
pub mod models;
pub mod operators;
pub mod orchestrator;
pub mod outcome;
pub mod source;

pub use actions::{ActionExecutor, ActionRecord, ActionSink, LogSink, MemorySink};
pub use compiler::{CompiledRule, RuleCompiler};
pub use engine::{FALLBACK_RULE, RuleEngine, RuleEngineStats};
pub use evaluator::ConditionEvaluator;
pub use error::{ActionError, ErrorKind, ExpressionError, Result, RuleError, SourceError};
pub use expression::Expression;
pub use fact::{Fact, FieldPath};
pub use models::{ActionKind, ActionSpec, ConditionChild, ConditionNode, FieldCondition, RuleDefinition};
pub use operators::{Combinator, Operator};
pub use orchestrator::Orchestrator;
pub use outcome::{ActionResult, ErrorRecord, EvaluationOutcome, RunSummary};
pub use source::{DataSource, InMemorySource, JsonFileSource, RuleBatch};
