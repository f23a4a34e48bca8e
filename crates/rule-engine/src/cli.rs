//! 命令行接口
//!
//! - `run` - 读取规则和记录，执行一次批量评估，运行汇总以 JSON 写到 stdout
//! - `validate` - 只编译规则文件，报告每条规则的编译结果
//!
//! ```bash
//! rule-engine run --strategy rule_parallel --rules data/rules.json --records data/records.json
//! rule-engine validate --rules data/rules.json
//! ```

use crate::actions::LogSink;
use crate::compiler::RuleCompiler;
use crate::engine::FALLBACK_RULE;
use crate::orchestrator::Orchestrator;
use crate::outcome::RunSummary;
use crate::source::{DataSource, JsonFileSource};
use anyhow::Result;
use clap::{Parser, Subcommand};
use pacing_shared::{AppConfig, ExecutionStrategy};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// 投放节奏规则引擎命令行工具
#[derive(Parser, Debug)]
#[command(name = "rule-engine")]
#[command(version, about = "广告活动投放节奏规则引擎")]
#[command(propagate_version = true)]
pub struct Cli {
    /// 日志级别 (trace, debug, info, warn, error)，覆盖配置文件
    #[arg(short, long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 执行一次批量评估
    Run {
        /// 规则文件路径
        #[arg(long)]
        rules: Option<PathBuf>,

        /// 记录文件路径
        #[arg(long)]
        records: Option<PathBuf>,

        /// 执行策略 (rule_parallel, record_sequential)
        #[arg(short, long)]
        strategy: Option<ExecutionStrategy>,

        /// rule_parallel 策略的 worker 上限
        #[arg(long)]
        max_workers: Option<usize>,

        /// 格式化输出汇总
        #[arg(long)]
        pretty: bool,
    },

    /// 校验规则文件
    Validate {
        /// 规则文件路径
        #[arg(long)]
        rules: Option<PathBuf>,
    },
}

/// 单条规则的校验结果
#[derive(Debug, Serialize)]
pub struct ValidationEntry {
    pub name: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct CommandRunner {
    config: AppConfig,
}

impl CommandRunner {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// 执行一次运行，返回运行汇总
    pub async fn run_batch(
        &self,
        rules: Option<PathBuf>,
        records: Option<PathBuf>,
        strategy: Option<ExecutionStrategy>,
        max_workers: Option<usize>,
    ) -> Result<RunSummary> {
        let mut engine_config = self.config.engine.clone();
        if let Some(strategy) = strategy {
            engine_config.strategy = strategy;
        }
        if let Some(max_workers) = max_workers {
            engine_config.max_workers = max_workers;
        }

        let source = JsonFileSource::new(
            rules.unwrap_or_else(|| PathBuf::from(&self.config.source.rules_path)),
            records.unwrap_or_else(|| PathBuf::from(&self.config.source.records_path)),
        );

        info!(strategy = %engine_config.strategy, "开始批量评估");
        let orchestrator = Orchestrator::new(engine_config, Arc::new(LogSink));
        Ok(orchestrator.run_from_source(&source).await?)
    }

    /// 编译规则文件中的每条规则
    pub async fn validate(&self, rules: Option<PathBuf>) -> Result<Vec<ValidationEntry>> {
        let rules_path = rules.unwrap_or_else(|| PathBuf::from(&self.config.source.rules_path));
        let source = JsonFileSource::new(rules_path, PathBuf::new());
        let batch = source.fetch_rule_definitions().await?;

        let compiler = RuleCompiler::new();
        let mut seen = HashSet::new();
        let mut entries: Vec<ValidationEntry> = batch
            .rejected
            .iter()
            .map(|rejected| ValidationEntry {
                name: rejected
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("#{}", rejected.index)),
                valid: false,
                error: Some(rejected.reason.clone()),
            })
            .collect();

        for definition in &batch.definitions {
            let error = if definition.name == FALLBACK_RULE || !seen.insert(definition.name.clone()) {
                Some(format!("规则名称重复: {}", definition.name))
            } else {
                compiler.compile(definition).err().map(|e| e.to_string())
            };

            if let Some(error) = &error {
                warn!(rule_name = %definition.name, error = %error, "规则校验失败");
            }
            entries.push(ValidationEntry {
                name: definition.name.clone(),
                valid: error.is_none(),
                error,
            });
        }

        Ok(entries)
    }
}
