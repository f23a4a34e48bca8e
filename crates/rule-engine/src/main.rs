//! 规则引擎命令行入口
//!
//! 运行汇总写到 stdout，日志写到 stderr。运行中出现任何错误时以非零状态退出。

use clap::Parser;
use pacing_shared::config::AppConfig;
use pacing_shared::observability;
use rule_engine::cli::{Cli, CommandRunner, Commands};
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = AppConfig::load("rule-engine").unwrap_or_else(|e| {
        eprintln!("配置加载失败，使用默认配置: {}", e);
        AppConfig::default()
    });

    let mut obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    if let Some(level) = cli.log_level.clone() {
        obs_config.log_level = level;
    }
    observability::init(&obs_config)?;

    let runner = CommandRunner::new(config);

    match cli.command {
        Commands::Run {
            rules,
            records,
            strategy,
            max_workers,
            pretty,
        } => {
            let summary = match runner.run_batch(rules, records, strategy, max_workers).await {
                Ok(summary) => summary,
                Err(e) => {
                    error!(error = %e, "运行失败");
                    return Ok(ExitCode::FAILURE);
                }
            };

            let output = if pretty {
                serde_json::to_string_pretty(&summary)?
            } else {
                serde_json::to_string(&summary)?
            };
            println!("{}", output);

            if summary.is_success() {
                Ok(ExitCode::SUCCESS)
            } else {
                info!(errors = summary.errors.len(), "运行完成但存在错误");
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Validate { rules } => {
            let entries = runner.validate(rules).await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);

            if entries.iter().all(|e| e.valid) {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
    }
}
