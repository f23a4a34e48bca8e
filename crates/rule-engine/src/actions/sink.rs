//! 动作输出
//!
//! 告警、再分配和通知动作不修改事实，只产生一条结构化记录交给 `ActionSink`。
//! 当前提供日志输出和内存收集两种实现，对接外部系统时实现同一 trait 即可。

use crate::error::ActionError;
use crate::models::ActionKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

/// 动作产生的结构化记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRecord {
    pub record_id: Uuid,
    pub kind: ActionKind,
    pub rule_name: String,
    pub fact_id: Option<String>,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
}

impl ActionRecord {
    pub fn new(
        kind: ActionKind,
        rule_name: impl Into<String>,
        fact_id: Option<String>,
        payload: Value,
    ) -> Self {
        Self {
            record_id: Uuid::now_v7(),
            kind,
            rule_name: rule_name.into(),
            fact_id,
            payload,
            emitted_at: Utc::now(),
        }
    }
}

/// 动作输出 trait
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActionSink: Send + Sync {
    async fn emit(&self, record: ActionRecord) -> Result<(), ActionError>;
}

/// 写日志的输出
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl ActionSink for LogSink {
    async fn emit(&self, record: ActionRecord) -> Result<(), ActionError> {
        let fact_id = record.fact_id.as_deref().unwrap_or("-");
        match record.kind {
            ActionKind::Alert => info!(
                rule_name = %record.rule_name,
                fact_id = %fact_id,
                message = %record.payload,
                "告警"
            ),
            ActionKind::Redistribute => info!(
                rule_name = %record.rule_name,
                fact_id = %fact_id,
                params = %record.payload,
                "预算再分配"
            ),
            ActionKind::Notify => info!(
                rule_name = %record.rule_name,
                fact_id = %fact_id,
                notification = %record.payload,
                "发送通知"
            ),
            ActionKind::Update => info!(
                rule_name = %record.rule_name,
                fact_id = %fact_id,
                update = %record.payload,
                "字段已更新"
            ),
        }
        Ok(())
    }
}

/// 收集到内存的输出，用于测试与批处理结果检查
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<ActionRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ActionRecord> {
        self.records.lock().clone()
    }

    pub fn records_of(&self, kind: ActionKind) -> Vec<ActionRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl ActionSink for MemorySink {
    async fn emit(&self, record: ActionRecord) -> Result<(), ActionError> {
        self.records.lock().push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_sink_collects() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());

        sink.emit(ActionRecord::new(
            ActionKind::Alert,
            "pacing",
            Some("42".to_string()),
            json!("under pacing"),
        ))
        .await
        .unwrap();
        sink.emit(ActionRecord::new(
            ActionKind::Notify,
            "pacing",
            None,
            json!({"recipient": "ops"}),
        ))
        .await
        .unwrap();

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.records_of(ActionKind::Notify).len(), 1);
        assert_eq!(sink.records()[0].fact_id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_log_sink_never_fails() {
        let sink = LogSink;
        for kind in [
            ActionKind::Alert,
            ActionKind::Redistribute,
            ActionKind::Notify,
            ActionKind::Update,
        ] {
            let result = sink
                .emit(ActionRecord::new(kind, "rule", None, json!({})))
                .await;
            assert!(result.is_ok());
        }
    }
}
