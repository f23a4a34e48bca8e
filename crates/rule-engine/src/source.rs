//! 规则与记录数据源
//!
//! `DataSource` 抽象规则定义和原始记录的来源。规则文件中单条规则结构错误时
//! 只拒绝该条规则，其余规则照常加载；文件本身无法读取或解析时整个数据源失败。

use crate::error::SourceError;
use crate::models::RuleDefinition;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// 从数据源读取的规则批次
#[derive(Debug, Clone, Default)]
pub struct RuleBatch {
    pub definitions: Vec<RuleDefinition>,
    /// 结构不合法、未能解析为规则定义的条目
    pub rejected: Vec<RejectedRule>,
}

impl RuleBatch {
    pub fn new(definitions: Vec<RuleDefinition>) -> Self {
        Self {
            definitions,
            rejected: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRule {
    pub index: usize,
    pub name: Option<String>,
    pub reason: String,
}

/// 数据源
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataSource: Send + Sync {
    /// 获取规则定义
    async fn fetch_rule_definitions(&self) -> Result<RuleBatch, SourceError>;

    /// 获取原始记录，每条记录应为一个 JSON 对象
    async fn fetch_records(&self) -> Result<Vec<Value>, SourceError>;
}

/// 内存数据源
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    definitions: Vec<RuleDefinition>,
    records: Vec<Value>,
}

impl InMemorySource {
    pub fn new(definitions: Vec<RuleDefinition>, records: Vec<Value>) -> Self {
        Self {
            definitions,
            records,
        }
    }
}

#[async_trait]
impl DataSource for InMemorySource {
    async fn fetch_rule_definitions(&self) -> Result<RuleBatch, SourceError> {
        Ok(RuleBatch::new(self.definitions.clone()))
    }

    async fn fetch_records(&self) -> Result<Vec<Value>, SourceError> {
        Ok(self.records.clone())
    }
}

/// JSON 文件数据源
///
/// 规则文件：规则定义数组，或 `{id, type, rule}` 行数组，或 `{"rules": [...]}`。
/// 记录文件：扁平记录数组，或 `{"campaigns": [...], "line_items": [...]}`。
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    rules_path: PathBuf,
    records_path: PathBuf,
}

impl JsonFileSource {
    pub fn new(rules_path: impl Into<PathBuf>, records_path: impl Into<PathBuf>) -> Self {
        Self {
            rules_path: rules_path.into(),
            records_path: records_path.into(),
        }
    }

    async fn read_json(path: &Path) -> Result<Value, SourceError> {
        let display = path.display().to_string();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SourceError::Io {
                path: display.clone(),
                source,
            })?;
        serde_json::from_str(&content).map_err(|source| SourceError::Decode {
            path: display,
            source,
        })
    }
}

#[async_trait]
impl DataSource for JsonFileSource {
    #[instrument(skip(self), fields(path = %self.rules_path.display()))]
    async fn fetch_rule_definitions(&self) -> Result<RuleBatch, SourceError> {
        let document = Self::read_json(&self.rules_path).await?;
        let batch = parse_rule_document(document).map_err(|reason| SourceError::Format {
            path: self.rules_path.display().to_string(),
            reason,
        })?;

        info!(
            loaded = batch.definitions.len(),
            rejected = batch.rejected.len(),
            "规则文件已读取"
        );
        Ok(batch)
    }

    #[instrument(skip(self), fields(path = %self.records_path.display()))]
    async fn fetch_records(&self) -> Result<Vec<Value>, SourceError> {
        let document = Self::read_json(&self.records_path).await?;
        let records = parse_record_document(document).map_err(|reason| SourceError::Format {
            path: self.records_path.display().to_string(),
            reason,
        })?;

        info!(records = records.len(), "记录文件已读取");
        Ok(records)
    }
}

/// 解析规则文档，逐条解码
pub fn parse_rule_document(document: Value) -> Result<RuleBatch, String> {
    let entries = match document {
        Value::Array(entries) => entries,
        Value::Object(mut map) => match map.remove("rules") {
            Some(Value::Array(entries)) => entries,
            _ => return Err("期望规则数组或包含 rules 数组的对象".to_string()),
        },
        _ => return Err("期望规则数组或包含 rules 数组的对象".to_string()),
    };

    let mut batch = RuleBatch::default();
    for (index, entry) in entries.into_iter().enumerate() {
        let entry = unwrap_rule_row(entry);
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);

        match serde_json::from_value::<RuleDefinition>(entry) {
            Ok(definition) => batch.definitions.push(definition),
            Err(e) => {
                warn!(index, rule_name = ?name, error = %e, "规则定义结构不合法");
                batch.rejected.push(RejectedRule {
                    index,
                    name,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(batch)
}

/// 行格式 `{id, type, rule: {...}}` 取出其中的规则定义
fn unwrap_rule_row(entry: Value) -> Value {
    match entry {
        Value::Object(mut row) if row.get("rule").is_some_and(Value::is_object) => {
            row.remove("rule").unwrap_or(Value::Object(row))
        }
        other => other,
    }
}

/// 解析记录文档
pub fn parse_record_document(document: Value) -> Result<Vec<Value>, String> {
    match document {
        Value::Array(records) => Ok(records),
        Value::Object(map) => {
            let campaigns = map.get("campaigns").and_then(Value::as_array);
            let line_items = map.get("line_items").and_then(Value::as_array);
            match (campaigns, line_items) {
                (Some(campaigns), Some(line_items)) => {
                    Ok(merge_campaign_line_items(campaigns, line_items))
                }
                _ => Err("期望记录数组或包含 campaigns 与 line_items 数组的对象".to_string()),
            }
        }
        _ => Err("期望记录数组或包含 campaigns 与 line_items 数组的对象".to_string()),
    }
}

/// 将每个活动与其广告单元合并为扁平记录
///
/// 合并结果依次包含 `campaign_id`、`campaign_name`，然后是广告单元的全部字段
/// （同名字段以广告单元为准）。广告单元通过 `campaign_id` 关联活动的 `id`。
pub fn merge_campaign_line_items(campaigns: &[Value], line_items: &[Value]) -> Vec<Value> {
    let mut merged = Vec::new();

    for campaign in campaigns {
        let Some(campaign_id) = campaign.get("id") else {
            warn!(campaign = %campaign, "活动缺少 id，已跳过");
            continue;
        };
        let campaign_name = campaign
            .get("name")
            .cloned()
            .unwrap_or_else(|| Value::String(String::new()));

        for line_item in line_items
            .iter()
            .filter(|li| li.get("campaign_id") == Some(campaign_id))
        {
            let mut record = Map::new();
            record.insert("campaign_id".to_string(), campaign_id.clone());
            record.insert("campaign_name".to_string(), campaign_name.clone());
            if let Value::Object(fields) = line_item {
                record.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            merged.push(Value::Object(record));
        }
    }

    merged
}
