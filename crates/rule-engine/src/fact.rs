//! 事实与字段路径
//!
//! 事实是一条活动 + 广告单元快照，以嵌套 JSON 映射表示。字段路径按段逐层解析，
//! 任一段缺失时结果为"不存在"而非错误。

use crate::error::{ActionError, RuleError};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// 点号分隔的字段路径，如 `targeting.geo.country`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// 在 JSON 值上逐段解析路径
    ///
    /// 对象按键取值，数组按数字下标取值（如 `bookies.0`），其余情况返回 None。
    pub fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.0
            .iter()
            .try_fold(root, |current, segment| descend(current, segment))
    }

    fn resolve_in_map<'a>(&self, map: &'a Map<String, Value>) -> Option<&'a Value> {
        let (first, rest) = self.0.split_first()?;
        rest.iter()
            .try_fold(map.get(first)?, |current, segment| descend(current, segment))
    }
}

fn descend<'a>(current: &'a Value, segment: &str) -> Option<&'a Value> {
    match current {
        Value::Object(map) => map.get(segment),
        Value::Array(arr) => arr.get(segment.parse::<usize>().ok()?),
        _ => None,
    }
}

/// 字段路径格式错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidFieldPath(pub String);

impl fmt::Display for InvalidFieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "无效的字段路径: '{}'", self.0)
    }
}

impl FromStr for FieldPath {
    type Err = InvalidFieldPath;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<String> = s.split('.').map(|p| p.trim().to_string()).collect();
        if segments.iter().any(|p| p.is_empty()) {
            return Err(InvalidFieldPath(s.to_string()));
        }
        Ok(Self(segments))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// 一条待评估的事实
///
/// 评估期间不可变；更新动作在副本上写入。
#[derive(Debug, Clone, PartialEq)]
pub struct Fact {
    index: usize,
    id: Option<String>,
    data: Map<String, Value>,
}

impl Fact {
    /// 从原始记录构造事实
    ///
    /// 记录必须是 JSON 对象；`identity_keys` 中第一个存在且非空的字段作为事实 ID。
    pub fn from_record(
        index: usize,
        record: Value,
        identity_keys: &[String],
    ) -> Result<Self, RuleError> {
        let data = match record {
            Value::Object(map) => map,
            other => {
                return Err(RuleError::Serialization {
                    index,
                    reason: format!("期望 JSON 对象, 实际为 {}", type_name(&other)),
                });
            }
        };

        let id = identity_keys
            .iter()
            .find_map(|key| data.get(key).and_then(identity_string));

        Ok(Self { index, id, data })
    }

    /// 记录在批次中的位置
    pub fn index(&self) -> usize {
        self.index
    }

    /// 识别键的值；不存在时回退规则会触发
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// 用于日志和结果的标签：优先使用 ID，否则使用批次位置
    pub fn label(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("#{}", self.index),
        }
    }

    pub fn get(&self, path: &FieldPath) -> Option<&Value> {
        path.resolve_in_map(&self.data)
    }

    /// 写入字段，自动创建缺失的中间映射
    pub fn set(&mut self, path: &FieldPath, value: Value) -> Result<(), ActionError> {
        let Some((leaf, parents)) = path.segments().split_last() else {
            return Err(ActionError::InvalidTarget {
                target: path.to_string(),
                reason: "路径为空".to_string(),
            });
        };

        let mut target = &mut self.data;
        for segment in parents {
            let entry = target
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            target = match entry {
                Value::Object(map) => map,
                other => {
                    return Err(ActionError::InvalidTarget {
                        target: path.to_string(),
                        reason: format!("中间字段 '{}' 是 {}", segment, type_name(other)),
                    });
                }
            };
        }

        target.insert(leaf.clone(), value);
        Ok(())
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.data)
    }
}

fn identity_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// 获取值的类型名称
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
