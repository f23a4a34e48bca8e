//! 规则引擎领域模型
//!
//! 规则定义的 JSON 形态：
//!
//! ```json
//! {
//!   "name": "under_pacing",
//!   "condition": { "all": [ {"field": "impressions_delivered", "operator": "<", "value_field": "impression_goal"} ] },
//!   "actions": [ {"type": "update", "target_field": "pacing_osi", "expression": "impressions_delivered / impression_goal"} ]
//! }
//! ```
//!
//! 操作符、字段路径等语义校验在编译阶段进行，反序列化只负责结构。

use crate::operators::Combinator;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// 规则定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub name: String,
    pub condition: ConditionNode,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

impl RuleDefinition {
    pub fn new(name: impl Into<String>, condition: ConditionNode, actions: Vec<ActionSpec>) -> Self {
        Self {
            name: name.into(),
            condition,
            actions,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// 条件树节点：`{"all": [...]}` 或 `{"any": [...]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionNode {
    All(Vec<ConditionChild>),
    Any(Vec<ConditionChild>),
}

impl ConditionNode {
    pub fn all(children: Vec<ConditionChild>) -> Self {
        Self::All(children)
    }

    pub fn any(children: Vec<ConditionChild>) -> Self {
        Self::Any(children)
    }

    pub fn combinator(&self) -> Combinator {
        match self {
            Self::All(_) => Combinator::All,
            Self::Any(_) => Combinator::Any,
        }
    }

    pub fn children(&self) -> &[ConditionChild] {
        match self {
            Self::All(children) | Self::Any(children) => children,
        }
    }
}

/// 组合子的子节点：字段条件，或嵌套的组合子
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionChild {
    Group(ConditionNode),
    Field(FieldCondition),
}

impl From<FieldCondition> for ConditionChild {
    fn from(cond: FieldCondition) -> Self {
        Self::Field(cond)
    }
}

impl From<ConditionNode> for ConditionChild {
    fn from(node: ConditionNode) -> Self {
        Self::Group(node)
    }
}

/// 字段条件
///
/// `value` 为字面量，`value_field` 引用同一事实中的另一个字段，二者必须且只能出现一个。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub field: String,
    pub operator: String,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_field: Option<String>,
}

impl FieldCondition {
    /// 与字面量比较
    pub fn literal(
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value: Some(value.into()),
            value_field: None,
        }
    }

    /// 与另一个字段比较
    pub fn reference(
        field: impl Into<String>,
        operator: impl Into<String>,
        value_field: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value: None,
            value_field: Some(value_field.into()),
        }
    }
}

/// 显式的 `"value": null` 视为字面量 null，而不是缺失
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// 动作定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpec {
    Update {
        target_field: String,
        expression: String,
    },
    Redistribute {
        #[serde(default)]
        params: Map<String, Value>,
    },
    Alert {
        message: String,
    },
    Notify {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient: Option<String>,
        #[serde(default)]
        template: String,
    },
}

impl ActionSpec {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Update { .. } => ActionKind::Update,
            Self::Redistribute { .. } => ActionKind::Redistribute,
            Self::Alert { .. } => ActionKind::Alert,
            Self::Notify { .. } => ActionKind::Notify,
        }
    }
}

/// 动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Update,
    Redistribute,
    Alert,
    Notify,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Redistribute => "redistribute",
            Self::Alert => "alert",
            Self::Notify => "notify",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
