//! 规则动作

mod executor;
mod sink;

pub use executor::{ActionExecutor, ActionsReport, render_template};
#[cfg(test)]
pub use sink::MockActionSink;
pub use sink::{ActionRecord, ActionSink, LogSink, MemorySink};

use crate::expression::{Expression, ExpressionError};
use crate::fact::FieldPath;
use crate::models::ActionKind;
use serde_json::{Map, Value};
use std::sync::Arc;

/// 编译后的动作
#[derive(Debug, Clone)]
pub enum CompiledAction {
    Update {
        target: FieldPath,
        /// 表达式原文
        source: String,
        /// 解析失败时在执行阶段作为求值错误上报
        expression: Result<Arc<Expression>, ExpressionError>,
    },
    Redistribute {
        params: Map<String, Value>,
    },
    Alert {
        message: String,
    },
    Notify {
        recipient: Option<String>,
        template: String,
    },
}

impl CompiledAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Update { .. } => ActionKind::Update,
            Self::Redistribute { .. } => ActionKind::Redistribute,
            Self::Alert { .. } => ActionKind::Alert,
            Self::Notify { .. } => ActionKind::Notify,
        }
    }
}
