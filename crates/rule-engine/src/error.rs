//! 规则引擎错误类型
//!
//! 错误按影响范围分层：
//! - `RuleError`：单条规则的注册失败，或数据源整体不可用
//! - `ActionError`：单个动作失败，不影响同一规则的其它动作
//! - `ExpressionError`：表达式解析/求值失败，携带出错的子表达式

use serde::{Serialize, Serializer};
use thiserror::Error;

pub use crate::expression::ExpressionError;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("不支持的操作符: 规则 '{rule}' 使用了 '{operator}'")]
    UnsupportedOperator { rule: String, operator: String },

    #[error("规则编译失败: 规则 '{rule}' {reason}")]
    CompileError { rule: String, reason: String },

    #[error("规则名称重复: {0}")]
    DuplicateRuleName(String),

    #[error("记录无法序列化为事实: 第 {index} 条记录, {reason}")]
    Serialization { index: usize, reason: String },

    #[error("数据源错误: {0}")]
    Source(#[from] SourceError),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl RuleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedOperator { .. } => ErrorKind::UnsupportedOperator,
            Self::CompileError { .. } | Self::JsonError(_) => ErrorKind::Compile,
            Self::DuplicateRuleName(_) => ErrorKind::DuplicateRuleName,
            Self::Serialization { .. } => ErrorKind::Serialization,
            Self::Source(_) => ErrorKind::Source,
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;

/// 单个动作的执行错误
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("动作上下文缺失: {action} 动作没有可用的事实")]
    ContextMissing { action: &'static str },

    #[error("表达式求值失败: {0}")]
    Expression(#[from] ExpressionError),

    #[error("通知缺少接收人")]
    MissingRecipient,

    #[error("无效的目标字段 '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("动作输出失败: {0}")]
    Sink(String),

    #[error("动作执行超时: {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl ActionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ContextMissing { .. } => ErrorKind::ContextMissing,
            Self::Expression(_) => ErrorKind::ExpressionEvaluation,
            Self::MissingRecipient => ErrorKind::MissingRecipient,
            Self::InvalidTarget { .. } | Self::Sink(_) => ErrorKind::ActionFailed,
            Self::Timeout { .. } => ErrorKind::ActionTimeout,
        }
    }

    /// 出错的表达式片段（仅表达式错误）
    pub fn fragment(&self) -> Option<&str> {
        match self {
            Self::Expression(e) => Some(e.fragment()),
            _ => None,
        }
    }
}

/// 数据源错误
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("读取 {path} 失败: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("解析 {path} 失败: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} 格式不正确: {reason}")]
    Format { path: String, reason: String },

    #[error("{0}")]
    Unavailable(String),
}

/// 错误分类码，写入运行汇总
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Compile,
    UnsupportedOperator,
    DuplicateRuleName,
    ContextMissing,
    ExpressionEvaluation,
    MissingRecipient,
    ActionFailed,
    ActionTimeout,
    Serialization,
    Dispatch,
    Source,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Compile => "COMPILE_ERROR",
            Self::UnsupportedOperator => "UNSUPPORTED_OPERATOR",
            Self::DuplicateRuleName => "DUPLICATE_RULE_NAME",
            Self::ContextMissing => "CONTEXT_MISSING",
            Self::ExpressionEvaluation => "EXPRESSION_EVALUATION",
            Self::MissingRecipient => "MISSING_RECIPIENT",
            Self::ActionFailed => "ACTION_FAILED",
            Self::ActionTimeout => "ACTION_TIMEOUT",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::Dispatch => "DISPATCH_ERROR",
            Self::Source => "SOURCE_ERROR",
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = RuleError::UnsupportedOperator {
            rule: "pacing".to_string(),
            operator: "=~".to_string(),
        };
        assert_eq!(err.kind().code(), "UNSUPPORTED_OPERATOR");
        assert!(err.to_string().contains("=~"));

        assert_eq!(
            RuleError::DuplicateRuleName("pacing".to_string()).kind(),
            ErrorKind::DuplicateRuleName
        );
        assert_eq!(ActionError::MissingRecipient.kind().code(), "MISSING_RECIPIENT");
        assert_eq!(
            ActionError::Timeout { timeout_ms: 10 }.kind(),
            ErrorKind::ActionTimeout
        );
    }

    #[test]
    fn test_error_kind_serializes_as_code() {
        let json = serde_json::to_string(&ErrorKind::ExpressionEvaluation).unwrap();
        assert_eq!(json, "\"EXPRESSION_EVALUATION\"");
        let json = serde_json::to_string(&ErrorKind::Dispatch).unwrap();
        assert_eq!(json, "\"DISPATCH_ERROR\"");
    }
}
