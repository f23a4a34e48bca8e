//! 更新动作的表达式语言
//!
//! 封闭文法：字段引用、数字与字符串字面量、算术与比较运算。没有函数调用，
//! 作用域仅限当前事实的字段。表达式在规则注册时解析一次，之后可并发求值。

mod ast;
mod interpreter;
mod lexer;
mod parser;

pub use interpreter::ExprValue;
pub use lexer::Span;

use crate::fact::{Fact, FieldPath};
use serde_json::Value;
use thiserror::Error;

/// 表达式解析或求值错误，携带出错的子表达式
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}: '{fragment}'")]
pub struct ExpressionError {
    message: String,
    fragment: String,
}

impl ExpressionError {
    pub(crate) fn at(source: &str, span: Span, message: impl Into<String>) -> Self {
        let fragment = source
            .get(span)
            .filter(|s| !s.is_empty())
            .unwrap_or(source);
        Self {
            message: message.into(),
            fragment: fragment.to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// 出错的子表达式原文
    pub fn fragment(&self) -> &str {
        &self.fragment
    }
}

/// 已解析的表达式
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: ast::Node,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = lexer::lex(source)
            .map_err(|e| ExpressionError::at(source, e.span, e.message))?;
        let root = parser::Parser::new(&tokens, source.len())
            .parse()
            .map_err(|e| ExpressionError::at(source, e.span, e.message))?;

        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// 表达式引用的字段
    pub fn fields(&self) -> Vec<&FieldPath> {
        let mut out = Vec::new();
        self.root.collect_fields(&mut out);
        out
    }

    /// 以事实为作用域求值
    pub fn evaluate(&self, fact: &Fact) -> Result<ExprValue, ExpressionError> {
        interpreter::Interpreter::new(&self.source, fact).eval(&self.root)
    }

    /// 求值并转换为 JSON 值
    pub fn evaluate_json(&self, fact: &Fact) -> Result<Value, ExpressionError> {
        let value = self.evaluate(fact)?;
        value.to_json().ok_or_else(|| {
            ExpressionError::at(&self.source, 0..self.source.len(), "结果不是有限数值")
        })
    }
}

impl std::str::FromStr for Expression {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}
