//! 树遍历解释器
//!
//! 整数在 `+ - * %` 下保持整数并检查溢出，`/` 总是产生浮点数。

use super::ExpressionError;
use super::ast::{BinaryOp, Expr, Node};
use crate::fact::{Fact, type_name};
use serde_json::{Number, Value};
use std::cmp::Ordering;

/// 表达式求值结果
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl ExprValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) | Self::Float(_) => "number",
            Self::Str(_) => "string",
            Self::Bool(_) => "boolean",
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// 转换为 JSON 值，非有限浮点数返回 None
    pub fn to_json(&self) -> Option<Value> {
        match self {
            Self::Int(n) => Some(Value::from(*n)),
            Self::Float(n) => Number::from_f64(*n).map(Value::Number),
            Self::Str(s) => Some(Value::String(s.clone())),
            Self::Bool(b) => Some(Value::Bool(*b)),
        }
    }
}

impl std::fmt::Display for ExprValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{}", n),
            Self::Float(n) => write!(f, "{}", n),
            Self::Str(s) => write!(f, "{}", s),
            Self::Bool(b) => write!(f, "{}", b),
        }
    }
}

pub struct Interpreter<'a> {
    source: &'a str,
    fact: &'a Fact,
}

impl<'a> Interpreter<'a> {
    pub fn new(source: &'a str, fact: &'a Fact) -> Self {
        Self { source, fact }
    }

    fn error(&self, node: &Node, message: impl Into<String>) -> ExpressionError {
        ExpressionError::at(self.source, node.span.clone(), message)
    }

    pub fn eval(&self, node: &Node) -> Result<ExprValue, ExpressionError> {
        match &node.expr {
            Expr::Int(n) => Ok(ExprValue::Int(*n)),
            Expr::Float(n) => Ok(ExprValue::Float(*n)),
            Expr::String(s) => Ok(ExprValue::Str(s.clone())),
            Expr::Bool(b) => Ok(ExprValue::Bool(*b)),
            Expr::Field(path) => {
                let value = self
                    .fact
                    .get(path)
                    .ok_or_else(|| self.error(node, format!("未知字段 '{}'", path)))?;
                self.scalar(node, value)
            }
            Expr::Neg(inner) => match self.eval(inner)? {
                ExprValue::Int(n) => n
                    .checked_neg()
                    .map(ExprValue::Int)
                    .ok_or_else(|| self.error(node, "整数溢出")),
                ExprValue::Float(n) => Ok(ExprValue::Float(-n)),
                other => Err(self.error(node, format!("无法对 {} 取负", other.type_name()))),
            },
            Expr::Binary { op, left, right } => {
                let lhs = self.eval(left)?;
                let rhs = self.eval(right)?;
                let result = self.binary(node, *op, lhs, rhs)?;
                if matches!(result, ExprValue::Float(n) if !n.is_finite()) {
                    return Err(self.error(node, "结果不是有限数值"));
                }
                Ok(result)
            }
        }
    }

    fn scalar(&self, node: &Node, value: &Value) -> Result<ExprValue, ExpressionError> {
        match value {
            Value::Bool(b) => Ok(ExprValue::Bool(*b)),
            Value::String(s) => Ok(ExprValue::Str(s.clone())),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(ExprValue::Int(i)),
                None => n
                    .as_f64()
                    .map(ExprValue::Float)
                    .ok_or_else(|| self.error(node, "无法表示的数值")),
            },
            other => Err(self.error(
                node,
                format!("字段值不是标量: {}", type_name(other)),
            )),
        }
    }

    fn binary(
        &self,
        node: &Node,
        op: BinaryOp,
        lhs: ExprValue,
        rhs: ExprValue,
    ) -> Result<ExprValue, ExpressionError> {
        use ExprValue::{Bool, Float, Int, Str};

        let mismatch = |lhs: &ExprValue, rhs: &ExprValue| {
            self.error(
                node,
                format!(
                    "操作符 '{}' 不支持 {} 与 {}",
                    op.symbol(),
                    lhs.type_name(),
                    rhs.type_name()
                ),
            )
        };
        let overflow = || self.error(node, "整数溢出");

        match op {
            BinaryOp::Add => match (&lhs, &rhs) {
                (Int(a), Int(b)) => a.checked_add(*b).map(Int).ok_or_else(overflow),
                (Str(a), Str(b)) => Ok(Str(format!("{}{}", a, b))),
                _ => self.float_op(&lhs, &rhs, |a, b| a + b).ok_or_else(|| mismatch(&lhs, &rhs)),
            },
            BinaryOp::Sub => match (&lhs, &rhs) {
                (Int(a), Int(b)) => a.checked_sub(*b).map(Int).ok_or_else(overflow),
                _ => self.float_op(&lhs, &rhs, |a, b| a - b).ok_or_else(|| mismatch(&lhs, &rhs)),
            },
            BinaryOp::Mul => match (&lhs, &rhs) {
                (Int(a), Int(b)) => a.checked_mul(*b).map(Int).ok_or_else(overflow),
                _ => self.float_op(&lhs, &rhs, |a, b| a * b).ok_or_else(|| mismatch(&lhs, &rhs)),
            },
            BinaryOp::Div => {
                let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
                    return Err(mismatch(&lhs, &rhs));
                };
                if b == 0.0 {
                    return Err(self.error(node, "除数为零"));
                }
                Ok(Float(a / b))
            }
            BinaryOp::Mod => match (&lhs, &rhs) {
                (Int(_), Int(0)) => Err(self.error(node, "除数为零")),
                (Int(a), Int(b)) => a.checked_rem(*b).map(Int).ok_or_else(overflow),
                _ => {
                    let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
                        return Err(mismatch(&lhs, &rhs));
                    };
                    if b == 0.0 {
                        return Err(self.error(node, "除数为零"));
                    }
                    Ok(Float(a % b))
                }
            },
            BinaryOp::Eq => Ok(Bool(values_equal(&lhs, &rhs))),
            BinaryOp::Ne => Ok(Bool(!values_equal(&lhs, &rhs))),
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
                let ordering = match (&lhs, &rhs) {
                    (Str(a), Str(b)) => Some(a.cmp(b)),
                    _ => match (lhs.as_f64(), rhs.as_f64()) {
                        (Some(a), Some(b)) => a.partial_cmp(&b),
                        _ => None,
                    },
                };
                let ordering = ordering.ok_or_else(|| mismatch(&lhs, &rhs))?;
                Ok(Bool(match op {
                    BinaryOp::Lt => ordering == Ordering::Less,
                    BinaryOp::Gt => ordering == Ordering::Greater,
                    BinaryOp::Le => ordering != Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }))
            }
        }
    }

    fn float_op(
        &self,
        lhs: &ExprValue,
        rhs: &ExprValue,
        f: impl Fn(f64, f64) -> f64,
    ) -> Option<ExprValue> {
        Some(ExprValue::Float(f(lhs.as_f64()?, rhs.as_f64()?)))
    }
}

fn values_equal(lhs: &ExprValue, rhs: &ExprValue) -> bool {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => lhs == rhs,
    }
}
