//! 条件评估器
//!
//! 比较语义：
//! - 任一侧不存在：仅 `!=` 为真
//! - 两侧都是整数时按整数精确比较，否则按 f64 比较（`100 == 100.0`）
//! - 字符串按字典序比较，ISO 日期因此可直接比较大小
//! - 其余类型只支持相等判断，类型不一致时不相等且不可排序

use crate::operators::Operator;
use serde_json::{Number, Value};
use std::cmp::Ordering;

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估单个比较
    ///
    /// # Arguments
    /// * `left` - 从事实中解析出的字段值
    /// * `operator` - 操作符
    /// * `right` - 字面量或引用字段的值
    pub fn evaluate(left: Option<&Value>, operator: Operator, right: Option<&Value>) -> bool {
        let (Some(left), Some(right)) = (left, right) else {
            return operator == Operator::Neq;
        };

        match operator {
            Operator::Eq => Self::eq(left, right),
            Operator::Neq => !Self::eq(left, right),
            Operator::Lt => Self::ordering(left, right) == Some(Ordering::Less),
            Operator::Gt => Self::ordering(left, right) == Some(Ordering::Greater),
            Operator::Lte => matches!(
                Self::ordering(left, right),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Gte => matches!(
                Self::ordering(left, right),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }

    /// 相等比较
    fn eq(left: &Value, right: &Value) -> bool {
        if let (Value::Number(a), Value::Number(b)) = (left, right) {
            return Self::compare_numbers(a, b) == Some(Ordering::Equal);
        }
        left == right
    }

    /// 排序比较，不可比较时返回 None
    fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => Self::compare_numbers(a, b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// 整数之间精确比较（i64 与 u64 混合时经 i128），其余情况按 f64 比较
    fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
        match (as_integer(a), as_integer(b)) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        }
    }
}

fn as_integer(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}
