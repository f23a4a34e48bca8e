//! 规则编译器
//!
//! 将规则定义编译成纯函数谓词 `Fact -> bool` 和预解析的动作列表。
//! 操作符、字段路径和条件结构在这里一次性校验，评估阶段不再失败。

use crate::actions::CompiledAction;
use crate::error::{Result, RuleError};
use crate::evaluator::ConditionEvaluator;
use crate::expression::Expression;
use crate::fact::{Fact, FieldPath};
use crate::models::{ActionSpec, ConditionChild, ConditionNode, FieldCondition, RuleDefinition};
use crate::operators::{Combinator, Operator};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// 编译后的条件谓词
pub type Predicate = Arc<dyn Fn(&Fact) -> bool + Send + Sync>;

/// 编译后的规则
#[derive(Clone)]
pub struct CompiledRule {
    name: String,
    /// 编译所用的定义，供需要独立实例的工作者重新编译
    definition: Arc<RuleDefinition>,
    predicate: Predicate,
    actions: Vec<CompiledAction>,
    /// 条件和更新表达式中引用的所有字段路径
    pub required_fields: HashSet<String>,
}

impl CompiledRule {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 评估条件
    pub fn matches(&self, fact: &Fact) -> bool {
        (self.predicate)(fact)
    }

    pub fn actions(&self) -> &[CompiledAction] {
        &self.actions
    }

    pub fn definition(&self) -> &RuleDefinition {
        &self.definition
    }
}

impl fmt::Debug for CompiledRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRule")
            .field("name", &self.name)
            .field("actions", &self.actions.len())
            .field("required_fields", &self.required_fields)
            .finish()
    }
}

/// 条件右侧：字面量或同一事实中的另一个字段
enum Operand {
    Literal(Value),
    Field(FieldPath),
}

/// 规则编译器
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleCompiler;

impl RuleCompiler {
    pub fn new() -> Self {
        Self
    }

    /// 从 JSON 字符串编译规则
    pub fn compile_from_json(&self, json: &str) -> Result<CompiledRule> {
        let definition: RuleDefinition = serde_json::from_str(json)?;
        self.compile(&definition)
    }

    /// 编译规则
    pub fn compile(&self, definition: &RuleDefinition) -> Result<CompiledRule> {
        let rule = definition.name.as_str();
        if rule.trim().is_empty() {
            return Err(RuleError::CompileError {
                rule: rule.to_string(),
                reason: "规则名称不能为空".to_string(),
            });
        }

        let mut required_fields = HashSet::new();
        let predicate =
            self.compile_node(rule, &definition.condition, "condition", &mut required_fields)?;

        let actions = definition
            .actions
            .iter()
            .enumerate()
            .map(|(i, spec)| self.compile_action(rule, spec, i, &mut required_fields))
            .collect::<Result<Vec<_>>>()?;

        Ok(CompiledRule {
            name: rule.to_string(),
            definition: Arc::new(definition.clone()),
            predicate,
            actions,
            required_fields,
        })
    }

    /// 编译组合子节点，子节点按声明顺序短路求值
    fn compile_node(
        &self,
        rule: &str,
        node: &ConditionNode,
        path: &str,
        fields: &mut HashSet<String>,
    ) -> Result<Predicate> {
        if node.children().is_empty() {
            return Err(RuleError::CompileError {
                rule: rule.to_string(),
                reason: format!("{} 组 '{}' 不能为空", node.combinator(), path),
            });
        }

        let children = node
            .children()
            .iter()
            .enumerate()
            .map(|(i, child)| {
                let child_path = format!("{}.{}", path, i);
                match child {
                    ConditionChild::Group(inner) => {
                        self.compile_node(rule, inner, &child_path, fields)
                    }
                    ConditionChild::Field(cond) => {
                        self.compile_condition(rule, cond, &child_path, fields)
                    }
                }
            })
            .collect::<Result<Vec<Predicate>>>()?;

        let predicate: Predicate = match node.combinator() {
            Combinator::All => Arc::new(move |fact: &Fact| children.iter().all(|p| p(fact))),
            Combinator::Any => Arc::new(move |fact: &Fact| children.iter().any(|p| p(fact))),
        };
        Ok(predicate)
    }

    /// 编译字段条件
    fn compile_condition(
        &self,
        rule: &str,
        cond: &FieldCondition,
        path: &str,
        fields: &mut HashSet<String>,
    ) -> Result<Predicate> {
        let operator: Operator =
            cond.operator
                .parse()
                .map_err(|_| RuleError::UnsupportedOperator {
                    rule: rule.to_string(),
                    operator: cond.operator.clone(),
                })?;

        let field = self.parse_path(rule, &cond.field, path)?;

        let operand = match (&cond.value, &cond.value_field) {
            (Some(value), None) => Operand::Literal(value.clone()),
            (None, Some(reference)) => Operand::Field(self.parse_path(rule, reference, path)?),
            (Some(_), Some(_)) => {
                return Err(RuleError::CompileError {
                    rule: rule.to_string(),
                    reason: format!("条件 '{}' 不能同时指定 value 和 value_field", path),
                });
            }
            (None, None) => {
                return Err(RuleError::CompileError {
                    rule: rule.to_string(),
                    reason: format!("条件 '{}' 缺少 value 或 value_field", path),
                });
            }
        };

        fields.insert(field.to_string());
        let predicate: Predicate = match operand {
            Operand::Literal(value) => Arc::new(move |fact: &Fact| {
                ConditionEvaluator::evaluate(fact.get(&field), operator, Some(&value))
            }),
            Operand::Field(reference) => {
                fields.insert(reference.to_string());
                Arc::new(move |fact: &Fact| {
                    ConditionEvaluator::evaluate(fact.get(&field), operator, fact.get(&reference))
                })
            }
        };
        Ok(predicate)
    }

    /// 编译动作；更新表达式的语法错误保留到执行阶段，作为该动作的求值错误上报
    fn compile_action(
        &self,
        rule: &str,
        spec: &ActionSpec,
        index: usize,
        fields: &mut HashSet<String>,
    ) -> Result<CompiledAction> {
        let action = match spec {
            ActionSpec::Update {
                target_field,
                expression,
            } => {
                let target = self.parse_path(rule, target_field, &format!("actions.{}", index))?;
                let parsed = Expression::parse(expression).map(Arc::new);
                if let Ok(expr) = &parsed {
                    fields.extend(expr.fields().iter().map(|p| p.to_string()));
                }
                CompiledAction::Update {
                    target,
                    source: expression.clone(),
                    expression: parsed,
                }
            }
            ActionSpec::Redistribute { params } => CompiledAction::Redistribute {
                params: params.clone(),
            },
            ActionSpec::Alert { message } => CompiledAction::Alert {
                message: message.clone(),
            },
            ActionSpec::Notify {
                recipient,
                template,
            } => CompiledAction::Notify {
                recipient: recipient.clone(),
                template: template.clone(),
            },
        };
        Ok(action)
    }

    fn parse_path(&self, rule: &str, raw: &str, path: &str) -> Result<FieldPath> {
        raw.parse().map_err(|e| RuleError::CompileError {
            rule: rule.to_string(),
            reason: format!("'{}' {}", path, e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn fact(data: Value) -> Fact {
        Fact::from_record(0, data, &[]).unwrap()
    }

    fn compile(condition: Value) -> Result<CompiledRule> {
        RuleCompiler::new().compile_from_json(
            &json!({"name": "test", "condition": condition, "actions": []}).to_string(),
        )
    }

    fn pacing_rule_json() -> &'static str {
        r#"
        {
            "name": "under_pacing",
            "condition": {
                "all": [
                    {"field": "impressions_delivered", "operator": "<", "value_field": "impression_goal"},
                    {"any": [
                        {"field": "status", "operator": "==", "value": "ACTIVE"},
                        {"field": "priority.level", "operator": ">=", "value": 8}
                    ]}
                ]
            },
            "actions": [
                {"type": "update", "target_field": "pacing_osi", "expression": "impressions_delivered / impression_goal"},
                {"type": "alert", "message": "under pacing"}
            ]
        }
        "#
    }

    #[test]
    fn test_compile_from_json() {
        let compiled = RuleCompiler::new()
            .compile_from_json(pacing_rule_json())
            .unwrap();

        assert_eq!(compiled.name(), "under_pacing");
        assert_eq!(compiled.actions().len(), 2);
        assert_eq!(compiled.required_fields.len(), 4);
        for field in [
            "impressions_delivered",
            "impression_goal",
            "status",
            "priority.level",
        ] {
            assert!(compiled.required_fields.contains(field), "{}", field);
        }
    }

    #[test]
    fn test_reference_and_nested_groups() {
        let compiled = RuleCompiler::new()
            .compile_from_json(pacing_rule_json())
            .unwrap();

        assert!(compiled.matches(&fact(json!({
            "impressions_delivered": 500, "impression_goal": 1000, "status": "ACTIVE"
        }))));
        assert!(compiled.matches(&fact(json!({
            "impressions_delivered": 500, "impression_goal": 1000,
            "status": "PAUSED", "priority": {"level": 9}
        }))));
        assert!(!compiled.matches(&fact(json!({
            "impressions_delivered": 1500, "impression_goal": 1000, "status": "ACTIVE"
        }))));
        // 引用字段缺失
        assert!(!compiled.matches(&fact(json!({
            "impressions_delivered": 500, "status": "ACTIVE"
        }))));
    }

    #[test]
    fn test_all_requires_every_child_in_any_order() {
        let a = json!({"field": "a", "operator": "==", "value": 1});
        let b = json!({"field": "b", "operator": ">", "value": 10});
        let c = json!({"field": "c", "operator": "!=", "value": "x"});

        let orders = [
            vec![a.clone(), b.clone(), c.clone()],
            vec![c.clone(), a.clone(), b.clone()],
            vec![b.clone(), c.clone(), a.clone()],
        ];
        let facts = [
            json!({"a": 1, "b": 11, "c": "y"}),
            json!({"a": 1, "b": 11, "c": "x"}),
            json!({"a": 2, "b": 11, "c": "y"}),
            json!({"a": 1, "b": 5}),
            json!({}),
        ];

        for data in facts {
            let f = fact(data.clone());
            let expected = data["a"] == json!(1)
                && data["b"].as_i64().is_some_and(|b| b > 10)
                && data["c"] != json!("x");
            for order in &orders {
                let rule = compile(json!({"all": order})).unwrap();
                assert_eq!(rule.matches(&f), expected, "fact {:?}", data);
            }
        }
    }

    #[test]
    fn test_any_requires_one_child() {
        let rule = compile(json!({"any": [
            {"field": "a", "operator": "==", "value": 1},
            {"field": "b", "operator": "==", "value": 2}
        ]}))
        .unwrap();

        assert!(rule.matches(&fact(json!({"a": 1}))));
        assert!(rule.matches(&fact(json!({"b": 2}))));
        assert!(rule.matches(&fact(json!({"a": 1, "b": 2}))));
        assert!(!rule.matches(&fact(json!({"a": 2, "b": 1}))));
        assert!(!rule.matches(&fact(json!({}))));
    }

    #[test]
    fn test_compile_twice_is_deterministic() {
        let compiler = RuleCompiler::new();
        let first = compiler.compile_from_json(pacing_rule_json()).unwrap();
        let second = compiler.compile_from_json(pacing_rule_json()).unwrap();

        let facts = [
            json!({"impressions_delivered": 1, "impression_goal": 2, "status": "ACTIVE"}),
            json!({"impressions_delivered": 3, "impression_goal": 2, "status": "ACTIVE"}),
            json!({"priority": {"level": 8}}),
            json!({}),
        ];
        for data in facts {
            let f = fact(data);
            assert_eq!(first.matches(&f), second.matches(&f));
            assert_eq!(first.matches(&f), first.matches(&f));
        }
        assert_eq!(first.required_fields, second.required_fields);
    }

    #[test]
    fn test_unsupported_operator() {
        let err = compile(json!({"all": [
            {"field": "a", "operator": "==", "value": 1},
            {"field": "b", "operator": "contains", "value": "x"}
        ]}))
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnsupportedOperator);
        assert!(err.to_string().contains("contains"));
    }

    #[test]
    fn test_unsupported_operator_in_nested_group() {
        let err = compile(json!({"any": [
            {"field": "a", "operator": "==", "value": 1},
            {"all": [{"field": "b", "operator": "=~", "value": "x"}]}
        ]}))
        .unwrap_err();
        assert!(matches!(err, RuleError::UnsupportedOperator { .. }));
    }

    #[test]
    fn test_malformed_conditions() {
        let empty = compile(json!({"all": []})).unwrap_err();
        assert_eq!(empty.kind(), ErrorKind::Compile);
        assert!(empty.to_string().contains("不能为空"));

        let nested_empty = compile(json!({"all": [{"any": []}]})).unwrap_err();
        assert_eq!(nested_empty.kind(), ErrorKind::Compile);

        let both = compile(json!({"all": [
            {"field": "a", "operator": "==", "value": 1, "value_field": "b"}
        ]}))
        .unwrap_err();
        assert!(both.to_string().contains("value_field"));

        let neither = compile(json!({"all": [{"field": "a", "operator": "=="}]})).unwrap_err();
        assert_eq!(neither.kind(), ErrorKind::Compile);

        let bad_path = compile(json!({"all": [
            {"field": "a..b", "operator": "==", "value": 1}
        ]}))
        .unwrap_err();
        assert!(bad_path.to_string().contains("a..b"));
    }

    #[test]
    fn test_malformed_json_is_compile_error() {
        let err = RuleCompiler::new()
            .compile_from_json(r#"{"name": "x", "condition": {"none": []}}"#)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Compile);
    }

    #[test]
    fn test_empty_name_rejected() {
        let definition = RuleDefinition::new(
            " ",
            ConditionNode::all(vec![FieldCondition::literal("a", "==", 1).into()]),
            vec![],
        );
        assert!(RuleCompiler::new().compile(&definition).is_err());
    }

    #[test]
    fn test_invalid_update_target_rejected() {
        let definition = RuleDefinition::new(
            "bad_target",
            ConditionNode::all(vec![FieldCondition::literal("a", "==", 1).into()]),
            vec![ActionSpec::Update {
                target_field: "pacing.".to_string(),
                expression: "1".to_string(),
            }],
        );
        let err = RuleCompiler::new().compile(&definition).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Compile);
    }

    #[test]
    fn test_expression_syntax_error_deferred() {
        let definition = RuleDefinition::new(
            "bad_expression",
            ConditionNode::all(vec![FieldCondition::literal("a", "==", 1).into()]),
            vec![ActionSpec::Update {
                target_field: "x".to_string(),
                expression: "a +".to_string(),
            }],
        );
        let compiled = RuleCompiler::new().compile(&definition).unwrap();
        assert!(matches!(
            &compiled.actions()[0],
            CompiledAction::Update { expression: Err(_), .. }
        ));
    }
}
