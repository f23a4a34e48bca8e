//! 动作执行器
//!
//! 匹配规则的动作按声明顺序执行。单个动作失败只记录错误，后续动作照常执行；
//! 更新动作写入该 (规则, 事实) 对的工作副本，后续动作可见。

use super::{ActionRecord, ActionSink, CompiledAction};
use crate::compiler::CompiledRule;
use crate::error::ActionError;
use crate::fact::Fact;
use crate::models::ActionKind;
use crate::outcome::{ActionResult, ErrorRecord};
use regex::{Captures, Regex};
use serde_json::{Value, json};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z0-9_]+)*)\}")
        .expect("placeholder pattern is valid")
});

/// 渲染通知模板中的 `${field.path}` 占位符
///
/// 无法解析的占位符原样保留。
pub fn render_template(template: &str, fact: Option<&Fact>) -> String {
    let Some(fact) = fact else {
        return template.to_string();
    };

    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let resolved = caps[1]
                .parse()
                .ok()
                .and_then(|path| fact.get(&path));
            match resolved {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// 一条规则的全部动作在一个事实上的执行结果
#[derive(Debug)]
pub struct ActionsReport {
    pub applied: Vec<ActionResult>,
    pub errors: Vec<ErrorRecord>,
    /// 执行后的工作副本
    pub fact: Option<Fact>,
    /// 是否有更新动作成功
    pub updated: bool,
}

/// 动作执行器
#[derive(Clone)]
pub struct ActionExecutor {
    sink: Arc<dyn ActionSink>,
    timeout: Duration,
}

impl ActionExecutor {
    pub fn new(sink: Arc<dyn ActionSink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    /// 按声明顺序执行规则的所有动作
    #[instrument(skip_all, fields(rule_name = %rule.name()))]
    pub async fn execute_all(&self, rule: &CompiledRule, fact: Option<Fact>) -> ActionsReport {
        let fact_id = fact.as_ref().and_then(|f| f.id().map(str::to_string));
        let mut working = fact;
        let mut applied = Vec::new();
        let mut errors = Vec::new();
        let mut updated = false;

        for action in rule.actions() {
            match self.execute(rule.name(), action, working.as_mut()).await {
                Ok(result) => {
                    updated |= result.action == ActionKind::Update;
                    applied.push(result);
                }
                Err(err) => {
                    warn!(
                        rule_name = %rule.name(),
                        fact_id = ?fact_id,
                        action = %action.kind(),
                        error = %err,
                        "动作执行失败"
                    );
                    let mut record =
                        ErrorRecord::from_action_error(action.kind(), &err).with_rule(rule.name());
                    record.fact_id = fact_id.clone();
                    errors.push(record);
                }
            }
        }

        ActionsReport {
            applied,
            errors,
            fact: working,
            updated,
        }
    }

    /// 执行单个动作，超过期限返回 `ActionError::Timeout`
    pub async fn execute(
        &self,
        rule_name: &str,
        action: &CompiledAction,
        fact: Option<&mut Fact>,
    ) -> Result<ActionResult, ActionError> {
        tokio::time::timeout(self.timeout, self.apply(rule_name, action, fact))
            .await
            .map_err(|_| ActionError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            })?
    }

    async fn apply(
        &self,
        rule_name: &str,
        action: &CompiledAction,
        fact: Option<&mut Fact>,
    ) -> Result<ActionResult, ActionError> {
        let fact_id = fact.as_deref().and_then(|f| f.id().map(str::to_string));

        match action {
            CompiledAction::Update {
                target,
                source,
                expression,
            } => {
                let fact = fact.ok_or(ActionError::ContextMissing { action: "update" })?;
                let expression = expression.as_ref().map_err(|e| e.clone())?;

                info!(rule_name, target = %target, expression = %source, "使用表达式更新字段");
                let value = expression.evaluate_json(fact)?;
                // 先写暂存副本，下游接收成功后才提交到工作副本
                let mut staged = fact.clone();
                staged.set(target, value.clone())?;

                self.sink
                    .emit(ActionRecord::new(
                        ActionKind::Update,
                        rule_name,
                        fact_id,
                        json!({"target": target.to_string(), "value": value}),
                    ))
                    .await?;

                *fact = staged;
                info!(rule_name, target = %target, value = %value, "字段已更新");

                Ok(ActionResult::new(ActionKind::Update)
                    .with_target(target.to_string())
                    .with_value(value))
            }
            CompiledAction::Redistribute { params } => {
                let payload = Value::Object(params.clone());
                self.sink
                    .emit(ActionRecord::new(
                        ActionKind::Redistribute,
                        rule_name,
                        fact_id,
                        payload.clone(),
                    ))
                    .await?;
                Ok(ActionResult::new(ActionKind::Redistribute).with_value(payload))
            }
            CompiledAction::Alert { message } => {
                self.sink
                    .emit(ActionRecord::new(
                        ActionKind::Alert,
                        rule_name,
                        fact_id,
                        json!({"message": message}),
                    ))
                    .await?;
                Ok(ActionResult::new(ActionKind::Alert).with_value(Value::String(message.clone())))
            }
            CompiledAction::Notify {
                recipient,
                template,
            } => {
                let recipient = recipient
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .ok_or(ActionError::MissingRecipient)?;
                let message = render_template(template, fact.as_deref());
                debug!(rule_name, recipient, message = %message, "通知内容已渲染");

                self.sink
                    .emit(ActionRecord::new(
                        ActionKind::Notify,
                        rule_name,
                        fact_id,
                        json!({"recipient": recipient, "template": template, "message": message}),
                    ))
                    .await?;
                Ok(ActionResult::new(ActionKind::Notify)
                    .with_target(recipient)
                    .with_value(Value::String(message)))
            }
        }
    }
}
