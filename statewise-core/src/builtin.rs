//! Built-in requirement and effect kinds.
//!
//! - `context_flag` - fulfilled when a dotted path in the transition context
//!   is truthy, or equals `equals` when given
//! - `log` - writes a message to the tracing log
//!
//! Install all of them with [`BuiltinHandlers`].

use crate::engine::TransitionInfo;
use crate::error::HandlerError;
use crate::handler::{EffectHandler, RequirementHandler};
use crate::ids::InstanceId;
use crate::payload::PayloadKind;
use crate::registry::{HandlerModule, HandlerRegistry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Requires a context field, e.g. `{"path": "order.paid"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextFlag {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<Value>,
}

impl ContextFlag {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            equals: None,
        }
    }

    pub fn equals(mut self, value: Value) -> Self {
        self.equals = Some(value);
        self
    }

    /// Checks the flag against `context`. A missing context never matches.
    pub fn matches(&self, context: Option<&Value>) -> bool {
        let Some(context) = context else {
            return false;
        };
        let value = get_field(context, &self.path);
        match &self.equals {
            Some(expected) => value == expected,
            None => is_truthy(value),
        }
    }
}

impl PayloadKind for ContextFlag {
    const KIND: &'static str = "context_flag";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// Logs `message` once the transition committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub message: String,
    #[serde(default)]
    pub level: LogLevel,
}

impl LogMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: LogLevel::default(),
        }
    }
}

impl PayloadKind for LogMessage {
    const KIND: &'static str = "log";
}

pub struct ContextFlagHandler;

#[async_trait]
impl RequirementHandler<ContextFlag> for ContextFlagHandler {
    fn name(&self) -> &str {
        "context_flag"
    }

    async fn evaluate(
        &self,
        requirement: &ContextFlag,
        _instance_id: InstanceId,
        context: Option<&Value>,
    ) -> Result<bool, HandlerError> {
        Ok(requirement.matches(context))
    }
}

pub struct LogEffectHandler;

#[async_trait]
impl EffectHandler<LogMessage> for LogEffectHandler {
    fn name(&self) -> &str {
        "log"
    }

    async fn execute(
        &self,
        effect: &LogMessage,
        instance_id: InstanceId,
        transition: &TransitionInfo,
    ) -> Result<bool, HandlerError> {
        let actor = &transition.actor;
        match effect.level {
            LogLevel::Debug => tracing::debug!("[{}] {} ({})", instance_id, effect.message, actor),
            LogLevel::Info => tracing::info!("[{}] {} ({})", instance_id, effect.message, actor),
            LogLevel::Warn => tracing::warn!("[{}] {} ({})", instance_id, effect.message, actor),
            LogLevel::Error => tracing::error!("[{}] {} ({})", instance_id, effect.message, actor),
        }
        Ok(true)
    }
}

/// Registers the handlers of every built-in kind.
pub struct BuiltinHandlers;

impl HandlerModule for BuiltinHandlers {
    fn register(&self, registry: &mut HandlerRegistry) {
        registry
            .register_requirement_handler::<ContextFlag, _>(ContextFlagHandler)
            .register_effect_handler::<LogMessage, _>(LogEffectHandler);
    }
}

fn get_field<'a>(context: &'a Value, path: &str) -> &'a Value {
    let mut current = context;
    for part in path.split('.') {
        match current {
            Value::Object(map) => current = map.get(part).unwrap_or(&Value::Null),
            _ => return &Value::Null,
        }
    }
    current
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{Effect, Requirement};
    use serde_json::json;

    #[test]
    fn test_context_flag_truthiness() {
        let flag = ContextFlag::new("order.paid");

        assert!(flag.matches(Some(&json!({"order": {"paid": true}}))));
        assert!(!flag.matches(Some(&json!({"order": {"paid": false}}))));
        assert!(!flag.matches(Some(&json!({"order": {}}))));
        assert!(!flag.matches(Some(&json!({"order": "paid"}))));
        assert!(!flag.matches(None));

        assert!(ContextFlag::new("n").matches(Some(&json!({"n": 3}))));
        assert!(!ContextFlag::new("n").matches(Some(&json!({"n": 0}))));
        assert!(!ContextFlag::new("s").matches(Some(&json!({"s": ""}))));
    }

    #[test]
    fn test_context_flag_equals() {
        let flag = ContextFlag::new("status").equals(json!("active"));
        assert!(flag.matches(Some(&json!({"status": "active"}))));
        assert!(!flag.matches(Some(&json!({"status": "closed"}))));
    }

    #[test]
    fn test_payload_round_trip() {
        let requirement = Requirement::of(&ContextFlag::new("approved")).unwrap();
        assert_eq!(requirement.kind, "context_flag");
        assert_eq!(requirement.decode::<ContextFlag>().unwrap().path, "approved");

        let effect = Effect::raw("log", json!({"message": "hello"}));
        let decoded = effect.decode::<LogMessage>().unwrap();
        assert_eq!(decoded.level, LogLevel::Info);
    }

    #[test]
    fn test_module_registers_all_kinds() {
        let mut registry = HandlerRegistry::new();
        registry.install(&BuiltinHandlers);
        assert!(registry.has_requirement_handler(ContextFlag::KIND));
        assert!(registry.has_effect_handler(LogMessage::KIND));
    }
}
