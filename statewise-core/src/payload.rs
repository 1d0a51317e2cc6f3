//! Opaque requirement and effect values.
//!
//! Transitions carry requirements and effects as tagged values: a stable
//! `kind` discriminator plus JSON parameters. The core never looks inside
//! `params`; handlers registered for a kind decode it into their concrete type.
//!
//! ```json
//! {"kind": "budget_approved", "optional": false, "params": {"min_amount": 500}}
//! ```

use crate::error::{CoreError, HandlerError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A concrete requirement or effect shape.
pub trait PayloadKind: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable discriminator stored alongside the parameters.
    const KIND: &'static str;
}

/// A precondition attached to a transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub kind: String,

    /// Unfulfilled optional requirements do not block the transition.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub params: Value,
}

impl Requirement {
    /// Wraps a concrete requirement value.
    pub fn of<R: PayloadKind>(requirement: &R) -> Result<Self, CoreError> {
        Ok(Self {
            kind: R::KIND.to_string(),
            optional: false,
            description: None,
            params: serde_json::to_value(requirement)?,
        })
    }

    /// Creates a requirement from raw parts.
    pub fn raw(kind: impl Into<String>, params: Value) -> Self {
        Self {
            kind: kind.into(),
            optional: false,
            description: None,
            params,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is<R: PayloadKind>(&self) -> bool {
        self.kind == R::KIND
    }

    /// Decodes the parameters into the concrete type.
    pub fn decode<R: PayloadKind>(&self) -> Result<R, HandlerError> {
        decode_params(&self.kind, &self.params)
    }

    /// Human-readable label used in failure reasons.
    pub fn label(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.kind)
    }
}

/// A side action run after a transition commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub params: Value,
}

impl Effect {
    /// Wraps a concrete effect value.
    pub fn of<E: PayloadKind>(effect: &E) -> Result<Self, CoreError> {
        Ok(Self {
            kind: E::KIND.to_string(),
            description: None,
            params: serde_json::to_value(effect)?,
        })
    }

    pub fn raw(kind: impl Into<String>, params: Value) -> Self {
        Self {
            kind: kind.into(),
            description: None,
            params,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is<E: PayloadKind>(&self) -> bool {
        self.kind == E::KIND
    }

    pub fn decode<E: PayloadKind>(&self) -> Result<E, HandlerError> {
        decode_params(&self.kind, &self.params)
    }

    pub fn label(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.kind)
    }
}

fn decode_params<T: PayloadKind>(kind: &str, params: &Value) -> Result<T, HandlerError> {
    // Unit-like payloads are stored without params.
    let params = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params.clone()
    };
    serde_json::from_value(params).map_err(|source| HandlerError::Decode {
        kind: kind.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct MinAmount {
        amount: u64,
    }

    impl PayloadKind for MinAmount {
        const KIND: &'static str = "min_amount";
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Notify {}

    impl PayloadKind for Notify {
        const KIND: &'static str = "notify";
    }

    #[test]
    fn test_requirement_wraps_kind_and_params() {
        let req = Requirement::of(&MinAmount { amount: 500 }).unwrap();
        assert_eq!(req.kind, "min_amount");
        assert_eq!(req.params, json!({"amount": 500}));
        assert!(req.is::<MinAmount>());
        assert_eq!(req.decode::<MinAmount>().unwrap(), MinAmount { amount: 500 });
    }

    #[test]
    fn test_decode_wrong_shape() {
        let req = Requirement::raw("min_amount", json!({"amount": "lots"}));
        let err = req.decode::<MinAmount>().unwrap_err();
        assert!(matches!(err, HandlerError::Decode { .. }));
    }

    #[test]
    fn test_null_params_decode_as_empty_object() {
        let effect = Effect::raw("notify", Value::Null);
        assert_eq!(effect.decode::<Notify>().unwrap(), Notify {});
    }

    #[test]
    fn test_optional_flag_serialization() {
        let req = Requirement::raw("x", json!({})).optional();
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["optional"], json!(true));

        let parsed: Requirement = serde_json::from_value(json!({"kind": "x"})).unwrap();
        assert!(!parsed.optional);
        assert_eq!(parsed.label(), "x");
    }
}
