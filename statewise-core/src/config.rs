//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Tunables of the evaluation pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Lets generic requirement handlers turn a fulfilled requirement back
    /// into an unfulfilled one. When false such changes are ignored.
    pub allow_generic_revocation: bool,
}

impl EngineConfig {
    pub fn with_generic_revocation(mut self, allow: bool) -> Self {
        self.allow_generic_revocation = allow;
        self
    }
}
