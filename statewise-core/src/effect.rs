//! Effect execution.
//!
//! Effects run after a transition has been committed. Every specific handler
//! registered for an effect's kind is invoked (handlers are independent side
//! actions, not alternatives), then every generic handler sees all statuses.
//! Failures are recorded in the summary and never undo the transition.

use crate::engine::TransitionInfo;
use crate::instance::Instance;
use crate::payload::Effect;
use crate::registry::HandlerRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Execution status of a single effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectResult {
    pub effect: Effect,
    pub is_executed: bool,
    /// Handlers that completed the effect, in invocation order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handlers_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub duration: Duration,
}

impl EffectResult {
    fn pending(effect: &Effect) -> Self {
        Self {
            effect: effect.clone(),
            is_executed: false,
            handlers_used: Vec::new(),
            errors: Vec::new(),
            duration: Duration::ZERO,
        }
    }
}

/// Outcome of running the effects of one transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectExecution {
    pub all_effects_executed: bool,
    pub results: Vec<EffectResult>,
    pub total_execution_time: Duration,
    pub success_count: usize,
    pub failure_count: usize,
}

/// Runs the two-phase effect pipeline against the registered handlers.
#[derive(Debug, Clone)]
pub struct EffectExecutor {
    registry: Arc<HandlerRegistry>,
}

impl EffectExecutor {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    /// Executes `effects` for `instance` after `transition` committed.
    pub async fn execute(
        &self,
        effects: &[Effect],
        instance: &Instance,
        transition: &TransitionInfo,
    ) -> EffectExecution {
        let started = Instant::now();
        let mut results = Vec::with_capacity(effects.len());

        for effect in effects {
            results.push(self.run_specific(effect, instance, transition).await);
        }

        for handler in self.registry.generic_effect_handlers() {
            match handler.process(&results, instance.id(), transition).await {
                Ok(updated) if updated.len() == results.len() => {
                    for (current, proposed) in results.iter_mut().zip(updated) {
                        if !current.is_executed && proposed.is_executed {
                            current.is_executed = true;
                            current.handlers_used.push(handler.name().to_string());
                        }
                    }
                }
                Ok(updated) => {
                    tracing::warn!(
                        "Generic effect handler {} returned {} statuses for {} effects",
                        handler.name(),
                        updated.len(),
                        results.len()
                    );
                }
                Err(e) => {
                    tracing::warn!("Generic effect handler {} failed: {}", handler.name(), e);
                    for result in results.iter_mut().filter(|r| !r.is_executed) {
                        result
                            .errors
                            .push(format!("generic handler '{}' failed: {}", handler.name(), e));
                    }
                }
            }
        }

        let success_count = results.iter().filter(|r| r.is_executed).count();
        let failure_count = results.len() - success_count;
        let total_execution_time = started.elapsed();

        if failure_count > 0 {
            tracing::warn!(
                "{} of {} effect(s) failed for instance {}",
                failure_count,
                results.len(),
                instance.id()
            );
        }

        EffectExecution {
            all_effects_executed: failure_count == 0,
            results,
            total_execution_time,
            success_count,
            failure_count,
        }
    }

    async fn run_specific(
        &self,
        effect: &Effect,
        instance: &Instance,
        transition: &TransitionInfo,
    ) -> EffectResult {
        let started = Instant::now();
        let mut result = EffectResult::pending(effect);
        let handlers = self.registry.effect_handlers(&effect.kind);
        let mut all_succeeded = !handlers.is_empty();

        for handler in handlers {
            match handler.execute(effect, instance.id(), transition).await {
                Ok(true) => result.handlers_used.push(handler.name().to_string()),
                Ok(false) => {
                    all_succeeded = false;
                    result.errors.push(format!(
                        "handler '{}' did not complete effect '{}'",
                        handler.name(),
                        effect.label()
                    ));
                }
                Err(e) => {
                    all_succeeded = false;
                    tracing::warn!(
                        "Effect handler {} failed on '{}': {}",
                        handler.name(),
                        effect.label(),
                        e
                    );
                    result.errors.push(format!(
                        "handler '{}' failed for effect '{}': {}",
                        handler.name(),
                        effect.label(),
                        e
                    ));
                }
            }
        }

        if handlers.is_empty() {
            result.errors.push(format!(
                "no handler registered for effect kind '{}'",
                effect.kind
            ));
        }

        result.is_executed = all_succeeded;
        result.duration = started.elapsed();
        result
    }
}
