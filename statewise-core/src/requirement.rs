//! Requirement evaluation.
//!
//! Evaluation runs in two fixed phases:
//!
//! 1. Specific handlers. Handlers registered for a requirement's kind are
//!    alternatives: they are tried in registration order and the first one
//!    reporting the requirement as fulfilled wins. A handler error becomes a
//!    failure reason and the next handler is tried.
//! 2. Generic handlers. Every generic handler sees all statuses, in
//!    registration order, and may mark unfulfilled requirements as fulfilled.
//!
//! The transition may proceed when every requirement is fulfilled or optional.

use crate::config::EngineConfig;
use crate::instance::Instance;
use crate::payload::Requirement;
use crate::registry::HandlerRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Evaluation status of a single requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementResult {
    pub requirement: Requirement,
    pub is_fulfilled: bool,
    /// Name of the handler that fulfilled the requirement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler_used: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_reasons: Vec<String>,
}

impl RequirementResult {
    fn pending(requirement: &Requirement) -> Self {
        Self {
            requirement: requirement.clone(),
            is_fulfilled: false,
            handler_used: None,
            failure_reasons: Vec::new(),
        }
    }

    pub fn is_optional(&self) -> bool {
        self.requirement.optional
    }

    /// Fulfilled, or optional and therefore not blocking.
    pub fn is_satisfied(&self) -> bool {
        self.is_fulfilled || self.is_optional()
    }

    /// Marks the requirement as fulfilled by `handler`.
    pub fn fulfil(&mut self, handler: impl Into<String>) {
        self.is_fulfilled = true;
        self.handler_used = Some(handler.into());
    }
}

/// Outcome of evaluating the requirements of one transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementEvaluation {
    pub all_requirements_met: bool,
    pub results: Vec<RequirementResult>,
    /// Why unmet requirements were not fulfilled, plus generic handler failures.
    pub failure_reasons: Vec<String>,
}

impl RequirementEvaluation {
    /// Evaluation of a transition without requirements.
    pub fn empty() -> Self {
        Self {
            all_requirements_met: true,
            results: Vec::new(),
            failure_reasons: Vec::new(),
        }
    }

    pub fn fulfilled_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_fulfilled).count()
    }
}

/// Runs the two-phase requirement pipeline against the registered handlers.
#[derive(Debug, Clone)]
pub struct RequirementEvaluator {
    registry: Arc<HandlerRegistry>,
    config: EngineConfig,
}

impl RequirementEvaluator {
    pub fn new(registry: Arc<HandlerRegistry>, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    /// Evaluates `requirements` for `instance`.
    pub async fn evaluate(
        &self,
        requirements: &[Requirement],
        instance: &Instance,
        context: Option<&Value>,
    ) -> RequirementEvaluation {
        if requirements.is_empty() {
            return RequirementEvaluation::empty();
        }

        let mut results = self.run_specific(requirements, instance, context).await;
        let generic_failures = self.run_generic(&mut results, instance, context).await;

        let mut failure_reasons = Vec::new();
        for result in results.iter().filter(|r| !r.is_satisfied()) {
            if result.failure_reasons.is_empty() {
                failure_reasons.push(self.unfulfilled_reason(&result.requirement));
            } else {
                failure_reasons.extend(result.failure_reasons.iter().cloned());
            }
        }
        failure_reasons.extend(generic_failures);

        let all_requirements_met = results.iter().all(RequirementResult::is_satisfied);
        tracing::debug!(
            "Evaluated {} requirement(s) for instance {}: met={}",
            results.len(),
            instance.id(),
            all_requirements_met
        );

        RequirementEvaluation {
            all_requirements_met,
            results,
            failure_reasons,
        }
    }

    async fn run_specific(
        &self,
        requirements: &[Requirement],
        instance: &Instance,
        context: Option<&Value>,
    ) -> Vec<RequirementResult> {
        let mut results = Vec::with_capacity(requirements.len());

        for requirement in requirements {
            let mut result = RequirementResult::pending(requirement);

            for handler in self.registry.requirement_handlers(&requirement.kind) {
                match handler.evaluate(requirement, instance.id(), context).await {
                    Ok(true) => {
                        result.fulfil(handler.name());
                        break;
                    }
                    Ok(false) => {
                        tracing::debug!(
                            "Handler {} did not fulfil requirement '{}'",
                            handler.name(),
                            requirement.label()
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Handler {} failed on requirement '{}': {}",
                            handler.name(),
                            requirement.label(),
                            e
                        );
                        result.failure_reasons.push(format!(
                            "handler '{}' failed for requirement '{}': {}",
                            handler.name(),
                            requirement.label(),
                            e
                        ));
                    }
                }
            }

            results.push(result);
        }

        results
    }

    async fn run_generic(
        &self,
        results: &mut [RequirementResult],
        instance: &Instance,
        context: Option<&Value>,
    ) -> Vec<String> {
        let mut failures = Vec::new();

        for handler in self.registry.generic_requirement_handlers() {
            match handler.process(results, instance.id(), context).await {
                Ok(updated) if updated.len() == results.len() => {
                    for (current, proposed) in results.iter_mut().zip(updated) {
                        self.merge(current, proposed, handler.name());
                    }
                }
                Ok(updated) => {
                    tracing::warn!(
                        "Generic handler {} returned {} statuses for {} requirements",
                        handler.name(),
                        updated.len(),
                        results.len()
                    );
                    failures.push(format!(
                        "generic handler '{}' returned {} statuses for {} requirements",
                        handler.name(),
                        updated.len(),
                        results.len()
                    ));
                }
                Err(e) => {
                    tracing::warn!("Generic handler {} failed: {}", handler.name(), e);
                    failures.push(format!("generic handler '{}' failed: {}", handler.name(), e));
                }
            }
        }

        failures
    }

    fn merge(&self, current: &mut RequirementResult, proposed: RequirementResult, handler: &str) {
        if proposed.failure_reasons.len() > current.failure_reasons.len() {
            let added = proposed.failure_reasons[current.failure_reasons.len()..].to_vec();
            current.failure_reasons.extend(added);
        }

        match (current.is_fulfilled, proposed.is_fulfilled) {
            (false, true) => {
                current.fulfil(proposed.handler_used.unwrap_or_else(|| handler.to_string()));
            }
            (true, false) if self.config.allow_generic_revocation => {
                tracing::debug!(
                    "Generic handler {} revoked requirement '{}'",
                    handler,
                    current.requirement.label()
                );
                current.is_fulfilled = false;
                current.handler_used = None;
                current.failure_reasons.push(format!(
                    "requirement '{}' revoked by generic handler '{}'",
                    current.requirement.label(),
                    handler
                ));
            }
            (true, false) => {
                tracing::warn!(
                    "Ignoring revocation of requirement '{}' by generic handler {}",
                    current.requirement.label(),
                    handler
                );
            }
            _ => {}
        }
    }

    fn unfulfilled_reason(&self, requirement: &Requirement) -> String {
        if self.registry.has_requirement_handler(&requirement.kind) {
            format!("requirement '{}' is not fulfilled", requirement.label())
        } else {
            format!(
                "no handler registered for requirement kind '{}'",
                requirement.kind
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{DefinitionBuilder, DefinitionStatus};
    use crate::error::HandlerError;
    use crate::handler::{GenericRequirementHandler, RequirementHandler};
    use crate::ids::InstanceId;
    use crate::payload::PayloadKind;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Serialize, Deserialize)]
    struct Check {
        id: u32,
    }

    impl PayloadKind for Check {
        const KIND: &'static str = "check";
    }

    enum Outcome {
        Yes,
        No,
        Fail,
    }

    struct Scripted {
        name: &'static str,
        outcome: Outcome,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl RequirementHandler<Check> for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn evaluate(
            &self,
            _requirement: &Check,
            _instance_id: InstanceId,
            _context: Option<&Value>,
        ) -> Result<bool, HandlerError> {
            self.calls.lock().push(self.name);
            match self.outcome {
                Outcome::Yes => Ok(true),
                Outcome::No => Ok(false),
                Outcome::Fail => Err(HandlerError::failed("backend down")),
            }
        }
    }

    /// Fulfils everything.
    struct Approver;

    #[async_trait]
    impl GenericRequirementHandler for Approver {
        fn name(&self) -> &str {
            "approver"
        }

        async fn process(
            &self,
            statuses: &[RequirementResult],
            _instance_id: InstanceId,
            _context: Option<&Value>,
        ) -> Result<Vec<RequirementResult>, HandlerError> {
            Ok(statuses
                .iter()
                .cloned()
                .map(|mut s| {
                    s.is_fulfilled = true;
                    s
                })
                .collect())
        }
    }

    /// Rejects everything.
    struct Revoker;

    #[async_trait]
    impl GenericRequirementHandler for Revoker {
        fn name(&self) -> &str {
            "revoker"
        }

        async fn process(
            &self,
            statuses: &[RequirementResult],
            _instance_id: InstanceId,
            _context: Option<&Value>,
        ) -> Result<Vec<RequirementResult>, HandlerError> {
            Ok(statuses
                .iter()
                .cloned()
                .map(|mut s| {
                    s.is_fulfilled = false;
                    s
                })
                .collect())
        }
    }

    struct Broken;

    #[async_trait]
    impl GenericRequirementHandler for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn process(
            &self,
            _statuses: &[RequirementResult],
            _instance_id: InstanceId,
            _context: Option<&Value>,
        ) -> Result<Vec<RequirementResult>, HandlerError> {
            Err(HandlerError::failed("boom"))
        }
    }

    /// Records its name and whether the first status arrived fulfilled.
    struct Observer {
        name: &'static str,
        fail: bool,
        seen: Arc<Mutex<Vec<(&'static str, bool)>>>,
    }

    #[async_trait]
    impl GenericRequirementHandler for Observer {
        fn name(&self) -> &str {
            self.name
        }

        async fn process(
            &self,
            statuses: &[RequirementResult],
            _instance_id: InstanceId,
            _context: Option<&Value>,
        ) -> Result<Vec<RequirementResult>, HandlerError> {
            self.seen
                .lock()
                .push((self.name, statuses.first().is_some_and(|s| s.is_fulfilled)));
            if self.fail {
                return Err(HandlerError::failed("unavailable"));
            }
            Ok(statuses.to_vec())
        }
    }

    fn instance() -> Instance {
        let def = DefinitionBuilder::new("t")
            .status(DefinitionStatus::Published)
            .initial_state("a")
            .build()
            .unwrap();
        Instance::create(Arc::new(def)).unwrap()
    }

    fn check(id: u32) -> Requirement {
        Requirement::of(&Check { id }).unwrap()
    }

    fn scripted(
        registry: &mut HandlerRegistry,
        calls: &Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
        outcome: Outcome,
    ) {
        registry.register_requirement_handler::<Check, _>(Scripted {
            name,
            outcome,
            calls: calls.clone(),
        });
    }

    #[tokio::test]
    async fn test_first_fulfilling_handler_wins() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        scripted(&mut registry, &calls, "h1", Outcome::No);
        scripted(&mut registry, &calls, "h2", Outcome::Yes);
        scripted(&mut registry, &calls, "h3", Outcome::Yes);

        let evaluator = RequirementEvaluator::new(Arc::new(registry), EngineConfig::default());
        let eval = evaluator.evaluate(&[check(1)], &instance(), None).await;

        assert!(eval.all_requirements_met);
        assert_eq!(eval.results[0].handler_used.as_deref(), Some("h2"));
        assert_eq!(*calls.lock(), vec!["h1", "h2"]);
    }

    #[tokio::test]
    async fn test_handler_error_is_not_fatal() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        scripted(&mut registry, &calls, "flaky", Outcome::Fail);
        scripted(&mut registry, &calls, "backup", Outcome::Yes);

        let evaluator = RequirementEvaluator::new(Arc::new(registry), EngineConfig::default());
        let eval = evaluator.evaluate(&[check(1)], &instance(), None).await;

        assert!(eval.all_requirements_met);
        assert_eq!(eval.results[0].handler_used.as_deref(), Some("backup"));
        assert_eq!(eval.results[0].failure_reasons.len(), 1);
        assert!(eval.results[0].failure_reasons[0].contains("backend down"));
        // Met requirements do not contribute to the summary
        assert!(eval.failure_reasons.is_empty());
    }

    #[tokio::test]
    async fn test_all_requirements_must_hold() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        scripted(&mut registry, &calls, "no", Outcome::No);

        let evaluator = RequirementEvaluator::new(Arc::new(registry), EngineConfig::default());
        let requirements = vec![
            check(1).with_description("budget approved"),
            Requirement::raw("unhandled", json!({})),
        ];
        let eval = evaluator.evaluate(&requirements, &instance(), None).await;

        assert!(!eval.all_requirements_met);
        assert_eq!(
            eval.failure_reasons,
            vec![
                "requirement 'budget approved' is not fulfilled".to_string(),
                "no handler registered for requirement kind 'unhandled'".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_optional_requirement_does_not_block() {
        let evaluator =
            RequirementEvaluator::new(Arc::new(HandlerRegistry::new()), EngineConfig::default());
        let eval = evaluator
            .evaluate(&[check(1).optional()], &instance(), None)
            .await;

        assert!(eval.all_requirements_met);
        assert!(!eval.results[0].is_fulfilled);
        assert!(eval.failure_reasons.is_empty());
    }

    #[tokio::test]
    async fn test_generic_handler_fulfils_and_errors_are_collected() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_generic_requirement_handler(Broken)
            .register_generic_requirement_handler(Approver);

        let evaluator = RequirementEvaluator::new(Arc::new(registry), EngineConfig::default());
        let eval = evaluator
            .evaluate(&[Requirement::raw("anything", json!({}))], &instance(), None)
            .await;

        assert!(eval.all_requirements_met);
        assert_eq!(eval.results[0].handler_used.as_deref(), Some("approver"));
        assert_eq!(
            eval.failure_reasons,
            vec!["generic handler 'broken' failed: boom".to_string()]
        );
    }

    #[tokio::test]
    async fn test_generic_handlers_run_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observer = |name, fail| Observer {
            name,
            fail,
            seen: seen.clone(),
        };
        let mut registry = HandlerRegistry::new();
        registry
            .register_generic_requirement_handler(observer("first", false))
            .register_generic_requirement_handler(observer("second", true))
            .register_generic_requirement_handler(Approver)
            .register_generic_requirement_handler(observer("third", false));

        let evaluator = RequirementEvaluator::new(Arc::new(registry), EngineConfig::default());
        let eval = evaluator
            .evaluate(&[Requirement::raw("anything", json!({}))], &instance(), None)
            .await;

        assert_eq!(
            *seen.lock(),
            vec![("first", false), ("second", false), ("third", true)]
        );
        assert!(eval.all_requirements_met);
        assert_eq!(
            eval.failure_reasons,
            vec!["generic handler 'second' failed: unavailable".to_string()]
        );
    }

    #[tokio::test]
    async fn test_generic_revocation_ignored_by_default() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        scripted(&mut registry, &calls, "yes", Outcome::Yes);
        registry.register_generic_requirement_handler(Revoker);
        let registry = Arc::new(registry);

        let evaluator = RequirementEvaluator::new(registry.clone(), EngineConfig::default());
        let eval = evaluator.evaluate(&[check(1)], &instance(), None).await;
        assert!(eval.all_requirements_met);

        let evaluator = RequirementEvaluator::new(
            registry,
            EngineConfig::default().with_generic_revocation(true),
        );
        let eval = evaluator.evaluate(&[check(1)], &instance(), None).await;
        assert!(!eval.all_requirements_met);
        assert_eq!(
            eval.failure_reasons,
            vec!["requirement 'check' revoked by generic handler 'revoker'".to_string()]
        );
    }

    #[tokio::test]
    async fn test_decode_failure_becomes_reason() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        scripted(&mut registry, &calls, "h", Outcome::Yes);

        let evaluator = RequirementEvaluator::new(Arc::new(registry), EngineConfig::default());
        let bad = Requirement::raw("check", json!({"id": "not a number"}));
        let eval = evaluator.evaluate(&[bad], &instance(), None).await;

        assert!(!eval.all_requirements_met);
        assert!(calls.lock().is_empty());
        assert!(eval.failure_reasons[0].contains("cannot decode 'check' payload"));
    }
}
