//! Transition engine - coordinates definitions, instances, handlers and persistence.
//!
//! A transition attempt moves through [`AttemptPhase`]s:
//! `Searching → Evaluating → Committing → Effecting → Done`, or stops as
//! `Failed` at any gate. Instances are mutated on a working copy that is
//! adopted only after the repository accepted it, so a failed attempt leaves
//! the caller's instance untouched.

use crate::config::EngineConfig;
use crate::definition::{State, Trigger};
use crate::effect::{EffectExecution, EffectExecutor};
use crate::error::CoreError;
use crate::ids::{Actor, HistoryEntryId, InstanceId, StateId, TransitionId, TriggerId};
use crate::instance::Instance;
use crate::registry::HandlerRegistry;
use crate::repository::InstanceRepository;
use crate::requirement::{RequirementEvaluation, RequirementEvaluator};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Stage of a transition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptPhase {
    Searching,
    Evaluating,
    Committing,
    Effecting,
    Done,
    Failed,
}

impl fmt::Display for AttemptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttemptPhase::Searching => "searching",
            AttemptPhase::Evaluating => "evaluating",
            AttemptPhase::Committing => "committing",
            AttemptPhase::Effecting => "effecting",
            AttemptPhase::Done => "done",
            AttemptPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of a committed transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionInfo {
    pub instance_id: InstanceId,
    pub previous_state_id: StateId,
    pub new_state_id: StateId,
    pub trigger_id: Option<TriggerId>,
    pub was_forced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub actor: Actor,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement_evaluation: Option<RequirementEvaluation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect_execution: Option<EffectExecution>,
}

impl TransitionInfo {
    pub fn changed_state(&self) -> bool {
        self.previous_state_id != self.new_state_id
    }
}

/// Result of a revert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevertInfo {
    pub instance_id: InstanceId,
    pub previous_state_id: StateId,
    pub new_state_id: StateId,
    /// Reverted entries, oldest first.
    pub reverted_entries: Vec<HistoryEntryId>,
    pub reason: String,
    pub actor: Actor,
    pub timestamp: DateTime<Utc>,
}

/// A transition the instance could take next, for "what can I do" views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableTransition {
    pub transition_id: TransitionId,
    pub trigger: Trigger,
    /// Target state; `None` for trigger-only transitions.
    pub to_state: Option<State>,
    pub can_execute: bool,
    pub requirement_evaluation: RequirementEvaluation,
}

/// The transition engine.
pub struct TransitionEngine {
    registry: Arc<HandlerRegistry>,
    repository: Arc<dyn InstanceRepository>,
    requirements: RequirementEvaluator,
    effects: EffectExecutor,
}

impl TransitionEngine {
    /// Creates an engine with the default configuration.
    pub fn new(registry: Arc<HandlerRegistry>, repository: Arc<dyn InstanceRepository>) -> Self {
        Self::with_config(registry, repository, EngineConfig::default())
    }

    pub fn with_config(
        registry: Arc<HandlerRegistry>,
        repository: Arc<dyn InstanceRepository>,
        config: EngineConfig,
    ) -> Self {
        Self {
            requirements: RequirementEvaluator::new(registry.clone(), config),
            effects: EffectExecutor::new(registry.clone()),
            registry,
            repository,
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn requirement_evaluator(&self) -> &RequirementEvaluator {
        &self.requirements
    }

    pub fn effect_executor(&self) -> &EffectExecutor {
        &self.effects
    }

    // =========================================================================
    // Try
    // =========================================================================

    /// Fires `trigger` on `instance`.
    ///
    /// Candidates are the transitions for `trigger` whose source is the
    /// current state or a wildcard. The first candidate, in definition order,
    /// whose requirements are met is committed and its effects are run.
    pub async fn try_transition(
        &self,
        instance: &mut Instance,
        trigger: TriggerId,
        actor: &Actor,
        context: Option<&Value>,
    ) -> Result<TransitionInfo, CoreError> {
        self.attempt(instance, trigger, actor, context, None).await
    }

    /// Like [`try_transition`](Self::try_transition), resolving the trigger by name.
    pub async fn try_transition_by_name(
        &self,
        instance: &mut Instance,
        trigger: &str,
        actor: &Actor,
        context: Option<&Value>,
    ) -> Result<TransitionInfo, CoreError> {
        let trigger_id = resolve_trigger(instance, trigger)?;
        self.attempt(instance, trigger_id, actor, context, None).await
    }

    /// Like [`try_transition`](Self::try_transition), checking `cancel` before
    /// searching, evaluating and committing. A committed attempt always runs
    /// its effects.
    pub async fn try_transition_with_cancellation(
        &self,
        instance: &mut Instance,
        trigger: TriggerId,
        actor: &Actor,
        context: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<TransitionInfo, CoreError> {
        self.attempt(instance, trigger, actor, context, Some(cancel))
            .await
    }

    async fn attempt(
        &self,
        instance: &mut Instance,
        trigger: TriggerId,
        actor: &Actor,
        context: Option<&Value>,
        cancel: Option<&CancellationToken>,
    ) -> Result<TransitionInfo, CoreError> {
        let definition = instance.definition().clone();
        let trigger_name = definition.trigger_name(trigger);

        check_cancelled(cancel, AttemptPhase::Searching)?;
        let candidates = definition.candidate_transitions(instance.current_state_id(), trigger);
        tracing::debug!(
            "Instance {}: {} candidate(s) for '{}' in '{}'",
            instance.id(),
            candidates.len(),
            trigger_name,
            definition.state_name(instance.current_state_id())
        );
        if candidates.is_empty() {
            return Err(CoreError::NoAvailableTransitions {
                state: definition.state_name(instance.current_state_id()),
                trigger: trigger_name,
            });
        }

        check_cancelled(cancel, AttemptPhase::Evaluating)?;
        let mut failure_reasons = Vec::new();
        let mut selected = None;
        for candidate in candidates {
            if candidate.requirements().is_empty() {
                selected = Some((candidate, None));
                break;
            }

            let evaluation = self
                .requirements
                .evaluate(candidate.requirements(), instance, context)
                .await;
            if evaluation.all_requirements_met {
                selected = Some((candidate, Some(evaluation)));
                break;
            }
            failure_reasons.extend(evaluation.failure_reasons);
        }

        let (transition, requirement_evaluation) = match selected {
            Some(selected) => selected,
            None => {
                tracing::debug!(
                    "Instance {}: requirements not met for '{}': {:?}",
                    instance.id(),
                    trigger_name,
                    failure_reasons
                );
                return Err(CoreError::RequirementsNotMet {
                    trigger: trigger_name,
                    failure_reasons,
                });
            }
        };

        check_cancelled(cancel, AttemptPhase::Committing)?;
        let previous_state_id = instance.current_state_id();
        let mut working = instance.clone();
        let timestamp = working
            .execute_transition(transition, actor)?
            .transitioned_at();
        self.persist(&mut working).await?;
        *instance = working;

        tracing::info!(
            "Instance {} transitioned '{}' -> '{}' on '{}' by {}",
            instance.id(),
            definition.state_name(previous_state_id),
            definition.state_name(instance.current_state_id()),
            trigger_name,
            actor
        );

        let mut info = TransitionInfo {
            instance_id: instance.id(),
            previous_state_id,
            new_state_id: instance.current_state_id(),
            trigger_id: Some(trigger),
            was_forced: false,
            reason: None,
            actor: actor.clone(),
            timestamp,
            requirement_evaluation,
            effect_execution: None,
        };

        if !transition.effects().is_empty() {
            tracing::debug!(
                "Instance {}: {} {} effect(s)",
                instance.id(),
                AttemptPhase::Effecting,
                transition.effects().len()
            );
            let execution = self
                .effects
                .execute(transition.effects(), instance, &info)
                .await;
            info.effect_execution = Some(execution);
        }

        Ok(info)
    }

    // =========================================================================
    // Force
    // =========================================================================

    /// Moves `instance` to `target` without evaluating requirements or
    /// running effects.
    pub async fn force_transition(
        &self,
        instance: &mut Instance,
        target: StateId,
        reason: &str,
        actor: &Actor,
    ) -> Result<TransitionInfo, CoreError> {
        let definition = instance.definition().clone();
        if !definition.has_state(target) {
            return Err(CoreError::StateNotInDefinition {
                state: target.to_string(),
                definition: definition.name().to_string(),
            });
        }

        let previous_state_id = instance.current_state_id();
        let mut working = instance.clone();
        let timestamp = working
            .execute_forced_transition(target, reason, actor)?
            .transitioned_at();
        self.persist(&mut working).await?;
        *instance = working;

        tracing::info!(
            "Instance {} forced '{}' -> '{}' by {}: {}",
            instance.id(),
            definition.state_name(previous_state_id),
            definition.state_name(target),
            actor,
            reason
        );

        Ok(TransitionInfo {
            instance_id: instance.id(),
            previous_state_id,
            new_state_id: target,
            trigger_id: None,
            was_forced: true,
            reason: Some(reason.to_string()),
            actor: actor.clone(),
            timestamp,
            requirement_evaluation: None,
            effect_execution: None,
        })
    }

    /// Like [`force_transition`](Self::force_transition), resolving the state by name.
    pub async fn force_transition_by_name(
        &self,
        instance: &mut Instance,
        state: &str,
        reason: &str,
        actor: &Actor,
    ) -> Result<TransitionInfo, CoreError> {
        if state.trim().is_empty() {
            return Err(CoreError::StateNull);
        }
        let target = instance
            .definition()
            .state(state)
            .map(|s| s.id())
            .ok_or_else(|| CoreError::StateNotInDefinition {
                state: state.to_string(),
                definition: instance.definition().name().to_string(),
            })?;
        self.force_transition(instance, target, reason, actor).await
    }

    // =========================================================================
    // Revert
    // =========================================================================

    /// Reverts the last `count` transitions that have not been reverted yet.
    ///
    /// The current state is rewound to where the instance stood before the
    /// reverted window began (the initial state when everything is
    /// reverted). Entries are stamped, not removed, and effects that already
    /// ran are not compensated.
    pub async fn revert_transitions(
        &self,
        instance: &mut Instance,
        count: usize,
        reason: &str,
        actor: &Actor,
    ) -> Result<RevertInfo, CoreError> {
        if count == 0 {
            return Err(CoreError::RevertInvalidCount);
        }
        if reason.trim().is_empty() {
            return Err(CoreError::RevertMissingReason);
        }

        let definition = instance.definition().clone();
        if instance.history().is_empty() {
            return Err(CoreError::RevertNoHistory);
        }
        let (target, reverted_entries) = {
            let active = instance.active_history();
            if active.len() < count {
                return Err(CoreError::RevertInsufficientHistory {
                    requested: count,
                    available: active.len(),
                });
            }

            let target = if count >= active.len() {
                definition
                    .initial_state()
                    .map(|s| s.id())
                    .ok_or_else(|| CoreError::RevertNoInitialState {
                        definition: definition.name().to_string(),
                    })?
            } else {
                let id = active[active.len() - count - 1].to_state_id();
                if !definition.has_state(id) {
                    return Err(CoreError::RevertStateNotFound {
                        state_id: id.to_string(),
                        definition: definition.name().to_string(),
                    });
                }
                id
            };

            let reverted: Vec<HistoryEntryId> = active[active.len() - count..]
                .iter()
                .map(|e| e.id())
                .collect();
            (target, reverted)
        };

        let previous_state_id = instance.current_state_id();
        let mut working = instance.clone();
        working.execute_revert(target, &reverted_entries, reason, actor)?;
        self.persist(&mut working).await?;
        *instance = working;

        tracing::info!(
            "Instance {} reverted {} transition(s) '{}' -> '{}' by {}: {}",
            instance.id(),
            count,
            definition.state_name(previous_state_id),
            definition.state_name(target),
            actor,
            reason
        );

        Ok(RevertInfo {
            instance_id: instance.id(),
            previous_state_id,
            new_state_id: target,
            reverted_entries,
            reason: reason.to_string(),
            actor: actor.clone(),
            timestamp: instance.last_transition_at().unwrap_or_else(Utc::now),
        })
    }

    pub async fn revert_last_transition(
        &self,
        instance: &mut Instance,
        reason: &str,
        actor: &Actor,
    ) -> Result<RevertInfo, CoreError> {
        self.revert_transitions(instance, 1, reason, actor).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Evaluates every transition available from the current state.
    pub async fn available_transitions(
        &self,
        instance: &Instance,
        context: Option<&Value>,
    ) -> Vec<AvailableTransition> {
        let definition = instance.definition().clone();
        let mut available = Vec::new();

        for transition in instance.available_transitions() {
            let Some(trigger) = definition.trigger_by_id(transition.trigger_id()) else {
                continue;
            };
            let requirement_evaluation = self
                .requirements
                .evaluate(transition.requirements(), instance, context)
                .await;

            available.push(AvailableTransition {
                transition_id: transition.id(),
                trigger: trigger.clone(),
                to_state: transition
                    .to_state_id()
                    .and_then(|id| definition.state_by_id(id))
                    .cloned(),
                can_execute: requirement_evaluation.all_requirements_met,
                requirement_evaluation,
            });
        }

        available
    }

    async fn persist(&self, instance: &mut Instance) -> Result<(), CoreError> {
        let token = self
            .repository
            .save_instance(instance)
            .await
            .map_err(|e| {
                tracing::warn!("Failed to save instance {}: {}", instance.id(), e);
                e
            })?;
        instance.set_concurrency_token(token);
        Ok(())
    }
}

fn resolve_trigger(instance: &Instance, name: &str) -> Result<TriggerId, CoreError> {
    instance
        .definition()
        .trigger(name)
        .map(|t| t.id())
        .ok_or_else(|| CoreError::TriggerNotFound {
            trigger: name.to_string(),
        })
}

fn check_cancelled(
    cancel: Option<&CancellationToken>,
    phase: AttemptPhase,
) -> Result<(), CoreError> {
    match cancel {
        Some(token) if token.is_cancelled() => {
            tracing::debug!("Transition attempt cancelled before {}", phase);
            Err(CoreError::Cancelled { phase })
        }
        _ => Ok(()),
    }
}
