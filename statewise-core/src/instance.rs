//! Instance state management.

use crate::definition::{Definition, State, Transition, Trigger};
use crate::error::CoreError;
use crate::ids::{Actor, DefinitionId, HistoryEntryId, InstanceId, StateId, TriggerId};
use crate::payload::Requirement;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Immutable record of one completed transition.
///
/// Reverting stamps `reverted_at` instead of removing the entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    id: HistoryEntryId,
    from_state_id: StateId,
    to_state_id: StateId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trigger_id: Option<TriggerId>,
    is_forced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    transitioned_at: DateTime<Utc>,
    actor: Actor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reverted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    revert_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reverted_by: Option<Actor>,
}

impl HistoryEntry {
    pub fn id(&self) -> HistoryEntryId {
        self.id
    }

    pub fn from_state_id(&self) -> StateId {
        self.from_state_id
    }

    pub fn to_state_id(&self) -> StateId {
        self.to_state_id
    }

    pub fn trigger_id(&self) -> Option<TriggerId> {
        self.trigger_id
    }

    pub fn is_forced(&self) -> bool {
        self.is_forced
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn transitioned_at(&self) -> DateTime<Utc> {
        self.transitioned_at
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn reverted_at(&self) -> Option<DateTime<Utc>> {
        self.reverted_at
    }

    pub fn revert_reason(&self) -> Option<&str> {
        self.revert_reason.as_deref()
    }

    pub fn reverted_by(&self) -> Option<&Actor> {
        self.reverted_by.as_ref()
    }

    pub fn is_reverted(&self) -> bool {
        self.reverted_at.is_some()
    }

    /// Returns true if the entry records a trigger that did not move the state.
    pub fn is_state_preserving(&self) -> bool {
        self.from_state_id == self.to_state_id
    }
}

/// Persistable form of an [`Instance`]: the definition is referenced, not embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: InstanceId,
    pub definition_id: DefinitionId,
    pub definition_version: u32,
    pub current_state_id: StateId,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token; 0 means never saved.
    #[serde(default)]
    pub concurrency_token: u64,
}

/// A live occurrence of a definition.
#[derive(Debug, Clone)]
pub struct Instance {
    id: InstanceId,
    definition: Arc<Definition>,
    current_state_id: StateId,
    history: Vec<HistoryEntry>,
    created_at: DateTime<Utc>,
    last_transition_at: Option<DateTime<Utc>>,
    concurrency_token: u64,
}

impl Instance {
    /// Creates an instance in the definition's initial state.
    pub fn create(definition: Arc<Definition>) -> Result<Self, CoreError> {
        Self::create_with_id(InstanceId::new(), definition)
    }

    pub fn create_with_id(id: InstanceId, definition: Arc<Definition>) -> Result<Self, CoreError> {
        if !definition.status().accepts_new_instances() {
            return Err(CoreError::DefinitionNotPublished {
                definition: definition.name().to_string(),
                version: definition.version(),
            });
        }

        let initial = definition
            .initial_state()
            .ok_or_else(|| CoreError::NoInitialState {
                definition: definition.name().to_string(),
            })?
            .id();

        Ok(Self {
            id,
            definition,
            current_state_id: initial,
            history: Vec::new(),
            created_at: Utc::now(),
            last_transition_at: None,
            concurrency_token: 0,
        })
    }

    /// Restores an instance from its persisted record.
    pub fn from_record(record: InstanceRecord, definition: Arc<Definition>) -> Result<Self, CoreError> {
        if record.definition_id != definition.id() {
            return Err(CoreError::DefinitionMismatch {
                expected: record.definition_id.to_string(),
                actual: definition.id().to_string(),
            });
        }
        if !definition.has_state(record.current_state_id) {
            return Err(CoreError::StateNotInDefinition {
                state: record.current_state_id.to_string(),
                definition: definition.name().to_string(),
            });
        }

        Ok(Self {
            id: record.id,
            definition,
            current_state_id: record.current_state_id,
            history: record.history,
            created_at: record.created_at,
            last_transition_at: record.last_transition_at,
            concurrency_token: record.concurrency_token,
        })
    }

    /// Returns the persistable form of this instance.
    pub fn to_record(&self) -> InstanceRecord {
        InstanceRecord {
            id: self.id,
            definition_id: self.definition.id(),
            definition_version: self.definition.version(),
            current_state_id: self.current_state_id,
            history: self.history.clone(),
            created_at: self.created_at,
            last_transition_at: self.last_transition_at,
            concurrency_token: self.concurrency_token,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn definition(&self) -> &Arc<Definition> {
        &self.definition
    }

    pub fn current_state_id(&self) -> StateId {
        self.current_state_id
    }

    pub fn current_state(&self) -> Option<&State> {
        self.definition.state_by_id(self.current_state_id)
    }

    /// Full history, oldest first, including reverted entries.
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Entries that have not been reverted, oldest first.
    pub fn active_history(&self) -> Vec<&HistoryEntry> {
        self.history.iter().filter(|e| !e.is_reverted()).collect()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_transition_at(&self) -> Option<DateTime<Utc>> {
        self.last_transition_at
    }

    pub fn concurrency_token(&self) -> u64 {
        self.concurrency_token
    }

    pub(crate) fn set_concurrency_token(&mut self, token: u64) {
        self.concurrency_token = token;
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Fires `transition`, moving to its target state if it has one.
    pub fn execute_transition(
        &mut self,
        transition: &Transition,
        actor: &Actor,
    ) -> Result<&HistoryEntry, CoreError> {
        if self.definition.transition_by_id(transition.id()).is_none() {
            return Err(CoreError::TransitionNotInDefinition {
                transition_id: transition.id().to_string(),
                definition: self.definition.name().to_string(),
            });
        }

        let from = self.current_state_id;
        let to = transition.to_state_id().unwrap_or(from);
        Ok(self.record(from, to, Some(transition.trigger_id()), false, None, actor))
    }

    /// Moves to `target` unconditionally, recording `reason`.
    pub fn execute_forced_transition(
        &mut self,
        target: StateId,
        reason: &str,
        actor: &Actor,
    ) -> Result<&HistoryEntry, CoreError> {
        if reason.trim().is_empty() {
            return Err(CoreError::ForceMissingReason);
        }
        if !self.definition.has_state(target) {
            return Err(CoreError::StateNotInDefinition {
                state: target.to_string(),
                definition: self.definition.name().to_string(),
            });
        }

        let from = self.current_state_id;
        Ok(self.record(
            from,
            target,
            None,
            true,
            Some(reason.to_string()),
            actor,
        ))
    }

    /// Rewinds to `target` and marks `entries` as reverted.
    ///
    /// Whether the entries may be reverted is decided by the caller.
    pub fn execute_revert(
        &mut self,
        target: StateId,
        entries: &[HistoryEntryId],
        reason: &str,
        actor: &Actor,
    ) -> Result<(), CoreError> {
        if !self.definition.has_state(target) {
            return Err(CoreError::StateNotInDefinition {
                state: target.to_string(),
                definition: self.definition.name().to_string(),
            });
        }

        let now = Utc::now();
        for entry in self.history.iter_mut().filter(|e| entries.contains(&e.id)) {
            entry.reverted_at = Some(now);
            entry.revert_reason = Some(reason.to_string());
            entry.reverted_by = Some(actor.clone());
        }
        self.current_state_id = target;
        self.last_transition_at = Some(now);
        Ok(())
    }

    fn record(
        &mut self,
        from: StateId,
        to: StateId,
        trigger_id: Option<TriggerId>,
        is_forced: bool,
        reason: Option<String>,
        actor: &Actor,
    ) -> &HistoryEntry {
        let now = Utc::now();
        self.current_state_id = to;
        self.last_transition_at = Some(now);
        self.history.push(HistoryEntry {
            id: HistoryEntryId::new(),
            from_state_id: from,
            to_state_id: to,
            trigger_id,
            is_forced,
            reason,
            transitioned_at: now,
            actor: actor.clone(),
            reverted_at: None,
            revert_reason: None,
            reverted_by: None,
        });
        &self.history[self.history.len() - 1]
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Transitions that may fire from the current state, in definition order.
    pub fn available_transitions(&self) -> Vec<&Transition> {
        self.definition.transitions_from_state(self.current_state_id)
    }

    pub fn available_triggers(&self) -> Vec<&Trigger> {
        self.definition
            .available_triggers_from_state(self.current_state_id)
    }

    pub fn can_trigger(&self, trigger: TriggerId) -> bool {
        self.available_transitions()
            .iter()
            .any(|t| t.trigger_id() == trigger)
    }

    /// Returns true if `trigger` has a transition from here ending in `state`.
    pub fn can_transition_to(&self, state: StateId, trigger: TriggerId) -> bool {
        self.available_transitions().iter().any(|t| {
            t.trigger_id() == trigger && t.to_state_id().unwrap_or(self.current_state_id) == state
        })
    }

    pub fn is_in_final_state(&self) -> bool {
        self.current_state().map(|s| s.is_final()).unwrap_or(false)
    }

    /// Requirements of every transition `trigger` could fire from here.
    pub fn requirements_for_trigger(&self, trigger: TriggerId) -> Vec<&Requirement> {
        self.definition
            .candidate_transitions(self.current_state_id, trigger)
            .into_iter()
            .flat_map(|t| t.requirements())
            .collect()
    }
}
