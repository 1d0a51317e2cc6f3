//! State machine definition types.
//!
//! Definitions are authored as documents naming states, triggers and
//! transitions:
//!
//! ```yaml
//! name: document-approval
//! states:
//!   - { name: Draft, category: initial }
//!   - { name: Review }
//!   - { name: Approved, category: final }
//! transitions:
//!   - { trigger: submit, from: Draft, to: Review }
//!   - trigger: approve
//!     from: Review
//!     to: Approved
//!     requirements:
//!       - { kind: context_flag, params: { path: signed_off } }
//!   - { trigger: comment }   # trigger-only, usable from any state
//! ```
//!
//! [`Definition::from_document`] resolves names to ids, checks that every
//! reference is resolvable and rejects a second initial state. Structural
//! soundness (a missing initial state, reachability, unused triggers) is
//! reported by [`Definition::validate`].

use crate::error::CoreError;
use crate::ids::{DefinitionId, StateId, TransitionId, TriggerId};
use crate::payload::{Effect, Requirement};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Role of a state in the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateCategory {
    Initial,
    #[default]
    Intermediate,
    Final,
}

/// Descriptive tag for how a trigger is fired. The engine does not act on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    #[default]
    Manual,
    Timer,
    Event,
    Signal,
    Condition,
}

/// Publication status of a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl DefinitionStatus {
    /// Returns true if new instances may be created against the definition.
    pub fn accepts_new_instances(&self) -> bool {
        matches!(self, DefinitionStatus::Published)
    }
}

/// A named state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    id: StateId,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    category: StateCategory,
}

impl State {
    pub fn id(&self) -> StateId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn category(&self) -> StateCategory {
        self.category
    }

    pub fn is_initial(&self) -> bool {
        self.category == StateCategory::Initial
    }

    pub fn is_final(&self) -> bool {
        self.category == StateCategory::Final
    }
}

/// A named stimulus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    id: TriggerId,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    trigger_type: TriggerType,
}

impl Trigger {
    pub fn id(&self) -> TriggerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn trigger_type(&self) -> TriggerType {
        self.trigger_type
    }
}

/// An edge of the machine.
///
/// A missing source state makes the transition usable from any state; a
/// missing target state makes it trigger-only (the state does not change).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    id: TransitionId,
    trigger_id: TriggerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from_state_id: Option<StateId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    to_state_id: Option<StateId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    requirements: Vec<Requirement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    effects: Vec<Effect>,
}

impl Transition {
    pub fn id(&self) -> TransitionId {
        self.id
    }

    pub fn trigger_id(&self) -> TriggerId {
        self.trigger_id
    }

    pub fn from_state_id(&self) -> Option<StateId> {
        self.from_state_id
    }

    pub fn to_state_id(&self) -> Option<StateId> {
        self.to_state_id
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    /// Returns true if firing this transition moves the current state.
    pub fn changes_state(&self) -> bool {
        self.to_state_id.is_some()
    }

    /// Returns true if the transition has no source state restriction.
    pub fn is_wildcard(&self) -> bool {
        self.from_state_id.is_none()
    }

    /// Returns true if the transition may fire while in `state`.
    pub fn applies_from(&self, state: StateId) -> bool {
        self.from_state_id.map_or(true, |from| from == state)
    }
}

/// Authoring form of a definition: everything referenced by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionDocument {
    pub name: String,

    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub status: DefinitionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub states: Vec<StateSpec>,

    /// Declared triggers. Triggers referenced only by transitions are
    /// created as manual triggers.
    #[serde(default)]
    pub triggers: Vec<TriggerSpec>,

    #[serde(default)]
    pub transitions: Vec<TransitionSpec>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub category: StateCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub trigger_type: TriggerType,
}

/// A transition referencing its trigger and states by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionSpec {
    pub trigger: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<Requirement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<Effect>,
}

impl TransitionSpec {
    pub fn on(trigger: impl Into<String>) -> Self {
        Self {
            trigger: trigger.into(),
            from: None,
            to: None,
            requirements: Vec::new(),
            effects: Vec::new(),
        }
    }

    pub fn from(mut self, state: impl Into<String>) -> Self {
        self.from = Some(state.into());
        self
    }

    pub fn to(mut self, state: impl Into<String>) -> Self {
        self.to = Some(state.into());
        self
    }

    pub fn requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Validated and indexed machine definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Definition {
    id: DefinitionId,
    name: String,
    version: u32,
    status: DefinitionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    created_at: DateTime<Utc>,
    states: Vec<State>,
    triggers: Vec<Trigger>,
    transitions: Vec<Transition>,
}

impl Definition {
    /// Builds a definition from its authoring document, assigning fresh ids.
    pub fn from_document(doc: DefinitionDocument) -> Result<Self, CoreError> {
        if doc.name.trim().is_empty() {
            return Err(invalid("definition name must not be empty"));
        }
        if doc.version == 0 {
            return Err(invalid("version must start at 1"));
        }

        let mut definition = Self {
            id: DefinitionId::new(),
            name: doc.name,
            version: doc.version,
            status: DefinitionStatus::Draft,
            description: doc.description,
            created_at: Utc::now(),
            states: Vec::new(),
            triggers: Vec::new(),
            transitions: Vec::new(),
        };

        for state in doc.states {
            definition.insert_state(state.name, state.category, state.description)?;
        }
        for trigger in doc.triggers {
            definition.insert_trigger(trigger.name, trigger.trigger_type, trigger.description)?;
        }
        for spec in doc.transitions {
            if definition.trigger(&spec.trigger).is_none() {
                definition.insert_trigger(spec.trigger.clone(), TriggerType::Manual, None)?;
            }
            definition.insert_transition(spec)?;
        }

        definition.status = doc.status;
        Ok(definition)
    }

    /// Parses a definition document from JSON.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, CoreError> {
        let doc: DefinitionDocument = serde_json::from_value(json.clone())?;
        Self::from_document(doc)
    }

    /// Returns the authoring document for this definition.
    pub fn to_document(&self) -> DefinitionDocument {
        DefinitionDocument {
            name: self.name.clone(),
            version: self.version,
            status: self.status,
            description: self.description.clone(),
            states: self
                .states
                .iter()
                .map(|s| StateSpec {
                    name: s.name.clone(),
                    description: s.description.clone(),
                    category: s.category,
                })
                .collect(),
            triggers: self
                .triggers
                .iter()
                .map(|t| TriggerSpec {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    trigger_type: t.trigger_type,
                })
                .collect(),
            transitions: self
                .transitions
                .iter()
                .map(|t| TransitionSpec {
                    trigger: self.trigger_name(t.trigger_id).to_string(),
                    from: t.from_state_id.map(|id| self.state_name(id).to_string()),
                    to: t.to_state_id.map(|id| self.state_name(id).to_string()),
                    requirements: t.requirements.clone(),
                    effects: t.effects.clone(),
                })
                .collect(),
        }
    }

    pub fn id(&self) -> DefinitionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn status(&self) -> DefinitionStatus {
        self.status
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    /// Transitions in definition order.
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Looks up a state by name.
    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn state_by_id(&self, id: StateId) -> Option<&State> {
        self.states.iter().find(|s| s.id == id)
    }

    pub fn has_state(&self, id: StateId) -> bool {
        self.state_by_id(id).is_some()
    }

    /// Looks up a trigger by name.
    pub fn trigger(&self, name: &str) -> Option<&Trigger> {
        self.triggers.iter().find(|t| t.name == name)
    }

    pub fn trigger_by_id(&self, id: TriggerId) -> Option<&Trigger> {
        self.triggers.iter().find(|t| t.id == id)
    }

    pub fn transition_by_id(&self, id: TransitionId) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.id == id)
    }

    /// Returns the first state with category `Initial`.
    pub fn initial_state(&self) -> Option<&State> {
        self.states.iter().find(|s| s.is_initial())
    }

    /// Transitions that may fire from `state`, including wildcard sources,
    /// in definition order.
    pub fn transitions_from_state(&self, state: StateId) -> Vec<&Transition> {
        self.transitions
            .iter()
            .filter(|t| t.applies_from(state))
            .collect()
    }

    /// Candidate transitions for `trigger` while in `state`, in definition order.
    pub fn candidate_transitions(&self, state: StateId, trigger: TriggerId) -> Vec<&Transition> {
        self.transitions
            .iter()
            .filter(|t| t.trigger_id == trigger && t.applies_from(state))
            .collect()
    }

    /// Distinct triggers that have at least one transition from `state`.
    pub fn available_triggers_from_state(&self, state: StateId) -> Vec<&Trigger> {
        let mut seen = HashSet::new();
        self.transitions_from_state(state)
            .into_iter()
            .filter(|t| seen.insert(t.trigger_id))
            .filter_map(|t| self.trigger_by_id(t.trigger_id))
            .collect()
    }

    /// Display name of a state, or its id if it is unknown.
    pub fn state_name(&self, id: StateId) -> String {
        self.state_by_id(id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn trigger_name(&self, id: TriggerId) -> String {
        self.trigger_by_id(id)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Reports structural problems. An empty list means the definition is sound.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.states.is_empty() {
            problems.push("definition has no states".to_string());
            return problems;
        }

        let initial: Vec<&State> = self.states.iter().filter(|s| s.is_initial()).collect();
        match initial.len() {
            0 => problems.push("definition has no initial state".to_string()),
            1 => {}
            n => problems.push(format!(
                "definition has {} initial states: {}",
                n,
                initial
                    .iter()
                    .map(|s| s.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }

        if let Some(start) = initial.first() {
            let reachable = self.reachable_from(start.id);
            for state in &self.states {
                if !reachable.contains(&state.id) {
                    problems.push(format!(
                        "state '{}' is not reachable from initial state '{}'",
                        state.name, start.name
                    ));
                }
            }
        }

        for trigger in &self.triggers {
            if !self.transitions.iter().any(|t| t.trigger_id == trigger.id) {
                problems.push(format!(
                    "trigger '{}' is not used by any transition",
                    trigger.name
                ));
            }
        }

        for state in self.states.iter().filter(|s| s.is_final()) {
            let leaves = self
                .transitions
                .iter()
                .any(|t| t.from_state_id == Some(state.id) && t.changes_state());
            if leaves {
                problems.push(format!(
                    "final state '{}' has outgoing transitions",
                    state.name
                ));
            }
        }

        problems
    }

    fn reachable_from(&self, start: StateId) -> HashSet<StateId> {
        let mut reachable = HashSet::from([start]);
        loop {
            let before = reachable.len();
            for t in &self.transitions {
                if let Some(to) = t.to_state_id {
                    let source_reached = t.from_state_id.map_or(true, |f| reachable.contains(&f));
                    if source_reached {
                        reachable.insert(to);
                    }
                }
            }
            if reachable.len() == before {
                return reachable;
            }
        }
    }

    /// Creates a draft successor with the same structure and `version`.
    ///
    /// States, triggers and transitions are copied by name with fresh ids, so
    /// history recorded against this version stays untouched. Migrating
    /// existing instances is left to the caller.
    pub fn create_new_version(&self, version: u32) -> Result<Definition, CoreError> {
        if version <= self.version {
            return Err(CoreError::InvalidVersion {
                current: self.version,
                requested: version,
            });
        }

        let mut doc = self.to_document();
        doc.version = version;
        doc.status = DefinitionStatus::Draft;
        Definition::from_document(doc)
    }

    /// Allows new instances to be created.
    pub fn publish(&mut self) -> Result<(), CoreError> {
        if self.status == DefinitionStatus::Archived {
            return Err(invalid(format!(
                "definition '{}' v{} is archived and cannot be published",
                self.name, self.version
            )));
        }
        self.status = DefinitionStatus::Published;
        Ok(())
    }

    /// Stops new instances from being created. Existing instances keep working.
    pub fn archive(&mut self) {
        self.status = DefinitionStatus::Archived;
    }

    /// Adds a state to a draft definition.
    pub fn add_state(
        &mut self,
        name: impl Into<String>,
        category: StateCategory,
        description: Option<String>,
    ) -> Result<StateId, CoreError> {
        self.ensure_draft()?;
        self.insert_state(name.into(), category, description)
    }

    /// Adds a trigger to a draft definition.
    pub fn add_trigger(
        &mut self,
        name: impl Into<String>,
        trigger_type: TriggerType,
        description: Option<String>,
    ) -> Result<TriggerId, CoreError> {
        self.ensure_draft()?;
        self.insert_trigger(name.into(), trigger_type, description)
    }

    /// Adds a transition to a draft definition. Its trigger must already exist.
    pub fn add_transition(&mut self, spec: TransitionSpec) -> Result<TransitionId, CoreError> {
        self.ensure_draft()?;
        if self.trigger(&spec.trigger).is_none() {
            return Err(CoreError::TriggerNotFound {
                trigger: spec.trigger,
            });
        }
        self.insert_transition(spec)
    }

    fn ensure_draft(&self) -> Result<(), CoreError> {
        if self.status != DefinitionStatus::Draft {
            return Err(invalid(format!(
                "definition '{}' v{} is not a draft; create a new version instead",
                self.name, self.version
            )));
        }
        Ok(())
    }

    fn insert_state(
        &mut self,
        name: String,
        category: StateCategory,
        description: Option<String>,
    ) -> Result<StateId, CoreError> {
        if name.trim().is_empty() {
            return Err(invalid("state name must not be empty"));
        }
        if self.state(&name).is_some() {
            return Err(invalid(format!("duplicate state '{}'", name)));
        }
        if category == StateCategory::Initial {
            if let Some(existing) = self.initial_state() {
                return Err(invalid(format!(
                    "state '{}' cannot be initial; '{}' already is",
                    name, existing.name
                )));
            }
        }

        let id = StateId::new();
        self.states.push(State {
            id,
            name,
            description,
            category,
        });
        Ok(id)
    }

    fn insert_trigger(
        &mut self,
        name: String,
        trigger_type: TriggerType,
        description: Option<String>,
    ) -> Result<TriggerId, CoreError> {
        if name.trim().is_empty() {
            return Err(invalid("trigger name must not be empty"));
        }
        if self.trigger(&name).is_some() {
            return Err(invalid(format!("duplicate trigger '{}'", name)));
        }

        let id = TriggerId::new();
        self.triggers.push(Trigger {
            id,
            name,
            description,
            trigger_type,
        });
        Ok(id)
    }

    fn insert_transition(&mut self, spec: TransitionSpec) -> Result<TransitionId, CoreError> {
        let trigger_id = self
            .trigger(&spec.trigger)
            .map(|t| t.id)
            .ok_or_else(|| CoreError::TriggerNotFound {
                trigger: spec.trigger.clone(),
            })?;
        let from_state_id = spec
            .from
            .as_deref()
            .map(|name| self.resolve_state(name, "source"))
            .transpose()?;
        let to_state_id = spec
            .to
            .as_deref()
            .map(|name| self.resolve_state(name, "target"))
            .transpose()?;

        let id = TransitionId::new();
        self.transitions.push(Transition {
            id,
            trigger_id,
            from_state_id,
            to_state_id,
            requirements: spec.requirements,
            effects: spec.effects,
        });
        Ok(id)
    }

    fn resolve_state(&self, name: &str, role: &str) -> Result<StateId, CoreError> {
        self.state(name).map(|s| s.id).ok_or_else(|| {
            invalid(format!(
                "transition {} '{}' not in states list",
                role, name
            ))
        })
    }
}

fn invalid(reason: impl Into<String>) -> CoreError {
    CoreError::InvalidDefinition {
        reason: reason.into(),
    }
}

/// Fluent construction of a [`Definition`].
#[derive(Debug, Clone)]
pub struct DefinitionBuilder {
    doc: DefinitionDocument,
}

impl DefinitionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            doc: DefinitionDocument {
                name: name.into(),
                version: 1,
                status: DefinitionStatus::Draft,
                description: None,
                states: Vec::new(),
                triggers: Vec::new(),
                transitions: Vec::new(),
            },
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.doc.version = version;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.doc.description = Some(description.into());
        self
    }

    pub fn status(mut self, status: DefinitionStatus) -> Self {
        self.doc.status = status;
        self
    }

    pub fn initial_state(self, name: impl Into<String>) -> Self {
        self.state(name, StateCategory::Initial)
    }

    pub fn final_state(self, name: impl Into<String>) -> Self {
        self.state(name, StateCategory::Final)
    }

    pub fn state(mut self, name: impl Into<String>, category: StateCategory) -> Self {
        self.doc.states.push(StateSpec {
            name: name.into(),
            description: None,
            category,
        });
        self
    }

    pub fn trigger(mut self, name: impl Into<String>, trigger_type: TriggerType) -> Self {
        self.doc.triggers.push(TriggerSpec {
            name: name.into(),
            description: None,
            trigger_type,
        });
        self
    }

    pub fn transition(mut self, spec: TransitionSpec) -> Self {
        self.doc.transitions.push(spec);
        self
    }

    pub fn build(self) -> Result<Definition, CoreError> {
        Definition::from_document(self.doc)
    }
}
