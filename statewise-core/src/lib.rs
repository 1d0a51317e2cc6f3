//! # statewise-core
//!
//! Finite-state-machine engine for long-lived business entities.
//!
//! This crate provides:
//! - Versioned definitions of states, triggers and transitions
//! - Instances with an append-only, revertible history
//! - Pluggable requirement and effect handlers
//! - The transition engine (try, force, revert)
//! - Mermaid diagram export

pub mod builtin;
pub mod config;
pub mod definition;
pub mod effect;
pub mod engine;
pub mod error;
pub mod handler;
pub mod ids;
pub mod instance;
mod mermaid;
pub mod payload;
pub mod registry;
pub mod repository;
pub mod requirement;

pub use builtin::BuiltinHandlers;
pub use config::EngineConfig;
pub use definition::{
    Definition, DefinitionBuilder, DefinitionDocument, DefinitionStatus, State, StateCategory,
    Transition, TransitionSpec, Trigger, TriggerType,
};
pub use effect::{EffectExecution, EffectExecutor, EffectResult};
pub use engine::{AttemptPhase, AvailableTransition, RevertInfo, TransitionEngine, TransitionInfo};
pub use error::{CoreError, HandlerError, RepositoryError};
pub use handler::{
    EffectHandler, GenericEffectHandler, GenericRequirementHandler, RequirementHandler,
};
pub use ids::{
    Actor, DefinitionId, HistoryEntryId, InstanceId, StateId, TransitionId, TriggerId,
};
pub use instance::{HistoryEntry, Instance, InstanceRecord};
pub use payload::{Effect, PayloadKind, Requirement};
pub use registry::{HandlerModule, HandlerRegistry};
pub use repository::InstanceRepository;
pub use requirement::{RequirementEvaluation, RequirementEvaluator, RequirementResult};
