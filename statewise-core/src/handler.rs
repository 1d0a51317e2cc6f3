//! Requirement and effect handler traits.
//!
//! Specific handlers serve exactly one [`PayloadKind`]; generic handlers see
//! every status of a transition at once. Handlers receive the instance id and
//! load whatever else they need themselves.

use crate::effect::EffectResult;
use crate::engine::TransitionInfo;
use crate::error::HandlerError;
use crate::ids::InstanceId;
use crate::payload::{Effect, PayloadKind, Requirement};
use crate::requirement::RequirementResult;
use async_trait::async_trait;
use serde_json::Value;
use std::marker::PhantomData;

/// Decides whether one kind of requirement is fulfilled.
#[async_trait]
pub trait RequirementHandler<R: PayloadKind>: Send + Sync {
    /// Name recorded as `handler_used` when this handler fulfils a requirement.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn evaluate(
        &self,
        requirement: &R,
        instance_id: InstanceId,
        context: Option<&Value>,
    ) -> Result<bool, HandlerError>;
}

/// Post-processes all requirement statuses of a transition.
#[async_trait]
pub trait GenericRequirementHandler: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Returns the updated statuses, same length and order as `statuses`.
    async fn process(
        &self,
        statuses: &[RequirementResult],
        instance_id: InstanceId,
        context: Option<&Value>,
    ) -> Result<Vec<RequirementResult>, HandlerError>;
}

/// Runs one kind of effect.
#[async_trait]
pub trait EffectHandler<E: PayloadKind>: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Returns `Ok(false)` when the effect was skipped or could not complete.
    async fn execute(
        &self,
        effect: &E,
        instance_id: InstanceId,
        transition: &TransitionInfo,
    ) -> Result<bool, HandlerError>;
}

/// Post-processes all effect statuses of a transition.
#[async_trait]
pub trait GenericEffectHandler: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn process(
        &self,
        statuses: &[EffectResult],
        instance_id: InstanceId,
        transition: &TransitionInfo,
    ) -> Result<Vec<EffectResult>, HandlerError>;
}

/// Kind-erased requirement handler stored in the registry.
#[async_trait]
pub(crate) trait DynRequirementHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(
        &self,
        requirement: &Requirement,
        instance_id: InstanceId,
        context: Option<&Value>,
    ) -> Result<bool, HandlerError>;
}

/// Kind-erased effect handler stored in the registry.
#[async_trait]
pub(crate) trait DynEffectHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        effect: &Effect,
        instance_id: InstanceId,
        transition: &TransitionInfo,
    ) -> Result<bool, HandlerError>;
}

/// Decodes the opaque payload before delegating to the typed handler.
pub(crate) struct Typed<K, H> {
    handler: H,
    _kind: PhantomData<fn() -> K>,
}

impl<K, H> Typed<K, H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<R, H> DynRequirementHandler for Typed<R, H>
where
    R: PayloadKind,
    H: RequirementHandler<R>,
{
    fn name(&self) -> &str {
        self.handler.name()
    }

    async fn evaluate(
        &self,
        requirement: &Requirement,
        instance_id: InstanceId,
        context: Option<&Value>,
    ) -> Result<bool, HandlerError> {
        let typed: R = requirement.decode()?;
        self.handler.evaluate(&typed, instance_id, context).await
    }
}

#[async_trait]
impl<E, H> DynEffectHandler for Typed<E, H>
where
    E: PayloadKind,
    H: EffectHandler<E>,
{
    fn name(&self) -> &str {
        self.handler.name()
    }

    async fn execute(
        &self,
        effect: &Effect,
        instance_id: InstanceId,
        transition: &TransitionInfo,
    ) -> Result<bool, HandlerError> {
        let typed: E = effect.decode()?;
        self.handler.execute(&typed, instance_id, transition).await
    }
}
