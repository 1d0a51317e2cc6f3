//! Handler registry.
//!
//! Built once at startup and shared as `Arc<HandlerRegistry>`. Handlers are
//! kept in registration order, which is the order the evaluation services
//! invoke them in.

use crate::definition::Definition;
use crate::handler::{
    DynEffectHandler, DynRequirementHandler, EffectHandler, GenericEffectHandler,
    GenericRequirementHandler, RequirementHandler, Typed,
};
use crate::payload::PayloadKind;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// A bundle of handlers registered together.
///
/// Applications group the handlers of one area into a module and install it
/// at startup instead of registering each handler by hand.
pub trait HandlerModule {
    fn register(&self, registry: &mut HandlerRegistry);
}

/// Handlers keyed by payload kind, plus the generic handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    requirement_handlers: HashMap<String, Vec<Arc<dyn DynRequirementHandler>>>,
    generic_requirement_handlers: Vec<Arc<dyn GenericRequirementHandler>>,
    effect_handlers: HashMap<String, Vec<Arc<dyn DynEffectHandler>>>,
    generic_effect_handlers: Vec<Arc<dyn GenericEffectHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for requirements of kind `R::KIND`.
    pub fn register_requirement_handler<R, H>(&mut self, handler: H) -> &mut Self
    where
        R: PayloadKind,
        H: RequirementHandler<R> + 'static,
    {
        tracing::debug!(
            "Registered requirement handler {} for kind '{}'",
            handler.name(),
            R::KIND
        );
        self.requirement_handlers
            .entry(R::KIND.to_string())
            .or_default()
            .push(Arc::new(Typed::<R, H>::new(handler)));
        self
    }

    pub fn register_generic_requirement_handler<H>(&mut self, handler: H) -> &mut Self
    where
        H: GenericRequirementHandler + 'static,
    {
        tracing::debug!("Registered generic requirement handler {}", handler.name());
        self.generic_requirement_handlers.push(Arc::new(handler));
        self
    }

    /// Registers a handler for effects of kind `E::KIND`.
    pub fn register_effect_handler<E, H>(&mut self, handler: H) -> &mut Self
    where
        E: PayloadKind,
        H: EffectHandler<E> + 'static,
    {
        tracing::debug!(
            "Registered effect handler {} for kind '{}'",
            handler.name(),
            E::KIND
        );
        self.effect_handlers
            .entry(E::KIND.to_string())
            .or_default()
            .push(Arc::new(Typed::<E, H>::new(handler)));
        self
    }

    pub fn register_generic_effect_handler<H>(&mut self, handler: H) -> &mut Self
    where
        H: GenericEffectHandler + 'static,
    {
        tracing::debug!("Registered generic effect handler {}", handler.name());
        self.generic_effect_handlers.push(Arc::new(handler));
        self
    }

    /// Registers every handler of `module`.
    pub fn install(&mut self, module: &dyn HandlerModule) -> &mut Self {
        module.register(self);
        self
    }

    pub(crate) fn requirement_handlers(&self, kind: &str) -> &[Arc<dyn DynRequirementHandler>] {
        self.requirement_handlers
            .get(kind)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn generic_requirement_handlers(&self) -> &[Arc<dyn GenericRequirementHandler>] {
        &self.generic_requirement_handlers
    }

    pub(crate) fn effect_handlers(&self, kind: &str) -> &[Arc<dyn DynEffectHandler>] {
        self.effect_handlers
            .get(kind)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn generic_effect_handlers(&self) -> &[Arc<dyn GenericEffectHandler>] {
        &self.generic_effect_handlers
    }

    pub fn has_requirement_handler(&self, kind: &str) -> bool {
        !self.requirement_handlers(kind).is_empty()
    }

    pub fn has_effect_handler(&self, kind: &str) -> bool {
        !self.effect_handlers(kind).is_empty()
    }

    /// Lists the requirement and effect kinds used by `definition` that have
    /// no specific handler. Generic handlers may still cover them.
    pub fn missing_handlers(&self, definition: &Definition) -> Vec<String> {
        let mut missing = BTreeSet::new();
        for transition in definition.transitions() {
            for requirement in transition.requirements() {
                if !self.has_requirement_handler(&requirement.kind) {
                    missing.insert(format!("requirement '{}'", requirement.kind));
                }
            }
            for effect in transition.effects() {
                if !self.has_effect_handler(&effect.kind) {
                    missing.insert(format!("effect '{}'", effect.kind));
                }
            }
        }
        missing.into_iter().collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field(
                "requirement_kinds",
                &self.requirement_handlers.keys().collect::<Vec<_>>(),
            )
            .field(
                "generic_requirement_handlers",
                &self.generic_requirement_handlers.len(),
            )
            .field("effect_kinds", &self.effect_handlers.keys().collect::<Vec<_>>())
            .field("generic_effect_handlers", &self.generic_effect_handlers.len())
            .finish()
    }
}
