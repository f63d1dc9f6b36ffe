//! The invocation handler sitting in front of a real service.
//!
//! Protocol for one invocation of method `m` with arguments `a`:
//!
//! ```text
//!   before(m, a) ──fail──┐
//!        │               │
//!   target.m(a) ──fail───┤
//!        │               ▼
//!   after(m, a) ──fail──► unrecoverable? ──yes──► propagate
//!        │                     │ no
//!        ▼               error advice for m? ──no──► propagate
//!   target's value             │ yes
//!                        on_error(m, a, failure) ──► its value, or its failure
//! ```
//!
//! A call whose method is not in the contract, or whose arguments do not fit
//! the signature, fails with `INVALID_INPUT` before any advice runs.
//! Everything runs synchronously on the caller's thread.

use crate::config::AdviceConfig;
use crate::errors::{ApplicationFailure, Failure, Outcome};
use crate::events::{DispatchEvent, EventManager};
use crate::join_point::AdviceRegistry;
use crate::types::{Args, Contract, HookKind, MethodSignature};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// A plain callable service: the real implementation behind a contract.
///
/// Forwarding adapters translate a service's own Rust trait into calls of
/// this shape; [`Dispatcher`] implements it too, so a proxy can stand in
/// wherever the original could.
pub trait ServiceTarget: Send + Sync {
    /// Call `method` with `args`.
    fn invoke(&self, method: &MethodSignature, args: &[Value]) -> Outcome;

    /// Whether this target is already an advice proxy.
    fn is_proxy(&self) -> bool {
        false
    }
}

impl<F> ServiceTarget for F
where
    F: Fn(&MethodSignature, &[Value]) -> Outcome + Send + Sync,
{
    fn invoke(&self, method: &MethodSignature, args: &[Value]) -> Outcome {
        self(method, args)
    }
}

/// One runtime method call.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub method: MethodSignature,
    pub args: Args,
}

impl Invocation {
    pub fn new(method: MethodSignature, args: Args) -> Self {
        Self { method, args }
    }

    /// A call without arguments.
    pub fn nullary(method: MethodSignature) -> Self {
        Self::new(method, Vec::new())
    }
}

/// Stage at which a failure arose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Before,
    Target,
    After,
}

/// Runs the advice protocol around a real implementation.
pub struct Dispatcher {
    target: Arc<dyn ServiceTarget>,
    registry: Arc<AdviceRegistry>,
    events: Option<Arc<EventManager>>,
}

impl Dispatcher {
    pub fn new(target: Arc<dyn ServiceTarget>, registry: Arc<AdviceRegistry>) -> Self {
        let events = registry
            .config()
            .emit_events
            .then(|| Arc::new(EventManager::new(registry.config().event_capacity)));
        Self {
            target,
            registry,
            events,
        }
    }

    /// Report events to a shared manager instead of a private one.
    pub fn with_events(mut self, events: Arc<EventManager>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &AdviceRegistry {
        &self.registry
    }

    pub fn contract(&self) -> &Contract {
        self.registry.contract()
    }

    pub fn events(&self) -> Option<&Arc<EventManager>> {
        self.events.as_ref()
    }

    fn config(&self) -> &AdviceConfig {
        self.registry.config()
    }

    /// Run one invocation and return its single outcome.
    pub fn dispatch(&self, invocation: &Invocation) -> Outcome {
        self.call(&invocation.method, &invocation.args)
    }

    /// Run one call of `method` with `args` and return its single outcome.
    pub fn call(&self, method: &MethodSignature, args: &[Value]) -> Outcome {
        debug!(contract = %self.contract(), method = %method, "dispatching");
        if !self.contract().contains(method) {
            warn!(contract = %self.contract(), method = %method, "method not in contract");
            let failure = ApplicationFailure::invalid_input(format!(
                "{} is not a method of {}",
                method,
                self.contract().name
            ));
            return self.propagate(method, failure.into());
        }
        if !method.accepts(args) {
            warn!(contract = %self.contract(), method = %method, arity = args.len(), "arguments do not fit signature");
            let failure = ApplicationFailure::invalid_input(format!(
                "arguments do not fit {}",
                method
            ))
            .with_context("args", args);
            return self.propagate(method, failure.into());
        }
        let events = self.events.as_deref();

        if let Err(failure) = self
            .registry
            .run_hook(HookKind::Before, method, args, events)
        {
            return self.recover(Stage::Before, method, args, failure);
        }

        self.emit(|contract| DispatchEvent::target_invoked(contract, method));
        let value = match self.target.invoke(method, args) {
            Ok(value) => value,
            Err(failure) => return self.recover(Stage::Target, method, args, failure),
        };

        if let Err(failure) = self.registry.run_hook(HookKind::After, method, args, events) {
            return self.recover(Stage::After, method, args, failure);
        }

        Ok(value)
    }

    /// Decide what the caller sees after a failure.
    fn recover(&self, stage: Stage, method: &MethodSignature, args: &[Value], failure: Failure) -> Outcome {
        let application = match failure {
            Failure::Application(application) => application,
            unrecoverable @ Failure::Unrecoverable(_) => {
                error!(contract = %self.contract(), method = %method, stage = ?stage, failure = %unrecoverable, "unrecoverable failure");
                return self.propagate(method, unrecoverable);
            }
        };

        let routable = stage == Stage::Target || self.config().route_advice_failures;
        if !routable || !self.registry.has_error_advice(method) {
            warn!(contract = %self.contract(), method = %method, stage = ?stage, failure = %application, "failure propagated");
            return self.propagate(method, Failure::Application(application));
        }

        match self
            .registry
            .run_error_hook(method, args, &application, self.events.as_deref())
        {
            Ok(value) => {
                debug!(contract = %self.contract(), method = %method, failure = %application.id, "failure recovered by error advice");
                let id = application.id;
                self.emit(|contract| DispatchEvent::failure_recovered(contract, method, id));
                Ok(value)
            }
            Err(superseding) => {
                warn!(contract = %self.contract(), method = %method, failure = %superseding, "error advice failed");
                self.propagate(method, superseding)
            }
        }
    }

    fn propagate(&self, method: &MethodSignature, failure: Failure) -> Outcome {
        self.emit(|contract| DispatchEvent::failure_propagated(contract, method, &failure));
        Err(failure)
    }

    fn emit(&self, event: impl FnOnce(&str) -> DispatchEvent) {
        if let Some(events) = &self.events {
            events.emit(event(&self.contract().name));
        }
    }
}

impl ServiceTarget for Dispatcher {
    fn invoke(&self, method: &MethodSignature, args: &[Value]) -> Outcome {
        self.call(method, args)
    }

    fn is_proxy(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("contract", &self.contract().name)
            .field("advice", &self.registry.len())
            .field("events", &self.events.is_some())
            .finish()
    }
}
