//! Join points: bind advice callbacks to the methods of one contract.
//!
//! A join point lives in two phases. [`JoinPoint`] is the mutable builder
//! used while a configurer registers advice. [`JoinPoint::freeze`] turns it
//! into an [`AdviceRegistry`], which is immutable and shared by every
//! dispatcher of the contract. Because registration needs `&mut JoinPoint`
//! and dispatch only ever sees the frozen registry, registering while
//! dispatching cannot happen.
//!
//! Callback resolution happens at registration time. For a target method
//! `serve(string)` the advice object must expose:
//!
//! | Hook     | Callback                          |
//! |----------|-----------------------------------|
//! | before   | `beforeServe(string)`             |
//! | after    | `afterServe(string)`              |
//! | on error | `onErrorServe(string, failure)`   |

use crate::advice::Advice;
use crate::config::{AdviceConfig, ErrorAdvicePolicy};
use crate::errors::{ApplicationFailure, Failure, Outcome, RegistrationError, RegistrationResult};
use crate::events::{DispatchEvent, EventManager};
use crate::types::{CallbackSignature, Contract, HookKind, MethodSignature, ParamType};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

/// One binding of an advice callback to a target method.
#[derive(Clone)]
pub struct AdviceEntry {
    target: MethodSignature,
    callback: CallbackSignature,
    advice: Arc<dyn Advice>,
}

impl AdviceEntry {
    pub fn target(&self) -> &MethodSignature {
        &self.target
    }

    pub fn callback(&self) -> &CallbackSignature {
        &self.callback
    }

    pub fn advice_name(&self) -> &str {
        self.advice.name()
    }

    fn invoke(&self, args: &[Value]) -> Outcome {
        self.advice.call(&self.callback, args)
    }
}

impl std::fmt::Debug for AdviceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdviceEntry")
            .field("target", &self.target)
            .field("callback", &self.callback)
            .field("advice", &self.advice.name())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════
// BUILD PHASE
// ═══════════════════════════════════════════════════════════════════

/// Registration phase of a join point.
#[derive(Debug)]
pub struct JoinPoint {
    contract: Arc<Contract>,
    config: AdviceConfig,
    before: Vec<AdviceEntry>,
    after: Vec<AdviceEntry>,
    on_error: Vec<AdviceEntry>,
}

impl JoinPoint {
    pub fn new(contract: Contract) -> Self {
        Self::with_config(contract, AdviceConfig::default())
    }

    pub fn with_config(contract: Contract, config: AdviceConfig) -> Self {
        Self {
            contract: Arc::new(contract),
            config,
            before: Vec::new(),
            after: Vec::new(),
            on_error: Vec::new(),
        }
    }

    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    pub fn config(&self) -> &AdviceConfig {
        &self.config
    }

    /// Run `beforeX` on `advice` ahead of every call to `method`.
    pub fn register_before(
        &mut self,
        advice: Arc<dyn Advice>,
        method: &MethodSignature,
    ) -> RegistrationResult<()> {
        let entry = self.resolve(advice, method, HookKind::Before)?;
        self.before.push(entry);
        Ok(())
    }

    /// Run `afterX` on `advice` after every successful call to `method`.
    pub fn register_after(
        &mut self,
        advice: Arc<dyn Advice>,
        method: &MethodSignature,
    ) -> RegistrationResult<()> {
        let entry = self.resolve(advice, method, HookKind::After)?;
        self.after.push(entry);
        Ok(())
    }

    /// Run `onErrorX` on `advice` when a call to `method` fails.
    ///
    /// Under [`ErrorAdvicePolicy::Single`] a contract carries at most one error
    /// advice and a second registration fails with
    /// [`RegistrationError::DuplicateRegistration`].
    pub fn register_on_error(
        &mut self,
        advice: Arc<dyn Advice>,
        method: &MethodSignature,
    ) -> RegistrationResult<()> {
        if self.config.error_advice == ErrorAdvicePolicy::Single && !self.on_error.is_empty() {
            return Err(RegistrationError::DuplicateRegistration {
                contract: self.contract.name.clone(),
                method: method.clone(),
            });
        }
        let entry = self.resolve(advice, method, HookKind::OnError)?;
        self.on_error.push(entry);
        Ok(())
    }

    /// Register for an arbitrary hook kind.
    pub fn register(
        &mut self,
        kind: HookKind,
        advice: Arc<dyn Advice>,
        method: &MethodSignature,
    ) -> RegistrationResult<()> {
        match kind {
            HookKind::Before => self.register_before(advice, method),
            HookKind::After => self.register_after(advice, method),
            HookKind::OnError => self.register_on_error(advice, method),
        }
    }

    /// End the registration phase.
    pub fn freeze(self) -> AdviceRegistry {
        debug!(
            contract = %self.contract,
            before = self.before.len(),
            after = self.after.len(),
            on_error = self.on_error.len(),
            "join point frozen"
        );
        AdviceRegistry {
            contract: self.contract,
            config: self.config,
            before: self.before,
            after: self.after,
            on_error: self.on_error,
        }
    }

    fn resolve(
        &self,
        advice: Arc<dyn Advice>,
        method: &MethodSignature,
        kind: HookKind,
    ) -> RegistrationResult<AdviceEntry> {
        if !self.contract.contains(method) {
            return Err(RegistrationError::UnknownMethod {
                contract: self.contract.name.clone(),
                method: method.clone(),
            });
        }
        if method.params.contains(&ParamType::Failure) {
            return Err(RegistrationError::InvalidSignature {
                contract: self.contract.name.clone(),
                method: method.clone(),
            });
        }

        let callback = CallbackSignature::for_hook(kind, method, self.config.callback_naming);
        if !advice.exposes(&callback) {
            return Err(RegistrationError::Resolution {
                contract: self.contract.name.clone(),
                advice: advice.name().to_string(),
                expected: callback,
            });
        }

        debug!(
            contract = %self.contract,
            method = %method,
            callback = %callback,
            advice = advice.name(),
            hook = %kind,
            "advice registered"
        );
        Ok(AdviceEntry {
            target: method.clone(),
            callback,
            advice,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════
// DISPATCH PHASE
// ═══════════════════════════════════════════════════════════════════

/// Frozen advice bindings for one contract.
///
/// Read-only; safe to share across threads and dispatch concurrently.
#[derive(Debug)]
pub struct AdviceRegistry {
    contract: Arc<Contract>,
    config: AdviceConfig,
    before: Vec<AdviceEntry>,
    after: Vec<AdviceEntry>,
    on_error: Vec<AdviceEntry>,
}

impl AdviceRegistry {
    /// A registry without any advice.
    pub fn empty(contract: Contract) -> Self {
        JoinPoint::new(contract).freeze()
    }

    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    pub fn config(&self) -> &AdviceConfig {
        &self.config
    }

    /// All entries of one hook kind, in registration order.
    pub fn entries(&self, kind: HookKind) -> &[AdviceEntry] {
        match kind {
            HookKind::Before => &self.before,
            HookKind::After => &self.after,
            HookKind::OnError => &self.on_error,
        }
    }

    /// Entries of one hook kind bound to `method`.
    pub fn entries_for<'a, 'm>(
        &'a self,
        kind: HookKind,
        method: &'m MethodSignature,
    ) -> impl Iterator<Item = &'a AdviceEntry> + 'm
    where
        'a: 'm,
    {
        self.entries(kind).iter().filter(move |e| &e.target == method)
    }

    pub fn len(&self) -> usize {
        self.before.len() + self.after.len() + self.on_error.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every before advice of `method` in registration order.
    ///
    /// The first failing callback stops the run and its failure is returned
    /// as is; interpreting it is up to the caller.
    pub fn run_before(&self, method: &MethodSignature, args: &[Value]) -> Result<(), Failure> {
        self.run_hook(HookKind::Before, method, args, None)
    }

    /// Run every after advice of `method` in registration order.
    pub fn run_after(&self, method: &MethodSignature, args: &[Value]) -> Result<(), Failure> {
        self.run_hook(HookKind::After, method, args, None)
    }

    /// Hand a failure to the error advice of `method`.
    ///
    /// The callback receives `args` with the failure appended. Under the single
    /// policy its result is the outcome. Under the multiple policy every entry
    /// runs for side effects and the outcome is null. A failure raised by error
    /// advice supersedes the original. Without error advice the original
    /// failure is returned unchanged.
    pub fn run_on_error(
        &self,
        method: &MethodSignature,
        args: &[Value],
        failure: &ApplicationFailure,
    ) -> Outcome {
        self.run_error_hook(method, args, failure, None)
    }

    /// Check whether `method` has error advice.
    pub fn has_error_advice(&self, method: &MethodSignature) -> bool {
        self.on_error.iter().any(|e| &e.target == method)
    }

    /// Check whether any method of the contract has error advice.
    pub fn has_any_error_advice(&self) -> bool {
        !self.on_error.is_empty()
    }

    pub(crate) fn run_hook(
        &self,
        kind: HookKind,
        method: &MethodSignature,
        args: &[Value],
        events: Option<&EventManager>,
    ) -> Result<(), Failure> {
        for entry in self.entries_for(kind, method) {
            trace!(contract = %self.contract, callback = %entry.callback, "running advice");
            if let Some(events) = events {
                events.emit(DispatchEvent::advice_invoked(
                    &self.contract.name,
                    method,
                    kind,
                    &entry.callback,
                ));
            }
            entry.invoke(args)?;
        }
        Ok(())
    }

    pub(crate) fn run_error_hook(
        &self,
        method: &MethodSignature,
        args: &[Value],
        failure: &ApplicationFailure,
        events: Option<&EventManager>,
    ) -> Outcome {
        let mut arguments = args.to_vec();
        arguments.push(failure.to_value());

        let mut result = None;
        for entry in self.entries_for(HookKind::OnError, method) {
            trace!(contract = %self.contract, callback = %entry.callback, failure = %failure.id, "running error advice");
            if let Some(events) = events {
                events.emit(DispatchEvent::advice_invoked(
                    &self.contract.name,
                    method,
                    HookKind::OnError,
                    &entry.callback,
                ));
            }
            let value = entry.invoke(&arguments)?;
            result = Some(match self.config.error_advice {
                ErrorAdvicePolicy::Single => value,
                ErrorAdvicePolicy::Multiple => Value::Null,
            });
        }

        result.ok_or_else(|| Failure::Application(failure.clone()))
    }
}
