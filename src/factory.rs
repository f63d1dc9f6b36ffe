//! Entry point for configurers: join point definitions, the factory that
//! builds registries from them, and the schedule API.
//!
//! ```rust,ignore
//! struct Audited;
//!
//! impl JoinPointDefinition for Audited {
//!     fn contract(&self) -> Contract {
//!         Contract::new("Greeter").method("greet", &[ParamType::String])
//!     }
//!
//!     fn configure(&self, join_point: &mut JoinPoint) -> RegistrationResult<()> {
//!         join_point.schedule_before(audit_advice()).on("greet")?;
//!         join_point.schedule_on_error(fallback_advice()).on("greet")
//!     }
//! }
//!
//! let registry = JoinPointFactory::new(Arc::new(Audited)).create()?;
//! ```

use crate::advice::Advice;
use crate::config::AdviceConfig;
use crate::errors::{RegistrationError, RegistrationResult};
use crate::join_point::{AdviceRegistry, JoinPoint};
use crate::types::{Contract, HookKind, MethodSignature};
use std::sync::Arc;

/// Describes which advice a contract gets.
///
/// The host glue asks the definition to configure a fresh join point for
/// every service it wraps.
pub trait JoinPointDefinition: Send + Sync {
    /// The contract whose services are wrapped.
    fn contract(&self) -> Contract;

    /// Policy for the join points built from this definition.
    fn config(&self) -> AdviceConfig {
        AdviceConfig::default()
    }

    /// Register advice on a fresh join point.
    fn configure(&self, join_point: &mut JoinPoint) -> RegistrationResult<()>;
}

/// Builds frozen registries from a definition.
#[derive(Clone)]
pub struct JoinPointFactory {
    definition: Arc<dyn JoinPointDefinition>,
    contract: Contract,
}

impl JoinPointFactory {
    pub fn new(definition: Arc<dyn JoinPointDefinition>) -> Self {
        let contract = definition.contract();
        Self {
            definition,
            contract,
        }
    }

    /// The contract this factory builds join points for.
    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    /// Build, configure and freeze a new join point.
    pub fn create(&self) -> RegistrationResult<Arc<AdviceRegistry>> {
        let mut join_point = JoinPoint::with_config(self.contract.clone(), self.definition.config());
        self.definition.configure(&mut join_point)?;
        Ok(Arc::new(join_point.freeze()))
    }
}

impl std::fmt::Debug for JoinPointFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinPointFactory")
            .field("contract", &self.contract.name)
            .finish()
    }
}

/// Pending registration of one advice object for one hook kind.
///
/// Completed by naming the target method.
#[must_use = "a schedule registers nothing until a target method is named"]
pub struct Schedule<'a> {
    join_point: &'a mut JoinPoint,
    advice: Arc<dyn Advice>,
    kind: HookKind,
}

impl Schedule<'_> {
    /// Target the only method called `name`.
    pub fn on(self, name: &str) -> RegistrationResult<()> {
        let method = {
            let contract = self.join_point.contract();
            let mut overloads = contract.overloads(name);
            match (overloads.next(), overloads.next()) {
                (Some(method), None) => method.clone(),
                (None, _) => {
                    return Err(RegistrationError::UnknownMethod {
                        contract: contract.name.clone(),
                        method: MethodSignature::nullary(name),
                    })
                }
                (Some(_), Some(_)) => {
                    return Err(RegistrationError::AmbiguousMethod {
                        contract: contract.name.clone(),
                        name: name.to_string(),
                        candidates: contract.overloads(name).count(),
                    })
                }
            }
        };
        self.on_signature(&method)
    }

    /// Target an exact method signature.
    pub fn on_signature(self, method: &MethodSignature) -> RegistrationResult<()> {
        self.join_point.register(self.kind, self.advice, method)
    }

    /// Target every overload of `name`.
    pub fn on_all(self, name: &str) -> RegistrationResult<()> {
        let methods: Vec<MethodSignature> =
            self.join_point.contract().overloads(name).cloned().collect();
        if methods.is_empty() {
            return Err(RegistrationError::UnknownMethod {
                contract: self.join_point.contract().name.clone(),
                method: MethodSignature::nullary(name),
            });
        }
        for method in &methods {
            self.join_point
                .register(self.kind, self.advice.clone(), method)?;
        }
        Ok(())
    }
}

impl JoinPoint {
    /// Start a before-advice registration.
    pub fn schedule_before(&mut self, advice: Arc<dyn Advice>) -> Schedule<'_> {
        self.schedule(HookKind::Before, advice)
    }

    /// Start an after-advice registration.
    pub fn schedule_after(&mut self, advice: Arc<dyn Advice>) -> Schedule<'_> {
        self.schedule(HookKind::After, advice)
    }

    /// Start an error-advice registration.
    pub fn schedule_on_error(&mut self, advice: Arc<dyn Advice>) -> Schedule<'_> {
        self.schedule(HookKind::OnError, advice)
    }

    fn schedule(&mut self, kind: HookKind, advice: Arc<dyn Advice>) -> Schedule<'_> {
        Schedule {
            join_point: self,
            advice,
            kind,
        }
    }
}
