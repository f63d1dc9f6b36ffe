//! # Service Advice v0.1.0
//!
//! Before, after and on-error advice for services behind a contract.
//!
//! A caller holds what looks like the service. Every call goes through a
//! [`Dispatcher`](dispatcher::Dispatcher), which runs the advice registered
//! for the method around the real implementation:
//!
//! - **Contract / MethodSignature**: the method set a service exposes
//! - **Advice**: an object with callbacks named after the methods they wrap
//!   (`serve` → `beforeServe`, `afterServe`, `onErrorServe`)
//! - **JoinPoint**: mutable registration phase, resolved and checked eagerly
//! - **AdviceRegistry**: the frozen result, shared by concurrent dispatches
//! - **Dispatcher**: runs before → target → after, and routes application
//!   failures to error advice
//! - **Errors**: `RegistrationError` at configuration time, `Failure`
//!   (application or unrecoverable) at call time
//! - **Host**: service registry glue that publishes proxies in place of the
//!   originals
//!
//! ## Usage
//!
//! ```rust,ignore
//! use service_advice::prelude::*;
//!
//! let contract = Contract::new("Greeter").method("greet", &[ParamType::String]);
//! let advice = AdviceObject::new("audit")
//!     .observer("beforeGreet", &[ParamType::String], |args| tracing::info!(?args));
//!
//! let mut join_point = JoinPoint::new(contract);
//! join_point.schedule_before(Arc::new(advice)).on("greet")?;
//!
//! let dispatcher = Dispatcher::new(Arc::new(greeter), Arc::new(join_point.freeze()));
//! dispatcher.call(&MethodSignature::new("greet", &[ParamType::String]), &[json!("bob")])?;
//! ```

pub mod advice;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod events;
pub mod factory;
pub mod host;
pub mod join_point;
pub mod types;

// Re-export everything in prelude for convenience
pub mod prelude {
    pub use crate::advice::*;
    pub use crate::config::*;
    pub use crate::dispatcher::*;
    pub use crate::errors::*;
    pub use crate::events::*;
    pub use crate::factory::*;
    pub use crate::host::*;
    pub use crate::join_point::*;
    pub use crate::types::*;
}
