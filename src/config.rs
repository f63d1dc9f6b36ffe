//! Configuration for join points and dispatchers.

use crate::types::CallbackNaming;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How many on-error advices a contract may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAdvicePolicy {
    /// At most one per contract; its return value recovers the call.
    #[default]
    Single,

    /// Any number per method, run in registration order for side effects.
    /// A recovered call returns null.
    Multiple,
}

/// Advice configuration.
///
/// Decides the behaviors that differ between deployments: error advice
/// cardinality, callback naming, and whether failures raised by before/after
/// advice are routed to error advice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdviceConfig {
    /// Cardinality of on-error advice
    pub error_advice: ErrorAdvicePolicy,

    /// Prefix for on-error callback names
    pub callback_naming: CallbackNaming,

    /// Route failures from before/after advice through error advice
    pub route_advice_failures: bool,

    /// Emit dispatch events to an event manager
    pub emit_events: bool,

    /// Broadcast capacity of the event channel
    pub event_capacity: usize,

    /// Custom options
    pub options: HashMap<String, serde_json::Value>,
}

impl Default for AdviceConfig {
    fn default() -> Self {
        Self {
            error_advice: ErrorAdvicePolicy::Single,
            callback_naming: CallbackNaming::OnError,
            route_advice_failures: true,
            emit_events: false,
            event_capacity: 256,
            options: HashMap::new(),
        }
    }
}

impl AdviceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow many on-error advices, run for side effects only.
    pub fn multiple_error_advice() -> Self {
        Self {
            error_advice: ErrorAdvicePolicy::Multiple,
            ..Default::default()
        }
    }

    /// Set the error advice policy
    pub fn error_advice(mut self, policy: ErrorAdvicePolicy) -> Self {
        self.error_advice = policy;
        self
    }

    /// Set the on-error callback naming
    pub fn callback_naming(mut self, naming: CallbackNaming) -> Self {
        self.callback_naming = naming;
        self
    }

    /// Set whether before/after failures reach error advice
    pub fn route_advice_failures(mut self, route: bool) -> Self {
        self.route_advice_failures = route;
        self
    }

    /// Enable event emission with the given channel capacity
    pub fn with_events(mut self, capacity: usize) -> Self {
        self.emit_events = true;
        self.event_capacity = capacity.max(1);
        self
    }

    /// Add a custom option
    pub fn option(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.options.insert(key.into(), v);
        }
        self
    }

    /// Get a custom option
    pub fn get_option<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.options
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
