//! Advice objects: the callbacks that run around a contract method.
//!
//! An advice object exposes named callbacks with explicit signatures. The
//! join point resolves the callback it needs when advice is registered, so a
//! missing or mis-typed callback is a registration error, never a call-time one.

use crate::errors::Outcome;
use crate::types::{CallbackSignature, ParamType};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Callback body stored by [`AdviceObject`].
pub type CallbackFn = dyn Fn(&[Value]) -> Outcome + Send + Sync;

/// An object supplying before / after / on-error behavior.
///
/// Implement this directly to route callbacks by hand, or use
/// [`AdviceObject`] to assemble one from closures.
pub trait Advice: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Check whether a callback with exactly this signature exists.
    fn exposes(&self, callback: &CallbackSignature) -> bool;

    /// Invoke a callback previously resolved with [`Advice::exposes`].
    fn call(&self, callback: &CallbackSignature, args: &[Value]) -> Outcome;
}

/// Advice assembled from closures keyed by callback signature.
#[derive(Clone)]
pub struct AdviceObject {
    name: String,
    callbacks: HashMap<CallbackSignature, Arc<CallbackFn>>,
}

impl AdviceObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            callbacks: HashMap::new(),
        }
    }

    /// Add a callback returning a value or failure.
    pub fn callback<F>(mut self, name: impl Into<String>, params: &[ParamType], body: F) -> Self
    where
        F: Fn(&[Value]) -> Outcome + Send + Sync + 'static,
    {
        self.callbacks
            .insert(CallbackSignature::new(name, params), Arc::new(body));
        self
    }

    /// Add a callback that cannot fail and produces no value.
    pub fn observer<F>(self, name: impl Into<String>, params: &[ParamType], body: F) -> Self
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.callback(name, params, move |args| {
            body(args);
            Ok(Value::Null)
        })
    }

    /// Number of callbacks exposed.
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn signatures(&self) -> impl Iterator<Item = &CallbackSignature> {
        self.callbacks.keys()
    }
}

impl std::fmt::Debug for AdviceObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdviceObject")
            .field("name", &self.name)
            .field("callbacks", &self.callbacks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Advice for AdviceObject {
    fn name(&self) -> &str {
        &self.name
    }

    fn exposes(&self, callback: &CallbackSignature) -> bool {
        self.callbacks.contains_key(callback)
    }

    fn call(&self, callback: &CallbackSignature, args: &[Value]) -> Outcome {
        match self.callbacks.get(callback) {
            Some(body) => body(args),
            // Unreachable for entries created by a join point.
            None => Err(crate::errors::ApplicationFailure::advice(format!(
                "advice '{}' has no callback {}",
                self.name, callback
            ))
            .into()),
        }
    }
}
