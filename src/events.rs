//! Dispatch events for observability.
//!
//! A dispatcher with an attached [`EventManager`] reports every advice and
//! target invocation and every failure decision.

use crate::errors::{Failure, FailureId};
use crate::types::{CallbackSignature, HookKind, MethodSignature, UniqueId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Unique event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub UniqueId);

impl EventId {
    pub fn new() -> Self {
        Self(UniqueId::new())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "evt_{}", self.0)
    }
}

/// What happened during a dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DispatchEventType {
    /// An advice callback ran.
    AdviceInvoked {
        kind: HookKind,
        callback: CallbackSignature,
    },

    /// The real implementation ran.
    TargetInvoked,

    /// Error advice turned a failure into a value.
    FailureRecovered { failure: FailureId },

    /// A failure reached the caller.
    FailurePropagated {
        failure: FailureId,
        recoverable: bool,
        message: String,
    },
}

impl DispatchEventType {
    /// Short name used by [`EventFilter`].
    pub fn name(&self) -> &'static str {
        match self {
            Self::AdviceInvoked { .. } => "advice_invoked",
            Self::TargetInvoked => "target_invoked",
            Self::FailureRecovered { .. } => "failure_recovered",
            Self::FailurePropagated { .. } => "failure_propagated",
        }
    }
}

/// Event emitted by a dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub id: EventId,

    /// Contract name of the wrapped service.
    pub contract: String,

    /// Method being dispatched.
    pub method: MethodSignature,

    #[serde(flatten)]
    pub event_type: DispatchEventType,

    pub timestamp: DateTime<Utc>,
}

impl DispatchEvent {
    pub fn new(
        contract: impl Into<String>,
        method: &MethodSignature,
        event_type: DispatchEventType,
    ) -> Self {
        Self {
            id: EventId::new(),
            contract: contract.into(),
            method: method.clone(),
            event_type,
            timestamp: Utc::now(),
        }
    }

    pub fn advice_invoked(
        contract: &str,
        method: &MethodSignature,
        kind: HookKind,
        callback: &CallbackSignature,
    ) -> Self {
        Self::new(
            contract,
            method,
            DispatchEventType::AdviceInvoked {
                kind,
                callback: callback.clone(),
            },
        )
    }

    pub fn target_invoked(contract: &str, method: &MethodSignature) -> Self {
        Self::new(contract, method, DispatchEventType::TargetInvoked)
    }

    pub fn failure_recovered(contract: &str, method: &MethodSignature, failure: FailureId) -> Self {
        Self::new(contract, method, DispatchEventType::FailureRecovered { failure })
    }

    pub fn failure_propagated(contract: &str, method: &MethodSignature, failure: &Failure) -> Self {
        Self::new(
            contract,
            method,
            DispatchEventType::FailurePropagated {
                failure: failure.id(),
                recoverable: failure.is_recoverable(),
                message: failure.message().to_string(),
            },
        )
    }
}

/// Filter for reading recorded events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub contract: Option<String>,
    pub method: Option<String>,
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_contract(mut self, contract: impl Into<String>) -> Self {
        self.contract = Some(contract.into());
        self
    }

    pub fn for_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn of_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types
            .get_or_insert_with(Vec::new)
            .push(event_type.into());
        self
    }

    /// Check if an event matches this filter.
    pub fn matches(&self, event: &DispatchEvent) -> bool {
        if let Some(contract) = &self.contract {
            if &event.contract != contract {
                return false;
            }
        }

        if let Some(method) = &self.method {
            if &event.method.name != method {
                return false;
            }
        }

        if let Some(types) = &self.event_types {
            if !types.iter().any(|t| t == event.event_type.name()) {
                return false;
            }
        }

        true
    }
}

/// Event receiver (broadcast channel).
pub type EventReceiver = broadcast::Receiver<DispatchEvent>;

/// Event sender (broadcast channel).
pub type EventSender = broadcast::Sender<DispatchEvent>;

/// Broadcasts dispatch events and keeps a bounded history.
pub struct EventManager {
    sender: EventSender,
    recent: Mutex<Vec<DispatchEvent>>,
    max_recent: usize,
}

impl EventManager {
    /// Create a new event manager. `capacity` bounds both the broadcast
    /// channel and the recorded history.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            recent: Mutex::new(Vec::new()),
            max_recent: capacity,
        }
    }

    /// Emit an event.
    pub fn emit(&self, event: DispatchEvent) {
        {
            let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
            recent.push(event.clone());
            if recent.len() > self.max_recent {
                recent.remove(0);
            }
        }

        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Most recent events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<DispatchEvent> {
        let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        recent.iter().rev().take(limit).cloned().collect()
    }

    /// Recorded events matching a filter, oldest first.
    pub fn matching(&self, filter: &EventFilter) -> Vec<DispatchEvent> {
        let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        recent.iter().filter(|e| filter.matches(e)).cloned().collect()
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("max_recent", &self.max_recent)
            .finish()
    }
}
