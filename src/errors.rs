//! Error types for advice registration and dispatch.
//!
//! Two error layers:
//!
//! 1. **RegistrationError**: configuration defects found while binding advice
//!    (missing callback, duplicate error advice, unknown method). These surface
//!    during setup and never at call time.
//!
//! 2. **Failure**: runtime failures raised by the real implementation or by
//!    advice during a dispatch. Application failures may be recovered by error
//!    advice; unrecoverable failures always propagate untouched.

use crate::types::{CallbackSignature, MethodSignature, Metadata, UniqueId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════
// LAYER 1: Registration errors
// ═══════════════════════════════════════════════════════════════════

/// Errors raised while registering advice or wiring proxies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// The advice object does not expose the callback the hook requires.
    #[error("advice '{advice}' has no callback {expected} for contract '{contract}'")]
    Resolution {
        contract: String,
        advice: String,
        expected: CallbackSignature,
    },

    /// A second error advice was registered under the single-advice policy.
    #[error("there is already an error advice registered for contract '{contract}' (method {method})")]
    DuplicateRegistration {
        contract: String,
        method: MethodSignature,
    },

    /// The target method is not part of the contract.
    #[error("method {method} is not part of contract '{contract}'")]
    UnknownMethod {
        contract: String,
        method: MethodSignature,
    },

    /// A method name matches several overloads and no signature was given.
    #[error("method name '{name}' is ambiguous in contract '{contract}' ({candidates} overloads)")]
    AmbiguousMethod {
        contract: String,
        name: String,
        candidates: usize,
    },

    /// The failure parameter type was used in a contract method.
    #[error("method {method} of contract '{contract}' declares a failure parameter")]
    InvalidSignature {
        contract: String,
        method: MethodSignature,
    },

    /// No proxy definition or service exists for the contract.
    #[error("unknown contract '{0}'")]
    UnknownContract(String),

    /// A proxy definition for the contract is already active.
    #[error("a proxy definition for contract '{0}' is already registered")]
    AlreadyDefined(String),
}

/// Result type alias for registration operations.
pub type RegistrationResult<T> = Result<T, RegistrationError>;

// ═══════════════════════════════════════════════════════════════════
// LAYER 2: Runtime failures
// ═══════════════════════════════════════════════════════════════════

/// Unique failure identifier. Two failures are the same failure iff their ids match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FailureId(pub UniqueId);

impl FailureId {
    pub fn new() -> Self {
        Self(UniqueId::new())
    }
}

impl Default for FailureId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FailureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fail_{}", self.0)
    }
}

/// Machine-readable failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    /// Resource not found
    NotFound,

    /// Invalid input provided
    InvalidInput,

    /// Invalid state for operation
    InvalidState,

    /// Operation not permitted
    PermissionDenied,

    /// Raised by advice rather than by the service
    AdviceFailed,

    /// Anything else raised by the service
    Service,
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotFound => "NOT_FOUND",
            Self::InvalidInput => "INVALID_INPUT",
            Self::InvalidState => "INVALID_STATE",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::AdviceFailed => "ADVICE_FAILED",
            Self::Service => "SERVICE",
        };
        write!(f, "{}", s)
    }
}

/// An ordinary failure raised during normal operation.
///
/// Recoverable by error advice. Serializable so it can be appended to the
/// argument list handed to an on-error callback.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("[{code}] {message}")]
pub struct ApplicationFailure {
    /// Identity, preserved through propagation
    pub id: FailureId,

    /// Failure code (machine-readable)
    pub code: FailureCode,

    /// Human-readable message
    pub message: String,

    /// Additional context (for debugging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Metadata>,
}

impl ApplicationFailure {
    /// Create a new failure with a fresh identity.
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            id: FailureId::new(),
            code,
            message: message.into(),
            context: None,
        }
    }

    /// Add context to the failure
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let context = self.context.get_or_insert_with(HashMap::new);
        if let Ok(v) = serde_json::to_value(value) {
            context.insert(key.into(), v);
        }
        self
    }

    pub fn service(message: impl Into<String>) -> Self {
        Self::new(FailureCode::Service, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(FailureCode::InvalidInput, message)
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new(FailureCode::NotFound, format!("{} not found", resource.into()))
    }

    pub fn advice(message: impl Into<String>) -> Self {
        Self::new(FailureCode::AdviceFailed, message)
    }

    /// Same failure, same identity.
    pub fn is_same(&self, other: &ApplicationFailure) -> bool {
        self.id == other.id
    }

    /// Encode as the trailing argument of an on-error callback.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Decode the trailing argument an on-error callback received.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Kinds of platform-level failures that advice must never see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnrecoverableKind {
    /// Out of memory, handles, threads
    ResourceExhausted,

    /// Any other platform failure
    Platform,
}

impl std::fmt::Display for UnrecoverableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResourceExhausted => write!(f, "resource_exhausted"),
            Self::Platform => write!(f, "platform"),
        }
    }
}

/// A platform-level failure. Always propagated immediately and unchanged.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("unrecoverable ({kind}): {message}")]
pub struct UnrecoverableFailure {
    pub id: FailureId,
    pub kind: UnrecoverableKind,
    pub message: String,
}

impl UnrecoverableFailure {
    pub fn new(kind: UnrecoverableKind, message: impl Into<String>) -> Self {
        Self {
            id: FailureId::new(),
            kind,
            message: message.into(),
        }
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(UnrecoverableKind::ResourceExhausted, message)
    }

    pub fn platform(message: impl Into<String>) -> Self {
        Self::new(UnrecoverableKind::Platform, message)
    }
}

/// The failure half of an [`Outcome`].
#[derive(Debug, Clone, Error)]
pub enum Failure {
    #[error(transparent)]
    Application(#[from] ApplicationFailure),

    #[error(transparent)]
    Unrecoverable(#[from] UnrecoverableFailure),
}

impl Failure {
    /// Only application failures may be handed to error advice.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Application(_))
    }

    pub fn id(&self) -> FailureId {
        match self {
            Self::Application(f) => f.id,
            Self::Unrecoverable(f) => f.id,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Application(f) => &f.message,
            Self::Unrecoverable(f) => &f.message,
        }
    }

    pub fn as_application(&self) -> Option<&ApplicationFailure> {
        match self {
            Self::Application(f) => Some(f),
            Self::Unrecoverable(_) => None,
        }
    }
}

/// The single value or failure observed by the caller of a wrapped service.
pub type Outcome = Result<serde_json::Value, Failure>;
