//! Shared types: contracts, method identities, hook kinds and callback identities.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Argument list of one invocation. An absent argument list is empty.
pub type Args = Vec<serde_json::Value>;

/// Generic metadata map.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Unique identifier (UUID-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniqueId(pub Uuid);

impl UniqueId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for UniqueId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UniqueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for UniqueId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ═══════════════════════════════════════════════════════════════════
// PARAMETERS AND METHODS
// ═══════════════════════════════════════════════════════════════════

/// Declared type of a single parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    /// Accepts any value.
    Any,
    Null,
    Bool,
    Integer,
    Number,
    String,
    Array,
    Object,

    /// The failure value handed to error advice. Only valid as the
    /// trailing parameter of an on-error callback.
    Failure,
}

impl ParamType {
    /// Check whether a runtime value fits this parameter type.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match self {
            Self::Any => true,
            Self::Null => value.is_null(),
            Self::Bool => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Array => value.is_array(),
            Self::Object | Self::Failure => matches!(value, Value::Object(_)),
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Any => "any",
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
            Self::Failure => "failure",
        };
        write!(f, "{}", s)
    }
}

/// Identity of one contract method: name plus ordered parameter types.
///
/// Overloads with the same name but different parameters are distinct methods.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodSignature {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamType>,
}

impl MethodSignature {
    pub fn new(name: impl Into<String>, params: &[ParamType]) -> Self {
        Self {
            name: name.into(),
            params: params.to_vec(),
        }
    }

    /// A method without parameters.
    pub fn nullary(name: impl Into<String>) -> Self {
        Self::new(name, &[])
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Check whether an argument list fits this signature.
    pub fn accepts(&self, args: &[serde_json::Value]) -> bool {
        args.len() == self.params.len()
            && self
                .params
                .iter()
                .zip(args)
                .all(|(param, arg)| param.accepts(arg))
    }
}

impl std::fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ")")
    }
}

// ═══════════════════════════════════════════════════════════════════
// CONTRACTS
// ═══════════════════════════════════════════════════════════════════

/// Content-derived contract identifier (hex encoded blake3 hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractId(pub String);

impl std::fmt::Display for ContractId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The abstract method set a service exposes.
///
/// Built once during setup and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub name: String,
    pub methods: Vec<MethodSignature>,
}

impl Contract {
    /// Create an empty contract.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Add a method. Adding the same signature twice is a no-op.
    pub fn method(mut self, name: impl Into<String>, params: &[ParamType]) -> Self {
        let signature = MethodSignature::new(name, params);
        if !self.methods.contains(&signature) {
            self.methods.push(signature);
        }
        self
    }

    /// Check if a method belongs to this contract.
    pub fn contains(&self, method: &MethodSignature) -> bool {
        self.methods.contains(method)
    }

    /// Find a method by exact signature.
    pub fn find(&self, name: &str, params: &[ParamType]) -> Option<&MethodSignature> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.params == params)
    }

    /// All overloads sharing a name.
    pub fn overloads<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MethodSignature> {
        self.methods.iter().filter(move |m| m.name == name)
    }

    /// Stable identifier derived from the name and the method set.
    pub fn fingerprint(&self) -> ContractId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.name.as_bytes());
        let mut signatures: Vec<String> = self.methods.iter().map(|m| m.to_string()).collect();
        signatures.sort();
        for signature in signatures {
            hasher.update(b"\n");
            hasher.update(signature.as_bytes());
        }
        ContractId(hex::encode(hasher.finalize().as_bytes()))
    }
}

impl std::fmt::Display for Contract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ═══════════════════════════════════════════════════════════════════
// HOOKS AND CALLBACKS
// ═══════════════════════════════════════════════════════════════════

/// When advice runs relative to the real call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    Before,
    After,
    OnError,
}

/// Prefix used for on-error callback names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackNaming {
    /// `onErrorServe`
    #[default]
    OnError,
    /// `onExceptionServe`
    OnException,
}

impl HookKind {
    /// Callback name prefix for this hook kind.
    pub fn prefix(&self, naming: CallbackNaming) -> &'static str {
        match (self, naming) {
            (Self::Before, _) => "before",
            (Self::After, _) => "after",
            (Self::OnError, CallbackNaming::OnError) => "onError",
            (Self::OnError, CallbackNaming::OnException) => "onException",
        }
    }

    /// Expected callback name for a target method name.
    ///
    /// `serve` becomes `beforeServe`, `afterServe`, `onErrorServe`.
    pub fn callback_name(&self, method_name: &str, naming: CallbackNaming) -> String {
        let mut name = String::from(self.prefix(naming));
        let mut chars = method_name.chars();
        if let Some(first) = chars.next() {
            name.extend(first.to_uppercase());
            name.push_str(chars.as_str());
        }
        name
    }
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Before => write!(f, "before"),
            Self::After => write!(f, "after"),
            Self::OnError => write!(f, "on_error"),
        }
    }
}

/// Identity of a callback on an advice object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackSignature {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamType>,
}

impl CallbackSignature {
    pub fn new(name: impl Into<String>, params: &[ParamType]) -> Self {
        Self {
            name: name.into(),
            params: params.to_vec(),
        }
    }

    /// Derive the callback an advice object must expose to serve `kind` for `method`.
    ///
    /// Before and after callbacks take the method's parameters unchanged. On-error
    /// callbacks take them plus one trailing [`ParamType::Failure`].
    pub fn for_hook(kind: HookKind, method: &MethodSignature, naming: CallbackNaming) -> Self {
        let mut params = method.params.clone();
        if kind == HookKind::OnError {
            params.push(ParamType::Failure);
        }
        Self {
            name: kind.callback_name(&method.name, naming),
            params,
        }
    }
}

impl std::fmt::Display for CallbackSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let as_method = MethodSignature {
            name: self.name.clone(),
            params: self.params.clone(),
        };
        write!(f, "{}", as_method)
    }
}
