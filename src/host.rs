//! In-process service registry and the glue that publishes advice proxies.
//!
//! - [`ServiceRegistry`] holds services keyed by contract name, notifies
//!   listeners on registration and lets find hooks filter lookups.
//! - [`ProxyRegistrar`] listens for services of one contract and registers a
//!   [`Dispatcher`] proxy for every original it sees.
//! - [`ProxyProvider`] owns the registrars. Definitions added before the
//!   provider is activated are buffered. Once a definition exists for a
//!   contract, lookups only return the provider's proxies.

use crate::dispatcher::{Dispatcher, ServiceTarget};
use crate::errors::{RegistrationError, RegistrationResult};
use crate::events::EventManager;
use crate::factory::{JoinPointDefinition, JoinPointFactory};
use crate::types::{Contract, ContractId, Metadata, UniqueId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error, warn};

/// Identifies who registered a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub UniqueId);

impl OwnerId {
    pub fn new() -> Self {
        Self(UniqueId::new())
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "own_{}", self.0)
    }
}

/// Unique service registration identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId(pub UniqueId);

impl ServiceId {
    pub fn new() -> Self {
        Self(UniqueId::new())
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "svc_{}", self.0)
    }
}

/// Handle to one registered service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceReference {
    pub id: ServiceId,

    /// Contract name the service is registered under
    pub contract: String,

    /// Fingerprint of the contract's method set
    pub contract_id: ContractId,

    /// Who registered it
    pub owner: OwnerId,

    /// Whether the service is an advice proxy
    pub proxy: bool,

    #[serde(default)]
    pub properties: Metadata,
}

impl ServiceReference {
    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }
}

/// Notified when a service of a watched contract is registered.
pub trait ServiceListener: Send + Sync {
    fn service_added(&self, registry: &ServiceRegistry, reference: &ServiceReference);
}

/// Filters the references a lookup returns.
pub trait FindHook: Send + Sync {
    fn find(&self, contract: &str, references: &mut Vec<ServiceReference>);
}

struct Registration {
    reference: ServiceReference,
    service: Arc<dyn ServiceTarget>,
}

/// Services keyed by contract name.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<Vec<Registration>>,
    listeners: RwLock<Vec<(String, Arc<dyn ServiceListener>)>>,
    hooks: RwLock<Vec<Arc<dyn FindHook>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service and notify the contract's listeners.
    pub fn register(
        &self,
        owner: OwnerId,
        contract: &Contract,
        service: Arc<dyn ServiceTarget>,
        properties: Metadata,
    ) -> ServiceReference {
        let reference = ServiceReference {
            id: ServiceId::new(),
            contract: contract.name.clone(),
            contract_id: contract.fingerprint(),
            owner,
            proxy: service.is_proxy(),
            properties,
        };
        self.services
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Registration {
                reference: reference.clone(),
                service,
            });
        debug!(contract = %contract, service = %reference.id, proxy = reference.proxy, "service registered");

        for listener in self.listeners_for(&reference.contract) {
            listener.service_added(self, &reference);
        }
        reference
    }

    /// Remove a registration. Returns whether it existed.
    pub fn unregister(&self, reference: &ServiceReference) -> bool {
        let mut services = self.services.write().unwrap_or_else(|e| e.into_inner());
        let before = services.len();
        services.retain(|r| r.reference.id != reference.id);
        services.len() != before
    }

    /// All references of a contract, ignoring find hooks.
    pub fn references(&self, contract: &str) -> Vec<ServiceReference> {
        self.services
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.reference.contract == contract)
            .map(|r| r.reference.clone())
            .collect()
    }

    /// References of a contract as seen by callers, after find hooks.
    pub fn find(&self, contract: &str) -> Vec<ServiceReference> {
        let mut references = self.references(contract);
        let hooks: Vec<Arc<dyn FindHook>> = self
            .hooks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for hook in hooks {
            hook.find(contract, &mut references);
        }
        references
    }

    /// Resolve a reference to its service.
    pub fn get(&self, reference: &ServiceReference) -> Option<Arc<dyn ServiceTarget>> {
        self.services
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|r| r.reference.id == reference.id)
            .map(|r| r.service.clone())
    }

    /// First visible service of a contract.
    pub fn lookup(&self, contract: &str) -> Option<Arc<dyn ServiceTarget>> {
        self.find(contract).first().and_then(|r| self.get(r))
    }

    /// Watch a contract. The listener is told about existing services at once.
    pub fn add_listener(&self, contract: impl Into<String>, listener: Arc<dyn ServiceListener>) {
        let contract = contract.into();
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((contract.clone(), listener.clone()));
        for reference in self.references(&contract) {
            listener.service_added(self, &reference);
        }
    }

    pub fn add_find_hook(&self, hook: Arc<dyn FindHook>) {
        self.hooks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(hook);
    }

    pub fn len(&self) -> usize {
        self.services.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Snapshot so listeners may register services themselves.
    fn listeners_for(&self, contract: &str) -> Vec<Arc<dyn ServiceListener>> {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(c, _)| c == contract)
            .map(|(_, l)| l.clone())
            .collect()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.len())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════
// PROXY REGISTRAR
// ═══════════════════════════════════════════════════════════════════

/// Wraps every original service of one contract in an advice proxy.
pub struct ProxyRegistrar {
    owner: OwnerId,
    factory: JoinPointFactory,
    events: Option<Arc<EventManager>>,
    proxies: Mutex<Vec<ServiceReference>>,
}

impl ProxyRegistrar {
    pub fn new(owner: OwnerId, factory: JoinPointFactory) -> Self {
        Self {
            owner,
            factory,
            events: None,
            proxies: Mutex::new(Vec::new()),
        }
    }

    /// Share one event manager across all proxies of this registrar.
    pub fn with_events(mut self, events: Arc<EventManager>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn contract(&self) -> &Contract {
        self.factory.contract()
    }

    /// Proxies registered so far.
    pub fn proxies(&self) -> Vec<ServiceReference> {
        self.proxies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Publish a proxy for `reference` unless it already is one.
    ///
    /// The proxy is registered under the same contract with a copy of the
    /// original's properties.
    pub fn adding_service(
        &self,
        registry: &ServiceRegistry,
        reference: &ServiceReference,
    ) -> RegistrationResult<Option<ServiceReference>> {
        if reference.proxy {
            return Ok(None);
        }
        let contract = self.factory.contract();
        if reference.contract_id != contract.fingerprint() {
            warn!(contract = %contract, service = %reference.id, "service registered with a different method set, not wrapped");
            return Ok(None);
        }
        let service = registry
            .get(reference)
            .ok_or_else(|| RegistrationError::UnknownContract(reference.contract.clone()))?;
        if service.is_proxy() {
            return Ok(None);
        }

        let mut dispatcher = Dispatcher::new(service, self.factory.create()?);
        if let Some(events) = &self.events {
            dispatcher = dispatcher.with_events(events.clone());
        }
        let proxy = registry.register(
            self.owner,
            contract,
            Arc::new(dispatcher),
            reference.properties.clone(),
        );
        debug!(contract = %contract, original = %reference.id, proxy = %proxy.id, "proxy published");
        self.proxies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(proxy.clone());
        Ok(Some(proxy))
    }
}

impl ServiceListener for ProxyRegistrar {
    fn service_added(&self, registry: &ServiceRegistry, reference: &ServiceReference) {
        if let Err(e) = self.adding_service(registry, reference) {
            error!(contract = %reference.contract, service = %reference.id, error = %e, "could not publish proxy");
        }
    }
}

impl std::fmt::Debug for ProxyRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyRegistrar")
            .field("owner", &self.owner)
            .field("contract", &self.contract().name)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════
// PROXY PROVIDER
// ═══════════════════════════════════════════════════════════════════

#[derive(Default)]
struct ProviderState {
    registry: Option<Arc<ServiceRegistry>>,
    registrars: HashMap<String, Arc<ProxyRegistrar>>,
    pending: Vec<JoinPointFactory>,
}

impl ProviderState {
    fn is_defined(&self, contract: &str) -> bool {
        self.registrars.contains_key(contract)
            || self.pending.iter().any(|f| f.contract().name == contract)
    }
}

/// Owns proxy definitions and hides originals once a proxy exists.
pub struct ProxyProvider {
    owner: OwnerId,
    events: Option<Arc<EventManager>>,
    state: Mutex<ProviderState>,
}

impl ProxyProvider {
    pub fn new() -> Self {
        Self {
            owner: OwnerId::new(),
            events: None,
            state: Mutex::new(ProviderState::default()),
        }
    }

    /// Report dispatch events of every proxy to one manager.
    pub fn with_events(mut self, events: Arc<EventManager>) -> Self {
        self.events = Some(events);
        self
    }

    /// Owner id of every proxy this provider publishes.
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn is_active(&self) -> bool {
        self.lock().registry.is_some()
    }

    /// Whether a definition exists for a contract name.
    pub fn is_defined(&self, contract: &str) -> bool {
        self.lock().is_defined(contract)
    }

    /// Add a definition. Its advice is resolved immediately, so a broken
    /// definition fails here rather than when the first service appears.
    pub fn add_definition(&self, definition: Arc<dyn JoinPointDefinition>) -> RegistrationResult<()> {
        let factory = JoinPointFactory::new(definition);
        factory.create()?;
        let name = factory.contract().name.clone();

        // Check and reserve under one guard; listeners are attached after release.
        let (registry, registrar) = {
            let mut state = self.lock();
            if state.is_defined(&name) {
                return Err(RegistrationError::AlreadyDefined(name));
            }
            match state.registry.clone() {
                Some(registry) => {
                    let registrar = self.registrar_for(factory);
                    state.registrars.insert(name.clone(), registrar.clone());
                    (registry, registrar)
                }
                None => {
                    debug!(contract = %name, "definition buffered until activation");
                    state.pending.push(factory);
                    return Ok(());
                }
            }
        };
        Self::open(&registry, name, registrar);
        Ok(())
    }

    /// Attach to a registry, install the find hook and open buffered definitions.
    pub fn activate(self: &Arc<Self>, registry: Arc<ServiceRegistry>) {
        let opened: Vec<(String, Arc<ProxyRegistrar>)> = {
            let mut state = self.lock();
            state.registry = Some(registry.clone());
            let pending = std::mem::take(&mut state.pending);
            pending
                .into_iter()
                .map(|factory| {
                    let name = factory.contract().name.clone();
                    let registrar = self.registrar_for(factory);
                    state.registrars.insert(name.clone(), registrar.clone());
                    (name, registrar)
                })
                .collect()
        };
        registry.add_find_hook(self.clone());
        for (name, registrar) in opened {
            Self::open(&registry, name, registrar);
        }
    }

    /// Registrar of a contract, once opened.
    pub fn registrar(&self, contract: &str) -> Option<Arc<ProxyRegistrar>> {
        self.lock().registrars.get(contract).cloned()
    }

    fn registrar_for(&self, factory: JoinPointFactory) -> Arc<ProxyRegistrar> {
        let mut registrar = ProxyRegistrar::new(self.owner, factory);
        if let Some(events) = &self.events {
            registrar = registrar.with_events(events.clone());
        }
        Arc::new(registrar)
    }

    fn open(registry: &ServiceRegistry, name: String, registrar: Arc<ProxyRegistrar>) {
        debug!(contract = %name, "proxy registrar opened");
        registry.add_listener(name, registrar);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ProxyProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FindHook for ProxyProvider {
    fn find(&self, contract: &str, references: &mut Vec<ServiceReference>) {
        if self.lock().registrars.contains_key(contract) {
            references.retain(|r| r.owner == self.owner);
        }
    }
}

impl std::fmt::Debug for ProxyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyProvider")
            .field("owner", &self.owner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::AdviceObject;
    use crate::errors::Outcome;
    use crate::join_point::JoinPoint;
    use crate::types::{MethodSignature, ParamType};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn runnable() -> Contract {
        Contract::new("Runnable").method("run", &[])
    }

    fn run() -> MethodSignature {
        MethodSignature::nullary("run")
    }

    struct Counting(Arc<AtomicUsize>);

    impl ServiceTarget for Counting {
        fn invoke(&self, _method: &MethodSignature, _args: &[Value]) -> Outcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(json!("ran"))
        }
    }

    struct BeforeRun(Arc<AtomicUsize>);

    impl JoinPointDefinition for BeforeRun {
        fn contract(&self) -> Contract {
            runnable()
        }

        fn configure(&self, join_point: &mut JoinPoint) -> RegistrationResult<()> {
            let counter = self.0.clone();
            let advice = AdviceObject::new("count").observer("beforeRun", &[], move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            join_point.schedule_before(Arc::new(advice)).on("run")
        }
    }

    fn properties() -> Metadata {
        let mut properties = Metadata::new();
        properties.insert("name".into(), json!("value"));
        properties
    }

    #[test]
    fn test_adding_service_registers_delegating_proxy() {
        let registry = ServiceRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let advised = Arc::new(AtomicUsize::new(0));
        let original = registry.register(
            OwnerId::new(),
            &runnable(),
            Arc::new(Counting(calls.clone())),
            properties(),
        );

        let provider_owner = OwnerId::new();
        let registrar = ProxyRegistrar::new(
            provider_owner,
            JoinPointFactory::new(Arc::new(BeforeRun(advised.clone()))),
        );
        let proxy = registrar
            .adding_service(&registry, &original)
            .unwrap()
            .unwrap();

        assert_ne!(proxy.id, original.id);
        assert!(proxy.proxy);
        assert_eq!(proxy.owner, provider_owner);
        assert_eq!(proxy.properties, properties());

        let service = registry.get(&proxy).unwrap();
        assert_eq!(service.invoke(&run(), &[]).unwrap(), json!("ran"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(advised.load(Ordering::SeqCst), 1);
        assert_eq!(registrar.proxies().len(), 1);
    }

    #[test]
    fn test_ignore_adding_service_with_proxy_reference() {
        let registry = ServiceRegistry::new();
        let factory = JoinPointFactory::new(Arc::new(BeforeRun(Arc::new(AtomicUsize::new(0)))));
        let proxy = Dispatcher::new(
            Arc::new(Counting(Arc::new(AtomicUsize::new(0)))),
            factory.create().unwrap(),
        );
        let reference = registry.register(OwnerId::new(), &runnable(), Arc::new(proxy), Metadata::new());

        let registrar = ProxyRegistrar::new(OwnerId::new(), factory);
        assert!(registrar.adding_service(&registry, &reference).unwrap().is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_mismatched_contract_not_wrapped() {
        let registry = ServiceRegistry::new();
        let other_shape = Contract::new("Runnable").method("run", &[ParamType::Any]);
        let reference = registry.register(
            OwnerId::new(),
            &other_shape,
            Arc::new(Counting(Arc::new(AtomicUsize::new(0)))),
            Metadata::new(),
        );
        let registrar = ProxyRegistrar::new(
            OwnerId::new(),
            JoinPointFactory::new(Arc::new(BeforeRun(Arc::new(AtomicUsize::new(0))))),
        );
        assert!(registrar.adding_service(&registry, &reference).unwrap().is_none());
    }

    #[test]
    fn test_find_hides_originals_of_defined_contracts() {
        let registry = Arc::new(ServiceRegistry::new());
        let provider = Arc::new(ProxyProvider::new());
        provider.activate(registry.clone());
        provider
            .add_definition(Arc::new(BeforeRun(Arc::new(AtomicUsize::new(0)))))
            .unwrap();

        registry.register(
            OwnerId::new(),
            &runnable(),
            Arc::new(Counting(Arc::new(AtomicUsize::new(0)))),
            Metadata::new(),
        );

        assert_eq!(registry.references("Runnable").len(), 2);
        let visible = registry.find("Runnable");
        assert_eq!(visible.len(), 1);
        assert!(visible[0].proxy);
        assert_eq!(visible[0].owner, provider.owner());
    }

    #[test]
    fn test_find_with_non_matching_contract() {
        let registry = Arc::new(ServiceRegistry::new());
        let provider = Arc::new(ProxyProvider::new());
        provider.activate(registry.clone());
        provider
            .add_definition(Arc::new(BeforeRun(Arc::new(AtomicUsize::new(0)))))
            .unwrap();

        let other = Contract::new("Other").method("run", &[]);
        registry.register(
            OwnerId::new(),
            &other,
            Arc::new(Counting(Arc::new(AtomicUsize::new(0)))),
            Metadata::new(),
        );
        assert_eq!(registry.find("Other").len(), 1);
    }

    #[test]
    fn test_definitions_buffered_until_activation() {
        let registry = Arc::new(ServiceRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register(
            OwnerId::new(),
            &runnable(),
            Arc::new(Counting(calls.clone())),
            Metadata::new(),
        );

        let provider = Arc::new(ProxyProvider::new());
        provider
            .add_definition(Arc::new(BeforeRun(Arc::new(AtomicUsize::new(0)))))
            .unwrap();
        assert!(!provider.is_active());
        assert!(provider.is_defined("Runnable"));
        assert!(provider.registrar("Runnable").is_none());

        provider.activate(registry.clone());

        assert!(provider.registrar("Runnable").is_some());
        let service = registry.lookup("Runnable").unwrap();
        assert!(service.is_proxy());
        service.invoke(&run(), &[]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_definitions_open_one_registrar() {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register(
            OwnerId::new(),
            &runnable(),
            Arc::new(Counting(Arc::new(AtomicUsize::new(0)))),
            Metadata::new(),
        );
        let provider = Arc::new(ProxyProvider::new());
        provider.activate(registry.clone());

        let accepted = AtomicUsize::new(0);
        let barrier = std::sync::Barrier::new(8);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    barrier.wait();
                    match provider.add_definition(Arc::new(BeforeRun(Arc::new(AtomicUsize::new(0))))) {
                        Ok(()) => {
                            accepted.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(err) => {
                            assert_eq!(err, RegistrationError::AlreadyDefined("Runnable".into()))
                        }
                    }
                });
            }
        });

        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(registry.references("Runnable").len(), 2);
        assert_eq!(provider.registrar("Runnable").unwrap().proxies().len(), 1);
    }

    #[test]
    fn test_duplicate_definition_rejected() {
        let provider = ProxyProvider::new();
        provider
            .add_definition(Arc::new(BeforeRun(Arc::new(AtomicUsize::new(0)))))
            .unwrap();
        let err = provider
            .add_definition(Arc::new(BeforeRun(Arc::new(AtomicUsize::new(0)))))
            .unwrap_err();
        assert_eq!(err, RegistrationError::AlreadyDefined("Runnable".into()));
    }

    #[test]
    fn test_broken_definition_fails_fast() {
        struct MissingCallback;
        impl JoinPointDefinition for MissingCallback {
            fn contract(&self) -> Contract {
                runnable()
            }
            fn configure(&self, join_point: &mut JoinPoint) -> RegistrationResult<()> {
                join_point
                    .schedule_after(Arc::new(AdviceObject::new("empty")))
                    .on("run")
            }
        }

        let provider = ProxyProvider::new();
        let err = provider.add_definition(Arc::new(MissingCallback)).unwrap_err();
        assert!(matches!(err, RegistrationError::Resolution { .. }));
        assert!(!provider.is_defined("Runnable"));
    }

    #[test]
    fn test_unregister() {
        let registry = ServiceRegistry::new();
        let reference = registry.register(
            OwnerId::new(),
            &runnable(),
            Arc::new(Counting(Arc::new(AtomicUsize::new(0)))),
            Metadata::new(),
        );
        assert!(registry.unregister(&reference));
        assert!(!registry.unregister(&reference));
        assert!(registry.is_empty());
        assert!(registry.get(&reference).is_none());
    }
}
