//! Services and the service registry
//!
//! A service is a named, versioned table of capabilities. Each capability is
//! a function from a typed request to a typed reply, called on behalf of a
//! process. Every process is handed the same `Services`: the registry after
//! boot, frozen and shared.
//!
//! Freezing seals a capability table. After that, inserting or removing a
//! capability fails with `FrozenServiceError` and the table is untouched.

use super::app::{Application, InvalidAppRecord};
use super::memory::Slot;
use super::process::{Pid, ProcessEntry, ProcessError, ProcessInfo, StartOutcome};
use crate::platform::IoDevice;
use crate::vfs::{DirEntry, FsError, FsId, NodeKind, NodeRef};
use log::{debug, trace};
use std::collections::BTreeMap;
use std::rc::Rc;

const TARGET: &str = "aurora::service";

/// The process a capability runs on behalf of
#[derive(Clone)]
pub struct Caller {
    pub pid: Pid,
    pub io: Rc<dyn IoDevice>,
    /// Handed on to processes this caller starts
    pub services: Services,
}

/// A single service operation
pub type Capability = Rc<dyn Fn(&Caller, Request) -> ServiceResult<Reply>>;

/// Service request payloads
#[derive(Debug, Clone)]
pub enum Request {
    None,
    Index(usize),
    Store { index: usize, value: Slot },
    Text(String),
    Pid(Pid),
    Spawn(Rc<Application>),
    Start { pid: Pid, args: Vec<String> },
    Path(String),
    Node(NodeRef),
    Write { node: NodeRef, text: String },
    Create { parent: NodeRef, name: String, extension: String },
    SaveApp { dir: NodeRef, app: Rc<Application>, args: Vec<String> },
}

/// Service reply payloads
#[derive(Debug, Clone)]
pub enum Reply {
    Unit,
    Bool(bool),
    Slot(Option<Slot>),
    Pid(Pid),
    Started(StartOutcome),
    Process(Option<ProcessInfo>),
    Processes(Vec<ProcessEntry>),
    Node(Option<NodeRef>),
    Path(Option<String>),
    FsId(FsId),
    Entries(Vec<DirEntry>),
    Text(String),
    Kind(Option<NodeKind>),
    App { app: Rc<Application>, args: Vec<String> },
    Millis(u64),
    Identity { name: String, version: String },
}

/// Result type for service calls
pub type ServiceResult<T> = Result<T, ServiceError>;

/// A capability table was changed after it was frozen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrozenServiceError {
    pub service: String,
    pub capability: String,
}

impl std::fmt::Display for FrozenServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "service {} is frozen; cannot change capability {}",
            self.service, self.capability
        )
    }
}

impl std::error::Error for FrozenServiceError {}

/// Service call errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    UnknownService(String),
    UnknownCapability { service: String, capability: String },
    /// The request variant does not fit the capability
    BadRequest { service: String, capability: String },
    /// The reply variant was not the one the caller expected
    UnexpectedReply { service: String, capability: String },
    /// A node handle names a filesystem that is not mounted
    UnknownFilesystem(FsId),
    Frozen(FrozenServiceError),
    Process(ProcessError),
    Fs(FsError),
    App(InvalidAppRecord),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::UnknownService(name) => write!(f, "unknown service: {}", name),
            ServiceError::UnknownCapability {
                service,
                capability,
            } => write!(f, "service {} has no capability {}", service, capability),
            ServiceError::BadRequest {
                service,
                capability,
            } => write!(f, "bad request for {}.{}", service, capability),
            ServiceError::UnexpectedReply {
                service,
                capability,
            } => write!(f, "unexpected reply from {}.{}", service, capability),
            ServiceError::UnknownFilesystem(id) => write!(f, "filesystem {} is not mounted", id),
            ServiceError::Frozen(e) => write!(f, "{}", e),
            ServiceError::Process(e) => write!(f, "{}", e),
            ServiceError::Fs(e) => write!(f, "{}", e),
            ServiceError::App(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<FrozenServiceError> for ServiceError {
    fn from(e: FrozenServiceError) -> Self {
        ServiceError::Frozen(e)
    }
}

impl From<ProcessError> for ServiceError {
    fn from(e: ProcessError) -> Self {
        ServiceError::Process(e)
    }
}

impl From<FsError> for ServiceError {
    fn from(e: FsError) -> Self {
        ServiceError::Fs(e)
    }
}

impl From<InvalidAppRecord> for ServiceError {
    fn from(e: InvalidAppRecord) -> Self {
        ServiceError::App(e)
    }
}

/// A named, versioned capability table
///
/// Clones share capabilities and keep the frozen flag.
#[derive(Clone)]
pub struct Service {
    name: String,
    version: String,
    capabilities: BTreeMap<String, Capability>,
    frozen: bool,
}

impl Service {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            capabilities: BTreeMap::new(),
            frozen: false,
        }
    }

    /// Start building a service
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder {
            service: Service::new(name, version),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Seal the capability table
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    fn frozen_error(&self, capability: &str) -> FrozenServiceError {
        FrozenServiceError {
            service: self.name.clone(),
            capability: capability.to_string(),
        }
    }

    /// Add or replace a capability, returning the one it replaced
    pub fn insert_capability(
        &mut self,
        name: impl Into<String>,
        capability: Capability,
    ) -> Result<Option<Capability>, FrozenServiceError> {
        let name = name.into();
        if self.frozen {
            return Err(self.frozen_error(&name));
        }
        Ok(self.capabilities.insert(name, capability))
    }

    /// Remove a capability, returning it if it existed
    pub fn remove_capability(&mut self, name: &str) -> Result<Option<Capability>, FrozenServiceError> {
        if self.frozen {
            return Err(self.frozen_error(name));
        }
        Ok(self.capabilities.remove(name))
    }

    pub fn capability(&self, name: &str) -> Option<&Capability> {
        self.capabilities.get(name)
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Capability names, sorted
    pub fn capability_names(&self) -> Vec<&str> {
        self.capabilities.keys().map(String::as_str).collect()
    }

    /// Invoke one capability
    pub fn call(&self, capability: &str, caller: &Caller, request: Request) -> ServiceResult<Reply> {
        let cap = self
            .capabilities
            .get(capability)
            .ok_or_else(|| ServiceError::UnknownCapability {
                service: self.name.clone(),
                capability: capability.to_string(),
            })?;
        trace!(target: TARGET, "{} -> {}.{}", caller.pid, self.name, capability);
        cap(caller, request)
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("capabilities", &self.capability_names())
            .field("frozen", &self.frozen)
            .finish()
    }
}

/// Builder for an unfrozen service
pub struct ServiceBuilder {
    service: Service,
}

impl ServiceBuilder {
    /// Add a capability
    pub fn capability<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Caller, Request) -> ServiceResult<Reply> + 'static,
    {
        self.service.capabilities.insert(name.into(), Rc::new(f));
        self
    }

    pub fn build(self) -> Service {
        self.service
    }
}

/// All services, by name, in registration order
#[derive(Default, Debug)]
pub struct ServiceRegistry {
    services: Vec<Service>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service. A service with the same name is replaced in
    /// place and returned.
    pub fn register(&mut self, service: Service) -> Option<Service> {
        debug!(
            target: TARGET,
            "registering {} v{}",
            service.name(),
            service.version()
        );
        match self.services.iter_mut().find(|s| s.name == service.name) {
            Some(existing) => Some(std::mem::replace(existing, service)),
            None => {
                self.services.push(service);
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Service> {
        self.services.iter_mut().find(|s| s.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Service> {
        self.services.iter()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Freeze every registered service
    pub fn freeze_all(&mut self) {
        for service in &mut self.services {
            service.freeze();
        }
    }

    /// Freeze everything and share it
    pub fn into_services(mut self) -> Services {
        self.freeze_all();
        Services(Rc::new(self))
    }
}

/// The frozen service set handed to every process
#[derive(Clone, Debug)]
pub struct Services(Rc<ServiceRegistry>);

impl Services {
    /// Call `service.capability` on behalf of `caller`
    pub fn call(
        &self,
        service: &str,
        capability: &str,
        caller: &Caller,
        request: Request,
    ) -> ServiceResult<Reply> {
        self.0
            .get(service)
            .ok_or_else(|| ServiceError::UnknownService(service.to_string()))?
            .call(capability, caller, request)
    }

    pub fn get(&self, name: &str) -> Option<&Service> {
        self.0.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.names()
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.0
    }
}

impl ServiceError {
    pub(crate) fn bad_request(service: &str, capability: &str) -> Self {
        ServiceError::BadRequest {
            service: service.to_string(),
            capability: capability.to_string(),
        }
    }

    pub(crate) fn unexpected_reply(service: &str, capability: &str) -> Self {
        ServiceError::UnexpectedReply {
            service: service.to_string(),
            capability: capability.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::BufferedIo;

    fn caller() -> Caller {
        Caller {
            pid: Pid(0),
            io: Rc::new(BufferedIo::new()),
            services: ServiceRegistry::new().into_services(),
        }
    }

    fn echo_service(version: &str) -> Service {
        Service::builder("echo", version)
            .capability("say", |_caller, request| match request {
                Request::Text(text) => Ok(Reply::Text(text)),
                _ => Err(ServiceError::bad_request("echo", "say")),
            })
            .build()
    }

    #[test]
    fn test_register_overwrites_in_place() {
        let mut registry = ServiceRegistry::new();
        registry.register(echo_service("1"));
        registry.register(Service::new("other", "1"));
        let old = registry.register(echo_service("2"));

        assert_eq!(old.unwrap().version(), "1");
        assert_eq!(registry.names(), vec!["echo", "other"]);
        assert_eq!(registry.get("echo").unwrap().version(), "2");
    }

    #[test]
    fn test_call_dispatches_by_name() {
        let mut registry = ServiceRegistry::new();
        registry.register(echo_service("1"));
        let services = registry.into_services();

        let reply = services
            .call("echo", "say", &caller(), Request::Text("hi".into()))
            .unwrap();
        assert!(matches!(reply, Reply::Text(t) if t == "hi"));

        assert_eq!(
            services.call("nope", "say", &caller(), Request::None).err(),
            Some(ServiceError::UnknownService("nope".into()))
        );
        assert!(matches!(
            services.call("echo", "shout", &caller(), Request::None),
            Err(ServiceError::UnknownCapability { .. })
        ));
        assert!(matches!(
            services.call("echo", "say", &caller(), Request::None),
            Err(ServiceError::BadRequest { .. })
        ));
    }

    #[test]
    fn test_frozen_table_rejects_changes() {
        let mut service = echo_service("1");
        service.freeze();

        let noop: Capability = Rc::new(|_: &Caller, _: Request| Ok(Reply::Unit));
        assert_eq!(
            service.insert_capability("extra", noop).err(),
            Some(FrozenServiceError {
                service: "echo".into(),
                capability: "extra".into()
            })
        );
        assert!(service.remove_capability("say").is_err());
        assert_eq!(service.capability_names(), vec!["say"]);
    }

    #[test]
    fn test_unfrozen_table_accepts_changes() {
        let mut service = Service::new("svc", "1");
        let noop: Capability = Rc::new(|_: &Caller, _: Request| Ok(Reply::Unit));
        assert!(service.insert_capability("a", noop).unwrap().is_none());
        assert!(service.remove_capability("a").unwrap().is_some());
        assert!(service.remove_capability("a").unwrap().is_none());
    }

    #[test]
    fn test_into_services_freezes_everything() {
        let mut registry = ServiceRegistry::new();
        registry.register(echo_service("1"));
        registry.register(Service::new("b", "1"));
        let services = registry.into_services();
        assert!(services.registry().iter().all(Service::is_frozen));
    }
}
