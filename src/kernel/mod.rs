//! The kernel - memory, processes, services, and the filesystem
//!
//! Boot order is fixed:
//! 1. memory arena
//! 2. service registry and process manager
//! 3. filesystem, reconstructed from storage or created fresh
//! 4. built-in services registered, then everything frozen
//! 5. bootstrap process created and started with the full service set
//!
//! There is no global state. The kernel owns every component and hands
//! shared handles to the services that wrap them.

pub mod app;
pub mod executor;
pub mod memory;
pub mod process;
pub mod service;
pub mod services;

pub use app::{AppCatalog, AppError, AppRecord, Application, Executable, ExitCode, InvalidAppRecord};
pub use executor::Executor;
pub use memory::{ArenaHandle, MemoryArena, PageOffset, ProcessMemory, Slot};
pub use process::{
    Pid, ProcessContext, ProcessEntry, ProcessError, ProcessInfo, ProcessManager, ProcessResult,
    ProcessStatus, StartOutcome,
};
pub use service::{
    Caller, Capability, FrozenServiceError, Reply, Request, Service, ServiceError, ServiceRegistry,
    ServiceResult, Services,
};

use crate::platform::IoDevice;
use crate::vfs::{FsDirectory, FsError, FsId, Filesystem, MemoryStorage, Storage};
use log::{debug, info};
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;
use std::time::Instant;

const TARGET: &str = "aurora::kernel";

/// Default kernel name
pub const DEFAULT_NAME: &str = "Aurora";

/// Default filesystem id
pub const DEFAULT_FS_ID: &str = "main";

/// Catalog id of the default bootstrap program
pub const DEFAULT_BOOTSTRAP: &str = "aurora.shell";

/// Boot configuration
///
/// Builder-style: start from `KernelConfig::default()` and override what
/// you need.
pub struct KernelConfig {
    name: String,
    version: String,
    fs_id: FsId,
    storage: Rc<dyn Storage>,
    bootstrap: Option<String>,
    catalog: AppCatalog,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            fs_id: FsId::new(DEFAULT_FS_ID),
            storage: Rc::new(MemoryStorage::new()),
            bootstrap: Some(DEFAULT_BOOTSTRAP.to_string()),
            catalog: crate::shell::catalog(),
        }
    }
}

impl KernelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Id of the filesystem to mount (and its storage key)
    pub fn fs_id(mut self, id: impl Into<String>) -> Self {
        self.fs_id = FsId::new(id);
        self
    }

    pub fn storage(mut self, storage: Rc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    /// Catalog id of the program started at boot
    pub fn bootstrap(mut self, id: impl Into<String>) -> Self {
        self.bootstrap = Some(id.into());
        self
    }

    /// Boot without starting any process
    pub fn no_bootstrap(mut self) -> Self {
        self.bootstrap = None;
        self
    }

    /// Replace the executable catalog
    pub fn catalog(mut self, catalog: AppCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Add one executable to the catalog
    pub fn register_app(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        exec: Executable,
    ) -> Self {
        self.catalog.register(id, name, version, exec);
        self
    }
}

/// Result type for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

/// Kernel errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// The filesystem could not be loaded or created
    Fs(FsError),
    /// A process could not be started
    Process(ProcessError),
    /// No catalog entry with this id
    UnknownApplication(String),
}

impl std::fmt::Display for KernelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelError::Fs(e) => write!(f, "filesystem error: {}", e),
            KernelError::Process(e) => write!(f, "process error: {}", e),
            KernelError::UnknownApplication(id) => write!(f, "unknown application: {}", id),
        }
    }
}

impl std::error::Error for KernelError {}

impl From<FsError> for KernelError {
    fn from(e: FsError) -> Self {
        KernelError::Fs(e)
    }
}

impl From<ProcessError> for KernelError {
    fn from(e: ProcessError) -> Self {
        KernelError::Process(e)
    }
}

/// A booted kernel
pub struct Kernel {
    name: String,
    version: String,
    io: Rc<dyn IoDevice>,
    arena: ArenaHandle,
    processes: Rc<ProcessManager>,
    filesystems: Rc<RefCell<FsDirectory>>,
    fs_id: FsId,
    catalog: Rc<AppCatalog>,
    services: Services,
    bootstrap: Option<Pid>,
}

impl Kernel {
    /// Bring the system up and start the bootstrap program
    pub fn boot(config: KernelConfig, io: Rc<dyn IoDevice>) -> KernelResult<Self> {
        let booted_at = Instant::now();
        info!(target: TARGET, "booting {} v{}", config.name, config.version);
        io.write(&format!("{} v{}\n", config.name, config.version));

        let arena: ArenaHandle = Rc::new(RefCell::new(MemoryArena::new()));
        let mut registry = ServiceRegistry::new();
        let processes = Rc::new(ProcessManager::new(arena.clone()));

        let fs = Filesystem::open(config.fs_id.clone(), config.storage)?;
        io.write(&format!(
            "mounted {} ({} nodes)\n",
            fs.id(),
            fs.node_count()
        ));
        let mut directory = FsDirectory::new();
        directory.mount(fs);
        let filesystems = Rc::new(RefCell::new(directory));

        let catalog = Rc::new(config.catalog);
        let deps = services::ServiceDeps {
            processes: processes.clone(),
            filesystems: filesystems.clone(),
            fs_id: config.fs_id.clone(),
            catalog: catalog.clone(),
            kernel_name: config.name.clone(),
            kernel_version: config.version.clone(),
            booted_at,
        };
        for service in services::builtin_services(&deps) {
            registry.register(service);
        }
        let services = registry.into_services();
        debug!(target: TARGET, "services frozen: {}", services.names().join(", "));

        let mut kernel = Self {
            name: config.name,
            version: config.version,
            io,
            arena,
            processes,
            filesystems,
            fs_id: config.fs_id,
            catalog,
            services,
            bootstrap: None,
        };

        if let Some(id) = config.bootstrap {
            let (pid, _) = kernel.spawn(&id, Vec::new())?;
            kernel.bootstrap = Some(pid);
        }

        info!(target: TARGET, "boot complete");
        Ok(kernel)
    }

    /// Create and start a process for a catalog entry
    pub fn spawn(&self, id: &str, args: Vec<String>) -> KernelResult<(Pid, StartOutcome)> {
        let app = self
            .catalog
            .application(id)
            .ok_or_else(|| KernelError::UnknownApplication(id.to_string()))?;
        self.spawn_application(Rc::new(app), args)
    }

    /// Create and start a process for an application
    pub fn spawn_application(
        &self,
        app: Rc<Application>,
        args: Vec<String>,
    ) -> KernelResult<(Pid, StartOutcome)> {
        let pid = self.processes.create_process(app);
        let outcome = self
            .processes
            .start_process(pid, args, self.io.clone(), &self.services)?;
        Ok((pid, outcome))
    }

    /// Resume processes whose input has arrived. Returns the polls made.
    pub fn run_until_stalled(&self) -> usize {
        self.processes.run_until_stalled()
    }

    /// True while some started process has not terminated
    pub fn has_running_processes(&self) -> bool {
        !self.processes.running_processes().is_empty()
    }

    /// Dispose the I/O device and let waiting processes see end of input
    pub fn shutdown(&self) {
        info!(target: TARGET, "shutting down");
        self.io.dispose();
        self.run_until_stalled();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn io(&self) -> &Rc<dyn IoDevice> {
        &self.io
    }

    pub fn arena(&self) -> &ArenaHandle {
        &self.arena
    }

    pub fn processes(&self) -> &ProcessManager {
        &self.processes
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn catalog(&self) -> &AppCatalog {
        &self.catalog
    }

    pub fn fs_id(&self) -> &FsId {
        &self.fs_id
    }

    /// Pid of the bootstrap process, if one was started
    pub fn bootstrap_pid(&self) -> Option<Pid> {
        self.bootstrap
    }

    /// The table of mounted filesystems
    pub fn filesystems(&self) -> Ref<'_, FsDirectory> {
        self.filesystems.borrow()
    }

    /// The kernel's main filesystem
    pub fn filesystem(&self) -> Option<Ref<'_, Filesystem>> {
        Ref::filter_map(self.filesystems.borrow(), |dirs| dirs.get(&self.fs_id)).ok()
    }

    pub fn filesystem_mut(&self) -> Option<RefMut<'_, Filesystem>> {
        RefMut::filter_map(self.filesystems.borrow_mut(), |dirs| dirs.get_mut(&self.fs_id)).ok()
    }

    /// Mount another filesystem next to the main one
    pub fn mount(&self, fs: Filesystem) -> Option<Filesystem> {
        info!(target: TARGET, "mounting {}", fs.id());
        self.filesystems.borrow_mut().mount(fs)
    }

    pub fn read_process_memory(&self, pid: Pid, index: usize) -> ProcessResult<Option<Slot>> {
        self.processes.read_process_memory(pid, index)
    }

    pub fn write_process_memory(&self, pid: Pid, index: usize, value: Slot) -> ProcessResult<bool> {
        self.processes.write_process_memory(pid, index, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::BufferedIo;

    fn quiet() -> KernelConfig {
        KernelConfig::default().no_bootstrap()
    }

    #[test]
    fn test_boot_without_bootstrap() {
        let io = Rc::new(BufferedIo::new());
        let kernel = Kernel::boot(quiet().name("Test").version("9.9"), io.clone()).unwrap();

        assert_eq!(kernel.bootstrap_pid(), None);
        assert!(!kernel.has_running_processes());
        assert_eq!(kernel.fs_id(), &FsId::new("main"));
        assert!(io.take_output().starts_with("Test v9.9\n"));
        assert!(kernel.services().registry().iter().all(Service::is_frozen));
    }

    #[test]
    fn test_boot_starts_shell() {
        let io = Rc::new(BufferedIo::new());
        let kernel = Kernel::boot(KernelConfig::default(), io.clone()).unwrap();

        let pid = kernel.bootstrap_pid().unwrap();
        let info = kernel.processes().process(pid).unwrap();
        assert_eq!(info.status, ProcessStatus::Active);
        assert_eq!(info.name, "shell");
        assert!(io.is_waiting());
    }

    #[test]
    fn test_unknown_bootstrap() {
        let io = Rc::new(BufferedIo::new());
        let err = Kernel::boot(KernelConfig::default().bootstrap("missing"), io).err();
        assert_eq!(err, Some(KernelError::UnknownApplication("missing".into())));
    }

    #[test]
    fn test_boot_reuses_stored_filesystem() {
        let storage = MemoryStorage::new();
        {
            let kernel = Kernel::boot(
                quiet().storage(Rc::new(storage.clone())),
                Rc::new(BufferedIo::new()),
            )
            .unwrap();
            let mut fs = kernel.filesystem_mut().unwrap();
            let root = fs.root();
            fs.mkdir(root, "kept").unwrap();
        }

        let kernel = Kernel::boot(quiet().storage(Rc::new(storage)), Rc::new(BufferedIo::new()))
            .unwrap();
        assert!(kernel.filesystem().unwrap().get_item_by_path("root/kept").is_some());
    }

    #[test]
    fn test_spawn_catalog_application() {
        let kernel = Kernel::boot(
            quiet().register_app("t.seven", "seven", "1", app::executable(|_| async { 7 })),
            Rc::new(BufferedIo::new()),
        )
        .unwrap();

        let (pid, outcome) = kernel.spawn("t.seven", vec![]).unwrap();
        assert_eq!(outcome, StartOutcome::Exited(7));
        assert_eq!(kernel.processes().process(pid).unwrap().status, ProcessStatus::Terminated);
        assert!(matches!(
            kernel.spawn("t.none", vec![]),
            Err(KernelError::UnknownApplication(_))
        ));
    }

    #[test]
    fn test_kernel_memory_access() {
        let kernel = Kernel::boot(quiet(), Rc::new(BufferedIo::new())).unwrap();
        let app = Rc::new(Application::new("idle", "1"));
        let pid = kernel.processes().create_process(app);
        assert!(kernel.write_process_memory(pid, 1, serde_json::json!(2)).unwrap());
        assert_eq!(
            kernel.read_process_memory(pid, 1).unwrap(),
            Some(serde_json::json!(2))
        );
    }
}
