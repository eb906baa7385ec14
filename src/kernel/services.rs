//! Built-in services
//!
//! Each service is a thin wrapper over a kernel component. Capabilities take
//! a typed `Request` and answer with a typed `Reply`; filesystem nodes travel
//! as `NodeRef` handles and are resolved through the kernel's `FsDirectory`
//! on every call.
//!
//! The `impl ProcessContext` block at the bottom is the client side: typed
//! helpers that executables use instead of building requests by hand.

use super::app::{self, AppCatalog, Application, InvalidAppRecord};
use super::memory::Slot;
use super::process::{Pid, ProcessContext, ProcessEntry, ProcessInfo, ProcessManager, StartOutcome};
use super::service::{Caller, Reply, Request, Service, ServiceError, ServiceResult};
use crate::vfs::{DirEntry, FsDirectory, FsError, FsId, Filesystem, NodeId, NodeKind, NodeRef};
use log::info;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub const MEMORY: &str = "memory";
pub const LOG: &str = "log";
pub const PROCESS: &str = "process";
pub const FS: &str = "fs";
pub const CLOCK: &str = "clock";
pub const KERNEL: &str = "kernel";

const SERVICE_VERSION: &str = "1.0.0";

/// Kernel components the built-in services wrap
#[derive(Clone)]
pub struct ServiceDeps {
    pub processes: Rc<ProcessManager>,
    pub filesystems: Rc<RefCell<FsDirectory>>,
    /// Filesystem that path lookups resolve against
    pub fs_id: FsId,
    pub catalog: Rc<AppCatalog>,
    pub kernel_name: String,
    pub kernel_version: String,
    pub booted_at: Instant,
}

/// Every built-in service, ready to register
pub fn builtin_services(deps: &ServiceDeps) -> Vec<Service> {
    vec![
        memory_service(deps),
        log_service(),
        process_service(deps),
        fs_service(deps),
        clock_service(deps),
        kernel_service(deps),
    ]
}

fn memory_service(deps: &ServiceDeps) -> Service {
    let read = deps.processes.clone();
    let write = deps.processes.clone();
    Service::builder(MEMORY, SERVICE_VERSION)
        .capability("read", move |caller, request| match request {
            Request::Index(index) => Ok(Reply::Slot(read.read_process_memory(caller.pid, index)?)),
            _ => Err(ServiceError::bad_request(MEMORY, "read")),
        })
        .capability("write", move |caller, request| match request {
            Request::Store { index, value } => Ok(Reply::Bool(
                write.write_process_memory(caller.pid, index, value)?,
            )),
            _ => Err(ServiceError::bad_request(MEMORY, "write")),
        })
        .build()
}

fn log_service() -> Service {
    Service::builder(LOG, SERVICE_VERSION)
        .capability("write", |caller, request| match request {
            Request::Text(text) => {
                caller.io.write(&text);
                Ok(Reply::Unit)
            }
            _ => Err(ServiceError::bad_request(LOG, "write")),
        })
        .capability("log", |caller, request| match request {
            Request::Text(text) => {
                info!(target: "aurora::service", "[{}] {}", caller.pid, text);
                Ok(Reply::Unit)
            }
            _ => Err(ServiceError::bad_request(LOG, "log")),
        })
        .build()
}

fn process_service(deps: &ServiceDeps) -> Service {
    let pm = &deps.processes;
    let (create, start, list, table, find, info) = (
        pm.clone(),
        pm.clone(),
        pm.clone(),
        pm.clone(),
        pm.clone(),
        pm.clone(),
    );
    Service::builder(PROCESS, SERVICE_VERSION)
        .capability("create", move |_, request| match request {
            Request::Spawn(application) => Ok(Reply::Pid(create.create_process(application))),
            _ => Err(ServiceError::bad_request(PROCESS, "create")),
        })
        .capability("start", move |caller, request| match request {
            Request::Start { pid, args } => {
                let outcome =
                    start.start_process(pid, args, caller.io.clone(), &caller.services)?;
                Ok(Reply::Started(outcome))
            }
            _ => Err(ServiceError::bad_request(PROCESS, "start")),
        })
        .capability("list", move |_, _| Ok(Reply::Processes(list.running_processes())))
        .capability("table", move |_, _| Ok(Reply::Processes(table.process_table())))
        .capability("find", move |_, request| match request {
            Request::Text(name) => Ok(Reply::Process(find.get_process_by_application_name(&name))),
            _ => Err(ServiceError::bad_request(PROCESS, "find")),
        })
        .capability("info", move |_, request| match request {
            Request::Pid(pid) => Ok(Reply::Process(info.process(pid))),
            _ => Err(ServiceError::bad_request(PROCESS, "info")),
        })
        .build()
}

/// Shared access to the mounted filesystems for fs capabilities
#[derive(Clone)]
struct FsAccess {
    filesystems: Rc<RefCell<FsDirectory>>,
    main: FsId,
    catalog: Rc<AppCatalog>,
}

impl FsAccess {
    fn read<R>(&self, id: &FsId, f: impl FnOnce(&Filesystem) -> ServiceResult<R>) -> ServiceResult<R> {
        let dirs = self.filesystems.borrow();
        let fs = dirs
            .get(id)
            .ok_or_else(|| ServiceError::UnknownFilesystem(id.clone()))?;
        f(fs)
    }

    fn write<R>(
        &self,
        id: &FsId,
        f: impl FnOnce(&mut Filesystem) -> ServiceResult<R>,
    ) -> ServiceResult<R> {
        let mut dirs = self.filesystems.borrow_mut();
        let fs = dirs
            .get_mut(id)
            .ok_or_else(|| ServiceError::UnknownFilesystem(id.clone()))?;
        f(fs)
    }
}

/// The more specific error for a node that may simply not exist
fn node_error(fs: &Filesystem, node: NodeId, err: FsError) -> ServiceError {
    if fs.contains(node) {
        err.into()
    } else {
        FsError::UnknownNode(node).into()
    }
}

fn fs_service(deps: &ServiceDeps) -> Service {
    let access = FsAccess {
        filesystems: deps.filesystems.clone(),
        main: deps.fs_id.clone(),
        catalog: deps.catalog.clone(),
    };

    // One clone per capability
    let fs = || access.clone();

    let lookup = fs();
    let path_of = fs();
    let root = fs();
    let id = fs();
    let kind = fs();
    let list = fs();
    let read = fs();
    let write = fs();
    let append = fs();
    let clear = fs();
    let mkdir = fs();
    let touch = fs();
    let remove = fs();
    let save_app = fs();
    let load_app = fs();

    Service::builder(FS, SERVICE_VERSION)
        .capability("lookup", move |_, request| match request {
            Request::Path(path) => lookup.read(&lookup.main, |fs| {
                Ok(Reply::Node(fs.get_item_by_path(&path).map(|n| fs.node_ref(n))))
            }),
            _ => Err(ServiceError::bad_request(FS, "lookup")),
        })
        .capability("path_of", move |_, request| match request {
            Request::Node(node) => path_of.read(&node.fs, |fs| {
                Ok(Reply::Path(fs.get_path_by_item(node.node)))
            }),
            _ => Err(ServiceError::bad_request(FS, "path_of")),
        })
        .capability("root", move |_, _| {
            root.read(&root.main, |fs| Ok(Reply::Node(Some(fs.node_ref(fs.root())))))
        })
        .capability("id", move |_, _| Ok(Reply::FsId(id.main.clone())))
        .capability("kind", move |_, request| match request {
            Request::Node(node) => kind.read(&node.fs, |fs| Ok(Reply::Kind(fs.kind(node.node)))),
            _ => Err(ServiceError::bad_request(FS, "kind")),
        })
        .capability("list", move |_, request| match request {
            Request::Node(node) => list.read(&node.fs, |fs| {
                fs.entries(node.node)
                    .map(Reply::Entries)
                    .ok_or_else(|| node_error(fs, node.node, FsError::NotADirectory(node.node)))
            }),
            _ => Err(ServiceError::bad_request(FS, "list")),
        })
        .capability("read", move |_, request| match request {
            Request::Node(node) => read.read(&node.fs, |fs| {
                fs.content(node.node)
                    .map(|text| Reply::Text(text.to_string()))
                    .ok_or_else(|| node_error(fs, node.node, FsError::NotAFile(node.node)))
            }),
            _ => Err(ServiceError::bad_request(FS, "read")),
        })
        .capability("write", move |_, request| match request {
            Request::Write { node, text } => write.write(&node.fs, |fs| {
                fs.write_content(node.node, &text)?;
                Ok(Reply::Unit)
            }),
            _ => Err(ServiceError::bad_request(FS, "write")),
        })
        .capability("append", move |_, request| match request {
            Request::Write { node, text } => append.write(&node.fs, |fs| {
                fs.append_content(node.node, &text)?;
                Ok(Reply::Unit)
            }),
            _ => Err(ServiceError::bad_request(FS, "append")),
        })
        .capability("clear", move |_, request| match request {
            Request::Node(node) => clear.write(&node.fs, |fs| {
                fs.clear_content(node.node)?;
                Ok(Reply::Unit)
            }),
            _ => Err(ServiceError::bad_request(FS, "clear")),
        })
        .capability("mkdir", move |_, request| match request {
            Request::Create { parent, name, .. } => mkdir.write(&parent.fs, |fs| {
                let dir = fs.mkdir(parent.node, name)?;
                Ok(Reply::Node(Some(fs.node_ref(dir))))
            }),
            _ => Err(ServiceError::bad_request(FS, "mkdir")),
        })
        .capability("touch", move |_, request| match request {
            Request::Create {
                parent,
                name,
                extension,
            } => touch.write(&parent.fs, |fs| {
                let file = fs.touch(parent.node, name, extension)?;
                Ok(Reply::Node(Some(fs.node_ref(file))))
            }),
            _ => Err(ServiceError::bad_request(FS, "touch")),
        })
        .capability("remove", move |_, request| match request {
            // Detach from the parent and free the subtree
            Request::Node(node) => remove.write(&node.fs, |fs| {
                if node.node == fs.root() {
                    return Err(FsError::IsRoot.into());
                }
                let Some(parent) = fs.parent(node.node) else {
                    return Ok(Reply::Bool(false));
                };
                fs.remove_child(parent, node.node)?;
                fs.delete(node.node)?;
                Ok(Reply::Bool(true))
            }),
            _ => Err(ServiceError::bad_request(FS, "remove")),
        })
        .capability("save_app", move |_, request| match request {
            Request::SaveApp { dir, app, args } => save_app.write(&dir.fs, |fs| {
                let file = app::save_application(fs, dir.node, &app, &args)?;
                Ok(Reply::Node(Some(fs.node_ref(file))))
            }),
            _ => Err(ServiceError::bad_request(FS, "save_app")),
        })
        .capability("load_app", move |_, request| match request {
            Request::Node(node) => load_app.read(&node.fs, |fs| {
                let (app, args) = app::load_application(fs, node.node, &load_app.catalog)?;
                Ok(Reply::App {
                    app: Rc::new(app),
                    args,
                })
            }),
            _ => Err(ServiceError::bad_request(FS, "load_app")),
        })
        .build()
}

fn clock_service(deps: &ServiceDeps) -> Service {
    let booted_at = deps.booted_at;
    Service::builder(CLOCK, SERVICE_VERSION)
        .capability("now", |_, _| {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            Ok(Reply::Millis(millis))
        })
        .capability("uptime", move |_, _| {
            Ok(Reply::Millis(booted_at.elapsed().as_millis() as u64))
        })
        .build()
}

fn kernel_service(deps: &ServiceDeps) -> Service {
    let name = deps.kernel_name.clone();
    let version = deps.kernel_version.clone();
    let ids = deps.catalog.clone();
    let lookup = deps.catalog.clone();
    Service::builder(KERNEL, SERVICE_VERSION)
        .capability("identity", move |_, _| {
            Ok(Reply::Identity {
                name: name.clone(),
                version: version.clone(),
            })
        })
        .capability("services", |caller, _| {
            Ok(Reply::Text(caller.services.names().join(" ")))
        })
        .capability("catalog", move |_, _| Ok(Reply::Text(ids.ids().join(" "))))
        .capability("application", move |_, request| match request {
            Request::Text(id) => {
                let app = lookup
                    .application(&id)
                    .ok_or(InvalidAppRecord::UnknownExecutable(id))?;
                Ok(Reply::App {
                    app: Rc::new(app),
                    args: Vec::new(),
                })
            }
            _ => Err(ServiceError::bad_request(KERNEL, "application")),
        })
        .build()
}

/// Match a reply variant or fail with `UnexpectedReply`
macro_rules! expect_reply {
    ($reply:expr, $service:expr, $capability:expr, $pat:pat => $out:expr) => {
        match $reply {
            $pat => Ok($out),
            _ => Err(ServiceError::unexpected_reply($service, $capability)),
        }
    };
}

impl ProcessContext {
    /// Call a service capability as this process
    pub fn call(&self, service: &str, capability: &str, request: Request) -> ServiceResult<Reply> {
        let caller: Caller = self.caller();
        self.services().call(service, capability, &caller, request)
    }

    // ========================================================================
    // memory
    // ========================================================================

    pub fn mem_read(&self, index: usize) -> ServiceResult<Option<Slot>> {
        let reply = self.call(MEMORY, "read", Request::Index(index))?;
        expect_reply!(reply, MEMORY, "read", Reply::Slot(slot) => slot)
    }

    pub fn mem_write(&self, index: usize, value: Slot) -> ServiceResult<bool> {
        let reply = self.call(MEMORY, "write", Request::Store { index, value })?;
        expect_reply!(reply, MEMORY, "write", Reply::Bool(ok) => ok)
    }

    // ========================================================================
    // log
    // ========================================================================

    /// Write through the `log` service
    pub fn write_out(&self, text: &str) -> ServiceResult<()> {
        let reply = self.call(LOG, "write", Request::Text(text.to_string()))?;
        expect_reply!(reply, LOG, "write", Reply::Unit => ())
    }

    pub fn log(&self, text: &str) -> ServiceResult<()> {
        let reply = self.call(LOG, "log", Request::Text(text.to_string()))?;
        expect_reply!(reply, LOG, "log", Reply::Unit => ())
    }

    // ========================================================================
    // process
    // ========================================================================

    pub fn create_process(&self, application: Rc<Application>) -> ServiceResult<Pid> {
        let reply = self.call(PROCESS, "create", Request::Spawn(application))?;
        expect_reply!(reply, PROCESS, "create", Reply::Pid(pid) => pid)
    }

    pub fn start_process(&self, pid: Pid, args: Vec<String>) -> ServiceResult<StartOutcome> {
        let reply = self.call(PROCESS, "start", Request::Start { pid, args })?;
        expect_reply!(reply, PROCESS, "start", Reply::Started(outcome) => outcome)
    }

    pub fn running_processes(&self) -> ServiceResult<Vec<ProcessEntry>> {
        let reply = self.call(PROCESS, "list", Request::None)?;
        expect_reply!(reply, PROCESS, "list", Reply::Processes(entries) => entries)
    }

    pub fn process_table(&self) -> ServiceResult<Vec<ProcessEntry>> {
        let reply = self.call(PROCESS, "table", Request::None)?;
        expect_reply!(reply, PROCESS, "table", Reply::Processes(entries) => entries)
    }

    pub fn find_process(&self, name: &str) -> ServiceResult<Option<ProcessInfo>> {
        let reply = self.call(PROCESS, "find", Request::Text(name.to_string()))?;
        expect_reply!(reply, PROCESS, "find", Reply::Process(info) => info)
    }

    pub fn process_info(&self, pid: Pid) -> ServiceResult<Option<ProcessInfo>> {
        let reply = self.call(PROCESS, "info", Request::Pid(pid))?;
        expect_reply!(reply, PROCESS, "info", Reply::Process(info) => info)
    }

    // ========================================================================
    // fs
    // ========================================================================

    pub fn lookup(&self, path: &str) -> ServiceResult<Option<NodeRef>> {
        let reply = self.call(FS, "lookup", Request::Path(path.to_string()))?;
        expect_reply!(reply, FS, "lookup", Reply::Node(node) => node)
    }

    pub fn path_of(&self, node: &NodeRef) -> ServiceResult<Option<String>> {
        let reply = self.call(FS, "path_of", Request::Node(node.clone()))?;
        expect_reply!(reply, FS, "path_of", Reply::Path(path) => path)
    }

    pub fn fs_root(&self) -> ServiceResult<NodeRef> {
        let reply = self.call(FS, "root", Request::None)?;
        expect_reply!(reply, FS, "root", Reply::Node(Some(node)) => node)
    }

    pub fn fs_id(&self) -> ServiceResult<FsId> {
        let reply = self.call(FS, "id", Request::None)?;
        expect_reply!(reply, FS, "id", Reply::FsId(id) => id)
    }

    pub fn node_kind(&self, node: &NodeRef) -> ServiceResult<Option<NodeKind>> {
        let reply = self.call(FS, "kind", Request::Node(node.clone()))?;
        expect_reply!(reply, FS, "kind", Reply::Kind(kind) => kind)
    }

    pub fn list_dir(&self, dir: &NodeRef) -> ServiceResult<Vec<DirEntry>> {
        let reply = self.call(FS, "list", Request::Node(dir.clone()))?;
        expect_reply!(reply, FS, "list", Reply::Entries(entries) => entries)
    }

    pub fn read_file(&self, file: &NodeRef) -> ServiceResult<String> {
        let reply = self.call(FS, "read", Request::Node(file.clone()))?;
        expect_reply!(reply, FS, "read", Reply::Text(text) => text)
    }

    pub fn write_file(&self, file: &NodeRef, text: &str) -> ServiceResult<()> {
        let request = Request::Write {
            node: file.clone(),
            text: text.to_string(),
        };
        let reply = self.call(FS, "write", request)?;
        expect_reply!(reply, FS, "write", Reply::Unit => ())
    }

    pub fn append_file(&self, file: &NodeRef, text: &str) -> ServiceResult<()> {
        let request = Request::Write {
            node: file.clone(),
            text: text.to_string(),
        };
        let reply = self.call(FS, "append", request)?;
        expect_reply!(reply, FS, "append", Reply::Unit => ())
    }

    pub fn clear_file(&self, file: &NodeRef) -> ServiceResult<()> {
        let reply = self.call(FS, "clear", Request::Node(file.clone()))?;
        expect_reply!(reply, FS, "clear", Reply::Unit => ())
    }

    pub fn mkdir(&self, parent: &NodeRef, name: &str) -> ServiceResult<NodeRef> {
        let request = Request::Create {
            parent: parent.clone(),
            name: name.to_string(),
            extension: String::new(),
        };
        let reply = self.call(FS, "mkdir", request)?;
        expect_reply!(reply, FS, "mkdir", Reply::Node(Some(node)) => node)
    }

    pub fn touch(&self, parent: &NodeRef, name: &str, extension: &str) -> ServiceResult<NodeRef> {
        let request = Request::Create {
            parent: parent.clone(),
            name: name.to_string(),
            extension: extension.to_string(),
        };
        let reply = self.call(FS, "touch", request)?;
        expect_reply!(reply, FS, "touch", Reply::Node(Some(node)) => node)
    }

    /// Remove a node from its directory and free it
    pub fn remove(&self, node: &NodeRef) -> ServiceResult<bool> {
        let reply = self.call(FS, "remove", Request::Node(node.clone()))?;
        expect_reply!(reply, FS, "remove", Reply::Bool(removed) => removed)
    }

    pub fn save_app(
        &self,
        dir: &NodeRef,
        app: Rc<Application>,
        args: Vec<String>,
    ) -> ServiceResult<NodeRef> {
        let request = Request::SaveApp {
            dir: dir.clone(),
            app,
            args,
        };
        let reply = self.call(FS, "save_app", request)?;
        expect_reply!(reply, FS, "save_app", Reply::Node(Some(node)) => node)
    }

    pub fn load_app(&self, file: &NodeRef) -> ServiceResult<(Rc<Application>, Vec<String>)> {
        let reply = self.call(FS, "load_app", Request::Node(file.clone()))?;
        expect_reply!(reply, FS, "load_app", Reply::App { app, args } => (app, args))
    }

    // ========================================================================
    // clock, kernel
    // ========================================================================

    pub fn now_ms(&self) -> ServiceResult<u64> {
        let reply = self.call(CLOCK, "now", Request::None)?;
        expect_reply!(reply, CLOCK, "now", Reply::Millis(ms) => ms)
    }

    pub fn uptime_ms(&self) -> ServiceResult<u64> {
        let reply = self.call(CLOCK, "uptime", Request::None)?;
        expect_reply!(reply, CLOCK, "uptime", Reply::Millis(ms) => ms)
    }

    /// Kernel name and version
    pub fn kernel_identity(&self) -> ServiceResult<(String, String)> {
        let reply = self.call(KERNEL, "identity", Request::None)?;
        expect_reply!(reply, KERNEL, "identity", Reply::Identity { name, version } => (name, version))
    }

    /// Ids of every executable in the catalog
    pub fn catalog_ids(&self) -> ServiceResult<Vec<String>> {
        let reply = self.call(KERNEL, "catalog", Request::None)?;
        expect_reply!(
            reply,
            KERNEL,
            "catalog",
            Reply::Text(ids) => ids.split_whitespace().map(str::to_string).collect()
        )
    }

    /// A fresh application for a catalog id
    pub fn catalog_application(&self, id: &str) -> ServiceResult<Rc<Application>> {
        let reply = self.call(KERNEL, "application", Request::Text(id.to_string()))?;
        expect_reply!(reply, KERNEL, "application", Reply::App { app, .. } => app)
    }

    pub fn service_names(&self) -> ServiceResult<Vec<String>> {
        let reply = self.call(KERNEL, "services", Request::None)?;
        expect_reply!(
            reply,
            KERNEL,
            "services",
            Reply::Text(names) => names.split_whitespace().map(str::to_string).collect()
        )
    }
}
