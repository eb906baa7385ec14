//! Processes and the process manager
//!
//! A process is an application instance with its own pid and its own memory
//! page. Pids and pages are handed out together, in lock-step, and neither is
//! ever reused.
//!
//! Lifecycle:
//! - `Inactive` after creation
//! - `Active` once started; a second start is refused
//! - `Terminated` when the executable's future completes; the page is
//!   released and the entry stays in the process table for inspection

use super::app::{Application, ExitCode};
use super::executor::Executor;
use super::memory::{ArenaHandle, PageOffset, ProcessMemory, Slot};
use super::service::{Caller, Services};
use crate::platform::IoDevice;
use log::{debug, info, warn};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::task::Poll;

const TARGET: &str = "aurora::process";

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Pid(pub u32);

impl std::fmt::Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pid:{}", self.0)
    }
}

/// Lifecycle state of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Inactive,
    Active,
    Terminated,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Inactive => write!(f, "inactive"),
            ProcessStatus::Active => write!(f, "active"),
            ProcessStatus::Terminated => write!(f, "terminated"),
        }
    }
}

/// Read-only view of a process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub name: String,
    pub version: String,
    pub memory_offset: usize,
    pub status: ProcessStatus,
    pub exit_code: Option<ExitCode>,
    pub args: Vec<String>,
}

impl ProcessInfo {
    /// Process table key, `name#pid`
    pub fn table_key(&self) -> String {
        format!("{}#{}", self.name, self.pid.0)
    }
}

/// One row of the process table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessEntry {
    pub key: String,
    pub info: ProcessInfo,
}

/// What `start_process` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The executable is waiting for input and will be resumed by the run loop
    Suspended,
    /// The executable finished during its first run
    Exited(ExitCode),
    /// The process had already been started; nothing was run
    AlreadyStarted,
}

/// Result type for process operations
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Process errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// No process with this pid
    UnknownPid(Pid),
    /// The process's application has no executable
    NoExecutable { pid: Pid, name: String },
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessError::UnknownPid(pid) => write!(f, "no such process: {}", pid),
            ProcessError::NoExecutable { pid, name } => {
                write!(f, "{} ({}) has no executable", name, pid)
            }
        }
    }
}

impl std::error::Error for ProcessError {}

struct Process {
    application: Rc<Application>,
    memory_offset: PageOffset,
    status: ProcessStatus,
    exit_code: Option<ExitCode>,
    args: Vec<String>,
}

impl Process {
    fn info(&self, pid: Pid) -> ProcessInfo {
        ProcessInfo {
            pid,
            name: self.application.name().to_string(),
            version: self.application.version().to_string(),
            memory_offset: self.memory_offset.0,
            status: self.status,
            exit_code: self.exit_code,
            args: self.args.clone(),
        }
    }
}

#[derive(Default)]
struct ManagerState {
    processes: BTreeMap<Pid, Process>,
    /// Started processes, in start order
    table: Vec<Pid>,
    next_pid: u32,
}

/// Creates, starts, and tracks processes
///
/// All methods take `&self`: the manager is shared with the `process`
/// service and must accept calls made from inside a running executable.
pub struct ProcessManager {
    arena: ArenaHandle,
    state: RefCell<ManagerState>,
    executor: Executor,
}

impl ProcessManager {
    pub fn new(arena: ArenaHandle) -> Self {
        Self {
            arena,
            state: RefCell::new(ManagerState::default()),
            executor: Executor::new(),
        }
    }

    pub fn arena(&self) -> &ArenaHandle {
        &self.arena
    }

    /// Create an inactive process with a fresh pid and page
    pub fn create_process(&self, application: Rc<Application>) -> Pid {
        let memory_offset = self.arena.borrow_mut().allocate_page();
        let mut state = self.state.borrow_mut();
        let pid = Pid(state.next_pid);
        state.next_pid += 1;

        debug!(
            target: TARGET,
            "created {} for {} at {}",
            pid,
            application.name(),
            memory_offset
        );
        state.processes.insert(
            pid,
            Process {
                application,
                memory_offset,
                status: ProcessStatus::Inactive,
                exit_code: None,
                args: Vec::new(),
            },
        );
        pid
    }

    /// Start an inactive process.
    ///
    /// The executable runs until it first waits or finishes; then the
    /// process is recorded in the process table. Starting a process that is
    /// not inactive runs nothing.
    pub fn start_process(
        &self,
        pid: Pid,
        args: Vec<String>,
        io: Rc<dyn IoDevice>,
        services: &Services,
    ) -> ProcessResult<StartOutcome> {
        let (exec, name, memory_offset) = {
            let mut state = self.state.borrow_mut();
            let process = state
                .processes
                .get_mut(&pid)
                .ok_or(ProcessError::UnknownPid(pid))?;

            if process.status != ProcessStatus::Inactive {
                warn!(
                    target: TARGET,
                    "ignoring start of {} ({}): already {}",
                    pid,
                    process.application.name(),
                    process.status
                );
                return Ok(StartOutcome::AlreadyStarted);
            }

            let name = process.application.name().to_string();
            let exec = process
                .application
                .executable()
                .ok_or_else(|| ProcessError::NoExecutable {
                    pid,
                    name: name.clone(),
                })?;

            process.status = ProcessStatus::Active;
            process.args = args.clone();
            (exec, name, process.memory_offset)
        };

        info!(target: TARGET, "starting {}#{}", name, pid.0);

        let ctx = ProcessContext {
            pid,
            name,
            memory: ProcessMemory::new(memory_offset, self.arena.clone()),
            services: services.clone(),
            args,
            io,
        };

        // No state is borrowed here; the executable may call back into us
        let outcome = match self.executor.launch(pid, exec(ctx)) {
            Poll::Ready(code) => {
                self.terminate(pid, code);
                StartOutcome::Exited(code)
            }
            Poll::Pending => StartOutcome::Suspended,
        };

        self.state.borrow_mut().table.push(pid);
        Ok(outcome)
    }

    fn terminate(&self, pid: Pid, code: ExitCode) {
        let released = {
            let mut state = self.state.borrow_mut();
            let Some(process) = state.processes.get_mut(&pid) else {
                return;
            };
            process.status = ProcessStatus::Terminated;
            process.exit_code = Some(code);
            process.memory_offset
        };
        self.arena.borrow_mut().release_page(released);
        info!(target: TARGET, "{} exited with code {}", pid, code);
    }

    /// Resume woken processes until none is ready. Returns the polls made.
    pub fn run_until_stalled(&self) -> usize {
        self.executor
            .run_until_stalled(|pid, code| self.terminate(pid, code))
    }

    /// Number of processes waiting for a wakeup
    pub fn suspended_count(&self) -> usize {
        self.executor.parked_count()
    }

    fn entries(&self, include: impl Fn(&Process) -> bool) -> Vec<ProcessEntry> {
        let state = self.state.borrow();
        state
            .table
            .iter()
            .filter_map(|pid| {
                let process = state.processes.get(pid)?;
                if !include(process) {
                    return None;
                }
                let info = process.info(*pid);
                Some(ProcessEntry {
                    key: info.table_key(),
                    info,
                })
            })
            .collect()
    }

    /// Snapshot of started processes that have not terminated
    pub fn running_processes(&self) -> Vec<ProcessEntry> {
        self.entries(|p| p.status != ProcessStatus::Terminated)
    }

    /// Snapshot of every started process, terminated ones included
    pub fn process_table(&self) -> Vec<ProcessEntry> {
        self.entries(|_| true)
    }

    /// First running process whose application has this name
    pub fn get_process_by_application_name(&self, name: &str) -> Option<ProcessInfo> {
        self.running_processes()
            .into_iter()
            .map(|entry| entry.info)
            .find(|info| info.name == name)
    }

    pub fn process(&self, pid: Pid) -> Option<ProcessInfo> {
        self.state.borrow().processes.get(&pid).map(|p| p.info(pid))
    }

    pub fn application(&self, pid: Pid) -> Option<Rc<Application>> {
        self.state
            .borrow()
            .processes
            .get(&pid)
            .map(|p| p.application.clone())
    }

    /// Number of processes ever created
    pub fn process_count(&self) -> usize {
        self.state.borrow().processes.len()
    }

    fn offset_of(&self, pid: Pid) -> ProcessResult<PageOffset> {
        self.state
            .borrow()
            .processes
            .get(&pid)
            .map(|p| p.memory_offset)
            .ok_or(ProcessError::UnknownPid(pid))
    }

    /// Read a slot of a process's page
    pub fn read_process_memory(&self, pid: Pid, index: usize) -> ProcessResult<Option<Slot>> {
        let offset = self.offset_of(pid)?;
        Ok(self.arena.borrow().read_slot(offset, index))
    }

    /// Write a slot of a process's page. False if the page is released.
    pub fn write_process_memory(&self, pid: Pid, index: usize, value: Slot) -> ProcessResult<bool> {
        let offset = self.offset_of(pid)?;
        Ok(self.arena.borrow_mut().write_slot(offset, index, value))
    }
}

/// Everything a running executable is handed
pub struct ProcessContext {
    pid: Pid,
    name: String,
    memory: ProcessMemory,
    services: Services,
    args: Vec<String>,
    io: Rc<dyn IoDevice>,
}

impl ProcessContext {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Name of the application this process runs
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn memory(&self) -> &ProcessMemory {
        &self.memory
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn io(&self) -> &Rc<dyn IoDevice> {
        &self.io
    }

    /// Identity used when this process calls a service
    pub fn caller(&self) -> Caller {
        Caller {
            pid: self.pid,
            io: self.io.clone(),
            services: self.services.clone(),
        }
    }

    /// Write to this process's I/O device
    pub fn print(&self, text: &str) {
        self.io.write(text);
    }

    /// Wait for a line of input; `None` once the device is disposed
    pub async fn read_line(&self, prompt: &str) -> Option<String> {
        self.io.read_line(prompt).await
    }
}
