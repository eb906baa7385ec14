//! Integration tests for aurora
//!
//! End-to-end behavior across the kernel, services, processes, the
//! filesystem, and the shell. Each test boots its own kernel.

use aurora::kernel::{
    Application, Caller, FrozenServiceError, Kernel, KernelConfig, MemoryArena, ProcessManager,
    ProcessStatus, Reply, Request, Service, ServiceRegistry, ServiceResult, StartOutcome,
};
use aurora::kernel::app::executable;
use aurora::platform::{BufferedIo, IoDevice};
use aurora::vfs::{FsId, Filesystem, MemoryStorage, Storage, path};
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// A booted kernel with its shell, driven line by line
struct Session {
    kernel: Kernel,
    io: Rc<BufferedIo>,
}

impl Session {
    fn boot(storage: &MemoryStorage) -> Self {
        Self::boot_with(KernelConfig::default().storage(Rc::new(storage.clone())))
    }

    fn boot_with(config: KernelConfig) -> Self {
        let io = Rc::new(BufferedIo::new());
        let kernel = Kernel::boot(config, io.clone()).unwrap();
        io.take_output();
        Self { kernel, io }
    }

    /// Run one command line and return its output, without the next prompt
    fn run(&self, line: &str) -> String {
        self.io.push_line(line);
        self.kernel.run_until_stalled();
        let out = self.io.take_output();
        match out.rfind('\n') {
            Some(i) => out[..=i].to_string(),
            None => String::new(),
        }
    }
}

fn quiet_kernel() -> (Kernel, Rc<BufferedIo>) {
    let io = Rc::new(BufferedIo::new());
    let kernel = Kernel::boot(KernelConfig::default().no_bootstrap(), io.clone()).unwrap();
    (kernel, io)
}

// ============================================================================
// Filesystem persistence
// ============================================================================

#[test]
fn test_filesystem_survives_reconstruction() {
    let mem = MemoryStorage::new();
    let storage: Rc<dyn Storage> = Rc::new(mem.clone());

    let mut fs = Filesystem::init(FsId::new("main"), storage.clone()).unwrap();
    let root = fs.root();
    let welcome = fs.touch(root, "welcome", "txt").unwrap();
    fs.write_content(welcome, "hi").unwrap();
    let docs = fs.mkdir(root, "docs").unwrap();
    fs.touch(docs, "a", "").unwrap();
    fs.touch(docs, "b", "md").unwrap();

    let again = Filesystem::load(FsId::new("main"), storage).unwrap().unwrap();
    let node = again.get_item_by_path("root/welcome").unwrap();
    assert_eq!(again.content(node), Some("hi"));
    assert_eq!(again.extension(node), Some("txt"));

    let docs = again.get_item_by_path("/docs").unwrap();
    let names: Vec<String> = again
        .entries(docs)
        .unwrap()
        .iter()
        .map(|e| e.display_name())
        .collect();
    assert_eq!(names, vec!["a", "b.md"]);
}

#[test]
fn test_path_round_trip() {
    let fs = {
        let mut fs = Filesystem::init(FsId::new("t"), Rc::new(MemoryStorage::new())).unwrap();
        let root = fs.root();
        let a = fs.mkdir(root, "a").unwrap();
        let b = fs.mkdir(a, "b").unwrap();
        fs.touch(b, "c", "txt").unwrap();
        fs
    };

    for p in ["root", "root/a", "root/a/b", "root/a/b/c"] {
        let node = fs.get_item_by_path(p).unwrap();
        assert_eq!(fs.get_path_by_item(node).as_deref(), Some(p));
    }
    assert_eq!(
        fs.get_item_by_path("/root/a/b/c"),
        fs.get_item_by_path(&path::resolve("root/a", "b/c"))
    );
}

#[test]
fn test_removed_node_is_not_found() {
    let mut fs = Filesystem::init(FsId::new("t"), Rc::new(MemoryStorage::new())).unwrap();
    let root = fs.root();
    let gone = fs.touch(root, "gone", "").unwrap();

    assert!(fs.remove_child(root, gone).unwrap());
    assert_eq!(fs.get_item_by_path("root/gone"), None);
    assert_eq!(fs.get_path_by_item(gone), None);
    fs.delete(gone).unwrap();
    assert!(!fs.contains(gone));
}

// ============================================================================
// Processes and memory
// ============================================================================

#[test]
fn test_process_memory_is_isolated() {
    let arena = Rc::new(RefCell::new(MemoryArena::new()));
    let manager = ProcessManager::new(arena);
    let p0 = manager.create_process(Rc::new(Application::new("p0", "1")));
    let p1 = manager.create_process(Rc::new(Application::new("p1", "1")));

    assert!(manager.write_process_memory(p0, 0, json!(1)).unwrap());
    assert!(manager.write_process_memory(p1, 0, json!(2)).unwrap());

    assert_eq!(manager.read_process_memory(p0, 0).unwrap(), Some(json!(1)));
    assert_eq!(manager.read_process_memory(p1, 0).unwrap(), Some(json!(2)));
}

#[test]
fn test_pids_and_pages_advance_together() {
    let (kernel, _io) = quiet_kernel();
    let infos: Vec<_> = (0..4)
        .map(|i| {
            let pid = kernel
                .processes()
                .create_process(Rc::new(Application::new(format!("p{}", i), "1")));
            kernel.processes().process(pid).unwrap()
        })
        .collect();

    for pair in infos.windows(2) {
        assert_eq!(pair[1].pid.0, pair[0].pid.0 + 1);
        assert_eq!(pair[1].memory_offset, pair[0].memory_offset + 1);
    }
    assert!(infos.iter().all(|i| i.status == ProcessStatus::Inactive));
}

#[test]
fn test_double_start_runs_once() {
    let (kernel, io) = quiet_kernel();
    let runs = Rc::new(Cell::new(0));
    let counted = runs.clone();
    let app = Application::new("once", "1").with_executable(move |_| {
        let counted = counted.clone();
        async move {
            counted.set(counted.get() + 1);
            0
        }
    });

    let processes = kernel.processes();
    let pid = processes.create_process(Rc::new(app));
    let device: Rc<dyn IoDevice> = io.clone();

    let first = processes
        .start_process(pid, vec![], device.clone(), kernel.services())
        .unwrap();
    let second = processes
        .start_process(pid, vec![], device, kernel.services())
        .unwrap();

    assert_eq!(first, StartOutcome::Exited(0));
    assert_eq!(second, StartOutcome::AlreadyStarted);
    assert_eq!(runs.get(), 1);
    assert_eq!(processes.process_table().len(), 1);
}

#[test]
fn test_suspended_process_resumes_on_input() {
    let (kernel, io) = quiet_kernel();
    let app = Application::new("greeter", "1").with_executable(|ctx| async move {
        let name = ctx.read_line("name? ").await.unwrap_or_default();
        ctx.print(&format!("hello {}\n", name));
        0
    });

    let (pid, outcome) = kernel.spawn_application(Rc::new(app), vec![]).unwrap();
    assert_eq!(outcome, StartOutcome::Suspended);
    assert!(kernel.has_running_processes());

    io.push_line("ada");
    kernel.run_until_stalled();

    let info = kernel.processes().process(pid).unwrap();
    assert_eq!(info.status, ProcessStatus::Terminated);
    assert_eq!(info.exit_code, Some(0));
    assert!(io.take_output().ends_with("name? hello ada\n"));
}

// ============================================================================
// Services
// ============================================================================

#[test]
fn test_frozen_service_rejects_changes() {
    let noop = |_: &Caller, _: Request| -> ServiceResult<Reply> { Ok(Reply::Unit) };
    let mut registry = ServiceRegistry::new();
    registry.register(Service::builder("svc", "1").capability("ping", noop).build());
    registry.freeze_all();

    let service = registry.get_mut("svc").unwrap();
    assert_eq!(
        service.insert_capability("pong", Rc::new(noop)).err(),
        Some(FrozenServiceError {
            service: "svc".into(),
            capability: "pong".into(),
        })
    );
    assert_eq!(
        service.remove_capability("ping").err(),
        Some(FrozenServiceError {
            service: "svc".into(),
            capability: "ping".into(),
        })
    );
    assert_eq!(service.capability_names(), vec!["ping"]);
}

#[test]
fn test_frozen_kernel_service_rejects_changes() {
    let (kernel, _io) = quiet_kernel();
    let noop = |_: &Caller, _: Request| -> ServiceResult<Reply> { Ok(Reply::Unit) };
    let mut fs = kernel.services().get("fs").unwrap().clone();
    let before: Vec<String> = fs.capability_names().into_iter().map(String::from).collect();

    assert!(fs.is_frozen());
    assert_eq!(
        fs.insert_capability("format", Rc::new(noop)).err(),
        Some(FrozenServiceError {
            service: "fs".into(),
            capability: "format".into(),
        })
    );
    assert_eq!(
        fs.remove_capability("read").err(),
        Some(FrozenServiceError {
            service: "fs".into(),
            capability: "read".into(),
        })
    );
    assert_eq!(fs.capability_names(), before);
    assert!(fs.has_capability("read"));
}

#[test]
fn test_kernel_services_are_frozen() {
    let (kernel, _io) = quiet_kernel();
    let names = kernel.services().names();
    for expected in ["memory", "log", "process", "fs", "clock", "kernel"] {
        assert!(names.contains(&expected), "missing service {}", expected);
    }
    assert!(kernel.services().registry().iter().all(Service::is_frozen));
}

// ============================================================================
// Shell, end to end
// ============================================================================

#[test]
fn test_shell_files_and_directories() {
    let session = Session::boot(&MemoryStorage::new());

    assert_eq!(session.run("mkdir docs"), "");
    assert_eq!(session.run("write docs/notes.txt hello world"), "");
    assert_eq!(session.run("cat docs/notes.txt"), "hello world\n");
    assert_eq!(session.run("append docs/notes.txt again"), "");
    assert_eq!(session.run("cat docs/notes.txt"), "hello world\nagain\n");
    assert_eq!(session.run("ls docs"), "notes.txt\n");
    assert_eq!(session.run("ls"), "docs/\n");

    assert_eq!(session.run("cd docs"), "");
    assert_eq!(session.run("pwd"), "root/docs\n");
    assert_eq!(session.run("cd .."), "");
    assert_eq!(session.run("pwd"), "root\n");

    assert_eq!(session.run("rm docs/notes.txt"), "");
    assert_eq!(session.run("ls docs"), "");
    assert_eq!(
        session.run("cat docs/notes.txt"),
        "cat: docs/notes.txt: no such file or directory\n"
    );
}

#[test]
fn test_shell_rejects_unknown_commands() {
    let session = Session::boot(&MemoryStorage::new());
    assert_eq!(session.run("frobnicate"), "frobnicate: command not found\n");
    assert_eq!(session.run("echo \"open"), "parse error: unterminated \" quote\n");
    assert_eq!(session.run("   "), "");
}

#[test]
fn test_shell_installs_and_runs_apps() {
    let session = Session::boot(&MemoryStorage::new());

    assert_eq!(
        session.run("install aurora.echo hi there"),
        "installed echo.app at root/echo\n"
    );
    assert_eq!(session.run("run echo"), "hi there\n");
    assert_eq!(session.run("run echo.app bye"), "bye\n");

    session.run("install aurora.counter 3");
    assert_eq!(session.run("run counter"), "counter: 3\n");
    assert_eq!(session.run("run counter 5"), "counter: 5\n");

    let table = session.run("ps -a");
    assert_eq!(table.lines().filter(|l| l.contains("echo")).count(), 2);
    assert!(table.lines().filter(|l| l.contains("counter")).all(|l| l.contains("terminated")));
    let running = session.run("ps");
    assert_eq!(running.lines().count(), 2);
    assert!(running.contains("shell"));
}

#[test]
fn test_app_reads_input_under_the_shell() {
    let ask = executable(|ctx| async move {
        let answer = ctx.read_line("name? ").await.unwrap_or_default();
        ctx.print(&format!("got {}\n", answer));
        0
    });
    let session = Session::boot_with(KernelConfig::default().register_app("test.ask", "ask", "1", ask));

    session.run("install test.ask");
    let started = session.run("run ask");
    assert!(started.starts_with("name? ["), "{}", started);
    assert!(started.ends_with("] ask running\n"), "{}", started);
    assert_eq!(session.io.waiting_readers(), 2);

    assert_eq!(session.run("ada"), "got ada\n");
    assert_eq!(session.io.waiting_readers(), 1);
    assert!(!session.run("ps").contains("ask"));
    assert_eq!(session.run("echo back"), "back\n");
}

#[test]
fn test_shell_memory_and_exit() {
    let session = Session::boot(&MemoryStorage::new());

    assert_eq!(session.run("mem get 0"), "(empty)\n");
    assert_eq!(session.run("mem set 0 42"), "");
    assert_eq!(session.run("mem get 0"), "42\n");
    assert_eq!(session.run("mem set 1 plain text"), "");
    assert_eq!(session.run("mem get 1"), "\"plain text\"\n");

    let shell = session.kernel.bootstrap_pid().unwrap();
    assert_eq!(
        session.kernel.read_process_memory(shell, 0).unwrap(),
        Some(json!(42))
    );

    session.run("exit 3");
    let info = session.kernel.processes().process(shell).unwrap();
    assert_eq!(info.status, ProcessStatus::Terminated);
    assert_eq!(info.exit_code, Some(3));
    assert!(!session.kernel.has_running_processes());
}

#[test]
fn test_shell_state_survives_reboot() {
    let storage = MemoryStorage::new();
    {
        let session = Session::boot(&storage);
        session.run("mkdir docs");
        session.run("write docs/notes.txt kept");
        session.run("cd docs");
        session.run("install aurora.echo from disk");
        session.kernel.shutdown();
    }

    let session = Session::boot(&storage);
    assert_eq!(session.run("cat docs/notes.txt"), "kept\n");
    assert_eq!(session.run("ls docs"), "notes.txt\necho.app\n");
    assert_eq!(session.run("run docs/echo"), "from disk\n");
}

#[test]
fn test_deep_nesting_is_capped_and_boots_again() {
    let storage = MemoryStorage::new();
    {
        let session = Session::boot(&storage);
        let mut refused = 0;
        for _ in 0..70 {
            let out = session.run("mkdir d");
            if out.is_empty() {
                session.run("cd d");
            } else {
                assert!(out.contains("exceeds the limit of 60"), "{}", out);
                refused += 1;
            }
        }
        assert_eq!(refused, 10);
        session.kernel.shutdown();
    }

    let session = Session::boot(&storage);
    assert_eq!(session.run("ls"), "d/\n");
    let deepest = vec!["d"; 60].join("/");
    assert_eq!(session.run(&format!("ls {}", deepest)), "");
}

#[test]
fn test_shutdown_ends_the_shell() {
    let session = Session::boot(&MemoryStorage::new());
    assert!(session.kernel.has_running_processes());

    session.kernel.shutdown();
    assert!(!session.kernel.has_running_processes());
    let shell = session.kernel.bootstrap_pid().unwrap();
    assert_eq!(
        session.kernel.processes().process(shell).unwrap().exit_code,
        Some(0)
    );
}
