//! Shell commands
//!
//! Every command goes through the process's service capabilities; the shell
//! never touches kernel components directly. Paths are resolved against the
//! shell's working directory, which lives in `ShellState` and survives every
//! suspension of the shell process.

use super::parser::Command;
use crate::kernel::{
    ExitCode, ProcessContext, ProcessEntry, ServiceError, StartOutcome, app::APP_EXTENSION,
};
use crate::vfs::{NodeKind, NodeRef, path};
use serde_json::Value;

/// Result of executing a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltinResult {
    /// Command succeeded, output to display
    Success(String),
    /// Command succeeded, no output
    Ok,
    /// Command failed with error message
    Error(String),
    /// Clear the display
    Clear,
    /// Request to exit the shell with given code
    Exit(ExitCode),
}

/// Shell state carried across commands
#[derive(Debug, Clone)]
pub struct ShellState {
    /// Current working directory, as a full path
    pub cwd: String,
    /// Last command exit code
    pub last_status: ExitCode,
}

impl ShellState {
    pub fn new() -> Self {
        Self {
            cwd: path::ROOT_MARKER.to_string(),
            last_status: 0,
        }
    }

    pub fn prompt(&self) -> String {
        format!("{}$ ", self.cwd)
    }
}

impl Default for ShellState {
    fn default() -> Self {
        Self::new()
    }
}

const HELP: &str = "\
commands:
  help                      show this help
  echo <text>...            print text
  pwd                       print working directory
  cd [path]                 change directory
  ls [path]                 list a directory
  cat <file>                print a file
  mkdir <path>              create a directory
  touch <name[.ext]>        create an empty file
  write <file> <text>...    replace a file's content
  append <file> <text>...   append a line to a file
  rm <path>                 remove a file or directory
  ps [-a]                   list processes (-a: include terminated)
  mem get <i>               read a slot of this shell's memory
  mem set <i> <value>       write a slot (JSON, or plain text)
  install [id] [args]...    save a catalog program as an app file
  run <app> [args]...       start an app file
  uname                     kernel name and version
  time                      wall clock and uptime
  clear                     clear the screen
  exit [code]               leave the shell
";

/// Check if a command name is known to the shell
pub fn is_builtin(name: &str) -> bool {
    matches!(
        name,
        "help"
            | "echo"
            | "pwd"
            | "cd"
            | "ls"
            | "cat"
            | "mkdir"
            | "touch"
            | "write"
            | "append"
            | "rm"
            | "ps"
            | "mem"
            | "install"
            | "run"
            | "uname"
            | "time"
            | "clear"
            | "exit"
    )
}

/// Execute one command
pub fn execute(cmd: &Command, state: &mut ShellState, ctx: &ProcessContext) -> BuiltinResult {
    let result = match cmd.program.as_str() {
        "help" => Ok(BuiltinResult::Success(HELP.to_string())),
        "echo" => Ok(BuiltinResult::Success(format!("{}\n", cmd.rest(0)))),
        "pwd" => Ok(BuiltinResult::Success(format!("{}\n", state.cwd))),
        "cd" => builtin_cd(cmd, state, ctx),
        "ls" => builtin_ls(cmd, state, ctx),
        "cat" => builtin_cat(cmd, state, ctx),
        "mkdir" => builtin_mkdir(cmd, state, ctx),
        "touch" => builtin_touch(cmd, state, ctx),
        "write" => builtin_write(cmd, state, ctx, false),
        "append" => builtin_write(cmd, state, ctx, true),
        "rm" => builtin_rm(cmd, state, ctx),
        "ps" => builtin_ps(cmd, ctx),
        "mem" => builtin_mem(cmd, ctx),
        "install" => builtin_install(cmd, state, ctx),
        "run" => builtin_run(cmd, state, ctx),
        "uname" => builtin_uname(ctx),
        "time" => builtin_time(ctx),
        "clear" => Ok(BuiltinResult::Clear),
        "exit" => builtin_exit(cmd),
        other => Ok(BuiltinResult::Error(format!(
            "{}: command not found\n",
            other
        ))),
    };

    result.unwrap_or_else(|e| BuiltinResult::Error(format!("{}: {}\n", cmd.program, e)))
}

type CommandResult = Result<BuiltinResult, ServiceError>;

fn error(cmd: &Command, message: impl std::fmt::Display) -> CommandResult {
    Ok(BuiltinResult::Error(format!("{}: {}\n", cmd.program, message)))
}

fn usage(cmd: &Command, args: &str) -> CommandResult {
    error(cmd, format!("usage: {} {}", cmd.program, args))
}

/// Split `name.ext` at the last dot
fn split_extension(name: &str) -> (&str, &str) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, ext),
        _ => (name, ""),
    }
}

/// Resolve a path typed by the user.
///
/// Node names do not include extensions, but users often type them:
/// `cat notes.txt` finds the file `notes` with extension `txt`.
fn locate(ctx: &ProcessContext, state: &ShellState, input: &str) -> Result<Option<NodeRef>, ServiceError> {
    let full = path::resolve(&state.cwd, input);
    if let Some(node) = ctx.lookup(&full)? {
        return Ok(Some(node));
    }

    let Some((parent, last)) = path::split_last(&full) else {
        return Ok(None);
    };
    let (stem, ext) = split_extension(&last);
    if ext.is_empty() {
        return Ok(None);
    }
    let Some(dir) = ctx.lookup(&parent)? else {
        return Ok(None);
    };
    if ctx.node_kind(&dir)? != Some(NodeKind::Directory) {
        return Ok(None);
    }
    let found = ctx
        .list_dir(&dir)?
        .into_iter()
        .find(|e| e.kind == NodeKind::File && e.name == stem && e.extension == ext)
        .map(|e| NodeRef {
            fs: dir.fs.clone(),
            node: e.id,
        });
    Ok(found)
}

/// The directory `input` names, or an error message
fn locate_dir(
    ctx: &ProcessContext,
    state: &ShellState,
    input: &str,
) -> Result<Result<NodeRef, String>, ServiceError> {
    match locate(ctx, state, input)? {
        Some(node) if ctx.node_kind(&node)? == Some(NodeKind::Directory) => Ok(Ok(node)),
        Some(_) => Ok(Err(format!("{}: not a directory", input))),
        None => Ok(Err(format!("{}: no such file or directory", input))),
    }
}

/// The file `input` names, or an error message
fn locate_file(
    ctx: &ProcessContext,
    state: &ShellState,
    input: &str,
) -> Result<Result<NodeRef, String>, ServiceError> {
    match locate(ctx, state, input)? {
        Some(node) if ctx.node_kind(&node)? == Some(NodeKind::File) => Ok(Ok(node)),
        Some(_) => Ok(Err(format!("{}: is a directory", input))),
        None => Ok(Err(format!("{}: no such file or directory", input))),
    }
}

/// cd - change directory
fn builtin_cd(cmd: &Command, state: &mut ShellState, ctx: &ProcessContext) -> CommandResult {
    let target = cmd.args.first().map(String::as_str).unwrap_or(path::ROOT_MARKER);
    match locate_dir(ctx, state, target)? {
        Ok(dir) => {
            state.cwd = ctx
                .path_of(&dir)?
                .unwrap_or_else(|| path::resolve(&state.cwd, target));
            Ok(BuiltinResult::Ok)
        }
        Err(message) => error(cmd, message),
    }
}

/// ls - list directory
fn builtin_ls(cmd: &Command, state: &ShellState, ctx: &ProcessContext) -> CommandResult {
    let target = cmd.args.first().map(String::as_str).unwrap_or(".");
    let dir = match locate(ctx, state, target)? {
        Some(node) => node,
        None => return error(cmd, format!("{}: no such file or directory", target)),
    };

    if ctx.node_kind(&dir)? == Some(NodeKind::File) {
        return Ok(BuiltinResult::Success(format!("{}\n", target)));
    }

    let mut out = String::new();
    for entry in ctx.list_dir(&dir)? {
        match entry.kind {
            NodeKind::Directory => out.push_str(&format!("{}/\n", entry.name)),
            NodeKind::File => out.push_str(&format!("{}\n", entry.display_name())),
        }
    }
    Ok(BuiltinResult::Success(out))
}

/// cat - print file
fn builtin_cat(cmd: &Command, state: &ShellState, ctx: &ProcessContext) -> CommandResult {
    let Some(target) = cmd.args.first() else {
        return usage(cmd, "<file>");
    };
    match locate_file(ctx, state, target)? {
        Ok(file) => {
            let mut text = ctx.read_file(&file)?;
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            Ok(BuiltinResult::Success(text))
        }
        Err(message) => error(cmd, message),
    }
}

/// Parent directory and final name of a path that may not exist yet
fn parent_and_name(
    ctx: &ProcessContext,
    state: &ShellState,
    input: &str,
) -> Result<Result<(NodeRef, String), String>, ServiceError> {
    let full = path::resolve(&state.cwd, input);
    let Some((parent, name)) = path::split_last(&full) else {
        return Ok(Err(format!("{}: invalid name", input)));
    };
    if name == "." || name == ".." {
        return Ok(Err(format!("{}: invalid name", input)));
    }
    Ok(locate_dir(ctx, state, &parent)?.map(|dir| (dir, name)))
}

/// mkdir - create directory
fn builtin_mkdir(cmd: &Command, state: &ShellState, ctx: &ProcessContext) -> CommandResult {
    let Some(target) = cmd.args.first() else {
        return usage(cmd, "<path>");
    };
    match parent_and_name(ctx, state, target)? {
        Ok((parent, name)) => {
            ctx.mkdir(&parent, &name)?;
            Ok(BuiltinResult::Ok)
        }
        Err(message) => error(cmd, message),
    }
}

/// touch - create empty file
fn builtin_touch(cmd: &Command, state: &ShellState, ctx: &ProcessContext) -> CommandResult {
    let Some(target) = cmd.args.first() else {
        return usage(cmd, "<name[.ext]>");
    };
    if locate(ctx, state, target)?.is_some() {
        return Ok(BuiltinResult::Ok);
    }
    match parent_and_name(ctx, state, target)? {
        Ok((parent, name)) => {
            let (stem, ext) = split_extension(&name);
            ctx.touch(&parent, stem, ext)?;
            Ok(BuiltinResult::Ok)
        }
        Err(message) => error(cmd, message),
    }
}

/// write / append - set or extend file content, creating the file if needed
fn builtin_write(
    cmd: &Command,
    state: &ShellState,
    ctx: &ProcessContext,
    append: bool,
) -> CommandResult {
    let Some(target) = cmd.args.first() else {
        return usage(cmd, "<file> <text>...");
    };
    let text = cmd.rest(1);

    let file = match locate(ctx, state, target)? {
        Some(node) if ctx.node_kind(&node)? == Some(NodeKind::File) => node,
        Some(_) => return error(cmd, format!("{}: is a directory", target)),
        None => match parent_and_name(ctx, state, target)? {
            Ok((parent, name)) => {
                let (stem, ext) = split_extension(&name);
                ctx.touch(&parent, stem, ext)?
            }
            Err(message) => return error(cmd, message),
        },
    };

    if append {
        let current = ctx.read_file(&file)?;
        if !current.is_empty() && !current.ends_with('\n') {
            ctx.append_file(&file, "\n")?;
        }
        ctx.append_file(&file, &text)?;
    } else {
        ctx.write_file(&file, &text)?;
    }
    Ok(BuiltinResult::Ok)
}

/// rm - remove file or directory
fn builtin_rm(cmd: &Command, state: &ShellState, ctx: &ProcessContext) -> CommandResult {
    let Some(target) = cmd.args.first() else {
        return usage(cmd, "<path>");
    };
    let Some(node) = locate(ctx, state, target)? else {
        return error(cmd, format!("{}: no such file or directory", target));
    };

    // Refuse to remove the working directory or one of its ancestors
    if let Some(victim) = ctx.path_of(&node)? {
        let cwd = path::segments(&state.cwd);
        let doomed = path::segments(&victim);
        if cwd.starts_with(&doomed) {
            return error(cmd, format!("{}: is the working directory or above it", target));
        }
    }

    ctx.remove(&node)?;
    Ok(BuiltinResult::Ok)
}

fn format_process_table(entries: &[ProcessEntry]) -> String {
    let mut out = format!(
        "{:<6} {:<12} {:<10} {:<6} {}\n",
        "PID", "NAME", "STATUS", "PAGE", "EXIT"
    );
    for entry in entries {
        let info = &entry.info;
        let exit = info
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<6} {:<12} {:<10} {:<6} {}\n",
            info.pid.0,
            info.name,
            info.status.to_string(),
            info.memory_offset,
            exit
        ));
    }
    out
}

/// ps - list processes
fn builtin_ps(cmd: &Command, ctx: &ProcessContext) -> CommandResult {
    let all = cmd.args.iter().any(|a| a == "-a");
    let entries = if all {
        ctx.process_table()?
    } else {
        ctx.running_processes()?
    };
    Ok(BuiltinResult::Success(format_process_table(&entries)))
}

/// mem - read or write this process's memory
fn builtin_mem(cmd: &Command, ctx: &ProcessContext) -> CommandResult {
    let op = cmd.args.first().map(String::as_str);
    let index = cmd.args.get(1).and_then(|i| i.parse::<usize>().ok());

    match (op, index) {
        (Some("get"), Some(index)) => {
            let text = match ctx.mem_read(index)? {
                Some(value) => value.to_string(),
                None => "(empty)".to_string(),
            };
            Ok(BuiltinResult::Success(format!("{}\n", text)))
        }
        (Some("set"), Some(index)) if cmd.args.len() > 2 => {
            let raw = cmd.rest(2);
            let value = match serde_json::from_str::<Value>(&raw) {
                Ok(value) => value,
                Err(_) => Value::String(raw),
            };
            ctx.mem_write(index, value)?;
            Ok(BuiltinResult::Ok)
        }
        _ => usage(cmd, "get <index> | set <index> <value>"),
    }
}

/// install - save a catalog program as an app file in the working directory
fn builtin_install(cmd: &Command, state: &ShellState, ctx: &ProcessContext) -> CommandResult {
    let Some(id) = cmd.args.first() else {
        let mut out = String::from("available programs:\n");
        for id in ctx.catalog_ids()? {
            out.push_str(&format!("  {}\n", id));
        }
        return Ok(BuiltinResult::Success(out));
    };

    let app = ctx.catalog_application(id)?;
    let dir = match locate_dir(ctx, state, ".")? {
        Ok(dir) => dir,
        Err(message) => return error(cmd, message),
    };
    let file = ctx.save_app(&dir, app.clone(), cmd.args[1..].to_vec())?;
    let location = ctx
        .path_of(&file)?
        .unwrap_or_else(|| app.name().to_string());
    Ok(BuiltinResult::Success(format!(
        "installed {}.{} at {}\n",
        app.name(),
        APP_EXTENSION,
        location
    )))
}

/// run - start an app file
fn builtin_run(cmd: &Command, state: &ShellState, ctx: &ProcessContext) -> CommandResult {
    let Some(target) = cmd.args.first() else {
        return usage(cmd, "<app> [args]...");
    };
    let file = match locate_file(ctx, state, target)? {
        Ok(file) => file,
        Err(message) => return error(cmd, message),
    };

    let (app, stored_args) = ctx.load_app(&file)?;
    // Arguments on the command line replace the stored ones
    let args = if cmd.args.len() > 1 {
        cmd.args[1..].to_vec()
    } else {
        stored_args
    };

    let pid = ctx.create_process(app)?;
    match ctx.start_process(pid, args)? {
        StartOutcome::Exited(0) => Ok(BuiltinResult::Ok),
        StartOutcome::Exited(code) => Ok(BuiltinResult::Error(format!(
            "{}: exited with code {}\n",
            target, code
        ))),
        StartOutcome::Suspended => Ok(BuiltinResult::Success(format!(
            "[{}] {} running\n",
            pid.0, target
        ))),
        StartOutcome::AlreadyStarted => error(cmd, format!("{} already started", pid)),
    }
}

/// uname - kernel identity
fn builtin_uname(ctx: &ProcessContext) -> CommandResult {
    let (name, version) = ctx.kernel_identity()?;
    Ok(BuiltinResult::Success(format!("{} {}\n", name, version)))
}

/// time - wall clock and uptime
fn builtin_time(ctx: &ProcessContext) -> CommandResult {
    let now = ctx.now_ms()?;
    let uptime = ctx.uptime_ms()?;
    Ok(BuiltinResult::Success(format!(
        "now: {} ms since epoch\nuptime: {}.{:03} s\n",
        now,
        uptime / 1000,
        uptime % 1000
    )))
}

/// exit - leave the shell
fn builtin_exit(cmd: &Command) -> CommandResult {
    match cmd.args.first() {
        None => Ok(BuiltinResult::Exit(0)),
        Some(code) => match code.parse::<ExitCode>() {
            Ok(code) => Ok(BuiltinResult::Exit(code)),
            Err(_) => usage(cmd, "[code]"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("notes.txt"), ("notes", "txt"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", "gz"));
        assert_eq!(split_extension("plain"), ("plain", ""));
        assert_eq!(split_extension(".hidden"), (".hidden", ""));
    }

    #[test]
    fn test_is_builtin() {
        assert!(is_builtin("ls"));
        assert!(is_builtin("mem"));
        assert!(!is_builtin("vim"));
    }

    #[test]
    fn test_exit_codes() {
        let cmd = Command::new("exit");
        assert_eq!(builtin_exit(&cmd).unwrap(), BuiltinResult::Exit(0));
        let cmd = Command::new("exit").arg("3");
        assert_eq!(builtin_exit(&cmd).unwrap(), BuiltinResult::Exit(3));
        let cmd = Command::new("exit").arg("x");
        assert!(matches!(builtin_exit(&cmd).unwrap(), BuiltinResult::Error(_)));
    }

    #[test]
    fn test_process_table_format() {
        let table = format_process_table(&[]);
        assert!(table.starts_with("PID"));
        assert_eq!(table.lines().count(), 1);
    }

    #[test]
    fn test_prompt_shows_cwd() {
        let mut state = ShellState::new();
        assert_eq!(state.prompt(), "root$ ");
        state.cwd = "root/docs".into();
        assert_eq!(state.prompt(), "root/docs$ ");
    }
}
