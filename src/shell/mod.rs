//! Shell - the bootstrap program
//!
//! An interactive command interpreter that runs as an ordinary process:
//! - reads a line, runs the command, prints the result, repeats
//! - waits for input by awaiting `read_line`; its working directory and
//!   status survive each wait inside the suspended future
//! - reaches the system only through its service capabilities
//!
//! `catalog()` lists every program the system can run, keyed by stable id.

pub mod builtins;
pub mod parser;
pub mod programs;

pub use builtins::{BuiltinResult, ShellState, execute as execute_builtin, is_builtin};
pub use parser::{Command, ParseError, parse};

use crate::kernel::app::{AppCatalog, executable};
use crate::kernel::{ExitCode, ProcessContext};

/// Catalog id of the shell
pub const SHELL_ID: &str = "aurora.shell";
/// Catalog id of `echo`
pub const ECHO_ID: &str = "aurora.echo";
/// Catalog id of `counter`
pub const COUNTER_ID: &str = "aurora.counter";

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The built-in executable catalog
pub fn catalog() -> AppCatalog {
    let mut catalog = AppCatalog::new();
    catalog.register(SHELL_ID, "shell", VERSION, executable(run_shell));
    catalog.register(ECHO_ID, "echo", VERSION, executable(programs::echo));
    catalog.register(COUNTER_ID, "counter", VERSION, executable(programs::counter));
    catalog
}

/// Shell process body
pub async fn run_shell(ctx: ProcessContext) -> ExitCode {
    let mut state = ShellState::new();

    if let Ok((name, version)) = ctx.kernel_identity() {
        ctx.print(&format!(
            "Welcome to {} {}. Type 'help' for commands.\n",
            name, version
        ));
    }

    loop {
        let Some(line) = ctx.read_line(&state.prompt()).await else {
            // Input closed
            return state.last_status;
        };

        let command = match parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                ctx.print(&format!("parse error: {}\n", e));
                state.last_status = 2;
                continue;
            }
        };

        match execute_builtin(&command, &mut state, &ctx) {
            BuiltinResult::Success(output) => {
                ctx.print(&output);
                state.last_status = 0;
            }
            BuiltinResult::Ok => state.last_status = 0,
            BuiltinResult::Error(message) => {
                ctx.print(&message);
                state.last_status = 1;
            }
            BuiltinResult::Clear => {
                ctx.io().clear();
                state.last_status = 0;
            }
            BuiltinResult::Exit(code) => return code,
        }
    }
}
