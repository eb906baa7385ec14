//! Small catalog programs
//!
//! These run as their own processes, started from app files with `run`.

use crate::kernel::{ExitCode, ProcessContext};
use serde_json::json;

/// Print the arguments and exit
pub async fn echo(ctx: ProcessContext) -> ExitCode {
    let line = format!("{}\n", ctx.args().join(" "));
    match ctx.write_out(&line) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

/// Increment slot 0 of this process's memory `n` times (default 1) and
/// print the final value
pub async fn counter(ctx: ProcessContext) -> ExitCode {
    let times = match ctx.args().first() {
        Some(arg) => match arg.parse::<u64>() {
            Ok(n) => n,
            Err(_) => {
                ctx.print(&format!("counter: not a number: {}\n", arg));
                return 2;
            }
        },
        None => 1,
    };

    let memory = ctx.memory();
    for _ in 0..times {
        let current = memory.read(0).and_then(|v| v.as_u64()).unwrap_or(0);
        if !memory.write(0, json!(current + 1)) {
            return 1;
        }
    }

    let value = memory.read(0).and_then(|v| v.as_u64()).unwrap_or(0);
    ctx.print(&format!("counter: {}\n", value));
    0
}
