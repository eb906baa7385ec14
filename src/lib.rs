//! aurora - A simulated mini-OS
//!
//! Everything runs inside one host process:
//! - `kernel`: memory arena, capability services, process manager, boot
//! - `vfs`: ONFS, the object-node filesystem, and its persistence
//! - `shell`: the bootstrap command interpreter and the app catalog
//! - `platform`: the I/O device seam between processes and the host
//!
//! Processes are futures. One that waits for input is parked and resumed
//! once a line arrives, so the whole system is single-threaded.

pub mod kernel;
pub mod platform;
pub mod shell;
pub mod vfs;

pub use kernel::{Kernel, KernelConfig, KernelError};
pub use platform::{BufferedIo, IoDevice};
