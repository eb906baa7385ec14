//! aurora CLI - run the system on a terminal
//!
//! Lines from stdin are fed to the kernel's I/O device; whatever processes
//! write is copied to stdout. With `--state-dir` the filesystem survives
//! between runs.

use anyhow::{Context, Result};
use aurora::kernel::{Kernel, KernelConfig};
use aurora::platform::BufferedIo;
use aurora::vfs::{DirStorage, MemoryStorage, Storage};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::rc::Rc;

#[derive(Parser, Debug)]
#[command(name = "aurora", version, about = "A simulated mini-OS")]
struct Args {
    /// Directory for filesystem snapshots (in-memory when omitted)
    #[arg(short, long)]
    state_dir: Option<PathBuf>,

    /// Id of the filesystem to mount
    #[arg(long, default_value = aurora::kernel::DEFAULT_FS_ID)]
    fs_id: String,

    /// Kernel name shown at boot
    #[arg(long, default_value = aurora::kernel::DEFAULT_NAME)]
    name: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let storage: Rc<dyn Storage> = match &args.state_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating state directory {}", dir.display()))?;
            Rc::new(DirStorage::new(dir))
        }
        None => Rc::new(MemoryStorage::new()),
    };

    let device = Rc::new(BufferedIo::new());
    let config = KernelConfig::default()
        .name(args.name)
        .fs_id(args.fs_id)
        .storage(storage);
    let kernel = Kernel::boot(config, device.clone()).context("boot failed")?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut lines = stdin.lock().lines();

    loop {
        stdout.write_all(device.take_output().as_bytes())?;
        stdout.flush()?;

        if !kernel.has_running_processes() {
            break;
        }

        match lines.next() {
            Some(line) => {
                device.push_line(line.context("reading stdin")?);
                kernel.run_until_stalled();
            }
            None => {
                kernel.shutdown();
                stdout.write_all(device.take_output().as_bytes())?;
                writeln!(stdout)?;
                break;
            }
        }
    }

    Ok(())
}
