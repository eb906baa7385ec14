//! Cooperative run loop for process bodies
//!
//! A started process is polled once, right away, by `launch`. If it has to
//! wait (usually for a line of input) its future is parked here, keyed by
//! pid, and polled again only after its waker fires.
//!
//! - No borrow of the parked table is held while a future runs, so a
//!   process may start other processes from inside its own poll
//! - Ready processes are polled in pid order, one pass per `tick`
//! - `run_until_stalled` ticks until no parked process is ready

use super::app::ExitCode;
use super::process::Pid;
use futures::future::LocalBoxFuture;
use futures::task::{ArcWake, waker};
use log::{debug, trace};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

const TARGET: &str = "aurora::process";

/// Pids whose wakers have fired since they were last polled
type ReadySet = Arc<Mutex<BTreeSet<Pid>>>;

/// Waker that marks one pid ready
struct ProcessWaker {
    pid: Pid,
    ready: ReadySet,
}

impl ArcWake for ProcessWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if let Ok(mut ready) = arc_self.ready.lock() {
            ready.insert(arc_self.pid);
        }
    }
}

/// Parked process futures and their readiness
pub struct Executor {
    parked: RefCell<BTreeMap<Pid, LocalBoxFuture<'static, ExitCode>>>,
    ready: ReadySet,
}

impl Executor {
    pub fn new() -> Self {
        Self {
            parked: RefCell::new(BTreeMap::new()),
            ready: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    fn waker_for(&self, pid: Pid) -> std::task::Waker {
        waker(Arc::new(ProcessWaker {
            pid,
            ready: self.ready.clone(),
        }))
    }

    /// Poll a freshly started process once.
    ///
    /// If it finishes, its exit code is returned. Otherwise it is parked
    /// until woken.
    pub fn launch(&self, pid: Pid, mut future: LocalBoxFuture<'static, ExitCode>) -> Poll<ExitCode> {
        let waker = self.waker_for(pid);
        let mut cx = Context::from_waker(&waker);
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(code) => Poll::Ready(code),
            Poll::Pending => {
                debug!(target: TARGET, "{} suspended", pid);
                self.parked.borrow_mut().insert(pid, future);
                Poll::Pending
            }
        }
    }

    /// Poll every ready process once.
    ///
    /// `on_exit` is called for each process that finishes, with no executor
    /// state borrowed. Returns the number of polls made.
    pub fn tick(&self, mut on_exit: impl FnMut(Pid, ExitCode)) -> usize {
        let ready: Vec<Pid> = match self.ready.lock() {
            Ok(mut ready) => std::mem::take(&mut *ready).into_iter().collect(),
            Err(_) => return 0,
        };

        let mut polled = 0;
        for pid in ready {
            // Take the future out so nothing is borrowed while it runs
            let Some(mut future) = self.parked.borrow_mut().remove(&pid) else {
                continue;
            };

            let waker = self.waker_for(pid);
            let mut cx = Context::from_waker(&waker);
            polled += 1;
            trace!(target: TARGET, "polling {}", pid);

            match future.as_mut().poll(&mut cx) {
                Poll::Ready(code) => on_exit(pid, code),
                Poll::Pending => {
                    self.parked.borrow_mut().insert(pid, future);
                }
            }
        }
        polled
    }

    /// Tick until no parked process is ready. Returns the total polls made.
    pub fn run_until_stalled(&self, mut on_exit: impl FnMut(Pid, ExitCode)) -> usize {
        let mut total = 0;
        while self.has_ready() {
            let polled = self.tick(&mut on_exit);
            if polled == 0 {
                // Only stale wakeups for pids that are not parked
                break;
            }
            total += polled;
        }
        total
    }

    /// True if some parked process has been woken
    pub fn has_ready(&self) -> bool {
        let parked = self.parked.borrow();
        match self.ready.lock() {
            Ok(ready) => ready.iter().any(|pid| parked.contains_key(pid)),
            Err(_) => false,
        }
    }

    /// Mark a parked process ready. Returns false if it is not parked.
    pub fn wake(&self, pid: Pid) -> bool {
        if !self.is_parked(pid) {
            return false;
        }
        self.waker_for(pid).wake();
        true
    }

    /// Drop a parked process's future without running it further
    pub fn cancel(&self, pid: Pid) -> bool {
        if let Ok(mut ready) = self.ready.lock() {
            ready.remove(&pid);
        }
        self.parked.borrow_mut().remove(&pid).is_some()
    }

    pub fn is_parked(&self, pid: Pid) -> bool {
        self.parked.borrow().contains_key(&pid)
    }

    pub fn parked_count(&self) -> usize {
        self.parked.borrow().len()
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}
