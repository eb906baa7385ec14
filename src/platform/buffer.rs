//! In-memory I/O device
//!
//! Input is a queue of lines pushed by whoever drives the kernel (a test, the
//! CLI); output accumulates in a buffer until taken. Readers queue up in
//! arrival order and each line goes to the oldest one still waiting, so a
//! child reading under the shell gets the next line before the shell does.

use super::IoDevice;
use futures::future::LocalBoxFuture;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

/// A parked `ReadLine`
struct Reader {
    ticket: u64,
    waker: Option<Waker>,
}

struct Inner {
    input: VecDeque<String>,
    output: String,
    readers: VecDeque<Reader>,
    next_ticket: u64,
    disposed: bool,
    echo: bool,
}

impl Inner {
    fn is_first(&self, ticket: Option<u64>) -> bool {
        match ticket {
            Some(ticket) => self.readers.front().is_some_and(|r| r.ticket == ticket),
            None => self.readers.is_empty(),
        }
    }

    /// Waker of the oldest reader, if a line is ready for it
    fn next_reader(&mut self) -> Option<Waker> {
        if self.input.is_empty() {
            return None;
        }
        self.readers.front_mut().and_then(|r| r.waker.take())
    }
}

/// Buffered line device
pub struct BufferedIo {
    inner: RefCell<Inner>,
}

impl BufferedIo {
    pub fn new() -> Self {
        Self {
            inner: RefCell::new(Inner {
                input: VecDeque::new(),
                output: String::new(),
                readers: VecDeque::new(),
                next_ticket: 0,
                disposed: false,
                echo: false,
            }),
        }
    }

    /// Echo consumed input lines into the output, like a terminal would
    pub fn with_echo(self) -> Self {
        self.inner.borrow_mut().echo = true;
        self
    }

    /// Queue a line of input and wake the oldest reader, if any
    pub fn push_line(&self, line: impl Into<String>) {
        let waiter = {
            let mut inner = self.inner.borrow_mut();
            inner.input.push_back(line.into());
            inner.next_reader()
        };
        if let Some(waker) = waiter {
            waker.wake();
        }
    }

    /// Queue several lines at once
    pub fn push_lines<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for line in lines {
            self.push_line(line);
        }
    }

    /// Take everything written so far
    pub fn take_output(&self) -> String {
        std::mem::take(&mut self.inner.borrow_mut().output)
    }

    /// Peek at the output without consuming it
    pub fn output(&self) -> String {
        self.inner.borrow().output.clone()
    }

    /// True when a reader is parked waiting for input
    pub fn is_waiting(&self) -> bool {
        let inner = self.inner.borrow();
        !inner.readers.is_empty() && inner.input.is_empty()
    }

    /// Number of parked readers
    pub fn waiting_readers(&self) -> usize {
        self.inner.borrow().readers.len()
    }

    /// Number of input lines not yet consumed
    pub fn pending_input(&self) -> usize {
        self.inner.borrow().input.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.borrow().disposed
    }
}

impl Default for BufferedIo {
    fn default() -> Self {
        Self::new()
    }
}

impl IoDevice for BufferedIo {
    fn write(&self, text: &str) {
        self.inner.borrow_mut().output.push_str(text);
    }

    fn read_line(&self, prompt: &str) -> LocalBoxFuture<'_, Option<String>> {
        self.write(prompt);
        Box::pin(ReadLine {
            device: self,
            ticket: None,
        })
    }

    fn clear(&self) {
        self.inner.borrow_mut().output.clear();
    }

    fn dispose(&self) {
        let waiters: Vec<Waker> = {
            let mut inner = self.inner.borrow_mut();
            inner.disposed = true;
            inner.readers.iter_mut().filter_map(|r| r.waker.take()).collect()
        };
        for waker in waiters {
            waker.wake();
        }
    }
}

/// Future for the next input line
///
/// Holds a ticket in the reader queue from its first `Pending` until it
/// completes or is dropped.
struct ReadLine<'a> {
    device: &'a BufferedIo,
    ticket: Option<u64>,
}

impl Future for ReadLine<'_> {
    type Output = Option<String>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let device = self.device;
        let mut inner = device.inner.borrow_mut();

        if inner.is_first(self.ticket) {
            if let Some(line) = inner.input.pop_front() {
                if self.ticket.take().is_some() {
                    inner.readers.pop_front();
                }
                if inner.echo {
                    inner.output.push_str(&line);
                    inner.output.push('\n');
                }
                let next = inner.next_reader();
                drop(inner);
                if let Some(waker) = next {
                    waker.wake();
                }
                return Poll::Ready(Some(line));
            }
        }

        if inner.disposed && inner.input.is_empty() {
            if let Some(ticket) = self.ticket.take() {
                inner.readers.retain(|r| r.ticket != ticket);
            }
            return Poll::Ready(None);
        }

        let waker = Some(cx.waker().clone());
        match self.ticket {
            Some(ticket) => {
                if let Some(reader) = inner.readers.iter_mut().find(|r| r.ticket == ticket) {
                    reader.waker = waker;
                }
            }
            None => {
                let ticket = inner.next_ticket;
                inner.next_ticket += 1;
                inner.readers.push_back(Reader { ticket, waker });
                self.ticket = Some(ticket);
            }
        }
        Poll::Pending
    }
}

impl Drop for ReadLine<'_> {
    fn drop(&mut self) {
        let Some(ticket) = self.ticket else {
            return;
        };
        let next = {
            let mut inner = self.device.inner.borrow_mut();
            inner.readers.retain(|r| r.ticket != ticket);
            inner.next_reader()
        };
        if let Some(waker) = next {
            waker.wake();
        }
    }
}
