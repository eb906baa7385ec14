//! Platform Abstraction Layer
//!
//! Processes talk to the outside world through an `IoDevice`: a
//! line-oriented text device. Rendering and keyboard capture live on the
//! other side of this trait and are not part of the kernel.
//!
//! `read_line` is the only call that can suspend. It returns a future, and
//! the kernel's run loop parks the calling process until the device has a
//! line for it.

pub mod buffer;

pub use buffer::BufferedIo;

use futures::future::LocalBoxFuture;

/// A line-oriented text device
pub trait IoDevice {
    /// Write text to the device
    fn write(&self, text: &str);

    /// Show `prompt` and wait for the next line of input.
    ///
    /// Resolves to `None` once the device has been disposed and no
    /// buffered input remains.
    fn read_line(&self, prompt: &str) -> LocalBoxFuture<'_, Option<String>>;

    /// Clear the device's display
    fn clear(&self);

    /// Release the device; pending and future reads resolve to `None`
    fn dispose(&self);
}
