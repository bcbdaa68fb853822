//! Device transports.
//!
//! A `Device` runs a fully rendered shell line on one target. Everything
//! above this layer (elevation, working directories, timeouts defaults,
//! serialization) lives in [`crate::channel::CommandChannel`].

mod local;
mod process;
mod ssh;

pub use local::LocalDevice;
pub use ssh::{SshDevice, SshTarget};

use crate::command::CommandResult;
use crate::error::Result;
use std::io::BufRead;
use std::time::Duration;

/// What to do with the output of a spawned process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutput {
    /// Keep stdout readable through [`RemoteProcess::take_stdout`].
    Piped,
    /// Drain stdout and stderr, keeping only the last lines for
    /// [`RemoteProcess::output_tail`] (long-running installers and daemons).
    Tail,
}

/// Transport to a single target device.
pub trait Device: Send + Sync {
    /// Display name used in logs and errors (e.g. `pi@10.0.0.5`).
    fn name(&self) -> &str;

    /// Whether commands already run as root, making elevation a no-op.
    fn is_root(&self) -> bool;

    /// Run a line to completion, capturing stdout and stderr.
    ///
    /// A process still running after `timeout` is killed and
    /// `DeviceError::Timeout` is returned. A non-zero exit code is not an
    /// error at this layer.
    fn run(&self, line: &str, timeout: Duration) -> Result<CommandResult>;

    /// Start a line without waiting for it.
    fn spawn(&self, line: &str, output: ProcessOutput) -> Result<Box<dyn RemoteProcess>>;
}

/// A process started with [`Device::spawn`].
pub trait RemoteProcess: Send {
    /// The line this process is running.
    fn command(&self) -> &str;

    /// Take the stdout reader. Returns `None` once taken, or when the
    /// process was spawned with [`ProcessOutput::Tail`].
    fn take_stdout(&mut self) -> Option<Box<dyn BufRead + Send>>;

    /// Exit code if the process has finished, without blocking.
    fn try_exit_code(&mut self) -> Result<Option<i32>>;

    /// Block until the process exits.
    fn wait(&mut self) -> Result<i32>;

    /// Terminate the process. Killing an exited process is not an error.
    fn kill(&mut self) -> Result<()>;

    /// Most recent stdout/stderr lines of a [`ProcessOutput::Tail`]
    /// process, oldest first. Empty for piped processes.
    fn output_tail(&self) -> Vec<String> {
        Vec::new()
    }
}
