//! Command channel to one device.
//!
//! Renders [`CommandInput`] values into shell lines (working directory,
//! elevation), applies the default timeout, and serializes commands so two
//! callers never interleave script invocations on the same device.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::command::{shell_quote, CommandInput, CommandResult};
use crate::device::{Device, ProcessOutput, RemoteProcess};
use crate::error::{DeviceError, Result};

/// Defaults applied to every command issued through a channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Timeout used when a `CommandInput` does not carry one.
    pub default_timeout: Duration,
    /// Command prefixed to elevated lines.
    pub elevation_prefix: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            elevation_prefix: "sudo".to_string(),
        }
    }
}

/// Serialized command access to a single device.
///
/// Clones share the device and its lock.
#[derive(Clone)]
pub struct CommandChannel {
    device: Arc<dyn Device>,
    config: ChannelConfig,
    serial: Arc<Mutex<()>>,
}

impl CommandChannel {
    pub fn new(device: Arc<dyn Device>, config: ChannelConfig) -> Self {
        Self {
            device,
            config,
            serial: Arc::new(Mutex::new(())),
        }
    }

    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// The exact line the device will run for `input`.
    pub fn render(&self, input: &CommandInput) -> String {
        let mut body = input.body();
        if input.is_elevated() && !self.device.is_root() && !self.config.elevation_prefix.is_empty()
        {
            body = format!("{} {}", self.config.elevation_prefix, body);
        }
        match input.working_directory() {
            Some(dir) => format!("cd {} && {}", shell_quote(&dir.display().to_string()), body),
            None => body,
        }
    }

    /// Execute a command and capture output + exit code.
    ///
    /// A non-zero exit is returned as a result; use [`Self::execute_ok`]
    /// when it should be an error.
    pub fn execute(&self, input: &CommandInput) -> Result<CommandResult> {
        let line = self.render(input);
        let timeout = input.timeout().unwrap_or(self.config.default_timeout);

        let _guard = self.lock();
        tracing::debug!(device = self.device.name(), command = %line, "executing");
        let result = self.device.run(&line, timeout)?;
        tracing::debug!(
            device = self.device.name(),
            command = %line,
            exit_code = result.exit_code,
            elapsed_ms = result.duration.as_millis() as u64,
            "finished"
        );
        Ok(result)
    }

    /// Execute a command that's expected to succeed.
    pub fn execute_ok(&self, input: &CommandInput) -> Result<CommandResult> {
        let result = self.execute(input)?;
        if !result.success() {
            return Err(DeviceError::CommandFailed {
                command: result.command.clone(),
                exit_code: result.exit_code,
                output: result.combined_output(),
            });
        }
        Ok(result)
    }

    pub fn execute_as_root(&self, input: &CommandInput) -> Result<CommandResult> {
        self.execute(&input.as_root())
    }

    pub fn execute_as_root_ok(&self, input: &CommandInput) -> Result<CommandResult> {
        self.execute_ok(&input.as_root())
    }

    /// Launch a command and return as soon as it has started.
    ///
    /// The input's timeout does not apply; the process runs until it exits
    /// on its own. Only the last lines of its output are kept. Dropping the
    /// handle detaches it.
    pub fn execute_in_background(&self, input: &CommandInput) -> Result<BackgroundProcess> {
        let line = self.render(input);
        let _guard = self.lock();
        tracing::debug!(device = self.device.name(), command = %line, "launching in background");
        let process = self.device.spawn(&line, ProcessOutput::Tail)?;
        Ok(BackgroundProcess {
            process: Some(process),
            started: Instant::now(),
        })
    }

    pub fn execute_in_background_as_root(&self, input: &CommandInput) -> Result<BackgroundProcess> {
        self.execute_in_background(&input.as_root())
    }

    /// Spawn a streaming process with readable stdout.
    pub(crate) fn spawn_streaming(&self, input: &CommandInput) -> Result<Box<dyn RemoteProcess>> {
        let line = self.render(input);
        let _guard = self.lock();
        tracing::debug!(device = self.device.name(), command = %line, "spawning stream");
        self.device.spawn(&line, ProcessOutput::Piped)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // The guarded value is `()`, so a poisoned lock carries no broken state.
        self.serial.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle to a command launched with
/// [`CommandChannel::execute_in_background`].
pub struct BackgroundProcess {
    process: Option<Box<dyn RemoteProcess>>,
    started: Instant,
}

impl BackgroundProcess {
    pub fn command(&self) -> &str {
        self.process.as_ref().map(|p| p.command()).unwrap_or_default()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Last lines of stdout and stderr seen so far, oldest first.
    pub fn output_tail(&self) -> Vec<String> {
        self.process
            .as_ref()
            .map(|p| p.output_tail())
            .unwrap_or_default()
    }

    /// Exit code if the process has already finished.
    pub fn try_exit_code(&mut self) -> Result<Option<i32>> {
        match self.process.as_mut() {
            Some(p) => p.try_exit_code(),
            None => Ok(None),
        }
    }

    /// Block until the process exits.
    pub fn wait(mut self) -> Result<i32> {
        match self.process.take() {
            Some(mut p) => p.wait(),
            None => Ok(-1),
        }
    }
}

impl Drop for BackgroundProcess {
    fn drop(&mut self) {
        let Some(mut process) = self.process.take() else {
            return;
        };
        if let Ok(Some(_)) = process.try_exit_code() {
            return;
        }
        // Reap in the background so the child does not linger as a zombie.
        let spawned = thread::Builder::new()
            .name("background-reaper".to_string())
            .spawn(move || match process.wait() {
                Ok(code) => tracing::debug!(
                    command = process.command(),
                    exit_code = code,
                    "background command exited"
                ),
                Err(e) => tracing::warn!(error = %e, "background command could not be reaped"),
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "could not start background reaper");
        }
    }
}
