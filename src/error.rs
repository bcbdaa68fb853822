//! Error types for device commands, installation and log retrieval.
//!
//! Transport problems (the device could not be reached or the process could
//! not be driven) are kept apart from command failures (the device ran the
//! command and it exited non-zero) and from timeouts.

use std::time::Duration;
use thiserror::Error;

use crate::install::{InstallState, InstallStep};

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("transport to {device} failed running `{command}`: {reason}")]
    Transport {
        device: String,
        command: String,
        reason: String,
    },

    #[error("command failed (exit {exit_code}): {command}\nOutput: {output}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("command timed out after {}s: {command}", timeout.as_secs_f64())]
    Timeout { command: String, timeout: Duration },
}

impl DeviceError {
    pub(crate) fn transport(device: &str, command: &str, reason: impl ToString) -> Self {
        DeviceError::Transport {
            device: device.to_string(),
            command: command.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("{step} step failed: {source}")]
    Step {
        step: InstallStep,
        #[source]
        source: DeviceError,
    },

    #[error("installer `{command}` exited early with code {exit_code}\nOutput: {output}")]
    InstallerExited {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("{unit} not registered after {}s", waited.as_secs())]
    StabilizationTimeout { unit: String, waited: Duration },

    #[error("cannot {action} while installation is {state}")]
    InvalidState {
        action: &'static str,
        state: InstallState,
    },
}

#[derive(Error, Debug)]
pub enum LogError {
    #[error("log query for {service} failed (exit {exit_code}): {stderr}")]
    QueryFailed {
        service: String,
        exit_code: i32,
        stderr: String,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("could not start log follower for {service}: {source}")]
    Spawn {
        service: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("unsupported platform: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

pub type Result<T, E = DeviceError> = std::result::Result<T, E>;
