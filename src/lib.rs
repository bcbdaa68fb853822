//! Device test harness for Greengrass Lite.
//!
//! Drives a device (this machine or one reachable over SSH) through the
//! pieces an end-to-end test needs:
//! - a command channel with timeouts, elevation and background processes
//! - platform command sets that produce the exact remote command lines
//! - the install → stabilize → start → stop lifecycle
//! - batch and live service logs
//! - the cleanup policy applied at teardown
//!
//! Everything is synchronous. Long-running work (background installers,
//! log follows) runs on plain threads with handles the caller owns.

pub mod channel;
pub mod cleanup;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod install;
pub mod logs;
pub mod platform;

#[cfg(test)]
mod testing;

// Re-export commonly used items
pub use channel::{BackgroundProcess, ChannelConfig, CommandChannel};
pub use cleanup::{CleanupContext, CleanupContextBuilder, PersistMode};
pub use command::{CommandInput, CommandResult};
pub use config::HarnessConfig;
pub use device::{Device, LocalDevice, RemoteProcess, SshDevice, SshTarget};
pub use error::{DeviceError, InstallError, LogError, PlatformError};
pub use install::{
    InstallConfig, InstallState, InstallStep, InstallationParameters, Orchestrator, ServiceStatus,
};
pub use logs::{FollowEnd, FollowReport, HandlerFault, LogConfig, LogFollower, LogHandler, LogReader};
pub use platform::{commands_for_platform, LinuxCommands, Platform, PlatformCommands};
