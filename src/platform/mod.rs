//! Platform-specific command sets.
//!
//! `PlatformCommands` produces the exact remote command lines for one
//! platform family. The lines are the contract with the device and must
//! stay byte-for-byte stable; the orchestrator and log reader only decide
//! *when* to issue them.

mod linux;
mod systemd_base;

pub use linux::LinuxCommands;

use std::fmt;

use crate::channel::CommandChannel;
use crate::command::CommandInput;
use crate::error::PlatformError;
use crate::install::InstallationParameters;

/// Platform families the harness can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
}

impl Platform {
    /// Detect the platform of the device behind `channel` via `uname -s`.
    pub fn detect(channel: &CommandChannel) -> Result<Self, PlatformError> {
        let result = channel.execute_ok(&CommandInput::line("uname -s"))?;
        let platform = Self::from_uname(&result.stdout)?;
        tracing::info!(device = channel.device_name(), %platform, "detected platform");
        Ok(platform)
    }

    pub fn from_uname(kernel_name: &str) -> Result<Self, PlatformError> {
        match kernel_name.trim() {
            "Linux" => Ok(Platform::Linux),
            other => Err(PlatformError::Unsupported(other.to_string())),
        }
    }

    pub fn commands(self) -> Box<dyn PlatformCommands> {
        commands_for_platform(self)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Linux => f.write_str("linux"),
        }
    }
}

/// Command lines for managing Greengrass Lite on one platform family.
///
/// Elevated commands come back with the elevation flag already set.
/// Timeouts are left to the caller's configuration.
pub trait PlatformCommands: Send + Sync {
    fn platform(&self) -> Platform;

    // ═══════════════════════════════════════════════════════════════════════════
    // Installation
    // ═══════════════════════════════════════════════════════════════════════════

    /// Installer invocation for the given parameters (elevated).
    fn install_command(&self, params: &InstallationParameters) -> CommandInput;

    /// Managed service unit (e.g. `greengrass-lite.target`).
    fn service_unit(&self) -> &str;

    // ═══════════════════════════════════════════════════════════════════════════
    // Service Management
    // ═══════════════════════════════════════════════════════════════════════════

    /// Restart/start the managed service (elevated).
    fn start_service_command(&self) -> CommandInput;

    /// Stop the managed service (elevated).
    fn stop_service_command(&self) -> CommandInput;

    /// Succeeds once the installer has registered the service unit.
    fn unit_registered_command(&self) -> CommandInput;

    /// Succeeds while the service unit is active.
    fn unit_active_command(&self) -> CommandInput;

    /// Status of one deployed component's service (elevated).
    fn component_status_command(&self, component: &str) -> CommandInput;

    // ═══════════════════════════════════════════════════════════════════════════
    // Logs
    // ═══════════════════════════════════════════════════════════════════════════

    /// Log query for `service`; `follow` keeps streaming new lines.
    fn service_logs_command(&self, service: &str, follow: bool) -> CommandInput;
}

/// Create the command set for a platform.
pub fn commands_for_platform(platform: Platform) -> Box<dyn PlatformCommands> {
    match platform {
        Platform::Linux => Box::new(LinuxCommands::new()),
    }
}
