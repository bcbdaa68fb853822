//! Installation lifecycle for Greengrass Lite on a device.
//!
//! # States
//!
//! ```text
//! NotInstalled ──install──▶ Installing ──launched─▶ Stabilizing ──started──▶ Running ──stop──▶ Stopped
//!                               │                        │
//!                               └────────────────────────┴──────▶ Failed
//! ```
//!
//! `Failed` and `Stopped` are terminal. Nothing is retried automatically.

mod orchestrator;
mod params;

pub use orchestrator::{Orchestrator, ServiceStatus};
pub use params::{installer_arguments, InstallationParameters};

use std::fmt;
use std::time::Duration;

/// Where an installation attempt currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    NotInstalled,
    Installing,
    Stabilizing,
    Running,
    Failed,
    Stopped,
}

impl InstallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, InstallState::Failed | InstallState::Stopped)
    }
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstallState::NotInstalled => "not installed",
            InstallState::Installing => "installing",
            InstallState::Stabilizing => "stabilizing",
            InstallState::Running => "running",
            InstallState::Failed => "failed",
            InstallState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// The step an installation failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStep {
    Install,
    Stabilize,
    StartService,
    StopService,
    /// Checking whether the service is already active.
    ProbeService,
}

impl fmt::Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstallStep::Install => "install",
            InstallStep::Stabilize => "stabilize",
            InstallStep::StartService => "start-service",
            InstallStep::StopService => "stop-service",
            InstallStep::ProbeService => "probe-service",
        };
        f.write_str(name)
    }
}

/// Timing for the install flow.
#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// Minimum time between launching the installer and starting the service.
    pub stabilization_floor: Duration,
    /// Delay between unit-registration probes once the floor has passed.
    pub poll_interval: Duration,
    /// Give up on stabilization after this long.
    pub max_wait: Duration,
    /// Timeout for systemctl start/stop/probe commands.
    pub service_command_timeout: Duration,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            stabilization_floor: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(300),
            service_command_timeout: Duration::from_secs(30),
        }
    }
}
