//! Linux (systemd) command set for Greengrass Lite.

use super::systemd_base::SystemdBase;
use super::{Platform, PlatformCommands};
use crate::command::CommandInput;
use crate::install::{installer_arguments, InstallationParameters};

/// Installer script shipped in the Greengrass root directory.
pub const INSTALLER_SCRIPT: &str = "install-greengrass-lite.sh";

/// systemd target grouping the Greengrass Lite services.
pub const SERVICE_UNIT: &str = "greengrass-lite.target";

/// Linux command set.
pub struct LinuxCommands {
    base: SystemdBase,
}

impl LinuxCommands {
    pub fn new() -> Self {
        Self { base: SystemdBase }
    }
}

impl Default for LinuxCommands {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformCommands for LinuxCommands {
    fn platform(&self) -> Platform {
        Platform::Linux
    }

    fn install_command(&self, params: &InstallationParameters) -> CommandInput {
        let root = &params.root_directory;
        CommandInput::builder()
            .working_directory(root.clone())
            .line(root.join(INSTALLER_SCRIPT).display().to_string())
            .args(installer_arguments(params))
            .elevated(true)
            .build()
    }

    fn service_unit(&self) -> &str {
        SERVICE_UNIT
    }

    fn start_service_command(&self) -> CommandInput {
        self.base.restart_cmd(SERVICE_UNIT)
    }

    fn stop_service_command(&self) -> CommandInput {
        self.base.stop_cmd(SERVICE_UNIT)
    }

    fn unit_registered_command(&self) -> CommandInput {
        self.base.unit_exists_cmd(SERVICE_UNIT)
    }

    fn unit_active_command(&self) -> CommandInput {
        self.base.is_active_cmd(SERVICE_UNIT)
    }

    fn component_status_command(&self, component: &str) -> CommandInput {
        self.base.status_cmd(&format!("ggl.{}.service", component))
    }

    fn service_logs_command(&self, service: &str, follow: bool) -> CommandInput {
        self.base.journal_cmd(service, follow)
    }
}
