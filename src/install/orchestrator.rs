//! Install → stabilize → start sequencing over a command channel.

use std::thread;
use std::time::Duration;

use super::{InstallConfig, InstallState, InstallStep, InstallationParameters};
use crate::channel::{BackgroundProcess, CommandChannel};
use crate::error::{DeviceError, InstallError};
use crate::platform::PlatformCommands;

/// Marker `systemctl status` prints on its third line for a live unit.
const ACTIVE_RUNNING: &str = "Active: active (running)";

/// Status of a component's service unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Running,
    NotRunning,
}

/// Drives one installation attempt on one device.
pub struct Orchestrator {
    channel: CommandChannel,
    commands: Box<dyn PlatformCommands>,
    config: InstallConfig,
    state: InstallState,
}

impl Orchestrator {
    pub fn new(
        channel: CommandChannel,
        commands: Box<dyn PlatformCommands>,
        config: InstallConfig,
    ) -> Self {
        Self {
            channel,
            commands,
            config,
            state: InstallState::NotInstalled,
        }
    }

    pub fn state(&self) -> InstallState {
        self.state
    }

    /// Install and start Greengrass Lite.
    ///
    /// Launches the installer in the background, waits for the service unit
    /// to be registered (never sooner than the stabilization floor), then
    /// restarts the service. Ends in `Running` or `Failed`.
    pub fn install(&mut self, params: &InstallationParameters) -> Result<(), InstallError> {
        self.require(InstallState::NotInstalled, "install")?;

        let input = self.commands.install_command(params);
        self.transition(InstallState::Installing);
        let mut installer = match self.channel.execute_in_background(&input) {
            Ok(process) => process,
            Err(source) => return Err(self.fail(InstallStep::Install, source)),
        };

        self.transition(InstallState::Stabilizing);
        if let Err(e) = self.stabilize(&mut installer) {
            self.transition(InstallState::Failed);
            return Err(e);
        }

        let start = self
            .commands
            .start_service_command()
            .with_timeout(self.config.service_command_timeout);
        match self.channel.execute_ok(&start) {
            Ok(_) => {
                self.transition(InstallState::Running);
                Ok(())
            }
            Err(source) => Err(self.fail(InstallStep::StartService, source)),
        }
    }

    /// Stop the managed service. Only valid from `Running`.
    pub fn stop(&mut self) -> Result<(), InstallError> {
        self.require(InstallState::Running, "stop")?;

        let stop = self
            .commands
            .stop_service_command()
            .with_timeout(self.config.service_command_timeout);
        match self.channel.execute_ok(&stop) {
            Ok(_) => {
                self.transition(InstallState::Stopped);
                Ok(())
            }
            Err(source) => Err(self.fail(InstallStep::StopService, source)),
        }
    }

    /// Take over an installation that is already running on the device.
    ///
    /// Moves `NotInstalled` to `Running` when the service unit is active.
    /// Returns whether it did.
    pub fn adopt_running(&mut self) -> Result<bool, InstallError> {
        self.require(InstallState::NotInstalled, "adopt")?;
        let active = self
            .is_service_active()
            .map_err(|source| InstallError::Step {
                step: InstallStep::ProbeService,
                source,
            })?;
        if active {
            self.transition(InstallState::Running);
        }
        Ok(active)
    }

    /// Whether the managed service unit is currently active.
    pub fn is_service_active(&self) -> Result<bool, DeviceError> {
        let probe = self
            .commands
            .unit_active_command()
            .with_timeout(self.config.service_command_timeout);
        Ok(self.channel.execute(&probe)?.success())
    }

    /// Status of a deployed component's service (`ggl.<component>.service`).
    ///
    /// `systemctl status` exits non-zero for inactive units, so the exit
    /// code alone never fails this call; transport errors and timeouts do.
    pub fn service_status(&self, component: &str) -> Result<ServiceStatus, DeviceError> {
        let input = self
            .commands
            .component_status_command(component)
            .with_timeout(self.config.service_command_timeout);
        let result = self.channel.execute(&input)?;
        Ok(parse_service_status(&result.stdout))
    }

    fn stabilize(&self, installer: &mut BackgroundProcess) -> Result<(), InstallError> {
        let cfg = &self.config;
        let probe = self
            .commands
            .unit_registered_command()
            .with_timeout(cfg.service_command_timeout);
        let max_wait = cfg.max_wait.max(cfg.stabilization_floor);
        let mut installer_done = false;

        loop {
            if !installer_done {
                let exited = installer.try_exit_code().map_err(|source| InstallError::Step {
                    step: InstallStep::Install,
                    source,
                })?;
                match exited {
                    Some(0) => {
                        tracing::info!(command = installer.command(), "installer finished");
                        installer_done = true;
                    }
                    Some(exit_code) => {
                        tracing::warn!(
                            command = installer.command(),
                            exit_code,
                            "installer exited early"
                        );
                        return Err(InstallError::InstallerExited {
                            command: installer.command().to_string(),
                            exit_code,
                            output: installer.output_tail().join("\n"),
                        });
                    }
                    None => {}
                }
            }

            let elapsed = installer.elapsed();
            if elapsed < cfg.stabilization_floor {
                sleep_at_most(cfg.poll_interval, cfg.stabilization_floor - elapsed);
                continue;
            }

            if self.channel.execute(&probe).map_err(stabilize_step)?.success() {
                tracing::info!(
                    unit = self.commands.service_unit(),
                    waited_secs = elapsed.as_secs(),
                    "service unit registered"
                );
                return Ok(());
            }
            if elapsed >= max_wait {
                return Err(InstallError::StabilizationTimeout {
                    unit: self.commands.service_unit().to_string(),
                    waited: elapsed,
                });
            }
            sleep_at_most(cfg.poll_interval, max_wait - elapsed);
        }
    }

    fn require(&self, expected: InstallState, action: &'static str) -> Result<(), InstallError> {
        if self.state != expected {
            return Err(InstallError::InvalidState {
                action,
                state: self.state,
            });
        }
        Ok(())
    }

    fn fail(&mut self, step: InstallStep, source: DeviceError) -> InstallError {
        self.transition(InstallState::Failed);
        InstallError::Step { step, source }
    }

    fn transition(&mut self, next: InstallState) {
        tracing::info!(
            device = self.channel.device_name(),
            from = %self.state,
            to = %next,
            "installation state"
        );
        self.state = next;
    }
}

fn stabilize_step(source: DeviceError) -> InstallError {
    InstallError::Step {
        step: InstallStep::Stabilize,
        source,
    }
}

fn sleep_at_most(interval: Duration, remaining: Duration) {
    let nap = interval.min(remaining);
    if !nap.is_zero() {
        thread::sleep(nap);
    }
}

fn parse_service_status(stdout: &str) -> ServiceStatus {
    let running = stdout
        .lines()
        .nth(2)
        .is_some_and(|line| line.trim().contains(ACTIVE_RUNNING));
    if running {
        ServiceStatus::Running
    } else {
        ServiceStatus::NotRunning
    }
}
