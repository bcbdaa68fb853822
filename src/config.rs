//! Harness configuration file.
//!
//! TOML, every key optional:
//!
//! ```toml
//! [device]
//! kind = "ssh"
//! host = "192.168.1.40"
//! user = "ggtest"
//!
//! [install]
//! root_directory = "/greengrass"
//!
//! [install.installer_args]
//! "--thing-name" = "core-01"
//!
//! [cleanup]
//! persist = ["aws.resources"]
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::channel::ChannelConfig;
use crate::cleanup::{CleanupContext, PersistMode};
use crate::device::{Device, LocalDevice, SshDevice, SshTarget};
use crate::install::{InstallConfig, InstallationParameters};
use crate::logs::LogConfig;

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "GG_HARNESS_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    pub device: DeviceSection,
    pub commands: CommandsSection,
    pub install: InstallSection,
    pub logs: LogsSection,
    pub cleanup: CleanupSection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Local,
    Ssh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceSection {
    pub kind: DeviceKind,
    pub host: Option<String>,
    pub user: Option<String>,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            kind: DeviceKind::Local,
            host: None,
            user: None,
            port: 22,
            identity_file: None,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandsSection {
    pub default_timeout_secs: u64,
    pub elevation_prefix: String,
}

impl Default for CommandsSection {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            elevation_prefix: "sudo".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallSection {
    pub root_directory: PathBuf,
    pub installer_args: BTreeMap<String, String>,
    pub greengrass_parameters: BTreeMap<String, String>,
    pub stabilization_floor_secs: u64,
    pub poll_interval_secs: u64,
    pub max_wait_secs: u64,
    pub service_command_timeout_secs: u64,
}

impl Default for InstallSection {
    fn default() -> Self {
        Self {
            root_directory: PathBuf::from("/greengrass"),
            installer_args: BTreeMap::new(),
            greengrass_parameters: BTreeMap::new(),
            stabilization_floor_secs: 60,
            poll_interval_secs: 5,
            max_wait_secs: 300,
            service_command_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogsSection {
    pub elevated: bool,
    pub query_timeout_secs: u64,
}

impl Default for LogsSection {
    fn default() -> Self {
        Self {
            elevated: false,
            query_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CleanupSection {
    pub persist: Vec<PersistMode>,
}

impl HarnessConfig {
    /// Load from `path`, else from `$GG_HARNESS_CONFIG`.
    ///
    /// No path, or a path that does not exist, means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match std::env::var_os(CONFIG_ENV) {
                Some(p) => PathBuf::from(p),
                None => {
                    tracing::debug!("no config file given, using defaults");
                    return Ok(Self::default());
                }
            },
        };
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Reading config {}", path.display()))?;
        let config = Self::parse(&contents)
            .with_context(|| format!("Parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.device.kind == DeviceKind::Ssh && self.device.host.is_none() {
            bail!("[device] kind = \"ssh\" requires host");
        }
        if self.install.poll_interval_secs == 0 {
            bail!("[install] poll_interval_secs must be at least 1");
        }
        Ok(())
    }

    /// Build the device this config points at.
    pub fn to_device(&self) -> Result<Arc<dyn Device>> {
        let d = &self.device;
        match d.kind {
            DeviceKind::Local => Ok(Arc::new(LocalDevice::new())),
            DeviceKind::Ssh => {
                let host = d
                    .host
                    .clone()
                    .context("[device] kind = \"ssh\" requires host")?;
                let user = match &d.user {
                    Some(u) => u.clone(),
                    None => std::env::var("USER").unwrap_or_else(|_| "root".to_string()),
                };
                Ok(Arc::new(SshDevice::new(SshTarget {
                    host,
                    user,
                    port: d.port,
                    identity_file: d.identity_file.clone(),
                    connect_timeout: Duration::from_secs(d.connect_timeout_secs),
                })))
            }
        }
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            default_timeout: Duration::from_secs(self.commands.default_timeout_secs),
            elevation_prefix: self.commands.elevation_prefix.clone(),
        }
    }

    pub fn install_config(&self) -> InstallConfig {
        let i = &self.install;
        InstallConfig {
            stabilization_floor: Duration::from_secs(i.stabilization_floor_secs),
            poll_interval: Duration::from_secs(i.poll_interval_secs),
            max_wait: Duration::from_secs(i.max_wait_secs),
            service_command_timeout: Duration::from_secs(i.service_command_timeout_secs),
        }
    }

    pub fn install_parameters(&self) -> InstallationParameters {
        InstallationParameters {
            installer_args: self.install.installer_args.clone(),
            greengrass_parameters: self.install.greengrass_parameters.clone(),
            root_directory: self.install.root_directory.clone(),
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            elevated: self.logs.elevated,
            query_timeout: Duration::from_secs(self.logs.query_timeout_secs),
        }
    }

    pub fn cleanup_context(&self) -> CleanupContext {
        CleanupContext::from_modes(self.cleanup.persist.iter().copied())
    }
}
