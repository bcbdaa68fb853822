//! SSH transport built on the system `ssh` client in batch mode.
//!
//! The remote line is passed as a single argument after `--`, so the remote
//! login shell sees it exactly as rendered. `ssh` reserves exit status 255
//! for its own failures; that status is reported as a transport error, for
//! completed runs and spawned processes alike.

use std::io::BufRead;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use super::{process, Device, ProcessOutput, RemoteProcess};
use crate::command::CommandResult;
use crate::error::{DeviceError, Result};

/// Exit status `ssh` uses when the connection itself failed.
const SSH_TRANSPORT_EXIT: i32 = 255;

/// Connection details for an ssh target.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout: Duration,
}

pub struct SshDevice {
    target: SshTarget,
    name: String,
}

impl SshDevice {
    pub fn new(target: SshTarget) -> Self {
        let name = format!("{}@{}", target.user, target.host);
        Self { target, name }
    }

    /// Arguments passed to the `ssh` binary for `line`.
    pub fn ssh_args(&self, line: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.target.connect_timeout.as_secs().max(1)),
            "-p".to_string(),
            self.target.port.to_string(),
        ];
        if let Some(key) = &self.target.identity_file {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args.push(self.name.clone());
        args.push("--".to_string());
        args.push(line.to_string());
        args
    }

    fn ssh(&self, line: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(self.ssh_args(line));
        cmd
    }
}

impl Device for SshDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_root(&self) -> bool {
        self.target.user == "root"
    }

    fn run(&self, line: &str, timeout: Duration) -> Result<CommandResult> {
        let result = process::run_with_timeout(&self.name, line, self.ssh(line), timeout)?;
        if result.exit_code == SSH_TRANSPORT_EXIT {
            return Err(DeviceError::transport(
                &self.name,
                line,
                result.stderr.trim(),
            ));
        }
        Ok(result)
    }

    fn spawn(&self, line: &str, output: ProcessOutput) -> Result<Box<dyn RemoteProcess>> {
        let inner = process::spawn(&self.name, line, self.ssh(line), output)?;
        Ok(Box::new(SshProcess {
            device: self.name.clone(),
            inner,
        }))
    }
}

/// A spawned `ssh` whose exit status 255 means the connection failed.
struct SshProcess {
    device: String,
    inner: Box<dyn RemoteProcess>,
}

impl SshProcess {
    fn classify(&self, code: i32) -> Result<i32> {
        if code != SSH_TRANSPORT_EXIT {
            return Ok(code);
        }
        let tail = self.inner.output_tail();
        let reason = match tail.last() {
            Some(last) => format!("ssh exited with {}: {}", SSH_TRANSPORT_EXIT, last),
            None => format!("ssh exited with {}", SSH_TRANSPORT_EXIT),
        };
        Err(DeviceError::transport(&self.device, self.inner.command(), reason))
    }
}

impl RemoteProcess for SshProcess {
    fn command(&self) -> &str {
        self.inner.command()
    }

    fn take_stdout(&mut self) -> Option<Box<dyn BufRead + Send>> {
        self.inner.take_stdout()
    }

    fn try_exit_code(&mut self) -> Result<Option<i32>> {
        match self.inner.try_exit_code()? {
            Some(code) => self.classify(code).map(Some),
            None => Ok(None),
        }
    }

    fn wait(&mut self) -> Result<i32> {
        let code = self.inner.wait()?;
        self.classify(code)
    }

    fn kill(&mut self) -> Result<()> {
        self.inner.kill()
    }

    fn output_tail(&self) -> Vec<String> {
        self.inner.output_tail()
    }
}
