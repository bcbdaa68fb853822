//! Local transport: runs lines with `sh -c` on this host.
//!
//! Used when the harness runs on the device under test, and by the tests.

use std::process::Command;
use std::time::Duration;

use super::{process, Device, ProcessOutput, RemoteProcess};
use crate::command::CommandResult;
use crate::error::Result;

pub struct LocalDevice {
    name: String,
}

impl LocalDevice {
    pub fn new() -> Self {
        Self {
            name: "localhost".to_string(),
        }
    }

    fn shell(line: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(line);
        cmd
    }
}

impl Default for LocalDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for LocalDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_root(&self) -> bool {
        // SAFETY: geteuid has no preconditions and cannot fail.
        unsafe { libc::geteuid() == 0 }
    }

    fn run(&self, line: &str, timeout: Duration) -> Result<CommandResult> {
        process::run_with_timeout(&self.name, line, Self::shell(line), timeout)
    }

    fn spawn(&self, line: &str, output: ProcessOutput) -> Result<Box<dyn RemoteProcess>> {
        process::spawn(&self.name, line, Self::shell(line), output)
    }
}
