//! Shared systemd command lines.
//!
//! Platform variants that manage services through systemd compose this
//! struct and delegate to it.

use crate::command::{shell_quote, CommandInput};

pub struct SystemdBase;

impl SystemdBase {
    pub fn restart_cmd(&self, unit: &str) -> CommandInput {
        CommandInput::builder()
            .line("")
            .args(["systemctl", "restart", unit])
            .elevated(true)
            .build()
    }

    pub fn stop_cmd(&self, unit: &str) -> CommandInput {
        CommandInput::builder()
            .line(format!("systemctl stop {}", unit))
            .elevated(true)
            .build()
    }

    pub fn unit_exists_cmd(&self, unit: &str) -> CommandInput {
        CommandInput::line(format!("systemctl cat {}", unit))
    }

    pub fn is_active_cmd(&self, unit: &str) -> CommandInput {
        CommandInput::line(format!("systemctl is-active --quiet {}", unit))
    }

    pub fn status_cmd(&self, unit: &str) -> CommandInput {
        CommandInput::builder()
            .line(format!("systemctl status {}", unit))
            .elevated(true)
            .build()
    }

    pub fn journal_cmd(&self, unit: &str, follow: bool) -> CommandInput {
        let mut builder = CommandInput::builder()
            .line("journalctl")
            .args(["-u".to_string(), shell_quote(unit)]);
        if follow {
            builder = builder.arg("-f");
        }
        builder.arg("--no-pager").build()
    }
}
