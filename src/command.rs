//! Command values passed to and returned from a device.
//!
//! A `CommandInput` is built once per call and never mutated afterwards.
//! Elevating a command produces a new value (`as_root`).

use std::path::{Path, PathBuf};
use std::time::Duration;

/// A single command request for a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInput {
    line: String,
    args: Vec<String>,
    working_directory: Option<PathBuf>,
    timeout: Option<Duration>,
    elevated: bool,
}

impl CommandInput {
    pub fn builder() -> CommandInputBuilder {
        CommandInputBuilder::default()
    }

    /// Shorthand for a bare command line with no extra arguments.
    pub fn line(line: impl Into<String>) -> Self {
        Self::builder().line(line).build()
    }

    pub fn command_line(&self) -> &str {
        &self.line
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn working_directory(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_elevated(&self) -> bool {
        self.elevated
    }

    /// Copy of this input that runs with root privileges.
    pub fn as_root(&self) -> Self {
        Self {
            elevated: true,
            ..self.clone()
        }
    }

    /// Copy of this input with a different timeout.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self.clone()
        }
    }

    /// `line` followed by `args`, joined by single spaces.
    ///
    /// Quoting is the caller's job; tokens are passed through verbatim.
    pub fn body(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(self.args.len() + 1);
        if !self.line.is_empty() {
            parts.push(&self.line);
        }
        parts.extend(self.args.iter().map(String::as_str).filter(|a| !a.is_empty()));
        parts.join(" ")
    }
}

/// Builder for [`CommandInput`].
#[derive(Debug, Default)]
pub struct CommandInputBuilder {
    line: String,
    args: Vec<String>,
    working_directory: Option<PathBuf>,
    timeout: Option<Duration>,
    elevated: bool,
}

impl CommandInputBuilder {
    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.line = line.into();
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn elevated(mut self, elevated: bool) -> Self {
        self.elevated = elevated;
        self
    }

    pub fn build(self) -> CommandInput {
        CommandInput {
            line: self.line,
            args: self.args,
            working_directory: self.working_directory,
            timeout: self.timeout,
            elevated: self.elevated,
        }
    }
}

/// Outcome of a command that ran to completion on a device.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// The exact line the device ran.
    pub command: String,
    /// Exit code (0 = success, -1 when killed by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout split into lines, in emission order.
    pub fn lines(&self) -> Vec<String> {
        self.stdout.lines().map(str::to_string).collect()
    }

    /// Stdout and stderr combined for error reports.
    pub fn combined_output(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Quote a token for a POSIX shell, leaving plain words untouched.
pub fn shell_quote(token: &str) -> String {
    let plain = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:,@%".contains(c));
    if plain {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', "'\\''"))
    }
}
