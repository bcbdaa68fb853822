//! Scripted device for unit tests.
//!
//! Records every rendered line it receives and answers from a small rule
//! table: the most recently added rule whose pattern is a substring of the
//! line wins. Unmatched lines succeed with empty output.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::command::CommandResult;
use crate::device::{Device, ProcessOutput, RemoteProcess};
use crate::error::{DeviceError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Run,
    Spawn,
}

#[derive(Debug, Clone)]
pub(crate) struct Issued {
    pub kind: Kind,
    pub line: String,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Reply {
    exit_code: i32,
    stdout: String,
    stderr: String,
    unreachable: bool,
    timed_out: bool,
    running: bool,
    disconnects: bool,
}

impl Reply {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Self::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..Self::default()
        }
    }

    pub fn stdout(mut self, out: &str) -> Self {
        self.stdout = out.to_string();
        self
    }

    pub fn stderr(mut self, err: &str) -> Self {
        self.stderr = err.to_string();
        self
    }

    /// Spawned process loses its connection: polling it is a transport error.
    pub fn disconnects() -> Self {
        Self {
            disconnects: true,
            ..Self::default()
        }
    }

    /// Spawned process keeps running (and its stdout stays open) until killed.
    pub fn running(mut self) -> Self {
        self.running = true;
        self
    }
}

#[derive(Default)]
pub(crate) struct ScriptedDevice {
    root: bool,
    rules: Mutex<Vec<(String, VecDeque<Reply>)>>,
    issued: Mutex<Vec<Issued>>,
}

impl ScriptedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(mut self, root: bool) -> Self {
        self.root = root;
        self
    }

    pub fn on(&self, pattern: &str, reply: Reply) {
        self.on_sequence(pattern, vec![reply]);
    }

    /// Successive matching calls take replies in order; the last repeats.
    pub fn on_sequence(&self, pattern: &str, replies: Vec<Reply>) {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), replies.into()));
    }

    pub fn issued(&self) -> Vec<Issued> {
        self.issued.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.issued().into_iter().map(|i| i.line).collect()
    }

    pub fn timeouts(&self) -> Vec<Duration> {
        self.issued().into_iter().filter_map(|i| i.timeout).collect()
    }

    fn reply_for(&self, line: &str) -> Reply {
        let mut rules = self.rules.lock().unwrap();
        for (pattern, replies) in rules.iter_mut().rev() {
            if line.contains(pattern.as_str()) {
                return if replies.len() > 1 {
                    replies.pop_front().unwrap_or_default()
                } else {
                    replies.front().cloned().unwrap_or_default()
                };
            }
        }
        Reply::ok()
    }

    fn record(&self, kind: Kind, line: &str, timeout: Option<Duration>) {
        self.issued.lock().unwrap().push(Issued {
            kind,
            line: line.to_string(),
            timeout,
        });
    }
}

impl Device for ScriptedDevice {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_root(&self) -> bool {
        self.root
    }

    fn run(&self, line: &str, timeout: Duration) -> Result<CommandResult> {
        self.record(Kind::Run, line, Some(timeout));
        let reply = self.reply_for(line);
        if reply.unreachable {
            return Err(DeviceError::transport("scripted", line, "connection refused"));
        }
        if reply.timed_out {
            return Err(DeviceError::Timeout {
                command: line.to_string(),
                timeout,
            });
        }
        Ok(CommandResult {
            command: line.to_string(),
            exit_code: reply.exit_code,
            stdout: reply.stdout,
            stderr: reply.stderr,
            duration: Duration::ZERO,
        })
    }

    fn spawn(&self, line: &str, output: ProcessOutput) -> Result<Box<dyn RemoteProcess>> {
        self.record(Kind::Spawn, line, None);
        let reply = self.reply_for(line);
        if reply.unreachable {
            return Err(DeviceError::transport("scripted", line, "connection refused"));
        }
        let killed = Arc::new((Mutex::new(false), Condvar::new()));
        let stdout = match output {
            ProcessOutput::Piped => Some(ScriptedStdout {
                data: reply.stdout.clone().into_bytes().into(),
                hold_open: reply.running,
                killed: killed.clone(),
            }),
            ProcessOutput::Tail => None,
        };
        let tail = match output {
            ProcessOutput::Piped => Vec::new(),
            ProcessOutput::Tail => reply
                .stdout
                .lines()
                .chain(reply.stderr.lines())
                .map(str::to_string)
                .collect(),
        };
        Ok(Box::new(ScriptedProcess {
            command: line.to_string(),
            exit_code: reply.exit_code,
            running: reply.running,
            disconnects: reply.disconnects,
            killed,
            stdout,
            tail,
        }))
    }
}

struct ScriptedProcess {
    command: String,
    exit_code: i32,
    running: bool,
    disconnects: bool,
    killed: Arc<(Mutex<bool>, Condvar)>,
    stdout: Option<ScriptedStdout>,
    tail: Vec<String>,
}

impl ScriptedProcess {
    fn is_killed(&self) -> bool {
        *self.killed.0.lock().unwrap()
    }
}

impl RemoteProcess for ScriptedProcess {
    fn command(&self) -> &str {
        &self.command
    }

    fn take_stdout(&mut self) -> Option<Box<dyn BufRead + Send>> {
        self.stdout
            .take()
            .map(|s| Box::new(BufReader::new(s)) as Box<dyn BufRead + Send>)
    }

    fn try_exit_code(&mut self) -> Result<Option<i32>> {
        if self.disconnects {
            return Err(DeviceError::transport("scripted", &self.command, "connection lost"));
        }
        if self.is_killed() {
            return Ok(Some(-1));
        }
        Ok(if self.running {
            None
        } else {
            Some(self.exit_code)
        })
    }

    fn wait(&mut self) -> Result<i32> {
        if self.disconnects {
            return Err(DeviceError::transport("scripted", &self.command, "connection lost"));
        }
        let (lock, cvar) = &*self.killed;
        let mut killed = lock.lock().unwrap();
        while self.running && !*killed {
            killed = cvar.wait(killed).unwrap();
        }
        Ok(if *killed { -1 } else { self.exit_code })
    }

    fn kill(&mut self) -> Result<()> {
        let (lock, cvar) = &*self.killed;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
        Ok(())
    }

    fn output_tail(&self) -> Vec<String> {
        self.tail.clone()
    }
}

struct ScriptedStdout {
    data: VecDeque<u8>,
    hold_open: bool,
    killed: Arc<(Mutex<bool>, Condvar)>,
}

impl Read for ScriptedStdout {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.data.is_empty() {
            if self.hold_open {
                let (lock, cvar) = &*self.killed;
                let mut killed = lock.lock().unwrap();
                while !*killed {
                    killed = cvar.wait(killed).unwrap();
                }
            }
            return Ok(0);
        }
        let n = buf.len().min(self.data.len());
        for (slot, byte) in buf.iter_mut().zip(self.data.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}
