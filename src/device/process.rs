//! Host process plumbing shared by the local and ssh transports.
//!
//! Children are started in their own process group so a timeout or
//! cancellation can take down the whole tree (`sh -c` plus whatever it
//! forked), not just the shell.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::os::unix::process::CommandExt;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::{ProcessOutput, RemoteProcess};
use crate::command::CommandResult;
use crate::error::{DeviceError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Lines of stdout/stderr kept for a [`ProcessOutput::Tail`] process.
pub(crate) const TAIL_LINES: usize = 40;

/// How long an exited process's drain threads get to flush the tail.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Run `cmd` to completion with a hard timeout.
///
/// The deadline covers both the exit of the shell and the close of its
/// output pipes, so a line that leaves a child holding stdout open still
/// times out.
pub(crate) fn run_with_timeout(
    device: &str,
    line: &str,
    mut cmd: Command,
    timeout: Duration,
) -> Result<CommandResult> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    let start = Instant::now();
    let deadline = start + timeout;
    let mut child = cmd
        .spawn()
        .map_err(|e| DeviceError::transport(device, line, e))?;

    let stdout = collect(child.stdout.take());
    let stderr = collect(child.stderr.take());
    let timed_out = || DeviceError::Timeout {
        command: line.to_string(),
        timeout,
    };

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                kill_group(&mut child);
                return Err(DeviceError::transport(device, line, e));
            }
        }

        let now = Instant::now();
        if now >= deadline {
            kill_group(&mut child);
            return Err(timed_out());
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    };

    // Descendants that inherited the pipes keep them open past the shell's exit.
    let (Some(stdout), Some(stderr)) = (receive(&stdout, deadline), receive(&stderr, deadline))
    else {
        kill_group(&mut child);
        return Err(timed_out());
    };

    Ok(CommandResult {
        command: line.to_string(),
        exit_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
        duration: start.elapsed(),
    })
}

/// Spawn `cmd` and hand it back as a [`RemoteProcess`].
pub(crate) fn spawn(
    device: &str,
    line: &str,
    mut cmd: Command,
    output: ProcessOutput,
) -> Result<Box<dyn RemoteProcess>> {
    let stderr = match output {
        ProcessOutput::Piped => Stdio::null(),
        ProcessOutput::Tail => Stdio::piped(),
    };
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(stderr)
        .process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|e| DeviceError::transport(device, line, e))?;

    let mut process = ChildProcess {
        device: device.to_string(),
        command: line.to_string(),
        stdout: None,
        tail: OutputTail::default(),
        drains: Arc::new(AtomicUsize::new(0)),
        drain_count: 0,
        child,
    };
    match output {
        ProcessOutput::Piped => process.stdout = process.child.stdout.take(),
        ProcessOutput::Tail => {
            if let Some(out) = process.child.stdout.take() {
                process.drain(out);
            }
            if let Some(err) = process.child.stderr.take() {
                process.drain(err);
            }
        }
    }
    Ok(Box::new(process))
}

fn collect<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

/// Collected output, or `None` if the pipe is still open at `deadline`.
fn receive(rx: &Receiver<String>, deadline: Instant) -> Option<String> {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(output) => Some(output),
        Err(RecvTimeoutError::Timeout) => None,
        Err(RecvTimeoutError::Disconnected) => Some(String::new()),
    }
}

fn kill_group(child: &mut Child) {
    // SAFETY: kill(2) with a negative pid signals the process group we
    // created with process_group(0); it has no memory-safety preconditions.
    unsafe {
        libc::kill(-(child.id() as libc::pid_t), libc::SIGKILL);
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Bounded ring of the most recent output lines.
#[derive(Clone, Default)]
struct OutputTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl OutputTail {
    fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    fn snapshot(&self) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().cloned().collect()
    }
}

struct ChildProcess {
    device: String,
    command: String,
    child: Child,
    stdout: Option<ChildStdout>,
    tail: OutputTail,
    drains: Arc<AtomicUsize>,
    drain_count: usize,
}

impl ChildProcess {
    fn drain<R: Read + Send + 'static>(&mut self, pipe: R) {
        let tail = self.tail.clone();
        let done = self.drains.clone();
        self.drain_count += 1;
        thread::spawn(move || {
            let mut reader = BufReader::new(pipe);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&buf);
                        tail.push(text.trim_end_matches(['\n', '\r']).to_string());
                    }
                }
            }
            done.fetch_add(1, Ordering::SeqCst);
        });
    }

    /// Give drain threads a moment to pick up the last lines after exit.
    fn settle(&self) {
        let deadline = Instant::now() + DRAIN_GRACE;
        while self.drains.load(Ordering::SeqCst) < self.drain_count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl RemoteProcess for ChildProcess {
    fn command(&self) -> &str {
        &self.command
    }

    fn take_stdout(&mut self) -> Option<Box<dyn BufRead + Send>> {
        self.stdout
            .take()
            .map(|s| Box::new(BufReader::new(s)) as Box<dyn BufRead + Send>)
    }

    fn try_exit_code(&mut self) -> Result<Option<i32>> {
        let code = self
            .child
            .try_wait()
            .map(|status| status.map(|s| s.code().unwrap_or(-1)))
            .map_err(|e| DeviceError::transport(&self.device, &self.command, e))?;
        if code.is_some() {
            self.settle();
        }
        Ok(code)
    }

    fn wait(&mut self) -> Result<i32> {
        let code = self
            .child
            .wait()
            .map(|s| s.code().unwrap_or(-1))
            .map_err(|e| DeviceError::transport(&self.device, &self.command, e))?;
        self.settle();
        Ok(code)
    }

    fn kill(&mut self) -> Result<()> {
        if self.try_exit_code()?.is_some() {
            return Ok(());
        }
        kill_group(&mut self.child);
        Ok(())
    }

    fn output_tail(&self) -> Vec<String> {
        self.tail.snapshot()
    }
}
