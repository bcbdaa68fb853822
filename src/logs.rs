//! Service log retrieval: batch queries and live follow.
//!
//! A batch read runs the platform log query to completion and fails loudly
//! on a non-zero exit. A follow keeps the query running and hands each line
//! to a [`LogHandler`] on its own thread until the process ends or the
//! returned [`LogFollower`] is cancelled.

use std::any::Any;
use std::io::BufRead;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::channel::CommandChannel;
use crate::command::CommandInput;
use crate::device::RemoteProcess;
use crate::error::{DeviceError, LogError};
use crate::platform::PlatformCommands;

const EXIT_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Run log queries with elevation.
    pub elevated: bool,
    /// Timeout for batch queries.
    pub query_timeout: Duration,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            elevated: false,
            query_timeout: Duration::from_secs(30),
        }
    }
}

/// Receives followed log lines, one call per line, in arrival order.
pub trait LogHandler: Send + 'static {
    fn handle_log(&mut self, line: &str) -> anyhow::Result<()>;
}

impl<F> LogHandler for F
where
    F: FnMut(&str) -> anyhow::Result<()> + Send + 'static,
{
    fn handle_log(&mut self, line: &str) -> anyhow::Result<()> {
        self(line)
    }
}

/// A handler call that returned an error or panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFault {
    /// 1-based position of the line in the follow stream.
    pub line_number: usize,
    pub line: String,
    pub error: String,
}

/// How a follow ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowEnd {
    /// The query process exited on its own.
    Exited(i32),
    /// The follower was cancelled.
    Cancelled,
    /// Reading the process output failed.
    ReadError(String),
}

/// Summary returned when a follow finishes.
#[derive(Debug, Clone)]
pub struct FollowReport {
    pub service: String,
    /// Lines handed to the handler, faulted ones included.
    pub delivered: usize,
    pub faults: Vec<HandlerFault>,
    pub end: FollowEnd,
}

/// Reads and follows service logs on one device.
pub struct LogReader {
    channel: CommandChannel,
    commands: Box<dyn PlatformCommands>,
    config: LogConfig,
}

impl LogReader {
    pub fn new(
        channel: CommandChannel,
        commands: Box<dyn PlatformCommands>,
        config: LogConfig,
    ) -> Self {
        Self {
            channel,
            commands,
            config,
        }
    }

    /// All current log lines for `service`, in emission order.
    ///
    /// Each call re-runs the query. A non-zero exit is an error; partial
    /// output is never returned as success.
    pub fn read_service_logs(&self, service: &str) -> Result<Vec<String>, LogError> {
        let input = self.query(service, false).with_timeout(self.config.query_timeout);
        let result = self.channel.execute(&input)?;
        if !result.success() {
            return Err(LogError::QueryFailed {
                service: service.to_string(),
                exit_code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(result.lines())
    }

    /// Stream new log lines for `service` to `handler` on a dedicated thread.
    ///
    /// A handler error or panic is recorded in the [`FollowReport`] and the
    /// next line is still delivered.
    pub fn follow_service_logs<H: LogHandler>(
        &self,
        service: &str,
        handler: H,
    ) -> Result<LogFollower, LogError> {
        let input = self.query(service, true);
        let mut process = self.channel.spawn_streaming(&input)?;
        let Some(stdout) = process.take_stdout() else {
            let err = DeviceError::transport(
                self.channel.device_name(),
                process.command(),
                "process stdout is not readable",
            );
            let _ = process.kill();
            return Err(err.into());
        };

        let process = Arc::new(Mutex::new(process));
        let cancelled = Arc::new(AtomicBool::new(false));

        let spawned = thread::Builder::new()
            .name(format!("follow-{}", service))
            .spawn({
                let service = service.to_string();
                let process = process.clone();
                let cancelled = cancelled.clone();
                move || deliver(service, stdout, handler, &process, &cancelled)
            });
        let thread = match spawned {
            Ok(handle) => handle,
            Err(source) => {
                let _ = lock(&process).kill();
                return Err(LogError::Spawn {
                    service: service.to_string(),
                    source,
                });
            }
        };

        tracing::info!(device = self.channel.device_name(), service, "following logs");
        Ok(LogFollower {
            service: service.to_string(),
            process,
            cancelled,
            thread: Some(thread),
        })
    }

    /// Follow `service` until a line contains `needle`.
    ///
    /// Returns `false` if the timeout passes or the log process ends first.
    /// The follow is always cancelled before returning.
    pub fn wait_for_message(
        &self,
        service: &str,
        needle: &str,
        timeout: Duration,
    ) -> Result<bool, LogError> {
        let (tx, rx) = mpsc::channel::<String>();
        let follower = self.follow_service_logs(service, move |line: &str| {
            tx.send(line.to_string())
                .map_err(|_| anyhow::anyhow!("log listener went away"))
        })?;

        let deadline = Instant::now() + timeout;
        let found = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break false;
            }
            match rx.recv_timeout(remaining) {
                Ok(line) if line.contains(needle) => break true,
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    break false
                }
            }
        };

        let report = follower.cancel();
        tracing::debug!(
            service,
            found,
            delivered = report.delivered,
            "stopped waiting for log message"
        );
        Ok(found)
    }

    fn query(&self, service: &str, follow: bool) -> CommandInput {
        let input = self.commands.service_logs_command(service, follow);
        if self.config.elevated {
            input.as_root()
        } else {
            input
        }
    }
}

/// Handle to a running log follow.
///
/// Dropping an unfinished follower cancels it without waiting.
pub struct LogFollower {
    service: String,
    process: Arc<Mutex<Box<dyn RemoteProcess>>>,
    cancelled: Arc<AtomicBool>,
    thread: Option<JoinHandle<FollowReport>>,
}

impl LogFollower {
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Whether delivery has stopped (process ended or cancelled).
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Stop following: kill the log process and wait for delivery to end.
    pub fn cancel(mut self) -> FollowReport {
        self.signal_cancel();
        self.join_thread()
    }

    /// Wait for the log process to end on its own.
    pub fn join(mut self) -> FollowReport {
        self.join_thread()
    }

    fn signal_cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Err(e) = lock(&self.process).kill() {
            tracing::warn!(service = %self.service, error = %e, "could not kill log follower");
        }
    }

    fn join_thread(&mut self) -> FollowReport {
        let fallback = |service: &str| FollowReport {
            service: service.to_string(),
            delivered: 0,
            faults: Vec::new(),
            end: FollowEnd::ReadError("follower thread panicked".to_string()),
        };
        match self.thread.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| fallback(&self.service)),
            None => fallback(&self.service),
        }
    }
}

impl Drop for LogFollower {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.signal_cancel();
        }
    }
}

fn deliver<H: LogHandler>(
    service: String,
    mut reader: Box<dyn BufRead + Send>,
    mut handler: H,
    process: &Mutex<Box<dyn RemoteProcess>>,
    cancelled: &AtomicBool,
) -> FollowReport {
    let mut delivered = 0;
    let mut faults = Vec::new();
    let mut buf = Vec::new();
    let mut read_error = None;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']);
                delivered += 1;
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle_log(line)));
                let error = match outcome {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => format!("{:#}", e),
                    Err(payload) => format!("handler panicked: {}", panic_message(&*payload)),
                };
                tracing::warn!(%service, line_number = delivered, %error, "log handler failed");
                faults.push(HandlerFault {
                    line_number: delivered,
                    line: line.to_string(),
                    error,
                });
            }
            Err(e) => {
                if !cancelled.load(Ordering::SeqCst) {
                    read_error = Some(e.to_string());
                }
                break;
            }
        }
    }

    let end = match read_error {
        Some(msg) => FollowEnd::ReadError(msg),
        None => wait_for_end(process, cancelled),
    };
    tracing::info!(%service, delivered, faults = faults.len(), ?end, "log follow ended");

    FollowReport {
        service,
        delivered,
        faults,
        end,
    }
}

fn wait_for_end(process: &Mutex<Box<dyn RemoteProcess>>, cancelled: &AtomicBool) -> FollowEnd {
    loop {
        if cancelled.load(Ordering::SeqCst) {
            return FollowEnd::Cancelled;
        }
        match lock(process).try_exit_code() {
            Ok(Some(code)) => return FollowEnd::Exited(code),
            Ok(None) => {}
            Err(e) => return FollowEnd::ReadError(e.to_string()),
        }
        thread::sleep(EXIT_POLL);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelConfig;
    use crate::platform::LinuxCommands;
    use crate::testing::{Kind, Reply, ScriptedDevice};
    use crate::device::LocalDevice;
    use crate::install::InstallationParameters;
    use crate::platform::Platform;

    /// Command set whose log query runs the service name as a shell line,
    /// so follows can be driven by real local processes.
    struct ShellLogs(LinuxCommands);

    impl PlatformCommands for ShellLogs {
        fn platform(&self) -> Platform {
            self.0.platform()
        }
        fn install_command(&self, params: &InstallationParameters) -> CommandInput {
            self.0.install_command(params)
        }
        fn service_unit(&self) -> &str {
            self.0.service_unit()
        }
        fn start_service_command(&self) -> CommandInput {
            self.0.start_service_command()
        }
        fn stop_service_command(&self) -> CommandInput {
            self.0.stop_service_command()
        }
        fn unit_registered_command(&self) -> CommandInput {
            self.0.unit_registered_command()
        }
        fn unit_active_command(&self) -> CommandInput {
            self.0.unit_active_command()
        }
        fn component_status_command(&self, component: &str) -> CommandInput {
            self.0.component_status_command(component)
        }
        fn service_logs_command(&self, service: &str, _follow: bool) -> CommandInput {
            CommandInput::line(service)
        }
    }

    fn local_reader() -> LogReader {
        let channel = CommandChannel::new(Arc::new(LocalDevice::new()), ChannelConfig::default());
        LogReader::new(
            channel,
            Box::new(ShellLogs(LinuxCommands::new())),
            LogConfig::default(),
        )
    }

    fn setup(config: LogConfig) -> (Arc<ScriptedDevice>, LogReader) {
        let device = Arc::new(ScriptedDevice::new());
        let channel = CommandChannel::new(device.clone(), ChannelConfig::default());
        let reader = LogReader::new(channel, Box::new(LinuxCommands::new()), config);
        (device, reader)
    }

    fn collector() -> (Arc<Mutex<Vec<String>>>, impl LogHandler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = move |line: &str| -> anyhow::Result<()> {
            sink.lock().unwrap().push(line.to_string());
            Ok(())
        };
        (seen, handler)
    }

    #[test]
    fn read_returns_lines_in_order() {
        let (device, reader) = setup(LogConfig::default());
        device.on(
            "journalctl -u greengrass-lite --no-pager",
            Reply::ok().stdout("first\nsecond\nthird\n"),
        );
        let lines = reader.read_service_logs("greengrass-lite").unwrap();
        assert_eq!(lines, vec!["first", "second", "third"]);
        assert_eq!(device.timeouts(), vec![Duration::from_secs(30)]);
    }

    #[test]
    fn read_with_nonzero_exit_is_an_error() {
        let (device, reader) = setup(LogConfig::default());
        device.on(
            "journalctl",
            Reply::exit(1)
                .stdout("-- partial --\n")
                .stderr("Failed to open journal"),
        );
        match reader.read_service_logs("greengrass-lite").unwrap_err() {
            LogError::QueryFailed {
                service,
                exit_code,
                stderr,
            } => {
                assert_eq!(service, "greengrass-lite");
                assert_eq!(exit_code, 1);
                assert_eq!(stderr, "Failed to open journal");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn read_propagates_transport_errors() {
        let (device, reader) = setup(LogConfig::default());
        device.on("journalctl", Reply::unreachable());
        assert!(matches!(
            reader.read_service_logs("greengrass-lite"),
            Err(LogError::Device(DeviceError::Transport { .. }))
        ));
    }

    #[test]
    fn elevated_queries_use_the_prefix() {
        let (device, reader) = setup(LogConfig {
            elevated: true,
            ..LogConfig::default()
        });
        reader.read_service_logs("greengrass-lite").unwrap();
        assert_eq!(
            device.lines(),
            vec!["sudo journalctl -u greengrass-lite --no-pager"]
        );
    }

    #[test]
    fn follow_delivers_in_order_until_exit() {
        let (device, reader) = setup(LogConfig::default());
        device.on("-f", Reply::ok().stdout("one\ntwo\nthree\n"));
        let (seen, handler) = collector();

        let report = reader
            .follow_service_logs("greengrass-lite", handler)
            .unwrap()
            .join();

        assert_eq!(*seen.lock().unwrap(), vec!["one", "two", "three"]);
        assert_eq!(report.delivered, 3);
        assert!(report.faults.is_empty());
        assert_eq!(report.end, FollowEnd::Exited(0));
        let issued = device.issued();
        assert_eq!(issued[0].kind, Kind::Spawn);
        assert_eq!(issued[0].line, "journalctl -u greengrass-lite -f --no-pager");
    }

    #[test]
    fn handler_faults_do_not_stop_delivery() {
        let (device, reader) = setup(LogConfig::default());
        device.on("-f", Reply::ok().stdout("a\nbad\nc\npanic\ne\n"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = move |line: &str| -> anyhow::Result<()> {
            if line == "panic" {
                panic!("handler blew up");
            }
            sink.lock().unwrap().push(line.to_string());
            if line == "bad" {
                anyhow::bail!("cannot parse {}", line);
            }
            Ok(())
        };

        let report = reader
            .follow_service_logs("greengrass-lite", handler)
            .unwrap()
            .join();

        assert_eq!(*seen.lock().unwrap(), vec!["a", "bad", "c", "e"]);
        assert_eq!(report.delivered, 5);
        assert_eq!(report.faults.len(), 2);
        assert_eq!(report.faults[0].line_number, 2);
        assert_eq!(report.faults[0].error, "cannot parse bad");
        assert_eq!(report.faults[1].line_number, 4);
        assert!(report.faults[1].error.contains("handler blew up"));
    }

    #[test]
    fn cancel_stops_a_follow_that_never_ends() {
        let (device, reader) = setup(LogConfig::default());
        device.on("-f", Reply::ok().stdout("hello\n").running());
        let (seen, handler) = collector();

        let follower = reader.follow_service_logs("greengrass-lite", handler).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().unwrap().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!follower.is_finished());

        let report = follower.cancel();
        assert_eq!(report.end, FollowEnd::Cancelled);
        assert_eq!(report.delivered, 1);
    }

    #[test]
    fn dropping_a_follower_does_not_hang() {
        let (device, reader) = setup(LogConfig::default());
        device.on("-f", Reply::ok().running());
        let (_, handler) = collector();
        let follower = reader.follow_service_logs("greengrass-lite", handler).unwrap();
        assert_eq!(follower.service(), "greengrass-lite");
        drop(follower);
    }

    #[test]
    fn local_follow_keeps_pipe_order_past_a_fault() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = move |line: &str| -> anyhow::Result<()> {
            sink.lock().unwrap().push(line.to_string());
            if line == "line3" {
                anyhow::bail!("rejected {}", line);
            }
            Ok(())
        };

        let report = local_reader()
            .follow_service_logs("for i in 1 2 3 4 5 6; do echo line$i; done", handler)
            .unwrap()
            .join();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["line1", "line2", "line3", "line4", "line5", "line6"]
        );
        assert_eq!(report.delivered, 6);
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].line_number, 3);
        assert_eq!(report.end, FollowEnd::Exited(0));
    }

    #[test]
    fn local_cancel_kills_the_process_group() {
        let (seen, handler) = collector();
        let follower = local_reader()
            .follow_service_logs(
                "i=0; while true; do i=$((i+1)); echo line$i; sleep 0.02; done",
                handler,
            )
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().unwrap().len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!follower.is_finished());

        let start = Instant::now();
        let report = follower.cancel();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(report.end, FollowEnd::Cancelled);

        let lines = seen.lock().unwrap().clone();
        assert!(lines.len() >= 3);
        for (i, line) in lines.iter().enumerate() {
            assert_eq!(*line, format!("line{}", i + 1));
        }
        assert_eq!(report.delivered, lines.len());
    }

    #[test]
    fn wait_for_message_finds_line() {
        let (device, reader) = setup(LogConfig::default());
        device.on(
            "-f",
            Reply::ok()
                .stdout("booting\ncomponent HelloWorld started\n")
                .running(),
        );
        let found = reader
            .wait_for_message("ggl.HelloWorld", "HelloWorld started", Duration::from_secs(5))
            .unwrap();
        assert!(found);
        assert_eq!(
            device.lines(),
            vec!["journalctl -u ggl.HelloWorld -f --no-pager"]
        );
    }

    #[test]
    fn wait_for_message_times_out() {
        let (device, reader) = setup(LogConfig::default());
        device.on("-f", Reply::ok().stdout("nothing here\n").running());
        let start = Instant::now();
        let found = reader
            .wait_for_message("ggl.HelloWorld", "never", Duration::from_millis(100))
            .unwrap();
        assert!(!found);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn wait_for_message_returns_false_when_process_ends() {
        let (device, reader) = setup(LogConfig::default());
        device.on("-f", Reply::ok().stdout("done\n"));
        let found = reader
            .wait_for_message("ggl.HelloWorld", "never", Duration::from_secs(30))
            .unwrap();
        assert!(!found);
    }
}
