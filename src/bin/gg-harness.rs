//! Greengrass Lite device harness CLI.
//!
//! Usage:
//!   gg-harness detect
//!   gg-harness install --root-dir /greengrass --arg --thing-name=core-01
//!   gg-harness status HelloWorld
//!   gg-harness logs greengrass-lite --wait-for "started" --timeout-secs 120
//!   gg-harness cleanup-plan --persist none --persist generated.files

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use gg_device_harness::{
    CleanupContext, CommandChannel, HarnessConfig, LogReader, Orchestrator, PersistMode, Platform,
    PlatformCommands, ServiceStatus,
};

#[derive(Parser)]
#[command(name = "gg-harness")]
#[command(about = "Install, drive and inspect Greengrass Lite on a test device")]
struct Cli {
    /// Config file (default: $GG_HARNESS_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the device platform
    Detect,

    /// Install Greengrass Lite and start its service
    Install {
        /// Greengrass root directory on the device
        #[arg(long)]
        root_dir: Option<PathBuf>,

        /// Installer argument as KEY=VALUE (repeatable)
        #[arg(long = "arg", value_parser = parse_key_val, allow_hyphen_values = true)]
        args: Vec<(String, String)>,
    },

    /// Stop the running Greengrass Lite service
    Stop,

    /// Show whether a component's service is running
    Status {
        /// Component name (checks ggl.<component>.service)
        component: String,
    },

    /// Read or follow a service's logs
    Logs {
        /// systemd unit to read
        service: String,

        /// Keep printing new lines until the log process ends
        #[arg(long)]
        follow: bool,

        /// Wait until a line contains TEXT
        #[arg(long, value_name = "TEXT", conflicts_with = "follow")]
        wait_for: Option<String>,

        /// How long to wait for --wait-for
        #[arg(long, default_value_t = 60, requires = "wait_for")]
        timeout_secs: u64,
    },

    /// Print the cleanup policy for a set of persist modes as JSON
    CleanupPlan {
        /// none, aws.resources, installed.software, generated.files (repeatable)
        #[arg(long)]
        persist: Vec<PersistMode>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = HarnessConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Detect => detect(&config),
        Commands::Install { root_dir, args } => install(&config, root_dir, args),
        Commands::Stop => stop(&config),
        Commands::Status { component } => status(&config, &component),
        Commands::Logs {
            service,
            follow,
            wait_for,
            timeout_secs,
        } => logs(&config, &service, follow, wait_for, timeout_secs),
        Commands::CleanupPlan { persist } => cleanup_plan(&config, persist),
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

fn connect(config: &HarnessConfig) -> Result<(CommandChannel, Box<dyn PlatformCommands>)> {
    let device = config.to_device()?;
    let channel = CommandChannel::new(device, config.channel_config());
    let platform = Platform::detect(&channel)
        .with_context(|| format!("Detecting platform of {}", channel.device_name()))?;
    Ok((channel, platform.commands()))
}

fn detect(config: &HarnessConfig) -> Result<()> {
    let device = config.to_device()?;
    let channel = CommandChannel::new(device, config.channel_config());
    let platform = Platform::detect(&channel)?;
    println!("{} {}", channel.device_name().bold(), platform);
    Ok(())
}

fn install(
    config: &HarnessConfig,
    root_dir: Option<PathBuf>,
    args: Vec<(String, String)>,
) -> Result<()> {
    let mut params = config.install_parameters();
    if let Some(dir) = root_dir {
        params.root_directory = dir;
    }
    params.installer_args.extend(args);

    let (channel, commands) = connect(config)?;
    println!("{}", "Greengrass Lite install".bold());
    println!("  Device:    {}", channel.device_name());
    println!("  Root:      {}", params.root_directory.display());
    for (key, value) in &params.installer_args {
        println!("  Arg:       {} {}", key, value);
    }
    println!();

    let mut orchestrator = Orchestrator::new(channel, commands, config.install_config());
    let start = Instant::now();
    match orchestrator.install(&params) {
        Ok(()) => {
            println!(
                "{} installed and started in {:.1}s",
                "[PASS]".green(),
                start.elapsed().as_secs_f64()
            );
            Ok(())
        }
        Err(e) => {
            println!("{} {}", "[FAIL]".red(), e);
            std::process::exit(1);
        }
    }
}

fn stop(config: &HarnessConfig) -> Result<()> {
    let (channel, commands) = connect(config)?;
    let unit = commands.service_unit().to_string();
    let mut orchestrator = Orchestrator::new(channel, commands, config.install_config());

    if !orchestrator.adopt_running()? {
        bail!("{} is not active, nothing to stop", unit);
    }
    orchestrator.stop()?;
    println!("{} stopped {}", "[PASS]".green(), unit);
    Ok(())
}

fn status(config: &HarnessConfig, component: &str) -> Result<()> {
    let (channel, commands) = connect(config)?;
    let orchestrator = Orchestrator::new(channel, commands, config.install_config());
    match orchestrator.service_status(component)? {
        ServiceStatus::Running => println!("{} {}", component.bold(), "RUNNING".green()),
        ServiceStatus::NotRunning => {
            println!("{} {}", component.bold(), "NOT_RUNNING".red());
            std::process::exit(1);
        }
    }
    Ok(())
}

fn logs(
    config: &HarnessConfig,
    service: &str,
    follow: bool,
    wait_for: Option<String>,
    timeout_secs: u64,
) -> Result<()> {
    let (channel, commands) = connect(config)?;
    let reader = LogReader::new(channel, commands, config.log_config());

    if let Some(needle) = wait_for {
        println!("{} waiting for '{}' in {}", ">>".cyan(), needle, service);
        let found = reader.wait_for_message(service, &needle, Duration::from_secs(timeout_secs))?;
        if found {
            println!("{} found '{}'", "[PASS]".green(), needle);
            return Ok(());
        }
        println!("{} '{}' not seen within {}s", "[FAIL]".red(), needle, timeout_secs);
        std::process::exit(1);
    }

    if follow {
        let report = reader
            .follow_service_logs(service, |line: &str| -> Result<()> {
                println!("{}", line);
                Ok(())
            })?
            .join();
        println!("{} {:?} after {} lines", ">>".cyan(), report.end, report.delivered);
        return Ok(());
    }

    for line in reader.read_service_logs(service)? {
        println!("{}", line);
    }
    Ok(())
}

fn cleanup_plan(config: &HarnessConfig, persist: Vec<PersistMode>) -> Result<()> {
    let context = if persist.is_empty() {
        config.cleanup_context()
    } else {
        CleanupContext::from_modes(persist)
    };
    println!("{}", serde_json::to_string_pretty(&context)?);
    Ok(())
}
