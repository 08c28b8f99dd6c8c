//! Command-line entry point for the relay daemon.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! relayd start
//!
//! # Start in the background with a config file
//! relayd start -d --config /etc/relay.toml
//!
//! # Broadcast room on a custom port
//! relayd start --listen 127.0.0.1:9000 --mode broadcast
//!
//! # Stop the daemon
//! relayd stop
//!
//! # Check daemon status
//! relayd status
//!
//! # Enable debug logging
//! RUST_LOG=relayd=debug relayd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{parse_listen, parse_mode, RelayConfig, StoreKind};
use crate::hub::spawn_hub;
use crate::server::RelayServer;
use crate::store::{MemoryStore, MessageStore, SqliteStore};

/// Relay daemon - real-time WebSocket chat relay
#[derive(Parser, Debug)]
#[command(name = "relayd", version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the daemon
    Start(StartArgs),
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

/// Options for `relayd start`. Flags win over file and environment.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct StartArgs {
    /// Run as a background daemon (fork to background)
    #[arg(short = 'd', long)]
    pub daemon: bool,

    /// TOML configuration file
    #[arg(short, long, env = "RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address, or a bare port
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Routing mode: direct or broadcast
    #[arg(short, long)]
    pub mode: Option<String>,

    /// Message store: none, memory or sqlite
    #[arg(long)]
    pub store: Option<String>,

    /// SQLite database file (implies --store sqlite)
    #[arg(long)]
    pub database: Option<PathBuf>,
}

impl StartArgs {
    /// Options for a bare `relayd`, still honouring `RELAY_CONFIG`.
    pub fn from_env() -> Self {
        Self {
            config: std::env::var_os("RELAY_CONFIG").map(PathBuf::from),
            ..Self::default()
        }
    }

    /// Build the final configuration from every layer and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if any layer is invalid.
    pub fn resolve(&self) -> Result<RelayConfig> {
        let mut config = RelayConfig::load(self.config.as_deref())
            .context("Failed to load configuration")?;

        if let Some(listen) = &self.listen {
            config.listen = parse_listen(listen)?;
        }
        if let Some(mode) = &self.mode {
            config.mode = parse_mode(mode)?;
        }
        if let Some(store) = &self.store {
            config.store = store.parse::<StoreKind>()?;
        }
        if let Some(database) = &self.database {
            config.database_path = Some(database.clone());
            config.store = StoreKind::Sqlite;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("relay")
}

/// Returns the path to the PID file.
fn pid_file_path() -> PathBuf {
    state_dir().join("relayd.pid")
}

/// Returns the path to the log file used when daemonized.
fn log_file_path() -> PathBuf {
    state_dir().join("relayd.log")
}

fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// Returns the daemon's PID, clearing a stale PID file.
fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let Ok(pid) = i32::try_from(pid) else {
            bail!("Invalid PID {pid}");
        };
        // SAFETY: kill(2) has no memory-safety preconditions
        let result = unsafe { libc::kill(pid, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

/// Parse arguments and run the selected command.
///
/// # Errors
///
/// Returns an error if startup fails or the daemon cannot be signalled.
pub fn main() -> Result<()> {
    let args = Args::parse();

    let command = args
        .command
        .unwrap_or_else(|| Command::Start(StartArgs::from_env()));

    match command {
        Command::Start(start) => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'relayd stop' to stop it first.");
                process::exit(1);
            }

            // Resolve before forking so mistakes reach the terminal
            let config = start.resolve()?;

            if start.daemon {
                daemonize()?;
            }

            write_pid()?;
            let result = run_daemon(config);
            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {pid})...");
                stop_daemon(pid)?;

                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");
                if let Ok(config) = StartArgs::from_env().resolve() {
                    println!("Listen: {}", config.listen);
                    println!("Mode: {}", config.mode);
                }
                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

/// Opens the configured message store.
///
/// # Errors
///
/// Returns an error if the SQLite database cannot be opened.
pub fn open_store(config: &RelayConfig) -> Result<Option<Arc<dyn MessageStore>>> {
    let store: Arc<dyn MessageStore> = match config.store {
        StoreKind::None => return Ok(None),
        StoreKind::Memory => Arc::new(MemoryStore::new()),
        StoreKind::Sqlite => {
            let path = config
                .database_path
                .as_deref()
                .context("store = \"sqlite\" requires database_path")?;
            let store = SqliteStore::open(path)
                .with_context(|| format!("Failed to open database {}", path.display()))?;
            Arc::new(store)
        }
    };
    Ok(Some(store))
}

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run_daemon(config: RelayConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("relayd=info".parse()?)
                .add_directive("relay_core=info".parse()?)
                .add_directive("relay_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "Relay daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let store = open_store(&config)?;
    info!(store = ?config.store, "Message store ready");

    let hub = spawn_hub(config.mode, config.command_buffer);
    info!(mode = %config.mode, "Hub started");

    let server = RelayServer::new(&config, hub, store, cancel_token);

    if let Err(e) = server.run(config.listen).await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Relay daemon stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
