// # ipwatchd - Address Watcher Daemon
//
// Thin integration layer around `ipwatch-core`. It is responsible for:
// 1. Reading the JSON configuration file and environment overrides
// 2. Initializing logging and the runtime
// 3. Wiring the HTTP resolver, the file history store and the SMTP
//    transport into a Watcher
// 4. Running the Watcher until SIGTERM/SIGINT, then draining in-flight
//    dispatches
//
// ## Configuration
//
// - `IPWATCH_CONFIG`: Path to the JSON configuration (default `config.json`)
// - `IPWATCH_HISTORY_PATH`: Path to the history file (default `watcher.json`)
// - `IPWATCH_VERSION`: Address version to track (`v4` or `v6`)
// - `IPWATCH_EXEC`: Run configured actions (`true`/`false`)
// - `IPWATCH_NOTIFY`: Send notification mail (`true`/`false`)
// - `IPWATCH_API`: Enable read-only history exposure (`true`/`false`)
// - `IPWATCH_LOG_LEVEL`: trace, debug, info, warn, error (default `debug`)
// - `IPWATCH_QUIET`: Lower verbosity to info (`true`/`false`)
// - `IPWATCH_DRAIN_TIMEOUT_SECS`: Shutdown drain deadline (default 30)
//
// Environment overrides win over the `flags` object of the file.
//
// ## Example
//
// ```bash
// export IPWATCH_CONFIG=/etc/ipwatch/config.json
// export IPWATCH_HISTORY_PATH=/var/lib/ipwatch/watcher.json
// export IPWATCH_EXEC=true
// export IPWATCH_NOTIFY=true
//
// ipwatchd
// ```

use anyhow::{Context, Result};
use ipwatch_core::config::{IpVersion, WatcherConfig};
use ipwatch_core::traits::{HistoryStore, MailTransport};
use ipwatch_core::{FileHistoryStore, Watcher, WatcherEvent};
use ipwatch_notify_smtp::SmtpTransport;
use ipwatch_resolver_http::HttpResolver;
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum WatchExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<WatchExitCode> for ExitCode {
    fn from(code: WatchExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon settings read from the environment
#[derive(Debug)]
struct DaemonConfig {
    config_path: PathBuf,
    history_path: PathBuf,
    version: Option<IpVersion>,
    exec: Option<bool>,
    notify: Option<bool>,
    api: Option<bool>,
    log_level: String,
    quiet: bool,
    drain_timeout: Duration,
}

impl DaemonConfig {
    /// Load daemon settings from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            config_path: env::var("IPWATCH_CONFIG")
                .unwrap_or_else(|_| "config.json".to_string())
                .into(),
            history_path: env::var("IPWATCH_HISTORY_PATH")
                .unwrap_or_else(|_| "watcher.json".to_string())
                .into(),
            version: env::var("IPWATCH_VERSION")
                .ok()
                .map(|s| s.parse())
                .transpose()?,
            exec: bool_var("IPWATCH_EXEC")?,
            notify: bool_var("IPWATCH_NOTIFY")?,
            api: bool_var("IPWATCH_API")?,
            log_level: env::var("IPWATCH_LOG_LEVEL").unwrap_or_else(|_| "debug".to_string()),
            quiet: bool_var("IPWATCH_QUIET")?.unwrap_or(false),
            drain_timeout: Duration::from_secs(
                env::var("IPWATCH_DRAIN_TIMEOUT_SECS")
                    .ok()
                    .map(|s| s.parse())
                    .transpose()
                    .context("IPWATCH_DRAIN_TIMEOUT_SECS must be a number of seconds")?
                    .unwrap_or(30),
            ),
        })
    }

    /// Effective log level; quiet caps verbosity at info
    fn log_level(&self) -> Result<Level> {
        let level = parse_level(&self.log_level)?;
        if self.quiet && level > Level::INFO {
            return Ok(Level::INFO);
        }
        Ok(level)
    }

    /// Read the watcher configuration and apply environment overrides
    fn load_watcher_config(&self) -> Result<WatcherConfig> {
        let mut config = read_watcher_config(&self.config_path)?;

        if let Some(version) = self.version {
            config.flags.version = version;
        }
        if let Some(exec) = self.exec {
            config.flags.exec = exec;
        }
        if let Some(notify) = self.notify {
            config.flags.notify = notify;
        }
        if let Some(api) = self.api {
            config.flags.api = api;
        }

        config
            .validate()
            .with_context(|| format!("invalid configuration in {}", self.config_path.display()))?;

        Ok(config)
    }
}

fn read_watcher_config(path: &Path) -> Result<WatcherConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn bool_var(name: &str) -> Result<Option<bool>> {
    env::var(name).ok().map(|s| parse_bool(name, &s)).transpose()
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("{} must be true or false, got '{}'", name, other),
    }
}

fn parse_level(value: &str) -> Result<Level> {
    match value.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!(
            "IPWATCH_LOG_LEVEL '{}' is not valid. \
            Valid levels: trace, debug, info, warn, error",
            value
        ),
    }
}

fn main() -> ExitCode {
    let daemon = match DaemonConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return WatchExitCode::ConfigError.into();
        }
    };

    let log_level = match daemon.log_level() {
        Ok(level) => level,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return WatchExitCode::ConfigError.into();
        }
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return WatchExitCode::ConfigError.into();
    }

    let config = match daemon.load_watcher_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return WatchExitCode::ConfigError.into();
        }
    };

    info!(
        sources = config.sources.len(),
        version = %config.flags.version,
        exec = config.flags.exec,
        notify = config.flags.notify,
        "Starting ipwatchd"
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return WatchExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        match run_daemon(&daemon, config).await {
            Ok(()) => WatchExitCode::CleanShutdown,
            Err(DaemonError::Startup(e)) => {
                error!("Startup error: {:#}", e);
                WatchExitCode::ConfigError
            }
            Err(DaemonError::Runtime(e)) => {
                error!("Daemon error: {:#}", e);
                WatchExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Failure stage, mapped to an exit code
enum DaemonError {
    Startup(anyhow::Error),
    Runtime(anyhow::Error),
}

/// Run the daemon
async fn run_daemon(daemon: &DaemonConfig, config: WatcherConfig) -> Result<(), DaemonError> {
    let history = FileHistoryStore::new(&daemon.history_path)
        .await
        .with_context(|| format!("failed to open history at {}", daemon.history_path.display()))
        .map_err(DaemonError::Startup)?;

    if config.flags.api {
        let entries = history
            .entries(Some(config.flags.version))
            .await
            .context("failed to read history")
            .map_err(DaemonError::Startup)?;
        warn!(
            entries = entries.len(),
            "read-only history exposure requested, but this daemon does not serve it"
        );
    }

    let resolver = Arc::new(HttpResolver::from_config(&config));
    let mail: Option<Arc<dyn MailTransport>> = config
        .watcher
        .smtp
        .as_ref()
        .filter(|_| config.flags.notify)
        .map(|smtp| Arc::new(SmtpTransport::from_config(smtp)) as Arc<dyn MailTransport>);

    let (watcher, mut events) = Watcher::new(&config, resolver, Arc::new(history), mail)
        .context("failed to create watcher")
        .map_err(DaemonError::Startup)?;

    let monitor = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    let shutdown = wait_for_shutdown()
        .await
        .map_err(DaemonError::Startup)?;

    watcher
        .run_until(shutdown)
        .await
        .context("watcher failed")
        .map_err(DaemonError::Runtime)?;

    info!(timeout = ?daemon.drain_timeout, "draining in-flight dispatches");
    if !watcher.drain(daemon.drain_timeout).await {
        warn!("drain deadline reached with tasks still running, abandoning them");
    }

    drop(watcher);
    let _ = monitor.await;

    info!("ipwatchd stopped");
    Ok(())
}

fn log_event(event: &WatcherEvent) {
    match event {
        WatcherEvent::EntryCreated { entry } => {
            info!(id = entry.id, address = %entry.address, previous_address = %entry.previous_address, "history entry recorded");
        }
        other => debug!(event = ?other, "watcher event"),
    }
}

/// Install SIGTERM and SIGINT handlers
///
/// Returns a future that completes on the first signal.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<impl std::future::Future<Output = ()>> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(async move {
        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        info!("Received shutdown signal: {}", name);
    })
}

/// Fallback for non-Unix platforms (SIGINT only)
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<impl std::future::Future<Output = ()>> {
    Ok(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal: SIGINT"),
            Err(e) => error!("Failed to wait for CTRL-C: {}", e),
        }
    })
}
