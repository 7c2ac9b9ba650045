//! usblock agent
//!
//! Runs on the protected host. Waits for USB storage to be attached and
//! reports whether the license on it is valid for that device.
//!
//! Usage:
//!   usblock-agent --public-key /opt/usblock/public_key.pem

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use usblock_crypto::PublicKey;
use usblock_watch::{WatchConfig, WatchSummary};

#[derive(Parser, Debug)]
#[command(name = "usblock-agent")]
#[command(about = "Verifies device-bound licenses on attached USB storage")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Public key (PEM). Defaults to public_key.pem next to the executable
    #[arg(long)]
    public_key: Option<PathBuf>,

    /// License file path relative to the volume root
    #[arg(long)]
    license_file: Option<String>,

    /// Delay before inspecting a newly attached volume (ms)
    #[arg(long)]
    settle_delay_ms: Option<u64>,

    /// Maximum number of volumes checked at once
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let config = load_config(&args)?;
    let pem = fs::read_to_string(&config.public_key_path).with_context(|| {
        format!("public key not found: {}", config.public_key_path.display())
    })?;
    let public_key = PublicKey::from_pem(&pem).context("failed to parse public key")?;

    info!("waiting for USB license...");
    let summary = run_agent(config, public_key).await?;
    info!(
        "watcher stopped: {} checked, {} accepted, {} rejected",
        summary.processed, summary.accepted, summary.rejected
    );
    Ok(())
}

fn load_config(args: &Args) -> Result<WatchConfig> {
    let mut config = match &args.config {
        Some(path) => WatchConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => WatchConfig::default(),
    };

    if let Some(path) = &args.public_key {
        config.public_key_path = path.clone();
    }
    if let Some(name) = &args.license_file {
        config.license_file_name = name.clone();
    }
    if let Some(ms) = args.settle_delay_ms {
        config.settle_delay_ms = ms;
    }
    if let Some(n) = args.max_concurrent {
        config.max_concurrent_checks = n;
    }
    config.validate()?;
    Ok(config)
}

#[cfg(target_os = "linux")]
async fn run_agent(config: WatchConfig, public_key: PublicKey) -> Result<WatchSummary> {
    use std::sync::Arc;
    use tokio::sync::watch;
    use usblock_watch::platform::linux::{MountWatcher, SysfsSerialResolver};
    use usblock_watch::{LicenseGate, WatchLoop};

    let resolver = Arc::new(SysfsSerialResolver::new(
        config.mounts_path.clone(),
        config.sysfs_root.clone(),
    ));
    let gate = LicenseGate::new(public_key, resolver, config.license_file_name.clone());
    let watch_loop = WatchLoop::new(gate, &config);

    let mut source = MountWatcher::start(config.mounts_path.clone(), config.poll_interval())
        .await
        .context("failed to start USB watcher")?;
    info!("USB watcher started");

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown().await;
        info!("shutdown requested");
        let _ = stop_tx.send(true);
    });

    Ok(watch_loop.run(&mut source, stop_rx).await)
}

/// Resolves on Ctrl-C or SIGTERM.
#[cfg(target_os = "linux")]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("SIGTERM handler unavailable: {e}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(target_os = "linux"))]
async fn run_agent(_config: WatchConfig, _public_key: PublicKey) -> Result<WatchSummary> {
    anyhow::bail!("no removable-device backend is available for this platform")
}
