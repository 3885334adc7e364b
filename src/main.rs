//! hidhostd
//!
//! A daemon that keeps a Bluetooth HID peripheral attached to its default
//! host: it reconnects on registration, adopts newly bonded hosts while
//! monitoring is armed, and relays interrupt reports to the foreground
//! session over D-Bus.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError};

use clap::Parser;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use hidhostd::{
    cache::DeviceCache,
    config::{load_shared_config, new_shared_config, reload_shared_config, SharedConfig},
    dbus::{forward_signals, init_dbus_service, DaemonService, PlatformBridge},
    events::{ChannelSink, TracingTelemetry},
    service::{open_store, HostService},
    watcher::ConfigWatcher,
};

/// Time given to the signal forwarder to flush the final notifications
const SHUTDOWN_FLUSH_MS: u64 = 200;

/// hidhostd - default-host reconnection and report relay for a HID peripheral
#[derive(Parser, Debug)]
#[command(name = "hidhostd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/hidhostd/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// List the known HID hosts and exit
    #[arg(long)]
    list_hosts: bool,

    /// Start with host monitoring armed, overriding the config file
    #[arg(long)]
    arm: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("hidhostd starting...");

    // Load shared configuration (supports hot-reload via watcher and ReloadConfig)
    let shared_config = match load_shared_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to load config, using defaults: {}", e);
            new_shared_config()
        }
    };
    if args.arm {
        shared_config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .monitoring
            .armed = true;
    }
    let config = shared_config
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();

    let store = open_store(&config)?;
    info!(path = %store.path().display(), "Host store");

    // Handle --list-hosts flag
    if args.list_hosts {
        list_hosts(DeviceCache::open(Box::new(store)));
        return Ok(());
    }

    let (sink, notifications) = ChannelSink::new();
    let (bridge, requests) = PlatformBridge::new();
    let (forwards, forwarded) = mpsc::unbounded_channel();
    let service: Arc<DaemonService> = Arc::new(HostService::new(
        Arc::new(bridge),
        Box::new(store),
        Arc::new(sink),
        Arc::new(TracingTelemetry),
        &config,
    ));

    let dbus_connection = match init_dbus_service(service.clone(), shared_config.clone(), args.arm, forwards).await
    {
        Ok(conn) => {
            info!("D-Bus service initialized successfully");
            conn
        }
        Err(e) => {
            error!("Failed to initialize D-Bus service: {}", e);
            return Err(e.into());
        }
    };

    let mut forwarder = tokio::spawn(forward_signals(
        dbus_connection.clone(),
        notifications,
        requests,
        forwarded,
    ));

    if let Err(e) = service.start() {
        error!("Failed to register HID profile: {}", e);
        return Err(e.into());
    }

    let _watcher = spawn_config_reloader(&shared_config, service.clone(), args.arm);

    info!("hidhostd ready");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, exiting...");
        }
        result = &mut forwarder => {
            match result {
                Ok(Ok(())) => warn!("Signal forwarder stopped"),
                Ok(Err(e)) => error!("Signal forwarder failed: {}", e),
                Err(e) => error!("Signal forwarder panicked: {:?}", e),
            }
        }
    }

    service.stop();
    sleep(Duration::from_millis(SHUTDOWN_FLUSH_MS)).await;

    Ok(())
}

/// Print the persisted known hosts
fn list_hosts(cache: DeviceCache) {
    let hosts = cache.list_known_hosts();

    if hosts.is_empty() {
        println!("No known HID hosts.");
        println!("\nArm monitoring (--arm) and connect from the host to adopt one.");
        return;
    }

    println!("Known HID host(s): {}\n", hosts.len());

    let default = cache.get_default();
    for (i, host) in hosts.iter().enumerate() {
        let marker = if default.as_ref() == Some(host) { " [default]" } else { "" };
        println!("{}. {}{}", i + 1, host.name, marker);
        println!("   Address: {}", host.address);
        println!();
    }
}

/// Watch the config file and apply changes to the running service
///
/// Returns the watcher, which must be kept alive. A watcher that cannot be
/// set up only disables hot reload; `ReloadConfig` still works.
fn spawn_config_reloader(
    shared_config: &SharedConfig,
    service: Arc<DaemonService>,
    force_arm: bool,
) -> Option<ConfigWatcher> {
    let path = shared_config
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .config_path
        .clone()?;

    let (watcher, mut changes) = match ConfigWatcher::start(&path) {
        Ok(started) => started,
        Err(e) => {
            warn!("Config hot-reload disabled: {}", e);
            return None;
        }
    };

    let shared_config = shared_config.clone();
    tokio::spawn(async move {
        while changes.recv().await.is_some() {
            // One save often produces several events
            while changes.try_recv().is_ok() {}

            match reload_shared_config(&shared_config, force_arm) {
                Ok(config) => {
                    service.apply_config(&config);
                    info!("Configuration hot-reloaded");
                }
                Err(e) => warn!("Config reload failed, keeping previous settings: {}", e),
            }
        }
    });

    Some(watcher)
}
