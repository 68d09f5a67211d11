//! sysdeck CLI
//!
//! System stats history and live dashboard gateway.

use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use sysdeck::{
    activity::ActivityLog,
    collector::{share, FixedSource, Reading, SharedSource, SystemSource},
    config::{Config, SettingsStore},
    core::{
        HistoryStore, LiveBroadcaster, RetentionPolicy, Sampler, SamplerIntervals, SharedClock,
        SystemClock,
    },
    gateway::{load_or_create_token, GatewayConfig, Services, TransportGateway},
    logging, VERSION,
};

#[cfg(feature = "client")]
use sysdeck::{
    client::{GatewayClient, PushClient, ReconnectPolicy},
    gateway::EndpointKind,
};

#[derive(Parser)]
#[command(name = "sysdeck")]
#[command(version = VERSION)]
#[command(about = "System stats history with a live web dashboard", long_about = None)]
struct Cli {
    /// Log filter level when RUST_LOG is unset (defaults to the config value)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[derive(Subcommand)]
enum Commands {
    /// Start sampling and, if enabled, the web gateway
    Start {
        /// Enable web access for this run regardless of the saved setting
        #[arg(long)]
        web_access: bool,

        /// Replay a constant reading instead of reading the host
        #[arg(long)]
        fixed: bool,
    },

    /// Show activity counters and stored history extent
    Status,

    /// Print stored history
    History {
        /// How far back to look
        #[arg(long, default_value = "60")]
        minutes: i64,

        /// Average into buckets of this many seconds
        #[arg(long)]
        bucket_secs: Option<i64>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Delete all stored history
    Clear {
        /// Skip the confirmation notice
        #[arg(long)]
        yes: bool,
    },

    /// Print the gateway token
    Token,

    /// Turn web access on or off
    WebAccess {
        #[arg(value_enum)]
        state: Switch,
    },

    /// Follow live updates from a running gateway
    #[cfg(feature = "client")]
    Watch {
        /// Push endpoint URL (defaults to the configured push port)
        #[arg(long)]
        url: Option<String>,
    },

    /// Show configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config, using defaults: {e}");
        Config::default()
    });
    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());

    match cli.command {
        Commands::Start { web_access, fixed } => cmd_start(config, &level, web_access, fixed).await,
        Commands::Status => {
            logging::enable_console_logging(&level);
            cmd_status(&config).await
        }
        Commands::History {
            minutes,
            bucket_secs,
            json,
        } => {
            logging::enable_console_logging(&level);
            cmd_history(&config, minutes, bucket_secs, json).await
        }
        Commands::Clear { yes } => {
            logging::enable_console_logging(&level);
            cmd_clear(&config, yes).await
        }
        Commands::Token => cmd_token(&config),
        Commands::WebAccess { state } => {
            logging::enable_console_logging(&level);
            cmd_web_access(&config, matches!(state, Switch::On)).await
        }
        #[cfg(feature = "client")]
        Commands::Watch { url } => {
            logging::enable_console_logging(&level);
            cmd_watch(&config, url).await
        }
        Commands::Config => cmd_config(&config),
    }
}

fn open_store(config: &Config) -> HistoryStore {
    let clock: SharedClock = Arc::new(SystemClock);
    HistoryStore::new(config.db_path(), RetentionPolicy::new(config.tier_basis), clock)
}

async fn cmd_start(config: Config, level: &str, web_access: bool, fixed: bool) -> Result<()> {
    println!("sysdeck v{VERSION}");
    println!();

    config
        .ensure_directories()
        .context("could not create data directories")?;
    logging::enable_logging(&config.data_path, level)?;

    let clock: SharedClock = Arc::new(SystemClock);
    let store = Arc::new(HistoryStore::new(
        config.db_path(),
        RetentionPolicy::new(config.tier_basis),
        clock.clone(),
    ));
    if let Err(e) = store.init().await {
        eprintln!("Warning: History storage unavailable: {e}");
        eprintln!("Live updates continue without persistence.");
    }

    let broadcaster = Arc::new(LiveBroadcaster::default());
    let settings = Arc::new(SettingsStore::load(config.settings_path()));
    let activity = Arc::new(ActivityLog::with_persistence(config.activity_path()));

    let source: SharedSource = if fixed {
        share(FixedSource::constant(Reading {
            cpu: 12.0,
            ram: 48.0,
            disk: 61.0,
            network_throughput: 4.0,
            battery_percent: Some(87.0),
            temperature: Some(45.0),
        }))
    } else {
        share(SystemSource::new())
    };

    println!("  Database: {:?}", config.db_path());
    println!("  Stats interval: {}s", config.stats_interval.as_secs());
    println!("  Tray interval: {}s", config.tray_interval.as_secs());
    println!("  Retention basis: {:?}", config.tier_basis);

    let sampler = Arc::new(Sampler::new(
        source,
        store.clone(),
        broadcaster.clone(),
        activity.clone(),
        clock,
    ));
    let mut sampler_handle = sampler.spawn(SamplerIntervals {
        stats: config.stats_interval,
        tray: config.tray_interval,
        expiry: config.expiry_interval,
    });

    let mut tray = sampler_handle.tray();
    let tray_task = tokio::spawn(async move {
        while tray.changed().await.is_ok() {
            if let Some(status) = tray.borrow_and_update().clone() {
                tracing::debug!(label = %status.label, "Tray updated");
            }
        }
    });

    let gateway = TransportGateway::new(
        GatewayConfig::from_config(&config)?,
        Services {
            store: store.clone(),
            broadcaster,
            settings: settings.clone(),
            activity: activity.clone(),
        },
    );

    if web_access || settings.get().web_access_enabled {
        match gateway.enable().await {
            Ok(status) => {
                for endpoint in &status.endpoints {
                    match (endpoint.addr, &endpoint.error) {
                        (Some(addr), _) => println!("  {} endpoint: http://{}", endpoint.kind.name(), addr),
                        (None, Some(e)) => eprintln!("Warning: {} endpoint down: {e}", endpoint.kind.name()),
                        (None, None) => {}
                    }
                }
            }
            Err(e) => eprintln!("Warning: Web access unavailable: {e}"),
        }
    } else {
        println!("  Web access: disabled");
    }

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    println!();
    println!("Stopping...");
    sampler_handle.stop().await;
    tray_task.abort();
    gateway.disable().await;
    store.close().await;

    if let Err(e) = activity.save() {
        eprintln!("Warning: Could not save activity counters: {e}");
    }
    println!("{}", activity.summary());
    Ok(())
}

async fn cmd_status(config: &Config) -> Result<()> {
    println!("sysdeck v{VERSION}");
    println!();

    let activity = ActivityLog::with_persistence(config.activity_path());
    println!("{}", activity.summary());
    println!();

    let store = open_store(config);
    match store.open().await {
        Ok(()) => {
            let extent = store.query_extent().await?;
            println!("History:");
            println!("  Samples: {}", extent.count);
            if let (Some(oldest), Some(newest)) = (extent.oldest, extent.newest) {
                println!("  Oldest: {}", format_millis(oldest));
                println!("  Newest: {}", format_millis(newest));
            }
            store.close().await;
        }
        Err(e) => println!("History: unavailable ({e})"),
    }

    let settings = SettingsStore::load(config.settings_path()).get();
    println!();
    println!(
        "Web access: {}",
        if settings.web_access_enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

async fn cmd_history(config: &Config, minutes: i64, bucket_secs: Option<i64>, json: bool) -> Result<()> {
    let store = open_store(config);
    store.open().await?;

    let end = store.now_millis();
    let start = end - minutes.max(0) * 60_000;
    let samples = match bucket_secs {
        Some(secs) if secs > 0 => store.query_buckets(start, end, secs * 1000).await?,
        _ => store.query_range(start, end).await?,
    };
    store.close().await;

    if json {
        let records: Vec<sysdeck::HistoryRecord> = samples.iter().map(Into::into).collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if samples.is_empty() {
        println!("No samples in the last {minutes} minutes.");
        return Ok(());
    }

    println!(
        "{:<20} {:>6} {:>6} {:>6} {:>10} {:>6}",
        "time", "cpu%", "ram%", "disk%", "net KB/s", "temp"
    );
    for s in &samples {
        println!(
            "{:<20} {:>6.1} {:>6.1} {:>6.1} {:>10.1} {:>6}",
            format_millis(s.timestamp),
            s.cpu,
            s.ram,
            s.disk,
            s.network_throughput,
            s.temperature
                .map(|t| format!("{t:.0}"))
                .unwrap_or_else(|| "-".to_string())
        );
    }
    println!();
    println!("{} samples", samples.len());
    Ok(())
}

async fn cmd_clear(config: &Config, yes: bool) -> Result<()> {
    if !yes {
        eprintln!("This deletes all stored history. Re-run with --yes to confirm.");
        std::process::exit(1);
    }
    let store = open_store(config);
    store.init().await?;
    let deleted = store.reset().await?;
    store.close().await;
    println!("Deleted {deleted} samples.");
    Ok(())
}

fn cmd_token(config: &Config) -> Result<()> {
    let token = load_or_create_token(&config.token_path())?;
    println!("{token}");
    Ok(())
}

async fn cmd_web_access(config: &Config, enabled: bool) -> Result<()> {
    let settings = SettingsStore::load(config.settings_path());
    settings.set_web_access(enabled)?;
    println!("Web access {}.", if enabled { "enabled" } else { "disabled" });

    // A running instance only notices through its own API.
    #[cfg(feature = "client")]
    if !enabled {
        let gateway = GatewayConfig::from_config(config)?;
        let client = GatewayClient::new(gateway.url(EndpointKind::Api), gateway.token)?;
        if client.toggle_web_access(false).await.is_ok() {
            println!("Running gateway notified.");
        }
    }
    if enabled {
        println!("Restart `sysdeck start` to open the gateway.");
    }
    Ok(())
}

#[cfg(feature = "client")]
async fn cmd_watch(config: &Config, url: Option<String>) -> Result<()> {
    let gateway = GatewayConfig::from_config(config)?;
    let url = url.unwrap_or_else(|| gateway.url(EndpointKind::Push).replacen("http", "ws", 1));
    println!("Watching {url} (Ctrl+C to stop)");

    let client = PushClient::new(url, gateway.token, ReconnectPolicy::default());
    let follow = client.run(|event| match event {
        sysdeck::PushEvent::DetailedStatsUpdate(s) => println!(
            "{}  cpu {:>5.1}%  ram {:>5.1}%  disk {:>5.1}%  net {:>8.1} KB/s",
            format_millis(s.timestamp),
            s.cpu,
            s.ram,
            s.disk,
            s.network_throughput
        ),
        other => println!("{}", serde_json::to_string(&other).unwrap_or_default()),
    });

    tokio::select! {
        result = follow => result?,
        _ = tokio::signal::ctrl_c() => {}
    }
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    println!("Configuration file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn format_millis(millis: i64) -> String {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}
