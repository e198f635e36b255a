//! tripcache - show a device's trip from the terminal and follow it live.
//!
//! Trip data is fetched from the tracking backend and cached on disk, so a
//! trip that was viewed once can be shown again without a connection.

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tripcache_core::models::{Trip, TripSource};
use tripcache_core::{
    ApiClient, Config, FileSettingsStore, FileStore, LiveTracker, MapState, NetworkStatus,
    SystemClock, TokioTimer, TrackerDeps,
};

/// Directory for daily log files; stderr only when unset.
const LOG_DIR_ENV: &str = "TRIPCACHE_LOG_DIR";

#[derive(Debug, Parser)]
#[command(name = "tripcache")]
#[command(about = "Show a device's trip and follow it live, from cache when offline", long_about = None)]
#[command(version)]
struct Args {
    /// Device to show (default: from config)
    #[arg(long, value_name = "ID")]
    device: Option<i64>,

    /// Trip start (ISO-8601)
    #[arg(long, value_name = "ISO")]
    from: Option<String>,

    /// Trip end (ISO-8601); without one the range runs to the end of today (UTC)
    #[arg(long, value_name = "ISO")]
    to: Option<String>,

    /// Trip identifier
    #[arg(long, value_name = "ID")]
    trip_id: Option<String>,

    /// Trip title
    #[arg(long, value_name = "TEXT")]
    title: Option<String>,

    /// Trip was entered manually (never followed live)
    #[arg(long)]
    manual: bool,

    /// Turn live mode on (remembered)
    #[arg(long, overrides_with = "no_live")]
    live: bool,

    /// Turn live mode off (remembered)
    #[arg(long, overrides_with = "live")]
    no_live: bool,

    /// Live polling interval in milliseconds (remembered)
    #[arg(long, value_name = "MS")]
    interval: Option<u64>,

    /// Do not touch the network, use cached data only
    #[arg(long)]
    offline: bool,

    /// Print the map state as JSON
    #[arg(long)]
    json: bool,

    /// Prune expired and excess cache entries, then exit
    #[arg(long)]
    prune: bool,
}

impl Args {
    /// Requested live mode, if either flag was given. The last one wins.
    fn live_mode(&self) -> Option<bool> {
        if self.live {
            Some(true)
        } else if self.no_live {
            Some(false)
        } else {
            None
        }
    }

    /// The selected trip, or `None` to show the configured default range.
    fn trip(&self, config: &Config) -> Option<Trip> {
        if self.trip_id.is_none() && self.from.is_none() && self.to.is_none() {
            return None;
        }
        Some(Trip {
            id: self.trip_id.clone(),
            title: self.title.clone().unwrap_or_default(),
            von: self.from.clone().unwrap_or_default(),
            bis: self.to.clone().unwrap_or_default(),
            distance: 0.0,
            source: if self.manual {
                TripSource::Manual
            } else {
                TripSource::Auto
            },
            device_id: Some(config.default_device_id),
        })
    }
}

/// Initialize the tracing subscriber for logging.
///
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=tripcache_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "tripcache.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(filter)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

/// One line telling the user the map is not fresh, if it isn't.
fn cached_banner(state: &MapState, now: DateTime<Utc>) -> Option<String> {
    if !state.provenance.using_cached_data {
        return None;
    }
    Some(match state.provenance.age_display(now) {
        Some(age) => format!("Showing cached data saved {}", age),
        None => "Showing cached data".to_string(),
    })
}

fn print_summary(state: &MapState) {
    let points: usize = state.polylines.iter().map(|l| l.path.len()).sum();
    println!(
        "{} route(s), {} points, {:.2} km, {} marker(s), zoom {}",
        state.polylines.len(),
        points,
        state.distance_km,
        state.locations.len(),
        state.zoom
    );
    for line in &state.polylines {
        let last = line
            .path
            .iter()
            .rev()
            .find_map(|p| p.timestamp.as_deref())
            .unwrap_or("-");
        println!(
            "  {} {} - {} points, last fix {}",
            line.color,
            line.device_name,
            line.path.len(),
            last
        );
    }
    if let Some(banner) = cached_banner(state, Utc::now()) {
        println!("{}", banner);
    }
}

fn print_state(state: &MapState, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(state)?);
    } else {
        print_summary(state);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let _log_guard = init_tracing();
    info!("tripcache starting");

    let mut config = Config::load().context("Failed to load config")?;
    config.apply_env_overrides();
    if let Some(device) = args.device {
        config.default_device_id = device;
    }

    let mut client = ApiClient::new(config.api_base_url.clone())?;
    if let Some(token) = config.api_token.clone() {
        client.set_token(token);
    }
    let client = Arc::new(client);

    let network = NetworkStatus::new();
    network.set_offline(args.offline);

    let cache_dir = config.cache_dir()?;
    let store = FileStore::new(cache_dir.clone())
        .with_context(|| format!("Failed to open cache at {}", cache_dir.display()))?;
    let settings = FileSettingsStore::new(Config::settings_path()?);

    let (timer, mut ticks) = TokioTimer::new();
    let tracker = LiveTracker::new(TrackerDeps {
        store: Arc::new(store),
        plots: client.clone(),
        pois: client.clone(),
        positions: client,
        settings: Arc::new(settings),
        timer: Arc::new(timer),
        clock: Arc::new(SystemClock),
        network,
        defaults: config.query_defaults(Utc::now()),
    });

    if args.prune {
        let (travel, live) = tracker.prune_caches().await?;
        println!(
            "Trip snapshots: {} expired, {} evicted, {} kept",
            travel.expired, travel.evicted, travel.retained
        );
        println!(
            "Live routes: {} expired, {} evicted, {} kept",
            live.expired, live.evicted, live.retained
        );
        return Ok(());
    }

    if let Some(interval) = args.interval {
        tracker.set_polling_interval(interval);
    }

    let trips: Vec<Trip> = args.trip(&config).into_iter().collect();
    tracker
        .select_trips(trips)
        .await
        .context("Failed to load trip data")?;

    if let Some(live) = args.live_mode() {
        tracker.set_live_mode_enabled(live).await;
    }
    print_state(&tracker.snapshot(), args.json)?;

    if tracker.is_live() {
        eprintln!(
            "Following live every {}s, Ctrl-C to stop",
            tracker.settings().live_polling_interval_ms / 1000
        );
        tracker
            .run_until(&mut ticks, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await;
        print_state(&tracker.snapshot(), args.json)?;
    }

    info!("tripcache shutting down");
    Ok(())
}
