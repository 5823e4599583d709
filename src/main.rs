use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use leafcast::config::Settings;
use leafcast::location::{
    Coordinates, FixCache, FixedLocationService, IpLocationService, LocationProvider,
    LocationService, PositionState,
};
use leafcast::probe::BackendProbe;
use tracing::{info, warn};

/// Leafcast — location and backend plumbing for the plant-diagnosis client
///
/// Examples:
///   leafcast locate
///   leafcast locate --disabled
///   leafcast locate --lat 12.34 --lon 56.78 --watch 3
///   leafcast probe
///   leafcast serve --port 8080
#[derive(Parser)]
#[command(name = "leafcast", version, about, long_about = None)]
struct Cli {
    /// Config file. Defaults to ~/.leafcast/config.json.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve the current position and print it as JSON.
    Locate {
        #[command(flatten)]
        source: SourceArgs,

        /// Print this many further updates after the first resolution.
        #[arg(long, default_value_t = 0)]
        watch: usize,
    },
    /// Probe the configured diagnosis backends.
    Probe,
    /// Serve the location and backend status over HTTP.
    Serve {
        #[command(flatten)]
        source: SourceArgs,

        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, short = 'p', default_value_t = 8080)]
        port: u16,
    },
}

#[derive(clap::Args)]
struct SourceArgs {
    /// Start with real-time location disabled (fallback city only).
    #[arg(long)]
    disabled: bool,

    /// No location capability: always use the fallback city.
    #[arg(long)]
    offline: bool,

    /// Manual latitude (-90 to 90).
    #[arg(long, allow_hyphen_values = true, requires = "lon")]
    lat: Option<f64>,

    /// Manual longitude (-180 to 180).
    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    lon: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("Config load failed")?;

    match cli.command {
        Command::Locate { source, watch } => locate(&settings, &source, watch).await,
        Command::Probe => probe(&settings).await,
        Command::Serve { source, host, port } => {
            let provider = mount_provider(&settings, &source)?;
            let probe = BackendProbe::new(settings.backends.clone(), settings.probe_timeout());
            leafcast::server::start(&host, port, provider, probe).await
        }
    }
}

fn platform_for(settings: &Settings, source: &SourceArgs) -> Result<Option<Arc<dyn LocationService>>> {
    if let (Some(lat), Some(lon)) = (source.lat, source.lon) {
        let coords = Coordinates::new(lat, lon);
        if !coords.is_valid() {
            bail!("Invalid coordinates. Lat: -90..90, Lon: -180..180");
        }
        let platform: Arc<dyn LocationService> = Arc::new(FixedLocationService::new(coords));
        return Ok(Some(platform));
    }
    if source.offline {
        return Ok(None);
    }
    let cache = Arc::new(FixCache::load());
    let platform: Arc<dyn LocationService> = Arc::new(IpLocationService::new(
        settings.ip_endpoint.clone(),
        settings.poll_interval(),
        cache,
    ));
    Ok(Some(platform))
}

fn mount_provider(settings: &Settings, source: &SourceArgs) -> Result<LocationProvider> {
    let platform = platform_for(settings, source)?;
    info!(fallback = %settings.fallback.label, "mounting location provider");
    Ok(LocationProvider::mount_with(
        platform,
        settings.provider_options(),
        !source.disabled,
    ))
}

async fn locate(settings: &Settings, source: &SourceArgs, updates: usize) -> Result<()> {
    let provider = mount_provider(settings, source)?;

    // The platform bounds the one-shot wait; allow a little slack on top.
    let first_bound = Duration::from_millis(settings.one_shot.timeout_ms.unwrap_or(10_000))
        + Duration::from_secs(5);
    let update_bound = settings.poll_interval() * 2 + Duration::from_secs(5);
    follow(&provider, updates, first_bound, update_bound, print_state).await?;

    if !provider.state().is_live() {
        warn!("position is a fallback, not a live reading");
    }
    Ok(())
}

/// Emit the first resolved state, then up to `updates` further ones. Stops
/// early when the platform will not deliver more samples or an update does
/// not arrive within `update_bound`.
async fn follow(
    provider: &LocationProvider,
    updates: usize,
    first_bound: Duration,
    update_bound: Duration,
    mut emit: impl FnMut(&PositionState) -> Result<()>,
) -> Result<usize> {
    let mut rx = provider.subscribe();
    let first = tokio::time::timeout(first_bound, rx.wait_for(|s| !s.is_loading))
        .await
        .context("Timed out waiting for a position")?
        .context("Location provider closed")?
        .clone();
    emit(&first)?;
    let mut emitted = 1;

    if updates > 0 && !provider.expects_updates() {
        info!("platform delivers no further samples, nothing to watch");
        return Ok(emitted);
    }
    for _ in 0..updates {
        match tokio::time::timeout(update_bound, rx.changed()).await {
            Ok(changed) => changed.context("Location provider closed")?,
            Err(_) => {
                warn!(bound_secs = update_bound.as_secs(), "no position update arrived, stopping");
                break;
            }
        }
        let state = rx.borrow_and_update().clone();
        emit(&state)?;
        emitted += 1;
    }
    Ok(emitted)
}

async fn probe(settings: &Settings) -> Result<()> {
    let probe = BackendProbe::new(settings.backends.clone(), settings.probe_timeout());
    let reports = tokio::task::spawn_blocking(move || probe.run())
        .await
        .context("Backend probe failed")?;
    for report in &reports {
        eprintln!("  {} {}", report.url, report.status.label());
    }
    println!("{}", serde_json::to_string_pretty(&reports)?);
    if !reports.iter().any(|r| r.status.is_working()) {
        warn!("no diagnosis backend is reachable");
    }
    Ok(())
}

fn print_state(state: &PositionState) -> Result<()> {
    if let Some(coords) = state.coordinates() {
        let source = state.source.map(|s| s.to_string()).unwrap_or_default();
        eprintln!("  \u{1F4CD} {} ({})", coords, source);
    }
    println!("{}", serde_json::to_string_pretty(state)?);
    Ok(())
}
