use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use gatekeeper::config::GatekeeperConfig;
use gatekeeper::ratelimit::RateLimiter;
use gatekeeper::storage::StorageRegistry;

/// Replay a sequence of requests and token returns against one bucket and
/// print the delay computed for every request.
#[derive(Parser, Debug)]
#[command(name = "gatekeeper", version, about)]
struct Cli {
    /// YAML configuration file (overridable with GATEKEEPER__* variables)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Entity whose bucket is exercised
    #[arg(long, default_value = "test")]
    entity: String,

    /// Service start time in ms since the epoch (defaults to now)
    #[arg(long, allow_negative_numbers = true)]
    service_start: Option<i64>,

    #[arg(long)]
    size: Option<u32>,

    #[arg(long)]
    refresh_rate: Option<u32>,

    /// Refresh interval in seconds
    #[arg(long)]
    refresh_interval: Option<u64>,

    #[arg(long)]
    wait_for_token_ms: Option<u64>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Events to replay: a timestamp in ms issues a request, `release` returns a token
    #[arg(required = true, allow_negative_numbers = true)]
    events: Vec<Event>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy)]
enum Event {
    Request(i64),
    Release,
}

impl FromStr for Event {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("release") {
            return Ok(Event::Release);
        }
        s.parse::<i64>()
            .map(Event::Request)
            .map_err(|_| format!("expected a timestamp in ms or `release`, got {:?}", s))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = GatekeeperConfig::load(cli.config.as_deref())?;
    if let Some(size) = cli.size {
        config.buckets.size = size;
    }
    if let Some(refresh_rate) = cli.refresh_rate {
        config.buckets.refresh_rate = refresh_rate;
    }
    if let Some(refresh_interval) = cli.refresh_interval {
        config.buckets.refresh_interval = refresh_interval;
    }
    if let Some(wait_for_token_ms) = cli.wait_for_token_ms {
        config.wait_for_token_ms = wait_for_token_ms;
    }
    info!(storage = %config.storage.kind, "Configuration loaded");

    let registry = StorageRegistry::with_builtin();
    let limiter = RateLimiter::with_registry(&config, &registry, cli.service_start)?;
    info!(
        entity = %cli.entity,
        service_start = limiter.service_start(),
        "Replaying events"
    );

    for event in &cli.events {
        match *event {
            Event::Request(now) => {
                let delay = limiter.compute_delay_at(&cli.entity, now).await?;
                println!("{}", delay);
            }
            Event::Release => limiter.release_token(&cli.entity).await?,
        }
    }

    if let Some(state) = limiter.bucket_state(&cli.entity).await? {
        info!(
            ops_tokens = state.ops_tokens,
            ops_last = state.ops_last,
            ops_capacity = state.ops_capacity,
            wait_last = state.wait_last,
            wait_capacity = state.wait_capacity,
            "Final bucket state"
        );
    }

    Ok(())
}

/// Log to stderr so stdout carries only the delays.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
