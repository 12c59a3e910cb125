mod cache;
mod config;
mod db;
mod error;
mod geometry;
mod integrations;
mod kafka;
mod matching;
mod models;
mod relay;
#[cfg(test)]
mod testutil;
mod trips;

use std::sync::Arc;

use anyhow::bail;
use tokio::sync::watch;
use tracing::info;

use cache::TtlCache;
use config::AppConfig;
use db::repo::{PgTripRepository, TripRepository};
use kafka::KafkaLocationPublisher;
use relay::connection::RelayState;
use relay::groups::GroupRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    let mode = std::env::args().nth(1).unwrap_or_else(|| "serve".to_string());
    info!("Starting Coride Trips Service ({mode})...");

    // Init DB
    let pool = db::init_pool(&config.database_url).await?;
    info!("Connected to database");

    let repo = Arc::new(PgTripRepository::new(pool));
    let cache = Arc::new(TtlCache::new());

    match mode.as_str() {
        "serve" => serve(config, repo, cache).await,
        "seed-config" => {
            trips::seed_config(repo.as_ref(), &cache).await?;
            Ok(())
        }
        "create-trip" => create_trip(&config, repo.as_ref()).await,
        "matches" => find_matches(repo.as_ref(), &cache).await,
        "history" => show_history(repo.as_ref()).await,
        other => bail!("unknown run mode: {other} (expected serve | seed-config | create-trip | matches | history)"),
    }
}

fn positional_f64(position: usize, name: &str) -> anyhow::Result<f64> {
    std::env::args()
        .nth(position)
        .ok_or_else(|| anyhow::anyhow!("missing argument: {name}"))?
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid {name}"))
}

/// Management command: declare a trip through the external route provider.
async fn create_trip(config: &AppConfig, repo: &PgTripRepository) -> anyhow::Result<()> {
    let provider =
        integrations::routes::GoogleRoutesClient::new(&config.routes_api_url, &config.routes_api_key)?;
    let request = trips::CreateTripRequest {
        starting_latitude: positional_f64(2, "starting_latitude")?,
        starting_longitude: positional_f64(3, "starting_longitude")?,
        destination_latitude: positional_f64(4, "destination_latitude")?,
        destination_longitude: positional_f64(5, "destination_longitude")?,
        available_seats: positional_f64(6, "available_seats")? as i32,
        is_ride_requests_allowed: true,
    };

    let trip = trips::create_trip(repo, &provider, request).await?;
    println!("{}", trip.trip_id);
    Ok(())
}

/// Management command: run a rider matching query and print the result page.
async fn find_matches(repo: &PgTripRepository, cache: &TtlCache) -> anyhow::Result<()> {
    let query = matching::MatchQuery {
        starting_latitude: positional_f64(2, "starting_latitude")?,
        starting_longitude: positional_f64(3, "starting_longitude")?,
        destination_latitude: positional_f64(4, "destination_latitude")?,
        destination_longitude: positional_f64(5, "destination_longitude")?,
        number_of_seats: positional_f64(6, "number_of_seats")? as i32,
        intersection_radius_meters: std::env::args().nth(7).and_then(|r| r.parse().ok()),
        page: None,
        per_page: None,
    };

    let response = trips::find_matching_trips(repo, cache, &query).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Management command: print a trip's most recent location pings, newest
/// first.
async fn show_history(repo: &PgTripRepository) -> anyhow::Result<()> {
    let trip_id = std::env::args()
        .nth(2)
        .ok_or_else(|| anyhow::anyhow!("missing argument: trip_id"))?;
    let limit = std::env::args()
        .nth(3)
        .and_then(|l| l.parse().ok())
        .unwrap_or(50);

    let history = repo.location_history(&trip_id, limit).await?;
    println!("{}", serde_json::to_string_pretty(&history)?);
    Ok(())
}

/// Runs the relay server together with the bus consumer that fans consumed
/// location events back out to this process's broadcast groups.
async fn serve(
    config: AppConfig,
    repo: Arc<PgTripRepository>,
    cache: Arc<TtlCache>,
) -> anyhow::Result<()> {
    let groups = Arc::new(GroupRegistry::new());
    let publisher = Arc::new(KafkaLocationPublisher::new(&config)?);

    let state = Arc::new(RelayState {
        repo,
        cache,
        groups: groups.clone(),
        publisher,
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        shutdown_tx.send(true).ok();
    });

    let consumer_config = config.clone();
    let consumer_shutdown = shutdown_rx.clone();
    let consumer = tokio::spawn(async move {
        kafka::start_location_consumer(&consumer_config, groups, consumer_shutdown).await
    });

    relay::server::run_relay_server(&config.ws_bind_addr, state, shutdown_rx).await?;
    consumer.await??;
    Ok(())
}
