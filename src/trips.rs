use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info};

use crate::cache::{TtlCache, SETTINGS_CACHE_KEY};
use crate::db::repo::TripRepository;
use crate::error::{TripError, TripResult};
use crate::geometry;
use crate::integrations::routes::RouteProvider;
use crate::matching::{self, MatchQuery, MatchResponse, TripRouteMatch, MATCHABLE_STATUSES};
use crate::models::settings::TripSettingsConfig;
use crate::models::trip::{NewTrip, Trip};

/// Trip declaration payload from a driver.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTripRequest {
    pub starting_latitude: f64,
    pub starting_longitude: f64,
    pub destination_latitude: f64,
    pub destination_longitude: f64,
    pub available_seats: i32,
    #[serde(default)]
    pub is_ride_requests_allowed: bool,
}

/// Declares a trip: computes the route through the external provider,
/// decodes the returned polyline, and persists the result.
///
/// Provider failure fails the creation; it is not retried inline. A polyline
/// the provider returned but we cannot decode is surfaced loudly here rather
/// than discovered later during matching.
pub async fn create_trip(
    repo: &dyn TripRepository,
    provider: &dyn RouteProvider,
    request: CreateTripRequest,
) -> TripResult<Trip> {
    if !geometry::validate_coordinates(request.starting_latitude, request.starting_longitude)
        || !geometry::validate_coordinates(
            request.destination_latitude,
            request.destination_longitude,
        )
    {
        return Err(TripError::validation("Invalid coordinates"));
    }
    if request.available_seats < 0 {
        return Err(TripError::validation("available_seats must not be negative"));
    }

    let route = provider
        .compute_route(
            request.starting_latitude,
            request.starting_longitude,
            request.destination_latitude,
            request.destination_longitude,
        )
        .await?;

    let decoded = geometry::decode_path(&route.encoded_polyline).map_err(|e| {
        error!("route provider returned an undecodable polyline: {e}");
        e
    })?;
    if decoded.0.len() < 2 {
        return Err(TripError::Decode(
            "decoded route has fewer than two points".into(),
        ));
    }

    let trip = repo
        .create_trip(NewTrip {
            starting_lon: request.starting_longitude,
            starting_lat: request.starting_latitude,
            destination_lon: request.destination_longitude,
            destination_lat: request.destination_latitude,
            route_polyline: route.encoded_polyline,
            available_seats: request.available_seats,
            is_ride_requests_allowed: request.is_ride_requests_allowed,
            distance_meters: route.distance_meters,
            duration: route.duration,
        })
        .await?;

    info!(trip_id = %trip.trip_id, "trip created");
    Ok(trip)
}

/// Active matching settings: cache first, then the store, then hardcoded
/// defaults. Only a row actually found in the store is cached (unbounded,
/// invalidated by re-seed).
pub async fn active_match_settings(
    repo: &dyn TripRepository,
    cache: &TtlCache,
) -> TripResult<TripSettingsConfig> {
    if let Some(value) = cache.get(SETTINGS_CACHE_KEY).await {
        if let Ok(settings) = serde_json::from_value::<TripSettingsConfig>(value) {
            return Ok(settings);
        }
    }

    match repo.get_active_settings().await? {
        Some(settings) => {
            if let Ok(value) = serde_json::to_value(&settings) {
                cache.set(SETTINGS_CACHE_KEY, value, None).await;
            }
            Ok(settings)
        }
        None => Ok(TripSettingsConfig::default()),
    }
}

/// Rider-facing matching query: Ongoing/Initiated trips created today, run
/// through the route matching engine, paginated.
pub async fn find_matching_trips(
    repo: &dyn TripRepository,
    cache: &TtlCache,
    query: &MatchQuery,
) -> TripResult<MatchResponse> {
    let matcher = TripRouteMatch::from_query(query)?;
    let settings = active_match_settings(repo, cache).await?;

    let candidates = repo
        .query_candidate_trips(&MATCHABLE_STATUSES, matching::candidate_window_start(Utc::now()))
        .await?;

    let matches = matcher.match_trips(&candidates, &settings);
    Ok(matching::paginate(matches, query.page, query.per_page))
}

/// Get-or-create the active settings row, then refresh the cache. This is
/// the explicit invalidation entry point for the otherwise unbounded
/// settings cache entry.
pub async fn seed_config(
    repo: &dyn TripRepository,
    cache: &TtlCache,
) -> TripResult<TripSettingsConfig> {
    let (settings, created) = repo.seed_settings().await?;

    if created {
        info!(
            "TripSettingsConfig created: radius={}m, speed={}km/h ({:.2} m/s)",
            settings.radius_meters, settings.speed_kmh, settings.speed_mps
        );
    } else {
        info!("Active TripSettingsConfig already exists");
    }

    match serde_json::to_value(&settings) {
        Ok(value) => cache.set(SETTINGS_CACHE_KEY, value, None).await,
        Err(_) => cache.invalidate(SETTINGS_CACHE_KEY).await,
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{encode_route, FailingRouteProvider, FixedRouteProvider, MemoryRepository};

    fn request() -> CreateTripRequest {
        CreateTripRequest {
            starting_latitude: 6.5244,
            starting_longitude: 3.3792,
            destination_latitude: 6.4310,
            destination_longitude: 3.4210,
            available_seats: 3,
            is_ride_requests_allowed: true,
        }
    }

    #[tokio::test]
    async fn create_trip_persists_computed_route() {
        let repo = MemoryRepository::new();
        let provider = FixedRouteProvider::new(encode_route(&[(3.3792, 6.5244), (3.4210, 6.4310)]));

        let trip = create_trip(&repo, &provider, request()).await.unwrap();
        assert_eq!(trip.trip_status, "Initiated");
        assert!(trip.route_polyline.is_some());

        let stored = repo.get_trip(&trip.trip_id.to_string()).await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn provider_failure_fails_creation() {
        let repo = MemoryRepository::new();
        let provider = FailingRouteProvider;

        let result = create_trip(&repo, &provider, request()).await;
        assert!(matches!(result, Err(TripError::Upstream(_))));
        assert!(repo.trip_count().await == 0);
    }

    #[tokio::test]
    async fn corrupt_polyline_fails_creation_loudly() {
        let repo = MemoryRepository::new();
        let provider = FixedRouteProvider::new("_p~iF~ps|".to_string());

        let result = create_trip(&repo, &provider, request()).await;
        assert!(matches!(result, Err(TripError::Decode(_))));
        assert!(repo.trip_count().await == 0);
    }

    #[tokio::test]
    async fn missing_settings_degrade_to_defaults() {
        let repo = MemoryRepository::new();
        let cache = TtlCache::new();

        let settings = active_match_settings(&repo, &cache).await.unwrap();
        assert_eq!(settings.speed_kmh, 30.0);
        // Defaults are not cached; a later seed must win.
        assert!(cache.get(SETTINGS_CACHE_KEY).await.is_none());
    }

    #[tokio::test]
    async fn seed_config_populates_cache() {
        let repo = MemoryRepository::new();
        let cache = TtlCache::new();

        let settings = seed_config(&repo, &cache).await.unwrap();
        assert!(settings.is_active);
        assert!(cache.get(SETTINGS_CACHE_KEY).await.is_some());

        let cached = active_match_settings(&repo, &cache).await.unwrap();
        assert_eq!(cached.radius_meters, settings.radius_meters);
    }

    #[tokio::test]
    async fn find_matching_trips_end_to_end() {
        let repo = MemoryRepository::new();
        let cache = TtlCache::new();
        let provider = FixedRouteProvider::new(encode_route(&[(3.3792, 6.5244), (3.4210, 6.4310)]));
        create_trip(&repo, &provider, request()).await.unwrap();

        let response = find_matching_trips(
            &repo,
            &cache,
            &MatchQuery {
                starting_latitude: 6.5244,
                starting_longitude: 3.3792,
                destination_latitude: 6.4310,
                destination_longitude: 3.4210,
                number_of_seats: 1,
                intersection_radius_meters: Some(500.0),
                page: None,
                per_page: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(response.total_matches, 1);
        assert_eq!(response.results.len(), 1);
    }
}
