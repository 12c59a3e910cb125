use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{TripError, TripResult};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A computed driver route as returned by the external provider.
#[derive(Debug, Clone)]
pub struct ComputedRoute {
    pub encoded_polyline: String,
    pub distance_meters: f64,
    pub duration: Option<String>,
}

/// External route-computation provider. Trip creation depends on this seam
/// only; tests substitute a canned implementation.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    async fn compute_route(
        &self,
        origin_lat: f64,
        origin_lon: f64,
        destination_lat: f64,
        destination_lon: f64,
    ) -> TripResult<ComputedRoute>;
}

/// Google Routes API client.
pub struct GoogleRoutesClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct RoutesResponse {
    #[serde(default)]
    routes: Vec<RouteEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteEntry {
    distance_meters: Option<f64>,
    duration: Option<String>,
    polyline: Option<RoutePolyline>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoutePolyline {
    encoded_polyline: Option<String>,
}

impl GoogleRoutesClient {
    pub fn new(base_url: &str, api_key: &str) -> TripResult<Self> {
        if api_key.is_empty() {
            return Err(TripError::Upstream("route provider API key is missing".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| TripError::Upstream(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl RouteProvider for GoogleRoutesClient {
    async fn compute_route(
        &self,
        origin_lat: f64,
        origin_lon: f64,
        destination_lat: f64,
        destination_lon: f64,
    ) -> TripResult<ComputedRoute> {
        let payload = json!({
            "origin": { "location": { "latLng": {
                "latitude": origin_lat, "longitude": origin_lon
            }}},
            "destination": { "location": { "latLng": {
                "latitude": destination_lat, "longitude": destination_lon
            }}},
            "travelMode": "DRIVE"
        });

        info!(
            "Requesting route from {origin_lat},{origin_lon} to {destination_lat},{destination_lon}"
        );

        let response = self
            .client
            .post(format!("{}:computeRoutes", self.base_url))
            .header("X-Goog-Api-Key", &self.api_key)
            .header(
                "X-Goog-FieldMask",
                "routes.distanceMeters,routes.duration,routes.polyline.encodedPolyline",
            )
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TripError::Timeout(DEFAULT_TIMEOUT)
                } else {
                    TripError::Upstream(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Route provider returned status {status}");
            return Err(TripError::Upstream(format!(
                "Unable to compute route (status {status})"
            )));
        }

        let body: RoutesResponse = response
            .json()
            .await
            .map_err(|e| TripError::Upstream(e.to_string()))?;

        let route = body
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| TripError::Upstream("No route found for the given coordinates".into()))?;

        let encoded_polyline = route
            .polyline
            .and_then(|p| p.encoded_polyline)
            .ok_or_else(|| TripError::Upstream("route response missing encoded polyline".into()))?;

        Ok(ComputedRoute {
            encoded_polyline,
            distance_meters: route.distance_meters.unwrap_or(0.0),
            duration: route.duration,
        })
    }
}
