//! Google Routes and Geocoding API adapters.
//!
//! Routes are requested traffic-aware for driving; departures resolve to the
//! next future occurrence of the configured weekday and time in the system
//! time zone, since the API rejects departures in the past.

use jiff::civil::Date;
use jiff::tz::TimeZone;
use jiff::{Timestamp, Zoned};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GeocodeError, RouteError};
use crate::model::{Coordinate, RouteQuery, RouteResult, TransportMode};
use crate::traits::{Geocoder, RoutingProvider};

pub const ROUTES_API_URL: &str = "https://routes.googleapis.com/directions/v2:computeRoutes";
pub const GEOCODE_API_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";
const FIELD_MASK: &str = "routes.duration,routes.distanceMeters";

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub api_key: String,
    pub routes_url: String,
    pub geocode_url: String,
    pub timeout_secs: u64,
}

impl GoogleConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            routes_url: ROUTES_API_URL.to_string(),
            geocode_url: GEOCODE_API_URL.to_string(),
            timeout_secs: 10,
        }
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::blocking::Client, reqwest::Error> {
    reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
}

#[derive(Debug, Clone)]
pub struct GoogleRoutesClient {
    config: GoogleConfig,
    client: reqwest::blocking::Client,
}

impl GoogleRoutesClient {
    pub fn new(config: GoogleConfig) -> Result<Self, reqwest::Error> {
        let client = http_client(config.timeout_secs)?;
        Ok(Self { config, client })
    }
}

fn travel_mode(mode: TransportMode) -> &'static str {
    match mode {
        TransportMode::Auto => "DRIVE",
        TransportMode::Walking => "WALK",
        TransportMode::Bicycle => "BICYCLE",
        TransportMode::Transit => "TRANSIT",
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LatLng {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Waypoint {
    location: WaypointLocation,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WaypointLocation {
    lat_lng: LatLng,
}

impl From<Coordinate> for Waypoint {
    fn from(coordinate: Coordinate) -> Self {
        Self {
            location: WaypointLocation {
                lat_lng: LatLng {
                    latitude: coordinate.lat,
                    longitude: coordinate.lon,
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ComputeRoutesRequest {
    origin: Waypoint,
    destination: Waypoint,
    travel_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    routing_preference: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    departure_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComputeRoutesResponse {
    #[serde(default)]
    routes: Vec<GoogleRoute>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleRoute {
    /// Protobuf duration, e.g. `"754s"`.
    duration: Option<String>,
    distance_meters: Option<f64>,
}

fn request_body(query: &RouteQuery, today: Date, tz: &TimeZone) -> Result<ComputeRoutesRequest, RouteError> {
    let departure_time = match query.departure {
        Some(departure) => {
            let local = departure.next_occurrence(today)?;
            let zoned = local
                .to_zoned(tz.clone())
                .map_err(|err| RouteError::InvalidInput(format!("departure time: {}", err)))?;
            Some(zoned.timestamp().to_string())
        }
        None => None,
    };
    let routing_preference = (query.mode == TransportMode::Auto).then_some("TRAFFIC_AWARE");
    Ok(ComputeRoutesRequest {
        origin: query.origin.into(),
        destination: query.destination.into(),
        travel_mode: travel_mode(query.mode),
        routing_preference,
        departure_time,
    })
}

fn parse_duration(value: &str) -> Option<f64> {
    value.trim().strip_suffix('s')?.parse().ok()
}

fn parse_routes(body: &str) -> Result<(f64, Option<f64>), RouteError> {
    let response: ComputeRoutesResponse = serde_json::from_str(body)
        .map_err(|err| RouteError::Provider(format!("google routes response: {}", err)))?;
    let route = response.routes.into_iter().next().ok_or(RouteError::NotFound)?;
    let duration = route
        .duration
        .as_deref()
        .and_then(parse_duration)
        .ok_or_else(|| RouteError::Provider("google routes response without duration".to_string()))?;
    Ok((duration, route.distance_meters))
}

fn classify_status(status: u16, body: &str) -> RouteError {
    let message: String = body.chars().take(200).collect();
    match status {
        400 => RouteError::InvalidInput(format!("google routes: {}", message)),
        404 => RouteError::NotFound,
        _ => RouteError::Provider(format!("google routes HTTP {}: {}", status, message)),
    }
}

impl RoutingProvider for GoogleRoutesClient {
    fn route(&self, query: &RouteQuery) -> Result<RouteResult, RouteError> {
        query.validate()?;
        let now = Zoned::now();
        let body = request_body(query, now.date(), now.time_zone())?;

        let response = self
            .client
            .post(&self.config.routes_url)
            .header("X-Goog-Api-Key", &self.config.api_key)
            .header("X-Goog-FieldMask", FIELD_MASK)
            .json(&body)
            .send()
            .map_err(|err| RouteError::Provider(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|err| RouteError::Provider(err.to_string()))?;

        if !status.is_success() {
            debug!("google routes returned {} for {:?}", status, query);
            return Err(classify_status(status.as_u16(), &text));
        }

        let (duration_seconds, distance_meters) = parse_routes(&text)?;
        Ok(RouteResult {
            duration_seconds,
            distance_meters,
            computed_at: Timestamp::now(),
        })
    }

    fn identity(&self) -> String {
        "google-routes".to_string()
    }
}

#[derive(Debug, Clone)]
pub struct GoogleGeocoder {
    config: GoogleConfig,
    client: reqwest::blocking::Client,
}

impl GoogleGeocoder {
    pub fn new(config: GoogleConfig) -> Result<Self, reqwest::Error> {
        let client = http_client(config.timeout_secs)?;
        Ok(Self { config, client })
    }
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: GoogleLatLng,
}

#[derive(Debug, Deserialize)]
struct GoogleLatLng {
    lat: f64,
    lng: f64,
}

fn parse_geocode(name: &str, body: &str) -> Result<Coordinate, GeocodeError> {
    let response: GeocodeResponse = serde_json::from_str(body)
        .map_err(|err| GeocodeError::Provider(format!("google geocode response: {}", err)))?;
    match response.status.as_str() {
        "OK" => response
            .results
            .first()
            .map(|result| Coordinate::new(result.geometry.location.lat, result.geometry.location.lng))
            .ok_or_else(|| GeocodeError::NotFound(name.to_string())),
        "ZERO_RESULTS" => Err(GeocodeError::NotFound(name.to_string())),
        other => Err(GeocodeError::Provider(format!(
            "google geocode status {}: {}",
            other,
            response.error_message.unwrap_or_default()
        ))),
    }
}

impl Geocoder for GoogleGeocoder {
    fn resolve(&self, name: &str) -> Result<Coordinate, GeocodeError> {
        let response = self
            .client
            .get(&self.config.geocode_url)
            .query(&[("address", name), ("key", self.config.api_key.as_str())])
            .send()
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| GeocodeError::Provider(err.to_string()))?;
        let text = response
            .text()
            .map_err(|err| GeocodeError::Provider(err.to_string()))?;
        parse_geocode(name, &text)
    }

    fn identity(&self) -> String {
        "google-geocode".to_string()
    }
}
