//! Valhalla HTTP adapter for point-to-point routes.

use jiff::Timestamp;
use jiff::civil::Date;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RouteError;
use crate::model::{RouteQuery, RouteResult, TransportMode};
use crate::traits::RoutingProvider;

#[derive(Debug, Clone)]
pub struct ValhallaConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ValhallaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://[::1]:9000/valhalla".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValhallaClient {
    config: ValhallaConfig,
    client: reqwest::blocking::Client,
}

impl ValhallaClient {
    pub fn new(config: ValhallaConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }
}

fn costing(mode: TransportMode) -> &'static str {
    match mode {
        TransportMode::Auto => "auto",
        TransportMode::Walking => "pedestrian",
        TransportMode::Bicycle => "bicycle",
        TransportMode::Transit => "multimodal",
    }
}

#[derive(Debug, Serialize)]
struct Location {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Serialize)]
struct DateTimeParam {
    /// 1 = depart at.
    #[serde(rename = "type")]
    kind: u8,
    value: String,
}

#[derive(Debug, Serialize)]
struct RouteRequest {
    locations: [Location; 2],
    costing: &'static str,
    units: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    date_time: Option<DateTimeParam>,
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    trip: Option<Trip>,
}

#[derive(Debug, Deserialize)]
struct Trip {
    summary: Summary,
}

#[derive(Debug, Deserialize)]
struct Summary {
    /// Seconds.
    time: f64,
    /// Kilometers.
    length: f64,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error_code: Option<u32>,
    error: Option<String>,
}

fn request_body(query: &RouteQuery, today: Date) -> Result<RouteRequest, RouteError> {
    let date_time = match query.departure {
        Some(departure) => Some(DateTimeParam {
            kind: 1,
            value: departure
                .next_occurrence(today)?
                .strftime("%Y-%m-%dT%H:%M")
                .to_string(),
        }),
        None => None,
    };
    Ok(RouteRequest {
        locations: [
            Location {
                lat: query.origin.lat,
                lon: query.origin.lon,
            },
            Location {
                lat: query.destination.lat,
                lon: query.destination.lon,
            },
        ],
        costing: costing(query.mode),
        units: "kilometers",
        date_time,
    })
}

/// Maps a non-success response onto the routing error taxonomy.
///
/// 170/171 (no suitable edges near a location) and 442/443 (no path) mean the
/// pair is unroutable; the remaining 1xx codes are request validation errors.
fn classify_error(status: u16, body: &str) -> RouteError {
    let parsed: Option<ErrorResponse> = serde_json::from_str(body).ok();
    let code = parsed.as_ref().and_then(|error| error.error_code);
    let message = parsed
        .and_then(|error| error.error)
        .unwrap_or_else(|| body.chars().take(200).collect());

    match code {
        Some(170 | 171 | 442 | 443) => RouteError::NotFound,
        Some(code) if (100..200).contains(&code) => {
            RouteError::InvalidInput(format!("valhalla {}: {}", code, message))
        }
        _ => RouteError::Provider(format!("valhalla HTTP {}: {}", status, message)),
    }
}

fn parse_route(body: &str) -> Result<(f64, f64), RouteError> {
    let response: RouteResponse = serde_json::from_str(body)
        .map_err(|err| RouteError::Provider(format!("valhalla response: {}", err)))?;
    let trip = response.trip.ok_or(RouteError::NotFound)?;
    Ok((trip.summary.time, trip.summary.length * 1000.0))
}

impl RoutingProvider for ValhallaClient {
    fn route(&self, query: &RouteQuery) -> Result<RouteResult, RouteError> {
        query.validate()?;
        let body = request_body(query, jiff::Zoned::now().date())?;
        let url = format!("{}/route", self.config.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .map_err(|err| RouteError::Provider(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|err| RouteError::Provider(err.to_string()))?;

        if !status.is_success() {
            debug!("valhalla returned {} for {:?}", status, query);
            return Err(classify_error(status.as_u16(), &text));
        }

        let (duration_seconds, distance_meters) = parse_route(&text)?;
        Ok(RouteResult {
            duration_seconds,
            distance_meters: Some(distance_meters),
            computed_at: Timestamp::now(),
        })
    }

    fn identity(&self) -> String {
        format!("valhalla:{}", self.config.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Coordinate, DayOfWeek, Departure};

    fn query(mode: TransportMode, departure: Option<Departure>) -> RouteQuery {
        RouteQuery::canonical(
            Coordinate::new(-30.0346, -51.2177),
            Coordinate::new(-30.0277, -51.2287),
            mode,
            departure,
            5,
        )
    }

    #[test]
    fn test_request_body_shape() {
        let departure = Departure {
            time: Departure::parse_time("08:15").unwrap(),
            day: Some(DayOfWeek::Friday),
        };
        let body = request_body(
            &query(TransportMode::Walking, Some(departure)),
            jiff::civil::date(2024, 5, 6),
        )
        .unwrap();
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["costing"], "pedestrian");
        assert_eq!(json["units"], "kilometers");
        assert_eq!(json["locations"][0]["lat"], -30.0346);
        assert_eq!(json["locations"][1]["lon"], -51.2287);
        assert_eq!(json["date_time"]["type"], 1);
        assert_eq!(json["date_time"]["value"], "2024-05-10T08:15");
    }

    #[test]
    fn test_request_without_departure_omits_date_time() {
        let body = request_body(&query(TransportMode::Transit, None), jiff::civil::date(2024, 5, 6)).unwrap();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["costing"], "multimodal");
        assert!(json.get("date_time").is_none());
    }

    #[test]
    fn test_parse_route_summary() {
        let body = r#"{"trip":{"summary":{"time":612.3,"length":5.25},"status":0}}"#;
        let (seconds, meters) = parse_route(body).unwrap();
        assert_eq!(seconds, 612.3);
        assert!((meters - 5250.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_classification() {
        let no_path = r#"{"error_code":442,"error":"No path could be found for input","status_code":400}"#;
        assert_eq!(classify_error(400, no_path), RouteError::NotFound);

        let no_edges = r#"{"error_code":171,"error":"No suitable edges near location"}"#;
        assert_eq!(classify_error(400, no_edges), RouteError::NotFound);

        let bad_input = r#"{"error_code":106,"error":"Try any of: '/route' '/locate'"}"#;
        assert!(matches!(classify_error(400, bad_input), RouteError::InvalidInput(_)));

        assert!(matches!(classify_error(503, "upstream down"), RouteError::Provider(_)));
        assert!(matches!(classify_error(429, "{}"), RouteError::Provider(_)));
    }
}
