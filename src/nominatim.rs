//! Nominatim HTTP geocoder.

use serde::Deserialize;

use crate::error::GeocodeError;
use crate::model::Coordinate;
use crate::traits::Geocoder;

const USER_AGENT: &str = concat!("home-scorer/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct NominatimConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for NominatimConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NominatimClient {
    config: NominatimConfig,
    client: reqwest::blocking::Client,
}

impl NominatimClient {
    pub fn new(config: NominatimConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { config, client })
    }
}

/// Nominatim returns coordinates as strings.
#[derive(Debug, Deserialize)]
struct SearchResult {
    lat: String,
    lon: String,
}

fn parse_search(name: &str, body: &str) -> Result<Coordinate, GeocodeError> {
    let results: Vec<SearchResult> = serde_json::from_str(body)
        .map_err(|err| GeocodeError::Provider(format!("nominatim response: {}", err)))?;
    let first = results
        .first()
        .ok_or_else(|| GeocodeError::NotFound(name.to_string()))?;
    let parse = |value: &str| {
        value
            .parse::<f64>()
            .map_err(|err| GeocodeError::Provider(format!("nominatim coordinate {:?}: {}", value, err)))
    };
    Ok(Coordinate::new(parse(&first.lat)?, parse(&first.lon)?))
}

/// `/reverse` answers with an object; misses carry `error` instead of a name.
#[derive(Debug, Deserialize)]
struct ReverseResult {
    display_name: Option<String>,
    error: Option<String>,
}

fn parse_reverse(at: Coordinate, body: &str) -> Result<String, GeocodeError> {
    let result: ReverseResult = serde_json::from_str(body)
        .map_err(|err| GeocodeError::Provider(format!("nominatim response: {}", err)))?;
    match (result.display_name, result.error) {
        (Some(name), _) if !name.trim().is_empty() => Ok(name),
        (_, Some(error)) => Err(GeocodeError::NotFound(format!("{}: {}", at, error))),
        _ => Err(GeocodeError::NotFound(at.to_string())),
    }
}

impl NominatimClient {
    /// Address label for a coordinate, used to name map markers.
    pub fn reverse(&self, at: Coordinate) -> Result<String, GeocodeError> {
        if !at.is_valid() {
            return Err(GeocodeError::Provider(format!("coordinate {} out of range", at)));
        }
        let url = format!("{}/reverse", self.config.base_url.trim_end_matches('/'));
        let body = self
            .client
            .get(url)
            .query(&[
                ("lat", at.lat.to_string()),
                ("lon", at.lon.to_string()),
                ("format", "json".to_string()),
            ])
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.text())
            .map_err(|err| GeocodeError::Provider(err.to_string()))?;
        parse_reverse(at, &body)
    }
}

impl Geocoder for NominatimClient {
    fn resolve(&self, name: &str) -> Result<Coordinate, GeocodeError> {
        let url = format!("{}/search", self.config.base_url.trim_end_matches('/'));
        let body = self
            .client
            .get(url)
            .query(&[("q", name), ("format", "json"), ("limit", "1")])
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.text())
            .map_err(|err| GeocodeError::Provider(err.to_string()))?;
        parse_search(name, &body)
    }

    fn identity(&self) -> String {
        format!("nominatim:{}", self.config.base_url)
    }
}
