//! Home and destination lists as read from `home_options.json` and
//! `destinations.json`.
//!
//! Validation happens here so that a configuration defect stops the run
//! before a single provider call is issued.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::model::{Coordinate, DayOfWeek, Departure, Destination, HomeOption, PlaceRef, TransportMode};

#[derive(Debug, Deserialize)]
struct HomeRecord {
    name: String,
    #[serde(default)]
    coords: Option<[f64; 2]>,
}

fn default_weight() -> f64 {
    1.0
}

fn default_mode() -> String {
    "auto".to_string()
}

#[derive(Debug, Deserialize)]
struct DestinationRecord {
    name: String,
    #[serde(default = "default_weight")]
    weight: f64,
    #[serde(default)]
    departure_time_to: Option<String>,
    #[serde(default)]
    departure_time_from: Option<String>,
    #[serde(default)]
    day_of_week: Option<String>,
    #[serde(default = "default_mode")]
    transport_mode: String,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    coords: Option<[f64; 2]>,
}

fn place(name: &str, coords: Option<[f64; 2]>) -> Result<PlaceRef, ConfigError> {
    match coords {
        None => Ok(PlaceRef::new(name)),
        Some([lat, lon]) => {
            let coordinate = Coordinate::new(lat, lon);
            if !coordinate.is_valid() {
                return Err(ConfigError::InvalidCoordinates {
                    name: name.to_string(),
                    lat,
                    lon,
                });
            }
            Ok(PlaceRef::with_coordinate(name, coordinate))
        }
    }
}

fn departure(
    name: &str,
    time: Option<&str>,
    day: Option<DayOfWeek>,
) -> Result<Option<Departure>, ConfigError> {
    let Some(value) = time.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    let time = Departure::parse_time(value).ok_or_else(|| ConfigError::MalformedTime {
        name: name.to_string(),
        value: value.to_string(),
    })?;
    Ok(Some(Departure { time, day }))
}

impl DestinationRecord {
    fn into_destination(self) -> Result<Destination, ConfigError> {
        if !(self.weight.is_finite() && self.weight > 0.0) {
            return Err(ConfigError::InvalidWeight {
                name: self.name,
                weight: self.weight,
            });
        }
        let mode = TransportMode::parse(&self.transport_mode).ok_or_else(|| {
            ConfigError::UnknownTransportMode {
                name: self.name.clone(),
                mode: self.transport_mode.clone(),
            }
        })?;
        let day = match self.day_of_week.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(value) => Some(DayOfWeek::parse(value).ok_or_else(|| ConfigError::UnknownDay {
                name: self.name.clone(),
                value: value.to_string(),
            })?),
        };
        let to = departure(&self.name, self.departure_time_to.as_deref(), day)?;
        let from = departure(&self.name, self.departure_time_from.as_deref(), day)?;

        let mut destination = Destination::new(place(&self.name, self.coords)?, self.weight)
            .mode(mode)
            .departing(to, from);
        if let Some(group) = self.group {
            destination = destination.group(group);
        }
        Ok(destination)
    }
}

fn parse_list<T: for<'de> Deserialize<'de>>(raw: &str, what: &str) -> Result<Vec<T>, ConfigError> {
    serde_json::from_str(raw).map_err(|err| ConfigError::Parse {
        what: what.to_string(),
        message: err.to_string(),
    })
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    })
}

pub fn parse_homes(raw: &str) -> Result<Vec<HomeOption>, ConfigError> {
    parse_list::<HomeRecord>(raw, "home list")?
        .into_iter()
        .map(|record| Ok(HomeOption::new(place(&record.name, record.coords)?)))
        .collect()
}

pub fn parse_destinations(raw: &str) -> Result<Vec<Destination>, ConfigError> {
    parse_list::<DestinationRecord>(raw, "destination list")?
        .into_iter()
        .map(DestinationRecord::into_destination)
        .collect()
}

pub fn load_homes(path: impl AsRef<Path>) -> Result<Vec<HomeOption>, ConfigError> {
    parse_homes(&read(path.as_ref())?)
}

pub fn load_destinations(path: impl AsRef<Path>) -> Result<Vec<Destination>, ConfigError> {
    parse_destinations(&read(path.as_ref())?)
}
