//! Core data model: coordinates, places, destinations and route queries.

use std::fmt;

use jiff::Timestamp;
use jiff::civil::{Date, DateTime, Time, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::RouteError;

/// WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Integer representation at `precision` decimal digits, used for cache
    /// keys so that float noise below the precision never splits a key.
    pub fn scaled(&self, precision: u32) -> (i64, i64) {
        let factor = 10f64.powi(precision as i32);
        (
            (self.lat * factor).round() as i64,
            (self.lon * factor).round() as i64,
        )
    }

    pub fn rounded(&self, precision: u32) -> Self {
        let factor = 10f64.powi(precision as i32);
        let (lat, lon) = self.scaled(precision);
        Self::new(lat as f64 / factor, lon as f64 / factor)
    }

    pub fn to_point(&self) -> geo::Point<f64> {
        geo::Point::new(self.lon, self.lat)
    }
}

impl From<(f64, f64)> for Coordinate {
    fn from((lat, lon): (f64, f64)) -> Self {
        Self::new(lat, lon)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlaceState {
    Pending,
    Resolved { coordinate: Coordinate },
    Unresolved { reason: String },
}

/// A named location that is geocoded at most once.
///
/// Once resolved or marked unresolved the state never changes again;
/// unresolved places are excluded from every downstream computation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceRef {
    pub name: String,
    state: PlaceState,
}

impl PlaceRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: PlaceState::Pending,
        }
    }

    pub fn with_coordinate(name: impl Into<String>, coordinate: Coordinate) -> Self {
        Self {
            name: name.into(),
            state: PlaceState::Resolved { coordinate },
        }
    }

    pub fn state(&self) -> &PlaceState {
        &self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, PlaceState::Pending)
    }

    pub fn coordinate(&self) -> Option<Coordinate> {
        match self.state {
            PlaceState::Resolved { coordinate } => Some(coordinate),
            _ => None,
        }
    }

    pub fn unresolved_reason(&self) -> Option<&str> {
        match &self.state {
            PlaceState::Unresolved { reason } => Some(reason),
            _ => None,
        }
    }

    /// Applies a geocoding outcome. Places that already left `Pending` are
    /// returned unchanged.
    pub fn resolve<E: fmt::Display>(self, outcome: Result<Coordinate, E>) -> Self {
        if !self.is_pending() {
            return self;
        }
        let state = match outcome {
            Ok(coordinate) => PlaceState::Resolved { coordinate },
            Err(err) => PlaceState::Unresolved {
                reason: err.to_string(),
            },
        };
        Self {
            name: self.name,
            state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    Auto,
    Walking,
    Bicycle,
    Transit,
}

impl TransportMode {
    /// Accepts the canonical names plus the costing names `pedestrian` and `bus`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" | "car" | "driving" => Some(TransportMode::Auto),
            "walking" | "pedestrian" | "walk" => Some(TransportMode::Walking),
            "bicycle" | "bike" => Some(TransportMode::Bicycle),
            "transit" | "bus" => Some(TransportMode::Transit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Auto => "auto",
            TransportMode::Walking => "walking",
            TransportMode::Bicycle => "bicycle",
            TransportMode::Transit => "transit",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "monday" | "mon" => Some(DayOfWeek::Monday),
            "tuesday" | "tue" => Some(DayOfWeek::Tuesday),
            "wednesday" | "wed" => Some(DayOfWeek::Wednesday),
            "thursday" | "thu" => Some(DayOfWeek::Thursday),
            "friday" | "fri" => Some(DayOfWeek::Friday),
            "saturday" | "sat" => Some(DayOfWeek::Saturday),
            "sunday" | "sun" => Some(DayOfWeek::Sunday),
            _ => None,
        }
    }

    pub fn is_weekday(&self) -> bool {
        !matches!(self, DayOfWeek::Saturday | DayOfWeek::Sunday)
    }

    pub fn to_weekday(self) -> Weekday {
        match self {
            DayOfWeek::Monday => Weekday::Monday,
            DayOfWeek::Tuesday => Weekday::Tuesday,
            DayOfWeek::Wednesday => Weekday::Wednesday,
            DayOfWeek::Thursday => Weekday::Thursday,
            DayOfWeek::Friday => Weekday::Friday,
            DayOfWeek::Saturday => Weekday::Saturday,
            DayOfWeek::Sunday => Weekday::Sunday,
        }
    }
}

/// Local wall-clock departure, optionally pinned to a weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Departure {
    pub time: Time,
    pub day: Option<DayOfWeek>,
}

impl Departure {
    /// Parses `HH:MM` (seconds optional).
    pub fn parse_time(value: &str) -> Option<Time> {
        let value = value.trim();
        Time::strptime("%H:%M", value)
            .or_else(|_| Time::strptime("%H:%M:%S", value))
            .ok()
    }

    /// First local date-time strictly after `after` that matches this
    /// departure; without a weekday that is the next day.
    pub fn next_occurrence(&self, after: Date) -> Result<DateTime, RouteError> {
        let date = match self.day {
            Some(day) => after.nth_weekday(1, day.to_weekday()),
            None => after.tomorrow(),
        }
        .map_err(|err| RouteError::InvalidInput(format!("departure date: {}", err)))?;
        Ok(date.to_datetime(self.time))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Destination {
    pub place: PlaceRef,
    pub weight: f64,
    pub mode: TransportMode,
    pub departure_to: Option<Departure>,
    pub departure_from: Option<Departure>,
    pub group: Option<String>,
}

impl Destination {
    pub fn new(place: PlaceRef, weight: f64) -> Self {
        Self {
            place,
            weight,
            mode: TransportMode::Auto,
            departure_to: None,
            departure_from: None,
            group: None,
        }
    }

    pub fn mode(mut self, mode: TransportMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        let group = group.into();
        self.group = if group.trim().is_empty() {
            None
        } else {
            Some(group)
        };
        self
    }

    pub fn departing(mut self, to: Option<Departure>, from: Option<Departure>) -> Self {
        self.departure_to = to;
        self.departure_from = from;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HomeOption {
    pub place: PlaceRef,
}

impl HomeOption {
    pub fn new(place: PlaceRef) -> Self {
        Self { place }
    }
}

/// A single origin → destination travel-time request.
///
/// Built through [`RouteQuery::canonical`] the coordinates are already
/// rounded to the cache precision, so every caller coalesced onto the same
/// cache key asks the provider exactly the same question.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteQuery {
    pub origin: Coordinate,
    pub destination: Coordinate,
    pub mode: TransportMode,
    pub departure: Option<Departure>,
}

impl RouteQuery {
    pub fn canonical(
        origin: Coordinate,
        destination: Coordinate,
        mode: TransportMode,
        departure: Option<Departure>,
        precision: u32,
    ) -> Self {
        Self {
            origin: origin.rounded(precision),
            destination: destination.rounded(precision),
            mode,
            departure,
        }
    }

    /// Like [`RouteQuery::canonical`], but rejects malformed endpoints before
    /// rounding. Rounding maps NaN to zero, so checking afterwards would let
    /// a NaN endpoint through as (0, 0).
    pub fn checked(
        origin: Coordinate,
        destination: Coordinate,
        mode: TransportMode,
        departure: Option<Departure>,
        precision: u32,
    ) -> Result<Self, RouteError> {
        check_endpoint("origin", origin)?;
        check_endpoint("destination", destination)?;
        Ok(Self::canonical(origin, destination, mode, departure, precision))
    }

    pub fn validate(&self) -> Result<(), RouteError> {
        check_endpoint("origin", self.origin)?;
        check_endpoint("destination", self.destination)
    }
}

fn check_endpoint(label: &str, coordinate: Coordinate) -> Result<(), RouteError> {
    if coordinate.is_valid() {
        Ok(())
    } else {
        Err(RouteError::InvalidInput(format!(
            "{} coordinate {} out of range",
            label, coordinate
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResult {
    pub duration_seconds: f64,
    pub distance_meters: Option<f64>,
    pub computed_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GeocodeError;

    #[test]
    fn test_rounding_to_precision() {
        let c = Coordinate::new(45.123456789, -73.987654321);
        assert_eq!(c.scaled(5), (4_512_346, -7_398_765));
        let r = c.rounded(5);
        assert!((r.lat - 45.12346).abs() < 1e-12);
        assert!((r.lon + 73.98765).abs() < 1e-12);
    }

    #[test]
    fn test_coordinate_validity() {
        assert!(Coordinate::new(-30.03, -51.21).is_valid());
        assert!(!Coordinate::new(91.0, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, -181.0).is_valid());
        assert!(!Coordinate::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_place_resolves_once() {
        let place = PlaceRef::new("Office").resolve::<GeocodeError>(Ok(Coordinate::new(1.0, 2.0)));
        assert_eq!(place.coordinate(), Some(Coordinate::new(1.0, 2.0)));

        let again = place
            .clone()
            .resolve(Err(GeocodeError::NotFound("Office".into())));
        assert_eq!(again, place);
    }

    #[test]
    fn test_unresolved_place_keeps_reason() {
        let place = PlaceRef::new("Nowhere").resolve::<GeocodeError>(Err(GeocodeError::NotFound(
            "Nowhere".into(),
        )));
        assert!(place.coordinate().is_none());
        assert!(place.unresolved_reason().unwrap().contains("Nowhere"));
    }

    #[test]
    fn test_transport_mode_aliases() {
        assert_eq!(TransportMode::parse("pedestrian"), Some(TransportMode::Walking));
        assert_eq!(TransportMode::parse("Bus"), Some(TransportMode::Transit));
        assert_eq!(TransportMode::parse(" auto "), Some(TransportMode::Auto));
        assert_eq!(TransportMode::parse("truck"), None);
    }

    #[test]
    fn test_departure_time_parsing() {
        let time = Departure::parse_time("08:30").unwrap();
        assert_eq!((time.hour(), time.minute()), (8, 30));
        assert!(Departure::parse_time("8h30").is_none());
        assert!(Departure::parse_time("25:00").is_none());
    }

    #[test]
    fn test_next_occurrence_is_strictly_after_reference() {
        // 2024-05-06 is a Monday.
        let monday = jiff::civil::date(2024, 5, 6);
        let departure = Departure {
            time: Departure::parse_time("08:00").unwrap(),
            day: Some(DayOfWeek::Monday),
        };
        let next = departure.next_occurrence(monday).unwrap();
        assert_eq!(next.date(), jiff::civil::date(2024, 5, 13));
        assert_eq!(next.hour(), 8);

        let friday = Departure {
            day: Some(DayOfWeek::Friday),
            ..departure
        };
        assert_eq!(
            friday.next_occurrence(monday).unwrap().date(),
            jiff::civil::date(2024, 5, 10)
        );

        let any_day = Departure { day: None, ..departure };
        assert_eq!(
            any_day.next_occurrence(monday).unwrap().date(),
            jiff::civil::date(2024, 5, 7)
        );
    }

    #[test]
    fn test_canonical_query_rounds_both_ends() {
        let q = RouteQuery::canonical(
            Coordinate::new(1.0000049, 2.0),
            Coordinate::new(3.0, 4.0000051),
            TransportMode::Auto,
            None,
            5,
        );
        assert_eq!(q.origin.scaled(5), (100_000, 200_000));
        assert_eq!(q.destination.scaled(5), (300_000, 400_001));
    }

    #[test]
    fn test_query_validation() {
        let q = RouteQuery::canonical(
            Coordinate::new(100.0, 0.0),
            Coordinate::new(0.0, 0.0),
            TransportMode::Auto,
            None,
            5,
        );
        assert!(matches!(q.validate(), Err(RouteError::InvalidInput(_))));
    }

    #[test]
    fn test_checked_query_rejects_nan_before_rounding() {
        let nan = Coordinate::new(f64::NAN, f64::NAN);
        assert_eq!(nan.rounded(5), Coordinate::new(0.0, 0.0));

        let origin = RouteQuery::checked(nan, Coordinate::new(1.0, 2.0), TransportMode::Auto, None, 5);
        assert!(matches!(origin, Err(RouteError::InvalidInput(msg)) if msg.starts_with("origin")));
        let destination = RouteQuery::checked(Coordinate::new(1.0, 2.0), nan, TransportMode::Auto, None, 5);
        assert!(matches!(destination, Err(RouteError::InvalidInput(msg)) if msg.starts_with("destination")));

        let ok = RouteQuery::checked(
            Coordinate::new(1.0000049, 2.0),
            Coordinate::new(3.0, 4.0),
            TransportMode::Auto,
            None,
            5,
        )
        .unwrap();
        assert_eq!(ok.origin.scaled(5), (100_000, 200_000));
    }
}
