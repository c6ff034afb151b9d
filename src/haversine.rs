//! Haversine routing provider (as-the-crow-flies estimate).
//!
//! Uses great-circle distance and a per-mode average speed to estimate
//! travel time. Ignores the road network but needs no external service, so
//! it backs demo runs and tests.

use jiff::Timestamp;

use crate::error::RouteError;
use crate::model::{Coordinate, RouteQuery, RouteResult, TransportMode};
use crate::traits::RoutingProvider;

/// Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Multiplier applied to auto and transit trips leaving in weekday rush hours.
const RUSH_HOUR_FACTOR: f64 = 1.3;

/// Average speeds per mode in km/h.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeSpeeds {
    pub auto: f64,
    pub walking: f64,
    pub bicycle: f64,
    pub transit: f64,
}

impl Default for ModeSpeeds {
    fn default() -> Self {
        Self {
            auto: 40.0,
            walking: 5.0,
            bicycle: 15.0,
            transit: 25.0,
        }
    }
}

impl ModeSpeeds {
    fn for_mode(&self, mode: TransportMode) -> f64 {
        match mode {
            TransportMode::Auto => self.auto,
            TransportMode::Walking => self.walking,
            TransportMode::Bicycle => self.bicycle,
            TransportMode::Transit => self.transit,
        }
    }
}

/// Great-circle travel-time estimator.
#[derive(Debug, Clone, Default)]
pub struct HaversineRouter {
    pub speeds: ModeSpeeds,
}

impl HaversineRouter {
    pub fn new(speeds: ModeSpeeds) -> Self {
        Self { speeds }
    }

    /// Calculate haversine distance between two points in kilometers.
    pub fn haversine_km(from: Coordinate, to: Coordinate) -> f64 {
        let lat1_rad = from.lat.to_radians();
        let lat2_rad = to.lat.to_radians();
        let delta_lat = (to.lat - from.lat).to_radians();
        let delta_lng = (to.lon - from.lon).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_KM * c
    }

    /// Convert distance in km to travel time in seconds for `mode`.
    fn km_to_seconds(&self, km: f64, mode: TransportMode) -> f64 {
        let hours = km / self.speeds.for_mode(mode);
        hours * 3600.0
    }

    fn traffic_factor(query: &RouteQuery) -> f64 {
        let Some(departure) = query.departure else {
            return 1.0;
        };
        let Some(day) = departure.day else {
            return 1.0;
        };
        let congested_mode = matches!(query.mode, TransportMode::Auto | TransportMode::Transit);
        let hour = departure.time.hour();
        let rush_hour = (7..=9).contains(&hour) || (17..=19).contains(&hour);
        if congested_mode && day.is_weekday() && rush_hour {
            RUSH_HOUR_FACTOR
        } else {
            1.0
        }
    }
}

impl RoutingProvider for HaversineRouter {
    fn route(&self, query: &RouteQuery) -> Result<RouteResult, RouteError> {
        query.validate()?;
        let km = Self::haversine_km(query.origin, query.destination);
        Ok(RouteResult {
            duration_seconds: self.km_to_seconds(km, query.mode) * Self::traffic_factor(query),
            distance_meters: Some(km * 1000.0),
            computed_at: Timestamp::now(),
        })
    }

    fn identity(&self) -> String {
        let s = &self.speeds;
        format!(
            "haversine:{}/{}/{}/{}",
            s.auto, s.walking, s.bicycle, s.transit
        )
    }
}
