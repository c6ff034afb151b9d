//! Test fixtures for home-scorer.
//!
//! Provides:
//! - Porto Alegre demo locations and input files
//! - Call-counting geocoder and routing provider doubles
//! - Builders for homes, destinations and engines

#![allow(dead_code)]

pub mod porto_alegre_locations;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use jiff::Timestamp;

use home_scorer::cache::QueryCache;
use home_scorer::config::EngineConfig;
use home_scorer::engine::Engine;
use home_scorer::error::{GeocodeError, RouteError};
use home_scorer::model::{Coordinate, Destination, HomeOption, PlaceRef, RouteQuery, RouteResult};
use home_scorer::providers::Providers;
use home_scorer::traits::{Geocoder, RoutingProvider};

/// Cache-key precision used by every fixture.
pub const PRECISION: u32 = 5;

type CellPair = ((i64, i64), (i64, i64));

/// Routing provider answering from a table keyed by rounded endpoints.
///
/// Pairs set to `None` have no route; pairs missing from the table fall back
/// to `fallback` (or a provider error when that is unset).
pub struct ScriptedRouter {
    table: HashMap<CellPair, Option<f64>>,
    fallback: Option<f64>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedRouter {
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
            fallback: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_fallback(mut self, seconds: f64) -> Self {
        self.fallback = Some(seconds);
        self
    }

    /// Sleeps before answering so concurrent callers overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn duration(mut self, from: Coordinate, to: Coordinate, seconds: f64) -> Self {
        self.table.insert(cells(from, to), Some(seconds));
        self
    }

    pub fn no_route(mut self, from: Coordinate, to: Coordinate) -> Self {
        self.table.insert(cells(from, to), None);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn cells(from: Coordinate, to: Coordinate) -> CellPair {
    (from.scaled(PRECISION), to.scaled(PRECISION))
}

impl RoutingProvider for ScriptedRouter {
    fn route(&self, query: &RouteQuery) -> Result<RouteResult, RouteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let seconds = match self.table.get(&cells(query.origin, query.destination)) {
            Some(Some(seconds)) => *seconds,
            Some(None) => return Err(RouteError::NotFound),
            None => self
                .fallback
                .ok_or_else(|| RouteError::Provider("no scripted answer".to_string()))?,
        };
        Ok(RouteResult {
            duration_seconds: seconds,
            distance_meters: None,
            computed_at: Timestamp::UNIX_EPOCH,
        })
    }

    fn identity(&self) -> String {
        "scripted".to_string()
    }
}

/// Geocoder backed by a fixed name table; unknown names are not found.
pub struct FixedGeocoder {
    places: HashMap<String, Coordinate>,
    calls: AtomicUsize,
}

impl FixedGeocoder {
    pub fn new(places: &[(&str, Coordinate)]) -> Self {
        Self {
            places: places
                .iter()
                .map(|(name, coordinate)| (name.to_string(), *coordinate))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Geocoder for FixedGeocoder {
    fn resolve(&self, name: &str) -> Result<Coordinate, GeocodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.places
            .get(name)
            .copied()
            .ok_or_else(|| GeocodeError::NotFound(name.to_string()))
    }

    fn identity(&self) -> String {
        "fixed".to_string()
    }
}

pub fn home(name: &str, at: Coordinate) -> HomeOption {
    HomeOption::new(PlaceRef::with_coordinate(name, at))
}

pub fn destination(name: &str, at: Coordinate, weight: f64) -> Destination {
    Destination::new(PlaceRef::with_coordinate(name, at), weight)
}

/// Engine config with fast retries, no grid and the given worker count.
pub fn config(concurrency: usize) -> EngineConfig {
    let mut config = EngineConfig {
        concurrency,
        grid: None,
        ..EngineConfig::default()
    };
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 4;
    config
}

pub fn engine(
    config: EngineConfig,
    geocoder: Arc<dyn Geocoder>,
    router: Arc<dyn RoutingProvider>,
) -> Engine {
    Engine::new(
        config,
        Providers { geocoder, router },
        Arc::new(QueryCache::in_memory()),
    )
    .expect("build engine")
}

pub fn no_geocoder() -> Arc<FixedGeocoder> {
    Arc::new(FixedGeocoder::new(&[]))
}
