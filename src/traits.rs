//! Seams between the engine and its external collaborators.
//!
//! The engine only talks to geocoders, routing providers, cache stores and
//! clocks through these traits. Concrete providers live in their own modules
//! and are selected by configuration.

use std::time::Duration;

use jiff::Timestamp;

use crate::cache::{CacheKey, CachedValue};
use crate::error::{CacheUnavailable, GeocodeError, RouteError};
use crate::model::{Coordinate, RouteQuery, RouteResult};

/// Resolves a free-text place name to a coordinate.
///
/// Must be idempotent while the provider's data is stable.
pub trait Geocoder: Send + Sync {
    fn resolve(&self, name: &str) -> Result<Coordinate, GeocodeError>;

    /// Identity folded into cache keys so two geocoders never share entries.
    fn identity(&self) -> String;
}

/// Travel cost between two coordinates for one mode and departure.
///
/// Implementations do not cache; callers own cache-key canonicalization.
pub trait RoutingProvider: Send + Sync {
    fn route(&self, query: &RouteQuery) -> Result<RouteResult, RouteError>;

    fn identity(&self) -> String;
}

/// Key-value persistence behind the query cache.
pub trait CacheStore: Send + Sync {
    /// Returns the stored value unless it is absent or expired at `now`.
    fn get(&self, key: &CacheKey, now: Timestamp) -> Result<Option<CachedValue>, CacheUnavailable>;

    fn put(
        &self,
        key: &CacheKey,
        value: &CachedValue,
        now: Timestamp,
        ttl: Duration,
    ) -> Result<(), CacheUnavailable>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}
