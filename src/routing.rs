//! Route lookups through the shared cache with bounded retries.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::cache::{CacheKey, CachedValue, QueryCache};
use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::error::{Error, RouteError};
use crate::model::{Coordinate, Departure, RouteQuery, TransportMode};
use crate::retry::{RetryPolicy, run_with_retry};
use crate::traits::RoutingProvider;

/// Outcome of one origin → destination leg.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LegCost {
    Reachable { seconds: f64 },
    /// The provider found no path under the requested mode.
    Unreachable,
    /// The provider kept failing after retries; degraded for this pair only.
    Failed { reason: String },
}

pub struct CachedRouter {
    provider: Arc<dyn RoutingProvider>,
    identity: String,
    cache: Arc<QueryCache>,
    precision: u32,
    ttl: Duration,
    retry: RetryPolicy,
}

impl CachedRouter {
    pub fn new(provider: Arc<dyn RoutingProvider>, cache: Arc<QueryCache>, config: &EngineConfig) -> Self {
        let identity = provider.identity();
        Self {
            provider,
            identity,
            cache,
            precision: config.coordinate_precision,
            ttl: config.route_ttl(),
            retry: config.retry.clone(),
        }
    }

    /// Travel time for one leg. Malformed coordinates are rejected before
    /// any query is issued and, like cancellation, come back as `Err`.
    pub fn travel_time(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        mode: TransportMode,
        departure: Option<Departure>,
        cancel: &CancellationToken,
    ) -> Result<LegCost, Error> {
        let query = RouteQuery::checked(origin, destination, mode, departure, self.precision)?;
        let key = CacheKey::route(&query, self.precision, self.identity.as_str());

        let result = loop {
            match self.cache.get_or_fetch(&key, self.ttl, || self.fetch(&query, cancel)) {
                // The leader belonged to a run that has since been cancelled.
                Err(Error::Cancelled) if !cancel.is_cancelled() => continue,
                other => break other,
            }
        };

        match result {
            Ok(CachedValue::Route(route)) => Ok(LegCost::Reachable {
                seconds: route.duration_seconds,
            }),
            Ok(CachedValue::NoRoute) => Ok(LegCost::Unreachable),
            Ok(other) => Ok(LegCost::Failed {
                reason: format!("cache holds {:?} under a route key", other),
            }),
            Err(err) if err.is_fatal() || err == Error::Cancelled => Err(err),
            Err(err) => Ok(LegCost::Failed {
                reason: err.to_string(),
            }),
        }
    }

    fn fetch(&self, query: &RouteQuery, cancel: &CancellationToken) -> Result<CachedValue, Error> {
        let label = format!("route {} -> {} ({})", query.origin, query.destination, query.mode);
        let result = run_with_retry(&self.retry, cancel, &label, |attempt| {
            debug!("{}: attempt {}", label, attempt);
            let route = self.provider.route(query)?;
            if route.duration_seconds.is_finite() && route.duration_seconds >= 0.0 {
                Ok(route)
            } else {
                Err(RouteError::Provider(format!(
                    "provider returned duration {}",
                    route.duration_seconds
                )))
            }
        });
        match result {
            Ok(route) => Ok(CachedValue::Route(route)),
            Err(Error::Route(RouteError::NotFound)) => Ok(CachedValue::NoRoute),
            Err(err) => Err(err),
        }
    }
}
