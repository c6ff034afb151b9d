//! Cached, retried resolution of configured places.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::cache::{CacheKey, CachedValue, QueryCache};
use crate::cancel::CancellationToken;
use crate::error::{Error, GeocodeError};
use crate::model::{Coordinate, PlaceRef};
use crate::retry::{RetryPolicy, run_with_retry};
use crate::traits::Geocoder;

pub struct CachedGeocoder {
    geocoder: Arc<dyn Geocoder>,
    identity: String,
    cache: Arc<QueryCache>,
    ttl: Duration,
    retry: RetryPolicy,
}

impl CachedGeocoder {
    pub fn new(geocoder: Arc<dyn Geocoder>, cache: Arc<QueryCache>, ttl: Duration, retry: RetryPolicy) -> Self {
        let identity = geocoder.identity();
        Self {
            geocoder,
            identity,
            cache,
            ttl,
            retry,
        }
    }

    /// Looks `name` up through the cache. Unknown names are cached as
    /// negative answers; provider failures are retried and never cached.
    pub fn lookup(&self, name: &str, cancel: &CancellationToken) -> Result<Coordinate, Error> {
        let key = CacheKey::geocode(self.identity.as_str(), name);
        let value = loop {
            let result = self.cache.get_or_fetch(&key, self.ttl, || self.fetch(name, cancel));
            match result {
                // Another run's leader was cancelled; this run is still live.
                Err(Error::Cancelled) if !cancel.is_cancelled() => continue,
                other => break other?,
            }
        };

        match value {
            CachedValue::Coordinate(coordinate) => Ok(coordinate),
            CachedValue::NoMatch => Err(GeocodeError::NotFound(name.to_string()).into()),
            other => Err(GeocodeError::Provider(format!("cache holds {:?} under a geocode key", other)).into()),
        }
    }

    fn fetch(&self, name: &str, cancel: &CancellationToken) -> Result<CachedValue, Error> {
        let label = format!("geocode {:?}", name);
        let result = run_with_retry(&self.retry, cancel, &label, |_| {
            let coordinate = self.geocoder.resolve(name)?;
            if coordinate.is_valid() {
                Ok(coordinate)
            } else {
                Err(GeocodeError::Provider(format!(
                    "geocoder returned out-of-range coordinate {}",
                    coordinate
                )))
            }
        });
        match result {
            Ok(coordinate) => Ok(CachedValue::Coordinate(coordinate)),
            Err(Error::Geocode(GeocodeError::NotFound(_))) => Ok(CachedValue::NoMatch),
            Err(err) => Err(err),
        }
    }

    /// Resolves a pending place. Geocoding failures leave the place
    /// permanently unresolved with a warning; only cancellation is an error.
    pub fn resolve_place(&self, place: PlaceRef, cancel: &CancellationToken) -> Result<PlaceRef, Error> {
        if !place.is_pending() {
            return Ok(place);
        }
        match self.lookup(&place.name, cancel) {
            Ok(coordinate) => Ok(place.resolve::<Error>(Ok(coordinate))),
            Err(err @ Error::Cancelled) => Err(err),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!("excluding place {:?}: {}", place.name, err);
                Ok(place.resolve(Err(err)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeGeocoder {
        known: HashMap<&'static str, Coordinate>,
        failures_before_success: usize,
        calls: AtomicUsize,
    }

    impl FakeGeocoder {
        fn new(failures_before_success: usize) -> Self {
            let mut known = HashMap::new();
            known.insert("office", Coordinate::new(-30.03, -51.22));
            Self {
                known,
                failures_before_success,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Geocoder for FakeGeocoder {
        fn resolve(&self, name: &str) -> Result<Coordinate, GeocodeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                return Err(GeocodeError::Provider("503".into()));
            }
            self.known
                .get(name.to_lowercase().as_str())
                .copied()
                .ok_or_else(|| GeocodeError::NotFound(name.to_string()))
        }

        fn identity(&self) -> String {
            "fake".to_string()
        }
    }

    fn geocoder(fake: Arc<FakeGeocoder>) -> CachedGeocoder {
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };
        CachedGeocoder::new(fake, Arc::new(QueryCache::in_memory()), Duration::from_secs(60), retry)
    }

    #[test]
    fn test_resolves_and_caches_by_normalized_name() {
        let fake = Arc::new(FakeGeocoder::new(0));
        let cached = geocoder(Arc::clone(&fake));
        let token = CancellationToken::new();

        assert_eq!(cached.lookup("Office", &token), Ok(Coordinate::new(-30.03, -51.22)));
        assert_eq!(cached.lookup("  office ", &token), Ok(Coordinate::new(-30.03, -51.22)));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_name_is_cached_as_no_match() {
        let fake = Arc::new(FakeGeocoder::new(0));
        let cached = geocoder(Arc::clone(&fake));
        let token = CancellationToken::new();

        for _ in 0..3 {
            assert_eq!(
                cached.lookup("Atlantis", &token),
                Err(Error::Geocode(GeocodeError::NotFound("Atlantis".into())))
            );
        }
        assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let fake = Arc::new(FakeGeocoder::new(2));
        let cached = geocoder(Arc::clone(&fake));
        let place = cached
            .resolve_place(PlaceRef::new("Office"), &CancellationToken::new())
            .unwrap();
        assert_eq!(place.coordinate(), Some(Coordinate::new(-30.03, -51.22)));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exhausted_retries_leave_place_unresolved() {
        let fake = Arc::new(FakeGeocoder::new(10));
        let cached = geocoder(Arc::clone(&fake));
        let place = cached
            .resolve_place(PlaceRef::new("Office"), &CancellationToken::new())
            .unwrap();
        assert!(place.coordinate().is_none());
        assert!(place.unresolved_reason().unwrap().contains("503"));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_pre_resolved_place_skips_geocoder() {
        let fake = Arc::new(FakeGeocoder::new(0));
        let cached = geocoder(Arc::clone(&fake));
        let place = PlaceRef::with_coordinate("Gym", Coordinate::new(1.0, 2.0));
        let resolved = cached.resolve_place(place.clone(), &CancellationToken::new()).unwrap();
        assert_eq!(resolved, place);
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancelled_token_stops_lookup() {
        let fake = Arc::new(FakeGeocoder::new(0));
        let cached = geocoder(Arc::clone(&fake));
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(cached.resolve_place(PlaceRef::new("Office"), &token), Err(Error::Cancelled));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }
}
