//! Analysis runs: geocode, group, score homes, sample and interpolate the grid.
//!
//! Every provider call of a run goes through one bounded rayon pool and the
//! shared [`QueryCache`]. A fatal error (invalid route input or configuration)
//! cancels the run so no further queries are issued; cancellation from the
//! caller stops new queries and keeps whatever origins already completed.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{CacheStats, QueryCache};
use crate::cancel::CancellationToken;
use crate::config::{EngineConfig, GridConfig};
use crate::error::{ConfigError, Error, RouteError};
use crate::geocoding::CachedGeocoder;
use crate::grid::{Bounds, Grid, Interpolator, Sample, lattice};
use crate::grouping::DestinationGroups;
use crate::model::{Coordinate, Destination, HomeOption, PlaceRef};
use crate::providers::{ProviderConfig, Providers};
use crate::routing::CachedRouter;
use crate::scoring::{Score, ScoreOutcome, score_origin};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedHome {
    /// 1 is the cheapest home.
    pub rank: usize,
    pub name: String,
    pub score: Score,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisqualifiedHome {
    pub name: String,
    pub origin: Coordinate,
    pub per_group_cost: BTreeMap<String, f64>,
    pub reasons: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceRole {
    Home,
    Destination,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnresolvedPlace {
    pub name: String,
    pub role: PlaceRole,
    pub reason: String,
}

/// Everything a renderer needs: ranked scores, what was left out and why,
/// and the interpolated field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub ranked: Vec<RankedHome>,
    pub disqualified: Vec<DisqualifiedHome>,
    pub unresolved: Vec<UnresolvedPlace>,
    /// Homes that were not scored because the run was cancelled.
    pub cancelled_origins: Vec<String>,
    pub grid: Option<Grid>,
    /// Cache traffic during this run only.
    pub cache: CacheStats,
    pub cancelled: bool,
}

impl AnalysisReport {
    pub fn score_of(&self, name: &str) -> Option<&Score> {
        self.ranked
            .iter()
            .find(|home| home.name == name)
            .map(|home| &home.score)
    }

    /// Non-finite costs and unset grid cells serialize as `null`.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

pub struct Engine {
    config: EngineConfig,
    geocoder: CachedGeocoder,
    router: CachedRouter,
    cache: Arc<QueryCache>,
    pool: rayon::ThreadPool,
}

impl Engine {
    pub fn new(config: EngineConfig, providers: Providers, cache: Arc<QueryCache>) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.concurrency)
            .thread_name(|index| format!("home-scorer-{}", index))
            .build()
            .map_err(|err| ConfigError::WorkerPool(err.to_string()))?;

        let geocoder = CachedGeocoder::new(
            providers.geocoder,
            Arc::clone(&cache),
            config.geocode_ttl(),
            config.retry.clone(),
        );
        let router = CachedRouter::new(providers.router, Arc::clone(&cache), &config);

        Ok(Self {
            config,
            geocoder,
            router,
            cache,
            pool,
        })
    }

    /// Providers from the environment and a cache from
    /// `HOME_SCORER_CACHE_FOLDER`, falling back to memory.
    pub fn from_env(config: EngineConfig) -> Result<Self, ConfigError> {
        let providers = ProviderConfig::from_env()?.build()?;
        Self::new(config, providers, Arc::new(QueryCache::from_env()))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn run(
        &self,
        homes: Vec<HomeOption>,
        destinations: Vec<Destination>,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport, Error> {
        validate_destinations(&destinations)?;
        validate_coordinates(&homes, &destinations)?;
        let start = self.cache.stats();
        let run = cancel.child();
        info!(
            "analysing {} homes against {} destinations",
            homes.len(),
            destinations.len()
        );

        let (homes, destinations) = self.pool.install(|| self.resolve_places(homes, destinations, &run))?;

        let mut unresolved = Vec::new();
        let mut cancelled_origins = Vec::new();
        let mut origins = Vec::new();
        for home in &homes {
            match (home.place.coordinate(), home.place.unresolved_reason()) {
                (Some(coordinate), _) => origins.push((home.place.name.clone(), coordinate)),
                (None, Some(reason)) => unresolved.push(UnresolvedPlace {
                    name: home.place.name.clone(),
                    role: PlaceRole::Home,
                    reason: reason.to_string(),
                }),
                (None, None) => cancelled_origins.push(home.place.name.clone()),
            }
        }
        for destination in &destinations {
            if let Some(reason) = destination.place.unresolved_reason() {
                unresolved.push(UnresolvedPlace {
                    name: destination.place.name.clone(),
                    role: PlaceRole::Destination,
                    reason: reason.to_string(),
                });
            }
        }

        let groups = DestinationGroups::build(&destinations, self.config.mode_override);
        info!(
            "{} homes and {} destination groups resolved",
            origins.len(),
            groups.len()
        );

        let points: Vec<Coordinate> = origins.iter().map(|(_, coordinate)| *coordinate).collect();
        let outcomes = self.score_all(&points, &groups, &run);
        first_fatal(&outcomes)?;

        let mut ranked = Vec::new();
        let mut disqualified = Vec::new();
        let mut samples = Vec::new();
        for ((name, _), outcome) in origins.iter().zip(outcomes) {
            match outcome {
                Ok(ScoreOutcome::Scored(score)) => {
                    samples.push(Sample {
                        coordinate: score.origin,
                        value: score.total_weighted_cost,
                    });
                    ranked.push(RankedHome {
                        rank: 0,
                        name: name.clone(),
                        score,
                    });
                }
                Ok(ScoreOutcome::Disqualified {
                    origin,
                    per_group_cost,
                    reasons,
                }) => {
                    warn!("home {:?} disqualified: {:?}", name, reasons);
                    disqualified.push(DisqualifiedHome {
                        name: name.clone(),
                        origin,
                        per_group_cost,
                        reasons,
                    });
                }
                Err(_) => cancelled_origins.push(name.clone()),
            }
        }

        ranked.sort_by(|a, b| {
            a.score
                .total_weighted_cost
                .total_cmp(&b.score.total_weighted_cost)
                .then_with(|| a.name.cmp(&b.name))
        });
        for (index, home) in ranked.iter_mut().enumerate() {
            home.rank = index + 1;
        }
        info!("{} homes ranked, {} disqualified", ranked.len(), disqualified.len());

        let grid = match &self.config.grid {
            Some(grid_config) if !run.is_cancelled() => {
                self.build_grid(grid_config, &points, &groups, samples, &run)?
            }
            _ => None,
        };

        let cache = self.cache.stats().since(&start);
        info!(
            "cache: {} hits, {} misses, {} upstream calls, {} coalesced",
            cache.hits, cache.misses, cache.upstream_calls, cache.coalesced
        );

        Ok(AnalysisReport {
            ranked,
            disqualified,
            unresolved,
            cancelled_origins,
            grid,
            cache,
            cancelled: run.is_cancelled(),
        })
    }

    fn resolve_places(
        &self,
        homes: Vec<HomeOption>,
        destinations: Vec<Destination>,
        run: &CancellationToken,
    ) -> Result<(Vec<HomeOption>, Vec<Destination>), Error> {
        // Places the run never got to stay pending.
        let resolve = |place: &PlaceRef| match self.geocoder.resolve_place(place.clone(), run) {
            Err(Error::Cancelled) => Ok(place.clone()),
            other => other,
        };

        let homes = homes
            .into_par_iter()
            .map(|home| resolve(&home.place).map(HomeOption::new))
            .collect::<Result<Vec<_>, _>>()?;
        let destinations = destinations
            .into_par_iter()
            .map(|mut destination| {
                destination.place = resolve(&destination.place)?;
                Ok(destination)
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok((homes, destinations))
    }

    /// Scores every origin on the pool, preserving input order.
    fn score_all(
        &self,
        origins: &[Coordinate],
        groups: &DestinationGroups,
        run: &CancellationToken,
    ) -> Vec<Result<ScoreOutcome, Error>> {
        self.pool.install(|| {
            origins
                .par_iter()
                .map(|&origin| {
                    if run.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    let outcome = score_origin(
                        origin,
                        groups,
                        &self.router,
                        self.config.trip,
                        self.config.unreachable,
                        run,
                    );
                    if let Err(err) = &outcome {
                        if err.is_fatal() {
                            warn!("stopping run: {}", err);
                            run.cancel();
                        }
                    }
                    outcome
                })
                .collect()
        })
    }

    fn build_grid(
        &self,
        config: &GridConfig,
        homes: &[Coordinate],
        groups: &DestinationGroups,
        mut samples: Vec<Sample>,
        run: &CancellationToken,
    ) -> Result<Option<Grid>, Error> {
        let Some(bounds) = Bounds::enclosing(homes.iter().copied().chain(groups.coordinates())) else {
            return Ok(None);
        };
        let bounds = bounds.expanded(config.margin_fraction, config.min_margin_degrees);
        let points = lattice(&bounds, config.lattice_rows, config.lattice_cols);

        let outcomes = self.score_all(&points, groups, run);
        first_fatal(&outcomes)?;
        if run.is_cancelled() {
            warn!("grid sampling cancelled; no field produced");
            return Ok(None);
        }

        let lattice_samples = outcomes.iter().filter_map(|outcome| match outcome {
            Ok(ScoreOutcome::Scored(score)) => Some(Sample {
                coordinate: score.origin,
                value: score.total_weighted_cost,
            }),
            _ => None,
        });
        // Lattice first so a home that lands on a lattice point never
        // overrides the lattice value.
        samples = lattice_samples.chain(samples).collect();

        let interpolator = Interpolator::new(samples, config.idw_power);
        let grid = self
            .pool
            .install(|| Grid::interpolate(bounds, config.dense_rows, config.dense_cols, &interpolator));
        info!(
            "grid {}x{} interpolated from {} samples",
            grid.rows,
            grid.cols,
            interpolator.samples().len()
        );
        Ok(Some(grid))
    }
}

fn validate_destinations(destinations: &[Destination]) -> Result<(), ConfigError> {
    for destination in destinations {
        if !(destination.weight.is_finite() && destination.weight > 0.0) {
            return Err(ConfigError::InvalidWeight {
                name: destination.place.name.clone(),
                weight: destination.weight,
            });
        }
    }
    Ok(())
}

/// Pre-resolved coordinates must be usable as-is; geocoded ones are checked
/// when the geocoder answers.
fn validate_coordinates(homes: &[HomeOption], destinations: &[Destination]) -> Result<(), RouteError> {
    let places = homes
        .iter()
        .map(|home| ("home", &home.place))
        .chain(destinations.iter().map(|destination| ("destination", &destination.place)));
    for (role, place) in places {
        if let Some(coordinate) = place.coordinate().filter(|coordinate| !coordinate.is_valid()) {
            return Err(RouteError::InvalidInput(format!(
                "{} {:?} has coordinate {} out of range",
                role, place.name, coordinate
            )));
        }
    }
    Ok(())
}

/// First fatal error in input order, so the reported failure does not depend
/// on thread scheduling.
fn first_fatal<T>(outcomes: &[Result<T, Error>]) -> Result<(), Error> {
    match outcomes.iter().find_map(|outcome| outcome.as_ref().err().filter(|err| err.is_fatal())) {
        Some(err) => Err(err.clone()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnreachablePolicy;
    use crate::error::{GeocodeError, RouteError};
    use crate::haversine::HaversineRouter;
    use crate::model::RouteQuery;
    use crate::traits::{Geocoder, RoutingProvider};

    struct NoGeocoder;

    impl Geocoder for NoGeocoder {
        fn resolve(&self, name: &str) -> Result<Coordinate, GeocodeError> {
            Err(GeocodeError::NotFound(name.to_string()))
        }

        fn identity(&self) -> String {
            "none".to_string()
        }
    }

    fn engine(router: Arc<dyn RoutingProvider>, grid: Option<GridConfig>) -> Engine {
        let config = EngineConfig {
            concurrency: 4,
            grid,
            ..EngineConfig::default()
        };
        let providers = Providers {
            geocoder: Arc::new(NoGeocoder),
            router,
        };
        Engine::new(config, providers, Arc::new(QueryCache::in_memory())).unwrap()
    }

    fn home(name: &str, lat: f64, lon: f64) -> HomeOption {
        HomeOption::new(PlaceRef::with_coordinate(name, Coordinate::new(lat, lon)))
    }

    fn destination(name: &str, lat: f64, lon: f64, weight: f64) -> Destination {
        Destination::new(PlaceRef::with_coordinate(name, Coordinate::new(lat, lon)), weight)
    }

    #[test]
    fn test_zero_weight_is_fatal_before_any_query() {
        let engine = engine(Arc::new(HaversineRouter::default()), None);
        let err = engine
            .run(
                vec![home("A", 0.0, 0.0)],
                vec![destination("Work", 0.1, 0.1, 0.0)],
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::InvalidWeight { .. })));
        assert_eq!(engine.cache().stats().upstream_calls, 0);
    }

    #[test]
    fn test_malformed_home_coordinate_is_fatal_before_any_query() {
        let engine = engine(Arc::new(HaversineRouter::default()), None);
        let err = engine
            .run(
                vec![home("A", 0.0, 0.0), home("Broken", f64::NAN, f64::NAN)],
                vec![destination("Work", 0.1, 0.1, 1.0)],
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Route(RouteError::InvalidInput(ref msg)) if msg.contains("Broken")));
        assert_eq!(engine.cache().stats().upstream_calls, 0);

        let err = engine
            .run(
                vec![home("A", 0.0, 0.0)],
                vec![destination("Work", 0.1, f64::INFINITY, 1.0)],
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Route(RouteError::InvalidInput(ref msg)) if msg.contains("Work")));
    }

    #[test]
    fn test_cache_stats_cover_only_the_current_run() {
        let engine = engine(Arc::new(HaversineRouter::default()), None);
        let run = || {
            engine
                .run(
                    vec![home("A", 0.0, 0.0)],
                    vec![destination("Work", 0.1, 0.1, 1.0)],
                    &CancellationToken::new(),
                )
                .unwrap()
        };

        let first = run();
        assert_eq!((first.cache.hits, first.cache.misses, first.cache.upstream_calls), (0, 1, 1));

        let second = run();
        assert_eq!((second.cache.hits, second.cache.misses, second.cache.upstream_calls), (1, 0, 0));

        let lifetime = engine.cache().stats();
        assert_eq!((lifetime.hits, lifetime.misses, lifetime.upstream_calls), (1, 1, 1));
    }

    #[test]
    fn test_unresolved_places_are_reported_not_fatal() {
        let engine = engine(Arc::new(HaversineRouter::default()), None);
        let report = engine
            .run(
                vec![home("A", 0.0, 0.0), HomeOption::new(PlaceRef::new("Lost Home"))],
                vec![
                    destination("Work", 0.1, 0.1, 1.0),
                    Destination::new(PlaceRef::new("Lost Office"), 1.0),
                ],
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(report.ranked.len(), 1);
        let roles: Vec<(&str, PlaceRole)> = report
            .unresolved
            .iter()
            .map(|place| (place.name.as_str(), place.role))
            .collect();
        assert_eq!(
            roles,
            [("Lost Home", PlaceRole::Home), ("Lost Office", PlaceRole::Destination)]
        );
    }

    #[test]
    fn test_ranking_is_ascending_with_ranks() {
        let engine = engine(Arc::new(HaversineRouter::default()), None);
        let report = engine
            .run(
                vec![home("Far", 0.5, 0.5), home("Near", 0.01, 0.01)],
                vec![destination("Work", 0.0, 0.0, 1.0)],
                &CancellationToken::new(),
            )
            .unwrap();
        let names: Vec<(usize, &str)> = report.ranked.iter().map(|h| (h.rank, h.name.as_str())).collect();
        assert_eq!(names, [(1, "Near"), (2, "Far")]);
    }

    #[test]
    fn test_grid_covers_homes_and_destinations() {
        let engine = engine(
            Arc::new(HaversineRouter::default()),
            Some(GridConfig {
                lattice_rows: 4,
                lattice_cols: 4,
                dense_rows: 10,
                dense_cols: 10,
                ..GridConfig::default()
            }),
        );
        let report = engine
            .run(
                vec![home("A", 0.0, 0.0), home("B", 0.2, 0.3)],
                vec![destination("Work", 0.1, 0.1, 1.0)],
                &CancellationToken::new(),
            )
            .unwrap();
        let grid = report.grid.unwrap();
        assert_eq!(grid.values.len(), 100);
        assert!(grid.bounds.min_lat < 0.0 && grid.bounds.max_lat > 0.2);
        assert!(grid.bounds.min_lon < 0.0 && grid.bounds.max_lon > 0.3);
        // Lattice corners span the whole box, so every cell is inside the hull.
        assert!(grid.values.iter().all(|value| value.is_finite()));
    }

    #[test]
    fn test_penalty_policy_keeps_origin_ranked() {
        struct Nowhere;
        impl RoutingProvider for Nowhere {
            fn route(&self, _: &RouteQuery) -> Result<crate::model::RouteResult, RouteError> {
                Err(RouteError::NotFound)
            }
            fn identity(&self) -> String {
                "nowhere".to_string()
            }
        }

        let config = EngineConfig {
            concurrency: 2,
            grid: None,
            unreachable: UnreachablePolicy::Penalty { cost: 7200.0 },
            ..EngineConfig::default()
        };
        let providers = Providers {
            geocoder: Arc::new(NoGeocoder),
            router: Arc::new(Nowhere),
        };
        let engine = Engine::new(config, providers, Arc::new(QueryCache::in_memory())).unwrap();
        let report = engine
            .run(
                vec![home("A", 0.0, 0.0)],
                vec![destination("Island", 1.0, 1.0, 1.0)],
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(report.score_of("A").unwrap().total_weighted_cost, 7200.0);
        assert!(report.disqualified.is_empty());
    }

    #[test]
    fn test_report_serializes_unset_values_as_null() {
        let report = AnalysisReport {
            ranked: Vec::new(),
            disqualified: vec![DisqualifiedHome {
                name: "A".into(),
                origin: Coordinate::new(0.0, 0.0),
                per_group_cost: BTreeMap::from([("g".to_string(), f64::INFINITY)]),
                reasons: BTreeMap::new(),
            }],
            unresolved: Vec::new(),
            cancelled_origins: Vec::new(),
            grid: None,
            cache: QueryCache::in_memory().stats(),
            cancelled: false,
        };
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert!(json["disqualified"][0]["per_group_cost"]["g"].is_null());
    }
}
