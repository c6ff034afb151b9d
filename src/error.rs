//! Error taxonomy for geocoding, routing, configuration and caching.
//!
//! Every error is `Clone` so that one upstream outcome can be handed to all
//! callers coalesced onto the same in-flight request.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeocodeError {
    #[error("no geocoding match for {0:?}")]
    NotFound(String),

    #[error("geocoding provider error: {0}")]
    Provider(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouteError {
    /// No path exists between the pair under the requested mode.
    #[error("no route found")]
    NotFound,

    #[error("routing provider error: {0}")]
    Provider(String),

    #[error("invalid route input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("destination {name:?} has invalid weight {weight} (must be > 0)")]
    InvalidWeight { name: String, weight: f64 },

    #[error("destination {name:?} has unknown transport mode {mode:?}")]
    UnknownTransportMode { name: String, mode: String },

    #[error("destination {name:?} has malformed time {value:?} (expected HH:MM)")]
    MalformedTime { name: String, value: String },

    #[error("destination {name:?} has unknown day of week {value:?}")]
    UnknownDay { name: String, value: String },

    #[error("place {name:?} has invalid coordinates ({lat}, {lon})")]
    InvalidCoordinates { name: String, lat: f64, lon: f64 },

    #[error("invalid engine parameter {field}: {reason}")]
    InvalidParameter { field: &'static str, reason: String },

    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),

    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("cache unavailable: {0}")]
pub struct CacheUnavailable(pub String);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error(transparent)]
    Geocode(#[from] GeocodeError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CacheUnavailable),

    #[error("run cancelled")]
    Cancelled,
}

impl Error {
    /// Fatal errors stop the whole run before further queries are issued.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Route(RouteError::InvalidInput(_)) | Error::Config(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
