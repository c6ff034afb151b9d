//! Provider selection by configuration.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::google::{GoogleConfig, GoogleGeocoder, GoogleRoutesClient};
use crate::haversine::HaversineRouter;
use crate::nominatim::{NominatimClient, NominatimConfig};
use crate::traits::{Geocoder, RoutingProvider};
use crate::valhalla::{ValhallaClient, ValhallaConfig};

const DEFAULT_VALHALLA_URL: &str = "http://[::1]:9000/valhalla";
const DEFAULT_NOMINATIM_URL: &str = "http://[::1]:9000/nominatim";

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Self-hosted Valhalla routing with Nominatim geocoding.
    Valhalla {
        valhalla_url: String,
        nominatim_url: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// Google Routes (traffic-aware) with Google geocoding.
    Google {
        api_key: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// Straight-line estimates with Nominatim geocoding; no routing service.
    Haversine {
        nominatim_url: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

/// The geocoder and router a run talks to.
#[derive(Clone)]
pub struct Providers {
    pub geocoder: Arc<dyn Geocoder>,
    pub router: Arc<dyn RoutingProvider>,
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> bool {
    lookup(name).is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
}

impl ProviderConfig {
    /// Reads `DEMO_MODE`, `USE_GOOGLE`, `GOOGLE_API_KEY`, `VALHALLA_URL` and
    /// `NOMINATIM_URL` from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let nominatim_url =
            lookup("NOMINATIM_URL").unwrap_or_else(|| DEFAULT_NOMINATIM_URL.to_string());

        if flag(&lookup, "DEMO_MODE") {
            return Ok(ProviderConfig::Haversine {
                nominatim_url,
                timeout_secs: default_timeout_secs(),
            });
        }
        if flag(&lookup, "USE_GOOGLE") {
            let api_key = lookup("GOOGLE_API_KEY")
                .filter(|key| !key.trim().is_empty())
                .ok_or(ConfigError::MissingEnv("GOOGLE_API_KEY"))?;
            return Ok(ProviderConfig::Google {
                api_key,
                timeout_secs: default_timeout_secs(),
            });
        }
        Ok(ProviderConfig::Valhalla {
            valhalla_url: lookup("VALHALLA_URL").unwrap_or_else(|| DEFAULT_VALHALLA_URL.to_string()),
            nominatim_url,
            timeout_secs: default_timeout_secs(),
        })
    }

    pub fn build(&self) -> Result<Providers, ConfigError> {
        let http = |err: reqwest::Error| ConfigError::HttpClient(err.to_string());
        let nominatim = |base_url: &str, timeout_secs: u64| {
            NominatimClient::new(NominatimConfig {
                base_url: base_url.to_string(),
                timeout_secs,
            })
            .map_err(http)
        };

        let providers = match self {
            ProviderConfig::Valhalla {
                valhalla_url,
                nominatim_url,
                timeout_secs,
            } => Providers {
                geocoder: Arc::new(nominatim(nominatim_url, *timeout_secs)?),
                router: Arc::new(
                    ValhallaClient::new(ValhallaConfig {
                        base_url: valhalla_url.clone(),
                        timeout_secs: *timeout_secs,
                    })
                    .map_err(http)?,
                ),
            },
            ProviderConfig::Google {
                api_key,
                timeout_secs,
            } => {
                let config = GoogleConfig {
                    timeout_secs: *timeout_secs,
                    ..GoogleConfig::new(api_key.clone())
                };
                Providers {
                    geocoder: Arc::new(GoogleGeocoder::new(config.clone()).map_err(http)?),
                    router: Arc::new(GoogleRoutesClient::new(config).map_err(http)?),
                }
            }
            ProviderConfig::Haversine {
                nominatim_url,
                timeout_secs,
            } => Providers {
                geocoder: Arc::new(nominatim(nominatim_url, *timeout_secs)?),
                router: Arc::new(HaversineRouter::default()),
            },
        };
        info!(
            "using router {} with geocoder {}",
            providers.router.identity(),
            providers.geocoder.identity()
        );
        Ok(providers)
    }
}
