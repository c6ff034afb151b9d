//! home-scorer core
//!
//! Ranks candidate homes by weighted travel cost to a set of destinations and
//! interpolates the cost into a continuous field for heatmaps.

pub mod error;
pub mod model;
pub mod traits;
pub mod input;
pub mod config;
pub mod retry;
pub mod cancel;
pub mod cache;
pub mod valhalla;
pub mod google;
pub mod nominatim;
pub mod haversine;
pub mod providers;
pub mod geocoding;
pub mod routing;
pub mod grouping;
pub mod scoring;
pub mod grid;
pub mod engine;
