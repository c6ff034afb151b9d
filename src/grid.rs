//! Sampling lattice and scattered-data interpolation of origin scores.
//!
//! Scores at lattice points and real homes are spread onto a dense grid by
//! inverse-distance weighting. With an exponent above 1 the field is C1 and
//! reproduces every sample exactly. Cells outside the convex hull of the
//! samples stay `NaN`; nothing is extrapolated.

use geo::{Area, ConvexHull, Intersects, MultiPoint, Point, Polygon};
use rayon::prelude::*;
use serde::Serialize;

use crate::model::Coordinate;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Bounds {
    pub fn enclosing(points: impl IntoIterator<Item = Coordinate>) -> Option<Self> {
        points.into_iter().fold(None, |bounds: Option<Bounds>, point| {
            Some(match bounds {
                None => Bounds {
                    min_lat: point.lat,
                    max_lat: point.lat,
                    min_lon: point.lon,
                    max_lon: point.lon,
                },
                Some(b) => Bounds {
                    min_lat: b.min_lat.min(point.lat),
                    max_lat: b.max_lat.max(point.lat),
                    min_lon: b.min_lon.min(point.lon),
                    max_lon: b.max_lon.max(point.lon),
                },
            })
        })
    }

    /// Grows each axis by `fraction` of its span, never by less than
    /// `min_degrees`, clamped to valid WGS84 ranges.
    pub fn expanded(&self, fraction: f64, min_degrees: f64) -> Self {
        let lat_margin = ((self.max_lat - self.min_lat) * fraction).max(min_degrees);
        let lon_margin = ((self.max_lon - self.min_lon) * fraction).max(min_degrees);
        Bounds {
            min_lat: (self.min_lat - lat_margin).max(-90.0),
            max_lat: (self.max_lat + lat_margin).min(90.0),
            min_lon: (self.min_lon - lon_margin).max(-180.0),
            max_lon: (self.max_lon + lon_margin).min(180.0),
        }
    }
}

fn axis_value(min: f64, max: f64, n: usize, i: usize) -> f64 {
    if n <= 1 {
        (min + max) / 2.0
    } else {
        min + (max - min) * (i as f64 / (n - 1) as f64)
    }
}

/// `n` evenly spaced values from `min` to `max` inclusive; one value sits at
/// the midpoint.
pub fn linspace(min: f64, max: f64, n: usize) -> Vec<f64> {
    (0..n).map(|i| axis_value(min, max, n, i)).collect()
}

/// Row-major lattice: row index walks latitude upwards, column index walks
/// longitude eastwards.
pub fn lattice(bounds: &Bounds, rows: usize, cols: usize) -> Vec<Coordinate> {
    let lats = linspace(bounds.min_lat, bounds.max_lat, rows);
    let lons = linspace(bounds.min_lon, bounds.max_lon, cols);
    lats.iter()
        .flat_map(|&lat| lons.iter().map(move |&lon| Coordinate::new(lat, lon)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub coordinate: Coordinate,
    pub value: f64,
}

pub struct Interpolator {
    samples: Vec<Sample>,
    hull: Option<Polygon<f64>>,
    power: f64,
    /// Longitude degrees are shortened by cos(latitude) around the samples.
    lon_scale: f64,
}

impl Interpolator {
    /// Samples with non-finite values are dropped. Fewer than three samples,
    /// or samples that are all collinear, span no area and interpolate to
    /// nothing.
    pub fn new(samples: impl IntoIterator<Item = Sample>, power: f64) -> Self {
        let samples: Vec<Sample> = samples
            .into_iter()
            .filter(|sample| sample.value.is_finite() && sample.coordinate.is_valid())
            .collect();

        let hull = (samples.len() >= 3)
            .then(|| {
                MultiPoint::from(
                    samples
                        .iter()
                        .map(|sample| (sample.coordinate.lon, sample.coordinate.lat))
                        .collect::<Vec<_>>(),
                )
                .convex_hull()
            })
            .filter(|hull| hull.unsigned_area() > 0.0);

        let mean_lat = if samples.is_empty() {
            0.0
        } else {
            samples.iter().map(|sample| sample.coordinate.lat).sum::<f64>() / samples.len() as f64
        };

        Self {
            samples,
            hull,
            power,
            lon_scale: mean_lat.to_radians().cos(),
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Closed hull: points on its boundary count as inside.
    pub fn covers(&self, point: Coordinate) -> bool {
        self.hull
            .as_ref()
            .is_some_and(|hull| hull.intersects(&Point::new(point.lon, point.lat)))
    }

    pub fn value_at(&self, point: Coordinate) -> f64 {
        if !self.covers(point) {
            return f64::NAN;
        }
        let mut weighted = 0.0;
        let mut total = 0.0;
        for sample in &self.samples {
            let dlat = point.lat - sample.coordinate.lat;
            let dlon = (point.lon - sample.coordinate.lon) * self.lon_scale;
            let squared = dlat * dlat + dlon * dlon;
            if squared == 0.0 {
                return sample.value;
            }
            let weight = squared.powf(-self.power / 2.0);
            weighted += weight * sample.value;
            total += weight;
        }
        weighted / total
    }
}

/// Dense field of interpolated total costs, row-major, `NaN` where unset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grid {
    pub bounds: Bounds,
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<f64>,
    /// Smallest and largest finite value, for color scales.
    pub value_range: Option<(f64, f64)>,
}

impl Grid {
    pub fn interpolate(bounds: Bounds, rows: usize, cols: usize, interpolator: &Interpolator) -> Self {
        let values: Vec<f64> = (0..rows * cols)
            .into_par_iter()
            .map(|cell| {
                let point = Coordinate::new(
                    axis_value(bounds.min_lat, bounds.max_lat, rows, cell / cols),
                    axis_value(bounds.min_lon, bounds.max_lon, cols, cell % cols),
                );
                interpolator.value_at(point)
            })
            .collect();

        let value_range = values
            .iter()
            .copied()
            .filter(|value| value.is_finite())
            .fold(None, |range: Option<(f64, f64)>, value| match range {
                None => Some((value, value)),
                Some((low, high)) => Some((low.min(value), high.max(value))),
            });

        Self {
            bounds,
            rows,
            cols,
            values,
            value_range,
        }
    }

    pub fn lat_at(&self, row: usize) -> f64 {
        axis_value(self.bounds.min_lat, self.bounds.max_lat, self.rows, row)
    }

    pub fn lon_at(&self, col: usize) -> f64 {
        axis_value(self.bounds.min_lon, self.bounds.max_lon, self.cols, col)
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.values.get(row * self.cols + col).copied()
    }
}
