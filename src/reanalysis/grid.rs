//! In-memory gridded fields and the shared field set.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{info, warn};

use super::spatial_index::SpatialIndex;
use crate::config::defaults::POLAR_DISTORTION_LATITUDE;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum GridError {
    #[error("Failed to read grid archive {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Grid archive {0} is empty")]
    Empty(PathBuf),

    #[error("Grid archive {path} has no '{column}' column")]
    MissingColumn { path: PathBuf, column: String },

    #[error("Grid archive {path}, line {line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Failed to read NetCDF archive {path}: {source}")]
    NetCdf {
        path: PathBuf,
        #[source]
        source: netcdf::Error,
    },

    #[error("Grid archive {path} has no variable '{name}'")]
    MissingVariable { path: PathBuf, name: String },

    #[error("Variable '{variable}' in {path} has no {dimension} dimension")]
    MissingDimension {
        path: PathBuf,
        variable: String,
        dimension: String,
    },

    #[error("Variable '{variable}' in {path} has unsupported dimension '{dimension}' of length {len}")]
    UnexpectedDimension {
        path: PathBuf,
        variable: String,
        dimension: String,
        len: usize,
    },

    #[error("Grid archive {path}: cannot decode time axis: {message}")]
    TimeAxis { path: PathBuf, message: String },

    #[error("Grid archive {path} has no level {level} for variable '{name}'")]
    LevelNotFound { path: PathBuf, name: String, level: f64 },

    #[error("Grid archive {path} holds several levels; set `level` for variable '{name}'")]
    AmbiguousLevel { path: PathBuf, name: String },

    #[error("No rows for variable '{0}' after level filtering")]
    NoData(String),

    #[error("Field '{name}': expected {expected} values, got {got}")]
    Shape {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("Field '{0}': time axis must be strictly increasing")]
    UnorderedTime(String),

    #[error("Field '{0}': latitude and longitude axes must be non-empty and finite")]
    BadAxis(String),

    #[error("Field '{field}' does not share the lat/lon axes of '{reference}'")]
    AxisMismatch { field: String, reference: String },

    #[error("Duplicate field name '{0}'")]
    DuplicateField(String),
}

// ============================================================================
// GridField
// ============================================================================

/// One environmental variable on a regular (time, lat, lon) grid.
///
/// Values are stored flat as `[t][ilat * nlon + ilon]`; `NaN` marks cells the
/// archive did not provide. Immutable once built.
#[derive(Debug, Clone)]
pub struct GridField {
    name: String,
    times: Vec<i64>,
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
    values: Vec<f64>,
}

impl GridField {
    pub fn new(
        name: impl Into<String>,
        times: Vec<i64>,
        latitudes: Vec<f64>,
        longitudes: Vec<f64>,
        values: Vec<f64>,
    ) -> Result<Self, GridError> {
        let name = name.into();
        if times.is_empty() {
            return Err(GridError::NoData(name));
        }
        if !times.windows(2).all(|w| w[0] < w[1]) {
            return Err(GridError::UnorderedTime(name));
        }
        if latitudes.is_empty()
            || longitudes.is_empty()
            || !latitudes.iter().chain(longitudes.iter()).all(|v| v.is_finite())
        {
            return Err(GridError::BadAxis(name));
        }
        let expected = times.len() * latitudes.len() * longitudes.len();
        if values.len() != expected {
            return Err(GridError::Shape {
                name,
                expected,
                got: values.len(),
            });
        }
        Ok(Self {
            name,
            times,
            latitudes,
            longitudes,
            values,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn times(&self) -> &[i64] {
        &self.times
    }

    pub fn latitudes(&self) -> &[f64] {
        &self.latitudes
    }

    pub fn longitudes(&self) -> &[f64] {
        &self.longitudes
    }

    /// Number of spatial cells per time slice.
    pub fn n_cells(&self) -> usize {
        self.latitudes.len() * self.longitudes.len()
    }

    /// Value at time slice `t` and flattened cell `cell`; `NaN` when out of bounds.
    pub fn value(&self, t: usize, cell: usize) -> f64 {
        if t >= self.times.len() || cell >= self.n_cells() {
            return f64::NAN;
        }
        self.values[t * self.n_cells() + cell]
    }

    /// Share of cells holding a finite value.
    pub fn coverage(&self) -> f64 {
        let finite = self.values.iter().filter(|v| v.is_finite()).count();
        finite as f64 / self.values.len() as f64
    }

    fn same_axes(&self, other: &GridField) -> bool {
        fn eq(a: &[f64], b: &[f64]) -> bool {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
        }
        eq(&self.latitudes, &other.latitudes) && eq(&self.longitudes, &other.longitudes)
    }
}

// ============================================================================
// FieldSet
// ============================================================================

/// Fields sharing one lat/lon grid plus the spatial index over it.
///
/// The read-only view every fold and tuning trial samples from.
#[derive(Debug, Clone, Default)]
pub struct FieldSet {
    fields: Vec<GridField>,
    index: SpatialIndex,
}

impl FieldSet {
    /// A set with no variables; sampling yields an empty covariate vector.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Check that every field shares the first field's axes and index the grid.
    pub fn new(fields: Vec<GridField>) -> Result<Self, GridError> {
        let Some(reference) = fields.first() else {
            return Ok(Self::empty());
        };

        for (i, f) in fields.iter().enumerate() {
            if fields[..i].iter().any(|o| o.name == f.name) {
                return Err(GridError::DuplicateField(f.name.clone()));
            }
            if !f.same_axes(reference) {
                return Err(GridError::AxisMismatch {
                    field: f.name.clone(),
                    reference: reference.name.clone(),
                });
            }
        }

        let nlon = reference.longitudes.len();
        let cells: Vec<(f64, f64)> = (0..reference.n_cells())
            .map(|c| (reference.latitudes[c / nlon], reference.longitudes[c % nlon]))
            .collect();
        let index = SpatialIndex::build(&cells);

        let max_abs_lat = reference.latitudes.iter().fold(0.0_f64, |m, l| m.max(l.abs()));
        if max_abs_lat > POLAR_DISTORTION_LATITUDE {
            warn!(
                max_abs_lat,
                "Grid extends poleward of {}°; nearest-cell lookup uses degree-space distance and is distorted at high latitude",
                POLAR_DISTORTION_LATITUDE
            );
        }

        info!(
            fields = fields.len(),
            cells = cells.len(),
            "Reanalysis field set indexed"
        );

        Ok(Self { fields, index })
    }

    pub fn fields(&self) -> &[GridField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Variable names in covariate order.
    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name()).collect()
    }

    /// Nearest grid cell to a query position.
    pub fn nearest_cell(&self, lat: f64, lon: f64) -> Option<usize> {
        self.index.nearest(lat, lon)
    }
}
