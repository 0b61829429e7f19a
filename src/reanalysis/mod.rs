//! Reanalysis covariates
//!
//! Gridded environmental fields (wind, waves, ice concentration, ...) loaded
//! once per run and sampled at buoy positions:
//!
//! - `loader`: per-variable archives → [`GridField`] / [`FieldSet`]
//! - `netcdf_archive`: NetCDF reader (time, [level,] lat, lon)
//! - `csv_archive`: long-form CSV reader
//! - `spatial_index`: kd-tree over the shared lat/lon grid
//! - `sampler`: nearest time slice + nearest cell lookup
//!
//! Everything here is immutable after loading, so a `&FieldSet` can be shared
//! freely across folds and tuning trials.

pub mod csv_archive;
pub mod grid;
pub mod loader;
pub mod netcdf_archive;
pub mod sampler;
pub mod spatial_index;

pub use grid::{FieldSet, GridError, GridField};
pub use loader::{load_field, load_field_set, ArchiveFormat};
pub use sampler::CovariateSampler;
pub use spatial_index::SpatialIndex;
