//! Reanalysis archive loading.
//!
//! One archive per variable. The format follows the file extension:
//!
//! - `.csv` / `.txt`: long-form CSV ([`super::csv_archive`])
//! - anything else: NetCDF ([`super::netcdf_archive`]), the usual form of
//!   ERA5 and other reanalysis downloads
//!
//! Longitudes in [0, 360) are folded into [-180, 180) either way.

use std::path::Path;

use rayon::prelude::*;
use tracing::{info, warn};

use super::csv_archive::load_csv_field;
use super::grid::{FieldSet, GridError, GridField};
use super::netcdf_archive::load_netcdf_field;
use crate::config::{ReanalysisConfig, VariableConfig};

pub(crate) const TIME_ALIASES: &[&str] = &["time", "valid_time", "datetime"];
pub(crate) const LAT_ALIASES: &[&str] = &["latitude", "lat"];
pub(crate) const LON_ALIASES: &[&str] = &["longitude", "lon"];
pub(crate) const LEVEL_ALIASES: &[&str] = &["level", "pressure_level", "isobaricInhPa", "plev", "lev"];

/// Tolerance for matching a level or deduplicating axis coordinates.
pub(crate) const COORD_EPS: f64 = 1e-6;

/// On-disk layout of a grid archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    NetCdf,
    Csv,
}

impl ArchiveFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") || ext.eq_ignore_ascii_case("txt") => Self::Csv,
            _ => Self::NetCdf,
        }
    }
}

/// Load every configured variable and index the shared grid.
///
/// Archives are read in parallel; any failure aborts the whole set.
pub fn load_field_set(config: &ReanalysisConfig) -> Result<FieldSet, GridError> {
    if config.variables.is_empty() {
        info!("No reanalysis variables configured; covariates will be empty");
        return Ok(FieldSet::empty());
    }
    let fields = config
        .variables
        .par_iter()
        .map(load_field)
        .collect::<Result<Vec<_>, _>>()?;
    FieldSet::new(fields)
}

/// Load one variable archive into a [`GridField`].
pub fn load_field(variable: &VariableConfig) -> Result<GridField, GridError> {
    let path = variable.path.as_path();
    if !path.exists() {
        return Err(GridError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
    }

    let format = ArchiveFormat::from_path(path);
    let field = match format {
        ArchiveFormat::NetCdf => load_netcdf_field(variable)?,
        ArchiveFormat::Csv => load_csv_field(variable)?,
    };

    let coverage = field.coverage();
    if coverage < 1.0 {
        warn!(
            variable = %variable.name,
            coverage = format!("{:.1}%", coverage * 100.0),
            "Grid archive has gaps; affected cells sample as missing"
        );
    }

    info!(
        variable = %variable.name,
        path = %path.display(),
        format = ?format,
        times = field.times().len(),
        lats = field.latitudes().len(),
        lons = field.longitudes().len(),
        "Reanalysis variable loaded"
    );
    Ok(field)
}

/// Fold a longitude into [-180, 180).
pub fn normalize_longitude(lon: f64) -> f64 {
    if (-180.0..180.0).contains(&lon) {
        lon
    } else {
        (lon + 180.0).rem_euclid(360.0) - 180.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variable(name: &str, path: &Path) -> VariableConfig {
        VariableConfig {
            name: name.to_string(),
            path: path.to_path_buf(),
            level: None,
        }
    }

    #[test]
    fn test_normalize_longitude() {
        assert_eq!(normalize_longitude(0.0), 0.0);
        assert_eq!(normalize_longitude(-180.0), -180.0);
        assert_eq!(normalize_longitude(180.0), -180.0);
        assert_eq!(normalize_longitude(270.0), -90.0);
        assert_eq!(normalize_longitude(359.75), -0.25);
    }

    #[test]
    fn test_format_follows_extension() {
        assert_eq!(ArchiveFormat::from_path(Path::new("era5/u10.nc")), ArchiveFormat::NetCdf);
        assert_eq!(ArchiveFormat::from_path(Path::new("era5/u10.nc4")), ArchiveFormat::NetCdf);
        assert_eq!(ArchiveFormat::from_path(Path::new("grids/u10.CSV")), ArchiveFormat::Csv);
        assert_eq!(ArchiveFormat::from_path(Path::new("grids/u10")), ArchiveFormat::NetCdf);
    }

    #[test]
    fn test_missing_file_is_fatal() {
        for p in ["/nonexistent/x.csv", "/nonexistent/x.nc"] {
            let err = load_field(&variable("x", Path::new(p))).unwrap_err();
            assert!(matches!(err, GridError::Io { .. }), "{p}");
        }
    }

    #[test]
    fn test_csv_and_netcdf_agree() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("u10.csv");
        std::fs::write(
            &csv,
            "time,latitude,longitude,value\n\
             2019-03-01 00:00:00,80.0,0.0,1.5\n\
             2019-03-01 00:00:00,80.0,10.0,2.5\n",
        )
        .unwrap();
        let nc = dir.path().join("u10.nc");
        {
            let mut file = netcdf::create(&nc).unwrap();
            file.add_dimension("time", 1).unwrap();
            file.add_dimension("latitude", 1).unwrap();
            file.add_dimension("longitude", 2).unwrap();
            let mut time = file.add_variable::<f64>("time", &["time"]).unwrap();
            time.put_attribute("units", "days since 2019-03-01").unwrap();
            time.put_values(&[0.0], ..).unwrap();
            let mut lat = file.add_variable::<f64>("latitude", &["latitude"]).unwrap();
            lat.put_values(&[80.0], ..).unwrap();
            let mut lon = file.add_variable::<f64>("longitude", &["longitude"]).unwrap();
            lon.put_values(&[0.0, 10.0], ..).unwrap();
            let mut u = file.add_variable::<f64>("u10", &["time", "latitude", "longitude"]).unwrap();
            u.put_values(&[1.5, 2.5], ..).unwrap();
        }

        let a = load_field(&variable("u10", &csv)).unwrap();
        let b = load_field(&variable("u10", &nc)).unwrap();
        assert_eq!(a.times(), b.times());
        assert_eq!(a.latitudes(), b.latitudes());
        assert_eq!(a.longitudes(), b.longitudes());
        assert_eq!((a.value(0, 0), a.value(0, 1)), (b.value(0, 0), b.value(0, 1)));

        let set = FieldSet::new(vec![a]).unwrap();
        assert_eq!(set.names(), vec!["u10"]);
    }

    #[test]
    fn test_load_field_set_empty_config() {
        let set = load_field_set(&ReanalysisConfig::default()).unwrap();
        assert!(set.is_empty());
    }
}
