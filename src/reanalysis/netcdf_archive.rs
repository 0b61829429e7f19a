//! NetCDF grid archives (ERA5 and other CF-style reanalysis output).
//!
//! The data variable is looked up by the configured variable name and must
//! span a time, a latitude and a longitude dimension, plus optionally one
//! vertical level dimension. Dimensions may come in any order; any other
//! dimension must have length 1 (`expver`, `number`, ...).
//!
//! Values are unpacked with `scale_factor` / `add_offset`, and `_FillValue`
//! / `missing_value` cells become `NaN`. The time coordinate is decoded from
//! its CF `units` attribute (`<unit> since <reference>`) on the standard
//! calendar.

use std::path::Path;

use tracing::debug;

use super::grid::{GridError, GridField};
use super::loader::{normalize_longitude, COORD_EPS, LAT_ALIASES, LEVEL_ALIASES, LON_ALIASES, TIME_ALIASES};
use crate::config::VariableConfig;
use crate::tabular::{epoch_from_f64, parse_datetime_string};

const CALENDARS: &[&str] = &["standard", "gregorian", "proleptic_gregorian"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Time,
    Level,
    Latitude,
    Longitude,
}

impl Axis {
    fn classify(dimension: &str) -> Option<Self> {
        let is = |aliases: &[&str]| aliases.iter().any(|a| a.eq_ignore_ascii_case(dimension));
        if is(TIME_ALIASES) {
            Some(Self::Time)
        } else if is(LEVEL_ALIASES) {
            Some(Self::Level)
        } else if is(LAT_ALIASES) {
            Some(Self::Latitude)
        } else if is(LON_ALIASES) {
            Some(Self::Longitude)
        } else {
            None
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Level => "level",
            Self::Latitude => "latitude",
            Self::Longitude => "longitude",
        }
    }
}

/// Position of one grid axis among the variable's dimensions.
struct AxisDim {
    name: String,
    position: usize,
    len: usize,
}

/// Load one variable from a NetCDF archive into a [`GridField`].
pub fn load_netcdf_field(variable: &VariableConfig) -> Result<GridField, GridError> {
    let path = variable.path.as_path();
    let nc_err = |source| GridError::NetCdf {
        path: path.to_path_buf(),
        source,
    };

    let file = netcdf::open(path).map_err(nc_err)?;
    let var = file
        .variable(&variable.name)
        .ok_or_else(|| missing_variable(path, &variable.name))?;

    // Map each dimension onto a grid axis
    let mut axes: [Option<AxisDim>; 4] = Default::default();
    let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
    for (position, dim) in var.dimensions().iter().enumerate() {
        let name = dim.name();
        match Axis::classify(&name) {
            Some(axis) if axes[axis as usize].is_none() => {
                axes[axis as usize] = Some(AxisDim {
                    name,
                    position,
                    len: dim.len(),
                });
            }
            _ if dim.len() == 1 => {}
            _ => {
                return Err(GridError::UnexpectedDimension {
                    path: path.to_path_buf(),
                    variable: variable.name.clone(),
                    dimension: name,
                    len: dim.len(),
                })
            }
        }
    }
    let [time_dim, level_dim, lat_dim, lon_dim] = axes;
    let missing_dimension = |axis: Axis| GridError::MissingDimension {
        path: path.to_path_buf(),
        variable: variable.name.clone(),
        dimension: axis.label().to_string(),
    };
    let require = |dim: Option<AxisDim>, axis: Axis| dim.ok_or_else(|| missing_dimension(axis));
    let time_dim = require(time_dim, Axis::Time)?;
    let lat_dim = require(lat_dim, Axis::Latitude)?;
    let lon_dim = require(lon_dim, Axis::Longitude)?;

    let times = read_time_axis(&file, &time_dim.name, path)?;
    let latitudes = read_coordinate(&file, &lat_dim.name, path)?;
    let longitudes: Vec<f64> = read_coordinate(&file, &lon_dim.name, path)?
        .into_iter()
        .map(normalize_longitude)
        .collect();

    let level = match &level_dim {
        Some(dim) => Some((dim.position, select_level(&file, dim, variable, path)?)),
        None if variable.level.is_some() => return Err(missing_dimension(Axis::Level)),
        None => None,
    };

    let raw = read_f64(&var).map_err(nc_err)?;
    let expected: usize = shape.iter().product();
    if raw.len() != expected {
        return Err(GridError::Shape {
            name: variable.name.clone(),
            expected,
            got: raw.len(),
        });
    }
    let packing = Packing::of(&var);

    // Row-major strides of the stored layout
    let mut strides = vec![1usize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    let base = level.map_or(0, |(position, index)| index * strides[position]);

    let mut values = Vec::with_capacity(time_dim.len * lat_dim.len * lon_dim.len);
    for t in 0..time_dim.len {
        for i in 0..lat_dim.len {
            for j in 0..lon_dim.len {
                let offset =
                    base + t * strides[time_dim.position] + i * strides[lat_dim.position] + j * strides[lon_dim.position];
                values.push(packing.unpack(raw[offset]));
            }
        }
    }

    debug!(
        variable = %variable.name,
        dims = ?var.dimensions().iter().map(|d| d.name()).collect::<Vec<_>>(),
        scale = packing.scale,
        offset = packing.offset,
        "NetCDF variable decoded"
    );
    GridField::new(variable.name.clone(), times, latitudes, longitudes, values)
}

fn missing_variable(path: &Path, name: &str) -> GridError {
    GridError::MissingVariable {
        path: path.to_path_buf(),
        name: name.to_string(),
    }
}

/// Index of the configured level along the level dimension.
fn select_level(
    file: &netcdf::File,
    dim: &AxisDim,
    variable: &VariableConfig,
    path: &Path,
) -> Result<usize, GridError> {
    match variable.level {
        Some(wanted) => read_coordinate(file, &dim.name, path)?
            .iter()
            .position(|l| (l - wanted).abs() < COORD_EPS)
            .ok_or_else(|| GridError::LevelNotFound {
                path: path.to_path_buf(),
                name: variable.name.clone(),
                level: wanted,
            }),
        None if dim.len == 1 => Ok(0),
        None => Err(GridError::AmbiguousLevel {
            path: path.to_path_buf(),
            name: variable.name.clone(),
        }),
    }
}

/// Values of a coordinate variable.
fn read_coordinate(file: &netcdf::File, name: &str, path: &Path) -> Result<Vec<f64>, GridError> {
    let var = file.variable(name).ok_or_else(|| missing_variable(path, name))?;
    read_f64(&var).map_err(|source| GridError::NetCdf {
        path: path.to_path_buf(),
        source,
    })
}

/// Decode a CF time coordinate into epoch seconds.
fn read_time_axis(file: &netcdf::File, name: &str, path: &Path) -> Result<Vec<i64>, GridError> {
    let time_err = |message: String| GridError::TimeAxis {
        path: path.to_path_buf(),
        message,
    };
    let var = file.variable(name).ok_or_else(|| missing_variable(path, name))?;

    if let Some(calendar) = string_attr(&var, "calendar") {
        if !CALENDARS.iter().any(|c| c.eq_ignore_ascii_case(calendar.trim())) {
            return Err(time_err(format!("unsupported calendar '{calendar}'")));
        }
    }
    let units = string_attr(&var, "units").ok_or_else(|| time_err(format!("'{name}' has no units attribute")))?;
    let (unit_secs, reference) = parse_time_units(&units).map_err(time_err)?;

    let offsets = read_coordinate(file, name, path)?;
    offsets
        .iter()
        .map(|&v| {
            epoch_from_f64(reference as f64 + v * unit_secs)
                .ok_or_else(|| time_err(format!("time value {v} {units} is out of range")))
        })
        .collect()
}

/// Split CF units such as `hours since 1900-01-01 00:00:00.0` into
/// (seconds per unit, reference epoch seconds).
fn parse_time_units(units: &str) -> Result<(f64, i64), String> {
    let (unit, reference) = units
        .split_once(" since ")
        .ok_or_else(|| format!("units '{units}' are not of the form '<unit> since <time>'"))?;
    let unit_secs = match unit.trim().to_ascii_lowercase().as_str() {
        "seconds" | "second" | "secs" | "sec" | "s" => 1.0,
        "minutes" | "minute" | "mins" | "min" => 60.0,
        "hours" | "hour" | "hrs" | "hr" | "h" => 3600.0,
        "days" | "day" | "d" => 86_400.0,
        other => return Err(format!("unsupported time unit '{other}'")),
    };
    let reference = reference.trim();
    let reference = reference
        .strip_suffix("UTC")
        .or_else(|| reference.strip_suffix("utc"))
        .unwrap_or(reference)
        .trim();
    Ok((unit_secs, parse_datetime_string(reference)?))
}

/// CF packing and fill attributes of a data variable.
#[derive(Debug, Clone, Copy)]
struct Packing {
    scale: f64,
    offset: f64,
    fill: Option<f64>,
    missing: Option<f64>,
}

impl Packing {
    fn of(var: &netcdf::Variable) -> Self {
        Self {
            scale: f64_attr(var, "scale_factor").unwrap_or(1.0),
            offset: f64_attr(var, "add_offset").unwrap_or(0.0),
            fill: f64_attr(var, "_FillValue"),
            missing: f64_attr(var, "missing_value"),
        }
    }

    fn unpack(&self, raw: f64) -> f64 {
        if !raw.is_finite() || Some(raw) == self.fill || Some(raw) == self.missing {
            f64::NAN
        } else {
            raw * self.scale + self.offset
        }
    }
}

/// Check for an attribute before reading it; HDF5 logs every failed lookup.
fn has_attr(var: &netcdf::Variable, name: &str) -> bool {
    var.attributes().any(|attr| attr.name() == name)
}

fn f64_attr(var: &netcdf::Variable, name: &str) -> Option<f64> {
    if !has_attr(var, name) {
        return None;
    }
    let value = var.attribute_value(name)?.ok()?;
    f64::try_from(value).ok()
}

fn string_attr(var: &netcdf::Variable, name: &str) -> Option<String> {
    if !has_attr(var, name) {
        return None;
    }
    match var.attribute_value(name)?.ok()? {
        netcdf::AttributeValue::Str(s) => Some(s),
        _ => None,
    }
}

/// Read a whole variable as `f64`, whatever numeric type the archive stores.
fn read_f64(var: &netcdf::Variable) -> Result<Vec<f64>, netcdf::Error> {
    fn widen<T: Into<f64>>(values: Vec<T>) -> Vec<f64> {
        values.into_iter().map(Into::into).collect()
    }

    match var.get_values::<f64, _>(..) {
        Ok(values) => Ok(values),
        Err(first) => var
            .get_values::<f32, _>(..)
            .map(widen)
            .or_else(|_| var.get_values::<i32, _>(..).map(widen))
            .or_else(|_| var.get_values::<i16, _>(..).map(widen))
            .or_else(|_| var.get_values::<i8, _>(..).map(widen))
            .or_else(|_| var.get_values::<u8, _>(..).map(widen))
            .or_else(|_| {
                var.get_values::<i64, _>(..)
                    .map(|v| v.into_iter().map(|x| x as f64).collect())
            })
            .map_err(|_| first),
    }
}
