//! Long-form CSV grid archives.
//!
//! One row per grid value:
//!
//! ```text
//! time,latitude,longitude,value
//! 2019-03-01 00:00:00,80.0,0.0,4.21
//! ```
//!
//! An optional `level` column holds the vertical level; rows of other levels
//! are dropped when the variable config names one. The value column may be
//! called `value` or carry the variable's own name.

use std::fs::File;
use std::io::{BufRead, BufReader};

use tracing::{debug, warn};

use super::grid::{GridError, GridField};
use super::loader::{normalize_longitude, COORD_EPS, LAT_ALIASES, LEVEL_ALIASES, LON_ALIASES, TIME_ALIASES};
use crate::config::VariableConfig;
use crate::tabular::{csv_split, get_f64, parse_datetime_string, ColumnIndex};

struct GridRow {
    time: i64,
    lat: f64,
    lon: f64,
    value: f64,
}

/// Load one long-form CSV archive into a [`GridField`].
pub fn load_csv_field(variable: &VariableConfig) -> Result<GridField, GridError> {
    let path = variable.path.as_path();
    let file = File::open(path).map_err(|source| GridError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut lines = BufReader::new(file).lines();

    let header = match lines.next() {
        Some(Ok(h)) => h,
        Some(Err(source)) => {
            return Err(GridError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
        None => return Err(GridError::Empty(path.to_path_buf())),
    };
    let cols = ColumnIndex::from_header(&header);

    let missing = |column: &str| GridError::MissingColumn {
        path: path.to_path_buf(),
        column: column.to_string(),
    };
    let time_idx = cols.find_any(TIME_ALIASES).ok_or_else(|| missing("time"))?;
    let lat_idx = cols.find_any(LAT_ALIASES).ok_or_else(|| missing("latitude"))?;
    let lon_idx = cols.find_any(LON_ALIASES).ok_or_else(|| missing("longitude"))?;
    let value_idx = cols
        .find("value")
        .or_else(|| cols.find(&variable.name))
        .ok_or_else(|| missing("value"))?;
    let level_idx = cols.find_any(LEVEL_ALIASES);
    if variable.level.is_some() && level_idx.is_none() {
        return Err(missing("level"));
    }

    let mut rows = Vec::new();
    let mut seen_level: Option<f64> = None;
    let mut skipped_levels = 0usize;
    let mut missing_values = 0usize;
    let mut line_num = 1usize;

    for line in lines {
        line_num += 1;
        let line = line.map_err(|source| GridError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let fields = csv_split(&line);
        let parse_err = |message: String| GridError::Parse {
            path: path.to_path_buf(),
            line: line_num,
            message,
        };

        if let Some(li) = level_idx {
            let level = get_f64(&fields, Some(li)).ok_or_else(|| parse_err("bad level".to_string()))?;
            match variable.level {
                Some(wanted) if (level - wanted).abs() > COORD_EPS => {
                    skipped_levels += 1;
                    continue;
                }
                Some(_) => {}
                None => match seen_level {
                    Some(first) if (first - level).abs() > COORD_EPS => {
                        return Err(GridError::AmbiguousLevel {
                            path: path.to_path_buf(),
                            name: variable.name.clone(),
                        })
                    }
                    Some(_) => {}
                    None => seen_level = Some(level),
                },
            }
        }

        let time_str = fields
            .get(time_idx)
            .ok_or_else(|| parse_err("missing time field".to_string()))?;
        let time = parse_datetime_string(time_str).map_err(parse_err)?;
        let lat = get_f64(&fields, Some(lat_idx)).ok_or_else(|| parse_err("bad latitude".to_string()))?;
        let lon = get_f64(&fields, Some(lon_idx)).ok_or_else(|| parse_err("bad longitude".to_string()))?;
        let value = get_f64(&fields, Some(value_idx)).unwrap_or_else(|| {
            missing_values += 1;
            f64::NAN
        });

        rows.push(GridRow {
            time,
            lat,
            lon: normalize_longitude(lon),
            value,
        });
    }

    if rows.is_empty() {
        return Err(GridError::NoData(variable.name.clone()));
    }
    if skipped_levels > 0 {
        debug!(variable = %variable.name, skipped_levels, "Dropped rows of other levels");
    }

    if missing_values > 0 {
        debug!(variable = %variable.name, missing_values, "Blank grid values read as missing");
    }
    assemble(&variable.name, &rows)
}

/// Build sorted axes from long-form rows and scatter values into the grid.
fn assemble(name: &str, rows: &[GridRow]) -> Result<GridField, GridError> {
    let mut times: Vec<i64> = rows.iter().map(|r| r.time).collect();
    times.sort_unstable();
    times.dedup();
    let latitudes = unique_sorted(rows.iter().map(|r| r.lat));
    let longitudes = unique_sorted(rows.iter().map(|r| r.lon));

    let nlon = longitudes.len();
    let n_cells = latitudes.len() * nlon;
    let mut values = vec![f64::NAN; times.len() * n_cells];
    let mut duplicates = 0usize;

    for r in rows {
        // Axes were built from these same rows so every lookup succeeds
        let (Ok(t), Some(ilat), Some(ilon)) = (
            times.binary_search(&r.time),
            axis_position(&latitudes, r.lat),
            axis_position(&longitudes, r.lon),
        ) else {
            continue;
        };
        let slot = &mut values[t * n_cells + ilat * nlon + ilon];
        if !slot.is_nan() {
            duplicates += 1;
        }
        *slot = r.value;
    }
    if duplicates > 0 {
        warn!(variable = name, duplicates, "Duplicate grid rows; last value kept");
    }

    GridField::new(name, times, latitudes, longitudes, values)
}

fn unique_sorted(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut v: Vec<f64> = values.collect();
    v.sort_by(f64::total_cmp);
    v.dedup_by(|a, b| (*a - *b).abs() < COORD_EPS);
    v
}

fn axis_position(axis: &[f64], x: f64) -> Option<usize> {
    let i = axis.partition_point(|&a| a < x - COORD_EPS);
    (i < axis.len() && (axis[i] - x).abs() < COORD_EPS).then_some(i)
}
