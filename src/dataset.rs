//! Buoy observation table.
//!
//! Rows are grouped by buoy, sorted by time and paired with the step that
//! follows them: row `i` carries the displacement (m) and heading (degrees)
//! from fix `i` to fix `i + 1`. The last fix of every buoy has no step and
//! only serves as a rollout target.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::DataConfig;
use crate::features::FeatureLayout;
use crate::geodesy::{haversine_distance, initial_bearing};
use crate::reanalysis::CovariateSampler;
use crate::tabular::{csv_split, get_f64, parse_datetime_string, ColumnIndex};
use crate::types::TrajectoryPoint;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to read observation table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Observation table {0} is empty")]
    Empty(PathBuf),

    #[error("Observation table {path} has no '{column}' column")]
    MissingColumn { path: PathBuf, column: String },

    #[error("No usable observations in {path} ({errors} rows rejected)")]
    NoObservations { path: PathBuf, errors: usize },
}

// ============================================================================
// Observations
// ============================================================================

/// One buoy fix with its outgoing step and covariates.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub point: TrajectoryPoint,
    /// Metres to the next fix; `NaN` when unknown.
    pub displacement: f64,
    /// Degrees from north towards the next fix; `NaN` when unknown.
    pub heading: f64,
    /// One value per covariate, in table covariate order.
    pub covariates: Vec<f64>,
}

impl Observation {
    pub fn new(point: TrajectoryPoint, covariates: Vec<f64>) -> Self {
        Self {
            point,
            displacement: f64::NAN,
            heading: f64::NAN,
            covariates,
        }
    }
}

/// All fixes of one buoy, strictly increasing in time.
#[derive(Debug, Clone, PartialEq)]
pub struct BuoyTrack {
    pub buoy_id: String,
    pub observations: Vec<Observation>,
}

impl BuoyTrack {
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Training matrix built from a table.
#[derive(Debug, Clone, Default)]
pub struct TrainingSet {
    pub features: Vec<Vec<f64>>,
    /// `[displacement_m, heading_deg]` per row.
    pub targets: Vec<[f64; 2]>,
    pub feature_names: Vec<String>,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }
}

/// Observations grouped per buoy, tracks ordered by buoy id.
#[derive(Debug, Clone, Default)]
pub struct ObservationTable {
    covariate_names: Vec<String>,
    tracks: Vec<BuoyTrack>,
}

impl ObservationTable {
    /// Group loose observations into tracks.
    ///
    /// Each track is sorted by time; repeated timestamps within a buoy keep
    /// the first row. With `derive_missing_targets`, non-finite targets are
    /// filled from consecutive positions.
    pub fn from_observations(
        covariate_names: Vec<String>,
        observations: Vec<Observation>,
        derive_missing_targets: bool,
    ) -> Self {
        let mut groups: BTreeMap<String, Vec<Observation>> = BTreeMap::new();
        for obs in observations {
            groups.entry(obs.point.buoy_id.clone()).or_default().push(obs);
        }

        let mut tracks = Vec::with_capacity(groups.len());
        let mut dropped = 0usize;
        for (buoy_id, mut obs) in groups {
            // Stable sort keeps file order among equal timestamps
            obs.sort_by_key(|o| o.point.timestamp);
            let before = obs.len();
            obs.dedup_by(|later, earlier| later.point.timestamp == earlier.point.timestamp);
            if obs.len() < before {
                dropped += before - obs.len();
                warn!(buoy = %buoy_id, duplicates = before - obs.len(), "Dropped fixes with repeated timestamps");
            }
            if derive_missing_targets {
                derive_targets(&mut obs);
            }
            tracks.push(BuoyTrack {
                buoy_id,
                observations: obs,
            });
        }
        if dropped > 0 {
            debug!(dropped, "Duplicate timestamps removed");
        }

        Self {
            covariate_names,
            tracks,
        }
    }

    /// Read the observation CSV described by `config`.
    ///
    /// Covariate columns are looked up by variable name; variables without a
    /// column (or rows with a blank cell) are sampled from the reanalysis grid
    /// at the fix's own position and time.
    pub fn load(config: &DataConfig, sampler: &CovariateSampler<'_>) -> Result<Self, DatasetError> {
        let path = config.observations_path.as_path();
        let file = File::open(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut lines = BufReader::new(file).lines();

        let header = match lines.next() {
            Some(Ok(h)) => h,
            Some(Err(source)) => {
                return Err(DatasetError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
            None => return Err(DatasetError::Empty(path.to_path_buf())),
        };
        let cols = ColumnIndex::from_header(&header);
        let require = |column: &str| {
            cols.find(column).ok_or_else(|| DatasetError::MissingColumn {
                path: path.to_path_buf(),
                column: column.to_string(),
            })
        };
        let id_idx = require(&config.buoy_id_column)?;
        let lat_idx = require(&config.latitude_column)?;
        let lon_idx = require(&config.longitude_column)?;
        let time_idx = require(&config.time_column)?;
        let disp_idx = cols.find(&config.displacement_column);
        let head_idx = cols.find(&config.heading_column);
        if disp_idx.is_none() || head_idx.is_none() {
            if config.derive_missing_targets {
                info!("Displacement/heading columns absent; deriving targets from positions");
            } else {
                return Err(DatasetError::MissingColumn {
                    path: path.to_path_buf(),
                    column: if disp_idx.is_none() {
                        config.displacement_column.clone()
                    } else {
                        config.heading_column.clone()
                    },
                });
            }
        }

        let covariate_names: Vec<String> = sampler.field_set().names().iter().map(|s| s.to_string()).collect();
        let cov_idx: Vec<Option<usize>> = covariate_names.iter().map(|n| cols.find(n)).collect();
        for (name, idx) in covariate_names.iter().zip(&cov_idx) {
            if idx.is_none() {
                info!(variable = %name, "No precomputed covariate column; sampling from reanalysis");
            }
        }

        let mut observations = Vec::new();
        let mut errors = 0usize;
        let mut sampled = 0usize;
        let mut line_num = 1usize;

        for line in lines {
            line_num += 1;
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!(line = line_num, error = %e, "Error reading line");
                    errors += 1;
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let fields = csv_split(&line);

            let buoy_id = fields.get(id_idx).map(|s| s.trim()).unwrap_or_default();
            let lat = get_f64(&fields, Some(lat_idx));
            let lon = get_f64(&fields, Some(lon_idx));
            let time = fields.get(time_idx).map(|s| parse_datetime_string(s));
            let (lat, lon, timestamp) = match (buoy_id.is_empty(), lat, lon, time) {
                (false, Some(lat), Some(lon), Some(Ok(t))) => (lat, lon, t),
                _ => {
                    if errors < 10 {
                        warn!(line = line_num, "Skipping row with missing id, position or time");
                    }
                    errors += 1;
                    continue;
                }
            };
            if !(-90.0..=90.0).contains(&lat) {
                if errors < 10 {
                    warn!(line = line_num, lat, "Skipping row with latitude out of range");
                }
                errors += 1;
                continue;
            }
            let lon = crate::geodesy::wrap_longitude(lon);

            let mut covariates: Vec<f64> = cov_idx.iter().map(|&i| get_f64(&fields, i).unwrap_or(f64::NAN)).collect();
            if covariates.iter().any(|v| v.is_nan()) {
                let grid = sampler.sample(lat, lon, timestamp);
                for (c, g) in covariates.iter_mut().zip(grid) {
                    if c.is_nan() {
                        *c = g;
                    }
                }
                sampled += 1;
            }

            observations.push(Observation {
                point: TrajectoryPoint::new(buoy_id, lat, lon, timestamp),
                displacement: get_f64(&fields, disp_idx).unwrap_or(f64::NAN),
                heading: get_f64(&fields, head_idx).unwrap_or(f64::NAN),
                covariates,
            });
        }

        if observations.is_empty() {
            return Err(DatasetError::NoObservations {
                path: path.to_path_buf(),
                errors,
            });
        }

        let table = Self::from_observations(covariate_names, observations, config.derive_missing_targets);
        info!(
            path = %path.display(),
            buoys = table.n_buoys(),
            observations = table.n_observations(),
            rejected = errors,
            grid_sampled = sampled,
            "Observation table loaded"
        );
        Ok(table)
    }

    pub fn covariate_names(&self) -> &[String] {
        &self.covariate_names
    }

    pub fn layout(&self) -> FeatureLayout {
        FeatureLayout::new(self.covariate_names.clone())
    }

    pub fn tracks(&self) -> &[BuoyTrack] {
        &self.tracks
    }

    pub fn track(&self, buoy_id: &str) -> Option<&BuoyTrack> {
        self.tracks.iter().find(|t| t.buoy_id == buoy_id)
    }

    pub fn buoy_ids(&self) -> Vec<&str> {
        self.tracks.iter().map(|t| t.buoy_id.as_str()).collect()
    }

    pub fn n_buoys(&self) -> usize {
        self.tracks.len()
    }

    pub fn n_observations(&self) -> usize {
        self.tracks.iter().map(|t| t.len()).sum()
    }

    /// Table restricted to the tracks at `indices` (positions in `tracks()`).
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            covariate_names: self.covariate_names.clone(),
            tracks: indices.iter().filter_map(|&i| self.tracks.get(i).cloned()).collect(),
        }
    }

    /// Split into (tracks whose id is in `ids`, all others).
    pub fn partition_by_ids(&self, ids: &[String]) -> (Self, Self) {
        let (inside, outside): (Vec<BuoyTrack>, Vec<BuoyTrack>) =
            self.tracks.iter().cloned().partition(|t| ids.contains(&t.buoy_id));
        (
            Self {
                covariate_names: self.covariate_names.clone(),
                tracks: inside,
            },
            Self {
                covariate_names: self.covariate_names.clone(),
                tracks: outside,
            },
        )
    }

    /// One training row per step with finite features and targets.
    pub fn training_set(&self) -> TrainingSet {
        let layout = self.layout();
        let mut set = TrainingSet {
            feature_names: layout.names(),
            ..Default::default()
        };
        let mut skipped = 0usize;

        for track in &self.tracks {
            for pair in track.observations.windows(2) {
                let (cur, next) = (&pair[0], &pair[1]);
                let dt = next.point.timestamp.checked_sub(cur.point.timestamp).map_or(f64::NAN, |d| d as f64);
                let row = layout.row(cur.point.latitude, cur.point.longitude, dt, &cur.covariates);
                let target = [cur.displacement, cur.heading];
                if row.iter().chain(target.iter()).all(|v| v.is_finite()) {
                    set.features.push(row);
                    set.targets.push(target);
                } else {
                    skipped += 1;
                }
            }
        }
        if skipped > 0 {
            debug!(skipped, kept = set.len(), "Training rows with missing values skipped");
        }
        set
    }
}

/// Fill non-finite displacement/heading from the next fix.
fn derive_targets(obs: &mut [Observation]) {
    for i in 0..obs.len().saturating_sub(1) {
        let (lat2, lon2) = (obs[i + 1].point.latitude, obs[i + 1].point.longitude);
        let cur = &mut obs[i];
        let (lat1, lon1) = (cur.point.latitude, cur.point.longitude);
        if !cur.displacement.is_finite() {
            cur.displacement = haversine_distance(lat1, lon1, lat2, lon2);
        }
        if !cur.heading.is_finite() {
            cur.heading = initial_bearing(lat1, lon1, lat2, lon2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reanalysis::{FieldSet, GridField};
    use std::io::Write;
    use std::path::Path;

    fn load_observations(path: &Path, sampler: &CovariateSampler<'_>) -> Result<ObservationTable, DatasetError> {
        let config = DataConfig {
            observations_path: path.to_path_buf(),
            ..DataConfig::default()
        };
        ObservationTable::load(&config, sampler)
    }

    fn obs(id: &str, lat: f64, lon: f64, t: i64) -> Observation {
        Observation::new(TrajectoryPoint::new(id, lat, lon, t), Vec::new())
    }

    #[test]
    fn test_grouping_sorting_and_dedup() {
        let table = ObservationTable::from_observations(
            Vec::new(),
            vec![
                obs("b", 80.0, 0.0, 200),
                obs("a", 70.0, 0.0, 100),
                obs("b", 80.1, 0.0, 100),
                obs("b", 80.2, 0.0, 100),
                obs("a", 70.1, 0.0, 0),
            ],
            true,
        );
        assert_eq!(table.buoy_ids(), vec!["a", "b"]);
        let b = table.track("b").unwrap();
        assert_eq!(b.len(), 2);
        // First row of the duplicated timestamp is kept
        assert_eq!(b.observations[0].point.latitude, 80.1);
        assert!(b.observations.windows(2).all(|w| w[0].point.timestamp < w[1].point.timestamp));
        assert_eq!(table.n_observations(), 4);
    }

    #[test]
    fn test_targets_derived_forward() {
        let table = ObservationTable::from_observations(
            Vec::new(),
            vec![obs("a", 80.0, 0.0, 0), obs("a", 80.1, 0.0, 3600)],
            true,
        );
        let track = table.track("a").unwrap();
        let first = &track.observations[0];
        let expected = haversine_distance(80.0, 0.0, 80.1, 0.0);
        assert!((first.displacement - expected).abs() < 1e-9);
        assert!(first.heading.abs() < 1e-9);
        // Last fix has no outgoing step
        assert!(track.observations[1].displacement.is_nan());
    }

    #[test]
    fn test_given_targets_not_overwritten() {
        let mut o = obs("a", 80.0, 0.0, 0);
        o.displacement = 123.0;
        o.heading = 45.0;
        let table = ObservationTable::from_observations(Vec::new(), vec![o, obs("a", 80.1, 0.0, 3600)], true);
        let first = &table.tracks()[0].observations[0];
        assert_eq!(first.displacement, 123.0);
        assert_eq!(first.heading, 45.0);
    }

    #[test]
    fn test_training_set_rows() {
        let mut a0 = obs("a", 80.0, 0.0, 0);
        a0.covariates = vec![1.5];
        let mut a1 = obs("a", 80.1, 0.0, 3600);
        a1.covariates = vec![2.5];
        let mut a2 = obs("a", 80.2, 0.0, 7200);
        a2.covariates = vec![f64::NAN];
        let table = ObservationTable::from_observations(vec!["u10".into()], vec![a0, a1, a2], true);
        let set = table.training_set();
        // Two steps; none has a NaN in its own row
        assert_eq!(set.len(), 2);
        assert_eq!(set.n_features(), 4);
        assert_eq!(set.features[0], vec![80.0, 0.0, 3600.0, 1.5]);
        assert_eq!(set.features[1][3], 2.5);
    }

    #[test]
    fn test_partition_by_ids() {
        let table = ObservationTable::from_observations(
            Vec::new(),
            vec![obs("a", 0.0, 0.0, 0), obs("b", 0.0, 0.0, 0), obs("c", 0.0, 0.0, 0)],
            true,
        );
        let (held, rest) = table.partition_by_ids(&["b".to_string()]);
        assert_eq!(held.buoy_ids(), vec!["b"]);
        assert_eq!(rest.buoy_ids(), vec!["a", "c"]);
        assert_eq!(table.select(&[2, 0]).buoy_ids(), vec!["c", "a"]);
    }

    #[test]
    fn test_load_csv_with_grid_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buoys.csv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "BuoyID,Latitude,Longitude,datetime,u10").unwrap();
        writeln!(f, "300234,80.0,10.0,2019-03-01 00:00:00,").unwrap();
        writeln!(f, "300234,80.1,10.0,2019-03-01 06:00:00,4.0").unwrap();
        writeln!(f, ",80.1,10.0,2019-03-01 06:00:00,4.0").unwrap();
        drop(f);

        let t0 = parse_datetime_string("2019-03-01 00:00:00").unwrap();
        let grid = GridField::new("u10", vec![t0], vec![80.0], vec![10.0], vec![7.0]).unwrap();
        let set = FieldSet::new(vec![grid]).unwrap();
        let sampler = CovariateSampler::new(&set, 6 * 3600);

        let table = load_observations(&path, &sampler).unwrap();
        assert_eq!(table.n_buoys(), 1);
        let track = table.track("300234").unwrap();
        assert_eq!(track.len(), 2);
        assert_eq!(track.observations[0].covariates, vec![7.0]);
        assert_eq!(track.observations[1].covariates, vec![4.0]);
        assert!(track.observations[0].displacement > 0.0);
    }

    #[test]
    fn test_load_missing_required_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buoys.csv");
        std::fs::write(&path, "BuoyID,Latitude,datetime\n1,80,2019-03-01\n").unwrap();
        let set = FieldSet::empty();
        let sampler = CovariateSampler::new(&set, 0);
        let err = load_observations(&path, &sampler).unwrap_err();
        assert!(matches!(err, DatasetError::MissingColumn { ref column, .. } if column == "Longitude"));
    }

    #[test]
    fn test_out_of_range_timestamps_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buoys.csv");
        std::fs::write(
            &path,
            "BuoyID,Latitude,Longitude,datetime\n\
             a,80.0,0.0,-9e18\n\
             a,80.1,0.0,9e18\n\
             a,80.2,0.0,2019-03-01 00:00:00\n\
             a,80.3,0.0,2019-03-01 06:00:00\n",
        )
        .unwrap();
        let set = FieldSet::empty();
        let sampler = CovariateSampler::new(&set, 0);
        let table = load_observations(&path, &sampler).unwrap();
        assert_eq!(table.n_observations(), 2);
        assert_eq!(table.training_set().len(), 1);
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let table = ObservationTable::from_observations(
            Vec::new(),
            vec![obs("a", 80.0, 0.0, i64::MIN), obs("a", 80.1, 0.0, i64::MAX)],
            true,
        );
        // The step's elapsed time is unrepresentable so the row is dropped
        assert!(table.training_set().is_empty());
    }
}
