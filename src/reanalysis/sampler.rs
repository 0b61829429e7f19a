//! Covariate lookup: nearest time slice and nearest grid cell per field.

use super::grid::{FieldSet, GridField};

/// Samples every field of a [`FieldSet`] at a (lat, lon, time) query.
///
/// Borrowing, `Copy` and free of interior state, so one sampler can be shared
/// across rayon workers.
#[derive(Debug, Clone, Copy)]
pub struct CovariateSampler<'a> {
    fields: &'a FieldSet,
    tolerance_secs: i64,
}

impl<'a> CovariateSampler<'a> {
    pub fn new(fields: &'a FieldSet, tolerance_secs: i64) -> Self {
        Self {
            fields,
            tolerance_secs: tolerance_secs.max(0),
        }
    }

    pub fn field_set(&self) -> &'a FieldSet {
        self.fields
    }

    /// Number of covariates each sample yields.
    pub fn width(&self) -> usize {
        self.fields.len()
    }

    /// One value per field in field-set order.
    ///
    /// A field yields `NaN` when the query time is further than the tolerance
    /// outside its time axis, when the coordinates are not finite, or when the
    /// archive had no value for the chosen cell.
    pub fn sample(&self, lat: f64, lon: f64, timestamp: i64) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.width());
        self.sample_into(lat, lon, timestamp, &mut out);
        out
    }

    /// Like [`sample`](Self::sample) but appends into an existing buffer.
    pub fn sample_into(&self, lat: f64, lon: f64, timestamp: i64, out: &mut Vec<f64>) {
        let cell = self.fields.nearest_cell(lat, lon);
        for field in self.fields.fields() {
            let value = match (cell, self.nearest_time(field, timestamp)) {
                (Some(c), Some(t)) => field.value(t, c),
                _ => f64::NAN,
            };
            out.push(value);
        }
    }

    /// Index of the slice with the smallest |Δt|; the earlier slice wins ties.
    fn nearest_time(&self, field: &GridField, timestamp: i64) -> Option<usize> {
        nearest_time_index(field.times(), timestamp, self.tolerance_secs)
    }
}

/// Nearest index into a strictly increasing `times` axis.
///
/// `None` when `timestamp` lies outside `[first - tolerance, last + tolerance]`.
pub fn nearest_time_index(times: &[i64], timestamp: i64, tolerance_secs: i64) -> Option<usize> {
    let first = *times.first()?;
    let last = *times.last()?;
    if timestamp < first.saturating_sub(tolerance_secs) || timestamp > last.saturating_add(tolerance_secs) {
        return None;
    }

    // First slice at or after the query
    let upper = times.partition_point(|&t| t < timestamp);
    if upper == 0 {
        return Some(0);
    }
    if upper == times.len() {
        return Some(times.len() - 1);
    }
    let lower = upper - 1;
    let d_lower = timestamp - times[lower];
    let d_upper = times[upper] - timestamp;
    Some(if d_upper < d_lower { upper } else { lower })
}
