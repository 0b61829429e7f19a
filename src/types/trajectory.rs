//! Buoy position fixes.

use serde::{Deserialize, Serialize};

/// One buoy position fix.
///
/// `timestamp` is Unix epoch seconds (UTC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub buoy_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: i64,
}

impl TrajectoryPoint {
    pub fn new(buoy_id: impl Into<String>, latitude: f64, longitude: f64, timestamp: i64) -> Self {
        Self {
            buoy_id: buoy_id.into(),
            latitude,
            longitude,
            timestamp,
        }
    }

    /// True when both coordinates are finite numbers.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }
}
