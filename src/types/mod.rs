//! Shared data structures for buoy drift modelling
//!
//! - TrajectoryPoint: an observed or predicted buoy position
//! - PredictionRecord: one observed-vs-predicted pair from a rollout

mod trajectory;
mod prediction;

pub use trajectory::*;
pub use prediction::*;
