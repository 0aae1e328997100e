//! Firmware motion planner simulation
//!
//! - `block`: trapezoid math and the planner block
//! - `machine`: bounded planner queue and time buckets for one mode
//! - `estimator`: all modes driven together

mod block;
mod estimator;
mod machine;

pub use block::{
    acceleration_time_from_distance, estimate_acceleration_distance, intersection_distance,
    max_allowable_speed, speed_from_distance, BlockFlags, FeedrateProfile, TimeBlock, Trapezoid,
    MAX_BLOCK_TIME,
};
pub use estimator::TimeEstimator;
pub use machine::{AxisLimits, FinalizedMove, PlannedMove, TimeMachine};
