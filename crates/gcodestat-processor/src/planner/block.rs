//! Planner blocks and trapezoid math
//!
//! A [`TimeBlock`] is one linear move as the firmware planner sees it. Its
//! velocity profile is a trapezoid: accelerate from the entry speed up to
//! the cruise speed, hold it, then decelerate to the exit speed. When the
//! move is too short to reach cruise speed the plateau collapses to a
//! single peak.

use gcodestat_core::{ExtrusionRole, MoveType};

/// Upper bound for the time of a single block, in seconds
///
/// Reached only with degenerate limits (a zero max feedrate on a moving
/// axis), where the true time would be infinite.
pub const MAX_BLOCK_TIME: f64 = 1.0e7;

/// Speed reachable after `distance` when starting at `initial_feedrate`
pub fn speed_from_distance(initial_feedrate: f64, distance: f64, acceleration: f64) -> f64 {
    (initial_feedrate * initial_feedrate + 2.0 * acceleration * distance)
        .max(0.0)
        .sqrt()
}

/// Time spent covering `distance` while accelerating from `initial_feedrate`
pub fn acceleration_time_from_distance(
    initial_feedrate: f64,
    distance: f64,
    acceleration: f64,
) -> f64 {
    if acceleration != 0.0 {
        (speed_from_distance(initial_feedrate, distance, acceleration) - initial_feedrate)
            / acceleration
    } else {
        0.0
    }
}

/// Distance needed to go from `initial_rate` to `target_rate`
pub fn estimate_acceleration_distance(
    initial_rate: f64,
    target_rate: f64,
    acceleration: f64,
) -> f64 {
    if acceleration != 0.0 {
        (target_rate * target_rate - initial_rate * initial_rate) / (2.0 * acceleration)
    } else {
        0.0
    }
}

/// Point where accelerating from `initial_rate` meets decelerating to `final_rate`
pub fn intersection_distance(
    initial_rate: f64,
    final_rate: f64,
    acceleration: f64,
    distance: f64,
) -> f64 {
    if acceleration != 0.0 {
        (2.0 * acceleration * distance - initial_rate * initial_rate + final_rate * final_rate)
            / (4.0 * acceleration)
    } else {
        0.0
    }
}

/// Highest speed from which `target_velocity` is reachable within `distance`
///
/// Called with a negated acceleration it gives the speed reachable by
/// accelerating from `target_velocity` over `distance` instead.
pub fn max_allowable_speed(acceleration: f64, target_velocity: f64, distance: f64) -> f64 {
    (target_velocity * target_velocity - 2.0 * acceleration * distance)
        .max(0.0)
        .sqrt()
}

/// Entry, cruise and exit speeds of a block (mm/s)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeedrateProfile {
    pub entry: f64,
    pub cruise: f64,
    pub exit: f64,
}

/// Distances along a block where the velocity profile changes phase
///
/// Invariant: `0 <= accelerate_until <= decelerate_after <= distance`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Trapezoid {
    pub accelerate_until: f64,
    pub decelerate_after: f64,
    pub cruise_feedrate: f64,
}

impl Trapezoid {
    /// Length of the constant-speed plateau
    pub fn cruise_distance(&self) -> f64 {
        self.decelerate_after - self.accelerate_until
    }

    pub fn acceleration_time(&self, entry_feedrate: f64, acceleration: f64) -> f64 {
        acceleration_time_from_distance(entry_feedrate, self.accelerate_until, acceleration)
    }

    pub fn cruise_time(&self) -> f64 {
        let distance = self.cruise_distance();
        if self.cruise_feedrate > 0.0 {
            distance / self.cruise_feedrate
        } else if distance > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }

    pub fn deceleration_time(&self, distance: f64, acceleration: f64) -> f64 {
        acceleration_time_from_distance(
            self.cruise_feedrate,
            distance - self.decelerate_after,
            -acceleration,
        )
    }
}

/// Planner state flags of a block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockFlags {
    /// Junction speeds changed since the trapezoid was last computed
    pub recalculate: bool,
    /// The block is long enough to reach its cruise speed from any entry speed
    pub nominal_length: bool,
}

/// One planned motion segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeBlock {
    pub move_type: MoveType,
    pub role: ExtrusionRole,
    /// Source line of the move
    pub line_id: usize,
    /// Index of the move vertex in the result
    pub move_id: usize,
    /// 1-based layer
    pub layer_id: usize,
    /// Travel distance (mm)
    pub distance: f64,
    /// Acceleration (mm/s²)
    pub acceleration: f64,
    pub max_entry_speed: f64,
    pub safe_feedrate: f64,
    pub flags: BlockFlags,
    pub feedrate_profile: FeedrateProfile,
    pub trapezoid: Trapezoid,
}

impl TimeBlock {
    /// Duration of the block from its trapezoid, clamped to [`MAX_BLOCK_TIME`]
    pub fn time(&self) -> f64 {
        let time = self
            .trapezoid
            .acceleration_time(self.feedrate_profile.entry, self.acceleration)
            + self.trapezoid.cruise_time()
            + self
                .trapezoid
                .deceleration_time(self.distance, self.acceleration);

        if time.is_finite() {
            time.clamp(0.0, MAX_BLOCK_TIME)
        } else {
            MAX_BLOCK_TIME
        }
    }

    /// Whether the time of this block hit the degenerate-limits clamp
    pub fn is_degenerate(&self) -> bool {
        self.time() >= MAX_BLOCK_TIME
    }

    /// Recompute the trapezoid from the current feedrate profile
    pub fn calculate_trapezoid(&mut self) {
        let profile = self.feedrate_profile;
        let accel_distance =
            estimate_acceleration_distance(profile.entry, profile.cruise, self.acceleration)
                .max(0.0);
        let decel_distance =
            estimate_acceleration_distance(profile.cruise, profile.exit, -self.acceleration)
                .max(0.0);
        let cruise_distance = self.distance - accel_distance - decel_distance;

        if cruise_distance >= 0.0 {
            self.trapezoid = Trapezoid {
                accelerate_until: accel_distance,
                decelerate_after: accel_distance + cruise_distance,
                cruise_feedrate: profile.cruise,
            };
        } else {
            // Too short to reach cruise speed: accelerate and decelerate
            // meet at a single peak.
            let accelerate_until = intersection_distance(
                profile.entry,
                profile.exit,
                self.acceleration,
                self.distance,
            )
            .clamp(0.0, self.distance);
            self.trapezoid = Trapezoid {
                accelerate_until,
                decelerate_after: accelerate_until,
                cruise_feedrate: speed_from_distance(
                    profile.entry,
                    accelerate_until,
                    self.acceleration,
                ),
            };
        }
    }
}
