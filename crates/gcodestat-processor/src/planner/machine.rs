//! Per-mode time simulation
//!
//! A [`TimeMachine`] replays the firmware planner for one [`TimeMode`].
//! Moves become [`TimeBlock`]s in a bounded queue. Junction speeds are
//! resolved with a reverse and a forward pass, and blocks leaving the queue
//! add their duration to the statistics buckets.

use std::collections::VecDeque;

use gcodestat_core::{Axis, AxisPosition, CustomGCodeType, ExtrusionRole, MoveType, TimeMode};
use gcodestat_settings::{PrintConfig, MIN_ACCELERATION};
use tracing::warn;

use super::block::{max_allowable_speed, BlockFlags, FeedrateProfile, TimeBlock, Trapezoid};

/// Below this previous feedrate the junction is treated as a standstill
const PREVIOUS_FEEDRATE_THRESHOLD: f64 = 0.0001;

/// Kinematic limits of one mode
///
/// Seeded from the configuration and updated by M201/M203/M205/M566.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisLimits {
    /// Max feedrate per axis (mm/s)
    pub max_feedrate: [f64; 4],
    /// Max acceleration per axis (mm/s²)
    pub max_acceleration: [f64; 4],
    /// Max jerk per axis (mm/s)
    pub max_jerk: [f64; 4],
    /// Floor for extruding moves (mm/s)
    pub min_extruding_rate: f64,
    /// Floor for travel moves (mm/s)
    pub min_travel_rate: f64,
}

impl AxisLimits {
    pub fn from_config(config: &PrintConfig, mode: TimeMode) -> Self {
        let limits = &config.machine_limits;
        Self {
            max_feedrate: limits.max_feedrate(mode),
            max_acceleration: limits.max_acceleration(mode),
            max_jerk: limits.max_jerk(mode),
            min_extruding_rate: limits.min_extruding_rate(mode),
            min_travel_rate: limits.min_travel_rate(mode),
        }
    }
}

/// A move handed to the planner by the state machine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedMove {
    pub move_type: MoveType,
    pub role: ExtrusionRole,
    pub line_id: usize,
    pub move_id: usize,
    pub layer_id: usize,
    /// Per-axis displacement (mm)
    pub delta: AxisPosition,
    /// Requested feedrate (mm/s)
    pub feedrate: f64,
}

/// Elapsed machine time at the end of a finalized move
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinalizedMove {
    pub move_id: usize,
    pub elapsed: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct JunctionState {
    feedrate: f64,
    safe_feedrate: f64,
    axis_feedrate: [f64; 4],
}

#[derive(Debug, Clone, Copy)]
struct PendingCheckpoint {
    line_id: usize,
    /// Number of finalized blocks at which the checkpoint is reached
    target: usize,
}

#[derive(Debug, Clone, Default)]
struct CustomGCodeTime {
    needed: bool,
    cache: f64,
    times: Vec<(CustomGCodeType, f64)>,
}

/// Planner and time accumulator for one mode
#[derive(Debug, Clone)]
pub struct TimeMachine {
    mode: TimeMode,
    enabled: bool,
    /// Live kinematic limits
    pub limits: AxisLimits,
    acceleration: f64,
    max_acceleration: f64,
    retract_acceleration: f64,
    max_retract_acceleration: f64,
    travel_acceleration: f64,
    max_travel_acceleration: f64,
    extrude_factor_override: f64,
    time: f64,
    curr: JunctionState,
    prev: JunctionState,
    gcode_time: CustomGCodeTime,
    moves_time: [f64; MoveType::COUNT],
    roles_time: [f64; ExtrusionRole::COUNT],
    layers_time: Vec<f64>,
    blocks: VecDeque<TimeBlock>,
    queue_size: usize,
    refresh_threshold: usize,
    enqueued_blocks: usize,
    finalized_blocks: usize,
    last_move_type: MoveType,
    pending_checkpoints: VecDeque<PendingCheckpoint>,
    checkpoints: Vec<(usize, f64)>,
    finalized_moves: Vec<FinalizedMove>,
    degenerate_blocks: usize,
}

impl TimeMachine {
    /// Create a machine seeded with the limits configured for `mode`
    pub fn new(config: &PrintConfig, mode: TimeMode, enabled: bool) -> Self {
        let limits = &config.machine_limits;
        let acceleration = limits.extruding_acceleration(mode).max(MIN_ACCELERATION);
        let retract_acceleration = limits.retracting_acceleration(mode).max(MIN_ACCELERATION);
        let travel_acceleration = limits.travel_acceleration(mode).max(MIN_ACCELERATION);

        Self {
            mode,
            enabled,
            limits: AxisLimits::from_config(config, mode),
            acceleration,
            max_acceleration: acceleration,
            retract_acceleration,
            max_retract_acceleration: retract_acceleration,
            travel_acceleration,
            max_travel_acceleration: travel_acceleration,
            extrude_factor_override: 1.0,
            time: 0.0,
            curr: JunctionState::default(),
            prev: JunctionState::default(),
            gcode_time: CustomGCodeTime::default(),
            moves_time: [0.0; MoveType::COUNT],
            roles_time: [0.0; ExtrusionRole::COUNT],
            layers_time: Vec::new(),
            blocks: VecDeque::with_capacity(config.processor.refresh_threshold() + 1),
            queue_size: config.processor.queue_size.max(1),
            refresh_threshold: config.processor.refresh_threshold().max(1),
            enqueued_blocks: 0,
            finalized_blocks: 0,
            last_move_type: MoveType::Noop,
            pending_checkpoints: VecDeque::new(),
            checkpoints: Vec::new(),
            finalized_moves: Vec::new(),
            degenerate_blocks: 0,
        }
    }

    pub fn mode(&self) -> TimeMode {
        self.mode
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Total simulated time (s)
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn acceleration(&self) -> f64 {
        self.acceleration
    }

    pub fn retract_acceleration(&self) -> f64 {
        self.retract_acceleration
    }

    pub fn travel_acceleration(&self) -> f64 {
        self.travel_acceleration
    }

    /// Number of blocks waiting in the planner queue
    pub fn queued_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Number of blocks whose time hit the degenerate-limits clamp
    pub fn degenerate_blocks(&self) -> usize {
        self.degenerate_blocks
    }

    fn clamp_to_max(value: f64, max: f64) -> f64 {
        let value = value.max(MIN_ACCELERATION);
        if max > 0.0 {
            value.min(max)
        } else {
            value
        }
    }

    /// Default acceleration for printing moves (M204 P/S)
    pub fn set_acceleration(&mut self, value: f64) {
        self.acceleration = Self::clamp_to_max(value, self.max_acceleration);
    }

    /// Acceleration for extruder-only moves (M204 R/T)
    pub fn set_retract_acceleration(&mut self, value: f64) {
        self.retract_acceleration = Self::clamp_to_max(value, self.max_retract_acceleration);
    }

    /// Acceleration for travel moves (M204 T/S)
    pub fn set_travel_acceleration(&mut self, value: f64) {
        self.travel_acceleration = Self::clamp_to_max(value, self.max_travel_acceleration);
    }

    /// Extrude factor override as a ratio (M221 S100 = 1.0)
    pub fn set_extrude_factor_override(&mut self, factor: f64) {
        self.extrude_factor_override = factor;
    }

    pub fn extrude_factor_override(&self) -> f64 {
        self.extrude_factor_override
    }

    /// Plan one move, flushing the oldest blocks when the queue is full
    ///
    /// Zero-length moves are ignored and leave the junction state untouched.
    pub fn plan_move(&mut self, planned: &PlannedMove) {
        if !self.enabled {
            return;
        }

        let delta = planned.delta;
        let xyz_length = delta.xyz_length();
        let distance = if xyz_length > 0.0 {
            xyz_length
        } else {
            delta[Axis::E].abs()
        };
        if distance <= 0.0 {
            return;
        }
        let inv_distance = 1.0 / distance;

        let min_feedrate = if delta[Axis::E] == 0.0 {
            self.limits.min_travel_rate
        } else {
            self.limits.min_extruding_rate
        };
        self.curr.feedrate = planned.feedrate.max(min_feedrate);

        let mut min_feedrate_factor = 1.0_f64;
        for axis in Axis::ALL {
            let i = axis.index();
            let mut axis_feedrate = self.curr.feedrate * delta[axis] * inv_distance;
            if axis == Axis::E {
                axis_feedrate *= self.extrude_factor_override;
            }
            self.curr.axis_feedrate[i] = axis_feedrate;

            let abs_feedrate = axis_feedrate.abs();
            if abs_feedrate > 0.0 {
                let max_feedrate = self.limits.max_feedrate[i];
                let factor = if max_feedrate > 0.0 {
                    max_feedrate / abs_feedrate
                } else {
                    0.0
                };
                min_feedrate_factor = min_feedrate_factor.min(factor);
            }
        }

        let cruise = min_feedrate_factor * self.curr.feedrate;
        if min_feedrate_factor < 1.0 {
            for feedrate in self.curr.axis_feedrate.iter_mut() {
                *feedrate *= min_feedrate_factor;
            }
        }

        let extruder_only = xyz_length == 0.0 && delta[Axis::E] != 0.0;
        let mut acceleration = if planned.move_type == MoveType::Travel {
            self.travel_acceleration
        } else if extruder_only {
            self.retract_acceleration
        } else {
            self.acceleration
        };
        for axis in Axis::ALL {
            let axis_max_acceleration = self.limits.max_acceleration[axis.index()];
            if axis_max_acceleration > 0.0
                && acceleration * delta[axis].abs() * inv_distance > axis_max_acceleration
            {
                acceleration = axis_max_acceleration;
            }
        }

        self.curr.safe_feedrate = cruise;
        for axis in Axis::ALL {
            let i = axis.index();
            let max_jerk = self.limits.max_jerk[i];
            if self.curr.axis_feedrate[i].abs() > max_jerk {
                self.curr.safe_feedrate = self.curr.safe_feedrate.min(max_jerk);
            }
        }

        let vmax_junction = self.junction_speed(cruise);
        let v_allowable = max_allowable_speed(-acceleration, self.curr.safe_feedrate, distance);

        let mut block = TimeBlock {
            move_type: planned.move_type,
            role: planned.role,
            line_id: planned.line_id,
            move_id: planned.move_id,
            layer_id: planned.layer_id,
            distance,
            acceleration,
            max_entry_speed: vmax_junction,
            safe_feedrate: self.curr.safe_feedrate,
            flags: BlockFlags {
                recalculate: true,
                nominal_length: cruise <= v_allowable,
            },
            feedrate_profile: FeedrateProfile {
                entry: vmax_junction.min(v_allowable),
                cruise,
                exit: self.curr.safe_feedrate,
            },
            trapezoid: Trapezoid::default(),
        };
        block.calculate_trapezoid();

        self.prev = self.curr;
        self.blocks.push_back(block);
        self.enqueued_blocks += 1;

        if self.blocks.len() > self.refresh_threshold {
            self.calculate_time(self.queue_size);
        }
    }

    /// Highest speed at which the previous block can hand over to one cruising at `cruise`
    fn junction_speed(&self, cruise: f64) -> f64 {
        let mut vmax_junction = self.curr.safe_feedrate;
        if self.blocks.is_empty() || self.prev.feedrate <= PREVIOUS_FEEDRATE_THRESHOLD {
            return vmax_junction;
        }

        let prev_speed_larger = self.prev.feedrate > cruise;
        let smaller_speed_factor = if prev_speed_larger {
            cruise / self.prev.feedrate
        } else if cruise > 0.0 {
            self.prev.feedrate / cruise
        } else {
            0.0
        };
        // Higher speed shall not be reached at the junction while coasting
        vmax_junction = if prev_speed_larger {
            cruise
        } else {
            self.prev.feedrate
        };

        let mut v_factor = 1.0_f64;
        let mut limited = false;
        for axis in Axis::ALL {
            let i = axis.index();
            let mut v_exit = self.prev.axis_feedrate[i];
            let mut v_entry = self.curr.axis_feedrate[i];
            if prev_speed_larger {
                v_exit *= smaller_speed_factor;
            }
            if limited {
                v_exit *= v_factor;
                v_entry *= v_factor;
            }

            let jerk = if v_exit > v_entry {
                if v_entry > 0.0 || v_exit < 0.0 {
                    v_exit - v_entry
                } else {
                    // axis reversal
                    v_exit.max(-v_entry)
                }
            } else if v_entry < 0.0 || v_exit > 0.0 {
                v_entry - v_exit
            } else {
                // axis reversal
                (-v_exit).max(v_entry)
            };

            let max_jerk = self.limits.max_jerk[i];
            if jerk > max_jerk {
                v_factor *= max_jerk / jerk;
                limited = true;
            }
        }
        if limited {
            vmax_junction *= v_factor;
        }

        // Not coasting: the machine stops and restarts anyway
        let threshold = vmax_junction * 0.99;
        if self.prev.safe_feedrate > threshold && self.curr.safe_feedrate > threshold {
            vmax_junction = self.curr.safe_feedrate;
        }

        vmax_junction
    }

    /// Resolve the queue and finalize all but the newest `keep_last_n_blocks`
    fn calculate_time(&mut self, keep_last_n_blocks: usize) {
        if !self.enabled {
            return;
        }

        if !self.blocks.is_empty() {
            self.reverse_pass();
            self.forward_pass();
            self.recalculate_trapezoids();
        }

        let flush = self.blocks.len().saturating_sub(keep_last_n_blocks);
        for _ in 0..flush {
            let Some(block) = self.blocks.pop_front() else {
                break;
            };
            let block_time = block.time();
            if block.is_degenerate() {
                self.degenerate_blocks += 1;
                if self.degenerate_blocks == 1 {
                    warn!(
                        mode = %self.mode,
                        line = block.line_id,
                        "Move cannot be timed with the configured limits, clamping"
                    );
                }
            }

            self.time += block_time;
            self.gcode_time.cache += block_time;
            self.moves_time[block.move_type.index()] += block_time;
            if block.move_type == MoveType::Extrude {
                self.roles_time[block.role.index()] += block_time;
            }
            self.add_layer_time(block.layer_id, block_time);
            self.last_move_type = block.move_type;

            self.finalized_blocks += 1;
            self.finalized_moves.push(FinalizedMove {
                move_id: block.move_id,
                elapsed: self.time,
            });
            self.resolve_checkpoints();
        }
    }

    fn reverse_pass(&mut self) {
        for i in (1..self.blocks.len()).rev() {
            let next_entry = self.blocks[i].feedrate_profile.entry;
            let curr = &mut self.blocks[i - 1];
            if curr.feedrate_profile.entry != curr.max_entry_speed {
                curr.feedrate_profile.entry =
                    if !curr.flags.nominal_length && curr.max_entry_speed > next_entry {
                        curr.max_entry_speed.min(max_allowable_speed(
                            -curr.acceleration,
                            next_entry,
                            curr.distance,
                        ))
                    } else {
                        curr.max_entry_speed
                    };
                curr.flags.recalculate = true;
            }
        }
    }

    fn forward_pass(&mut self) {
        for i in 0..self.blocks.len().saturating_sub(1) {
            let prev = self.blocks[i];
            let curr = &mut self.blocks[i + 1];
            if !prev.flags.nominal_length && prev.feedrate_profile.entry < curr.feedrate_profile.entry
            {
                let entry_speed = curr.feedrate_profile.entry.min(max_allowable_speed(
                    -prev.acceleration,
                    prev.feedrate_profile.entry,
                    prev.distance,
                ));
                if curr.feedrate_profile.entry != entry_speed {
                    curr.feedrate_profile.entry = entry_speed;
                    curr.flags.recalculate = true;
                }
            }
        }
    }

    fn recalculate_trapezoids(&mut self) {
        for i in 0..self.blocks.len().saturating_sub(1) {
            let next = self.blocks[i + 1];
            let curr = &mut self.blocks[i];
            if curr.flags.recalculate || next.flags.recalculate {
                curr.feedrate_profile.exit = next.feedrate_profile.entry;
                curr.calculate_trapezoid();
                curr.flags.recalculate = false;
            }
        }

        // The newest block always ends at its safe feedrate
        if let Some(last) = self.blocks.back_mut() {
            last.feedrate_profile.exit = last.safe_feedrate;
            last.calculate_trapezoid();
            last.flags.recalculate = false;
        }
    }

    fn add_layer_time(&mut self, layer_id: usize, time: f64) {
        let index = layer_id.max(1) - 1;
        if self.layers_time.len() <= index {
            self.layers_time.resize(index + 1, 0.0);
        }
        self.layers_time[index] += time;
    }

    fn resolve_checkpoints(&mut self) {
        while let Some(checkpoint) = self.pending_checkpoints.front() {
            if checkpoint.target > self.finalized_blocks {
                break;
            }
            self.checkpoints.push((checkpoint.line_id, self.time));
            self.pending_checkpoints.pop_front();
        }
    }

    /// Record the elapsed time at `line_id` once every block planned so far is finalized
    pub fn request_checkpoint(&mut self, line_id: usize) {
        if !self.enabled {
            return;
        }
        if self.blocks.is_empty() {
            self.checkpoints.push((line_id, self.time));
        } else {
            self.pending_checkpoints.push_back(PendingCheckpoint {
                line_id,
                target: self.enqueued_blocks,
            });
        }
    }

    /// Flush the whole queue and add a blocking delay (s) to `layer_id`
    ///
    /// The delay belongs to the layer active when the command was read, which
    /// may already be ahead of the last flushed block.
    pub fn simulate_st_synchronize(&mut self, additional_time: f64, layer_id: usize) {
        if !self.enabled {
            return;
        }
        self.calculate_time(0);
        if additional_time > 0.0 {
            self.time += additional_time;
            self.gcode_time.cache += additional_time;
            self.moves_time[self.last_move_type.index()] += additional_time;
            self.add_layer_time(layer_id, additional_time);
        }
    }

    /// Close the current custom G-code interval, labelling it with `kind`
    pub fn process_custom_gcode_time(&mut self, kind: CustomGCodeType) {
        if !self.enabled {
            return;
        }
        self.gcode_time.needed = true;
        self.calculate_time(0);
        if self.gcode_time.cache != 0.0 {
            self.gcode_time.times.push((kind, self.gcode_time.cache));
            self.gcode_time.cache = 0.0;
        }
    }

    /// Flush everything and close the trailing custom G-code interval
    pub fn finalize(&mut self) {
        if !self.enabled {
            return;
        }
        self.calculate_time(0);
        if self.gcode_time.needed && self.gcode_time.cache != 0.0 {
            self.gcode_time
                .times
                .push((CustomGCodeType::ColorChange, self.gcode_time.cache));
            self.gcode_time.cache = 0.0;
        }
    }

    /// Take the moves finalized since the last call
    pub fn drain_finalized_moves(&mut self) -> Vec<FinalizedMove> {
        std::mem::take(&mut self.finalized_moves)
    }

    /// Resolved `(line_id, elapsed)` checkpoints in line order
    pub fn checkpoints(&self) -> &[(usize, f64)] {
        &self.checkpoints
    }

    /// Custom G-code intervals as `(kind, duration)`
    pub fn custom_gcode_times(&self) -> &[(CustomGCodeType, f64)] {
        &self.gcode_time.times
    }

    /// Time per move type
    pub fn moves_time(&self) -> &[f64; MoveType::COUNT] {
        &self.moves_time
    }

    /// Time per extrusion role, extruding moves only
    pub fn roles_time(&self) -> &[f64; ExtrusionRole::COUNT] {
        &self.roles_time
    }

    /// Time per layer, index 0 is layer 1
    pub fn layers_time(&self) -> &[f64] {
        &self.layers_time
    }
}
