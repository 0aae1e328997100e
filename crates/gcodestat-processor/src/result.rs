//! Processing result
//!
//! [`GCodeResult`] is what a processing run hands to its caller: the move
//! vertices, machine and filament metadata, and the estimated statistics
//! for every time mode.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use gcodestat_core::{CustomGCodeType, ExtrusionRole, MoveType, TimeMode};
use serde::{Deserialize, Serialize};

use crate::filament::UsedFilaments;
use crate::tags::{Producer, ReservedTag};

/// One stored move with a snapshot of the machine state at its end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveVertex {
    /// Source line id
    pub gcode_id: usize,
    pub move_type: MoveType,
    pub role: ExtrusionRole,
    pub extruder_id: usize,
    /// Index of the color in use, counted from color changes
    pub color_id: usize,
    /// XYZ position at the end of the move (mm)
    pub position: [f64; 3],
    /// Extruder displacement of the move (mm)
    pub delta_extruder: f64,
    /// Feedrate (mm/s)
    pub feedrate: f64,
    /// Extrusion width (mm)
    pub width: f64,
    /// Extrusion height (mm)
    pub height: f64,
    /// Volumetric flow per unit length (mm³/mm)
    pub mm3_per_mm: f64,
    /// Fan speed (%)
    pub fan_speed: f64,
    /// Extruder temperature (°C)
    pub temperature: f64,
    pub layer_id: usize,
    /// Elapsed time at the end of the move, per mode (s)
    pub time: [f64; TimeMode::COUNT],
}

impl MoveVertex {
    pub fn elapsed(&self, mode: TimeMode) -> f64 {
        self.time[mode.index()]
    }
}

/// Custom G-code event placed at a print height
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomGCodeItem {
    /// Z at which the event happens (mm)
    pub print_z: f64,
    pub kind: CustomGCodeType,
    pub extruder: usize,
    pub color: String,
    /// Text following the tag
    pub extra: String,
}

/// Duration of one custom G-code interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CustomGCodeInterval {
    pub kind: CustomGCodeType,
    /// Interval duration (s)
    pub time: f64,
    /// Print time remaining when the interval starts (s)
    pub remaining: f64,
}

/// Statistics of one time mode
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModeStatistics {
    /// Total print time (s)
    pub time: f64,
    pub custom_gcode_times: Vec<CustomGCodeInterval>,
    /// Non-zero time per move type
    pub moves_times: Vec<(MoveType, f64)>,
    /// Non-zero time per extrusion role
    pub roles_times: Vec<(ExtrusionRole, f64)>,
    /// Time per layer, index 0 is layer 1
    pub layers_times: Vec<f64>,
}

/// Estimated statistics of the whole print
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrintEstimatedStatistics {
    pub modes: [ModeStatistics; TimeMode::COUNT],
    pub used_filaments: UsedFilaments,
}

impl PrintEstimatedStatistics {
    pub fn mode(&self, mode: TimeMode) -> &ModeStatistics {
        &self.modes[mode.index()]
    }
}

/// Reserved tag found in a user-authored custom G-code section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedTagWarning {
    /// Display name of the section
    pub section: String,
    pub tag: ReservedTag,
}

impl fmt::Display for ReservedTagWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} contains reserved keyword ;{}",
            self.section, self.tag
        )
    }
}

/// Settings identifiers of the print
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsIds {
    pub print: String,
    pub printer: String,
    pub filament: Vec<String>,
}

/// Everything produced by one processing run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GCodeResult {
    /// Session-unique id of the run
    pub id: u32,
    pub moves: Vec<MoveVertex>,
    pub bed_shape: Vec<[f64; 2]>,
    pub settings_ids: SettingsIds,
    pub extruders_count: usize,
    pub extruder_colors: Vec<String>,
    pub filament_diameters: Vec<f64>,
    pub filament_densities: Vec<f64>,
    pub producer: Producer,
    pub custom_gcode_per_print_z: Vec<CustomGCodeItem>,
    pub print_statistics: PrintEstimatedStatistics,
    pub reserved_tag_warnings: Vec<ReservedTagWarning>,
    /// Number of source lines processed
    pub lines_processed: usize,
}

impl GCodeResult {
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }
}

/// Issues result ids for a session of processing runs
///
/// Clones share the same counter, so independent processors created from
/// one session never reuse an id.
#[derive(Debug, Clone)]
pub struct ResultIdGenerator {
    counter: Arc<AtomicU32>,
}

impl ResultIdGenerator {
    pub fn new() -> Self {
        Self {
            counter: Arc::new(AtomicU32::new(1)),
        }
    }

    /// Get the next id
    pub fn next_id(&self) -> u32 {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Get the next id without consuming it
    pub fn peek(&self) -> u32 {
        self.counter.load(Ordering::SeqCst)
    }
}

impl Default for ResultIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
