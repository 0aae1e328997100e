//! # gcodestat Processor
//!
//! Streaming G-code analysis for 3D printers. The processor follows the
//! machine state through a G-code file, simulates the firmware motion
//! planner in normal and stealth modes, and collects print time, filament
//! usage and per-move data.
//!
//! ## Features
//!
//! - Planner simulation with junction jerk, trapezoids and a bounded queue
//! - Time per move type, extrusion role, layer and custom G-code interval
//! - Slicer detection and comment dialects (Cura, Simplify3D, ...)
//! - Filament usage per color change, extruder and role
//! - In-place `M73` remaining-time annotation
//! - Reserved tag validation of custom G-code
//!
//! ## Example
//!
//! ```no_run
//! use gcodestat_core::TimeMode;
//! use gcodestat_processor::{GCodeProcessor, ResultIdGenerator};
//! use gcodestat_settings::PrintConfig;
//!
//! let ids = ResultIdGenerator::new();
//! let mut processor = GCodeProcessor::new(PrintConfig::default(), &ids);
//! processor.process_file("print.gcode", || false)?;
//! println!("{}", processor.get_time_dhms(TimeMode::Normal));
//! # Ok::<(), gcodestat_core::Error>(())
//! ```

pub mod filament;
pub mod gcode;
pub mod planner;
pub mod post_process;
pub mod processor;
pub mod result;
pub mod tags;
pub mod validation;

pub use filament::{filament_area, RoleUsage, UsedFilaments};
pub use gcode::{Command, FileReadStats, GCodeLine, GcodeFileReader};
pub use planner::{TimeEstimator, TimeMachine};
pub use post_process::{AnnotationStats, RemainingTimeAnnotator, TimeMarks};
pub use processor::GCodeProcessor;
pub use result::{
    CustomGCodeInterval, CustomGCodeItem, GCodeResult, ModeStatistics, MoveVertex,
    PrintEstimatedStatistics, ResultIdGenerator, ReservedTagWarning, SettingsIds,
};
pub use tags::{Producer, ReservedTag};
pub use validation::check_for_reserved_tags;
