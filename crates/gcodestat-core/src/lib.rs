//! # gcodestat Core
//!
//! Core types, errors, and utilities shared by the gcodestat crates.
//! Provides axis/position models, move and role classifications,
//! unit conversion, and duration formatting.

pub mod data;
pub mod error;
pub mod units;

pub use data::{
    Axis, AxisPosition, CustomGCodeType, ExtrusionRole, MoveType, PositioningMode, TimeMode,
};

pub use error::{Error, PostProcessError, ProcessError, Result};

pub use units::{
    format_time_dhm, format_time_dhms, time_in_minutes, Units, INCHES_TO_MM, MMMIN_TO_MMSEC,
};
