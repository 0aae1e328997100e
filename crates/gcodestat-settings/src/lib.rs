//! gcodestat Settings Crate
//!
//! Handles the printer configuration consumed by the G-code processor:
//! machine limits per time mode, extruders and filaments, firmware flavor,
//! user custom G-code sections, and processor tuning.

pub mod config;
pub mod error;

pub use config::{
    default_config_path, CustomGcodeSections, ExtruderSettings, GCodeFlavor, MachineLimits,
    PrintConfig, ProcessorSettings, MIN_ACCELERATION,
};
pub use error::{ConfigError, SettingsError, SettingsResult};
