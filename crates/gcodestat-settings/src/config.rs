//! Printer configuration
//!
//! `PrintConfig` carries everything the G-code processor needs to know about
//! the target machine: kinematic limits for each time mode, extruder and
//! filament data, firmware flavor, the user-authored custom G-code sections,
//! and processor tuning. It is read from and written to TOML or JSON files.

use std::path::{Path, PathBuf};

use gcodestat_core::TimeMode;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SettingsError, SettingsResult};

/// Smallest acceleration accepted by [`PrintConfig::validate`], in mm/s²
pub const MIN_ACCELERATION: f64 = 1.0;

/// Firmware dialect the G-code was written for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GCodeFlavor {
    /// RepRap/Sprinter
    #[serde(rename = "reprap_sprinter")]
    RepRapSprinter,
    /// RepRapFirmware
    #[serde(rename = "reprap_firmware")]
    RepRapFirmware,
    /// Repetier
    Repetier,
    /// Teacup
    Teacup,
    /// MakerWare (MakerBot)
    #[serde(rename = "makerware")]
    MakerWare,
    /// Marlin (legacy)
    #[default]
    MarlinLegacy,
    /// Marlin 2
    MarlinFirmware,
    /// Sailfish (MakerBot)
    Sailfish,
    /// Mach3/LinuxCNC
    Mach3,
    /// Machinekit
    Machinekit,
    /// Smoothieware
    Smoothie,
    /// No extrusion
    NoExtrusion,
}

impl GCodeFlavor {
    /// Whether this is one of the Marlin flavors
    pub fn is_marlin(self) -> bool {
        matches!(self, Self::MarlinLegacy | Self::MarlinFirmware)
    }

    /// Whether this is one of the RepRap flavors
    pub fn is_reprap(self) -> bool {
        matches!(self, Self::RepRapSprinter | Self::RepRapFirmware)
    }

    /// Factor applied to M203 values to obtain mm/s
    ///
    /// Marlin and Smoothie take M203 in mm/s, the other firmwares in mm/min.
    pub fn max_feedrate_factor(self) -> f64 {
        if self.is_marlin() || self == Self::Smoothie {
            1.0
        } else {
            gcodestat_core::MMMIN_TO_MMSEC
        }
    }
}

/// Kinematic limits of the machine
///
/// Every field holds one value per time mode (`[normal, stealth]`). A
/// missing stealth value falls back to the normal one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineLimits {
    pub machine_max_feedrate_x: Vec<f64>,
    pub machine_max_feedrate_y: Vec<f64>,
    pub machine_max_feedrate_z: Vec<f64>,
    pub machine_max_feedrate_e: Vec<f64>,
    pub machine_max_acceleration_x: Vec<f64>,
    pub machine_max_acceleration_y: Vec<f64>,
    pub machine_max_acceleration_z: Vec<f64>,
    pub machine_max_acceleration_e: Vec<f64>,
    pub machine_max_acceleration_extruding: Vec<f64>,
    pub machine_max_acceleration_retracting: Vec<f64>,
    pub machine_max_acceleration_travel: Vec<f64>,
    pub machine_max_jerk_x: Vec<f64>,
    pub machine_max_jerk_y: Vec<f64>,
    pub machine_max_jerk_z: Vec<f64>,
    pub machine_max_jerk_e: Vec<f64>,
    pub machine_min_extruding_rate: Vec<f64>,
    pub machine_min_travel_rate: Vec<f64>,
}

impl Default for MachineLimits {
    fn default() -> Self {
        Self {
            machine_max_feedrate_x: vec![500.0, 200.0],
            machine_max_feedrate_y: vec![500.0, 200.0],
            machine_max_feedrate_z: vec![12.0, 12.0],
            machine_max_feedrate_e: vec![120.0, 120.0],
            machine_max_acceleration_x: vec![9000.0, 1000.0],
            machine_max_acceleration_y: vec![9000.0, 1000.0],
            machine_max_acceleration_z: vec![500.0, 200.0],
            machine_max_acceleration_e: vec![10000.0, 5000.0],
            machine_max_acceleration_extruding: vec![1500.0, 1250.0],
            machine_max_acceleration_retracting: vec![1500.0, 1250.0],
            machine_max_acceleration_travel: vec![1500.0, 1250.0],
            machine_max_jerk_x: vec![10.0, 10.0],
            machine_max_jerk_y: vec![10.0, 10.0],
            machine_max_jerk_z: vec![0.4, 0.4],
            machine_max_jerk_e: vec![2.5, 2.5],
            machine_min_extruding_rate: vec![0.0, 0.0],
            machine_min_travel_rate: vec![0.0, 0.0],
        }
    }
}

fn value_for_mode(values: &[f64], mode: TimeMode) -> f64 {
    values
        .get(mode.index())
        .or_else(|| values.first())
        .copied()
        .unwrap_or(0.0)
}

impl MachineLimits {
    /// Maximum feedrate per axis (mm/s)
    pub fn max_feedrate(&self, mode: TimeMode) -> [f64; 4] {
        [
            value_for_mode(&self.machine_max_feedrate_x, mode),
            value_for_mode(&self.machine_max_feedrate_y, mode),
            value_for_mode(&self.machine_max_feedrate_z, mode),
            value_for_mode(&self.machine_max_feedrate_e, mode),
        ]
    }

    /// Maximum acceleration per axis (mm/s²)
    pub fn max_acceleration(&self, mode: TimeMode) -> [f64; 4] {
        [
            value_for_mode(&self.machine_max_acceleration_x, mode),
            value_for_mode(&self.machine_max_acceleration_y, mode),
            value_for_mode(&self.machine_max_acceleration_z, mode),
            value_for_mode(&self.machine_max_acceleration_e, mode),
        ]
    }

    /// Maximum jerk per axis (mm/s)
    pub fn max_jerk(&self, mode: TimeMode) -> [f64; 4] {
        [
            value_for_mode(&self.machine_max_jerk_x, mode),
            value_for_mode(&self.machine_max_jerk_y, mode),
            value_for_mode(&self.machine_max_jerk_z, mode),
            value_for_mode(&self.machine_max_jerk_e, mode),
        ]
    }

    /// Acceleration used for extruding moves
    pub fn extruding_acceleration(&self, mode: TimeMode) -> f64 {
        value_for_mode(&self.machine_max_acceleration_extruding, mode)
    }

    /// Acceleration used for extruder-only moves
    pub fn retracting_acceleration(&self, mode: TimeMode) -> f64 {
        value_for_mode(&self.machine_max_acceleration_retracting, mode)
    }

    /// Acceleration used for travel moves
    pub fn travel_acceleration(&self, mode: TimeMode) -> f64 {
        value_for_mode(&self.machine_max_acceleration_travel, mode)
    }

    /// Lower bound for the feedrate of extruding moves
    pub fn min_extruding_rate(&self, mode: TimeMode) -> f64 {
        value_for_mode(&self.machine_min_extruding_rate, mode)
    }

    /// Lower bound for the feedrate of travel moves
    pub fn min_travel_rate(&self, mode: TimeMode) -> f64 {
        value_for_mode(&self.machine_min_travel_rate, mode)
    }

    fn named_fields(&self) -> [(&'static str, &Vec<f64>); 17] {
        [
            ("machine_max_feedrate_x", &self.machine_max_feedrate_x),
            ("machine_max_feedrate_y", &self.machine_max_feedrate_y),
            ("machine_max_feedrate_z", &self.machine_max_feedrate_z),
            ("machine_max_feedrate_e", &self.machine_max_feedrate_e),
            ("machine_max_acceleration_x", &self.machine_max_acceleration_x),
            ("machine_max_acceleration_y", &self.machine_max_acceleration_y),
            ("machine_max_acceleration_z", &self.machine_max_acceleration_z),
            ("machine_max_acceleration_e", &self.machine_max_acceleration_e),
            (
                "machine_max_acceleration_extruding",
                &self.machine_max_acceleration_extruding,
            ),
            (
                "machine_max_acceleration_retracting",
                &self.machine_max_acceleration_retracting,
            ),
            (
                "machine_max_acceleration_travel",
                &self.machine_max_acceleration_travel,
            ),
            ("machine_max_jerk_x", &self.machine_max_jerk_x),
            ("machine_max_jerk_y", &self.machine_max_jerk_y),
            ("machine_max_jerk_z", &self.machine_max_jerk_z),
            ("machine_max_jerk_e", &self.machine_max_jerk_e),
            ("machine_min_extruding_rate", &self.machine_min_extruding_rate),
            ("machine_min_travel_rate", &self.machine_min_travel_rate),
        ]
    }

    /// Validate limits
    ///
    /// Accelerations must be at least [`MIN_ACCELERATION`]; every other
    /// value must be non-negative. A zero max feedrate is accepted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, values) in self.named_fields() {
            if values.is_empty() {
                return Err(ConfigError::MissingKey(format!("machine_limits.{}", key)));
            }
            let minimum = if key.starts_with("machine_max_acceleration") {
                MIN_ACCELERATION
            } else {
                0.0
            };
            if let Some(bad) = values.iter().find(|v| !v.is_finite() || **v < minimum) {
                return Err(ConfigError::out_of_range(key, bad));
            }
        }
        Ok(())
    }
}

/// Extruder and filament settings, one entry per extruder
///
/// Lookups with an out-of-range extruder id fall back to the first entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtruderSettings {
    /// Number of extruders
    pub count: usize,
    /// XY offset of each extruder relative to the first one (mm)
    pub offsets: Vec<[f64; 2]>,
    /// Filament diameter (mm)
    pub filament_diameters: Vec<f64>,
    /// Filament density (g/cm³)
    pub filament_densities: Vec<f64>,
    /// Time to load filament on a tool change (s)
    pub filament_load_times: Vec<f64>,
    /// Time to unload filament on a tool change (s)
    pub filament_unload_times: Vec<f64>,
    /// Display color of each extruder (`#RRGGBB`)
    pub extruder_colors: Vec<String>,
    /// Filament preset names
    pub filament_settings_ids: Vec<String>,
}

impl Default for ExtruderSettings {
    fn default() -> Self {
        Self {
            count: 1,
            offsets: vec![[0.0, 0.0]],
            filament_diameters: vec![1.75],
            filament_densities: vec![1.24],
            filament_load_times: Vec::new(),
            filament_unload_times: Vec::new(),
            extruder_colors: vec!["#FF8000".to_string()],
            filament_settings_ids: Vec::new(),
        }
    }
}

fn per_extruder(values: &[f64], id: usize) -> Option<f64> {
    values.get(id).or_else(|| values.first()).copied()
}

impl ExtruderSettings {
    /// Filament diameter of the given extruder
    pub fn filament_diameter(&self, id: usize) -> f64 {
        per_extruder(&self.filament_diameters, id).unwrap_or(1.75)
    }

    /// Filament density of the given extruder
    pub fn filament_density(&self, id: usize) -> f64 {
        per_extruder(&self.filament_densities, id).unwrap_or(0.0)
    }

    /// Load time of the given extruder, zero when not configured
    pub fn filament_load_time(&self, id: usize) -> f64 {
        per_extruder(&self.filament_load_times, id).unwrap_or(0.0)
    }

    /// Unload time of the given extruder, zero when not configured
    pub fn filament_unload_time(&self, id: usize) -> f64 {
        per_extruder(&self.filament_unload_times, id).unwrap_or(0.0)
    }

    /// XY offset of the given extruder
    pub fn offset(&self, id: usize) -> [f64; 2] {
        self.offsets.get(id).copied().unwrap_or([0.0, 0.0])
    }
}

/// User-authored custom G-code sections
///
/// These are checked for comments colliding with the processor's reserved
/// tags before their output is trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CustomGcodeSections {
    pub start_gcode: String,
    pub end_gcode: String,
    pub before_layer_gcode: String,
    pub layer_gcode: String,
    pub color_change_gcode: String,
    pub pause_print_gcode: String,
    pub template_custom_gcode: String,
}

impl CustomGcodeSections {
    /// Sections paired with their display names
    pub fn sections(&self) -> [(&'static str, &str); 7] {
        [
            ("Start G-code", &self.start_gcode),
            ("End G-code", &self.end_gcode),
            ("Before layer change G-code", &self.before_layer_gcode),
            ("After layer change G-code", &self.layer_gcode),
            ("Color Change G-code", &self.color_change_gcode),
            ("Pause Print G-code", &self.pause_print_gcode),
            ("Template Custom G-code", &self.template_custom_gcode),
        ]
    }
}

/// Processor tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorSettings {
    /// Planner blocks kept for look-ahead after a recalculation
    pub queue_size: usize,
    /// The planner recalculates once `queue_size * refresh_multiplier` blocks are queued
    pub refresh_multiplier: usize,
    /// Comment lines inspected at the top of a file for a producer signature
    pub producer_detection_lines: usize,
    /// Lines processed between two calls of the cancellation callback
    pub cancel_check_interval: usize,
    /// Extra time added when waiting for temperature (M109), in seconds
    pub wait_for_temperature_delay_s: f64,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            queue_size: 64,
            refresh_multiplier: 4,
            producer_detection_lines: 32,
            cancel_check_interval: 1000,
            wait_for_temperature_delay_s: 0.0,
        }
    }
}

impl ProcessorSettings {
    /// Queue length that triggers a planner recalculation
    pub fn refresh_threshold(&self) -> usize {
        self.queue_size.saturating_mul(self.refresh_multiplier)
    }

    /// Validate tuning values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_size == 0 {
            return Err(ConfigError::out_of_range("processor.queue_size", 0));
        }
        if self.refresh_multiplier == 0 {
            return Err(ConfigError::out_of_range("processor.refresh_multiplier", 0));
        }
        if self.cancel_check_interval == 0 {
            return Err(ConfigError::out_of_range(
                "processor.cancel_check_interval",
                0,
            ));
        }
        let delay = self.wait_for_temperature_delay_s;
        if !delay.is_finite() || delay < 0.0 {
            return Err(ConfigError::out_of_range(
                "processor.wait_for_temperature_delay_s",
                self.wait_for_temperature_delay_s,
            ));
        }
        Ok(())
    }
}

/// Complete printer configuration
///
/// Aggregates all settings sections and provides file I/O operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintConfig {
    /// Firmware flavor
    pub gcode_flavor: GCodeFlavor,
    /// Simulate the stealth profile alongside the normal one
    pub enable_stealth_time_estimator: bool,
    /// Let M201/M203/M204/M205/M566 update the stealth profile too
    pub enable_machine_envelope_processing: bool,
    /// Detect the producing slicer and parse its comment dialect
    pub enable_producers: bool,
    /// Rewrite M73 placeholders after processing
    pub export_remaining_time_enabled: bool,
    /// Report reserved tags found in the custom G-code sections
    pub validate_reserved_tags: bool,
    /// Print preset name
    pub print_settings_id: String,
    /// Printer preset name
    pub printer_settings_id: String,
    /// Bed outline in XY (mm)
    pub bed_shape: Vec<[f64; 2]>,
    /// Kinematic limits
    pub machine_limits: MachineLimits,
    /// Extruders and filaments
    pub extruders: ExtruderSettings,
    /// User custom G-code
    pub custom_gcode: CustomGcodeSections,
    /// Processor tuning
    pub processor: ProcessorSettings,
}

impl Default for PrintConfig {
    fn default() -> Self {
        Self {
            gcode_flavor: GCodeFlavor::default(),
            enable_stealth_time_estimator: false,
            enable_machine_envelope_processing: true,
            enable_producers: true,
            export_remaining_time_enabled: false,
            validate_reserved_tags: true,
            print_settings_id: String::new(),
            printer_settings_id: String::new(),
            bed_shape: vec![[0.0, 0.0], [250.0, 0.0], [250.0, 210.0], [0.0, 210.0]],
            machine_limits: MachineLimits::default(),
            extruders: ExtruderSettings::default(),
            custom_gcode: CustomGcodeSections::default(),
            processor: ProcessorSettings::default(),
        }
    }
}

enum FileFormat {
    Json,
    Toml,
}

fn file_format(path: &Path) -> Result<FileFormat, ConfigError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(FileFormat::Json),
        Some("toml") => Ok(FileFormat::Toml),
        other => Err(ConfigError::UnsupportedFormat(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}

impl PrintConfig {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = file_format(path)?;
        let content =
            std::fs::read_to_string(path).map_err(|source| SettingsError::io(path, source))?;

        let config: Self = match format {
            FileFormat::Json => {
                serde_json::from_str(&content).map_err(|source| SettingsError::Json {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            FileFormat::Toml => toml::from_str(&content).map_err(|source| SettingsError::Toml {
                path: path.to_path_buf(),
                source,
            })?,
        };

        config.validate()?;
        tracing::debug!("Loaded printer config from {}", path.display());
        Ok(config)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match file_format(path)? {
            FileFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| SettingsError::Serialize(e.to_string()))?,
            FileFormat::Toml => {
                toml::to_string_pretty(self).map_err(|e| SettingsError::Serialize(e.to_string()))?
            }
        };

        std::fs::write(path, content).map_err(|source| SettingsError::io(path, source))?;
        Ok(())
    }

    /// Load the config at [`default_config_path`], or defaults when there is none
    pub fn load_default_location() -> SettingsResult<Self> {
        match default_config_path() {
            Some(path) if path.is_file() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.machine_limits.validate()?;
        self.processor.validate()?;

        if self.extruders.count == 0 {
            return Err(ConfigError::out_of_range("extruders.count", 0));
        }
        if self.extruders.filament_diameters.is_empty() {
            return Err(ConfigError::MissingKey(
                "extruders.filament_diameters".to_string(),
            ));
        }
        if let Some(bad) = self
            .extruders
            .filament_diameters
            .iter()
            .find(|d| !d.is_finite() || **d <= 0.0)
        {
            return Err(ConfigError::out_of_range(
                "extruders.filament_diameters",
                bad,
            ));
        }
        Ok(())
    }
}

/// Default location of the printer config file
///
/// `<config dir>/gcodestat/printer.toml`, e.g. `~/.config/gcodestat/printer.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gcodestat").join("printer.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PrintConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.processor.refresh_threshold(), 256);
    }

    #[test]
    fn test_mode_fallback_uses_first_value() {
        let mut limits = MachineLimits::default();
        limits.machine_max_jerk_x = vec![8.0];
        assert_eq!(limits.max_jerk(TimeMode::Normal)[0], 8.0);
        assert_eq!(limits.max_jerk(TimeMode::Stealth)[0], 8.0);
        assert_eq!(limits.max_feedrate(TimeMode::Stealth)[0], 200.0);
    }

    #[test]
    fn test_zero_acceleration_rejected() {
        let mut config = PrintConfig::default();
        config.machine_limits.machine_max_acceleration_travel = vec![0.0];
        match config.validate() {
            Err(ConfigError::ValueOutOfRange { key, .. }) => {
                assert_eq!(key, "machine_max_acceleration_travel")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_zero_feedrate_accepted() {
        let mut config = PrintConfig::default();
        config.machine_limits.machine_max_feedrate_z = vec![0.0];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flavor_names() {
        let json = serde_json::to_string(&GCodeFlavor::RepRapFirmware).unwrap();
        assert_eq!(json, "\"reprap_firmware\"");
        let flavor: GCodeFlavor = serde_json::from_str("\"marlin_firmware\"").unwrap();
        assert!(flavor.is_marlin());
        assert_eq!(GCodeFlavor::Repetier.max_feedrate_factor(), 1.0 / 60.0);
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("printer.toml");

        let mut config = PrintConfig::default();
        config.enable_stealth_time_estimator = true;
        config.extruders.count = 2;
        config.extruders.filament_diameters = vec![1.75, 2.85];
        config.custom_gcode.start_gcode = "G28\n;LAYER_CHANGE\n".to_string();
        config.save_to_file(&path).unwrap();

        let loaded = PrintConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.extruders.filament_diameter(1), 2.85);
        assert_eq!(loaded.extruders.filament_diameter(7), 1.75);
    }

    #[test]
    fn test_json_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("printer.json");
        std::fs::write(&path, r#"{ "gcode_flavor": "smoothie" }"#).unwrap();

        let loaded = PrintConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.gcode_flavor, GCodeFlavor::Smoothie);
        assert_eq!(loaded.processor, ProcessorSettings::default());
    }

    #[test]
    fn test_unsupported_extension() {
        let err = PrintConfig::load_from_file(Path::new("printer.yaml")).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Config(ConfigError::UnsupportedFormat(_))
        ));
    }
}
