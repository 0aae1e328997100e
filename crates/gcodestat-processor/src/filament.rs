//! Filament usage tracking
//!
//! Extruded volume accumulates in three live caches: per color change, per
//! extruder and per extrusion role. A color change, tool change or role
//! change flushes the matching cache into its permanent total.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use gcodestat_core::ExtrusionRole;
use serde::{Deserialize, Serialize};

/// Used filament of one role
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleUsage {
    /// Filament length (m)
    pub length_m: f64,
    /// Volume (mm³)
    pub volume_mm3: f64,
}

/// Filament usage statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsedFilaments {
    color_change_cache: f64,
    tool_change_cache: f64,
    role_cache: f64,
    /// Volume (mm³) printed between consecutive color changes
    pub volumes_per_color_change: Vec<f64>,
    /// Volume (mm³) per extruder id
    pub volumes_per_extruder: BTreeMap<usize, f64>,
    /// Length and volume per extrusion role
    pub filaments_per_role: BTreeMap<ExtrusionRole, RoleUsage>,
}

/// Cross-section area of a filament of the given diameter (mm²)
pub fn filament_area(diameter: f64) -> f64 {
    let radius = 0.5 * diameter;
    PI * radius * radius
}

impl UsedFilaments {
    /// Add extruded volume (mm³) to every live cache
    pub fn increase_caches(&mut self, volume: f64) {
        self.color_change_cache += volume;
        self.tool_change_cache += volume;
        self.role_cache += volume;
    }

    pub fn process_color_change_cache(&mut self) {
        if self.color_change_cache != 0.0 {
            self.volumes_per_color_change.push(self.color_change_cache);
            self.color_change_cache = 0.0;
        }
    }

    /// Flush the per-extruder cache into `extruder_id`
    pub fn process_extruder_cache(&mut self, extruder_id: usize) {
        if self.tool_change_cache != 0.0 {
            *self.volumes_per_extruder.entry(extruder_id).or_insert(0.0) +=
                self.tool_change_cache;
            self.tool_change_cache = 0.0;
        }
    }

    /// Flush the role cache into `role`, converting volume to length with `diameter`
    pub fn process_role_cache(&mut self, role: ExtrusionRole, diameter: f64) {
        if self.role_cache == 0.0 {
            return;
        }
        let area = filament_area(diameter);
        let length_m = if area > 0.0 {
            self.role_cache / area * 0.001
        } else {
            0.0
        };
        let usage = self.filaments_per_role.entry(role).or_default();
        usage.length_m += length_m;
        usage.volume_mm3 += self.role_cache;
        self.role_cache = 0.0;
    }

    /// Flush every cache at the end of processing
    pub fn process_caches(&mut self, extruder_id: usize, role: ExtrusionRole, diameter: f64) {
        self.process_color_change_cache();
        self.process_extruder_cache(extruder_id);
        self.process_role_cache(role, diameter);
    }

    /// Total flushed volume over all extruders (mm³)
    pub fn total_volume(&self) -> f64 {
        self.volumes_per_extruder.values().sum()
    }
}
