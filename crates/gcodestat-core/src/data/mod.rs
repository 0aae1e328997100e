//! Data models shared by the processor and its consumers
//!
//! This module provides:
//! - Axis indexing and 4-axis (X, Y, Z, E) positions
//! - Positioning modes (absolute/relative)
//! - Move classification for planned segments
//! - Extrusion roles as written by slicers
//! - Time estimation modes (normal/stealth)
//! - Custom G-code event kinds

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

/// Machine axis tracked by the processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// X axis
    X,
    /// Y axis
    Y,
    /// Z axis
    Z,
    /// Extruder axis
    E,
}

impl Axis {
    /// All axes in storage order
    pub const ALL: [Axis; 4] = [Axis::X, Axis::Y, Axis::Z, Axis::E];

    /// Storage index of the axis
    pub const fn index(self) -> usize {
        self as usize
    }

    /// G-code word letter of the axis
    pub const fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::E => 'E',
        }
    }
}

/// Position on the four tracked axes, in millimeters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisPosition(pub [f64; 4]);

impl AxisPosition {
    /// Position with every axis at zero
    pub const ZERO: AxisPosition = AxisPosition([0.0; 4]);

    /// Per-axis difference `self - from`
    pub fn delta(&self, from: &AxisPosition) -> AxisPosition {
        let mut out = [0.0; 4];
        for (i, value) in out.iter_mut().enumerate() {
            *value = self.0[i] - from.0[i];
        }
        AxisPosition(out)
    }

    /// Euclidean length of the XYZ components
    pub fn xyz_length(&self) -> f64 {
        (self.0[0] * self.0[0] + self.0[1] * self.0[1] + self.0[2] * self.0[2]).sqrt()
    }

    /// Largest absolute component over all four axes
    pub fn max_abs(&self) -> f64 {
        self.0.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }
}

impl Index<Axis> for AxisPosition {
    type Output = f64;

    fn index(&self, axis: Axis) -> &f64 {
        &self.0[axis.index()]
    }
}

impl IndexMut<Axis> for AxisPosition {
    fn index_mut(&mut self, axis: Axis) -> &mut f64 {
        &mut self.0[axis.index()]
    }
}

/// Positioning mode (G90/G91 for XYZ, M82/M83 for E)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositioningMode {
    /// Coordinates are relative to the origin
    #[default]
    Absolute,
    /// Coordinates are offsets from the current position
    Relative,
}

/// Classification of a stored move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveType {
    /// Unclassified move
    Noop,
    /// Extruder pulls filament back without XYZ motion
    Retract,
    /// Extruder pushes filament forward without XYZ motion
    Unretract,
    /// Seam position marker
    Seam,
    /// Active extruder changed
    ToolChange,
    /// Filament color change stop
    ColorChange,
    /// Print paused
    PausePrint,
    /// User custom G-code block
    CustomGCode,
    /// Non-extruding motion
    Travel,
    /// Nozzle wipe
    Wipe,
    /// Extruding motion
    Extrude,
}

impl MoveType {
    /// Number of move types
    pub const COUNT: usize = 11;

    /// All move types in storage order
    pub const ALL: [MoveType; MoveType::COUNT] = [
        MoveType::Noop,
        MoveType::Retract,
        MoveType::Unretract,
        MoveType::Seam,
        MoveType::ToolChange,
        MoveType::ColorChange,
        MoveType::PausePrint,
        MoveType::CustomGCode,
        MoveType::Travel,
        MoveType::Wipe,
        MoveType::Extrude,
    ];

    /// Storage index of the move type
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for MoveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Noop => "Noop",
            Self::Retract => "Retract",
            Self::Unretract => "Unretract",
            Self::Seam => "Seam",
            Self::ToolChange => "Tool change",
            Self::ColorChange => "Color change",
            Self::PausePrint => "Pause print",
            Self::CustomGCode => "Custom G-code",
            Self::Travel => "Travel",
            Self::Wipe => "Wipe",
            Self::Extrude => "Extrude",
        };
        f.write_str(name)
    }
}

/// Why material is being extruded at a given point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtrusionRole {
    /// No role assigned
    #[default]
    None,
    /// Inner perimeter
    Perimeter,
    /// Outermost perimeter
    ExternalPerimeter,
    /// Perimeter printed over air
    OverhangPerimeter,
    /// Sparse infill
    InternalInfill,
    /// Solid infill
    SolidInfill,
    /// Solid infill on a top surface
    TopSolidInfill,
    /// Ironing pass
    Ironing,
    /// Infill bridging air
    BridgeInfill,
    /// Gap fill between perimeters
    GapFill,
    /// Skirt or brim
    Skirt,
    /// Support material
    SupportMaterial,
    /// Support interface layers
    SupportMaterialInterface,
    /// Wipe tower
    WipeTower,
    /// User custom G-code
    Custom,
}

impl ExtrusionRole {
    /// Number of extrusion roles
    pub const COUNT: usize = 15;

    /// All extrusion roles in storage order
    pub const ALL: [ExtrusionRole; ExtrusionRole::COUNT] = [
        ExtrusionRole::None,
        ExtrusionRole::Perimeter,
        ExtrusionRole::ExternalPerimeter,
        ExtrusionRole::OverhangPerimeter,
        ExtrusionRole::InternalInfill,
        ExtrusionRole::SolidInfill,
        ExtrusionRole::TopSolidInfill,
        ExtrusionRole::Ironing,
        ExtrusionRole::BridgeInfill,
        ExtrusionRole::GapFill,
        ExtrusionRole::Skirt,
        ExtrusionRole::SupportMaterial,
        ExtrusionRole::SupportMaterialInterface,
        ExtrusionRole::WipeTower,
        ExtrusionRole::Custom,
    ];

    /// Storage index of the role
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Name of the role as written after `;TYPE:` by Slic3r-family slicers
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "Unknown",
            Self::Perimeter => "Perimeter",
            Self::ExternalPerimeter => "External perimeter",
            Self::OverhangPerimeter => "Overhang perimeter",
            Self::InternalInfill => "Internal infill",
            Self::SolidInfill => "Solid infill",
            Self::TopSolidInfill => "Top solid infill",
            Self::Ironing => "Ironing",
            Self::BridgeInfill => "Bridge infill",
            Self::GapFill => "Gap fill",
            Self::Skirt => "Skirt/Brim",
            Self::SupportMaterial => "Support material",
            Self::SupportMaterialInterface => "Support material interface",
            Self::WipeTower => "Wipe tower",
            Self::Custom => "Custom",
        }
    }

    /// Parse a Slic3r-family role name; unknown names map to [`ExtrusionRole::None`]
    pub fn from_tag(name: &str) -> Self {
        let name = name.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|role| *role != Self::None && role.as_str() == name)
            .unwrap_or(Self::None)
    }
}

impl fmt::Display for ExtrusionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time estimation mode, one per simulated firmware profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeMode {
    /// Performance profile
    Normal,
    /// Quiet profile
    Stealth,
}

impl TimeMode {
    /// Number of modes
    pub const COUNT: usize = 2;

    /// All modes in storage order
    pub const ALL: [TimeMode; TimeMode::COUNT] = [TimeMode::Normal, TimeMode::Stealth];

    /// Storage index of the mode
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for TimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Stealth => write!(f, "stealth"),
        }
    }
}

/// Kind of a custom G-code event recorded in the statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomGCodeType {
    /// Filament color change
    ColorChange,
    /// Print pause
    PausePrint,
    /// User custom block
    Custom,
    /// Tool change
    ToolChange,
}

impl fmt::Display for CustomGCodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ColorChange => write!(f, "Color change"),
            Self::PausePrint => write!(f, "Pause"),
            Self::Custom => write!(f, "Custom G-code"),
            Self::ToolChange => write!(f, "Tool change"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_position_delta() {
        let a = AxisPosition([1.0, 2.0, 3.0, 4.0]);
        let b = AxisPosition([4.0, 6.0, 3.0, 3.5]);
        let d = b.delta(&a);
        assert_eq!(d[Axis::X], 3.0);
        assert_eq!(d[Axis::E], -0.5);
        assert_eq!(d.xyz_length(), 5.0);
        assert_eq!(d.max_abs(), 4.0);
    }

    #[test]
    fn test_role_from_tag() {
        assert_eq!(
            ExtrusionRole::from_tag("External perimeter"),
            ExtrusionRole::ExternalPerimeter
        );
        assert_eq!(ExtrusionRole::from_tag("Skirt/Brim"), ExtrusionRole::Skirt);
        assert_eq!(ExtrusionRole::from_tag("WALL-OUTER"), ExtrusionRole::None);
    }

    #[test]
    fn test_enum_indices_match_tables() {
        for (i, t) in MoveType::ALL.iter().enumerate() {
            assert_eq!(t.index(), i);
        }
        for (i, r) in ExtrusionRole::ALL.iter().enumerate() {
            assert_eq!(r.index(), i);
        }
        assert_eq!(TimeMode::Stealth.index(), 1);
    }
}
