//! Command classification
//!
//! Every parsed line is mapped once onto a closed set of command kinds so
//! the state machine can dispatch with an exhaustive `match`.

use super::GCodeLine;

/// Command kinds handled by the processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// G0/G1 linear move
    LinearMove,
    /// G4 dwell
    Dwell,
    /// G10 firmware retract
    FirmwareRetract,
    /// G11 firmware unretract
    FirmwareUnretract,
    /// G20 inch units
    InchUnits,
    /// G21 millimeter units
    MillimeterUnits,
    /// G28 home axes
    Home,
    /// G90 absolute positioning
    AbsolutePositioning,
    /// G91 relative positioning
    RelativePositioning,
    /// G92 set position
    SetPosition,
    /// M1 sleep or conditional stop
    Stop,
    /// M82 absolute extrusion
    AbsoluteExtrusion,
    /// M83 relative extrusion
    RelativeExtrusion,
    /// M104 set extruder temperature
    SetTemperature,
    /// M106 fan on
    FanOn,
    /// M107 fan off
    FanOff,
    /// M108 tool select (Sailfish)
    SailfishToolSelect,
    /// M109 set temperature and wait
    WaitForTemperature,
    /// M132 load home position
    LoadHomePosition,
    /// M135 tool select (MakerWare)
    MakerWareToolSelect,
    /// M201 max acceleration per axis
    SetMaxAcceleration,
    /// M203 max feedrate per axis
    SetMaxFeedrate,
    /// M204 default accelerations
    SetAcceleration,
    /// M205 jerk and minimum feedrates
    SetAdvancedSettings,
    /// M221 extrude factor override
    SetExtrudeFactor,
    /// M401 save position (Repetier)
    SavePosition,
    /// M402 restore position (Repetier)
    RestorePosition,
    /// M566 jerk in mm/min (RepRapFirmware)
    SetJerk,
    /// M702 unload filament
    UnloadFilament,
    /// T<n> tool change
    ToolChange,
    /// Anything else, including comment-only lines
    Unknown,
}

impl Command {
    /// Classify a parsed line
    pub fn from_line(line: &GCodeLine) -> Self {
        Self::from_cmd(line.cmd())
    }

    /// Classify a normalized command word
    pub fn from_cmd(cmd: &str) -> Self {
        match cmd {
            "G0" | "G1" => Self::LinearMove,
            "G4" => Self::Dwell,
            "G10" => Self::FirmwareRetract,
            "G11" => Self::FirmwareUnretract,
            "G20" => Self::InchUnits,
            "G21" => Self::MillimeterUnits,
            "G28" => Self::Home,
            "G90" => Self::AbsolutePositioning,
            "G91" => Self::RelativePositioning,
            "G92" => Self::SetPosition,
            "M1" => Self::Stop,
            "M82" => Self::AbsoluteExtrusion,
            "M83" => Self::RelativeExtrusion,
            "M104" => Self::SetTemperature,
            "M106" => Self::FanOn,
            "M107" => Self::FanOff,
            "M108" => Self::SailfishToolSelect,
            "M109" => Self::WaitForTemperature,
            "M132" => Self::LoadHomePosition,
            "M135" => Self::MakerWareToolSelect,
            "M201" => Self::SetMaxAcceleration,
            "M203" => Self::SetMaxFeedrate,
            "M204" => Self::SetAcceleration,
            "M205" => Self::SetAdvancedSettings,
            "M221" => Self::SetExtrudeFactor,
            "M401" => Self::SavePosition,
            "M402" => Self::RestorePosition,
            "M566" => Self::SetJerk,
            "M702" => Self::UnloadFilament,
            _ if cmd.starts_with('T') && cmd.len() > 1 => Self::ToolChange,
            _ => Self::Unknown,
        }
    }
}

/// Extruder id addressed by a `T` word, if it is a valid id
pub fn tool_id(cmd: &str) -> Option<usize> {
    cmd.strip_prefix('T')
        .and_then(|id| id.parse::<i64>().ok())
        .and_then(|id| usize::try_from(id).ok())
        .filter(|id| *id <= 255)
}
