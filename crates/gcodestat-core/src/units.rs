//! Unit conversion utilities
//!
//! Handles the G20/G21 length units, feedrate conversion from the G-code
//! convention (per minute) to planner units (per second), and formatting of
//! estimated durations for display.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Millimeters per inch
pub const INCHES_TO_MM: f64 = 25.4;

/// Factor converting mm/min (G-code F words) to mm/s
pub const MMMIN_TO_MMSEC: f64 = 1.0 / 60.0;

/// Length units selected by G20/G21
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    /// Millimeters (G21)
    #[default]
    Millimeters,
    /// Inches (G20)
    Inches,
}

impl Units {
    /// Factor converting a length in these units to millimeters
    pub fn scale(self) -> f64 {
        match self {
            Self::Millimeters => 1.0,
            Self::Inches => INCHES_TO_MM,
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Millimeters => write!(f, "mm"),
            Self::Inches => write!(f, "in"),
        }
    }
}

impl FromStr for Units {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mm" | "millimeters" => Ok(Self::Millimeters),
            "in" | "inch" | "inches" => Ok(Self::Inches),
            _ => Err(format!("Unknown units: {}", s)),
        }
    }
}

/// Whole minutes shown for a duration, as printers display them
pub fn time_in_minutes(seconds: f64) -> i64 {
    ((seconds.max(0.0) + 0.5) / 60.0) as i64
}

/// Format a duration as days, hours and minutes
///
/// Leading zero components are omitted: `"1d 2h 3m"`, `"2h 3m"`, `"3m"`.
/// The value is rounded to the nearest minute.
pub fn format_time_dhm(seconds: f64) -> String {
    let minutes = (seconds.max(0.0) / 60.0).round() as i64;
    let days = minutes / 1440;
    let hours = (minutes % 1440) / 60;
    let minutes = minutes % 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

/// Format a duration as days, hours, minutes and seconds
///
/// Same layout as [`format_time_dhm`] with a trailing seconds component.
pub fn format_time_dhms(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as i64;
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_scale() {
        assert_eq!(Units::Millimeters.scale(), 1.0);
        assert_eq!(Units::Inches.scale(), 25.4);
        assert_eq!("in".parse::<Units>(), Ok(Units::Inches));
        assert!("furlong".parse::<Units>().is_err());
    }

    #[test]
    fn test_format_time_dhm() {
        assert_eq!(format_time_dhm(0.0), "0m");
        assert_eq!(format_time_dhm(89.0), "1m");
        assert_eq!(format_time_dhm(3600.0 + 120.0), "1h 2m");
        assert_eq!(format_time_dhm(86_400.0 + 7200.0 + 180.0), "1d 2h 3m");
    }

    #[test]
    fn test_format_time_dhms() {
        assert_eq!(format_time_dhms(4.0), "4s");
        assert_eq!(format_time_dhms(184.0), "3m 4s");
        assert_eq!(format_time_dhms(7384.0), "2h 3m 4s");
        assert_eq!(format_time_dhms(93_784.0), "1d 2h 3m 4s");
    }

    #[test]
    fn test_time_in_minutes() {
        assert_eq!(time_in_minutes(0.0), 0);
        assert_eq!(time_in_minutes(59.4), 0);
        assert_eq!(time_in_minutes(59.6), 1);
        assert_eq!(time_in_minutes(-3.0), 0);
    }
}
