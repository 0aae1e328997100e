//! Reserved tag validation of user-authored custom G-code
//!
//! A reserved tag inside a custom section (start G-code, color change
//! G-code, ...) would be mistaken for one emitted by the slicer and corrupt
//! the statistics or the remaining-time annotation.

use gcodestat_settings::CustomGcodeSections;
use tracing::warn;

use crate::result::ReservedTagWarning;
use crate::tags::ReservedTag;

/// At most this many collisions are reported
pub const MAX_RESERVED_TAG_WARNINGS: usize = 5;

/// Distinct reserved tags used as comments in `gcode`, in order of first use
pub fn find_reserved_tags(gcode: &str) -> Vec<ReservedTag> {
    let mut found = Vec::new();
    let tags = gcode
        .lines()
        .filter_map(|line| line.trim_start().strip_prefix(';'))
        .filter_map(|comment| {
            ReservedTag::ALL
                .into_iter()
                .find(|tag| comment.starts_with(tag.as_str()))
        });
    for tag in tags {
        if !found.contains(&tag) {
            found.push(tag);
        }
    }
    found
}

/// Check every custom section, logging each collision
pub fn check_for_reserved_tags(sections: &CustomGcodeSections) -> Vec<ReservedTagWarning> {
    let mut warnings = Vec::new();
    'sections: for (section, gcode) in sections.sections() {
        for tag in find_reserved_tags(gcode) {
            if warnings.len() >= MAX_RESERVED_TAG_WARNINGS {
                break 'sections;
            }
            warn!(section, tag = %tag, "Custom G-code contains a reserved tag");
            warnings.push(ReservedTagWarning {
                section: section.to_string(),
                tag,
            });
        }
    }
    warnings
}
