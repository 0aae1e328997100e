//! Comment tags
//!
//! Two layers of comment grammar are recognised:
//! - reserved tags written by Slic3r-family slicers (`;TYPE:`, `;LAYER_CHANGE`,
//!   the M73 placeholders, ...), which other tooling greps for byte-for-byte
//! - producer dialects (Cura, Simplify3D, CraftWare, ideaMaker, KISSlicer),
//!   used once the producer has been detected from the file header

use std::fmt;
use std::sync::OnceLock;

use gcodestat_core::ExtrusionRole;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Tags reserved for the processor's own use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservedTag {
    Role,
    WipeStart,
    WipeEnd,
    Height,
    Width,
    LayerChange,
    ColorChange,
    PausePrint,
    CustomCode,
    FirstLineM73Placeholder,
    LastLineM73Placeholder,
    EstimatedPrintingTimePlaceholder,
}

impl ReservedTag {
    pub const ALL: [ReservedTag; 12] = [
        ReservedTag::Role,
        ReservedTag::WipeStart,
        ReservedTag::WipeEnd,
        ReservedTag::Height,
        ReservedTag::Width,
        ReservedTag::LayerChange,
        ReservedTag::ColorChange,
        ReservedTag::PausePrint,
        ReservedTag::CustomCode,
        ReservedTag::FirstLineM73Placeholder,
        ReservedTag::LastLineM73Placeholder,
        ReservedTag::EstimatedPrintingTimePlaceholder,
    ];

    /// Exact tag text, without the leading `;`
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Role => "TYPE:",
            Self::WipeStart => "WIPE_START",
            Self::WipeEnd => "WIPE_END",
            Self::Height => "HEIGHT:",
            Self::Width => "WIDTH:",
            Self::LayerChange => "LAYER_CHANGE",
            Self::ColorChange => "COLOR_CHANGE",
            Self::PausePrint => "PAUSE_PRINT",
            Self::CustomCode => "CUSTOM_GCODE",
            Self::FirstLineM73Placeholder => "_GP_FIRST_LINE_M73_PLACEHOLDER",
            Self::LastLineM73Placeholder => "_GP_LAST_LINE_M73_PLACEHOLDER",
            Self::EstimatedPrintingTimePlaceholder => "_GP_ESTIMATED_PRINTING_TIME_PLACEHOLDER",
        }
    }

    pub fn is_placeholder(self) -> bool {
        matches!(
            self,
            Self::FirstLineM73Placeholder
                | Self::LastLineM73Placeholder
                | Self::EstimatedPrintingTimePlaceholder
        )
    }

    /// Placeholder tag filling a whole comment line, if any
    pub fn placeholder(comment: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .filter(|tag| tag.is_placeholder())
            .find(|tag| comment == tag.as_str())
    }

    /// Full placeholder line as written in the G-code (`;` + tag)
    pub fn line(self) -> String {
        format!(";{}", self.as_str())
    }
}

impl fmt::Display for ReservedTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Program that generated the G-code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Producer {
    #[default]
    Unknown,
    PrusaSlicer,
    Slic3rPE,
    Slic3r,
    SuperSlicer,
    Cura,
    Simplify3D,
    CraftWare,
    IdeaMaker,
    KissSlicer,
}

/// Header signatures; more specific entries come first
const PRODUCER_SIGNATURES: &[(&str, Producer)] = &[
    ("generated by PrusaSlicer", Producer::PrusaSlicer),
    ("generated by Slic3r Prusa Edition", Producer::Slic3rPE),
    ("generated by SuperSlicer", Producer::SuperSlicer),
    ("generated by Slic3r", Producer::Slic3r),
    ("Cura_SteamEngine", Producer::Cura),
    ("G-Code generated by Simplify3D(R)", Producer::Simplify3D),
    ("CraftWare", Producer::CraftWare),
    ("ideaMaker", Producer::IdeaMaker),
    ("KISSlicer", Producer::KissSlicer),
];

impl Producer {
    /// Match a header comment against the known signatures
    pub fn detect(comment: &str) -> Option<Self> {
        PRODUCER_SIGNATURES
            .iter()
            .find(|(signature, _)| comment.contains(signature))
            .map(|(_, producer)| *producer)
    }

    /// Slic3r descendants use the native `;TYPE:` grammar
    pub fn is_slic3r_family(self) -> bool {
        matches!(
            self,
            Self::PrusaSlicer | Self::Slic3rPE | Self::Slic3r | Self::SuperSlicer
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::PrusaSlicer => "PrusaSlicer",
            Self::Slic3rPE => "Slic3r Prusa Edition",
            Self::Slic3r => "Slic3r",
            Self::SuperSlicer => "SuperSlicer",
            Self::Cura => "Cura",
            Self::Simplify3D => "Simplify3D",
            Self::CraftWare => "CraftWare",
            Self::IdeaMaker => "ideaMaker",
            Self::KissSlicer => "KISSlicer",
        }
    }

    /// Interpret a comment with this producer's dialect
    ///
    /// Returns `None` when the comment is not part of the dialect, in which
    /// case the reserved-tag grammar gets a chance to handle it.
    pub fn parse_tag(self, comment: &str) -> Option<ProducerTag> {
        match self {
            Self::Cura => parse_cura(comment),
            Self::Simplify3D => parse_simplify3d(comment),
            Self::CraftWare => parse_craftware(comment),
            Self::IdeaMaker => parse_ideamaker(comment),
            Self::KissSlicer => parse_kissslicer(comment),
            _ => None,
        }
    }
}

impl fmt::Display for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State change requested by a producer-dialect comment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProducerTag {
    Role(ExtrusionRole),
    LayerChange,
    Height(f64),
    Width(f64),
    /// Both extrusion dimensions (Simplify3D tool line)
    Extrusion { height: Option<f64>, width: Option<f64> },
    /// Recognised but carries nothing the processor uses
    Ignored,
}

fn lookup_role(table: &[(&str, ExtrusionRole)], name: &str) -> Option<ExtrusionRole> {
    table
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, role)| *role)
}

fn lookup_role_prefix(table: &[(&str, ExtrusionRole)], text: &str) -> Option<ExtrusionRole> {
    table
        .iter()
        .find(|(key, _)| text.starts_with(key))
        .map(|(_, role)| *role)
}

fn role_or_unknown(producer: Producer, role: Option<ExtrusionRole>, text: &str) -> ProducerTag {
    ProducerTag::Role(role.unwrap_or_else(|| {
        warn!(%producer, tag = text, "Unknown extrusion role");
        ExtrusionRole::None
    }))
}

const CURA_ROLES: &[(&str, ExtrusionRole)] = &[
    ("SKIRT", ExtrusionRole::Skirt),
    ("WALL-OUTER", ExtrusionRole::ExternalPerimeter),
    ("WALL-INNER", ExtrusionRole::Perimeter),
    ("SKIN", ExtrusionRole::SolidInfill),
    ("FILL", ExtrusionRole::InternalInfill),
    ("SUPPORT", ExtrusionRole::SupportMaterial),
    ("SUPPORT-INTERFACE", ExtrusionRole::SupportMaterialInterface),
    ("PRIME-TOWER", ExtrusionRole::WipeTower),
];

fn parse_cura(comment: &str) -> Option<ProducerTag> {
    if let Some(kind) = comment.strip_prefix("TYPE:") {
        let kind = kind.trim();
        return Some(role_or_unknown(
            Producer::Cura,
            lookup_role(CURA_ROLES, kind),
            kind,
        ));
    }
    if comment.starts_with("FLAVOR:") {
        return Some(ProducerTag::Ignored);
    }
    if comment.starts_with("LAYER:") {
        return Some(ProducerTag::LayerChange);
    }
    None
}

const SIMPLIFY3D_ROLES: &[(&str, ExtrusionRole)] = &[
    (" skirt", ExtrusionRole::Skirt),
    (" outer perimeter", ExtrusionRole::ExternalPerimeter),
    (" inner perimeter", ExtrusionRole::Perimeter),
    (" gap fill", ExtrusionRole::GapFill),
    (" infill", ExtrusionRole::InternalInfill),
    (" solid layer", ExtrusionRole::SolidInfill),
    (" bridge", ExtrusionRole::BridgeInfill),
    (" support", ExtrusionRole::SupportMaterial),
    (" dense support", ExtrusionRole::SupportMaterialInterface),
    (" prime pillar", ExtrusionRole::WipeTower),
    (" ooze shield", ExtrusionRole::None),
    (" raft", ExtrusionRole::SupportMaterial),
    (" internal single extrusion", ExtrusionRole::None),
];

fn tool_dimension_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([HW])([0-9]*\.?[0-9]+)").expect("invalid tool dimension regex")
    })
}

fn parse_simplify3d(comment: &str) -> Option<ProducerTag> {
    if let Some(kind) = comment.strip_prefix(" feature") {
        return Some(role_or_unknown(
            Producer::Simplify3D,
            lookup_role_prefix(SIMPLIFY3D_ROLES, kind),
            kind,
        ));
    }
    if comment.starts_with(" tool") {
        let mut height = None;
        let mut width = None;
        for caps in tool_dimension_regex().captures_iter(comment) {
            let value = caps[2].parse::<f64>().ok();
            match &caps[1] {
                "H" => height = value,
                _ => width = value,
            }
        }
        return Some(ProducerTag::Extrusion { height, width });
    }
    if comment.starts_with(" layer end") {
        return Some(ProducerTag::Ignored);
    }
    if comment.starts_with(" layer") {
        return Some(ProducerTag::LayerChange);
    }
    None
}

const CRAFTWARE_ROLES: &[(&str, ExtrusionRole)] = &[
    ("Skirt", ExtrusionRole::Skirt),
    ("Perimeter", ExtrusionRole::ExternalPerimeter),
    ("HShell", ExtrusionRole::None),
    ("InnerHair", ExtrusionRole::None),
    ("Loop", ExtrusionRole::None),
    ("Infill", ExtrusionRole::InternalInfill),
    ("Raft", ExtrusionRole::Skirt),
    ("Support", ExtrusionRole::SupportMaterial),
    ("SupportTouch", ExtrusionRole::SupportMaterial),
    ("SoftSupport", ExtrusionRole::SupportMaterialInterface),
    ("Pillar", ExtrusionRole::SupportMaterial),
];

fn parse_craftware(comment: &str) -> Option<ProducerTag> {
    if let Some(kind) = comment.strip_prefix("segType:") {
        let kind = kind.trim();
        return Some(role_or_unknown(
            Producer::CraftWare,
            lookup_role(CRAFTWARE_ROLES, kind),
            kind,
        ));
    }
    if comment.starts_with(" Layer #") {
        return Some(ProducerTag::LayerChange);
    }
    None
}

const IDEAMAKER_ROLES: &[(&str, ExtrusionRole)] = &[
    ("RAFT", ExtrusionRole::Skirt),
    ("WALL-OUTER", ExtrusionRole::ExternalPerimeter),
    ("WALL-INNER", ExtrusionRole::Perimeter),
    ("SOLID-FILL", ExtrusionRole::SolidInfill),
    ("FILL", ExtrusionRole::InternalInfill),
    ("BRIDGE", ExtrusionRole::BridgeInfill),
    ("SUPPORT", ExtrusionRole::SupportMaterial),
];

fn parse_ideamaker(comment: &str) -> Option<ProducerTag> {
    if let Some(kind) = comment.strip_prefix("TYPE:") {
        let kind = kind.trim();
        return Some(role_or_unknown(
            Producer::IdeaMaker,
            lookup_role(IDEAMAKER_ROLES, kind),
            kind,
        ));
    }
    if let Some(value) = comment.strip_prefix("WIDTH:") {
        return value.trim().parse().ok().map(ProducerTag::Width);
    }
    if let Some(value) = comment.strip_prefix("HEIGHT:") {
        return value.trim().parse().ok().map(ProducerTag::Height);
    }
    if comment.starts_with("LAYER:") {
        return Some(ProducerTag::LayerChange);
    }
    None
}

const KISSLICER_ROLES: &[(&str, ExtrusionRole)] = &[
    (" 'Raft Path'", ExtrusionRole::Skirt),
    (" 'Support Interface Path'", ExtrusionRole::SupportMaterialInterface),
    (" 'Travel/Ironing Path'", ExtrusionRole::Ironing),
    (" 'Support (may Stack) Path'", ExtrusionRole::SupportMaterial),
    (" 'Perimeter Path'", ExtrusionRole::ExternalPerimeter),
    (" 'Pillar Path'", ExtrusionRole::None),
    (" 'Destring/Wipe/Jump Path'", ExtrusionRole::None),
    (" 'Prime Pillar Path'", ExtrusionRole::None),
    (" 'Loop Path'", ExtrusionRole::None),
    (" 'Crown Path'", ExtrusionRole::None),
    (" 'Solid Path'", ExtrusionRole::None),
    (" 'Stacked Sparse Infill Path'", ExtrusionRole::InternalInfill),
    (" 'Sparse Infill Path'", ExtrusionRole::SolidInfill),
];

fn parse_kissslicer(comment: &str) -> Option<ProducerTag> {
    if let Some(role) = lookup_role_prefix(KISSLICER_ROLES, comment) {
        return Some(ProducerTag::Role(role));
    }
    if comment.starts_with(" BEGIN_LAYER_") {
        return Some(ProducerTag::LayerChange);
    }
    None
}

/// Parsed `;COLOR_CHANGE[,T<id>][,#rrggbb]` tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorChangeTag {
    pub extruder_id: Option<usize>,
    pub color: Option<String>,
}

fn color_change_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^COLOR_CHANGE(?:,T(?P<extruder>\d+))?(?:,(?P<color>#[0-9A-Fa-f]{6}))?")
            .expect("invalid color change regex")
    })
}

impl ColorChangeTag {
    pub fn parse(comment: &str) -> Option<Self> {
        let caps = color_change_regex().captures(comment)?;
        Some(Self {
            extruder_id: caps
                .name("extruder")
                .and_then(|m| m.as_str().parse().ok()),
            color: caps.name("color").map(|m| m.as_str().to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_tag_strings() {
        assert_eq!(ReservedTag::Role.as_str(), "TYPE:");
        assert_eq!(ReservedTag::LayerChange.to_string(), "LAYER_CHANGE");
        assert_eq!(
            ReservedTag::FirstLineM73Placeholder.line(),
            ";_GP_FIRST_LINE_M73_PLACEHOLDER"
        );
        assert_eq!(ReservedTag::ALL.iter().filter(|t| t.is_placeholder()).count(), 3);
    }

    #[test]
    fn test_placeholder_lookup() {
        assert_eq!(
            ReservedTag::placeholder("_GP_LAST_LINE_M73_PLACEHOLDER"),
            Some(ReservedTag::LastLineM73Placeholder)
        );
        assert_eq!(ReservedTag::placeholder("LAYER_CHANGE"), None);
        assert_eq!(ReservedTag::placeholder("_GP_LAST_LINE_M73_PLACEHOLDER x"), None);
    }

    #[test]
    fn test_detect_producer() {
        assert_eq!(
            Producer::detect(" generated by PrusaSlicer 2.4.0 on 2022-01-01"),
            Some(Producer::PrusaSlicer)
        );
        assert_eq!(
            Producer::detect(" generated by Slic3r Prusa Edition 1.41"),
            Some(Producer::Slic3rPE)
        );
        assert_eq!(Producer::detect(" generated by Slic3r 1.3"), Some(Producer::Slic3r));
        assert_eq!(Producer::detect("Generated with Cura_SteamEngine 4.8"), Some(Producer::Cura));
        assert_eq!(Producer::detect(" layer 3"), None);
    }

    #[test]
    fn test_cura_grammar() {
        assert_eq!(
            Producer::Cura.parse_tag("TYPE:WALL-OUTER"),
            Some(ProducerTag::Role(ExtrusionRole::ExternalPerimeter))
        );
        assert_eq!(
            Producer::Cura.parse_tag("TYPE:SUPPORT-INTERFACE"),
            Some(ProducerTag::Role(ExtrusionRole::SupportMaterialInterface))
        );
        assert_eq!(
            Producer::Cura.parse_tag("TYPE:UNKNOWN-THING"),
            Some(ProducerTag::Role(ExtrusionRole::None))
        );
        assert_eq!(Producer::Cura.parse_tag("LAYER:3"), Some(ProducerTag::LayerChange));
        assert_eq!(Producer::Cura.parse_tag("FLAVOR:Marlin"), Some(ProducerTag::Ignored));
        assert_eq!(Producer::Cura.parse_tag("WIPE_START"), None);
    }

    #[test]
    fn test_slic3r_family_has_no_dialect() {
        assert!(Producer::PrusaSlicer.is_slic3r_family());
        assert_eq!(Producer::PrusaSlicer.parse_tag("TYPE:WALL-OUTER"), None);
        assert!(!Producer::Cura.is_slic3r_family());
    }

    #[test]
    fn test_simplify3d_grammar() {
        assert_eq!(
            Producer::Simplify3D.parse_tag(" feature outer perimeter"),
            Some(ProducerTag::Role(ExtrusionRole::ExternalPerimeter))
        );
        assert_eq!(
            Producer::Simplify3D.parse_tag(" feature dense support"),
            Some(ProducerTag::Role(ExtrusionRole::SupportMaterialInterface))
        );
        assert_eq!(
            Producer::Simplify3D.parse_tag(" tool H0.200 W0.450"),
            Some(ProducerTag::Extrusion {
                height: Some(0.2),
                width: Some(0.45)
            })
        );
        assert_eq!(
            Producer::Simplify3D.parse_tag(" layer 2, Z = 0.4"),
            Some(ProducerTag::LayerChange)
        );
        assert_eq!(Producer::Simplify3D.parse_tag(" layer end"), Some(ProducerTag::Ignored));
    }

    #[test]
    fn test_other_grammars() {
        assert_eq!(
            Producer::CraftWare.parse_tag("segType:SoftSupport"),
            Some(ProducerTag::Role(ExtrusionRole::SupportMaterialInterface))
        );
        assert_eq!(Producer::CraftWare.parse_tag(" Layer #4"), Some(ProducerTag::LayerChange));
        assert_eq!(
            Producer::IdeaMaker.parse_tag("TYPE:SOLID-FILL"),
            Some(ProducerTag::Role(ExtrusionRole::SolidInfill))
        );
        assert_eq!(Producer::IdeaMaker.parse_tag("WIDTH:0.42"), Some(ProducerTag::Width(0.42)));
        assert_eq!(
            Producer::KissSlicer.parse_tag(" 'Stacked Sparse Infill Path'"),
            Some(ProducerTag::Role(ExtrusionRole::InternalInfill))
        );
        assert_eq!(
            Producer::KissSlicer.parse_tag(" 'Sparse Infill Path'"),
            Some(ProducerTag::Role(ExtrusionRole::SolidInfill))
        );
        assert_eq!(
            Producer::KissSlicer.parse_tag(" BEGIN_LAYER_OBJECT z=0.2"),
            Some(ProducerTag::LayerChange)
        );
    }

    #[test]
    fn test_color_change_tag() {
        assert_eq!(
            ColorChangeTag::parse("COLOR_CHANGE,T1,#ff8000"),
            Some(ColorChangeTag {
                extruder_id: Some(1),
                color: Some("#ff8000".to_string())
            })
        );
        assert_eq!(
            ColorChangeTag::parse("COLOR_CHANGE"),
            Some(ColorChangeTag {
                extruder_id: None,
                color: None
            })
        );
        assert_eq!(ColorChangeTag::parse("PAUSE_PRINT"), None);
    }
}
