//! G-code state machine
//!
//! [`GCodeProcessor`] consumes parsed lines one at a time, tracks the
//! machine state (positions, units, feedrate, extruder, role, layer),
//! classifies every move and hands it to the [`TimeEstimator`]. When the
//! input ends it assembles the [`GCodeResult`].

use std::collections::BTreeMap;
use std::path::Path;

use gcodestat_core::{
    format_time_dhm, format_time_dhms, Axis, AxisPosition, CustomGCodeType, ExtrusionRole,
    MoveType, PositioningMode, ProcessError, Result, TimeMode, Units, INCHES_TO_MM,
    MMMIN_TO_MMSEC,
};
use gcodestat_settings::{GCodeFlavor, PrintConfig};
use tracing::{debug, info, warn};

use crate::filament::{filament_area, UsedFilaments};
use crate::gcode::{tool_id, Command, GCodeLine, GcodeFileReader};
use crate::planner::{PlannedMove, TimeEstimator};
use crate::post_process::{
    AnnotationStats, PlaceholderMark, RemainingTimeAnnotator, StopMark, TimeMarks,
};
use crate::result::{
    CustomGCodeInterval, CustomGCodeItem, GCodeResult, ModeStatistics, MoveVertex,
    PrintEstimatedStatistics, ResultIdGenerator, SettingsIds,
};
use crate::tags::{ColorChangeTag, Producer, ProducerTag, ReservedTag};
use crate::validation::check_for_reserved_tags;

/// Feedrate used until the first `F` word (mm/s)
pub const DEFAULT_FEEDRATE: f64 = 1500.0 * MMMIN_TO_MMSEC;
/// Extrusion height when none can be inferred (mm)
pub const DEFAULT_TOOLPATH_HEIGHT: f64 = 0.2;
/// Extrusion width when none can be inferred (mm)
pub const DEFAULT_TOOLPATH_WIDTH: f64 = 0.4;

const EPSILON: f64 = 1e-4;

/// Position and feedrate stored by M401
#[derive(Debug, Clone, Copy)]
struct CachedPosition {
    position: AxisPosition,
    feedrate: f64,
}

/// Streaming G-code processor
///
/// One instance processes one file. Independent runs need independent
/// instances; nothing is shared between them except the result id counter.
#[derive(Debug)]
pub struct GCodeProcessor {
    config: PrintConfig,
    ids: ResultIdGenerator,
    flavor: GCodeFlavor,
    units: Units,
    global_positioning: PositioningMode,
    e_positioning: PositioningMode,
    start_position: AxisPosition,
    end_position: AxisPosition,
    origin: AxisPosition,
    cached_position: Option<CachedPosition>,
    /// mm/s
    feedrate: f64,
    width: f64,
    height: f64,
    forced_width: Option<f64>,
    forced_height: Option<f64>,
    extruded_last_z: f64,
    mm3_per_mm: f64,
    fan_speed: f64,
    extrusion_role: ExtrusionRole,
    extruder_id: usize,
    extruder_temps: Vec<f64>,
    extruder_color_ids: Vec<usize>,
    color_changes: usize,
    current_color_id: usize,
    layer_id: usize,
    wiping: bool,
    producers_enabled: bool,
    producer: Producer,
    producer_lines_left: usize,
    time: TimeEstimator,
    used_filaments: UsedFilaments,
    placeholders: Vec<(usize, ReservedTag)>,
    stops: Vec<usize>,
    result: GCodeResult,
    lines_processed: usize,
    finalized: bool,
}

impl GCodeProcessor {
    /// Create a processor for `config`, drawing the result id from `ids`
    pub fn new(config: PrintConfig, ids: &ResultIdGenerator) -> Self {
        let extruders_count = config.extruders.count.max(1);
        let extruders = &config.extruders;

        let mut result = GCodeResult {
            id: ids.next_id(),
            bed_shape: config.bed_shape.clone(),
            settings_ids: SettingsIds {
                print: config.print_settings_id.clone(),
                printer: config.printer_settings_id.clone(),
                filament: extruders.filament_settings_ids.clone(),
            },
            extruders_count,
            extruder_colors: extruders.extruder_colors.clone(),
            filament_diameters: (0..extruders_count)
                .map(|id| extruders.filament_diameter(id))
                .collect(),
            filament_densities: (0..extruders_count)
                .map(|id| extruders.filament_density(id))
                .collect(),
            ..Default::default()
        };
        if config.validate_reserved_tags {
            result.reserved_tag_warnings = check_for_reserved_tags(&config.custom_gcode);
        }

        Self {
            flavor: config.gcode_flavor,
            units: Units::Millimeters,
            global_positioning: PositioningMode::Absolute,
            e_positioning: PositioningMode::Absolute,
            start_position: AxisPosition::ZERO,
            end_position: AxisPosition::ZERO,
            origin: AxisPosition::ZERO,
            cached_position: None,
            feedrate: DEFAULT_FEEDRATE,
            width: 0.0,
            height: 0.0,
            forced_width: None,
            forced_height: None,
            extruded_last_z: 0.0,
            mm3_per_mm: 0.0,
            fan_speed: 0.0,
            extrusion_role: ExtrusionRole::None,
            extruder_id: 0,
            extruder_temps: vec![0.0; extruders_count],
            extruder_color_ids: (0..extruders_count).collect(),
            color_changes: 0,
            current_color_id: 0,
            layer_id: 0,
            wiping: false,
            producers_enabled: config.enable_producers,
            producer: Producer::Unknown,
            producer_lines_left: if config.enable_producers {
                config.processor.producer_detection_lines
            } else {
                0
            },
            time: TimeEstimator::new(&config),
            used_filaments: UsedFilaments::default(),
            placeholders: Vec::new(),
            stops: Vec::new(),
            result,
            lines_processed: 0,
            finalized: false,
            ids: ids.clone(),
            config,
        }
    }

    /// Discard all state and start over with the same configuration
    pub fn reset(&mut self) {
        let config = std::mem::take(&mut self.config);
        let ids = self.ids.clone();
        *self = Self::new(config, &ids);
    }

    pub fn config(&self) -> &PrintConfig {
        &self.config
    }

    /// Producer detected so far
    pub fn producer(&self) -> Producer {
        self.producer
    }

    /// Process a G-code file, then finalize and optionally annotate it
    ///
    /// `cancel` is polled every `cancel_check_interval` lines. When it
    /// returns `true` processing stops with [`ProcessError::Cancelled`] and
    /// the file is left untouched.
    pub fn process_file<P, C>(&mut self, path: P, mut cancel: C) -> Result<()>
    where
        P: AsRef<Path>,
        C: FnMut() -> bool,
    {
        let path = path.as_ref();
        let reader = GcodeFileReader::new(path)?;
        let interval = self.config.processor.cancel_check_interval.max(1);
        info!(path = %path.display(), size = reader.file_size(), "Processing G-code");

        let stats = reader.read_lines(|line_id, text| {
            if line_id % interval == 0 && cancel() {
                return Err(ProcessError::Cancelled.into());
            }
            self.process_line(&GCodeLine::parse(line_id, text));
            Ok(())
        });
        let stats = match stats {
            Ok(stats) => stats,
            Err(e) => {
                if e.is_cancelled() {
                    info!(lines = self.lines_processed, "Processing cancelled");
                }
                return Err(e);
            }
        };
        debug!(
            lines = stats.lines_read,
            bytes = stats.bytes_read,
            elapsed_ms = stats.read_time_ms,
            "Input read"
        );

        self.finalize();

        if self.config.export_remaining_time_enabled {
            self.post_process(path)?;
        }
        Ok(())
    }

    /// Process G-code held in memory and finalize
    pub fn process_str(&mut self, gcode: &str) {
        for (index, text) in gcode.lines().enumerate() {
            self.process_line(&GCodeLine::parse(index + 1, text));
        }
        self.finalize();
    }

    /// Process one parsed line
    pub fn process_line(&mut self, line: &GCodeLine) {
        if self.finalized {
            warn!(line = line.line_id(), "Line ignored, processor already finalized");
            return;
        }
        self.lines_processed += 1;
        self.start_position = self.end_position;

        match Command::from_line(line) {
            Command::LinearMove => self.process_g1(line),
            Command::Dwell => self.process_g4(line),
            Command::FirmwareRetract => self.store_move_vertex(MoveType::Retract, line.line_id()),
            Command::FirmwareUnretract => {
                self.store_move_vertex(MoveType::Unretract, line.line_id())
            }
            Command::InchUnits => self.units = Units::Inches,
            Command::MillimeterUnits => self.units = Units::Millimeters,
            Command::Home => self.process_g28(line),
            Command::AbsolutePositioning => {
                self.global_positioning = PositioningMode::Absolute;
            }
            Command::RelativePositioning => {
                self.global_positioning = PositioningMode::Relative;
            }
            Command::SetPosition => self.process_g92(line),
            Command::Stop => self.synchronize(0.0),
            Command::AbsoluteExtrusion => self.e_positioning = PositioningMode::Absolute,
            Command::RelativeExtrusion => self.e_positioning = PositioningMode::Relative,
            Command::SetTemperature => self.process_m104(line),
            Command::FanOn => self.process_m106(line),
            Command::FanOff => self.fan_speed = 0.0,
            Command::SailfishToolSelect => {
                if self.flavor == GCodeFlavor::Sailfish {
                    self.process_tool_select(line);
                }
            }
            Command::WaitForTemperature => self.process_m109(line),
            Command::LoadHomePosition => self.process_m132(line),
            Command::MakerWareToolSelect => {
                if self.flavor == GCodeFlavor::MakerWare {
                    self.process_tool_select(line);
                }
            }
            Command::SetMaxAcceleration => self.process_m201(line),
            Command::SetMaxFeedrate => self.process_m203(line),
            Command::SetAcceleration => self.process_m204(line),
            Command::SetAdvancedSettings => self.process_m205(line),
            Command::SetExtrudeFactor => self.process_m221(line),
            Command::SavePosition => {
                if self.flavor == GCodeFlavor::Repetier {
                    self.cached_position = Some(CachedPosition {
                        position: self.end_position,
                        feedrate: self.feedrate,
                    });
                }
            }
            Command::RestorePosition => {
                if self.flavor == GCodeFlavor::Repetier {
                    self.process_m402(line);
                }
            }
            Command::SetJerk => self.process_m566(line),
            Command::UnloadFilament => self.process_m702(line),
            Command::ToolChange => self.process_t(line.line_id(), line.cmd()),
            Command::Unknown => {
                if line.cmd().is_empty() && line.raw().starts_with(';') {
                    if let Some(comment) = line.comment() {
                        self.process_comment(line.line_id(), comment);
                    }
                } else if !line.cmd().is_empty() {
                    debug!(line = line.line_id(), cmd = line.cmd(), "Unhandled command");
                }
            }
        }

        self.apply_finalized_times();
    }

    fn scale(&self) -> f64 {
        self.units.scale()
    }

    fn filament_diameter(&self) -> f64 {
        self.config.extruders.filament_diameter(self.extruder_id)
    }

    fn set_extrusion_role(&mut self, role: ExtrusionRole) {
        let diameter = self.filament_diameter();
        self.used_filaments
            .process_role_cache(self.extrusion_role, diameter);
        self.extrusion_role = role;
    }

    fn process_comment(&mut self, line_id: usize, comment: &str) {
        if self.producer_lines_left > 0 {
            self.producer_lines_left -= 1;
            if let Some(producer) = Producer::detect(comment) {
                info!(%producer, line = line_id, "Detected G-code producer");
                self.producer = producer;
                self.producer_lines_left = 0;
            }
        }

        if comment.len() > 1 {
            self.process_tags(line_id, comment);
        }
    }

    fn process_tags(&mut self, line_id: usize, comment: &str) {
        if self.producers_enabled {
            if let Some(tag) = self.producer.parse_tag(comment) {
                self.apply_producer_tag(tag);
                return;
            }
        }

        if let Some(role) = comment.strip_prefix(ReservedTag::Role.as_str()) {
            self.set_extrusion_role(ExtrusionRole::from_tag(role));
            return;
        }
        if comment.starts_with(ReservedTag::WipeStart.as_str()) {
            self.wiping = true;
            return;
        }
        if comment.starts_with(ReservedTag::WipeEnd.as_str()) {
            self.wiping = false;
            return;
        }

        if !self.producers_enabled || self.producer.is_slic3r_family() {
            if let Some(value) = comment.strip_prefix(ReservedTag::Height.as_str()) {
                match value.trim().parse::<f64>() {
                    Ok(height) => self.forced_height = Some(height),
                    Err(_) => debug!(line = line_id, "Malformed height tag"),
                }
                return;
            }
            if let Some(value) = comment.strip_prefix(ReservedTag::Width.as_str()) {
                match value.trim().parse::<f64>() {
                    Ok(width) => self.forced_width = Some(width),
                    Err(_) => debug!(line = line_id, "Malformed width tag"),
                }
                return;
            }
        }

        if comment.starts_with(ReservedTag::ColorChange.as_str()) {
            if let Some(tag) = ColorChangeTag::parse(comment) {
                self.process_color_change(line_id, tag);
            }
            return;
        }
        if comment.starts_with(ReservedTag::PausePrint.as_str()) {
            self.time.process_custom_gcode_time(CustomGCodeType::PausePrint);
            self.store_move_vertex(MoveType::PausePrint, line_id);
            self.push_custom_gcode_item(CustomGCodeType::PausePrint, String::new(), comment);
            self.register_stop(line_id);
            return;
        }
        if comment.starts_with(ReservedTag::CustomCode.as_str()) {
            self.store_move_vertex(MoveType::CustomGCode, line_id);
            self.push_custom_gcode_item(CustomGCodeType::Custom, String::new(), comment);
            self.register_stop(line_id);
            return;
        }
        if comment.starts_with(ReservedTag::LayerChange.as_str()) {
            self.layer_id += 1;
            return;
        }
        if let Some(tag) = ReservedTag::placeholder(comment) {
            self.placeholders.push((line_id, tag));
            self.time.request_checkpoint(line_id);
        }
    }

    fn apply_producer_tag(&mut self, tag: ProducerTag) {
        match tag {
            ProducerTag::Role(role) => self.set_extrusion_role(role),
            ProducerTag::LayerChange => self.layer_id += 1,
            ProducerTag::Height(height) => self.forced_height = Some(height),
            ProducerTag::Width(width) => self.forced_width = Some(width),
            ProducerTag::Extrusion { height, width } => {
                if height.is_some() {
                    self.forced_height = height;
                }
                if width.is_some() {
                    self.forced_width = width;
                }
            }
            ProducerTag::Ignored => {}
        }
    }

    fn process_color_change(&mut self, line_id: usize, tag: ColorChangeTag) {
        let extruder_id = tag.extruder_id.unwrap_or(self.extruder_id);
        let color_id = self.extruder_color_ids.len() + self.color_changes;
        if let Some(slot) = self.extruder_color_ids.get_mut(extruder_id) {
            *slot = color_id;
        }
        self.color_changes += 1;

        if extruder_id == self.extruder_id {
            self.current_color_id = color_id;
            self.time.process_custom_gcode_time(CustomGCodeType::ColorChange);
            self.store_move_vertex(MoveType::ColorChange, line_id);
            let color = tag.color.unwrap_or_default();
            self.push_custom_gcode_item(CustomGCodeType::ColorChange, color, "");
            self.register_stop(line_id);
            self.used_filaments.process_color_change_cache();
            self.used_filaments.process_extruder_cache(self.extruder_id);
        }
    }

    fn push_custom_gcode_item(&mut self, kind: CustomGCodeType, color: String, extra: &str) {
        self.result.custom_gcode_per_print_z.push(CustomGCodeItem {
            print_z: self.end_position[Axis::Z],
            kind,
            extruder: self.extruder_id + 1,
            color,
            extra: extra.to_string(),
        });
    }

    fn register_stop(&mut self, line_id: usize) {
        self.stops.push(line_id);
        self.time.request_checkpoint(line_id);
    }

    fn is_relative(&self, axis: Axis) -> bool {
        self.global_positioning == PositioningMode::Relative
            || (axis == Axis::E && self.e_positioning == PositioningMode::Relative)
    }

    fn move_type(&self, delta: &AxisPosition) -> MoveType {
        if self.wiping {
            return MoveType::Wipe;
        }
        let moves_xy = delta[Axis::X] != 0.0 || delta[Axis::Y] != 0.0;
        let moves_xyz = moves_xy || delta[Axis::Z] != 0.0;

        if delta[Axis::E] < 0.0 {
            if moves_xyz {
                MoveType::Travel
            } else {
                MoveType::Retract
            }
        } else if delta[Axis::E] > 0.0 {
            if !moves_xy {
                if delta[Axis::Z] == 0.0 {
                    MoveType::Unretract
                } else {
                    MoveType::Travel
                }
            } else {
                MoveType::Extrude
            }
        } else if moves_xyz {
            MoveType::Travel
        } else {
            MoveType::Noop
        }
    }

    fn process_g1(&mut self, line: &GCodeLine) {
        let scale = self.scale();
        for axis in Axis::ALL {
            if let Some(value) = line.axis(axis) {
                self.end_position[axis] = if self.is_relative(axis) {
                    self.start_position[axis] + value * scale
                } else {
                    self.origin[axis] + value * scale
                };
            }
        }
        if let Some(feedrate) = line.feedrate() {
            self.feedrate = feedrate * scale * MMMIN_TO_MMSEC;
        }

        let delta = self.end_position.delta(&self.start_position);
        if delta.max_abs() == 0.0 {
            return;
        }

        let mut move_type = self.move_type(&delta);
        if move_type == MoveType::Extrude {
            self.update_extrusion(&delta);
            if self.width == 0.0 || self.height == 0.0 {
                move_type = MoveType::Travel;
            }
        }

        let move_id = self.result.moves.len();
        self.store_move_vertex(move_type, line.line_id());
        self.time.plan_move(&PlannedMove {
            move_type,
            role: self.extrusion_role,
            line_id: line.line_id(),
            move_id,
            layer_id: self.layer_id.max(1),
            delta,
            feedrate: self.feedrate,
        });
    }

    /// Volume, flow and extrusion dimensions of an extruding move
    fn update_extrusion(&mut self, delta: &AxisPosition) {
        let delta_xyz = delta.xyz_length();
        let diameter = self.filament_diameter();
        let area = filament_area(diameter);
        let volume = area * delta[Axis::E];
        self.used_filaments.increase_caches(volume);
        self.mm3_per_mm = if delta_xyz > 0.0 { volume / delta_xyz } else { 0.0 };

        let z = self.end_position[Axis::Z];
        match self.forced_height {
            Some(height) => self.height = height,
            None => {
                if z > self.extruded_last_z + EPSILON {
                    self.height = z - self.extruded_last_z;
                }
            }
        }
        if self.height == 0.0 {
            self.height = DEFAULT_TOOLPATH_HEIGHT;
        }
        self.extruded_last_z = z;

        self.width = match self.forced_width {
            Some(width) => width,
            None if delta_xyz > 0.0 => match self.extrusion_role {
                // rectangle, slightly over-extruded
                ExtrusionRole::ExternalPerimeter => {
                    delta[Axis::E] * filament_area(1.05 * diameter) / (delta_xyz * self.height)
                }
                // circle
                ExtrusionRole::BridgeInfill | ExtrusionRole::None => {
                    diameter * (delta[Axis::E] / delta_xyz).sqrt()
                }
                // rectangle with two semicircles
                _ => {
                    delta[Axis::E] * area / (delta_xyz * self.height)
                        + (1.0 - 0.25 * std::f64::consts::PI) * self.height
                }
            },
            None => 0.0,
        };
        if self.width == 0.0 {
            self.width = DEFAULT_TOOLPATH_WIDTH;
        }
        self.width = self.width.min(2.0_f64.max(4.0 * self.height));
    }

    /// Flush the planners and charge a blocking delay to the active layer
    fn synchronize(&mut self, additional_time: f64) {
        self.time
            .simulate_st_synchronize(additional_time, self.layer_id.max(1));
    }

    fn process_g4(&mut self, line: &GCodeLine) {
        let seconds = match (line.value('P'), line.value('S')) {
            (Some(ms), _) => ms * 0.001,
            (None, Some(s)) => s,
            (None, None) => 0.0,
        };
        self.synchronize(seconds.max(0.0));
    }

    fn process_g28(&mut self, line: &GCodeLine) {
        let mut words: Vec<(char, f64)> = [Axis::X, Axis::Y, Axis::Z]
            .into_iter()
            .filter(|axis| line.has(axis.letter()))
            .map(|axis| (axis.letter(), 0.0))
            .collect();
        if words.is_empty() {
            words = vec![('X', 0.0), ('Y', 0.0), ('Z', 0.0)];
        }
        let home = GCodeLine::synthesized(line.line_id(), "G1", &words);
        self.process_g1(&home);
    }

    fn process_g92(&mut self, line: &GCodeLine) {
        let scale = self.scale();
        let mut any_found = false;
        for axis in [Axis::X, Axis::Y, Axis::Z] {
            if let Some(value) = line.axis(axis) {
                self.origin[axis] = self.end_position[axis] - value * scale;
                any_found = true;
            }
        }
        match line.axis(Axis::E) {
            // Reset E directly so a long print keeps full precision
            Some(value) => {
                self.end_position[Axis::E] = value * scale;
                any_found = true;
            }
            None => self.synchronize(0.0),
        }

        if !any_found && !line.has_unknown_axis() {
            self.origin = self.end_position;
        }
    }

    fn process_m104(&mut self, line: &GCodeLine) {
        if let Some(temp) = line.value('S') {
            let id = line
                .value('T')
                .map(|t| t as usize)
                .unwrap_or(self.extruder_id);
            if let Some(slot) = self.extruder_temps.get_mut(id) {
                *slot = temp;
            }
        }
    }

    fn process_m106(&mut self, line: &GCodeLine) {
        if !line.has('P') {
            self.fan_speed = match line.value('S') {
                Some(s) => 100.0 / 255.0 * s,
                None => 100.0,
            };
        }
    }

    fn process_m109(&mut self, line: &GCodeLine) {
        let target = match (line.value('R'), line.value('S')) {
            (Some(r), _) => Some((
                line.value('T')
                    .map(|t| t as usize)
                    .unwrap_or(self.extruder_id),
                r,
            )),
            (None, Some(s)) => Some((self.extruder_id, s)),
            (None, None) => None,
        };
        if let Some((id, temp)) = target {
            if let Some(slot) = self.extruder_temps.get_mut(id) {
                *slot = temp;
            }
        }
        let delay = self.config.processor.wait_for_temperature_delay_s;
        self.synchronize(delay);
    }

    fn process_m132(&mut self, line: &GCodeLine) {
        for axis in Axis::ALL {
            if line.has(axis.letter()) {
                self.origin[axis] = 0.0;
            }
        }
    }

    fn process_m201(&mut self, line: &GCodeLine) {
        let factor = if !self.flavor.is_reprap() && self.units == Units::Inches {
            INCHES_TO_MM
        } else {
            1.0
        };
        for machine in self.time.limit_targets_mut() {
            for axis in Axis::ALL {
                if let Some(value) = line.axis(axis) {
                    machine.limits.max_acceleration[axis.index()] = value * factor;
                }
            }
        }
    }

    fn process_m203(&mut self, line: &GCodeLine) {
        if self.flavor == GCodeFlavor::Repetier {
            return;
        }
        let factor = self.flavor.max_feedrate_factor();
        for machine in self.time.limit_targets_mut() {
            for axis in Axis::ALL {
                if let Some(value) = line.axis(axis) {
                    machine.limits.max_feedrate[axis.index()] = value * factor;
                }
            }
        }
    }

    fn process_m204(&mut self, line: &GCodeLine) {
        for machine in self.time.limit_targets_mut() {
            if let Some(value) = line.value('S') {
                // Legacy Marlin format
                machine.set_acceleration(value);
                machine.set_travel_acceleration(value);
                if let Some(retract) = line.value('T') {
                    machine.set_retract_acceleration(retract);
                }
            } else {
                if let Some(value) = line.value('P') {
                    machine.set_acceleration(value);
                }
                if let Some(value) = line.value('R') {
                    machine.set_retract_acceleration(value);
                }
                if let Some(value) = line.value('T') {
                    machine.set_travel_acceleration(value);
                }
            }
        }
    }

    fn process_m205(&mut self, line: &GCodeLine) {
        for machine in self.time.limit_targets_mut() {
            let jerk = &mut machine.limits.max_jerk;
            if let Some(x) = line.value('X') {
                jerk[Axis::X.index()] = x;
                jerk[Axis::Y.index()] = x;
            }
            if let Some(y) = line.value('Y') {
                jerk[Axis::Y.index()] = y;
            }
            if let Some(z) = line.value('Z') {
                jerk[Axis::Z.index()] = z;
            }
            if let Some(e) = line.value('E') {
                jerk[Axis::E.index()] = e;
            }
            if let Some(s) = line.value('S') {
                machine.limits.min_extruding_rate = s;
            }
            if let Some(t) = line.value('T') {
                machine.limits.min_travel_rate = t;
            }
        }
    }

    fn process_m221(&mut self, line: &GCodeLine) {
        if let (Some(s), false) = (line.value('S'), line.has('T')) {
            for machine in self.time.machines_mut() {
                machine.set_extrude_factor_override(s * 0.01);
            }
        }
    }

    fn process_m402(&mut self, line: &GCodeLine) {
        let Some(cached) = self.cached_position else {
            return;
        };
        let all_xyz = !(line.has('X') || line.has('Y') || line.has('Z'));
        for axis in [Axis::X, Axis::Y, Axis::Z] {
            if all_xyz || line.has(axis.letter()) {
                self.end_position[axis] = cached.position[axis];
            }
        }
        self.end_position[Axis::E] = cached.position[Axis::E];
        self.feedrate = line
            .feedrate()
            .map(|f| f * MMMIN_TO_MMSEC)
            .unwrap_or(cached.feedrate);
    }

    fn process_m566(&mut self, line: &GCodeLine) {
        for machine in self.time.limit_targets_mut() {
            for axis in Axis::ALL {
                if let Some(value) = line.axis(axis) {
                    machine.limits.max_jerk[axis.index()] = value * MMMIN_TO_MMSEC;
                }
            }
        }
    }

    fn process_m702(&mut self, line: &GCodeLine) {
        if line.has('C') {
            let unload = self.unload_time(self.extruder_id);
            self.synchronize(unload);
            self.time.set_extruder_unloaded(true);
        }
    }

    fn process_tool_select(&mut self, line: &GCodeLine) {
        if let Some(t) = line.value('T') {
            self.process_t(line.line_id(), &format!("T{}", t as i64));
        }
    }

    fn unload_time(&self, extruder_id: usize) -> f64 {
        if self.time.is_extruder_unloaded() {
            0.0
        } else {
            self.config.extruders.filament_unload_time(extruder_id)
        }
    }

    fn process_t(&mut self, line_id: usize, cmd: &str) {
        let Some(id) = tool_id(cmd) else {
            let mmu_query = self.flavor.is_marlin() && matches!(cmd, "TX" | "TC" | "T?");
            let deselect = self.flavor.is_reprap() && cmd == "T-1";
            if !mmu_query && !deselect {
                debug!(cmd, "Invalid tool change");
            }
            return;
        };
        if id == self.extruder_id {
            return;
        }
        let count = self.extruder_color_ids.len();
        if id >= count {
            warn!(id, count, "Tool change to an extruder that does not exist");
            return;
        }

        let old_id = self.extruder_id;
        self.used_filaments.process_extruder_cache(old_id);
        self.extruder_id = id;
        self.current_color_id = self.extruder_color_ids[id];

        let extra_time = self.unload_time(old_id) + self.config.extruders.filament_load_time(id);
        self.time.set_extruder_unloaded(false);
        self.synchronize(extra_time);
        self.store_move_vertex(MoveType::ToolChange, line_id);
    }

    fn store_move_vertex(&mut self, move_type: MoveType, line_id: usize) {
        let offset = self.config.extruders.offset(self.extruder_id);
        let position = &self.end_position;
        self.result.moves.push(MoveVertex {
            gcode_id: line_id,
            move_type,
            role: self.extrusion_role,
            extruder_id: self.extruder_id,
            color_id: self.current_color_id,
            position: [
                position[Axis::X] + offset[0],
                position[Axis::Y] + offset[1],
                position[Axis::Z],
            ],
            delta_extruder: position[Axis::E] - self.start_position[Axis::E],
            feedrate: self.feedrate,
            width: self.width,
            height: self.height,
            mm3_per_mm: self.mm3_per_mm,
            fan_speed: self.fan_speed,
            temperature: self
                .extruder_temps
                .get(self.extruder_id)
                .copied()
                .unwrap_or(0.0),
            layer_id: self.layer_id,
            // filled once the planner finalizes the move
            time: [f64::NAN; TimeMode::COUNT],
        });
    }

    /// Copy elapsed times of finalized blocks onto their vertices
    fn apply_finalized_times(&mut self) {
        for mode in TimeMode::ALL {
            let finalized = self.time.machine_mut(mode).drain_finalized_moves();
            for block in finalized {
                if let Some(vertex) = self.result.moves.get_mut(block.move_id) {
                    vertex.time[mode.index()] = block.elapsed;
                }
            }
        }
    }

    /// Flush the planner and assemble the result
    ///
    /// Further calls are no-ops.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.time.finalize();
        self.apply_finalized_times();

        // Vertices without a block of their own take the time of the move before them
        for mode in TimeMode::ALL {
            let mut last = 0.0;
            for vertex in self.result.moves.iter_mut() {
                let time = &mut vertex.time[mode.index()];
                if time.is_nan() {
                    *time = last;
                } else {
                    last = *time;
                }
            }
        }

        let diameter = self.filament_diameter();
        self.used_filaments
            .process_caches(self.extruder_id, self.extrusion_role, diameter);

        self.result.print_statistics = PrintEstimatedStatistics {
            modes: [
                self.mode_statistics(TimeMode::Normal),
                self.mode_statistics(TimeMode::Stealth),
            ],
            used_filaments: std::mem::take(&mut self.used_filaments),
        };
        self.result.producer = self.producer;
        self.result.lines_processed = self.lines_processed;
        self.finalized = true;

        info!(
            id = self.result.id,
            moves = self.result.moves.len(),
            time = %self.get_time_dhms(TimeMode::Normal),
            "Processing finished"
        );
    }

    fn mode_statistics(&self, mode: TimeMode) -> ModeStatistics {
        ModeStatistics {
            time: self.get_time(mode),
            custom_gcode_times: self.get_custom_gcode_times(mode, true),
            moves_times: self.get_moves_time(mode),
            roles_times: self.get_roles_time(mode),
            layers_times: self.get_layers_time(mode),
        }
    }

    /// Timing data for the remaining-time annotation
    pub fn time_marks(&self) -> TimeMarks {
        let lookup: Vec<BTreeMap<usize, f64>> = TimeMode::ALL
            .iter()
            .map(|mode| {
                self.time
                    .machine(*mode)
                    .checkpoints()
                    .iter()
                    .copied()
                    .collect()
            })
            .collect();
        let elapsed_at = |line_id: usize| -> [f64; TimeMode::COUNT] {
            let mut elapsed = [0.0; TimeMode::COUNT];
            for (mode, map) in lookup.iter().enumerate() {
                elapsed[mode] = map.get(&line_id).copied().unwrap_or(0.0);
            }
            elapsed
        };

        TimeMarks {
            totals: TimeMode::ALL.map(|mode| {
                let machine = self.time.machine(mode);
                machine.is_enabled().then(|| machine.time())
            }),
            placeholders: self
                .placeholders
                .iter()
                .map(|&(line_id, tag)| PlaceholderMark {
                    line_id,
                    tag,
                    elapsed: elapsed_at(line_id),
                })
                .collect(),
            stops: self
                .stops
                .iter()
                .map(|&line_id| StopMark {
                    line_id,
                    elapsed: elapsed_at(line_id),
                })
                .collect(),
        }
    }

    /// Rewrite the placeholders of an already processed file
    pub fn post_process(&self, path: &Path) -> Result<AnnotationStats> {
        RemainingTimeAnnotator::new(self.time_marks()).process(path)
    }

    /// Peek at the result
    pub fn get_result(&self) -> &GCodeResult {
        &self.result
    }

    /// Move the result out; a second call yields an empty result
    pub fn extract_result(&mut self) -> GCodeResult {
        std::mem::take(&mut self.result)
    }

    /// Total print time (s)
    pub fn get_time(&self, mode: TimeMode) -> f64 {
        self.time.machine(mode).time()
    }

    pub fn get_time_dhm(&self, mode: TimeMode) -> String {
        format_time_dhm(self.get_time(mode))
    }

    pub fn get_time_dhms(&self, mode: TimeMode) -> String {
        format_time_dhms(self.get_time(mode))
    }

    /// Custom G-code intervals, with the time remaining at their start if requested
    pub fn get_custom_gcode_times(
        &self,
        mode: TimeMode,
        include_remaining: bool,
    ) -> Vec<CustomGCodeInterval> {
        let machine = self.time.machine(mode);
        let mut elapsed = 0.0;
        machine
            .custom_gcode_times()
            .iter()
            .map(|&(kind, time)| {
                let remaining = if include_remaining {
                    machine.time() - elapsed
                } else {
                    0.0
                };
                elapsed += time;
                CustomGCodeInterval {
                    kind,
                    time,
                    remaining,
                }
            })
            .collect()
    }

    /// Non-zero time per move type
    pub fn get_moves_time(&self, mode: TimeMode) -> Vec<(MoveType, f64)> {
        let times = self.time.machine(mode).moves_time();
        MoveType::ALL
            .into_iter()
            .map(|kind| (kind, times[kind.index()]))
            .filter(|(_, time)| *time != 0.0)
            .collect()
    }

    /// Non-zero time per extrusion role
    pub fn get_roles_time(&self, mode: TimeMode) -> Vec<(ExtrusionRole, f64)> {
        let times = self.time.machine(mode).roles_time();
        ExtrusionRole::ALL
            .into_iter()
            .map(|role| (role, times[role.index()]))
            .filter(|(_, time)| *time != 0.0)
            .collect()
    }

    /// Time per layer, index 0 is layer 1
    pub fn get_layers_time(&self, mode: TimeMode) -> Vec<f64> {
        self.time.machine(mode).layers_time().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor() -> GCodeProcessor {
        GCodeProcessor::new(PrintConfig::default(), &ResultIdGenerator::new())
    }

    fn run(gcode: &str) -> GCodeProcessor {
        let mut p = processor();
        p.process_str(gcode);
        p
    }

    #[test]
    fn test_move_classification() {
        let p = run("G1 X10 F3000\nG1 Y10 E1\nG1 E-1\nG1 E1\nG1 X0 E-0.5\nG1 Z1 E0.2\n");
        let types: Vec<_> = p.get_result().moves.iter().map(|v| v.move_type).collect();
        assert_eq!(
            types,
            vec![
                MoveType::Travel,
                MoveType::Extrude,
                MoveType::Retract,
                MoveType::Unretract,
                MoveType::Travel,
                MoveType::Travel
            ]
        );
    }

    #[test]
    fn test_zero_length_move_is_dropped() {
        let p = run("G1 X10 F3000\nG1 X10\nG1 F1200\n");
        assert_eq!(p.get_result().moves.len(), 1);
    }

    #[test]
    fn test_relative_and_inch_positioning() {
        let p = run("G91\nG1 X1 F600\nG1 X1\nG20\nG1 X1\n");
        let last = p.get_result().moves.last().map(|v| v.position[0]);
        assert_eq!(last, Some(2.0 + INCHES_TO_MM));
    }

    #[test]
    fn test_relative_extrusion() {
        let p = run("M83\nG1 X10 E1 F1200\nG1 X20 E1\n");
        let moves = &p.get_result().moves;
        assert_eq!(moves[1].delta_extruder, 1.0);
        assert_eq!(moves[1].move_type, MoveType::Extrude);
    }

    #[test]
    fn test_g92_sets_origin() {
        let p = run("G1 X10 F600\nG92 X0\nG1 X5\n");
        let moves = &p.get_result().moves;
        assert_eq!(moves[1].position[0], 15.0);
    }

    #[test]
    fn test_g28_homes_named_axes() {
        let p = run("G1 X10 Y10 Z5 F600\nG28 X\n");
        let last = &p.get_result().moves[1];
        assert_eq!(last.position, [0.0, 10.0, 5.0]);
    }

    #[test]
    fn test_role_and_layer_tags() {
        let p = run(";LAYER_CHANGE\n;TYPE:External perimeter\nG1 X10 E1 F1200\n;LAYER_CHANGE\n;TYPE:Solid infill\nG1 Z0.4\nG1 X0 E1\n");
        let moves = &p.get_result().moves;
        assert_eq!(moves[0].role, ExtrusionRole::ExternalPerimeter);
        assert_eq!(moves[0].layer_id, 1);
        assert_eq!(moves[2].role, ExtrusionRole::SolidInfill);
        assert_eq!(moves[2].layer_id, 2);
        assert_eq!(p.get_layers_time(TimeMode::Normal).len(), 2);
        let roles = p.get_roles_time(TimeMode::Normal);
        assert!(roles.iter().any(|(r, _)| *r == ExtrusionRole::ExternalPerimeter));
        assert!(roles.iter().any(|(r, _)| *r == ExtrusionRole::SolidInfill));
    }

    #[test]
    fn test_wipe_moves() {
        let p = run(";WIPE_START\nG1 X10 E-1 F3000\n;WIPE_END\nG1 X20\n");
        let moves = &p.get_result().moves;
        assert_eq!(moves[0].move_type, MoveType::Wipe);
        assert_eq!(moves[1].move_type, MoveType::Travel);
    }

    #[test]
    fn test_dwell_adds_time() {
        let with_dwell = run("G1 X10 F1200\nG4 P1500\nG4 S2\n");
        let without = run("G1 X10 F1200\n");
        let diff = with_dwell.get_time(TimeMode::Normal) - without.get_time(TimeMode::Normal);
        assert!((diff - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_dwell_after_layer_change_counts_toward_new_layer() {
        let p = run(";LAYER_CHANGE\nG1 X10 F1200\n;LAYER_CHANGE\nG4 S10\nG1 X20\n");
        let layers = p.get_layers_time(TimeMode::Normal);
        assert_eq!(layers.len(), 2);
        assert!(layers[0] < 1.0, "dwell leaked into layer 1: {layers:?}");
        assert!(layers[1] > 10.0);
    }

    #[test]
    fn test_m204_updates_acceleration() {
        let slow = run("M204 S100\nG1 X100 F12000\n");
        let fast = run("M204 S1000\nG1 X100 F12000\n");
        assert!(slow.get_time(TimeMode::Normal) > fast.get_time(TimeMode::Normal));
    }

    #[test]
    fn test_m203_limits_feedrate() {
        let limited = run("M203 X50\nG1 X100 F12000\n");
        let free = run("G1 X100 F12000\n");
        assert!(limited.get_time(TimeMode::Normal) > free.get_time(TimeMode::Normal));
        assert!(limited.get_time(TimeMode::Normal) >= 2.0);
    }

    #[test]
    fn test_fan_and_temperature() {
        let p = run("M106 S127.5\nM104 S215\nG1 X10 F600\nM107\nG1 X20\n");
        let moves = &p.get_result().moves;
        assert!((moves[0].fan_speed - 50.0).abs() < 1e-9);
        assert_eq!(moves[0].temperature, 215.0);
        assert_eq!(moves[1].fan_speed, 0.0);
    }

    #[test]
    fn test_tool_change() {
        let mut config = PrintConfig::default();
        config.extruders.count = 2;
        config.extruders.filament_diameters = vec![1.75, 1.75];
        config.extruders.filament_load_times = vec![10.0, 20.0];
        config.extruders.filament_unload_times = vec![5.0, 7.0];
        let mut p = GCodeProcessor::new(config, &ResultIdGenerator::new());
        p.process_str("G1 X10 E1 F1200\nT1\nG1 X20 E1\nT0\nT5\n");

        let result = p.get_result();
        let changes = result
            .moves
            .iter()
            .filter(|v| v.move_type == MoveType::ToolChange)
            .count();
        assert_eq!(changes, 2);
        assert_eq!(result.moves[1].gcode_id, 2);
        // T1 only loads, T0 unloads T1 and loads T0, T5 is ignored
        assert!(p.get_time(TimeMode::Normal) > 20.0 + 7.0 + 10.0);
        let volumes = &result.print_statistics.used_filaments.volumes_per_extruder;
        assert!(volumes.contains_key(&0));
        assert!(volumes.contains_key(&1));
    }

    #[test]
    fn test_tool_change_load_time_counts_toward_new_layer() {
        let mut config = PrintConfig::default();
        config.extruders.count = 2;
        config.extruders.filament_diameters = vec![1.75, 1.75];
        config.extruders.filament_load_times = vec![0.0, 30.0];
        config.extruders.filament_unload_times = vec![0.0, 0.0];
        let mut p = GCodeProcessor::new(config, &ResultIdGenerator::new());
        p.process_str(";LAYER_CHANGE\nG1 X10 F1200\n;LAYER_CHANGE\nT1\nG1 X20\n");

        let layers = p.get_layers_time(TimeMode::Normal);
        assert_eq!(layers.len(), 2);
        assert!(layers[0] < 1.0);
        assert!(layers[1] > 30.0);
    }

    #[test]
    fn test_color_change_and_pause() {
        let p = run("G1 X10 E1 F1200\n;COLOR_CHANGE,T0,#00ff00\nG1 X20 E1\n;PAUSE_PRINT\nG1 X30 E1\n");
        let result = p.get_result();
        let items = &result.custom_gcode_per_print_z;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].kind, CustomGCodeType::ColorChange);
        assert_eq!(items[0].color, "#00ff00");
        assert_eq!(items[0].extruder, 1);
        assert_eq!(items[1].kind, CustomGCodeType::PausePrint);

        let intervals = p.get_custom_gcode_times(TimeMode::Normal, true);
        assert_eq!(intervals.len(), 3);
        let sum: f64 = intervals.iter().map(|i| i.time).sum();
        assert!((sum - p.get_time(TimeMode::Normal)).abs() < 1e-9);
        assert_eq!(intervals[0].remaining, p.get_time(TimeMode::Normal));

        let colors = &result.print_statistics.used_filaments.volumes_per_color_change;
        assert_eq!(colors.len(), 2);
        assert!(result.moves[2].color_id > result.moves[0].color_id);
    }

    #[test]
    fn test_vertex_times_are_monotonic() {
        let p = run("G1 X10 F1200\nG10\nG1 X20\nG11\nG1 X30\n");
        let times: Vec<f64> = p
            .get_result()
            .moves
            .iter()
            .map(|v| v.elapsed(TimeMode::Normal))
            .collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(times[1], times[0]);
        let last = times.last().copied().unwrap_or(0.0);
        assert!((last - p.get_time(TimeMode::Normal)).abs() < 1e-9);
    }

    #[test]
    fn test_extract_result_twice() {
        let mut p = run("G1 X10 F1200\n");
        let first = p.extract_result();
        assert_eq!(first.moves.len(), 1);
        let second = p.extract_result();
        assert!(second.is_empty());
        assert!(p.get_time(TimeMode::Normal) > 0.0);
    }

    #[test]
    fn test_reset_draws_new_id() {
        let ids = ResultIdGenerator::new();
        let mut p = GCodeProcessor::new(PrintConfig::default(), &ids);
        let first = p.get_result().id;
        p.process_str("G1 X10 F1200\n");
        p.reset();
        assert_eq!(p.get_result().id, first + 1);
        assert!(p.get_result().moves.is_empty());
        assert_eq!(p.get_time(TimeMode::Normal), 0.0);
    }

    #[test]
    fn test_reserved_tag_warnings_in_result() {
        let mut config = PrintConfig::default();
        config.custom_gcode.end_gcode = ";LAYER_CHANGE\nM84".to_string();
        let p = GCodeProcessor::new(config, &ResultIdGenerator::new());
        let warnings = &p.get_result().reserved_tag_warnings;
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].tag, ReservedTag::LayerChange);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let p = run("G1 X1.2.3 F600\nM9999 S1\nfoo bar\nG1 X5\n");
        assert_eq!(p.get_result().moves.len(), 1);
        assert_eq!(p.get_result().lines_processed, 4);
    }
}
