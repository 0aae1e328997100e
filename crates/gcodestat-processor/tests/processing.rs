use std::io::Write;

use gcodestat_core::{ExtrusionRole, MoveType, TimeMode};
use gcodestat_processor::{GCodeProcessor, Producer, ResultIdGenerator};
use gcodestat_settings::PrintConfig;
use tempfile::NamedTempFile;

fn write_gcode(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn config_with_acceleration(acceleration: f64) -> PrintConfig {
    let mut config = PrintConfig::default();
    let limits = &mut config.machine_limits;
    limits.machine_max_acceleration_extruding = vec![acceleration, acceleration];
    limits.machine_max_acceleration_travel = vec![acceleration, acceleration];
    limits.machine_max_acceleration_retracting = vec![acceleration, acceleration];
    config
}

fn process(config: PrintConfig, gcode: &str) -> GCodeProcessor {
    let file = write_gcode(gcode);
    let mut processor = GCodeProcessor::new(config, &ResultIdGenerator::new());
    processor.process_file(file.path(), || false).unwrap();
    processor
}

#[test]
fn test_two_collinear_moves_share_the_ramp() {
    let single = process(config_with_acceleration(500.0), "G1 X10 F1200\n");
    let double = process(config_with_acceleration(500.0), "G1 X10 F1200\nG1 X20 F1200\n");

    let single_time = single.get_time(TimeMode::Normal);
    let double_time = double.get_time(TimeMode::Normal);

    // 10 mm at 20 mm/s without any ramp
    assert!(single_time > 0.5);
    assert!(double_time > 1.0);
    assert!(double_time < 2.0 * single_time);
    assert!(double_time < 1.02);
}

#[test]
fn test_prusaslicer_producer_keeps_native_role_tags() {
    let gcode = "; generated by PrusaSlicer 2.4.0 on 2022-01-01\n\
                 ;TYPE:External perimeter\n\
                 G1 X10 E1 F1200\n\
                 ;TYPE:WALL-OUTER\n\
                 G1 X20 E2\n";
    let processor = process(PrintConfig::default(), gcode);
    let result = processor.get_result();

    assert_eq!(result.producer, Producer::PrusaSlicer);
    assert_eq!(result.moves[0].role, ExtrusionRole::ExternalPerimeter);
    // Cura spelling means nothing to the native grammar
    assert_eq!(result.moves[1].role, ExtrusionRole::None);
}

#[test]
fn test_cura_producer_uses_its_dialect() {
    let gcode = ";FLAVOR:Marlin\n\
                 ;Generated with Cura_SteamEngine 4.8.0\n\
                 ;LAYER:0\n\
                 ;TYPE:WALL-OUTER\n\
                 G1 X10 E1 F1200\n\
                 ;TYPE:SKIN\n\
                 G1 X20 E2\n\
                 ;LAYER:1\n\
                 G1 Z0.4\n\
                 ;TYPE:FILL\n\
                 G1 X0 E3\n";
    let processor = process(PrintConfig::default(), gcode);
    let result = processor.get_result();

    assert_eq!(result.producer, Producer::Cura);
    assert_eq!(result.moves[0].role, ExtrusionRole::ExternalPerimeter);
    assert_eq!(result.moves[1].role, ExtrusionRole::SolidInfill);
    assert_eq!(result.moves[3].role, ExtrusionRole::InternalInfill);
    assert_eq!(result.moves[3].layer_id, 2);
    assert_eq!(processor.get_layers_time(TimeMode::Normal).len(), 2);
}

#[test]
fn test_producer_detection_can_be_disabled() {
    let mut config = PrintConfig::default();
    config.enable_producers = false;
    let gcode = ";Generated with Cura_SteamEngine 4.8.0\n;TYPE:WALL-OUTER\nG1 X10 E1 F1200\n";
    let processor = process(config, gcode);

    assert_eq!(processor.get_result().producer, Producer::Unknown);
    assert_eq!(processor.get_result().moves[0].role, ExtrusionRole::None);
}

#[test]
fn test_bucket_sums_match_total_in_both_modes() {
    let mut config = PrintConfig::default();
    config.enable_stealth_time_estimator = true;
    let gcode = ";LAYER_CHANGE\n\
                 ;TYPE:Perimeter\n\
                 G1 X10 Y5 E1 F1800\n\
                 G1 E0.2\n\
                 G1 X50 F6000\n\
                 G1 E1\n\
                 ;LAYER_CHANGE\n\
                 G1 Z0.4\n\
                 ;TYPE:Solid infill\n\
                 G1 X0 Y0 E4 F1200\n\
                 G4 S2\n\
                 ;COLOR_CHANGE,T0,#112233\n\
                 G1 X30 Y30 E6\n";
    let processor = process(config, gcode);

    for mode in TimeMode::ALL {
        let total = processor.get_time(mode);
        assert!(total > 2.0);
        // stable across calls
        assert_eq!(total, processor.get_time(mode));

        let moves: f64 = processor.get_moves_time(mode).iter().map(|(_, t)| t).sum();
        let layers: f64 = processor.get_layers_time(mode).iter().sum();
        let intervals: f64 = processor
            .get_custom_gcode_times(mode, false)
            .iter()
            .map(|i| i.time)
            .sum();
        assert!((moves - total).abs() < 1e-9, "{mode}: {moves} != {total}");
        assert!((layers - total).abs() < 1e-9, "{mode}: {layers} != {total}");
        assert!((intervals - total).abs() < 1e-9, "{mode}: {intervals} != {total}");

        let stats = processor.get_result().print_statistics.mode(mode);
        assert_eq!(stats.time, total);
    }

    assert!(processor.get_time(TimeMode::Stealth) > processor.get_time(TimeMode::Normal));
    let move_types: Vec<_> = processor
        .get_moves_time(TimeMode::Normal)
        .into_iter()
        .map(|(t, _)| t)
        .collect();
    assert!(move_types.contains(&MoveType::Extrude));
    assert!(move_types.contains(&MoveType::Travel));
    assert!(move_types.contains(&MoveType::Retract));
}

#[test]
fn test_extract_result_is_one_shot() {
    let mut processor = process(PrintConfig::default(), "G1 X10 F1200\nG1 X20 E1\n");

    let first = processor.extract_result();
    assert_eq!(first.moves.len(), 2);
    assert_eq!(first.lines_processed, 2);

    let second = processor.extract_result();
    assert!(second.moves.is_empty());
}

#[test]
fn test_independent_processors_get_distinct_ids() {
    let ids = ResultIdGenerator::new();
    let a = GCodeProcessor::new(PrintConfig::default(), &ids);
    let b = GCodeProcessor::new(PrintConfig::default(), &ids);
    assert_ne!(a.get_result().id, b.get_result().id);
}

#[test]
fn test_result_serializes_to_json() {
    let processor = process(PrintConfig::default(), ";TYPE:Skirt/Brim\nG1 X10 E1 F1200\n");
    let json = serde_json::to_string(processor.get_result()).unwrap();
    assert!(json.contains("\"skirt\""));
    assert!(json.contains("\"print_statistics\""));
}

#[test]
fn test_missing_file_is_reported() {
    let mut processor = GCodeProcessor::new(PrintConfig::default(), &ResultIdGenerator::new());
    let err = processor
        .process_file("/definitely/not/here.gcode", || false)
        .unwrap_err();
    assert!(!err.is_cancelled());
    assert!(err.to_string().contains("here.gcode"));
}
