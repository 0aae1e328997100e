use std::fs;
use std::io::Write;

use gcodestat_core::TimeMode;
use gcodestat_processor::{GCodeProcessor, ReservedTag, ResultIdGenerator};
use gcodestat_settings::PrintConfig;
use tempfile::NamedTempFile;

fn write_gcode(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn annotating_config() -> PrintConfig {
    let mut config = PrintConfig::default();
    config.export_remaining_time_enabled = true;
    config.enable_stealth_time_estimator = true;
    config
}

fn sample_gcode() -> String {
    let mut gcode = String::new();
    gcode.push_str(&ReservedTag::EstimatedPrintingTimePlaceholder.line());
    gcode.push('\n');
    gcode.push_str("G28\n");
    gcode.push_str(&ReservedTag::FirstLineM73Placeholder.line());
    gcode.push('\n');
    for i in 1..=20 {
        gcode.push_str(";LAYER_CHANGE\n");
        gcode.push_str(&format!("G1 Z{:.1} F600\n", i as f64 * 0.2));
        gcode.push_str(&format!("G1 X{} Y{} E{} F1800\n", 20 + i * 5, 10 + i, i));
        if i == 10 {
            gcode.push_str(";COLOR_CHANGE,T0,#ff0000\n");
        }
    }
    gcode.push_str(&ReservedTag::LastLineM73Placeholder.line());
    gcode.push('\n');
    gcode.push_str("M84 ; motors off\n");
    gcode
}

#[test]
fn test_placeholders_are_replaced_in_place() {
    let original = sample_gcode();
    let file = write_gcode(&original);

    let mut processor = GCodeProcessor::new(annotating_config(), &ResultIdGenerator::new());
    processor.process_file(file.path(), || false).unwrap();

    let annotated = fs::read_to_string(file.path()).unwrap();
    assert_eq!(annotated.len(), original.len());
    assert!(!annotated.contains("_GP_"));
    assert!(annotated.starts_with("; estimated time = "));
    assert!(annotated.contains("M73 P0 R"));
    assert!(annotated.contains("M73 P100 R0"));

    // Everything after the last placeholder keeps its offset
    let tail = "M84 ; motors off\n";
    assert!(annotated.ends_with(tail));
    assert_eq!(annotated.rfind(tail), original.rfind(tail));
}

#[test]
fn test_replaced_lines_keep_their_width() {
    let original = sample_gcode();
    let file = write_gcode(&original);

    let mut processor = GCodeProcessor::new(annotating_config(), &ResultIdGenerator::new());
    processor.process_file(file.path(), || false).unwrap();
    let annotated = fs::read(file.path()).unwrap();

    let mut offset = 0;
    for line in original.split_inclusive('\n') {
        let end = offset + line.len();
        if line.starts_with(";_GP_") {
            let replaced = &annotated[offset..end];
            assert_eq!(replaced.len(), line.len());
            assert_eq!(replaced.last(), Some(&b'\n'));
        } else {
            assert_eq!(&annotated[offset..end], line.as_bytes());
        }
        offset = end;
    }
}

#[test]
fn test_post_process_can_run_separately() {
    let original = sample_gcode();
    let file = write_gcode(&original);

    let mut processor = GCodeProcessor::new(PrintConfig::default(), &ResultIdGenerator::new());
    processor.process_file(file.path(), || false).unwrap();
    assert_eq!(fs::read_to_string(file.path()).unwrap(), original);

    let stats = processor.post_process(file.path()).unwrap();
    assert_eq!(stats.placeholders_replaced, 3);
    assert_eq!(stats.lines_read, original.lines().count());

    let marks = processor.time_marks();
    assert_eq!(marks.placeholders.len(), 3);
    assert_eq!(marks.stops.len(), 1);
    assert!(marks.totals[TimeMode::Stealth.index()].is_none());
}

#[test]
fn test_cancellation_leaves_file_untouched() {
    let original = sample_gcode();
    let file = write_gcode(&original);

    let mut config = annotating_config();
    config.processor.cancel_check_interval = 1;
    let mut processor = GCodeProcessor::new(config, &ResultIdGenerator::new());

    let mut polls = 0;
    let err = processor
        .process_file(file.path(), || {
            polls += 1;
            polls > 10
        })
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(polls, 11);
    assert_eq!(fs::read_to_string(file.path()).unwrap(), original);
}

#[test]
fn test_crlf_line_endings_are_preserved() {
    let original = sample_gcode().replace('\n', "\r\n");
    let file = write_gcode(&original);

    let mut processor = GCodeProcessor::new(annotating_config(), &ResultIdGenerator::new());
    processor.process_file(file.path(), || false).unwrap();

    let annotated = fs::read_to_string(file.path()).unwrap();
    assert_eq!(annotated.len(), original.len());
    assert!(annotated.contains("M73 P100 R0\r\nM73 Q100 S0"));
    let bare_lf = annotated
        .match_indices('\n')
        .filter(|(i, _)| !annotated[..*i].ends_with('\r'))
        .count();
    assert_eq!(bare_lf, 0, "mixed line endings: {annotated:?}");
}
