//! gcodestat CLI
//!
//! Estimates the print time of a G-code file and prints its statistics.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use gcodestat::{
    format_time_dhms, init_logging, GCodeProcessor, GCodeResult, PrintConfig,
    PrintEstimatedStatistics, ResultIdGenerator, TimeMode, BUILD_DATE, VERSION,
};
use gcodestat_processor::{filament_area, ReservedTagWarning};

#[derive(Parser)]
#[command(name = "gcodestat")]
#[command(about = "Estimate print time and filament usage of a G-code file", long_about = None)]
#[command(version = VERSION)]
struct Cli {
    /// G-code file to analyse
    file: PathBuf,

    /// Printer config (.toml or .json); defaults to the user config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Rewrite the M73 placeholders of the file in place
    #[arg(short, long)]
    annotate: bool,

    /// Print the statistics as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit log events as JSON
    #[arg(long)]
    log_json: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    file: &'a Path,
    producer: String,
    moves: usize,
    lines: usize,
    statistics: &'a PrintEstimatedStatistics,
    extruders: Vec<ExtruderUsage>,
    reserved_tag_warnings: &'a [ReservedTagWarning],
}

#[derive(Serialize)]
struct ExtruderUsage {
    id: usize,
    volume_mm3: f64,
    length_m: f64,
    mass_g: f64,
}

fn extruder_usage(result: &GCodeResult) -> Vec<ExtruderUsage> {
    let used = &result.print_statistics.used_filaments;
    used.volumes_per_extruder
        .iter()
        .map(|(&id, &volume)| {
            let diameter = result.filament_diameters.get(id).copied().unwrap_or(1.75);
            let density = result.filament_densities.get(id).copied().unwrap_or(0.0);
            let area = filament_area(diameter);
            ExtruderUsage {
                id,
                volume_mm3: volume,
                length_m: if area > 0.0 { volume / area * 0.001 } else { 0.0 },
                // g/cm³ to g/mm³
                mass_g: volume * density * 0.001,
            }
        })
        .collect()
}

fn load_config(path: Option<&Path>) -> Result<PrintConfig> {
    match path {
        Some(path) => PrintConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => PrintConfig::load_default_location().context("Failed to load default config"),
    }
}

fn print_summary(processor: &GCodeProcessor, file: &Path) {
    let result = processor.get_result();
    let stats = &result.print_statistics;

    println!("File:     {}", file.display());
    println!("Producer: {}", result.producer);
    println!("Moves:    {} ({} lines)", result.moves.len(), result.lines_processed);

    let modes: &[TimeMode] = if processor.config().enable_stealth_time_estimator {
        &TimeMode::ALL
    } else {
        &[TimeMode::Normal]
    };

    for &mode in modes {
        let mode_stats = stats.mode(mode);
        println!();
        println!("Estimated time ({mode}): {}", format_time_dhms(mode_stats.time));

        if !mode_stats.custom_gcode_times.is_empty() {
            println!("  Intervals:");
            for interval in &mode_stats.custom_gcode_times {
                println!(
                    "    {:<16} {:>12}  (remaining {})",
                    interval.kind.to_string(),
                    format_time_dhms(interval.time),
                    format_time_dhms(interval.remaining)
                );
            }
        }

        println!("  By move type:");
        for (kind, time) in &mode_stats.moves_times {
            println!("    {:<16} {:>12}", kind.to_string(), format_time_dhms(*time));
        }

        if !mode_stats.roles_times.is_empty() {
            println!("  By feature:");
            for (role, time) in &mode_stats.roles_times {
                println!("    {:<28} {:>12}", role.to_string(), format_time_dhms(*time));
            }
        }

        let layers = &mode_stats.layers_times;
        if !layers.is_empty() {
            let (min, max) = layers
                .iter()
                .fold((f64::INFINITY, 0.0_f64), |(lo, hi), t| (lo.min(*t), hi.max(*t)));
            println!(
                "  Layers: {}  (min {}, max {})",
                layers.len(),
                format_time_dhms(min),
                format_time_dhms(max)
            );
        }
    }

    let usage = extruder_usage(result);
    if !usage.is_empty() {
        println!();
        println!("Filament:");
        for extruder in &usage {
            println!(
                "  T{}: {:.2} m, {:.2} cm³, {:.2} g",
                extruder.id,
                extruder.length_m,
                extruder.volume_mm3 * 0.001,
                extruder.mass_g
            );
        }
        if stats.used_filaments.volumes_per_color_change.len() > 1 {
            for (index, volume) in stats.used_filaments.volumes_per_color_change.iter().enumerate() {
                println!("  Color {}: {:.2} cm³", index + 1, volume * 0.001);
            }
        }
    }

    for warning in &result.reserved_tag_warnings {
        println!("Warning: {warning}");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json)?;
    tracing::debug!(version = VERSION, build_date = BUILD_DATE, "Starting gcodestat");

    let mut config = load_config(cli.config.as_deref())?;
    if cli.annotate {
        config.export_remaining_time_enabled = true;
    }

    let ids = ResultIdGenerator::new();
    let mut processor = GCodeProcessor::new(config, &ids);
    processor
        .process_file(&cli.file, || false)
        .with_context(|| format!("Failed to process {}", cli.file.display()))?;

    if cli.json {
        let result = processor.get_result();
        let report = Report {
            file: &cli.file,
            producer: result.producer.to_string(),
            moves: result.moves.len(),
            lines: result.lines_processed,
            statistics: &result.print_statistics,
            extruders: extruder_usage(result),
            reserved_tag_warnings: &result.reserved_tag_warnings,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&processor, &cli.file);
    }

    Ok(())
}
