//! # gcodestat
//!
//! Print time estimation and statistics for 3D printer G-code.
//!
//! ## Architecture
//!
//! gcodestat is organized as a workspace with multiple crates:
//!
//! 1. **gcodestat-core** - Axis/move/role types, errors, units, time formatting
//! 2. **gcodestat-settings** - Printer configuration, TOML/JSON persistence
//! 3. **gcodestat-processor** - Line parsing, planner simulation, statistics,
//!    remaining-time annotation
//! 4. **gcodestat** - Command-line binary and logging setup
//!
//! ## Features
//!
//! - **Planner Simulation**: junction jerk, trapezoid profiles, bounded lookahead
//! - **Two Time Modes**: normal and stealth machine limits side by side
//! - **Statistics**: time per move type, role, layer and color change; filament usage
//! - **Slicer Dialects**: PrusaSlicer, Cura, Simplify3D, CraftWare, ideaMaker, KISSlicer
//! - **M73 Annotation**: placeholders rewritten in place without changing file size

pub use gcodestat_core::{
    format_time_dhm, format_time_dhms, CustomGCodeType, Error, ExtrusionRole, MoveType, Result,
    TimeMode,
};
pub use gcodestat_processor::{
    GCodeProcessor, GCodeResult, PrintEstimatedStatistics, Producer, ResultIdGenerator,
};
pub use gcodestat_settings::{default_config_path, PrintConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging
///
/// Logs go to stderr so stdout stays clean for the report. `RUST_LOG`
/// overrides the default level, which is `info`, or `debug` when
/// `verbose` is set. With `json` every event is one JSON object.
pub fn init_logging(verbose: bool, json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let default_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_current_span(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(verbose)
            .with_level(true)
            .with_line_number(verbose);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}
