//! G-code input handling
//!
//! This module provides:
//! - Line parsing into command and parameter words
//! - Command classification for dispatch
//! - Streaming file reading

pub mod command;
pub mod line;
pub mod reader;

pub use command::{tool_id, Command};
pub use line::GCodeLine;
pub use reader::{FileReadStats, GcodeFileReader, READ_BUFFER_SIZE};
