//! Configuration module.
//!
//! This module defines the command-line interface (CLI) for the converter
//! using `clap`. The core pipeline never sees the raw argument vector, only
//! the two resolved paths.

use clap::Parser;
use std::path::PathBuf;

/// Convert a Wii U RPL/RPX file into a standard ELF executable.
///
/// Decompresses deflated sections, repairs vendor relocations, moves import
/// sections to a fixed address window, and lays the file out the way the
/// console loader expects.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Path to the input RPL/RPX file
    pub src: PathBuf,

    /// Path to the output ELF file
    pub dst: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", help = "Set the logging level")]
    pub log_level: String,
}
