//! Entry point for the rpl2elf converter.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap`.
//! 2. Map the source container into memory.
//! 3. Execute the conversion stages: load, normalize header, fix relocations,
//!    relocate imports, lay out sections, write.
//!
//! Error handling is done via `anyhow`.

use anyhow::{Context, Result};
use clap::Parser;
use memmap2::Mmap;
use std::fs::File;

use rpl2elf::config::Config;
use rpl2elf::{imports, layout, loader, relocation, writer};

fn main() -> Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let file = File::open(&config.src)
        .with_context(|| format!("could not open {} for reading", config.src.display()))?;
    let mmap = unsafe { Mmap::map(&file)? };

    let mut rpl = loader::read_rpl(&mmap)
        .with_context(|| format!("failed to read {}", config.src.display()))?;

    rpl.normalize_header();
    relocation::fix_relocations(&mut rpl)?;
    imports::relocate_imports(&mut rpl)?;
    layout::calculate_section_offsets(&mut rpl)?;
    writer::write_elf(&rpl, &config.dst)?;

    println!("Converted successfully to {}", config.dst.display());
    Ok(())
}
