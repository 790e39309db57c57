//! Section file layout.
//!
//! Assigns every section a file offset immediately after the section header
//! table, grouped the way the console loader builds its load segments: CRCs,
//! file-info, writable data, read-only data, imports, code, then non-resident
//! temp data. Within a group, sections keep their table order. Each placement
//! also rewrites the header size from the current buffer, since earlier
//! stages may have inflated or shrunk payloads.

use anyhow::{bail, Result};
use object::elf;

use crate::rpl::{
    Rpl, Section, SectionHeader, SECTION_HEADER_SIZE, SHT_RPL_CRCS, SHT_RPL_EXPORTS,
    SHT_RPL_FILEINFO, SHT_RPL_IMPORTS,
};
use crate::utils::align_up;

/// Types placed by their own dedicated pass, or carrying no file bytes. The
/// flag-group passes skip these.
fn is_special(sh_type: u32) -> bool {
    matches!(
        sh_type,
        SHT_RPL_FILEINFO | SHT_RPL_IMPORTS | SHT_RPL_CRCS | elf::SHT_NOBITS
    )
}

fn place(section: &mut Section, offset: &mut u32) {
    section.header.offset = *offset;
    section.header.size = section.data.len() as u32;
    *offset += section.header.size;
}

fn place_by_type(rpl: &mut Rpl, sh_type: u32, offset: &mut u32) {
    for section in rpl.sections.iter_mut() {
        if section.header.sh_type == sh_type {
            place(section, offset);
        }
    }
}

fn place_group(rpl: &mut Rpl, offset: &mut u32, pred: impl Fn(&SectionHeader) -> bool) {
    for section in rpl.sections.iter_mut() {
        if section.header.size == 0 || is_special(section.header.sh_type) {
            continue;
        }
        if pred(&section.header) {
            place(section, offset);
        }
    }
}

/// Assign file offsets to all sections.
pub fn calculate_section_offsets(rpl: &mut Rpl) -> Result<()> {
    let table_size = (rpl.sections.len() * SECTION_HEADER_SIZE) as u32;
    let mut offset = rpl.header.shoff + align_up(table_size, 64);

    for section in rpl.sections.iter_mut() {
        if matches!(section.header.sh_type, elf::SHT_NOBITS | elf::SHT_NULL) {
            section.header.offset = 0;
            section.data.clear();
        }
    }

    place_by_type(rpl, SHT_RPL_CRCS, &mut offset);
    place_by_type(rpl, SHT_RPL_FILEINFO, &mut offset);

    // Data segment: writable, allocated, not executable.
    place_group(rpl, &mut offset, |h| {
        h.flags & elf::SHF_EXECINSTR == 0
            && h.flags & elf::SHF_WRITE != 0
            && h.flags & elf::SHF_ALLOC != 0
    });

    // Read-only segment. Export sections carry the exec flag but the loader
    // maps them read-only.
    place_group(rpl, &mut offset, |h| {
        (h.flags & elf::SHF_EXECINSTR == 0 || h.sh_type == SHT_RPL_EXPORTS)
            && h.flags & elf::SHF_WRITE == 0
            && h.flags & elf::SHF_ALLOC != 0
    });

    // Imports sit right after the read-only segment despite their exec flag.
    place_by_type(rpl, SHT_RPL_IMPORTS, &mut offset);

    // Code segment.
    place_group(rpl, &mut offset, |h| {
        h.flags & elf::SHF_EXECINSTR != 0 && h.sh_type != SHT_RPL_EXPORTS
    });

    // Temp data: present in the file but never loaded.
    place_group(rpl, &mut offset, |h| {
        h.flags & elf::SHF_EXECINSTR == 0 && h.flags & elf::SHF_ALLOC == 0
    });

    for (index, section) in rpl.sections.iter().enumerate() {
        if section.header.offset == 0
            && !matches!(section.header.sh_type, elf::SHT_NULL | elf::SHT_NOBITS)
        {
            bail!("failed to calculate a file offset for section {index}");
        }
    }

    Ok(())
}
