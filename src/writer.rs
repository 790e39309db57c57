//! ELF file writer.
//!
//! Serializes the header at offset 0, the section header table at `shoff`,
//! and each non-empty payload at its planned offset. Offsets need not be
//! contiguous; gaps are zero-filled.

use anyhow::{Context, Result};
use std::path::Path;

use crate::rpl::Rpl;

/// Build the output image in memory.
pub fn build_elf(rpl: &Rpl) -> Vec<u8> {
    let mut buffer = Vec::new();

    write_at(&mut buffer, 0, &rpl.header.encode());

    let mut table = Vec::new();
    for section in &rpl.sections {
        table.extend_from_slice(&section.header.encode());
    }
    write_at(&mut buffer, rpl.header.shoff as usize, &table);

    for section in &rpl.sections {
        if !section.data.is_empty() {
            write_at(&mut buffer, section.header.offset as usize, &section.data);
        }
    }

    buffer
}

/// Write the final ELF to disk.
pub fn write_elf(rpl: &Rpl, output_path: &Path) -> Result<()> {
    let buffer = build_elf(rpl);
    std::fs::write(output_path, &buffer)
        .with_context(|| format!("could not write {}", output_path.display()))
}

fn write_at(buffer: &mut Vec<u8>, offset: usize, bytes: &[u8]) {
    let end = offset + bytes.len();
    if buffer.len() < end {
        buffer.resize(end, 0);
    }
    buffer[offset..end].copy_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpl::{FileHeader, Section, SectionHeader, HEADER_SIZE, SECTION_HEADER_SIZE};
    use object::elf;

    fn minimal_rpl() -> Rpl {
        let mut ident = [0u8; 16];
        ident[..4].copy_from_slice(&elf::ELFMAG);
        ident[4] = elf::ELFCLASS32;
        ident[5] = elf::ELFDATA2MSB;
        ident[6] = elf::EV_CURRENT;
        let header = FileHeader {
            ident,
            e_type: elf::ET_EXEC,
            machine: elf::EM_PPC,
            version: 1,
            entry: 0,
            phoff: 0,
            shoff: 0x40,
            flags: 0,
            ehsize: HEADER_SIZE as u16,
            phentsize: 0,
            phnum: 0,
            shentsize: SECTION_HEADER_SIZE as u16,
            shnum: 2,
            shstrndx: 0,
        };
        let payload = Section {
            header: SectionHeader {
                sh_type: elf::SHT_PROGBITS,
                offset: 0x100,
                size: 4,
                ..Default::default()
            },
            data: vec![0xde, 0xad, 0xbe, 0xef],
            name: String::new(),
        };
        let null = Section {
            header: SectionHeader::default(),
            data: Vec::new(),
            name: String::new(),
        };
        Rpl { header, sections: vec![null, payload] }
    }

    #[test]
    fn places_header_table_and_payloads_with_gaps() {
        let image = build_elf(&minimal_rpl());

        assert_eq!(&image[..4], &elf::ELFMAG);
        // Section table at shoff, payload at its own offset, gap zero-filled.
        assert_eq!(image.len(), 0x104);
        assert_eq!(&image[0x100..], &[0xde, 0xad, 0xbe, 0xef]);
        assert!(image[0x40 + 2 * SECTION_HEADER_SIZE..0x100].iter().all(|&b| b == 0));
    }

    #[test]
    fn output_reparses() {
        let image = build_elf(&minimal_rpl());
        let reread = crate::loader::read_rpl(&image).unwrap();
        assert_eq!(reread.sections.len(), 2);
        assert_eq!(reread.sections[1].data, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn unwritable_destination_is_an_error() {
        let rpl = minimal_rpl();
        let path = Path::new("/nonexistent-dir/out.elf");
        let err = write_elf(&rpl, path).unwrap_err();
        assert!(format!("{err:#}").contains("could not write"));
    }
}
