//! Relocation repair.
//!
//! RPL relocation sections mix standard PowerPC relocations with toolchain
//! kinds a normal ELF consumer cannot use. Each RELA section is rewritten:
//! recognized kinds pass through, GHS_REL16 hi/lo pairs are merged into a
//! single R_PPC_REL32, and anything else is dropped with a warning. Dropped
//! entries are the only soft failure in the pipeline.

use anyhow::{Context, Result};
use object::elf;

use crate::rpl::{
    encode_rela_entries, parse_rela_entries, Rela, Rpl, R_PPC_DIAB_RELSDA_HA,
    R_PPC_DIAB_RELSDA_HI, R_PPC_DIAB_RELSDA_LO, R_PPC_DIAB_SDA21_HA, R_PPC_DIAB_SDA21_HI,
    R_PPC_DIAB_SDA21_LO, R_PPC_GHS_REL16_HI, R_PPC_GHS_REL16_LO,
};

/// Relocation kinds that are valid in a standard ELF and pass through as-is.
fn is_supported(kind: u32) -> bool {
    matches!(
        kind,
        elf::R_PPC_NONE
            | elf::R_PPC_ADDR32
            | elf::R_PPC_ADDR16_LO
            | elf::R_PPC_ADDR16_HI
            | elf::R_PPC_ADDR16_HA
            | elf::R_PPC_REL24
            | elf::R_PPC_REL14
            | elf::R_PPC_DTPMOD32
            | elf::R_PPC_DTPREL32
            | elf::R_PPC_EMB_SDA21
            | elf::R_PPC_EMB_RELSDA
            | R_PPC_DIAB_SDA21_LO
            | R_PPC_DIAB_SDA21_HI
            | R_PPC_DIAB_SDA21_HA
            | R_PPC_DIAB_RELSDA_LO
            | R_PPC_DIAB_RELSDA_HI
            | R_PPC_DIAB_RELSDA_HA
    )
}

/// Rewrite every RELA section in place.
pub fn fix_relocations(rpl: &mut Rpl) -> Result<()> {
    for (index, section) in rpl.sections.iter_mut().enumerate() {
        if section.header.sh_type != elf::SHT_RELA {
            continue;
        }

        // RPL flag bits on relocation sections mean nothing to standard tools.
        section.header.flags = 0;

        let entries = parse_rela_entries(&section.data)
            .with_context(|| format!("error reading relocations of section {index}"))?;
        let fixed = fix_entries(&entries);
        section.data = encode_rela_entries(&fixed);
    }
    Ok(())
}

/// One forward scan over the original entries. A merge consumes its partner
/// wherever it sits in the array, so a parallel consumed set keeps the later
/// visit from emitting the pair twice.
fn fix_entries(entries: &[Rela]) -> Vec<Rela> {
    let mut fixed = Vec::with_capacity(entries.len());
    let mut consumed = vec![false; entries.len()];

    for i in 0..entries.len() {
        if consumed[i] {
            continue;
        }
        let entry = entries[i];
        if entry.info == 0 && entry.addend == 0 && entry.offset == 0 {
            continue;
        }

        let kind = entry.kind();
        if is_supported(kind) {
            fixed.push(entry);
            continue;
        }

        match kind {
            // A GHS_REL16 pair encodes one 32-bit PC-relative patch as two
            // 16-bit halves whose addend and offset differ by exactly 2.
            // Either half may be reached first.
            R_PPC_GHS_REL16_HI => {
                let partner = Rela {
                    offset: entry.offset.wrapping_add(2),
                    info: (entry.sym() << 8) | R_PPC_GHS_REL16_LO,
                    addend: entry.addend.wrapping_add(2),
                };
                match find_partner(entries, &consumed, &partner) {
                    Some(j) => {
                        consumed[j] = true;
                        fixed.push(merged(entry.sym(), entry.offset, entry.addend));
                        tracing::debug!(
                            "merged GHS_REL16 pair at {:#x} into R_PPC_REL32",
                            entry.offset
                        );
                    }
                    None => tracing::warn!(
                        "GHS_REL16_HI at {:#x} has no matching low half, dropping",
                        entry.offset
                    ),
                }
            }
            R_PPC_GHS_REL16_LO => {
                let partner = Rela {
                    offset: entry.offset.wrapping_sub(2),
                    info: (entry.sym() << 8) | R_PPC_GHS_REL16_HI,
                    addend: entry.addend.wrapping_sub(2),
                };
                match find_partner(entries, &consumed, &partner) {
                    Some(j) => {
                        consumed[j] = true;
                        fixed.push(merged(
                            entry.sym(),
                            entry.offset.wrapping_sub(2),
                            entry.addend.wrapping_sub(2),
                        ));
                        tracing::debug!(
                            "merged GHS_REL16 pair at {:#x} into R_PPC_REL32",
                            entry.offset.wrapping_sub(2)
                        );
                    }
                    None => tracing::warn!(
                        "GHS_REL16_LO at {:#x} has no matching high half, dropping",
                        entry.offset
                    ),
                }
            }
            _ => tracing::warn!("unknown relocation kind {} at {:#x}, dropping", kind, entry.offset),
        }
    }

    fixed
}

fn find_partner(entries: &[Rela], consumed: &[bool], want: &Rela) -> Option<usize> {
    entries
        .iter()
        .enumerate()
        .position(|(j, entry)| !consumed[j] && entry == want)
}

fn merged(sym: u32, offset: u32, addend: i32) -> Rela {
    Rela { offset, info: (sym << 8) | elf::R_PPC_REL32, addend }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpl::{Section, SectionHeader, SHF_RPL_DEFLATED};

    fn rela(kind: u32, sym: u32, offset: u32, addend: i32) -> Rela {
        Rela { offset, info: (sym << 8) | kind, addend }
    }

    fn rela_rpl(entries: &[Rela]) -> Rpl {
        let header = {
            // Only the section list matters to the fixer.
            let mut ident = [0u8; 16];
            ident[..4].copy_from_slice(&elf::ELFMAG);
            crate::rpl::FileHeader {
                ident,
                e_type: 0xfe01,
                machine: elf::EM_PPC,
                version: 1,
                entry: 0,
                phoff: 0,
                shoff: 0x34,
                flags: 0,
                ehsize: 0x34,
                phentsize: 0,
                phnum: 0,
                shentsize: 40,
                shnum: 2,
                shstrndx: 0,
            }
        };
        let null = Section {
            header: SectionHeader::default(),
            data: Vec::new(),
            name: String::new(),
        };
        let rela = Section {
            header: SectionHeader {
                sh_type: elf::SHT_RELA,
                flags: SHF_RPL_DEFLATED,
                link: 1,
                info: 1,
                ..Default::default()
            },
            data: encode_rela_entries(entries),
            name: ".rela.text".into(),
        };
        Rpl { header, sections: vec![null, rela] }
    }

    fn fixed_entries(rpl: &Rpl) -> Vec<Rela> {
        parse_rela_entries(&rpl.sections[1].data).unwrap()
    }

    #[test]
    fn supported_kinds_pass_through() {
        let entries = vec![
            rela(elf::R_PPC_ADDR32, 3, 0x100, 0),
            rela(elf::R_PPC_REL24, 4, 0x104, -8),
            rela(R_PPC_DIAB_SDA21_LO, 5, 0x108, 4),
        ];
        let mut rpl = rela_rpl(&entries);
        fix_relocations(&mut rpl).unwrap();
        assert_eq!(fixed_entries(&rpl), entries);
    }

    #[test]
    fn clears_section_flags() {
        let mut rpl = rela_rpl(&[rela(elf::R_PPC_ADDR32, 1, 0x10, 0)]);
        fix_relocations(&mut rpl).unwrap();
        assert_eq!(rpl.sections[1].header.flags, 0);
    }

    #[test]
    fn merges_high_half_first() {
        let mut rpl = rela_rpl(&[
            rela(R_PPC_GHS_REL16_HI, 5, 0x2000, 0x100),
            rela(R_PPC_GHS_REL16_LO, 5, 0x2002, 0x102),
        ]);
        fix_relocations(&mut rpl).unwrap();
        assert_eq!(fixed_entries(&rpl), vec![rela(elf::R_PPC_REL32, 5, 0x2000, 0x100)]);
    }

    #[test]
    fn merges_low_half_first() {
        let mut rpl = rela_rpl(&[
            rela(R_PPC_GHS_REL16_LO, 5, 0x2002, 0x102),
            rela(R_PPC_GHS_REL16_HI, 5, 0x2000, 0x100),
        ]);
        fix_relocations(&mut rpl).unwrap();
        assert_eq!(fixed_entries(&rpl), vec![rela(elf::R_PPC_REL32, 5, 0x2000, 0x100)]);
    }

    #[test]
    fn halves_of_different_symbols_do_not_merge() {
        let mut rpl = rela_rpl(&[
            rela(R_PPC_GHS_REL16_HI, 5, 0x2000, 0x100),
            rela(R_PPC_GHS_REL16_LO, 6, 0x2002, 0x102),
        ]);
        fix_relocations(&mut rpl).unwrap();
        assert!(fixed_entries(&rpl).is_empty());
    }

    #[test]
    fn unmatched_half_is_dropped_not_fatal() {
        let mut rpl = rela_rpl(&[
            rela(elf::R_PPC_ADDR32, 1, 0x10, 0),
            rela(R_PPC_GHS_REL16_HI, 5, 0x2000, 0x100),
        ]);
        fix_relocations(&mut rpl).unwrap();
        assert_eq!(fixed_entries(&rpl), vec![rela(elf::R_PPC_ADDR32, 1, 0x10, 0)]);
    }

    #[test]
    fn unknown_kind_is_dropped() {
        let mut rpl = rela_rpl(&[
            rela(200, 1, 0x10, 0),
            rela(elf::R_PPC_ADDR16_HA, 2, 0x20, 0),
        ]);
        fix_relocations(&mut rpl).unwrap();
        assert_eq!(fixed_entries(&rpl), vec![rela(elf::R_PPC_ADDR16_HA, 2, 0x20, 0)]);
    }

    #[test]
    fn zero_sentinels_are_skipped() {
        let mut rpl = rela_rpl(&[
            Rela { offset: 0, info: 0, addend: 0 },
            rela(elf::R_PPC_ADDR32, 1, 0x10, 0),
        ]);
        fix_relocations(&mut rpl).unwrap();
        assert_eq!(fixed_entries(&rpl), vec![rela(elf::R_PPC_ADDR32, 1, 0x10, 0)]);
    }

    #[test]
    fn two_pairs_merge_independently() {
        let mut rpl = rela_rpl(&[
            rela(R_PPC_GHS_REL16_HI, 5, 0x2000, 0x100),
            rela(R_PPC_GHS_REL16_HI, 5, 0x3000, 0x200),
            rela(R_PPC_GHS_REL16_LO, 5, 0x3002, 0x202),
            rela(R_PPC_GHS_REL16_LO, 5, 0x2002, 0x102),
        ]);
        fix_relocations(&mut rpl).unwrap();
        assert_eq!(
            fixed_entries(&rpl),
            vec![
                rela(elf::R_PPC_REL32, 5, 0x2000, 0x100),
                rela(elf::R_PPC_REL32, 5, 0x3000, 0x200),
            ]
        );
    }

    #[test]
    fn dropping_every_entry_leaves_a_decodable_empty_table() {
        let mut rpl = rela_rpl(&[rela(R_PPC_GHS_REL16_HI, 5, 0x2000, 0x100)]);
        fix_relocations(&mut rpl).unwrap();
        assert!(rpl.sections[1].data.is_empty());
        // Later stages re-read the emptied table; it must still decode.
        assert!(fixed_entries(&rpl).is_empty());
    }

    #[test]
    fn non_rela_sections_are_untouched() {
        let mut rpl = rela_rpl(&[rela(elf::R_PPC_ADDR32, 1, 0x10, 0)]);
        rpl.sections[1].header.sh_type = elf::SHT_PROGBITS;
        let before = rpl.sections[1].data.clone();
        fix_relocations(&mut rpl).unwrap();
        assert_eq!(rpl.sections[1].data, before);
        assert_eq!(rpl.sections[1].header.flags, SHF_RPL_DEFLATED);
    }
}
