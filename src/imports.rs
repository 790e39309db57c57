//! Import section relocation.
//!
//! The console loader resolves import sections at runtime, so their original
//! addresses are meaningless in a standalone ELF. Every imports-type section
//! is moved into a fixed address window, and the move is propagated into any
//! symbol value or relocation offset that pointed into the old range.

use anyhow::{bail, Context, Result};
use object::elf;

use crate::rpl::{
    encode_rela_entries, encode_symbols, parse_rela_entries, parse_symbols, Rpl, SHT_RPL_IMPORTS,
};
use crate::utils::align_up;

/// Base virtual address of the import window.
pub const IMPORT_BASE_ADDRESS: u32 = 0x0100_0000;

/// Move every imports-type section to the import window, in table order. The
/// cursor is aligned per section and advanced past each placement, so the
/// resulting addresses never overlap.
pub fn relocate_imports(rpl: &mut Rpl) -> Result<()> {
    let mut cursor = IMPORT_BASE_ADDRESS;
    for index in 0..rpl.sections.len() {
        let header = &rpl.sections[index].header;
        if header.sh_type != SHT_RPL_IMPORTS {
            continue;
        }

        let align = header.addralign.max(1);
        if !align.is_power_of_two() {
            bail!("import section {index} has invalid alignment {align}");
        }
        let address = align_up(cursor, align);
        rebase_section(rpl, index, address)
            .with_context(|| format!("error relocating import section {index}"))?;

        let section = &mut rpl.sections[index];
        section.header.flags |= elf::SHF_ALLOC;
        cursor = address + section.data.len() as u32;
        tracing::debug!("placed import section {} ({}) at {:#x}", index, section.name, address);
    }
    Ok(())
}

/// Move section `index` to `new_address` and rewrite every symbol value and
/// relocation offset that referenced its old address range.
///
/// The range check is inclusive at the top: end-of-section symbols legally
/// point one past the last byte and must move with the section.
pub fn rebase_section(rpl: &mut Rpl, index: usize, new_address: u32) -> Result<()> {
    let section = &rpl.sections[index];
    let size = if section.data.is_empty() {
        section.header.size
    } else {
        section.data.len() as u32
    };
    let old_address = section.header.addr;
    let old_end = old_address as u64 + size as u64;

    let in_range = |value: u32| (value as u64) >= old_address as u64 && (value as u64) <= old_end;

    for (i, sym_section) in rpl.sections.iter_mut().enumerate() {
        if sym_section.header.sh_type != elf::SHT_SYMTAB {
            continue;
        }
        let mut symbols = parse_symbols(&sym_section.data)
            .with_context(|| format!("error reading symbols of section {i}"))?;
        let mut changed = false;
        for symbol in &mut symbols {
            if !matches!(symbol.kind(), elf::STT_OBJECT | elf::STT_FUNC | elf::STT_SECTION) {
                continue;
            }
            if in_range(symbol.value) {
                symbol.value = (symbol.value - old_address) + new_address;
                changed = true;
            }
        }
        if changed {
            sym_section.data = encode_symbols(&symbols);
        }
    }

    for (i, rela_section) in rpl.sections.iter_mut().enumerate() {
        if rela_section.header.sh_type != elf::SHT_RELA
            || rela_section.header.info != index as u32
        {
            continue;
        }
        let mut entries = parse_rela_entries(&rela_section.data)
            .with_context(|| format!("error reading relocations of section {i}"))?;
        let mut changed = false;
        for entry in &mut entries {
            if in_range(entry.offset) {
                entry.offset = (entry.offset - old_address) + new_address;
                changed = true;
            }
        }
        if changed {
            rela_section.data = encode_rela_entries(&entries);
        }
    }

    rpl.sections[index].header.addr = new_address;
    Ok(())
}
