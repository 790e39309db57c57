//! Container loading.
//!
//! Reads an RPL image from a byte slice (the caller maps the file), inflating
//! any section whose payload carries the deflated flag, then resolves section
//! names from the section-name string table.

use anyhow::{bail, Context, Result};
use flate2::{Decompress, FlushDecompress, Status};
use object::elf;

use crate::rpl::{FileHeader, Rpl, Section, SectionHeader, SHF_RPL_DEFLATED};

/// Parse a whole container out of `data`.
pub fn read_rpl(data: &[u8]) -> Result<Rpl> {
    let header = FileHeader::parse(data)?;

    let mut sections = Vec::with_capacity(header.shnum as usize);
    for i in 0..header.shnum as usize {
        let section = read_section(data, &header, i)
            .with_context(|| format!("error reading section {i}"))?;
        sections.push(section);
    }

    let mut rpl = Rpl { header, sections };
    resolve_names(&mut rpl)?;
    Ok(rpl)
}

fn read_section(data: &[u8], header: &FileHeader, i: usize) -> Result<Section> {
    let start = header.shoff as usize + header.shentsize as usize * i;
    let entry = data
        .get(start..)
        .with_context(|| format!("section table entry at {start:#x} is out of bounds"))?;
    let mut shdr = SectionHeader::parse(entry)?;

    // No-bits and empty sections carry no payload.
    if shdr.sh_type == elf::SHT_NOBITS || shdr.size == 0 {
        return Ok(Section { header: shdr, data: Vec::new(), name: String::new() });
    }

    let offset = shdr.offset as usize;
    let size = shdr.size as usize;
    let payload = data
        .get(offset..offset + size)
        .with_context(|| format!("section payload {offset:#x}..{:#x} is out of bounds", offset + size))?;

    let buffer = if shdr.flags & SHF_RPL_DEFLATED != 0 {
        // Deflated payload: a 4-byte big-endian inflated size, then a zlib stream.
        if payload.len() < 4 {
            bail!("deflated section is too small to hold a size prefix");
        }
        let inflated_size = u32::from_be_bytes(payload[..4].try_into().unwrap()) as usize;
        // The buffer is plain bytes from here on; the flag would otherwise
        // leak into the output and mark an uncompressed payload as deflated.
        shdr.flags &= !SHF_RPL_DEFLATED;
        inflate(&payload[4..], inflated_size)?
    } else {
        payload.to_vec()
    };

    Ok(Section { header: shdr, data: buffer, name: String::new() })
}

/// Inflate a zlib stream into a buffer of exactly `inflated_size` bytes.
fn inflate(compressed: &[u8], inflated_size: usize) -> Result<Vec<u8>> {
    let mut inflated = Vec::with_capacity(inflated_size);
    let mut decompress = Decompress::new(true);
    let status = decompress
        .decompress_vec(compressed, &mut inflated, FlushDecompress::Finish)
        .context("could not decompress section")?;
    if !matches!(status, Status::Ok | Status::StreamEnd) {
        bail!("could not decompress section: inflate returned {status:?}");
    }
    if inflated.len() != inflated_size {
        bail!(
            "decompressed section is {} bytes, header declares {}",
            inflated.len(),
            inflated_size
        );
    }
    Ok(inflated)
}

/// Resolve every section's name from the string table named by `shstrndx`.
fn resolve_names(rpl: &mut Rpl) -> Result<()> {
    let shstrndx = rpl.header.shstrndx as usize;
    let strtab = rpl
        .sections
        .get(shstrndx)
        .with_context(|| format!("string table index {shstrndx} is out of bounds"))?
        .data
        .clone();

    for (i, section) in rpl.sections.iter_mut().enumerate() {
        section.name = name_at(&strtab, section.header.name)
            .with_context(|| format!("error resolving name of section {i}"))?;
    }
    Ok(())
}

fn name_at(strtab: &[u8], offset: u32) -> Result<String> {
    let bytes = strtab
        .get(offset as usize..)
        .with_context(|| format!("name offset {offset:#x} is past the string table"))?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}
