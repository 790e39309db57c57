//! In-memory model of an RPL/RPX container.
//!
//! An RPL file is a big-endian 32-bit ELF variant: a standard file header and
//! section table, plus a handful of vendor section types and a "deflated"
//! section flag. The container owns every section and its payload; sections
//! refer to each other only by table index, so cross-references survive any
//! buffer rewrite.
//!
//! All on-disk records are decoded into native-endian structs through the
//! `object` crate's fixed-layout ELF types rather than aliased in place.

use anyhow::{anyhow, bail, Result};
use object::elf;
use object::endian::{BigEndian, I32, U16, U32};
use object::pod;

/// Vendor section types used by the RPL loader.
pub const SHT_RPL_EXPORTS: u32 = 0x8000_0001;
pub const SHT_RPL_IMPORTS: u32 = 0x8000_0002;
pub const SHT_RPL_CRCS: u32 = 0x8000_0003;
pub const SHT_RPL_FILEINFO: u32 = 0x8000_0004;

/// Section flag marking a zlib-deflated payload.
pub const SHF_RPL_DEFLATED: u32 = 0x0800_0000;

/// Byte index of the OS ABI field within `e_ident`.
pub const EI_OSABI: usize = 7;

// PowerPC relocation kinds emitted by the RPL toolchain.
pub const R_PPC_DIAB_SDA21_LO: u32 = 180;
pub const R_PPC_DIAB_SDA21_HI: u32 = 181;
pub const R_PPC_DIAB_SDA21_HA: u32 = 182;
pub const R_PPC_DIAB_RELSDA_LO: u32 = 183;
pub const R_PPC_DIAB_RELSDA_HI: u32 = 184;
pub const R_PPC_DIAB_RELSDA_HA: u32 = 185;
pub const R_PPC_GHS_REL16_HI: u32 = 252;
pub const R_PPC_GHS_REL16_LO: u32 = 253;

pub const HEADER_SIZE: usize = core::mem::size_of::<elf::FileHeader32<BigEndian>>();
pub const SECTION_HEADER_SIZE: usize = core::mem::size_of::<elf::SectionHeader32<BigEndian>>();
pub const RELA_ENTRY_SIZE: usize = core::mem::size_of::<elf::Rela32<BigEndian>>();
pub const SYMBOL_ENTRY_SIZE: usize = core::mem::size_of::<elf::Sym32<BigEndian>>();

/// The whole container: file header plus the ordered section table.
/// Index 0 is always the null section.
#[derive(Debug)]
pub struct Rpl {
    pub header: FileHeader,
    pub sections: Vec<Section>,
}

impl Rpl {
    /// Rewrite the two header fields that differ from a standard executable:
    /// the vendor OS ABI byte and the vendor file type.
    pub fn normalize_header(&mut self) {
        self.header.ident[EI_OSABI] = elf::ELFOSABI_NONE;
        self.header.e_type = elf::ET_EXEC;
    }
}

/// Native-endian copy of the ELF32 file header.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub ident: [u8; 16],
    pub e_type: u16,
    pub machine: u16,
    pub version: u32,
    pub entry: u32,
    pub phoff: u32,
    pub shoff: u32,
    pub flags: u32,
    pub ehsize: u16,
    pub phentsize: u16,
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

impl FileHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (raw, _) = pod::from_bytes::<elf::FileHeader32<BigEndian>>(data)
            .map_err(|()| anyhow!("truncated file header ({} bytes)", data.len()))?;

        if raw.e_ident.magic != elf::ELFMAG {
            bail!("invalid ELF magic");
        }

        let mut ident = [0u8; 16];
        ident.copy_from_slice(&data[..16]);

        let e = BigEndian;
        Ok(Self {
            ident,
            e_type: raw.e_type.get(e),
            machine: raw.e_machine.get(e),
            version: raw.e_version.get(e),
            entry: raw.e_entry.get(e),
            phoff: raw.e_phoff.get(e),
            shoff: raw.e_shoff.get(e),
            flags: raw.e_flags.get(e),
            ehsize: raw.e_ehsize.get(e),
            phentsize: raw.e_phentsize.get(e),
            phnum: raw.e_phnum.get(e),
            shentsize: raw.e_shentsize.get(e),
            shnum: raw.e_shnum.get(e),
            shstrndx: raw.e_shstrndx.get(e),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let e = BigEndian;
        let raw = elf::FileHeader32::<BigEndian> {
            e_ident: elf::Ident {
                magic: [self.ident[0], self.ident[1], self.ident[2], self.ident[3]],
                class: self.ident[4],
                data: self.ident[5],
                version: self.ident[6],
                os_abi: self.ident[7],
                abi_version: self.ident[8],
                padding: [
                    self.ident[9],
                    self.ident[10],
                    self.ident[11],
                    self.ident[12],
                    self.ident[13],
                    self.ident[14],
                    self.ident[15],
                ],
            },
            e_type: U16::new(e, self.e_type),
            e_machine: U16::new(e, self.machine),
            e_version: U32::new(e, self.version),
            e_entry: U32::new(e, self.entry),
            e_phoff: U32::new(e, self.phoff),
            e_shoff: U32::new(e, self.shoff),
            e_flags: U32::new(e, self.flags),
            e_ehsize: U16::new(e, self.ehsize),
            e_phentsize: U16::new(e, self.phentsize),
            e_phnum: U16::new(e, self.phnum),
            e_shentsize: U16::new(e, self.shentsize),
            e_shnum: U16::new(e, self.shnum),
            e_shstrndx: U16::new(e, self.shstrndx),
        };
        pod::bytes_of(&raw).to_vec()
    }
}

/// Native-endian copy of an ELF32 section header.
#[derive(Debug, Clone, Default)]
pub struct SectionHeader {
    pub name: u32,
    pub sh_type: u32,
    pub flags: u32,
    pub addr: u32,
    pub offset: u32,
    pub size: u32,
    pub link: u32,
    pub info: u32,
    pub addralign: u32,
    pub entsize: u32,
}

impl SectionHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (raw, _) = pod::from_bytes::<elf::SectionHeader32<BigEndian>>(data)
            .map_err(|()| anyhow!("truncated section header ({} bytes)", data.len()))?;

        let e = BigEndian;
        Ok(Self {
            name: raw.sh_name.get(e),
            sh_type: raw.sh_type.get(e),
            flags: raw.sh_flags.get(e),
            addr: raw.sh_addr.get(e),
            offset: raw.sh_offset.get(e),
            size: raw.sh_size.get(e),
            link: raw.sh_link.get(e),
            info: raw.sh_info.get(e),
            addralign: raw.sh_addralign.get(e),
            entsize: raw.sh_entsize.get(e),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let e = BigEndian;
        let raw = elf::SectionHeader32::<BigEndian> {
            sh_name: U32::new(e, self.name),
            sh_type: U32::new(e, self.sh_type),
            sh_flags: U32::new(e, self.flags),
            sh_addr: U32::new(e, self.addr),
            sh_offset: U32::new(e, self.offset),
            sh_size: U32::new(e, self.size),
            sh_link: U32::new(e, self.link),
            sh_info: U32::new(e, self.info),
            sh_addralign: U32::new(e, self.addralign),
            sh_entsize: U32::new(e, self.entsize),
        };
        pod::bytes_of(&raw).to_vec()
    }
}

/// One section: header, payload (inflated if the source was deflated), and the
/// name resolved from the section-name string table.
#[derive(Debug)]
pub struct Section {
    pub header: SectionHeader,
    pub data: Vec<u8>,
    pub name: String,
}

/// A RELA entry. `info` packs the symbol table index in the high 24 bits and
/// the relocation kind in the low 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rela {
    pub offset: u32,
    pub info: u32,
    pub addend: i32,
}

impl Rela {
    pub fn sym(&self) -> u32 {
        self.info >> 8
    }

    pub fn kind(&self) -> u32 {
        self.info & 0xff
    }
}

/// A symbol table entry. The low nibble of `info` is the symbol type.
#[derive(Debug, Clone, Copy)]
pub struct Symbol {
    pub name: u32,
    pub value: u32,
    pub size: u32,
    pub info: u8,
    pub other: u8,
    pub shndx: u16,
}

impl Symbol {
    pub fn kind(&self) -> u8 {
        self.info & 0xf
    }
}

/// Decode a relocation section's payload. The buffer length must be an exact
/// multiple of the entry size.
pub fn parse_rela_entries(data: &[u8]) -> Result<Vec<Rela>> {
    // An emptied table (every entry dropped) has no backing bytes to cast.
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let count = data.len() / RELA_ENTRY_SIZE;
    let (entries, tail) = pod::slice_from_bytes::<elf::Rela32<BigEndian>>(data, count)
        .map_err(|()| anyhow!("unreadable relocation table"))?;
    if !tail.is_empty() {
        bail!(
            "relocation table size {} is not a multiple of {}",
            data.len(),
            RELA_ENTRY_SIZE
        );
    }

    let e = BigEndian;
    Ok(entries
        .iter()
        .map(|raw| Rela {
            offset: raw.r_offset.get(e),
            info: raw.r_info.get(e),
            addend: raw.r_addend.get(e),
        })
        .collect())
}

pub fn encode_rela_entries(entries: &[Rela]) -> Vec<u8> {
    let e = BigEndian;
    let mut data = Vec::with_capacity(entries.len() * RELA_ENTRY_SIZE);
    for entry in entries {
        let raw = elf::Rela32::<BigEndian> {
            r_offset: U32::new(e, entry.offset),
            r_info: U32::new(e, entry.info),
            r_addend: I32::new(e, entry.addend),
        };
        data.extend_from_slice(pod::bytes_of(&raw));
    }
    data
}

/// Decode a symbol table section's payload.
pub fn parse_symbols(data: &[u8]) -> Result<Vec<Symbol>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let count = data.len() / SYMBOL_ENTRY_SIZE;
    let (entries, tail) = pod::slice_from_bytes::<elf::Sym32<BigEndian>>(data, count)
        .map_err(|()| anyhow!("unreadable symbol table"))?;
    if !tail.is_empty() {
        bail!(
            "symbol table size {} is not a multiple of {}",
            data.len(),
            SYMBOL_ENTRY_SIZE
        );
    }

    let e = BigEndian;
    Ok(entries
        .iter()
        .map(|raw| Symbol {
            name: raw.st_name.get(e),
            value: raw.st_value.get(e),
            size: raw.st_size.get(e),
            info: raw.st_info,
            other: raw.st_other,
            shndx: raw.st_shndx.get(e),
        })
        .collect())
}

pub fn encode_symbols(symbols: &[Symbol]) -> Vec<u8> {
    let e = BigEndian;
    let mut data = Vec::with_capacity(symbols.len() * SYMBOL_ENTRY_SIZE);
    for symbol in symbols {
        let raw = elf::Sym32::<BigEndian> {
            st_name: U32::new(e, symbol.name),
            st_value: U32::new(e, symbol.value),
            st_size: U32::new(e, symbol.size),
            st_info: symbol.info,
            st_other: symbol.other,
            st_shndx: U16::new(e, symbol.shndx),
        };
        data.extend_from_slice(pod::bytes_of(&raw));
    }
    data
}
