//! ELF64 on-disk structures and the constants this crate cares about.
//!
//! Field layouts mirror the 64-bit ELF structures byte for byte; only
//! little-endian, x86-64, `ET_EXEC` binaries are in scope, so the 32-bit
//! accessor layer the format otherwise needs is deliberately absent.

use scroll::{Pread, Pwrite, SizeWith};

pub const SIZEOF_IDENT: usize = 16;
pub const ELFMAG: &[u8; 4] = b"\x7FELF";
pub const SELFMAG: usize = 4;

pub const EI_CLASS: usize = 4;
pub const ELFCLASS64: u8 = 2;

pub const EI_DATA: usize = 5;
pub const ELFDATA2LSB: u8 = 1;

pub const ET_EXEC: u16 = 2;

pub const EM_X86_64: u16 = 62;

pub const PT_NULL: u32 = 0;
pub const PT_LOAD: u32 = 1;

pub const PF_X: u32 = 1 << 0;
pub const PF_W: u32 = 1 << 1;
pub const PF_R: u32 = 1 << 2;

pub const SHT_NULL: u32 = 0;
pub const SHT_NOBITS: u32 = 8;

pub const SHF_WRITE: u64 = 1 << 0;
pub const SHF_ALLOC: u64 = 1 << 1;
pub const SHF_EXECINSTR: u64 = 1 << 2;

pub const SIZEOF_EHDR: usize = 64;
pub const SIZEOF_PHDR: usize = 56;
pub const SIZEOF_SHDR: usize = 64;

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct Header {
    pub e_ident: [u8; SIZEOF_IDENT],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Pread, Pwrite, SizeWith)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

impl ProgramHeader {
    pub fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }

    pub fn contains_addr(&self, addr: u64) -> bool {
        crate::util::contains(addr, self.p_vaddr, self.p_vaddr + self.p_memsz)
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Pread, Pwrite, SizeWith)]
pub struct SectionHeader {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub sh_addr: u64,
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    pub sh_entsize: u64,
}

impl SectionHeader {
    pub fn is_alloc(&self) -> bool {
        self.sh_flags & SHF_ALLOC != 0
    }

    pub fn is_exec(&self) -> bool {
        self.sh_flags & SHF_EXECINSTR != 0
    }
}

pub fn parse_header(bytes: &[u8]) -> crate::Result<Header> {
    let ident = bytes
        .get(0..SIZEOF_IDENT)
        .ok_or(crate::Error::ElfHeader)?;
    if &ident[0..SELFMAG] != ELFMAG {
        return Err(crate::Error::ElfHeader);
    }
    if ident[EI_CLASS] != ELFCLASS64 || ident[EI_DATA] != ELFDATA2LSB {
        return Err(crate::Error::ElfNotSupported);
    }
    let header: Header = bytes
        .pread_with(0, scroll::LE)
        .map_err(|_| crate::Error::ElfHeader)?;
    if header.e_type != ET_EXEC || header.e_machine != EM_X86_64 {
        return Err(crate::Error::ElfNotSupported);
    }
    Ok(header)
}
