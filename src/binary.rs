//! Read-only access to the on-disk ELF executable: header validation,
//! section lookup by name prefix, and segment lookup by contained address.

use std::fs::File;

use memmap2::Mmap;
use scroll::Pread;

use crate::elf::{self, Header, ProgramHeader, SectionHeader};
use crate::strtab::Strtab;
use crate::{Error, Result};

/// A memory-mapped, validated ELF64 x86-64 `ET_EXEC` binary.
pub struct Binary {
    mapping: Mmap,
    header: Header,
}

impl std::fmt::Debug for Binary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binary")
            .field("size", &self.mapping.len())
            .field("entry", &format_args!("0x{:x}", self.header.e_entry))
            .field("phnum", &self.header.e_phnum)
            .field("shnum", &self.header.e_shnum)
            .finish()
    }
}

impl Binary {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let file = File::open(path).map_err(Error::FileOpen)?;
        file.metadata().map_err(Error::FileStat)?;
        let mapping = unsafe { Mmap::map(&file).map_err(Error::Mapping)? };
        let header = elf::parse_header(&mapping)?;
        Ok(Binary { mapping, header })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.mapping
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    fn section_headers(&self) -> Result<Vec<SectionHeader>> {
        let mut out = Vec::with_capacity(self.header.e_shnum as usize);
        for i in 0..self.header.e_shnum as usize {
            let offset = self.header.e_shoff as usize + i * elf::SIZEOF_SHDR;
            let shdr: SectionHeader = self
                .mapping
                .pread_with(offset, scroll::LE)
                .map_err(|_| Error::SectionHeader)?;
            out.push(shdr);
        }
        Ok(out)
    }

    fn program_headers(&self) -> Result<Vec<ProgramHeader>> {
        let mut out = Vec::with_capacity(self.header.e_phnum as usize);
        for i in 0..self.header.e_phnum as usize {
            let offset = self.header.e_phoff as usize + i * elf::SIZEOF_PHDR;
            let phdr: ProgramHeader = self
                .mapping
                .pread_with(offset, scroll::LE)
                .map_err(|_| Error::ProgramHeader)?;
            out.push(phdr);
        }
        Ok(out)
    }

    fn shstrtab(&self) -> Result<Strtab<'_>> {
        let shdrs = self.section_headers()?;
        let shstrndx = self.header.e_shstrndx as usize;
        let strtab_hdr = shdrs.get(shstrndx).ok_or(Error::SectionHeader)?;
        Strtab::parse(
            &self.mapping,
            strtab_hdr.sh_offset as usize,
            strtab_hdr.sh_size as usize,
        )
    }

    /// Finds the first section whose name begins with `target`, matching
    /// the original implementation's prefix comparison rather than an
    /// exact-name match.
    pub fn find_section(&self, target: &str) -> Result<Section<'_>> {
        let shstrtab = self.shstrtab()?;
        for shdr in self.section_headers()? {
            let name = shstrtab.get(shdr.sh_name as usize);
            if name.starts_with(target) {
                let data = if shdr.sh_type == elf::SHT_NOBITS {
                    &[][..]
                } else {
                    self.mapping
                        .get(shdr.sh_offset as usize..(shdr.sh_offset + shdr.sh_size) as usize)
                        .ok_or(Error::SectionData)?
                };
                return Ok(Section {
                    name: name.to_string(),
                    header: shdr,
                    data,
                });
            }
        }
        Err(Error::NoSection(target.to_string()))
    }

    /// Finds the first `PT_LOAD` segment containing `address`. Program
    /// headers that look malformed are skipped with a warning rather than
    /// failing the whole search, matching the original's tolerance.
    pub fn find_segment(&self, address: u64) -> Result<Segment> {
        for phdr in self.program_headers()? {
            if !phdr.is_load() {
                continue;
            }
            if phdr.contains_addr(address) {
                return Ok(Segment { header: phdr });
            }
        }
        Err(Error::NoSegment(address))
    }
}

#[derive(Debug, Clone)]
pub struct Section<'a> {
    pub name: String,
    pub header: SectionHeader,
    pub data: &'a [u8],
}

impl Section<'_> {
    pub fn addr(&self) -> u64 {
        self.header.sh_addr
    }

    pub fn size(&self) -> u64 {
        self.header.sh_size
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub header: ProgramHeader,
}

impl Segment {
    pub fn vaddr(&self) -> u64 {
        self.header.p_vaddr
    }

    pub fn file_offset(&self) -> u64 {
        self.header.p_offset
    }

    pub fn file_size(&self) -> u64 {
        self.header.p_filesz
    }

    pub fn mem_size(&self) -> u64 {
        self.header.p_memsz
    }

    pub fn contains(&self, address: u64) -> bool {
        self.header.contains_addr(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::*;
    use scroll::Pwrite;

    fn build_elf(text_addr: u64, text: &[u8]) -> Vec<u8> {
        let shstrtab_bytes = b"\0.shstrtab\0.text\0";
        let ehdr_size = SIZEOF_EHDR;
        let phdr_off = ehdr_size;
        let phdr_size = SIZEOF_PHDR;
        let text_off = phdr_off + phdr_size;
        let text_len = text.len();
        let shstrtab_off = text_off + text_len;
        let shstrtab_len = shstrtab_bytes.len();
        let shdr_off_align = (shstrtab_off + shstrtab_len + 7) & !7;
        let shdr_off = shdr_off_align;

        let mut buf = vec![0u8; shdr_off + SIZEOF_SHDR * 3];

        let mut ident = [0u8; SIZEOF_IDENT];
        ident[0..4].copy_from_slice(ELFMAG);
        ident[EI_CLASS] = ELFCLASS64;
        ident[EI_DATA] = ELFDATA2LSB;
        let ehdr = Header {
            e_ident: ident,
            e_type: ET_EXEC,
            e_machine: EM_X86_64,
            e_version: 1,
            e_entry: text_addr,
            e_phoff: phdr_off as u64,
            e_shoff: shdr_off as u64,
            e_flags: 0,
            e_ehsize: SIZEOF_EHDR as u16,
            e_phentsize: SIZEOF_PHDR as u16,
            e_phnum: 1,
            e_shentsize: SIZEOF_SHDR as u16,
            e_shnum: 3,
            e_shstrndx: 1,
        };
        buf.as_mut_slice().pwrite_with(ehdr, 0, scroll::LE).unwrap();

        let phdr = ProgramHeader {
            p_type: PT_LOAD,
            p_flags: PF_X | PF_R,
            p_offset: 0,
            p_vaddr: 0,
            p_memsz: (text_addr + text_len as u64).max(0x2000),
            p_filesz: (text_addr + text_len as u64).max(0x2000),
            p_paddr: 0,
            p_align: 0x1000,
        };
        buf.as_mut_slice().pwrite_with(phdr, phdr_off, scroll::LE).unwrap();

        buf[text_off..text_off + text_len].copy_from_slice(text);
        buf[shstrtab_off..shstrtab_off + shstrtab_len].copy_from_slice(shstrtab_bytes);

        let null_shdr = SectionHeader::default();
        buf.as_mut_slice()
            .pwrite_with(null_shdr, shdr_off, scroll::LE)
            .unwrap();

        let shstrtab_shdr = SectionHeader {
            sh_name: 1,
            sh_type: SHT_PROGBITS,
            sh_flags: 0,
            sh_addr: 0,
            sh_offset: shstrtab_off as u64,
            sh_size: shstrtab_len as u64,
            sh_link: 0,
            sh_info: 0,
            sh_addralign: 1,
            sh_entsize: 0,
        };
        buf.as_mut_slice()
            .pwrite_with(shstrtab_shdr, shdr_off + SIZEOF_SHDR, scroll::LE)
            .unwrap();

        let text_shdr = SectionHeader {
            sh_name: 11,
            sh_type: SHT_PROGBITS,
            sh_flags: SHF_ALLOC | SHF_EXECINSTR,
            sh_addr: text_addr,
            sh_offset: text_off as u64,
            sh_size: text_len as u64,
            sh_link: 0,
            sh_info: 0,
            sh_addralign: 1,
            sh_entsize: 0,
        };
        buf.as_mut_slice()
            .pwrite_with(text_shdr, shdr_off + 2 * SIZEOF_SHDR, scroll::LE)
            .unwrap();

        buf
    }

    #[test]
    fn parses_header_and_finds_text_by_prefix() {
        let text = [0x90u8; 16];
        let bytes = build_elf(0x1000, &text);
        let header = elf::parse_header(&bytes).unwrap();
        assert_eq!(header.e_phnum, 1);

        let tmp = std::env::temp_dir().join("segrand_test_bin.elf");
        std::fs::write(&tmp, &bytes).unwrap();
        let binary = Binary::load(&tmp).unwrap();

        let section = binary.find_section(".text").unwrap();
        assert_eq!(section.addr(), 0x1000);
        assert_eq!(section.data, &text[..]);

        let segment = binary.find_segment(0x1000).unwrap();
        assert!(segment.contains(0x1000));
        assert!(!segment.contains(segment.vaddr() + segment.mem_size()));

        std::fs::remove_file(&tmp).ok();
    }

    #[test]
    fn missing_section_is_an_error() {
        let bytes = build_elf(0x1000, &[0x90; 4]);
        let tmp = std::env::temp_dir().join("segrand_test_bin2.elf");
        std::fs::write(&tmp, &bytes).unwrap();
        let binary = Binary::load(&tmp).unwrap();
        assert!(matches!(binary.find_section(".data"), Err(Error::NoSection(_))));
        std::fs::remove_file(&tmp).ok();
    }
}
