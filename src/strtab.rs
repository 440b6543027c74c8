//! A byte-offset indexed string table, the layout ELF uses for section and
//! symbol names.

use core::fmt;
use core::str;
use scroll::{ctx, Pread};

/// A string table indexed by byte offset (not element index).
pub struct Strtab<'a> {
    bytes: &'a [u8],
    delim: ctx::StrCtx,
}

#[inline(always)]
fn get_str(idx: usize, bytes: &[u8], delim: ctx::StrCtx) -> &str {
    bytes.pread_with::<&str>(idx, delim).unwrap_or("")
}

impl<'a> Strtab<'a> {
    pub fn new(bytes: &'a [u8], delim: u8) -> Self {
        Strtab {
            bytes,
            delim: ctx::StrCtx::from(delim),
        }
    }

    /// Carve a string table out of a larger buffer at `offset..offset+len`.
    pub fn parse(bytes: &'a [u8], offset: usize, len: usize) -> crate::Result<Strtab<'a>> {
        let slice = bytes
            .get(offset..offset + len)
            .ok_or(crate::Error::SectionData)?;
        Ok(Strtab::new(slice, 0x0))
    }

    pub fn get(&self, idx: usize) -> &'a str {
        get_str(idx, self.bytes, self.delim)
    }
}

impl fmt::Debug for Strtab<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Strtab({} bytes)", self.bytes.len())
    }
}
