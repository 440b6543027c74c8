//! The crate-wide error type.
//!
//! Every stable error identifier from the original design is represented as
//! a variant here so callers can match on `kind()`-equivalent behavior via
//! `matches!`. Hard errors (see the module docs on [`crate::session`]) are
//! returned through this type; soft per-function rejections and warnings
//! never reach here — they're logged and swallowed by the caller.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// No counterpart to libelf's one-time `elf_version()` init in this
    /// crate (ELF structures are parsed directly via `scroll`, with no
    /// global backend to initialize), but kept as a stable identifier
    /// for parity with the original design's error surface.
    #[error("could not initialize the ELF backend")]
    ElfInit,

    /// No counterpart to libelf's `elf_memory()` in this crate (the
    /// mapped bytes are read directly), but kept as a stable identifier
    /// for parity with the original design's error surface.
    #[error("could not load ELF data from the mapped file")]
    ElfMemory,

    #[error("could not open file: {0}")]
    FileOpen(#[source] io::Error),

    #[error("could not stat file: {0}")]
    FileStat(#[source] io::Error),

    #[error("could not map file: {0}")]
    Mapping(#[source] io::Error),

    #[error("could not close file: {0}")]
    FileClose(#[source] io::Error),

    #[error("elf header malformed or truncated")]
    ElfHeader,

    #[error("only 64-bit little-endian ELF executables are supported")]
    ElfNotSupported,

    #[error("section header string table index out of range")]
    SectionHeader,

    #[error("no section named {0:?} found")]
    NoSection(String),

    #[error("could not read section data")]
    SectionData,

    #[error("no loadable segment contains address 0x{0:x}")]
    NoSegment(u64),

    #[error("program header malformed or truncated")]
    ProgramHeader,

    #[error("tried to stage a non-loadable (non-PT_LOAD) segment")]
    SegmentNotLoadable,

    #[error("anonymous mapping for the staged code segment failed: {0}")]
    MapFailed(#[source] io::Error),

    #[error("dwarf error: {0}")]
    Dwarf(#[from] gimli::Error),

    #[error("instruction decode/encode failure: {0}")]
    Transform(String),

    /// Generic hard-error catch-all, matching `RAVE__EFATAL`'s role in the
    /// original design: a failure that doesn't fit a more specific variant.
    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("invalid parameter: {0}")]
    Invalid(&'static str),

    #[error("out of memory")]
    NoMemory,
}
