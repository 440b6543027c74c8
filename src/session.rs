//! The public entry point: load a binary, discover its functions, stage
//! its code segment, analyze it, and serve randomized pages back to a
//! host (a userfaultfd handler, an out-of-process rewriter, or a test
//! harness).

use std::path::Path;

use crate::binary::Binary;
use crate::config::Config;
use crate::metadata::dwarf::DwarfMetadata;
use crate::metadata::MetadataProvider;
use crate::rng;
use crate::staging::CodeStage;
use crate::transform::TransformEngine;
use crate::util::page_down_by;
use crate::{Error, Result};

/// A loaded binary with its code segment staged in writable memory,
/// analyzed and ready to be randomized.
///
/// Dropping a `Session` releases the anonymous staging mapping; there is
/// no explicit `close`, unlike the C handle this design is based on.
pub struct Session {
    binary: Binary,
    stage: CodeStage,
    engine: TransformEngine,
    reloc_offset: i64,
    page_size: u64,
}

impl Session {
    /// Loads `path` with the default [`Config`].
    pub fn init(path: &Path) -> Result<Self> {
        Session::init_with_config(path, Config::default())
    }

    /// Loads `path`, finds `.text` and its containing loadable segment,
    /// stages the segment into writable memory, and analyzes every
    /// function DWARF reports inside `.text`.
    pub fn init_with_config(path: &Path, config: Config) -> Result<Self> {
        log::debug!("initializing session from binary: {}", path.display());

        if let Some(seed) = config.seed {
            rng::seed(seed);
        }

        let binary = Binary::load(path)?;
        let text = binary.find_section(".text")?;
        let segment = binary.find_segment(text.addr())?;
        let stage = CodeStage::new(&binary, &segment, &text, config.page_size)?;
        let mut engine = TransformEngine::new();

        let metadata = DwarfMetadata::new(&binary)?;
        let text_window = stage.text_window();
        metadata.foreach_function(&mut |function| {
            log::debug!("processing function @ 0x{:x}, size = {}", function.addr, function.len);

            if !text_window.contains(function.addr) || !text_window.contains(function.end() - 1) {
                log::warn!("can't modify function @ 0x{:x} - not in text section", function.addr);
                return Ok(());
            }

            let bytes = text_window
                .view(function.addr)
                .ok_or(Error::SectionData)?;
            engine.add_function(function, bytes)
        })?;
        drop(text_window);

        Ok(Session {
            binary,
            stage,
            engine,
            reloc_offset: 0,
            page_size: config.page_size,
        })
    }

    /// Applies a fresh random permutation to every transformable function
    /// in the staged text window.
    pub fn randomize(&mut self) -> Result<()> {
        let mut text_window = self.stage.text_window_mut();
        self.engine.permute_all(&mut text_window)
    }

    /// Records the offset between the staged segment's intended virtual
    /// address and where it was actually placed at `address`, so that
    /// future fault addresses can be translated back into the staging
    /// buffer.
    pub fn relocate(&mut self, address: u64) {
        self.reloc_offset = self.stage.segment_window().orig() as i64 - address as i64;
    }

    /// Given a faulting address in the relocated address space, returns
    /// the page worth of staged bytes that should back it, or `None` if
    /// the address isn't covered by the staged segment or less than a
    /// full page remains.
    pub fn handle_fault(&self, address: u64) -> Option<&[u8]> {
        let translated = (page_down_by(address, self.page_size) as i64 + self.reloc_offset) as u64;
        let segment = self.stage.segment_window();
        if !segment.contains(translated) {
            return None;
        }
        let page = segment.view(translated)?;
        if (page.len() as u64) < self.page_size {
            log::error!("not enough memory in code segment for a full page");
            return None;
        }
        if page.len() as u64 % self.page_size != 0 {
            log::warn!("code segment might be missing data (length mismatch)");
        }
        Some(page)
    }

    /// The entire staged code segment, from its original virtual address.
    pub fn get_code(&self) -> &[u8] {
        self.stage.segment_window().get()
    }

    /// The `.text` sub-range of the staged segment, plus the file offset
    /// it was originally loaded from — useful to a writeback consumer
    /// that needs to splice the rewritten bytes back into the file.
    pub fn get_text(&self) -> TextView<'_> {
        let window = self.stage.text_window();
        TextView {
            data: window.get(),
            addr: window.orig(),
        }
    }

    pub fn binary(&self) -> &Binary {
        &self.binary
    }
}

/// A view of the staged `.text` bytes together with the virtual address
/// they start at.
pub struct TextView<'a> {
    pub data: &'a [u8],
    pub addr: u64,
}
