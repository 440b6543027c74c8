//! Staging the loadable code segment into writable memory.
//!
//! The whole `PT_LOAD` segment containing `.text` is staged, not just the
//! section — serving page faults out of one contiguous mapping avoids
//! juggling fragmented regions. A text-sized sub-slice of the same buffer
//! doubles as the view the transform engine rewrites:
//!
//! ```text
//! +---------+------+-----+----------------+
//! |   seg   | text | seg |      zero      |
//! +---------+------+-----+----------------+
//! ```
//!
//! Rather than keeping a `Window` for the segment and another aliasing one
//! for the text range as persistent fields (which the borrow checker
//! won't allow simultaneously as two live `&mut` views), [`CodeStage`]
//! keeps only the backing mapping and the fixed offsets, and constructs a
//! [`Window`]/[`WindowMut`] on demand for whichever range the caller needs.

use memmap2::MmapMut;

use crate::binary::{Binary, Section, Segment};
use crate::util::page_up_by;
use crate::window::{Window, WindowMut};
use crate::{Error, Result};

pub struct CodeStage {
    mapping: MmapMut,
    segment_orig: u64,
    text_orig: u64,
    text_offset: usize,
    text_len: usize,
}

impl CodeStage {
    pub fn new(binary: &Binary, segment: &Segment, text: &Section<'_>, page_size: u64) -> Result<Self> {
        if !segment.header.is_load() {
            return Err(Error::SegmentNotLoadable);
        }

        let length = page_up_by(segment.mem_size(), page_size) as usize;
        let mut mapping = MmapMut::map_anon(length).map_err(Error::MapFailed)?;

        let copy_size = segment.file_size() as usize;
        let src_offset = segment.file_offset() as usize;
        let src = binary
            .bytes()
            .get(src_offset..src_offset + copy_size)
            .ok_or(Error::SectionData)?;
        mapping[..copy_size].copy_from_slice(src);

        let text_offset = (text.header.sh_offset - segment.file_offset()) as usize;
        let text_len = text.size() as usize;
        if text_offset + text_len > mapping.len() {
            return Err(Error::SectionData);
        }

        log::debug!(
            "locally loaded segment intended for 0x{:x} ({} pages)",
            segment.vaddr(),
            length as u64 / page_size
        );

        Ok(CodeStage {
            mapping,
            segment_orig: segment.vaddr(),
            text_orig: text.addr(),
            text_offset,
            text_len,
        })
    }

    pub fn segment_window(&self) -> Window<'_> {
        Window::new(self.segment_orig, &self.mapping)
    }

    pub fn segment_window_mut(&mut self) -> WindowMut<'_> {
        WindowMut::new(self.segment_orig, &mut self.mapping)
    }

    pub fn text_window(&self) -> Window<'_> {
        Window::new(self.text_orig, &self.mapping[self.text_offset..self.text_offset + self.text_len])
    }

    pub fn text_window_mut(&mut self) -> WindowMut<'_> {
        WindowMut::new(
            self.text_orig,
            &mut self.mapping[self.text_offset..self.text_offset + self.text_len],
        )
    }
}
