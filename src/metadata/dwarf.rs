//! DWARF-backed function discovery.
//!
//! Only direct children of each compilation unit's root DIE are examined,
//! matching the original `dwarf_child`/`dwarf_siblingof_b` traversal:
//! nested (lexical-block-local) subprograms are not descended into.

use gimli::{EndianSlice, LittleEndian};

use super::MetadataProvider;
use crate::binary::Binary;
use crate::function::FunctionRecord;
use crate::{Error, Result};

type Reader<'a> = EndianSlice<'a, LittleEndian>;

pub struct DwarfMetadata<'a> {
    dwarf: gimli::Dwarf<Reader<'a>>,
}

impl<'a> DwarfMetadata<'a> {
    pub fn new(binary: &'a Binary) -> Result<Self> {
        let load_section = |id: gimli::SectionId| -> std::result::Result<Reader<'a>, gimli::Error> {
            let data = binary
                .find_section(id.name())
                .map(|s| s.data)
                .unwrap_or(&[][..]);
            Ok(EndianSlice::new(data, LittleEndian))
        };
        let dwarf = gimli::Dwarf::load(load_section)?;
        Ok(DwarfMetadata { dwarf })
    }

    fn high_pc(low_pc: u64, value: gimli::AttributeValue<Reader<'a>>) -> u64 {
        match value {
            gimli::AttributeValue::Addr(addr) => addr,
            other => low_pc + other.udata_value().unwrap_or(0),
        }
    }
}

impl<'a> MetadataProvider for DwarfMetadata<'a> {
    fn foreach_function(&self, callback: &mut dyn FnMut(FunctionRecord) -> Result<()>) -> Result<()> {
        let mut units = self.dwarf.units();
        while let Some(header) = units.next().map_err(Error::Dwarf)? {
            let unit = self.dwarf.unit(header).map_err(Error::Dwarf)?;
            let mut tree = unit.entries_tree(None).map_err(Error::Dwarf)?;
            let root = tree.root().map_err(Error::Dwarf)?;

            let mut children = root.children();
            while let Some(child) = children.next().map_err(Error::Dwarf)? {
                let entry = child.entry();
                if entry.tag() != gimli::DW_TAG_subprogram {
                    continue;
                }

                let low_pc = match entry.attr_value(gimli::DW_AT_low_pc).map_err(Error::Dwarf)? {
                    Some(gimli::AttributeValue::Addr(addr)) => addr,
                    _ => {
                        log::warn!("subprogram DIE missing DW_AT_low_pc, skipping");
                        continue;
                    }
                };

                let high_pc = match entry.attr_value(gimli::DW_AT_high_pc).map_err(Error::Dwarf)? {
                    Some(value) => Self::high_pc(low_pc, value),
                    None => {
                        log::warn!("subprogram DIE missing DW_AT_high_pc, skipping");
                        continue;
                    }
                };

                if high_pc <= low_pc {
                    log::warn!("subprogram at 0x{low_pc:x} has non-positive length, skipping");
                    continue;
                }

                callback(FunctionRecord::new(low_pc, high_pc - low_pc))?;
            }
        }
        Ok(())
    }
}
