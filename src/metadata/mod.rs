//! Function discovery: anything that can enumerate the functions in a
//! binary implements [`MetadataProvider`]. DWARF debug info is the only
//! provider shipped here, but the trait is the seam a symbol-table or
//! heuristic-disassembly provider would plug into.

pub mod dwarf;

use crate::function::FunctionRecord;
use crate::Result;

/// Enumerates the functions known to a metadata source.
///
/// `foreach_function` takes a callback rather than returning a `Vec` so a
/// provider backed by a lazy/streaming source never has to materialize
/// every function up front.
pub trait MetadataProvider {
    fn foreach_function(&self, callback: &mut dyn FnMut(FunctionRecord) -> Result<()>) -> Result<()>;
}
