//! Runtime code-layout randomization for 64-bit x86 ELF executables.
//!
//! This crate loads an `ET_EXEC` ELF64/x86-64 binary into a private,
//! writable staging area, enumerates its functions from DWARF debug info,
//! analyzes each function's callee-save prologue and matching epilogues,
//! and rewrites the machine code in place by permuting those push/pop
//! instructions consistently. The staging area is meant to be served back
//! to a host — a userfaultfd handler, an out-of-process rewriter, or a
//! test harness — so a running process can be transparently swapped onto
//! a diversified layout of the same executable segment.
//!
//! The entry point is [`Session`]; see its docs for the lifecycle.

pub mod binary;
pub mod config;
pub mod elf;
mod error;
pub mod function;
pub mod metadata;
pub mod rng;
pub mod session;
pub mod staging;
mod strtab;
pub mod transform;
pub mod util;
pub mod window;

pub use config::Config;
pub use error::{Error, Result};
pub use function::FunctionRecord;
pub use session::Session;
pub use window::{Window, WindowMut};
