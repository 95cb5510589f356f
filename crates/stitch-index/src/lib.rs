//! Read-only patch index interface.
//!
//! A patch index describes a set of target files as ordered lists of parts,
//! where each part either maps to a byte range of a remote source patch or
//! is synthesized from data embedded in the index itself. The installer
//! consumes the index through the object-safe traits in this crate; how an
//! index is built or laid out on disk is not its concern.
//!
//! [`mem::MemoryIndex`] is a concrete in-memory index with SHA-256 part
//! verification, used by tests and by embedders that assemble small indices
//! programmatically.

mod index;
mod io;

pub mod mem;

pub use index::{IndexPart, IndexTarget, PatchIndex, VerifyOutcome};
pub use io::{SourceRead, TargetStore};
