//! Platform filesystem primitives: file preallocation with an optional
//! fast-extend path, and the best-effort OS privilege it depends on.

mod error;
mod prealloc;
mod privilege;

pub use error::{Error, Result};
pub use prealloc::{create_parent_dirs, preallocate};
pub use privilege::acquire_fast_extend_privilege;
