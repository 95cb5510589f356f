//! Indexed binary patch installer core.
//!
//! Repairs or constructs a set of target files to match a precomputed
//! patch index: verify what is on disk, work out which parts are missing,
//! fetch the required byte ranges from HTTP sources (multipart/byteranges)
//! or local streams, and reconstruct each missing region in place.
//!
//! # Flow
//!
//! ```text
//! index ─▶ verify_files ─▶ missing-parts ledger
//!                                │
//!          attach_missing_for_write (preallocate, fast-extend)
//!                                │
//!          queue_http_install / queue_stream_install per source patch
//!                                │
//!          install ─▶ ranged fetch ─▶ reconstruct ─▶ serialized writes
//!                                │
//!          non-patch reconstructor fills index-only parts
//! ```
//!
//! The cycle is re-drivable: completed parts stay written across a partial
//! failure, and the next verify/install pass only re-requests what is
//! still missing.

mod error;
mod events;
mod installer;
mod ledger;
mod multipart;
mod options;
mod pool;
mod ranges;
mod registry;
mod scheduler;
mod source;
mod task;
mod verify;

pub use error::{Error, Result};
pub use events::InstallEvents;
pub use installer::PatchInstaller;
pub use multipart::MultipartReader;
pub use options::InstallerOptions;
pub use pool::{BufferPool, PooledBuf};
pub use ranges::ByteRange;
pub use source::SourceCursor;
