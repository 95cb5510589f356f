use std::fs::File;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

/// Create the parent directory of `path` (and any missing ancestors).
pub fn create_parent_dirs(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDir {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Resize `file` to exactly `len` bytes, truncating or extending as needed.
///
/// When `fast` is set and the file grows, additionally asks the OS to mark
/// the new region as allocated without zero-filling it (Windows
/// `SetFileValidData`, Linux `fallocate`). The fast path is best-effort:
/// on failure the extension stands and later writes take the zero-fill
/// slow path.
pub fn preallocate(file: &File, len: u64, fast: bool) -> Result<()> {
    let current = file
        .metadata()
        .map_err(|e| Error::Resize { len, source: e })?
        .len();
    if current == len {
        return Ok(());
    }

    file.set_len(len)
        .map_err(|e| Error::Resize { len, source: e })?;

    if fast && len > current {
        if let Err(e) = platform::extend_without_zero_fill(file, len) {
            debug!(len, error = %e, "fast extend unavailable, writes will zero-fill");
        }
    }
    Ok(())
}

#[cfg(target_os = "linux")]
mod platform {
    use std::fs::File;
    use std::io;

    use nix::fcntl::{FallocateFlags, fallocate};

    pub fn extend_without_zero_fill(file: &File, len: u64) -> io::Result<()> {
        fallocate(file, FallocateFlags::empty(), 0, len as i64)?;
        Ok(())
    }
}

#[cfg(windows)]
mod platform {
    use std::fs::File;
    use std::io;
    use std::os::windows::io::AsRawHandle;

    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::Storage::FileSystem::SetFileValidData;

    pub fn extend_without_zero_fill(file: &File, len: u64) -> io::Result<()> {
        unsafe { SetFileValidData(HANDLE(file.as_raw_handle()), len as i64) }
            .map_err(io::Error::other)
    }
}

#[cfg(not(any(target_os = "linux", windows)))]
mod platform {
    use std::fs::File;
    use std::io;

    pub fn extend_without_zero_fill(_file: &File, _len: u64) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "fast extend not supported on this platform",
        ))
    }
}
