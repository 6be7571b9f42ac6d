//! Platform-specific durable file writes
//!
//! Persisted segment files are written in full and, when the engine is
//! configured for durable writes, synced with the strongest primitive the
//! platform offers before `save` reports success.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::error::{StoreError, StoreResult};

/// Ensures data is durably written to persistent storage before returning.
///
/// Platform behaviors:
/// - Linux: fdatasync()
/// - macOS/iOS: fcntl(F_FULLFSYNC)
/// - Windows: FlushFileBuffers()
/// - Other: file.sync_data()
pub fn durable_sync(file: &File) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: fd comes from a live File reference.
        let result = unsafe { libc::fdatasync(fd) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        // Plain fsync only reaches the drive's volatile cache here.
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: fd comes from a live File reference.
        let result = unsafe { libc::fcntl(fd, libc::F_FULLFSYNC) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::io::AsRawHandle;
        use winapi::um::fileapi::FlushFileBuffers;
        let handle = file.as_raw_handle();
        // SAFETY: handle comes from a live File reference.
        let result = unsafe { FlushFileBuffers(handle as *mut _) };
        if result != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios", target_os = "windows")))]
    {
        file.sync_data()
    }
}

/// Create or truncate `path`, write `bytes`, and sync if `durable`.
pub fn write_file(path: &Path, bytes: &[u8], durable: bool) -> StoreResult<()> {
    let mut file = File::create(path)
        .map_err(|e| StoreError::io_at(path, e, "Failed to create file"))?;
    file.write_all(bytes)
        .map_err(|e| StoreError::io_at(path, e, "Failed to write file"))?;
    if durable {
        durable_sync(&file).map_err(|e| StoreError::io_at(path, e, "Failed to sync file"))?;
    }
    Ok(())
}
