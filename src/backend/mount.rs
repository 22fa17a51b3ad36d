// Free-space backend built on statvfs(3)

use std::ffi::CString;
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::backend::FreeSpace;
use crate::error::{WatchError, WatchResult};

/// Queries mounted filesystems with `statvfs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsFreeSpace;

impl StatvfsFreeSpace {
    pub fn new() -> Self {
        Self
    }
}

impl FreeSpace for StatvfsFreeSpace {
    fn free_percentage(&self, mountpoint: &Path) -> WatchResult<u64> {
        let c_path = CString::new(mountpoint.as_os_str().as_bytes()).map_err(|_| {
            WatchError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("mount point contains NUL byte: {}", mountpoint.display()),
            ))
        })?;

        let mut stat = MaybeUninit::<libc::statvfs>::uninit();
        // SAFETY: c_path is NUL terminated and stat is a valid out pointer.
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        // SAFETY: statvfs returned 0 so the struct is initialised.
        let stat = unsafe { stat.assume_init() };

        available_percentage(stat.f_bavail as u64, stat.f_blocks as u64)
    }
}

pub(crate) fn available_percentage(available: u64, blocks: u64) -> WatchResult<u64> {
    if blocks == 0 {
        return Err(WatchError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "statvfs returned 0 blocks",
        )));
    }
    Ok(available.saturating_mul(100) / blocks)
}
