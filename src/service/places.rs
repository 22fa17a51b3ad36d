//! Standard directory layout on mounted devices
//!
//! Freshly mounted media get the usual home-style folders so that media scanners
//! and file pickers find a familiar structure.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::DirBuilder;
use tracing::debug;

use crate::error::WatchResult;

/// Folders created on every mounted device unless configured otherwise.
pub const STANDARD_DIRS: [&str; 5] = ["Documents", "Downloads", "Music", "Pictures", "Videos"];

const DIR_MODE: u32 = 0o755;

/// Creates each of `dirs` under `mountpoint`, returning the ones that were created.
///
/// Existing entries are left alone, even when they are not directories.
pub async fn create_standard_home_dirs<S: AsRef<str>>(
    mountpoint: &Path,
    dirs: &[S],
) -> WatchResult<Vec<PathBuf>> {
    debug!(mountpoint = %mountpoint.display(), "Creating standard directories");
    let mut builder = DirBuilder::new();
    builder.recursive(true).mode(DIR_MODE);

    let mut created = Vec::new();
    for node in dirs {
        let dir = mountpoint.join(node.as_ref());
        match tokio::fs::symlink_metadata(&dir).await {
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        builder.create(&dir).await?;
        created.push(dir);
    }
    Ok(created)
}
