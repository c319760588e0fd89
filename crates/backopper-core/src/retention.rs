use crate::error::Result;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub const ARCHIVE_SUFFIX: &str = ".sql.gz";

/// Delete archives in `dir` last modified more than `retention_days` ago.
///
/// Only files ending in [`ARCHIVE_SUFFIX`] are considered. A missing
/// directory prunes nothing. Returns the removed paths.
pub fn prune_old_backups(dir: &Path, retention_days: u64, now: SystemTime) -> Result<Vec<PathBuf>> {
    let cutoff = now
        .checked_sub(Duration::from_secs(retention_days.saturating_mul(24 * 60 * 60)))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let read = match std::fs::read_dir(dir) {
        Ok(r) => r,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut removed = Vec::new();
    for entry in read {
        let entry = entry?;
        let path = entry.path();
        let is_archive = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(ARCHIVE_SUFFIX));
        if !is_archive || !entry.file_type()?.is_file() {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if modified < cutoff {
            std::fs::remove_file(&path)?;
            tracing::info!(path = %path.display(), "pruned old backup");
            removed.push(path);
        }
    }
    removed.sort();
    Ok(removed)
}
