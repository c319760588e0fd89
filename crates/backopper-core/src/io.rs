use crate::error::{BackopperError, Result};
use std::io::Write;
use std::path::Path;
use std::process::Command;
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` using a tempfile in the same directory.
///
/// Readers observe either the previous content or the new content, never a
/// partially written file. The tempfile is fsynced before the rename, and an
/// existing file's permissions carry over to the new content.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    // Tempfiles are created 0600; keep the mode of the file being replaced.
    if let Ok(existing) = std::fs::metadata(path) {
        tmp.as_file().set_permissions(existing.permissions())?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create a directory and all parents, idempotent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Read a file to a string, returning an empty string when it does not exist.
pub fn read_or_empty(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

/// Build a [`Command`] from a configured program string such as
/// `"/usr/sbin/sendmail -f ops@example.com"`. The first word is resolved on
/// `PATH`; the remaining words become leading arguments.
pub fn program_command(spec: &str) -> Result<Command> {
    let mut words = spec.split_whitespace();
    let program = words
        .next()
        .ok_or_else(|| BackopperError::Config("empty program name".into()))?;
    let resolved =
        which::which(program).map_err(|_| BackopperError::ProgramNotFound(program.to_string()))?;
    let mut cmd = Command::new(resolved);
    cmd.args(words);
    Ok(cmd)
}
