//! Remote backup access over SSH.
//!
//! A [`RemoteHost`] describes where to connect; [`RemoteHost::connect`]
//! opens one multiplexed SSH master connection that every command of the
//! returned [`RemoteSession`] reuses. The session closes the master on drop,
//! so the connection lives exactly as long as the caller holds the session.

use crate::config::RemoteConfig;
use crate::error::{BackopperError, Result};
use crate::retention::ARCHIVE_SUFFIX;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

#[derive(Debug, Clone)]
pub struct RemoteHost {
    pub host: String,
    pub port: u16,
    pub user: String,
    ssh: String,
    scp: String,
}

impl RemoteHost {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            ssh: "ssh".to_string(),
            scp: "scp".to_string(),
        }
    }

    pub fn from_config(host: &str, config: &RemoteConfig) -> Self {
        Self::new(host, config.port, config.user.clone())
    }

    /// Override the `ssh` and `scp` programs.
    pub fn with_programs(mut self, ssh: impl Into<String>, scp: impl Into<String>) -> Self {
        self.ssh = ssh.into();
        self.scp = scp.into();
        self
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Open a master connection. Fails if the host cannot be reached.
    pub fn connect(&self) -> Result<RemoteSession<'_>> {
        let control_dir = tempfile::Builder::new().prefix("backopper-ssh").tempdir()?;
        let session = RemoteSession {
            host: self,
            control_path: control_dir.path().join("ctl"),
            _control_dir: control_dir,
        };
        let output = session
            .ssh()?
            .args(["-M", "-N", "-f", "-o", "ControlPersist=yes"])
            .arg(self.destination())
            .stdin(Stdio::null())
            .output()?;
        session.check("open master connection", output)?;
        tracing::debug!(host = %self.host, "ssh master connection opened");
        Ok(session)
    }
}

pub struct RemoteSession<'a> {
    host: &'a RemoteHost,
    control_path: PathBuf,
    _control_dir: TempDir,
}

impl RemoteSession<'_> {
    fn ssh(&self) -> Result<Command> {
        let mut cmd = crate::io::program_command(&self.host.ssh)?;
        cmd.args(["-p", &self.host.port.to_string()])
            .args(["-o", "BatchMode=yes"])
            .arg("-S")
            .arg(&self.control_path);
        Ok(cmd)
    }

    fn check(&self, what: &str, output: Output) -> Result<String> {
        if !output.status.success() {
            return Err(BackopperError::Remote {
                host: self.host.host.clone(),
                message: format!(
                    "{what}: exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run a shell command on the remote host and return its stdout.
    pub fn exec(&self, remote_command: &str) -> Result<String> {
        let output = self
            .ssh()?
            .arg(self.host.destination())
            .arg(remote_command)
            .stdin(Stdio::null())
            .output()?;
        self.check(remote_command, output)
    }

    /// Newest archive in `dir`, by modification time.
    pub fn latest_backup(&self, dir: &str) -> Result<Option<String>> {
        let listing = self.exec(&format!("ls -1t -- '{dir}'"))?;
        Ok(listing
            .lines()
            .map(str::trim)
            .find(|name| name.ends_with(ARCHIVE_SUFFIX))
            .map(|name| format!("{}/{name}", dir.trim_end_matches('/'))))
    }

    /// Copy `remote_path` to `dest` (a file path or an existing directory).
    pub fn download(&self, remote_path: &str, dest: &Path) -> Result<PathBuf> {
        let target = if dest.is_dir() {
            let name = remote_path.rsplit('/').next().unwrap_or(remote_path);
            dest.join(name)
        } else {
            dest.to_path_buf()
        };
        let output = crate::io::program_command(&self.host.scp)?
            .args(["-P", &self.host.port.to_string()])
            .args(["-o", "BatchMode=yes"])
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg(format!("{}:{remote_path}", self.host.destination()))
            .arg(&target)
            .stdin(Stdio::null())
            .output()?;
        self.check("download", output)?;
        tracing::info!(host = %self.host.host, remote = remote_path, local = %target.display(), "backup downloaded");
        Ok(target)
    }
}

impl Drop for RemoteSession<'_> {
    fn drop(&mut self) {
        let closed = self.ssh().and_then(|mut cmd| {
            cmd.args(["-O", "exit"])
                .arg(self.host.destination())
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map_err(BackopperError::from)
        });
        if let Err(e) = closed {
            tracing::debug!(error = %e, "closing ssh master connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `ssh` stand-in: logs its arguments and prints a directory listing.
    fn fake_host(dir: &TempDir) -> RemoteHost {
        let log = dir.path().join("ssh.log");
        let ssh = dir.path().join("ssh.sh");
        std::fs::write(
            &ssh,
            format!(
                "echo \"$*\" >> '{}'\nprintf '20240302.sql.gz\\n20240301.sql.gz\\nnotes.txt\\n'\n",
                log.display()
            ),
        )
        .unwrap();
        let scp = dir.path().join("scp.sh");
        std::fs::write(&scp, "for last; do :; done\necho archive > \"$last\"\n").unwrap();
        RemoteHost::new("db1.example.com", 25642, "root")
            .with_programs(format!("sh {}", ssh.display()), format!("sh {}", scp.display()))
    }

    #[test]
    fn latest_backup_picks_newest_archive() {
        let dir = TempDir::new().unwrap();
        let host = fake_host(&dir);
        let session = host.connect().unwrap();
        let latest = session.latest_backup("/var/backups/shop/").unwrap();
        assert_eq!(latest.as_deref(), Some("/var/backups/shop/20240302.sql.gz"));
    }

    #[test]
    fn session_reuses_one_connection_and_closes_it() {
        let dir = TempDir::new().unwrap();
        let host = fake_host(&dir);
        {
            let session = host.connect().unwrap();
            session.exec("true").unwrap();
            session.exec("true").unwrap();
        }
        let log = std::fs::read_to_string(dir.path().join("ssh.log")).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("-M -N -f"));
        assert!(lines.iter().all(|l| l.contains("-p 25642") && l.contains("root@db1.example.com")));
        assert!(lines[3].contains("-O exit"));
    }

    #[test]
    fn download_into_directory_keeps_file_name() {
        let dir = TempDir::new().unwrap();
        let host = fake_host(&dir);
        let dest = dir.path().join("downloads");
        std::fs::create_dir_all(&dest).unwrap();

        let session = host.connect().unwrap();
        let path = session
            .download("/var/backups/shop/20240302.sql.gz", &dest)
            .unwrap();
        assert_eq!(path, dest.join("20240302.sql.gz"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "archive\n");
    }

    #[test]
    fn failing_connection_is_remote_error() {
        let dir = TempDir::new().unwrap();
        let ssh = dir.path().join("ssh.sh");
        std::fs::write(&ssh, "echo 'Connection refused' >&2\nexit 255\n").unwrap();
        let host = RemoteHost::new("db1", 22, "root").with_programs(format!("sh {}", ssh.display()), "scp");
        let err = host.connect().err().unwrap();
        assert!(
            matches!(err, BackopperError::Remote { ref message, .. } if message.contains("Connection refused"))
        );
    }
}
