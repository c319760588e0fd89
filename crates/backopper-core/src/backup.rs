//! One backup run for one app: prune, dump, compress, report.
//!
//! The run is self-contained. Credentials are loaded at the start and dropped
//! as soon as the dump finishes, and every failure after the app name is
//! validated ends in a notification instead of an error, so a broken app
//! never takes anything else down with it.

use crate::config::Config;
use crate::credentials::Credentials;
use crate::error::{BackopperError, Result};
use crate::lock::FileLock;
use crate::notify::NotificationSink;
use crate::report::{CompletionEvent, CompletionReporter};
use crate::retention::{prune_old_backups, ARCHIVE_SUFFIX};
use crate::types::validate_app_name;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::SystemTime;

const LOCK_FILE: &str = ".backopper.lock";
const PARTIAL_SUFFIX: &str = ".partial";

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Succeeded,
    /// The dump succeeded but the completion report was rejected.
    Unreported,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupOutcome {
    pub app: String,
    pub status: BackupStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<PathBuf>,
    pub pruned: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Dump
// ---------------------------------------------------------------------------

/// `<dump_program> | <compress_program> > <dest>`.
#[derive(Debug, Clone)]
pub struct DumpCommand {
    pub dump_program: String,
    pub compress_program: String,
}

impl DumpCommand {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dump_program: config.backup.dump_program.clone(),
            compress_program: config.backup.compress_program.clone(),
        }
    }

    /// Run the pipeline into `dest`. The password reaches the dump process
    /// through its environment only.
    pub fn run(&self, app: &str, creds: &Credentials, dest: &Path) -> Result<()> {
        let dump_err = |message: String| BackopperError::Dump {
            app: app.to_string(),
            message,
        };

        let mut dump_cmd = crate::io::program_command(&self.dump_program)?;
        dump_cmd.arg(format!("-u{}", creds.user));
        if let Some(host) = &creds.host {
            dump_cmd.arg(format!("-h{host}"));
        }
        dump_cmd
            .arg(&creds.database)
            .env("MYSQL_PWD", &creds.password)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let out = File::create(dest)?;
        let mut dump = dump_cmd
            .spawn()
            .map_err(|e| dump_err(format!("spawn {}: {e}", self.dump_program)))?;
        let dump_stdout = dump
            .stdout
            .take()
            .ok_or_else(|| dump_err("dump stdout not captured".into()))?;

        let spawned = crate::io::program_command(&self.compress_program).and_then(|mut cmd| {
            cmd.stdin(Stdio::from(dump_stdout))
                .stdout(Stdio::from(out))
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| dump_err(format!("spawn {}: {e}", self.compress_program)))
        });
        let compress = match spawned {
            Ok(child) => child,
            Err(e) => {
                let _ = dump.kill();
                let _ = dump.wait();
                return Err(e);
            }
        };

        let dump_output = dump.wait_with_output()?;
        let compress_output = compress.wait_with_output()?;

        if !dump_output.status.success() {
            return Err(dump_err(format!(
                "{} exited with {}: {}",
                self.dump_program,
                dump_output.status,
                String::from_utf8_lossy(&dump_output.stderr).trim()
            )));
        }
        if !compress_output.status.success() {
            return Err(dump_err(format!(
                "{} exited with {}: {}",
                self.compress_program,
                compress_output.status,
                String::from_utf8_lossy(&compress_output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Timestamp-sortable archive name, e.g. `20240301020000.sql.gz`.
pub fn archive_name(at: DateTime<Local>) -> String {
    format!("{}{ARCHIVE_SUFFIX}", at.format("%Y%m%d%H%M%S"))
}

// ---------------------------------------------------------------------------
// BackupRunner
// ---------------------------------------------------------------------------

pub struct BackupRunner<'a> {
    config: &'a Config,
    dump: DumpCommand,
    reporter: &'a dyn CompletionReporter,
    sink: &'a dyn NotificationSink,
}

impl<'a> BackupRunner<'a> {
    pub fn new(
        config: &'a Config,
        reporter: &'a dyn CompletionReporter,
        sink: &'a dyn NotificationSink,
    ) -> Self {
        Self {
            config,
            dump: DumpCommand::from_config(config),
            reporter,
            sink,
        }
    }

    /// Run one backup for `app`.
    ///
    /// Returns `Err` only for an invalid app name or when another run for
    /// the same app holds the lock. Everything else is reported through the
    /// outcome and the notification sink.
    pub fn run(&self, app: &str) -> Result<BackupOutcome> {
        validate_app_name(app)?;
        let dir = self.config.backup_dir(app);
        crate::io::ensure_dir(&dir)?;
        let _lock = FileLock::try_acquire(&dir.join(LOCK_FILE))?;

        tracing::info!(app, dir = %dir.display(), "backup started");
        let mut outcome = BackupOutcome {
            app: app.to_string(),
            status: BackupStatus::Failed,
            archive: None,
            pruned: Vec::new(),
            error: None,
        };

        let archive = match self.dump_into(app, &dir, &mut outcome) {
            Ok(archive) => archive,
            Err(e) => {
                tracing::error!(app, error = %e, "backup failed");
                self.alert(&format!("Backup failed for {app}"), &e.to_string());
                outcome.error = Some(e.to_string());
                return Ok(outcome);
            }
        };
        tracing::info!(app, archive = %archive.display(), "dump completed");
        outcome.archive = Some(archive);

        let event = CompletionEvent::new(&self.config.api.secret, app, Utc::now());
        match self.reporter.report(&event) {
            Ok(()) => outcome.status = BackupStatus::Succeeded,
            Err(e) => {
                tracing::error!(app, error = %e, "completion report failed");
                let body = match &e {
                    BackopperError::Report { body, .. } => body.clone(),
                    other => other.to_string(),
                };
                self.alert(&format!("Backup report failed for {app}"), &body);
                outcome.status = BackupStatus::Unreported;
                outcome.error = Some(e.to_string());
            }
        }

        tracing::info!(app, status = ?outcome.status, "backup ended");
        Ok(outcome)
    }

    fn dump_into(&self, app: &str, dir: &Path, outcome: &mut BackupOutcome) -> Result<PathBuf> {
        outcome.pruned =
            prune_old_backups(dir, self.config.backup.retention_days, SystemTime::now())?;

        let creds = Credentials::load(app, &self.config.credentials_path(app))?;
        let name = archive_name(Local::now());
        let archive = dir.join(&name);
        let partial = dir.join(format!("{name}{PARTIAL_SUFFIX}"));

        tracing::info!(app, "attempting database dump");
        let result = self.dump.run(app, &creds, &partial);
        drop(creds);

        if let Err(e) = result {
            let _ = std::fs::remove_file(&partial);
            return Err(e);
        }
        std::fs::rename(&partial, &archive)?;
        Ok(archive)
    }

    fn alert(&self, subject: &str, body: &str) {
        if let Err(e) = self.sink.notify(subject, body) {
            tracing::error!(error = %e, subject, "could not deliver notification");
        }
    }
}
