//! Crontab document model and the schedule store built on top of it.
//!
//! A [`Crontab`] keeps every line it does not understand (comments, variable
//! assignments, malformed lines) verbatim and in order, so committing a store
//! never rewrites entries that belong to someone else.
//!
//! # Line format
//! ```text
//! <schedule> <command> # <tag>
//! ```
//! `schedule` is either an `@`-marker (`@daily`, `@weekly`, ...) or the
//! classic five time fields. The tag is the trailing ` # ` comment.

use crate::config::{ScheduleConfig, StoreKind};
use crate::error::{BackopperError, Result};
use crate::lock::FileLock;
use crate::types::Frequency;
use regex::Regex;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

const TAG_SEPARATOR: &str = " # ";

// ---------------------------------------------------------------------------
// CronEntry
// ---------------------------------------------------------------------------

/// One job line of a crontab.
///
/// `text` is the entry's textual representation as stored. For parsed lines
/// it is the original line (trailing whitespace trimmed); for constructed
/// entries it is the canonical `<schedule> <command> # <tag>` rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronEntry {
    schedule: String,
    command: String,
    tag: Option<String>,
    text: String,
}

impl CronEntry {
    pub fn new(schedule: impl Into<String>, command: impl Into<String>, tag: Option<String>) -> Self {
        let schedule = schedule.into();
        let command = command.into();
        let text = match &tag {
            Some(t) => format!("{schedule} {command}{TAG_SEPARATOR}{t}"),
            None => format!("{schedule} {command}"),
        };
        Self {
            schedule,
            command,
            tag,
            text,
        }
    }

    pub fn scheduled(frequency: Frequency, command: impl Into<String>, tag: &str) -> Self {
        Self::new(frequency.marker(), command, Some(tag.to_string()))
    }

    /// Parse a job line. Returns `None` for blank lines, comments, variable
    /// assignments and anything without a schedule and a command.
    pub fn parse(line: &str) -> Option<Self> {
        let text = line.trim_end();
        let trimmed = text.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') || env_assignment_re().is_match(trimmed)
        {
            return None;
        }

        let field_count = if trimmed.starts_with('@') { 1 } else { 5 };
        let (fields, rest) = split_fields(trimmed, field_count)?;

        let (command, tag) = match rest.rsplit_once(TAG_SEPARATOR) {
            Some((cmd, tag)) => {
                let tag = tag.trim();
                (cmd.trim_end(), (!tag.is_empty()).then(|| tag.to_string()))
            }
            None => (rest, None),
        };
        if command.is_empty() {
            return None;
        }

        Some(Self {
            schedule: fields.join(" "),
            command: command.to_string(),
            tag,
            text: text.to_string(),
        })
    }

    pub fn schedule(&self) -> &str {
        &self.schedule
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// The frequency when the schedule is one of the supported markers.
    pub fn frequency(&self) -> Option<Frequency> {
        Frequency::from_marker(&self.schedule)
    }
}

impl fmt::Display for CronEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

static ENV_ASSIGNMENT_RE: OnceLock<Regex> = OnceLock::new();

fn env_assignment_re() -> &'static Regex {
    ENV_ASSIGNMENT_RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*\s*=").unwrap())
}

/// Split `n` whitespace-separated fields off the front of `s`, returning the
/// fields and the remainder with leading whitespace removed.
fn split_fields(s: &str, n: usize) -> Option<(Vec<&str>, &str)> {
    let mut fields = Vec::with_capacity(n);
    let mut rest = s;
    for _ in 0..n {
        rest = rest.trim_start();
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = &rest[end..];
    }
    let rest = rest.trim_start();
    if rest.is_empty() {
        return None;
    }
    Some((fields, rest))
}

// ---------------------------------------------------------------------------
// Crontab
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Job(CronEntry),
    Other(String),
}

/// An in-memory crontab document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Crontab {
    lines: Vec<Line>,
}

impl Crontab {
    pub fn parse(content: &str) -> Self {
        let lines = content
            .lines()
            .map(|l| match CronEntry::parse(l) {
                Some(entry) => Line::Job(entry),
                None => Line::Other(l.to_string()),
            })
            .collect();
        Self { lines }
    }

    /// Render back to crontab text. Non-empty documents end with a newline,
    /// which cron requires for the last entry.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Job(entry) => out.push_str(entry.text()),
                Line::Other(raw) => out.push_str(raw),
            }
            out.push('\n');
        }
        out
    }

    pub fn entries(&self) -> impl Iterator<Item = &CronEntry> {
        self.lines.iter().filter_map(|l| match l {
            Line::Job(e) => Some(e),
            Line::Other(_) => None,
        })
    }

    pub fn find_tag(&self, tag: &str) -> Vec<CronEntry> {
        self.entries()
            .filter(|e| e.tag() == Some(tag))
            .cloned()
            .collect()
    }

    /// Replace the first entry carrying the same tag in place, or append.
    pub fn upsert(&mut self, entry: CronEntry) {
        let slot = self.lines.iter_mut().find(|l| match l {
            Line::Job(e) => e.tag.is_some() && e.tag == entry.tag,
            Line::Other(_) => false,
        });
        match slot {
            Some(line) => *line = Line::Job(entry),
            None => self.lines.push(Line::Job(entry)),
        }
    }

    /// Remove the first line equal to `entry`. Returns whether one was found.
    pub fn remove(&mut self, entry: &CronEntry) -> bool {
        let pos = self
            .lines
            .iter()
            .position(|l| matches!(l, Line::Job(e) if e == entry));
        match pos {
            Some(i) => {
                self.lines.remove(i);
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// ScheduleStore
// ---------------------------------------------------------------------------

/// The host's persistent periodic-task store.
///
/// `upsert` and `remove` only stage changes; nothing is durable until
/// `commit` succeeds, and a failed commit leaves the durable state as it was.
pub trait ScheduleStore {
    /// All entries carrying `tag`. Normally zero or one.
    fn list(&self, tag: &str) -> Vec<CronEntry>;

    /// Every job entry in the store, tagged or not.
    fn entries(&self) -> Vec<CronEntry>;

    fn upsert(&mut self, entry: CronEntry);

    fn remove(&mut self, entry: &CronEntry);

    fn commit(&mut self) -> Result<()>;

    fn describe(&self) -> String;
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// Durable storage behind a [`CrontabStore`]. `write` must replace the whole
/// content atomically.
pub trait CrontabBackend {
    fn read(&self) -> Result<String>;
    fn write(&self, content: &str) -> Result<()>;
    fn describe(&self) -> String;
}

/// A crontab-format file written through a tempfile and rename.
#[derive(Debug, Clone)]
pub struct CrontabFile {
    path: PathBuf,
}

impl CrontabFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CrontabBackend for CrontabFile {
    fn read(&self) -> Result<String> {
        crate::io::read_or_empty(&self.path)
    }

    fn write(&self, content: &str) -> Result<()> {
        crate::io::atomic_write(&self.path, content.as_bytes())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// The user's crontab, read with `crontab -l` and installed with `crontab -`.
/// The `crontab` program installs the new table atomically.
#[derive(Debug, Clone)]
pub struct UserCrontab {
    program: String,
    user: Option<String>,
}

impl UserCrontab {
    pub fn new(user: Option<String>) -> Self {
        Self::with_program("crontab", user)
    }

    pub fn with_program(program: impl Into<String>, user: Option<String>) -> Self {
        Self {
            program: program.into(),
            user,
        }
    }

    fn command(&self) -> Result<Command> {
        let mut cmd = crate::io::program_command(&self.program)?;
        if let Some(user) = &self.user {
            cmd.args(["-u", user]);
        }
        Ok(cmd)
    }
}

impl CrontabBackend for UserCrontab {
    fn read(&self) -> Result<String> {
        let output = self.command()?.arg("-l").stdin(Stdio::null()).output()?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        // A user without a crontab is an empty store, not an error.
        if stderr.contains("no crontab for") {
            return Ok(String::new());
        }
        Err(BackopperError::StoreWrite(format!(
            "{} -l failed: {}",
            self.program,
            stderr.trim()
        )))
    }

    fn write(&self, content: &str) -> Result<()> {
        let mut child = self
            .command()?
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(content.as_bytes())?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(BackopperError::StoreWrite(format!(
                "{} - failed: {}",
                self.program,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        match &self.user {
            Some(u) => format!("crontab of {u}"),
            None => "user crontab".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// CrontabStore
// ---------------------------------------------------------------------------

/// A [`ScheduleStore`] over a crontab backend.
///
/// The store is opened under an exclusive lock that is held until the store
/// is dropped, so the read-modify-commit cycle of one run never interleaves
/// with another run on the same host.
pub struct CrontabStore<B: CrontabBackend> {
    backend: B,
    crontab: Crontab,
    committed: String,
    _lock: Option<FileLock>,
}

impl<B: CrontabBackend> CrontabStore<B> {
    pub fn open(backend: B, lock_path: &Path) -> Result<Self> {
        let lock = FileLock::try_acquire(lock_path)?;
        let mut store = Self::load(backend)?;
        store._lock = Some(lock);
        Ok(store)
    }

    /// Open without taking the lock. Only for read-only inspection.
    pub fn load(backend: B) -> Result<Self> {
        let content = backend.read()?;
        let crontab = Crontab::parse(&content);
        let committed = crontab.render();
        Ok(Self {
            backend,
            crontab,
            committed,
            _lock: None,
        })
    }

    /// Whether staged changes differ from the last durable state.
    pub fn is_dirty(&self) -> bool {
        self.crontab.render() != self.committed
    }
}

impl<B: CrontabBackend> ScheduleStore for CrontabStore<B> {
    fn list(&self, tag: &str) -> Vec<CronEntry> {
        self.crontab.find_tag(tag)
    }

    fn entries(&self) -> Vec<CronEntry> {
        self.crontab.entries().cloned().collect()
    }

    fn upsert(&mut self, entry: CronEntry) {
        self.crontab.upsert(entry);
    }

    fn remove(&mut self, entry: &CronEntry) {
        if !self.crontab.remove(entry) {
            tracing::debug!(entry = %entry, "remove: entry not present");
        }
    }

    fn commit(&mut self) -> Result<()> {
        let rendered = self.crontab.render();
        if rendered == self.committed {
            tracing::debug!(store = %self.backend.describe(), "no schedule changes to commit");
            return Ok(());
        }
        self.backend.write(&rendered)?;
        self.committed = rendered;
        tracing::info!(store = %self.backend.describe(), "schedule committed");
        Ok(())
    }

    fn describe(&self) -> String {
        self.backend.describe()
    }
}

/// Open the store selected by `schedule.store`, taking its lock.
pub fn open_store(config: &ScheduleConfig) -> Result<Box<dyn ScheduleStore>> {
    let lock_path = config.lock_path();
    match config.store {
        StoreKind::User => {
            let backend = UserCrontab::new(config.user.clone());
            Ok(Box::new(CrontabStore::open(backend, &lock_path)?))
        }
        StoreKind::File => {
            let path = config.path.as_ref().ok_or_else(|| {
                BackopperError::Config("schedule.path is required for a file store".into())
            })?;
            Ok(Box::new(CrontabStore::open(CrontabFile::new(path), &lock_path)?))
        }
    }
}
