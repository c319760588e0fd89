use crate::error::{BackopperError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/backopper/config.yaml";
pub const APP_PLACEHOLDER: &str = "{app}";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ApiConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base of the desired-state feed; the environment is appended as a path
    /// segment.
    #[serde(default)]
    pub desired_state_url: String,
    #[serde(default)]
    pub completion_url: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            desired_state_url: String::new(),
            completion_url: String::new(),
            secret: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// ScheduleConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// The invoking user's crontab, managed through the `crontab` binary.
    #[default]
    User,
    /// A crontab-format file, e.g. under `/etc/cron.d`.
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub store: StoreKind,
    /// Crontab file path, required when `store: file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_path: Option<PathBuf>,
    /// Whose crontab to manage when `store: user` (`crontab -u`). Defaults
    /// to the invoking user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Remove managed entries whose app disappeared from the feed.
    #[serde(default)]
    pub prune_stale: bool,
}

impl ScheduleConfig {
    pub fn lock_path(&self) -> PathBuf {
        if let Some(p) = &self.lock_path {
            return p.clone();
        }
        match (&self.store, &self.path) {
            (StoreKind::File, Some(path)) => {
                let mut name = path.as_os_str().to_owned();
                name.push(".lock");
                PathBuf::from(name)
            }
            _ => std::env::temp_dir().join("backopper-crontab.lock"),
        }
    }
}

// ---------------------------------------------------------------------------
// RuntimeConfig
// ---------------------------------------------------------------------------

/// How scheduled entries invoke the binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Script sourced before the invocation (exports config, PATH, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activate: Option<String>,
    #[serde(default = "default_binary")]
    pub binary: String,
}

fn default_binary() -> String {
    "/usr/local/bin/backopper".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            activate: None,
            binary: default_binary(),
        }
    }
}

// ---------------------------------------------------------------------------
// BackupConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Backup directory template, `{app}` is replaced by the app name.
    #[serde(default = "default_backup_directory")]
    pub directory: String,
    /// Credentials file template, `{app}` is replaced by the app name.
    #[serde(default = "default_credentials")]
    pub credentials: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    #[serde(default = "default_dump_program")]
    pub dump_program: String,
    #[serde(default = "default_compress_program")]
    pub compress_program: String,
}

fn default_backup_directory() -> String {
    "/var/backups/{app}".to_string()
}

fn default_credentials() -> String {
    "/srv/{app}/.env".to_string()
}

fn default_retention_days() -> u64 {
    7
}

fn default_dump_program() -> String {
    "mysqldump".to_string()
}

fn default_compress_program() -> String {
    "gzip".to_string()
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            directory: default_backup_directory(),
            credentials: default_credentials(),
            retention_days: default_retention_days(),
            dump_program: default_dump_program(),
            compress_program: default_compress_program(),
        }
    }
}

// ---------------------------------------------------------------------------
// NotifyConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_sendmail")]
    pub sendmail: String,
    #[serde(default = "default_from")]
    pub from: String,
    /// Recipients. Empty means failures are only logged.
    #[serde(default)]
    pub to: Vec<String>,
}

fn default_sendmail() -> String {
    "sendmail".to_string()
}

fn default_from() -> String {
    "backopper@localhost".to_string()
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            sendmail: default_sendmail(),
            from: default_from(),
            to: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// RemoteConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_port")]
    pub port: u16,
    #[serde(default = "default_remote_user")]
    pub user: String,
    /// Remote backup directory template, `{app}` is replaced by the app name.
    #[serde(default = "default_backup_directory")]
    pub directory: String,
}

fn default_remote_port() -> u16 {
    25642
}

fn default_remote_user() -> String {
    "root".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            port: default_remote_port(),
            user: default_remote_user(),
            directory: default_backup_directory(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub environment: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

impl Config {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            api: ApiConfig::default(),
            schedule: ScheduleConfig::default(),
            runtime: RuntimeConfig::default(),
            backup: BackupConfig::default(),
            notify: NotifyConfig::default(),
            remote: RemoteConfig::default(),
        }
    }

    /// Load and validate the config file. Error-level findings fail the load.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BackopperError::ConfigNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        let errors: Vec<String> = cfg
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect();
        if !errors.is_empty() {
            return Err(BackopperError::Config(errors.join("; ")));
        }
        Ok(cfg)
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut out = Vec::new();
        let mut push = |level: WarnLevel, message: String| {
            out.push(ConfigWarning { level, message })
        };

        if self.environment.trim().is_empty() {
            push(WarnLevel::Error, "environment must not be empty".into());
        }
        if self.schedule.store == StoreKind::File && self.schedule.path.is_none() {
            push(
                WarnLevel::Error,
                "schedule.path is required when schedule.store is 'file'".into(),
            );
        }
        for (field, value) in [
            ("backup.directory", &self.backup.directory),
            ("backup.credentials", &self.backup.credentials),
            ("remote.directory", &self.remote.directory),
        ] {
            if !value.contains(APP_PLACEHOLDER) {
                push(
                    WarnLevel::Error,
                    format!("{field} must contain the {APP_PLACEHOLDER} placeholder"),
                );
            }
        }
        if self.api.desired_state_url.is_empty() {
            push(
                WarnLevel::Warning,
                "api.desired_state_url is not set; the cron action will fail".into(),
            );
        }
        if self.api.completion_url.is_empty() {
            push(
                WarnLevel::Warning,
                "api.completion_url is not set; successful backups cannot be reported".into(),
            );
        }
        if self.notify.to.is_empty() {
            push(
                WarnLevel::Warning,
                "notify.to is empty; failures are only logged".into(),
            );
        }
        if self.backup.retention_days == 0 {
            push(
                WarnLevel::Warning,
                "backup.retention_days is 0; every previous backup is pruned".into(),
            );
        }
        out
    }

    pub fn backup_dir(&self, app: &str) -> PathBuf {
        PathBuf::from(self.backup.directory.replace(APP_PLACEHOLDER, app))
    }

    pub fn credentials_path(&self, app: &str) -> PathBuf {
        PathBuf::from(self.backup.credentials.replace(APP_PLACEHOLDER, app))
    }

    pub fn remote_dir(&self, app: &str) -> String {
        self.remote.directory.replace(APP_PLACEHOLDER, app)
    }
}
