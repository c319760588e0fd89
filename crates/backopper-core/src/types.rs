use crate::error::{BackopperError, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Frequency
// ---------------------------------------------------------------------------

/// Backup frequencies the scheduler accepts. Anything else coming from the
/// feed is dropped during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
        }
    }

    /// The crontab schedule marker, e.g. `@daily`.
    pub fn marker(&self) -> &'static str {
        match self {
            Frequency::Daily => "@daily",
            Frequency::Weekly => "@weekly",
        }
    }

    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "@daily" => Some(Frequency::Daily),
            "@weekly" => Some(Frequency::Weekly),
            _ => None,
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            other => Err(format!("unsupported frequency '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// DesiredStateEntry
// ---------------------------------------------------------------------------

/// One entry of the remote desired-state feed. Untrusted: `frequency` is the
/// raw wire value and may be outside [`Frequency`]. A missing, null or
/// non-string frequency still deserializes, so one bad entry is skipped
/// later instead of rejecting the whole feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredStateEntry {
    pub name: String,
    #[serde(default, deserialize_with = "lenient_frequency")]
    pub frequency: String,
}

/// Null becomes empty; numbers, bools and objects keep their JSON text.
fn lenient_frequency<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

impl DesiredStateEntry {
    pub fn new(name: impl Into<String>, frequency: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            frequency: frequency.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// App name validation
// ---------------------------------------------------------------------------

static APP_NAME_RE: OnceLock<Regex> = OnceLock::new();

fn app_name_re() -> &'static Regex {
    APP_NAME_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap())
}

/// App names end up inside a shell command line and a directory path, so
/// only a conservative character set is accepted.
pub fn validate_app_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 || !app_name_re().is_match(name) {
        return Err(BackopperError::InvalidAppName(name.to_string()));
    }
    Ok(())
}
