//! Per-app database credentials.
//!
//! Credentials are read from the app's dotenv-style file into a value owned
//! by the backup run. They are never exported into the process environment;
//! only the dump child process receives the password.

use crate::error::{BackopperError, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
    pub database: String,
    pub host: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("host", &self.host)
            .finish()
    }
}

impl Credentials {
    /// Load `DB_USER`, `DB_PASS`, `DB_NAME` and optional `DB_HOST` for `app`.
    pub fn load(app: &str, path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BackopperError::Config(format!(
                "credentials file for '{app}' not found: {}",
                path.display()
            )));
        }
        // `from_path_iter` parses without exporting into the process env.
        #[allow(deprecated)]
        let iter = dotenv::from_path_iter(path)
            .map_err(|e| BackopperError::Config(format!("{}: {e}", path.display())))?;
        let mut vars = HashMap::new();
        for item in iter {
            let (key, value) = item.map_err(|e| {
                BackopperError::Config(format!("{}: {e}", path.display()))
            })?;
            vars.insert(key, value);
        }
        Self::from_vars(app, vars)
    }

    fn from_vars(app: &str, mut vars: HashMap<String, String>) -> Result<Self> {
        let mut take = |key: &str| {
            vars.remove(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| BackopperError::Credentials {
                    app: app.to_string(),
                    key: key.to_string(),
                })
        };
        let user = take("DB_USER")?;
        let password = take("DB_PASS")?;
        let database = take("DB_NAME")?;
        let host = take("DB_HOST").ok();
        Ok(Self {
            user,
            password,
            database,
            host,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_env_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "# shop\nAPP_ENV=production\nDB_USER=shop\nDB_PASS=\"s3cret\"\nDB_NAME=shop_db\n",
        )
        .unwrap();

        let creds = Credentials::load("shop", &path).unwrap();
        assert_eq!(creds.user, "shop");
        assert_eq!(creds.password, "s3cret");
        assert_eq!(creds.database, "shop_db");
        assert_eq!(creds.host, None);
    }

    #[test]
    fn loading_does_not_touch_process_env() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "DB_USER=u\nDB_PASS=p\nDB_NAME=n\nBACKOPPER_TEST_MARKER=1\n",
        )
        .unwrap();
        Credentials::load("x", &path).unwrap();
        assert!(std::env::var("BACKOPPER_TEST_MARKER").is_err());
    }

    #[test]
    fn missing_key_names_the_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "DB_USER=u\nDB_NAME=n\n").unwrap();
        let err = Credentials::load("shop", &path).unwrap_err();
        assert!(
            matches!(err, BackopperError::Credentials { ref key, .. } if key == "DB_PASS"),
            "got {err:?}"
        );
    }

    #[test]
    fn debug_redacts_password() {
        let creds = Credentials {
            user: "u".into(),
            password: "hunter2".into(),
            database: "d".into(),
            host: None,
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
