//! Completion reports to the central tracking service.

use crate::config::Config;
use crate::error::{BackopperError, Result};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;

/// Body of `POST <completion_url>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionEvent {
    pub secret: String,
    /// Unix timestamp (seconds) of the completed dump.
    pub executed: i64,
    pub name: String,
}

impl CompletionEvent {
    pub fn new(secret: &str, app: &str, executed: DateTime<Utc>) -> Self {
        Self {
            secret: secret.to_string(),
            executed: executed.timestamp(),
            name: app.to_string(),
        }
    }
}

pub trait CompletionReporter {
    fn report(&self, event: &CompletionEvent) -> Result<()>;
}

pub struct HttpReporter {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpReporter {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        if config.api.completion_url.is_empty() {
            return Err(BackopperError::Config("api.completion_url is not set".into()));
        }
        Self::new(
            &config.api.completion_url,
            Duration::from_secs(config.api.timeout_secs),
        )
    }
}

impl CompletionReporter for HttpReporter {
    /// Anything but `200 OK` is a [`BackopperError::Report`] carrying the
    /// response body.
    fn report(&self, event: &CompletionEvent) -> Result<()> {
        let resp = self.client.post(&self.url).json(event).send()?;
        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().unwrap_or_default();
            return Err(BackopperError::Report {
                app: event.name.clone(),
                status: status.as_u16(),
                body,
            });
        }
        tracing::info!(app = %event.name, executed = event.executed, "completion reported");
        Ok(())
    }
}
