//! Desired-state feed client.
//!
//! `GET <desired_state_url>/<environment>` returns a JSON array of
//! `{"name": ..., "frequency": ...}` objects. No retries: a failed fetch
//! aborts the cron run and the next scheduled run tries again.

use crate::config::Config;
use crate::error::{BackopperError, Result};
use crate::types::DesiredStateEntry;
use std::time::Duration;

/// Longest slice of a response body kept in errors and logs.
const BODY_SNIPPET: usize = 512;

pub trait DesiredStateFetcher {
    fn fetch(&self, environment: &str) -> Result<Vec<DesiredStateEntry>>;
}

/// Blocking HTTP client for the desired-state feed.
pub struct HttpFeed {
    client: reqwest::blocking::Client,
    base: String,
}

impl HttpFeed {
    pub fn new(base: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        if config.api.desired_state_url.is_empty() {
            return Err(BackopperError::Config(
                "api.desired_state_url is not set".into(),
            ));
        }
        Self::new(
            &config.api.desired_state_url,
            Duration::from_secs(config.api.timeout_secs),
        )
    }

    fn url_for(&self, environment: &str) -> String {
        format!("{}/{}", self.base, environment)
    }
}

impl DesiredStateFetcher for HttpFeed {
    fn fetch(&self, environment: &str) -> Result<Vec<DesiredStateEntry>> {
        let url = self.url_for(environment);
        tracing::debug!(%url, "fetching desired state");

        let fetch_err = |message: String| BackopperError::Fetch {
            environment: environment.to_string(),
            message,
        };

        let resp = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .map_err(|e| fetch_err(format!("GET {url}: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .map_err(|e| fetch_err(format!("GET {url}: reading body: {e}")))?;

        if !status.is_success() {
            tracing::error!(environment, %status, body = %snippet(&body), "desired state fetch rejected");
            return Err(fetch_err(format!(
                "GET {url}: HTTP {status}: {}",
                snippet(&body)
            )));
        }

        let entries = parse_feed(&body).map_err(|e| {
            tracing::error!(environment, error = %e, body = %snippet(&body), "malformed desired state");
            BackopperError::Parse {
                environment: environment.to_string(),
                message: e.to_string(),
                body: snippet(&body),
            }
        })?;
        tracing::info!(environment, count = entries.len(), "desired state fetched");
        Ok(entries)
    }
}

pub fn parse_feed(body: &str) -> serde_json::Result<Vec<DesiredStateEntry>> {
    serde_json::from_str(body)
}

fn snippet(body: &str) -> String {
    if body.len() <= BODY_SNIPPET {
        return body.to_string();
    }
    let mut end = BODY_SNIPPET;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}
