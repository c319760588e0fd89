//! Failure notifications for operators.

use crate::config::NotifyConfig;
use crate::error::{BackopperError, Result};
use std::io::Write;
use std::process::Stdio;

pub trait NotificationSink {
    fn notify(&self, subject: &str, body: &str) -> Result<()>;
}

/// Sends mail by piping an RFC 5322 message into `sendmail -t`.
#[derive(Debug, Clone)]
pub struct MailSink {
    program: String,
    from: String,
    to: Vec<String>,
}

impl MailSink {
    pub fn new(program: impl Into<String>, from: impl Into<String>, to: Vec<String>) -> Self {
        Self {
            program: program.into(),
            from: from.into(),
            to,
        }
    }

    fn message(&self, subject: &str, body: &str) -> String {
        format!(
            "From: {}\nTo: {}\nSubject: {}\nContent-Type: text/plain; charset=utf-8\n\n{}\n",
            self.from,
            self.to.join(", "),
            subject.replace(['\r', '\n'], " "),
            body
        )
    }
}

impl NotificationSink for MailSink {
    fn notify(&self, subject: &str, body: &str) -> Result<()> {
        let mut child = crate::io::program_command(&self.program)?
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BackopperError::Notify(format!("spawn {}: {e}", self.program)))?;
        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(self.message(subject, body).as_bytes())
                .map_err(|e| BackopperError::Notify(format!("write message: {e}")))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|e| BackopperError::Notify(e.to_string()))?;
        if !output.status.success() {
            return Err(BackopperError::Notify(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        tracing::info!(to = %self.to.join(", "), subject, "notification sent");
        Ok(())
    }
}

/// Used when no recipients are configured: failures only reach the log.
#[derive(Debug, Clone, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, subject: &str, body: &str) -> Result<()> {
        tracing::error!(subject, body, "failure notification (no recipients configured)");
        Ok(())
    }
}

pub fn sink_from_config(config: &NotifyConfig) -> Box<dyn NotificationSink> {
    if config.to.is_empty() {
        Box::new(LogSink)
    } else {
        Box::new(MailSink::new(
            config.sendmail.clone(),
            config.from.clone(),
            config.to.clone(),
        ))
    }
}
