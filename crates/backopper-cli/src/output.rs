//! Human and JSON rendering of command results.

use backopper_core::backup::{BackupOutcome, BackupStatus};
use backopper_core::reconcile::ReconciliationReport;
use serde::Serialize;
use std::fmt::Write;

/// Pretty JSON on stdout; logs go to stderr, so this stays parseable.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Reconciliation report as an APP / OP / ENTRY listing followed by skipped
/// and healed apps. The entry column is last and never padded.
pub fn render_report(report: &ReconciliationReport, dry_run: bool) -> String {
    let mut out = String::new();
    if report.changes.is_empty() {
        out.push_str("No valid entries in the desired state.\n");
    } else {
        let app_w = report
            .changes
            .iter()
            .map(|c| c.name.len())
            .chain(["APP".len()])
            .max()
            .unwrap_or(0);
        let op_w = report
            .changes
            .iter()
            .map(|c| c.op.as_str().len())
            .chain(["OP".len()])
            .max()
            .unwrap_or(0);

        let _ = writeln!(out, "{:app_w$}  {:op_w$}  ENTRY", "APP", "OP");
        for c in &report.changes {
            let _ = writeln!(out, "{:app_w$}  {:op_w$}  {}", c.name, c.op.as_str(), c.entry);
        }
    }

    for s in &report.skipped {
        let _ = writeln!(
            out,
            "skipped {} (frequency '{}'): {:?}",
            s.name, s.frequency, s.reason
        );
    }
    for h in &report.healed {
        let _ = writeln!(out, "collapsed {} duplicate entries for {}", h.found, h.name);
    }
    if dry_run {
        out.push_str("dry run: no changes written\n");
    }
    out
}

pub fn render_outcome(outcome: &BackupOutcome) -> String {
    let app = &outcome.app;
    let error = outcome.error.as_deref().unwrap_or("unknown error");
    let mut out = match (&outcome.status, &outcome.archive) {
        (BackupStatus::Succeeded, Some(archive)) => {
            format!("backed up {app} to {}\n", archive.display())
        }
        (BackupStatus::Succeeded, None) => format!("backed up {app}\n"),
        (BackupStatus::Unreported, _) => {
            format!("backed up {app} but the completion report failed: {error}\n")
        }
        (BackupStatus::Failed, _) => format!("backup of {app} failed: {error}\n"),
    };
    for path in &outcome.pruned {
        let _ = writeln!(out, "pruned {}", path.display());
    }
    out
}
