//! Schedule reconciliation: converge the local crontab to the desired state.
//!
//! For every valid desired entry the engine builds the canonical crontab
//! line and compares its text byte for byte with what the store holds under
//! the same tag. Identical text is a no-op, which makes re-running with an
//! unchanged feed free of writes.

use crate::config::RuntimeConfig;
use crate::crontab::{CronEntry, ScheduleStore};
use crate::error::{BackopperError, Result};
use crate::types::{validate_app_name, DesiredStateEntry, Frequency};
use serde::Serialize;
use std::collections::HashSet;

// ---------------------------------------------------------------------------
// CommandTemplate
// ---------------------------------------------------------------------------

/// Builds the command line a scheduled entry runs for an app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    activate: Option<String>,
    binary: String,
}

impl CommandTemplate {
    pub fn new(activate: Option<String>, binary: impl Into<String>) -> Self {
        Self {
            activate,
            binary: binary.into(),
        }
    }

    pub fn from_config(runtime: &RuntimeConfig) -> Self {
        Self::new(runtime.activate.clone(), runtime.binary.clone())
    }

    pub fn command_for(&self, app: &str) -> String {
        let invocation = format!("{} --action=backup --app={app}", self.binary);
        match &self.activate {
            Some(script) => format!("/bin/bash -c 'source {script} && {invocation}'"),
            None => format!("/bin/bash -c '{invocation}'"),
        }
    }

    pub fn entry_for(&self, app: &str, frequency: Frequency) -> CronEntry {
        CronEntry::scheduled(frequency, self.command_for(app), app)
    }
}

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffOp {
    NoOp,
    Create,
    Replace,
    Delete,
}

impl DiffOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffOp::NoOp => "no_op",
            DiffOp::Create => "create",
            DiffOp::Replace => "replace",
            DiffOp::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    pub name: String,
    pub op: DiffOp,
    /// The entry text after the change, or the removed text for deletes.
    pub entry: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UnsupportedFrequency,
    InvalidName,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skipped {
    pub name: String,
    pub frequency: String,
    pub reason: SkipReason,
}

/// Duplicate entries found under one tag and collapsed to a single entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inconsistency {
    pub name: String,
    pub found: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub changes: Vec<Change>,
    pub skipped: Vec<Skipped>,
    pub healed: Vec<Inconsistency>,
}

impl ReconciliationReport {
    pub fn count(&self, op: DiffOp) -> usize {
        self.changes.iter().filter(|c| c.op == op).count()
    }

    /// True when the run changed nothing in the store.
    pub fn is_noop(&self) -> bool {
        self.healed.is_empty() && self.changes.iter().all(|c| c.op == DiffOp::NoOp)
    }

    pub fn op_for(&self, name: &str) -> Option<DiffOp> {
        self.changes.iter().find(|c| c.name == name).map(|c| c.op)
    }
}

// ---------------------------------------------------------------------------
// ReconciliationEngine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    template: CommandTemplate,
    prune_stale: bool,
}

impl ReconciliationEngine {
    pub fn new(template: CommandTemplate) -> Self {
        Self {
            template,
            prune_stale: false,
        }
    }

    /// Also delete managed entries whose app is no longer desired.
    pub fn with_prune_stale(mut self, prune: bool) -> Self {
        self.prune_stale = prune;
        self
    }

    /// Stage the diff against `store` and commit it in one step.
    ///
    /// On commit failure the store's durable state is untouched and the
    /// error is returned; the report of that run is discarded.
    pub fn reconcile(
        &self,
        desired: &[DesiredStateEntry],
        store: &mut dyn ScheduleStore,
    ) -> Result<ReconciliationReport> {
        let report = self.stage(desired, store);
        store.commit()?;
        Ok(report)
    }

    /// Compute the diff and stage it in `store` without committing.
    pub fn stage(
        &self,
        desired: &[DesiredStateEntry],
        store: &mut dyn ScheduleStore,
    ) -> ReconciliationReport {
        let mut report = ReconciliationReport::default();
        let mut seen: HashSet<&str> = HashSet::new();

        for item in desired {
            let skip = |reason| Skipped {
                name: item.name.clone(),
                frequency: item.frequency.clone(),
                reason,
            };

            if validate_app_name(&item.name).is_err() {
                tracing::warn!(name = %item.name, "skipping desired entry with invalid name");
                report.skipped.push(skip(SkipReason::InvalidName));
                continue;
            }
            let Ok(frequency) = item.frequency.parse::<Frequency>() else {
                tracing::warn!(
                    name = %item.name,
                    frequency = %item.frequency,
                    "skipping desired entry with unsupported frequency"
                );
                report.skipped.push(skip(SkipReason::UnsupportedFrequency));
                continue;
            };
            if !seen.insert(item.name.as_str()) {
                tracing::warn!(name = %item.name, "duplicate desired entry, keeping the first");
                report.skipped.push(skip(SkipReason::Duplicate));
                continue;
            }

            let op = self.apply_one(&item.name, frequency, store, &mut report);
            let entry = self.template.entry_for(&item.name, frequency);
            report.changes.push(Change {
                name: item.name.clone(),
                op,
                entry: entry.text().to_string(),
            });
        }

        if self.prune_stale {
            self.prune(&seen, store, &mut report);
        }

        report
    }

    fn apply_one(
        &self,
        name: &str,
        frequency: Frequency,
        store: &mut dyn ScheduleStore,
        report: &mut ReconciliationReport,
    ) -> DiffOp {
        let canonical = self.template.entry_for(name, frequency);
        let mut existing = store.list(name);

        if existing.len() > 1 {
            let inconsistency = BackopperError::StoreInconsistency {
                name: name.to_string(),
                found: existing.len(),
            };
            tracing::warn!(error = %inconsistency, "healing schedule store");
            report.healed.push(Inconsistency {
                name: name.to_string(),
                found: existing.len(),
            });
            for extra in existing.drain(1..) {
                store.remove(&extra);
            }
        }

        match existing.first() {
            None => {
                tracing::info!(name, entry = %canonical, "creating schedule entry");
                store.upsert(canonical);
                DiffOp::Create
            }
            Some(current) if current.text() == canonical.text() => {
                tracing::info!(name, "schedule entry already up to date");
                DiffOp::NoOp
            }
            Some(current) => {
                tracing::info!(
                    name,
                    from = ?current.frequency(),
                    to = %frequency,
                    old = %current,
                    new = %canonical,
                    "replacing schedule entry"
                );
                store.remove(current);
                store.upsert(canonical);
                DiffOp::Replace
            }
        }
    }

    fn prune(
        &self,
        desired: &HashSet<&str>,
        store: &mut dyn ScheduleStore,
        report: &mut ReconciliationReport,
    ) {
        for entry in store.entries() {
            let Some(tag) = entry.tag() else { continue };
            if desired.contains(tag) || entry.command() != self.template.command_for(tag) {
                continue;
            }
            tracing::info!(name = tag, entry = %entry, "removing stale schedule entry");
            report.changes.push(Change {
                name: tag.to_string(),
                op: DiffOp::Delete,
                entry: entry.text().to_string(),
            });
            store.remove(&entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crontab::testing::MemoryBackend;
    use crate::crontab::CrontabStore;

    fn engine() -> ReconciliationEngine {
        ReconciliationEngine::new(CommandTemplate::new(
            Some("/opt/backopper/activate".into()),
            "/opt/backopper/bin/backopper",
        ))
    }

    fn desired(items: &[(&str, &str)]) -> Vec<DesiredStateEntry> {
        items
            .iter()
            .map(|(n, f)| DesiredStateEntry::new(*n, *f))
            .collect()
    }

    fn store(content: &str) -> (MemoryBackend, CrontabStore<MemoryBackend>) {
        let backend = MemoryBackend::with_content(content);
        let store = CrontabStore::load(backend.clone()).unwrap();
        (backend, store)
    }

    fn entries_for(backend: &MemoryBackend, tag: &str) -> Vec<CronEntry> {
        crate::crontab::Crontab::parse(&backend.content()).find_tag(tag)
    }

    #[test]
    fn command_template_shape() {
        let t = CommandTemplate::new(Some("/venv/bin/activate".into()), "/venv/bin/backopper");
        assert_eq!(
            t.command_for("app1"),
            "/bin/bash -c 'source /venv/bin/activate && /venv/bin/backopper --action=backup --app=app1'"
        );
        let bare = CommandTemplate::new(None, "backopper");
        assert_eq!(
            bare.command_for("app1"),
            "/bin/bash -c 'backopper --action=backup --app=app1'"
        );
    }

    #[test]
    fn creates_valid_entries_and_drops_unsupported_frequency() {
        let (backend, mut store) = store("");
        let report = engine()
            .reconcile(
                &desired(&[("app1", "daily"), ("app2", "monthly")]),
                &mut store,
            )
            .unwrap();

        assert_eq!(report.op_for("app1"), Some(DiffOp::Create));
        assert_eq!(report.op_for("app2"), None);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].reason, SkipReason::UnsupportedFrequency);

        let app1 = entries_for(&backend, "app1");
        assert_eq!(app1.len(), 1);
        assert_eq!(app1[0].schedule(), "@daily");
        assert!(entries_for(&backend, "app2").is_empty());
    }

    #[test]
    fn null_frequency_is_skipped_next_to_valid_entry() {
        let (backend, mut store) = store("");
        let feed = crate::feed::parse_feed(
            r#"[{"name":"app1","frequency":"daily"},{"name":"app2","frequency":null}]"#,
        )
        .unwrap();
        let report = engine().reconcile(&feed, &mut store).unwrap();

        assert_eq!(report.op_for("app1"), Some(DiffOp::Create));
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].name, "app2");
        assert_eq!(report.skipped[0].reason, SkipReason::UnsupportedFrequency);
        assert_eq!(entries_for(&backend, "app1").len(), 1);
        assert!(entries_for(&backend, "app2").is_empty());
    }

    #[test]
    fn reconciles_user_crontab_through_crontab_program() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("table"), "MAILTO=ops@example.com\n").unwrap();
        let lock = dir.path().join("crontab.lock");
        let feed = desired(&[("app1", "daily"), ("app2", "yearly")]);

        let backend = crate::crontab::testing::fake_crontab(dir.path(), None);
        let mut store = CrontabStore::open(backend.clone(), &lock).unwrap();
        let report = engine().reconcile(&feed, &mut store).unwrap();
        drop(store);
        assert_eq!(report.op_for("app1"), Some(DiffOp::Create));
        assert_eq!(report.skipped.len(), 1);

        let table = std::fs::read_to_string(dir.path().join("table")).unwrap();
        assert_eq!(
            table,
            "MAILTO=ops@example.com\n\
             @daily /bin/bash -c 'source /opt/backopper/activate && /opt/backopper/bin/backopper --action=backup --app=app1' # app1\n"
        );

        let mut again = CrontabStore::open(backend, &lock).unwrap();
        assert!(engine().reconcile(&feed, &mut again).unwrap().is_noop());
        let log = std::fs::read_to_string(dir.path().join("crontab.log")).unwrap();
        assert_eq!(log.lines().filter(|l| *l == "-").count(), 1);
    }

    #[test]
    fn second_run_is_all_noops() {
        let (backend, mut store) = store("");
        let feed = desired(&[("app1", "daily"), ("app2", "weekly")]);
        engine().reconcile(&feed, &mut store).unwrap();
        let writes = backend.writes.get();

        let mut again = CrontabStore::load(backend.clone()).unwrap();
        let report = engine().reconcile(&feed, &mut again).unwrap();
        assert!(report.is_noop());
        assert_eq!(report.count(DiffOp::NoOp), 2);
        assert_eq!(backend.writes.get(), writes);
    }

    #[test]
    fn frequency_change_replaces_without_duplicating() {
        let (backend, mut store) = store("");
        engine()
            .reconcile(&desired(&[("app1", "daily")]), &mut store)
            .unwrap();

        let mut store = CrontabStore::load(backend.clone()).unwrap();
        let report = engine()
            .reconcile(&desired(&[("app1", "weekly")]), &mut store)
            .unwrap();

        assert_eq!(report.op_for("app1"), Some(DiffOp::Replace));
        let app1 = entries_for(&backend, "app1");
        assert_eq!(app1.len(), 1);
        assert_eq!(app1[0].schedule(), "@weekly");
    }

    #[test]
    fn hand_edited_entry_is_replaced() {
        let (backend, mut store) = store("@daily /usr/bin/old-script # app1\n");
        let report = engine()
            .reconcile(&desired(&[("app1", "daily")]), &mut store)
            .unwrap();
        assert_eq!(report.op_for("app1"), Some(DiffOp::Replace));
        let app1 = entries_for(&backend, "app1");
        assert_eq!(app1.len(), 1);
        assert!(app1[0].command().contains("--app=app1"));
    }

    #[test]
    fn duplicate_tags_are_collapsed() {
        let seeded = "@daily /usr/bin/a # app1\n@weekly /usr/bin/b # app1\n";
        let (backend, mut store) = store(seeded);
        let report = engine()
            .reconcile(&desired(&[("app1", "daily")]), &mut store)
            .unwrap();

        assert_eq!(report.healed.len(), 1);
        assert_eq!(report.healed[0].found, 2);
        assert_eq!(entries_for(&backend, "app1").len(), 1);
    }

    #[test]
    fn identical_duplicates_collapse_to_noop_entry() {
        let canonical = engine().template.entry_for("app1", Frequency::Daily);
        let seeded = format!("{canonical}\n{canonical}\n");
        let (backend, mut store) = store(&seeded);
        let report = engine()
            .reconcile(&desired(&[("app1", "daily")]), &mut store)
            .unwrap();

        assert_eq!(report.op_for("app1"), Some(DiffOp::NoOp));
        assert!(!report.is_noop());
        assert_eq!(backend.content(), format!("{canonical}\n"));
    }

    #[test]
    fn stale_entries_are_kept_by_default() {
        let (backend, mut store) = store("");
        engine()
            .reconcile(&desired(&[("app1", "daily"), ("gone", "daily")]), &mut store)
            .unwrap();

        let mut store = CrontabStore::load(backend.clone()).unwrap();
        engine()
            .reconcile(&desired(&[("app1", "daily")]), &mut store)
            .unwrap();
        assert_eq!(entries_for(&backend, "gone").len(), 1);
    }

    #[test]
    fn prune_removes_only_managed_stale_entries() {
        let stale = engine().template.entry_for("gone", Frequency::Weekly);
        let seeded = format!("{stale}\n@daily /usr/bin/foreign # other\n0 1 * * * /bin/true\n");
        let (backend, mut store) = store(&seeded);
        let report = engine()
            .with_prune_stale(true)
            .reconcile(&desired(&[("app1", "daily")]), &mut store)
            .unwrap();

        assert_eq!(report.op_for("gone"), Some(DiffOp::Delete));
        assert!(entries_for(&backend, "gone").is_empty());
        assert_eq!(entries_for(&backend, "other").len(), 1);
        assert!(backend.content().contains("0 1 * * * /bin/true"));
    }

    #[test]
    fn invalid_names_and_duplicates_are_skipped() {
        let (backend, mut store) = store("");
        let report = engine()
            .reconcile(
                &desired(&[
                    ("app1", "daily"),
                    ("app1", "weekly"),
                    ("x'; rm -rf /", "daily"),
                ]),
                &mut store,
            )
            .unwrap();

        let reasons: Vec<SkipReason> = report.skipped.iter().map(|s| s.reason).collect();
        assert_eq!(reasons, vec![SkipReason::Duplicate, SkipReason::InvalidName]);
        let app1 = entries_for(&backend, "app1");
        assert_eq!(app1.len(), 1);
        assert_eq!(app1[0].schedule(), "@daily");
    }

    #[test]
    fn failed_commit_keeps_pre_run_state() {
        let seeded = "MAILTO=ops@example.com\n@daily /usr/bin/a # app1\n";
        let (backend, mut store) = store(seeded);
        backend.fail_writes.set(true);

        let result = engine().reconcile(
            &desired(&[("app1", "weekly"), ("app3", "daily")]),
            &mut store,
        );
        assert!(result.is_err());
        assert_eq!(backend.content(), seeded);
    }

    #[test]
    fn uniqueness_holds_across_many_runs() {
        let (backend, _) = store("");
        let feeds = [
            desired(&[("a", "daily"), ("b", "weekly")]),
            desired(&[("a", "weekly"), ("b", "weekly"), ("c", "daily")]),
            desired(&[("a", "daily"), ("c", "monthly")]),
            desired(&[("a", "daily"), ("a", "weekly"), ("b", "daily")]),
        ];
        for feed in &feeds {
            let mut store = CrontabStore::load(backend.clone()).unwrap();
            engine().reconcile(feed, &mut store).unwrap();
            for tag in ["a", "b", "c"] {
                assert!(entries_for(&backend, tag).len() <= 1, "duplicate for {tag}");
            }
        }
    }
}
