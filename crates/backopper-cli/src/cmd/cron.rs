use crate::output::{print_json, render_report};
use anyhow::Context;
use backopper_core::config::Config;
use backopper_core::crontab::open_store;
use backopper_core::feed::{DesiredStateFetcher, HttpFeed};
use backopper_core::reconcile::{CommandTemplate, ReconciliationEngine};

pub fn run(config: &Config, dry_run: bool, json: bool) -> anyhow::Result<()> {
    tracing::info!(environment = %config.environment, dry_run, "cron started");

    // Fetch before touching the store: a failed fetch must leave it alone.
    let feed = HttpFeed::from_config(config).context("failed to set up desired-state client")?;
    let desired = feed
        .fetch(&config.environment)
        .with_context(|| format!("failed to fetch desired state for '{}'", config.environment))?;

    let engine = ReconciliationEngine::new(CommandTemplate::from_config(&config.runtime))
        .with_prune_stale(config.schedule.prune_stale);
    let mut store = open_store(&config.schedule).context("failed to open schedule store")?;
    let store_name = store.describe();

    let report = if dry_run {
        engine.stage(&desired, store.as_mut())
    } else {
        engine
            .reconcile(&desired, store.as_mut())
            .with_context(|| format!("failed to commit schedule to {store_name}"))?
    };
    tracing::info!(store = %store_name, "cron ended");

    if json {
        return print_json(&serde_json::json!({
            "store": store_name,
            "dry_run": dry_run,
            "report": report,
        }));
    }
    print!("{}", render_report(&report, dry_run));
    Ok(())
}
