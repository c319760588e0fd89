use crate::output::{print_json, render_outcome};
use anyhow::Context;
use backopper_core::backup::BackupRunner;
use backopper_core::config::Config;
use backopper_core::notify::sink_from_config;
use backopper_core::report::HttpReporter;

/// Failed dumps and rejected reports have already been notified, so they
/// do not fail the command.
pub fn run(config: &Config, app: &str, json: bool) -> anyhow::Result<()> {
    let reporter =
        HttpReporter::from_config(config).context("failed to set up completion reporter")?;
    let sink = sink_from_config(&config.notify);

    let outcome = BackupRunner::new(config, &reporter, sink.as_ref())
        .run(app)
        .with_context(|| format!("backup for '{app}' did not start"))?;

    if json {
        return print_json(&outcome);
    }
    print!("{}", render_outcome(&outcome));
    Ok(())
}
