use crate::output::print_json;
use anyhow::Context;
use backopper_core::config::Config;
use backopper_core::remote::RemoteHost;
use backopper_core::types::validate_app_name;
use std::path::Path;

pub fn latest(config: &Config, host: &str, app: &str, json: bool) -> anyhow::Result<()> {
    validate_app_name(app)?;
    let remote = RemoteHost::from_config(host, &config.remote);
    let session = remote
        .connect()
        .with_context(|| format!("failed to connect to {host}"))?;
    let latest = session.latest_backup(&config.remote_dir(app))?;

    if json {
        return print_json(&serde_json::json!({
            "host": host,
            "app": app,
            "latest": latest,
        }));
    }
    match latest {
        Some(path) => println!("{path}"),
        None => println!("no backups for {app} on {host}"),
    }
    Ok(())
}

pub fn download(
    config: &Config,
    host: &str,
    app: &str,
    dest: &Path,
    json: bool,
) -> anyhow::Result<()> {
    validate_app_name(app)?;
    let remote = RemoteHost::from_config(host, &config.remote);
    let session = remote
        .connect()
        .with_context(|| format!("failed to connect to {host}"))?;
    let latest = session
        .latest_backup(&config.remote_dir(app))?
        .ok_or_else(|| anyhow::anyhow!("no backups for {app} on {host}"))?;
    let local = session
        .download(&latest, dest)
        .with_context(|| format!("failed to download {latest}"))?;

    if json {
        return print_json(&serde_json::json!({
            "host": host,
            "app": app,
            "remote": latest,
            "local": local,
        }));
    }
    println!("downloaded {latest} to {}", local.display());
    Ok(())
}
