mod cmd;
mod output;

use anyhow::Context;
use backopper_core::config::{Config, DEFAULT_CONFIG_PATH};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "backopper",
    about = "Scheduled database backups driven by a remote desired-state API",
    version
)]
struct Cli {
    /// What to do
    #[arg(long, value_enum)]
    action: Action,

    /// App to back up or inspect
    #[arg(
        long,
        required_if_eq_any([("action", "backup"), ("action", "latest"), ("action", "download")])
    )]
    app: Option<String>,

    /// Config file
    #[arg(long, env = "BACKOPPER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Remote host holding the backups (latest, download)
    #[arg(
        long,
        required_if_eq_any([("action", "latest"), ("action", "download")])
    )]
    host: Option<String>,

    /// Download destination, a file or an existing directory
    #[arg(long, default_value = ".")]
    dest: PathBuf,

    /// Compute the schedule changes without writing them (cron)
    #[arg(long)]
    dry_run: bool,

    /// Output as JSON
    #[arg(long, short = 'j')]
    json: bool,

    /// Debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Action {
    /// Dump, archive and report one app
    Backup,
    /// Reconcile the local schedule with the desired state
    Cron,
    /// Show the newest backup of an app on a remote host
    Latest,
    /// Download the newest backup of an app from a remote host
    Download,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;
    for warning in config.validate() {
        tracing::warn!("{}", warning.message);
    }

    // clap enforces --app and --host for the actions that need them
    let app = cli.app.as_deref().unwrap_or_default();
    let host = cli.host.as_deref().unwrap_or_default();

    match cli.action {
        Action::Cron => cmd::cron::run(&config, cli.dry_run, cli.json),
        Action::Backup => cmd::backup::run(&config, app, cli.json),
        Action::Latest => cmd::remote::latest(&config, host, app, cli.json),
        Action::Download => cmd::remote::download(&config, host, app, &cli.dest, cli.json),
    }
}
