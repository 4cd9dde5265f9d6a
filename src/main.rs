use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use revisionist::config::{Cli, ConfigFile};
use revisionist::history::History;
use revisionist::repo::Repository;
use revisionist::script::{self, Step};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Held until exit so buffered log lines are flushed
    let guard = init_logging(cli.log_file.as_deref())?;

    let config = match &cli.config {
        Some(path) => ConfigFile::read(path)?,
        None => ConfigFile::load()?.unwrap_or_default(),
    };
    let registry = config.registry()?;
    let store = config.provision(&registry);
    let repo = Repository::new(History::new(Arc::new(store), registry));

    let content = std::fs::read_to_string(&cli.script)
        .wrap_err_with(|| format!("failed to read script {}", cli.script.display()))?;
    let steps: Vec<Step> = serde_json::from_str(&content)
        .wrap_err_with(|| format!("invalid script {}", cli.script.display()))?;

    tracing::info!(steps = steps.len(), "replaying script");
    let reports = script::run(&repo, steps).await;

    let failed = reports.iter().filter(|r| r.error.is_some()).count();
    for report in &reports {
        let line = if cli.pretty {
            serde_json::to_string_pretty(report)?
        } else {
            serde_json::to_string(report)?
        };
        println!("{}", line);
    }

    if failed > 0 {
        eprintln!("{} of {} steps failed", failed, reports.len());
        drop(guard);
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::from_default_env();
    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .wrap_err_with(|| format!("failed to create log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_writer(writer)
                .with_ansi(false)
                .with_env_filter(filter)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
            Ok(None)
        }
    }
}
