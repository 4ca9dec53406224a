use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use console::Style;
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use photolink::PhotolinkError;
use photolink::cli::{Cli, Command};
use photolink::config::PhotolinkConfig;
use photolink::job::JobBuilder;
use photolink::orchestrator::Orchestrator;
use photolink::state_machine::TaskState;
use photolink::store::JobStore;
use photolink::ui::{self, ProcessIndicator};
use photolink::worker::DryRunPipeline;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("  {} {err:#}", Style::new().red().bold().apply_to("✗"));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "photolink=debug"
    } else {
        "photolink=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config =
        PhotolinkConfig::load()?.with_cli_overrides(cli.cache_dir, cli.stop_timeout_ms);
    config.validate()?;

    if let Command::Tasks = cli.command {
        println!("{}", ui::render_catalog());
        return Ok(ExitCode::SUCCESS);
    }

    let store = JobStore::new(&config.cache_dir)?;
    if let Command::Run { .. } = cli.command {
        store
            .reset()
            .with_context(|| format!("cannot prepare {}", store.cache_dir().display()))?;
        // Must happen before the runtime spawns its worker threads.
        store.export_env();
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(session(cli.command, config, store))
}

async fn session(command: Command, config: PhotolinkConfig, store: JobStore) -> Result<ExitCode> {
    let delay = match command {
        Command::Run { delay_ms, .. } => Duration::from_millis(delay_ms),
        _ => Duration::ZERO,
    };
    let pipeline = DryRunPipeline::new().with_delay(delay);

    let mut orchestrator = Orchestrator::new(store, Arc::new(pipeline))
        .with_builder(JobBuilder::new(Arc::new(config.discovery())))
        .with_indicator(ProcessIndicator::new(config.message_interval()))
        .with_stop_timeout(config.stop_timeout())
        .with_console_echo(true);
    orchestrator.on_notice(|notice| eprintln!("{}", ui::render_notice(notice)));

    let Some(form) = command.submission_form() else {
        orchestrator.refresh()?;
        orchestrator.process_notices();
        return Ok(ExitCode::SUCCESS);
    };

    match orchestrator.submit(&form) {
        Ok(_) => {}
        // Already shown to the operator as a notice.
        Err(PhotolinkError::Validation(err)) if err.is_user_recoverable() => {
            return Ok(ExitCode::FAILURE);
        }
        Err(err) => return Err(err.into()),
    }

    let (stop_tx, stop_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if stop_tx.send(()).is_err() {
                break;
            }
        }
    });

    let code = match orchestrator.run_until_idle(stop_rx).await? {
        TaskState::Finished => ExitCode::SUCCESS,
        TaskState::Stopped => ExitCode::from(130),
        _ => ExitCode::FAILURE,
    };
    Ok(code)
}
