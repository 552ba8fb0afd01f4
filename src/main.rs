//! kubeprov - entry point
//!
//! Drives the action engine against the local host.

use anyhow::{Context as _, Result};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use kubeprov::cli::{
    Cli, Commands, apply_workflow, exec_workflow, run_check, run_workflow, script_workflow,
};
use kubeprov::config::ProvisionConfig;
use kubeprov::error::ProvisionError;
use kubeprov::process_guard::{self, ProcessGuard};
use kubeprov::transport::LocalShellTransport;

/// `RUST_LOG` overrides the default `info` level. Logs go to stderr.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

fn main() -> ExitCode {
    init_tracing();

    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    let guard = ProcessGuard::new();

    let cli = Cli::parse_args();
    debug!("CLI arguments parsed");

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    };

    debug!(children = guard.child_count(), "shutting down");
    code
}

fn run(cli: Cli) -> Result<ExitCode> {
    let transport = Arc::new(LocalShellTransport::new());

    let res = match &cli.command {
        Commands::Validate { config } => {
            info!("Validating configuration file: {:?}", config);
            ProvisionConfig::load_from_file(config)?.validate()?;
            println!("Configuration file is valid: {:?}", config);
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Check { check } => {
            let mut ctx = cli.context(transport);
            let found = run_check(&mut ctx, &check.checker())?;
            println!("{}", found);
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Exec { command } => {
            let mut ctx = cli.context(transport);
            run_workflow(&mut ctx, exec_workflow(command))
        }
        Commands::Script { file } => {
            let workflow = script_workflow(file)
                .with_context(|| format!("Failed to read script {:?}", file))?;
            let mut ctx = cli.context(transport);
            run_workflow(&mut ctx, workflow)
        }
        Commands::Apply { config, manifests } => {
            let config = ProvisionConfig::load_from_file(config)?;
            config.validate()?;
            let mut ctx = cli.context(transport).with_sudo(cli.sudo || config.sudo);
            run_workflow(&mut ctx, apply_workflow(&config, manifests))
        }
    };

    match res {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(ProvisionError::Action(e)) => {
            eprintln!("Error: {}", e);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}
