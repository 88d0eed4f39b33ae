use std::path::Path;

use clap::Parser;
use tracing::{error, info, warn};

use webhook_forge::cli::{self, Cli, Command, ConfigCommand};
use webhook_forge::config::{self, Config};
use webhook_forge::logging::{self, targets, LogConfig};
use webhook_forge::server::{run_server_with_config, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = cli.config_path();

    match cli.command {
        // No subcommand or explicit `start` both launch the server.
        None | Some(Command::Start) => run_server(&config_path).await,

        Some(Command::AdminToken { yes }) => cli::handle_admin_token(&config_path, yes),

        Some(Command::Config(sub)) => {
            match sub {
                ConfigCommand::Show => cli::handle_config_show(&config_path)?,
                ConfigCommand::Path => cli::handle_config_path(&config_path),
            }
            Ok(())
        }

        Some(Command::Version) => {
            cli::handle_version();
            Ok(())
        }
    }
}

/// Load config, set up logging, open the hook store and serve until a
/// shutdown signal arrives.
async fn run_server(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut cfg = config::load_or_create(config_path)?;
    cfg.apply_env_overrides();

    logging::init_logging(LogConfig::from_settings(&cfg.log))?;
    info!(
        target: targets::CONFIG,
        path = %config_path.display(),
        "configuration loaded"
    );

    validate_config(&cfg)?;

    let server_config = ServerConfig::from_config(&cfg).inspect_err(|e| {
        error!(target: targets::SERVER, error = %e, "failed to initialize hook storage");
    })?;

    info!(
        target: targets::SERVER,
        version = env!("CARGO_PKG_VERSION"),
        addr = %server_config.bind_address,
        flags_dir = %cfg.hooks.flags_dir.display(),
        "starting webhook-forge"
    );

    let handle = run_server_with_config(server_config).await?;
    handle
        .run_until(async {
            let trigger = await_shutdown_trigger().await;
            info!(target: targets::SERVER, signal = trigger, "shutting down");
        })
        .await;

    info!(target: targets::SERVER, "webhook-forge shut down");
    Ok(())
}

fn validate_config(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let issues = cfg.validate();
    for issue in &issues {
        error!(target: targets::CONFIG, path = %issue.path, "config error: {}", issue.message);
    }
    if !issues.is_empty() {
        return Err(format!(
            "configuration contains {} error(s), aborting startup",
            issues.len()
        )
        .into());
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
#[cfg(unix)]
async fn await_shutdown_trigger() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "ctrl-c",
                _ = sigterm.recv() => "SIGTERM",
            }
        }
        Err(e) => {
            warn!(
                target: targets::SERVER,
                "Failed to install SIGTERM handler: {}; falling back to Ctrl+C only",
                e
            );
            wait_for_ctrl_c().await
        }
    }
}

/// On non-Unix platforms, only Ctrl+C is available.
#[cfg(not(unix))]
async fn await_shutdown_trigger() -> &'static str {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "ctrl-c",
        Err(e) => {
            // Without a signal handler the server can only be stopped by killing it
            error!(target: targets::SERVER, error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<&'static str>().await
        }
    }
}
