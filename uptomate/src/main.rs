//! uptomate - Entry Point
//!
//! Lifecycle engine for container-compose backed training environments.
//! Without flags it serves the HTTP API until interrupted; `--scan` and
//! `--update-repo` run one-shot maintenance commands.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use uptomate::app::options::AppOptions;
use uptomate::app::run::run;
use uptomate::app::state::AppState;
use uptomate::logs::{init_logging, LogOptions};
use uptomate::storage::layout::StorageLayout;
use uptomate::storage::settings::Settings;
use uptomate::tasks::TaskStatus;
use uptomate::utils::version_info;

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        error!("{:#}", e);
        eprintln!("uptomated: {:#}", e);
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<()> {
    // Parse command line arguments
    let mut cli_args: HashMap<String, String> = HashMap::new();
    for arg in env::args().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        } else {
            warn!("Ignoring argument '{}'", arg);
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        println!("{}", serde_json::to_string_pretty(&version)?);
        return Ok(());
    }

    let layout = match cli_args.get("config") {
        Some(dir) => StorageLayout::new(PathBuf::from(dir)),
        None => StorageLayout::default(),
    };

    let settings_file = layout.settings_file();
    let settings = Settings::load(&settings_file)
        .await
        .with_context(|| format!("unable to read {}", settings_file.path().display()))?;

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: settings
            .log_to_file
            .then(|| layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions::from_settings(layout, &settings);

    if cli_args.contains_key("scan") {
        return scan(&options).await;
    }
    if cli_args.contains_key("update-repo") {
        return update_repo(&options, cli_args.contains_key("install")).await;
    }

    info!("Running uptomate {} with options: {:?}", version.version, options);
    run(options, await_shutdown_signal())
        .await
        .context("failed to run the engine")
}

/// Print the catalog entries that can be installed
async fn scan(options: &AppOptions) -> Result<()> {
    let state = AppState::init(options).await?;
    let installable = state.problems.find_installable().await?;
    if installable.is_empty() {
        println!("No problems are available for installation");
    }
    for path in installable {
        println!("{}", path);
    }
    Ok(())
}

/// Refresh the metadata of registered problems, optionally installing new
/// catalog entries and waiting for their install tasks
async fn update_repo(options: &AppOptions, install: bool) -> Result<()> {
    let state = AppState::init(options).await?;

    let report = state.problems.refresh().await?;
    for slug in &report.updated {
        println!("updated   {}", slug);
    }
    for slug in &report.missing {
        println!("missing   {}", slug);
    }
    for (slug, reason) in &report.failed {
        println!("failed    {} ({})", slug, reason);
    }

    if !install {
        return Ok(());
    }

    let mut failed = 0;
    let mut task_ids = Vec::new();
    for report in state.problems.install_available().await? {
        match report.outcome {
            Ok(installed) => {
                println!("installing {} as {}", report.path, installed.slug);
                task_ids.push(installed.task_id);
            }
            Err(e) => {
                failed += 1;
                println!("skipped   {} ({})", report.path, e.user_message());
            }
        }
    }

    // Let the install tasks finish before exiting
    for id in task_ids {
        let mut task = state.queue.status(&id)?;
        while task.status.is_active() {
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            task = state.queue.status(&id)?;
        }
        if task.status != TaskStatus::Succeeded {
            failed += 1;
        }
        println!(
            "{:<9} {} {}",
            task.status.as_str(),
            task.deployment,
            task.result.unwrap_or_default().trim()
        );
    }

    if failed > 0 {
        anyhow::bail!("{} problems could not be installed", failed);
    }
    Ok(())
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            _ => {
                error!("Unable to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
