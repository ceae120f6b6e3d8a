//! modelpack - Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use modelpack::config::CleanPolicy;
use modelpack::fetch::ProgressCallback;
use modelpack::{InstallError, InstallOptions, Installer, InstallerConfig, ModelSpec};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::signal;

/// Exit code after Ctrl+C / SIGTERM
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "modelpack")]
#[command(about = "Universal installer for machine-learning models", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty", global = true)]
    log_format: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install a model (namespace/name[@version])
    Install {
        spec: String,
        /// Reinstall even if already cached
        #[arg(long)]
        force: bool,
        /// Skip ONNX conversion
        #[arg(long)]
        no_convert: bool,
    },
    /// Show a model manifest (cached, else from upstream)
    Info { spec: String },
    /// Search every adapter, or one with --adapter
    Search {
        query: String,
        #[arg(long)]
        adapter: Option<String>,
    },
    /// List installed models
    List,
    /// Remove an installed model
    Uninstall { spec: String },
    /// Inspect or clean the model cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
    /// Show or create the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Total cache size
    Size,
    /// Evict installs; flags override the configured policy
    Clean {
        #[arg(long)]
        max_size_gb: Option<f64>,
        #[arg(long)]
        max_age_hours: Option<u64>,
        #[arg(long)]
        keep_latest: Option<usize>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging; stdout is reserved for command output
    match cli.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    tokio::select! {
        result = run(cli) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => report_error(&e),
        },
        () = shutdown_signal() => {
            eprintln!("Interrupted, staged files removed");
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}

fn report_error(error: &anyhow::Error) -> ExitCode {
    match error.downcast_ref::<InstallError>() {
        Some(install) if install.is_user_facing() => eprintln!("Error: {install}"),
        _ => {
            tracing::error!(error = %format!("{error:#}"), "Command failed");
            eprintln!("Error: {error:#}");
        }
    }
    ExitCode::FAILURE
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone();
    let config = InstallerConfig::load(cli.config)?;
    config.validate()?;

    tracing::debug!(
        home = ?config.home_dir,
        cache = ?config.cache_dir,
        registry = ?config.registry.url,
        "Configuration loaded"
    );

    match cli.command {
        Command::Install {
            spec,
            force,
            no_convert,
        } => {
            let spec = ModelSpec::parse(&spec)?;
            let installer = Installer::from_config(&config)?.with_options(InstallOptions {
                force,
                convert: config.conversion.enabled && !no_convert,
                deadline: None,
            });

            println!("Installing {spec}");
            let outcome = installer.install(&spec, Some(progress_printer())).await?;
            if outcome.already_installed {
                println!("{spec} is already installed at {}", outcome.path.display());
                return Ok(());
            }
            if let Some(conversion) = &outcome.conversion {
                println!("Conversion: {conversion}");
            }
            println!(
                "Installed {} via {} ({}, {} files) at {}",
                spec,
                outcome.adapter,
                outcome.manifest.format.execution_format,
                outcome.manifest.format.files.len(),
                outcome.path.display()
            );
        }
        Command::Info { spec } => {
            let spec = ModelSpec::parse(&spec)?;
            let installer = Installer::from_config(&config)?;
            let manifest = installer.manifest(&spec).await?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
        Command::Search { query, adapter } => {
            let registry = modelpack::register_default_adapters(&config)?;
            let results = match adapter {
                Some(name) => {
                    let adapter = registry.get(&name).with_context(|| {
                        format!("Unknown adapter '{}' (available: {})", name, registry.names().join(", "))
                    })?;
                    adapter.search(&query).await?
                }
                None => registry.search_all(&query).await,
            };
            if results.is_empty() {
                println!("No models found for '{query}'");
            }
            for result in results {
                println!("{:<60} {}", result.spec_string(), result.description);
            }
        }
        Command::List => {
            let cache = modelpack::CacheManager::new(&config.cache_dir);
            let models = cache.list()?;
            if models.is_empty() {
                println!("No models installed");
            }
            for model in models {
                println!(
                    "{:<60} {:>10}  {}",
                    model.record.spec().to_string(),
                    human_size(model.size),
                    model.record.installed_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Command::Uninstall { spec } => {
            let spec = ModelSpec::parse(&spec)?;
            let cache = modelpack::CacheManager::new(&config.cache_dir);
            if !cache.remove(&spec)? {
                return Err(InstallError::NotFound(spec.to_string()).into());
            }
            println!("Removed {spec}");
        }
        Command::Cache { command } => {
            let cache = modelpack::CacheManager::new(&config.cache_dir);
            match command {
                CacheCommand::Size => {
                    println!("{} ({})", human_size(cache.total_size()), cache.root().display());
                }
                CacheCommand::Clean {
                    max_size_gb,
                    max_age_hours,
                    keep_latest,
                } => {
                    let defaults = &config.cache.clean;
                    let policy = CleanPolicy {
                        max_size_gb: max_size_gb.or(defaults.max_size_gb),
                        max_age_hours: max_age_hours.or(defaults.max_age_hours),
                        keep_latest: keep_latest.unwrap_or(defaults.keep_latest),
                    };
                    let report = cache.clean(&policy)?;
                    for removed in &report.removed {
                        println!("Removed {removed}");
                    }
                    println!(
                        "Freed {} ({} installs)",
                        human_size(report.freed_bytes),
                        report.removed.len()
                    );
                }
            }
        }
        Command::Config { command } => match command {
            ConfigCommand::Show => {
                print!("{}", toml::to_string_pretty(&config).context("Failed to render config")?);
            }
            ConfigCommand::Init { force } => {
                let path = config_path.unwrap_or_else(InstallerConfig::default_path);
                if path.exists() && !force {
                    anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
                }
                InstallerConfig::default().save(&path)?;
                println!("Wrote {}", path.display());
            }
        },
    }

    Ok(())
}

/// Print a line each time a file finishes downloading
fn progress_printer() -> ProgressCallback {
    let completed = Arc::new(AtomicUsize::new(0));
    Arc::new(move |downloaded, total| {
        if total > 0 && downloaded == total {
            let n = completed.fetch_add(1, Ordering::Relaxed) + 1;
            eprintln!("  [{n}] downloaded {}", human_size(total));
        }
    })
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
