//! hostctl CLI
//!
//! Command-line interface for running commands, detecting the OS and
//! managing services and packages on configured hosts

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use hostctl_core::{Host, HostConfig, Settings};
use hostctl_exec::CommandRequest;
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "hostctl")]
#[command(about = "Remote host management over SSH", long_about = None)]
struct Cli {
    /// Configuration file (defaults to $HOSTCTL_CONFIG, ./hostctl.toml, ...)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command on a host
    Run {
        host: String,
        /// Prefix the command with sudo
        #[arg(long)]
        sudo: bool,
        /// Timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Reconnect and re-issue the command on transport failures
        #[arg(long)]
        retry: bool,
        /// Print output lines as they arrive (no retry)
        #[arg(long, conflicts_with = "retry")]
        follow: bool,
        #[arg(last = true, required = true)]
        argv: Vec<String>,
    },
    /// Detect a host's OS family, init system and package manager
    Detect {
        host: String,
        /// Print the classification as JSON
        #[arg(long)]
        json: bool,
    },
    /// Query or control a service
    Service {
        host: String,
        action: ServiceAction,
        name: String,
    },
    /// Query or change packages
    Package {
        host: String,
        action: PackageAction,
        /// Package name (pattern for remove-matching)
        name: Vec<String>,
    },
    /// Upload a local file
    Upload {
        host: String,
        local: PathBuf,
        remote: String,
    },
    /// Download a remote file
    Download {
        host: String,
        remote: String,
        local: PathBuf,
    },
    /// Check whether a host answers
    Ping {
        host: String,
        /// Keep trying for this many seconds
        #[arg(long)]
        wait: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ServiceAction {
    Status,
    Start,
    Stop,
    Restart,
    Enabled,
    Enable,
    Disable,
}

#[derive(Clone, Copy, ValueEnum)]
enum PackageAction {
    Installed,
    Install,
    Remove,
    RemoveMatching,
    Update,
    List,
    Upgradable,
    RebootRequired,
}

fn init_tracing(settings: &Settings, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn open_host(config: &Config, name: &str) -> Result<Host> {
    let host = match config.host(name) {
        Ok(entry) => Host::from_config(entry, &config.settings)?,
        Err(_) if name == "localhost" => {
            Host::from_config(&HostConfig::new(name, name), &config.settings)?
        }
        Err(e) => return Err(e.into()),
    };
    Ok(host)
}

fn one_name(names: &[String]) -> Result<&str> {
    match names {
        [name] => Ok(name.as_str()),
        _ => Err(eyre::eyre!("expected exactly one package name")),
    }
}

async fn service(host: &Host, action: ServiceAction, name: &str) -> Result<()> {
    let manager = host.service().await?;
    match action {
        ServiceAction::Status => println!("{}", manager.status(name).await?),
        ServiceAction::Start => manager.start(name).await?,
        ServiceAction::Stop => manager.stop(name).await?,
        ServiceAction::Restart => manager.restart(name).await?,
        ServiceAction::Enabled => println!("{}", manager.is_enabled(name).await?),
        ServiceAction::Enable => manager.enable(name).await?,
        ServiceAction::Disable => manager.disable(name).await?,
    }
    Ok(())
}

async fn package(host: &Host, action: PackageAction, names: &[String]) -> Result<()> {
    let manager = host.package().await?;
    match action {
        PackageAction::Installed => {
            println!("{}", manager.is_installed(one_name(names)?).await?);
        }
        PackageAction::Install => {
            for name in names {
                manager.install(name).await?;
            }
        }
        PackageAction::Remove => {
            for name in names {
                manager.remove(name).await?;
            }
        }
        PackageAction::RemoveMatching => manager.remove_matching(one_name(names)?).await?,
        PackageAction::Update => {
            let result = manager.update(names).await?;
            println!(
                "upgraded {}, new {}, removed {}{}",
                result.upgraded_count,
                result.new_count,
                result.removed_count,
                if result.reboot_required { ", reboot required" } else { "" }
            );
        }
        PackageAction::List => {
            for name in manager.list_installed().await? {
                println!("{name}");
            }
        }
        PackageAction::Upgradable => {
            for pkg in manager.list_upgradable().await? {
                println!("{} {} -> {}", pkg.name, pkg.current_version, pkg.new_version);
            }
        }
        PackageAction::RebootRequired => println!("{}", manager.reboot_required().await?),
    }
    Ok(())
}

async fn execute(command: Commands, config: &Config) -> Result<i32> {
    match command {
        Commands::Run {
            host,
            sudo,
            timeout,
            retry,
            follow,
            argv,
        } => {
            let host = open_host(config, &host)?;
            let mut request = CommandRequest::new(argv).with_sudo(sudo);
            if retry {
                request = request.with_retry(true);
            }
            if let Some(secs) = timeout {
                request = request.with_timeout(Duration::from_secs(secs));
            }
            if follow {
                let (lines, mut rx) = tokio::sync::mpsc::unbounded_channel();
                let printer = tokio::spawn(async move {
                    while let Some(line) = rx.recv().await {
                        println!("{line}");
                    }
                });
                let result = host.run_streaming(&request, lines).await;
                printer.await?;
                let result = result?;
                std::io::stderr().write_all(result.stderr.as_bytes())?;
                host.close().await?;
                return Ok(result.status);
            }
            let result = host.run(&request).await?;
            std::io::stdout().write_all(result.stdout.as_bytes())?;
            std::io::stderr().write_all(result.stderr.as_bytes())?;
            debug!(status = result.status, duration = ?result.duration, "command finished");
            host.close().await?;
            Ok(result.status)
        }
        Commands::Detect { host, json } => {
            let host = open_host(config, &host)?;
            let classification = host.classification().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&classification)?);
            } else {
                println!("{classification}");
                if let Some(release) = &classification.release
                    && let Some(name) = &release.name
                {
                    println!("{name} {}", release.version_id.as_deref().unwrap_or(""));
                }
            }
            host.close().await?;
            Ok(0)
        }
        Commands::Service { host, action, name } => {
            let host = open_host(config, &host)?;
            service(&host, action, &name).await?;
            host.close().await?;
            Ok(0)
        }
        Commands::Package { host, action, name } => {
            let host = open_host(config, &host)?;
            package(&host, action, &name).await?;
            host.close().await?;
            Ok(0)
        }
        Commands::Upload {
            host,
            local,
            remote,
        } => {
            let host = open_host(config, &host)?;
            let report = host.transfer().upload_file(&local, &remote).await?;
            if !report.checksum_verified {
                warn!(path = %remote, "remote has no sha256sum; size check only");
            }
            println!("{} bytes -> {} ({})", report.bytes, report.path, report.sha256);
            host.close().await?;
            Ok(0)
        }
        Commands::Download {
            host,
            remote,
            local,
        } => {
            let host = open_host(config, &host)?;
            let bytes = host.transfer().download_file(&remote, &local).await?;
            println!("{bytes} bytes -> {}", local.display());
            host.close().await?;
            Ok(0)
        }
        Commands::Ping { host, wait } => {
            let host = open_host(config, &host)?;
            let up = match wait {
                Some(secs) => {
                    host.wait_for_connectivity_state(
                        true,
                        Duration::from_secs(secs),
                        Duration::from_secs(1),
                    )
                    .await
                }
                None => host.is_connective().await,
            };
            println!("{} is {}", host.name(), if up { "up" } else { "down" });
            host.close().await?;
            Ok(if up { 0 } else { 1 })
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let (config, source) = Config::discover(cli.config.as_deref())?;
    init_tracing(&config.settings, cli.json_logs || config.settings.log_json);
    match source {
        Some(path) => debug!(path = %path.display(), "configuration loaded"),
        None => warn!("no config file found, using defaults"),
    }

    let code = execute(cli.command, &config).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
