//! Rama - a minimal container tool
//!
//! This is the main CLI entry point for Rama.

use anyhow::Context;
use clap::{ArgGroup, Args, Parser, Subcommand};
use rama::config::Config;
use rama::container::{ContainerConfig, ContainerManager};
use rama::image::{BuildContext, BuildOutcome, ImageBuilder, ImageStore, NOT_IMPLEMENTED_MESSAGE};
use rama::network::NetworkManager;
use rama::registry::{self, RemoteAddress, TransferClient};
use rama::storage::VolumeManager;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Rama - minimal container tool
#[derive(Parser)]
#[command(name = "rama")]
#[command(version)]
#[command(about = "A minimal container tool: images, a registry and supervised containers", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Configuration file (TOML); defaults to $RAMA_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data root holding images, containers and state
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push an image to a registry or remote directory
    Push {
        /// Image to push
        #[arg(long)]
        image: String,
        /// Registry address (host:port, URL, or [user@]host:/path)
        #[arg(long)]
        registry: String,
        /// Replace the image if the remote already has it
        #[arg(long)]
        overwrite: bool,
    },

    /// Pull an image from a registry or remote directory
    Pull {
        /// Image to pull
        #[arg(long)]
        image: String,
        /// Registry address (host:port, URL, or [user@]host:/path)
        #[arg(long)]
        registry: String,
        /// Replace the local image if it exists
        #[arg(long)]
        overwrite: bool,
    },

    /// Build an image
    Build {
        /// Image to build
        #[arg(long)]
        image: String,
        /// Build file
        #[arg(long)]
        file: PathBuf,
    },

    /// Run a container
    Run {
        /// Image to run
        #[arg(long)]
        image: String,
        /// Container name
        #[arg(long)]
        name: String,
        /// Network to join
        #[arg(long)]
        network: Option<String>,
        /// Volume to attach (repeatable)
        #[arg(long)]
        volume: Vec<String>,
        /// Command to run instead of the configured default
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// List containers
    #[command(name = "ps")]
    Ps {
        /// Show stopped containers too
        #[arg(short, long)]
        all: bool,
    },

    /// Stop a container
    Stop {
        /// Container name
        #[arg(long)]
        name: String,
    },

    /// Remove a container
    #[command(name = "rm")]
    Remove {
        /// Container name
        #[arg(long)]
        name: String,
    },

    /// Manage networks
    Network(NamespaceArgs),

    /// Manage volumes
    Volume(NamespaceArgs),

    /// List images
    Images,

    /// Remove an image
    Rmi {
        /// Image to remove
        #[arg(long)]
        image: String,
    },

    /// Serve the local images over HTTP until interrupted
    Registry {
        /// Address to listen on
        #[arg(long)]
        bind: Option<String>,
        /// Accept pushed images
        #[arg(long)]
        accept_push: bool,
    },
}

#[derive(Args)]
#[command(group(ArgGroup::new("action").required(true).args(["create", "list"])))]
struct NamespaceArgs {
    /// Create a namespace with this name
    #[arg(long, value_name = "NAME")]
    create: Option<String>,
    /// List namespaces
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; diagnostics go to stderr, command output to stdout
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref(), cli.root.as_deref())
        .context("failed to load configuration")?;
    let images = Arc::new(ImageStore::new(config.paths.images.clone())?);

    match cli.command {
        Commands::Push {
            image,
            registry,
            overwrite,
        } => {
            let remote = RemoteAddress::parse(&registry)?;
            let client = TransferClient::new(Arc::clone(&images), config.transfer.clone())?;
            let report = client.push(&image, &remote, overwrite).await?;
            println!("Pushed {} to {}", report.image, report.remote);
        }

        Commands::Pull {
            image,
            registry,
            overwrite,
        } => {
            let remote = RemoteAddress::parse(&registry)?;
            let client = TransferClient::new(Arc::clone(&images), config.transfer.clone())?;
            let report = client.pull(&image, &remote, overwrite).await?;
            println!("Pulled {} from {}", report.image, report.remote);
        }

        Commands::Build { image, file } => {
            let builder = ImageBuilder::new(BuildContext::new(&image, file));
            match builder.build()? {
                BuildOutcome::NotImplemented => println!("{}", NOT_IMPLEMENTED_MESSAGE),
            }
        }

        Commands::Run {
            image,
            name,
            network,
            volume,
            command,
        } => {
            let manager = ContainerManager::new(&config, images)?;
            let mut container = ContainerConfig::new(&name, &image).cmd(command);
            if let Some(network) = network {
                container = container.network(&network);
            }
            for v in &volume {
                container = container.volume(v);
            }

            let record = manager.run(container)?;
            println!("Container {} started (pid {})", record.name, record.handle.pid);
        }

        Commands::Ps { all } => {
            let manager = ContainerManager::new(&config, images)?;
            println!("{:<24} {:<24} {:<8} {:<8} STARTED", "NAME", "IMAGE", "PID", "STATUS");
            if all {
                for c in manager.list_all()? {
                    println!(
                        "{:<24} {:<24} {:<8} {:<8} {}",
                        c.name,
                        c.image.as_deref().unwrap_or("-"),
                        c.handle.map(|h| h.pid.to_string()).unwrap_or_else(|| "-".to_string()),
                        c.status,
                        c.started_at
                            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                            .unwrap_or_else(|| "-".to_string())
                    );
                }
            } else {
                for r in manager.list()? {
                    println!(
                        "{:<24} {:<24} {:<8} {:<8} {}",
                        r.name,
                        r.image,
                        r.handle.pid,
                        "running",
                        r.inserted_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }

        Commands::Stop { name } => {
            let manager = ContainerManager::new(&config, images)?;
            manager.stop(&name)?;
            println!("{}", name);
        }

        Commands::Remove { name } => {
            let manager = ContainerManager::new(&config, images)?;
            manager.remove(&name)?;
            println!("{}", name);
        }

        Commands::Network(args) => {
            let networks = NetworkManager::new(config.paths.networks.clone())?;
            if let Some(name) = args.create {
                networks.create(&name)?;
                println!("{}", name);
            } else {
                println!("NAME");
                for network in networks.list()? {
                    println!("{}", network.name);
                }
            }
        }

        Commands::Volume(args) => {
            let volumes = VolumeManager::new(config.paths.volumes.clone())?;
            if let Some(name) = args.create {
                volumes.create(&name)?;
                println!("{}", name);
            } else {
                println!("NAME");
                for volume in volumes.list()? {
                    println!("{}", volume.name);
                }
            }
        }

        Commands::Images => {
            println!("{:<32} {:>8} {:>12}", "IMAGE", "FILES", "SIZE");
            for name in images.list()? {
                let content = images.get(&name)?;
                println!("{:<32} {:>8} {:>12}", content.name, content.files, content.bytes);
            }
        }

        Commands::Rmi { image } => {
            images.remove(&image)?;
            println!("{}", image);
        }

        Commands::Registry { bind, accept_push } => {
            let mut server_config = config.registry.clone();
            if let Some(bind) = bind {
                server_config.bind = bind;
            }
            server_config.accept_push |= accept_push;

            let handle = registry::start(&server_config, images).await?;
            println!("Registry listening on {}", handle.local_addr());

            shutdown_signal().await?;
            tracing::info!("shutdown requested");
            handle.shutdown().await?;
        }
    }

    Ok(())
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to wait for SIGINT")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}
