//! tmc - Translation-memory container management
//!
//! This is the CLI entry point. It runs the container workflow against the
//! in-process TM server, persisted to a local state file.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tmc::container::ContainerDescriptor;
use tmc::server::{DatabaseServerRef, TimeoutSession};
use tmc::settings::Settings;
use tracing_subscriber::EnvFilter;

/// tmc - manage TM containers on a translation-memory server
#[derive(Parser)]
#[command(name = "tmc")]
#[command(version)]
#[command(about = "Manage translation-memory containers", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// State file of the local TM server
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Timeout for each remote call, in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage database servers
    Server {
        #[command(subcommand)]
        command: ServerCommands,
    },

    /// Manage containers
    Container {
        #[command(subcommand)]
        command: ContainerCommands,
    },

    /// List physical databases on a database server
    Databases {
        /// Database server name
        server: String,
    },
}

#[derive(Subcommand)]
enum ServerCommands {
    /// Register a database server
    Add {
        /// Friendly name
        name: String,
        /// Connection property (key=value)
        #[arg(short, long = "prop")]
        props: Vec<String>,
    },
    /// List database servers
    #[command(name = "ls")]
    List,
    /// Unregister a database server
    #[command(name = "rm")]
    Remove {
        /// Friendly name
        name: String,
    },
}

#[derive(Subcommand)]
enum ContainerCommands {
    /// Create a container after duplicate checks, and verify it
    Create {
        /// Container name
        name: String,
        /// Organizational path
        #[arg(long)]
        org: Option<String>,
    },
    /// Create a container on a named server without checks
    #[command(name = "create-simple")]
    CreateSimple {
        /// Container name
        name: String,
        /// Database server name
        #[arg(long)]
        server: String,
        /// Physical database name
        #[arg(long)]
        database: String,
    },
    /// List containers
    #[command(name = "ls")]
    List {
        /// Only containers on this database server
        #[arg(long)]
        server: Option<String>,
        /// Only show paths
        #[arg(short, long)]
        quiet: bool,
    },
    /// Check whether a container exists
    Exists {
        /// Container name
        name: String,
        /// Organizational path
        #[arg(long)]
        org: Option<String>,
    },
    /// Delete a container
    #[command(name = "rm")]
    Remove {
        /// Container name
        name: String,
        /// Organizational path
        #[arg(long)]
        org: Option<String>,
        /// Also drop the physical database (irreversible)
        #[arg(long)]
        purge: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(Settings::default_path);
    let mut settings = Settings::load(&config_path)
        .with_context(|| format!("Failed to load settings from {}", config_path.display()))?;

    if let Some(state) = cli.state {
        settings.state_file = Some(state);
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        if timeout_ms == 0 {
            bail!("--timeout-ms must be greater than zero");
        }
        settings.timeout_ms = timeout_ms;
    }

    let store = settings.state_store();
    let _state_lock = store
        .lock()
        .with_context(|| format!("Failed to lock {}", store.lock_path().display()))?;
    let server = Arc::new(
        store
            .load()
            .with_context(|| format!("Failed to load state from {}", store.path().display()))?,
    );
    let session = TimeoutSession::new(Arc::clone(&server), settings.timeout())
        .context("Failed to start remote call runtime")?;
    let manager = settings.container_manager();
    let default_org = settings.organization_path.as_str().to_string();

    let mutated = match cli.command {
        Commands::Server { command } => match command {
            ServerCommands::Add { name, props } => {
                let mut server_ref = DatabaseServerRef::new(&name);
                for prop in props {
                    let (key, value) = prop
                        .split_once('=')
                        .with_context(|| format!("Invalid property '{}', expected key=value", prop))?;
                    server_ref = server_ref.property(key, value);
                }

                server.register_database_server(server_ref)?;
                println!("{}", name);
                true
            }
            ServerCommands::List => {
                println!("{:<20} {:<12} {:<12}", "NAME", "CONTAINERS", "DATABASES");
                for hosted in server.snapshot()? {
                    println!(
                        "{:<20} {:<12} {:<12}",
                        hosted.server.name,
                        hosted.containers.len(),
                        hosted.databases.len()
                    );
                }
                false
            }
            ServerCommands::Remove { name } => {
                server.unregister_database_server(&name)?;
                println!("{}", name);
                true
            }
        },

        Commands::Container { command } => match command {
            ContainerCommands::Create { name, org } => {
                let org = org.unwrap_or_else(|| default_org.clone());
                let created = manager.create_advanced(&session, &org, &name)?;
                println!("{}", created.path());
                true
            }
            ContainerCommands::CreateSimple {
                name,
                server: server_name,
                database,
            } => {
                let created = manager.create_simple(&session, &server_name, &database, &name)?;
                println!("{}", created.path());
                true
            }
            ContainerCommands::List { server: server_name, quiet } => {
                let containers = manager.list(&session, server_name.as_deref())?;
                print_containers(&containers, quiet);
                false
            }
            ContainerCommands::Exists { name, org } => {
                let org = org.unwrap_or_else(|| default_org.clone());
                let exists = manager.exists(&session, &org, &name)?;
                println!("{}", exists);
                if !exists {
                    std::process::exit(1);
                }
                false
            }
            ContainerCommands::Remove { name, org, purge } => {
                let org = org.unwrap_or_else(|| default_org.clone());
                let deleted = manager.delete(&session, &org, &name, purge)?;
                if purge {
                    println!("{} (database {} purged)", deleted.path(), deleted.database_name);
                } else {
                    println!("{}", deleted.path());
                }
                true
            }
        },

        Commands::Databases { server: server_name } => {
            println!("{:<30} {:<10} {:<20}", "DATABASE", "ATTACHED", "CREATED");
            for database in server.physical_databases(&server_name)? {
                println!(
                    "{:<30} {:<10} {:<20}",
                    database.name,
                    database.attached,
                    database.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            false
        }
    };

    if mutated {
        store
            .save(&server)
            .with_context(|| format!("Failed to save state to {}", store.path().display()))?;
    }

    Ok(())
}

fn print_containers(containers: &[ContainerDescriptor], quiet: bool) {
    if quiet {
        for c in containers {
            println!("{}", c.path());
        }
        return;
    }

    println!(
        "{:<14} {:<30} {:<24} {:<12} {:<20}",
        "CONTAINER ID", "PATH", "DATABASE", "SERVER", "CREATED"
    );
    for c in containers {
        let created = c
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "{:<14} {:<30} {:<24} {:<12} {:<20}",
            c.id,
            c.path(),
            c.database_name,
            c.server,
            created
        );
    }
}
