//! Workload importer CLI
//!
//! Submits import requests and inspects, rebuilds and deletes the
//! workloads the importer created.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use commands::{builds, imports, workloads, Outcome};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Workload importer CLI
#[derive(Parser)]
#[command(name = "importctl")]
#[command(author, version, about = "CLI for the Workload Importer", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via IMPORTCTL_API_URL env var)
    #[arg(long, env = "IMPORTCTL_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Output format (table or json)
    #[arg(long, short = 'o', value_enum, global = true)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum KindArg {
    Agent,
    Tool,
}

impl KindArg {
    fn as_str(&self) -> &'static str {
        match self {
            KindArg::Agent => "agent",
            KindArg::Tool => "tool",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import an agent or tool from a JSON request file
    Import {
        /// Path to the import request
        #[arg(long, short)]
        file: PathBuf,

        /// Wait until the workload is ready, completed or failed
        #[arg(long)]
        wait: bool,

        /// Seconds to wait before giving up (exit code 2)
        #[arg(long, default_value_t = 1200)]
        timeout: u64,

        /// Seconds between status polls
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },

    /// Show the status of a workload
    Status {
        /// Workload reference (format: namespace/name or just name)
        workload: String,
    },

    /// Delete a workload with its service and build resources
    Delete {
        /// Workload reference (format: namespace/name or just name)
        workload: String,

        /// Kind the workload was imported as
        #[arg(long, value_enum)]
        kind: KindArg,
    },

    /// List imported workloads
    List {
        /// Filter by namespace (lists all namespaces if not specified)
        #[arg(long, short)]
        namespace: Option<String>,

        /// Filter by kind
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },

    /// Inspect and rerun source builds
    #[command(subcommand)]
    Build(BuildCommands),
}

#[derive(Subcommand)]
pub enum BuildCommands {
    /// Show a build and its latest run
    Info {
        /// Build reference (format: namespace/name or just name)
        build: String,
    },

    /// Start a new run of an existing build
    Trigger {
        /// Build reference (format: namespace/name or just name)
        build: String,
    },

    /// Deploy the image of the latest succeeded run
    Finalize {
        /// Build reference (format: namespace/name or just name)
        build: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            if let Some(api) = e.downcast_ref::<client::ApiError>() {
                for violation in &api.body.violations {
                    eprintln!("  {}: {}", violation.field, violation.message);
                }
                if api.is_timeout() {
                    return Outcome::Timeout.exit_code();
                }
            }
            Outcome::Failure.exit_code()
        }
    }
}

async fn run(cli: Cli) -> Result<Outcome> {
    let config = config::Config::load()?;
    let api_url = config.api_url(cli.api_url);
    let format = config.format(cli.format);

    // Initialize client; requests never block longer than one poll
    let client = client::ApiClient::new(&api_url, Duration::from_secs(60))?;

    // Execute command
    match cli.command {
        Commands::Import {
            file,
            wait,
            timeout,
            interval,
        } => {
            let options = imports::ImportOptions {
                file,
                wait,
                timeout: Duration::from_secs(timeout),
                interval: Duration::from_secs(interval.max(1)),
            };
            imports::import(&client, options, format).await
        }
        Commands::Status { workload } => {
            let (namespace, name) = config.workload_ref(&workload)?;
            workloads::show_status(&client, &namespace, &name, format).await
        }
        Commands::Delete { workload, kind } => {
            let (namespace, name) = config.workload_ref(&workload)?;
            workloads::delete_workload(&client, &namespace, &name, kind.as_str(), format).await
        }
        Commands::List { namespace, kind } => {
            let kind = kind.map(|k| k.as_str().to_string());
            workloads::list_workloads(&client, namespace, kind, format).await
        }
        Commands::Build(build_cmd) => match build_cmd {
            BuildCommands::Info { build } => {
                let (namespace, name) = config.workload_ref(&build)?;
                builds::show_build(&client, &namespace, &name, format).await
            }
            BuildCommands::Trigger { build } => {
                let (namespace, name) = config.workload_ref(&build)?;
                builds::trigger_build(&client, &namespace, &name, format).await
            }
            BuildCommands::Finalize { build } => {
                let (namespace, name) = config.workload_ref(&build)?;
                builds::finalize_build(&client, &namespace, &name, format).await
            }
        },
    }
}
