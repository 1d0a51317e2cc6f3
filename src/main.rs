//! statewise - State machine engine CLI
//!
//! Imports definitions, creates instances and drives their transitions
//! against a file store.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use colored::Colorize;
use config::Config;
use statewise_core::{
    BuiltinHandlers, DefinitionId, HandlerRegistry, InstanceId, TransitionEngine,
};
use statewise_storage::FileStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "statewise")]
#[command(about = "Finite-state-machine engine with auditable history")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "STATEWISE_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory (overrides the configuration)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import a definition from a YAML or JSON document
    Import {
        /// Definition document
        file: PathBuf,

        /// Publish the definition right away
        #[arg(long)]
        publish: bool,
    },

    /// Check a definition document without storing it
    Validate {
        /// Definition document
        file: PathBuf,
    },

    /// Print a Mermaid state diagram
    Diagram {
        /// Definition ID
        definition: DefinitionId,

        /// Highlight the current state of this instance
        #[arg(short, long)]
        instance: Option<InstanceId>,
    },

    /// Copy a definition into a new draft version
    NewVersion {
        /// Definition ID
        definition: DefinitionId,

        /// Version number (defaults to the next one)
        #[arg(short = 'V', long)]
        version: Option<u32>,
    },

    /// Publish a draft definition
    Publish {
        /// Definition ID
        definition: DefinitionId,
    },

    /// List definitions and instances
    List,

    /// Create an instance of a published definition
    Create {
        /// Definition ID
        definition: DefinitionId,
    },

    /// Fire a trigger on an instance
    Fire {
        /// Instance ID
        instance: InstanceId,

        /// Trigger name
        trigger: String,

        /// Acting user
        #[arg(short, long)]
        actor: Option<String>,

        /// Evaluation context JSON (or @file.json to read from file)
        #[arg(short, long)]
        ctx: Option<String>,
    },

    /// Move an instance to a state, bypassing requirements and effects
    Force {
        /// Instance ID
        instance: InstanceId,

        /// Target state name
        state: String,

        /// Why the transition is forced
        #[arg(short, long)]
        reason: String,

        /// Acting user
        #[arg(short, long)]
        actor: Option<String>,
    },

    /// Revert the most recent transitions of an instance
    Revert {
        /// Instance ID
        instance: InstanceId,

        /// Number of transitions to revert
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,

        /// Why the transitions are reverted
        #[arg(short, long)]
        reason: String,

        /// Acting user
        #[arg(short, long)]
        actor: Option<String>,
    },

    /// Show an instance with its history and next transitions
    Show {
        /// Instance ID
        instance: InstanceId,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Data directory: {}", config.storage.data_dir.display());

    let store = Arc::new(FileStore::open(&config.storage.data_dir)?);
    let mut registry = HandlerRegistry::new();
    registry.install(&BuiltinHandlers);
    let engine = TransitionEngine::with_config(
        Arc::new(registry),
        store.clone(),
        config.engine.clone(),
    );

    let app = commands::App::new(store, engine, config.cli.default_actor.as_str());
    match commands::execute(&app, cli.command).await {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
