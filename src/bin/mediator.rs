//! Avro Mediator CLI
//!
//! Lists, validates, registers and compatibility-tests local schemas.

use std::collections::BTreeMap;
use std::path::PathBuf;

use avro_mediator::report::{self, OutcomeMap};
use avro_mediator::{
    DirectoryRegistry, ItemType, LocalRepository, MediationEngine, MediatorConfig, MediatorError,
    SchemaSnapshot,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "avro-mediator")]
#[command(about = "Keep a local Avro IDL repository in sync with a schema registry")]
struct Cli {
    /// Config file (defaults to mediator.toml lookup)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local repository root (overrides config)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Registry directory (overrides config)
    #[arg(long)]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List local schemas
    List {
        /// Only list this item type (common, event)
        #[arg(short = 't', long = "type")]
        item_type: Option<ItemType>,
    },

    /// Print a schema as Avro JSON
    Print {
        name: String,
        /// Print the latest registered version instead of the local one
        #[arg(long)]
        remote: bool,
    },

    /// Register one local schema
    Register { name: String },

    /// Register every local schema that differs from the registry
    Sync {
        /// Actually register; without this only pending changes are shown
        #[arg(long)]
        force: bool,
    },

    /// Test local schemas for compatibility with the registry
    TestCompatibility {
        /// Test only this schema
        name: Option<String>,
    },

    /// Validate local schemas
    Validate {
        /// Validate only this schema
        name: Option<String>,
    },

    /// Show how a local schema differs from its latest registered version
    Diff { name: String },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = MediatorConfig::load_from(cli.config.as_deref())?;
    if let Some(root) = cli.root {
        config.repository.root = root;
    }
    if let Some(registry) = cli.registry {
        config.registry.path = registry;
    }

    let repository = LocalRepository::open(
        config.repository_root(),
        config.repository.allowed_namespace_depth,
    )?;

    match cli.command {
        Commands::List { item_type } => {
            let items = match item_type {
                Some(t) => repository.list(t)?,
                None => repository.list_all()?,
            };
            for item in items {
                println!("{:<8} {}", item.item_type.label(), item);
            }
        }

        Commands::Validate { name: Some(name) } => {
            repository.validate(&name)?;
            println!("✅ {} is valid", name);
        }

        Commands::Validate { name: None } => {
            repository.validate_all()?;
            println!("✅ All local schemas are valid");
        }

        Commands::Print { name, remote } => {
            let engine = open_engine(repository, &config)?;
            println!("{}", engine.print(&name, remote)?);
        }

        Commands::Register { name } => {
            let engine = open_engine(repository, &config)?;
            let id = engine.register(&name)?;
            println!("✅ Registered {} with id {}", name, id);
        }

        Commands::Sync { force } => {
            let engine = open_engine(repository, &config)?;
            let pending = engine.pending_changes()?;
            if pending.is_empty() || force {
                finish(engine.sync_local_with_remote(), &pending, report::sync_summary)?;
            } else {
                println!("Schemas that differ from the registry:\n");
                for (item_type, subjects) in &pending {
                    println!("{}:", item_type.report_heading());
                    for subject in subjects.keys() {
                        println!("  {}", subject);
                    }
                }
                println!("\nRun with --force to register them.");
            }
        }

        Commands::TestCompatibility { name: Some(name) } => {
            let engine = open_engine(repository, &config)?;
            println!("{}", engine.test_compatibility(&name)?);
        }

        Commands::TestCompatibility { name: None } => {
            let engine = open_engine(repository, &config)?;
            let pending = engine.pending_changes()?;
            finish(engine.test_global_compatibility(), &pending, report::compatibility_summary)?;
        }

        Commands::Diff { name } => {
            let engine = open_engine(repository, &config)?;
            println!("{}", engine.diff(&name)?);
        }
    }

    Ok(())
}

fn open_engine(
    repository: LocalRepository,
    config: &MediatorConfig,
) -> Result<MediationEngine<DirectoryRegistry>, Box<dyn std::error::Error>> {
    let registry = DirectoryRegistry::open(config.registry_path(), config.registry.compatibility)?;
    Ok(MediationEngine::with_defaults(repository, registry))
}

/// Print the summary of a multi-subject operation; failures exit with 1
fn finish(
    result: avro_mediator::Result<OutcomeMap>,
    pending: &SchemaSnapshot,
    summary: fn(&OutcomeMap) -> String,
) -> Result<(), Box<dyn std::error::Error>> {
    match result {
        Ok(_) => {
            // Types that had work to do, none of which failed
            let touched: OutcomeMap = pending.keys().map(|t| (*t, BTreeMap::new())).collect();
            println!("✅ {}", summary(&touched));
            Ok(())
        }
        Err(MediatorError::Mediation(message)) => {
            println!("❌ {}", message);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}
