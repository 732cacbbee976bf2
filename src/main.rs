//! eidolon CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use eidolon::{
    config::Config,
    embed::create_embedder,
    error::Result,
    job::IngestionJob,
    llm::ChatClient,
    media::HttpAnnotationModels,
    progress::LogWriterFactory,
    registry::Registry,
    store::Datastore,
    turn::{Persona, TurnWorkflow},
    vector::{PassageStore, QdrantIndexer},
};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "eidolon")]
#[command(version, about = "Ingest a social-media export and talk to the persona it describes", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize eidolon configuration and data directories
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Create a new identity record
    Create {
        /// Full name of the identity
        name: String,

        /// Declared language (e.g. en, pt)
        #[arg(short, long, default_value = "en")]
        language: String,
    },

    /// Ingest a social-media export archive for an identity
    Ingest {
        /// Identity id
        identity_id: i64,

        /// Path to the export archive (zip)
        archive: PathBuf,
    },

    /// Retry a failed or interrupted ingestion
    Retry {
        /// Identity id
        identity_id: i64,

        /// Path to the export archive (zip)
        archive: PathBuf,
    },

    /// Show an identity's job status and profile
    Status {
        /// Identity id
        identity_id: i64,
    },

    /// List all identities
    Identities,

    /// Change an identity's declared language
    SetLanguage {
        /// Identity id
        identity_id: i64,

        /// New language code
        language: String,
    },

    /// Re-run profile synthesis against an existing datastore
    Analyze {
        /// Identity id
        identity_id: i64,
    },

    /// Ask the persona a question
    Ask {
        /// Identity id
        identity_id: i64,

        /// The question
        question: String,
    },

    /// Manage an identity's stored data
    Db {
        #[command(subcommand)]
        action: DbAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum DbAction {
    /// Show datastore tables and vector collection state
    Status {
        /// Identity id
        identity_id: i64,

        /// Only list tables whose name contains this text
        #[arg(long)]
        contains: Option<String>,
    },

    /// Delete an identity's datastore and vector collection
    Reset {
        /// Identity id
        identity_id: i64,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory::default()))
        .with(filter)
        .init();

    // Init and completions work without an existing config
    if let Commands::Init { force } = cli.command {
        return handle_init(cli.config, force);
    }
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "eidolon", &mut std::io::stdout());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    let registry = Registry::connect(&config.paths.registry_file).await?;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Create { name, language } => {
            let identity = registry.create_identity(&name, &language).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&identity)?);
            } else {
                println!("✓ Created identity {} ({})", identity.id, identity.full_name);
                println!("  Next: eidolon ingest {} /path/to/export.zip", identity.id);
            }
        }

        Commands::Ingest { identity_id, archive } | Commands::Retry { identity_id, archive } => {
            let chat = ChatClient::new(&config.chat)?;
            let models = HttpAnnotationModels { config: &config };
            let indexer = QdrantIndexer { config: &config };
            let job = IngestionJob {
                config: &config,
                registry: &registry,
                chat: &chat,
                models: &models,
                indexer: &indexer,
            };

            let status = job.run(identity_id, &archive).await?;
            let identity = registry.require_identity(identity_id).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&identity)?);
            } else {
                println!("✓ Ingestion finished with status: {}", status);
                if let Some(message) = identity.status_message {
                    println!("  {}", message);
                }
            }
        }

        Commands::Status { identity_id } => {
            let identity = registry.require_identity(identity_id).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&identity)?);
            } else {
                println!("Identity {} ({})", identity.id, identity.full_name);
                println!("  Language: {}", identity.language);
                println!("  Status: {}", identity.status);
                if let Some(message) = &identity.status_message {
                    println!("  Message: {}", message);
                }
                if let Some(bio) = &identity.short_bio {
                    println!("  Bio: {}", bio);
                }
            }
        }

        Commands::Identities => {
            let identities = registry.list_identities().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&identities)?);
            } else if identities.is_empty() {
                println!("No identities yet. Create one with 'eidolon create <name>'.");
            } else {
                for identity in identities {
                    println!(
                        "{:>4}  {:30}  {:10}  {}",
                        identity.id, identity.full_name, identity.language, identity.status
                    );
                }
            }
        }

        Commands::SetLanguage { identity_id, language } => {
            registry.require_identity(identity_id).await?;
            registry.set_language(identity_id, &language).await?;
            println!(
                "✓ Language set to '{}'. Run 'eidolon analyze {}' to re-synthesize the profile.",
                language, identity_id
            );
        }

        Commands::Analyze { identity_id } => {
            let chat = ChatClient::new(&config.chat)?;
            let models = HttpAnnotationModels { config: &config };
            let indexer = QdrantIndexer { config: &config };
            let job = IngestionJob {
                config: &config,
                registry: &registry,
                chat: &chat,
                models: &models,
                indexer: &indexer,
            };

            let status = job.synthesize_profile(identity_id).await?;
            println!("✓ Profile synthesis finished with status: {}", status);
        }

        Commands::Ask { identity_id, question } => {
            handle_ask(&config, &registry, identity_id, &question, cli.json).await?;
        }

        Commands::Db { action } => {
            handle_db_action(&config, action).await?;
        }
    }

    Ok(())
}

fn handle_init(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    // A custom --config pointing at a .toml file keeps that exact filename;
    // a directory gets config.toml inside it
    let (base_dir, config_file) = match config_path {
        Some(path) if path.extension().is_some_and(|e| e == "toml") => {
            let base = path.parent().map(PathBuf::from);
            (base, Some(path))
        }
        Some(path) => (Some(path.clone()), Some(path.join("config.toml"))),
        None => (None, None),
    };

    let mut config = Config::with_base_dir(base_dir);
    if let Some(file) = config_file {
        config.paths.config_file = file;
    }

    if config.paths.config_file.exists() && !force {
        eprintln!(
            "Config file already exists at: {}\nUse --force to overwrite.",
            config.paths.config_file.display()
        );
        std::process::exit(1);
    }

    config.save()?;

    println!("✓ eidolon initialized successfully");
    println!("  Config: {}", config.paths.config_file.display());
    println!("\nNext steps:");
    println!("  1. Edit the config to point at your model backends");
    println!("  2. Start Qdrant: docker run -p 6334:6334 qdrant/qdrant");
    println!("  3. Create an identity: eidolon create \"Ana Souza\" --language pt");
    Ok(())
}

async fn handle_ask(
    config: &Config,
    registry: &Registry,
    identity_id: i64,
    question: &str,
    json: bool,
) -> Result<()> {
    let identity = registry.require_identity(identity_id).await?;

    let status = identity.get_status()?;
    if !status.is_conversable() {
        eprintln!(
            "Identity {} is not ready for conversation (status: {}).",
            identity_id, status
        );
        std::process::exit(1);
    }

    let datastore = Datastore::open(&config.datastore_path(identity_id)).await?;
    let embedder = create_embedder(&config.embedding)?;
    let passages = PassageStore::connect(
        &config.qdrant_url,
        &config.collection_name(identity_id),
        embedder.dimension(),
    )
    .await?;
    let chat = ChatClient::new(&config.chat)?;

    let persona = Persona::from(&identity);
    let history = registry
        .recent_turns(identity_id, config.turn.history_turns)
        .await?;

    let workflow = TurnWorkflow {
        embedder: embedder.as_ref(),
        passages: &passages,
        model: &chat,
        store: &datastore,
        config: &config.turn,
    };

    let turn = workflow.run(&persona, &history, question).await;
    registry
        .record_turn(identity_id, question, &turn.answer)
        .await?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "question": turn.query,
                "answer": turn.answer,
            })
        );
    } else {
        println!("{}", turn.answer);
    }
    Ok(())
}

async fn handle_db_action(config: &Config, action: DbAction) -> Result<()> {
    match action {
        DbAction::Status { identity_id, contains } => {
            let datastore_path = config.datastore_path(identity_id);
            if !Datastore::exists(&datastore_path) {
                println!("No datastore for identity {}", identity_id);
            } else {
                let datastore = Datastore::open(&datastore_path).await?;
                let tables = match &contains {
                    Some(text) => datastore.tables_containing(text).await?,
                    None => datastore.list_tables().await?,
                };
                println!("Datastore: {}", datastore_path.display());
                println!("  Tables: {}", tables.len());
                for table in tables {
                    println!("    {}", table);
                }
            }

            let store = PassageStore::connect(
                &config.qdrant_url,
                &config.collection_name(identity_id),
                config.embedding.resolved_dimension(),
            )
            .await?;
            println!(
                "Vector collection {}: {}",
                config.collection_name(identity_id),
                if store.collection_exists().await? {
                    "exists"
                } else {
                    "missing"
                }
            );
        }

        DbAction::Reset { identity_id, yes } => {
            if !yes {
                eprintln!("⚠️  This deletes identity {}'s datastore and vector collection!", identity_id);
                eprintln!("Run with --yes to confirm.");
                std::process::exit(1);
            }

            let datastore_path = config.datastore_path(identity_id);
            if datastore_path.exists() {
                std::fs::remove_file(&datastore_path)?;
                println!("✓ Removed datastore {}", datastore_path.display());
            }

            let store = PassageStore::connect(
                &config.qdrant_url,
                &config.collection_name(identity_id),
                config.embedding.resolved_dimension(),
            )
            .await?;
            if store.delete_collection().await? {
                println!("✓ Removed vector collection {}", config.collection_name(identity_id));
            }
        }
    }
    Ok(())
}
