//! dbdiag main binary.
//!
//! Subcommands:
//! - `init` - create or migrate the knowledge store schema
//! - `import <file.json>` - append raw tickets to the store
//! - `rebuild-index` - run the offline index-build pipeline
//! - `cli [--hyb | --rar]` - interactive diagnosis loop (default GAR)
//! - `web [--host H --port P]` - HTTP/WebSocket server
//! - `visualize [--out F]` - emit an HTML knowledge-graph page
//!
//! Exit codes: 0 success, 1 config error, 2 data error, 3 upstream
//! service error.

mod interactive;
mod visualize;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dbdiag_api::{ApiConfig, ApiServer};
use dbdiag_core::config::Config;
use dbdiag_core::Error;
use dbdiag_engine::{DiagnosisMode, DialogueManager};
use dbdiag_index::IndexBuilder;
use dbdiag_services::prelude::*;
use dbdiag_storage::{KnowledgeStore, SessionStore};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// dbdiag CLI arguments.
#[derive(Debug, Parser)]
#[clap(name = "dbdiag", version, about = "Multi-hypothesis database incident diagnosis")]
struct Cli {
    /// Configuration file path.
    #[clap(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[clap(long, env = "DBDIAG_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging.
    #[clap(long, env = "DBDIAG_LOG_JSON")]
    log_json: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create or migrate the knowledge store schema.
    Init,
    /// Append raw tickets from a JSON file.
    Import { file: PathBuf },
    /// Run the full offline index-build pipeline.
    RebuildIndex,
    /// Launch the interactive diagnosis loop.
    Cli {
        /// Hybrid mode: ticket-description retrieval + LLM feedback parsing.
        #[clap(long, conflicts_with = "rar")]
        hyb: bool,
        /// Pure LLM retrieval-augmented mode.
        #[clap(long)]
        rar: bool,
    },
    /// Launch the HTTP/WebSocket server.
    Web {
        #[clap(long)]
        host: Option<String>,
        #[clap(long)]
        port: Option<u16>,
    },
    /// Emit a self-contained HTML knowledge-graph page.
    Visualize {
        #[clap(long, default_value = "knowledge_graph.html")]
        out: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(&cli) {
        eprintln!("failed to initialize logging: {err}");
        return ExitCode::from(1);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start runtime: {err}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "command failed");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

/// Map the error taxonomy onto the documented exit codes.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(Error::Config(_)) | Some(Error::Validation(_)) => 1,
        Some(Error::Data(_)) | Some(Error::Integrity(_)) | Some(Error::NotFound(_)) => 2,
        Some(Error::Upstream(_)) | Some(Error::UpstreamPermanent(_)) | Some(Error::Timeout(_)) => 3,
        _ => 1,
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .context("invalid log level")?;
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(log_level.into());

    if cli.log_json {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .with(filter)
            .init();
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_file(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    info!(config = %cli.config.display(), "configuration loaded");

    match cli.command {
        Command::Init => run_init(&config),
        Command::Import { file } => run_import(&config, &file),
        Command::RebuildIndex => run_rebuild(&config).await,
        Command::Cli { hyb, rar } => run_interactive(&config, hyb, rar).await,
        Command::Web { host, port } => run_web(&config, host, port).await,
        Command::Visualize { out } => visualize::run(&config, &out),
    }
}

fn open_stores(config: &Config) -> Result<(Arc<KnowledgeStore>, Arc<SessionStore>)> {
    let store = Arc::new(KnowledgeStore::open(&config.storage.db_path)?);
    let sessions = Arc::new(SessionStore::open(&config.storage.db_path)?);
    Ok((store, sessions))
}

fn build_services(config: &Config) -> Result<(Arc<dyn Embedder>, Arc<dyn ChatModel>)> {
    let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(config.embedding.clone())?);
    let chat: Arc<dyn ChatModel> = Arc::new(HttpChatModel::new(config.llm.clone())?);
    Ok((embedder, chat))
}

fn run_init(config: &Config) -> Result<()> {
    let (store, _sessions) = open_stores(config)?;
    println!("knowledge store ready: {}", config.storage.db_path.display());
    for (table, count) in store.table_counts()? {
        println!("  {table}: {count}");
    }
    Ok(())
}

fn run_import(config: &Config, file: &PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .map_err(|e| Error::data(format!("cannot read {}: {e}", file.display())))?;
    let tickets: Vec<dbdiag_core::knowledge::TicketImport> = serde_json::from_str(&raw)
        .map_err(|e| Error::data(format!("malformed import file {}: {e}", file.display())))?;

    let (store, _sessions) = open_stores(config)?;
    let stats = store.import_tickets(&tickets)?;
    println!(
        "imported {} tickets ({} anomalies), skipped {} duplicates",
        stats.imported, stats.anomalies, stats.skipped
    );
    println!("run `dbdiag rebuild-index` to refresh the knowledge graph");
    Ok(())
}

async fn run_rebuild(config: &Config) -> Result<()> {
    let (store, _sessions) = open_stores(config)?;
    let (embedder, chat) = build_services(config)?;
    let builder = IndexBuilder::new(
        store,
        embedder,
        chat,
        config.engine.cluster_similarity_threshold,
    );

    let stats = builder.rebuild().await?;
    println!("index rebuilt:");
    println!("  phenomena: {}", stats.phenomena);
    println!("  root_causes: {}", stats.root_causes);
    println!("  tickets: {}", stats.tickets);
    println!("  ticket_phenomena: {}", stats.ticket_phenomena);
    println!("  phenomenon_root_causes: {}", stats.phenomenon_root_causes);
    println!("  ticket_index: {}", stats.ticket_index);
    Ok(())
}

async fn run_interactive(config: &Config, hyb: bool, rar: bool) -> Result<()> {
    let (store, sessions) = open_stores(config)?;
    let (embedder, chat) = build_services(config)?;

    if rar {
        let retriever = Arc::new(dbdiag_engine::prelude::Retriever::new(
            store,
            embedder,
            config.engine.vector_candidates,
        ));
        let manager = dbdiag_engine::RarDialogueManager::new(
            retriever,
            chat,
            sessions,
            config.engine.ticket_search_top_k,
        );
        return interactive::run_rar(manager).await;
    }

    let mode = if hyb {
        DiagnosisMode::Hyb
    } else {
        DiagnosisMode::Gar
    };
    let manager = DialogueManager::new(
        mode,
        config.engine.clone(),
        store,
        sessions,
        embedder,
        chat,
    );
    interactive::run(manager).await
}

async fn run_web(config: &Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    let (store, sessions) = open_stores(config)?;
    let (embedder, chat) = build_services(config)?;

    // The web surface defaults to the hybrid strategy.
    let manager = Arc::new(DialogueManager::new(
        DiagnosisMode::Hyb,
        config.engine.clone(),
        store,
        sessions,
        embedder,
        chat,
    ));

    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let bind_addr = format!("{host}:{port}")
        .parse()
        .map_err(|e| Error::config(format!("invalid bind address {host}:{port}: {e}")))?;

    let server = ApiServer::new(
        ApiConfig {
            bind_addr,
            request_timeout_secs: config.server.request_timeout_secs,
        },
        manager,
        env!("CARGO_PKG_VERSION").to_string(),
    );

    tokio::select! {
        result = server.serve() => result.map_err(Into::into),
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            Ok(())
        }
    }
}
