//! `carassist` command line.
//!
//! ```bash
//! carassist ingest --data-dir data/PDF
//! carassist search "how do I check tire pressure"
//! carassist ask "how do I check tire pressure" --conversation demo
//! ```
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use carassist_agent::{history_from_settings, KnowledgeTool, OllamaGenerator, StreamCoordinator, StreamRequest, ToolRegistry};
use carassist_core::config::{resolve_with_base, Config, Settings};
use carassist_core::data_processor::ChunkingConfig;
use carassist_embed::build_embedder;
use carassist_hybrid::KnowledgeBase;
use carassist_vector::ingest_directory;

/// Automotive assistant over a local library of manuals.
#[derive(Parser)]
#[command(name = "carassist", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk and embed documents into the vector store
    Ingest {
        /// Source directory (defaults to `ingest.data_dir`)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Print the knowledge passages retrieved for a query
    Search { query: String },
    /// Stream an answer from the assistant
    Ask {
        question: String,
        #[arg(long, default_value = "local")]
        conversation: String,
        /// Bearer token for the conversation API
        #[arg(long, default_value = "")]
        token: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();

    let settings = Config::load()?.settings()?;
    let base = std::env::current_dir()?;
    match cli.command {
        Command::Ingest { data_dir } => ingest(&settings, &base, data_dir),
        Command::Search { query } => {
            let knowledge = KnowledgeBase::from_settings(&settings, &base)?;
            println!("{}", knowledge.search_pdf_knowledge(&query));
            Ok(())
        }
        Command::Ask { question, conversation, token } => ask(&settings, &base, question, conversation, token),
    }
}

fn ingest(settings: &Settings, base: &std::path::Path, data_dir: Option<PathBuf>) -> Result<()> {
    let data_dir = data_dir.unwrap_or_else(|| resolve_with_base(base, &settings.ingest.data_dir));
    let store_path = resolve_with_base(base, &settings.knowledge.store_path);
    let embedder = build_embedder(&settings.embedding)?;
    info!(data_dir = %data_dir.display(), store = %store_path.display(), embedder = embedder.id(), "ingesting");
    let report = tokio::runtime::Runtime::new()?.block_on(ingest_directory(
        &data_dir,
        &store_path,
        &settings.knowledge.table,
        ChunkingConfig::from(&settings.ingest),
        embedder.as_ref(),
        settings.embedding.batch_size,
    ))?;
    println!("✅ Ingest complete ({} chunks, dim {})", report.chunks, report.dim);
    Ok(())
}

fn ask(settings: &Settings, base: &std::path::Path, question: String, conversation: String, token: String) -> Result<()> {
    let knowledge = Arc::new(KnowledgeBase::from_settings(settings, base)?);
    if let Err(e) = knowledge.initialize() {
        warn!(error = %e, "knowledge base unavailable; answers will not cite the manuals");
    }
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(KnowledgeTool::new(knowledge)));
    let generator = OllamaGenerator::from_settings(&settings.assistant, Arc::new(tools))?;
    info!(model = generator.model(), "assistant ready");
    let history = history_from_settings(&settings.history)?;
    let coordinator = StreamCoordinator::from_settings(&settings.assistant, Arc::new(generator), history);

    tokio::runtime::Runtime::new()?.block_on(async {
        let request = StreamRequest { question, conversation_id: conversation, access_token: token };
        let mut stream = coordinator.start(request).await?;
        let mut stdout = std::io::stdout();
        while let Some(token) = stream.next_token().await {
            stdout.write_all(token.as_bytes())?;
            stdout.flush()?;
        }
        writeln!(stdout)?;
        Ok::<(), anyhow::Error>(())
    })
}
