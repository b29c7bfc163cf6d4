//! docent binary: `init` writes a default config, `chat` starts the console
//! loop, `serve` runs the web service. Both chat and serve share the startup
//! pipeline: check the backend and model, load the corpus, load or build the
//! index, then hand an [`AppContext`] to the chosen frontend.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use once_cell::sync::OnceCell;
use tracing::{info, warn};

use docent::chunker::Chunker;
use docent::commands::{Cli, Commands};
use docent::config::{DocentConfig, load_config};
use docent::document::ParserRegistry;
use docent::embedding::CandleEmbedder;
use docent::index::IndexCache;
use docent::orchestrator::QueryOrchestrator;
use docent::retriever::Retriever;
use docent::server::AppContext;
use docent::synthesizer::{OllamaClient, Synthesizer};
use docent::{broadcast::ConnectionBroadcaster, session::SessionRegistry};

static TRACING: OnceCell<()> = OnceCell::new();

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt::init();
    });

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => docent::config_dir()?.join("config.yaml"),
    };

    match cli.command {
        Commands::Init => init(&config_path),
        Commands::Chat => {
            let ctx = bootstrap(&config_path).await?;
            docent::chat::run(ctx).await
        }
        Commands::Serve => {
            let ctx = bootstrap(&config_path).await?;
            docent::server::serve(ctx).await
        }
    }
}

/// Write a default configuration file, creating parent directories.
fn init(config_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let yaml = serde_yaml::to_string(&DocentConfig::default())?;
    fs::write(config_path, yaml)?;
    info!(path = %config_path.display(), "wrote default configuration");
    Ok(())
}

/// Build the shared application context: config, backend, corpus, index.
async fn bootstrap(config_path: &PathBuf) -> anyhow::Result<Arc<AppContext>> {
    let config = if config_path.exists() {
        load_config(config_path)?
    } else {
        info!(
            path = %config_path.display(),
            "no configuration file, using defaults"
        );
        DocentConfig::default()
    };
    config.validate()?;

    // The backend and model must be reachable before we spend time indexing.
    let client = OllamaClient::new(&config)?;
    client
        .ensure_model()
        .await
        .with_context(|| format!("backend at {} is unavailable", config.backend_base_url))?;

    let registry = ParserRegistry::with_defaults();
    let documents = registry.load_corpus(&config.docs_dir);
    if documents.is_empty() {
        warn!(path = %config.docs_dir.display(), "corpus is empty");
    }

    let embedder = Arc::new(
        CandleEmbedder::load(config.embedding_dimension)
            .context("failed to load the embedding model")?,
    );
    let cache = IndexCache::new(
        &config.index_path,
        Chunker::new(config.chunk_size, config.chunk_overlap),
        embedder.clone(),
    );
    let index = Arc::new(cache.load_or_build(&documents)?);

    let retriever = Retriever::new(embedder, config.top_k);
    let synthesizer = Synthesizer::new(client, config.system_prompt());
    let orchestrator = QueryOrchestrator::new(index, retriever, synthesizer);

    Ok(Arc::new(AppContext {
        config,
        registry: SessionRegistry::new(),
        broadcaster: ConnectionBroadcaster::new(),
        orchestrator,
    }))
}
