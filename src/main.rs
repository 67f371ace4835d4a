//! Repository Indexer - Main Entry Point
//!
//! Ingests a local repository checkout and answers questions over it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use repo_indexer::output::{
    self, EmbeddingProvider, HashingEmbedder, HttpEmbeddingProvider, SqliteLexicalStore, SqliteVectorIndex,
};
use repo_indexer::retrieval::RetrievalRequest;
use repo_indexer::types::SearchFilters;
use repo_indexer::{IngestRequest, IngestionPipeline, LocalRepository, Namespace, PipelineConfig};

#[derive(Parser)]
#[command(name = "repo-indexer", version, about)]
struct Cli {
    /// Config file (TOML, YAML or JSON); REPO_INDEXER_* variables override it
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index a repository checkout and print the run summary
    Ingest(RepoArgs),
    /// Index a repository, then answer a question over it
    Ask {
        #[command(flatten)]
        repo: RepoArgs,
        question: String,
        #[arg(short, default_value_t = 5)]
        k: usize,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        path_prefix: Option<String>,
    },
    /// Print the strategy recommendation for a commit range
    Plan {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        previous_commit: String,
        #[arg(long, default_value = "HEAD")]
        current_commit: String,
    },
}

#[derive(Args)]
struct RepoArgs {
    #[arg(long)]
    path: PathBuf,
    #[arg(long)]
    owner: String,
    #[arg(long)]
    name: String,
    #[arg(long, default_value = "main")]
    branch: String,
    #[arg(long)]
    previous_commit: Option<String>,
    #[arg(long)]
    current_commit: Option<String>,
}

impl RepoArgs {
    fn request(&self) -> IngestRequest {
        IngestRequest {
            repo_url: self.path.display().to_string(),
            branch: self.branch.clone(),
            owner: self.owner.clone(),
            name: self.name.clone(),
            previous_commit: self.previous_commit.clone(),
            current_commit: self.current_commit.clone(),
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "repo_indexer=info".into()),
    );
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").map_or(false, |f| f.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn build_pipeline(config: PipelineConfig, path: PathBuf) -> Result<IngestionPipeline> {
    let embedder: Arc<dyn EmbeddingProvider> = match HttpEmbeddingProvider::from_config(&config)? {
        Some(http) => Arc::new(http),
        None => {
            info!("No embedding API configured, using local hashing embedder");
            Arc::new(HashingEmbedder::new(config.embedding_dimensions))
        }
    };

    let database = PathBuf::from(&config.database_path);
    let pool = output::connect(&database)
        .await
        .with_context(|| format!("failed to open index database {}", database.display()))?;
    info!(database = %database.display(), "Using persistent index");

    let pipeline = IngestionPipeline::new(
        config,
        Arc::new(LocalRepository::new(path)),
        embedder,
        Arc::new(SqliteVectorIndex::new(pool.clone())),
        Arc::new(SqliteLexicalStore::new(pool)),
    )?;
    Ok(pipeline)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = PipelineConfig::load(cli.config.as_deref()).context("invalid configuration")?;

    info!("Starting repo-indexer v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Ingest(repo) => {
            let pipeline = build_pipeline(config, repo.path.clone()).await?;
            let summary = pipeline.process_repository(repo.request()).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Ask {
            repo,
            question,
            k,
            language,
            path_prefix,
        } => {
            let pipeline = build_pipeline(config, repo.path.clone()).await?;
            let summary = pipeline.process_repository(repo.request()).await?;
            info!(chunks = summary.chunks_stored, "Repository indexed");

            let mut filters = SearchFilters::default();
            filters.language = language.as_deref().map(repo_indexer::processing::Language::from_name);
            filters.path_prefix = path_prefix;

            let namespace = Namespace::new(&repo.owner, &repo.name, &repo.branch)?;
            let request = RetrievalRequest::new(question, namespace, k).with_filters(filters);
            let results = pipeline.retriever().retrieve(&request).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Command::Plan {
            path,
            previous_commit,
            current_commit,
        } => {
            let pipeline = build_pipeline(config, path).await?;
            let recommendation = pipeline.plan(&previous_commit, &current_commit).await?;
            println!("{}", serde_json::to_string_pretty(&recommendation)?);
        }
    }

    Ok(())
}
