use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ferret_index::catalog::{Catalog, ChunkCatalog};
use ferret_index::chunker::Chunker;
use ferret_index::classify::TestClassifier;
use ferret_index::config::Config;
use ferret_index::context::format_result;
use ferret_index::embed::HashingEmbedder;
use ferret_index::languages::Lang;
use ferret_index::pipeline::{FileOutcome, IndexPipeline, IndexReport};
use ferret_index::retriever::{HybridRetriever, SearchFilter};
use ferret_index::snapshot::SnapshotStore;
use ferret_index::store::{SqliteVectorStore, VectorStore};
use tokio_util::sync::CancellationToken;

/// Incremental code indexer with hybrid lexical and semantic search.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file; defaults to $FERRET_CONFIG, then ferret.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index or re-sync a source tree
    Index {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Search the index
    Search {
        query: String,
        /// Number of results; defaults to retrieval.default_top_k
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Drop chunks from test files
        #[arg(long)]
        exclude_tests: bool,
        /// Only return chunks in this language (repeatable)
        #[arg(long = "lang")]
        languages: Vec<Lang>,
        /// Only return chunks whose path starts with this prefix
        #[arg(long)]
        path_prefix: Option<String>,
    },
    /// Show index statistics
    Status,
}

/// Collaborators shared by every subcommand.
struct App {
    config: Config,
    snapshots: SnapshotStore,
    store: Arc<dyn VectorStore>,
    embedder: Arc<HashingEmbedder>,
    catalog: Catalog,
}

impl App {
    async fn open(config: Config) -> anyhow::Result<Self> {
        let snapshots = SnapshotStore::open(&config.storage.sqlite_path)
            .await
            .with_context(|| format!("failed to open index at {}", config.storage.sqlite_path))?;
        let embedder = Arc::new(HashingEmbedder::new(
            config.embedding.dimensions,
            config.embedding.max_batch_size,
        ));
        let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(
            snapshots.pool().clone(),
            embedder.dimensions(),
        ));
        let chunks = snapshots
            .load_chunks()
            .await
            .context("failed to load chunk catalog")?;
        let catalog = Catalog::new(
            ChunkCatalog::from_chunks(chunks).context("failed to build lexical index")?,
            config.retrieval.symbol_boost,
        );
        Ok(Self {
            config,
            snapshots,
            store,
            embedder,
            catalog,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_subscriber();

    let config_path = resolve_config_path(cli.config);
    let config = Config::load(&config_path)?;
    config.validate()?;
    let app = App::open(config).await?;

    match cli.command {
        Command::Index { path } => index(app, path).await,
        Command::Search {
            query,
            top_k,
            exclude_tests,
            languages,
            path_prefix,
        } => {
            let filter = SearchFilter {
                exclude_tests,
                languages,
                path_prefix,
            };
            search(app, &query, top_k, &filter).await
        }
        Command::Status => status(app).await,
    }
}

async fn index(app: App, path: PathBuf) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("interrupt received, finishing in-flight batches");
        token.cancel();
    });

    let classifier = TestClassifier::new(&app.config.tests)?;
    let chunker = Chunker::new(app.config.chunker.clone(), classifier);
    let pipeline = IndexPipeline::new(
        app.config.pipeline.clone(),
        chunker,
        app.embedder,
        app.store,
        app.snapshots,
        app.catalog,
    );

    let report = pipeline
        .index_root(&path, &app.config.walker, cancel)
        .await
        .with_context(|| format!("indexing {} failed", path.display()))?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &IndexReport) {
    for (path, outcome) in &report.outcomes {
        match outcome {
            FileOutcome::Failed { reason } => println!("failed     {path}: {reason}"),
            FileOutcome::PartialFailure {
                failed_chunks,
                reasons,
            } => println!(
                "partial    {path}: {} chunks failed ({})",
                failed_chunks.len(),
                reasons.join("; ")
            ),
            FileOutcome::Inconsistent { .. } => println!("reindexed  {path}: vectors were missing"),
            FileOutcome::Indexed | FileOutcome::Removed | FileOutcome::Cancelled => {}
        }
    }
    println!(
        "{} scanned, {} indexed, {} unchanged, {} removed, {} failed",
        report.files_scanned,
        report.files_indexed,
        report.files_unchanged,
        report.files_removed,
        report.files_failed,
    );
    println!(
        "{} chunks, {} embedded in {} calls, {} deduplicated, {} orphan vectors deleted ({} ms)",
        report.chunks_total,
        report.chunks_embedded,
        report.embed_calls,
        report.chunks_deduplicated,
        report.orphans_collected,
        report.duration_ms,
    );
    if report.vectors_untracked > 0 {
        println!(
            "{} stored vectors have no dedup entry",
            report.vectors_untracked
        );
    }
    if report.files_unreadable > 0 {
        println!(
            "{} paths could not be read; their index entries were kept",
            report.files_unreadable
        );
    }
    if report.was_cancelled() {
        println!(
            "cancelled: {} files left for the next run",
            report.files_cancelled
        );
    }
}

async fn search(
    app: App,
    query: &str,
    top_k: Option<usize>,
    filter: &SearchFilter,
) -> anyhow::Result<()> {
    let top_k = top_k.unwrap_or(app.config.retrieval.default_top_k);
    let retriever = HybridRetriever::new(
        app.catalog.clone(),
        app.store,
        app.embedder,
        app.config.retrieval.clone(),
    );
    let results = retriever.search(query, top_k, filter).await?;
    if results.is_empty() {
        println!("no results");
        return Ok(());
    }
    app.catalog.read(|cat| {
        for (i, result) in results.iter().enumerate() {
            print!("{}", format_result(i + 1, result, cat.get(&result.chunk_id)));
        }
    });
    Ok(())
}

async fn status(app: App) -> anyhow::Result<()> {
    let stats = app.snapshots.stats().await?;
    let vectors = app.store.count().await?;
    println!("index:         {}", app.config.storage.sqlite_path);
    println!("files:         {}", stats.files);
    println!("chunks:        {}", stats.chunks);
    println!("dedup entries: {}", stats.dedup_entries);
    println!("vectors:       {vectors}");
    Ok(())
}

fn resolve_config_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Ok(path) = std::env::var("FERRET_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("ferret.toml")
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_search_filters() {
        let cli = Cli::try_parse_from([
            "ferret",
            "search",
            "parse config",
            "-k",
            "5",
            "--exclude-tests",
            "--lang",
            "rust",
            "--lang",
            "python",
            "--path-prefix",
            "src/",
        ])
        .unwrap();
        let Command::Search {
            query,
            top_k,
            exclude_tests,
            languages,
            path_prefix,
        } = cli.command
        else {
            panic!("expected search");
        };
        assert_eq!(query, "parse config");
        assert_eq!(top_k, Some(5));
        assert!(exclude_tests);
        assert_eq!(languages, vec![Lang::Rust, Lang::Python]);
        assert_eq!(path_prefix.as_deref(), Some("src/"));
    }

    #[test]
    fn cli_index_defaults_to_cwd() {
        let cli = Cli::try_parse_from(["ferret", "index"]).unwrap();
        assert!(matches!(cli.command, Command::Index { path } if path == PathBuf::from(".")));
    }

    #[test]
    fn cli_rejects_unknown_language() {
        assert!(Cli::try_parse_from(["ferret", "search", "q", "--lang", "cobol"]).is_err());
    }

    #[test]
    fn explicit_config_flag_wins() {
        let p = resolve_config_path(Some(PathBuf::from("custom.toml")));
        assert_eq!(p, PathBuf::from("custom.toml"));
    }
}
