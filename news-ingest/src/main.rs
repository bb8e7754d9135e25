use anyhow::{bail, Context};
use clap::Parser;
use news_ingest::config::{load_sources, parse_source_arg};
use news_ingest::progress::{self, Phase};
use news_ingest::{
    GeminiAnalyzer, HttpFeedReader, IngestConfig, Pipeline, ReaderExtractor, RunSummary,
    SqliteStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "news-ingest",
    about = "Fetch news feeds, enrich new items and store them",
    version
)]
struct Cli {
    /// SQLite database URL.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Source to fetch, as name=url. Repeatable.
    #[arg(long = "source", value_name = "NAME=URL")]
    sources: Vec<String>,

    /// JSON file with an array of {"name", "url"} sources.
    #[arg(long)]
    sources_file: Option<PathBuf>,

    /// Concurrent workers (0 = one per CPU).
    #[arg(long, env = "FETCH_WORKERS")]
    workers: Option<usize>,

    /// Most recent items per source (0 = all).
    #[arg(long, env = "FETCH_LIMIT")]
    limit: Option<usize>,

    /// Store items without extracting or analysing them.
    #[arg(long)]
    no_enrich: bool,

    /// Reader service used for content extraction.
    #[arg(long)]
    reader_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = IngestConfig::from_env();
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if let Some(limit) = cli.limit {
        config.fetch_limit = limit;
    }
    if let Some(endpoint) = cli.reader_endpoint {
        config.reader_endpoint = endpoint;
    }

    let mut sources = Vec::new();
    if let Some(path) = &cli.sources_file {
        sources.extend(load_sources(path).with_context(|| format!("loading {}", path.display()))?);
    }
    for arg in &cli.sources {
        sources.push(parse_source_arg(arg)?);
    }
    if sources.is_empty() {
        bail!("no sources given; use --source name=url or --sources-file");
    }

    let store = SqliteStore::open(&config.database_url)
        .await
        .with_context(|| format!("opening database {}", config.database_url))?;
    let reader = HttpFeedReader::new(&config.user_agent, config.network_timeout())?;

    let mut pipeline = Pipeline::new(Arc::new(reader), Arc::new(store.clone()), config.run_config());
    if !cli.no_enrich {
        match GeminiAnalyzer::from_env(&config.analysis_model, config.network_timeout()) {
            Ok(analyzer) => {
                let extractor = ReaderExtractor::new(
                    &config.reader_endpoint,
                    &config.user_agent,
                    config.network_timeout(),
                )?;
                pipeline = pipeline.with_enrichment(Arc::new(extractor), Arc::new(analyzer));
            }
            Err(e) => warn!("Enrichment disabled: {}", e),
        }
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received interrupt, cancelling run");
        on_signal.cancel();
    });

    let (sink, receiver) = progress::channel(progress::DEFAULT_CAPACITY);
    let forwarder = progress::spawn_forwarder(receiver, |event| match (event.phase, &event.error) {
        (Phase::Done, Some(error)) => eprintln!("[{}] failed: {}", event.source_name, error),
        (Phase::Done, None) => eprintln!("[{}] done ({} new)", event.source_name, event.current),
        (Phase::Fetch, _) => eprintln!("[{}] fetching", event.source_name),
        (phase, _) => eprintln!(
            "[{}] {} {}/{} {}",
            event.source_name,
            phase.as_str(),
            event.current,
            event.total,
            event.item_title.as_deref().unwrap_or("")
        ),
    });

    info!("Fetching {} sources", sources.len());
    let outcomes = Arc::new(pipeline)
        .run_all(sources, config.workers, sink, cancel)
        .await;
    forwarder.await?;

    let summary = RunSummary::from_outcomes(&outcomes);
    print!("{}", summary);
    info!("Store now holds {} items", store.count_items().await?);
    store.close().await;

    Ok(())
}
