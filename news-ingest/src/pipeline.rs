use crate::analyze::Analyzer;
use crate::error::user_message;
use crate::extract::ContentExtractor;
use crate::fetcher::{fetch_source, FeedReader};
use crate::orchestrator::run_concurrently;
use crate::outcome::Outcome;
use crate::progress::{Phase, ProgressEvent, ProgressSink};
use crate::retry::{retry, RetryPolicy};
use crate::store::ItemStore;
use crate::types::{AnalysisStatus, CandidateItem, IngestError, NewItem, Result, Source};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Per-run knobs shared by every source.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub retry: RetryPolicy,
    pub network_timeout: Duration,
    /// Most recent items to consider per source; 0 means all.
    pub fetch_limit: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            network_timeout: Duration::from_secs(8),
            fetch_limit: 0,
        }
    }
}

struct Enricher {
    extractor: Arc<dyn ContentExtractor>,
    analyzer: Arc<dyn Analyzer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Skipped,
    Stored(AnalysisStatus),
}

/// Fetch → dedup → enrich → store, for one source at a time.
pub struct Pipeline {
    reader: Arc<dyn FeedReader>,
    store: Arc<dyn ItemStore>,
    enricher: Option<Enricher>,
    config: RunConfig,
}

impl Pipeline {
    pub fn new(reader: Arc<dyn FeedReader>, store: Arc<dyn ItemStore>, config: RunConfig) -> Self {
        Self {
            reader,
            store,
            enricher: None,
            config,
        }
    }

    /// Enables enrichment. Both collaborators are required; there is no
    /// extract-only or analyze-only mode.
    pub fn with_enrichment(
        mut self,
        extractor: Arc<dyn ContentExtractor>,
        analyzer: Arc<dyn Analyzer>,
    ) -> Self {
        self.enricher = Some(Enricher {
            extractor,
            analyzer,
        });
        self
    }

    pub fn is_enriching(&self) -> bool {
        self.enricher.is_some()
    }

    /// Runs every source on a pool of `workers` tasks and returns one
    /// outcome per source, in input order.
    pub async fn run_all(
        self: Arc<Self>,
        sources: Vec<Source>,
        workers: usize,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Vec<Outcome> {
        let pipeline = self;
        run_concurrently(
            sources,
            workers,
            move |source, progress, cancel| {
                let pipeline = pipeline.clone();
                async move { pipeline.run_source(&source, &progress, &cancel).await }
            },
            progress,
            cancel,
        )
        .await
    }

    /// Runs one source to completion. Items are handled strictly in order.
    /// Items stored before a failure still count towards `added`.
    pub async fn run_source(
        &self,
        source: &Source,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Outcome {
        progress.emit(ProgressEvent::new(&source.name, Phase::Fetch)).await;

        let (added, total, result) = self.ingest(source, progress, cancel).await;

        let mut done = ProgressEvent::new(&source.name, Phase::Done);
        done.current = added;
        done.total = total;

        match result {
            Ok(()) => {
                info!(source = %source.name, "Source {}: stored {} new items", source.name, added);
                progress.emit(done).await;
                Outcome::succeeded(source.clone(), added)
            }
            Err(err) => {
                error!(source = %source.name, kind = %err.kind(), "Source {} failed: {}", source.name, err);
                progress.emit(done.with_error(user_message(&err))).await;
                Outcome::failed(source.clone(), added, err)
            }
        }
    }

    async fn ingest(
        &self,
        source: &Source,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> (usize, usize, Result<()>) {
        let items = match fetch_source(
            self.reader.as_ref(),
            source,
            &self.config.retry,
            self.config.network_timeout,
            self.config.fetch_limit,
            cancel,
        )
        .await
        {
            Ok(items) => items,
            Err(err) => return (0, 0, Err(err)),
        };

        let total = items.len();
        let mut added = 0;

        for (index, item) in items.iter().enumerate() {
            let current = index + 1;
            progress
                .emit(ProgressEvent::item(&source.name, Phase::Extract, current, total, &item.title))
                .await;

            match self.process_item(source, item, current, total, progress, cancel).await {
                Ok(ItemOutcome::Stored(status)) => {
                    debug!(source = %source.name, status = status.as_str(), "Stored {}", item.link);
                    added += 1;
                }
                Ok(ItemOutcome::Skipped) => {}
                Err(err) => return (added, total, Err(err)),
            }
        }

        (added, total, Ok(()))
    }

    async fn process_item(
        &self,
        source: &Source,
        item: &CandidateItem,
        current: usize,
        total: usize,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ItemOutcome> {
        let store = self.store.as_ref();
        let link = item.link.as_str();

        let existing = retry(&self.config.retry, cancel, "check item exists", move || {
            store.find_by_link(link)
        })
        .await?;

        if existing.is_some() {
            debug!(source = %source.name, "Skipping already stored item: {}", link);
            return Ok(ItemOutcome::Skipped);
        }

        let new_item = self
            .enrich(source, item, current, total, progress, cancel)
            .await;
        let status = new_item.analysis_status;
        let new_item = &new_item;

        match retry(&self.config.retry, cancel, "insert item", move || store.insert(new_item)).await {
            Ok(_) => Ok(ItemOutcome::Stored(status)),
            Err(err) if err.is_duplicate() => {
                debug!(source = %source.name, "Item stored concurrently, skipping: {}", link);
                Ok(ItemOutcome::Skipped)
            }
            Err(err) => Err(err),
        }
    }

    /// Best effort: any enrichment failure downgrades the item to `Pending`
    /// and never stops it from being stored.
    async fn enrich(
        &self,
        source: &Source,
        item: &CandidateItem,
        current: usize,
        total: usize,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> NewItem {
        let new_item = NewItem::from_candidate(item, &source.name);
        let Some(enricher) = &self.enricher else {
            return new_item;
        };

        let extractor = enricher.extractor.as_ref();
        let link = item.link.as_str();
        let content = match retry(&self.config.retry, cancel, "extract content", move || {
            extractor.extract(link)
        })
        .await
        {
            Ok(content) => content,
            Err(err) => {
                warn_enrichment(source, link, &err);
                return pending(new_item);
            }
        };

        progress
            .emit(ProgressEvent::item(&source.name, Phase::Analyze, current, total, &item.title))
            .await;

        let analyzer = enricher.analyzer.as_ref();
        let text = content.as_str();
        match retry(&self.config.retry, cancel, "analyze content", move || analyzer.analyze(text)).await {
            Ok(analysis) => new_item.with_content(content).with_analysis(analysis),
            Err(err) => {
                warn_enrichment(source, link, &err);
                pending(new_item.with_content(content))
            }
        }
    }
}

fn pending(mut item: NewItem) -> NewItem {
    item.analysis_status = AnalysisStatus::Pending;
    item
}

fn warn_enrichment(source: &Source, link: &str, err: &IngestError) {
    warn!(
        source = %source.name,
        kind = %err.kind(),
        "Enrichment failed for {}, storing without analysis: {}",
        link,
        err
    );
}
