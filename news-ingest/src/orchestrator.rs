use crate::outcome::Outcome;
use crate::progress::ProgressSink;
use crate::types::{IngestError, Source};
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Hands out source indices to workers. Each index is claimed exactly once.
#[derive(Debug)]
pub struct WorkQueue {
    cursor: AtomicUsize,
    len: usize,
}

impl WorkQueue {
    pub fn new(len: usize) -> Self {
        Self {
            cursor: AtomicUsize::new(0),
            len,
        }
    }

    pub fn next(&self) -> Option<usize> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        (index < self.len).then_some(index)
    }
}

/// Resolves the requested worker count against the number of sources.
/// `0` means one worker per available CPU.
pub fn resolve_workers(requested: usize, sources: usize) -> usize {
    let workers = if requested == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        requested
    };
    workers.min(sources).max(1)
}

/// Runs `process` for every source on a fixed pool of tasks and returns the
/// outcomes in input order, one per source. A panic while processing a source
/// fails that source only; its worker moves on to the next one.
pub async fn run_concurrently<F, Fut>(
    sources: Vec<Source>,
    workers: usize,
    process: F,
    progress: ProgressSink,
    cancel: CancellationToken,
) -> Vec<Outcome>
where
    F: Fn(Source, ProgressSink, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    if sources.is_empty() {
        return Vec::new();
    }

    let workers = resolve_workers(workers, sources.len());
    info!("Processing {} sources with {} workers", sources.len(), workers);

    let sources = Arc::new(sources);
    let slots: Arc<Vec<OnceLock<Outcome>>> =
        Arc::new((0..sources.len()).map(|_| OnceLock::new()).collect());
    let queue = Arc::new(WorkQueue::new(sources.len()));
    let process = Arc::new(process);

    let handles = (0..workers).map(|worker| {
        let sources = sources.clone();
        let slots = slots.clone();
        let queue = queue.clone();
        let process = process.clone();
        let progress = progress.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            while let Some(index) = queue.next() {
                let source = sources[index].clone();
                debug!(worker, source = %source.name, "Worker picked up source");

                let run = process(source.clone(), progress.clone(), cancel.clone());
                let outcome = match AssertUnwindSafe(run).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        error!(worker, source = %source.name, "Processing panicked: {}", message);
                        Outcome::failed(
                            source,
                            0,
                            IngestError::General(format!("source processing panicked: {}", message)),
                        )
                    }
                };
                // Each index is claimed once, so the slot is always empty.
                let _ = slots[index].set(outcome);
            }
        })
    });

    for joined in join_all(handles).await {
        if let Err(err) = joined {
            error!("Worker task failed: {}", err);
        }
    }

    let mut filled = Arc::into_inner(slots)
        .unwrap_or_default()
        .into_iter()
        .map(OnceLock::into_inner);

    sources
        .iter()
        .map(|source| {
            filled.next().flatten().unwrap_or_else(|| {
                Outcome::failed(
                    source.clone(),
                    0,
                    IngestError::General("worker stopped before finishing source".into()),
                )
            })
        })
        .collect()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    fn sources(n: usize) -> Vec<Source> {
        (0..n)
            .map(|i| Source::new(format!("s{}", i), format!("https://s{}.example/feed", i)))
            .collect()
    }

    #[test]
    fn queue_hands_out_each_index_once() {
        let queue = WorkQueue::new(3);
        assert_eq!(queue.next(), Some(0));
        assert_eq!(queue.next(), Some(1));
        assert_eq!(queue.next(), Some(2));
        assert_eq!(queue.next(), None);
        assert_eq!(queue.next(), None);
    }

    #[test]
    fn workers_are_clamped_to_sources() {
        assert_eq!(resolve_workers(8, 3), 3);
        assert_eq!(resolve_workers(2, 3), 2);
        assert!(resolve_workers(0, 100) >= 1);
        assert_eq!(resolve_workers(0, 1), 1);
    }

    #[tokio::test]
    async fn outcomes_keep_input_order() {
        let outcomes = run_concurrently(
            sources(6),
            3,
            |source, _progress, _cancel| async move {
                // Later sources finish first.
                let n: u64 = source.name[1..].parse().unwrap();
                tokio::time::sleep(Duration::from_millis(30 - n * 5)).await;
                Outcome::succeeded(source, n as usize)
            },
            ProgressSink::disabled(),
            CancellationToken::new(),
        )
        .await;

        let names: Vec<_> = outcomes.iter().map(|o| o.source.name.as_str()).collect();
        assert_eq!(names, vec!["s0", "s1", "s2", "s3", "s4", "s5"]);
        assert!(outcomes.iter().enumerate().all(|(i, o)| o.added == i));
    }

    #[tokio::test]
    async fn every_source_processed_exactly_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();

        let outcomes = run_concurrently(
            sources(20),
            4,
            move |source, _progress, _cancel| {
                let recorder = recorder.clone();
                async move {
                    recorder.lock().unwrap().push(source.name.clone());
                    Outcome::succeeded(source, 1)
                }
            },
            ProgressSink::disabled(),
            CancellationToken::new(),
        )
        .await;

        let seen = seen.lock().unwrap();
        let unique: HashSet<_> = seen.iter().collect();
        assert_eq!(seen.len(), 20);
        assert_eq!(unique.len(), 20);
        assert_eq!(outcomes.len(), 20);
    }

    #[tokio::test]
    async fn panic_fails_only_its_own_source() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();

        let outcomes = run_concurrently(
            sources(3),
            1,
            move |source, _progress, _cancel| {
                let recorder = recorder.clone();
                async move {
                    recorder.lock().unwrap().push(source.name.clone());
                    match source.name.as_str() {
                        "s0" => Outcome::succeeded(source, 5),
                        "s1" => panic!("boom"),
                        _ => Outcome::succeeded(source, 2),
                    }
                }
            },
            ProgressSink::disabled(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(*seen.lock().unwrap(), vec!["s0", "s1", "s2"]);
        assert_eq!(outcomes.len(), 3);

        assert!(outcomes[0].is_success());
        assert_eq!(outcomes[0].added, 5);
        assert!(outcomes[2].is_success());
        assert_eq!(outcomes[2].added, 2);

        let err = outcomes[1].error.as_ref().expect("s1 fails");
        assert_eq!(outcomes[1].added, 0);
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn empty_input_returns_empty_output() {
        let outcomes = run_concurrently(
            Vec::new(),
            4,
            |source, _progress, _cancel| async move { Outcome::succeeded(source, 0) },
            ProgressSink::disabled(),
            CancellationToken::new(),
        )
        .await;
        assert!(outcomes.is_empty());
    }
}
