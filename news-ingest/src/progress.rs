use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Fetch,
    Extract,
    Analyze,
    Done,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Fetch => "fetch",
            Phase::Extract => "extract",
            Phase::Analyze => "analyze",
            Phase::Done => "done",
        }
    }
}

/// One step of one source's run. Events of a single source arrive in order;
/// events of different sources interleave.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub source_name: String,
    pub phase: Phase,
    pub current: usize,
    pub total: usize,
    pub item_title: Option<String>,
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn new(source_name: &str, phase: Phase) -> Self {
        Self {
            source_name: source_name.to_string(),
            phase,
            current: 0,
            total: 0,
            item_title: None,
            error: None,
        }
    }

    pub fn item(source_name: &str, phase: Phase, current: usize, total: usize, title: &str) -> Self {
        Self {
            current,
            total,
            item_title: Some(title.to_string()),
            ..Self::new(source_name, phase)
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Producer side of the shared progress channel. Cloned into every worker.
/// Sends wait when the channel is full, so a slow reader throttles workers
/// instead of losing events.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    sender: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressSink {
    /// A sink that discards every event.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub async fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            // A closed receiver means nobody is watching; the run carries on.
            let _ = sender.send(event).await;
        }
    }
}

/// Creates a bounded progress channel.
pub fn channel(capacity: usize) -> (ProgressSink, mpsc::Receiver<ProgressEvent>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (ProgressSink { sender: Some(sender) }, receiver)
}

/// The single reader: hands every event to `handler` until all sinks are
/// dropped. `handler` must not block on pipeline work.
pub fn spawn_forwarder<F>(mut receiver: mpsc::Receiver<ProgressEvent>, mut handler: F) -> JoinHandle<()>
where
    F: FnMut(ProgressEvent) + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            handler(event);
        }
    })
}
