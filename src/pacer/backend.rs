use std::collections::VecDeque;
use std::sync::Mutex;

use futures_util::future::BoxFuture;

use crate::Result;
use crate::util::lock_unpoisoned;

/// One observation pushed into a pacer window. Times are milliseconds since
/// the Unix epoch so that samples from several processes can share a store.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PacerSample {
    pub time_ms: u64,
    /// Samples older than this are dropped before statistics are computed.
    pub min_time_ms: u64,
    pub value: f64,
    pub min_count_for_central_tendency: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WindowStats {
    pub count: usize,
    pub sum: f64,
    pub avg: f64,
    pub median: f64,
}

/// Storage for the moving window of one paced resource.
///
/// `push` must be atomic: concurrent pushes each see a window that includes
/// every earlier push exactly once.
pub trait PacerQpsBackend: Send + Sync {
    /// Resource this backend tracks.
    fn key(&self) -> &str;

    fn push(&self, sample: PacerSample) -> BoxFuture<'_, Result<WindowStats>>;
}

#[derive(Debug, Default)]
struct Window {
    samples: VecDeque<(u64, f64)>,
    avg: f64,
    median: f64,
}

/// Process-local backend.
#[derive(Debug)]
pub struct InMemoryPacerBackend {
    key: String,
    window: Mutex<Window>,
}

impl InMemoryPacerBackend {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            window: Mutex::new(Window::default()),
        }
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.window).samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push_sync(&self, sample: PacerSample) -> WindowStats {
        let mut window = lock_unpoisoned(&self.window);
        window.samples.push_back((sample.time_ms, sample.value));
        window
            .samples
            .retain(|(time_ms, _)| *time_ms >= sample.min_time_ms);

        let count = window.samples.len();
        let sum = window.samples.iter().map(|(_, value)| value).sum::<f64>();
        // A handful of samples says little about the fleet; keep the figures
        // from the last representative window instead.
        if count >= sample.min_count_for_central_tendency && count > 0 {
            window.avg = sum / count as f64;
            window.median = median(window.samples.iter().map(|(_, value)| *value));
        }
        WindowStats {
            count,
            sum,
            avg: window.avg,
            median: window.median,
        }
    }
}

impl PacerQpsBackend for InMemoryPacerBackend {
    fn key(&self) -> &str {
        &self.key
    }

    fn push(&self, sample: PacerSample) -> BoxFuture<'_, Result<WindowStats>> {
        let stats = self.push_sync(sample);
        Box::pin(async move { Ok(stats) })
    }
}

fn median(values: impl Iterator<Item = f64>) -> f64 {
    let mut values = values.collect::<Vec<_>>();
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let middle = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[middle - 1] + values[middle]) / 2.0
    } else {
        values[middle]
    }
}
