use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::future::BoxFuture;
use rand::RngExt;

use super::{Pacer, PacerDelay, PacerQpsBackend, PacerSample};
use crate::Result;
use crate::util::lock_unpoisoned;

const DEFAULT_DECREASE_THRESHOLD: f64 = 0.75;
const DEFAULT_WINDOW: Duration = Duration::from_secs(30);
const MIN_COUNT_FOR_CENTRAL_TENDENCY: usize = 10;
/// Fraction of the fleet average used as one adjustment step.
const DELAY_AVG_TO_STEP_FACTOR: f64 = 0.02;
const DELAY_STEP_JITTER: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PacerQpsOptions {
    qps: f64,
    window: Duration,
    decrease_threshold: f64,
}

impl PacerQpsOptions {
    pub fn new(qps: f64) -> Self {
        Self {
            qps: qps.max(0.0),
            window: DEFAULT_WINDOW,
            decrease_threshold: DEFAULT_DECREASE_THRESHOLD,
        }
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window = window.max(Duration::from_millis(1));
        self
    }

    /// The delay only shrinks once the window count drops below this share
    /// of the limit.
    pub fn decrease_threshold(mut self, threshold: f64) -> Self {
        self.decrease_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn qps(&self) -> f64 {
        self.qps
    }

    pub fn get_window(&self) -> Duration {
        self.window
    }

    pub fn get_decrease_threshold(&self) -> f64 {
        self.decrease_threshold
    }

    fn limit(&self) -> u64 {
        ((self.window.as_secs_f64() * self.qps).round() as u64).max(1)
    }
}

#[derive(Debug)]
struct QpsState {
    first_touch: bool,
    delay_ms: u64,
}

/// Grows its delay while the window holds more requests than the QPS allows
/// and shrinks it once the window drops clearly below that. There is no
/// upper bound on the delay.
pub struct PacerQps {
    options: PacerQpsOptions,
    backend: Arc<dyn PacerQpsBackend>,
    state: Mutex<QpsState>,
}

impl PacerQps {
    pub fn new(options: PacerQpsOptions, backend: Arc<dyn PacerQpsBackend>) -> Self {
        Self {
            options,
            backend,
            state: Mutex::new(QpsState {
                first_touch: true,
                delay_ms: 0,
            }),
        }
    }

    pub fn current_delay(&self) -> Duration {
        Duration::from_millis(lock_unpoisoned(&self.state).delay_ms)
    }

    async fn touch_inner(&self) -> Result<PacerDelay> {
        let window_ms = self.options.window.as_millis() as u64;
        let limit = self.options.limit();
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();

        let delay_pushed = lock_unpoisoned(&self.state).delay_ms;
        let stats = self
            .backend
            .push(PacerSample {
                time_ms: now_ms,
                min_time_ms: now_ms.saturating_sub(window_ms),
                value: delay_pushed as f64,
                min_count_for_central_tendency: MIN_COUNT_FOR_CENTRAL_TENDENCY,
            })
            .await?;

        let single_worker_step =
            round_ms(window_ms as f64 / limit as f64 * DELAY_AVG_TO_STEP_FACTOR);
        let jitter = rand::rng()
            .random_range((1.0 - DELAY_STEP_JITTER)..=(1.0 + DELAY_STEP_JITTER));
        let multi_worker_step = round_ms(stats.avg * DELAY_AVG_TO_STEP_FACTOR * jitter);
        let step = [multi_worker_step, single_worker_step]
            .into_iter()
            .find(|step| *step > 0)
            .unwrap_or(1);

        let delay_ms = {
            let mut state = lock_unpoisoned(&self.state);
            if state.first_touch {
                if state.delay_ms == 0 {
                    state.delay_ms = round_ms(stats.avg);
                }
                state.first_touch = false;
            }
            let count = stats.count as u64;
            if count > limit {
                state.delay_ms = state.delay_ms.saturating_add(step);
            } else if (count as f64) < limit as f64 * self.options.decrease_threshold {
                state.delay_ms = state.delay_ms.saturating_sub(step);
            }
            state.delay_ms
        };

        let sum_div_count = if stats.count > 0 {
            stats.sum / stats.count as f64
        } else {
            0.0
        };
        let reason = format!(
            "count={} per {}s (limit={limit})\n\
             delay={delay_ms} step={step} delayPushed={delay_pushed}\n\
             median={}\n\
             sum/count={}\n\
             avg={}",
            stats.count,
            self.options.window.as_secs_f64(),
            round_ms(stats.median),
            round_ms(sum_div_count),
            round_ms(stats.avg),
        );
        Ok(PacerDelay {
            delay: Duration::from_millis(delay_ms),
            reason,
        })
    }
}

impl std::fmt::Debug for PacerQps {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PacerQps")
            .field("key", &self.backend.key())
            .field("options", &self.options)
            .field("delay", &self.current_delay())
            .finish()
    }
}

impl Pacer for PacerQps {
    fn name(&self) -> &str {
        self.backend.key()
    }

    fn touch(&self) -> BoxFuture<'_, Result<PacerDelay>> {
        Box::pin(self.touch_inner())
    }
}

fn round_ms(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}
