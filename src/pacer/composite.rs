use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, join_all};

use super::{Pacer, PacerDelay};
use crate::Result;

/// Touches every member concurrently and waits for the longest delay.
#[derive(Clone, Default)]
pub struct CompositePacer {
    pacers: Vec<Arc<dyn Pacer>>,
}

impl CompositePacer {
    pub fn new(pacers: Vec<Arc<dyn Pacer>>) -> Self {
        Self { pacers }
    }

    pub fn len(&self) -> usize {
        self.pacers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pacers.is_empty()
    }

    async fn touch_all(&self) -> Result<PacerDelay> {
        if self.pacers.is_empty() {
            return Ok(PacerDelay {
                delay: Duration::ZERO,
                reason: "no pacers".to_owned(),
            });
        }

        let touched = join_all(self.pacers.iter().map(|pacer| pacer.touch())).await;
        let mut delay = Duration::ZERO;
        let mut reasons = Vec::with_capacity(touched.len());
        for (pacer, result) in self.pacers.iter().zip(touched) {
            let member = result?;
            delay = delay.max(member.delay);
            if pacer.name().is_empty() {
                reasons.push(member.reason);
            } else {
                reasons.push(format!("{}\n{}", pacer.name(), member.reason));
            }
        }
        Ok(PacerDelay {
            delay,
            reason: reasons.join("\n"),
        })
    }
}

impl std::fmt::Debug for CompositePacer {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_list()
            .entries(self.pacers.iter().map(|pacer| pacer.name()))
            .finish()
    }
}

impl Pacer for CompositePacer {
    fn name(&self) -> &str {
        ""
    }

    fn touch(&self) -> BoxFuture<'_, Result<PacerDelay>> {
        Box::pin(self.touch_all())
    }
}
