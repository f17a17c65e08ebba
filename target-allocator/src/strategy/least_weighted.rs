use std::collections::HashMap;

use super::{place_with_fallback, Strategy, LEAST_WEIGHTED};
use crate::collector::Collector;
use crate::error::{Error, Result};
use crate::target::Item;

/// Greedy balancing on target counts.
///
/// A target stays with its current collector while that collector exists.
/// Otherwise it goes to the collector with the fewest targets; ties go to the
/// collector with the fewest targets of the same job, then to the smaller
/// name. Weighted load is reported by the allocator but never consulted here.
#[derive(Default)]
pub struct LeastWeightedStrategy {
    fallback: Option<Box<dyn Strategy>>,
}

impl LeastWeightedStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for LeastWeightedStrategy {
    fn name(&self) -> &'static str {
        LEAST_WEIGHTED
    }

    fn collector_for_target<'a>(
        &self,
        collectors: &'a HashMap<String, Collector>,
        item: &Item,
    ) -> Result<&'a Collector> {
        if let Some(current) = item.collector_name().and_then(|name| collectors.get(name)) {
            return Ok(current);
        }

        let job_name = item.job_name();
        let least_loaded = collectors.values().min_by(|a, b| {
            a.num_targets
                .cmp(&b.num_targets)
                .then_with(|| a.targets_for_job(job_name).cmp(&b.targets_for_job(job_name)))
                .then_with(|| a.name.cmp(&b.name))
        });

        match least_loaded {
            Some(collector) => Ok(collector),
            None => place_with_fallback(
                self.fallback.as_deref(),
                collectors,
                item,
                Error::NoCollectors,
            ),
        }
    }

    fn set_collectors(&mut self, collectors: &HashMap<String, Collector>) {
        if let Some(fallback) = self.fallback.as_mut() {
            fallback.set_collectors(collectors);
        }
    }

    fn set_fallback_strategy(&mut self, fallback: Box<dyn Strategy>) {
        self.fallback = Some(fallback);
    }
}
