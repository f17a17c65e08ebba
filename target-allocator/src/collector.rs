use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Accounting record for one collector process.
///
/// `num_targets`, `targets_per_job` and `weighted_load` mirror the targets the
/// allocator has assigned to this collector. Collectors handed to the
/// allocator have their counters reset, only the allocator updates them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collector {
    pub name: String,
    #[serde(default)]
    pub node_name: String,
    #[serde(default, skip_deserializing)]
    pub num_targets: usize,
    #[serde(default, skip_deserializing)]
    pub targets_per_job: HashMap<String, usize>,
    #[serde(default, skip_deserializing)]
    pub weighted_load: u64,
}

impl Collector {
    pub fn new(name: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_name: node_name.into(),
            ..Default::default()
        }
    }

    pub fn targets_for_job(&self, job_name: &str) -> usize {
        self.targets_per_job.get(job_name).copied().unwrap_or(0)
    }

    pub(crate) fn add_target(&mut self, job_name: &str, weight: u64) {
        self.num_targets += 1;
        *self.targets_per_job.entry(job_name.to_string()).or_default() += 1;
        self.weighted_load = self.weighted_load.saturating_add(weight);
    }

    pub(crate) fn remove_target(&mut self, job_name: &str, weight: u64) {
        self.num_targets = self.num_targets.saturating_sub(1);
        if let Some(count) = self.targets_per_job.get_mut(job_name) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.targets_per_job.remove(job_name);
            }
        }
        self.weighted_load = self.weighted_load.saturating_sub(weight);
    }

    pub(crate) fn reset_counts(&mut self) {
        self.num_targets = 0;
        self.targets_per_job.clear();
        self.weighted_load = 0;
    }
}
