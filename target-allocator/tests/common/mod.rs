use std::collections::HashMap;

use target_allocator::target::DEFAULT_WEIGHT_LABEL;
use target_allocator::{Allocator, Collector, Item, Labels};

pub const JOBS: [&str; 3] = ["node-exporter", "kube-state-metrics", "blackbox"];

/// `n` collectors named `collector-{i}`, each on its own node.
pub fn make_n_collectors(n: usize) -> HashMap<String, Collector> {
    (0..n)
        .map(|i| {
            let name = format!("collector-{i}");
            (name.clone(), Collector::new(name, format!("node-{i}")))
        })
        .collect()
}

/// `n` targets spread round robin over the first `jobs` entries of [`JOBS`].
///
/// Addresses start at `offset`, so batches built with disjoint offsets never
/// share a hash.
pub fn make_n_targets(n: usize, jobs: usize, offset: usize) -> Vec<Item> {
    (offset..offset + n)
        .map(|i| {
            let job = JOBS[i % jobs];
            let address = format!("10.{}.{}.{}:9100", i / 65536, (i / 256) % 256, i % 256);
            Item::new(
                job,
                address.clone(),
                Labels::new([
                    ("__address__", address),
                    ("instance", format!("instance-{i}")),
                ]),
            )
        })
        .collect()
}

/// Owner of each target, keyed by hash value.
pub fn assignments(allocator: &Allocator) -> HashMap<u64, Option<String>> {
    allocator
        .target_items()
        .into_iter()
        .map(|(hash, item)| (hash.value(), item.collector_name().map(str::to_string)))
        .collect()
}

/// Check collector counters against the targets they own.
pub fn assert_consistent(allocator: &Allocator) {
    let collectors = allocator.collectors();
    let mut counts: HashMap<String, (usize, u64)> = HashMap::new();

    for item in allocator.target_items().values() {
        if let Some(owner) = item.collector_name() {
            assert!(
                collectors.contains_key(owner),
                "target {} owned by unknown collector {owner}",
                item.hash()
            );
            let entry = counts.entry(owner.to_string()).or_default();
            entry.0 += 1;
            entry.1 += item.weight(DEFAULT_WEIGHT_LABEL);
        }
    }

    for (name, collector) in &collectors {
        let (count, load) = counts.get(name).copied().unwrap_or_default();
        assert_eq!(collector.num_targets, count, "{name} target count");
        assert_eq!(collector.weighted_load, load, "{name} weighted load");
    }
}
