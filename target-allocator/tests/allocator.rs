mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use target_allocator::strategy::{CONSISTENT_HASHING, LEAST_WEIGHTED, PER_NODE};
use target_allocator::{
    Allocator, Collector, Error, Item, Labels, Strategy, StrategyOptions, StrategyRegistry,
};

use common::{assert_consistent, assignments, make_n_collectors, make_n_targets};

fn new_allocator(strategy: &str) -> Allocator {
    StrategyRegistry::with_defaults()
        .new_allocator(strategy, None, &StrategyOptions::default())
        .expect("built-in strategy")
}

/// Runs each listed test against every balancing strategy.
///
/// The flag tells the test whether the strategy splits targets exactly
/// evenly when they arrive in one batch.
macro_rules! strategy_tests {
    ($( $(#[$meta:meta])* $name:ident ),* $(,)?) => {
        mod consistent_hashing {
            use super::*;
            $(
                $(#[$meta])*
                #[test]
                fn $name() {
                    super::$name(CONSISTENT_HASHING, false);
                }
            )*
        }

        mod least_weighted {
            use super::*;
            $(
                $(#[$meta])*
                #[test]
                fn $name() {
                    super::$name(LEAST_WEIGHTED, true);
                }
            )*
        }
    };
}

strategy_tests! {
    every_target_gets_one_collector,
    targets_spread_across_collectors,
    same_inputs_same_assignment,
    refeeding_targets_keeps_assignment,
    targets_arriving_before_collectors,
    removed_collector_only_moves_its_targets,
    filter_limits_assigned_targets,
    job_queries_partition_targets,
}

fn every_target_gets_one_collector(strategy: &str, _evenly: bool) {
    let allocator = new_allocator(strategy);
    allocator.set_collectors(make_n_collectors(15));
    allocator.set_targets(make_n_targets(1000, 3, 0));

    assert_eq!(allocator.num_targets(), 1000);
    assert_eq!(allocator.num_unassigned(), 0);
    let total: usize = allocator.collectors().values().map(|c| c.num_targets).sum();
    assert_eq!(total, 1000);
    assert_consistent(&allocator);
}

fn targets_spread_across_collectors(strategy: &str, evenly: bool) {
    let allocator = new_allocator(strategy);
    allocator.set_collectors(make_n_collectors(15));
    allocator.set_targets(make_n_targets(10_000, 3, 0));

    let even = 10_000 / 15;
    let (lo, hi) = if evenly {
        (even, even + 1)
    } else {
        (even / 2, even * 3 / 2)
    };
    for collector in allocator.collectors().values() {
        assert!(
            (lo..=hi).contains(&collector.num_targets),
            "{} owns {} targets, expected {lo}..={hi}",
            collector.name,
            collector.num_targets
        );
    }
}

fn same_inputs_same_assignment(strategy: &str, _evenly: bool) {
    let first = new_allocator(strategy);
    let second = new_allocator(strategy);
    for allocator in [&first, &second] {
        allocator.set_collectors(make_n_collectors(7));
        allocator.set_targets(make_n_targets(500, 3, 0));
    }

    assert_eq!(assignments(&first), assignments(&second));
}

fn refeeding_targets_keeps_assignment(strategy: &str, _evenly: bool) {
    let allocator = new_allocator(strategy);
    allocator.set_collectors(make_n_collectors(5));
    allocator.set_targets(make_n_targets(300, 3, 0));
    let before = assignments(&allocator);

    allocator.set_targets(make_n_targets(300, 3, 0));
    allocator.set_collectors(make_n_collectors(5));

    assert_eq!(assignments(&allocator), before);
    assert_consistent(&allocator);
}

fn targets_arriving_before_collectors(strategy: &str, evenly: bool) {
    let allocator = new_allocator(strategy);
    allocator.set_targets(make_n_targets(10, 1, 0));
    assert_eq!(allocator.num_unassigned(), 10);

    allocator.set_collectors(make_n_collectors(0));
    assert_eq!(allocator.num_unassigned(), 10);

    allocator.set_collectors(make_n_collectors(2));
    assert_eq!(allocator.num_unassigned(), 0);
    if evenly {
        for collector in allocator.collectors().values() {
            assert_eq!(collector.num_targets, 5, "{}", collector.name);
        }
    }
    assert_consistent(&allocator);
}

fn removed_collector_only_moves_its_targets(strategy: &str, _evenly: bool) {
    let allocator = new_allocator(strategy);
    allocator.set_collectors(make_n_collectors(4));
    allocator.set_targets(make_n_targets(400, 3, 0));
    let before = assignments(&allocator);

    let mut collectors = make_n_collectors(4);
    collectors.remove("collector-3");
    allocator.set_collectors(collectors);
    let after = assignments(&allocator);

    for (hash, owner) in &before {
        let new_owner = &after[hash];
        assert_ne!(new_owner.as_deref(), Some("collector-3"));
        assert!(new_owner.is_some());
        if owner.as_deref() != Some("collector-3") {
            assert_eq!(new_owner, owner, "target {hash:016x} moved off a live collector");
        }
    }
    assert_consistent(&allocator);
}

fn filter_limits_assigned_targets(strategy: &str, _evenly: bool) {
    let allocator = new_allocator(strategy);
    allocator.set_filter(|targets: Vec<Item>| {
        targets
            .into_iter()
            .filter(|item| item.job_name() == "blackbox")
            .collect::<Vec<_>>()
    });
    allocator.set_collectors(make_n_collectors(3));
    allocator.set_targets(make_n_targets(30, 3, 0));

    assert_eq!(allocator.num_targets(), 10);
    assert!(allocator
        .target_items()
        .values()
        .all(|item| item.job_name() == "blackbox"));
    assert_consistent(&allocator);
}

fn job_queries_partition_targets(strategy: &str, _evenly: bool) {
    let allocator = new_allocator(strategy);
    allocator.set_collectors(make_n_collectors(3));
    allocator.set_targets(make_n_targets(90, 3, 0));

    let mut seen = 0;
    for collector in allocator.collectors().values() {
        for job in common::JOBS {
            let items = allocator.targets_for_collector_and_job(&collector.name, job);
            assert_eq!(items.len(), collector.targets_for_job(job));
            assert!(items.windows(2).all(|pair| pair[0].hash() < pair[1].hash()));
            seen += items.len();
        }
    }
    assert_eq!(seen, 90);
}

#[test]
fn least_weighted_is_stable_for_identical_collectors() {
    let allocator = new_allocator(LEAST_WEIGHTED);
    allocator.set_collectors(make_n_collectors(3));
    allocator.set_targets(make_n_targets(60, 3, 0));
    let before = allocator.collectors();

    allocator.set_collectors(make_n_collectors(3));

    assert_eq!(allocator.collectors(), before);
}

#[test]
fn least_weighted_new_collector_waits_for_new_targets() {
    let allocator = new_allocator(LEAST_WEIGHTED);
    allocator.set_collectors(make_n_collectors(3));
    allocator.set_targets(make_n_targets(30, 3, 0));
    let before = assignments(&allocator);

    allocator.set_collectors(make_n_collectors(4));
    assert_eq!(assignments(&allocator), before);
    assert_eq!(allocator.collectors()["collector-3"].num_targets, 0);

    let mut targets = make_n_targets(30, 3, 0);
    targets.extend(make_n_targets(3, 3, 1000));
    allocator.set_targets(targets);
    assert_eq!(allocator.collectors()["collector-3"].num_targets, 3);
    assert_consistent(&allocator);
}

#[test]
fn least_weighted_rebalances_incrementally() {
    let allocator = new_allocator(LEAST_WEIGHTED);
    allocator.set_collectors(make_n_collectors(3));
    allocator.set_targets(make_n_targets(27, 3, 0));
    assert_within_band(&allocator, 9, 2);

    // Drop 13 of the 27 targets, picked at random.
    let mut targets: Vec<Item> = allocator
        .target_items()
        .values()
        .map(|item| Item::clone(item))
        .collect();
    targets.sort_unstable_by_key(|item| item.hash());
    targets.shuffle(&mut StdRng::seed_from_u64(42));
    targets.truncate(14);

    let before = assignments(&allocator);
    allocator.set_targets(targets.clone());

    // Survivors stay put, so the spread is whatever the deletion left behind.
    let after = assignments(&allocator);
    assert_eq!(after.len(), 14);
    for (hash, owner) in &after {
        assert_eq!(owner, &before[hash], "target {hash:016x} moved");
    }
    let spread: Vec<usize> = allocator
        .collectors()
        .values()
        .map(|c| c.num_targets)
        .collect();
    assert_eq!(spread.iter().sum::<usize>(), 14);
    assert!(spread.iter().all(|count| *count <= 9), "spread {spread:?}");

    // New targets fill the emptiest collectors first, restoring 9 each.
    targets.extend(make_n_targets(13, 3, 100));
    allocator.set_targets(targets);

    assert_eq!(allocator.num_targets(), 27);
    assert_within_band(&allocator, 9, 0);
    assert_consistent(&allocator);
}

fn assert_within_band(allocator: &Allocator, expected: usize, tolerance: usize) {
    for collector in allocator.collectors().values() {
        assert!(
            collector.num_targets.abs_diff(expected) <= tolerance,
            "{} owns {} targets, expected {expected} ± {tolerance}",
            collector.name,
            collector.num_targets
        );
    }
}

#[test]
fn consistent_hashing_scale_out_only_moves_to_new_collector() {
    let allocator = new_allocator(CONSISTENT_HASHING);
    allocator.set_collectors(make_n_collectors(4));
    allocator.set_targets(make_n_targets(2000, 3, 0));
    let before = assignments(&allocator);

    allocator.set_collectors(make_n_collectors(5));
    let after = assignments(&allocator);

    let mut moved = 0;
    for (hash, owner) in &before {
        if &after[hash] != owner {
            assert_eq!(after[hash].as_deref(), Some("collector-4"));
            moved += 1;
        }
    }
    assert_eq!(moved, allocator.collectors()["collector-4"].num_targets);
    assert!(moved > 2000 / 5 / 2 && moved < 2000 / 5 * 3 / 2, "moved {moved}");
    assert_consistent(&allocator);
}

#[test]
fn consistent_hashing_ignores_load() {
    let allocator = new_allocator(CONSISTENT_HASHING);
    allocator.set_collectors(make_n_collectors(3));
    allocator.set_targets(make_n_targets(100, 3, 0));
    let first = assignments(&allocator);

    let fresh = new_allocator(CONSISTENT_HASHING);
    fresh.set_collectors(make_n_collectors(3));
    fresh.set_targets(make_n_targets(50, 3, 50));
    let second = assignments(&fresh);

    // Placement depends on the ring alone, not on what else is assigned.
    for (hash, owner) in &second {
        assert_eq!(&first[hash], owner);
    }
}

fn node_target(id: usize, node: Option<&str>) -> Item {
    let address = format!("10.1.0.{id}:9100");
    let mut labels = vec![("__address__".to_string(), address.clone())];
    if let Some(node) = node {
        labels.push(("__meta_kubernetes_pod_node_name".to_string(), node.to_string()));
    }
    Item::new("node-exporter", address, Labels::new(labels))
}

#[test]
fn per_node_with_fallback() {
    let allocator = StrategyRegistry::with_defaults()
        .new_allocator(PER_NODE, Some(LEAST_WEIGHTED), &StrategyOptions::default())
        .unwrap();
    allocator.set_collectors(make_n_collectors(3));
    allocator.set_targets(vec![
        node_target(1, Some("node-0")),
        node_target(2, Some("node-2")),
        node_target(3, Some("node-2")),
        node_target(4, None),
        node_target(5, Some("node-9")),
    ]);

    assert_eq!(allocator.num_unassigned(), 0);
    let pinned = allocator.targets_for_collector_and_job("collector-2", "node-exporter");
    assert!(pinned.len() >= 2);
    assert!(allocator
        .targets_for_collector_and_job("collector-0", "node-exporter")
        .iter()
        .any(|item| item.node_name() == Some("node-0")));
    assert_consistent(&allocator);
}

#[test]
fn per_node_without_fallback_leaves_misses_unassigned() {
    let allocator = new_allocator(PER_NODE);
    allocator.set_collectors(make_n_collectors(2));
    allocator.set_targets(vec![
        node_target(1, Some("node-1")),
        node_target(2, None),
        node_target(3, Some("node-7")),
    ]);

    assert_eq!(allocator.num_unassigned(), 2);
    assert_eq!(allocator.collectors()["collector-1"].num_targets, 1);

    // The node's collector going away leaves its target unassigned too.
    let mut collectors = make_n_collectors(2);
    collectors.remove("collector-1");
    allocator.set_collectors(collectors);
    assert_eq!(allocator.num_unassigned(), 3);
    assert_consistent(&allocator);
}

#[test]
fn fallback_set_after_construction() {
    let allocator = new_allocator(PER_NODE);
    allocator.set_collectors(make_n_collectors(2));
    allocator.set_fallback_strategy(
        StrategyRegistry::with_defaults()
            .build(CONSISTENT_HASHING, &StrategyOptions::default())
            .unwrap(),
    );
    allocator.set_targets(vec![node_target(1, None), node_target(2, None)]);

    assert_eq!(allocator.num_unassigned(), 0);
    assert_eq!(allocator.strategy_name(), PER_NODE);
}

#[test]
fn unknown_strategy_names_are_rejected() {
    let registry = StrategyRegistry::with_defaults();
    let options = StrategyOptions::default();

    let result = registry.new_allocator("round-robin", None, &options);
    assert!(matches!(result, Err(Error::UnknownStrategy(name)) if name == "round-robin"));

    let result = registry.new_allocator(LEAST_WEIGHTED, Some("round-robin"), &options);
    assert!(matches!(result, Err(Error::UnknownStrategy(_))));
}

struct FirstByName;

impl Strategy for FirstByName {
    fn name(&self) -> &'static str {
        "first-by-name"
    }

    fn collector_for_target<'a>(
        &self,
        collectors: &'a HashMap<String, Collector>,
        _item: &Item,
    ) -> target_allocator::Result<&'a Collector> {
        collectors
            .values()
            .min_by(|a, b| a.name.cmp(&b.name))
            .ok_or(Error::NoCollectors)
    }

    fn set_collectors(&mut self, _collectors: &HashMap<String, Collector>) {}

    fn set_fallback_strategy(&mut self, _fallback: Box<dyn Strategy>) {}
}

fn new_first_by_name(_options: &StrategyOptions) -> Box<dyn Strategy> {
    Box::new(FirstByName)
}

#[test]
fn registry_accepts_custom_strategies() {
    let mut registry = StrategyRegistry::with_defaults();
    registry.register("first-by-name", new_first_by_name);
    assert_eq!(
        registry.names(),
        vec![CONSISTENT_HASHING, "first-by-name", LEAST_WEIGHTED, PER_NODE]
    );

    let allocator = registry
        .new_allocator("first-by-name", None, &StrategyOptions::default())
        .unwrap();
    allocator.set_collectors(make_n_collectors(3));
    allocator.set_targets(make_n_targets(12, 3, 0));

    assert_eq!(allocator.collectors()["collector-0"].num_targets, 12);
}

#[test]
fn readers_see_consistent_snapshots_during_writes() {
    let allocator = Arc::new(new_allocator(LEAST_WEIGHTED));
    allocator.set_collectors(make_n_collectors(4));

    let writer = {
        let allocator = Arc::clone(&allocator);
        thread::spawn(move || {
            for round in 0..50 {
                let size = if round % 2 == 0 { 100 } else { 200 };
                allocator.set_targets(make_n_targets(size, 3, 0));
                if round % 10 == 0 {
                    allocator.set_collectors(make_n_collectors(3 + round % 3));
                }
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let allocator = Arc::clone(&allocator);
            thread::spawn(move || {
                for _ in 0..200 {
                    let targets = allocator.target_items();
                    assert!(targets.is_empty() || targets.len() == 100 || targets.len() == 200);
                    let collectors = allocator.collectors();
                    let total: usize = collectors.values().map(|c| c.num_targets).sum();
                    assert!(total == 0 || total == 100 || total == 200, "total {total}");
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_consistent(&allocator);
}
