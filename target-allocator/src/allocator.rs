use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::collector::Collector;
use crate::diff::diff_keys;
use crate::filter::Filter;
use crate::metrics_consts::{
    ASSIGNMENT_MISSES, COLLECTORS_ALLOCATABLE, COLLECTORS_DISCOVERED, TARGETS_DISCOVERED,
    TARGETS_PER_COLLECTOR, TARGETS_UNASSIGNED, TIME_TO_ASSIGN,
};
use crate::strategy::Strategy;
use crate::target::{Item, ItemHash, DEFAULT_WEIGHT_LABEL};

/// Assigns targets to collectors through a [`Strategy`].
///
/// The allocator is the only writer of the collector and target maps. Every
/// mutation runs under one exclusive lock and leaves the maps consistent:
/// each target is owned by a collector present in the collector map (or by
/// none, while no collector can take it), and each collector's counters match
/// the targets it owns. Readers take the shared lock just long enough to
/// clone a snapshot; targets are reference counted so snapshots stay cheap.
pub struct Allocator {
    state: RwLock<AllocatorState>,
    weight_label: String,
}

struct AllocatorState {
    strategy: Box<dyn Strategy>,
    filter: Option<Box<dyn Filter>>,
    collectors: HashMap<String, Collector>,
    target_items: HashMap<ItemHash, Arc<Item>>,
}

impl Allocator {
    pub fn new(strategy: Box<dyn Strategy>) -> Self {
        Self {
            state: RwLock::new(AllocatorState {
                strategy,
                filter: None,
                collectors: HashMap::new(),
                target_items: HashMap::new(),
            }),
            weight_label: DEFAULT_WEIGHT_LABEL.to_string(),
        }
    }

    /// Read target weights from `weight_label` instead of the default label.
    pub fn with_weight_label(mut self, weight_label: impl Into<String>) -> Self {
        self.weight_label = weight_label.into();
        self
    }

    pub fn strategy_name(&self) -> &'static str {
        self.read().strategy.name()
    }

    /// Filter applied to every later `set_targets` batch.
    pub fn set_filter(&self, filter: impl Filter + 'static) {
        self.write().filter = Some(Box::new(filter));
    }

    /// Strategy consulted for targets the primary strategy cannot place.
    ///
    /// Takes effect from the next recomputation; current assignments stay.
    pub fn set_fallback_strategy(&self, mut fallback: Box<dyn Strategy>) {
        let mut guard = self.write();
        let state = &mut *guard;

        fallback.set_collectors(&state.collectors);
        info!(
            strategy = state.strategy.name(),
            fallback = fallback.name(),
            "configured fallback strategy"
        );
        state.strategy.set_fallback_strategy(fallback);
    }

    /// Replace the collector map and move every target whose owner changed.
    ///
    /// Counters on the supplied collectors are ignored. A map with the same
    /// collector names and nodes as the current one changes nothing. An empty
    /// map leaves every target unassigned until collectors come back.
    pub fn set_collectors(&self, collectors: HashMap<String, Collector>) {
        let start = Instant::now();
        let mut guard = self.write();
        let state = &mut *guard;

        metrics::gauge!(COLLECTORS_DISCOVERED).set(collectors.len() as f64);

        if same_topology(&state.collectors, &collectors) {
            debug!(
                collectors = collectors.len(),
                "collector set unchanged, keeping assignments"
            );
            return;
        }

        let changes = diff_keys(&state.collectors, &collectors);
        if changes.is_empty() {
            info!(
                collectors = collectors.len(),
                "collector nodes changed"
            );
        } else {
            info!(
                added = ?changes.added,
                removed = ?changes.removed,
                collectors = collectors.len(),
                "collector set changed"
            );
        }
        if collectors.is_empty() {
            warn!(
                targets = state.target_items.len(),
                "no collectors available, targets left unassigned"
            );
        }

        for name in &changes.removed {
            metrics::gauge!(
                TARGETS_PER_COLLECTOR,
                "collector_name" => name.clone(),
                "strategy" => state.strategy.name()
            )
            .set(0.0);
        }

        state.replace_collectors(collectors, &self.weight_label);
        state.strategy.set_collectors(&state.collectors);
        let moved = state.reassign_all(&self.weight_label);
        state.record_gauges();

        info!(
            moved,
            targets = state.target_items.len(),
            "reassigned targets after collector change"
        );
        metrics::histogram!(TIME_TO_ASSIGN, "method" => "set_collectors")
            .record(start.elapsed().as_secs_f64());
    }

    /// Replace the target set.
    ///
    /// Targets go through the filter first. A target whose hash is already
    /// known keeps its collector; its other metadata is refreshed. New targets,
    /// and known ones still waiting for a collector, are placed by the
    /// strategy in hash order. Collector names set by the caller are ignored.
    pub fn set_targets(&self, targets: Vec<Item>) {
        let start = Instant::now();
        let mut guard = self.write();
        let state = &mut *guard;

        let targets = match &state.filter {
            Some(filter) => filter.apply(targets),
            None => targets,
        };

        let mut incoming: HashMap<ItemHash, Item> = HashMap::with_capacity(targets.len());
        let mut duplicates = 0usize;
        for mut item in targets {
            item.set_collector_name(None);
            match incoming.entry(item.hash()) {
                Entry::Occupied(_) => duplicates += 1,
                Entry::Vacant(entry) => {
                    entry.insert(item);
                }
            }
        }
        if duplicates > 0 {
            debug!(duplicates, "dropped targets with an already seen hash");
        }
        metrics::gauge!(TARGETS_DISCOVERED).set(incoming.len() as f64);

        let changes = diff_keys(&state.target_items, &incoming);
        for hash in &changes.removed {
            state.remove_item(*hash, &self.weight_label);
        }

        for (hash, mut item) in incoming {
            match state.target_items.get_mut(&hash) {
                Some(existing) => {
                    item.set_collector_name(existing.collector_name().map(str::to_string));
                    if **existing != item {
                        *existing = Arc::new(item);
                    }
                }
                None => {
                    state.target_items.insert(hash, Arc::new(item));
                }
            }
        }

        let assigned = state.assign_pending(&self.weight_label);
        state.record_gauges();

        info!(
            added = changes.added.len(),
            removed = changes.removed.len(),
            assigned,
            targets = state.target_items.len(),
            "updated targets"
        );
        metrics::histogram!(TIME_TO_ASSIGN, "method" => "set_targets")
            .record(start.elapsed().as_secs_f64());
    }

    /// Snapshot of all targets keyed by hash.
    pub fn target_items(&self) -> HashMap<ItemHash, Arc<Item>> {
        self.read().target_items.clone()
    }

    /// Snapshot of all collectors keyed by name.
    pub fn collectors(&self) -> HashMap<String, Collector> {
        self.read().collectors.clone()
    }

    /// Targets of `job_name` owned by `collector`, in hash order.
    pub fn targets_for_collector_and_job(&self, collector: &str, job_name: &str) -> Vec<Arc<Item>> {
        let state = self.read();
        let mut items: Vec<Arc<Item>> = state
            .target_items
            .values()
            .filter(|item| item.collector_name() == Some(collector) && item.job_name() == job_name)
            .cloned()
            .collect();
        items.sort_unstable_by_key(|item| item.hash());
        items
    }

    pub fn num_collectors(&self) -> usize {
        self.read().collectors.len()
    }

    pub fn num_targets(&self) -> usize {
        self.read().target_items.len()
    }

    pub fn num_unassigned(&self) -> usize {
        self.read().unassigned()
    }

    fn read(&self) -> RwLockReadGuard<'_, AllocatorState> {
        self.state
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, AllocatorState> {
        self.state
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl AllocatorState {
    /// Install `collectors`, then recount the targets whose owner survived.
    fn replace_collectors(&mut self, collectors: HashMap<String, Collector>, weight_label: &str) {
        self.collectors = collectors
            .into_iter()
            .map(|(name, mut collector)| {
                if collector.name != name {
                    warn!(
                        key = %name,
                        name = %collector.name,
                        "collector name does not match its key, using the key"
                    );
                    collector.name = name.clone();
                }
                collector.reset_counts();
                (name, collector)
            })
            .collect();

        for item in self.target_items.values() {
            if let Some(owner) = item
                .collector_name()
                .and_then(|name| self.collectors.get_mut(name))
            {
                owner.add_target(item.job_name(), item.weight(weight_label));
            }
        }
    }

    /// Run every target through the strategy. Returns how many moved.
    fn reassign_all(&mut self, weight_label: &str) -> usize {
        let mut hashes: Vec<ItemHash> = self.target_items.keys().copied().collect();
        hashes.sort_unstable();
        hashes
            .into_iter()
            .filter(|hash| self.place(*hash, weight_label))
            .count()
    }

    /// Place every target that has no collector. Returns how many were placed.
    fn assign_pending(&mut self, weight_label: &str) -> usize {
        if self.collectors.is_empty() {
            return 0;
        }

        let mut pending: Vec<ItemHash> = self
            .target_items
            .iter()
            .filter(|(_, item)| item.collector_name().is_none())
            .map(|(hash, _)| *hash)
            .collect();
        pending.sort_unstable();
        pending
            .into_iter()
            .filter(|hash| self.place(*hash, weight_label))
            .count()
    }

    /// Ask the strategy for the owner of one target and move it there.
    ///
    /// When the strategy (and its fallback) cannot place the target it stays
    /// with its current collector if that collector is still present, and is
    /// left unassigned otherwise. Returns whether the owner changed.
    fn place(&mut self, hash: ItemHash, weight_label: &str) -> bool {
        let Some(item) = self.target_items.get(&hash) else {
            return false;
        };
        let current = item.collector_name();

        let next = if self.collectors.is_empty() {
            None
        } else {
            match self.strategy.collector_for_target(&self.collectors, item) {
                Ok(collector) => Some(collector.name.clone()),
                Err(err) => {
                    metrics::counter!(ASSIGNMENT_MISSES, "strategy" => self.strategy.name())
                        .increment(1);
                    if err.is_assignment_miss() {
                        debug!(
                            target_hash = %hash,
                            job = item.job_name(),
                            reason = %err,
                            "strategy could not place target"
                        );
                    } else {
                        warn!(
                            target_hash = %hash,
                            job = item.job_name(),
                            error = %err,
                            "strategy failed for target"
                        );
                    }
                    current
                        .filter(|name| self.collectors.contains_key(*name))
                        .map(str::to_string)
                }
            }
        };

        if next.as_deref() == current {
            return false;
        }
        self.move_item(hash, next, weight_label);
        true
    }

    fn move_item(&mut self, hash: ItemHash, next: Option<String>, weight_label: &str) {
        let Some(item) = self.target_items.get_mut(&hash) else {
            return;
        };
        let weight = item.weight(weight_label);

        if let Some(previous) = item
            .collector_name()
            .and_then(|name| self.collectors.get_mut(name))
        {
            previous.remove_target(item.job_name(), weight);
        }
        if let Some(owner) = next
            .as_deref()
            .and_then(|name| self.collectors.get_mut(name))
        {
            owner.add_target(item.job_name(), weight);
        }

        debug!(
            target_hash = %hash,
            job = item.job_name(),
            from = ?item.collector_name(),
            to = ?next,
            "moved target"
        );
        Arc::make_mut(item).set_collector_name(next);
    }

    fn remove_item(&mut self, hash: ItemHash, weight_label: &str) {
        let Some(item) = self.target_items.remove(&hash) else {
            return;
        };
        if let Some(owner) = item
            .collector_name()
            .and_then(|name| self.collectors.get_mut(name))
        {
            owner.remove_target(item.job_name(), item.weight(weight_label));
        }
    }

    fn unassigned(&self) -> usize {
        self.target_items
            .values()
            .filter(|item| item.collector_name().is_none())
            .count()
    }

    fn record_gauges(&self) {
        let strategy = self.strategy.name();
        metrics::gauge!(COLLECTORS_ALLOCATABLE, "strategy" => strategy)
            .set(self.collectors.len() as f64);
        for collector in self.collectors.values() {
            metrics::gauge!(
                TARGETS_PER_COLLECTOR,
                "collector_name" => collector.name.clone(),
                "strategy" => strategy
            )
            .set(collector.num_targets as f64);
        }
        metrics::gauge!(TARGETS_UNASSIGNED).set(self.unassigned() as f64);
    }
}

/// Whether both maps hold the same collector names on the same nodes.
fn same_topology(current: &HashMap<String, Collector>, desired: &HashMap<String, Collector>) -> bool {
    current.len() == desired.len()
        && desired.iter().all(|(name, collector)| {
            current
                .get(name)
                .is_some_and(|existing| existing.node_name == collector.node_name)
        })
}
