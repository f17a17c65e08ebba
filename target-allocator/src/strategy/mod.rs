mod consistent_hashing;
mod least_weighted;
mod per_node;

pub use consistent_hashing::{ConsistentHashingStrategy, HashRing, DEFAULT_REPLICATION_FACTOR};
pub use least_weighted::LeastWeightedStrategy;
pub use per_node::PerNodeStrategy;

use std::collections::HashMap;

use tracing::debug;

use crate::allocator::Allocator;
use crate::collector::Collector;
use crate::error::{Error, Result};
use crate::target::Item;

pub const CONSISTENT_HASHING: &str = "consistent-hashing";
pub const LEAST_WEIGHTED: &str = "least-weighted";
pub const PER_NODE: &str = "per-node";

/// Trait for target assignment strategies.
///
/// The allocator owns the collector map and hands it to the strategy on every
/// call. `set_collectors` is always called with the latest map before any
/// `collector_for_target` call that should observe it, so strategies may
/// precompute from it but never keep a reference to it.
pub trait Strategy: Send + Sync {
    /// The name this strategy is registered under.
    fn name(&self) -> &'static str;

    /// Choose the collector that should own `item`.
    ///
    /// Must be deterministic for identical inputs and strategy state. Returns
    /// an error only when no collector can take the target; the allocator then
    /// leaves it unassigned until the next recomputation.
    fn collector_for_target<'a>(
        &self,
        collectors: &'a HashMap<String, Collector>,
        item: &Item,
    ) -> Result<&'a Collector>;

    /// Observe a new collector map.
    fn set_collectors(&mut self, collectors: &HashMap<String, Collector>);

    /// Set the strategy consulted for targets this one cannot place.
    fn set_fallback_strategy(&mut self, fallback: Box<dyn Strategy>);
}

/// Hand a target the primary strategy could not place to its fallback, if any.
fn place_with_fallback<'a>(
    fallback: Option<&dyn Strategy>,
    collectors: &'a HashMap<String, Collector>,
    item: &Item,
    miss: Error,
) -> Result<&'a Collector> {
    match fallback {
        Some(fallback) => {
            debug!(
                target_hash = %item.hash(),
                reason = %miss,
                fallback = fallback.name(),
                "delegating target to fallback strategy"
            );
            fallback.collector_for_target(collectors, item)
        }
        None => Err(miss),
    }
}

/// Tunables shared by strategy constructors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyOptions {
    /// Virtual points per collector on the consistent hashing ring.
    pub replication_factor: usize,
}

impl Default for StrategyOptions {
    fn default() -> Self {
        Self {
            replication_factor: DEFAULT_REPLICATION_FACTOR,
        }
    }
}

pub type StrategyConstructor = fn(&StrategyOptions) -> Box<dyn Strategy>;

/// Name-to-constructor table used to build strategies from configuration.
///
/// Created once at startup and passed to whatever builds allocators, so the
/// set of known strategies is explicit rather than global.
pub struct StrategyRegistry {
    constructors: HashMap<&'static str, StrategyConstructor>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// A registry holding the three built-in strategies.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(CONSISTENT_HASHING, new_consistent_hashing);
        registry.register(LEAST_WEIGHTED, new_least_weighted);
        registry.register(PER_NODE, new_per_node);
        registry
    }

    /// Register a constructor. Replaces any existing one with the same name.
    pub fn register(&mut self, name: &'static str, constructor: StrategyConstructor) {
        self.constructors.insert(name, constructor);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.constructors.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn build(&self, name: &str, options: &StrategyOptions) -> Result<Box<dyn Strategy>> {
        self.constructors
            .get(name)
            .map(|constructor| constructor(options))
            .ok_or_else(|| Error::UnknownStrategy(name.to_string()))
    }

    /// Build an allocator for the named strategy and optional fallback.
    ///
    /// Both names are resolved up front, so a typo fails here rather than on
    /// the first assignment.
    pub fn new_allocator(
        &self,
        name: &str,
        fallback: Option<&str>,
        options: &StrategyOptions,
    ) -> Result<Allocator> {
        let strategy = self.build(name, options)?;
        let fallback = fallback
            .map(|fallback| self.build(fallback, options))
            .transpose()?;

        let allocator = Allocator::new(strategy);
        if let Some(fallback) = fallback {
            allocator.set_fallback_strategy(fallback);
        }
        Ok(allocator)
    }
}

fn new_consistent_hashing(options: &StrategyOptions) -> Box<dyn Strategy> {
    Box::new(ConsistentHashingStrategy::new(options.replication_factor))
}

fn new_least_weighted(_options: &StrategyOptions) -> Box<dyn Strategy> {
    Box::new(LeastWeightedStrategy::new())
}

fn new_per_node(_options: &StrategyOptions) -> Box<dyn Strategy> {
    Box::new(PerNodeStrategy::new())
}
