use std::collections::{BTreeMap, HashMap};

use tracing::info;
use xxhash_rust::xxh3::{xxh3_64_with_seed, Xxh3};

use super::{place_with_fallback, Strategy, CONSISTENT_HASHING};
use crate::collector::Collector;
use crate::error::{Error, Result};
use crate::target::Item;

/// Virtual points placed on the ring for each collector.
///
/// With 200 points the share of the ring owned by one collector deviates from
/// the even share by roughly 7% (one standard deviation), so even with a few
/// dozen collectors no collector exceeds 1.5x its even share in practice.
pub const DEFAULT_REPLICATION_FACTOR: usize = 200;

// Decorrelates target positions from the target hash itself.
const TARGET_KEY_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

// Never valid UTF-8, so a member name cannot run into the replica index.
const POINT_SEPARATOR: &[u8] = &[0xff];

/// Ring of virtual collector points over the 64-bit hash space.
#[derive(Debug, Clone)]
pub struct HashRing {
    points: BTreeMap<u64, String>,
    replication_factor: usize,
}

impl HashRing {
    pub fn new(replication_factor: usize) -> Self {
        Self {
            points: BTreeMap::new(),
            replication_factor: replication_factor.max(1),
        }
    }

    /// Replace all points with those of `members`.
    ///
    /// Point positions depend only on the member name, so a member keeps its
    /// points across rebuilds. On the (unlikely) collision of two points the
    /// lexicographically smaller name keeps it, independent of input order.
    pub fn rebuild<'a>(&mut self, members: impl IntoIterator<Item = &'a str>) {
        let mut members: Vec<&str> = members.into_iter().collect();
        members.sort_unstable();
        members.dedup();

        self.points.clear();
        for member in members {
            for replica in 0..self.replication_factor {
                self.points
                    .entry(point_for(member, replica))
                    .or_insert_with(|| member.to_string());
            }
        }
    }

    /// The member owning `key`: the first point at or after it, wrapping around.
    pub fn locate(&self, key: u64) -> Option<&str> {
        self.points
            .range(key..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, member)| member.as_str())
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    /// Number of points on the ring.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Position of one virtual point. The replica index is part of the hashed
/// input so that short member names still spread over the whole ring.
fn point_for(member: &str, replica: usize) -> u64 {
    let mut hasher = Xxh3::new();
    hasher.update(member.as_bytes());
    hasher.update(POINT_SEPARATOR);
    hasher.update(&(replica as u64).to_le_bytes());
    hasher.digest()
}

fn ring_key(item: &Item) -> u64 {
    xxh3_64_with_seed(&item.hash().value().to_le_bytes(), TARGET_KEY_SEED)
}

/// Places targets on a consistent hashing ring.
///
/// Ignores the current assignment: the owner depends only on the target hash
/// and the collector names. Adding or removing one of N collectors moves only
/// the targets whose ring successor changed, about 1/N of them.
pub struct ConsistentHashingStrategy {
    ring: HashRing,
    fallback: Option<Box<dyn Strategy>>,
}

impl ConsistentHashingStrategy {
    pub fn new(replication_factor: usize) -> Self {
        Self {
            ring: HashRing::new(replication_factor),
            fallback: None,
        }
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }
}

impl Default for ConsistentHashingStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_REPLICATION_FACTOR)
    }
}

impl Strategy for ConsistentHashingStrategy {
    fn name(&self) -> &'static str {
        CONSISTENT_HASHING
    }

    fn collector_for_target<'a>(
        &self,
        collectors: &'a HashMap<String, Collector>,
        item: &Item,
    ) -> Result<&'a Collector> {
        let miss = match self.ring.locate(ring_key(item)) {
            Some(member) => match collectors.get(member) {
                Some(collector) => return Ok(collector),
                None => Error::CollectorNotFound(member.to_string()),
            },
            None => Error::NoCollectors,
        };
        place_with_fallback(self.fallback.as_deref(), collectors, item, miss)
    }

    fn set_collectors(&mut self, collectors: &HashMap<String, Collector>) {
        self.ring.rebuild(collectors.keys().map(String::as_str));
        info!(
            collectors = collectors.len(),
            points = self.ring.len(),
            "rebuilt consistent hashing ring"
        );

        if let Some(fallback) = self.fallback.as_mut() {
            fallback.set_collectors(collectors);
        }
    }

    fn set_fallback_strategy(&mut self, fallback: Box<dyn Strategy>) {
        self.fallback = Some(fallback);
    }
}
