use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

/// Label carrying the optional per-target weight, unless configured otherwise.
pub const DEFAULT_WEIGHT_LABEL: &str = "__target_allocator_weight";

/// Weight of a target that carries no usable weight label.
pub const DEFAULT_WEIGHT: u64 = 1;

/// Discovery labels that identify the node a target runs on, in lookup order.
const NODE_NAME_LABELS: [&str; 4] = [
    "__meta_kubernetes_pod_node_name",
    "__meta_kubernetes_node_name",
    "__meta_kubernetes_endpoint_node_name",
    "__meta_kubernetes_endpointslice_endpoint_node_name",
];

// Never valid UTF-8, so it cannot collide with label content.
const HASH_SEPARATOR: &[u8] = &[0xff];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
    pub name: String,
    pub value: String,
}

/// A label set sorted by name, with unique names.
///
/// Construction normalizes the input so that the same pairs given in any order
/// produce an identical set. When a name repeats, the last value wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, String>",
    into = "BTreeMap<String, String>"
)]
pub struct Labels(Vec<Label>);

impl Labels {
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut labels: Vec<Label> = pairs
            .into_iter()
            .map(|(name, value)| Label {
                name: name.into(),
                value: value.into(),
            })
            .collect();

        // Stable sort, so duplicates keep their input order and the last one wins below.
        labels.sort_by(|a, b| a.name.cmp(&b.name));

        let mut normalized: Vec<Label> = Vec::with_capacity(labels.len());
        for label in labels {
            match normalized.last_mut() {
                Some(last) if last.name == label.name => *last = label,
                _ => normalized.push(label),
            }
        }

        Self(normalized)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|label| label.name.as_str().cmp(name))
            .ok()
            .map(|index| self.0[index].value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, String>> for Labels {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self::new(map)
    }
}

impl From<Labels> for BTreeMap<String, String> {
    fn from(labels: Labels) -> Self {
        labels
            .0
            .into_iter()
            .map(|label| (label.name, label.value))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Content fingerprint of a target, the key of the allocator's target map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemHash(u64);

impl ItemHash {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for ItemHash {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ItemHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// One scrapeable endpoint.
///
/// Everything except the owning collector is fixed at construction, and the
/// hash is computed eagerly from the job name and labels. Reserved labels are
/// carried for display and node lookup only and never change the hash. The
/// owning collector is written by the allocator alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    job_name: String,
    target_url: String,
    labels: Labels,
    reserved_labels: Labels,
    collector_name: Option<String>,
    hash: ItemHash,
}

impl Item {
    pub fn new(job_name: impl Into<String>, target_url: impl Into<String>, labels: Labels) -> Self {
        let job_name = job_name.into();
        let hash = compute_hash(&job_name, &labels);
        Self {
            job_name,
            target_url: target_url.into(),
            labels,
            reserved_labels: Labels::default(),
            collector_name: None,
            hash,
        }
    }

    pub fn with_reserved_labels(mut self, reserved_labels: Labels) -> Self {
        self.reserved_labels = reserved_labels;
        self
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn reserved_labels(&self) -> &Labels {
        &self.reserved_labels
    }

    pub fn collector_name(&self) -> Option<&str> {
        self.collector_name.as_deref()
    }

    pub fn hash(&self) -> ItemHash {
        self.hash
    }

    pub(crate) fn set_collector_name(&mut self, collector_name: Option<String>) {
        self.collector_name = collector_name;
    }

    /// Name of the node the target runs on, if discovery recorded one.
    pub fn node_name(&self) -> Option<&str> {
        NODE_NAME_LABELS.iter().find_map(|name| {
            self.labels
                .get(name)
                .or_else(|| self.reserved_labels.get(name))
                .filter(|value| !value.is_empty())
        })
    }

    /// Weight of the target read from `weight_label`.
    ///
    /// Only positive integers are recognized, anything else counts as
    /// [`DEFAULT_WEIGHT`].
    pub fn weight(&self, weight_label: &str) -> u64 {
        self.labels
            .get(weight_label)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|weight| *weight > 0)
            .unwrap_or(DEFAULT_WEIGHT)
    }
}

fn compute_hash(job_name: &str, labels: &Labels) -> ItemHash {
    let mut hasher = Xxh3::new();
    hasher.update(job_name.as_bytes());
    hasher.update(HASH_SEPARATOR);
    for label in labels.iter() {
        hasher.update(label.name.as_bytes());
        hasher.update(HASH_SEPARATOR);
        hasher.update(label.value.as_bytes());
        hasher.update(HASH_SEPARATOR);
    }
    ItemHash(hasher.digest())
}
