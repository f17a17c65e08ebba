//! Static discovery snapshots read from a JSON file.
//!
//! The file holds the full current view of collectors and targets:
//!
//! ```json
//! {
//!   "collectors": [{ "name": "collector-0", "node_name": "node-a" }],
//!   "targets": [
//!     {
//!       "job_name": "node-exporter",
//!       "target_url": "10.0.0.1:9100",
//!       "labels": { "__address__": "10.0.0.1:9100" },
//!       "reserved_labels": { "__meta_kubernetes_pod_node_name": "node-a" }
//!     }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::collector::Collector;
use crate::error::{Error, Result};
use crate::target::{Item, Labels};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverySnapshot {
    #[serde(default)]
    pub collectors: Vec<Collector>,
    #[serde(default)]
    pub targets: Vec<TargetEntry>,
}

/// A discovered target as written in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEntry {
    pub job_name: String,
    pub target_url: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub reserved_labels: Labels,
}

impl DiscoverySnapshot {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Discovery {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Self::from_json(&raw).map_err(|e| Error::Discovery {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Split into the collector map and target list the allocator takes.
    ///
    /// A collector name listed twice keeps the later entry.
    pub fn into_parts(self) -> (HashMap<String, Collector>, Vec<Item>) {
        let mut collectors = HashMap::with_capacity(self.collectors.len());
        for collector in self.collectors {
            if let Some(previous) = collectors.insert(collector.name.clone(), collector) {
                warn!(collector = %previous.name, "collector listed twice, keeping the last entry");
            }
        }
        let targets = self.targets.into_iter().map(Item::from).collect();
        (collectors, targets)
    }
}

impl From<TargetEntry> for Item {
    fn from(entry: TargetEntry) -> Self {
        Item::new(entry.job_name, entry.target_url, entry.labels)
            .with_reserved_labels(entry.reserved_labels)
    }
}
