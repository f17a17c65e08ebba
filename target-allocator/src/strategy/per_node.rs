use std::collections::HashMap;

use tracing::{debug, warn};

use super::{place_with_fallback, Strategy, PER_NODE};
use crate::collector::Collector;
use crate::error::{Error, Result};
use crate::target::Item;

/// Pins each target to the collector running on the target's node.
///
/// Meant for collectors deployed one per node. Targets without a node, or on
/// a node without a collector, go to the fallback strategy if one is set.
#[derive(Default)]
pub struct PerNodeStrategy {
    collectors_by_node: HashMap<String, String>,
    fallback: Option<Box<dyn Strategy>>,
}

impl PerNodeStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for PerNodeStrategy {
    fn name(&self) -> &'static str {
        PER_NODE
    }

    fn collector_for_target<'a>(
        &self,
        collectors: &'a HashMap<String, Collector>,
        item: &Item,
    ) -> Result<&'a Collector> {
        let miss = match item.node_name() {
            Some(node) => match self
                .collectors_by_node
                .get(node)
                .and_then(|name| collectors.get(name))
            {
                Some(collector) => return Ok(collector),
                None => Error::NoCollectorForNode(node.to_string()),
            },
            None => Error::MissingNodeName(item.hash()),
        };
        place_with_fallback(self.fallback.as_deref(), collectors, item, miss)
    }

    fn set_collectors(&mut self, collectors: &HashMap<String, Collector>) {
        let mut sorted: Vec<&Collector> = collectors.values().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));

        self.collectors_by_node.clear();
        for collector in sorted {
            if collector.node_name.is_empty() {
                debug!(collector = %collector.name, "collector has no node name, skipping");
                continue;
            }
            if let Some(existing) = self.collectors_by_node.get(&collector.node_name) {
                warn!(
                    node = %collector.node_name,
                    kept = %existing,
                    ignored = %collector.name,
                    "multiple collectors on one node"
                );
                continue;
            }
            self.collectors_by_node
                .insert(collector.node_name.clone(), collector.name.clone());
        }

        if let Some(fallback) = self.fallback.as_mut() {
            fallback.set_collectors(collectors);
        }
    }

    fn set_fallback_strategy(&mut self, fallback: Box<dyn Strategy>) {
        self.fallback = Some(fallback);
    }
}
