use std::collections::HashMap;
use std::hash::Hash;

/// Keys added to and removed from a map between two generations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changes<K> {
    pub added: Vec<K>,
    pub removed: Vec<K>,
}

impl<K> Changes<K> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Compare the keys of `current` and `desired`.
///
/// Both lists are sorted so callers process changes in a deterministic order.
pub fn diff_keys<K, A, B>(current: &HashMap<K, A>, desired: &HashMap<K, B>) -> Changes<K>
where
    K: Eq + Hash + Ord + Clone,
{
    let mut added: Vec<K> = desired
        .keys()
        .filter(|key| !current.contains_key(*key))
        .cloned()
        .collect();
    let mut removed: Vec<K> = current
        .keys()
        .filter(|key| !desired.contains_key(*key))
        .cloned()
        .collect();

    added.sort_unstable();
    removed.sort_unstable();

    Changes { added, removed }
}
