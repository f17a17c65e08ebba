use crate::target::Item;

/// Pre-assignment hook applied to every target batch handed to the allocator.
///
/// Implementations may drop or rewrite targets. The allocator treats the
/// filter as opaque and assigns whatever it returns.
pub trait Filter: Send + Sync {
    fn apply(&self, targets: Vec<Item>) -> Vec<Item>;
}

impl<F> Filter for F
where
    F: Fn(Vec<Item>) -> Vec<Item> + Send + Sync,
{
    fn apply(&self, targets: Vec<Item>) -> Vec<Item> {
        self(targets)
    }
}
