pub mod allocator;
pub mod collector;
pub mod config;
pub mod diff;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod metrics_consts;
pub mod strategy;
pub mod target;

pub use allocator::Allocator;
pub use collector::Collector;
pub use error::{Error, Result};
pub use filter::Filter;
pub use strategy::{Strategy, StrategyOptions, StrategyRegistry};
pub use target::{Item, ItemHash, Label, Labels};
