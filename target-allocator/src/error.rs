use thiserror::Error;

use crate::target::ItemHash;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unregistered allocation strategy: {0}")]
    UnknownStrategy(String),

    #[error("no collectors available for assignment")]
    NoCollectors,

    #[error("target {0} has no node name")]
    MissingNodeName(ItemHash),

    #[error("no collector found for node {0}")]
    NoCollectorForNode(String),

    #[error("collector {0} not found in the collector set")]
    CollectorNotFound(String),

    #[error("failed to load discovery snapshot from {path}: {reason}")]
    Discovery { path: String, reason: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error only means a strategy could not place a target.
    ///
    /// Misses are expected during topology churn and resolve on a later
    /// recomputation, so callers log them instead of failing.
    pub fn is_assignment_miss(&self) -> bool {
        matches!(
            self,
            Self::NoCollectors
                | Self::MissingNodeName(_)
                | Self::NoCollectorForNode(_)
                | Self::CollectorNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
