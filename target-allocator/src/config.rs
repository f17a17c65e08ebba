use std::time::Duration;

use envconfig::Envconfig;

use crate::strategy::StrategyOptions;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // ── Allocation ──────────────────────────────────────────────────
    #[envconfig(default = "consistent-hashing")]
    pub allocation_strategy: String,

    // Empty disables the fallback.
    #[envconfig(default = "")]
    pub allocation_fallback_strategy: String,

    #[envconfig(default = "200")]
    pub ring_replication_factor: usize,

    #[envconfig(default = "__target_allocator_weight")]
    pub weight_label: String,

    // ── Discovery ───────────────────────────────────────────────────
    #[envconfig(default = "targets.json")]
    pub discovery_file: String,

    #[envconfig(default = "30")]
    pub discovery_interval_secs: u64,

    // ── Metrics ─────────────────────────────────────────────────────
    #[envconfig(default = "9102")]
    pub metrics_port: u16,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn fallback_strategy(&self) -> Option<&str> {
        let name = self.allocation_fallback_strategy.trim();
        (!name.is_empty()).then_some(name)
    }

    pub fn strategy_options(&self) -> StrategyOptions {
        StrategyOptions {
            replication_factor: self.ring_replication_factor,
        }
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs.max(1))
    }
}
