use std::path::Path;

use envconfig::Envconfig;
use metrics_exporter_prometheus::PrometheusBuilder;
use target_allocator::config::Config;
use target_allocator::discovery::DiscoverySnapshot;
use target_allocator::{Allocator, StrategyRegistry};
use tokio::signal;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

async fn shutdown_signal() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("Shutting down gracefully...");
}

/// Load the discovery file and push its contents into the allocator.
async fn refresh(allocator: &Allocator, path: &Path) {
    match DiscoverySnapshot::load(path).await {
        Ok(snapshot) => {
            let (collectors, targets) = snapshot.into_parts();
            allocator.set_collectors(collectors);
            allocator.set_targets(targets);
            tracing::info!(
                collectors = allocator.num_collectors(),
                targets = allocator.num_targets(),
                unassigned = allocator.num_unassigned(),
                "Applied discovery snapshot"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to refresh discovery snapshot, keeping previous state");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::init_from_env().expect("Invalid configuration");

    // Initialize tracing
    let log_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(log_layer)
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    tracing::info!("Starting target-allocator");
    tracing::info!("Allocation strategy: {}", config.allocation_strategy);
    tracing::info!("Fallback strategy: {:?}", config.fallback_strategy());
    tracing::info!("Discovery file: {}", config.discovery_file);
    tracing::info!("Metrics port: {}", config.metrics_port);

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()?;

    let registry = StrategyRegistry::with_defaults();
    let allocator = registry
        .new_allocator(
            &config.allocation_strategy,
            config.fallback_strategy(),
            &config.strategy_options(),
        )?
        .with_weight_label(config.weight_label.clone());

    let path = Path::new(&config.discovery_file);
    let mut interval = tokio::time::interval(config.discovery_interval());
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = interval.tick() => refresh(&allocator, path).await,
        }
    }

    Ok(())
}
