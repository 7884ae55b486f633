pub mod api; // Admin seed API and public read endpoints
pub mod config;
pub mod core_state; // Per-request connections, sinks and geocoders
pub mod models;
pub mod db;
pub mod seed; // Ingest → validate → dedupe → geocode → insert

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();
}
