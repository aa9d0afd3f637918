pub mod api; // Hot-route middleware, problem responses, router
pub mod audit; // WORM chain, export, gap monitor, verification, retention
pub mod canonical;
pub mod clock;
pub mod config;
pub mod db;
pub mod device; // Device registry and proof verification
pub mod idempotency;
pub mod metrics;
pub mod policy; // Store-failure policy per integration point
pub mod replay;
pub mod tokens; // One-time stamp and reward tokens

use tracing_subscriber::EnvFilter;

/// Initialise logging for the job binaries. Output goes to stderr so that
/// stdout stays free for machine-readable summaries.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .init();
}
