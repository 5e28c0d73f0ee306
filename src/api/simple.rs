use std::sync::Once;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{EngineConfig, DEFAULT_LOG_FILTER};

static INIT_TRACING: Once = Once::new();

/// Install the global tracing subscriber using `config.log_filter`.
/// Only the first call has any effect.
///
/// `RUST_LOG` overrides the configured filter.
pub fn init_logging(config: &EngineConfig) {
    INIT_TRACING.call_once(|| {
        let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
        let (filter, rejected) = select_filter(env.as_deref(), &config.log_filter);

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();

        if let Some(directives) = rejected {
            warn!("ignoring invalid log filter {:?}", directives);
        }
        info!("poem generation engine tracing initialized");
    });
}

/// Pick the filter from the environment, then the configuration, then the
/// built-in default. Also returns the first candidate that failed to parse.
fn select_filter(env: Option<&str>, configured: &str) -> (EnvFilter, Option<String>) {
    let mut rejected = None;
    for candidate in env.into_iter().chain(std::iter::once(configured)) {
        if candidate.trim().is_empty() {
            continue;
        }
        match EnvFilter::try_new(candidate) {
            Ok(filter) => return (filter, rejected),
            Err(_) => {
                rejected.get_or_insert_with(|| candidate.to_string());
            }
        }
    }
    (EnvFilter::new(DEFAULT_LOG_FILTER), rejected)
}
