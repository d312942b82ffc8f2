//! Logging bootstrap.
//!
//! Call [`init`] once at startup; repeated calls are ignored. The filter
//! honors `RUST_LOG` when set and otherwise defaults per profile.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT_ONCE: Once = Once::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Human-readable output, engine modules at debug.
    Development,
    /// JSON output, info level.
    Production,
    /// Test-captured output; safe to call from every test.
    Test,
}

pub fn init(profile: Profile) {
    INIT_ONCE.call_once(|| match profile {
        Profile::Development => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new("vellum=debug")),
                )
                .init();
        }
        Profile::Production => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new("vellum=info")),
                )
                .init();
        }
        Profile::Test => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::new("vellum=trace"))
                .with_test_writer()
                .try_init();
        }
    });
}
