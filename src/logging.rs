//! Logging prelude module for convenient access to tracing macros.
//!
//! Modules pull the macros in with `use crate::logging::*;` so that every
//! component logs through the same facade.
//!
//! # Usage
//!
//! ```ignore
//! use crate::logging::*;
//!
//! info!(user = %user, "stored file");
//! warn!("meta persist failed: {}", err);
//! ```

pub use tracing::{debug, error, info, warn};

/// Initialize the tracing subscriber with environment filter support.
///
/// `default_level` comes from the `logLevel` config field or the
/// `--log-level` flag. `RUST_LOG` always wins when it is set:
///
/// ```bash
/// RUST_LOG=debug dotsync serve
/// RUST_LOG=dotsync::storage=trace,tower_http=debug dotsync serve
/// ```
pub fn init_tracing(default_level: &str) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.or_else(|_| tracing_subscriber::EnvFilter::try_new(default_level))
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

	// A second init (tests, embedded use) keeps the first subscriber.
	let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

// vim: ts=4
