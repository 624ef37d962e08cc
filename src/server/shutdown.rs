//! Signal handling for graceful server shutdown

use crate::logging::*;

/// Resolve on SIGTERM or SIGINT.
///
/// Passed to `axum::serve(..).with_graceful_shutdown`, so in-flight
/// requests finish before the process exits.
pub async fn shutdown_signal() {
	use tokio::signal;

	let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
		Ok(stream) => Some(stream),
		Err(e) => {
			warn!("Failed to setup SIGTERM handler: {}. Only Ctrl-C will stop the server.", e);
			None
		}
	};

	let terminate = async {
		match sigterm.as_mut() {
			Some(stream) => {
				stream.recv().await;
			}
			None => std::future::pending::<()>().await,
		}
	};

	tokio::select! {
		_ = terminate => {
			info!("Received SIGTERM, shutting down...");
		}
		result = signal::ctrl_c() => {
			if let Err(e) = result {
				warn!("Failed to listen for SIGINT: {}", e);
				std::future::pending::<()>().await;
			}
			info!("Received SIGINT, shutting down...");
		}
	}
}

// vim: ts=4
