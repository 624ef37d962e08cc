//! Version information baked in at compile time

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commit hash, when `DOTSYNC_COMMIT` was set for the build
pub const COMMIT: Option<&str> = option_env!("DOTSYNC_COMMIT");

/// Build timestamp, when `DOTSYNC_BUILD_TIME` was set for the build
pub const BUILD_TIME: Option<&str> = option_env!("DOTSYNC_BUILD_TIME");

/// One-line summary for `dotsync version`
pub fn summary() -> String {
	let mut line = format!("dotsync {}", VERSION);
	if let Some(commit) = COMMIT {
		line.push_str(&format!(" ({})", commit));
	}
	if let Some(built) = BUILD_TIME {
		line.push_str(&format!(" built {}", built));
	}
	line
}


// vim: ts=4
