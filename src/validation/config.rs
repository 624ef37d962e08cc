//! Configuration validation functions

use super::ValidationError;
use crate::exclusion::{compile_glob, split_patterns};

/// Validate a track list.
///
/// The list needs at least one include (non-`!`) pattern, and every pattern,
/// include or exclusion, must compile as a glob.
pub fn validate_track_list(list: &[String], scope: &str) -> Result<(), ValidationError> {
	let split = split_patterns(list);
	if split.includes.is_empty() {
		return Err(ValidationError::ConfigError(format!(
			"{} must contain at least one non-exclusion pattern",
			scope
		)));
	}

	for pattern in split.includes.iter().chain(split.excludes.iter()) {
		compile_glob(pattern).map_err(|e| {
			ValidationError::PatternError(format!("{} entry {:?}: {}", scope, pattern, e))
		})?;
	}
	Ok(())
}

/// Validate timeout in seconds
pub fn validate_timeout_secs(name: &str, timeout_secs: u64) -> Result<(), ValidationError> {
	if timeout_secs == 0 {
		return Err(ValidationError::ConfigError(format!("{} must be greater than 0", name)));
	}
	if timeout_secs > 86_400 {
		return Err(ValidationError::ConfigError(format!(
			"{} too large: {} seconds (max 86400)",
			name, timeout_secs
		)));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn list(items: &[&str]) -> Vec<String> {
		items.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn test_track_list_requires_include() {
		let err = validate_track_list(&list(&["!.cache", "  "]), "user alice track list").unwrap_err();
		assert!(err.to_string().contains("at least one non-exclusion pattern"));
	}

	#[test]
	fn test_track_list_rejects_bad_glob() {
		let err = validate_track_list(&list(&[".bashrc", "!.config/{a,b"]), "global track list")
			.unwrap_err();
		assert!(matches!(err, ValidationError::PatternError(_)));
	}

	#[test]
	fn test_track_list_ok() {
		assert!(validate_track_list(&list(&[".bashrc", "docs/", "!docs/config.yaml"]), "t").is_ok());
		assert!(validate_track_list(&list(&["**/*.conf"]), "t").is_ok());
	}

	#[test]
	fn test_validate_timeout() {
		assert!(validate_timeout_secs("timeoutSecs", 15).is_ok());
		assert!(validate_timeout_secs("timeoutSecs", 0).is_err());
		assert!(validate_timeout_secs("timeoutSecs", 100_000).is_err());
	}
}

// vim: ts=4
