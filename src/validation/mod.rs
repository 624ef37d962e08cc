//! Centralized validation for dotsync
//!
//! This module provides common validation functions and traits for:
//! - Storage keys (user names, relative paths)
//! - Configuration (track lists, timeouts, storage settings)

use std::error::Error;
use std::fmt;

pub mod config;
pub mod path;

pub use config::*;
pub use path::*;

/// Generic validation error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
	/// Invalid relative path
	PathError(String),
	/// Invalid user name
	UserError(String),
	/// Invalid track pattern
	PatternError(String),
	/// Invalid configuration
	ConfigError(String),
}

impl fmt::Display for ValidationError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ValidationError::PathError(msg) => write!(f, "invalid path: {}", msg),
			ValidationError::UserError(msg) => write!(f, "invalid user: {}", msg),
			ValidationError::PatternError(msg) => write!(f, "invalid pattern: {}", msg),
			ValidationError::ConfigError(msg) => write!(f, "invalid config: {}", msg),
		}
	}
}

impl Error for ValidationError {}

/// Trait for validatable types
pub trait Validator {
	/// Returns Ok(()) if valid, Err(ValidationError) if invalid
	fn validate(&self) -> Result<(), ValidationError>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_validation_error_display() {
		let err = ValidationError::PathError("path too long".to_string());
		assert_eq!(err.to_string(), "invalid path: path too long");
	}

	#[test]
	fn test_validation_error_equality() {
		let err1 = ValidationError::UserError("empty".to_string());
		let err2 = ValidationError::UserError("empty".to_string());
		assert_eq!(err1, err2);
	}
}

// vim: ts=4
