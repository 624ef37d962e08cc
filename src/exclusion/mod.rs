//! Track pattern handling
//!
//! A track list mixes include patterns with `!`-prefixed exclusions. This
//! module splits the list and compiles both halves; the scanner walks the
//! includes and asks the [`ExclusionEngine`] what to prune.

mod patterns;

pub use patterns::{compile_glob, has_glob_meta, IncludeGlob, PatternMatcher};

use std::path::Path;

/// A track list split into its two halves, trimmed, empties dropped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackPatterns {
	pub includes: Vec<String>,
	pub excludes: Vec<String>,
}

/// Split a track list into includes and exclusions (prefix `!` stripped)
pub fn split_patterns(list: &[String]) -> TrackPatterns {
	let mut split = TrackPatterns::default();
	for raw in list {
		let pattern = raw.trim();
		if pattern.is_empty() {
			continue;
		}
		match pattern.strip_prefix('!') {
			Some(excluded) => {
				let excluded = excluded.trim();
				if !excluded.is_empty() {
					split.excludes.push(excluded.to_string());
				}
			}
			None => split.includes.push(pattern.to_string()),
		}
	}
	split
}

/// Exclusion checks applied during a scan
pub struct ExclusionEngine {
	pattern_matcher: PatternMatcher,
}

impl ExclusionEngine {
	/// Create an engine from exclusion patterns (without the `!`)
	pub fn new(excludes: &[String]) -> Result<Self, ExclusionError> {
		Ok(Self { pattern_matcher: PatternMatcher::new(excludes)? })
	}

	/// Check if a file should be skipped
	pub fn should_exclude(&self, rel: &str, abs: &Path) -> bool {
		self.pattern_matcher.is_excluded(rel, abs)
	}

	/// Check if a directory should be pruned from the walk
	pub fn should_exclude_dir(&self, rel: &str, abs: &Path) -> bool {
		!rel.is_empty() && self.pattern_matcher.is_excluded(rel, abs)
	}
}

/// Errors that can occur during pattern processing
#[derive(Debug)]
pub enum ExclusionError {
	/// Failed to parse a glob pattern
	InvalidPattern(String),
}

impl std::fmt::Display for ExclusionError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ExclusionError::InvalidPattern(msg) => {
				write!(f, "Invalid track pattern: {}", msg)
			}
		}
	}
}

impl std::error::Error for ExclusionError {}

#[cfg(test)]
mod tests {
	use super::*;

	fn strings(items: &[&str]) -> Vec<String> {
		items.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn test_split_patterns() {
		let split = split_patterns(&strings(&[" .bashrc ", "", "!docs/config.yaml", "docs/", "!  "]));

		assert_eq!(split.includes, strings(&[".bashrc", "docs/"]));
		assert_eq!(split.excludes, strings(&["docs/config.yaml"]));
	}

	#[test]
	fn test_engine_prunes_directories() {
		let engine = ExclusionEngine::new(&strings(&[".oh-my-zsh/cache"])).unwrap();
		let abs = Path::new("/home/alice/.oh-my-zsh/cache");

		assert!(engine.should_exclude_dir(".oh-my-zsh/cache", abs));
		assert!(!engine.should_exclude_dir(".oh-my-zsh/plugins", abs));
		assert!(engine.should_exclude(".oh-my-zsh/cache/zcompdump", abs));
	}

	#[test]
	fn test_engine_never_prunes_walk_root() {
		let engine = ExclusionEngine::new(&strings(&["**"])).unwrap();
		assert!(!engine.should_exclude_dir("", Path::new("/home/alice")));
	}
}

// vim: ts=4
