//! Glob compilation for track patterns

use super::ExclusionError;
use globset::{Glob, GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};

/// Characters that turn a track pattern into a glob
const GLOB_META: &[char] = &['*', '?', '[', '{'];

/// Whether a pattern needs glob expansion instead of a literal lookup
pub fn has_glob_meta(pattern: &str) -> bool {
	pattern.contains(GLOB_META)
}

/// Compile one pattern. `*` stays within a path segment, `**` crosses them.
pub fn compile_glob(pattern: &str) -> Result<Glob, ExclusionError> {
	GlobBuilder::new(pattern)
		.literal_separator(true)
		.build()
		.map_err(|e| ExclusionError::InvalidPattern(format!("{}: {}", pattern, e)))
}

/// Matcher for exclusion patterns.
///
/// Relative patterns match the home-relative path; absolute patterns match
/// the absolute path. A pattern also covers everything below it, so an
/// excluded directory hides its contents even when a walk never visits the
/// directory itself.
pub struct PatternMatcher {
	relative: GlobSet,
	absolute: GlobSet,
}

impl PatternMatcher {
	/// Build a matcher from exclusion patterns (already stripped of `!`)
	pub fn new(patterns: &[String]) -> Result<Self, ExclusionError> {
		let mut relative = GlobSetBuilder::new();
		let mut absolute = GlobSetBuilder::new();

		for raw in patterns {
			let pattern = raw.trim_end_matches('/');
			if pattern.is_empty() {
				continue;
			}
			let builder = if pattern.starts_with('/') { &mut absolute } else { &mut relative };
			builder.add(compile_glob(pattern)?);
			builder.add(compile_glob(&format!("{}/**", pattern))?);
		}

		Ok(Self { relative: build_set(relative)?, absolute: build_set(absolute)? })
	}

	/// Check a path against every exclusion
	pub fn is_excluded(&self, rel: &str, abs: &Path) -> bool {
		self.relative.is_match(rel) || self.absolute.is_match(abs)
	}
}

fn build_set(builder: GlobSetBuilder) -> Result<GlobSet, ExclusionError> {
	builder.build().map_err(|e| {
		ExclusionError::InvalidPattern(format!("Failed to build pattern set: {}", e))
	})
}

/// A glob include, split into the literal directory to walk and the
/// matcher applied to every path found below it
#[derive(Debug, Clone)]
pub struct IncludeGlob {
	/// Deepest directory of the pattern without glob characters
	pub base: PathBuf,
	matcher: GlobMatcher,
	anchored: bool,
}

impl IncludeGlob {
	/// Compile an include pattern relative to `home` (absolute patterns stay absolute)
	pub fn new(pattern: &str, home: &Path) -> Result<Self, ExclusionError> {
		let matcher = compile_glob(pattern.trim_end_matches('/'))?.compile_matcher();
		let anchored = pattern.starts_with('/');

		let mut literal = PathBuf::new();
		for segment in pattern.split('/') {
			if has_glob_meta(segment) {
				break;
			}
			if segment.is_empty() {
				if literal.as_os_str().is_empty() && anchored {
					literal.push("/");
				}
				continue;
			}
			literal.push(segment);
		}
		let base = if anchored { literal } else { home.join(literal) };

		Ok(Self { base, matcher, anchored })
	}

	/// Whether a walked path matches the pattern
	pub fn is_match(&self, rel: &str, abs: &Path) -> bool {
		if self.anchored {
			self.matcher.is_match(abs)
		} else {
			self.matcher.is_match(rel)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn strings(items: &[&str]) -> Vec<String> {
		items.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn test_has_glob_meta() {
		assert!(has_glob_meta("*.conf"));
		assert!(has_glob_meta(".config/{nvim,helix}/"));
		assert!(has_glob_meta("file?.txt"));
		assert!(has_glob_meta("[ab].txt"));
		assert!(!has_glob_meta(".bashrc"));
		assert!(!has_glob_meta(".oh-my-zsh/plugins/"));
	}

	#[test]
	fn test_exclusion_matches_file_and_below() {
		let matcher = PatternMatcher::new(&strings(&["docs/config.yaml", ".cache/"])).unwrap();
		let abs = Path::new("/home/alice/x");

		assert!(matcher.is_excluded("docs/config.yaml", abs));
		assert!(matcher.is_excluded(".cache", abs));
		assert!(matcher.is_excluded(".cache/deep/file", abs));
		assert!(!matcher.is_excluded("docs/readme.md", abs));
	}

	#[test]
	fn test_single_star_stays_in_segment() {
		let matcher = PatternMatcher::new(&strings(&["*.log"])).unwrap();
		let abs = Path::new("/x");

		assert!(matcher.is_excluded("debug.log", abs));
		assert!(!matcher.is_excluded("logs/debug.log", abs));

		let deep = PatternMatcher::new(&strings(&["**/*.log"])).unwrap();
		assert!(deep.is_excluded("logs/debug.log", abs));
	}

	#[test]
	fn test_absolute_exclusion() {
		let matcher = PatternMatcher::new(&strings(&["/home/alice/secret"])).unwrap();

		assert!(matcher.is_excluded("secret/key", Path::new("/home/alice/secret/key")));
		assert!(!matcher.is_excluded("secret/key", Path::new("/home/bob/secret/key")));
	}

	#[test]
	fn test_include_glob_base() {
		let home = Path::new("/home/alice");

		let glob = IncludeGlob::new(".config/*/init.lua", home).unwrap();
		assert_eq!(glob.base, PathBuf::from("/home/alice/.config"));
		assert!(glob.is_match(".config/nvim/init.lua", Path::new("/unused")));
		assert!(!glob.is_match(".config/nvim/lua/init.lua", Path::new("/unused")));

		let anywhere = IncludeGlob::new("**/*.conf", home).unwrap();
		assert_eq!(anywhere.base, PathBuf::from("/home/alice"));
		assert!(anywhere.is_match("a/b/c.conf", Path::new("/unused")));

		let braces = IncludeGlob::new(".{bashrc,zshrc}", home).unwrap();
		assert!(braces.is_match(".zshrc", Path::new("/unused")));
	}

	#[test]
	fn test_invalid_pattern() {
		assert!(compile_glob("[unclosed").is_err());
		assert!(PatternMatcher::new(&strings(&["{a,b"])).is_err());
	}
}

// vim: ts=4
