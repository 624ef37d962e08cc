//! Inventory scanner
//!
//! Walks the tracked paths of each user and produces hashed
//! [`InventoryItem`]s. Directories are traversed but never emitted.
//! Unreadable entries are logged and skipped; only a bad pattern fails the
//! scan.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::exclusion::{has_glob_meta, split_patterns, ExclusionEngine, ExclusionError, IncludeGlob};
use crate::logging::*;
use crate::types::{InventoryItem, UserSpec};
use crate::util::{hash_reader, mtime_unix};

/// Scan several users, concatenating their inventories
pub fn scan_users(specs: &[UserSpec]) -> Result<Vec<InventoryItem>, ExclusionError> {
	let mut all = Vec::new();
	for spec in specs {
		all.extend(scan_user(spec)?);
	}
	Ok(all)
}

/// Scan one user's home according to its track list
pub fn scan_user(spec: &UserSpec) -> Result<Vec<InventoryItem>, ExclusionError> {
	let patterns = split_patterns(&spec.track);
	let engine = ExclusionEngine::new(&patterns.excludes)?;

	let globs = patterns
		.includes
		.iter()
		.filter(|p| has_glob_meta(p))
		.map(|p| IncludeGlob::new(p, &spec.home))
		.collect::<Result<Vec<_>, _>>()?;

	let mut scanner = Scanner { spec, engine, seen: HashSet::new(), items: Vec::new() };

	for pattern in patterns.includes.iter().filter(|p| !has_glob_meta(p)) {
		scanner.add_literal(pattern);
	}
	for glob in &globs {
		scanner.add_glob(glob);
	}

	debug!(user = %spec.name, files = scanner.items.len(), "scan finished");
	Ok(scanner.items)
}

struct Scanner<'a> {
	spec: &'a UserSpec,
	engine: ExclusionEngine,
	seen: HashSet<PathBuf>,
	items: Vec<InventoryItem>,
}

impl Scanner<'_> {
	fn add_literal(&mut self, pattern: &str) {
		let trimmed = pattern.trim_end_matches('/');
		let abs = if Path::new(trimmed).is_absolute() {
			PathBuf::from(trimmed)
		} else {
			self.spec.home.join(trimmed)
		};

		let meta = match fs::metadata(&abs) {
			Ok(m) => m,
			Err(e) => {
				debug!("Tracked path {} not available: {}", abs.display(), e);
				return;
			}
		};

		let rel = self.rel_path(&abs);
		if meta.is_dir() {
			if let Some(ref rel) = rel {
				if self.engine.should_exclude_dir(rel, &abs) {
					return;
				}
			}
			self.walk(&abs, None);
		} else if meta.is_file() {
			if let Some(rel) = rel {
				self.add_file(&abs, rel);
			}
		}
	}

	fn add_glob(&mut self, glob: &IncludeGlob) {
		match fs::metadata(&glob.base) {
			Ok(meta) if meta.is_dir() => self.walk(&glob.base.clone(), Some(glob)),
			Ok(_) => debug!("Glob base {} is not a directory", glob.base.display()),
			Err(e) => debug!("Glob base {} not available: {}", glob.base.display(), e),
		}
	}

	/// Walk `dir`. With a glob filter, only matching files are taken and a
	/// matching directory is taken whole.
	fn walk(&mut self, dir: &Path, filter: Option<&IncludeGlob>) {
		let entries = match fs::read_dir(dir) {
			Ok(e) => e,
			Err(e) => {
				debug!("Cannot read directory {}: {}", dir.display(), e);
				return;
			}
		};

		for entry_result in entries {
			let entry = match entry_result {
				Ok(e) => e,
				Err(e) => {
					debug!("Error reading directory entry: {}", e);
					continue;
				}
			};

			let path = entry.path();
			let rel = match self.rel_path(&path) {
				Some(r) => r,
				None => continue,
			};

			let link_meta = match fs::symlink_metadata(&path) {
				Ok(m) => m,
				Err(e) => {
					debug!("Cannot access {}: {}", path.display(), e);
					continue;
				}
			};

			if link_meta.is_dir() {
				if self.engine.should_exclude_dir(&rel, &path) {
					debug!("Pruned {}", rel);
					continue;
				}
				match filter {
					Some(glob) if glob.is_match(&rel, &path) => self.walk(&path, None),
					other => self.walk(&path, other),
				}
				continue;
			}

			// Symlinked files are followed, symlinked directories are not.
			let is_file = if link_meta.file_type().is_symlink() {
				fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false)
			} else {
				link_meta.is_file()
			};
			if !is_file {
				continue;
			}

			if filter.map_or(true, |glob| glob.is_match(&rel, &path)) {
				self.add_file(&path, rel);
			}
		}
	}

	fn add_file(&mut self, abs: &Path, rel: String) {
		if self.engine.should_exclude(&rel, abs) {
			return;
		}
		if !self.seen.insert(abs.to_path_buf()) {
			return;
		}

		let file = match fs::File::open(abs) {
			Ok(f) => f,
			Err(e) => {
				debug!("Skipping unreadable {}: {}", abs.display(), e);
				return;
			}
		};
		let meta = match file.metadata() {
			Ok(m) => m,
			Err(e) => {
				debug!("Skipping {}: {}", abs.display(), e);
				return;
			}
		};
		let (hash, size) = match hash_reader(file) {
			Ok(h) => h,
			Err(e) => {
				debug!("Skipping {} (read failed): {}", abs.display(), e);
				return;
			}
		};

		self.items.push(InventoryItem {
			user: self.spec.name.clone(),
			path: rel,
			size,
			mtime_unix: mtime_unix(&meta),
			hash,
			is_dir: false,
		});
	}

	/// Home-relative, `/`-separated path; None outside home or for non-UTF-8 names
	fn rel_path(&self, abs: &Path) -> Option<String> {
		let rel = match abs.strip_prefix(&self.spec.home) {
			Ok(r) => r,
			Err(_) => {
				debug!("Skipping {} outside home {}", abs.display(), self.spec.home.display());
				return None;
			}
		};
		let mut parts = Vec::new();
		for component in rel.components() {
			match component.as_os_str().to_str() {
				Some(s) => parts.push(s),
				None => {
					debug!("Skipping non UTF-8 path {}", abs.display());
					return None;
				}
			}
		}
		Some(parts.join("/"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn spec(home: &Path, track: &[&str]) -> UserSpec {
		UserSpec {
			name: "u".to_string(),
			home: home.to_path_buf(),
			track: track.iter().map(|s| s.to_string()).collect(),
		}
	}

	fn paths(items: &[InventoryItem]) -> Vec<String> {
		let mut p: Vec<String> = items.iter().map(|i| i.path.clone()).collect();
		p.sort();
		p
	}

	#[test]
	fn test_overlapping_patterns_deduplicate() {
		let dir = TempDir::new().unwrap();
		fs::create_dir_all(dir.path().join(".config")).unwrap();
		fs::write(dir.path().join(".config/a.toml"), "a").unwrap();

		let items = scan_user(&spec(dir.path(), &[".config/", ".config/a.toml", "**/*.toml"])).unwrap();
		assert_eq!(paths(&items), vec![".config/a.toml"]);
	}

	#[test]
	fn test_missing_paths_are_skipped() {
		let dir = TempDir::new().unwrap();
		fs::write(dir.path().join(".bashrc"), "x").unwrap();

		let items = scan_user(&spec(dir.path(), &[".bashrc", ".zshrc", "nope/"])).unwrap();
		assert_eq!(paths(&items), vec![".bashrc"]);
		assert_eq!(items[0].size, 1);
		assert_eq!(items[0].hash, crate::util::hash_bytes(b"x"));
	}

	#[test]
	fn test_bad_exclusion_fails_scan() {
		let dir = TempDir::new().unwrap();
		assert!(scan_user(&spec(dir.path(), &[".bashrc", "![oops"])).is_err());
	}
}

// vim: ts=4
