//! Storage key validation
//!
//! Every backend addresses blobs by `(user, relative path)`. Both halves are
//! checked here before any backend touches its native namespace, so a key
//! that could escape the store root never reaches the filesystem, a KV key
//! or a SQL row.

use super::ValidationError;

/// Longest accepted relative path, in bytes
pub const MAX_REL_PATH_LEN: usize = 4096;

/// Normalize and validate a relative path.
///
/// Backslashes become `/` and a single leading `./` is dropped. The result
/// must be non-empty, at most [`MAX_REL_PATH_LEN`] bytes, relative, and
/// free of `..` segments. Unsafe input is rejected, never rewritten.
pub fn sanitize_rel_path(raw: &str) -> Result<String, ValidationError> {
	let slashed = raw.replace('\\', "/");
	let rel = slashed.strip_prefix("./").unwrap_or(&slashed);

	if rel.is_empty() {
		return Err(ValidationError::PathError("empty path".to_string()));
	}
	if rel.len() > MAX_REL_PATH_LEN {
		return Err(ValidationError::PathError(format!(
			"path too long: {} bytes (max {})",
			rel.len(),
			MAX_REL_PATH_LEN
		)));
	}
	if is_absolute(rel) {
		return Err(ValidationError::PathError(format!("absolute path not allowed: {}", rel)));
	}
	if rel.split('/').any(|segment| segment == "..") {
		return Err(ValidationError::PathError(format!(
			"path contains parent directory reference (..): {}",
			rel
		)));
	}

	Ok(rel.to_string())
}

/// Check a path for a leading separator or a drive root (`C:/`).
///
/// Backslashes are already converted, so `C:\x` arrives as `C:/x`. A bare
/// `c:notes` is an ordinary relative name.
fn is_absolute(rel: &str) -> bool {
	if rel.starts_with('/') {
		return true;
	}
	let bytes = rel.as_bytes();
	bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/'
}

/// Validate a user name used as the first storage key segment
pub fn validate_user(user: &str) -> Result<(), ValidationError> {
	if user.is_empty() {
		return Err(ValidationError::UserError("empty user name".to_string()));
	}
	if user == "." || user == ".." {
		return Err(ValidationError::UserError(format!("reserved name: {}", user)));
	}
	if user.contains('/') || user.contains('\\') || user.contains(':') {
		return Err(ValidationError::UserError(format!("separator in user name: {}", user)));
	}
	Ok(())
}

/// Validate both halves of a storage key, returning the normalized path
pub fn sanitize_key(user: &str, rel: &str) -> Result<String, ValidationError> {
	validate_user(user)?;
	sanitize_rel_path(rel)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_sanitize_plain_paths() {
		assert_eq!(sanitize_rel_path("file.txt").unwrap(), "file.txt");
		assert_eq!(sanitize_rel_path("dir/sub/file.txt").unwrap(), "dir/sub/file.txt");
		assert_eq!(sanitize_rel_path(".config/nvim/init.lua").unwrap(), ".config/nvim/init.lua");
	}

	#[test]
	fn test_sanitize_strips_dot_slash_once() {
		assert_eq!(sanitize_rel_path("./ok.txt").unwrap(), "ok.txt");
		assert_eq!(sanitize_rel_path("././ok.txt").unwrap(), "./ok.txt");
	}

	#[test]
	fn test_sanitize_converts_backslashes() {
		assert_eq!(sanitize_rel_path("dir\\file.txt").unwrap(), "dir/file.txt");
		assert!(sanitize_rel_path("..\\escape.txt").is_err());
	}

	#[test]
	fn test_sanitize_rejects_parent_segments() {
		assert!(sanitize_rel_path("../escape.txt").is_err());
		assert!(sanitize_rel_path("dir/../../escape.txt").is_err());
		assert!(sanitize_rel_path("dir/..").is_err());
	}

	#[test]
	fn test_sanitize_allows_dots_inside_names() {
		assert_eq!(sanitize_rel_path("a..b").unwrap(), "a..b");
		assert_eq!(sanitize_rel_path("..hidden").unwrap(), "..hidden");
	}

	#[test]
	fn test_sanitize_rejects_absolute() {
		assert!(sanitize_rel_path("/abs/path.txt").is_err());
		assert!(sanitize_rel_path("C:/windows/file").is_err());
		assert!(sanitize_rel_path("c:\\windows\\file").is_err());
		assert!(sanitize_rel_path("C:/x").is_err());
	}

	#[test]
	fn test_sanitize_allows_colons_in_relative_names() {
		assert_eq!(sanitize_rel_path("a:b.txt").unwrap(), "a:b.txt");
		assert_eq!(sanitize_rel_path("c:notes").unwrap(), "c:notes");
		assert_eq!(sanitize_rel_path("a:chunk:0").unwrap(), "a:chunk:0");
		assert_eq!(sanitize_rel_path("dir/C:/x").unwrap(), "dir/C:/x");
	}

	#[test]
	fn test_sanitize_rejects_empty() {
		assert!(sanitize_rel_path("").is_err());
		assert!(sanitize_rel_path("./").is_err());
	}

	#[test]
	fn test_sanitize_length_limit() {
		let ok = "a".repeat(MAX_REL_PATH_LEN);
		assert!(sanitize_rel_path(&ok).is_ok());

		let too_long = "a".repeat(MAX_REL_PATH_LEN + 1);
		let err = sanitize_rel_path(&too_long).unwrap_err();
		assert!(err.to_string().contains("too long"));
	}

	#[test]
	fn test_validate_user() {
		assert!(validate_user("alice").is_ok());
		assert!(validate_user("").is_err());
		assert!(validate_user("..").is_err());
		assert!(validate_user("a/b").is_err());
		assert!(validate_user("a:b").is_err());
	}
}

// vim: ts=4
