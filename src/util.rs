//! Small filesystem helpers shared by the scanner, the disk backend and the
//! installer

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Prefix of temp files written next to their destination
pub const TEMP_PREFIX: &str = ".dotsync-";
pub const TEMP_SUFFIX: &str = ".tmp";

/// Stream a reader through BLAKE3, returning `(hex hash, bytes read)`
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<(String, u64)> {
	let mut hasher = blake3::Hasher::new();
	let mut buf = vec![0u8; 64 * 1024];
	let mut total = 0u64;
	loop {
		let n = match reader.read(&mut buf) {
			Ok(0) => break,
			Ok(n) => n,
			Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
			Err(e) => return Err(e),
		};
		hasher.update(&buf[..n]);
		total += n as u64;
	}
	Ok((hex::encode(hasher.finalize().as_bytes()), total))
}

/// Hash a byte slice
pub fn hash_bytes(data: &[u8]) -> String {
	hex::encode(blake3::hash(data).as_bytes())
}

/// Modification time as seconds since the epoch (0 when unavailable)
pub fn mtime_unix(meta: &fs::Metadata) -> i64 {
	meta.modified().ok().map(system_time_unix).unwrap_or(0)
}

pub fn system_time_unix(t: SystemTime) -> i64 {
	match t.duration_since(UNIX_EPOCH) {
		Ok(d) => d.as_secs() as i64,
		Err(e) => -(e.duration().as_secs() as i64),
	}
}

/// Whether a file name is one of our in-flight temp files
pub fn is_temp_name(name: &str) -> bool {
	name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
}

/// Create a temp file in `dir` with the shared prefix
pub fn temp_file_in(dir: &Path) -> io::Result<tempfile::NamedTempFile> {
	tempfile::Builder::new().prefix(TEMP_PREFIX).suffix(TEMP_SUFFIX).tempfile_in(dir)
}

/// Replace `dest` atomically with the content of `reader`.
///
/// Content lands in a temp sibling that is fsynced and renamed over the
/// destination, so readers see either the old or the new file. Missing
/// parent directories are created. `mtime`, when given, is applied before
/// the rename.
pub fn atomic_write_from<R: Read + ?Sized>(dest: &Path, reader: &mut R, mtime: Option<i64>) -> io::Result<u64> {
	let parent = match dest.parent() {
		Some(p) if !p.as_os_str().is_empty() => p,
		_ => Path::new("."),
	};
	fs::create_dir_all(parent)?;

	let mut tmp = temp_file_in(parent)?;
	let written = io::copy(reader, tmp.as_file_mut())?;
	tmp.as_file_mut().flush()?;
	tmp.as_file().sync_all()?;

	if let Some(secs) = mtime {
		filetime::set_file_mtime(tmp.path(), filetime::FileTime::from_unix_time(secs, 0))?;
	}

	tmp.persist(dest).map_err(|e| e.error)?;
	Ok(written)
}

/// Atomic write of an in-memory buffer
pub fn atomic_write(dest: &Path, data: &[u8]) -> io::Result<()> {
	atomic_write_from(dest, &mut io::Cursor::new(data), None).map(|_| ())
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_hash_reader_matches_hash_bytes() {
		let data = b"hello world".repeat(10_000);
		let (hash, len) = hash_reader(&data[..]).unwrap();
		assert_eq!(len, data.len() as u64);
		assert_eq!(hash, hash_bytes(&data));
		assert_eq!(hash.len(), 64);
	}

	#[test]
	fn test_atomic_write_creates_parents_and_replaces() {
		let dir = TempDir::new().unwrap();
		let dest = dir.path().join("a/b/file.txt");

		atomic_write(&dest, b"first").unwrap();
		atomic_write(&dest, b"second").unwrap();
		assert_eq!(fs::read(&dest).unwrap(), b"second");

		let leftovers: Vec<_> = fs::read_dir(dest.parent().unwrap())
			.unwrap()
			.filter_map(|e| e.ok())
			.filter(|e| is_temp_name(&e.file_name().to_string_lossy()))
			.collect();
		assert!(leftovers.is_empty());
	}

	#[test]
	fn test_atomic_write_sets_mtime() {
		let dir = TempDir::new().unwrap();
		let dest = dir.path().join("stamped");

		atomic_write_from(&dest, &mut &b"x"[..], Some(1_600_000_000)).unwrap();
		let meta = fs::metadata(&dest).unwrap();
		assert_eq!(mtime_unix(&meta), 1_600_000_000);
	}
}

// vim: ts=4
