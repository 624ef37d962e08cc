//! Bulk transfer archive format
//!
//! A bulk publish or install moves many files as one tar stream, optionally
//! gzip-compressed. Entry names are `user/relative-path`; directories are
//! implied and never written. Reading is fail-fast: the first malformed
//! entry aborts the whole stream.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, BufRead, BufReader, Read, Write};

use crate::error::ArchiveError;
use crate::logging::*;
use crate::validation::{sanitize_rel_path, validate_user};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Split an entry name on its first `/` into a validated `(user, rel)` pair
pub fn parse_entry_name(name: &str) -> Result<(String, String), ArchiveError> {
	let invalid = |reason: String| ArchiveError::InvalidEntryName { name: name.to_string(), reason };

	let (user, rel) = match name.split_once('/') {
		Some((u, r)) if !u.is_empty() && !r.is_empty() => (u, r),
		_ => return Err(invalid("expected user/path".to_string())),
	};
	validate_user(user).map_err(|e| invalid(e.to_string()))?;
	let rel = sanitize_rel_path(rel).map_err(|e| invalid(e.to_string()))?;

	Ok((user.to_string(), rel))
}

/// Metadata of one regular-file entry handed to the reader callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
	pub user: String,
	pub rel: String,
	pub size: u64,
	pub mtime_unix: i64,
}

/// Yields exactly `remaining` bytes or fails; tar pads by what was copied
struct Exact<R> {
	inner: R,
	remaining: u64,
}

impl<R: Read> Read for Exact<R> {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		if self.remaining == 0 {
			return Ok(0);
		}
		let max = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
		let n = self.inner.read(&mut buf[..max])?;
		if n == 0 {
			return Err(io::Error::new(
				io::ErrorKind::UnexpectedEof,
				format!("source ended {} bytes short", self.remaining),
			));
		}
		self.remaining -= n as u64;
		Ok(n)
	}
}

enum Sink<W: Write> {
	Plain(W),
	Gzip(GzEncoder<W>),
}

impl<W: Write> Write for Sink<W> {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		match self {
			Sink::Plain(w) => w.write(buf),
			Sink::Gzip(w) => w.write(buf),
		}
	}

	fn flush(&mut self) -> io::Result<()> {
		match self {
			Sink::Plain(w) => w.flush(),
			Sink::Gzip(w) => w.flush(),
		}
	}
}

/// Streaming archive builder
pub struct ArchiveWriter<W: Write> {
	builder: tar::Builder<Sink<W>>,
	entries: u64,
}

impl<W: Write> ArchiveWriter<W> {
	pub fn new(writer: W, gzip: bool) -> Self {
		let sink = if gzip {
			Sink::Gzip(GzEncoder::new(writer, Compression::default()))
		} else {
			Sink::Plain(writer)
		};
		ArchiveWriter { builder: tar::Builder::new(sink), entries: 0 }
	}

	/// Append one file. Bytes past `size` are ignored; fewer is an error.
	pub fn append<R: Read>(
		&mut self,
		user: &str,
		rel: &str,
		size: u64,
		mtime_unix: i64,
		data: R,
	) -> Result<(), ArchiveError> {
		let name = format!("{}/{}", user, rel);
		let mut header = tar::Header::new_gnu();
		header.set_entry_type(tar::EntryType::Regular);
		header.set_size(size);
		header.set_mode(0o644);
		header.set_mtime(mtime_unix.max(0) as u64);
		header.set_cksum();
		self.builder.append_data(&mut header, &name, Exact { inner: data, remaining: size })?;
		self.entries += 1;
		Ok(())
	}

	pub fn entries(&self) -> u64 {
		self.entries
	}

	/// Write the end-of-archive marker and the gzip trailer, returning the writer
	pub fn finish(self) -> Result<W, ArchiveError> {
		let sink = self.builder.into_inner()?;
		let mut writer = match sink {
			Sink::Plain(w) => w,
			Sink::Gzip(encoder) => encoder.finish()?,
		};
		writer.flush()?;
		Ok(writer)
	}
}

/// Read every regular-file entry of an archive.
///
/// `on_entry` receives the parsed entry and a reader over its content.
/// Directory entries are skipped; other non-regular entries are ignored.
/// Returns the number of entries handed to the callback.
pub fn read_archive<R, F>(reader: R, gzip: bool, on_entry: F) -> Result<u64, ArchiveError>
where
	R: Read,
	F: FnMut(ArchiveEntry, &mut dyn Read) -> Result<(), ArchiveError>,
{
	if !gzip {
		return read_entries(reader, false, on_entry);
	}

	let mut buffered = BufReader::new(reader);
	let head = buffered.fill_buf().map_err(|e| classify(e, true))?;
	if head.is_empty() {
		return Err(ArchiveError::InvalidGzip { message: "empty body".to_string() });
	}
	if head.len() < 2 || head[..2] != GZIP_MAGIC {
		return Err(ArchiveError::InvalidGzip { message: "missing gzip header".to_string() });
	}
	read_entries(GzDecoder::new(buffered), true, on_entry)
}

fn read_entries<S, F>(source: S, gzip: bool, mut on_entry: F) -> Result<u64, ArchiveError>
where
	S: Read,
	F: FnMut(ArchiveEntry, &mut dyn Read) -> Result<(), ArchiveError>,
{
	let mut archive = tar::Archive::new(source);
	let mut count = 0;

	for entry in archive.entries().map_err(|e| classify(e, gzip))? {
		let mut entry = entry.map_err(|e| classify(e, gzip))?;
		let kind = entry.header().entry_type();
		if kind.is_dir() {
			continue;
		}

		let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
		if !kind.is_file() {
			debug!("Ignoring non-regular archive entry {}", name);
			continue;
		}

		let (user, rel) = parse_entry_name(&name)?;
		let meta = ArchiveEntry {
			user,
			rel,
			size: entry.size(),
			mtime_unix: entry.header().mtime().unwrap_or(0) as i64,
		};
		on_entry(meta, &mut entry)?;
		count += 1;
	}

	Ok(count)
}

/// Transport failures stay I/O errors; anything else means a broken stream
pub(crate) fn classify(err: io::Error, gzip: bool) -> ArchiveError {
	match err.kind() {
		io::ErrorKind::ConnectionAborted
		| io::ErrorKind::ConnectionReset
		| io::ErrorKind::BrokenPipe
		| io::ErrorKind::TimedOut => ArchiveError::Io(err),
		io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData if gzip => {
			ArchiveError::InvalidGzip { message: err.to_string() }
		}
		_ => ArchiveError::Corrupt { message: err.to_string() },
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn build(entries: &[(&str, &str, &[u8])], gzip: bool) -> Vec<u8> {
		let mut writer = ArchiveWriter::new(Vec::new(), gzip);
		for (user, rel, data) in entries {
			writer.append(user, rel, data.len() as u64, 1_700_000_000, *data).unwrap();
		}
		writer.finish().unwrap()
	}

	fn collect(bytes: &[u8], gzip: bool) -> Result<Vec<(ArchiveEntry, Vec<u8>)>, ArchiveError> {
		let mut out = Vec::new();
		read_archive(bytes, gzip, |entry, data| {
			let mut buf = Vec::new();
			data.read_to_end(&mut buf)?;
			out.push((entry, buf));
			Ok(())
		})?;
		Ok(out)
	}

	#[test]
	fn test_parse_entry_name() {
		assert_eq!(parse_entry_name("u/file.txt").unwrap(), ("u".into(), "file.txt".into()));
		assert_eq!(parse_entry_name("u/a/b/c").unwrap(), ("u".into(), "a/b/c".into()));
		assert!(parse_entry_name("noslash").is_err());
		assert!(parse_entry_name("/file").is_err());
		assert!(parse_entry_name("u/").is_err());
		assert!(parse_entry_name("u/../etc/passwd").is_err());
	}

	#[test]
	fn test_gzip_archive_keeps_entries_and_mtime() {
		let bytes = build(&[("u", "a.txt", b"alpha"), ("v", "dir/b.txt", b"")], true);
		assert_eq!(bytes[..2], GZIP_MAGIC);

		let entries = collect(&bytes, true).unwrap();
		assert_eq!(entries.len(), 2);
		assert_eq!(entries[0].0.user, "u");
		assert_eq!(entries[0].0.mtime_unix, 1_700_000_000);
		assert_eq!(entries[0].1, b"alpha");
		assert_eq!(entries[1].0.rel, "dir/b.txt");
		assert!(entries[1].1.is_empty());
	}

	#[test]
	fn test_long_entry_names_survive() {
		let rel = format!("{}/leaf.txt", "d".repeat(300));
		let bytes = build(&[("u", &rel, b"x")], false);

		let entries = collect(&bytes, false).unwrap();
		assert_eq!(entries[0].0.rel, rel);
	}

	#[test]
	fn test_plain_body_with_gzip_flag_is_invalid_gzip() {
		let bytes = build(&[("u", "a.txt", b"alpha")], false);
		assert!(matches!(collect(&bytes, true), Err(ArchiveError::InvalidGzip { .. })));
	}

	#[test]
	fn test_garbage_is_corrupt() {
		let garbage = vec![b'x'; 1024];
		let err = collect(&garbage, false).unwrap_err();
		assert!(err.is_malformed());
	}

	#[test]
	fn test_short_source_fails_append() {
		let mut writer = ArchiveWriter::new(Vec::new(), false);
		let err = writer.append("u", "a.txt", 10, 0, &b"abc"[..]).unwrap_err();
		assert!(matches!(err, ArchiveError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
	}

	#[test]
	fn test_empty_body_has_no_entries() {
		assert!(collect(&[], false).unwrap().is_empty());
	}

	#[test]
	fn test_directory_entries_are_skipped() {
		let mut builder = tar::Builder::new(Vec::new());
		let mut header = tar::Header::new_gnu();
		header.set_entry_type(tar::EntryType::Directory);
		header.set_size(0);
		header.set_mode(0o755);
		header.set_cksum();
		builder.append_data(&mut header, "u/dir/", io::empty()).unwrap();
		let bytes = builder.into_inner().unwrap();

		assert!(collect(&bytes, false).unwrap().is_empty());
	}
}

// vim: ts=4
