//! Filesystem backend: `root/<user>/<rel>`, written by temp file + rename

use async_trait::async_trait;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWriteExt};

use super::{Backend, Blob, StorageError, StorageResult, META_FILE};
use crate::archive::{read_archive, ArchiveWriter};
use crate::error::ArchiveError;
use crate::logging::*;
use crate::util::{atomic_write_from, is_temp_name, temp_file_in};
use crate::validation::sanitize_key;

pub struct DiskBackend {
	root: PathBuf,
}

impl DiskBackend {
	/// Open (creating if needed) a store rooted at `root`
	pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
		let root = root.as_ref().to_path_buf();
		fs::create_dir_all(&root)?;
		Ok(DiskBackend { root })
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn blob_path(&self, user: &str, rel: &str) -> StorageResult<(PathBuf, String)> {
		let rel = sanitize_key(user, rel)?;
		Ok((self.root.join(user).join(&rel), rel))
	}

	/// Every stored key, walking the tree synchronously
	fn list_sync(root: &Path) -> io::Result<Vec<String>> {
		fn walk(dir: &Path, prefix: &str, out: &mut Vec<String>) -> io::Result<()> {
			for entry_result in fs::read_dir(dir)? {
				let entry = match entry_result {
					Ok(e) => e,
					Err(e) => {
						debug!("Error reading store entry: {}", e);
						continue;
					}
				};
				let name = match entry.file_name().into_string() {
					Ok(n) => n,
					Err(_) => continue,
				};
				let key = if prefix.is_empty() { name.clone() } else { format!("{}/{}", prefix, name) };

				let file_type = match entry.file_type() {
					Ok(t) => t,
					Err(e) => {
						debug!("Cannot stat {}: {}", key, e);
						continue;
					}
				};
				if file_type.is_dir() {
					walk(&entry.path(), &key, out)?;
				} else if file_type.is_file() && !prefix.is_empty() && !is_temp_name(&name) {
					out.push(key);
				}
			}
			Ok(())
		}

		let mut keys = Vec::new();
		walk(root, "", &mut keys)?;
		keys.sort();
		Ok(keys)
	}

	/// Write every blob into a tar stream, preserving mtimes
	pub fn backup<W: Write>(&self, writer: W, gzip: bool) -> Result<u64, ArchiveError> {
		let mut archive = ArchiveWriter::new(writer, gzip);
		for key in Self::list_sync(&self.root)? {
			let (user, rel) = match super::split_key(&key) {
				Some(parts) => parts,
				None => continue,
			};
			let file = match fs::File::open(self.root.join(&key)) {
				Ok(f) => f,
				Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
				Err(e) => return Err(e.into()),
			};
			let blob = Blob::from_file(file)?;
			archive.append(user, rel, blob.size, blob.mtime_unix, blob.file)?;
		}
		let count = archive.entries();
		archive.finish()?;
		Ok(count)
	}

	/// Restore blobs from a tar stream produced by [`DiskBackend::backup`]
	pub fn restore<R: Read>(&self, reader: R, gzip: bool) -> Result<u64, ArchiveError> {
		read_archive(reader, gzip, |entry, data| {
			let dest = self.root.join(&entry.user).join(&entry.rel);
			atomic_write_from(&dest, data, Some(entry.mtime_unix))?;
			Ok(())
		})
	}
}

#[async_trait]
impl Backend for DiskBackend {
	async fn save(
		&self,
		user: &str,
		rel: &str,
		reader: &mut (dyn AsyncRead + Unpin + Send),
	) -> StorageResult<()> {
		let (dest, _) = self.blob_path(user, rel)?;
		let parent = dest.parent().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
		tokio::fs::create_dir_all(&parent).await?;

		let tmp = tokio::task::spawn_blocking(move || temp_file_in(&parent)).await??;
		let mut file = tokio::fs::File::from_std(tmp.reopen()?);
		tokio::io::copy(reader, &mut file).await?;
		file.flush().await?;
		file.sync_all().await?;
		drop(file);

		// Dropping the temp file on any error above removes it.
		tokio::task::spawn_blocking(move || tmp.persist(&dest).map(|_| ()).map_err(|e| e.error))
			.await??;
		Ok(())
	}

	async fn open(&self, user: &str, rel: &str) -> StorageResult<Blob> {
		let (path, rel) = self.blob_path(user, rel)?;
		let key = format!("{}/{}", user, rel);

		let result = tokio::task::spawn_blocking(move || {
			let file = fs::File::open(&path)?;
			let blob = Blob::from_file(file)?;
			if blob.file.metadata()?.is_dir() {
				return Err(io::Error::new(io::ErrorKind::NotFound, "is a directory"));
			}
			Ok(blob)
		})
		.await?;

		result.map_err(|e| match e.kind() {
			io::ErrorKind::NotFound => StorageError::NotFound { key },
			_ => StorageError::Io(e),
		})
	}

	async fn list(&self) -> StorageResult<Vec<String>> {
		let root = self.root.clone();
		let keys = tokio::task::spawn_blocking(move || Self::list_sync(&root)).await??;
		Ok(keys.into_iter().filter(|k| k != META_FILE).collect())
	}

	async fn delete(&self, user: &str, rel: &str) -> StorageResult<bool> {
		let (path, _) = self.blob_path(user, rel)?;
		match tokio::fs::remove_file(&path).await {
			Ok(()) => {}
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
			Err(e) => return Err(e.into()),
		}

		// Drop now-empty parents up to the user directory.
		let user_dir = self.root.join(user);
		let mut dir = path.parent();
		while let Some(d) = dir {
			if d == user_dir || !d.starts_with(&user_dir) {
				break;
			}
			if tokio::fs::remove_dir(d).await.is_err() {
				break;
			}
			dir = d.parent();
		}
		Ok(true)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[tokio::test]
	async fn test_list_skips_meta_and_temp_files() {
		let dir = TempDir::new().unwrap();
		let backend = DiskBackend::new(dir.path()).unwrap();

		backend.save("u", "a.txt", &mut &b"a"[..]).await.unwrap();
		fs::write(dir.path().join(META_FILE), "{}").unwrap();
		fs::write(dir.path().join("u/.dotsync-abc.tmp"), "partial").unwrap();

		assert_eq!(backend.list().await.unwrap(), vec!["u/a.txt".to_string()]);
	}

	#[tokio::test]
	async fn test_delete_prunes_empty_directories() {
		let dir = TempDir::new().unwrap();
		let backend = DiskBackend::new(dir.path()).unwrap();

		backend.save("u", "a/b/c.txt", &mut &b"c"[..]).await.unwrap();
		assert!(backend.delete("u", "a/b/c.txt").await.unwrap());
		assert!(!dir.path().join("u/a").exists());
		assert!(dir.path().join("u").exists());

		// A file may now take the place of the removed directory.
		backend.save("u", "a", &mut &b"file"[..]).await.unwrap();
	}

	#[tokio::test]
	async fn test_backup_and_restore() {
		let src_dir = TempDir::new().unwrap();
		let src = DiskBackend::new(src_dir.path()).unwrap();
		src.save("u", "x/one.txt", &mut &b"one"[..]).await.unwrap();
		src.save("v", "two.txt", &mut &b"two"[..]).await.unwrap();

		let mut archive = Vec::new();
		assert_eq!(src.backup(&mut archive, true).unwrap(), 2);

		let dst_dir = TempDir::new().unwrap();
		let dst = DiskBackend::new(dst_dir.path()).unwrap();
		assert_eq!(dst.restore(&archive[..], true).unwrap(), 2);

		assert_eq!(dst.list().await.unwrap(), vec!["u/x/one.txt".to_string(), "v/two.txt".to_string()]);
		assert_eq!(fs::read(dst_dir.path().join("v/two.txt")).unwrap(), b"two");
	}
}

// vim: ts=4
