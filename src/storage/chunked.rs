//! Chunked backend over a [`KvStore`].
//!
//! A blob is split into [`CHUNK_SIZE`] pieces stored at
//! `<user>:chunk/<rel>/<i>`. User names never contain `:`, so chunk keys
//! cannot collide with a blob key `<user>/<rel>`. The manifest `{"chunks": N, "v": 1}` at
//! `<base>` is written last, so a reader never sees a manifest whose chunks
//! are missing. A non-JSON value at `<base>` is a legacy unchunked blob.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::retry::with_retry;
use super::{Backend, Blob, KvStore, StorageError, StorageResult};
use crate::logging::*;
use crate::validation::sanitize_key;

pub const CHUNK_SIZE: usize = 256 * 1024;
pub const MANIFEST_VERSION: u32 = 1;
const CHUNK_SUFFIX: &str = ":chunk";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
	pub chunks: u64,
	pub v: u32,
}

impl Manifest {
	/// Decode a base value; None means a legacy single-value blob
	fn parse(value: &[u8]) -> Option<Manifest> {
		if value.first() != Some(&b'{') {
			return None;
		}
		serde_json::from_slice::<Manifest>(value).ok().filter(|m| m.v == MANIFEST_VERSION)
	}
}

/// `base` is a validated `user/rel` key
fn chunk_key(base: &str, index: u64) -> String {
	let (user, rel) = base.split_once('/').unwrap_or((base, ""));
	format!("{}{}/{}/{}", user, CHUNK_SUFFIX, rel, index)
}

fn is_chunk_key(key: &str) -> bool {
	key.split_once('/').map(|(user, _)| user.ends_with(CHUNK_SUFFIX)).unwrap_or(false)
}

pub struct ChunkedBackend {
	kv: Arc<dyn KvStore>,
	timeout: Duration,
}

impl ChunkedBackend {
	pub fn new(kv: Arc<dyn KvStore>, timeout: Duration) -> Self {
		ChunkedBackend { kv, timeout }
	}

	pub fn kv(&self) -> &Arc<dyn KvStore> {
		&self.kv
	}

	fn base_key(user: &str, rel: &str) -> StorageResult<String> {
		let rel = sanitize_key(user, rel)?;
		Ok(format!("{}/{}", user, rel))
	}

	async fn kv_get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
		with_retry("kv get", self.timeout, || self.kv.get(key)).await
	}

	async fn kv_set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
		with_retry("kv set", self.timeout, || self.kv.set(key, value.clone())).await
	}

	async fn kv_del(&self, keys: &[String]) -> StorageResult<u64> {
		with_retry("kv del", self.timeout, || self.kv.del(keys)).await
	}

	/// Keys belonging to the blob currently stored at `base`, base last
	async fn existing_keys(&self, base: &str) -> StorageResult<Option<Vec<String>>> {
		let value = match self.kv_get(base).await? {
			Some(v) => v,
			None => return Ok(None),
		};
		let mut keys = match Manifest::parse(&value) {
			Some(manifest) => (0..manifest.chunks).map(|i| chunk_key(base, i)).collect(),
			None => Vec::new(),
		};
		keys.push(base.to_string());
		Ok(Some(keys))
	}
}

#[async_trait]
impl Backend for ChunkedBackend {
	async fn save(
		&self,
		user: &str,
		rel: &str,
		reader: &mut (dyn AsyncRead + Unpin + Send),
	) -> StorageResult<()> {
		let base = Self::base_key(user, rel)?;

		// Old manifest and chunks go first so a shorter blob leaves no tail.
		match self.existing_keys(&base).await {
			Ok(Some(keys)) => {
				if let Err(e) = self.kv_del(&keys).await {
					warn!("Cleanup of previous chunks for {} failed: {}", base, e);
				}
			}
			Ok(None) => {}
			Err(e) => warn!("Cannot read previous manifest for {}: {}", base, e),
		}

		let mut chunks = 0u64;
		let mut buf = vec![0u8; CHUNK_SIZE];
		loop {
			let mut filled = 0;
			while filled < CHUNK_SIZE {
				let n = reader.read(&mut buf[filled..]).await?;
				if n == 0 {
					break;
				}
				filled += n;
			}
			if filled == 0 {
				break;
			}
			self.kv_set(&chunk_key(&base, chunks), buf[..filled].to_vec()).await?;
			chunks += 1;
			if filled < CHUNK_SIZE {
				break;
			}
		}

		let manifest = serde_json::to_vec(&Manifest { chunks, v: MANIFEST_VERSION }).map_err(|e| {
			StorageError::Corrupt { key: base.clone(), message: e.to_string() }
		})?;
		self.kv_set(&base, manifest).await?;
		debug!(key = %base, chunks, "stored chunked blob");
		Ok(())
	}

	async fn open(&self, user: &str, rel: &str) -> StorageResult<Blob> {
		let base = Self::base_key(user, rel)?;
		let value = self
			.kv_get(&base)
			.await?
			.ok_or_else(|| StorageError::NotFound { key: base.clone() })?;

		let mut file = tokio::task::spawn_blocking(tempfile::tempfile).await??;
		match Manifest::parse(&value) {
			Some(manifest) => {
				for i in 0..manifest.chunks {
					let key = chunk_key(&base, i);
					let chunk = self.kv_get(&key).await?.ok_or_else(|| StorageError::Corrupt {
						key: base.clone(),
						message: format!("missing chunk {} of {}", i, manifest.chunks),
					})?;
					file = tokio::task::spawn_blocking(move || {
						file.write_all(&chunk)?;
						Ok::<_, std::io::Error>(file)
					})
					.await??;
				}
			}
			None => {
				file = tokio::task::spawn_blocking(move || {
					file.write_all(&value)?;
					Ok::<_, std::io::Error>(file)
				})
				.await??;
			}
		}

		let blob = tokio::task::spawn_blocking(move || {
			file.flush()?;
			file.seek(SeekFrom::Start(0))?;
			Blob::from_file(file)
		})
		.await??;
		Ok(blob)
	}

	async fn list(&self) -> StorageResult<Vec<String>> {
		let mut keys: Vec<String> = with_retry("kv keys", self.timeout, || self.kv.keys())
			.await?
			.into_iter()
			.filter(|k| !is_chunk_key(k))
			.collect();
		keys.sort();
		Ok(keys)
	}

	async fn delete(&self, user: &str, rel: &str) -> StorageResult<bool> {
		let base = Self::base_key(user, rel)?;
		match self.existing_keys(&base).await? {
			Some(keys) => {
				self.kv_del(&keys).await?;
				Ok(true)
			}
			None => Ok(false),
		}
	}
}


// vim: ts=4
