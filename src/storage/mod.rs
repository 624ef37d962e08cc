//! Server-side blob storage
//!
//! Every backend stores at most one blob per `(user, relative path)` and
//! implements the same [`Backend`] contract. Keys are validated with
//! [`crate::validation::sanitize_key`] before any backend-specific
//! addressing happens.
//!
//! Three implementations exist:
//! - [`DiskBackend`]: one file per blob under a root directory
//! - [`ChunkedBackend`]: fixed-size chunks plus a manifest in a [`KvStore`]
//! - [`SqlBackend`]: one row per blob in a relational table

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;

pub mod chunked;
pub mod disk;
pub mod kv;
pub mod retry;
pub mod sql;

pub use chunked::ChunkedBackend;
pub use disk::DiskBackend;
pub use kv::{KvStore, MemoryKv, RedbKv};
pub use sql::SqlBackend;

use crate::config::{Config, StorageDriver};
use crate::logging::*;
use crate::types::{InventoryItem, StatusUser};
use crate::util::hash_reader;
use crate::validation::ValidationError;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Reserved name of the operational metadata file in the store root
pub const META_FILE: &str = "_meta.json";

/// Storage error type
#[derive(Debug)]
pub enum StorageError {
	/// Key failed validation
	InvalidKey(ValidationError),
	/// No blob stored under the key
	NotFound { key: String },
	/// Local I/O error
	Io(io::Error),
	/// Error reported by a KV or SQL store
	Backend { op: &'static str, message: String, transient: bool },
	/// Operation deadline exceeded
	Timeout { op: &'static str },
	/// Stored data does not decode
	Corrupt { key: String, message: String },
}

impl StorageError {
	/// Whether retrying the same call may succeed
	pub fn is_transient(&self) -> bool {
		match self {
			StorageError::Backend { transient, .. } => *transient,
			StorageError::Io(e) => matches!(
				e.kind(),
				io::ErrorKind::Interrupted
					| io::ErrorKind::TimedOut
					| io::ErrorKind::ConnectionReset
					| io::ErrorKind::ConnectionAborted
					| io::ErrorKind::BrokenPipe
			),
			_ => false,
		}
	}

	pub fn is_not_found(&self) -> bool {
		matches!(self, StorageError::NotFound { .. })
	}
}

impl fmt::Display for StorageError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StorageError::InvalidKey(e) => write!(f, "{}", e),
			StorageError::NotFound { key } => write!(f, "not found: {}", key),
			StorageError::Io(e) => write!(f, "I/O error: {}", e),
			StorageError::Backend { op, message, .. } => write!(f, "{} failed: {}", op, message),
			StorageError::Timeout { op } => write!(f, "{} timed out", op),
			StorageError::Corrupt { key, message } => {
				write!(f, "corrupt blob {}: {}", key, message)
			}
		}
	}
}

impl std::error::Error for StorageError {}

impl From<io::Error> for StorageError {
	fn from(e: io::Error) -> Self {
		StorageError::Io(e)
	}
}

impl From<ValidationError> for StorageError {
	fn from(e: ValidationError) -> Self {
		StorageError::InvalidKey(e)
	}
}

impl From<tokio::task::JoinError> for StorageError {
	fn from(e: tokio::task::JoinError) -> Self {
		StorageError::Backend { op: "task", message: e.to_string(), transient: false }
	}
}

/// An opened blob: a local, seekable file plus its size and mtime
#[derive(Debug)]
pub struct Blob {
	pub file: std::fs::File,
	pub size: u64,
	pub mtime_unix: i64,
}

impl Blob {
	/// Wrap a local file, reading size and mtime from its metadata
	pub fn from_file(file: std::fs::File) -> io::Result<Self> {
		let meta = file.metadata()?;
		Ok(Blob { size: meta.len(), mtime_unix: crate::util::mtime_unix(&meta), file })
	}

	pub fn into_async(self) -> tokio::fs::File {
		tokio::fs::File::from_std(self.file)
	}
}

/// Persistence contract shared by every backend
#[async_trait]
pub trait Backend: Send + Sync {
	/// Store the reader's content under `(user, rel)`, replacing any
	/// previous blob. A failed save never leaves a partial blob current.
	async fn save(
		&self,
		user: &str,
		rel: &str,
		reader: &mut (dyn AsyncRead + Unpin + Send),
	) -> StorageResult<()>;

	/// Open a stored blob
	async fn open(&self, user: &str, rel: &str) -> StorageResult<Blob>;

	/// All stored keys as `user/rel`, internal keys excluded
	async fn list(&self) -> StorageResult<Vec<String>>;

	/// Remove a blob. Returns whether it existed; absence is not an error.
	async fn delete(&self, user: &str, rel: &str) -> StorageResult<bool>;
}

/// Backend chosen at configuration time
pub enum StorageBackend {
	Disk(DiskBackend),
	Chunked(ChunkedBackend),
	Sql(SqlBackend),
}

impl StorageBackend {
	/// Open the backend named by the configuration.
	///
	/// Failure here is fatal for the server: the root cannot be created or
	/// the database is unreachable.
	pub async fn from_config(config: &Config) -> StorageResult<Self> {
		let timeout = Duration::from_secs(config.storage.timeout_secs);
		let backend = match config.storage.driver {
			StorageDriver::Disk => StorageBackend::Disk(DiskBackend::new(&config.server.data_dir)?),
			StorageDriver::Chunked => {
				let path = match config.storage.chunked.path {
					Some(ref p) => p.clone(),
					None => PathBuf::from(&config.server.data_dir).join("blobs.redb"),
				};
				let kv = RedbKv::open(&path).await?;
				StorageBackend::Chunked(ChunkedBackend::new(Arc::new(kv), timeout))
			}
			StorageDriver::ChunkedMemory => {
				StorageBackend::Chunked(ChunkedBackend::new(Arc::new(MemoryKv::new()), timeout))
			}
			StorageDriver::Sql => {
				let sql = &config.storage.sql;
				StorageBackend::Sql(SqlBackend::connect(&sql.url, sql.max_connections, timeout).await?)
			}
		};
		info!("Storage backend ready: {}", backend.name());
		Ok(backend)
	}

	pub fn name(&self) -> &'static str {
		match self {
			StorageBackend::Disk(_) => "disk",
			StorageBackend::Chunked(_) => "chunked",
			StorageBackend::Sql(_) => "sql",
		}
	}
}

#[async_trait]
impl Backend for StorageBackend {
	async fn save(
		&self,
		user: &str,
		rel: &str,
		reader: &mut (dyn AsyncRead + Unpin + Send),
	) -> StorageResult<()> {
		match self {
			StorageBackend::Disk(b) => b.save(user, rel, reader).await,
			StorageBackend::Chunked(b) => b.save(user, rel, reader).await,
			StorageBackend::Sql(b) => b.save(user, rel, reader).await,
		}
	}

	async fn open(&self, user: &str, rel: &str) -> StorageResult<Blob> {
		match self {
			StorageBackend::Disk(b) => b.open(user, rel).await,
			StorageBackend::Chunked(b) => b.open(user, rel).await,
			StorageBackend::Sql(b) => b.open(user, rel).await,
		}
	}

	async fn list(&self) -> StorageResult<Vec<String>> {
		match self {
			StorageBackend::Disk(b) => b.list().await,
			StorageBackend::Chunked(b) => b.list().await,
			StorageBackend::Sql(b) => b.list().await,
		}
	}

	async fn delete(&self, user: &str, rel: &str) -> StorageResult<bool> {
		match self {
			StorageBackend::Disk(b) => b.delete(user, rel).await,
			StorageBackend::Chunked(b) => b.delete(user, rel).await,
			StorageBackend::Sql(b) => b.delete(user, rel).await,
		}
	}
}

/// Split a listed `user/rel` name; None when there is no separator
pub fn split_key(key: &str) -> Option<(&str, &str)> {
	match key.split_once('/') {
		Some((user, rel)) if !user.is_empty() && !rel.is_empty() => Some((user, rel)),
		_ => None,
	}
}

/// Build the server-side inventory by hashing stored blobs.
///
/// An empty `users` slice selects every user. Blobs that vanish between
/// list and open are skipped.
pub async fn store_inventory(
	backend: &dyn Backend,
	users: &[String],
) -> StorageResult<Vec<InventoryItem>> {
	let mut items = Vec::new();
	for key in backend.list().await? {
		let (user, rel) = match split_key(&key) {
			Some(parts) => parts,
			None => continue,
		};
		if !users.is_empty() && !users.iter().any(|u| u == user) {
			continue;
		}

		let blob = match backend.open(user, rel).await {
			Ok(b) => b,
			Err(e) if e.is_not_found() => continue,
			Err(e) => return Err(e),
		};
		let (size, mtime_unix) = (blob.size, blob.mtime_unix);
		let (hash, _) = tokio::task::spawn_blocking(move || hash_reader(blob.file)).await??;

		items.push(InventoryItem {
			user: user.to_string(),
			path: rel.to_string(),
			size,
			mtime_unix,
			hash,
			is_dir: false,
		});
	}
	Ok(items)
}

/// Per-user file and byte totals of the store
pub async fn store_totals(backend: &dyn Backend) -> StorageResult<Vec<StatusUser>> {
	let mut totals: std::collections::BTreeMap<String, StatusUser> = Default::default();
	for key in backend.list().await? {
		let (user, rel) = match split_key(&key) {
			Some(parts) => parts,
			None => continue,
		};
		let blob = match backend.open(user, rel).await {
			Ok(b) => b,
			Err(e) => {
				debug!("status: skipping {}: {}", key, e);
				continue;
			}
		};
		let entry = totals.entry(user.to_string()).or_insert_with(|| StatusUser {
			user: user.to_string(),
			files: 0,
			bytes: 0,
		});
		entry.files += 1;
		entry.bytes += blob.size;
	}
	Ok(totals.into_values().collect())
}


// vim: ts=4
