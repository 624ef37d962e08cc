//! Key-value stores underneath the chunked backend

use async_trait::async_trait;
use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{StorageError, StorageResult};

/// Minimal KV surface the chunked backend needs
#[async_trait]
pub trait KvStore: Send + Sync {
	async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

	async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()>;

	/// Remove keys; missing keys are ignored. Returns how many existed.
	async fn del(&self, keys: &[String]) -> StorageResult<u64>;

	/// Every key in the store
	async fn keys(&self) -> StorageResult<Vec<String>>;
}

/// In-process map, used for tests and ephemeral servers
#[derive(Default)]
pub struct MemoryKv {
	map: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryKv {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl KvStore for MemoryKv {
	async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
		Ok(self.map.read().await.get(key).cloned())
	}

	async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
		self.map.write().await.insert(key.to_string(), value);
		Ok(())
	}

	async fn del(&self, keys: &[String]) -> StorageResult<u64> {
		let mut map = self.map.write().await;
		Ok(keys.iter().filter(|k| map.remove(k.as_str()).is_some()).count() as u64)
	}

	async fn keys(&self) -> StorageResult<Vec<String>> {
		Ok(self.map.read().await.keys().cloned().collect())
	}
}

const BLOBS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("blobs");

/// Persistent KV in a single redb file
pub struct RedbKv {
	db: Arc<redb::Database>,
}

fn redb_err(op: &'static str) -> impl Fn(redb::Error) -> StorageError {
	move |e| StorageError::Backend { op, message: e.to_string(), transient: false }
}

impl RedbKv {
	/// Open or create the database and its table
	pub async fn open(path: &Path) -> StorageResult<Self> {
		let path = path.to_path_buf();
		let db = tokio::task::spawn_blocking(move || -> Result<redb::Database, redb::Error> {
			if let Some(parent) = path.parent() {
				std::fs::create_dir_all(parent).map_err(|e| redb::Error::Io(e))?;
			}
			let db = redb::Database::create(&path)?;
			{
				let write_txn = db.begin_write()?;
				let _ = write_txn.open_table(BLOBS_TABLE)?;
				write_txn.commit()?;
			}
			Ok(db)
		})
		.await?
		.map_err(redb_err("open"))?;

		Ok(RedbKv { db: Arc::new(db) })
	}

	async fn blocking<T, F>(&self, op: &'static str, f: F) -> StorageResult<T>
	where
		T: Send + 'static,
		F: FnOnce(&redb::Database) -> Result<T, redb::Error> + Send + 'static,
	{
		let db = self.db.clone();
		tokio::task::spawn_blocking(move || f(&db)).await?.map_err(redb_err(op))
	}
}

#[async_trait]
impl KvStore for RedbKv {
	async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
		let key = key.to_string();
		self.blocking("get", move |db| {
			let read_txn = db.begin_read()?;
			let table = read_txn.open_table(BLOBS_TABLE)?;
			let value = table.get(key.as_str())?.map(|v| v.value().to_vec());
			Ok(value)
		})
		.await
	}

	async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
		let key = key.to_string();
		self.blocking("set", move |db| {
			let write_txn = db.begin_write()?;
			{
				let mut table = write_txn.open_table(BLOBS_TABLE)?;
				table.insert(key.as_str(), value.as_slice())?;
			}
			write_txn.commit()?;
			Ok(())
		})
		.await
	}

	async fn del(&self, keys: &[String]) -> StorageResult<u64> {
		let keys = keys.to_vec();
		self.blocking("del", move |db| {
			let write_txn = db.begin_write()?;
			let mut removed = 0;
			{
				let mut table = write_txn.open_table(BLOBS_TABLE)?;
				for key in &keys {
					if table.remove(key.as_str())?.is_some() {
						removed += 1;
					}
				}
			}
			write_txn.commit()?;
			Ok(removed)
		})
		.await
	}

	async fn keys(&self) -> StorageResult<Vec<String>> {
		self.blocking("keys", |db| {
			let read_txn = db.begin_read()?;
			let table = read_txn.open_table(BLOBS_TABLE)?;
			let mut keys = Vec::new();
			for entry in table.iter()? {
				let (key, _) = entry?;
				keys.push(key.value().to_string());
			}
			Ok(keys)
		})
		.await
	}
}


// vim: ts=4
