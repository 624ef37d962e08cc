//! Relational backend: one row per blob.
//!
//! Works against MySQL/MariaDB and SQLite through sqlx's `Any` driver. The
//! table is created on connect if missing; saves are `REPLACE INTO` upserts.
//! Rows are keyed by the BLAKE3 hex digest of `user/rel`, since MySQL can
//! only index a prefix of a 4096-byte path.

use async_trait::async_trait;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use std::io::{Seek, SeekFrom, Write};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::retry::with_retry;
use super::{Backend, Blob, StorageError, StorageResult};
use crate::logging::*;
use crate::util::hash_bytes;
use crate::validation::sanitize_key;

const TABLE: &str = "dotsync_blobs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
	MySql,
	Sqlite,
}

impl Dialect {
	/// Pick the dialect from a connection URL, normalizing `mariadb://`
	pub fn from_url(url: &str) -> Option<(Dialect, String)> {
		if let Some(rest) = url.strip_prefix("mariadb://") {
			return Some((Dialect::MySql, format!("mysql://{}", rest)));
		}
		if url.starts_with("mysql://") {
			return Some((Dialect::MySql, url.to_string()));
		}
		if url.starts_with("sqlite:") {
			return Some((Dialect::Sqlite, url.to_string()));
		}
		None
	}

	fn schema(self) -> String {
		match self {
			Dialect::MySql => format!(
				"CREATE TABLE IF NOT EXISTS {} (
					key_hash CHAR(64) NOT NULL PRIMARY KEY,
					user_name TEXT NOT NULL,
					rel_path TEXT NOT NULL,
					data LONGBLOB NOT NULL
				)",
				TABLE
			),
			Dialect::Sqlite => format!(
				"CREATE TABLE IF NOT EXISTS {} (
					key_hash TEXT NOT NULL PRIMARY KEY,
					user_name TEXT NOT NULL,
					rel_path TEXT NOT NULL,
					data BLOB NOT NULL
				)",
				TABLE
			),
		}
	}
}

fn sql_err(op: &'static str) -> impl Fn(sqlx::Error) -> StorageError {
	move |e| {
		let transient = matches!(
			e,
			sqlx::Error::Io(_)
				| sqlx::Error::PoolTimedOut
				| sqlx::Error::WorkerCrashed
				| sqlx::Error::Protocol(_)
		);
		StorageError::Backend { op, message: e.to_string(), transient }
	}
}

/// Row key for a validated `(user, rel)` pair
fn key_hash(user: &str, rel: &str) -> String {
	hash_bytes(format!("{}/{}", user, rel).as_bytes())
}

pub struct SqlBackend {
	pool: AnyPool,
	dialect: Dialect,
	timeout: Duration,
}

impl SqlBackend {
	/// Connect and make sure the table exists
	pub async fn connect(url: &str, max_connections: u32, timeout: Duration) -> StorageResult<Self> {
		let (dialect, url) = Dialect::from_url(url).ok_or_else(|| StorageError::Backend {
			op: "connect",
			message: format!("unsupported database url scheme: {}", url),
			transient: false,
		})?;

		sqlx::any::install_default_drivers();
		let pool = with_retry("connect", timeout, || async {
			AnyPoolOptions::new()
				.max_connections(max_connections.max(1))
				.acquire_timeout(timeout)
				.connect(&url)
				.await
				.map_err(sql_err("connect"))
		})
		.await?;

		let schema = dialect.schema();
		with_retry("create schema", timeout, || async {
			sqlx::query(&schema).execute(&pool).await.map(|_| ()).map_err(sql_err("create schema"))
		})
		.await?;

		info!("SQL backend connected ({:?})", dialect);
		Ok(SqlBackend { pool, dialect, timeout })
	}

	pub fn dialect(&self) -> Dialect {
		self.dialect
	}
}

#[async_trait]
impl Backend for SqlBackend {
	async fn save(
		&self,
		user: &str,
		rel: &str,
		reader: &mut (dyn AsyncRead + Unpin + Send),
	) -> StorageResult<()> {
		let rel = sanitize_key(user, rel)?;
		let mut data = Vec::new();
		reader.read_to_end(&mut data).await?;

		let key = key_hash(user, &rel);
		let sql =
			format!("REPLACE INTO {} (key_hash, user_name, rel_path, data) VALUES (?, ?, ?, ?)", TABLE);
		with_retry("save", self.timeout, || async {
			sqlx::query(&sql)
				.bind(key.clone())
				.bind(user.to_string())
				.bind(rel.clone())
				.bind(data.clone())
				.execute(&self.pool)
				.await
				.map(|_| ())
				.map_err(sql_err("save"))
		})
		.await
	}

	async fn open(&self, user: &str, rel: &str) -> StorageResult<Blob> {
		let rel = sanitize_key(user, rel)?;
		let key = key_hash(user, &rel);
		let sql = format!("SELECT data FROM {} WHERE key_hash = ?", TABLE);
		let data = with_retry("open", self.timeout, || async {
			sqlx::query_scalar::<_, Vec<u8>>(&sql)
				.bind(key.clone())
				.fetch_optional(&self.pool)
				.await
				.map_err(sql_err("open"))
		})
		.await?
		.ok_or_else(|| StorageError::NotFound { key: format!("{}/{}", user, rel) })?;

		let blob = tokio::task::spawn_blocking(move || {
			let mut file = tempfile::tempfile()?;
			file.write_all(&data)?;
			file.flush()?;
			file.seek(SeekFrom::Start(0))?;
			Blob::from_file(file)
		})
		.await??;
		Ok(blob)
	}

	async fn list(&self) -> StorageResult<Vec<String>> {
		let sql = format!("SELECT user_name, rel_path FROM {} ORDER BY user_name, rel_path", TABLE);
		let rows = with_retry("list", self.timeout, || async {
			sqlx::query_as::<_, (String, String)>(&sql)
				.fetch_all(&self.pool)
				.await
				.map_err(sql_err("list"))
		})
		.await?;
		Ok(rows.into_iter().map(|(user, rel)| format!("{}/{}", user, rel)).collect())
	}

	async fn delete(&self, user: &str, rel: &str) -> StorageResult<bool> {
		let rel = sanitize_key(user, rel)?;
		let key = key_hash(user, &rel);
		let sql = format!("DELETE FROM {} WHERE key_hash = ?", TABLE);
		let affected = with_retry("delete", self.timeout, || async {
			sqlx::query(&sql)
				.bind(key.clone())
				.execute(&self.pool)
				.await
				.map(|r| r.rows_affected())
				.map_err(sql_err("delete"))
		})
		.await?;
		Ok(affected > 0)
	}
}


// vim: ts=4
