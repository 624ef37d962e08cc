//! Client-side publish and install
//!
//! Both directions start the same way: scan the configured homes, send the
//! inventory to `/compare`, and act on the resulting changes. Bulk mode moves
//! all files in one tar stream; per-file mode issues one request per file.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::archive::{read_archive, ArchiveWriter};
use crate::client::Client;
use crate::config::Config;
use crate::error::{ArchiveError, SyncError, TransferError};
use crate::logging::*;
use crate::pipe::pipe;
use crate::scan::scan_users;
use crate::types::{Change, ChangeKind, CompareRequest, DeleteTarget, InventoryItem, UserSpec};
use crate::util::{atomic_write_from, mtime_unix};
use crate::validation::sanitize_rel_path;

/// How publish and install move data
#[derive(Debug, Clone)]
pub struct TransferOptions {
	pub bulk: bool,
	pub compress: bool,
	pub prune: bool,
	pub timeout: Duration,
}

impl TransferOptions {
	pub fn from_config(config: &Config) -> Self {
		TransferOptions {
			bulk: config.transfer.bulk,
			compress: config.transfer.compress,
			prune: config.transfer.prune,
			timeout: Duration::from_secs(config.transfer.timeout_secs),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
	pub scanned: usize,
	pub uploaded: u64,
	pub pruned: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
	pub planned: usize,
	pub written: u64,
}

pub struct Transfer {
	client: Client,
	users: Vec<UserSpec>,
	options: TransferOptions,
}

impl Transfer {
	pub fn new(client: Client, users: Vec<UserSpec>, options: TransferOptions) -> Self {
		Transfer { client, users, options }
	}

	pub fn from_config(config: &Config) -> Result<Self, SyncError> {
		config.require_users()?;
		Ok(Transfer::new(
			Client::from_config(config)?,
			config.user_specs(),
			TransferOptions::from_config(config),
		))
	}

	pub fn client(&self) -> &Client {
		&self.client
	}

	fn home(&self, user: &str) -> Option<&Path> {
		self.users.iter().find(|u| u.name == user).map(|u| u.home.as_path())
	}

	/// Scan every configured user on a blocking thread
	pub async fn scan(&self) -> Result<Vec<InventoryItem>, SyncError> {
		let users = self.users.clone();
		let items = tokio::task::spawn_blocking(move || scan_users(&users))
			.await
			.map_err(TransferError::from)??;
		Ok(items)
	}

	fn compare_request(&self, inventory: Vec<InventoryItem>) -> CompareRequest {
		CompareRequest { users: self.users.iter().map(|u| u.name.clone()).collect(), inventory }
	}

	/// Scan, then ask the server for its diff against the local inventory
	pub async fn compare(&self, include_same: bool) -> Result<(CompareRequest, Vec<Change>), SyncError> {
		let req = self.compare_request(self.scan().await?);
		let changes = self.client.compare(&req, include_same).await?;
		Ok((req, changes))
	}

	// ========================================================================
	// PUBLISH
	// ========================================================================

	/// Push local additions and modifications, optionally pruning the rest
	pub async fn publish(&self) -> Result<PublishReport, SyncError> {
		let (req, changes) = self.compare(false).await?;
		let scanned = req.inventory.len();
		let outgoing: Vec<(String, String, PathBuf)> = changes
			.iter()
			.filter(|c| c.is_publish_side())
			.filter_map(|c| self.home(&c.user).map(|home| (c.user.clone(), c.path.clone(), home.join(&c.path))))
			.collect();
		info!(scanned, outgoing = outgoing.len(), bulk = self.options.bulk, "publishing");

		let uploaded = if outgoing.is_empty() {
			0
		} else if self.options.bulk {
			self.publish_bulk(outgoing).await?
		} else {
			self.publish_per_file(outgoing).await?
		};

		let mut pruned = 0;
		if self.options.prune {
			let deletes: Vec<DeleteTarget> = changes
				.iter()
				.filter(|c| c.kind == ChangeKind::Delete)
				.map(|c| DeleteTarget { user: c.user.clone(), path: c.path.clone() })
				.collect();
			if !deletes.is_empty() {
				pruned = self.client.prune(deletes).await?.deleted;
			}
		}

		Ok(PublishReport { scanned, uploaded, pruned })
	}

	async fn publish_per_file(&self, outgoing: Vec<(String, String, PathBuf)>) -> Result<u64, SyncError> {
		let mut uploaded = 0;
		for (user, rel, abs) in outgoing {
			match self.client.upload(&user, &rel, &abs).await {
				Ok(()) => uploaded += 1,
				Err(TransferError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
					warn!("{} vanished before upload, skipping", abs.display());
				}
				Err(e) => return Err(e.into()),
			}
		}
		Ok(uploaded)
	}

	/// Stream all outgoing files as one tar body.
	///
	/// The archive is built on a blocking thread while the request streams
	/// it. A local read failure ends the body with an error so the server
	/// never sees a truncated archive as complete.
	async fn publish_bulk(&self, outgoing: Vec<(String, String, PathBuf)>) -> Result<u64, SyncError> {
		let gzip = self.options.compress;
		let (writer, stream) = pipe(self.client.pipe_capacity());

		let builder = tokio::task::spawn_blocking(move || {
			let failer = writer.failer();
			let result = build_archive(writer, gzip, &outgoing);
			if let Err(ref e) = result {
				failer.fail(io::Error::new(io::ErrorKind::Other, e.to_string()));
			}
			result
		});

		let secs = self.options.timeout.as_secs();
		let (sent, built) = tokio::time::timeout(self.options.timeout, async {
			tokio::join!(self.client.publish_stream(stream, gzip), builder)
		})
		.await
		.map_err(|_| TransferError::Timeout { op: "publish", secs })?;
		let built = built.map_err(TransferError::from)?;

		match (sent, built) {
			(Ok(resp), Ok(_)) => Ok(resp.stored),
			// The server stopped reading; its answer says why.
			(Err(sent), Err(ArchiveError::Io(ref e))) if e.kind() == io::ErrorKind::BrokenPipe => {
				Err(sent.into())
			}
			(_, Err(e)) => Err(e.into()),
			(Err(e), Ok(_)) => Err(e.into()),
		}
	}

	// ========================================================================
	// INSTALL
	// ========================================================================

	/// Fetch files the server has that are missing or different locally
	pub async fn install(&self) -> Result<InstallReport, SyncError> {
		let (req, changes) = self.compare(false).await?;
		let incoming: Vec<Change> = changes.into_iter().filter(Change::is_install_side).collect();
		let planned = incoming.len();
		info!(planned, bulk = self.options.bulk, "installing");

		let written = if planned == 0 {
			0
		} else if self.options.bulk {
			self.install_bulk(req).await?
		} else {
			self.install_per_file(incoming).await?
		};
		Ok(InstallReport { planned, written })
	}

	async fn install_per_file(&self, incoming: Vec<Change>) -> Result<u64, SyncError> {
		let mut written = 0;
		for change in incoming {
			let home = match self.home(&change.user) {
				Some(h) => h,
				None => continue,
			};
			let rel = sanitize_rel_path(&change.path)?;
			if self.client.download(&change.user, &rel, &home.join(&rel)).await? {
				written += 1;
			} else {
				debug!("{}/{} vanished on the server, skipping", change.user, rel);
			}
		}
		Ok(written)
	}

	/// Extract the `/install` stream into the users' homes, keeping mtimes
	async fn install_bulk(&self, req: CompareRequest) -> Result<u64, SyncError> {
		let secs = self.options.timeout.as_secs();
		let homes: HashMap<String, PathBuf> =
			self.users.iter().map(|u| (u.name.clone(), u.home.clone())).collect();
		let capacity = self.client.pipe_capacity();

		let extract = async {
			let (resp, gzip) = self.client.install_stream(&req, self.options.compress).await?;
			let reader = crate::pipe::forward(resp.bytes_stream(), capacity);
			let written = tokio::task::spawn_blocking(move || extract_archive(reader, gzip, &homes))
				.await
				.map_err(TransferError::from)??;
			Ok::<u64, SyncError>(written)
		};

		tokio::time::timeout(self.options.timeout, extract)
			.await
			.map_err(|_| TransferError::Timeout { op: "install", secs })?
	}

	// ========================================================================
	// SINGLE FILES
	// ========================================================================

	/// Upload one file given relative to the user's home
	pub async fn upload_one(&self, user: &str, rel: &str) -> Result<(), SyncError> {
		let rel = sanitize_rel_path(rel)?;
		let home = self.home(user).ok_or_else(|| SyncError::from(format!("unknown user {}", user)))?;
		self.client.upload(user, &rel, &home.join(&rel)).await?;
		Ok(())
	}

	/// Download one file to `out`, or into the user's home. False when missing.
	pub async fn download_one(&self, user: &str, rel: &str, out: Option<&Path>) -> Result<bool, SyncError> {
		let rel = sanitize_rel_path(rel)?;
		let dest = match out {
			Some(path) => path.to_path_buf(),
			None => self
				.home(user)
				.ok_or_else(|| SyncError::from(format!("unknown user {}; pass --out", user)))?
				.join(&rel),
		};
		Ok(self.client.download(user, &rel, &dest).await?)
	}
}

fn build_archive<W: io::Write>(
	writer: W,
	gzip: bool,
	outgoing: &[(String, String, PathBuf)],
) -> Result<u64, ArchiveError> {
	let mut archive = ArchiveWriter::new(writer, gzip);
	for (user, rel, abs) in outgoing {
		let file = match File::open(abs) {
			Ok(f) => f,
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				warn!("{} vanished before publish, skipping", abs.display());
				continue;
			}
			Err(e) => return Err(e.into()),
		};
		let meta = file.metadata()?;
		archive.append(user, rel, meta.len(), mtime_unix(&meta), file)?;
	}
	let entries = archive.entries();
	let inner = archive.finish()?;
	drop(inner);
	Ok(entries)
}

fn extract_archive<R: io::Read>(
	reader: R,
	gzip: bool,
	homes: &HashMap<String, PathBuf>,
) -> Result<u64, ArchiveError> {
	let mut written = 0;
	read_archive(reader, gzip, |entry, data| {
		let home = match homes.get(&entry.user) {
			Some(h) => h,
			None => {
				warn!("skipping {}/{}: user not configured here", entry.user, entry.rel);
				return Ok(());
			}
		};
		atomic_write_from(&home.join(&entry.rel), data, Some(entry.mtime_unix))?;
		written += 1;
		Ok(())
	})?;
	Ok(written)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_build_then_extract_preserves_content_and_mtime() {
		let src = TempDir::new().unwrap();
		let file = src.path().join(".bashrc");
		std::fs::write(&file, b"export A=1\n").unwrap();
		filetime::set_file_mtime(&file, filetime::FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

		let outgoing = vec![
			("alice".to_string(), ".bashrc".to_string(), file.clone()),
			("alice".to_string(), "gone.txt".to_string(), src.path().join("gone.txt")),
		];
		let mut buf = Vec::new();
		let entries = build_archive(&mut buf, true, &outgoing).unwrap();
		assert_eq!(entries, 1);

		let dst = TempDir::new().unwrap();
		let mut homes = HashMap::new();
		homes.insert("alice".to_string(), dst.path().to_path_buf());
		let written = extract_archive(buf.as_slice(), true, &homes).unwrap();
		assert_eq!(written, 1);

		let out = dst.path().join(".bashrc");
		assert_eq!(std::fs::read(&out).unwrap(), b"export A=1\n");
		let meta = std::fs::metadata(&out).unwrap();
		assert_eq!(mtime_unix(&meta), 1_600_000_000);
	}

	#[test]
	fn test_extract_skips_unknown_users() {
		let mut archive = ArchiveWriter::new(Vec::new(), false);
		archive.append("mallory", ".bashrc", 2, 0, &b"hi"[..]).unwrap();
		archive.append("bob", "notes/todo.txt", 3, 0, &b"abc"[..]).unwrap();
		let buf = archive.finish().unwrap();

		let dst = TempDir::new().unwrap();
		let mut homes = HashMap::new();
		homes.insert("bob".to_string(), dst.path().to_path_buf());
		assert_eq!(extract_archive(buf.as_slice(), false, &homes).unwrap(), 1);
		assert!(dst.path().join("notes/todo.txt").exists());
		assert!(!dst.path().join(".bashrc").exists());
	}
}

// vim: ts=4
