//! Operational metadata: last publish/install times and request counters.
//!
//! The server owns one [`MetaStore`]. Every mutation happens under a single
//! writer lock and is followed by an atomic rewrite of `_meta.json`; readers
//! only ever get a [`OperationalMeta`] snapshot.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::logging::*;
use crate::util::atomic_write;

/// Persisted metadata document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationalMeta {
	pub last_publish: String,
	pub last_install: String,
	pub metrics: BTreeMap<String, u64>,
}

/// Server operations that are tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
	Publish,
	Install,
	Upload,
	Download,
	Prune,
}

impl Activity {
	pub fn counter(self) -> &'static str {
		match self {
			Activity::Publish => "publish_requests",
			Activity::Install => "install_requests",
			Activity::Upload => "upload_requests",
			Activity::Download => "download_requests",
			Activity::Prune => "prune_requests",
		}
	}
}

pub struct MetaStore {
	path: PathBuf,
	state: RwLock<OperationalMeta>,
}

impl MetaStore {
	/// Load the document at `path`; a missing or unreadable file starts empty
	pub async fn open(path: impl AsRef<Path>) -> Self {
		let path = path.as_ref().to_path_buf();
		let state = match tokio::fs::read(&path).await {
			Ok(bytes) => match serde_json::from_slice(&bytes) {
				Ok(meta) => meta,
				Err(e) => {
					warn!("Ignoring unreadable metadata {}: {}", path.display(), e);
					OperationalMeta::default()
				}
			},
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => OperationalMeta::default(),
			Err(e) => {
				warn!("Cannot read metadata {}: {}", path.display(), e);
				OperationalMeta::default()
			}
		};
		MetaStore { path, state: RwLock::new(state) }
	}

	/// Count an activity, stamp publish/install times, then persist.
	///
	/// Upload counts as publish-side and download as install-side activity.
	/// Persistence failures are logged only.
	pub async fn record(&self, activity: Activity) {
		let mut state = self.state.write().await;
		*state.metrics.entry(activity.counter().to_string()).or_insert(0) += 1;

		let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
		match activity {
			Activity::Publish | Activity::Upload => state.last_publish = now,
			Activity::Install | Activity::Download => state.last_install = now,
			Activity::Prune => {}
		}

		let bytes = match serde_json::to_vec_pretty(&*state) {
			Ok(b) => b,
			Err(e) => {
				warn!("Cannot encode metadata: {}", e);
				return;
			}
		};
		let path = self.path.clone();
		// The write lock is held until the file is replaced, so writes land in order.
		match tokio::task::spawn_blocking(move || atomic_write(&path, &bytes)).await {
			Ok(Ok(())) => {}
			Ok(Err(e)) => warn!("Cannot persist metadata {}: {}", self.path.display(), e),
			Err(e) => warn!("Metadata persist task failed: {}", e),
		}
	}

	/// Consistent copy of the current state
	pub async fn snapshot(&self) -> OperationalMeta {
		self.state.read().await.clone()
	}
}


// vim: ts=4
