//! Shared data types: inventory, changes and the JSON wire messages

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One tracked file as seen by a scan or derived from the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
	pub user: String,
	/// Path relative to the user's home, `/`-separated
	pub path: String,
	pub size: u64,
	pub mtime_unix: i64,
	/// Lowercase hex BLAKE3 of the full content
	pub hash: String,
	#[serde(default)]
	pub is_dir: bool,
}

impl InventoryItem {
	/// `user/path`, the name used for archive entries and store listings
	pub fn entry_name(&self) -> String {
		format!("{}/{}", self.user, self.path)
	}
}

/// A user to scan: home root plus the effective track list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSpec {
	pub name: String,
	pub home: PathBuf,
	pub track: Vec<String>,
}

/// Kind of difference between a client and the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
	/// Only the client has the file
	Add,
	/// Both have it with different content
	Modify,
	/// Only the server has the file
	Delete,
	/// Both have identical content
	Same,
}

/// A single difference for one `(user, path)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Change {
	pub user: String,
	pub path: String,
	#[serde(rename = "type")]
	pub kind: ChangeKind,
}

impl Change {
	/// Entries a publish uploads
	pub fn is_publish_side(&self) -> bool {
		matches!(self.kind, ChangeKind::Add | ChangeKind::Modify)
	}

	/// Entries an install downloads
	pub fn is_install_side(&self) -> bool {
		matches!(self.kind, ChangeKind::Delete | ChangeKind::Modify)
	}
}

/// Body of `/compare` and `/install`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareRequest {
	#[serde(default)]
	pub users: Vec<String>,
	#[serde(default)]
	pub inventory: Vec<InventoryItem>,
}

/// One `(user, path)` pair to delete on the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteTarget {
	pub user: String,
	pub path: String,
}

/// Body of `/prune`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruneRequest {
	#[serde(default)]
	pub deletes: Vec<DeleteTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruneResponse {
	pub deleted: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResponse {
	pub stored: u64,
}

/// Per-user totals in a status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUser {
	pub user: String,
	pub files: u64,
	pub bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusResponse {
	pub files_total: u64,
	pub bytes_total: u64,
	pub users: Vec<StatusUser>,
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub last_publish: String,
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub last_install: String,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub metrics: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
	pub ok: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub build_time: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub commit: Option<String>,
	pub server_time: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_change_wire_format() {
		let change = Change { user: "u".into(), path: "a.txt".into(), kind: ChangeKind::Modify };
		let json = serde_json::to_string(&change).unwrap();
		assert_eq!(json, r#"{"user":"u","path":"a.txt","type":"modify"}"#);
	}

	#[test]
	fn test_inventory_item_defaults_is_dir() {
		let item: InventoryItem = serde_json::from_str(
			r#"{"user":"u","path":"p","size":1,"mtime_unix":2,"hash":"ab"}"#,
		)
		.unwrap();
		assert!(!item.is_dir);
		assert_eq!(item.entry_name(), "u/p");
	}

	#[test]
	fn test_change_sides() {
		let mk = |kind| Change { user: "u".into(), path: "p".into(), kind };
		assert!(mk(ChangeKind::Add).is_publish_side());
		assert!(!mk(ChangeKind::Add).is_install_side());
		assert!(mk(ChangeKind::Modify).is_publish_side());
		assert!(mk(ChangeKind::Modify).is_install_side());
		assert!(mk(ChangeKind::Delete).is_install_side());
		assert!(!mk(ChangeKind::Same).is_publish_side());
	}
}

// vim: ts=4
