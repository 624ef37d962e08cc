//! Inventory comparison
//!
//! Pure function over two inventories. Keys are `(user, path)`; the client
//! side is the reference, so a file only the server holds is a `Delete`.

use std::collections::HashMap;

use crate::types::{Change, ChangeKind, InventoryItem};

/// Compare a client inventory with the server's.
///
/// - client only: `Add`
/// - both, hashes differ: `Modify`
/// - server only: `Delete`
/// - both, same hash: `Same`, only when `include_same` is set
///
/// Each key yields at most one change. Duplicate keys within one inventory
/// collapse to the last occurrence. Order of the result is unspecified.
pub fn compare(client: &[InventoryItem], server: &[InventoryItem], include_same: bool) -> Vec<Change> {
	let client_map = index(client);
	let server_map = index(server);

	let mut changes = Vec::with_capacity(client_map.len().max(server_map.len()));

	for (key, item) in &client_map {
		let kind = match server_map.get(key) {
			None => ChangeKind::Add,
			Some(other) if other.hash != item.hash => ChangeKind::Modify,
			Some(_) if include_same => ChangeKind::Same,
			Some(_) => continue,
		};
		changes.push(Change { user: key.0.to_string(), path: key.1.to_string(), kind });
	}

	for key in server_map.keys() {
		if !client_map.contains_key(key) {
			changes.push(Change {
				user: key.0.to_string(),
				path: key.1.to_string(),
				kind: ChangeKind::Delete,
			});
		}
	}

	changes
}

fn index(items: &[InventoryItem]) -> HashMap<(&str, &str), &InventoryItem> {
	items.iter().map(|item| ((item.user.as_str(), item.path.as_str()), item)).collect()
}


// vim: ts=4
