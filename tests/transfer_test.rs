/// End-to-end transfer tests
///
/// A real server listens on an ephemeral port; the client scans temp homes,
/// publishes them, and installs into other temp homes. Both bulk (tar) and
/// per-file modes are covered.
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use dotsync::client::Client;
use dotsync::error::{SyncError, TransferError};
use dotsync::meta::MetaStore;
use dotsync::server::{router, AppState};
use dotsync::storage::{DiskBackend, META_FILE};
use dotsync::transfer::{Transfer, TransferOptions};
use dotsync::types::ChangeKind;
use dotsync::UserSpec;

const TOKEN: &str = "e2e-token";

/// Start a server on 127.0.0.1:0 and return its base URL
async fn start_server(data: &Path) -> String {
	let state = AppState {
		backend: Arc::new(DiskBackend::new(data).unwrap()),
		meta: Arc::new(MetaStore::open(data.join(META_FILE)).await),
		auth_token: Arc::from(TOKEN),
		request_timeout: Duration::from_secs(30),
		pipe_capacity: 4,
	};
	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		axum::serve(listener, router(state, 1024 * 1024)).await.unwrap();
	});
	format!("http://{}", addr)
}

fn create_file(home: &Path, rel: &str, content: &[u8]) {
	let path = home.join(rel);
	fs::create_dir_all(path.parent().unwrap()).unwrap();
	fs::write(path, content).unwrap();
}

fn transfer(base: &str, token: &str, home: &Path, bulk: bool, prune: bool) -> Transfer {
	let client = Client::new(base, token, Duration::from_secs(30)).unwrap();
	let users = vec![UserSpec {
		name: "alice".to_string(),
		home: home.to_path_buf(),
		track: vec![".bashrc".to_string(), ".config/".to_string(), "!.config/cache".to_string()],
	}];
	let options = TransferOptions { bulk, compress: bulk, prune, timeout: Duration::from_secs(30) };
	Transfer::new(client, users, options)
}

async fn round_trip(bulk: bool) {
	let data = TempDir::new().unwrap();
	let base = start_server(data.path()).await;

	let source = TempDir::new().unwrap();
	create_file(source.path(), ".bashrc", b"export EDITOR=vi\n");
	create_file(source.path(), ".config/app/settings.toml", &vec![b'x'; 200 * 1024]);
	create_file(source.path(), ".config/cache/junk", b"never published");

	let publisher = transfer(&base, TOKEN, source.path(), bulk, false);
	let report = publisher.publish().await.unwrap();
	assert_eq!(report.scanned, 2);
	assert_eq!(report.uploaded, 2);

	// Nothing left to send
	assert_eq!(publisher.publish().await.unwrap().uploaded, 0);

	let target = TempDir::new().unwrap();
	create_file(target.path(), ".bashrc", b"stale\n");
	let installer = transfer(&base, TOKEN, target.path(), bulk, false);
	let report = installer.install().await.unwrap();
	assert_eq!(report.planned, 2);
	assert_eq!(report.written, 2);

	assert_eq!(fs::read(target.path().join(".bashrc")).unwrap(), b"export EDITOR=vi\n");
	assert_eq!(
		fs::read(target.path().join(".config/app/settings.toml")).unwrap(),
		vec![b'x'; 200 * 1024]
	);
	assert!(!target.path().join(".config/cache/junk").exists());

	// Second install has nothing to do
	assert_eq!(installer.install().await.unwrap().planned, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bulk_round_trip() {
	round_trip(true).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_per_file_round_trip() {
	round_trip(false).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_publish_with_prune() {
	let data = TempDir::new().unwrap();
	let base = start_server(data.path()).await;

	let home = TempDir::new().unwrap();
	create_file(home.path(), ".bashrc", b"a");
	create_file(home.path(), ".config/old.conf", b"b");
	transfer(&base, TOKEN, home.path(), true, false).publish().await.unwrap();

	fs::remove_file(home.path().join(".config/old.conf")).unwrap();

	let without_prune = transfer(&base, TOKEN, home.path(), true, false);
	let (_, changes) = without_prune.compare(false).await.unwrap();
	assert_eq!(changes.len(), 1);
	assert_eq!(changes[0].kind, ChangeKind::Delete);
	assert_eq!(without_prune.publish().await.unwrap().pruned, 0);

	let report = transfer(&base, TOKEN, home.path(), true, true).publish().await.unwrap();
	assert_eq!(report.pruned, 1);
	assert!(!data.path().join("alice/.config/old.conf").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wrong_token_is_reported() {
	let data = TempDir::new().unwrap();
	let base = start_server(data.path()).await;

	let home = TempDir::new().unwrap();
	create_file(home.path(), ".bashrc", b"a");

	let err = transfer(&base, "wrong", home.path(), true, false).publish().await.unwrap_err();
	match err {
		SyncError::Transfer(TransferError::Status { status, code, .. }) => {
			assert_eq!(status, 401);
			assert_eq!(code, "UNAUTHORIZED");
		}
		other => panic!("unexpected error: {}", other),
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_and_health_via_client() {
	let data = TempDir::new().unwrap();
	let base = start_server(data.path()).await;

	let home = TempDir::new().unwrap();
	create_file(home.path(), ".bashrc", b"12345");
	let t = transfer(&base, TOKEN, home.path(), false, false);
	t.publish().await.unwrap();

	let status = t.client().status().await.unwrap();
	assert_eq!(status.files_total, 1);
	assert_eq!(status.bytes_total, 5);
	assert_eq!(status.metrics["upload_requests"], 1);

	assert!(t.client().health().await.unwrap().ok);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_file_upload_and_download() {
	let data = TempDir::new().unwrap();
	let base = start_server(data.path()).await;

	let home = TempDir::new().unwrap();
	create_file(home.path(), ".config/git/ignore", b"*.swp\n");
	let t = transfer(&base, TOKEN, home.path(), false, false);
	t.upload_one("alice", ".config/git/ignore").await.unwrap();

	let out = TempDir::new().unwrap();
	let dest = out.path().join("ignore.copy");
	assert!(t.download_one("alice", ".config/git/ignore", Some(&dest)).await.unwrap());
	assert_eq!(fs::read(&dest).unwrap(), b"*.swp\n");

	assert!(!t.download_one("alice", "missing", Some(&dest)).await.unwrap());
	assert!(t.download_one("alice", "../escape", Some(&dest)).await.is_err());
}

// vim: ts=4
