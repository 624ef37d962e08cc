//! Route handlers

use axum::body::Body;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use futures::StreamExt;
use serde::Deserialize;
use std::future::Future;
use std::io::{self, Seek, SeekFrom};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use super::error::ApiError;
use super::AppState;
use crate::archive::{classify, read_archive, ArchiveWriter};
use crate::build_info;
use crate::diff::compare as compare_inventories;
use crate::error::ArchiveError;
use crate::logging::*;
use crate::meta::Activity;
use crate::pipe::{forward, pipe};
use crate::storage::{store_inventory, store_totals, Blob, StorageError};
use crate::types::{
	Change, CompareRequest, HealthResponse, PruneRequest, PruneResponse, PublishResponse,
	StatusResponse,
};
use crate::validation::validate_user;

pub const TAR_CONTENT_TYPE: &str = "application/x-tar";

/// Run a handler body under the request deadline
async fn with_deadline<T, F>(limit: Duration, what: &str, fut: F) -> Result<T, ApiError>
where
	F: Future<Output = Result<T, ApiError>>,
{
	match tokio::time::timeout(limit, fut).await {
		Ok(result) => result,
		Err(_) => Err(ApiError::Timeout(format!("{} exceeded {}s", what, limit.as_secs()))),
	}
}

fn validate_users(users: &[String]) -> Result<(), ApiError> {
	for user in users {
		validate_user(user).map_err(|e| ApiError::Validation(e.to_string()))?;
	}
	Ok(())
}

/// Whether a comma-separated header lists `gzip`
fn header_has_gzip(headers: &HeaderMap, name: header::HeaderName) -> bool {
	headers
		.get_all(name)
		.iter()
		.filter_map(|v| v.to_str().ok())
		.flat_map(|v| v.split(','))
		.any(|token| token.split(';').next().unwrap_or("").trim().eq_ignore_ascii_case("gzip"))
}

/// Server inventory for the request and the resulting diff
async fn diff_against_store(
	state: &AppState,
	req: &CompareRequest,
	include_same: bool,
) -> Result<Vec<Change>, ApiError> {
	validate_users(&req.users)?;
	let server = store_inventory(state.backend.as_ref(), &req.users).await?;
	Ok(compare_inventories(&req.inventory, &server, include_same))
}

// ============================================================================
// HEALTH & STATUS
// ============================================================================

pub async fn health() -> Json<HealthResponse> {
	Json(HealthResponse {
		ok: true,
		version: Some(build_info::VERSION.to_string()),
		build_time: build_info::BUILD_TIME.map(str::to_string),
		commit: build_info::COMMIT.map(str::to_string),
		server_time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
	})
}

pub async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
	with_deadline(state.request_timeout, "status", async {
		let users = store_totals(state.backend.as_ref()).await?;
		let meta = state.meta.snapshot().await;
		Ok(Json(StatusResponse {
			files_total: users.iter().map(|u| u.files).sum(),
			bytes_total: users.iter().map(|u| u.bytes).sum(),
			users,
			last_publish: meta.last_publish,
			last_install: meta.last_install,
			metrics: meta.metrics,
		}))
	})
	.await
}

// ============================================================================
// COMPARE
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct CompareParams {
	include_same: Option<String>,
}

pub async fn compare(
	State(state): State<AppState>,
	params: Result<Query<CompareParams>, QueryRejection>,
	payload: Result<Json<CompareRequest>, JsonRejection>,
) -> Result<Json<Vec<Change>>, ApiError> {
	let Query(params) = params?;
	let Json(req) = payload?;
	let include_same = matches!(params.include_same.as_deref(), Some("1") | Some("true"));

	with_deadline(state.request_timeout, "compare", async {
		Ok(Json(diff_against_store(&state, &req, include_same).await?))
	})
	.await
}

// ============================================================================
// PER-FILE TRANSFER
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct KeyParams {
	user: String,
	path: String,
}

/// Spool a request body into an anonymous temp file, rewound
async fn spool_body(body: Body) -> Result<tokio::fs::File, ApiError> {
	let std_file = tokio::task::spawn_blocking(tempfile::tempfile).await??;
	let mut file = tokio::fs::File::from_std(std_file);

	let mut stream = body.into_data_stream();
	while let Some(chunk) = stream.next().await {
		let chunk = chunk.map_err(|e| ApiError::Validation(format!("request body: {}", e)))?;
		file.write_all(&chunk).await?;
	}
	file.flush().await?;

	let mut std_file = file.into_std().await;
	let std_file = tokio::task::spawn_blocking(move || {
		std_file.seek(SeekFrom::Start(0))?;
		Ok::<_, io::Error>(std_file)
	})
	.await??;
	Ok(tokio::fs::File::from_std(std_file))
}

pub async fn upload(
	State(state): State<AppState>,
	params: Result<Query<KeyParams>, QueryRejection>,
	body: Body,
) -> Result<StatusCode, ApiError> {
	let Query(key) = params?;

	with_deadline(state.request_timeout, "upload", async {
		let mut file = spool_body(body).await?;
		state.backend.save(&key.user, &key.path, &mut file).await?;
		state.meta.record(Activity::Upload).await;
		debug!(user = %key.user, path = %key.path, "uploaded");
		Ok(StatusCode::NO_CONTENT)
	})
	.await
}

pub async fn download(
	State(state): State<AppState>,
	params: Result<Query<KeyParams>, QueryRejection>,
) -> Result<Response, ApiError> {
	let Query(key) = params?;

	let blob = with_deadline(state.request_timeout, "download", async {
		Ok(state.backend.open(&key.user, &key.path).await?)
	})
	.await?;
	state.meta.record(Activity::Download).await;

	let size = blob.size;
	let body = Body::from_stream(crate::pipe::file_stream(blob.into_async()));
	Ok((
		[
			(header::CONTENT_TYPE, "application/octet-stream".to_string()),
			(header::CONTENT_LENGTH, size.to_string()),
		],
		body,
	)
		.into_response())
}

// ============================================================================
// BULK TRANSFER
// ============================================================================

/// Store every entry of a tar body.
///
/// A blocking task parses the archive and spools each entry to a temp file;
/// the handler saves them in order. Whichever side fails first stops the
/// other: a failed save drops the channel, a parse error closes it.
pub async fn publish(State(state): State<AppState>, headers: HeaderMap, body: Body) -> Result<Json<PublishResponse>, ApiError> {
	let content_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("");
	if !content_type.trim().to_ascii_lowercase().starts_with(TAR_CONTENT_TYPE) {
		return Err(ApiError::UnsupportedMediaType(format!(
			"expected {}, got {:?}",
			TAR_CONTENT_TYPE, content_type
		)));
	}
	let gzip = match headers.get(header::CONTENT_ENCODING).and_then(|v| v.to_str().ok()) {
		None => false,
		Some(enc) if enc.trim().eq_ignore_ascii_case("gzip") => true,
		Some(enc) if enc.trim().eq_ignore_ascii_case("identity") => false,
		Some(enc) => {
			return Err(ApiError::UnsupportedMediaType(format!("unsupported content encoding {:?}", enc)))
		}
	};

	let reader = forward(body.into_data_stream(), state.pipe_capacity);
	let (tx, mut rx) = mpsc::channel::<(String, String, std::fs::File)>(state.pipe_capacity);

	let parser = tokio::task::spawn_blocking(move || {
		read_archive(reader, gzip, |entry, data| {
			let mut spooled = tempfile::tempfile()?;
			io::copy(data, &mut spooled).map_err(|e| classify(e, gzip))?;
			spooled.seek(SeekFrom::Start(0))?;
			let name = format!("{}/{}", entry.user, entry.rel);
			tx.blocking_send((entry.user, entry.rel, spooled)).map_err(|_| ArchiveError::Rejected {
				name,
				message: "store aborted".to_string(),
			})
		})
	});

	let backend = state.backend.clone();
	let store = async move {
		let mut stored = 0u64;
		while let Some((user, rel, file)) = rx.recv().await {
			let mut file = tokio::fs::File::from_std(file);
			backend.save(&user, &rel, &mut file).await?;
			stored += 1;
		}
		Ok::<u64, StorageError>(stored)
	};

	let stored = with_deadline(state.request_timeout, "publish", async {
		let (stored, parsed) = tokio::join!(store, parser);
		let parsed = parsed?;
		// A save failure is the root cause of any rejection seen by the parser.
		let stored = stored?;
		parsed?;
		Ok(stored)
	})
	.await?;

	state.meta.record(Activity::Publish).await;
	info!(stored, gzip, "publish complete");
	Ok(Json(PublishResponse { stored }))
}

/// Stream the files the client lacks or holds in a different version.
///
/// An async feeder opens blobs in change order and hands them to a
/// blocking archive builder writing into the response pipe. Blobs that
/// vanished since the diff are skipped; any other error ends the stream
/// with an error.
pub async fn install(
	State(state): State<AppState>,
	headers: HeaderMap,
	payload: Result<Json<CompareRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
	let Json(req) = payload?;
	let gzip = header_has_gzip(&headers, header::ACCEPT_ENCODING);

	let changes: Vec<Change> = with_deadline(state.request_timeout, "install", async {
		diff_against_store(&state, &req, false).await
	})
	.await?
	.into_iter()
	.filter(Change::is_install_side)
	.collect();
	debug!(entries = changes.len(), gzip, "install plan ready");

	let (writer, stream) = pipe(state.pipe_capacity);
	let (blob_tx, mut blob_rx) = mpsc::channel::<Result<(Change, Blob), StorageError>>(state.pipe_capacity);

	let backend = state.backend.clone();
	let deadline = tokio::time::Instant::now() + state.request_timeout;
	tokio::spawn(async move {
		for change in changes {
			let opened = match tokio::time::timeout_at(deadline, backend.open(&change.user, &change.path)).await {
				Ok(r) => r,
				Err(_) => Err(StorageError::Timeout { op: "install" }),
			};
			let item = match opened {
				Ok(blob) => Ok((change, blob)),
				Err(e) if e.is_not_found() => {
					debug!("install: {}/{} vanished, skipping", change.user, change.path);
					continue;
				}
				Err(e) => Err(e),
			};
			let stop = item.is_err();
			if blob_tx.send(item).await.is_err() || stop {
				break;
			}
		}
	});

	let produced = tokio::task::spawn_blocking(move || {
		let failer = writer.failer();
		let mut archive = ArchiveWriter::new(writer, gzip);
		while let Some(item) = blob_rx.blocking_recv() {
			let result = item
				.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
				.and_then(|(change, blob)| {
					archive
						.append(&change.user, &change.path, blob.size, blob.mtime_unix, blob.file)
						.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
				});
			if let Err(e) = result {
				warn!("install stream aborted: {}", e);
				failer.fail(e);
				return false;
			}
		}
		let finished = archive
			.finish()
			.map_err(|e| e.to_string())
			.and_then(|w| w.finish().map_err(|e| e.to_string()));
		match finished {
			Ok(()) => true,
			Err(e) => {
				debug!("install stream closed early: {}", e);
				false
			}
		}
	});

	// Counted once the whole archive has been handed to the response body.
	let meta = state.meta.clone();
	tokio::spawn(async move {
		if let Ok(true) = produced.await {
			meta.record(Activity::Install).await;
		}
	});

	let mut response = Body::from_stream(stream).into_response();
	let headers = response.headers_mut();
	headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static(TAR_CONTENT_TYPE));
	if gzip {
		headers.insert(header::CONTENT_ENCODING, header::HeaderValue::from_static("gzip"));
	}
	Ok(response)
}

// ============================================================================
// PRUNE
// ============================================================================

/// Delete each listed pair independently; failures are logged and skipped
pub async fn prune(
	State(state): State<AppState>,
	payload: Result<Json<PruneRequest>, JsonRejection>,
) -> Result<Json<PruneResponse>, ApiError> {
	let Json(req) = payload?;

	let deleted = with_deadline(state.request_timeout, "prune", async {
		let mut deleted = 0u64;
		for target in &req.deletes {
			if target.user.is_empty() || target.path.is_empty() {
				continue;
			}
			match state.backend.delete(&target.user, &target.path).await {
				Ok(true) => deleted += 1,
				Ok(false) => {}
				Err(e) => warn!("prune {}/{} failed: {}", target.user, target.path, e),
			}
		}
		Ok(deleted)
	})
	.await?;

	state.meta.record(Activity::Prune).await;
	info!(deleted, requested = req.deletes.len(), "prune complete");
	Ok(Json(PruneResponse { deleted }))
}


// vim: ts=4
