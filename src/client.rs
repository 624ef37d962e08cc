//! HTTP client for the dotsync server API

use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::error::{SyncError, TransferError};
use crate::logging::*;
use crate::pipe::{file_stream, forward, PipeStream, DEFAULT_PIPE_CAPACITY};
use crate::server::handlers::TAR_CONTENT_TYPE;
use crate::server::ErrorBody;
use crate::types::{
	Change, CompareRequest, DeleteTarget, HealthResponse, PruneRequest, PruneResponse,
	PublishResponse, StatusResponse,
};
use crate::util::atomic_write_from;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct Client {
	http: reqwest::Client,
	base: String,
	token: String,
	pipe_capacity: usize,
}

impl Client {
	/// `timeout` bounds each whole request, body included
	pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, TransferError> {
		let http = reqwest::Client::builder()
			.user_agent(concat!("dotsync/", env!("CARGO_PKG_VERSION")))
			.connect_timeout(CONNECT_TIMEOUT)
			.timeout(timeout)
			.build()?;
		Ok(Client {
			http,
			base: base_url.trim_end_matches('/').to_string(),
			token: token.to_string(),
			pipe_capacity: DEFAULT_PIPE_CAPACITY,
		})
	}

	pub fn from_config(config: &Config) -> Result<Self, SyncError> {
		let base = config.require_server_url()?;
		let mut client =
			Client::new(&base, &config.auth_token, Duration::from_secs(config.transfer.timeout_secs))?;
		client.pipe_capacity = config.transfer.pipe_capacity.max(1);
		Ok(client)
	}

	fn request(&self, method: Method, path: &str) -> RequestBuilder {
		self.http.request(method, format!("{}{}", self.base, path)).bearer_auth(&self.token)
	}

	/// Pass 2xx responses through; turn anything else into a status error
	async fn check(resp: Response) -> Result<Response, TransferError> {
		let status = resp.status();
		if status.is_success() {
			return Ok(resp);
		}
		let text = resp.text().await.unwrap_or_default();
		let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
			Ok(body) => (body.error.code, body.error.message),
			Err(_) => (status.canonical_reason().unwrap_or("ERROR").to_string(), text),
		};
		Err(TransferError::Status { status: status.as_u16(), code, message })
	}

	async fn json<T: DeserializeOwned>(resp: Response) -> Result<T, TransferError> {
		Ok(Client::check(resp).await?.json::<T>().await?)
	}

	pub async fn health(&self) -> Result<HealthResponse, TransferError> {
		let resp = self.http.get(format!("{}/health", self.base)).send().await?;
		Client::json(resp).await
	}

	pub async fn status(&self) -> Result<StatusResponse, TransferError> {
		Client::json(self.request(Method::GET, "/status").send().await?).await
	}

	pub async fn compare(
		&self,
		req: &CompareRequest,
		include_same: bool,
	) -> Result<Vec<Change>, TransferError> {
		let path = if include_same { "/compare?include_same=1" } else { "/compare" };
		Client::json(self.request(Method::POST, path).json(req).send().await?).await
	}

	/// Stream a local file to `/upload`
	pub async fn upload(&self, user: &str, rel: &str, src: &Path) -> Result<(), TransferError> {
		let file = tokio::fs::File::open(src).await?;
		let body = reqwest::Body::wrap_stream(file_stream(file));
		let resp = self
			.request(Method::PUT, "/upload")
			.query(&[("user", user), ("path", rel)])
			.body(body)
			.send()
			.await?;
		Client::check(resp).await?;
		debug!(user, path = rel, "uploaded");
		Ok(())
	}

	/// Download one blob atomically to `dest`. Returns false when the server has none.
	pub async fn download(&self, user: &str, rel: &str, dest: &Path) -> Result<bool, TransferError> {
		let resp = self
			.request(Method::GET, "/download")
			.query(&[("user", user), ("path", rel)])
			.send()
			.await?;
		if resp.status() == StatusCode::NOT_FOUND {
			return Ok(false);
		}
		let resp = Client::check(resp).await?;

		let mut reader = forward(resp.bytes_stream(), self.pipe_capacity);
		let dest = dest.to_path_buf();
		tokio::task::spawn_blocking(move || atomic_write_from(&dest, &mut reader, None)).await??;
		debug!(user, path = rel, "downloaded");
		Ok(true)
	}

	/// Send a tar stream to `/publish`
	pub async fn publish_stream(
		&self,
		body: PipeStream,
		gzip: bool,
	) -> Result<PublishResponse, TransferError> {
		let mut req = self
			.request(Method::POST, "/publish")
			.header(CONTENT_TYPE, TAR_CONTENT_TYPE)
			.body(reqwest::Body::wrap_stream(body));
		if gzip {
			req = req.header(CONTENT_ENCODING, "gzip");
		}
		Client::json(req.send().await?).await
	}

	/// Ask `/install` for a tar stream.
	///
	/// Returns the response and whether the server gzipped it.
	pub async fn install_stream(
		&self,
		req: &CompareRequest,
		gzip: bool,
	) -> Result<(Response, bool), TransferError> {
		let mut builder = self.request(Method::POST, "/install").json(req);
		if gzip {
			builder = builder.header(ACCEPT_ENCODING, "gzip");
		}
		let resp = Client::check(builder.send().await?).await?;
		let gzipped = resp
			.headers()
			.get(CONTENT_ENCODING)
			.and_then(|v| v.to_str().ok())
			.map(|v| v.trim().eq_ignore_ascii_case("gzip"))
			.unwrap_or(false);
		Ok((resp, gzipped))
	}

	pub async fn prune(&self, deletes: Vec<DeleteTarget>) -> Result<PruneResponse, TransferError> {
		let body = PruneRequest { deletes };
		Client::json(self.request(Method::POST, "/prune").json(&body).send().await?).await
	}

	pub fn pipe_capacity(&self) -> usize {
		self.pipe_capacity
	}
}

// vim: ts=4
