//! Configuration for dotsync
//!
//! One `Config` struct serves both the server and the client commands.
//! The configuration follows a priority chain:
//! 1. Built-in defaults (Config::default())
//! 2. Config file (`--config`, else ./dotsync.json5, else ~/.dotsync/config.json5)
//! 3. CLI flags (highest priority)
//!
//! Files ending in `.toml` are parsed as TOML; anything else as JSON5.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::types::UserSpec;
use crate::validation::{
	validate_timeout_secs, validate_track_list, validate_user, ValidationError, Validator,
};

/// Track list used when neither the user nor the global list has entries
pub const DEFAULT_TRACK: &[&str] = &[
	".agent",
	".bash_aliases",
	".bashrc",
	".dircolors",
	".fzf_git",
	".gitconfig",
	".nano/",
	".nanorc",
	".oh-my-zsh/plugins/",
	".profile",
	".selected_editor",
	".zshrc",
	".zprofile",
	".zlogin",
	".zlogout",
];

pub const DEFAULT_LISTEN_ADDR: &str = ":7099";

// ============================================================================
// MAIN CONFIGURATION STRUCT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	// ========================================================================
	// SHARED
	// ========================================================================
	/// Bearer token; an empty token makes the server reject every API call
	pub auth_token: String,

	/// Base URL of the server, e.g. `http://host:7099`
	pub server_url: String,

	/// Default log filter when RUST_LOG is not set
	pub log_level: String,

	// ========================================================================
	// TRACKING
	// ========================================================================
	/// Global track list, used by users without their own
	pub track: Vec<String>,

	/// Users by name
	pub users: BTreeMap<String, UserConfig>,

	// ========================================================================
	// SECTIONS
	// ========================================================================
	pub server: ServerConfig,
	pub storage: StorageConfig,
	pub transfer: TransferConfig,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			auth_token: String::new(),
			server_url: String::new(),
			log_level: "info".to_string(),
			track: vec![],
			users: BTreeMap::new(),
			server: ServerConfig::default(),
			storage: StorageConfig::default(),
			transfer: TransferConfig::default(),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserConfig {
	/// Home directory; `~` and `$VAR` are expanded
	pub home: String,

	/// Per-user track list, overrides the global one
	pub track: Vec<String>,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
	pub listen_addr: String,

	/// Root of the disk store and location of `_meta.json`
	pub data_dir: String,

	pub request_timeout_secs: u64,

	/// Limit for JSON request bodies
	pub max_json_bytes: usize,
}

impl Default for ServerConfig {
	fn default() -> Self {
		ServerConfig {
			listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
			data_dir: "data".to_string(),
			request_timeout_secs: 300,
			max_json_bytes: 64 * 1024 * 1024,
		}
	}
}

/// Storage backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageConfig {
	pub driver: StorageDriver,
	pub chunked: ChunkedConfig,
	pub sql: SqlConfig,

	/// Deadline for a single backend call
	pub timeout_secs: u64,
}

impl Default for StorageConfig {
	fn default() -> Self {
		StorageConfig {
			driver: StorageDriver::Disk,
			chunked: ChunkedConfig::default(),
			sql: SqlConfig::default(),
			timeout_secs: 15,
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChunkedConfig {
	/// redb file; defaults to `<dataDir>/blobs.redb`
	pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SqlConfig {
	/// `mysql://`, `mariadb://` or `sqlite://` URL
	pub url: String,
	pub max_connections: u32,
}

impl Default for SqlConfig {
	fn default() -> Self {
		SqlConfig { url: String::new(), max_connections: 8 }
	}
}

/// Client transfer behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransferConfig {
	/// Use tar streams instead of one request per file
	pub bulk: bool,

	/// gzip bulk streams
	pub compress: bool,

	/// Delete server files missing locally after a publish
	pub prune: bool,

	pub timeout_secs: u64,

	/// Chunks buffered between archive code and the HTTP body
	pub pipe_capacity: usize,
}

impl Default for TransferConfig {
	fn default() -> Self {
		TransferConfig {
			bulk: true,
			compress: true,
			prune: false,
			timeout_secs: 120,
			pipe_capacity: crate::pipe::DEFAULT_PIPE_CAPACITY,
		}
	}
}

// ============================================================================
// ENUMERATIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StorageDriver {
	/// One file per blob under `dataDir`
	#[default]
	Disk,
	/// Chunks in a redb file
	Chunked,
	/// Chunks in process memory, lost on restart
	ChunkedMemory,
	/// One row per blob in MySQL/MariaDB or SQLite
	Sql,
}

// ============================================================================
// LOADING
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
	Io { path: PathBuf, source: std::io::Error },
	Parse { path: PathBuf, message: String },
	NotFound { searched: Vec<PathBuf> },
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigError::Io { path, source } => {
				write!(f, "cannot read config {}: {}", path.display(), source)
			}
			ConfigError::Parse { path, message } => {
				write!(f, "cannot parse config {}: {}", path.display(), message)
			}
			ConfigError::NotFound { searched } => {
				let list: Vec<String> = searched.iter().map(|p| p.display().to_string()).collect();
				write!(f, "no config file found (searched {})", list.join(", "))
			}
		}
	}
}

impl std::error::Error for ConfigError {}

impl Config {
	/// Parse a config file, choosing the format by extension
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let text = std::fs::read_to_string(path)
			.map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
		let is_toml = path.extension().map(|e| e.eq_ignore_ascii_case("toml")).unwrap_or(false);
		let parsed = if is_toml {
			toml::from_str(&text).map_err(|e| e.to_string())
		} else {
			json5::from_str(&text).map_err(|e| e.to_string())
		};
		parsed.map_err(|message| ConfigError::Parse { path: path.to_path_buf(), message })
	}

	/// Default search path, in order
	pub fn search_paths() -> Vec<PathBuf> {
		let mut paths = vec![PathBuf::from("dotsync.json5")];
		if let Some(home) = home_dir() {
			paths.push(home.join(".dotsync").join("config.json5"));
		}
		paths
	}

	/// Load `explicit` if given, else the first existing file on the search path
	pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
		if let Some(path) = explicit {
			return Config::load(path);
		}
		let searched = Config::search_paths();
		match searched.iter().find(|p| p.is_file()) {
			Some(path) => Config::load(path),
			None => Err(ConfigError::NotFound { searched }),
		}
	}

	/// Track list in force for `user`: user list, else global, else built-in
	pub fn effective_track(&self, user: &str) -> Vec<String> {
		let own = self.users.get(user).map(|u| u.track.as_slice()).unwrap_or(&[]);
		if !own.is_empty() {
			own.to_vec()
		} else if !self.track.is_empty() {
			self.track.clone()
		} else {
			DEFAULT_TRACK.iter().map(|s| s.to_string()).collect()
		}
	}

	/// Scan specs for every configured user, sorted by name
	pub fn user_specs(&self) -> Vec<UserSpec> {
		self.users
			.iter()
			.map(|(name, user)| UserSpec {
				name: name.clone(),
				home: PathBuf::from(expand_home(&user.home)),
				track: self.effective_track(name),
			})
			.collect()
	}

	pub fn user_names(&self) -> Vec<String> {
		self.users.keys().cloned().collect()
	}

	/// Listen address with a bare `:port` bound on all interfaces
	pub fn listen_addr(&self) -> String {
		let addr = self.server.listen_addr.trim();
		if addr.is_empty() {
			format!("0.0.0.0{}", DEFAULT_LISTEN_ADDR)
		} else if addr.starts_with(':') {
			format!("0.0.0.0{}", addr)
		} else {
			addr.to_string()
		}
	}

	/// Server URL without a trailing slash, required by client commands
	pub fn require_server_url(&self) -> Result<String, ValidationError> {
		let url = self.server_url.trim().trim_end_matches('/');
		if url.is_empty() {
			return Err(ValidationError::ConfigError("serverUrl is required".to_string()));
		}
		if !url.starts_with("http://") && !url.starts_with("https://") {
			return Err(ValidationError::ConfigError(format!(
				"serverUrl must start with http:// or https://, got {:?}",
				url
			)));
		}
		Ok(url.to_string())
	}

	/// Client commands need at least one user
	pub fn require_users(&self) -> Result<(), ValidationError> {
		if self.users.is_empty() {
			return Err(ValidationError::ConfigError("at least one user must be configured".to_string()));
		}
		Ok(())
	}
}

impl Validator for Config {
	fn validate(&self) -> Result<(), ValidationError> {
		for (name, user) in &self.users {
			validate_user(name)?;
			if user.home.trim().is_empty() {
				return Err(ValidationError::ConfigError(format!("user {} has no home", name)));
			}
			validate_track_list(&self.effective_track(name), &format!("user {} track list", name))?;
		}
		if !self.track.is_empty() {
			validate_track_list(&self.track, "global track list")?;
		}

		validate_timeout_secs("server.requestTimeoutSecs", self.server.request_timeout_secs)?;
		validate_timeout_secs("storage.timeoutSecs", self.storage.timeout_secs)?;
		validate_timeout_secs("transfer.timeoutSecs", self.transfer.timeout_secs)?;
		if self.transfer.pipe_capacity == 0 {
			return Err(ValidationError::ConfigError("transfer.pipeCapacity must be at least 1".to_string()));
		}
		if self.server.max_json_bytes == 0 {
			return Err(ValidationError::ConfigError("server.maxJsonBytes must be at least 1".to_string()));
		}

		if self.storage.driver == StorageDriver::Sql {
			if crate::storage::sql::Dialect::from_url(&self.storage.sql.url).is_none() {
				return Err(ValidationError::ConfigError(format!(
					"storage.sql.url must be a mysql://, mariadb:// or sqlite:// URL, got {:?}",
					self.storage.sql.url
				)));
			}
			if self.storage.sql.max_connections == 0 {
				return Err(ValidationError::ConfigError(
					"storage.sql.maxConnections must be at least 1".to_string(),
				));
			}
		}
		Ok(())
	}
}

// ============================================================================
// HOME EXPANSION
// ============================================================================

fn home_dir() -> Option<PathBuf> {
	std::env::var_os("HOME").filter(|h| !h.is_empty()).map(PathBuf::from)
}

/// Expand a leading `~` and any `$VAR` / `${VAR}`; unset variables expand to ""
pub fn expand_home(raw: &str) -> String {
	let raw = raw.trim();
	let tilde = if raw == "~" || raw.starts_with("~/") {
		match home_dir() {
			Some(home) => format!("{}{}", home.display(), &raw[1..]),
			None => raw.to_string(),
		}
	} else {
		raw.to_string()
	};
	expand_env(&tilde)
}

fn expand_env(input: &str) -> String {
	let mut out = String::with_capacity(input.len());
	let mut rest = input;
	while let Some(pos) = rest.find('$') {
		out.push_str(&rest[..pos]);
		let after = &rest[pos + 1..];
		let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
			match braced.find('}') {
				Some(end) => (&braced[..end], end + 2),
				None => ("", 0),
			}
		} else {
			let end = after
				.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
				.unwrap_or(after.len());
			(&after[..end], end)
		};
		if name.is_empty() {
			out.push('$');
			rest = after;
			continue;
		}
		out.push_str(&std::env::var(name).unwrap_or_default());
		rest = &after[consumed..];
	}
	out.push_str(rest);
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	fn with_user(home: &str, track: &[&str]) -> Config {
		let mut config = Config::default();
		config.users.insert(
			"alice".to_string(),
			UserConfig { home: home.to_string(), track: track.iter().map(|s| s.to_string()).collect() },
		);
		config
	}

	#[test]
	fn test_config_default() {
		let config = Config::default();
		assert_eq!(config.server.listen_addr, ":7099");
		assert_eq!(config.server.data_dir, "data");
		assert_eq!(config.storage.driver, StorageDriver::Disk);
		assert!(config.transfer.bulk);
		assert!(!config.transfer.prune);
	}

	#[test]
	fn test_load_json5_camel_case() {
		let dir = tempfile::TempDir::new().unwrap();
		let path = dir.path().join("dotsync.json5");
		let mut f = std::fs::File::create(&path).unwrap();
		writeln!(
			f,
			r#"{{
				// comments are fine
				authToken: "t0k",
				serverUrl: "http://localhost:7099/",
				users: {{ alice: {{ home: "/home/alice", track: [".bashrc"] }} }},
				storage: {{ driver: "chunked-memory" }},
				transfer: {{ compress: false }},
			}}"#
		)
		.unwrap();

		let config = Config::load(&path).unwrap();
		assert_eq!(config.auth_token, "t0k");
		assert_eq!(config.storage.driver, StorageDriver::ChunkedMemory);
		assert!(!config.transfer.compress);
		assert!(config.transfer.bulk);
		assert_eq!(config.require_server_url().unwrap(), "http://localhost:7099");
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_load_toml() {
		let dir = tempfile::TempDir::new().unwrap();
		let path = dir.path().join("dotsync.toml");
		std::fs::write(
			&path,
			"authToken = \"x\"\ntrack = [\".zshrc\"]\n\n[users.bob]\nhome = \"/home/bob\"\n\n[server]\nlistenAddr = \"127.0.0.1:9000\"\n",
		)
		.unwrap();

		let config = Config::load(&path).unwrap();
		assert_eq!(config.listen_addr(), "127.0.0.1:9000");
		assert_eq!(config.effective_track("bob"), vec![".zshrc".to_string()]);
	}

	#[test]
	fn test_parse_error_names_file() {
		let dir = tempfile::TempDir::new().unwrap();
		let path = dir.path().join("broken.json5");
		std::fs::write(&path, "{ users: ").unwrap();
		let err = Config::load(&path).unwrap_err();
		assert!(err.to_string().contains("broken.json5"));
	}

	#[test]
	fn test_effective_track_order() {
		let mut config = with_user("/h", &[]);
		assert_eq!(config.effective_track("alice").len(), DEFAULT_TRACK.len());

		config.track = vec![".vimrc".to_string()];
		assert_eq!(config.effective_track("alice"), vec![".vimrc".to_string()]);

		config.users.get_mut("alice").unwrap().track = vec![".gitconfig".to_string()];
		assert_eq!(config.effective_track("alice"), vec![".gitconfig".to_string()]);
	}

	#[test]
	fn test_listen_addr_normalization() {
		let mut config = Config::default();
		assert_eq!(config.listen_addr(), "0.0.0.0:7099");
		config.server.listen_addr = ":8080".to_string();
		assert_eq!(config.listen_addr(), "0.0.0.0:8080");
	}

	#[test]
	fn test_validate_rejects_exclusion_only_track() {
		let config = with_user("/h", &["!.cache"]);
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_validate_rejects_missing_home_and_bad_sql() {
		assert!(with_user(" ", &[".bashrc"]).validate().is_err());

		let mut config = with_user("/h", &[".bashrc"]);
		config.storage.driver = StorageDriver::Sql;
		config.storage.sql.url = "postgres://db/x".to_string();
		assert!(config.validate().is_err());

		config.storage.sql.url = "sqlite://blobs.db".to_string();
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_require_server_url_and_users() {
		let config = Config::default();
		assert!(config.require_server_url().is_err());
		assert!(config.require_users().is_err());
	}

	#[test]
	fn test_expand_env() {
		std::env::set_var("DOTSYNC_TEST_ROOT", "/srv/homes");
		assert_eq!(expand_home("$DOTSYNC_TEST_ROOT/alice"), "/srv/homes/alice");
		assert_eq!(expand_home("${DOTSYNC_TEST_ROOT}/bob"), "/srv/homes/bob");
		assert_eq!(expand_home("/plain/$"), "/plain/$");
		assert_eq!(expand_home("/x/$DOTSYNC_TEST_UNSET_VAR/y"), "/x//y");
	}

	#[test]
	fn test_expand_tilde() {
		if let Some(home) = home_dir() {
			assert_eq!(expand_home("~/dots"), format!("{}/dots", home.display()));
			assert_eq!(expand_home("~"), home.display().to_string());
		}
		assert_eq!(expand_home("~bob/x"), "~bob/x");
	}
}

// vim: ts=4
