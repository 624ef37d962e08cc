//! # dotsync - Dotfile Synchronization
//!
//! dotsync keeps tracked dotfiles of named users in sync between machines
//! through a central server. Clients scan their homes, ask the server for a
//! diff, and move only what changed: either one file per request or as a
//! single (optionally gzipped) tar stream.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dotsync::config::Config;
//! use dotsync::transfer::Transfer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::discover(None)?;
//!     let report = Transfer::from_config(&config)?.publish().await?;
//!     println!("Uploaded {} files", report.uploaded);
//!     Ok(())
//! }
//! ```
//!
//! ## Running a server
//!
//! ```rust,ignore
//! let config = dotsync::config::Config::discover(None)?;
//! dotsync::server::serve(&config).await?;
//! ```

pub mod archive;
pub mod build_info;
pub mod client;
pub mod config;
pub mod diff;
pub mod error;
pub mod exclusion;
pub mod logging;
pub mod meta;
pub mod pipe;
pub mod scan;
pub mod server;
pub mod storage;
pub mod transfer;
pub mod types;
pub mod util;
pub mod validation;

// Re-export commonly used types and functions
pub use config::Config;
pub use error::{ArchiveError, SyncError, TransferError};
pub use storage::{Backend, StorageBackend, StorageError};
pub use types::{Change, ChangeKind, CompareRequest, InventoryItem, UserSpec};

// vim: ts=4
