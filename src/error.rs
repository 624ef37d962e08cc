//! Error types for dotsync operations

use std::error::Error;
use std::fmt;
use std::io;

use crate::exclusion::ExclusionError;
use crate::storage::StorageError;
use crate::validation::ValidationError;

/// Main error type for client and CLI operations
#[derive(Debug)]
pub enum SyncError {
	/// Invalid configuration or key
	Validation(ValidationError),

	/// Track pattern failed to compile
	Pattern(ExclusionError),

	/// I/O error
	Io(io::Error),

	/// Storage backend error (nested)
	Storage(StorageError),

	/// Client/server transfer error (nested)
	Transfer(TransferError),

	/// Archive error (nested)
	Archive(ArchiveError),

	/// Generic error message
	Other { message: String },
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::Validation(e) => write!(f, "{}", e),
			SyncError::Pattern(e) => write!(f, "{}", e),
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
			SyncError::Storage(e) => write!(f, "Storage error: {}", e),
			SyncError::Transfer(e) => write!(f, "Transfer error: {}", e),
			SyncError::Archive(e) => write!(f, "Archive error: {}", e),
			SyncError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for SyncError {}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<String> for SyncError {
	fn from(e: String) -> Self {
		SyncError::Other { message: e }
	}
}

impl From<&str> for SyncError {
	fn from(e: &str) -> Self {
		SyncError::Other { message: e.to_string() }
	}
}

impl From<ValidationError> for SyncError {
	fn from(e: ValidationError) -> Self {
		SyncError::Validation(e)
	}
}

impl From<ExclusionError> for SyncError {
	fn from(e: ExclusionError) -> Self {
		SyncError::Pattern(e)
	}
}

impl From<StorageError> for SyncError {
	fn from(e: StorageError) -> Self {
		SyncError::Storage(e)
	}
}

impl From<TransferError> for SyncError {
	fn from(e: TransferError) -> Self {
		SyncError::Transfer(e)
	}
}

impl From<ArchiveError> for SyncError {
	fn from(e: ArchiveError) -> Self {
		SyncError::Archive(e)
	}
}

/// Errors while building or reading a bulk archive
#[derive(Debug)]
pub enum ArchiveError {
	/// Entry name is not `user/relative-path` or fails path validation
	InvalidEntryName { name: String, reason: String },

	/// Body announced gzip but is not a gzip stream
	InvalidGzip { message: String },

	/// Tar framing is broken
	Corrupt { message: String },

	/// Reading a source file or writing the stream failed
	Io(io::Error),

	/// Receiving side rejected an entry
	Rejected { name: String, message: String },
}

impl ArchiveError {
	/// Whether the archive itself is at fault (as opposed to local I/O)
	pub fn is_malformed(&self) -> bool {
		matches!(
			self,
			ArchiveError::InvalidEntryName { .. }
				| ArchiveError::InvalidGzip { .. }
				| ArchiveError::Corrupt { .. }
		)
	}
}

impl fmt::Display for ArchiveError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ArchiveError::InvalidEntryName { name, reason } => {
				write!(f, "invalid entry name {:?}: {}", name, reason)
			}
			ArchiveError::InvalidGzip { message } => write!(f, "invalid gzip stream: {}", message),
			ArchiveError::Corrupt { message } => write!(f, "invalid tar stream: {}", message),
			ArchiveError::Io(e) => write!(f, "I/O error: {}", e),
			ArchiveError::Rejected { name, message } => {
				write!(f, "entry {:?} rejected: {}", name, message)
			}
		}
	}
}

impl Error for ArchiveError {}

impl From<io::Error> for ArchiveError {
	fn from(e: io::Error) -> Self {
		ArchiveError::Io(e)
	}
}

/// Client-side HTTP transfer errors
#[derive(Debug)]
pub enum TransferError {
	/// Server answered with a non-success status
	Status { status: u16, code: String, message: String },

	/// Connection or protocol failure
	Request(reqwest::Error),

	/// Local I/O during upload or extraction
	Io(io::Error),

	/// Archive stream error
	Archive(ArchiveError),

	/// Operation exceeded its deadline
	Timeout { op: &'static str, secs: u64 },

	/// Worker task panicked or was cancelled
	Join(String),
}

impl fmt::Display for TransferError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransferError::Status { status, code, message } => {
				write!(f, "server returned {} ({}): {}", status, code, message)
			}
			TransferError::Request(e) => write!(f, "request failed: {}", e),
			TransferError::Io(e) => write!(f, "I/O error: {}", e),
			TransferError::Archive(e) => write!(f, "{}", e),
			TransferError::Timeout { op, secs } => {
				write!(f, "{} timed out after {}s", op, secs)
			}
			TransferError::Join(msg) => write!(f, "worker failed: {}", msg),
		}
	}
}

impl Error for TransferError {}

impl From<reqwest::Error> for TransferError {
	fn from(e: reqwest::Error) -> Self {
		TransferError::Request(e)
	}
}

impl From<io::Error> for TransferError {
	fn from(e: io::Error) -> Self {
		TransferError::Io(e)
	}
}

impl From<ArchiveError> for TransferError {
	fn from(e: ArchiveError) -> Self {
		TransferError::Archive(e)
	}
}

impl From<tokio::task::JoinError> for TransferError {
	fn from(e: tokio::task::JoinError) -> Self {
		TransferError::Join(e.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_sync_error_from_validation() {
		let err: SyncError = ValidationError::PathError("empty path".into()).into();
		assert_eq!(err.to_string(), "invalid path: empty path");
	}

	#[test]
	fn test_archive_error_is_malformed() {
		assert!(ArchiveError::InvalidGzip { message: "bad header".into() }.is_malformed());
		assert!(!ArchiveError::Io(io::Error::new(io::ErrorKind::Other, "disk")).is_malformed());
	}

	#[test]
	fn test_transfer_status_display() {
		let err = TransferError::Status {
			status: 415,
			code: "UNSUPPORTED_MEDIA_TYPE".into(),
			message: "expected application/x-tar".into(),
		};
		assert!(err.to_string().contains("415"));
	}
}

// vim: ts=4
