use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by repository and file system mutations.
#[derive(Debug, Error)]
pub enum VfsError {
	#[error("no such file or folder: {0}")]
	NotFound(String),

	#[error("already exists: {0}")]
	AlreadyExists(String),

	#[error("not a folder: {0}")]
	NotAFolder(String),

	#[error("file system already mounted: {0}")]
	AlreadyMounted(String),

	#[error("file system not mounted: {0}")]
	NotMounted(String),

	/// The requested order is not a permutation of the mounted file systems.
	#[error("invalid pool order: expected a permutation of {expected:?}, got {actual:?}")]
	InvalidOrder { expected: Vec<String>, actual: Vec<String> },

	#[error("I/O error on {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("cannot watch {path}: {source}")]
	Watch {
		path: PathBuf,
		#[source]
		source: notify::Error,
	},
}

pub type Result<T> = std::result::Result<T, VfsError>;
