use thiserror::Error;
use url::Url;

use crate::ClassName;

/// Failures opening or reading code locations.
#[derive(Debug, Error)]
pub enum ClassPathError {
	#[error("unsupported code location scheme: {0}")]
	UnsupportedScheme(Url),

	#[error("code location is not a directory: {0}")]
	NotADirectory(Url),

	#[error("I/O error reading {url}: {source}")]
	Io {
		url: Url,
		#[source]
		source: std::io::Error,
	},
}

/// Outcome of a failed class resolution.
#[derive(Debug, Error)]
pub enum LoadError {
	/// No code location provides the class. This is an expected outcome.
	#[error("class not found: {0}")]
	ClassNotFound(ClassName),

	#[error("invalid class name: {0:?}")]
	InvalidName(String),

	#[error(transparent)]
	ClassPath(#[from] ClassPathError),
}

impl LoadError {
	pub fn is_not_found(&self) -> bool {
		matches!(self, Self::ClassNotFound(_))
	}
}
