use sprig_classpath::ClassPathError;
use thiserror::Error;

/// Failures of [`crate::LoaderRegistry`] operations.
#[derive(Debug, Error)]
pub enum RegistryError {
	#[error("cannot open code location: {0}")]
	ClassPath(#[from] ClassPathError),
}
