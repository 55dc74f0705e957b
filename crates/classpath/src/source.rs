//! Backends that serve resources for one code location.

use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Serves resource bytes by `/`-separated resource path.
pub trait CodeSource: Send + Sync + fmt::Debug {
	/// Returns `Ok(None)` when the resource does not exist.
	fn fetch(&self, resource_path: &str) -> io::Result<Option<Vec<u8>>>;
}

/// Resources read from a directory tree.
#[derive(Debug, Clone)]
pub struct DirectorySource {
	root: PathBuf,
}

impl DirectorySource {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}
}

impl CodeSource for DirectorySource {
	fn fetch(&self, resource_path: &str) -> io::Result<Option<Vec<u8>>> {
		let relative = Path::new(resource_path.trim_start_matches('/'));
		if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
			return Ok(None);
		}
		match std::fs::read(self.root.join(relative)) {
			Ok(bytes) => Ok(Some(bytes)),
			Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::IsADirectory) => Ok(None),
			Err(e) => Err(e),
		}
	}
}

/// Resources held in memory, for generated code.
#[derive(Debug, Default)]
pub struct MemorySource {
	entries: RwLock<FxHashMap<String, Arc<[u8]>>>,
}

impl MemorySource {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&self, resource_path: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
		self.entries.write().insert(resource_path.into(), bytes.into());
	}

	pub fn remove(&self, resource_path: &str) -> bool {
		self.entries.write().remove(resource_path).is_some()
	}
}

impl CodeSource for MemorySource {
	fn fetch(&self, resource_path: &str) -> io::Result<Option<Vec<u8>>> {
		Ok(self.entries.read().get(resource_path.trim_start_matches('/')).map(|b| b.to_vec()))
	}
}
