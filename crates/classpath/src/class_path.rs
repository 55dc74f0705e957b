//! Live composite search path.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use url::Url;

use crate::source::{CodeSource, DirectorySource};
use crate::{ClassName, ClassPathError, LoadError};

/// Canonical form of a code location URL: directory URLs always end in `/`.
///
/// `file:///opt/mods` and `file:///opt/mods/` name the same location.
pub fn normalize_location(url: &Url) -> Url {
	let mut url = url.clone();
	if !url.cannot_be_a_base() && !url.path().ends_with('/') {
		let path = format!("{}/", url.path());
		url.set_path(&path);
	}
	url
}

/// One entry of the search path.
#[derive(Clone)]
pub struct CodeLocation {
	url: Url,
	source: Arc<dyn CodeSource>,
}

impl CodeLocation {
	/// Opens the location named by `url`.
	///
	/// Only `file` URLs naming an existing directory are supported; other
	/// backends can be attached with [`CodeLocation::with_source`].
	pub fn open(url: &Url) -> Result<Self, ClassPathError> {
		let url = normalize_location(url);
		if url.scheme() != "file" {
			return Err(ClassPathError::UnsupportedScheme(url));
		}
		let Ok(root) = url.to_file_path() else {
			return Err(ClassPathError::UnsupportedScheme(url));
		};
		match std::fs::metadata(&root) {
			Ok(meta) if meta.is_dir() => Ok(Self {
				url,
				source: Arc::new(DirectorySource::new(root)),
			}),
			Ok(_) => Err(ClassPathError::NotADirectory(url)),
			Err(source) => Err(ClassPathError::Io { url, source }),
		}
	}

	pub fn with_source(url: &Url, source: Arc<dyn CodeSource>) -> Self {
		Self {
			url: normalize_location(url),
			source,
		}
	}

	pub fn url(&self) -> &Url {
		&self.url
	}
}

impl fmt::Debug for CodeLocation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CodeLocation")
			.field("url", &self.url.as_str())
			.field("source", &self.source)
			.finish()
	}
}

/// Bytes of a resource together with where they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
	/// URL of the resource itself.
	pub url: Url,
	/// Code location that served it.
	pub location: Url,
	pub bytes: Vec<u8>,
}

/// A class defined by a loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedClass {
	pub name: ClassName,
	/// URL of the class file the definition was read from.
	pub origin: Url,
	pub bytes: Arc<[u8]>,
	/// Epoch of the defining loader; 0 when defined by a [`ClassPath`].
	pub epoch: u64,
}

/// Ordered, append-only composite of code locations.
///
/// Lookups walk the locations in insertion order and the first hit wins. The
/// search path lock is only held to snapshot the entries; resource reads run
/// without it.
#[derive(Default)]
pub struct ClassPath {
	entries: RwLock<Vec<CodeLocation>>,
	defined: Mutex<FxHashMap<ClassName, Arc<LoadedClass>>>,
}

impl ClassPath {
	/// Opens every URL in order. Duplicates are skipped.
	pub fn new<'a>(urls: impl IntoIterator<Item = &'a Url>) -> Result<Self, ClassPathError> {
		let class_path = Self::default();
		for url in urls {
			class_path.append(url)?;
		}
		Ok(class_path)
	}

	/// Appends a location to the live search path.
	///
	/// Returns `Ok(false)` if the location is already present.
	pub fn append(&self, url: &Url) -> Result<bool, ClassPathError> {
		if self.contains(url) {
			return Ok(false);
		}
		let location = CodeLocation::open(url)?;
		Ok(self.push(location))
	}

	/// Appends a location served by a custom backend.
	pub fn append_source(&self, url: &Url, source: Arc<dyn CodeSource>) -> bool {
		self.push(CodeLocation::with_source(url, source))
	}

	fn push(&self, location: CodeLocation) -> bool {
		let mut entries = self.entries.write();
		if entries.iter().any(|e| e.url == location.url) {
			return false;
		}
		tracing::debug!(location = %location.url, "class path entry appended");
		entries.push(location);
		true
	}

	pub fn contains(&self, url: &Url) -> bool {
		let url = normalize_location(url);
		self.entries.read().iter().any(|e| e.url == url)
	}

	/// Locations in search order.
	pub fn urls(&self) -> Vec<Url> {
		self.entries.read().iter().map(|e| e.url.clone()).collect()
	}

	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Reads the current bytes of `resource_path` from the first location that has it.
	pub fn find_resource(&self, resource_path: &str) -> Result<Option<Resource>, ClassPathError> {
		let entries: Vec<CodeLocation> = self.entries.read().clone();
		let resource_path = resource_path.trim_start_matches('/');
		for entry in entries {
			let fetched = entry.source.fetch(resource_path).map_err(|source| ClassPathError::Io {
				url: join(&entry.url, resource_path),
				source,
			})?;
			if let Some(bytes) = fetched {
				return Ok(Some(Resource {
					url: join(&entry.url, resource_path),
					location: entry.url,
					bytes,
				}));
			}
		}
		Ok(None)
	}

	/// Defines `name` from the search path, or returns the earlier definition.
	///
	/// Definitions are never dropped: a location appended later that also
	/// provides `name` does not shadow a class that was already defined.
	pub fn load_class(&self, name: &ClassName) -> Result<Arc<LoadedClass>, LoadError> {
		if let Some(class) = self.defined.lock().get(name) {
			return Ok(Arc::clone(class));
		}
		let Some(resource) = self.find_resource(&name.resource_path())? else {
			tracing::trace!(class = %name, "class not found on class path");
			return Err(LoadError::ClassNotFound(name.clone()));
		};
		let class = Arc::new(LoadedClass {
			name: name.clone(),
			origin: resource.url,
			bytes: resource.bytes.into(),
			epoch: 0,
		});
		let mut defined = self.defined.lock();
		let winner = defined.entry(name.clone()).or_insert(class);
		Ok(Arc::clone(winner))
	}

	/// Whether `name` has already been defined by this instance.
	pub fn is_defined(&self, name: &ClassName) -> bool {
		self.defined.lock().contains_key(name)
	}
}

impl fmt::Debug for ClassPath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ClassPath")
			.field("entries", &self.urls().iter().map(Url::as_str).collect::<Vec<_>>())
			.field("defined", &self.defined.lock().len())
			.finish()
	}
}

fn join(location: &Url, resource_path: &str) -> Url {
	location.join(resource_path).unwrap_or_else(|_| location.clone())
}
