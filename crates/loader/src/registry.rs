//! Installed module locations and the composite class path built from them.

use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use sprig_classpath::{ClassPath, normalize_location};
use url::Url;

use crate::cache::ResolutionCache;
use crate::error::RegistryError;

struct RegistryState {
	class_path: Arc<ClassPath>,
	locations: IndexSet<Url>,
	ignored: FxHashSet<Url>,
}

/// Set of installed code locations backing one [`ResolutionCache`].
///
/// The composite [`ClassPath`] is extended in place by
/// [`LoaderRegistry::install`]. Uninstalling only marks a location ignored:
/// classes already defined from it stay defined, and the location stays on
/// the search path until [`LoaderRegistry::rebuild`].
pub struct LoaderRegistry {
	cache: ResolutionCache,
	state: Mutex<Option<RegistryState>>,
}

impl LoaderRegistry {
	pub fn new(cache: ResolutionCache) -> Self {
		Self { cache, state: Mutex::new(None) }
	}

	/// Builds the composite class path and binds it to the cache.
	///
	/// Runs once. A location that cannot be opened leaves the registry
	/// uninitialized.
	///
	/// # Panics
	///
	/// Panics if the registry is already initialized.
	pub fn initialize<'a>(&self, locations: impl IntoIterator<Item = &'a Url>) -> Result<(), RegistryError> {
		let mut state = self.state.lock();
		if state.is_some() {
			drop(state);
			already_initialized();
		}

		let locations: IndexSet<Url> = locations.into_iter().map(normalize_location).collect();
		let class_path = Arc::new(ClassPath::new(&locations)?);
		self.cache.bind_parent(Arc::clone(&class_path));
		tracing::info!(locations = locations.len(), "loader registry initialized");

		*state = Some(RegistryState {
			class_path,
			locations,
			ignored: FxHashSet::default(),
		});
		Ok(())
	}

	pub fn is_initialized(&self) -> bool {
		self.state.lock().is_some()
	}

	/// Makes `location` visible to resolution. `None` does nothing.
	///
	/// # Panics
	///
	/// Panics if the registry is not initialized.
	pub fn install(&self, location: Option<&Url>) -> Result<(), RegistryError> {
		let Some(location) = location else {
			return Ok(());
		};
		let location = normalize_location(location);

		let mut guard = self.state.lock();
		let state = guard.as_mut().unwrap_or_else(|| uninitialized("install"));
		if state.ignored.remove(&location) {
			tracing::debug!(%location, "code location reinstalled");
		} else if !state.locations.contains(&location) {
			state.class_path.append(&location)?;
			state.locations.insert(location.clone());
			tracing::debug!(%location, "code location installed");
		}
		self.cache.reset_loader();
		Ok(())
	}

	/// Marks `location` ignored. `None` does nothing.
	///
	/// The location is not removed from the live class path.
	///
	/// # Panics
	///
	/// Panics if the registry is not initialized.
	pub fn uninstall(&self, location: Option<&Url>) {
		let Some(location) = location else {
			return;
		};
		let location = normalize_location(location);

		let mut guard = self.state.lock();
		let state = guard.as_mut().unwrap_or_else(|| uninitialized("uninstall"));
		if state.locations.contains(&location) && state.ignored.insert(location.clone()) {
			tracing::debug!(%location, "code location uninstalled");
		}
		self.cache.reset_loader();
	}

	/// The live composite class path.
	///
	/// # Panics
	///
	/// Panics if the registry is not initialized.
	pub fn current_loader(&self) -> Arc<ClassPath> {
		let guard = self.state.lock();
		let state = guard.as_ref().unwrap_or_else(|| uninitialized("current_loader"));
		Arc::clone(&state.class_path)
	}

	/// Installed locations in installation order, ignored ones included.
	pub fn locations(&self) -> Vec<Url> {
		self.state.lock().as_ref().map(|s| s.locations.iter().cloned().collect()).unwrap_or_default()
	}

	/// Locations uninstalled since the last rebuild, sorted.
	pub fn ignored(&self) -> Vec<Url> {
		let mut ignored: Vec<Url> = self.state.lock().as_ref().map(|s| s.ignored.iter().cloned().collect()).unwrap_or_default();
		ignored.sort();
		ignored
	}

	pub fn is_ignored(&self, location: &Url) -> bool {
		let location = normalize_location(location);
		self.state.lock().as_ref().is_some_and(|s| s.ignored.contains(&location))
	}

	/// Replaces the class path with a fresh one over the non-ignored
	/// locations, forgetting ignored ones and every class defined so far.
	///
	/// # Panics
	///
	/// Panics if the registry is not initialized.
	pub fn rebuild(&self) -> Result<(), RegistryError> {
		let mut guard = self.state.lock();
		let state = guard.as_mut().unwrap_or_else(|| uninitialized("rebuild"));

		let locations: IndexSet<Url> = state.locations.iter().filter(|l| !state.ignored.contains(*l)).cloned().collect();
		let class_path = Arc::new(ClassPath::new(&locations)?);
		let dropped = state.ignored.len();

		state.class_path = Arc::clone(&class_path);
		state.locations = locations;
		state.ignored.clear();
		self.cache.bind_parent(class_path);
		tracing::debug!(locations = state.locations.len(), dropped, "loader registry rebuilt");
		Ok(())
	}
}

impl std::fmt::Debug for LoaderRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LoaderRegistry")
			.field("initialized", &self.is_initialized())
			.field("locations", &self.locations().len())
			.field("ignored", &self.ignored().len())
			.finish()
	}
}

#[cold]
fn uninitialized(op: &str) -> ! {
	panic!("LoaderRegistry::{op} called before initialize")
}

#[cold]
fn already_initialized() -> ! {
	panic!("LoaderRegistry::initialize called twice")
}
