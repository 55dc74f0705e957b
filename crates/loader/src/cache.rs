//! Repository-coherent slot for the current system class loader.
//!
//! # Mental model
//!
//! * The slot holds at most one [`SystemClassLoader`]. The period during which
//!   one instance stays installed is an *epoch*.
//! * Readers load the slot without locking. A miss (empty slot or retired
//!   instance) takes the construction lock, re-checks, and builds exactly one
//!   new instance.
//! * Instances retire themselves when the repository or a file they defined a
//!   class from changes. Retiring clears the slot only if the retiring
//!   instance is still the installed one.
//!
//! # Invariants
//!
//! * At most one instance is constructed per epoch, even under concurrent
//!   first access.
//! * Clearing the slot is a single atomic swap or compare-and-swap; readers
//!   see either the previous instance or an empty slot.
//! * A retired instance holds no subscriptions.
//!
//! # Lifecycle
//!
//! 1. `current_class_loader` on an empty slot constructs an instance and
//!    subscribes it to repository events.
//! 2. Resolving a class attributed to a repository file subscribes the
//!    instance to that file.
//! 3. A structural repository event, a retiring file event, `reset_loader`,
//!    `bind_parent` or `create_class_loader` retires the instance.
//! 4. The next `current_class_loader` call starts a new epoch.

use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use sprig_classpath::ClassPath;
use sprig_vfs::{Repository, RepositoryEvent};

use crate::system_loader::SystemClassLoader;

/// Monotonic epoch counter for constructed loader instances.
#[derive(Debug, Default)]
struct EpochClock {
	last: AtomicU64,
}

impl EpochClock {
	/// Returns the next epoch, starting at 1.
	fn next(&self) -> u64 {
		self.last.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
	}

	fn current(&self) -> u64 {
		self.last.load(Ordering::Acquire)
	}
}

pub(crate) struct CacheInner {
	repository: Arc<dyn Repository>,
	parent: ArcSwapOption<ClassPath>,
	current: ArcSwapOption<SystemClassLoader>,
	construct: Mutex<()>,
	epochs: EpochClock,
}

impl CacheInner {
	/// Empties the slot if it still holds `loader`. Returns whether it did.
	pub(crate) fn clear_if_current(&self, loader: &SystemClassLoader) -> bool {
		let expected: *const SystemClassLoader = loader;
		let previous = self.current.compare_and_swap(expected, None::<Arc<SystemClassLoader>>);
		matches!(&*previous, Some(prev) if ptr::eq(Arc::as_ptr(prev), loader))
	}

	pub(crate) fn is_current(&self, loader: &SystemClassLoader) -> bool {
		matches!(&*self.current.load(), Some(cur) if ptr::eq(Arc::as_ptr(cur), loader))
	}
}

/// Lazily constructed, event-invalidated system class loader.
///
/// Cloning yields another handle to the same slot.
#[derive(Clone)]
pub struct ResolutionCache {
	inner: Arc<CacheInner>,
}

impl ResolutionCache {
	/// Creates an empty cache over `repository`. No parent is bound yet, so
	/// loaders built before [`ResolutionCache::bind_parent`] resolve nothing.
	pub fn new(repository: Arc<dyn Repository>) -> Self {
		Self {
			inner: Arc::new(CacheInner {
				repository,
				parent: ArcSwapOption::empty(),
				current: ArcSwapOption::empty(),
				construct: Mutex::new(()),
				epochs: EpochClock::default(),
			}),
		}
	}

	/// Returns the installed loader, constructing one if the slot is empty.
	pub fn current_class_loader(&self) -> Arc<SystemClassLoader> {
		if let Some(loader) = self.installed() {
			return loader;
		}

		let _construct = self.inner.construct.lock();
		if let Some(loader) = self.installed() {
			return loader;
		}
		let loader = self.construct();
		self.inner.current.store(Some(Arc::clone(&loader)));
		if loader.is_retired() {
			// Retired between subscribing and publication; the next call rebuilds.
			self.inner.clear_if_current(&loader);
		}
		loader
	}

	/// Retires the installed loader and installs a freshly constructed one.
	pub fn create_class_loader(&self) -> Arc<SystemClassLoader> {
		let _construct = self.inner.construct.lock();
		let loader = self.construct();
		let previous = self.inner.current.swap(Some(Arc::clone(&loader)));
		if let Some(previous) = previous {
			previous.retire();
		}
		if loader.is_retired() {
			self.inner.clear_if_current(&loader);
		}
		loader
	}

	/// Forces the next [`ResolutionCache::current_class_loader`] call to build a new loader.
	pub fn reset_loader(&self) {
		let previous = {
			let _construct = self.inner.construct.lock();
			self.inner.current.swap(None)
		};
		if let Some(previous) = previous {
			tracing::debug!(epoch = previous.epoch(), "resolution cache reset");
			previous.retire();
		}
	}

	/// Sets the composite loader that new instances delegate to, then resets.
	pub fn bind_parent(&self, parent: Arc<ClassPath>) {
		self.inner.parent.store(Some(parent));
		self.reset_loader();
	}

	pub fn parent(&self) -> Option<Arc<ClassPath>> {
		self.inner.parent.load_full()
	}

	/// The installed loader, if any, without constructing one.
	pub fn installed(&self) -> Option<Arc<SystemClassLoader>> {
		self.inner.current.load_full().filter(|loader| !loader.is_retired())
	}

	/// Number of loader instances constructed so far.
	pub fn epoch(&self) -> u64 {
		self.inner.epochs.current()
	}

	pub fn repository(&self) -> &Arc<dyn Repository> {
		&self.inner.repository
	}

	fn construct(&self) -> Arc<SystemClassLoader> {
		let epoch = self.inner.epochs.next();
		let loader = SystemClassLoader::new(
			epoch,
			self.inner.parent.load_full(),
			Arc::clone(&self.inner.repository),
			Arc::downgrade(&self.inner),
		);

		let weak = Arc::downgrade(&loader);
		let subscription = self.inner.repository.subscribe(Arc::new(move |event: &RepositoryEvent| {
			if let Some(loader) = weak.upgrade() {
				loader.on_repository_event(event);
			}
		}));
		loader.attach_repository(subscription);
		tracing::debug!(epoch, "system class loader constructed");
		loader
	}
}

impl std::fmt::Debug for ResolutionCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ResolutionCache")
			.field("epoch", &self.epoch())
			.field("installed", &self.installed().map(|l| l.epoch()))
			.finish()
	}
}
