//! Per-epoch loader and its change listeners.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use sprig_classpath::{ClassName, ClassPath, LoadError, LoadedClass};
use sprig_vfs::{FileEvent, FileHandle, FileId, Repository, RepositoryEvent, Subscription};

use crate::cache::CacheInner;

#[derive(Default)]
struct Watches {
	retired: bool,
	repository: Option<Subscription>,
	files: FxHashMap<FileId, Subscription>,
}

/// Class loader for one epoch of the [`crate::ResolutionCache`].
///
/// Classes whose class file is found in the repository are read through the
/// parent [`ClassPath`] but defined by this instance, which then listens to
/// that file, so a retired instance's definitions never leak into the next
/// epoch. Classes the repository does not know are resolved parent-first and
/// shared by every epoch.
pub struct SystemClassLoader {
	epoch: u64,
	parent: Option<Arc<ClassPath>>,
	repository: Arc<dyn Repository>,
	cache: Weak<CacheInner>,
	this: Weak<SystemClassLoader>,
	defined: Mutex<FxHashMap<ClassName, Arc<LoadedClass>>>,
	retired: AtomicBool,
	watches: Mutex<Watches>,
}

impl SystemClassLoader {
	pub(crate) fn new(epoch: u64, parent: Option<Arc<ClassPath>>, repository: Arc<dyn Repository>, cache: Weak<CacheInner>) -> Arc<Self> {
		Arc::new_cyclic(|this| Self {
			epoch,
			parent,
			repository,
			cache,
			this: this.clone(),
			defined: Mutex::new(FxHashMap::default()),
			retired: AtomicBool::new(false),
			watches: Mutex::new(Watches::default()),
		})
	}

	pub fn epoch(&self) -> u64 {
		self.epoch
	}

	pub fn parent(&self) -> Option<&Arc<ClassPath>> {
		self.parent.as_ref()
	}

	/// Whether this instance has been invalidated. Terminal.
	pub fn is_retired(&self) -> bool {
		self.retired.load(Ordering::Acquire)
	}

	/// Whether this instance is the one installed in its cache.
	pub fn is_current(&self) -> bool {
		self.cache.upgrade().is_some_and(|cache| cache.is_current(self))
	}

	/// Number of repository files this instance listens to.
	pub fn watched_files(&self) -> usize {
		self.watches.lock().files.len()
	}

	pub fn is_watching(&self, file: FileId) -> bool {
		self.watches.lock().files.contains_key(&file)
	}

	/// Number of classes defined by this instance rather than its parent.
	pub fn defined_classes(&self) -> usize {
		self.defined.lock().len()
	}

	pub fn load_class_str(&self, name: &str) -> Result<Arc<LoadedClass>, LoadError> {
		self.load_class(&ClassName::new(name)?)
	}

	/// Resolves `name`.
	///
	/// Classes with a class file in the repository are defined by this
	/// instance and watched. Everything else is delegated to the parent class
	/// path, whose definitions outlive the epoch.
	pub fn load_class(&self, name: &ClassName) -> Result<Arc<LoadedClass>, LoadError> {
		if let Some(class) = self.defined.lock().get(name) {
			return Ok(Arc::clone(class));
		}

		let Some(parent) = &self.parent else {
			return Err(LoadError::ClassNotFound(name.clone()));
		};
		let Some(file) = self.repository.find(name.package(), name.simple_name(), "class") else {
			tracing::trace!(class = %name, "class has no repository file, delegating to parent");
			return parent.load_class(name);
		};

		let Some(resource) = parent.find_resource(&name.resource_path())? else {
			tracing::trace!(class = %name, epoch = self.epoch, "class not found");
			return Err(LoadError::ClassNotFound(name.clone()));
		};
		let class = Arc::new(LoadedClass {
			name: name.clone(),
			origin: resource.url,
			bytes: resource.bytes.into(),
			epoch: self.epoch,
		});
		let class = Arc::clone(self.defined.lock().entry(name.clone()).or_insert(class));
		self.watch(&file);
		Ok(class)
	}

	fn watch(&self, file: &FileHandle) {
		let id = file.id();
		{
			let watches = self.watches.lock();
			if watches.retired || watches.files.contains_key(&id) {
				return;
			}
		}

		let weak = self.this.clone();
		let subscription = file.subscribe(Arc::new(move |event: &FileEvent| {
			if let Some(loader) = weak.upgrade() {
				loader.on_file_event(event);
			}
		}));

		let rejected = {
			let mut watches = self.watches.lock();
			if watches.retired || watches.files.contains_key(&id) {
				Some(subscription)
			} else {
				watches.files.insert(id, subscription);
				None
			}
		};
		drop(rejected);
		tracing::trace!(file = %id, path = %file.path(), epoch = self.epoch, "watching class file");
	}

	pub(crate) fn attach_repository(&self, subscription: Subscription) {
		let rejected = {
			let mut watches = self.watches.lock();
			if watches.retired {
				Some(subscription)
			} else {
				watches.repository = Some(subscription);
				None
			}
		};
		drop(rejected);
	}

	pub(crate) fn on_repository_event(&self, event: &RepositoryEvent) {
		tracing::trace!(?event, epoch = self.epoch, "repository changed");
		self.retire();
	}

	fn on_file_event(&self, event: &FileEvent) {
		if event.kind.retires_loader() {
			tracing::trace!(file = %event.file, path = %event.path, kind = ?event.kind, epoch = self.epoch, "class file changed");
			self.retire();
		} else if !self.is_current() {
			let stale = self.watches.lock().files.remove(&event.file);
			drop(stale);
		}
	}

	/// Marks the instance stale, empties the cache slot if it still holds this
	/// instance, and disposes every subscription. Idempotent.
	pub(crate) fn retire(&self) {
		let (repository, files) = {
			let mut watches = self.watches.lock();
			if watches.retired {
				return;
			}
			watches.retired = true;
			self.retired.store(true, Ordering::Release);
			(watches.repository.take(), mem::take(&mut watches.files))
		};
		let cleared = self.cache.upgrade().is_some_and(|cache| cache.clear_if_current(self));
		tracing::debug!(epoch = self.epoch, cleared, files = files.len(), "system class loader retired");
		drop(repository);
		drop(files);
	}
}

impl fmt::Debug for SystemClassLoader {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SystemClassLoader")
			.field("epoch", &self.epoch)
			.field("retired", &self.is_retired())
			.field("defined", &self.defined_classes())
			.field("watched_files", &self.watched_files())
			.finish()
	}
}
