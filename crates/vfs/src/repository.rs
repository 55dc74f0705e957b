//! Repository contracts and the mounted file system pool.

use std::fmt;
use std::io;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::bus::{EventBus, Listener, Subscription};
use crate::error::{Result, VfsError};
use crate::event::{FileEvent, FileId, RepositoryEvent};

/// A file or folder inside a mounted file system.
pub trait FileObject: Send + Sync + fmt::Debug {
	/// Stable identity, unchanged across renames.
	fn id(&self) -> FileId;

	/// Resource path relative to the file system root (`a/b/C.class`).
	fn path(&self) -> String;

	fn read(&self) -> io::Result<Vec<u8>>;

	/// Attaches a listener for events on this file.
	fn subscribe(&self, listener: Listener<FileEvent>) -> Subscription;
}

pub type FileHandle = Arc<dyn FileObject>;

/// One mounted tree of files.
pub trait FileSystem: Send + Sync + fmt::Debug {
	/// Name under which the file system is mounted in a pool.
	fn name(&self) -> &str;

	/// Looks up a file by resource path.
	fn find(&self, resource_path: &str) -> Option<FileHandle>;
}

/// Source of files backing user and project code.
pub trait Repository: Send + Sync {
	/// Attaches a listener for structural changes of the repository.
	fn subscribe(&self, listener: Listener<RepositoryEvent>) -> Subscription;

	/// Finds `simple_name.extension` in `package` (dotted, `""` for the default package).
	fn find(&self, package: &str, simple_name: &str, extension: &str) -> Option<FileHandle>;
}

/// Builds the resource path of `simple_name.extension` inside a dotted package.
pub fn resource_path(package: &str, simple_name: &str, extension: &str) -> String {
	let mut path = String::with_capacity(package.len() + simple_name.len() + extension.len() + 2);
	for segment in package.split('.').filter(|s| !s.is_empty()) {
		path.push_str(segment);
		path.push('/');
	}
	path.push_str(simple_name);
	if !extension.is_empty() {
		path.push('.');
		path.push_str(extension);
	}
	path
}

/// Ordered pool of mounted file systems.
///
/// Lookups search file systems in pool order; the first hit wins.
#[derive(Debug, Default)]
pub struct FileSystemPool {
	systems: RwLock<Vec<Arc<dyn FileSystem>>>,
	events: EventBus<RepositoryEvent>,
}

impl FileSystemPool {
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends `fs` to the pool and announces it.
	pub fn mount(&self, fs: Arc<dyn FileSystem>) -> Result<()> {
		let name = fs.name().to_string();
		{
			let mut systems = self.systems.write();
			if systems.iter().any(|existing| existing.name() == name) {
				return Err(VfsError::AlreadyMounted(name));
			}
			systems.push(fs);
		}
		tracing::debug!(fs = %name, "file system mounted");
		self.events.emit(&RepositoryEvent::FileSystemAdded { name });
		Ok(())
	}

	/// Removes the file system named `name` and returns it.
	pub fn unmount(&self, name: &str) -> Result<Arc<dyn FileSystem>> {
		let removed = {
			let mut systems = self.systems.write();
			let idx = systems
				.iter()
				.position(|fs| fs.name() == name)
				.ok_or_else(|| VfsError::NotMounted(name.to_string()))?;
			systems.remove(idx)
		};
		tracing::debug!(fs = %name, "file system unmounted");
		self.events.emit(&RepositoryEvent::FileSystemRemoved { name: name.to_string() });
		Ok(removed)
	}

	/// Reorders the pool. `names` must list every mounted file system exactly once.
	pub fn reorder(&self, names: &[&str]) -> Result<()> {
		{
			let mut systems = self.systems.write();
			let current: Vec<String> = systems.iter().map(|fs| fs.name().to_string()).collect();
			let is_permutation = names.len() == current.len() && current.iter().all(|n| names.iter().filter(|m| **m == n.as_str()).count() == 1);
			if !is_permutation {
				return Err(VfsError::InvalidOrder {
					expected: current,
					actual: names.iter().map(|n| n.to_string()).collect(),
				});
			}
			let mut reordered = Vec::with_capacity(systems.len());
			for name in names {
				if let Some(fs) = systems.iter().find(|fs| fs.name() == *name) {
					reordered.push(Arc::clone(fs));
				}
			}
			*systems = reordered;
		}
		tracing::debug!(order = ?names, "file system pool reordered");
		self.events.emit(&RepositoryEvent::PoolReordered);
		Ok(())
	}

	/// Names of the mounted file systems in pool order.
	pub fn file_systems(&self) -> Vec<String> {
		self.systems.read().iter().map(|fs| fs.name().to_string()).collect()
	}

	pub fn listener_count(&self) -> usize {
		self.events.listener_count()
	}
}

impl Repository for FileSystemPool {
	fn subscribe(&self, listener: Listener<RepositoryEvent>) -> Subscription {
		self.events.subscribe(listener)
	}

	fn find(&self, package: &str, simple_name: &str, extension: &str) -> Option<FileHandle> {
		let path = resource_path(package, simple_name, extension);
		let systems: Vec<Arc<dyn FileSystem>> = self.systems.read().clone();
		systems.iter().find_map(|fs| fs.find(&path))
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use pretty_assertions::assert_eq;

	use super::*;
	use crate::MemoryFileSystem;

	fn memory(name: &str, files: &[(&str, &[u8])]) -> Arc<MemoryFileSystem> {
		let fs = Arc::new(MemoryFileSystem::new(name));
		for (path, data) in files {
			fs.write(path, data.to_vec()).expect("write should succeed");
		}
		fs
	}

	fn record(pool: &FileSystemPool) -> (Arc<parking_lot::Mutex<Vec<RepositoryEvent>>>, Subscription) {
		let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
		let sink = Arc::clone(&seen);
		let sub = pool.subscribe(Arc::new(move |event: &RepositoryEvent| sink.lock().push(event.clone())));
		(seen, sub)
	}

	#[test]
	fn resource_path_joins_package_segments() {
		assert_eq!(resource_path("org.acme", "Widget", "class"), "org/acme/Widget.class");
		assert_eq!(resource_path("", "Main", "class"), "Main.class");
		assert_eq!(resource_path("a", "README", ""), "a/README");
	}

	#[test]
	fn mount_unmount_reorder_emit_events() {
		let pool = FileSystemPool::new();
		let (seen, _sub) = record(&pool);

		pool.mount(memory("a", &[])).unwrap();
		pool.mount(memory("b", &[])).unwrap();
		pool.reorder(&["b", "a"]).unwrap();
		pool.unmount("a").unwrap();

		assert_eq!(
			*seen.lock(),
			vec![
				RepositoryEvent::FileSystemAdded { name: "a".into() },
				RepositoryEvent::FileSystemAdded { name: "b".into() },
				RepositoryEvent::PoolReordered,
				RepositoryEvent::FileSystemRemoved { name: "a".into() },
			]
		);
		assert_eq!(pool.file_systems(), vec!["b".to_string()]);
	}

	#[test]
	fn rejected_mutations_emit_nothing() {
		let pool = FileSystemPool::new();
		pool.mount(memory("a", &[])).unwrap();
		let hits = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&hits);
		let _sub = pool.subscribe(Arc::new(move |_: &RepositoryEvent| {
			counter.fetch_add(1, Ordering::SeqCst);
		}));

		assert!(matches!(pool.mount(memory("a", &[])), Err(VfsError::AlreadyMounted(_))));
		assert!(matches!(pool.unmount("zzz"), Err(VfsError::NotMounted(_))));
		assert!(matches!(pool.reorder(&["a", "a"]), Err(VfsError::InvalidOrder { .. })));
		assert!(matches!(pool.reorder(&[]), Err(VfsError::InvalidOrder { .. })));
		assert_eq!(hits.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn find_respects_pool_order() {
		let pool = FileSystemPool::new();
		pool.mount(memory("first", &[("org/acme/Widget.class", b"one")])).unwrap();
		pool.mount(memory("second", &[("org/acme/Widget.class", b"two"), ("org/acme/Gadget.class", b"g")]))
			.unwrap();

		let widget = pool.find("org.acme", "Widget", "class").expect("widget should be found");
		assert_eq!(widget.read().unwrap(), b"one");
		assert!(pool.find("org.acme", "Gadget", "class").is_some());
		assert!(pool.find("org.acme", "Missing", "class").is_none());

		pool.reorder(&["second", "first"]).unwrap();
		let widget = pool.find("org.acme", "Widget", "class").unwrap();
		assert_eq!(widget.read().unwrap(), b"two");
	}
}
