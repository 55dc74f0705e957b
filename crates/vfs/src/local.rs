//! File system over a directory on disk.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::bus::{EventBus, Listener, Subscription};
use crate::error::{Result, VfsError};
use crate::event::{FileEvent, FileEventKind, FileId};
use crate::repository::{FileHandle, FileObject, FileSystem};

/// Modification stamp used to detect changes between refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
	modified: Option<SystemTime>,
	len: u64,
}

impl Stamp {
	fn of(path: &Path) -> io::Result<Self> {
		let meta = std::fs::metadata(path)?;
		Ok(Self {
			modified: meta.modified().ok(),
			len: meta.len(),
		})
	}
}

#[derive(Debug)]
struct LocalFile {
	id: FileId,
	resource: RwLock<String>,
	full: RwLock<PathBuf>,
	stamp: Mutex<Stamp>,
	events: EventBus<FileEvent>,
}

impl LocalFile {
	fn notify(&self, kind: FileEventKind) {
		let event = FileEvent {
			file: self.id,
			path: self.resource.read().clone(),
			kind,
		};
		tracing::trace!(file = %event.file, path = %event.path, kind = ?event.kind, "file event");
		self.events.emit(&event);
	}

	fn restamp(&self) {
		if let Ok(stamp) = Stamp::of(&self.full.read()) {
			*self.stamp.lock() = stamp;
		}
	}
}

impl FileObject for LocalFile {
	fn id(&self) -> FileId {
		self.id
	}

	fn path(&self) -> String {
		self.resource.read().clone()
	}

	fn read(&self) -> io::Result<Vec<u8>> {
		let full = self.full.read().clone();
		std::fs::read(full)
	}

	fn subscribe(&self, listener: Listener<FileEvent>) -> Subscription {
		self.events.subscribe(listener)
	}
}

/// Files found changed or deleted by [`LocalFileSystem::refresh`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshReport {
	pub changed: Vec<String>,
	pub deleted: Vec<String>,
}

impl RefreshReport {
	pub fn is_empty(&self) -> bool {
		self.changed.is_empty() && self.deleted.is_empty()
	}
}

/// What a watcher notification means for handed-out handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiskChange {
	Modified,
	Metadata,
	Removed,
	/// Moved away; the destination is unknown.
	MovedOut,
	/// Moved, with `[from, to]` paths.
	Moved,
	/// A rename notification without a direction.
	Renamed,
}

fn classify(kind: &EventKind) -> Option<DiskChange> {
	match kind {
		EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => Some(DiskChange::Moved),
		EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(DiskChange::MovedOut),
		EventKind::Modify(ModifyKind::Name(_)) => Some(DiskChange::Renamed),
		EventKind::Modify(ModifyKind::Metadata(_)) => Some(DiskChange::Metadata),
		EventKind::Modify(_) => Some(DiskChange::Modified),
		EventKind::Remove(_) => Some(DiskChange::Removed),
		_ => None,
	}
}

/// Handle table shared with the watcher thread.
#[derive(Debug)]
struct LocalTree {
	name: String,
	root: PathBuf,
	handles: Mutex<FxHashMap<String, Arc<LocalFile>>>,
}

impl LocalTree {
	/// Resource path of an absolute path below the root.
	fn resource_of(&self, path: &Path) -> Option<String> {
		let relative = path.strip_prefix(&self.root).ok()?;
		let mut segments = Vec::new();
		for component in relative.components() {
			let Component::Normal(segment) = component else {
				return None;
			};
			segments.push(segment.to_str()?);
		}
		(!segments.is_empty()).then(|| segments.join("/"))
	}

	/// Removes the handles at `resource` and below it.
	fn take_under(&self, resource: &str) -> Vec<(String, Arc<LocalFile>)> {
		let prefix = format!("{resource}/");
		let mut handles = self.handles.lock();
		let keys: Vec<String> = handles.keys().filter(|k| k.as_str() == resource || k.starts_with(&prefix)).cloned().collect();
		let mut taken: Vec<_> = keys.into_iter().filter_map(|k| handles.remove(&k).map(|file| (k, file))).collect();
		taken.sort_by(|a, b| a.0.cmp(&b.0));
		taken
	}

	fn apply(&self, event: &Event) {
		let Some(change) = classify(&event.kind) else {
			return;
		};
		match change {
			DiskChange::Moved => {
				if let [from, to] = event.paths.as_slice() {
					self.moved(from, to);
				}
			}
			DiskChange::MovedOut => {
				for path in &event.paths {
					self.moved_out(path);
				}
			}
			DiskChange::Renamed => {
				for path in event.paths.iter().filter(|p| !p.exists()) {
					self.moved_out(path);
				}
			}
			DiskChange::Removed => {
				for path in &event.paths {
					self.removed(path);
				}
			}
			DiskChange::Modified | DiskChange::Metadata => {
				for path in &event.paths {
					let Some(resource) = self.resource_of(path) else { continue };
					let Some(file) = self.handles.lock().get(&resource).cloned() else { continue };
					if change == DiskChange::Modified {
						file.restamp();
						file.notify(FileEventKind::Changed);
					} else {
						file.notify(FileEventKind::AttributeChanged { name: "metadata".into() });
					}
				}
			}
		}
	}

	fn removed(&self, path: &Path) {
		let Some(resource) = self.resource_of(path) else { return };
		for (_, file) in self.take_under(&resource) {
			file.notify(FileEventKind::Deleted);
		}
	}

	fn moved_out(&self, path: &Path) {
		let Some(resource) = self.resource_of(path) else { return };
		for (from, file) in self.take_under(&resource) {
			file.notify(FileEventKind::Renamed { from });
		}
	}

	fn moved(&self, from: &Path, to: &Path) {
		let (Some(from), Some(to)) = (self.resource_of(from), self.resource_of(to)) else {
			// Moved across the root boundary.
			return self.moved_out(from);
		};
		let taken = self.take_under(&from);
		{
			let mut handles = self.handles.lock();
			for (old, file) in &taken {
				let moved = format!("{to}{}", &old[from.len()..]);
				*file.full.write() = self.root.join(&moved);
				*file.resource.write() = moved.clone();
				handles.insert(moved, Arc::clone(file));
			}
		}
		for (old, file) in taken {
			file.notify(FileEventKind::Renamed { from: old });
		}
	}
}

/// Read-only view of a directory.
///
/// Handles are cached per resource path so repeated lookups return the same
/// identity. [`LocalFileSystem::watch`] starts a native watcher that turns
/// modifications, removals and renames of handed-out files into `Changed`,
/// `Deleted` and `Renamed` events, delivered on the watcher thread.
/// [`LocalFileSystem::refresh`] rescans explicitly.
pub struct LocalFileSystem {
	tree: Arc<LocalTree>,
	watcher: Mutex<Option<RecommendedWatcher>>,
}

impl LocalFileSystem {
	/// Opens `root`, which must be an existing directory.
	pub fn open(name: impl Into<String>, root: impl Into<PathBuf>) -> Result<Self> {
		let root = root.into();
		let io_error = |source| VfsError::Io { path: root.clone(), source };
		let root = std::fs::canonicalize(&root).map_err(io_error)?;
		let meta = std::fs::metadata(&root).map_err(io_error)?;
		if !meta.is_dir() {
			return Err(VfsError::NotAFolder(root.display().to_string()));
		}
		Ok(Self {
			tree: Arc::new(LocalTree {
				name: name.into(),
				root,
				handles: Mutex::new(FxHashMap::default()),
			}),
			watcher: Mutex::new(None),
		})
	}

	/// Canonical directory backing this file system.
	pub fn root(&self) -> &Path {
		&self.tree.root
	}

	/// Starts watching the directory recursively. Calling it again is a no-op.
	pub fn watch(&self) -> Result<()> {
		let mut slot = self.watcher.lock();
		if slot.is_some() {
			return Ok(());
		}
		let watch_error = |source| VfsError::Watch {
			path: self.tree.root.clone(),
			source,
		};

		let tree = Arc::clone(&self.tree);
		let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
			Ok(event) => tree.apply(&event),
			Err(error) => tracing::warn!(fs = %tree.name, %error, "file watcher error"),
		})
		.map_err(watch_error)?;
		watcher.watch(&self.tree.root, RecursiveMode::Recursive).map_err(watch_error)?;

		tracing::debug!(fs = %self.tree.name, root = %self.tree.root.display(), "watching file system");
		*slot = Some(watcher);
		Ok(())
	}

	pub fn is_watching(&self) -> bool {
		self.watcher.lock().is_some()
	}

	/// Re-stats every handed-out file and fires events for differences.
	pub fn refresh(&self) -> RefreshReport {
		let mut changed = Vec::new();
		let mut deleted = Vec::new();
		{
			let mut handles = self.tree.handles.lock();
			handles.retain(|resource, file| match Stamp::of(&file.full.read()) {
				Ok(stamp) => {
					let mut current = file.stamp.lock();
					if *current != stamp {
						*current = stamp;
						changed.push((resource.clone(), Arc::clone(file)));
					}
					true
				}
				Err(_) => {
					deleted.push((resource.clone(), Arc::clone(file)));
					false
				}
			});
		}

		changed.sort_by(|a, b| a.0.cmp(&b.0));
		deleted.sort_by(|a, b| a.0.cmp(&b.0));
		for (_, file) in &changed {
			file.notify(FileEventKind::Changed);
		}
		for (_, file) in &deleted {
			file.notify(FileEventKind::Deleted);
		}
		let report = RefreshReport {
			changed: changed.into_iter().map(|(r, _)| r).collect(),
			deleted: deleted.into_iter().map(|(r, _)| r).collect(),
		};
		if !report.is_empty() {
			tracing::debug!(fs = %self.tree.name, changed = report.changed.len(), deleted = report.deleted.len(), "refresh found changes");
		}
		report
	}
}

impl FileSystem for LocalFileSystem {
	fn name(&self) -> &str {
		&self.tree.name
	}

	fn find(&self, resource_path: &str) -> Option<FileHandle> {
		let resource = resource_path.trim_matches('/');
		let relative = Path::new(resource);
		if resource.is_empty() || !relative.components().all(|c| matches!(c, Component::Normal(_))) {
			return None;
		}

		let mut handles = self.tree.handles.lock();
		if let Some(file) = handles.get(resource) {
			return Some(Arc::clone(file) as FileHandle);
		}
		let full = self.tree.root.join(relative);
		if !full.is_file() {
			return None;
		}
		let stamp = Stamp::of(&full).ok()?;
		let file = Arc::new(LocalFile {
			id: FileId::next(),
			resource: RwLock::new(resource.to_string()),
			full: RwLock::new(full),
			stamp: Mutex::new(stamp),
			events: EventBus::new(),
		});
		handles.insert(resource.to_string(), Arc::clone(&file));
		Some(file as FileHandle)
	}
}

impl std::fmt::Debug for LocalFileSystem {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LocalFileSystem")
			.field("name", &self.tree.name)
			.field("root", &self.tree.root)
			.field("handles", &self.tree.handles.lock().len())
			.field("watching", &self.is_watching())
			.finish()
	}
}
