//! In-memory file system.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::bus::{EventBus, Listener, Subscription};
use crate::error::{Result, VfsError};
use crate::event::{FileEvent, FileEventKind, FileId};
use crate::repository::{FileHandle, FileObject, FileSystem};

#[derive(Debug)]
enum NodeKind {
	File(RwLock<Arc<[u8]>>),
	Folder,
}

#[derive(Debug)]
struct MemoryNode {
	id: FileId,
	path: RwLock<String>,
	kind: NodeKind,
	attributes: RwLock<FxHashMap<String, String>>,
	deleted: AtomicBool,
	events: EventBus<FileEvent>,
}

impl MemoryNode {
	fn new(path: &str, kind: NodeKind) -> Arc<Self> {
		Arc::new(Self {
			id: FileId::next(),
			path: RwLock::new(path.to_string()),
			kind,
			attributes: RwLock::new(FxHashMap::default()),
			deleted: AtomicBool::new(false),
			events: EventBus::new(),
		})
	}

	fn is_folder(&self) -> bool {
		matches!(self.kind, NodeKind::Folder)
	}

	fn notify(&self, kind: FileEventKind) {
		let event = FileEvent {
			file: self.id,
			path: self.path.read().clone(),
			kind,
		};
		tracing::trace!(file = %event.file, path = %event.path, kind = ?event.kind, "file event");
		self.events.emit(&event);
	}
}

impl FileObject for MemoryNode {
	fn id(&self) -> FileId {
		self.id
	}

	fn path(&self) -> String {
		self.path.read().clone()
	}

	fn read(&self) -> io::Result<Vec<u8>> {
		if self.deleted.load(Ordering::Acquire) {
			return Err(io::Error::new(io::ErrorKind::NotFound, format!("{} was deleted", self.path.read())));
		}
		match &self.kind {
			NodeKind::File(data) => Ok(data.read().to_vec()),
			NodeKind::Folder => Err(io::Error::new(io::ErrorKind::IsADirectory, self.path.read().clone())),
		}
	}

	fn subscribe(&self, listener: Listener<FileEvent>) -> Subscription {
		self.events.subscribe(listener)
	}
}

/// File system kept entirely in memory.
///
/// Paths are `/`-separated and relative to the root (the empty path). Parent
/// folders are created on demand by [`MemoryFileSystem::write`]. Every mutation
/// fires the matching [`FileEvent`] on the affected handle after the tree lock
/// has been released.
#[derive(Debug)]
pub struct MemoryFileSystem {
	name: String,
	nodes: RwLock<BTreeMap<String, Arc<MemoryNode>>>,
}

impl MemoryFileSystem {
	pub fn new(name: impl Into<String>) -> Self {
		let mut nodes = BTreeMap::new();
		nodes.insert(String::new(), MemoryNode::new("", NodeKind::Folder));
		Self {
			name: name.into(),
			nodes: RwLock::new(nodes),
		}
	}

	/// Returns the handle for a file or folder.
	pub fn handle(&self, path: &str) -> Option<FileHandle> {
		let node = self.nodes.read().get(normalize(path)).cloned()?;
		Some(node as FileHandle)
	}

	/// Creates or overwrites a file.
	pub fn write(&self, path: &str, data: impl Into<Arc<[u8]>>) -> Result<()> {
		let path = normalize(path);
		if path.is_empty() {
			return Err(VfsError::AlreadyExists("/".into()));
		}
		let data = data.into();
		let mut pending = Vec::new();
		{
			let mut nodes = self.nodes.write();
			if let Some(existing) = nodes.get(path) {
				let NodeKind::File(slot) = &existing.kind else {
					return Err(VfsError::AlreadyExists(path.to_string()));
				};
				*slot.write() = data;
				pending.push((Arc::clone(existing), FileEventKind::Changed));
			} else {
				let (parent, name) = split_parent(path);
				ensure_folder(&mut nodes, parent, &mut pending)?;
				nodes.insert(path.to_string(), MemoryNode::new(path, NodeKind::File(RwLock::new(data))));
				if let Some(folder) = nodes.get(parent) {
					pending.push((Arc::clone(folder), FileEventKind::DataCreated { name: name.to_string() }));
				}
			}
		}
		fire(pending);
		Ok(())
	}

	/// Creates a folder (and any missing parents).
	pub fn create_folder(&self, path: &str) -> Result<()> {
		let path = normalize(path);
		let mut pending = Vec::new();
		{
			let mut nodes = self.nodes.write();
			if nodes.contains_key(path) {
				return Err(VfsError::AlreadyExists(path.to_string()));
			}
			ensure_folder(&mut nodes, path, &mut pending)?;
		}
		fire(pending);
		Ok(())
	}

	/// Deletes a file, or a folder with everything below it.
	pub fn delete(&self, path: &str) -> Result<()> {
		let path = normalize(path);
		let mut pending = Vec::new();
		{
			let mut nodes = self.nodes.write();
			if path.is_empty() || !nodes.contains_key(path) {
				return Err(VfsError::NotFound(path.to_string()));
			}
			for key in subtree_keys(&nodes, path) {
				if let Some(node) = nodes.remove(&key) {
					node.deleted.store(true, Ordering::Release);
					pending.push((node, FileEventKind::Deleted));
				}
			}
		}
		fire(pending);
		Ok(())
	}

	/// Moves a file or folder. Handles keep their identity.
	pub fn rename(&self, from: &str, to: &str) -> Result<()> {
		let from = normalize(from);
		let to = normalize(to);
		let mut pending = Vec::new();
		{
			let mut nodes = self.nodes.write();
			if from.is_empty() || !nodes.contains_key(from) {
				return Err(VfsError::NotFound(from.to_string()));
			}
			if nodes.contains_key(to) {
				return Err(VfsError::AlreadyExists(to.to_string()));
			}
			let (parent, _) = split_parent(to);
			ensure_folder(&mut nodes, parent, &mut pending)?;
			for key in subtree_keys(&nodes, from) {
				let Some(node) = nodes.remove(&key) else { continue };
				let moved = format!("{to}{}", &key[from.len()..]);
				*node.path.write() = moved.clone();
				nodes.insert(moved, Arc::clone(&node));
				pending.push((node, FileEventKind::Renamed { from: key }));
			}
		}
		fire(pending);
		Ok(())
	}

	pub fn set_attribute(&self, path: &str, name: &str, value: impl Into<String>) -> Result<()> {
		let path = normalize(path);
		let node = self.nodes.read().get(path).cloned().ok_or_else(|| VfsError::NotFound(path.to_string()))?;
		node.attributes.write().insert(name.to_string(), value.into());
		node.notify(FileEventKind::AttributeChanged { name: name.to_string() });
		Ok(())
	}

	pub fn attribute(&self, path: &str, name: &str) -> Option<String> {
		let node = self.nodes.read().get(normalize(path)).cloned()?;
		node.attributes.read().get(name).cloned()
	}
}

impl FileSystem for MemoryFileSystem {
	fn name(&self) -> &str {
		&self.name
	}

	fn find(&self, resource_path: &str) -> Option<FileHandle> {
		let node = self.nodes.read().get(normalize(resource_path)).cloned()?;
		if node.is_folder() {
			return None;
		}
		Some(node as FileHandle)
	}
}

fn normalize(path: &str) -> &str {
	path.trim_matches('/')
}

fn split_parent(path: &str) -> (&str, &str) {
	match path.rfind('/') {
		Some(idx) => (&path[..idx], &path[idx + 1..]),
		None => ("", path),
	}
}

/// Keys of `path` and every node below it, deepest first.
fn subtree_keys(nodes: &BTreeMap<String, Arc<MemoryNode>>, path: &str) -> Vec<String> {
	let prefix = format!("{path}/");
	let mut keys: Vec<String> = nodes.keys().filter(|k| k.as_str() == path || k.starts_with(&prefix)).cloned().collect();
	keys.reverse();
	keys
}

fn ensure_folder(
	nodes: &mut BTreeMap<String, Arc<MemoryNode>>,
	path: &str,
	pending: &mut Vec<(Arc<MemoryNode>, FileEventKind)>,
) -> Result<()> {
	if let Some(node) = nodes.get(path) {
		return if node.is_folder() { Ok(()) } else { Err(VfsError::NotAFolder(path.to_string())) };
	}
	let (parent, name) = split_parent(path);
	ensure_folder(nodes, parent, pending)?;
	nodes.insert(path.to_string(), MemoryNode::new(path, NodeKind::Folder));
	if let Some(folder) = nodes.get(parent) {
		pending.push((Arc::clone(folder), FileEventKind::FolderCreated { name: name.to_string() }));
	}
	Ok(())
}

fn fire(pending: Vec<(Arc<MemoryNode>, FileEventKind)>) {
	for (node, kind) in pending {
		node.notify(kind);
	}
}
