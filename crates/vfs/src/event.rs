use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable identity of a file handle.
///
/// Identities are process-unique and never reused, so they can key
/// registrations that must be removed exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(u64);

impl FileId {
	pub(crate) fn next() -> Self {
		static NEXT: AtomicU64 = AtomicU64::new(1);
		Self(NEXT.fetch_add(1, Ordering::Relaxed))
	}

	pub const fn as_u64(self) -> u64 {
		self.0
	}
}

impl fmt::Display for FileId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// What happened to a single file or folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEventKind {
	/// Content changed.
	Changed,
	Deleted,
	/// Moved away from `from` (a resource path) to the handle's current path.
	Renamed { from: String },
	/// A child folder was created in this folder.
	FolderCreated { name: String },
	/// A child file was created in this folder.
	DataCreated { name: String },
	AttributeChanged { name: String },
}

impl FileEventKind {
	/// Whether code previously read from the file can no longer be trusted.
	pub fn retires_loader(&self) -> bool {
		matches!(self, Self::Changed | Self::Deleted | Self::Renamed { .. })
	}
}

/// Per-file notification delivered to listeners of one [`crate::FileObject`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
	pub file: FileId,
	/// Resource path of the file at the time the event fired.
	pub path: String,
	pub kind: FileEventKind,
}

/// Structural change of the repository's file system pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryEvent {
	FileSystemAdded { name: String },
	FileSystemRemoved { name: String },
	PoolReordered,
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case::changed(FileEventKind::Changed, true)]
	#[case::deleted(FileEventKind::Deleted, true)]
	#[case::renamed(FileEventKind::Renamed { from: "org/acme/Old.class".into() }, true)]
	#[case::folder_created(FileEventKind::FolderCreated { name: "impl".into() }, false)]
	#[case::data_created(FileEventKind::DataCreated { name: "Widget.class".into() }, false)]
	#[case::attribute_changed(FileEventKind::AttributeChanged { name: "metadata".into() }, false)]
	fn content_events_retire_loaders(#[case] kind: FileEventKind, #[case] retires: bool) {
		assert_eq!(kind.retires_loader(), retires);
	}

	#[test]
	fn file_ids_are_unique() {
		let a = FileId::next();
		let b = FileId::next();
		assert_ne!(a, b);
		assert_eq!(format!("{a}"), format!("#{}", a.as_u64()));
	}
}
