//! Virtual file repository backing the module runtime.
//!
//! A [`FileSystemPool`] is an ordered set of mounted [`FileSystem`]s. It answers
//! `find(package, name, extension)` lookups and broadcasts structural
//! [`RepositoryEvent`]s when file systems are mounted, unmounted or reordered.
//! Every [`FileObject`] handed out carries a stable [`FileId`] and its own
//! event source for per-file [`FileEvent`]s.
//!
//! # Subscriptions
//!
//! Listeners are registered through [`EventBus::subscribe`] and stay attached
//! until the returned [`Subscription`] is unsubscribed or dropped. Removal is
//! idempotent. There are no weak-listener tricks: whoever holds the handle
//! decides the lifetime of the registration.
//!
//! # Implementations
//!
//! * [`MemoryFileSystem`]: in-memory tree, mutations fire events directly.
//! * [`LocalFileSystem`]: directory on disk. Changes arrive from a native
//!   watcher started by [`LocalFileSystem::watch`], or from an explicit
//!   [`LocalFileSystem::refresh`].

mod bus;
mod error;
mod event;
mod local;
mod memory;
mod repository;

pub use bus::{EventBus, Listener, Subscription};
pub use error::{Result, VfsError};
pub use event::{FileEvent, FileEventKind, FileId, RepositoryEvent};
pub use local::{LocalFileSystem, RefreshReport};
pub use memory::MemoryFileSystem;
pub use repository::{FileHandle, FileObject, FileSystem, FileSystemPool, Repository, resource_path};
