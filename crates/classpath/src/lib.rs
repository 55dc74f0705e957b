//! Composite class path.
//!
//! A [`ClassPath`] is an ordered search path of [`CodeLocation`]s, each
//! addressed by a URL and backed by a [`CodeSource`]. New locations can be
//! appended to a live instance; existing ones are never revoked, because
//! classes already defined from them stay valid for the lifetime of the
//! instance.
//!
//! Resolution comes in two flavours:
//!
//! * [`ClassPath::find_resource`] reads the current bytes of a resource, uncached.
//! * [`ClassPath::load_class`] defines a [`LoadedClass`] once and caches it.

mod class_path;
mod error;
mod name;
mod source;

pub use class_path::{ClassPath, CodeLocation, LoadedClass, Resource, normalize_location};
pub use error::{ClassPathError, LoadError};
pub use name::ClassName;
pub use source::{CodeSource, DirectorySource, MemorySource};
