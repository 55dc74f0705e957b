//! Module loading runtime.
//!
//! * [`LoaderRegistry`]: the composite [`ClassPath`] of installed module
//!   locations, extended in place by `install` and logically shrunk by
//!   `uninstall`.
//! * [`ResolutionCache`]: the current [`SystemClassLoader`], built lazily once
//!   per epoch and retired whenever the repository changes in a way that can
//!   affect which classes are visible.
//! * [`ModuleSystem`]: owns one registry wired to one cache. Independent
//!   systems can coexist in a process.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sprig_loader::ModuleSystem;
//! use sprig_vfs::FileSystemPool;
//! use url::Url;
//!
//! let system = ModuleSystem::new(Arc::new(FileSystemPool::new()));
//! let modules = Url::parse("file:///opt/app/modules/core/").unwrap();
//! system.registry().initialize([&modules]).unwrap();
//! let class = system.load_class("org.acme.Widget");
//! ```

mod cache;
mod error;
mod registry;
mod system;
mod system_loader;

pub use cache::ResolutionCache;
pub use error::RegistryError;
pub use registry::LoaderRegistry;
pub use sprig_classpath::{ClassName, ClassPath, LoadError, LoadedClass};
pub use system::ModuleSystem;
pub use system_loader::SystemClassLoader;
