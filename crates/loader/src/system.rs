use std::sync::Arc;

use sprig_classpath::{ClassName, LoadError, LoadedClass};
use sprig_vfs::Repository;

use crate::cache::ResolutionCache;
use crate::registry::LoaderRegistry;
use crate::system_loader::SystemClassLoader;

/// One registry wired to one resolution cache over a shared repository.
///
/// Everything that would otherwise be process-global lives here, so
/// independent systems can run side by side.
#[derive(Debug)]
pub struct ModuleSystem {
	registry: LoaderRegistry,
	cache: ResolutionCache,
}

impl ModuleSystem {
	pub fn new(repository: Arc<dyn Repository>) -> Self {
		let cache = ResolutionCache::new(repository);
		Self {
			registry: LoaderRegistry::new(cache.clone()),
			cache,
		}
	}

	pub fn registry(&self) -> &LoaderRegistry {
		&self.registry
	}

	pub fn cache(&self) -> &ResolutionCache {
		&self.cache
	}

	pub fn repository(&self) -> &Arc<dyn Repository> {
		self.cache.repository()
	}

	pub fn current_class_loader(&self) -> Arc<SystemClassLoader> {
		self.cache.current_class_loader()
	}

	/// Resolves a dotted class name through the current loader.
	pub fn load_class(&self, name: &str) -> Result<Arc<LoadedClass>, LoadError> {
		let name = ClassName::new(name)?;
		self.current_class_loader().load_class(&name)
	}
}
