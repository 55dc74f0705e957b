//! End-to-end coherence between installed locations, the repository and the
//! current system class loader, driven through on-disk class directories.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use rstest::rstest;
use sprig_loader::ModuleSystem;
use sprig_vfs::{FileSystemPool, LocalFileSystem, MemoryFileSystem, Repository};
use tempfile::TempDir;
use url::Url;

struct Project {
	classes: TempDir,
	local: Arc<LocalFileSystem>,
	pool: Arc<FileSystemPool>,
	system: ModuleSystem,
}

impl Project {
	fn new() -> Self {
		let classes = TempDir::new().unwrap();
		write_class(classes.path(), "org/acme/Widget.class", b"widget");
		write_class(classes.path(), "org/acme/Gadget.class", b"gadget");

		let local = Arc::new(LocalFileSystem::open("project", classes.path()).unwrap());
		let pool = Arc::new(FileSystemPool::new());
		pool.mount(local.clone()).unwrap();

		let system = ModuleSystem::new(pool.clone());
		system.registry().initialize([&url_of(classes.path())]).unwrap();
		Self { classes, local, pool, system }
	}

	fn path(&self, resource: &str) -> std::path::PathBuf {
		self.classes.path().join(resource)
	}
}

fn write_class(root: &Path, resource: &str, bytes: &[u8]) {
	let path = root.join(resource);
	fs::create_dir_all(path.parent().unwrap()).unwrap();
	fs::write(path, bytes).unwrap();
}

fn url_of(dir: &Path) -> Url {
	Url::from_directory_path(dir).unwrap()
}

/// Must construct at most one loader per epoch under concurrent first access.
///
/// - Enforced in: `ResolutionCache::current_class_loader`
/// - Failure symptom: classes resolved on different threads belong to
///   different epochs and compare unequal.
#[test]
fn concurrent_resolution_shares_one_epoch() {
	let project = Project::new();
	let barrier = &Barrier::new(6);
	let system = &project.system;

	let epochs: Vec<u64> = std::thread::scope(|scope| {
		let handles: Vec<_> = (0..6)
			.map(|i| {
				scope.spawn(move || {
					barrier.wait();
					let name = if i % 2 == 0 { "org.acme.Widget" } else { "org.acme.Gadget" };
					system.load_class(name).unwrap().epoch
				})
			})
			.collect();
		handles.into_iter().map(|h| h.join().unwrap()).collect()
	});

	assert_eq!(epochs, vec![1; 6]);
	assert_eq!(system.cache().epoch(), 1);
}

#[rstest]
#[case::mount(|pool: &FileSystemPool| pool.mount(Arc::new(MemoryFileSystem::new("scratch"))).unwrap())]
#[case::unmount(|pool: &FileSystemPool| drop(pool.unmount("generated").unwrap()))]
#[case::reorder(|pool: &FileSystemPool| pool.reorder(&["generated", "project"]).unwrap())]
fn structural_repository_events_force_a_new_loader(#[case] change: fn(&FileSystemPool)) {
	let project = Project::new();
	project.pool.mount(Arc::new(MemoryFileSystem::new("generated"))).unwrap();
	let before = project.system.current_class_loader();
	before.load_class_str("org.acme.Widget").unwrap();

	change(&project.pool);

	let after = project.system.current_class_loader();
	assert!(before.is_retired());
	assert!(!Arc::ptr_eq(&before, &after));
	assert_eq!(after.epoch(), 2);
}

/// Must retire only when a file the loader defined a class from changes.
///
/// - Enforced in: `SystemClassLoader::on_file_event`
/// - Failure symptom: stale bytecode after a rebuild, or a fresh loader on
///   every unrelated write.
#[test]
fn changing_a_tracked_class_file_retires_the_loader() {
	let project = Project::new();
	let widget = project.system.load_class("org.acme.Widget").unwrap();
	assert_eq!(&*widget.bytes, b"widget");

	fs::write(project.path("org/acme/Widget.class"), b"widget v2").unwrap();
	let report = project.local.refresh();

	assert_eq!(report.changed, vec!["org/acme/Widget.class".to_string()]);
	let reloaded = project.system.load_class("org.acme.Widget").unwrap();
	assert_eq!(reloaded.epoch, 2);
	assert_eq!(&*reloaded.bytes, b"widget v2");
}

#[test]
fn changing_an_untracked_file_keeps_the_loader() {
	let project = Project::new();
	let loader = project.system.current_class_loader();
	loader.load_class_str("org.acme.Widget").unwrap();
	// Hand out the gadget handle without resolving the class.
	assert!(project.pool.find("org.acme", "Gadget", "class").is_some());

	fs::write(project.path("org/acme/Gadget.class"), b"gadget v2").unwrap();
	let report = project.local.refresh();

	assert_eq!(report.changed, vec!["org/acme/Gadget.class".to_string()]);
	assert!(loader.is_current());
	assert!(Arc::ptr_eq(&loader, &project.system.current_class_loader()));
}

#[test]
fn deleting_a_tracked_class_file_retires_the_loader() {
	let project = Project::new();
	let loader = project.system.current_class_loader();
	loader.load_class_str("org.acme.Widget").unwrap();

	fs::remove_file(project.path("org/acme/Widget.class")).unwrap();
	let report = project.local.refresh();

	assert_eq!(report.deleted, vec!["org/acme/Widget.class".to_string()]);
	assert!(loader.is_retired());
	let err = project.system.load_class("org.acme.Widget").unwrap_err();
	assert!(err.is_not_found());
}

/// Must dispose every subscription of a retired loader.
///
/// - Enforced in: `SystemClassLoader::retire`
/// - Failure symptom: listener lists on files and the repository grow with
///   every epoch.
#[test]
fn retirement_disposes_all_subscriptions() {
	let project = Project::new();
	let loader = project.system.current_class_loader();
	loader.load_class_str("org.acme.Widget").unwrap();
	loader.load_class_str("org.acme.Gadget").unwrap();
	assert_eq!(loader.watched_files(), 2);
	assert_eq!(project.pool.listener_count(), 1);

	fs::write(project.path("org/acme/Widget.class"), b"widget v2").unwrap();
	project.local.refresh();

	assert_eq!(loader.watched_files(), 0);
	assert_eq!(project.pool.listener_count(), 0);

	// The gadget file no longer reaches the retired loader.
	fs::write(project.path("org/acme/Gadget.class"), b"gadget v2").unwrap();
	project.local.refresh();
	assert!(project.system.cache().installed().is_none());
}

#[test]
fn installing_twice_invalidates_twice() {
	let project = Project::new();
	let extra = TempDir::new().unwrap();
	let url = url_of(extra.path());

	let first = project.system.current_class_loader();
	project.system.registry().install(Some(&url)).unwrap();
	assert!(first.is_retired());

	let second = project.system.current_class_loader();
	project.system.registry().install(Some(&url)).unwrap();
	assert!(second.is_retired());

	assert_eq!(project.system.registry().locations(), vec![url_of(project.classes.path()), url]);
}

#[test]
fn installed_location_becomes_visible() {
	let project = Project::new();
	let extra = TempDir::new().unwrap();
	write_class(extra.path(), "org/acme/extra/Plugin.class", b"plugin");
	assert!(project.system.load_class("org.acme.extra.Plugin").unwrap_err().is_not_found());

	project.system.registry().install(Some(&url_of(extra.path()))).unwrap();

	let plugin = project.system.load_class("org.acme.extra.Plugin").unwrap();
	assert_eq!(plugin.epoch, 0);
	assert_eq!(plugin.origin, url_of(extra.path()).join("org/acme/extra/Plugin.class").unwrap());
	// Not in the repository, so not tracked.
	assert_eq!(project.system.current_class_loader().watched_files(), 0);
}

#[test]
fn uninstall_then_reinstall_restores_the_location() {
	let project = Project::new();
	let url = url_of(project.classes.path());
	let registry = project.system.registry();

	registry.uninstall(Some(&url));
	assert_eq!(registry.ignored(), vec![url.clone()]);

	registry.install(Some(&url)).unwrap();
	assert_eq!(registry.locations(), vec![url]);
	assert!(registry.ignored().is_empty());
}

#[test]
fn none_changes_nothing() {
	let project = Project::new();
	let loader = project.system.current_class_loader();

	project.system.registry().install(None).unwrap();
	project.system.registry().uninstall(None);

	assert!(loader.is_current());
	assert_eq!(project.system.registry().locations().len(), 1);
}

/// Classes the repository does not know are defined once by the composite
/// class path and shared across epochs.
///
/// - Enforced in: `SystemClassLoader::load_class`
/// - Failure symptom: every install redefines library classes, and the
///   composite class path never records them.
#[test]
fn untracked_classes_survive_install() {
	let project = Project::new();
	let libs = TempDir::new().unwrap();
	write_class(libs.path(), "lib/Util.class", b"util");
	let registry = project.system.registry();
	registry.install(Some(&url_of(libs.path()))).unwrap();

	let before = project.system.load_class("lib.Util").unwrap();
	registry.install(Some(&Url::from_directory_path(std::env::temp_dir()).unwrap())).unwrap();
	let after = project.system.load_class("lib.Util").unwrap();

	assert!(Arc::ptr_eq(&before, &after));
	assert!(registry.current_loader().is_defined(&before.name));
	assert_eq!(project.system.current_class_loader().watched_files(), 0);
}

#[test]
#[should_panic(expected = "LoaderRegistry::initialize called twice")]
fn second_initialize_is_a_programming_error() {
	let project = Project::new();
	let _ = project.system.registry().initialize([]);
}

/// Uninstalling is logical: the location stays on the live search path until
/// the registry is rebuilt.
#[test]
fn uninstalled_classes_resolve_until_rebuild() {
	let project = Project::new();
	let extra = TempDir::new().unwrap();
	write_class(extra.path(), "org/acme/extra/Plugin.class", b"plugin");
	let url = url_of(extra.path());
	let registry = project.system.registry();
	registry.install(Some(&url)).unwrap();

	registry.uninstall(Some(&url));
	assert!(project.system.load_class("org.acme.extra.Plugin").is_ok());

	registry.rebuild().unwrap();
	assert!(project.system.load_class("org.acme.extra.Plugin").unwrap_err().is_not_found());
	assert!(project.system.load_class("org.acme.Widget").is_ok());
}

#[test]
fn systems_are_independent() {
	let left = Project::new();
	let right = Project::new();
	let left_loader = left.system.current_class_loader();
	let right_loader = right.system.current_class_loader();

	left.pool.mount(Arc::new(MemoryFileSystem::new("scratch"))).unwrap();

	assert!(left_loader.is_retired());
	assert!(right_loader.is_current());
}

/// Must retire when the native watcher reports a write to a tracked file,
/// without any explicit refresh.
#[test]
fn watched_disk_changes_retire_the_loader() {
	let project = Project::new();
	project.local.watch().unwrap();
	let loader = project.system.current_class_loader();
	loader.load_class_str("org.acme.Widget").unwrap();

	fs::write(project.path("org/acme/Widget.class"), b"widget v2").unwrap();

	let deadline = Instant::now() + Duration::from_secs(10);
	while !loader.is_retired() && Instant::now() < deadline {
		std::thread::sleep(Duration::from_millis(20));
	}
	assert!(loader.is_retired());
	assert_eq!(&*project.system.load_class("org.acme.Widget").unwrap().bytes, b"widget v2");
}
