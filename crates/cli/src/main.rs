//! Sprig command line driver.
//!
//! Builds a module system from `sprig.toml` and the command line, then
//! resolves classes through it, keeps re-resolving them as mounted class
//! files change, or lists the installed code locations.

mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sprig_loader::{ClassName, ModuleSystem};
use sprig_vfs::{FileSystemPool, LocalFileSystem, Repository};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};
use url::Url;

use crate::config::{Config, location_url};

#[derive(Parser, Debug)]
#[command(name = "sprig", version)]
#[command(about = "Resolve classes against installed module locations")]
struct Args {
	/// Config file [default: $SPRIG_CONFIG or ~/.config/sprig/sprig.toml]
	#[arg(short, long, value_name = "PATH", global = true)]
	config: Option<PathBuf>,

	/// Verbose logging
	#[arg(short, long, global = true)]
	verbose: bool,

	/// Extra code location, appended after the configured ones
	#[arg(long = "classpath", value_name = "URL|PATH", global = true)]
	classpath: Vec<String>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Resolve classes and report where each one came from
	Resolve {
		/// Dotted class names, e.g. org.acme.Widget
		#[arg(required = true)]
		classes: Vec<String>,
	},
	/// Resolve classes, then watch mounted directories and resolve again
	/// whenever a change invalidates the loader
	Watch {
		#[arg(required = true)]
		classes: Vec<String>,

		/// How often to check for invalidation
		#[arg(long, value_name = "MS", default_value_t = 250)]
		interval: u64,
	},
	/// List installed code locations
	Locations {
		/// Uninstall a location before listing
		#[arg(long, value_name = "URL|PATH")]
		uninstall: Vec<String>,

		/// Drop uninstalled locations from the class path
		#[arg(long)]
		rebuild: bool,
	},
}

fn main() -> Result<ExitCode> {
	let args = Args::parse();
	let filter = setup_tracing(args.verbose);
	let config = Config::load(args.config.as_deref())?;
	apply_config_filter(filter, config.log.filter.as_deref());

	info!(command = ?args.command, "starting sprig");
	let cwd = std::env::current_dir().context("cannot determine working directory")?;
	let extra = args.classpath.iter().map(|l| location_url(l, &cwd)).collect::<Result<Vec<_>, _>>()?;
	let watch = matches!(args.command, Command::Watch { .. });
	let system = build_system(&config, &extra, watch)?;

	match &args.command {
		Command::Resolve { classes } => resolve(&system, classes),
		Command::Watch { classes, interval } => watch_classes(&system, classes, Duration::from_millis(*interval)),
		Command::Locations { uninstall, rebuild } => {
			for location in uninstall {
				system.registry().uninstall(Some(&location_url(location, &cwd)?));
			}
			if *rebuild {
				system.registry().rebuild()?;
			}
			list_locations(&system);
			Ok(ExitCode::SUCCESS)
		}
	}
}

/// Mounts every configured directory and installs the configured, extra and
/// mounted locations, in that order. With `watch`, mounted directories report
/// changes as they happen.
fn build_system(config: &Config, extra: &[Url], watch: bool) -> Result<ModuleSystem> {
	let pool = Arc::new(FileSystemPool::new());
	let mut locations = config.locations()?;
	locations.extend_from_slice(extra);

	for mount in &config.mounts {
		let fs = LocalFileSystem::open(&mount.name, &mount.root).with_context(|| format!("cannot mount {:?}", mount.name))?;
		if watch {
			fs.watch().with_context(|| format!("cannot watch {:?}", mount.name))?;
		}
		pool.mount(Arc::new(fs))?;
		locations.push(directory_url(&mount.root)?);
	}

	let system = ModuleSystem::new(pool);
	system.registry().initialize(&locations)?;
	Ok(system)
}

fn directory_url(path: &Path) -> Result<Url> {
	let path = std::path::absolute(path)?;
	Url::from_directory_path(&path).map_err(|()| anyhow::anyhow!("not an absolute path: {}", path.display()))
}

fn resolve(system: &ModuleSystem, classes: &[String]) -> Result<ExitCode> {
	let loader = system.current_class_loader();
	let mut missing = 0usize;

	for class in classes {
		let name = ClassName::new(class)?;
		match loader.load_class(&name) {
			Ok(loaded) => {
				let tracked = system.repository().find(name.package(), name.simple_name(), "class").is_some();
				println!("{name} <{}> epoch={} tracked={}", loaded.origin, loaded.epoch, if tracked { "yes" } else { "no" });
			}
			Err(err) if err.is_not_found() => {
				println!("{name}: not found");
				missing += 1;
			}
			Err(err) => return Err(err).with_context(|| format!("failed to resolve {name}")),
		}
	}

	Ok(if missing == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Runs until interrupted.
fn watch_classes(system: &ModuleSystem, classes: &[String], interval: Duration) -> Result<ExitCode> {
	loop {
		resolve(system, classes)?;
		let loader = system.current_class_loader();
		while !loader.is_retired() {
			std::thread::sleep(interval);
		}
		info!(epoch = loader.epoch(), "class loader invalidated, resolving again");
	}
}

fn list_locations(system: &ModuleSystem) {
	let registry = system.registry();
	for location in registry.locations() {
		if registry.is_ignored(&location) {
			println!("{location} (ignored)");
		} else {
			println!("{location}");
		}
	}
}

const DEFAULT_FILTER: &str = "sprig=info";

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Filter directives from `-v` or the environment, and whether they take
/// precedence over the config file.
fn initial_directives(verbose: bool, var: impl Fn(&str) -> Option<String>) -> (String, bool) {
	if verbose {
		return ("sprig=trace".to_string(), true);
	}
	["SPRIG_LOG", EnvFilter::DEFAULT_ENV]
		.into_iter()
		.find_map(|key| var(key).filter(|d| !d.is_empty()))
		.map_or_else(|| (DEFAULT_FILTER.to_string(), false), |d| (d, true))
}

/// Installs the subscriber before anything logs. Returns a handle for the
/// config file's filter unless `-v` or the environment already chose one.
fn setup_tracing(verbose: bool) -> Option<FilterHandle> {
	let (directives, explicit) = initial_directives(verbose, |key| std::env::var(key).ok());
	let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
	let (filter, handle) = reload::Layer::new(filter);

	tracing_subscriber::registry().with(filter).with(fmt::layer().with_writer(std::io::stderr)).init();
	(!explicit).then_some(handle)
}

fn apply_config_filter(handle: Option<FilterHandle>, configured: Option<&str>) {
	let (Some(handle), Some(directives)) = (handle, configured) else {
		return;
	};
	match EnvFilter::try_new(directives) {
		Ok(filter) => {
			if let Err(error) = handle.reload(filter) {
				warn!(%error, "cannot apply configured log filter");
			}
		}
		Err(error) => warn!(filter = directives, %error, "invalid log filter in config"),
	}
}

#[cfg(test)]
mod tests {
	use std::fs;

	use pretty_assertions::assert_eq;
	use tempfile::TempDir;

	use super::*;

	fn config_with_mount(root: &Path) -> Config {
		Config::parse(&format!("[[mount]]\nname = \"project\"\nroot = {:?}\n", root.display().to_string()), Path::new("/")).unwrap()
	}

	#[test]
	fn mounts_are_installed_and_tracked() {
		let dir = TempDir::new().unwrap();
		fs::create_dir_all(dir.path().join("org/acme")).unwrap();
		fs::write(dir.path().join("org/acme/Widget.class"), b"widget").unwrap();

		let system = build_system(&config_with_mount(dir.path()), &[], false).unwrap();

		assert_eq!(system.registry().locations(), vec![Url::from_directory_path(dir.path()).unwrap()]);
		let widget = system.load_class("org.acme.Widget").unwrap();
		assert_eq!(widget.epoch, 1);
		assert!(system.repository().find("org.acme", "Widget", "class").is_some());
	}

	#[test]
	fn extra_locations_follow_configured_ones() {
		let mounted = TempDir::new().unwrap();
		let extra = TempDir::new().unwrap();
		let extra_url = Url::from_directory_path(extra.path()).unwrap();

		let system = build_system(&config_with_mount(mounted.path()), std::slice::from_ref(&extra_url), false).unwrap();

		assert_eq!(system.registry().locations(), vec![extra_url, Url::from_directory_path(mounted.path()).unwrap()]);
	}

	#[test]
	fn missing_mount_root_fails() {
		let dir = TempDir::new().unwrap();
		let err = build_system(&config_with_mount(&dir.path().join("absent")), &[], false).err().unwrap();
		assert!(err.to_string().contains("cannot mount"));
	}

	#[test]
	fn cli_parses_global_flags_after_subcommand() {
		let args = Args::try_parse_from(["sprig", "resolve", "org.acme.Widget", "--classpath", "out", "-v"]).unwrap();
		assert!(args.verbose);
		assert_eq!(args.classpath, vec!["out".to_string()]);
		assert!(matches!(args.command, Command::Resolve { ref classes } if classes == &["org.acme.Widget".to_string()]));
	}

	#[test]
	fn resolve_requires_a_class() {
		assert!(Args::try_parse_from(["sprig", "resolve"]).is_err());
		assert!(Args::try_parse_from(["sprig", "watch"]).is_err());
	}

	#[test]
	fn watch_parses_interval() {
		let args = Args::try_parse_from(["sprig", "watch", "org.acme.Widget", "--interval", "50"]).unwrap();
		assert!(matches!(args.command, Command::Watch { interval: 50, .. }));
	}

	#[test]
	fn watched_mounts_report_changes() {
		let dir = TempDir::new().unwrap();
		fs::create_dir_all(dir.path().join("org/acme")).unwrap();
		fs::write(dir.path().join("org/acme/Widget.class"), b"widget").unwrap();
		let system = build_system(&config_with_mount(dir.path()), &[], true).unwrap();
		let loader = system.current_class_loader();
		loader.load_class_str("org.acme.Widget").unwrap();

		fs::write(dir.path().join("org/acme/Widget.class"), b"widget v2").unwrap();

		let deadline = std::time::Instant::now() + Duration::from_secs(10);
		while !loader.is_retired() && std::time::Instant::now() < deadline {
			std::thread::sleep(Duration::from_millis(20));
		}
		assert!(loader.is_retired());
	}

	#[test]
	fn log_filter_precedence() {
		let env = |pairs: &'static [(&'static str, &'static str)]| move |key: &str| pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string());

		assert_eq!(initial_directives(true, env(&[("SPRIG_LOG", "warn")])), ("sprig=trace".to_string(), true));
		assert_eq!(initial_directives(false, env(&[("SPRIG_LOG", "warn"), ("RUST_LOG", "debug")])), ("warn".to_string(), true));
		assert_eq!(initial_directives(false, env(&[("RUST_LOG", "debug")])), ("debug".to_string(), true));
		assert_eq!(initial_directives(false, env(&[("SPRIG_LOG", "")])), (DEFAULT_FILTER.to_string(), false));
		assert_eq!(initial_directives(false, env(&[])), (DEFAULT_FILTER.to_string(), false));
	}

	#[test]
	fn config_filter_reloads_the_default() {
		let (layer, handle) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new(DEFAULT_FILTER));
		let _subscriber = tracing_subscriber::registry().with(layer);

		apply_config_filter(Some(handle.clone()), Some("sprig=debug"));
		assert_eq!(handle.with_current(|f| f.to_string()).unwrap(), "sprig=debug");

		apply_config_filter(Some(handle.clone()), Some("sprig=loud"));
		assert_eq!(handle.with_current(|f| f.to_string()).unwrap(), "sprig=debug");
	}
}
