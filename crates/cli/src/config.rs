//! `sprig.toml` loading.
//!
//! Lookup order when no path is given on the command line:
//!
//! 1. `$SPRIG_CONFIG`
//! 2. `$XDG_CONFIG_HOME/sprig/sprig.toml`
//! 3. `~/.config/sprig/sprig.toml`
//!
//! A missing file at a default location yields [`Config::default`]; a missing
//! file named explicitly is an error.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use url::Url;

const FILE_NAME: &str = "sprig.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read {path}")]
	Read {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("invalid config {path}")]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("invalid code location {location:?}: {reason}")]
	InvalidLocation { location: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
	#[serde(default)]
	pub classpath: ClassPathConfig,

	#[serde(default, rename = "mount")]
	pub mounts: Vec<MountConfig>,

	#[serde(default)]
	pub log: LogConfig,

	/// Directory relative paths are resolved against.
	#[serde(skip)]
	pub base_dir: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassPathConfig {
	/// URLs or directory paths, in search order.
	#[serde(default)]
	pub locations: Vec<String>,
}

/// A directory mounted into the repository as a local file system.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountConfig {
	pub name: String,
	pub root: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
	pub filter: Option<String>,
}

impl Config {
	/// Loads `explicit`, or the default config file if there is one.
	pub fn load(explicit: Option<&Path>) -> Result<Self> {
		if let Some(path) = explicit {
			return Self::read(path);
		}
		match default_path(|key| std::env::var_os(key), dirs::home_dir()) {
			Some(path) if path.is_file() => Self::read(&path),
			Some(path) => {
				tracing::debug!(path = %path.display(), "no config file, using defaults");
				Ok(Self::default())
			}
			None => Ok(Self::default()),
		}
	}

	pub fn read(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
		let config = Self::parse(&content, &base_dir).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})?;
		tracing::debug!(path = %path.display(), mounts = config.mounts.len(), locations = config.classpath.locations.len(), "config loaded");
		Ok(config)
	}

	/// Parses TOML and resolves relative mount roots against `base_dir`.
	pub fn parse(content: &str, base_dir: &Path) -> std::result::Result<Self, toml::de::Error> {
		let mut config: Self = toml::from_str(content)?;
		for mount in &mut config.mounts {
			if mount.root.is_relative() {
				mount.root = base_dir.join(&mount.root);
			}
		}
		config.base_dir = base_dir.to_path_buf();
		Ok(config)
	}

	/// Configured class path locations as URLs.
	pub fn locations(&self) -> Result<Vec<Url>> {
		self.classpath.locations.iter().map(|l| location_url(l, &self.base_dir)).collect()
	}
}

/// Converts a URL or directory path into a code location URL.
///
/// Relative paths are resolved against `base_dir`.
pub fn location_url(location: &str, base_dir: &Path) -> Result<Url> {
	// Single-letter schemes are drive letters, not URLs.
	if let Ok(url) = Url::parse(location)
		&& url.scheme().len() > 1
	{
		return Ok(url);
	}

	let invalid = |reason: String| ConfigError::InvalidLocation {
		location: location.to_string(),
		reason,
	};
	let path = std::path::absolute(base_dir.join(location)).map_err(|e| invalid(e.to_string()))?;
	Url::from_directory_path(&path).map_err(|()| invalid(format!("{} is not an absolute path", path.display())))
}

fn default_path(var: impl Fn(&str) -> Option<OsString>, home: Option<PathBuf>) -> Option<PathBuf> {
	if let Some(path) = var("SPRIG_CONFIG").filter(|p| !p.is_empty()) {
		return Some(PathBuf::from(path));
	}
	var("XDG_CONFIG_HOME")
		.filter(|p| !p.is_empty())
		.map(PathBuf::from)
		.or_else(|| home.map(|h| h.join(".config")))
		.map(|dir| dir.join("sprig").join(FILE_NAME))
}
