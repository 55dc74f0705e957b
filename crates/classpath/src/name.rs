use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::LoadError;

/// Dotted binary class name, e.g. `org.acme.Widget` or `org.acme.Widget$Part`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassName(Arc<str>);

impl ClassName {
	pub fn new(name: &str) -> Result<Self, LoadError> {
		let valid = !name.is_empty()
			&& name
				.split('.')
				.all(|segment| !segment.is_empty() && segment.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$'));
		if !valid {
			return Err(LoadError::InvalidName(name.to_string()));
		}
		Ok(Self(Arc::from(name)))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Dotted package, empty for the default package.
	pub fn package(&self) -> &str {
		self.0.rsplit_once('.').map_or("", |(package, _)| package)
	}

	pub fn simple_name(&self) -> &str {
		self.0.rsplit_once('.').map_or(&*self.0, |(_, simple)| simple)
	}

	/// Resource path of the class file (`org/acme/Widget.class`).
	pub fn resource_path(&self) -> String {
		format!("{}.class", self.0.replace('.', "/"))
	}
}

impl FromStr for ClassName {
	type Err = LoadError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s)
	}
}

impl fmt::Display for ClassName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl fmt::Debug for ClassName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ClassName({})", self.0)
	}
}
