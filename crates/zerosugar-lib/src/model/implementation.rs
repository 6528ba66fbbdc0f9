use serde::{Serialize, Deserialize};

use super::{Version, Restriction};

/// How much an implementation can be trusted to work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stability {
	/// Set at runtime on native packages that could not be fetched.
	Insecure,
	Buggy,
	Developer,
	Testing,
	Stable,
	Preferred,
}

impl std::fmt::Display for Stability {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			Stability::Insecure => "insecure",
			Stability::Buggy => "buggy",
			Stability::Developer => "developer",
			Stability::Testing => "testing",
			Stability::Stable => "stable",
			Stability::Preferred => "preferred",
		};
		write!(f, "{}", name)
	}
}

/// How an environment variable is changed by a binding.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingMode {
	#[default] Prepend,
	Append,
	Replace,
}

/// Separator for path lists in environment variables.
#[cfg(target_os = "windows")]
const PATH_SEPARATOR: &str = ";";
#[cfg(not(target_os = "windows"))]
const PATH_SEPARATOR: &str = ":";

/// Sets an environment variable when the implementation it belongs to is selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
	pub name: String,
	/// Path inside the implementation to add.
	#[serde(default)]
	pub insert: Option<String>,
	/// Literal value to add, used when there is no `insert`.
	#[serde(default)]
	pub value: Option<String>,
	#[serde(default)]
	pub mode: BindingMode,
	/// Used instead of the current value when the variable is unset.
	#[serde(default)]
	pub default: Option<String>,
}

impl Binding {
	fn builtin_default(name: &str) -> Option<&'static str> {
		match name {
			"PATH" => Some("/bin:/usr/bin"),
			"XDG_CONFIG_DIRS" => Some("/etc/xdg"),
			"XDG_DATA_DIRS" => Some("/usr/local/share:/usr/share"),
			_ => None,
		}
	}

	/// Calculates the new value of the variable after applying this binding.
	/// 
	/// # Parameters
	/// - `path` - Where the selected implementation is.
	/// - `old_value` - The current value of the variable.
	pub fn get_value(&self, path: &std::path::Path, old_value: Option<&str>) -> String {
		let extra = match (&self.insert, &self.value) {
			(Some(insert), _) => path.join(insert).to_string_lossy().to_string(),
			(None, Some(value)) => value.clone(),
			(None, None) => path.to_string_lossy().to_string(),
		};

		if self.mode == BindingMode::Replace {
			return extra;
		}

		let old_value = old_value
			.map(str::to_string)
			.or_else(|| self.default.clone())
			.or_else(|| Self::builtin_default(&self.name).map(str::to_string));

		match (old_value, self.mode) {
			(None, _) => extra,
			(Some(old), BindingMode::Append) => old + PATH_SEPARATOR + &extra,
			(Some(old), _) => extra + PATH_SEPARATOR + &old,
		}
	}
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
	#[default] Essential,
	Recommended,
}

/// A requirement on another interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
	pub interface: String,
	#[serde(default)]
	pub restrictions: Vec<Restriction>,
	#[serde(default)]
	pub importance: Importance,
	/// Only applies to architectures listing this value in their `uses`.
	#[serde(default, rename = "use")]
	pub use_tag: Option<String>,
	#[serde(default)]
	pub bindings: Vec<Binding>,
}

impl Dependency {
	pub fn new(interface: impl Into<String>) -> Self {
		Self {
			interface: interface.into(),
			restrictions: Vec::new(),
			importance: Importance::Essential,
			use_tag: None,
			bindings: Vec::new(),
		}
	}

	pub fn is_optional(&self) -> bool {
		self.importance != Importance::Essential
	}
}

/// An archive to download and unpack into the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Archive {
	pub href: String,
	/// Declared size in bytes, used for progress reporting.
	#[serde(default)]
	pub size: Option<u64>,
	/// Sub-directory of the archive holding the implementation.
	#[serde(default)]
	pub extract: Option<String>,
	/// Mime type, guessed from `href` when missing.
	#[serde(default, rename = "type")]
	pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImplementationKind {
	/// Lives in the store under its digest, fetched from one of the archives.
	Store { archives: Vec<Archive> },
	/// Provided by the OS package manager.
	Distribution { package: String, installed: bool },
	/// A directory on the local disk, its id is the path.
	Local,
}

/// A concrete version of an interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
	pub id: String,
	/// URL of the feed listing this implementation.
	pub feed: String,
	pub version: Version,
	pub os: Option<String>,
	pub machine: Option<String>,
	pub upstream_stability: Stability,
	pub user_stability: Option<Stability>,
	pub requires: Vec<Dependency>,
	pub bindings: Vec<Binding>,
	/// Relative path of the program to run.
	pub main: Option<String>,
	pub kind: ImplementationKind,
}

impl Implementation {
	pub fn stability(&self) -> Stability {
		self.user_stability.unwrap_or(self.upstream_stability)
	}

	pub fn is_source(&self) -> bool {
		self.machine.as_deref() == Some(super::arch::SOURCE_MACHINE)
	}

	pub fn is_distribution(&self) -> bool {
		matches!(self.kind, ImplementationKind::Distribution { .. })
	}

	/// The local path of a path identified implementation.
	pub fn local_path(&self) -> Option<std::path::PathBuf> {
		if self.id.starts_with('/') {
			Some(std::path::PathBuf::from(&self.id))
		} else {
			None
		}
	}

	/// Architecture in the `os-machine` form, `*` for wildcards.
	pub fn arch(&self) -> String {
		format!("{}-{}", self.os.as_deref().unwrap_or("*"), self.machine.as_deref().unwrap_or("*"))
	}
}

impl std::fmt::Display for Implementation {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{} ({})", self.id, self.version)
	}
}
