//! Launcher settings.
//! 
//! The config is stored as JSON in the config directory, see [`Config::load_from_disk`].

use serde::{Serialize, Deserialize};

/// How much the launcher is allowed to use the network.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkUse {
	Offline,
	Minimal,
	#[default] Full,
}

impl std::fmt::Display for NetworkUse {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			NetworkUse::Offline => write!(f, "offline"),
			NetworkUse::Minimal => write!(f, "minimal"),
			NetworkUse::Full => write!(f, "full"),
		}
	}
}

impl std::str::FromStr for NetworkUse {
	type Err = crate::Error;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"offline" => Ok(NetworkUse::Offline),
			"minimal" => Ok(NetworkUse::Minimal),
			"full" => Ok(NetworkUse::Full),
			_ => Err(crate::Error::Parse(format!("unknown network use '{}'", s))),
		}
	}
}

/// Interface of the tool used to build implementations from source.
pub const DEFAULT_COMPILE_INTERFACE: &str = "http://services.sugarlabs.org/0compile";

const THIRTY_DAYS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	cache_dir: std::path::PathBuf,
	config_dir: std::path::PathBuf,
	network_use: NetworkUse,
	/// Seconds before a feed is considered stale, zero disables the check.
	freshness: u64,
	help_with_testing: bool,
	https_only: bool,
	compile_interface: String,
	/// Overrides the detected (os, machine) of the host.
	target: Option<(Option<String>, Option<String>)>,
}

impl Default for Config {
	fn default() -> Self {
		fn xdg_dir(var: &str, fallback: &str) -> std::path::PathBuf {
			#[cfg(target_os = "windows")]
			let path = std::path::PathBuf::from(std::env::var("APPDATA").unwrap_or_else(|_| ".".to_string()));

			#[cfg(not(target_os = "windows"))]
			let path = if let Ok(e) = std::env::var(var) {
				std::path::PathBuf::from(e)
			} else if let Ok(home) = std::env::var("HOME") {
				std::path::PathBuf::from(home).join(fallback)
			} else {
				log::warn!("{} and HOME are not set, using the working directory.", var);
				std::path::PathBuf::from(".").join(fallback)
			};

			path.join("0sugar")
		}

		Self {
			cache_dir: xdg_dir("XDG_CACHE_HOME", ".cache"),
			config_dir: xdg_dir("XDG_CONFIG_HOME", ".config"),
			network_use: NetworkUse::Full,
			freshness: THIRTY_DAYS,
			help_with_testing: false,
			https_only: false,
			compile_interface: DEFAULT_COMPILE_INTERFACE.to_string(),
			target: None,
		}
	}
}

impl Config {
	/// A config with every directory placed under `root`.
	pub fn with_root(root: impl AsRef<std::path::Path>) -> Self {
		let root = root.as_ref();
		Self {
			cache_dir: root.join("cache"),
			config_dir: root.join("config"),
			..Default::default()
		}
	}

	fn config_file_path() -> std::path::PathBuf {
		Config::default().config_dir.join("config.json")
	}

	/// Reads the config from the default config directory.
	pub fn load_from_disk() -> crate::Result<Config> {
		let data = std::fs::read(Self::config_file_path())?;
		Ok(serde_json::from_slice(&data)?)
	}

	pub fn save_to_disk(&self) -> crate::Result<()> {
		let path = self.config_dir.join("config.json");
		std::fs::create_dir_all(&self.config_dir)?;
		std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
		Ok(())
	}

	pub fn cache_dir(&self) -> &std::path::PathBuf {
		&self.cache_dir
	}
	pub fn set_cache_dir(&mut self, cache_dir: std::path::PathBuf) {
		self.cache_dir = cache_dir;
	}

	pub fn config_dir(&self) -> &std::path::PathBuf {
		&self.config_dir
	}
	pub fn set_config_dir(&mut self, config_dir: std::path::PathBuf) {
		self.config_dir = config_dir;
	}

	/// Where downloaded feeds are cached.
	pub fn feeds_dir(&self) -> std::path::PathBuf {
		self.cache_dir.join("feeds")
	}

	/// Root of the implementation store.
	pub fn implementations_dir(&self) -> std::path::PathBuf {
		self.cache_dir.join("implementations")
	}

	/// Per-interface user overrides.
	pub fn interfaces_dir(&self) -> std::path::PathBuf {
		self.config_dir.join("interfaces")
	}

	pub fn trust_db_path(&self) -> std::path::PathBuf {
		self.config_dir.join("trustdb.json")
	}

	pub fn network_use(&self) -> NetworkUse {
		self.network_use
	}
	pub fn set_network_use(&mut self, network_use: NetworkUse) {
		self.network_use = network_use;
	}

	pub fn freshness(&self) -> u64 {
		self.freshness
	}
	pub fn set_freshness(&mut self, freshness: u64) {
		self.freshness = freshness;
	}

	pub fn help_with_testing(&self) -> bool {
		self.help_with_testing
	}
	pub fn set_help_with_testing(&mut self, help_with_testing: bool) {
		self.help_with_testing = help_with_testing;
	}

	pub fn https_only(&self) -> bool {
		self.https_only
	}
	pub fn set_https_only(&mut self, https_only: bool) {
		self.https_only = https_only;
	}

	pub fn compile_interface(&self) -> &str {
		&self.compile_interface
	}
	pub fn set_compile_interface(&mut self, uri: impl Into<String>) {
		self.compile_interface = uri.into();
	}

	/// The architecture solves should target.
	pub fn target_arch(&self) -> crate::model::arch::Architecture {
		match &self.target {
			Some((os, machine)) => crate::model::arch::Architecture::for_target(os.as_deref(), machine.as_deref()),
			None => crate::model::arch::Architecture::host(),
		}
	}
	pub fn set_target(&mut self, os: Option<String>, machine: Option<String>) {
		self.target = Some((os, machine));
	}
}
