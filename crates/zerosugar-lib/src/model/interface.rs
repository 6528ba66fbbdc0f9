use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Serialize, Deserialize};

use super::{Implementation, Stability};

/// Root of the services feeds, URIs below it get short display names.
pub const FEEDS_ROOT: &str = "http://services.sugarlabs.org";

/// Points at another feed that provides implementations of an interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedReference {
	pub uri: String,
	#[serde(default)]
	pub os: Option<String>,
	#[serde(default)]
	pub machine: Option<String>,
}

impl FeedReference {
	pub fn new(uri: impl Into<String>) -> Self {
		Self { uri: uri.into(), os: None, machine: None }
	}

	/// Whether the feed can have anything for `arch`.
	pub fn is_compatible(&self, arch: &super::Architecture) -> bool {
		arch.os_ranks.contains_key(&self.os)
			&& (self.machine.is_none() || arch.machine_ranks.contains_key(&self.machine))
	}

	pub fn is_source(&self) -> bool {
		self.machine.as_deref() == Some(super::arch::SOURCE_MACHINE)
	}
}

/// The user's settings for an interface, everything else comes from its feeds.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
	pub uri: String,
	/// Implementations at or above this stability count as preferred.
	#[serde(default)]
	pub stability_policy: Option<Stability>,
	/// Feeds registered locally, for instance by builds.
	#[serde(default)]
	pub extra_feeds: Vec<FeedReference>,
}

impl Interface {
	pub fn new(uri: impl Into<String>) -> Self {
		Self { uri: uri.into(), ..Default::default() }
	}
}

/// A list of implementations read from one source.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
	pub url: String,
	pub name: Option<String>,
	/// Interfaces this feed provides implementations for, besides `url`.
	pub feed_for: BTreeSet<String>,
	/// More feeds for the same interface.
	pub feeds: Vec<FeedReference>,
	pub implementations: BTreeMap<String, Arc<Implementation>>,
	/// Seconds since the epoch the publisher last changed the feed, `None` for feeds never loaded.
	pub last_modified: Option<u64>,
	/// Seconds since the epoch the feed was last checked for updates.
	pub last_checked: Option<u64>,
}

impl Feed {
	/// Local feeds are files on disk, never downloaded.
	pub fn is_local(&self) -> bool {
		is_local_uri(&self.url)
	}
}

pub fn is_local_uri(uri: &str) -> bool {
	uri.starts_with('/')
}

/// Converts what the user typed into the identity of an interface.
/// 
/// URLs are kept as is, `file:///x` becomes `/x` and anything else must be an existing local file.
/// 
/// # Errors
/// [`Error::InvalidInterfaceUri`](crate::Error::InvalidInterfaceUri) when none of the above apply.
pub fn canonical_iface_uri(uri: &str) -> crate::Result<String> {
	if uri.starts_with("http://") || uri.starts_with("https://") {
		if uri.matches('/').count() < 3 {
			return Err(crate::Error::InvalidInterfaceUri(format!("{} (missing / after hostname)", uri)));
		}
		return Ok(uri.to_string());
	}

	if let Some(path) = uri.strip_prefix("file://") {
		if path.starts_with('/') {
			return Ok(path.to_string());
		}
	}

	match std::fs::canonicalize(uri) {
		Ok(path) if path.is_file() => Ok(path.to_string_lossy().to_string()),
		_ => Err(crate::Error::InvalidInterfaceUri(uri.to_string())),
	}
}

/// Short name of a feed for messages.
pub fn display_name(uri: &str) -> String {
	if let Some(rest) = uri.strip_prefix(FEEDS_ROOT) {
		let rest = rest.trim_end_matches('/');
		if let Some(stem) = rest.strip_suffix(".xml") {
			let mut parts = stem.rsplit('/');
			let file = parts.next().unwrap_or_default();
			let dir = parts.next().unwrap_or_default();
			return format!("{}/{}", dir, file);
		}
		return rest.rsplit('/').next().unwrap_or(rest).to_string();
	}
	uri.to_string()
}

/// Makes `uri` safe to use as a file name.
pub fn escape(uri: &str) -> String {
	let mut out = String::with_capacity(uri.len());
	for b in uri.bytes() {
		if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' {
			out.push(b as char);
		} else {
			out.push_str(&format!("%{:02x}", b));
		}
	}
	out
}

#[cfg(test)]
mod test {
	use super::*;

	#[test] fn urls_are_kept() { assert_eq!(canonical_iface_uri("http://example.com/feed").unwrap(), "http://example.com/feed") }
	#[test] fn url_without_path_is_invalid() { assert!(canonical_iface_uri("http://example.com").is_err()) }
	#[test] fn file_urls_become_paths() { assert_eq!(canonical_iface_uri("file:///tmp/feed.json").unwrap(), "/tmp/feed.json") }
	#[test] fn missing_file_is_invalid() { assert!(canonical_iface_uri("no/such/feed.json").is_err()) }
	#[test] fn services_name_is_last_component() { assert_eq!(display_name("http://services.sugarlabs.org/sugar-toolkit"), "sugar-toolkit") }
	#[test] fn services_xml_name_keeps_directory() { assert_eq!(display_name("http://services.sugarlabs.org/sugar/feed.xml"), "sugar/feed") }
	#[test] fn other_names_are_kept() { assert_eq!(display_name("http://example.com/x"), "http://example.com/x") }
	#[test] fn escape_replaces_slashes() { assert_eq!(escape("http://a/b"), "http%3a%2f%2fa%2fb") }

	#[test]
	fn existing_file_is_canonicalized() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("feed.json");
		std::fs::write(&path, "{}").unwrap();
		assert_eq!(canonical_iface_uri(path.to_str().unwrap()).unwrap(), std::fs::canonicalize(&path).unwrap().to_string_lossy());
	}
}
