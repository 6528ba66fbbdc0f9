//! The JSON form of feeds, as published and as read from local files.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Serialize, Deserialize};

use crate::model::*;

fn default_stability() -> Stability { Stability::Stable }

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedDocument {
	pub uri: String,
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default, rename = "feed-for")]
	pub feed_for: Vec<String>,
	#[serde(default)]
	pub feeds: Vec<FeedReference>,
	#[serde(default)]
	pub implementations: Vec<ImplementationDocument>,
	/// Seconds since the epoch, local feeds use the file's modification time instead.
	#[serde(default, rename = "last-modified")]
	pub last_modified: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplementationDocument {
	/// Digest such as `sha256=...`, or a path for local implementations.
	pub id: String,
	pub version: String,
	#[serde(default)]
	pub os: Option<String>,
	#[serde(default)]
	pub machine: Option<String>,
	#[serde(default = "default_stability")]
	pub stability: Stability,
	#[serde(default)]
	pub main: Option<String>,
	#[serde(default)]
	pub requires: Vec<DependencyDocument>,
	#[serde(default)]
	pub bindings: Vec<Binding>,
	#[serde(default)]
	pub archives: Vec<Archive>,
	/// Name of the native package providing this implementation.
	#[serde(default)]
	pub package: Option<String>,
	#[serde(default)]
	pub installed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyDocument {
	pub interface: String,
	/// A condition like `>= 1.0 < 2`.
	#[serde(default)]
	pub version: Option<String>,
	#[serde(default)]
	pub machine: Option<String>,
	#[serde(default)]
	pub optional: bool,
	#[serde(default, rename = "use")]
	pub use_tag: Option<String>,
	#[serde(default)]
	pub bindings: Vec<Binding>,
}

impl DependencyDocument {
	fn into_dependency(self) -> crate::Result<Dependency> {
		let mut restrictions = Vec::new();
		if let Some(condition) = &self.version {
			restrictions.push(Restriction::Version(VersionBounds::parse(condition)?));
		}
		if let Some(machine) = self.machine {
			restrictions.push(Restriction::Machine(Some(machine)));
		}
		Ok(Dependency {
			interface: self.interface,
			restrictions,
			importance: if self.optional { Importance::Recommended } else { Importance::Essential },
			use_tag: self.use_tag,
			bindings: self.bindings,
		})
	}
}

impl FeedDocument {
	pub fn from_slice(data: &[u8]) -> crate::Result<Self> {
		Ok(serde_json::from_slice(data)?)
	}

	/// Converts the document into a [`Feed`] loaded from `url`.
	/// 
	/// Relative implementation ids in local feeds are resolved against the feed's directory.
	pub fn into_feed(self, url: &str) -> crate::Result<Feed> {
		let base_dir = if is_local_uri(url) {
			std::path::Path::new(url).parent().map(std::path::Path::to_path_buf)
		} else {
			None
		};

		let mut implementations = BTreeMap::new();
		for doc in self.implementations {
			let version = Version::new(&doc.version)?;
			let requires = doc.requires.into_iter()
				.map(DependencyDocument::into_dependency)
				.collect::<crate::Result<Vec<_>>>()?;

			let (id, kind) = if let Some(package) = doc.package {
				(doc.id, ImplementationKind::Distribution { package, installed: doc.installed })
			} else if doc.id.starts_with('.') {
				let base_dir = base_dir.as_ref().ok_or_else(|| crate::Error::Validation(
					format!("relative implementation id '{}' in remote feed {}", doc.id, url)
				))?;
				let path = if doc.id == "." { base_dir.clone() } else { base_dir.join(&doc.id) };
				(path.to_string_lossy().to_string(), ImplementationKind::Local)
			} else if doc.id.starts_with('/') {
				(doc.id, ImplementationKind::Local)
			} else {
				(doc.id, ImplementationKind::Store { archives: doc.archives })
			};

			let implementation = Implementation {
				id: id.clone(),
				feed: url.to_string(),
				version,
				os: doc.os,
				machine: doc.machine,
				upstream_stability: doc.stability,
				user_stability: None,
				requires,
				bindings: doc.bindings,
				main: doc.main,
				kind,
			};
			implementations.insert(id, Arc::new(implementation));
		}

		Ok(Feed {
			url: url.to_string(),
			name: self.name,
			feed_for: self.feed_for.into_iter().collect(),
			feeds: self.feeds,
			implementations,
			last_modified: self.last_modified,
			last_checked: None,
		})
	}
}

#[cfg(test)]
mod test {
	use super::*;

	const FEED: &str = r#"{
		"uri": "http://example.com/app",
		"implementations": [
			{"id": "sha256=abc", "version": "1.0", "machine": "x86_64", "requires": [{"interface": "http://example.com/lib", "version": ">= 2"}]},
			{"id": "pkg", "version": "0.9", "package": "app", "installed": true}
		]
	}"#;

	#[test]
	fn parses_implementations() {
		let feed = FeedDocument::from_slice(FEED.as_bytes()).unwrap().into_feed("http://example.com/app").unwrap();
		assert_eq!(feed.implementations.len(), 2);
		let imp = &feed.implementations["sha256=abc"];
		assert_eq!(imp.stability(), Stability::Stable);
		assert_eq!(imp.requires[0].restrictions.len(), 1);
		assert!(feed.implementations["pkg"].is_distribution());
	}

	#[test]
	fn relative_ids_resolve_against_local_feed() {
		let doc = FeedDocument {
			uri: "/feeds/app.json".to_string(),
			implementations: vec![ImplementationDocument {
				id: ".".to_string(), version: "1".to_string(), os: None, machine: None, stability: Stability::Stable,
				main: None, requires: vec![], bindings: vec![], archives: vec![], package: None, installed: false,
			}],
			..Default::default()
		};
		let feed = doc.into_feed("/feeds/app.json").unwrap();
		assert!(feed.implementations.contains_key("/feeds"));
	}

	#[test]
	fn relative_ids_are_rejected_in_remote_feeds() {
		let mut doc = FeedDocument::from_slice(FEED.as_bytes()).unwrap();
		doc.implementations[0].id = "./x".to_string();
		assert!(doc.into_feed("http://example.com/app").is_err());
	}
}
