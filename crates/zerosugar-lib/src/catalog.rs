//! Cache of interfaces and feeds.
//! 
//! Downloaded feeds are kept in memory and stored with bincode in the feeds directory.
//! Local feeds (absolute paths) are read straight from disk.
//! The user's per interface settings are JSON files in the interfaces directory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::model::*;

pub mod document;
pub use document::FeedDocument;

/// A check attempted less than this many seconds ago keeps a feed fresh even if it failed.
pub const FAILED_CHECK_DELAY: u64 = 60 * 60;

pub(crate) fn now() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Debug)]
pub struct IfaceCache {
	feeds_dir: std::path::PathBuf,
	interfaces_dir: std::path::PathBuf,
	interfaces: Mutex<HashMap<String, Arc<Interface>>>,
	feeds: Mutex<HashMap<String, Arc<Feed>>>,
	last_check_attempts: Mutex<HashMap<String, u64>>,
}

impl IfaceCache {
	pub fn new(config: &crate::Config) -> Self {
		Self {
			feeds_dir: config.feeds_dir(),
			interfaces_dir: config.interfaces_dir(),
			interfaces: Mutex::new(HashMap::new()),
			feeds: Mutex::new(HashMap::new()),
			last_check_attempts: Mutex::new(HashMap::new()),
		}
	}

	fn feed_path(&self, url: &str) -> std::path::PathBuf {
		self.feeds_dir.join(escape(url))
	}

	fn interface_path(&self, uri: &str) -> std::path::PathBuf {
		self.interfaces_dir.join(escape(uri) + ".json")
	}

	/// Gets the user's settings for an interface, defaults when there are none.
	pub fn get_interface(&self, uri: &str) -> Arc<Interface> {
		if let Some(iface) = lock(&self.interfaces).get(uri) {
			return iface.clone();
		}

		let path = self.interface_path(uri);
		let iface = match std::fs::read(&path) {
			Ok(data) => match serde_json::from_slice::<Interface>(&data) {
				Ok(mut iface) => {
					iface.uri = uri.to_string();
					iface
				},
				Err(e) => {
					log::warn!("Ignoring invalid settings for {} in {}: {}", uri, path.display(), e);
					Interface::new(uri)
				}
			},
			Err(_) => Interface::new(uri),
		};

		let iface = Arc::new(iface);
		lock(&self.interfaces).insert(uri.to_string(), iface.clone());
		iface
	}

	/// Stores the user's settings for an interface.
	pub fn save_interface(&self, iface: &Interface) -> crate::Result<()> {
		std::fs::create_dir_all(&self.interfaces_dir)?;
		std::fs::write(self.interface_path(&iface.uri), serde_json::to_vec_pretty(iface)?)?;
		lock(&self.interfaces).insert(iface.uri.clone(), Arc::new(iface.clone()));
		Ok(())
	}

	/// Every feed that may provide implementations of `uri`, apart from its own.
	pub fn feed_references(&self, uri: &str) -> crate::Result<Vec<FeedReference>> {
		let mut references = self.get_interface(uri).extra_feeds.clone();
		if let Some(main) = self.get_feed(uri)? {
			references.extend(main.feeds.iter().cloned());
		}
		Ok(references)
	}

	/// Gets a feed, loading it from disk if needed.
	/// 
	/// # Returns
	/// `None` when the feed is not cached.
	/// 
	/// # Errors
	/// When a local feed or the cached copy can't be read or parsed.
	pub fn get_feed(&self, url: &str) -> crate::Result<Option<Arc<Feed>>> {
		if let Some(feed) = lock(&self.feeds).get(url) {
			return Ok(Some(feed.clone()));
		}

		let feed = if is_local_uri(url) {
			let data = std::fs::read(url)?;
			let mut feed = FeedDocument::from_slice(&data)?.into_feed(url)?;
			let modified = std::fs::metadata(url)?.modified()?;
			let modified = modified.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
			feed.last_modified = Some(modified);
			feed.last_checked = Some(modified);
			feed
		} else {
			let path = self.feed_path(url);
			match std::fs::read(&path) {
				Ok(data) => bincode::deserialize::<Feed>(&data)?,
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
				Err(e) => return Err(e.into()),
			}
		};

		let feed = Arc::new(feed);
		lock(&self.feeds).insert(url.to_string(), feed.clone());
		Ok(Some(feed))
	}

	/// Adds a feed to the in-memory cache only.
	pub fn add_feed(&self, feed: Feed) -> Arc<Feed> {
		let feed = Arc::new(feed);
		lock(&self.feeds).insert(feed.url.clone(), feed.clone());
		feed
	}

	/// Replaces the cached copy of a downloaded feed.
	/// 
	/// # Errors
	/// - [`Error::Validation`](crate::Error::Validation) if the document is for another URL
	/// or is older than the copy already cached.
	pub fn import_feed(&self, url: &str, document: FeedDocument) -> crate::Result<Arc<Feed>> {
		if document.uri != url {
			return Err(crate::Error::Validation(format!("feed downloaded from {} claims to be {}", url, document.uri)));
		}

		let mut feed = document.into_feed(url)?;
		if let Some(old) = self.get_feed(url)? {
			if let (Some(old_modified), Some(new_modified)) = (old.last_modified, feed.last_modified) {
				if new_modified < old_modified {
					return Err(crate::Error::Validation(format!("new copy of {} is older than the cached one", url)));
				}
			}
		}
		if feed.last_modified.is_none() {
			feed.last_modified = Some(now());
		}
		feed.last_checked = Some(now());

		std::fs::create_dir_all(&self.feeds_dir)?;
		std::fs::write(self.feed_path(url), bincode::serialize(&feed)?)?;
		lock(&self.last_check_attempts).remove(url);
		log::info!("Imported feed {}", url);
		Ok(self.add_feed(feed))
	}

	/// Drops everything memoized about an interface and its feeds, they are reloaded on next use.
	pub fn invalidate(&self, uri: &str) {
		let extra = lock(&self.interfaces).remove(uri).map(|i| i.extra_feeds.clone()).unwrap_or_default();
		let mut feeds = lock(&self.feeds);
		if let Some(main) = feeds.remove(uri) {
			for reference in &main.feeds {
				feeds.remove(&reference.uri);
			}
		}
		for reference in extra {
			feeds.remove(&reference.uri);
		}
	}

	/// Notes that the feed is about to be checked for updates, forgotten once a new copy is imported.
	pub fn mark_as_checking(&self, url: &str) {
		lock(&self.last_check_attempts).insert(url.to_string(), now());
	}

	pub fn last_check_attempt(&self, url: &str) -> Option<u64> {
		lock(&self.last_check_attempts).get(url).copied()
	}

	/// Overrides the stability of a cached implementation until the feed is reloaded.
	pub fn set_stability(&self, feed_url: &str, id: &str, stability: Stability) {
		let mut feeds = lock(&self.feeds);
		let Some(feed) = feeds.get(feed_url) else { return };
		let Some(implementation) = feed.implementations.get(id) else { return };

		let mut implementation = (**implementation).clone();
		implementation.upstream_stability = stability;
		let mut feed = (**feed).clone();
		feed.implementations.insert(id.to_string(), Arc::new(implementation));
		feeds.insert(feed_url.to_string(), Arc::new(feed));
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn document(uri: &str, modified: u64) -> FeedDocument {
		FeedDocument { uri: uri.to_string(), last_modified: Some(modified), ..Default::default() }
	}

	#[test]
	fn imported_feeds_survive_a_new_cache() {
		let dir = tempfile::tempdir().unwrap();
		let config = crate::Config::with_root(dir.path());
		IfaceCache::new(&config).import_feed("http://example.com/a", document("http://example.com/a", 10)).unwrap();
		let feed = IfaceCache::new(&config).get_feed("http://example.com/a").unwrap().unwrap();
		assert_eq!(feed.last_modified, Some(10));
		assert!(feed.last_checked.is_some());
	}

	#[test]
	fn import_rejects_wrong_url() {
		let dir = tempfile::tempdir().unwrap();
		let cache = IfaceCache::new(&crate::Config::with_root(dir.path()));
		assert!(cache.import_feed("http://example.com/a", document("http://example.com/b", 1)).is_err());
	}

	#[test]
	fn import_rejects_older_feed() {
		let dir = tempfile::tempdir().unwrap();
		let cache = IfaceCache::new(&crate::Config::with_root(dir.path()));
		cache.import_feed("http://example.com/a", document("http://example.com/a", 10)).unwrap();
		assert!(cache.import_feed("http://example.com/a", document("http://example.com/a", 5)).is_err());
	}

	#[test]
	fn import_forgets_the_check_attempt() {
		let dir = tempfile::tempdir().unwrap();
		let cache = IfaceCache::new(&crate::Config::with_root(dir.path()));
		cache.mark_as_checking("http://example.com/a");
		assert!(cache.last_check_attempt("http://example.com/a").is_some());
		cache.import_feed("http://example.com/a", document("http://example.com/a", 10)).unwrap();
		assert_eq!(cache.last_check_attempt("http://example.com/a"), None);
	}

	#[test]
	fn missing_feed_is_none() {
		let dir = tempfile::tempdir().unwrap();
		let cache = IfaceCache::new(&crate::Config::with_root(dir.path()));
		assert!(cache.get_feed("http://example.com/a").unwrap().is_none());
	}

	#[test]
	fn invalidate_rereads_interface_settings() {
		let dir = tempfile::tempdir().unwrap();
		let cache = IfaceCache::new(&crate::Config::with_root(dir.path()));
		assert!(cache.get_interface("http://example.com/a").extra_feeds.is_empty());

		let mut iface = Interface::new("http://example.com/a");
		iface.extra_feeds.push(FeedReference::new("/tmp/built.json"));
		let other = IfaceCache::new(&crate::Config::with_root(dir.path()));
		other.save_interface(&iface).unwrap();

		assert!(cache.get_interface("http://example.com/a").extra_feeds.is_empty());
		cache.invalidate("http://example.com/a");
		assert_eq!(cache.get_interface("http://example.com/a").extra_feeds.len(), 1);
	}
}
