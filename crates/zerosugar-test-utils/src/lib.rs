//! Various helper functions for testing
//! 
//! functions in this module should use results and not use any panics to avoid confusion in callers

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
pub use ed25519_dalek::SigningKey;

use zerosugar::fetch::{DownloadError, DownloadProgress, Transport};
use zerosugar::trust::SignedFeed;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("zerosugar error: {0}")]
	Zerosugar(#[from] zerosugar::Error),
	#[error("store error: {0}")]
	Store(#[from] zerosugar::store::StoreError),
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),
	#[error("JSON error: {0}")]
	SerdeJSON(#[from] serde_json::Error),
}

/// Serves resources from memory and remembers what was asked for.
#[derive(Debug, Default)]
pub struct MemoryTransport {
	resources: Mutex<HashMap<String, Vec<u8>>>,
	/// URLs whose download never ends.
	hanging: Mutex<HashSet<String>>,
	requests: Mutex<Vec<String>>,
}

impl MemoryTransport {
	pub fn add(&self, url: impl Into<String>, data: Vec<u8>) {
		self.resources.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(url.into(), data);
	}

	/// Makes every download of `url` wait forever.
	pub fn hang(&self, url: impl Into<String>) {
		self.hanging.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(url.into());
	}

	/// Every URL requested so far, in order.
	pub fn requests(&self) -> Vec<String> {
		self.requests.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
	}
}

#[async_trait]
impl Transport for MemoryTransport {
	async fn get(&self, url: &str, progress: &DownloadProgress) -> Result<Vec<u8>, DownloadError> {
		self.requests.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(url.to_string());

		let hangs = self.hanging.lock().unwrap_or_else(std::sync::PoisonError::into_inner).contains(url);
		if hangs {
			progress.set_expected(Some(1024));
			progress.advance(512);
			std::future::pending::<()>().await;
		}

		let data = self.resources.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(url).cloned();
		let data = data.ok_or_else(|| DownloadError::NotFound(url.to_string()))?;
		progress.set_expected(Some(data.len() as u64));
		progress.advance(data.len() as u64);
		Ok(data)
	}
}

/// A session in a temporary directory, downloading from memory.
pub struct TestEnv {
	pub dir: tempfile::TempDir,
	pub session: Arc<zerosugar::Session>,
	pub transport: Arc<MemoryTransport>,
}

impl TestEnv {
	pub fn new() -> Result<Self, Error> {
		Self::with_config(|_| {})
	}

	/// # Parameters
	/// - `configure` - Adjusts the config before the session is opened.
	pub fn with_config(configure: impl FnOnce(&mut zerosugar::Config)) -> Result<Self, Error> {
		let dir = tempfile::tempdir()?;
		let mut config = zerosugar::Config::with_root(dir.path());
		configure(&mut config);

		let transport = Arc::new(MemoryTransport::default());
		let fetcher = zerosugar::Fetcher::new(transport.clone(), Arc::new(zerosugar::fetch::NoDistribution));
		let session = Arc::new(zerosugar::Session::with_fetcher(config, fetcher)?);
		Ok(Self { dir, session, transport })
	}

	/// Path of a file inside the temporary directory.
	pub fn path(&self, name: &str) -> std::path::PathBuf {
		self.dir.path().join(name)
	}

	/// Puts a feed straight into the cache, as if it was downloaded earlier.
	pub fn cache_feed(&self, document: &serde_json::Value) -> Result<Arc<zerosugar::Feed>, Error> {
		let document: zerosugar::catalog::FeedDocument = serde_json::from_value(document.clone())?;
		let url = document.uri.clone();
		Ok(self.session.catalog.import_feed(&url, document)?)
	}

	/// Writes a local feed file and returns its path as a string.
	pub fn local_feed(&self, name: &str, document: &serde_json::Value) -> Result<String, Error> {
		let path = self.path(name);
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		std::fs::write(&path, serde_json::to_vec_pretty(document)?)?;
		Ok(path.to_string_lossy().to_string())
	}

	/// Stores an archive's content under its digest, as if it was downloaded earlier.
	pub fn store_archive(&self, archive: &[u8]) -> Result<String, Error> {
		let id = archive_digest(archive)?;
		let description = zerosugar::model::Archive {
			href: "cached.tar.gz".to_string(),
			size: None,
			extract: None,
			mime_type: None,
		};
		self.session.stores.add_archive(&id, archive, &description)?;
		Ok(id)
	}

	/// Sets the user's settings for an interface.
	pub fn set_interface(&self, iface: zerosugar::Interface) -> Result<(), Error> {
		Ok(self.session.catalog.save_interface(&iface)?)
	}
}

/// A key that is the same every run.
pub fn signing_key(seed: u8) -> SigningKey {
	SigningKey::from_bytes(&[seed; 32])
}

pub fn fingerprint(key: &SigningKey) -> String {
	zerosugar::trust::signature::fingerprint(&key.verifying_key())
}

/// Signs a feed document the way feeds are published.
pub fn signed_feed(document: &serde_json::Value, key: &SigningKey, signer: Option<&str>) -> Result<Vec<u8>, Error> {
	let signed = SignedFeed::sign(serde_json::to_string(document)?, &[(key, signer)]);
	Ok(serde_json::to_vec(&signed)?)
}

/// Builds a `.tar.gz` of regular files.
pub fn tar_gz(files: &[(&str, &[u8])]) -> Result<Vec<u8>, Error> {
	let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
	let mut builder = tar::Builder::new(encoder);
	for (name, content) in files {
		let mut header = tar::Header::new_gnu();
		header.set_size(content.len() as u64);
		header.set_mode(0o644);
		header.set_mtime(0);
		header.set_cksum();
		builder.append_data(&mut header, name, *content)?;
	}
	let mut encoder = builder.into_inner()?;
	encoder.flush()?;
	Ok(encoder.finish()?)
}

/// The store id the content of an archive gets.
pub fn archive_digest(archive: &[u8]) -> Result<String, Error> {
	let dir = tempfile::tempdir()?;
	zerosugar::store::archive::extract(archive, zerosugar::store::archive::TAR_GZ, dir.path())?;
	Ok(zerosugar::store::manifest::digest_directory(dir.path())?)
}
