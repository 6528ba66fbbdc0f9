//! Which keys the user trusts to sign feeds, per domain.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

pub mod signature;
pub mod confirm;
pub use confirm::{ConfirmRequest, KeyConfirmer};
pub use signature::{SignatureError, SignedFeed, ValidSignature};

/// A key the user is asked to trust.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
	pub fingerprint: String,
	pub domain: String,
	/// Who the key claims to belong to, the fingerprint when unknown.
	pub user_id: String,
}

/// Gets the domain keys are trusted for when signing `url`.
pub fn domain_from_url(url: &str) -> crate::Result<String> {
	let parsed = url::Url::parse(url).map_err(|e| crate::Error::Parse(format!("{}: {}", url, e)))?;
	let host = parsed.host_str().ok_or_else(|| crate::Error::Parse(format!("{} has no host", url)))?;
	Ok(match parsed.port() {
		Some(port) => format!("{}:{}", host, port),
		None => host.to_string(),
	})
}

/// Trusted fingerprints, stored as JSON.
#[derive(Debug)]
pub struct TrustDb {
	path: std::path::PathBuf,
	keys: Mutex<BTreeMap<String, BTreeSet<String>>>,
}

impl TrustDb {
	/// Loads the database, a missing file is an empty database.
	pub fn load(config: &crate::Config) -> crate::Result<Self> {
		let path = config.trust_db_path();
		let keys = match std::fs::read(&path) {
			Ok(data) => serde_json::from_slice(&data)?,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
			Err(e) => return Err(e.into()),
		};
		Ok(Self { path, keys: Mutex::new(keys) })
	}

	fn keys(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, BTreeSet<String>>> {
		self.keys.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
	}

	pub fn is_trusted(&self, fingerprint: &str, domain: &str) -> bool {
		self.keys().get(fingerprint).is_some_and(|domains| domains.contains(domain))
	}

	/// Trusts the key for `domain` and saves the database.
	pub fn trust_key(&self, fingerprint: &str, domain: &str) -> crate::Result<()> {
		let mut keys = self.keys();
		if keys.entry(fingerprint.to_string()).or_default().insert(domain.to_string()) {
			log::info!("Trusting {} for {}", fingerprint, domain);
			if let Some(dir) = self.path.parent() {
				std::fs::create_dir_all(dir)?;
			}
			std::fs::write(&self.path, serde_json::to_vec_pretty(&*keys)?)?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test] fn domain_is_host() { assert_eq!(domain_from_url("http://services.sugarlabs.org/x").unwrap(), "services.sugarlabs.org") }
	#[test] fn domain_keeps_port() { assert_eq!(domain_from_url("http://localhost:8000/x").unwrap(), "localhost:8000") }

	#[test]
	fn trust_is_persisted() {
		let dir = tempfile::tempdir().unwrap();
		let config = crate::Config::with_root(dir.path());
		TrustDb::load(&config).unwrap().trust_key("AA", "example.com").unwrap();
		let db = TrustDb::load(&config).unwrap();
		assert!(db.is_trusted("AA", "example.com"));
		assert!(!db.is_trusted("AA", "example.org"));
	}
}
