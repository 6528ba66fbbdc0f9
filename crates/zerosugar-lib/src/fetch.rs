//! Downloads feeds and implementations.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::*;
use crate::trust::{KeyConfirmer, KeyInfo, SignatureError, SignedFeed};

pub mod monitor;
pub use monitor::{DownloadMonitor, DownloadProgress};

pub mod transport;
pub use transport::{HttpTransport, Transport};

/// Errors that can occur while fetching.
#[derive(Debug, Error)]
pub enum DownloadError {
	/// The implementation has nothing to download it from.
	#[error("implementation {0} has no archives to download.")]
	NoArchives(String),
	/// A local implementation is missing from the disk.
	#[error("local implementation {0} is missing.")]
	MissingLocal(String),
	#[error("the native package manager failed: {0}")]
	Distribution(String),
	#[error("resource {0} not found.")]
	NotFound(String),
	#[error("reqwest error: {0}")]
	Reqwest(#[from] reqwest::Error),
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),
}

/// Installs native packages.
#[async_trait]
pub trait Distribution: Send + Sync + std::fmt::Debug {
	async fn install(&self, package: &str) -> Result<(), DownloadError>;
}

/// Used when there is no package manager to talk to.
#[derive(Debug, Default)]
pub struct NoDistribution;

#[async_trait]
impl Distribution for NoDistribution {
	async fn install(&self, package: &str) -> Result<(), DownloadError> {
		Err(DownloadError::Distribution(format!("no package manager available to install {}", package)))
	}
}

#[derive(Debug, Clone)]
pub struct Fetcher {
	transport: Arc<dyn Transport>,
	distribution: Arc<dyn Distribution>,
}

impl Fetcher {
	pub fn new(transport: Arc<dyn Transport>, distribution: Arc<dyn Distribution>) -> Self {
		Self { transport, distribution }
	}

	/// Downloads a signed feed, checks its signatures and stores it in the cache.
	/// 
	/// Valid signatures from keys not yet trusted for the feed's domain are passed to `confirmer`.
	/// 
	/// # Errors
	/// - [`SignatureError::NotTrusted`] when no valid signature is trusted after asking.
	/// - Whatever [`IfaceCache::import_feed`](crate::IfaceCache::import_feed) refuses.
	pub async fn download_and_import_feed(&self, url: &str, session: &crate::Session, confirmer: &KeyConfirmer, monitor: &DownloadMonitor)
	-> crate::Result<Arc<Feed>> {
		session.catalog.mark_as_checking(url);

		let progress = monitor.start(url, None);
		let data = self.transport.get(url, &progress).await;
		progress.finish();
		let data = data?;

		let signed = SignedFeed::from_slice(&data)?;
		let valid = signed.verify()?;
		let domain = crate::trust::domain_from_url(url)?;

		let is_trusted = |session: &crate::Session| valid.iter().any(|s| session.trust.is_trusted(&s.fingerprint, &domain));
		if !is_trusted(session) {
			let keys = valid.iter()
				.map(|s| KeyInfo {
					fingerprint: s.fingerprint.clone(),
					domain: domain.clone(),
					user_id: s.signer.clone().unwrap_or_else(|| s.fingerprint.clone()),
				})
				.collect();
			log::info!("Feed {} is signed by untrusted keys, asking for confirmation", url);
			confirmer.confirm(url, keys).await;

			if !is_trusted(session) {
				return Err(SignatureError::NotTrusted.into());
			}
		}

		let document = crate::catalog::FeedDocument::from_slice(signed.payload.as_bytes())?;
		session.catalog.import_feed(url, document)
	}

	/// Makes an implementation available locally.
	/// 
	/// Archives are tried in order until one is stored, native packages are installed.
	pub async fn download_implementation(&self, implementation: &Implementation, session: &crate::Session, progress: &DownloadProgress)
	-> crate::Result<()> {
		match &implementation.kind {
			ImplementationKind::Store { archives } => {
				let mut last_error: crate::Error = DownloadError::NoArchives(implementation.id.clone()).into();
				for archive in archives {
					let data = match self.transport.get(&archive.href, progress).await {
						Ok(data) => data,
						Err(e) => {
							log::warn!("Failed to download {}: {}", archive.href, e);
							last_error = e.into();
							continue;
						}
					};
					match session.stores.add_archive(&implementation.id, &data, archive) {
						Ok(_) => return Ok(()),
						Err(e) => {
							log::warn!("Failed to store {} from {}: {}", implementation.id, archive.href, e);
							last_error = e.into();
						}
					}
				}
				Err(last_error)
			},
			ImplementationKind::Distribution { package, .. } => {
				log::info!("Installing native package {}", package);
				Ok(self.distribution.install(package).await?)
			},
			ImplementationKind::Local => Err(DownloadError::MissingLocal(implementation.id.clone()).into()),
		}
	}

	/// Size to expect when downloading an implementation.
	pub fn expected_size(implementation: &Implementation) -> Option<u64> {
		match &implementation.kind {
			ImplementationKind::Store { archives } => archives.first().and_then(|a| a.size),
			_ => None,
		}
	}
}
