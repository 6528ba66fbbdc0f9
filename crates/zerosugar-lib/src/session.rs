//! Everything solves and downloads share.

use std::sync::Arc;

#[derive(Debug)]
pub struct Session {
	pub config: crate::Config,
	pub catalog: crate::IfaceCache,
	pub stores: crate::Stores,
	pub trust: crate::TrustDb,
	pub fetcher: crate::Fetcher,
}

impl Session {
	/// A session downloading over HTTP without a native package manager.
	pub fn new(config: crate::Config) -> crate::Result<Self> {
		let fetcher = crate::Fetcher::new(
			Arc::new(crate::fetch::HttpTransport::new(&config)?),
			Arc::new(crate::fetch::NoDistribution),
		);
		Self::with_fetcher(config, fetcher)
	}

	pub fn with_fetcher(config: crate::Config, fetcher: crate::Fetcher) -> crate::Result<Self> {
		Ok(Self {
			catalog: crate::IfaceCache::new(&config),
			stores: crate::Stores::new(&config),
			trust: crate::TrustDb::load(&config)?,
			fetcher,
			config,
		})
	}

	/// Whether the implementation can be used without fetching anything.
	/// 
	/// Native packages must be installed, local ones must exist and others must be in the store.
	/// Store errors count as not cached.
	pub fn is_cached(&self, implementation: &crate::Implementation) -> bool {
		match &implementation.kind {
			crate::model::ImplementationKind::Distribution { installed, .. } => *installed,
			crate::model::ImplementationKind::Local => implementation.local_path().is_some_and(|p| p.exists()),
			crate::model::ImplementationKind::Store { .. } => match self.stores.lookup(&implementation.id) {
				Ok(_) => true,
				Err(e) => {
					log::trace!("{} is not cached: {}", implementation.id, e);
					false
				}
			}
		}
	}

	/// Where a cached implementation lives, `None` for native packages.
	pub fn implementation_path(&self, implementation: &crate::Implementation) -> crate::Result<Option<std::path::PathBuf>> {
		match &implementation.kind {
			crate::model::ImplementationKind::Distribution { .. } => Ok(None),
			crate::model::ImplementationKind::Local => Ok(implementation.local_path()),
			crate::model::ImplementationKind::Store { .. } => Ok(Some(self.stores.lookup(&implementation.id)?)),
		}
	}
}
