//! Content addressed store of implementations.
//! 
//! Each implementation lives in a directory named after its id, for instance `sha256=...`,
//! together with the manifest it was verified against.

pub mod manifest;
pub mod archive;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	/// Nothing is stored under the id.
	#[error("implementation {0} is not in the store")]
	NotStored(String),
	/// The content does not hash to the id.
	#[error("digest mismatch for {id}: content hashes to {actual}")]
	BadDigest { id: String, actual: String },
	#[error("unsupported digest in '{0}'")]
	UnsupportedAlgorithm(String),
	#[error("unsupported archive type '{0}'")]
	UnsupportedArchive(String),
	#[error("validation error: {0}")]
	Validation(String),
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),
	#[error("zip error: {0}")]
	Zip(#[from] zip::result::ZipError),
	#[error("walkdir error: {0}")]
	WalkDir(#[from] walkdir::Error),
}

#[derive(Debug, Clone)]
pub struct Stores {
	dir: std::path::PathBuf,
}

impl Stores {
	pub fn new(config: &crate::Config) -> Self {
		Self { dir: config.implementations_dir() }
	}

	fn check_id(id: &str) -> Result<(), StoreError> {
		match id.split_once('=') {
			Some((manifest::ALGORITHM, value)) if !value.is_empty() && value.chars().all(|c| c.is_ascii_hexdigit()) => Ok(()),
			_ => Err(StoreError::UnsupportedAlgorithm(id.to_string())),
		}
	}

	/// Finds a stored implementation.
	/// 
	/// # Errors
	/// - [`StoreError::NotStored`] when there is nothing under `id`.
	/// - [`StoreError::BadDigest`] when the stored manifest does not match `id`.
	pub fn lookup(&self, id: &str) -> Result<std::path::PathBuf, StoreError> {
		Self::check_id(id).map_err(|_| StoreError::NotStored(id.to_string()))?;
		let path = self.dir.join(id);
		if !path.is_dir() {
			return Err(StoreError::NotStored(id.to_string()));
		}

		let stored = std::fs::read_to_string(path.join(manifest::MANIFEST_FILE))
			.map_err(|_| StoreError::BadDigest { id: id.to_string(), actual: "no manifest".to_string() })?;
		let actual = manifest::digest_of(&stored);
		if actual != id {
			return Err(StoreError::BadDigest { id: id.to_string(), actual });
		}
		Ok(path)
	}

	pub fn contains(&self, id: &str) -> bool {
		self.lookup(id).is_ok()
	}

	/// Unpacks an archive and stores it under `id` once its digest is verified.
	/// 
	/// # Parameters
	/// - `id` - Expected digest of the unpacked implementation.
	/// - `data` - The downloaded archive.
	/// - `archive` - Describes the archive type and which sub-directory to keep.
	pub fn add_archive(&self, id: &str, data: &[u8], archive: &crate::model::Archive) -> Result<std::path::PathBuf, StoreError> {
		Self::check_id(id)?;
		let final_path = self.dir.join(id);
		if final_path.is_dir() {
			log::info!("{} is already stored, skipping.", id);
			return Ok(final_path);
		}

		let mime_type = archive.mime_type.as_deref()
			.or_else(|| archive::guess_type(&archive.href))
			.ok_or_else(|| StoreError::UnsupportedArchive(archive.href.clone()))?;

		std::fs::create_dir_all(&self.dir)?;
		let tmp = tempfile::Builder::new().prefix("tmp-").tempdir_in(&self.dir)?;
		archive::extract(data, mime_type, tmp.path())?;

		let root = match &archive.extract {
			Some(sub) => {
				let root = tmp.path().join(sub);
				if !root.starts_with(tmp.path()) || !root.is_dir() {
					return Err(StoreError::Validation(format!("archive {} has no directory '{}'", archive.href, sub)));
				}
				root
			},
			None => tmp.path().to_path_buf(),
		};

		let text = manifest::generate(&root)?;
		let actual = manifest::digest_of(&text);
		if actual != id {
			return Err(StoreError::BadDigest { id: id.to_string(), actual });
		}
		std::fs::write(root.join(manifest::MANIFEST_FILE), text)?;

		std::fs::rename(&root, &final_path)?;
		log::info!("Added {} to the store", id);
		Ok(final_path)
	}
}
