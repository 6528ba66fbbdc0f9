//! Library error type.

pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("reqwest error: {0}")]
	Reqwest(#[from] reqwest::Error),
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),
	#[error("JSON error: {0}")]
	SerdeJSON(#[from] serde_json::Error),
	#[error("bincode error: {0}")]
	Bincode(#[from] bincode::Error),
	#[error("parsing error: {0}")]
	Parse(String),
	#[error("validation error: {0}")]
	Validation(String),
	/// The string given as an interface is neither a URL nor an existing local feed.
	#[error("bad interface name '{0}'")]
	InvalidInterfaceUri(String),
	/// An operation needed a complete set of selections.
	#[error("selections are not ready: {0}")]
	NotReady(String),
	#[error("build failed: {0}")]
	Build(String),
	#[error("download failed: {0}")]
	Download(#[from] crate::fetch::DownloadError),
	#[error("store error: {0}")]
	Store(#[from] crate::store::StoreError),
	#[error("signature error: {0}")]
	Signature(#[from] crate::trust::SignatureError),
}
