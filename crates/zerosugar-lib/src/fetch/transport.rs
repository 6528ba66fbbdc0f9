use async_trait::async_trait;

use super::{DownloadError, DownloadProgress};

/// Fetches resources by URL.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
	/// Downloads `url` completely, reporting bytes as they arrive.
	/// Dropping the returned future aborts the transfer.
	async fn get(&self, url: &str, progress: &DownloadProgress) -> Result<Vec<u8>, DownloadError>;
}

/// Downloads over HTTP with reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
	client: reqwest::Client,
}

impl HttpTransport {
	pub fn new(config: &crate::Config) -> crate::Result<Self> {
		let client = reqwest::Client::builder()
			.https_only(config.https_only())
			.build()?;
		Ok(Self { client })
	}
}

#[async_trait]
impl Transport for HttpTransport {
	async fn get(&self, url: &str, progress: &DownloadProgress) -> Result<Vec<u8>, DownloadError> {
		log::info!("Downloading {}", url);
		let mut response = self.client
			.get(url)
			.send()
			.await?
			.error_for_status()?;
		progress.set_expected(response.content_length());

		let mut content = Vec::new();
		while let Some(chunk) = response.chunk().await? {
			progress.advance(chunk.len() as u64);
			content.extend_from_slice(&chunk);
		}
		log::debug!("Downloaded {} bytes from {}", content.len(), url);
		Ok(content)
	}
}
