//! Asking the user whether to trust the keys signing a feed.

use tokio::sync::{mpsc, oneshot};

use super::KeyInfo;

/// Keys waiting for the user's decision, `reply` is sent once every key was accepted or one denied.
#[derive(Debug)]
pub struct ConfirmRequest {
	pub feed: String,
	pub keys: Vec<KeyInfo>,
	pub reply: oneshot::Sender<()>,
}

/// Sends confirmation requests to whoever drives the user interface.
#[derive(Debug, Clone, Default)]
pub struct KeyConfirmer {
	requests: Option<mpsc::UnboundedSender<ConfirmRequest>>,
}

impl KeyConfirmer {
	pub fn new() -> (Self, mpsc::UnboundedReceiver<ConfirmRequest>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self { requests: Some(tx) }, rx)
	}

	/// Never asks, untrusted keys stay untrusted.
	pub fn disabled() -> Self {
		Self { requests: None }
	}

	/// Waits for the user to go through `keys`. Returns straight away when nobody is listening.
	pub async fn confirm(&self, feed: &str, keys: Vec<KeyInfo>) {
		let Some(requests) = &self.requests else {
			log::warn!("Can't ask to confirm keys for {}, nobody is listening", feed);
			return;
		};

		let (reply, done) = oneshot::channel();
		if requests.send(ConfirmRequest { feed: feed.to_string(), keys, reply }).is_err() {
			log::warn!("Key confirmation for {} was dropped", feed);
			return;
		}
		/* A dropped sender means the confirmation was abandoned */
		let _ = done.await;
	}
}
