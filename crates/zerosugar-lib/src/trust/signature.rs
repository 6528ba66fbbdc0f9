//! Signed feed envelopes.
//! 
//! A downloaded feed is a JSON envelope holding the feed document as text
//! and ed25519 signatures over that text. The fingerprint of a key is the hex of its public key.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Serialize, Deserialize};

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
	#[error("feed is not signed")]
	NotSigned,
	#[error("invalid key fingerprint '{0}'")]
	BadFingerprint(String),
	#[error("invalid signature encoding: {0}")]
	BadEncoding(String),
	#[error("no valid signatures on feed")]
	NoValidSignatures,
	#[error("not signed with a trusted key")]
	NotTrusted,
	#[error("malformed signed feed: {0}")]
	Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSignature {
	/// Hex encoded public key.
	pub fingerprint: String,
	/// Base64 encoded signature of the payload.
	pub signature: String,
	/// Who the key belongs to, shown when asking the user.
	#[serde(default)]
	pub signer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedFeed {
	pub payload: String,
	#[serde(default)]
	pub signatures: Vec<FeedSignature>,
}

/// A signature that checked out against its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidSignature {
	pub fingerprint: String,
	pub signer: Option<String>,
}

pub fn fingerprint(key: &VerifyingKey) -> String {
	hex::encode(key.as_bytes())
}

fn verifying_key(fingerprint: &str) -> Result<VerifyingKey, SignatureError> {
	let bytes: [u8; 32] = hex::decode(fingerprint)
		.ok()
		.and_then(|b| b.try_into().ok())
		.ok_or_else(|| SignatureError::BadFingerprint(fingerprint.to_string()))?;
	VerifyingKey::from_bytes(&bytes).map_err(|_| SignatureError::BadFingerprint(fingerprint.to_string()))
}

fn check(payload: &[u8], signature: &FeedSignature) -> Result<(), SignatureError> {
	let key = verifying_key(&signature.fingerprint)?;
	let bytes: [u8; 64] = BASE64.decode(&signature.signature)
		.map_err(|e| SignatureError::BadEncoding(e.to_string()))?
		.try_into()
		.map_err(|_| SignatureError::BadEncoding("signature is not 64 bytes".to_string()))?;
	key.verify(payload, &Signature::from_bytes(&bytes))
		.map_err(|e| SignatureError::BadEncoding(e.to_string()))
}

impl SignedFeed {
	pub fn from_slice(data: &[u8]) -> Result<Self, SignatureError> {
		Ok(serde_json::from_slice(data)?)
	}

	/// Signs `payload` with every key given.
	pub fn sign(payload: String, keys: &[(&SigningKey, Option<&str>)]) -> Self {
		let signatures = keys.iter()
			.map(|(key, signer)| FeedSignature {
				fingerprint: fingerprint(&key.verifying_key()),
				signature: BASE64.encode(key.sign(payload.as_bytes()).to_bytes()),
				signer: signer.map(str::to_string),
			})
			.collect();
		Self { payload, signatures }
	}

	/// Checks every signature, invalid ones are logged and left out.
	/// 
	/// # Errors
	/// - [`SignatureError::NotSigned`] when there are no signatures at all.
	/// - [`SignatureError::NoValidSignatures`] when none of them verify.
	pub fn verify(&self) -> Result<Vec<ValidSignature>, SignatureError> {
		if self.signatures.is_empty() {
			return Err(SignatureError::NotSigned);
		}

		let valid: Vec<ValidSignature> = self.signatures.iter()
			.filter_map(|s| match check(self.payload.as_bytes(), s) {
				Ok(()) => Some(ValidSignature { fingerprint: s.fingerprint.clone(), signer: s.signer.clone() }),
				Err(e) => {
					log::warn!("Bad signature from {}: {}", s.fingerprint, e);
					None
				}
			})
			.collect();

		if valid.is_empty() {
			Err(SignatureError::NoValidSignatures)
		} else {
			Ok(valid)
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn key(seed: u8) -> SigningKey { SigningKey::from_bytes(&[seed; 32]) }

	#[test]
	fn signed_feed_verifies() {
		let k = key(1);
		let signed = SignedFeed::sign("{}".to_string(), &[(&k, Some("Alice"))]);
		let valid = signed.verify().unwrap();
		assert_eq!(valid, vec![ValidSignature { fingerprint: fingerprint(&k.verifying_key()), signer: Some("Alice".to_string()) }]);
	}

	#[test]
	fn tampered_payload_fails() {
		let mut signed = SignedFeed::sign("{}".to_string(), &[(&key(1), None)]);
		signed.payload = "{ }".to_string();
		assert!(matches!(signed.verify(), Err(SignatureError::NoValidSignatures)));
	}

	#[test]
	fn unsigned_feed_fails() {
		let signed = SignedFeed { payload: "{}".to_string(), signatures: vec![] };
		assert!(matches!(signed.verify(), Err(SignatureError::NotSigned)));
	}
}
