//! Request-signing hook for HTTP-backed sources.
//!
//! Signing is a pure function of key material and the canonical request
//! message, so it is testable without any network. The canonical request
//! URL is always the full absolute URI (lowercased); the same
//! canonicalization applies whether the request body is buffered or
//! streamed.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Authorization scheme emitted by [`HmacSigner`].
pub const HMAC_SCHEME: &str = "HMAC";

/// Produces an authorization header for an outbound request.
///
/// Sources that speak HTTP apply the signer uniformly to every request
/// (feed and artifact alike).
pub trait RequestSigner: Send + Sync {
    /// Sign a request, returning `(header_name, header_value)`.
    fn sign(&self, method: &str, url: &str, body: &[u8]) -> (String, String);
}

/// HMAC-SHA256 request signer.
///
/// Emits `Authorization: HMAC {keyId}:{signature}:{nonce}:{timestamp}`
/// where the signature MACs the canonical message built by
/// [`canonical_message`].
#[derive(Debug, Clone)]
pub struct HmacSigner {
    key_id: String,
    secret: Vec<u8>,
}

impl HmacSigner {
    /// Create a signer from a key id and its shared secret.
    pub fn new(key_id: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            key_id: key_id.into(),
            secret: secret.into(),
        }
    }
}

impl RequestSigner for HmacSigner {
    fn sign(&self, method: &str, url: &str, body: &[u8]) -> (String, String) {
        let nonce = hex::encode(rand::rng().random::<[u8; 16]>());
        let seconds = seconds_since_epoch();
        let message = canonical_message(
            &self.key_id,
            method,
            url,
            seconds,
            &nonce,
            &content_hash(body),
        );
        let signature = mac(&self.secret, &message);
        (
            "authorization".to_string(),
            format!("{HMAC_SCHEME} {}:{signature}:{nonce}:{seconds}", self.key_id),
        )
    }
}

/// Base64 SHA-256 digest of the request body. Empty bodies hash to the
/// digest of zero bytes.
pub fn content_hash(body: &[u8]) -> String {
    BASE64.encode(Sha256::digest(body))
}

/// Build the canonical message that gets MACed.
///
/// Fields are concatenated without separators: key id, uppercase method,
/// lowercased absolute URI, seconds since epoch, nonce, content hash.
pub fn canonical_message(
    key_id: &str,
    method: &str,
    url: &str,
    seconds: u64,
    nonce: &str,
    content_hash: &str,
) -> String {
    format!(
        "{key_id}{}{}{seconds}{nonce}{content_hash}",
        method.to_uppercase(),
        url.to_lowercase(),
    )
}

/// HMAC-SHA256 over `message`, base64-encoded.
pub fn mac(secret: &[u8], message: &str) -> String {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

fn seconds_since_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_message_shape() {
        let msg = canonical_message(
            "key-1",
            "get",
            "HTTPS://Example.com/Feed",
            1700000000,
            "abc",
            "hash==",
        );
        assert_eq!(msg, "key-1GEThttps://example.com/feed1700000000abchash==");
    }

    #[test]
    fn content_hash_known_answer() {
        // base64(sha256(""))
        assert_eq!(
            content_hash(b""),
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn mac_known_answer() {
        // RFC 4231 test case 2: key "Jefe", data "what do ya want for nothing?"
        let sig = mac(b"Jefe", "what do ya want for nothing?");
        let raw = BASE64.decode(sig).unwrap();
        assert_eq!(
            hex::encode(raw),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn signer_emits_hmac_header() {
        let signer = HmacSigner::new("key-1", b"secret".to_vec());
        let (name, value) = signer.sign("GET", "https://example.com/releases.stable.txt", b"");
        assert_eq!(name, "authorization");
        let rest = value.strip_prefix("HMAC key-1:").unwrap();
        assert_eq!(rest.split(':').count(), 3);
    }
}
