//! Envelope encryption, hashing, and token generation.
//!
//! Every secret that leaves process memory — tenant database passwords,
//! scheduler job payloads — passes through [`Crypto::encrypt`] /
//! [`Crypto::decrypt`] first. There is exactly one master key per process,
//! derived once at startup from an operator-supplied secret.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// Errors from envelope encryption, hashing, or random generation.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("master key derivation failed: {reason}")]
    KeyDerivation { reason: String },

    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    #[error("decryption failed: authentication tag did not verify")]
    Decryption,

    #[error("ciphertext envelope malformed: {reason}")]
    MalformedEnvelope { reason: String },
}

const NONCE_LEN: usize = 12;

/// An encrypted payload as persisted: base64 ciphertext (tag appended, the
/// `aes-gcm` crate's convention) and base64 IV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub ciphertext: String,
    pub iv: String,
}

/// Holds the process-wide AES-256-GCM master key and performs envelope
/// encryption, hashing, and constant-time comparison on its behalf.
pub struct Crypto {
    key: Key<Aes256Gcm>,
}

impl Crypto {
    /// Derive the master key from a configured secret.
    ///
    /// - Exactly 64 hex characters: decoded as the raw 32-byte key.
    /// - At least 32 bytes (as UTF-8): the first 32 bytes are used.
    /// - Otherwise: derivation fails; callers should treat this as a fatal
    ///   startup error.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyDerivation`] if `secret` is too short and
    /// not valid 64-character hex.
    pub fn from_secret(secret: &str) -> Result<Self, CryptoError> {
        let mut raw = if secret.len() == 64 && secret.chars().all(|c| c.is_ascii_hexdigit()) {
            hex::decode(secret).map_err(|err| CryptoError::KeyDerivation {
                reason: format!("invalid hex secret: {err}"),
            })?
        } else if secret.len() >= 32 {
            secret.as_bytes()[..32].to_vec()
        } else {
            return Err(CryptoError::KeyDerivation {
                reason: "secret must be 64 hex chars or at least 32 bytes".to_owned(),
            });
        };
        let key = *Key::<Aes256Gcm>::from_slice(&raw);
        raw.zeroize();
        Ok(Self { key })
    }

    /// Encrypt `plaintext` under the master key with a freshly generated
    /// 12-byte IV.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Encryption`] if the underlying cipher fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Envelope, CryptoError> {
        let cipher = Aes256Gcm::new(&self.key);
        let mut iv_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut iv_bytes);
        let nonce = Nonce::from_slice(&iv_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|err| CryptoError::Encryption {
                reason: err.to_string(),
            })?;
        Ok(Envelope {
            ciphertext: BASE64.encode(ciphertext),
            iv: BASE64.encode(iv_bytes),
        })
    }

    /// Decrypt an [`Envelope`] produced by [`Crypto::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MalformedEnvelope`] if the base64 fields don't
    /// decode, or [`CryptoError::Decryption`] if the authentication tag does
    /// not verify. Callers must treat a decryption failure as fatal for that
    /// value — there is no fallback path.
    pub fn decrypt(&self, envelope: &Envelope) -> Result<Vec<u8>, CryptoError> {
        let ciphertext = BASE64
            .decode(&envelope.ciphertext)
            .map_err(|err| CryptoError::MalformedEnvelope {
                reason: format!("ciphertext: {err}"),
            })?;
        let iv = BASE64
            .decode(&envelope.iv)
            .map_err(|err| CryptoError::MalformedEnvelope {
                reason: format!("iv: {err}"),
            })?;
        if iv.len() != NONCE_LEN {
            return Err(CryptoError::MalformedEnvelope {
                reason: format!("iv must be {NONCE_LEN} bytes, got {}", iv.len()),
            });
        }
        let cipher = Aes256Gcm::new(&self.key);
        let nonce = Nonce::from_slice(&iv);
        cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|_| CryptoError::Decryption)
    }

    /// Convenience wrapper for string secrets.
    ///
    /// # Errors
    ///
    /// See [`Crypto::decrypt`].
    pub fn decrypt_to_string(&self, envelope: &Envelope) -> Result<String, CryptoError> {
        let bytes = self.decrypt(envelope)?;
        String::from_utf8(bytes).map_err(|err| CryptoError::MalformedEnvelope {
            reason: format!("plaintext is not valid UTF-8: {err}"),
        })
    }
}

/// `SHA-256` hex digest of `value`.
#[must_use]
pub fn hash_hex(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(digest)
}

/// Constant-time comparison of two hex-encoded hashes.
///
/// Re-hashes is not needed here — both inputs are already equal-length hex
/// digests from [`hash_hex`] — but the comparison itself never
/// short-circuits on a mismatched byte, so timing leaks nothing about which
/// prefix diverged.
#[must_use]
pub fn hashes_equal(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Generate `n` cryptographically secure random bytes.
#[must_use]
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// The two API key flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyKind {
    Publishable,
    Secret,
}

impl ApiKeyKind {
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            ApiKeyKind::Publishable => "pk",
            ApiKeyKind::Secret => "sk",
        }
    }
}

/// Generate a new API key: `<prefix>_<base64url(32 random bytes)>`.
#[must_use]
pub fn generate_api_key(kind: ApiKeyKind) -> String {
    let bytes = random_bytes(32);
    format!(
        "{}_{}",
        kind.prefix(),
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    )
}

/// Generate a new invite token: `inv_<base64url(16 random bytes)>`.
#[must_use]
pub fn generate_invite_token() -> String {
    let bytes = random_bytes(16);
    format!(
        "inv_{}",
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_crypto() -> Crypto {
        Crypto::from_secret("a".repeat(32).as_str()).unwrap()
    }

    #[test]
    fn from_secret_accepts_64_hex_chars() {
        let hex_secret = "ab".repeat(32);
        assert!(Crypto::from_secret(&hex_secret).is_ok());
    }

    #[test]
    fn from_secret_rejects_short_non_hex() {
        assert!(Crypto::from_secret("too-short").is_err());
    }

    #[test]
    fn encrypt_decrypt_roundtrips() {
        let crypto = test_crypto();
        let envelope = crypto.encrypt(b"tenant db password").unwrap();
        let plaintext = crypto.decrypt(&envelope).unwrap();
        assert_eq!(plaintext, b"tenant db password");
    }

    #[test]
    fn decrypt_fails_on_tampered_ciphertext() {
        let crypto = test_crypto();
        let mut envelope = crypto.encrypt(b"secret").unwrap();
        let mut bytes = BASE64.decode(&envelope.ciphertext).unwrap();
        bytes[0] ^= 0xFF;
        envelope.ciphertext = BASE64.encode(bytes);
        assert!(matches!(
            crypto.decrypt(&envelope),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn decrypt_fails_with_wrong_key() {
        let crypto_a = test_crypto();
        let crypto_b = Crypto::from_secret("b".repeat(32).as_str()).unwrap();
        let envelope = crypto_a.encrypt(b"secret").unwrap();
        assert!(matches!(
            crypto_b.decrypt(&envelope),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn each_encryption_uses_a_fresh_iv() {
        let crypto = test_crypto();
        let a = crypto.encrypt(b"same plaintext").unwrap();
        let b = crypto.encrypt(b"same plaintext").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn hash_hex_is_deterministic() {
        assert_eq!(hash_hex("sk_abc"), hash_hex("sk_abc"));
        assert_ne!(hash_hex("sk_abc"), hash_hex("sk_abd"));
    }

    #[test]
    fn hashes_equal_matches_sha256_semantics() {
        let h1 = hash_hex("sk_live_123");
        let h2 = hash_hex("sk_live_123");
        let h3 = hash_hex("sk_live_124");
        assert!(hashes_equal(&h1, &h2));
        assert!(!hashes_equal(&h1, &h3));
    }

    #[test]
    fn generated_api_keys_carry_the_right_prefix() {
        assert!(generate_api_key(ApiKeyKind::Publishable).starts_with("pk_"));
        assert!(generate_api_key(ApiKeyKind::Secret).starts_with("sk_"));
        assert!(generate_invite_token().starts_with("inv_"));
    }
}
