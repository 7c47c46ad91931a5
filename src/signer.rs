use axum::http::StatusCode;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Length of a hex encoded HMAC-SHA256 signature
pub const TOKEN_HEX_LEN: usize = 64;

/// Signed URL verification errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Token has expired")]
    Expired,

    #[error("Invalid token format")]
    Malformed,

    #[error("Signature mismatch")]
    Mismatch,
}

impl SignatureError {
    pub fn to_err_code(&self) -> StatusCode {
        match self {
            SignatureError::Malformed => StatusCode::BAD_REQUEST,
            SignatureError::Expired | SignatureError::Mismatch => StatusCode::FORBIDDEN,
        }
    }
}

/// HMAC-SHA256 signer for `filename + expires` pairs.
///
/// The token is the lowercase hex digest of the filename concatenated with the
/// decimal expiry timestamp, so any holder of the secret can re-derive it
/// without storing issued tokens.
#[derive(Clone)]
pub struct UrlSigner {
    mac: HmacSha256,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner").finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(secret: &[u8]) -> Result<Self, InvalidLength> {
        let mac = HmacSha256::new_from_slice(secret)?;
        Ok(Self { mac })
    }

    fn keyed(&self, filename: &str, expires_unix: i64) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(filename.as_bytes());
        mac.update(expires_unix.to_string().as_bytes());
        mac
    }

    /// Hex signature for `filename` valid until `expires_unix`
    pub fn sign(&self, filename: &str, expires_unix: i64) -> String {
        hex::encode(self.keyed(filename, expires_unix).finalize().into_bytes())
    }

    /// Check a token against `filename` and `expires_unix` at time `now_unix`.
    ///
    /// A token is still valid at the exact second of its expiry.
    pub fn verify(
        &self,
        filename: &str,
        token: &str,
        expires_unix: i64,
        now_unix: i64,
    ) -> Result<(), SignatureError> {
        if now_unix > expires_unix {
            return Err(SignatureError::Expired);
        }

        if token.len() != TOKEN_HEX_LEN {
            return Err(SignatureError::Malformed);
        }
        let expected = hex::decode(token).map_err(|_| SignatureError::Malformed)?;

        // verify_slice compares in constant time
        self.keyed(filename, expires_unix)
            .verify_slice(&expected)
            .map_err(|_| SignatureError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret-key-0123";

    #[test]
    fn test_sign_golden_value() {
        let signer = UrlSigner::new(SECRET).unwrap();
        assert_eq!(
            signer.sign("track001.mp3", 1_700_003_600),
            "665def85d4b15f4fc0e5c3964ae8a2c766638f1e8b9b2bfd6f350296a33870f5"
        );
    }

    #[test]
    fn test_sign_matches_reference_hmac() {
        // Well-known HMAC-SHA256 vector
        let signer = UrlSigner::new(b"key").unwrap();
        let mut mac = signer.mac.clone();
        mac.update(b"The quick brown fox jumps over the lazy dog");
        assert_eq!(
            hex::encode(mac.finalize().into_bytes()),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn test_sign_is_deterministic() {
        let signer = UrlSigner::new(SECRET).unwrap();
        let a = signer.sign("track001.mp3", 1_700_003_600);
        let b = signer.sign("track001.mp3", 1_700_003_600);
        let c = signer.sign("track001.mp3", 1_700_003_601);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), TOKEN_HEX_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_verify_valid_until_expiry() {
        let signer = UrlSigner::new(SECRET).unwrap();
        let expires = 1_700_003_600;
        let token = signer.sign("track001.mp3", expires);

        assert_eq!(
            signer.verify("track001.mp3", &token, expires, 1_700_000_000),
            Ok(())
        );
        assert_eq!(signer.verify("track001.mp3", &token, expires, expires), Ok(()));
        assert_eq!(
            signer.verify("track001.mp3", &token, expires, expires + 1),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let signer = UrlSigner::new(SECRET).unwrap();
        let expires = 1_700_003_600;
        let token = signer.sign("track001.mp3", expires);
        let now = 1_700_000_000;

        assert_eq!(
            signer.verify("track002.mp3", &token, expires, now),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            signer.verify("track001.mp3", &token, expires + 60, now),
            Err(SignatureError::Mismatch)
        );

        let other = UrlSigner::new(b"another-secret-key-456").unwrap();
        assert_eq!(
            other.verify("track001.mp3", &token, expires, now),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_verify_rejects_malformed_tokens() {
        let signer = UrlSigner::new(SECRET).unwrap();
        let expires = 1_700_003_600;
        let now = 1_700_000_000;

        assert_eq!(
            signer.verify("track001.mp3", "", expires, now),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            signer.verify("track001.mp3", "abcd", expires, now),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            signer.verify("track001.mp3", &"zz".repeat(32), expires, now),
            Err(SignatureError::Malformed)
        );
    }

    #[test]
    fn test_verify_accepts_uppercase_hex() {
        let signer = UrlSigner::new(SECRET).unwrap();
        let expires = 1_700_003_600;
        let token = signer.sign("track001.mp3", expires).to_uppercase();
        assert_eq!(
            signer.verify("track001.mp3", &token, expires, 1_700_000_000),
            Ok(())
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(SignatureError::Expired.to_err_code(), StatusCode::FORBIDDEN);
        assert_eq!(SignatureError::Mismatch.to_err_code(), StatusCode::FORBIDDEN);
        assert_eq!(SignatureError::Malformed.to_err_code(), StatusCode::BAD_REQUEST);
    }
}
