//! Signed, short-lived download tokens.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use drive_blob::{FileId, FileMeta, OwnerId};

use crate::DriveAxumError;

/// Claims carried by a download token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadClaims {
    pub file_id: FileId,
    pub owner_id: OwnerId,
    pub total_chunks: u64,
    pub file_name: String,
    pub file_size: u64,
    pub exp: i64,
}

/// HS256 signer/verifier for download tokens
#[derive(Clone)]
pub struct DownloadTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

/// A freshly issued token
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
}

impl DownloadTokens {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, meta: &FileMeta) -> Result<IssuedToken, DriveAxumError> {
        let expires_at = Utc::now().timestamp() + self.ttl.as_secs() as i64;
        let claims = DownloadClaims {
            file_id: meta.file_id.clone(),
            owner_id: meta.owner_id.clone(),
            total_chunks: meta.total_chunks(),
            file_name: meta.file_name.clone(),
            file_size: meta.size_bytes,
            exp: expires_at,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(|e| {
            tracing::error!(error = %e, "failed to sign download token");
            DriveAxumError::new(crate::ErrorKind::GeneralError, "Could not issue download token")
        })?;
        Ok(IssuedToken { token, expires_at })
    }

    pub fn verify(&self, token: &str) -> Result<DownloadClaims, DriveAxumError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        decode::<DownloadClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| DriveAxumError::not_authenticated(format!("Invalid download token: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> FileMeta {
        FileMeta::new(FileId::new("f1"), OwnerId::new("alice"), "movie.mp4", 12_000_000, 5_000_000)
    }

    #[test]
    fn issued_tokens_verify() {
        let tokens = DownloadTokens::new(b"test-secret", Duration::from_secs(60));
        let issued = tokens.issue(&meta()).unwrap();

        let claims = tokens.verify(&issued.token).unwrap();
        assert_eq!(claims.file_id, FileId::new("f1"));
        assert_eq!(claims.owner_id, OwnerId::new("alice"));
        assert_eq!(claims.total_chunks, 3);
        assert_eq!(claims.file_size, 12_000_000);
        assert_eq!(claims.exp, issued.expires_at);
    }

    #[test]
    fn tampered_or_foreign_tokens_are_rejected() {
        let tokens = DownloadTokens::new(b"test-secret", Duration::from_secs(60));
        let other = DownloadTokens::new(b"other-secret", Duration::from_secs(60));
        let issued = other.issue(&meta()).unwrap();

        let err = tokens.verify(&issued.token).unwrap_err();
        assert_eq!(err.code(), 401);
        assert!(tokens.verify("not-a-token").is_err());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let tokens = DownloadTokens::new(b"test-secret", Duration::from_secs(60));
        let claims = DownloadClaims {
            file_id: FileId::new("f1"),
            owner_id: OwnerId::new("alice"),
            total_chunks: 1,
            file_name: "a".into(),
            file_size: 1,
            exp: Utc::now().timestamp() - 10,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert!(tokens.verify(&token).is_err());
    }
}
