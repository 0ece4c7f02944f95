use super::cipher::KeyedCipher;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TOKEN_WINDOW: Duration = Duration::from_secs(5 * 60);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("timestamp is not a number")]
    MalformedTimestamp,

    #[error("timestamp outside the accepted window")]
    Expired,

    #[error("encrypted text does not match")]
    Mismatch,
}

/// Timestamp-keyed token: a plain text and its encryption under the key derived
/// from the timestamp. Sent as `X-Timestamp`, `X-GCLT-Text`, `X-EGCT-Text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestToken {
    pub timestamp: String,
    pub plain: String,
    pub encrypted: String,
}

impl RequestToken {
    pub fn issue(timestamp_ms: u64, plain: &str) -> Self {
        let timestamp = timestamp_ms.to_string();
        let encrypted = match KeyedCipher::from_timestamp(&timestamp) {
            Some(cipher) => cipher.encrypt(plain),
            None => plain.to_string(),
        };
        Self {
            timestamp,
            plain: plain.to_string(),
            encrypted,
        }
    }

    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("X-Timestamp", self.timestamp.clone()),
            ("X-GCLT-Text", self.plain.clone()),
            ("X-EGCT-Text", self.encrypted.clone()),
        ]
    }

    pub fn verify(&self, now_ms: u64, window: Duration) -> Result<(), TokenError> {
        let issued: u64 = self
            .timestamp
            .parse()
            .map_err(|_| TokenError::MalformedTimestamp)?;
        if now_ms.abs_diff(issued) > window.as_millis() as u64 {
            return Err(TokenError::Expired);
        }

        let cipher = KeyedCipher::from_timestamp(&self.timestamp)
            .ok_or(TokenError::MalformedTimestamp)?;
        if cipher.encrypt(&self.plain) == self.encrypted {
            Ok(())
        } else {
            Err(TokenError::Mismatch)
        }
    }
}
