//! Request signing and parameter obfuscation. Everything here is pure: the
//! schemes are pinned by golden vectors because no upstream documentation
//! exists for them.

pub mod bilibili;
mod cipher;
mod device;
mod token;

pub use cipher::{timestamp_key, KeyedCipher};
pub use device::{douyin_ms_token, fingerprint, kuaishou_did, pear_mrd};
pub use token::{RequestToken, TokenError, DEFAULT_TOKEN_WINDOW};

use std::time::{SystemTime, UNIX_EPOCH};

/// Clock source for signed parameters, swappable so tests stay deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    #[default]
    System,
    Fixed(u64),
}

impl Clock {
    pub fn now_ms(&self) -> u64 {
        match self {
            Clock::System => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            Clock::Fixed(ms) => *ms,
        }
    }

    pub fn now_secs(&self) -> u64 {
        self.now_ms() / 1000
    }
}
