//! Injectable time and randomness sources.
//!
//! Expiry checks and OAuth 1.0a nonces go through these traits so callers can
//! substitute deterministic implementations.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rand::rngs::OsRng;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock backed by [`Utc::now`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|poison| poison.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|poison| poison.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

/// Number of random bytes in an OAuth 1.0a nonce
pub const NONCE_BYTES: usize = 16;

/// Source of single-use OAuth 1.0a nonces
pub trait NonceSource: Send + Sync {
    fn nonce(&self) -> String;
}

/// Hex-encoded nonces drawn from the operating system CSPRNG
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRngNonceSource;

impl NonceSource for OsRngNonceSource {
    fn nonce(&self) -> String {
        let mut bytes = [0u8; NONCE_BYTES];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}
