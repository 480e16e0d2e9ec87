//! Values stored in and returned from a bucket.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;
use std::time::{SystemTime, UNIX_EPOCH};

/// A change-sequence token returned by every mutation.
///
/// Tokens are non-zero and strictly increasing within one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cas(NonZeroU64);

impl Cas {
    /// Wrap a raw token. Returns `None` for zero, which is never a valid token.
    pub const fn new(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// The raw token.
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for Cas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Cas> for serde_json::Value {
    fn from(cas: Cas) -> Self {
        Self::from(cas.get())
    }
}

/// A document read from a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// The stored value.
    pub value: serde_json::Value,
    /// The token of the mutation that produced this value.
    pub cas: Cas,
}

/// Expiries up to this many seconds (30 days) are relative to now; larger ones are absolute Unix
/// timestamps.
pub const RELATIVE_EXPIRY_LIMIT: u32 = 30 * 24 * 60 * 60;

/// How long a document lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expiry(u32);

impl Expiry {
    /// The document never expires.
    pub const NEVER: Self = Self(0);

    /// An expiry in the wire convention: `0` is never, up to [`RELATIVE_EXPIRY_LIMIT`] is seconds
    /// from now, anything larger is a Unix timestamp.
    pub const fn from_secs(secs: u32) -> Self {
        Self(secs)
    }

    /// The raw expiry.
    pub const fn as_secs(self) -> u32 {
        self.0
    }

    /// The Unix timestamp at which the document stops being visible, if any.
    pub const fn deadline(self, now: u64) -> Option<u64> {
        match self.0 {
            0 => None,
            secs if secs <= RELATIVE_EXPIRY_LIMIT => Some(now + secs as u64),
            secs => Some(secs as u64),
        }
    }
}

/// Seconds since the Unix epoch.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}
