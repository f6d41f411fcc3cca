// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::{Deserialize, Serialize};

/// 32-bit statement shape id.
///
/// `0` is reserved for "not fingerprintable" and is never produced by
/// hashing: a digest of `0` is stored as `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(u32);

impl Fingerprint {
    pub const NONE: Fingerprint = Fingerprint(0);

    /// Wraps a digest, remapping the reserved value.
    pub fn new(digest: u32) -> Self {
        if digest == 0 {
            Fingerprint(1)
        } else {
            Fingerprint(digest)
        }
    }

    /// Rebuilds a fingerprint read back from storage, where `0` stays `NONE`.
    pub fn from_raw(raw: u32) -> Self {
        Fingerprint(raw)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
