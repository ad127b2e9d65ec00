use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Stable numeric key naming a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId(pub u32);

impl FunctionId {
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Derive the identifier for a handler name. See [`function_id`].
    #[must_use]
    pub fn of(name: &str) -> Self {
        function_id(name)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Derive a stable function identifier from a handler name.
///
/// The id is the first four bytes (big-endian) of the name's SHA-256 digest,
/// so independently built clients and servers agree without a shared table.
#[must_use]
pub fn function_id(name: &str) -> FunctionId {
    let digest = Sha256::digest(name.as_bytes());
    FunctionId(u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]))
}
