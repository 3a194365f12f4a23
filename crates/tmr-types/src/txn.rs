use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Width of a [`TxnId`] in bytes.
pub const TXN_ID_LEN: usize = 8;

/// Transaction identifier.
///
/// On disk a transaction id is 8 bytes compared lexicographically. Those
/// bytes are the big-endian form of the wrapped `u64`, so the derived
/// integer ordering is exactly the byte ordering, and both match the
/// chronological commit order of the log.
///
/// Arithmetic wraps silently at both ends: decrementing [`TxnId::ZERO`]
/// yields [`TxnId::MAX`] and incrementing `MAX` yields `ZERO`. Resumption
/// after a packed (emptied) log depends on this, so it is not reported as
/// an error.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TxnId(u64);

impl TxnId {
    /// The all-zero id. Also the visible boundary of a log with no
    /// transactions.
    pub const ZERO: TxnId = TxnId(0);

    /// The all-ones id.
    pub const MAX: TxnId = TxnId(u64::MAX);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Id derived from a wall-clock instant (nanoseconds since the epoch).
    pub fn from_time(time: SystemTime) -> Self {
        let nanos = time
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        Self(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Decode the on-disk byte form.
    pub const fn from_bytes(bytes: [u8; TXN_ID_LEN]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    /// The on-disk byte form.
    pub const fn to_bytes(self) -> [u8; TXN_ID_LEN] {
        self.0.to_be_bytes()
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The next id, carrying from the least significant byte.
    pub const fn increment(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// The previous id, borrowing from the least significant byte.
    pub const fn decrement(self) -> Self {
        Self(self.0.wrapping_sub(1))
    }

    /// Hex-encoded byte form (16 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Parse the hex-encoded byte form.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s.trim()).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        let arr: [u8; TXN_ID_LEN] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| TypeError::InvalidLength {
                    expected: TXN_ID_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self::from_bytes(arr))
    }
}

impl fmt::Debug for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxnId({})", self.to_hex())
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
