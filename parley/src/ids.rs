//! Time-ordered identifiers for events, messages, nodes, and documents.
//!
//! Rows are claimed and listed in creation order by parallel workers, so ids must sort
//! by generation time and never collide. This is a UUIDv6-style layout: a 60-bit
//! timestamp in the high bits (monotonically bumped under contention) with random
//! clock-seq and node bits below.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// 100-ns intervals between the UUID epoch (1582-10-15) and the Unix epoch.
const UUID_EPOCH_OFFSET: u64 = 0x01b2_1dd2_1381_4000;

/// Last issued timestamp; bumping past it keeps ids strictly increasing per process.
static LAST_TIMESTAMP: AtomicU64 = AtomicU64::new(0);

/// A 128-bit time-ordered id. Displays as a hyphenated UUID string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrderedId {
    bytes: [u8; 16],
}

impl OrderedId {
    fn from_int(mut int_val: u128) -> Self {
        // RFC 4122 variant bits (10xx) and version 6.
        int_val &= !(0xC000_u128 << 48);
        int_val |= 0x8000_u128 << 48;
        int_val &= !(0xF000_u128 << 64);
        int_val |= 6_u128 << 76;
        Self {
            bytes: int_val.to_be_bytes(),
        }
    }

    /// The 100-ns timestamp encoded in this id.
    pub fn timestamp(&self) -> u64 {
        let int_val = u128::from_be_bytes(self.bytes);
        let time_low = ((int_val >> 64) & 0x0FFF) as u64;
        let time_mid = ((int_val >> 80) & 0xFFFF) as u64;
        let time_high = ((int_val >> 96) & 0xFFFF_FFFF) as u64;
        (time_high << 28) | (time_mid << 12) | time_low
    }
}

impl std::fmt::Display for OrderedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
        )
    }
}

/// Generates the next time-ordered id.
pub fn ordered_id() -> OrderedId {
    let nanoseconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let mut timestamp = nanoseconds / 100 + UUID_EPOCH_OFFSET;

    loop {
        let last = LAST_TIMESTAMP.load(Ordering::SeqCst);
        if timestamp <= last {
            timestamp = last + 1;
        }
        match LAST_TIMESTAMP.compare_exchange(last, timestamp, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => break,
            Err(_) => continue,
        }
    }

    // clock_seq and node come from a v4 uuid; only the timestamp orders ids.
    let random = u128::from_be_bytes(*uuid::Uuid::new_v4().as_bytes());
    let clock_seq = ((random >> 48) & 0x3FFF) as u128;
    let node = random & 0xFFFF_FFFF_FFFF;

    let time_high_and_mid = (timestamp >> 12) & 0xFFFF_FFFF_FFFF;
    let time_low = timestamp & 0x0FFF;

    let mut int_val: u128 = (time_high_and_mid as u128) << 80;
    int_val |= (time_low as u128) << 64;
    int_val |= clock_seq << 48;
    int_val |= node;

    OrderedId::from_int(int_val)
}

/// Generates a new id as a `String` (the common case for row ids).
pub fn new_id() -> String {
    ordered_id().to_string()
}

/// Current wall-clock time in Unix milliseconds. All persisted timestamps use this.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
