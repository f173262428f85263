//! NTFS timestamp handling.
//!
//! 7z stores timestamps as Windows FILETIME values: a 64-bit count of
//! 100-nanosecond ticks since 1601-01-01 UTC. [`Timestamp`] wraps the raw
//! value and converts to and from Unix time without losing the original
//! precision.

use std::time::{SystemTime, UNIX_EPOCH};

/// Difference between the NTFS epoch (1601-01-01) and the Unix epoch
/// (1970-01-01), in 100-nanosecond ticks.
const NTFS_UNIX_DIFF: u64 = 116_444_736_000_000_000;

/// Number of 100-nanosecond ticks per second.
const TICKS_PER_SECOND: u64 = 10_000_000;

/// A file timestamp as stored in a 7z archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    ticks: u64,
}

impl Timestamp {
    /// Creates a timestamp from a raw NTFS tick count.
    #[inline]
    pub const fn from_ntfs(ticks: u64) -> Self {
        Self { ticks }
    }

    /// Creates a timestamp from Unix seconds.
    ///
    /// Returns `None` when the value falls outside the NTFS range.
    pub fn from_unix_secs(secs: i64) -> Option<Self> {
        if secs < 0 {
            let back = (secs.unsigned_abs()).checked_mul(TICKS_PER_SECOND)?;
            NTFS_UNIX_DIFF.checked_sub(back).map(Self::from_ntfs)
        } else {
            let forward = (secs as u64).checked_mul(TICKS_PER_SECOND)?;
            NTFS_UNIX_DIFF.checked_add(forward).map(Self::from_ntfs)
        }
    }

    /// Creates a timestamp from a [`SystemTime`].
    pub fn from_system_time(time: SystemTime) -> Option<Self> {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => {
                let ticks = (d.as_secs().checked_mul(TICKS_PER_SECOND)?)
                    .checked_add(u64::from(d.subsec_nanos()) / 100)?;
                NTFS_UNIX_DIFF.checked_add(ticks).map(Self::from_ntfs)
            }
            Err(e) => {
                let d = e.duration();
                let ticks = d.as_secs().checked_mul(TICKS_PER_SECOND)?;
                NTFS_UNIX_DIFF.checked_sub(ticks).map(Self::from_ntfs)
            }
        }
    }

    /// Timestamp for the current moment.
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now()).unwrap_or(Self { ticks: 0 })
    }

    /// Returns the raw NTFS tick count.
    #[inline]
    pub const fn as_ntfs(&self) -> u64 {
        self.ticks
    }

    /// Returns the timestamp as Unix seconds, negative before 1970.
    pub fn as_unix_secs(&self) -> i64 {
        if self.ticks >= NTFS_UNIX_DIFF {
            ((self.ticks - NTFS_UNIX_DIFF) / TICKS_PER_SECOND) as i64
        } else {
            let back = NTFS_UNIX_DIFF - self.ticks;
            let secs = back / TICKS_PER_SECOND;
            let extra = u64::from(back % TICKS_PER_SECOND > 0);
            -((secs + extra) as i64)
        }
    }

    /// Returns the sub-second part in nanoseconds (a multiple of 100).
    pub fn subsec_nanos(&self) -> u32 {
        let rem = if self.ticks >= NTFS_UNIX_DIFF {
            (self.ticks - NTFS_UNIX_DIFF) % TICKS_PER_SECOND
        } else {
            let back = (NTFS_UNIX_DIFF - self.ticks) % TICKS_PER_SECOND;
            if back == 0 { 0 } else { TICKS_PER_SECOND - back }
        };
        (rem * 100) as u32
    }

    /// Returns the timestamp as a [`SystemTime`].
    pub fn as_system_time(&self) -> SystemTime {
        let secs = self.as_unix_secs();
        if secs >= 0 {
            UNIX_EPOCH + std::time::Duration::new(secs as u64, self.subsec_nanos())
        } else {
            UNIX_EPOCH - std::time::Duration::from_secs(secs.unsigned_abs())
                + std::time::Duration::from_nanos(u64::from(self.subsec_nanos()))
        }
    }
}
