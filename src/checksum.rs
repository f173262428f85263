//! CRC-32 computation and stream adapters.
//!
//! 7z uses the IEEE 802.3 polynomial (the same as ZIP and Ethernet) for all
//! of its checksums: the start header, the next header, pack streams, folder
//! outputs, and individual file bodies. Alongside the plain calculator this
//! module provides an EOF-verifying reader for decoder stacks and the
//! shared counter/hasher cells that codec pipelines report through.

use std::io::{self, Read};

/// Streaming CRC-32 calculator.
#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl Crc32 {
    /// Creates a new calculator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds more data into the checksum.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Returns the checksum of everything fed so far.
    pub fn finalize(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// One-shot checksum of a byte slice.
    pub fn compute(data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }
}

impl std::fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc32")
            .field("current", &self.finalize())
            .finish()
    }
}

/// A reader that verifies a CRC-32 once the stream is fully drained.
///
/// Verification only fires at EOF; a partially-read stream is never checked.
/// On mismatch the final read fails with [`io::ErrorKind::InvalidData`].
pub struct CrcVerifyReader<R> {
    inner: R,
    hasher: crc32fast::Hasher,
    expected: u32,
    checked: bool,
}

impl<R: Read> CrcVerifyReader<R> {
    /// Wraps `inner`, asserting `expected` when the stream ends.
    pub fn new(inner: R, expected: u32) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            expected,
            checked: false,
        }
    }
}

impl<R: Read> Read for CrcVerifyReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
        } else if !self.checked {
            self.checked = true;
            let actual = self.hasher.clone().finalize();
            if actual != self.expected {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "checksum mismatch: expected {:#010x}, got {:#010x}",
                        self.expected, actual
                    ),
                ));
            }
        }
        Ok(n)
    }
}

/// Byte counter shared between a pipeline stage and its owner. Stages hand
/// a clone down the stack; the owner reads the total after the stage has
/// been consumed.
pub type SharedCount = std::rc::Rc<std::cell::Cell<u64>>;

/// CRC accumulator shared between a pipeline stage and its owner.
pub type SharedCrc = std::rc::Rc<std::cell::RefCell<crc32fast::Hasher>>;

/// Creates a fresh shared byte counter.
pub fn shared_count() -> SharedCount {
    std::rc::Rc::new(std::cell::Cell::new(0))
}

/// Creates a fresh shared CRC accumulator.
pub fn shared_crc() -> SharedCrc {
    std::rc::Rc::new(std::cell::RefCell::new(crc32fast::Hasher::new()))
}
