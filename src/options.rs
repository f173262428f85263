//! Construction-time configuration for archive readers.

use crate::crypto::Password;
use crate::{Error, Result};

/// Default maximum entry-name length in UTF-16 code units.
pub const DEFAULT_MAX_NAME_LENGTH: usize = i16::MAX as usize;

/// Default backward-scan window for broken-archive recovery (1 MiB).
pub const DEFAULT_RECOVERY_SCAN_LIMIT: u64 = 1 << 20;

/// Options controlling how an archive is opened and parsed.
///
/// All limits guard allocations derived from untrusted header input; the
/// memory ceiling is checked before any sized allocation is attempted.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Password for AES-encrypted streams and headers.
    pub(crate) password: Option<Password>,
    /// Ceiling in KiB on memory attributed to header structures. `u64::MAX`
    /// disables the check.
    pub(crate) max_memory_limit_kib: u64,
    /// Upper bound on entry-name length in UTF-16 code units.
    pub(crate) max_entry_name_length: usize,
    /// Replace empty entry names with the archive's default name.
    pub(crate) use_default_name_for_unnamed_entries: bool,
    /// The default name used when the flag above is set. When opening by
    /// path this is derived from the file stem.
    pub(crate) default_entry_name: Option<String>,
    /// Attempt a backward header scan when the start header looks wiped.
    pub(crate) try_to_recover_broken_archives: bool,
    /// How many trailing bytes the recovery scan examines.
    pub(crate) recovery_scan_limit: u64,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            password: None,
            max_memory_limit_kib: u64::MAX,
            max_entry_name_length: DEFAULT_MAX_NAME_LENGTH,
            use_default_name_for_unnamed_entries: false,
            default_entry_name: None,
            try_to_recover_broken_archives: false,
            recovery_scan_limit: DEFAULT_RECOVERY_SCAN_LIMIT,
        }
    }
}

impl ReaderOptions {
    /// Creates options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the password used for AES coders. The bytes are zeroed when the
    /// reader closes.
    pub fn password(mut self, password: Password) -> Self {
        self.password = Some(password);
        self
    }

    /// Sets the memory ceiling in KiB for header-derived allocations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] when `limit_kib` is zero.
    pub fn max_memory_limit_kib(mut self, limit_kib: u64) -> Result<Self> {
        if limit_kib == 0 {
            return Err(Error::IllegalArgument(
                "memory limit must be positive".into(),
            ));
        }
        self.max_memory_limit_kib = limit_kib;
        Ok(self)
    }

    /// Sets the maximum entry-name length in UTF-16 code units.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] when `length` is zero.
    pub fn max_entry_name_length(mut self, length: usize) -> Result<Self> {
        if length == 0 {
            return Err(Error::IllegalArgument(
                "entry name length limit must be positive".into(),
            ));
        }
        self.max_entry_name_length = length;
        Ok(self)
    }

    /// Replaces empty entry names with the archive's default name.
    pub fn use_default_name_for_unnamed_entries(mut self, enabled: bool) -> Self {
        self.use_default_name_for_unnamed_entries = enabled;
        self
    }

    /// Sets the default entry name explicitly. Opening an archive by path
    /// derives one from the file stem when this is unset.
    pub fn default_entry_name(mut self, name: impl Into<String>) -> Self {
        self.default_entry_name = Some(name.into());
        self
    }

    /// Enables the backward recovery scan for archives whose start header
    /// has been wiped to zeros.
    pub fn try_to_recover_broken_archives(mut self, enabled: bool) -> Self {
        self.try_to_recover_broken_archives = enabled;
        self
    }

    /// Sets the recovery-scan window in bytes from the end of the file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalArgument`] when `limit` is zero.
    pub fn recovery_scan_limit(mut self, limit: u64) -> Result<Self> {
        if limit == 0 {
            return Err(Error::IllegalArgument(
                "recovery scan limit must be positive".into(),
            ));
        }
        self.recovery_scan_limit = limit;
        Ok(self)
    }

    /// Checks a single allocation request (in bytes) against the ceiling.
    pub(crate) fn check_allocation(&self, bytes: u64) -> Result<()> {
        let needed_kib = bytes.div_ceil(1024);
        if needed_kib > self.max_memory_limit_kib {
            return Err(Error::MemoryLimit {
                needed_kib,
                limit_kib: self.max_memory_limit_kib,
            });
        }
        Ok(())
    }
}
