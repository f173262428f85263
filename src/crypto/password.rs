//! Password handling for the AES coder.

use zeroize::Zeroizing;

/// A password for archive encryption and decryption.
///
/// The bytes are held in a zeroizing buffer, so dropping the owning reader
/// or writer wipes them. Key derivation consumes the UTF-16LE form, encoded
/// explicitly rather than through any platform default.
#[derive(Clone)]
pub struct Password {
    inner: Zeroizing<String>,
}

impl Password {
    /// Creates a password from a string.
    pub fn new<S: Into<String>>(password: S) -> Self {
        Self {
            inner: Zeroizing::new(password.into()),
        }
    }

    /// Returns the UTF-16LE byte form used by the key derivation function.
    pub fn as_utf16_le(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(
            self.inner
                .encode_utf16()
                .flat_map(|unit| unit.to_le_bytes())
                .collect(),
        )
    }

    /// True when the password is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose the password itself.
        f.debug_struct("Password")
            .field("len", &self.inner.len())
            .finish()
    }
}

impl From<&str> for Password {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Password {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf16le_encoding() {
        let password = Password::new("test");
        assert_eq!(
            password.as_utf16_le().as_slice(),
            &[0x74, 0x00, 0x65, 0x00, 0x73, 0x00, 0x74, 0x00]
        );
    }

    #[test]
    fn test_utf16le_non_ascii() {
        let password = Password::new("пароль");
        assert_eq!(password.as_utf16_le().len(), 12);
    }

    #[test]
    fn test_debug_hides_contents() {
        let password = Password::new("secret");
        let debug = format!("{password:?}");
        assert!(!debug.contains("secret"));
    }
}
