//! Construction-time configuration for archive writers.

use crate::codec::method;
use crate::crypto::{AesMaterial, Password};
use crate::{Error, Result};

/// Compression method applied to entry content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMethod {
    /// Store without compression.
    Copy,
    /// LZMA2 (the 7z default).
    #[default]
    Lzma2,
    /// Deflate.
    Deflate,
    /// BZip2.
    Bzip2,
}

impl WriteMethod {
    /// The 7z method id for this method.
    pub fn method_id(&self) -> &'static [u8] {
        match self {
            WriteMethod::Copy => method::COPY,
            WriteMethod::Lzma2 => method::LZMA2,
            WriteMethod::Deflate => method::DEFLATE,
            WriteMethod::Bzip2 => method::BZIP2,
        }
    }
}

/// Options controlling how an archive is written.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub(crate) method: WriteMethod,
    pub(crate) level: u32,
    pub(crate) dict_size: Option<u32>,
    pub(crate) password: Option<Password>,
    pub(crate) compress_header: bool,
    pub(crate) encrypt_header: bool,
    pub(crate) aes_material: Option<AesMaterial>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            method: WriteMethod::default(),
            level: 6,
            dict_size: None,
            password: None,
            compress_header: false,
            encrypt_header: false,
            aes_material: None,
        }
    }
}

impl WriteOptions {
    /// Creates options with defaults: LZMA2 at level 6, plain header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the compression method for entry content.
    pub fn method(mut self, method: WriteMethod) -> Self {
        self.method = method;
        self
    }

    /// Sets the compression level (method-specific scale, clamped).
    pub fn level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    /// Overrides the LZMA2 dictionary size.
    pub fn dict_size(mut self, dict_size: u32) -> Self {
        self.dict_size = Some(dict_size);
        self
    }

    /// Encrypts entry content with AES-256. The password is wiped when the
    /// writer is dropped.
    pub fn password(mut self, password: Password) -> Self {
        self.password = Some(password);
        self
    }

    /// Compresses the serialized header with LZMA2.
    pub fn compress_header(mut self, enabled: bool) -> Self {
        self.compress_header = enabled;
        self
    }

    /// Encrypts the serialized header; entry names are then unreadable
    /// without the password. Requires a password.
    pub fn encrypt_header(mut self, enabled: bool) -> Self {
        self.encrypt_header = enabled;
        self
    }

    /// Pins the AES salt and IV instead of generating fresh ones. Intended
    /// for reproducible output in tests.
    pub fn aes_material(mut self, material: AesMaterial) -> Self {
        self.aes_material = Some(material);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.encrypt_header && self.password.is_none() {
            return Err(Error::IllegalArgument(
                "header encryption requires a password".into(),
            ));
        }
        Ok(())
    }

    /// Coder chain for entry content, in decode order (pack side first).
    pub(crate) fn coder_chain(&self) -> Vec<Vec<u8>> {
        let mut chain = Vec::new();
        if self.password.is_some() {
            chain.push(method::AES256_SHA256.to_vec());
        }
        chain.push(self.method.method_id().to_vec());
        chain
    }

    /// Coder chain for an encoded header, in decode order.
    pub(crate) fn header_coder_chain(&self) -> Vec<Vec<u8>> {
        let mut chain = Vec::new();
        if self.encrypt_header {
            chain.push(method::AES256_SHA256.to_vec());
        }
        if self.compress_header {
            chain.push(method::LZMA2.to_vec());
        }
        chain
    }

    pub(crate) fn wants_encoded_header(&self) -> bool {
        self.compress_header || self.encrypt_header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chain_is_lzma2() {
        let opts = WriteOptions::default();
        assert_eq!(opts.coder_chain(), vec![method::LZMA2.to_vec()]);
    }

    #[test]
    fn test_password_prepends_aes() {
        let opts = WriteOptions::new().password(Password::new("pw"));
        assert_eq!(
            opts.coder_chain(),
            vec![method::AES256_SHA256.to_vec(), method::LZMA2.to_vec()]
        );
    }

    #[test]
    fn test_encrypt_header_requires_password() {
        let opts = WriteOptions::new().encrypt_header(true);
        assert!(matches!(
            opts.validate(),
            Err(Error::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_header_chain_order() {
        let opts = WriteOptions::new()
            .password(Password::new("pw"))
            .encrypt_header(true)
            .compress_header(true);
        assert_eq!(
            opts.header_coder_chain(),
            vec![method::AES256_SHA256.to_vec(), method::LZMA2.to_vec()]
        );
    }
}
