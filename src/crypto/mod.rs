//! The AES-256/SHA-256 coder used by encrypted 7z archives.
//!
//! Key derivation feeds `2^cycles_power` rounds of `salt || password ||
//! counter` into a single SHA-256 computation, where the counter is an
//! 8-byte little-endian value incremented each round. The special cycles
//! value `0x3F` skips hashing: the key is `salt || password` zero-padded to
//! 32 bytes. Payload encryption is AES-256 in CBC mode with no padding; the
//! caller bounds the plaintext to the unpack size.

mod password;
mod properties;

pub use password::Password;
pub use properties::AesProperties;

use aes::Aes256;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha256};
use std::io::{self, Read, Write};
use zeroize::Zeroize;

use crate::{Error, Result};

type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;

/// AES block size in bytes.
const BLOCK_SIZE: usize = 16;

/// Decryption buffer size; a multiple of the block size.
const CHUNK_SIZE: usize = 4096;

/// Marker cycles value selecting the direct (unhashed) key schedule.
pub const DIRECT_KEY_CYCLES: u8 = 0x3F;

/// Upper bound on the iteration exponent. `2^30` rounds already take
/// seconds; higher claims only appear in hostile archives.
pub const MAX_KEY_CYCLES_POWER: u8 = 30;

/// Derives the AES-256 key for a password and salt.
pub fn derive_key(password: &Password, salt: &[u8], cycles_power: u8) -> Result<[u8; 32]> {
    let mut password_bytes = password.as_utf16_le();

    if cycles_power == DIRECT_KEY_CYCLES {
        let mut key = [0u8; 32];
        let mut pos = 0;
        for &b in salt.iter().chain(password_bytes.iter()).take(32) {
            key[pos] = b;
            pos += 1;
        }
        password_bytes.zeroize();
        return Ok(key);
    }

    if cycles_power > MAX_KEY_CYCLES_POWER {
        return Err(Error::unsupported(format!(
            "key derivation with 2^{cycles_power} rounds"
        )));
    }

    let rounds = 1u64 << cycles_power;
    let mut sha = Sha256::new();
    for counter in 0..rounds {
        sha.update(salt);
        sha.update(password_bytes.as_slice());
        sha.update(counter.to_le_bytes());
    }

    Ok(sha.finalize().into())
}

/// A reader that decrypts an AES-256-CBC stream.
///
/// Ciphertext arrives in whole blocks; the final block's padding bytes are
/// beyond the unpack size and discarded by the length bound the caller
/// applies on top.
pub struct Aes256CbcReader<R> {
    inner: R,
    key: [u8; 32],
    iv: [u8; 16],
    buffer: Vec<u8>,
    pos: usize,
    finished: bool,
}

impl<R: Read> Aes256CbcReader<R> {
    /// Creates a decrypting reader from coder properties and a password.
    pub fn new(inner: R, coder_properties: &[u8], password: &Password) -> Result<Self> {
        let props = AesProperties::parse(coder_properties)?;
        let key = derive_key(password, &props.salt, props.cycles_power)?;
        Ok(Self {
            inner,
            key,
            iv: props.iv,
            buffer: Vec::new(),
            pos: 0,
            finished: false,
        })
    }

    fn refill(&mut self) -> io::Result<()> {
        let mut chunk = vec![0u8; CHUNK_SIZE];
        let mut filled = 0;
        while filled < chunk.len() {
            let n = self.inner.read(&mut chunk[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            self.finished = true;
            return Ok(());
        }
        if filled % BLOCK_SIZE != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "encrypted stream not block-aligned",
            ));
        }
        chunk.truncate(filled);

        // CBC chains on the last ciphertext block.
        let mut next_iv = [0u8; 16];
        next_iv.copy_from_slice(&chunk[filled - BLOCK_SIZE..]);

        let decryptor = Aes256CbcDec::new(&self.key.into(), &self.iv.into());
        decryptor
            .decrypt_padded_mut::<NoPadding>(&mut chunk)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        self.iv = next_iv;
        self.buffer = chunk;
        self.pos = 0;
        Ok(())
    }
}

impl<R: Read> Read for Aes256CbcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.buffer.len() {
            if self.finished {
                return Ok(0);
            }
            self.refill()?;
            if self.pos >= self.buffer.len() {
                return Ok(0);
            }
        }
        let available = &self.buffer[self.pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl<R> Drop for Aes256CbcReader<R> {
    fn drop(&mut self) {
        self.key.zeroize();
        self.buffer.zeroize();
    }
}

/// Key material for one encrypted stream: derivation parameters plus the IV.
#[derive(Debug, Clone)]
pub struct AesMaterial {
    /// Iteration exponent for key derivation.
    pub cycles_power: u8,
    /// Salt bytes.
    pub salt: Vec<u8>,
    /// Initialization vector.
    pub iv: [u8; 16],
}

impl AesMaterial {
    /// Generates material with the conventional 2^19 derivation rounds and
    /// a fresh salt and IV.
    pub fn generate() -> Self {
        let mut seed = [0u8; 24];
        fill_weak_entropy(&mut seed);
        let mut salt = vec![0u8; 8];
        salt.copy_from_slice(&seed[..8]);
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&seed[8..24]);
        Self {
            cycles_power: 19,
            salt,
            iv,
        }
    }

    /// Builds material from explicit parameters.
    pub fn explicit(cycles_power: u8, salt: Vec<u8>, iv: [u8; 16]) -> Self {
        Self {
            cycles_power,
            salt,
            iv,
        }
    }

    /// Encodes the coder properties for this material.
    pub fn properties(&self) -> Vec<u8> {
        AesProperties {
            cycles_power: self.cycles_power,
            salt: self.salt.clone(),
            iv: self.iv,
        }
        .encode()
    }

    /// Derives the AES key for `password`.
    pub fn derive(&self, password: &Password) -> Result<[u8; 32]> {
        derive_key(password, &self.salt, self.cycles_power)
    }
}

/// Mixes clock readings through SHA-256 to produce salt and IV bytes.
///
/// Not a CSPRNG. Salts and IVs here only need uniqueness per archive; use
/// explicit material when stronger guarantees are required.
fn fill_weak_entropy(out: &mut [u8]) {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static SEQUENCE: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut sha = Sha256::new();
    sha.update(nanos.to_le_bytes());
    sha.update(SEQUENCE.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    sha.update(std::process::id().to_le_bytes());
    let digest = sha.finalize();
    for (dst, src) in out.iter_mut().zip(digest.iter().cycle()) {
        *dst = *src;
    }
}

/// A writer that encrypts with AES-256-CBC, zero-padding the final block.
pub struct Aes256CbcWriter<W> {
    inner: W,
    key: [u8; 32],
    iv: [u8; 16],
    pending: Vec<u8>,
}

impl<W: Write> Aes256CbcWriter<W> {
    /// Creates an encrypting writer for the given material and password.
    pub fn new(inner: W, material: &AesMaterial, password: &Password) -> Result<Self> {
        let key = material.derive(password)?;
        Ok(Self {
            inner,
            key,
            iv: material.iv,
            pending: Vec::new(),
        })
    }

    fn encrypt_full_blocks(&mut self) -> io::Result<()> {
        let full = (self.pending.len() / BLOCK_SIZE) * BLOCK_SIZE;
        if full == 0 {
            return Ok(());
        }
        let mut block = self.pending[..full].to_vec();
        let encryptor = Aes256CbcEnc::new(&self.key.into(), &self.iv.into());
        encryptor
            .encrypt_padded_mut::<NoPadding>(&mut block, full)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        self.inner.write_all(&block)?;
        self.iv.copy_from_slice(&block[full - BLOCK_SIZE..]);
        self.pending.drain(..full);
        Ok(())
    }

    /// Encrypts the final partial block (zero-padded) and returns the
    /// underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.encrypt_full_blocks()?;
        if !self.pending.is_empty() {
            self.pending.resize(BLOCK_SIZE, 0);
            self.encrypt_full_blocks()?;
        }
        self.inner.flush()?;
        self.key.zeroize();
        Ok(self.inner)
    }
}

impl<W: Write> Write for Aes256CbcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        if self.pending.len() >= CHUNK_SIZE {
            self.encrypt_full_blocks()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
