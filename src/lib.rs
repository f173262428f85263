//! # heptane
//!
//! A pure-Rust engine for reading and writing archives in the 7z container
//! format: little-endian binary files packaging an ordered set of entries,
//! optionally compressed and encrypted through pipelines of coders, with
//! metadata in a separate end-of-file header that may itself be compressed
//! and encrypted.
//!
//! ## Reading
//!
//! ```rust,no_run
//! use heptane::{Reader, Result};
//!
//! fn main() -> Result<()> {
//!     let mut reader = Reader::open_path("archive.7z")?;
//!     for entry in reader.entries() {
//!         println!("{}: {} bytes", entry.name, entry.size);
//!     }
//!     while let Some(index) = reader.next_entry()? {
//!         let content = reader.read_to_vec()?;
//!         println!("entry {index}: {} bytes read", content.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Writing
//!
//! ```rust,no_run
//! use heptane::{NewEntry, Writer, Result};
//!
//! fn main() -> Result<()> {
//!     let mut writer = Writer::create_path("new.7z")?;
//!     writer.add_bytes(NewEntry::file("hello.txt"), b"Hello, World!")?;
//!     writer.add_bytes(NewEntry::directory("docs"), b"")?;
//!     writer.finish()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Encrypted archives
//!
//! ```rust,no_run
//! use heptane::{Password, Reader, ReaderOptions, Result};
//!
//! fn main() -> Result<()> {
//!     let options = ReaderOptions::new().password(Password::new("secret"));
//!     let mut reader = Reader::open_path_with_options("locked.7z", options)?;
//!     reader.next_entry()?;
//!     let content = reader.read_to_vec()?;
//!     println!("{} bytes", content.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Resource limits
//!
//! Headers are parsed in two passes: a statistics pass that validates the
//! structure and estimates the memory the model will pin, then a
//! materializing pass. Set a ceiling with
//! [`ReaderOptions::max_memory_limit_kib`] and hostile headers are rejected
//! with [`Error::MemoryLimit`] before anything is allocated.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod checksum;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod format;
pub mod options;
pub mod read;
pub mod timestamp;
pub mod write;

pub use crypto::Password;
pub use error::{Error, Result};
pub use format::archive::Archive;
pub use format::files::FileEntry;
pub use options::ReaderOptions;
pub use read::Reader;
pub use timestamp::Timestamp;
pub use write::{NewEntry, WriteMethod, WriteOptions, Writer};
