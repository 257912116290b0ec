//! High level OpenPGP file operations built on [rPGP](https://crates.io/crates/pgp):
//! encrypting, decrypting, signing and verifying files with public and
//! secret key rings, with optional compression and ASCII armor.
//!
//! The produced and consumed wire format is standard OpenPGP framing,
//! interoperable with any conformant implementation. Content streams
//! through the layer stack in fixed size chunks, so memory use is
//! bounded by the configured buffer size rather than the file size.
//!
//! ```no_run
//! use pgpfile::{
//!     ops::{encrypt, EncryptInput, EncryptOptions},
//!     CancelToken, KeySource, SymmetricAlgorithm,
//! };
//!
//! # fn main() -> pgpfile::Result<()> {
//! let input = EncryptInput {
//!     source_file: "report.csv".into(),
//!     output_file: "report.csv.pgp".into(),
//!     public_key: KeySource::path("recipient.asc"),
//!     public_key_id: None,
//!     algorithm: SymmetricAlgorithm::Aes256,
//! };
//! let result = encrypt(&input, &EncryptOptions::default(), &CancelToken::new())?;
//! println!("wrote {}", result.output_file.display());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::unwrap_used)]

pub mod armor;
pub mod cancel;
pub mod decode;
pub mod encode;
pub mod errors;
pub mod keyring;
pub mod ops;
pub mod outcome;
pub mod stream;
pub mod types;
pub mod wire;

pub use crate::cancel::CancelToken;
pub use crate::errors::{Error, Result};
pub use crate::outcome::{settle, Completion, FailurePolicy};
pub use crate::types::{
    Compression, KeySource, OverwritePolicy, SignatureHash, SignatureMode, SymmetricAlgorithm,
};
