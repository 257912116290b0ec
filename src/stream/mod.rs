//! Streaming symmetric cryptography for OpenPGP data packets.
//!
//! Both directions work a chunk at a time over OpenPGP CFB mode, so the
//! plaintext never has to fit in memory. The encrypting side produces
//! integrity protected bodies (random prefix, data, trailing
//! modification detection code); the decrypting side additionally
//! accepts the legacy unprotected form.

mod decryptor;
mod encryptor;

pub use self::decryptor::{DecryptingReader, MdcMismatch};
pub use self::encryptor::EncryptingWriter;

/// Length of the modification detection code trailer: packet header
/// `D3 14` plus a SHA-1 digest.
pub(crate) const MDC_LEN: usize = 22;
