//! Shared configuration enums and key source type.

use std::path::PathBuf;

use pgp::crypto::hash::HashAlgorithm;
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::types::CompressionAlgorithm;

/// Default chunk size for file streaming, in KiB.
pub const DEFAULT_BUFFER_KB: usize = 64;

/// Where to read a key ring from: a file on disk or key material
/// already held in memory (armored or binary).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    Path(PathBuf),
    Data(Vec<u8>),
}

impl KeySource {
    pub fn path(p: impl Into<PathBuf>) -> Self {
        KeySource::Path(p.into())
    }

    pub fn data(d: impl Into<Vec<u8>>) -> Self {
        KeySource::Data(d.into())
    }
}

/// Symmetric cipher used for the encrypted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymmetricAlgorithm {
    Idea,
    TripleDes,
    Cast5,
    Blowfish,
    Aes128,
    Aes192,
    #[default]
    Aes256,
    Twofish,
    Camellia128,
    Camellia192,
    Camellia256,
}

impl From<SymmetricAlgorithm> for SymmetricKeyAlgorithm {
    fn from(alg: SymmetricAlgorithm) -> Self {
        match alg {
            SymmetricAlgorithm::Idea => SymmetricKeyAlgorithm::IDEA,
            SymmetricAlgorithm::TripleDes => SymmetricKeyAlgorithm::TripleDES,
            SymmetricAlgorithm::Cast5 => SymmetricKeyAlgorithm::CAST5,
            SymmetricAlgorithm::Blowfish => SymmetricKeyAlgorithm::Blowfish,
            SymmetricAlgorithm::Aes128 => SymmetricKeyAlgorithm::AES128,
            SymmetricAlgorithm::Aes192 => SymmetricKeyAlgorithm::AES192,
            SymmetricAlgorithm::Aes256 => SymmetricKeyAlgorithm::AES256,
            SymmetricAlgorithm::Twofish => SymmetricKeyAlgorithm::Twofish,
            SymmetricAlgorithm::Camellia128 => SymmetricKeyAlgorithm::Camellia128,
            SymmetricAlgorithm::Camellia192 => SymmetricKeyAlgorithm::Camellia192,
            SymmetricAlgorithm::Camellia256 => SymmetricKeyAlgorithm::Camellia256,
        }
    }
}

/// Compression applied inside the encryption layer (or as the outer
/// content layer for sign-only output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    Zip,
    #[default]
    Zlib,
    /// Recognized on read, but the underlying implementation cannot
    /// produce or consume BZip2 streams.
    BZip2,
}

impl From<Compression> for CompressionAlgorithm {
    fn from(alg: Compression) -> Self {
        match alg {
            Compression::Zip => CompressionAlgorithm::ZIP,
            Compression::Zlib => CompressionAlgorithm::ZLIB,
            Compression::BZip2 => CompressionAlgorithm::BZip2,
        }
    }
}

/// Hash algorithm for signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureHash {
    Md5,
    Sha1,
    RipeMd160,
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl From<SignatureHash> for HashAlgorithm {
    fn from(alg: SignatureHash) -> Self {
        match alg {
            SignatureHash::Md5 => HashAlgorithm::MD5,
            SignatureHash::Sha1 => HashAlgorithm::SHA1,
            SignatureHash::RipeMd160 => HashAlgorithm::RIPEMD160,
            SignatureHash::Sha224 => HashAlgorithm::SHA2_224,
            SignatureHash::Sha256 => HashAlgorithm::SHA2_256,
            SignatureHash::Sha384 => HashAlgorithm::SHA2_384,
            SignatureHash::Sha512 => HashAlgorithm::SHA2_512,
        }
    }
}

/// What to do when the destination file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    /// Fail before any write occurs.
    #[default]
    Error,
    /// Replace the existing file.
    Overwrite,
}

/// Signature topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureMode {
    /// One-pass signature wrapped around a copy of the data.
    #[default]
    Attached,
    /// Signature packet only, stored separately from the data.
    Detached,
}
