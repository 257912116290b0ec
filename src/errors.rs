//! Error types for all file operations.

use std::path::PathBuf;

use snafu::Snafu;

pub type Result<T, E = Error> = ::std::result::Result<T, E>;

/// Error types
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("source file not found: {}", path.display()))]
    SourceMissing { path: PathBuf },
    #[snafu(display("destination file already exists: {}", path.display()))]
    DestinationExists { path: PathBuf },
    #[snafu(display("{} is not a PGP file: {}", path.display(), reason))]
    NotAPgpFile { path: PathBuf, reason: String },
    #[snafu(display("key file not found: {}", path.display()))]
    KeyFileNotFound { path: PathBuf },
    #[snafu(display("failed to parse key ring: {}", source))]
    KeyParseFailed { source: pgp::errors::Error },
    #[snafu(display("key id is not valid hex: {:?}", value))]
    InvalidKeyId { value: String },
    #[snafu(display("a private key passphrase is required for signing"))]
    PassphraseRequired,
    #[snafu(display("invalid passphrase for secret key {}", key_id))]
    InvalidPassphrase { key_id: String },
    #[snafu(display("no key found with key id {}", key_id))]
    KeyNotFound { key_id: String },
    #[snafu(display("key {} {}", key_id, reason))]
    UnusableKey {
        key_id: String,
        reason: &'static str,
    },
    #[snafu(display("no usable encryption key found in key ring"))]
    NoUsableKey,
    #[snafu(display("no signing key found in key ring"))]
    NoSigningKey,
    #[snafu(display(
        "private key extraction failed, passphrase might be incorrect: {}",
        source
    ))]
    PrivateKeyExtractionFailed { source: pgp::errors::Error },
    #[snafu(display("no private key matches any encrypted session"))]
    MatchingPrivateKeyNotFound,
    #[snafu(display("failed to set up cipher: {}", reason))]
    CipherInit { reason: String },
    #[snafu(display("unsupported compression algorithm: {}", algorithm))]
    UnsupportedCompression { algorithm: &'static str },
    #[snafu(display("integrity check failed, the message has been tampered with"))]
    IntegrityCheckFailed,
    #[snafu(display("expected a one pass signature packet, found none"))]
    MissingOnePassSignature,
    #[snafu(display("expected a literal data packet, found none"))]
    MissingLiteralData,
    #[snafu(display("expected a trailing signature packet, found none"))]
    MissingSignatureTrailer,
    #[snafu(display("a signature file is required for detached verification"))]
    SignatureFileRequired,
    #[snafu(display("operation was cancelled"))]
    Cancelled,
    #[snafu(display("io error on {}: {}", path.display(), source))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("{}: {}", context, source))]
    Pgp {
        context: &'static str,
        source: pgp::errors::Error,
    },
    #[snafu(display("{}", message))]
    Overridden { message: String, source: Box<Error> },
}

impl Error {
    /// The original cause text, before any override was applied.
    pub fn original_message(&self) -> String {
        match self {
            Error::Overridden { source, .. } => source.original_message(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_keeps_cause() {
        let cause = Error::PassphraseRequired;
        let err = Error::Overridden {
            message: "task failed".to_string(),
            source: Box::new(cause),
        };
        assert_eq!(err.to_string(), "task failed");
        assert_eq!(
            err.original_message(),
            "a private key passphrase is required for signing"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
