//! Verify a signature, attached (one pass) or detached.

use std::path::PathBuf;

use crate::cancel::CancelToken;
use crate::decode;
use crate::errors::{Result, SignatureFileRequiredSnafu};
use crate::ops::{chunk_size, ensure_source};
use crate::types::{KeySource, SignatureMode, DEFAULT_BUFFER_KB};

pub use crate::decode::VerifyOutcome as VerifyResult;

#[derive(Debug, Clone)]
pub struct VerifyInput {
    /// The signed file (attached) or the original content (detached).
    pub file: PathBuf,
    /// The signature file; required in detached mode.
    pub signature_file: Option<PathBuf>,
    pub public_key: KeySource,
    /// Hex key id of the signer. When unset, the key id embedded in the
    /// signature (or one pass header) is used.
    pub public_key_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub mode: SignatureMode,
    pub buffer_size_kb: usize,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        VerifyOptions {
            mode: SignatureMode::Attached,
            buffer_size_kb: DEFAULT_BUFFER_KB,
        }
    }
}

/// Verifies the signature over `input.file`, hashing the content as it
/// streams.
///
/// `is_valid = false` means the signature is well formed but does not
/// match the content; structural deviations (missing one pass header,
/// literal data or trailing signature) are errors.
pub fn verify(
    input: &VerifyInput,
    options: &VerifyOptions,
    cancel: &CancelToken,
) -> Result<VerifyResult> {
    ensure_source(&input.file)?;

    match options.mode {
        SignatureMode::Detached => {
            let signature_file = input
                .signature_file
                .as_ref()
                .ok_or_else(|| SignatureFileRequiredSnafu.build())?;
            ensure_source(signature_file)?;
            decode::verify_detached(
                signature_file,
                &input.file,
                &input.public_key,
                input.public_key_id.as_deref(),
                cancel,
            )
        }
        SignatureMode::Attached => decode::verify_attached(
            &input.file,
            &input.public_key,
            input.public_key_id.as_deref(),
            chunk_size(options.buffer_size_kb),
            cancel,
        ),
    }
}
