//! Encrypt a file to a recipient public key, optionally compressed,
//! armored and signed in the same pass.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use snafu::ResultExt;

use crate::armor::BlockLabel;
use crate::cancel::CancelToken;
use crate::encode::{self, LiteralWriter, TeeReader};
use crate::errors::{Error, IoSnafu, Result};
use crate::keyring;
use crate::ops::{
    chunk_size, ensure_destination, ensure_source, literal_name, partial_chunk, pump, FileResult,
    OutputFile,
};
use crate::types::{
    Compression, KeySource, OverwritePolicy, SignatureHash, SymmetricAlgorithm, DEFAULT_BUFFER_KB,
};

#[derive(Debug, Clone)]
pub struct EncryptInput {
    pub source_file: PathBuf,
    pub output_file: PathBuf,
    /// Key ring holding the recipient key.
    pub public_key: KeySource,
    /// Hex key id of the recipient key. When unset, the first usable
    /// encryption key in ring order is selected.
    pub public_key_id: Option<String>,
    pub algorithm: SymmetricAlgorithm,
}

#[derive(Debug, Clone)]
pub struct EncryptOptions {
    pub if_output_exists: OverwritePolicy,
    pub armor: bool,
    /// Accepted for task compatibility; produced messages are always
    /// integrity protected.
    pub integrity_check: bool,
    pub compression: Option<Compression>,
    pub buffer_size_kb: usize,
    /// Sign while encrypting: the one pass signature ends up inside the
    /// encryption layer.
    pub signing: Option<SigningOptions>,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        EncryptOptions {
            if_output_exists: OverwritePolicy::Error,
            armor: true,
            integrity_check: true,
            compression: None,
            buffer_size_kb: DEFAULT_BUFFER_KB,
            signing: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SigningOptions {
    pub private_key: KeySource,
    pub passphrase: String,
    pub hash: SignatureHash,
}

/// Encrypts `source_file` to `output_file`.
///
/// Layer order of the produced message is
/// `[armor] -> encryption -> [compression] -> [one pass signature] ->
/// literal data -> [trailing signature]`. The source streams through
/// the layer stack one chunk at a time.
pub fn encrypt(
    input: &EncryptInput,
    options: &EncryptOptions,
    cancel: &CancelToken,
) -> Result<FileResult> {
    ensure_source(&input.source_file)?;
    ensure_destination(&input.output_file, options.if_output_exists)?;
    cancel.check()?;

    let recipient =
        keyring::resolve_encryption_key(&input.public_key, input.public_key_id.as_deref())?;
    let signer = options
        .signing
        .as_ref()
        .map(|opts| keyring::resolve_signing_key(&opts.private_key, &opts.passphrase))
        .transpose()?;

    let chunk = partial_chunk(options.buffer_size_kb);
    let dest = input.output_file.as_path();
    let mut out = OutputFile::create(dest)?;
    {
        let mut sink = encode::base_sink(out.file());
        if options.armor {
            sink = encode::armor_sink(sink, BlockLabel::Message, dest)?;
        }
        sink = encode::encrypted_sink(sink, &recipient, input.algorithm, chunk, dest)?;
        if let Some(compression) = options.compression {
            sink = encode::compressed_sink(sink, compression, chunk, dest)?;
        }

        let name = literal_name(&input.source_file);
        let source = File::open(&input.source_file).context(IoSnafu {
            path: &input.source_file,
        })?;
        match (&signer, options.signing.as_ref()) {
            (Some(signer), Some(opts)) => {
                encode::write_one_pass_header(&mut sink, signer, opts.hash)?;
                let mut literal = LiteralWriter::new(&mut sink, &name, chunk, dest)?;
                let tee = TeeReader::new(BufReader::new(source), &mut literal, cancel);
                let sig = encode::sign_reader(signer, &opts.passphrase, opts.hash, tee)
                    .map_err(|err| {
                        if cancel.is_cancelled() {
                            Error::Cancelled
                        } else {
                            err
                        }
                    })?;
                literal.finish(dest)?;
                encode::write_signature_packet(&mut sink, &sig)?;
            }
            _ => {
                let mut literal = LiteralWriter::new(&mut sink, &name, chunk, dest)?;
                pump(
                    &mut BufReader::new(source),
                    &mut literal,
                    chunk_size(options.buffer_size_kb),
                    cancel,
                    &input.source_file,
                )?;
                literal.finish(dest)?;
            }
        }
        encode::finish_sink(sink, dest)?;
    }
    out.persist()?;

    Ok(FileResult {
        output_file: input.output_file.clone(),
    })
}
