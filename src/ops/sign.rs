//! Sign a file, attached (one pass) or detached.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;

use snafu::ResultExt;

use crate::armor::BlockLabel;
use crate::cancel::CancelToken;
use crate::encode::{self, LiteralWriter, TeeReader};
use crate::errors::{Error, IoSnafu, Result};
use crate::keyring;
use crate::ops::{
    ensure_destination, ensure_source, literal_name, partial_chunk, FileResult, OutputFile,
};
use crate::types::{
    Compression, KeySource, OverwritePolicy, SignatureHash, SignatureMode, DEFAULT_BUFFER_KB,
};

#[derive(Debug, Clone)]
pub struct SignInput {
    pub source_file: PathBuf,
    pub output_file: PathBuf,
    pub private_key: KeySource,
    pub passphrase: String,
}

#[derive(Debug, Clone)]
pub struct SignOptions {
    pub mode: SignatureMode,
    pub if_output_exists: OverwritePolicy,
    pub armor: bool,
    pub hash: SignatureHash,
    /// Attached mode only: wrap the signed content in a compression
    /// layer. Ignored for detached signatures, which carry no content.
    pub compression: Option<Compression>,
    pub buffer_size_kb: usize,
}

impl Default for SignOptions {
    fn default() -> Self {
        SignOptions {
            mode: SignatureMode::Attached,
            if_output_exists: OverwritePolicy::Error,
            armor: true,
            hash: SignatureHash::Sha256,
            compression: None,
            buffer_size_kb: DEFAULT_BUFFER_KB,
        }
    }
}

/// Signs `source_file` to `output_file`.
///
/// Attached mode embeds a copy of the content between the one pass
/// header and the trailing signature; detached mode writes only the
/// signature packet, which is always smaller than the attached form for
/// the same input. Either way the content is hashed in one streaming
/// pass.
pub fn sign(input: &SignInput, options: &SignOptions, cancel: &CancelToken) -> Result<FileResult> {
    ensure_source(&input.source_file)?;
    ensure_destination(&input.output_file, options.if_output_exists)?;
    cancel.check()?;

    let signer = keyring::resolve_signing_key(&input.private_key, &input.passphrase)?;
    let chunk = partial_chunk(options.buffer_size_kb);
    let dest = input.output_file.as_path();
    let name = literal_name(&input.source_file);
    let source = File::open(&input.source_file).context(IoSnafu {
        path: &input.source_file,
    })?;

    let mut out = OutputFile::create(dest)?;
    {
        let mut sink = encode::base_sink(out.file());
        match options.mode {
            SignatureMode::Detached => {
                let mut devnull = io::sink();
                let reader = TeeReader::new(BufReader::new(source), &mut devnull, cancel);
                let sig = encode::sign_reader(&signer, &input.passphrase, options.hash, reader)
                    .map_err(|err| {
                        if cancel.is_cancelled() {
                            Error::Cancelled
                        } else {
                            err
                        }
                    })?;
                if options.armor {
                    sink = encode::armor_sink(sink, BlockLabel::Signature, dest)?;
                }
                encode::write_signature_packet(&mut sink, &sig)?;
            }
            SignatureMode::Attached => {
                if options.armor {
                    sink = encode::armor_sink(sink, BlockLabel::Message, dest)?;
                }
                if let Some(compression) = options.compression {
                    sink = encode::compressed_sink(sink, compression, chunk, dest)?;
                }
                encode::write_one_pass_header(&mut sink, &signer, options.hash)?;
                let mut literal = LiteralWriter::new(&mut sink, &name, chunk, dest)?;
                let tee = TeeReader::new(BufReader::new(source), &mut literal, cancel);
                let sig = encode::sign_reader(&signer, &input.passphrase, options.hash, tee)
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
        }
        encode::finish_sink(sink, dest)?;
    }
    out.persist()?;

    Ok(FileResult {
        output_file: input.output_file.clone(),
    })
}
