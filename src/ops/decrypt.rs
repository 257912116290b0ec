//! Decrypt a PGP encrypted file with a secret key.

use std::io::{BufWriter, Write};
use std::path::PathBuf;

use snafu::ResultExt;

use crate::cancel::CancelToken;
use crate::decode;
use crate::errors::{IoSnafu, Result};
use crate::ops::{chunk_size, ensure_destination, ensure_source, FileResult, OutputFile};
use crate::types::{KeySource, OverwritePolicy, DEFAULT_BUFFER_KB};

#[derive(Debug, Clone)]
pub struct DecryptInput {
    pub source_file: PathBuf,
    pub output_file: PathBuf,
    /// Key ring holding the secret key matching one of the message's
    /// encrypted sessions.
    pub private_key: KeySource,
    pub passphrase: String,
}

#[derive(Debug, Clone)]
pub struct DecryptOptions {
    pub if_output_exists: OverwritePolicy,
    pub buffer_size_kb: usize,
}

impl Default for DecryptOptions {
    fn default() -> Self {
        DecryptOptions {
            if_output_exists: OverwritePolicy::Error,
            buffer_size_kb: DEFAULT_BUFFER_KB,
        }
    }
}

/// Decrypts `source_file` to `output_file`, streaming the plaintext.
///
/// The first encrypted session with a matching secret key (primary or
/// subkey) is used; an integrity check failure prevents the output from
/// being committed.
pub fn decrypt(
    input: &DecryptInput,
    options: &DecryptOptions,
    cancel: &CancelToken,
) -> Result<FileResult> {
    ensure_source(&input.source_file)?;
    ensure_destination(&input.output_file, options.if_output_exists)?;
    cancel.check()?;

    let mut out = OutputFile::create(&input.output_file)?;
    {
        let mut writer = BufWriter::new(out.file());
        decode::decrypt_to(
            &input.source_file,
            &input.private_key,
            &input.passphrase,
            &mut writer,
            &input.output_file,
            chunk_size(options.buffer_size_kb),
            cancel,
        )?;
        writer.flush().context(IoSnafu {
            path: &input.output_file,
        })?;
    }
    out.persist()?;

    Ok(FileResult {
        output_file: input.output_file.clone(),
    })
}
