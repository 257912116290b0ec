//! File level operations: encrypt, decrypt, sign, verify.
//!
//! All operations share the same io contract: the source must exist,
//! the destination is guarded by the overwrite policy before any write,
//! file content is streamed in fixed size chunks with a cancellation
//! check per chunk, and output is written to a temporary file next to
//! the destination which is renamed into place only on success and
//! removed on any failure.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use log::debug;
use snafu::ResultExt;
use tempfile::NamedTempFile;

use crate::cancel::CancelToken;
use crate::errors::{DestinationExistsSnafu, Error, IoSnafu, Result, SourceMissingSnafu};
use crate::types::OverwritePolicy;
use crate::wire::MAX_PARTIAL;

mod decrypt;
mod encrypt;
mod sign;
mod verify;

pub use self::decrypt::{decrypt, DecryptInput, DecryptOptions};
pub use self::encrypt::{encrypt, EncryptInput, EncryptOptions, SigningOptions};
pub use self::sign::{sign, SignInput, SignOptions};
pub use self::verify::{verify, VerifyInput, VerifyOptions, VerifyResult};

/// Successful completion of a file producing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResult {
    pub output_file: PathBuf,
}

pub(crate) fn ensure_source(path: &Path) -> Result<()> {
    snafu::ensure!(path.is_file(), SourceMissingSnafu { path });
    Ok(())
}

pub(crate) fn ensure_destination(path: &Path, policy: OverwritePolicy) -> Result<()> {
    if policy == OverwritePolicy::Error {
        snafu::ensure!(!path.exists(), DestinationExistsSnafu { path });
    }
    Ok(())
}

pub(crate) fn chunk_size(buffer_kb: usize) -> usize {
    buffer_kb.max(1) * 1024
}

/// Chunk size rounded for partial packet framing, which needs a power
/// of two.
pub(crate) fn partial_chunk(buffer_kb: usize) -> usize {
    chunk_size(buffer_kb)
        .next_power_of_two()
        .clamp(1024, MAX_PARTIAL)
}

/// File name carried in the literal data packet.
pub(crate) fn literal_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Copies `reader` into `writer` in fixed size chunks, polling
/// cancellation per chunk. Io errors carry `path`.
pub(crate) fn pump(
    reader: &mut impl Read,
    writer: &mut impl Write,
    chunk: usize,
    cancel: &CancelToken,
    path: &Path,
) -> Result<u64> {
    let mut buf = vec![0u8; chunk];
    let mut total = 0u64;
    loop {
        cancel.check()?;
        let read = reader.read(&mut buf).context(IoSnafu { path })?;
        if read == 0 {
            return Ok(total);
        }
        writer.write_all(&buf[..read]).context(IoSnafu { path })?;
        total += read as u64;
    }
}

/// Output staged in a temporary file in the destination directory.
///
/// Dropping it on any failure path removes the temporary file, so a
/// partial output is never visible under the final name.
pub(crate) struct OutputFile {
    tmp: NamedTempFile,
    dest: PathBuf,
}

impl OutputFile {
    pub fn create(dest: &Path) -> Result<Self> {
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let tmp = NamedTempFile::new_in(dir).context(IoSnafu { path: dest })?;
        Ok(OutputFile {
            tmp,
            dest: dest.to_path_buf(),
        })
    }

    pub fn file(&mut self) -> &mut File {
        self.tmp.as_file_mut()
    }

    /// Renames the staged file into place.
    pub fn persist(self) -> Result<()> {
        let dest = self.dest;
        self.tmp.persist(&dest).map_err(|err| Error::Io {
            path: dest.clone(),
            source: err.error,
        })?;
        debug!("wrote {}", dest.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_floor() {
        assert_eq!(chunk_size(0), 1024);
        assert_eq!(chunk_size(64), 64 * 1024);
    }

    #[test]
    fn partial_chunk_is_a_power_of_two() {
        assert_eq!(partial_chunk(0), 1024);
        assert_eq!(partial_chunk(64), 64 * 1024);
        assert_eq!(partial_chunk(65), 128 * 1024);
    }

    #[test]
    fn destination_policy() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("out.pgp");
        std::fs::write(&existing, b"already here").unwrap();

        assert!(matches!(
            ensure_destination(&existing, OverwritePolicy::Error),
            Err(Error::DestinationExists { .. })
        ));
        ensure_destination(&existing, OverwritePolicy::Overwrite).unwrap();
        ensure_destination(&dir.path().join("fresh.pgp"), OverwritePolicy::Error).unwrap();
    }

    #[test]
    fn staged_output_replaces_or_vanishes() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");

        let mut out = OutputFile::create(&dest).unwrap();
        out.file().write_all(b"first").unwrap();
        out.persist().unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"first");

        let mut out = OutputFile::create(&dest).unwrap();
        out.file().write_all(b"second").unwrap();
        out.persist().unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"second");

        // dropped without persist: destination untouched, no temp left
        let mut out = OutputFile::create(&dest).unwrap();
        out.file().write_all(b"third").unwrap();
        drop(out);
        assert_eq!(std::fs::read(&dest).unwrap(), b"second");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn cancelled_pump_stops_at_chunk_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.bin");
        std::fs::write(&src, vec![7u8; 8 * 1024]).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let mut reader = File::open(&src).unwrap();
        let mut sink = std::io::sink();
        assert!(matches!(
            pump(&mut reader, &mut sink, 1024, &cancel, &src),
            Err(Error::Cancelled)
        ));
    }
}
