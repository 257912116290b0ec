//! Decode pipeline: streaming walk over the layered packet structure.
//!
//! Decryption collects the encrypted session packets, matches them
//! against the secret key ring, then decrypts the data packet a chunk
//! at a time, unwrapping compression transparently and streaming the
//! literal data straight to the output. Verification replays the
//! writer's nesting: one pass signature header (possibly inside a
//! compression wrapper), literal data, trailing signature; the content
//! is spooled to a temporary file so the signature check never needs it
//! in memory.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use flate2::read::{DeflateDecoder, ZlibDecoder};
use log::debug;
use pgp::armor::Dearmor;
use pgp::composed::{Deserializable, PlainSessionKey, StandaloneSignature};
use pgp::packet::{
    OnePassSignature, OpsVersionSpecific, PublicKeyEncryptedSessionKey, Signature,
};
use pgp::types::{KeyId, Tag};
use snafu::ResultExt;

use crate::cancel::CancelToken;
use crate::errors::{
    Error, IntegrityCheckFailedSnafu, IoSnafu, KeyNotFoundSnafu, MatchingPrivateKeyNotFoundSnafu,
    MissingLiteralDataSnafu, MissingOnePassSignatureSnafu, MissingSignatureTrailerSnafu,
    NotAPgpFileSnafu, Result, UnsupportedCompressionSnafu,
};
use crate::keyring::{self, display_key_id};
use crate::stream::{DecryptingReader, MdcMismatch};
use crate::types::KeySource;
use crate::wire::{read_header, read_u8, BodyReader, PacketHeader};

/// How many nested compression layers the walk is willing to enter.
const MAX_COMPRESSION_DEPTH: usize = 2;

fn bad_file(path: &Path, reason: impl ToString) -> Error {
    NotAPgpFileSnafu {
        path,
        reason: reason.to_string(),
    }
    .build()
}

/// Classifies an io error surfacing from the decrypting reader stack.
fn map_stream_error(err: io::Error, path: &Path) -> Error {
    if err.get_ref().is_some_and(|inner| inner.is::<MdcMismatch>()) {
        return IntegrityCheckFailedSnafu.build();
    }
    match err.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => bad_file(path, err),
        _ => Error::Io {
            path: path.to_path_buf(),
            source: err,
        },
    }
}

/// Opens a message file, transparently removing ASCII armor.
pub fn open_message(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).map_err(|err| bad_file(path, err))?;
    let mut reader = BufReader::new(file);
    let armored = reader
        .fill_buf()
        .map_err(|err| bad_file(path, err))?
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'-');
    if armored {
        Ok(Box::new(BufReader::new(Dearmor::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

fn next_header(reader: &mut (impl Read + ?Sized), path: &Path) -> Result<Option<PacketHeader>> {
    read_header(reader).map_err(|err| map_stream_error(err, path))
}

fn read_body_to_vec(
    reader: &mut (impl Read + ?Sized),
    header: PacketHeader,
    path: &Path,
) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    BodyReader::new(reader, header.length)
        .read_to_end(&mut body)
        .map_err(|err| map_stream_error(err, path))?;
    Ok(body)
}

fn skip_body(reader: &mut (impl Read + ?Sized), header: PacketHeader, path: &Path) -> Result<()> {
    io::copy(&mut BodyReader::new(reader, header.length), &mut io::sink())
        .map_err(|err| map_stream_error(err, path))?;
    Ok(())
}

/// Reads the leading encrypted session packets; stops at the encrypted
/// data packet and returns its header alongside them.
fn read_sessions(
    reader: &mut dyn BufRead,
    path: &Path,
) -> Result<(Vec<PublicKeyEncryptedSessionKey>, PacketHeader)> {
    let mut esks = Vec::new();
    loop {
        let header = next_header(reader, path)?
            .ok_or_else(|| bad_file(path, "no encrypted data found"))?;
        match Tag::from(header.tag) {
            Tag::PublicKeyEncryptedSessionKey => {
                let body = read_body_to_vec(reader, header, path)?;
                let esk = PublicKeyEncryptedSessionKey::from_slice(header.version, &body)
                    .map_err(|err| bad_file(path, err))?;
                esks.push(esk);
            }
            Tag::SymKeyEncryptedSessionKey => {
                debug!("skipping password protected session");
                skip_body(reader, header, path)?;
            }
            Tag::Marker => skip_body(reader, header, path)?,
            Tag::SymEncryptedProtectedData | Tag::SymEncryptedData => {
                return Ok((esks, header))
            }
            _ => {
                return Err(bad_file(
                    path,
                    "top level object is not an encrypted session list",
                ))
            }
        }
    }
}

/// Recipient key ids of the public key sessions, in list order.
/// Sessions whose key id cannot be read are logged and skipped.
fn session_key_ids(esks: &[PublicKeyEncryptedSessionKey]) -> Vec<KeyId> {
    esks.iter()
        .filter_map(|esk| match esk.id() {
            Ok(id) => Some(id.clone()),
            Err(err) => {
                debug!("skipping session with unreadable key id: {}", err);
                None
            }
        })
        .collect()
}

/// Enters a compression layer, returning a reader over its inflated
/// content.
fn descend<'r>(
    layer: Box<dyn Read + 'r>,
    header: PacketHeader,
    path: &Path,
) -> Result<Box<dyn Read + 'r>> {
    let mut body = BodyReader::new(layer, header.length);
    let algorithm = read_u8(&mut body).map_err(|err| map_stream_error(err, path))?;
    Ok(match algorithm {
        0 => Box::new(body),
        1 => Box::new(DeflateDecoder::new(body)),
        2 => Box::new(ZlibDecoder::new(body)),
        3 => return UnsupportedCompressionSnafu { algorithm: "BZip2" }.fail(),
        other => {
            return Err(bad_file(
                path,
                format!("unknown compression algorithm {}", other),
            ))
        }
    })
}

fn read_literal_header(body: &mut impl Read, path: &Path) -> Result<()> {
    let inner = |body: &mut dyn Read| -> io::Result<()> {
        let _mode = read_u8(body)?;
        let name_len = read_u8(body)?;
        let mut name = vec![0u8; usize::from(name_len)];
        body.read_exact(&mut name)?;
        let mut created = [0u8; 4];
        body.read_exact(&mut created)?;
        Ok(())
    };
    inner(body).map_err(|err| map_stream_error(err, path))
}

/// Walks the decrypted plaintext stream down to its literal data packet
/// and copies the content to `out` in `chunk` sized slices.
fn copy_literal<'r, R: Read + 'r>(
    input: R,
    out: &mut dyn Write,
    out_path: &Path,
    chunk: usize,
    cancel: &CancelToken,
    path: &Path,
) -> Result<u64> {
    let mut layer: Box<dyn Read + 'r> = Box::new(input);
    let mut depth = 0;
    loop {
        let header = next_header(&mut layer, path)?
            .ok_or_else(|| MissingLiteralDataSnafu.build())?;
        match Tag::from(header.tag) {
            Tag::CompressedData if depth < MAX_COMPRESSION_DEPTH => {
                depth += 1;
                layer = descend(layer, header, path)?;
            }
            Tag::OnePassSignature | Tag::Signature | Tag::Marker => {
                skip_body(&mut layer, header, path)?;
            }
            Tag::LiteralData => {
                let mut body = BodyReader::new(&mut layer, header.length);
                read_literal_header(&mut body, path)?;
                let mut written = 0u64;
                let mut buf = vec![0u8; chunk];
                loop {
                    cancel.check()?;
                    let read = body.read(&mut buf).map_err(|err| map_stream_error(err, path))?;
                    if read == 0 {
                        break;
                    }
                    out.write_all(&buf[..read]).context(IoSnafu { path: out_path })?;
                    written += read as u64;
                }
                // remaining packets (a signature trailer) are skipped
                drop(body);
                io::copy(&mut layer, &mut io::sink())
                    .map_err(|err| map_stream_error(err, path))?;
                return Ok(written);
            }
            _ => return MissingLiteralDataSnafu.fail(),
        }
    }
}

/// Decrypts the message in `path` and streams its literal data to
/// `out`.
///
/// The passphrase is probed against the matched secret key component
/// first, so a wrong passphrase surfaces as [`Error::InvalidPassphrase`]
/// rather than a generic decryption failure. An integrity failure on a
/// protected session is [`Error::IntegrityCheckFailed`] and the output
/// is never committed.
pub fn decrypt_to(
    path: &Path,
    source: &KeySource,
    passphrase: &str,
    out: &mut dyn Write,
    out_path: &Path,
    chunk: usize,
    cancel: &CancelToken,
) -> Result<u64> {
    let mut reader = open_message(path)?;
    let (esks, header) = read_sessions(&mut reader, path)?;
    let ids = session_key_ids(&esks);
    debug!("message has {} readable public key session(s)", ids.len());

    let (key, matched) = keyring::resolve_decryption_key(source, &ids, passphrase)?;
    let esk = esks
        .iter()
        .find(|esk| esk.id().map(|id| id == &matched).unwrap_or(false))
        .ok_or_else(|| MatchingPrivateKeyNotFoundSnafu.build())?;
    let values = esk.values().map_err(|err| Error::Pgp {
        context: "failed to read session key material",
        source: err,
    })?;
    let session = key
        .decrypt_session_key(passphrase, values)
        .map_err(|err| Error::Pgp {
            context: "failed to decrypt session key",
            source: err,
        })?;
    let (sym_alg, session_key) = match session {
        PlainSessionKey::V3_4 { sym_alg, ref key } => (sym_alg, key),
        other => {
            return Err(Error::Pgp {
                context: "failed to decrypt session key",
                source: pgp::errors::Error::Unsupported(format!(
                    "unexpected session key version {:?}",
                    other
                )),
            })
        }
    };

    let protected = Tag::from(header.tag) == Tag::SymEncryptedProtectedData;
    let mut body = BodyReader::new(&mut reader, header.length);
    if protected {
        let version = read_u8(&mut body).map_err(|err| map_stream_error(err, path))?;
        if version != 1 {
            return Err(bad_file(
                path,
                format!("unsupported protected data version {}", version),
            ));
        }
    }

    let mut plain = DecryptingReader::new(sym_alg, &session_key, protected, body)?;
    let written = copy_literal(&mut plain, out, out_path, chunk, cancel, path)?;
    // drain to the end of the encrypted body so the integrity trailer
    // is always verified
    io::copy(&mut plain, &mut io::sink()).map_err(|err| map_stream_error(err, path))?;
    Ok(written)
}

/// Result of a signature verification.
///
/// `is_valid = false` means a well formed signature that does not match
/// the content; structural problems are reported as errors instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub is_valid: bool,
    pub signer_key_id: String,
}

fn requested_key_id(value: &str) -> Result<KeyId> {
    let id = keyring::parse_key_id(value)?;
    KeyId::from_slice(&id.to_be_bytes())
        .map_err(|_| crate::errors::InvalidKeyIdSnafu { value }.build())
}

/// Verifies a detached signature file against the content file.
pub fn verify_detached(
    signature_path: &Path,
    content_path: &Path,
    source: &KeySource,
    key_id: Option<&str>,
    cancel: &CancelToken,
) -> Result<VerifyOutcome> {
    let file = File::open(signature_path).map_err(|err| bad_file(signature_path, err))?;
    let (sig, _headers) = StandaloneSignature::from_reader_single(BufReader::new(file))
        .map_err(|err| bad_file(signature_path, err))?;

    let signer = match key_id {
        Some(value) => requested_key_id(value)?,
        None => sig
            .signature
            .issuer()
            .first()
            .map(|id| (*id).clone())
            .ok_or_else(|| {
                KeyNotFoundSnafu {
                    key_id: "<no issuer in signature>".to_string(),
                }
                .build()
            })?,
    };

    let key = keyring::resolve_verification_key(source, &signer)?;
    let content = File::open(content_path).context(IoSnafu { path: content_path })?;
    let mut devnull = io::sink();
    let reader = crate::encode::TeeReader::new(BufReader::new(content), &mut devnull, cancel);
    let is_valid = key.verify(&sig.signature, reader).is_ok();
    cancel.check()?;
    Ok(VerifyOutcome {
        is_valid,
        signer_key_id: display_key_id(&signer),
    })
}

fn ops_key_id(ops: &OnePassSignature) -> Result<KeyId> {
    match &ops.version_specific {
        OpsVersionSpecific::V3 { key_id } => Ok(key_id.clone()),
        // v6 announces the full fingerprint; the key id is its prefix.
        OpsVersionSpecific::V6 { fingerprint, .. } => KeyId::from_slice(&fingerprint[..8])
            .map_err(|err| Error::Pgp {
                context: "invalid one pass signature fingerprint",
                source: err,
            }),
    }
}

/// Verifies an attached (one pass) signature embedded in the file.
///
/// Walks the packet stream through the states: one pass signature
/// header (possibly behind a compression layer), literal data (spooled
/// to an unnamed temporary file), trailing signature.
pub fn verify_attached(
    path: &Path,
    source: &KeySource,
    key_id: Option<&str>,
    chunk: usize,
    cancel: &CancelToken,
) -> Result<VerifyOutcome> {
    let reader = open_message(path)?;
    let mut layer: Box<dyn Read> = Box::new(reader);
    let mut depth = 0;

    // Start: expect the one pass signature header.
    let ops = loop {
        let header = next_header(&mut layer, path)?
            .ok_or_else(|| MissingOnePassSignatureSnafu.build())?;
        match Tag::from(header.tag) {
            Tag::Marker => skip_body(&mut layer, header, path)?,
            Tag::CompressedData if depth < MAX_COMPRESSION_DEPTH => {
                depth += 1;
                layer = descend(layer, header, path)?;
            }
            Tag::OnePassSignature => {
                let body = read_body_to_vec(&mut layer, header, path)?;
                break OnePassSignature::from_slice(header.version, &body)
                    .map_err(|err| bad_file(path, err))?;
            }
            _ => return MissingOnePassSignatureSnafu.fail(),
        }
    };

    // Awaiting content: spool the literal data body to disk.
    let mut spool = loop {
        let header = next_header(&mut layer, path)?
            .ok_or_else(|| MissingLiteralDataSnafu.build())?;
        match Tag::from(header.tag) {
            Tag::Marker => skip_body(&mut layer, header, path)?,
            Tag::CompressedData if depth < MAX_COMPRESSION_DEPTH => {
                depth += 1;
                layer = descend(layer, header, path)?;
            }
            Tag::LiteralData => {
                let mut body = BodyReader::new(&mut layer, header.length);
                read_literal_header(&mut body, path)?;
                let mut spool = tempfile::tempfile().map_err(|err| Error::Io {
                    path: path.to_path_buf(),
                    source: err,
                })?;
                let mut buf = vec![0u8; chunk];
                loop {
                    cancel.check()?;
                    let read = body.read(&mut buf).map_err(|err| map_stream_error(err, path))?;
                    if read == 0 {
                        break;
                    }
                    spool.write_all(&buf[..read]).map_err(|err| Error::Io {
                        path: path.to_path_buf(),
                        source: err,
                    })?;
                }
                break spool;
            }
            _ => return MissingLiteralDataSnafu.fail(),
        }
    };

    // Hashing: resolve the signer announced by the header.
    let signer = match key_id {
        Some(value) => requested_key_id(value)?,
        None => ops_key_id(&ops)?,
    };
    let key = keyring::resolve_verification_key(source, &signer)?;

    // Awaiting trailer: the signature packet closing the one pass pair.
    let signature: Signature = loop {
        let header = next_header(&mut layer, path)?
            .ok_or_else(|| MissingSignatureTrailerSnafu.build())?;
        match Tag::from(header.tag) {
            Tag::Marker => skip_body(&mut layer, header, path)?,
            Tag::Signature => {
                let body = read_body_to_vec(&mut layer, header, path)?;
                break Signature::from_slice(header.version, &body)
                    .map_err(|err| bad_file(path, err))?;
            }
            _ => return MissingSignatureTrailerSnafu.fail(),
        }
    };

    cancel.check()?;
    spool
        .seek(SeekFrom::Start(0))
        .map_err(|err| Error::Io {
            path: path.to_path_buf(),
            source: err,
        })?;
    let is_valid = key.verify(&signature, BufReader::new(spool)).is_ok();
    Ok(VerifyOutcome {
        is_valid,
        signer_key_id: display_key_id(&signer),
    })
}
