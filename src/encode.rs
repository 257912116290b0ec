//! Encode pipeline: composing armor, encryption, compression, signing
//! and literal data layers on write.
//!
//! Layer nesting mirrors what the decode side expects:
//! `[armor] -> [encryption session] -> [compression] -> [one pass
//! signature] -> literal data -> [trailing signature]`. For sign-only
//! output there is no encryption layer and compression, when requested,
//! becomes the outermost content layer.
//!
//! Each layer is a writer wrapping the next one down, so the content
//! flows through in chunks and no layer ever holds the whole message.
//! Packet bodies whose size is unknown up front are framed with partial
//! lengths by [`PacketBodyWriter`].

use std::io::{self, Read, Write};
use std::path::Path;

use chrono::{SubsecRound, Utc};
use flate2::write::{DeflateEncoder, ZlibEncoder};
use log::debug;
use pgp::packet::{
    write_packet, OnePassSignature, PublicKeyEncryptedSessionKey, Signature, SignatureConfig,
    SignatureType, Subpacket, SubpacketData,
};
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::types::{KeyVersion, Tag};
use rand::rngs::StdRng;
use rand::SeedableRng;
use snafu::ResultExt;

use crate::armor::{ArmorWriter, BlockLabel};
use crate::cancel::CancelToken;
use crate::errors::{IoSnafu, PgpSnafu, Result, UnsupportedCompressionSnafu};
use crate::keyring::{EncryptionTarget, SigningKey};
use crate::stream::EncryptingWriter;
use crate::types::{Compression, SignatureHash, SymmetricAlgorithm};
use crate::wire::PacketBodyWriter;

/// A writer layer that knows how to close its own framing and then the
/// layers below it.
pub trait MessageSink: Write {
    fn finish(self: Box<Self>) -> io::Result<()>;
}

/// An owned stack of message layers.
pub type Sink<'a> = Box<dyn MessageSink + 'a>;

struct BaseSink<W: Write>(W);

impl<W: Write> Write for BaseSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write> MessageSink for BaseSink<W> {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.0.flush()
    }
}

/// Starts a layer stack over any writer, typically the output file.
pub fn base_sink<'a, W: Write + 'a>(writer: W) -> Sink<'a> {
    Box::new(BaseSink(writer))
}

impl<'a> MessageSink for ArmorWriter<Sink<'a>> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let inner = ArmorWriter::finish(*self)?;
        inner.finish()
    }
}

/// Wraps the stack in an ASCII armor block.
pub fn armor_sink<'a>(sink: Sink<'a>, label: BlockLabel, dest: &Path) -> Result<Sink<'a>> {
    let armor = ArmorWriter::new(sink, label).context(IoSnafu { path: dest })?;
    Ok(Box::new(armor))
}

struct EncryptedSink<'a> {
    inner: EncryptingWriter<PacketBodyWriter<Sink<'a>>>,
}

impl Write for EncryptedSink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl MessageSink for EncryptedSink<'_> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let body = self.inner.finish()?;
        let sink = body.finish()?;
        sink.finish()
    }
}

/// Opens an integrity protected encryption layer keyed to the
/// recipient: the encrypted session key packet first, then a protected
/// data packet everything below is encrypted into.
pub fn encrypted_sink<'a>(
    sink: Sink<'a>,
    recipient: &EncryptionTarget,
    algorithm: SymmetricAlgorithm,
    chunk: usize,
    dest: &Path,
) -> Result<Sink<'a>> {
    let alg = SymmetricKeyAlgorithm::from(algorithm);
    let mut rng = StdRng::from_entropy();
    let session_key = alg.new_session_key(&mut rng);
    debug!("encrypting to key {:?}", recipient.key_id());
    let esk = match recipient {
        EncryptionTarget::Primary(key) => {
            PublicKeyEncryptedSessionKey::from_session_key_v3(&mut rng, &session_key, alg, key)
        }
        EncryptionTarget::Subkey(key) => {
            PublicKeyEncryptedSessionKey::from_session_key_v3(&mut rng, &session_key, alg, key)
        }
    }
    .context(PgpSnafu {
        context: "failed to build encrypted session key",
    })?;

    let mut sink = sink;
    write_packet(&mut sink, &esk).context(PgpSnafu {
        context: "failed to write session key packet",
    })?;

    let mut body = PacketBodyWriter::new(sink, Tag::SymEncryptedProtectedData, chunk);
    body.write_all(&[0x01]).context(IoSnafu { path: dest })?;
    let inner = EncryptingWriter::new(rng, alg, &session_key, body)?;
    Ok(Box::new(EncryptedSink { inner }))
}

enum Compressor<'a> {
    Zip(DeflateEncoder<PacketBodyWriter<Sink<'a>>>),
    Zlib(ZlibEncoder<PacketBodyWriter<Sink<'a>>>),
}

struct CompressedSink<'a> {
    encoder: Compressor<'a>,
}

impl Write for CompressedSink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.encoder {
            Compressor::Zip(enc) => enc.write(buf),
            Compressor::Zlib(enc) => enc.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.encoder {
            Compressor::Zip(enc) => enc.flush(),
            Compressor::Zlib(enc) => enc.flush(),
        }
    }
}

impl MessageSink for CompressedSink<'_> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let body = match self.encoder {
            Compressor::Zip(enc) => enc.finish()?,
            Compressor::Zlib(enc) => enc.finish()?,
        };
        let sink = body.finish()?;
        sink.finish()
    }
}

/// Opens a compressed data layer.
pub fn compressed_sink<'a>(
    sink: Sink<'a>,
    compression: Compression,
    chunk: usize,
    dest: &Path,
) -> Result<Sink<'a>> {
    debug!("compressing message with {:?}", compression);
    let mut body = PacketBodyWriter::new(sink, Tag::CompressedData, chunk);
    let level = flate2::Compression::default();
    let encoder = match compression {
        Compression::Zip => {
            body.write_all(&[1]).context(IoSnafu { path: dest })?;
            Compressor::Zip(DeflateEncoder::new(body, level))
        }
        Compression::Zlib => {
            body.write_all(&[2]).context(IoSnafu { path: dest })?;
            Compressor::Zlib(ZlibEncoder::new(body, level))
        }
        Compression::BZip2 => {
            return UnsupportedCompressionSnafu { algorithm: "BZip2" }.fail()
        }
    };
    Ok(Box::new(CompressedSink { encoder }))
}

/// Closes the whole layer stack, innermost to outermost.
pub fn finish_sink(sink: Sink<'_>, dest: &Path) -> Result<()> {
    sink.finish().context(IoSnafu { path: dest })
}

/// Streams one literal data packet into the layer stack.
///
/// Unlike the layers above it, the literal writer borrows the stack, so
/// trailing packets (a signature closing a one pass pair) can be
/// written after [`LiteralWriter::finish`].
pub struct LiteralWriter<'w, W: Write> {
    body: PacketBodyWriter<&'w mut W>,
}

impl<'w, W: Write> LiteralWriter<'w, W> {
    pub fn new(sink: &'w mut W, name: &str, chunk: usize, dest: &Path) -> Result<Self> {
        let mut body = PacketBodyWriter::new(sink, Tag::LiteralData, chunk);
        // the name field is a single length octet wide
        let name = &name.as_bytes()[..name.len().min(255)];
        let created = Utc::now().timestamp() as u32;
        let write = |body: &mut PacketBodyWriter<&mut W>| -> io::Result<()> {
            body.write_all(&[b'b', name.len() as u8])?;
            body.write_all(name)?;
            body.write_all(&created.to_be_bytes())
        };
        write(&mut body).context(IoSnafu { path: dest })?;
        Ok(LiteralWriter { body })
    }

    pub fn finish(self, dest: &Path) -> Result<()> {
        self.body.finish().context(IoSnafu { path: dest })?;
        Ok(())
    }
}

impl<W: Write> Write for LiteralWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.body.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.body.flush()
    }
}

/// Writes the forward header of a one pass signature pair.
pub fn write_one_pass_header(
    mut sink: &mut dyn Write,
    signer: &SigningKey,
    hash: SignatureHash,
) -> Result<()> {
    let ops = OnePassSignature::v3(
        SignatureType::Binary,
        hash.into(),
        signer.algorithm(),
        signer.key_id(),
    );
    write_packet(&mut sink, &ops).context(PgpSnafu {
        context: "failed to write one pass signature",
    })
}

/// Produces a binary signature over everything `data` yields, hashing
/// it as it streams through.
pub fn sign_reader(
    signer: &SigningKey,
    passphrase: &str,
    hash: SignatureHash,
    data: impl Read,
) -> Result<Signature> {
    if signer.version() != KeyVersion::V4 {
        return Err(pgp::errors::Error::Unsupported(
            "only version 4 signing keys are supported".to_string(),
        ))
        .context(PgpSnafu {
            context: "failed to sign content",
        });
    }
    debug!("signing with key {:?}", signer.key_id());
    let mut config = SignatureConfig::v4(SignatureType::Binary, signer.algorithm(), hash.into());
    config.hashed_subpackets = vec![
        Subpacket::regular(SubpacketData::IssuerFingerprint(signer.fingerprint())),
        Subpacket::regular(SubpacketData::SignatureCreationTime(
            Utc::now().trunc_subsecs(0),
        )),
    ];
    config.unhashed_subpackets = vec![Subpacket::regular(SubpacketData::Issuer(signer.key_id()))];

    let pw = || passphrase.to_string();
    match signer {
        SigningKey::Primary(key) => config.sign(key, pw, data),
        SigningKey::Subkey(key) => config.sign(key, pw, data),
    }
    .context(PgpSnafu {
        context: "failed to sign content",
    })
}

/// Writes a signature packet, closing a one pass pair or standing alone
/// as a detached signature.
pub fn write_signature_packet(mut sink: &mut dyn Write, sig: &Signature) -> Result<()> {
    write_packet(&mut sink, sig).context(PgpSnafu {
        context: "failed to write signature",
    })
}

/// Copies its source into a writer as a side effect of being read, so
/// one pass over the file both hashes for the signature and feeds the
/// literal data layer. Cancellation surfaces as an interrupted read.
pub(crate) struct TeeReader<'a, R: Read> {
    source: R,
    sink: &'a mut dyn Write,
    cancel: &'a CancelToken,
}

impl<'a, R: Read> TeeReader<'a, R> {
    pub fn new(source: R, sink: &'a mut dyn Write, cancel: &'a CancelToken) -> Self {
        TeeReader { source, sink, cancel }
    }
}

impl<R: Read> Read for TeeReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "operation was cancelled",
            ));
        }
        let read = self.source.read(buf)?;
        self.sink.write_all(&buf[..read])?;
        Ok(read)
    }
}
