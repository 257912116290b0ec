//! Chunked OpenPGP CFB decryption with integrity verification.

use std::fmt;
use std::io::{self, Read};

use cfb_mode::BufDecryptor;
use cipher::{Iv, KeyIvInit};
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use sha1::{Digest, Sha1};

use crate::errors::{CipherInitSnafu, Result};
use crate::stream::MDC_LEN;

/// The modification detection code did not match the decrypted data.
///
/// Carried as the inner error of an [`io::Error`] so it survives the
/// reader composition and can be classified by the caller.
#[derive(Debug)]
pub struct MdcMismatch;

impl fmt::Display for MdcMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "modification detection code mismatch")
    }
}

impl std::error::Error for MdcMismatch {}

fn init<C: KeyIvInit>(key: &[u8], iv: Option<&[u8]>) -> Result<C> {
    let result = match iv {
        Some(iv) => C::new_from_slices(key, iv),
        None => C::new_from_slices(key, &Iv::<C>::default()),
    };
    result.map_err(|err| CipherInitSnafu { reason: err.to_string() }.build())
}

enum Cfb {
    Idea(BufDecryptor<idea::Idea>),
    TripleDes(BufDecryptor<des::TdesEde3>),
    Cast5(BufDecryptor<cast5::Cast5>),
    Blowfish(BufDecryptor<blowfish::Blowfish>),
    Aes128(BufDecryptor<aes::Aes128>),
    Aes192(BufDecryptor<aes::Aes192>),
    Aes256(BufDecryptor<aes::Aes256>),
    Twofish(BufDecryptor<twofish::Twofish>),
    Camellia128(BufDecryptor<camellia::Camellia128>),
    Camellia192(BufDecryptor<camellia::Camellia192>),
    Camellia256(BufDecryptor<camellia::Camellia256>),
}

impl Cfb {
    fn new(alg: SymmetricKeyAlgorithm, key: &[u8], iv: Option<&[u8]>) -> Result<Self> {
        Ok(match alg {
            SymmetricKeyAlgorithm::IDEA => Cfb::Idea(init(key, iv)?),
            SymmetricKeyAlgorithm::TripleDES => Cfb::TripleDes(init(key, iv)?),
            SymmetricKeyAlgorithm::CAST5 => Cfb::Cast5(init(key, iv)?),
            SymmetricKeyAlgorithm::Blowfish => Cfb::Blowfish(init(key, iv)?),
            SymmetricKeyAlgorithm::AES128 => Cfb::Aes128(init(key, iv)?),
            SymmetricKeyAlgorithm::AES192 => Cfb::Aes192(init(key, iv)?),
            SymmetricKeyAlgorithm::AES256 => Cfb::Aes256(init(key, iv)?),
            SymmetricKeyAlgorithm::Twofish => Cfb::Twofish(init(key, iv)?),
            SymmetricKeyAlgorithm::Camellia128 => Cfb::Camellia128(init(key, iv)?),
            SymmetricKeyAlgorithm::Camellia192 => Cfb::Camellia192(init(key, iv)?),
            SymmetricKeyAlgorithm::Camellia256 => Cfb::Camellia256(init(key, iv)?),
            other => {
                return CipherInitSnafu {
                    reason: format!("unsupported symmetric algorithm {:?}", other),
                }
                .fail()
            }
        })
    }

    fn process(&mut self, data: &mut [u8]) {
        match self {
            Cfb::Idea(c) => c.decrypt(data),
            Cfb::TripleDes(c) => c.decrypt(data),
            Cfb::Cast5(c) => c.decrypt(data),
            Cfb::Blowfish(c) => c.decrypt(data),
            Cfb::Aes128(c) => c.decrypt(data),
            Cfb::Aes192(c) => c.decrypt(data),
            Cfb::Aes256(c) => c.decrypt(data),
            Cfb::Twofish(c) => c.decrypt(data),
            Cfb::Camellia128(c) => c.decrypt(data),
            Cfb::Camellia192(c) => c.decrypt(data),
            Cfb::Camellia256(c) => c.decrypt(data),
        }
    }
}

const RAW_CHUNK: usize = 8 * 1024;

/// Decrypts an encrypted data body a chunk at a time.
///
/// In protected mode the trailing modification detection code is held
/// back from the output and verified once the source is exhausted;
/// reading past the end of the data raises [`MdcMismatch`] (wrapped in
/// an [`io::Error`]) when it does not match. In legacy mode the cipher
/// is resynchronized after the prefix and no trailer is expected.
pub struct DecryptingReader<R: Read> {
    cfb: Cfb,
    source: R,
    hasher: Sha1,
    protected: bool,
    /// Key retained for the legacy resynchronization step.
    resync: Option<(SymmetricKeyAlgorithm, Vec<u8>)>,
    prefix_len: usize,
    prefix_done: bool,
    /// Decrypted bytes not yet returned; `pos..ready` is servable.
    buffer: Vec<u8>,
    pos: usize,
    ready: usize,
    raw: Vec<u8>,
    eof: bool,
}

impl<R: Read> DecryptingReader<R> {
    pub fn new(
        alg: SymmetricKeyAlgorithm,
        key: &[u8],
        protected: bool,
        source: R,
    ) -> Result<Self> {
        Ok(DecryptingReader {
            cfb: Cfb::new(alg, key, None)?,
            source,
            hasher: Sha1::default(),
            protected,
            resync: (!protected).then(|| (alg, key.to_vec())),
            prefix_len: alg.block_size() + 2,
            prefix_done: false,
            buffer: Vec::with_capacity(RAW_CHUNK + MDC_LEN),
            pos: 0,
            ready: 0,
            raw: vec![0u8; RAW_CHUNK],
            eof: false,
        })
    }

    fn read_prefix(&mut self) -> io::Result<()> {
        let mut prefix = vec![0u8; self.prefix_len];
        self.source.read_exact(&mut prefix).map_err(|err| {
            io::Error::new(err.kind(), "missing encryption prefix")
        })?;
        if let Some((alg, key)) = self.resync.take() {
            // Legacy mode: the cipher restarts with the encrypted
            // prefix (sans quick check bytes) as its feedback register.
            let iv = prefix[2..].to_vec();
            self.cfb.process(&mut prefix);
            self.cfb = Cfb::new(alg, &key, Some(&iv))
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;
        } else {
            self.cfb.process(&mut prefix);
            self.hasher.update(&prefix);
        }
        self.prefix_done = true;
        Ok(())
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buffer.drain(..self.pos);
            self.ready -= self.pos;
            self.pos = 0;
        }
    }

    fn verify_mdc(&mut self) -> io::Result<()> {
        let tail = self.buffer.len() - self.ready;
        if tail != MDC_LEN {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "missing modification detection code",
            ));
        }
        let mdc = &self.buffer[self.ready..];
        self.hasher.update(&mdc[..2]);
        let digest = std::mem::take(&mut self.hasher).finalize();
        if mdc[0] != 0xd3 || mdc[1] != 0x14 || digest[..] != mdc[2..] {
            return Err(io::Error::new(io::ErrorKind::InvalidData, MdcMismatch));
        }
        self.buffer.truncate(self.ready);
        Ok(())
    }

    fn refill(&mut self) -> io::Result<()> {
        self.compact();
        let read = self.source.read(&mut self.raw)?;
        if read == 0 {
            self.eof = true;
            if self.protected {
                self.verify_mdc()?;
            }
            return Ok(());
        }
        self.cfb.process(&mut self.raw[..read]);
        self.buffer.extend_from_slice(&self.raw[..read]);
        let hold_back = if self.protected { MDC_LEN } else { 0 };
        let new_ready = self.buffer.len().saturating_sub(hold_back).max(self.ready);
        if self.protected {
            self.hasher.update(&self.buffer[self.ready..new_ready]);
        }
        self.ready = new_ready;
        Ok(())
    }
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.prefix_done {
            self.read_prefix()?;
        }
        loop {
            let available = self.ready - self.pos;
            if available > 0 {
                let len = available.min(buf.len());
                buf[..len].copy_from_slice(&self.buffer[self.pos..self.pos + len]);
                self.pos += len;
                return Ok(len);
            }
            if self.eof {
                return Ok(0);
            }
            self.refill()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::EncryptingWriter;
    use std::io::Write;

    fn session_key(alg: SymmetricKeyAlgorithm) -> Vec<u8> {
        (0..alg.key_size()).map(|i| i as u8).collect()
    }

    #[test]
    fn protected_roundtrip_across_chunk_sizes() {
        let alg = SymmetricKeyAlgorithm::AES256;
        let key = session_key(alg);
        for len in [0usize, 1, 100, RAW_CHUNK - 1, RAW_CHUNK, RAW_CHUNK * 3 + 17] {
            let plain: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let mut enc =
                EncryptingWriter::new(rand::thread_rng(), alg, &key, Vec::new()).unwrap();
            enc.write_all(&plain).unwrap();
            let encrypted = enc.finish().unwrap();

            let mut dec = DecryptingReader::new(alg, &key, true, &encrypted[..]).unwrap();
            let mut decrypted = Vec::new();
            dec.read_to_end(&mut decrypted).unwrap();
            assert_eq!(decrypted, plain, "len {}", len);
        }
    }

    #[test]
    fn tampered_data_fails_the_integrity_check() {
        let alg = SymmetricKeyAlgorithm::AES128;
        let key = session_key(alg);
        let mut enc = EncryptingWriter::new(rand::thread_rng(), alg, &key, Vec::new()).unwrap();
        enc.write_all(b"do not touch this").unwrap();
        let mut encrypted = enc.finish().unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;

        let mut dec = DecryptingReader::new(alg, &key, true, &encrypted[..]).unwrap();
        let err = dec.read_to_end(&mut Vec::new()).unwrap_err();
        assert!(err.get_ref().is_some_and(|inner| inner.is::<MdcMismatch>()));
    }

    #[test]
    fn truncated_trailer_is_an_error() {
        let alg = SymmetricKeyAlgorithm::AES128;
        let key = session_key(alg);
        let mut enc = EncryptingWriter::new(rand::thread_rng(), alg, &key, Vec::new()).unwrap();
        enc.write_all(b"short").unwrap();
        let mut encrypted = enc.finish().unwrap();
        encrypted.truncate(encrypted.len() - 10);

        let mut dec = DecryptingReader::new(alg, &key, true, &encrypted[..]).unwrap();
        let err = dec.read_to_end(&mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
