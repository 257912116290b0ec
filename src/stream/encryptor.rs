//! Chunked OpenPGP CFB encryption with integrity protection.

use std::io::{self, Write};

use cfb_mode::BufEncryptor;
use cipher::{Iv, KeyIvInit};
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use rand::{CryptoRng, Rng};
use sha1::{Digest, Sha1};

use crate::errors::{CipherInitSnafu, Result};
use crate::stream::MDC_LEN;

fn init<C: KeyIvInit>(key: &[u8]) -> Result<C> {
    C::new_from_slices(key, &Iv::<C>::default())
        .map_err(|err| CipherInitSnafu { reason: err.to_string() }.build())
}

enum Cfb {
    Idea(BufEncryptor<idea::Idea>),
    TripleDes(BufEncryptor<des::TdesEde3>),
    Cast5(BufEncryptor<cast5::Cast5>),
    Blowfish(BufEncryptor<blowfish::Blowfish>),
    Aes128(BufEncryptor<aes::Aes128>),
    Aes192(BufEncryptor<aes::Aes192>),
    Aes256(BufEncryptor<aes::Aes256>),
    Twofish(BufEncryptor<twofish::Twofish>),
    Camellia128(BufEncryptor<camellia::Camellia128>),
    Camellia192(BufEncryptor<camellia::Camellia192>),
    Camellia256(BufEncryptor<camellia::Camellia256>),
}

impl Cfb {
    fn new(alg: SymmetricKeyAlgorithm, key: &[u8]) -> Result<Self> {
        Ok(match alg {
            SymmetricKeyAlgorithm::IDEA => Cfb::Idea(init(key)?),
            SymmetricKeyAlgorithm::TripleDES => Cfb::TripleDes(init(key)?),
            SymmetricKeyAlgorithm::CAST5 => Cfb::Cast5(init(key)?),
            SymmetricKeyAlgorithm::Blowfish => Cfb::Blowfish(init(key)?),
            SymmetricKeyAlgorithm::AES128 => Cfb::Aes128(init(key)?),
            SymmetricKeyAlgorithm::AES192 => Cfb::Aes192(init(key)?),
            SymmetricKeyAlgorithm::AES256 => Cfb::Aes256(init(key)?),
            SymmetricKeyAlgorithm::Twofish => Cfb::Twofish(init(key)?),
            SymmetricKeyAlgorithm::Camellia128 => Cfb::Camellia128(init(key)?),
            SymmetricKeyAlgorithm::Camellia192 => Cfb::Camellia192(init(key)?),
            SymmetricKeyAlgorithm::Camellia256 => Cfb::Camellia256(init(key)?),
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
            Cfb::Idea(c) => c.encrypt(data),
            Cfb::TripleDes(c) => c.encrypt(data),
            Cfb::Cast5(c) => c.encrypt(data),
            Cfb::Blowfish(c) => c.encrypt(data),
            Cfb::Aes128(c) => c.encrypt(data),
            Cfb::Aes192(c) => c.encrypt(data),
            Cfb::Aes256(c) => c.encrypt(data),
            Cfb::Twofish(c) => c.encrypt(data),
            Cfb::Camellia128(c) => c.encrypt(data),
            Cfb::Camellia192(c) => c.encrypt(data),
            Cfb::Camellia256(c) => c.encrypt(data),
        }
    }
}

const SCRATCH_LEN: usize = 8 * 1024;

/// Encrypts everything written to it into an integrity protected data
/// body: random prefix with quick check bytes, the data, then the
/// encrypted modification detection code over both.
pub struct EncryptingWriter<W: Write> {
    cfb: Cfb,
    hasher: Sha1,
    sink: W,
    /// Encrypted prefix, flushed lazily so construction does no io.
    pending: Vec<u8>,
    scratch: Vec<u8>,
}

impl<W: Write> EncryptingWriter<W> {
    pub fn new<R: Rng + CryptoRng>(
        mut rng: R,
        alg: SymmetricKeyAlgorithm,
        key: &[u8],
        sink: W,
    ) -> Result<Self> {
        let bs = alg.block_size();
        let mut prefix = vec![0u8; bs + 2];
        rng.fill_bytes(&mut prefix[..bs]);
        prefix[bs] = prefix[bs - 2];
        prefix[bs + 1] = prefix[bs - 1];

        let mut cfb = Cfb::new(alg, key)?;
        let mut hasher = Sha1::default();
        hasher.update(&prefix);
        cfb.process(&mut prefix);

        Ok(EncryptingWriter {
            cfb,
            hasher,
            sink,
            pending: prefix,
            scratch: Vec::with_capacity(SCRATCH_LEN),
        })
    }

    fn flush_pending(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            self.sink.write_all(&self.pending)?;
            self.pending.clear();
        }
        Ok(())
    }

    /// Writes the encrypted integrity trailer and returns the sink.
    pub fn finish(mut self) -> io::Result<W> {
        self.flush_pending()?;
        let mut mdc = [0u8; MDC_LEN];
        mdc[0] = 0xd3;
        mdc[1] = 0x14;
        self.hasher.update(&mdc[..2]);
        let digest = std::mem::take(&mut self.hasher).finalize();
        mdc[2..].copy_from_slice(&digest);
        self.cfb.process(&mut mdc);
        self.sink.write_all(&mdc)?;
        Ok(self.sink)
    }
}

impl<W: Write> Write for EncryptingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.flush_pending()?;
        let len = buf.len().min(SCRATCH_LEN);
        self.scratch.clear();
        self.scratch.extend_from_slice(&buf[..len]);
        self.hasher.update(&self.scratch);
        self.cfb.process(&mut self.scratch);
        self.sink.write_all(&self.scratch)?;
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_pending()?;
        self.sink.flush()
    }
}
