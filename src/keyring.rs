//! Key resolution: locating and validating a usable key in a key ring.
//!
//! A key ring is parsed once per invocation from a [`KeySource`] and
//! dropped at the end of the operation. Keys are selected either by an
//! explicit key id (hex, optional `0x` prefix) or by a first-fit scan
//! over the ring in storage order. The scan order is whatever order the
//! ring was serialized in; no canonical ordering is imposed.

use std::fs::File;
use std::io::BufReader;

use std::io::Read;

use chrono::{DateTime, Utc};
use log::debug;
use pgp::composed::signed_key::{SignedPublicSubKey, SignedSecretSubKey};
use pgp::composed::{
    decrypt_session_key, Deserializable, PlainSessionKey, SignedPublicKey, SignedSecretKey,
};
use pgp::crypto::public_key::PublicKeyAlgorithm;
use pgp::packet::SignatureType;
use pgp::types::{EskType, Fingerprint, KeyId, KeyVersion, PkeskBytes, PublicKeyTrait, SecretKeyTrait};
use snafu::ResultExt;

use crate::errors::{
    InvalidKeyIdSnafu, InvalidPassphraseSnafu, IoSnafu, KeyFileNotFoundSnafu,
    KeyNotFoundSnafu, KeyParseFailedSnafu, MatchingPrivateKeyNotFoundSnafu, NoSigningKeySnafu,
    NoUsableKeySnafu, PassphraseRequiredSnafu, PrivateKeyExtractionFailedSnafu, Result,
    UnusableKeySnafu,
};
use crate::types::KeySource;

/// A public key usable as an encryption recipient, either a primary key
/// or one of its subkeys.
#[derive(Debug, Clone)]
pub enum EncryptionTarget {
    Primary(SignedPublicKey),
    Subkey(SignedPublicSubKey),
}

impl EncryptionTarget {
    pub fn key_id(&self) -> KeyId {
        match self {
            EncryptionTarget::Primary(k) => k.key_id(),
            EncryptionTarget::Subkey(k) => k.key_id(),
        }
    }
}

/// A public key resolved for signature verification.
#[derive(Debug, Clone)]
pub enum VerificationKey {
    Primary(SignedPublicKey),
    Subkey(SignedPublicSubKey),
}

impl VerificationKey {
    pub fn key_id(&self) -> KeyId {
        match self {
            VerificationKey::Primary(k) => k.key_id(),
            VerificationKey::Subkey(k) => k.key_id(),
        }
    }

    /// Verifies a signature against the content, which is hashed as it
    /// streams through.
    pub fn verify<R: Read>(
        &self,
        sig: &pgp::packet::Signature,
        content: R,
    ) -> pgp::errors::Result<()> {
        match self {
            VerificationKey::Primary(k) => sig.verify(k, content),
            VerificationKey::Subkey(k) => sig.verify(k, content),
        }
    }
}

/// Renders a key id the way it appears in error messages and results.
pub fn display_key_id(id: &KeyId) -> String {
    hex::encode_upper(id.as_ref())
}

/// Parses a user supplied key id: hex, case insensitive, optional `0x`
/// prefix, at most 16 digits.
pub fn parse_key_id(value: &str) -> Result<u64> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u64::from_str_radix(digits, 16)
        .ok()
        .filter(|_| !digits.is_empty() && digits.len() <= 16)
        .ok_or_else(|| InvalidKeyIdSnafu { value }.build())
}

fn key_id_u64(id: &KeyId) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(id.as_ref());
    u64::from_be_bytes(raw)
}

/// Loads all public keys from the given source, armored or binary.
pub fn load_public_keys(source: &KeySource) -> Result<Vec<SignedPublicKey>> {
    load_keys::<SignedPublicKey>(source)
}

/// Loads all secret keys from the given source, armored or binary.
pub fn load_secret_keys(source: &KeySource) -> Result<Vec<SignedSecretKey>> {
    load_keys::<SignedSecretKey>(source)
}

fn load_keys<T: Deserializable>(source: &KeySource) -> Result<Vec<T>> {
    let iter = match source {
        KeySource::Path(path) => {
            snafu::ensure!(path.is_file(), KeyFileNotFoundSnafu { path });
            let file = File::open(path).context(IoSnafu { path })?;
            T::from_reader_many(BufReader::new(file))
                .context(KeyParseFailedSnafu)?
                .0
        }
        KeySource::Data(data) => T::from_reader_many(&data[..]).context(KeyParseFailedSnafu)?.0,
    };
    let keys: Vec<T> = iter
        .collect::<pgp::errors::Result<_>>()
        .context(KeyParseFailedSnafu)?;
    debug!("loaded {} key(s) from key ring", keys.len());
    Ok(keys)
}

/// Why a key cannot be used for a purpose, phrased for error messages.
fn unusable_reason(
    encryption_capable: bool,
    revoked: bool,
    expires_at: Option<DateTime<Utc>>,
) -> Option<&'static str> {
    if !encryption_capable {
        return Some("is not valid for encryption");
    }
    if revoked {
        return Some("has been revoked and cannot be used");
    }
    match expires_at {
        Some(expiry) if Utc::now() > expiry => Some("is expired and cannot be used"),
        _ => None,
    }
}

fn primary_revoked(key: &SignedPublicKey) -> bool {
    !key.details.revocation_signatures.is_empty()
}

fn subkey_revoked(subkey: &SignedPublicSubKey) -> bool {
    subkey
        .signatures
        .iter()
        .any(|sig| sig.typ() == SignatureType::SubkeyRevocation)
}

fn subkey_expires_at(subkey: &SignedPublicSubKey) -> Option<DateTime<Utc>> {
    let expiration = subkey
        .signatures
        .iter()
        .find_map(|sig| sig.key_expiration_time())?;
    Some(*subkey.key.created_at() + *expiration)
}

fn primary_flaw(key: &SignedPublicKey) -> Option<&'static str> {
    unusable_reason(key.is_encryption_key(), primary_revoked(key), key.expires_at())
}

fn subkey_flaw(subkey: &SignedPublicSubKey) -> Option<&'static str> {
    unusable_reason(
        subkey.is_encryption_key(),
        subkey_revoked(subkey),
        subkey_expires_at(subkey),
    )
}

/// Resolves the recipient key for encryption.
///
/// With an explicit key id the key must exist and pass the validity
/// checks; without one, the first key in ring order that is encryption
/// capable, not revoked and not expired wins.
pub fn resolve_encryption_key(
    source: &KeySource,
    key_id: Option<&str>,
) -> Result<EncryptionTarget> {
    let keys = load_public_keys(source)?;

    if let Some(requested) = key_id {
        let wanted = parse_key_id(requested)?;
        for key in keys {
            if key_id_u64(&key.key_id()) == wanted {
                if let Some(reason) = primary_flaw(&key) {
                    return UnusableKeySnafu {
                        key_id: display_key_id(&key.key_id()),
                        reason,
                    }
                    .fail();
                }
                return Ok(EncryptionTarget::Primary(key));
            }
            if let Some(subkey) = key
                .public_subkeys
                .iter()
                .find(|sub| key_id_u64(&sub.key_id()) == wanted)
            {
                if let Some(reason) = subkey_flaw(subkey) {
                    return UnusableKeySnafu {
                        key_id: display_key_id(&subkey.key_id()),
                        reason,
                    }
                    .fail();
                }
                return Ok(EncryptionTarget::Subkey(subkey.clone()));
            }
        }
        return KeyNotFoundSnafu {
            key_id: requested.to_string(),
        }
        .fail();
    }

    // First-fit scan, ring order: primary first, then its subkeys.
    for key in keys {
        if primary_flaw(&key).is_none() {
            debug!("selected encryption key {}", display_key_id(&key.key_id()));
            return Ok(EncryptionTarget::Primary(key));
        }
        if let Some(subkey) = key.public_subkeys.iter().find(|s| subkey_flaw(s).is_none()) {
            debug!(
                "selected encryption subkey {}",
                display_key_id(&subkey.key_id())
            );
            return Ok(EncryptionTarget::Subkey(subkey.clone()));
        }
    }
    NoUsableKeySnafu.fail()
}

/// Distinguishes a wrong passphrase from other extraction failures.
///
/// rpgp reports a bad passphrase on a protected key as invalid input or
/// as a checksum mismatch, depending on the protection mode.
fn is_wrong_passphrase(err: &pgp::errors::Error) -> bool {
    matches!(err, pgp::errors::Error::InvalidInput)
        || err.to_string().to_lowercase().contains("checksum")
}

fn probe_unlock<K>(key: &K, key_id: &KeyId, passphrase: &str) -> Result<()>
where
    K: SecretKeyTrait,
{
    match key.unlock(|| passphrase.to_string(), |_| Ok(())) {
        Ok(()) => Ok(()),
        Err(err) if is_wrong_passphrase(&err) => InvalidPassphraseSnafu {
            key_id: display_key_id(key_id),
        }
        .fail(),
        Err(err) => Err(err).context(PrivateKeyExtractionFailedSnafu),
    }
}

/// The secret key component an encrypted session was addressed to.
#[derive(Debug, Clone)]
pub enum DecryptionKey {
    Primary(SignedSecretKey),
    Subkey(SignedSecretSubKey),
}

impl DecryptionKey {
    pub fn key_id(&self) -> KeyId {
        match self {
            DecryptionKey::Primary(k) => k.key_id(),
            DecryptionKey::Subkey(k) => k.key_id(),
        }
    }

    /// Recovers the plain session key from the encrypted session
    /// material.
    pub fn decrypt_session_key(
        &self,
        passphrase: &str,
        values: &PkeskBytes,
    ) -> pgp::errors::Result<PlainSessionKey> {
        let pw = || passphrase.to_string();
        match self {
            DecryptionKey::Primary(k) => decrypt_session_key(k, pw, values, EskType::V3_4),
            DecryptionKey::Subkey(k) => decrypt_session_key(k, pw, values, EskType::V3_4),
        }
    }
}

/// Resolves the secret key component matching one of the message's
/// encrypted sessions, probing the passphrase against it.
///
/// Sessions are tried in list order and the first one with a matching
/// secret key (primary or subkey) wins; later sessions are never
/// attempted once a match is found.
pub fn resolve_decryption_key(
    source: &KeySource,
    session_key_ids: &[KeyId],
    passphrase: &str,
) -> Result<(DecryptionKey, KeyId)> {
    let keys = load_secret_keys(source)?;

    for wanted in session_key_ids {
        for key in &keys {
            if &key.key_id() == wanted {
                probe_unlock(key, wanted, passphrase)?;
                debug!("session matches primary key {}", display_key_id(wanted));
                return Ok((DecryptionKey::Primary(key.clone()), wanted.clone()));
            }
            if let Some(subkey) = key
                .secret_subkeys
                .iter()
                .find(|sub| &sub.key_id() == wanted)
            {
                probe_unlock(subkey, wanted, passphrase)?;
                debug!("session matches subkey {}", display_key_id(wanted));
                return Ok((DecryptionKey::Subkey(subkey.clone()), wanted.clone()));
            }
        }
    }
    MatchingPrivateKeyNotFoundSnafu.fail()
}

/// A secret key usable for signing, either a primary key or a subkey.
#[derive(Debug, Clone)]
pub enum SigningKey {
    Primary(SignedSecretKey),
    Subkey(SignedSecretSubKey),
}

impl SigningKey {
    pub fn key_id(&self) -> KeyId {
        match self {
            SigningKey::Primary(k) => k.key_id(),
            SigningKey::Subkey(k) => k.key_id(),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        match self {
            SigningKey::Primary(k) => k.fingerprint(),
            SigningKey::Subkey(k) => k.fingerprint(),
        }
    }

    pub fn algorithm(&self) -> PublicKeyAlgorithm {
        match self {
            SigningKey::Primary(k) => k.algorithm(),
            SigningKey::Subkey(k) => k.algorithm(),
        }
    }

    pub fn version(&self) -> KeyVersion {
        match self {
            SigningKey::Primary(k) => k.version(),
            SigningKey::Subkey(k) => k.version(),
        }
    }
}

/// Resolves the first signing capable secret key in the ring.
///
/// The passphrase is mandatory and is validated against the key before
/// the operation proceeds; since a failure here may mean either a bad
/// passphrase or bad key material, the cause is attached unclassified.
pub fn resolve_signing_key(source: &KeySource, passphrase: &str) -> Result<SigningKey> {
    snafu::ensure!(!passphrase.trim().is_empty(), PassphraseRequiredSnafu);

    let keys = load_secret_keys(source)?;
    for key in &keys {
        if key.is_signing_key() {
            unlock_for_signing(key, passphrase)?;
            return Ok(SigningKey::Primary(key.clone()));
        }
        if let Some(subkey) = key.secret_subkeys.iter().find(|sub| sub.is_signing_key()) {
            unlock_for_signing(subkey, passphrase)?;
            return Ok(SigningKey::Subkey(subkey.clone()));
        }
    }
    NoSigningKeySnafu.fail()
}

fn unlock_for_signing<K: SecretKeyTrait>(key: &K, passphrase: &str) -> Result<()> {
    key.unlock(|| passphrase.to_string(), |_| Ok(()))
        .context(PrivateKeyExtractionFailedSnafu)
}

/// Resolves the public key for signature verification by the signer's
/// key id, validating that it is signing capable, not revoked and not
/// expired.
pub fn resolve_verification_key(source: &KeySource, signer: &KeyId) -> Result<VerificationKey> {
    let keys = load_public_keys(source)?;

    for key in keys {
        if &key.key_id() == signer {
            let reason = if !key.is_signing_key() {
                Some("is not valid for signing")
            } else {
                unusable_reason(true, primary_revoked(&key), key.expires_at())
            };
            if let Some(reason) = reason {
                return UnusableKeySnafu {
                    key_id: display_key_id(signer),
                    reason,
                }
                .fail();
            }
            return Ok(VerificationKey::Primary(key));
        }
        if let Some(subkey) = key
            .public_subkeys
            .iter()
            .find(|sub| &sub.key_id() == signer)
        {
            let reason = if !subkey.is_signing_key() {
                Some("is not valid for signing")
            } else {
                unusable_reason(true, subkey_revoked(subkey), subkey_expires_at(subkey))
            };
            if let Some(reason) = reason {
                return UnusableKeySnafu {
                    key_id: display_key_id(signer),
                    reason,
                }
                .fail();
            }
            return Ok(VerificationKey::Subkey(subkey.clone()));
        }
    }
    KeyNotFoundSnafu {
        key_id: display_key_id(signer),
    }
    .fail()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;

    #[test]
    fn key_id_parsing() {
        assert_eq!(parse_key_id("0xDEADBEEF").unwrap(), 0xDEAD_BEEF);
        assert_eq!(parse_key_id("deadbeef").unwrap(), 0xDEAD_BEEF);
        assert_eq!(
            parse_key_id("0123456789abcdef").unwrap(),
            0x0123_4567_89AB_CDEF
        );
        assert!(matches!(
            parse_key_id("not-hex"),
            Err(Error::InvalidKeyId { .. })
        ));
        assert!(matches!(parse_key_id(""), Err(Error::InvalidKeyId { .. })));
        // 17 digits cannot be a 64 bit id
        assert!(matches!(
            parse_key_id("11223344556677889"),
            Err(Error::InvalidKeyId { .. })
        ));
    }

    #[test]
    fn validity_predicate() {
        assert_eq!(unusable_reason(true, false, None), None);
        assert_eq!(
            unusable_reason(false, false, None),
            Some("is not valid for encryption")
        );
        assert_eq!(
            unusable_reason(true, true, None),
            Some("has been revoked and cannot be used")
        );
        let past = Utc::now() - chrono::Duration::days(1);
        assert_eq!(
            unusable_reason(true, false, Some(past)),
            Some("is expired and cannot be used")
        );
        let future = Utc::now() + chrono::Duration::days(1);
        assert_eq!(unusable_reason(true, false, Some(future)), None);
    }

    #[test]
    fn missing_key_file() {
        let source = KeySource::path("/definitely/not/here.asc");
        assert!(matches!(
            load_public_keys(&source),
            Err(Error::KeyFileNotFound { .. })
        ));
    }

    #[test]
    fn garbage_key_material() {
        let source = KeySource::data(&b"this is not a key ring"[..]);
        assert!(load_public_keys(&source).is_err());
    }
}
