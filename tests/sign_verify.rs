//! Signing and verification, attached and detached, including
//! signatures produced by GnuPG.

use std::path::{Path, PathBuf};

use pgpfile::ops::{
    sign, verify, SignInput, SignOptions, VerifyInput, VerifyOptions,
};
use pgpfile::{
    CancelToken, Compression, Error, KeySource, SignatureHash, SignatureMode,
};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

const ALICE_PASS: &str = "hunter2";
const ALICE_SIGNING_KEY: &str = "804C0FD38BA25CAF";

fn sign_input(source: &Path, dest: &Path) -> SignInput {
    SignInput {
        source_file: source.to_path_buf(),
        output_file: dest.to_path_buf(),
        private_key: KeySource::path(fixture("alice_sec.asc")),
        passphrase: ALICE_PASS.to_string(),
    }
}

fn verify_input(file: &Path, signature: Option<&Path>) -> VerifyInput {
    VerifyInput {
        file: file.to_path_buf(),
        signature_file: signature.map(Path::to_path_buf),
        public_key: KeySource::path(fixture("alice_pub.asc")),
        public_key_id: None,
    }
}

#[test]
fn detached_sign_verify_and_tamper() {
    let _ = pretty_env_logger::try_init();
    let dir = tempfile::tempdir().unwrap();
    let plain = dir.path().join("data.bin");
    std::fs::write(&plain, b"signed content, do not touch").unwrap();
    let sig_file = dir.path().join("data.bin.sig");

    let options = SignOptions {
        mode: SignatureMode::Detached,
        armor: false,
        ..Default::default()
    };
    sign(&sign_input(&plain, &sig_file), &options, &CancelToken::new()).unwrap();

    let verify_opts = VerifyOptions {
        mode: SignatureMode::Detached,
        ..Default::default()
    };
    let result = verify(
        &verify_input(&plain, Some(&sig_file)),
        &verify_opts,
        &CancelToken::new(),
    )
    .unwrap();
    assert!(result.is_valid);
    assert_eq!(result.signer_key_id, ALICE_SIGNING_KEY);

    // flip one byte: verification must succeed with is_valid = false
    let mut tampered = std::fs::read(&plain).unwrap();
    tampered[0] ^= 0x01;
    let tampered_file = dir.path().join("tampered.bin");
    std::fs::write(&tampered_file, &tampered).unwrap();

    let result = verify(
        &verify_input(&tampered_file, Some(&sig_file)),
        &verify_opts,
        &CancelToken::new(),
    )
    .unwrap();
    assert!(!result.is_valid);
    assert_eq!(result.signer_key_id, ALICE_SIGNING_KEY);
}

#[test]
fn attached_sign_verify() {
    let _ = pretty_env_logger::try_init();
    let dir = tempfile::tempdir().unwrap();
    let signed = dir.path().join("message.sig.pgp");

    for compression in [None, Some(Compression::Zip), Some(Compression::Zlib)] {
        let options = SignOptions {
            mode: SignatureMode::Attached,
            armor: false,
            compression,
            if_output_exists: pgpfile::OverwritePolicy::Overwrite,
            ..Default::default()
        };
        sign(
            &sign_input(&fixture("message.txt"), &signed),
            &options,
            &CancelToken::new(),
        )
        .unwrap();

        let result = verify(
            &verify_input(&signed, None),
            &VerifyOptions::default(),
            &CancelToken::new(),
        )
        .unwrap();
        assert!(result.is_valid, "compression {:?}", compression);
        assert_eq!(result.signer_key_id, ALICE_SIGNING_KEY);
    }
}

#[test]
fn attached_armored_sign_verify() {
    let dir = tempfile::tempdir().unwrap();
    let signed = dir.path().join("message.asc");

    let options = SignOptions {
        mode: SignatureMode::Attached,
        armor: true,
        ..Default::default()
    };
    sign(
        &sign_input(&fixture("message.txt"), &signed),
        &options,
        &CancelToken::new(),
    )
    .unwrap();

    let armored = std::fs::read_to_string(&signed).unwrap();
    assert!(armored.starts_with("-----BEGIN PGP MESSAGE-----"));

    let result = verify(
        &verify_input(&signed, None),
        &VerifyOptions::default(),
        &CancelToken::new(),
    )
    .unwrap();
    assert!(result.is_valid);
}

#[test]
fn detached_armor_markers_and_size() {
    let dir = tempfile::tempdir().unwrap();
    let detached = dir.path().join("detached.sig");
    let detached_asc = dir.path().join("detached.asc");
    let attached = dir.path().join("attached.pgp");

    let source = fixture("message.txt");
    sign(
        &sign_input(&source, &detached),
        &SignOptions {
            mode: SignatureMode::Detached,
            armor: false,
            ..Default::default()
        },
        &CancelToken::new(),
    )
    .unwrap();
    sign(
        &sign_input(&source, &detached_asc),
        &SignOptions {
            mode: SignatureMode::Detached,
            armor: true,
            ..Default::default()
        },
        &CancelToken::new(),
    )
    .unwrap();
    sign(
        &sign_input(&source, &attached),
        &SignOptions {
            mode: SignatureMode::Attached,
            armor: false,
            ..Default::default()
        },
        &CancelToken::new(),
    )
    .unwrap();

    let armored = std::fs::read_to_string(&detached_asc).unwrap();
    assert!(armored.starts_with("-----BEGIN PGP SIGNATURE-----"));
    assert!(armored.trim_end().ends_with("-----END PGP SIGNATURE-----"));

    // the attached form carries a copy of the content
    let detached_len = std::fs::metadata(&detached).unwrap().len();
    let attached_len = std::fs::metadata(&attached).unwrap().len();
    assert!(attached_len > detached_len);
}

#[test]
fn verifies_gnupg_signatures() {
    let _ = pretty_env_logger::try_init();

    let result = verify(
        &verify_input(&fixture("message.txt"), Some(&fixture("gpg_detached.sig"))),
        &VerifyOptions {
            mode: SignatureMode::Detached,
            ..Default::default()
        },
        &CancelToken::new(),
    )
    .unwrap();
    assert!(result.is_valid);
    assert_eq!(result.signer_key_id, ALICE_SIGNING_KEY);

    // gpg wraps the one pass pair in a compression layer
    let result = verify(
        &verify_input(&fixture("gpg_attached.pgp"), None),
        &VerifyOptions::default(),
        &CancelToken::new(),
    )
    .unwrap();
    assert!(result.is_valid);
    assert_eq!(result.signer_key_id, ALICE_SIGNING_KEY);
}

#[test]
fn verify_with_wrong_key_ring_is_key_not_found() {
    let mut input = verify_input(&fixture("message.txt"), Some(&fixture("gpg_detached.sig")));
    input.public_key = KeySource::path(fixture("bob_pub.asc"));
    let result = verify(
        &input,
        &VerifyOptions {
            mode: SignatureMode::Detached,
            ..Default::default()
        },
        &CancelToken::new(),
    );
    assert!(matches!(result, Err(Error::KeyNotFound { .. })));
}

#[test]
fn attached_verify_structural_errors() {
    // an encrypted message has no one pass signature at the top
    let result = verify(
        &verify_input(&fixture("gpg_encrypted.pgp"), None),
        &VerifyOptions::default(),
        &CancelToken::new(),
    );
    assert!(matches!(result, Err(Error::MissingOnePassSignature)));

    // plain text is not pgp data at all
    let result = verify(
        &verify_input(&fixture("message.txt"), None),
        &VerifyOptions::default(),
        &CancelToken::new(),
    );
    assert!(result.is_err());
}

#[test]
fn detached_mode_requires_signature_file() {
    let result = verify(
        &verify_input(&fixture("message.txt"), None),
        &VerifyOptions {
            mode: SignatureMode::Detached,
            ..Default::default()
        },
        &CancelToken::new(),
    );
    assert!(matches!(result, Err(Error::SignatureFileRequired)));
}

#[test]
fn signing_passphrase_preconditions() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.sig");

    let mut input = sign_input(&fixture("message.txt"), &out);
    input.passphrase = String::new();
    assert!(matches!(
        sign(&input, &SignOptions::default(), &CancelToken::new()),
        Err(Error::PassphraseRequired)
    ));

    let mut input = sign_input(&fixture("message.txt"), &out);
    input.passphrase = "letmein".to_string();
    assert!(matches!(
        sign(&input, &SignOptions::default(), &CancelToken::new()),
        Err(Error::PrivateKeyExtractionFailed { .. }) | Err(Error::InvalidPassphrase { .. })
    ));
    assert!(!out.exists());
}

#[test]
fn sign_with_explicit_hash_algorithms() {
    let dir = tempfile::tempdir().unwrap();

    for (i, hash) in [
        SignatureHash::Sha256,
        SignatureHash::Sha384,
        SignatureHash::Sha512,
    ]
    .into_iter()
    .enumerate()
    {
        let sig_file = dir.path().join(format!("out-{}.sig", i));
        sign(
            &sign_input(&fixture("message.txt"), &sig_file),
            &SignOptions {
                mode: SignatureMode::Detached,
                armor: false,
                hash,
                ..Default::default()
            },
            &CancelToken::new(),
        )
        .unwrap();

        let result = verify(
            &verify_input(&fixture("message.txt"), Some(&sig_file)),
            &VerifyOptions {
                mode: SignatureMode::Detached,
                ..Default::default()
            },
            &CancelToken::new(),
        )
        .unwrap();
        assert!(result.is_valid, "hash {:?}", hash);
    }
}
