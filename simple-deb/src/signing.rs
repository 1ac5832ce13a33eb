// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! PGP signing of repository `Release` files.

[PgpReleaseSigner] is a [ReleaseSigner] backed by a PGP secret key. It
produces the ASCII armored detached signature published as `Release.gpg`,
the cleartext signed `InRelease` and the armored public key published as
`repository.gpg`.

Keys can be generated with [create_self_signed_key()].
*/

use {
    crate::{
        error::{Result, SimpleDebError},
        repository::{ReleaseSignatures, ReleaseSigner},
    },
    chrono::SubsecRound,
    pgp::{
        crypto::{HashAlgorithm, SymmetricKeyAlgorithm},
        packet::{Packet, SignatureConfig, SignatureType, Subpacket},
        types::{CompressionAlgorithm, KeyVersion, SecretKeyTrait},
        Deserializable, KeyType, SecretKeyParams, SecretKeyParamsBuilder, SignedPublicKey,
        SignedSecretKey,
    },
    pgp_cleartext::cleartext_sign,
    smallvec::{smallvec, SmallVec},
    std::io::Cursor,
};

/// Obtain a [SecretKeyParamsBuilder] defining how to generate a signing key.
///
/// The `primary_user_id` has a format like `Name <email>`.
pub fn signing_secret_key_params_builder(primary_user_id: impl ToString) -> SecretKeyParamsBuilder {
    let mut key_params = SecretKeyParamsBuilder::default();
    key_params
        .key_type(KeyType::Rsa(2048))
        .preferred_symmetric_algorithms(smallvec![SymmetricKeyAlgorithm::AES256])
        .preferred_hash_algorithms(smallvec![
            HashAlgorithm::SHA2_256,
            HashAlgorithm::SHA2_384,
            HashAlgorithm::SHA2_512
        ])
        .preferred_compression_algorithms(smallvec![CompressionAlgorithm::ZLIB])
        .can_create_certificates(false)
        .can_sign(true)
        .primary_user_id(primary_user_id.to_string());

    key_params
}

/// Create a self-signed PGP key pair.
///
/// `key_passphrase` returns the passphrase locking the private key.
pub fn create_self_signed_key<PW>(
    params: SecretKeyParams,
    key_passphrase: PW,
) -> Result<(SignedSecretKey, SignedPublicKey)>
where
    PW: (FnOnce() -> String) + Clone,
{
    let secret_key = params.generate()?;
    let secret_key_signed = secret_key.sign(key_passphrase.clone())?;

    let public_key = secret_key_signed.public_key();
    let public_key_signed = public_key.sign(&secret_key_signed, key_passphrase)?;

    Ok((secret_key_signed, public_key_signed))
}

/// Generate a signing key pair for a user id and return it ASCII armored.
///
/// The private key is not passphrase protected. Returns the armored private key
/// followed by the armored public key.
pub fn generate_armored_signing_key(primary_user_id: &str) -> Result<(String, String)> {
    let params = signing_secret_key_params_builder(primary_user_id)
        .build()
        .map_err(|e| SimpleDebError::Signing(e.to_string()))?;

    let (private_key, public_key) = create_self_signed_key(params, String::new)?;

    Ok((
        private_key.to_armored_string(None)?,
        public_key.to_armored_string(None)?,
    ))
}

/// Produce an ASCII armored detached signature over binary data.
fn detached_sign<PW>(
    key: &impl SecretKeyTrait,
    key_pw: PW,
    hash_algorithm: HashAlgorithm,
    data: &[u8],
) -> Result<String>
where
    PW: FnOnce() -> String,
{
    let hashed_subpackets = vec![
        Subpacket::IssuerFingerprint(KeyVersion::V4, SmallVec::from_slice(&key.fingerprint())),
        Subpacket::SignatureCreationTime(chrono::Utc::now().trunc_subsecs(0)),
    ];
    let unhashed_subpackets = vec![Subpacket::Issuer(key.key_id())];

    let config = SignatureConfig::new_v4(
        Default::default(),
        SignatureType::Binary,
        key.algorithm(),
        hash_algorithm,
        hashed_subpackets,
        unhashed_subpackets,
    );

    let signature = config.sign(key, key_pw, Cursor::new(data))?;

    let packet = Packet::Signature(signature);
    let mut writer = Cursor::new(Vec::<u8>::new());
    pgp::armor::write(&packet, pgp::armor::BlockType::Signature, &mut writer, None)?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| SimpleDebError::Signing(format!("armored signature is not UTF-8: {}", e)))
}

/// A [ReleaseSigner] holding a PGP secret key.
pub struct PgpReleaseSigner {
    key: SignedSecretKey,
    passphrase: String,
    public_key_armored: String,
}

impl PgpReleaseSigner {
    /// Construct an instance from a secret key and the passphrase unlocking it.
    pub fn new(key: SignedSecretKey, passphrase: impl ToString) -> Result<Self> {
        let passphrase = passphrase.to_string();

        let public_key_armored = {
            let pw = passphrase.clone();
            key.public_key()
                .sign(&key, || pw)?
                .to_armored_string(None)?
        };

        Ok(Self {
            key,
            passphrase,
            public_key_armored,
        })
    }

    /// Construct an instance from an ASCII armored secret key.
    pub fn from_armored(armored: &str, passphrase: impl ToString) -> Result<Self> {
        let (key, _) = SignedSecretKey::from_armor_single(Cursor::new(armored.as_bytes()))?;

        Self::new(key, passphrase)
    }
}

impl ReleaseSigner for PgpReleaseSigner {
    fn sign(&self, release: &[u8]) -> Result<ReleaseSignatures> {
        let detached = detached_sign(
            &self.key,
            || self.passphrase.clone(),
            HashAlgorithm::SHA2_256,
            release,
        )?;

        let cleartext = cleartext_sign(
            &self.key,
            || self.passphrase.clone(),
            HashAlgorithm::SHA2_256,
            Cursor::new(release),
        )?;

        Ok(ReleaseSignatures {
            detached_signature: detached.into_bytes(),
            cleartext_signed: cleartext.into_bytes(),
            public_key_armored: self.public_key_armored.clone().into_bytes(),
        })
    }
}
