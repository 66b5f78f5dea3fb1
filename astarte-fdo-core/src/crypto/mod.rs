// This file is part of Astarte.
//
// Copyright 2026 SECO Mind Srl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Crypto operations: signing, verification, digests and keyed MACs.
//!
//! The signature algorithm is deduced from the key material: P-256 selects
//! ES256, P-384 selects ES384, RSA-2048 selects RS256 (PS256 with PSS),
//! RSA-3072 selects RS384 (PS384 with PSS). Verification never falls back
//! on a mismatch between the key and the algorithm declared in the COSE
//! header: every mismatch is an [`ErrorKind::Verify`] error.

use std::borrow::Cow;

use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::hash::{HMac, Hash, HashAlg};
use astarte_fdo_protocol::pubkey::{KeyType, PublicKey};
use astarte_fdo_protocol::types::Nonce;
use astarte_fdo_protocol::Error;
use aws_lc_rs::rand::SecureRandom;
use coset::iana::Algorithm as CoseAlgorithm;
use coset::CoseSign1;
use serde_bytes::ByteBuf;
use x509_parser::prelude::FromDer;
use x509_parser::x509::SubjectPublicKeyInfo;

pub(crate) mod kdf;
pub mod kex;
pub mod software;

pub use self::kex::{DeviceKeyExchange, OwnerKeyExchange, SessionKeys};
pub use self::software::SoftwareSigner;

/// Signing half of the key abstraction.
///
/// A signer wraps a private key; the algorithm follows from the key type.
pub trait Signer {
    /// The type of the wrapped key.
    fn key_type(&self) -> KeyType;

    /// The public half, in the X509 (SPKI) encoding.
    fn public_key(&self) -> Result<PublicKey<'static>, Error>;

    /// Signs the payload into a COSE Sign1 structure.
    fn cose_sign(
        &self,
        unprotected: coset::HeaderBuilder,
        payload: Vec<u8>,
    ) -> Result<CoseSign1, Error>;
}

/// Selects the COSE signature algorithm for a key type.
pub fn signature_algorithm(key_type: KeyType, use_pss: bool) -> CoseAlgorithm {
    match key_type {
        KeyType::Secp256R1 => CoseAlgorithm::ES256,
        KeyType::Secp384R1 => CoseAlgorithm::ES384,
        KeyType::Rsa2048Restr => CoseAlgorithm::RS256,
        KeyType::RsaPkcs if use_pss => CoseAlgorithm::PS256,
        KeyType::RsaPkcs => CoseAlgorithm::RS256,
        KeyType::RsaPss => CoseAlgorithm::PS256,
    }
}

/// The HMAC algorithm matching the hash of the signing suite.
pub fn hmac_algorithm(key_type: KeyType) -> HashAlg {
    match key_type {
        KeyType::Secp256R1 | KeyType::Rsa2048Restr | KeyType::RsaPkcs | KeyType::RsaPss => {
            HashAlg::HmacSha256
        }
        KeyType::Secp384R1 => HashAlg::HmacSha384,
    }
}

/// The digest algorithm matching the hash of the signing suite.
pub fn hash_algorithm(key_type: KeyType) -> HashAlg {
    match key_type {
        KeyType::Secp256R1 | KeyType::Rsa2048Restr | KeyType::RsaPkcs | KeyType::RsaPss => {
            HashAlg::Sha256
        }
        KeyType::Secp384R1 => HashAlg::Sha384,
    }
}

/// Computes a digest over the data.
pub fn hash(alg: HashAlg, data: &[u8]) -> Result<Hash<'static>, Error> {
    let digest = match alg {
        HashAlg::Sha256 => aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA256, data),
        HashAlg::Sha384 => aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA384, data),
        HashAlg::HmacSha256 | HashAlg::HmacSha384 => {
            return Err(Error::new(ErrorKind::Invalid, "hmac type instead of hash"))
        }
    };

    let hash = match alg {
        HashAlg::Sha256 => Hash::with_sha256(Cow::Owned(ByteBuf::from(digest.as_ref()))),
        HashAlg::Sha384 => Hash::with_sha384(Cow::Owned(ByteBuf::from(digest.as_ref()))),
        HashAlg::HmacSha256 | HashAlg::HmacSha384 => unreachable!("checked above"),
    };

    hash.ok_or(Error::new(ErrorKind::Invalid, "digest length"))
}

/// Verifies a digest over the data.
pub fn verify_hash(to_check: &Hash<'_>, data: &[u8]) -> Result<(), Error> {
    let digest = hash(to_check.alg(), data)?;

    if to_check.as_ref() != digest.as_ref() {
        return Err(Error::new(ErrorKind::Verify, "hash mismatch"));
    }

    Ok(())
}

/// Computes the keyed MAC of the data.
pub fn hmac_sign(alg: HashAlg, secret: &[u8], data: &[u8]) -> Result<HMac<'static>, Error> {
    let (hmac_alg, build): (_, fn(Cow<'static, serde_bytes::Bytes>) -> Option<HMac<'static>>) =
        match alg {
            HashAlg::HmacSha256 => (aws_lc_rs::hmac::HMAC_SHA256, HMac::with_sha256),
            HashAlg::HmacSha384 => (aws_lc_rs::hmac::HMAC_SHA384, HMac::with_sha384),
            HashAlg::Sha256 | HashAlg::Sha384 => {
                return Err(Error::new(ErrorKind::Invalid, "hash type for hmac"))
            }
        };

    let key = aws_lc_rs::hmac::Key::new(hmac_alg, secret);

    let tag = aws_lc_rs::hmac::sign(&key, data);

    build(Cow::Owned(ByteBuf::from(tag.as_ref()))).ok_or(Error::new(ErrorKind::Crypto, "hmac tag"))
}

/// Verifies a keyed MAC over the data.
pub fn hmac_verify(secret: &[u8], hmac: &HMac<'_>, data: &[u8]) -> Result<(), Error> {
    let alg = match hmac.alg() {
        HashAlg::HmacSha256 => aws_lc_rs::hmac::HMAC_SHA256,
        HashAlg::HmacSha384 => aws_lc_rs::hmac::HMAC_SHA384,
        HashAlg::Sha256 | HashAlg::Sha384 => {
            return Err(Error::new(ErrorKind::Invalid, "hash type for hmac"));
        }
    };

    let key = aws_lc_rs::hmac::Key::new(alg, secret);

    aws_lc_rs::hmac::verify(&key, data, hmac.as_ref())
        .map_err(|_| Error::new(ErrorKind::Verify, "hmac mismatch"))
}

/// Creates a random [`Nonce`].
pub fn random_nonce(rng: &dyn SecureRandom) -> Result<Nonce, Error> {
    let mut bytes = [0u8; 16];

    rng.fill(&mut bytes)
        .map_err(|_| Error::new(ErrorKind::Crypto, "to generate nonce"))?;

    Ok(Nonce::from(bytes))
}

/// The raw subjectPublicKey bits of a key in the X509 (SPKI) encoding.
///
/// For EC keys this is the SEC.1 uncompressed point, for RSA keys the
/// PKCS#1 `RSAPublicKey` structure, which is what the verification
/// primitives consume.
pub fn key_bits(key: &PublicKey<'_>) -> Result<Vec<u8>, Error> {
    if let Some(chain) = key.chain() {
        return Ok(chain.leaf().key_bits().to_vec());
    }

    let spki = key
        .key()
        .ok_or(Error::new(ErrorKind::Invalid, "opaque public key"))?;

    spki_key_bits(spki)
}

/// Extracts the raw key bits from an SPKI DER.
pub fn spki_key_bits(spki: &[u8]) -> Result<Vec<u8>, Error> {
    let (rest, parsed) = SubjectPublicKeyInfo::from_der(spki).map_err(|err| {
        tracing::error!(error = %err, "couldn't parse SPKI");

        Error::new(ErrorKind::Invalid, "public key SPKI")
    })?;

    if !rest.is_empty() {
        return Err(Error::new(ErrorKind::Invalid, "trailing bytes after SPKI"));
    }

    Ok(parsed.subject_public_key.data.to_vec())
}

// SPKI prefixes for EC uncompressed points, id-ecPublicKey with the named
// curve parameter.
const SPKI_P256_PREFIX: [u8; 26] = [
    0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08,
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
];
const SPKI_P384_PREFIX: [u8; 23] = [
    0x30, 0x76, 0x30, 0x10, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x05,
    0x2b, 0x81, 0x04, 0x00, 0x22, 0x03, 0x62, 0x00,
];

/// Wraps an EC uncompressed point into an SPKI DER.
pub(crate) fn spki_from_ec_point(key_type: KeyType, point: &[u8]) -> Result<Vec<u8>, Error> {
    let prefix: &[u8] = match key_type {
        KeyType::Secp256R1 if point.len() == 65 => &SPKI_P256_PREFIX,
        KeyType::Secp384R1 if point.len() == 97 => &SPKI_P384_PREFIX,
        _ => return Err(Error::new(ErrorKind::Invalid, "ec point for key type")),
    };

    let mut spki = Vec::with_capacity(prefix.len() + point.len());
    spki.extend_from_slice(prefix);
    spki.extend_from_slice(point);

    Ok(spki)
}

fn verification_algorithm(
    key_type: KeyType,
    alg: CoseAlgorithm,
) -> Result<&'static dyn aws_lc_rs::signature::VerificationAlgorithm, Error> {
    let alg: &'static dyn aws_lc_rs::signature::VerificationAlgorithm = match (key_type, alg) {
        (KeyType::Secp256R1, CoseAlgorithm::ES256) => {
            &aws_lc_rs::signature::ECDSA_P256_SHA256_FIXED
        }
        (KeyType::Secp384R1, CoseAlgorithm::ES384) => {
            &aws_lc_rs::signature::ECDSA_P384_SHA384_FIXED
        }
        (KeyType::Rsa2048Restr | KeyType::RsaPkcs, CoseAlgorithm::RS256) => {
            &aws_lc_rs::signature::RSA_PKCS1_2048_8192_SHA256
        }
        (KeyType::RsaPkcs, CoseAlgorithm::RS384) => {
            &aws_lc_rs::signature::RSA_PKCS1_3072_8192_SHA384
        }
        (KeyType::RsaPss, CoseAlgorithm::PS256) => &aws_lc_rs::signature::RSA_PSS_2048_8192_SHA256,
        (KeyType::RsaPss, CoseAlgorithm::PS384) => &aws_lc_rs::signature::RSA_PSS_2048_8192_SHA384,
        _ => {
            return Err(Error::new(
                ErrorKind::Verify,
                "signing algorithm and public key pair",
            ))
        }
    };

    Ok(alg)
}

/// Verifies a COSE Sign1 signature against a public key.
///
/// The algorithm comes from the protected header and must pair with the
/// key type; any mismatch fails verification.
pub fn verify_cose_sign1(sign: &CoseSign1, pub_key: &PublicKey<'_>) -> Result<(), Error> {
    verify_cose_sign1_aad(sign, pub_key, &[])
}

/// Verifies a COSE Sign1 signature with an external AAD.
pub fn verify_cose_sign1_aad(
    sign: &CoseSign1,
    pub_key: &PublicKey<'_>,
    aad: &[u8],
) -> Result<(), Error> {
    let alg = sign
        .protected
        .header
        .alg
        .as_ref()
        .and_then(|alg| match alg {
            coset::RegisteredLabelWithPrivate::Assigned(alg) => Some(*alg),
            coset::RegisteredLabelWithPrivate::PrivateUse(_)
            | coset::RegisteredLabelWithPrivate::Text(_) => None,
        })
        .ok_or(Error::new(ErrorKind::Invalid, "missing alg header"))?;

    tracing::debug!(
        pub_key = ?pub_key.key_type(),
        algo = ?alg,
        "checking algorithm and public key"
    );

    let verification = verification_algorithm(pub_key.key_type(), alg)?;

    let bits = key_bits(pub_key)?;

    let key = aws_lc_rs::signature::UnparsedPublicKey::new(verification, bits);

    sign.verify_signature(aad, |signature, message| key.verify(message, signature))
        .map_err(|_| Error::new(ErrorKind::Verify, "cose signature"))?;

    Ok(())
}
