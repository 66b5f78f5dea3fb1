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

//! Software based signing keys.
//!
//! The key material is an ECDSA P-256 or P-384 private key held as a
//! PKCS#8 blob. COSE signatures use the fixed-width encoding, X.509
//! signatures (certificates and CSRs) the ASN.1 encoding.

use std::borrow::Cow;

use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::pubkey::{KeyType, PublicKey};
use astarte_fdo_protocol::Error;
use aws_lc_rs::rand::SystemRandom;
use aws_lc_rs::signature::{EcdsaKeyPair, EcdsaSigningAlgorithm, KeyPair};
use coset::{CoseSign1, CoseSign1Builder, HeaderBuilder};
use rcgen::{CertificateParams, DistinguishedName, DnType};
use tracing::error;
use zeroize::Zeroizing;

use super::{signature_algorithm, spki_from_ec_point, Signer};

/// Software based signing key.
pub struct SoftwareSigner {
    rng: SystemRandom,
    key_type: KeyType,
    pkcs8: Zeroizing<Vec<u8>>,
}

impl SoftwareSigner {
    /// Generates a fresh P-256 key.
    pub fn generate_p256() -> Result<Self, Error> {
        Self::generate(KeyType::Secp256R1)
    }

    /// Generates a fresh P-384 key.
    pub fn generate_p384() -> Result<Self, Error> {
        Self::generate(KeyType::Secp384R1)
    }

    fn generate(key_type: KeyType) -> Result<Self, Error> {
        let rng = SystemRandom::new();

        let alg = Self::fixed_alg(key_type)?;

        let document = EcdsaKeyPair::generate_pkcs8(alg, &rng)
            .map_err(|_| Error::new(ErrorKind::Crypto, "to generate signing key"))?;

        Ok(Self {
            rng,
            key_type,
            pkcs8: Zeroizing::new(document.as_ref().to_vec()),
        })
    }

    /// Loads a key from its PKCS#8 DER blob.
    pub fn from_pkcs8(key_type: KeyType, pkcs8: &[u8]) -> Result<Self, Error> {
        let this = Self {
            rng: SystemRandom::new(),
            key_type,
            pkcs8: Zeroizing::new(pkcs8.to_vec()),
        };

        // Validate the key material eagerly
        this.keypair(this.fixed_signing_alg()?)?;

        Ok(this)
    }

    /// The PKCS#8 DER blob, for persistence in the device credential.
    pub fn pkcs8(&self) -> &[u8] {
        &self.pkcs8
    }

    fn fixed_alg(key_type: KeyType) -> Result<&'static EcdsaSigningAlgorithm, Error> {
        match key_type {
            KeyType::Secp256R1 => Ok(&aws_lc_rs::signature::ECDSA_P256_SHA256_FIXED_SIGNING),
            KeyType::Secp384R1 => Ok(&aws_lc_rs::signature::ECDSA_P384_SHA384_FIXED_SIGNING),
            KeyType::Rsa2048Restr | KeyType::RsaPkcs | KeyType::RsaPss => Err(Error::new(
                ErrorKind::Invalid,
                "software signer only holds ec keys",
            )),
        }
    }

    fn fixed_signing_alg(&self) -> Result<&'static EcdsaSigningAlgorithm, Error> {
        Self::fixed_alg(self.key_type)
    }

    fn asn1_signing_alg(&self) -> Result<&'static EcdsaSigningAlgorithm, Error> {
        match self.key_type {
            KeyType::Secp256R1 => Ok(&aws_lc_rs::signature::ECDSA_P256_SHA256_ASN1_SIGNING),
            KeyType::Secp384R1 => Ok(&aws_lc_rs::signature::ECDSA_P384_SHA384_ASN1_SIGNING),
            KeyType::Rsa2048Restr | KeyType::RsaPkcs | KeyType::RsaPss => Err(Error::new(
                ErrorKind::Invalid,
                "software signer only holds ec keys",
            )),
        }
    }

    fn keypair(&self, alg: &'static EcdsaSigningAlgorithm) -> Result<EcdsaKeyPair, Error> {
        EcdsaKeyPair::from_pkcs8(alg, &self.pkcs8).map_err(|err| {
            error!(error = %err, "couldn't parse signing key");

            Error::new(ErrorKind::Crypto, "to parse signing key")
        })
    }

    /// The public key as a SEC.1 uncompressed point.
    pub fn public_point(&self) -> Result<Vec<u8>, Error> {
        let key = self.keypair(self.fixed_signing_alg()?)?;

        Ok(key.public_key().as_ref().to_vec())
    }

    /// The random generator of the signer.
    pub fn rng(&self) -> &SystemRandom {
        &self.rng
    }

    /// Create and sign a CSR with the given common name.
    pub fn csr(&self, common_name: &str) -> Result<Vec<u8>, Error> {
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);

        let mut csr_params = CertificateParams::new([]).map_err(|err| {
            error!(error = %err, "couldn't create csr parameters");

            Error::new(ErrorKind::Crypto, "to create csr parameters")
        })?;
        csr_params.distinguished_name = dn;

        let key = self.keypair(self.asn1_signing_alg()?)?;

        let compat = RcgenKeyCompat::new(&key, &self.rng, self.key_type)?;

        let csr = csr_params.serialize_request(&compat).map_err(|err| {
            error!(error = %err, "couldn't serialize csr");

            Error::new(ErrorKind::Crypto, "to serialize csr")
        })?;

        Ok(csr.der().to_vec())
    }

    /// Bridge the signer into `rcgen` for certificate issuance.
    ///
    /// The returned value signs with the ASN.1 encoding that X.509
    /// requires.
    pub fn rcgen_key(&self) -> Result<OwnedRcgenKey, Error> {
        let key = self.keypair(self.asn1_signing_alg()?)?;

        let alg = rcgen_algorithm(self.key_type)?;

        Ok(OwnedRcgenKey {
            key,
            rng: self.rng.clone(),
            alg,
        })
    }

    /// Creates a random secret of the given length.
    pub fn random_secret(&self, len: usize) -> Result<Zeroizing<Vec<u8>>, Error> {
        use aws_lc_rs::rand::SecureRandom;

        let mut secret = Zeroizing::new(vec![0u8; len]);

        self.rng
            .fill(secret.as_mut_slice())
            .map_err(|_| Error::new(ErrorKind::Crypto, "to generate secret"))?;

        Ok(secret)
    }
}

impl Signer for SoftwareSigner {
    fn key_type(&self) -> KeyType {
        self.key_type
    }

    fn public_key(&self) -> Result<PublicKey<'static>, Error> {
        let point = self.public_point()?;

        let spki = spki_from_ec_point(self.key_type, &point)?;

        Ok(PublicKey::with_x509(
            self.key_type,
            Cow::Owned(spki.into()),
        ))
    }

    fn cose_sign(
        &self,
        unprotected: HeaderBuilder,
        payload: Vec<u8>,
    ) -> Result<CoseSign1, Error> {
        let key = self.keypair(self.fixed_signing_alg()?)?;

        let protected = HeaderBuilder::new()
            .algorithm(signature_algorithm(self.key_type, false))
            .build();

        let sign = CoseSign1Builder::new()
            .protected(protected)
            .unprotected(unprotected.build())
            .payload(payload)
            .try_create_signature(&[], |bytes| {
                let sign = key
                    .sign(&self.rng, bytes)
                    .map_err(|_| Error::new(ErrorKind::Crypto, "to sign cose"))?;

                Ok(sign.as_ref().to_vec())
            })?
            .build();

        Ok(sign)
    }
}

impl std::fmt::Debug for SoftwareSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareSigner")
            .field("key_type", &self.key_type)
            .finish_non_exhaustive()
    }
}

fn rcgen_algorithm(key_type: KeyType) -> Result<&'static rcgen::SignatureAlgorithm, Error> {
    match key_type {
        KeyType::Secp256R1 => Ok(&rcgen::PKCS_ECDSA_P256_SHA256),
        KeyType::Secp384R1 => Ok(&rcgen::PKCS_ECDSA_P384_SHA384),
        KeyType::Rsa2048Restr | KeyType::RsaPkcs | KeyType::RsaPss => Err(Error::new(
            ErrorKind::Invalid,
            "software signer only holds ec keys",
        )),
    }
}

/// Owned `rcgen` bridge over a software key.
pub struct OwnedRcgenKey {
    key: EcdsaKeyPair,
    rng: SystemRandom,
    alg: &'static rcgen::SignatureAlgorithm,
}

impl rcgen::PublicKeyData for OwnedRcgenKey {
    fn der_bytes(&self) -> &[u8] {
        self.key.public_key().as_ref()
    }

    fn algorithm(&self) -> &'static rcgen::SignatureAlgorithm {
        self.alg
    }
}

impl rcgen::SigningKey for OwnedRcgenKey {
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, rcgen::Error> {
        self.key
            .sign(&self.rng, msg)
            .map(|signature| signature.as_ref().to_vec())
            .map_err(|_| rcgen::Error::RingUnspecified)
    }
}

struct RcgenKeyCompat<'a> {
    keys: &'a EcdsaKeyPair,
    rng: &'a SystemRandom,
    alg: &'static rcgen::SignatureAlgorithm,
}

impl<'a> RcgenKeyCompat<'a> {
    fn new(keys: &'a EcdsaKeyPair, rng: &'a SystemRandom, key_type: KeyType) -> Result<Self, Error> {
        Ok(Self {
            keys,
            rng,
            alg: rcgen_algorithm(key_type)?,
        })
    }
}

impl rcgen::PublicKeyData for RcgenKeyCompat<'_> {
    fn der_bytes(&self) -> &[u8] {
        self.keys.public_key().as_ref()
    }

    fn algorithm(&self) -> &'static rcgen::SignatureAlgorithm {
        self.alg
    }
}

impl rcgen::SigningKey for RcgenKeyCompat<'_> {
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, rcgen::Error> {
        self.keys
            .sign(self.rng, msg)
            .map(|signature| signature.as_ref().to_vec())
            .map_err(|_| rcgen::Error::RingUnspecified)
    }
}
