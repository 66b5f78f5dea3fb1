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

//! ECDH key exchange and the encrypted session channel.
//!
//! Both sides contribute an ephemeral curve point and a random value; the
//! session encryption key is derived from the shared x-coordinate and both
//! randoms. After TO2.ProveDevice every message body travels as a tagged
//! `CoseEncrypt0` under that key.

use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::kex::{CipherSuite, EcdhParams, KexSuite, XAKeyExchange, XBKeyExchange};
use astarte_fdo_protocol::Error;
use aws_lc_rs::rand::{SecureRandom, SystemRandom};
use aws_lc_rs::{aead, agreement};
use coset::iana::Algorithm as CoseAlgorithm;
use coset::{CoseEncrypt0, CoseEncrypt0Builder, HeaderBuilder, TaggedCborSerializable};
use tracing::error;
use zeroize::Zeroizing;

use super::kdf::kdf;

const KDF_LABEL: &[u8] = b"FIDO-KDF";
const KDF_CONTEXT: &[u8] = b"AutomaticOnboardTunnel";

/// Length of the per-side random contribution.
const EXCHANGE_RAND_LEN: usize = 16;

fn agreement_algorithm(suite: KexSuite) -> Result<&'static agreement::Algorithm, Error> {
    match suite {
        KexSuite::Ecdh256 => Ok(&agreement::ECDH_P256),
        KexSuite::Ecdh384 => Ok(&agreement::ECDH_P384),
        KexSuite::DhKexId14 | KexSuite::DhKexId15 | KexSuite::AsymKex2048 | KexSuite::AsymKex3072 => {
            Err(Error::new(ErrorKind::Invalid, "unsupported kex suite"))
        }
    }
}

fn coordinate_len(suite: KexSuite) -> usize {
    match suite {
        KexSuite::Ecdh384 => 48,
        _ => 32,
    }
}

struct Exchange {
    suite: KexSuite,
    cipher: CipherSuite,
    private: agreement::EphemeralPrivateKey,
    point: Vec<u8>,
    rand: Zeroizing<[u8; EXCHANGE_RAND_LEN]>,
}

impl Exchange {
    fn create(suite: KexSuite, cipher: CipherSuite, rng: &SystemRandom) -> Result<Self, Error> {
        let alg = agreement_algorithm(suite)?;

        let private = agreement::EphemeralPrivateKey::generate(alg, rng)
            .map_err(|_| Error::new(ErrorKind::Crypto, "to generate exchange key"))?;

        let point = private
            .compute_public_key()
            .map_err(|_| Error::new(ErrorKind::Crypto, "to compute exchange public key"))?
            .as_ref()
            .to_vec();

        let mut rand = Zeroizing::new([0u8; EXCHANGE_RAND_LEN]);
        rng.fill(&mut rand[..])
            .map_err(|_| Error::new(ErrorKind::Crypto, "to generate exchange random"))?;

        Ok(Self {
            suite,
            cipher,
            private,
            point,
            rand,
        })
    }

    /// Packs the point and random in the length prefixed wire layout.
    fn pack(&self) -> Result<Vec<u8>, Error> {
        let n = coordinate_len(self.suite);

        // point = 0x04 || x || y
        let coords = self
            .point
            .get(1..)
            .filter(|coords| coords.len() == 2 * n)
            .ok_or(Error::new(ErrorKind::Crypto, "exchange point layout"))?;

        let packed = match self.suite {
            KexSuite::Ecdh384 => {
                let x: &[u8; 48] = coords[..48].try_into().expect("checked length");
                let y: &[u8; 48] = coords[48..].try_into().expect("checked length");

                XBKeyExchange::create(EcdhParams::with_p384(x, y, &self.rand[..]))?
            }
            _ => {
                let x: &[u8; 32] = coords[..32].try_into().expect("checked length");
                let y: &[u8; 32] = coords[32..].try_into().expect("checked length");

                XBKeyExchange::create(EcdhParams::with_p256(x, y, &self.rand[..]))?
            }
        };

        Ok(packed.as_ref().to_vec())
    }

    /// Completes the exchange against the peer contribution.
    ///
    /// `peer` must be the raw wire layout of the other side; the randoms
    /// are ordered device first, owner second in the derivation input.
    fn agree(
        self,
        peer: &[u8],
        device_first: bool,
    ) -> Result<SessionKeys, Error> {
        let (peer_point, peer_rand) = unpack(self.suite, peer)?;

        let alg = agreement_algorithm(self.suite)?;

        let peer_key = agreement::UnparsedPublicKey::new(alg, peer_point);

        let cipher = self.cipher;
        let own_rand = self.rand;

        let shared = agreement::agree_ephemeral(
            self.private,
            &peer_key,
            Error::new(ErrorKind::Crypto, "to agree on shared secret"),
            |shx| {
                let mut secret =
                    Zeroizing::new(Vec::with_capacity(shx.len() + 2 * EXCHANGE_RAND_LEN));

                secret.extend_from_slice(shx);
                if device_first {
                    secret.extend_from_slice(&own_rand[..]);
                    secret.extend_from_slice(&peer_rand);
                } else {
                    secret.extend_from_slice(&peer_rand);
                    secret.extend_from_slice(&own_rand[..]);
                }

                SessionKeys::derive(cipher, &secret)
            },
        )?;

        Ok(shared)
    }
}

/// Splits the peer wire layout into the SEC.1 point and the random.
fn unpack(suite: KexSuite, peer: &[u8]) -> Result<(Vec<u8>, Vec<u8>), Error> {
    match suite {
        KexSuite::Ecdh384 => {
            let params: EcdhParams<'_, 48> = EcdhParams::try_from(peer)?;

            Ok((params.as_key(), params.rand().to_vec()))
        }
        _ => {
            let params: EcdhParams<'_, 32> = EcdhParams::try_from(peer)?;

            Ok((params.as_key(), params.rand().to_vec()))
        }
    }
}

/// Owner half of the key exchange.
///
/// Created on TO2.HelloDevice; the xA contribution travels in
/// TO2.ProveOVHdr and the exchange completes with the device xB from
/// TO2.ProveDevice.
pub struct OwnerKeyExchange {
    inner: Exchange,
}

impl std::fmt::Debug for OwnerKeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerKeyExchange").finish_non_exhaustive()
    }
}

impl OwnerKeyExchange {
    /// Creates the owner contribution.
    pub fn create(suite: KexSuite, cipher: CipherSuite, rng: &SystemRandom) -> Result<Self, Error> {
        Exchange::create(suite, cipher, rng).map(|inner| Self { inner })
    }

    /// The xA parameter for TO2.ProveOVHdr.
    pub fn xa(&self) -> Result<XAKeyExchange<'static>, Error> {
        self.inner.pack().map(XAKeyExchange::from_bytes)
    }

    /// Completes the exchange with the device contribution.
    pub fn finish(self, xb: &XBKeyExchange<'_>) -> Result<SessionKeys, Error> {
        self.inner.agree(xb.as_ref(), false)
    }
}

/// Device half of the key exchange.
pub struct DeviceKeyExchange {
    inner: Exchange,
}

impl DeviceKeyExchange {
    /// Creates the device contribution.
    pub fn create(suite: KexSuite, cipher: CipherSuite, rng: &SystemRandom) -> Result<Self, Error> {
        Exchange::create(suite, cipher, rng).map(|inner| Self { inner })
    }

    /// The xB parameter for TO2.ProveDevice.
    pub fn xb(&self) -> Result<XBKeyExchange<'static>, Error> {
        self.inner.pack().map(XBKeyExchange::from_bytes)
    }

    /// Completes the exchange with the owner contribution.
    pub fn finish(self, xa: &XAKeyExchange<'_>) -> Result<SessionKeys, Error> {
        self.inner.agree(xa.as_ref(), true)
    }
}

/// Symmetric keys of an established TO2 session.
pub struct SessionKeys {
    cipher: CipherSuite,
    sek: Zeroizing<Vec<u8>>,
}

impl SessionKeys {
    /// Derives the session encryption key from the shared material.
    fn derive(cipher: CipherSuite, secret: &[u8]) -> Result<Self, Error> {
        let len = match cipher {
            CipherSuite::A128Gcm => 16,
            CipherSuite::A256Gcm => 32,
        };

        let mut sek = Zeroizing::new(vec![0u8; len]);

        kdf(
            aws_lc_rs::hmac::HMAC_SHA256,
            secret,
            KDF_LABEL,
            KDF_CONTEXT,
            &mut sek,
        )?;

        Ok(Self { cipher, sek })
    }

    fn aead_algorithm(&self) -> &'static aead::Algorithm {
        match self.cipher {
            CipherSuite::A128Gcm => &aead::AES_128_GCM,
            CipherSuite::A256Gcm => &aead::AES_256_GCM,
        }
    }

    fn cose_algorithm(&self) -> CoseAlgorithm {
        match self.cipher {
            CipherSuite::A128Gcm => CoseAlgorithm::A128GCM,
            CipherSuite::A256Gcm => CoseAlgorithm::A256GCM,
        }
    }

    fn sealing_key(&self) -> Result<aead::LessSafeKey, Error> {
        let key = aead::UnboundKey::new(self.aead_algorithm(), &self.sek)
            .map_err(|_| Error::new(ErrorKind::Crypto, "to build the session key"))?;

        Ok(aead::LessSafeKey::new(key))
    }

    /// Encrypts a message body into a tagged `CoseEncrypt0`.
    pub fn encrypt(&self, rng: &SystemRandom, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let mut iv = [0u8; aead::NONCE_LEN];
        rng.fill(&mut iv)
            .map_err(|_| Error::new(ErrorKind::Crypto, "to generate iv"))?;

        let protected = HeaderBuilder::new()
            .algorithm(self.cose_algorithm())
            .build();
        let unprotected = HeaderBuilder::new().iv(iv.to_vec()).build();

        let key = self.sealing_key()?;

        let enc = CoseEncrypt0Builder::new()
            .protected(protected)
            .unprotected(unprotected)
            .try_create_ciphertext(plaintext, &[], |plain, aad| {
                let nonce = aead::Nonce::assume_unique_for_key(iv);

                let mut in_out = plain.to_vec();
                key.seal_in_place_append_tag(nonce, aead::Aad::from(aad), &mut in_out)
                    .map_err(|_| Error::new(ErrorKind::Crypto, "to seal the message"))?;

                Ok(in_out)
            })?
            .build();

        enc.to_tagged_vec().map_err(|err| {
            error!(error = %err, "couldn't encode encrypted message");

            Error::new(ErrorKind::Encode, "encrypted message")
        })
    }

    /// Decrypts a tagged `CoseEncrypt0` message body.
    pub fn decrypt(&self, body: &[u8]) -> Result<Vec<u8>, Error> {
        let enc = CoseEncrypt0::from_tagged_slice(body).map_err(|err| {
            error!(error = %err, "couldn't decode encrypted message");

            Error::new(ErrorKind::Decode, "encrypted message")
        })?;

        let iv: [u8; aead::NONCE_LEN] = enc
            .unprotected
            .iv
            .as_slice()
            .try_into()
            .map_err(|_| Error::new(ErrorKind::Invalid, "iv length"))?;

        let key = self.sealing_key()?;

        enc.decrypt(&[], |ciphertext, aad| {
            let nonce = aead::Nonce::assume_unique_for_key(iv);

            let mut in_out = ciphertext.to_vec();
            let plain = key
                .open_in_place(nonce, aead::Aad::from(aad), &mut in_out)
                .map_err(|_| Error::new(ErrorKind::Verify, "to open the message"))?;

            Ok(plain.to_vec())
        })
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("cipher", &self.cipher)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn exchange_pair(suite: KexSuite, cipher: CipherSuite) -> (SessionKeys, SessionKeys) {
        let rng = SystemRandom::new();

        let owner = OwnerKeyExchange::create(suite, cipher, &rng).unwrap();
        let xa = owner.xa().unwrap();

        let device = DeviceKeyExchange::create(suite, cipher, &rng).unwrap();
        let xb = device.xb().unwrap();

        let device_keys = device.finish(&xa).unwrap();
        let owner_keys = owner.finish(&xb).unwrap();

        (device_keys, owner_keys)
    }

    #[test]
    fn both_sides_derive_the_same_key() {
        let cases = [
            (KexSuite::Ecdh256, CipherSuite::A128Gcm),
            (KexSuite::Ecdh256, CipherSuite::A256Gcm),
            (KexSuite::Ecdh384, CipherSuite::A128Gcm),
        ];

        for (suite, cipher) in cases {
            let (device_keys, owner_keys) = exchange_pair(suite, cipher);

            assert_eq!(device_keys.sek.as_slice(), owner_keys.sek.as_slice());
        }
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let rng = SystemRandom::new();

        let (device_keys, owner_keys) = exchange_pair(KexSuite::Ecdh256, CipherSuite::A128Gcm);

        let body = device_keys.encrypt(&rng, b"hello owner").unwrap();

        let plain = owner_keys.decrypt(&body).unwrap();

        assert_eq!(plain, b"hello owner");
    }

    #[test]
    fn decrypt_rejects_other_session() {
        let rng = SystemRandom::new();

        let (device_keys, _) = exchange_pair(KexSuite::Ecdh256, CipherSuite::A128Gcm);
        let (_, other_owner) = exchange_pair(KexSuite::Ecdh256, CipherSuite::A128Gcm);

        let body = device_keys.encrypt(&rng, b"hello owner").unwrap();

        let err = other_owner.decrypt(&body).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Verify);
    }

    #[test]
    fn unsupported_suite() {
        let rng = SystemRandom::new();

        let err =
            OwnerKeyExchange::create(KexSuite::DhKexId14, CipherSuite::A128Gcm, &rng).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }
}
