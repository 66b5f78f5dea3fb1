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

//! Public Key encoding for signature keys.

use std::borrow::Cow;
use std::fmt::Debug;
use std::marker::PhantomData;

use coset::{AsCborValue, CoseKey};
use serde::de::Visitor;
use serde::{Deserialize, Serialize};
use serde_bytes::Bytes;

use crate::error::ErrorKind;
use crate::x509::CoseX509;
use crate::Error;

/// ```cddl
/// PublicKey = [
///     pkType,
///     pkEnc,
///     pkBody
/// ]
/// ```
#[derive(Clone, PartialEq)]
pub struct PublicKey<'a> {
    pub(crate) key_type: KeyType,
    pub(crate) enc: KeyEncoding,
    pub(crate) body: KeyBody<'a>,
}

impl<'a> PublicKey<'a> {
    /// Creates a key with the X509 (SPKI DER) encoding.
    pub fn with_x509(key_type: KeyType, spki: Cow<'a, Bytes>) -> Self {
        Self {
            key_type,
            enc: KeyEncoding::X509,
            body: KeyBody::X509(spki),
        }
    }

    /// Creates a key carrying a certificate chain.
    pub fn with_x5chain(key_type: KeyType, chain: CoseX509<'a>) -> Self {
        Self {
            key_type,
            enc: KeyEncoding::X5Chain,
            body: KeyBody::X5Chain(chain),
        }
    }

    /// Returns the canonical public key bytes (SPKI DER).
    ///
    /// For an X5Chain the leaf key is the effective public key.
    pub fn key(&self) -> Option<&[u8]> {
        self.body.key()
    }

    /// Returns the [`KeyType`].
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Returns the [`KeyEncoding`].
    pub fn enc(&self) -> KeyEncoding {
        self.enc
    }

    /// Returns the [`KeyBody`].
    pub fn body(&self) -> &KeyBody<'a> {
        &self.body
    }

    /// Returns the certificate chain, when the key is an X5Chain.
    pub fn chain(&self) -> Option<&CoseX509<'a>> {
        match &self.body {
            KeyBody::X5Chain(chain) => Some(chain),
            KeyBody::Crypto(_) | KeyBody::X509(_) | KeyBody::CoseKey(_) => None,
        }
    }

    /// Compares the effective key material of two public keys.
    pub fn same_key(&self, other: &PublicKey<'_>) -> bool {
        match (self.key(), other.key()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Return an owned instance of the key.
    pub fn into_owned(self) -> PublicKey<'static> {
        let body = match self.body {
            KeyBody::Crypto(cow) => KeyBody::Crypto(Cow::Owned(cow.into_owned())),
            KeyBody::X509(cow) => KeyBody::X509(Cow::Owned(cow.into_owned())),
            KeyBody::X5Chain(chain) => KeyBody::X5Chain(chain.into_owned()),
            KeyBody::CoseKey(key) => KeyBody::CoseKey(key),
        };

        PublicKey {
            key_type: self.key_type,
            enc: self.enc,
            body,
        }
    }
}

impl Debug for PublicKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            key_type,
            enc,
            body,
        } = self;

        f.debug_struct("PublicKey")
            .field("key_type", key_type)
            .field("enc", enc)
            .field("body", body)
            .finish()
    }
}

impl Serialize for PublicKey<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            key_type,
            enc,
            body,
        } = self;

        (key_type, enc, body).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Default)]
        struct PubKeyVisitor<'a> {
            _marker: PhantomData<PublicKey<'a>>,
        }

        impl<'de, 'a> Visitor<'de> for PubKeyVisitor<'a> {
            type Value = PublicKey<'a>;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(formatter, "expecting a PublicKey CBOR sequence")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let exp = &"should be a sequence of 3 elements";

                if let Some(len) = seq.size_hint() {
                    if len != 3 {
                        return Err(serde::de::Error::invalid_length(len, exp));
                    }
                }

                let key_type = seq
                    .next_element::<KeyType>()?
                    .ok_or_else(|| serde::de::Error::invalid_length(0, exp))?;
                let enc = seq
                    .next_element::<KeyEncoding>()?
                    .ok_or_else(|| serde::de::Error::invalid_length(1, exp))?;

                let body = match enc {
                    KeyEncoding::Crypto => {
                        let body = seq
                            .next_element::<Cow<'_, Bytes>>()?
                            .ok_or_else(|| serde::de::Error::invalid_length(2, exp))?;

                        KeyBody::Crypto(body)
                    }
                    KeyEncoding::X509 => {
                        let body = seq
                            .next_element::<Cow<'_, Bytes>>()?
                            .ok_or_else(|| serde::de::Error::invalid_length(2, exp))?;

                        KeyBody::X509(body)
                    }
                    KeyEncoding::X5Chain => {
                        let chain = seq
                            .next_element::<CoseX509<'_>>()?
                            .ok_or_else(|| serde::de::Error::invalid_length(2, exp))?;

                        KeyBody::X5Chain(chain)
                    }
                    KeyEncoding::CoseKey => {
                        let value = seq
                            .next_element::<ciborium::Value>()?
                            .ok_or_else(|| serde::de::Error::invalid_length(2, exp))?;

                        let key =
                            CoseKey::from_cbor_value(value).map_err(serde::de::Error::custom)?;

                        KeyBody::CoseKey(key)
                    }
                };

                Ok(PublicKey {
                    key_type,
                    enc,
                    body,
                })
            }
        }

        deserializer.deserialize_seq(PubKeyVisitor::default())
    }
}

/// KeyType is an FDO pkType enum.
///
/// ```cddl
/// pkType = (
///     RSA2048RESTR: 1, ;; RSA 2048 with restricted key/exponent (PKCS1 1.5 encoding)
///     RSAPKCS:      5, ;; RSA key, PKCS1, v1.5
///     RSAPSS:       6, ;; RSA key, PSS
///     SECP256R1:    10, ;; ECDSA secp256r1 = NIST-P-256 = prime256v1
///     SECP384R1:    11, ;; ECDSA secp384r1 = NIST-P-384
/// )
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum KeyType {
    /// RSA 2048 with restricted key/exponent (PKCS1 1.5 encoding)
    Rsa2048Restr = 1,
    /// RSA key, PKCS1, v1.5
    RsaPkcs = 5,
    /// RSA key, PSS
    RsaPss = 6,
    /// ECDSA secp256r1 = NIST-P-256 = prime256v1
    Secp256R1 = 10,
    /// ECDSA secp384r1 = NIST-P-384
    Secp384R1 = 11,
}

impl TryFrom<u8> for KeyType {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let value = match value {
            1 => KeyType::Rsa2048Restr,
            5 => KeyType::RsaPkcs,
            6 => KeyType::RsaPss,
            10 => KeyType::Secp256R1,
            11 => KeyType::Secp384R1,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for KeyType")),
        };

        Ok(value)
    }
}

impl From<KeyType> for u8 {
    fn from(value: KeyType) -> Self {
        value as u8
    }
}

/// Encoding of the PublicKey body.
///
/// ```cddl
/// pkEnc = (
///     Crypto:       0      ;; applies to crypto with its own encoding (e.g., Intel® EPID)
///     X509:         1,     ;; X509 DER encoding, applies to RSA and ECDSA
///     X5CHAIN:      2,     ;; COSE x5chain, an ordered chain of X.509 certificates
///     COSEKEY:      3      ;; COSE key encoding
/// )
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum KeyEncoding {
    /// Applies to crypto with its own encoding (e.g., Intel® EPID)
    Crypto = 0,
    /// X509 DER encoding, applies to RSA and ECDSA
    X509 = 1,
    /// COSE x5chain, an ordered chain of X.509 certificates
    X5Chain = 2,
    /// COSE key encoding
    CoseKey = 3,
}

impl TryFrom<u8> for KeyEncoding {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let value = match value {
            0 => KeyEncoding::Crypto,
            1 => KeyEncoding::X509,
            2 => KeyEncoding::X5Chain,
            3 => KeyEncoding::CoseKey,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for KeyEncoding")),
        };

        Ok(value)
    }
}

impl From<KeyEncoding> for u8 {
    fn from(value: KeyEncoding) -> Self {
        value as u8
    }
}

/// Body of a [`PublicKey`], it depends on the [`KeyEncoding`].
#[derive(Debug, Clone, PartialEq)]
pub enum KeyBody<'a> {
    /// Crypto with its own encoding (e.g., Intel® EPID)
    Crypto(Cow<'a, Bytes>),
    /// X509 DER encoding, applies to RSA and ECDSA
    X509(Cow<'a, Bytes>),
    /// COSE x5chain, an ordered chain of X.509 certificates
    X5Chain(CoseX509<'a>),
    /// COSE key encoding
    CoseKey(CoseKey),
}

impl KeyBody<'_> {
    /// Public key as byte slice.
    pub fn key(&self) -> Option<&[u8]> {
        match self {
            KeyBody::X509(key) => Some(key),
            KeyBody::X5Chain(chain) => Some(chain.cert_pub_key()),
            KeyBody::Crypto(key) => Some(key),
            KeyBody::CoseKey(_cose) => {
                #[cfg(feature = "tracing")]
                tracing::error!("cose public key functionality is not implemented");

                None
            }
        }
    }
}

impl Serialize for KeyBody<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            KeyBody::Crypto(cow) | KeyBody::X509(cow) => cow.serialize(serializer),
            KeyBody::X5Chain(chain) => chain.serialize(serializer),
            KeyBody::CoseKey(cose_key) => cose_key
                .clone()
                .to_cbor_value()
                .map_err(serde::ser::Error::custom)?
                .serialize(serializer),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use coset::CoseKeyBuilder;
    use pretty_assertions::assert_eq;

    use crate::x509::tests::{CERT_ECC, PUB_KEY_ECC};
    use crate::x509::X509;

    use super::*;

    pub(crate) fn create_pub_key() -> PublicKey<'static> {
        PublicKey::with_x509(KeyType::Secp256R1, Cow::Borrowed(PUB_KEY_ECC.into()))
    }

    fn cose_key() -> CoseKey {
        CoseKeyBuilder::new_ec2_pub_key(coset::iana::EllipticCurve::P_256, vec![1; 32], vec![2; 32])
            .build()
    }

    fn pub_key_cases() -> [(KeyEncoding, KeyBody<'static>); 4] {
        let cert = X509::parse(CERT_ECC).unwrap();

        [
            (
                KeyEncoding::Crypto,
                KeyBody::Crypto(Cow::Borrowed(Bytes::new(&[0, 1, 2, 3, 4]))),
            ),
            (
                KeyEncoding::X509,
                KeyBody::X509(Cow::Borrowed(Bytes::new(PUB_KEY_ECC))),
            ),
            (KeyEncoding::X5Chain, KeyBody::X5Chain(CoseX509::One(cert))),
            (KeyEncoding::CoseKey, KeyBody::CoseKey(cose_key())),
        ]
    }

    #[test]
    fn public_key_roundtrip() {
        let cases = pub_key_cases();

        for (enc, body) in cases {
            let pub_key = PublicKey {
                key_type: KeyType::Secp256R1,
                enc,
                body,
            };

            let mut buf = Vec::new();
            ciborium::into_writer(&pub_key, &mut buf).unwrap();

            let res: PublicKey = ciborium::from_reader(buf.as_slice()).unwrap();

            assert_eq!(res, pub_key);
        }
    }

    #[test]
    fn pub_key_get_key() {
        let cert = X509::parse(CERT_ECC).unwrap();

        let cases = [
            (
                Some([0, 1, 2, 3, 4].as_slice()),
                KeyBody::Crypto(Cow::Borrowed(Bytes::new(&[0, 1, 2, 3, 4]))),
            ),
            (
                Some(PUB_KEY_ECC),
                KeyBody::X509(Cow::Borrowed(Bytes::new(PUB_KEY_ECC))),
            ),
            (
                Some(cert.key()),
                KeyBody::X5Chain(CoseX509::One(cert.clone())),
            ),
            (None, KeyBody::CoseKey(cose_key())),
        ];

        for (exp, body) in cases {
            let pub_key = PublicKey {
                key_type: KeyType::Secp256R1,
                enc: KeyEncoding::X509,
                body,
            };

            assert_eq!(pub_key.key(), exp);
        }
    }

    #[test]
    fn pub_key_same_key() {
        let cert = X509::parse(CERT_ECC).unwrap();

        let x509 = create_pub_key();
        let chain = PublicKey::with_x5chain(KeyType::Secp256R1, CoseX509::One(cert));

        // The fixture cert wraps the fixture key
        assert!(x509.same_key(&chain));
        assert!(x509.same_key(&x509));

        let other = PublicKey {
            key_type: KeyType::Secp256R1,
            enc: KeyEncoding::Crypto,
            body: KeyBody::Crypto(Cow::Borrowed(Bytes::new(&[1, 2, 3]))),
        };

        assert!(!x509.same_key(&other));
    }

    #[test]
    fn pub_key_chain() {
        let cert = X509::parse(CERT_ECC).unwrap();
        let chain = PublicKey::with_x5chain(KeyType::Secp256R1, CoseX509::One(cert));

        assert!(chain.chain().is_some());
        assert!(create_pub_key().chain().is_none());
    }

    #[test]
    fn key_type_roundtrip() {
        let cases = [
            KeyType::Rsa2048Restr,
            KeyType::RsaPkcs,
            KeyType::RsaPss,
            KeyType::Secp256R1,
            KeyType::Secp384R1,
        ];

        for case in cases {
            let mut buf = Vec::new();
            ciborium::into_writer(&case, &mut buf).unwrap();

            let res: KeyType = ciborium::from_reader(buf.as_slice()).unwrap();

            assert_eq!(res, case);
        }
    }

    #[test]
    fn public_key_err() {
        // Size hint case
        let mut buf = Vec::new();
        ciborium::into_writer(&ciborium::Value::Array(vec![]), &mut buf).unwrap();
        ciborium::from_reader::<PublicKey, _>(buf.as_slice()).unwrap_err();

        let cases = [
            vec![ciborium::Value::Integer(u8::from(KeyType::Secp256R1).into())],
            vec![
                ciborium::Value::Integer(u8::from(KeyType::Secp256R1).into()),
                ciborium::Value::Integer(u8::from(KeyEncoding::X509).into()),
            ],
            vec![
                ciborium::Value::Integer(u8::from(KeyType::Secp256R1).into()),
                ciborium::Value::Integer(u8::from(KeyEncoding::X5Chain).into()),
            ],
            vec![
                ciborium::Value::Integer(u8::from(KeyType::Secp256R1).into()),
                ciborium::Value::Integer(u8::from(KeyEncoding::CoseKey).into()),
            ],
        ];

        for case in cases {
            ciborium::Value::Array(case)
                .deserialized::<PublicKey>()
                .unwrap_err();
        }
    }

    #[test]
    fn key_type_err() {
        let err = KeyType::try_from(12u8).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn key_encoding_err() {
        let err = KeyEncoding::try_from(4u8).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::OutOfRange);
    }
}
