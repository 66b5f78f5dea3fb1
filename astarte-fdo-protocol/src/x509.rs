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

//! X.509 certificate chain (X5CHAIN) following the COSE spec.

use std::borrow::Cow;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use serde_bytes::Bytes;

use crate::cbor::{Hex, OneOrMore};
use crate::error::ErrorKind;
use crate::Error;

/// X509 certificate chain.
///
/// From the COSE RFC:
///
/// ```cddl
/// COSE_X509 = bstr / [ 2*certs: bstr ]
/// ```
///
/// The array variant is ordered leaf first, each certificate signed by the
/// next one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CoseX509<'a> {
    /// List of certificates, leaf first.
    ///
    /// This is more lenient than the COSE RFC, which requires a minimum
    /// of 2 for the array form.
    Certs(OneOrMore<X509<'a>>),
    /// A single certificate.
    One(X509<'a>),
}

impl<'a> CoseX509<'a> {
    /// Builds the chain from a list of DER certificates, leaf first.
    pub fn from_der_chain(ders: Vec<Vec<u8>>) -> Result<CoseX509<'static>, Error> {
        let mut certs = Vec::with_capacity(ders.len());
        for der in ders {
            certs.push(X509::from_der(der)?);
        }

        if certs.len() == 1 {
            return Ok(CoseX509::One(certs.remove(0)));
        }

        OneOrMore::new(certs)
            .map(CoseX509::Certs)
            .ok_or(Error::new(ErrorKind::Invalid, "empty certificate chain"))
    }

    /// Returns `true` if the cose x509 is [`One`].
    ///
    /// [`One`]: CoseX509::One
    #[must_use]
    pub fn is_one(&self) -> bool {
        matches!(self, Self::One(..))
    }

    /// Returns the leaf certificate.
    pub fn leaf(&self) -> &X509<'a> {
        match self {
            CoseX509::Certs(certs) => certs.first(),
            CoseX509::One(cert) => cert,
        }
    }

    /// Return the leaf certificate public key (SPKI DER).
    pub fn cert_pub_key(&self) -> &[u8] {
        self.leaf().key()
    }

    /// Iterate the certificates from the leaf towards the root.
    pub fn iter(&self) -> impl Iterator<Item = &X509<'a>> {
        let slice: &[X509<'a>] = match self {
            CoseX509::Certs(certs) => certs,
            CoseX509::One(cert) => std::slice::from_ref(cert),
        };

        slice.iter()
    }

    /// Number of certificates in the chain.
    pub fn len(&self) -> usize {
        match self {
            CoseX509::Certs(certs) => certs.len(),
            CoseX509::One(_) => 1,
        }
    }

    /// A chain is never empty, this is for clippy's sake.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Return an owned instance of the chain.
    pub fn into_owned(self) -> CoseX509<'static> {
        match self {
            CoseX509::Certs(certs) => {
                let certs = certs.into_inner().into_iter().map(X509::into_owned);

                CoseX509::Certs(OneOrMore::new(certs.collect()).expect("chain was not empty"))
            }
            CoseX509::One(cert) => CoseX509::One(cert.into_owned()),
        }
    }
}

/// DER-encoded X.509 certificate.
///
/// The certificate is parsed on construction so the subject public key is
/// available without re-parsing, but only the DER bytes travel on the wire.
#[derive(Clone, Eq)]
pub struct X509<'a> {
    cert: Cow<'a, Bytes>,
    /// SubjectPublicKeyInfo DER.
    spki: Vec<u8>,
    /// Raw subjectPublicKey BIT STRING contents.
    key_bits: Vec<u8>,
}

impl<'a> X509<'a> {
    /// Parses a DER encoded certificate from a slice.
    pub fn parse(cert: &'a [u8]) -> Result<Self, Error> {
        let (spki, key_bits) = Self::parse_keys(cert)?;

        Ok(Self {
            cert: Cow::Borrowed(Bytes::new(cert)),
            spki,
            key_bits,
        })
    }

    /// Parses an owned DER encoded certificate.
    pub fn from_der(cert: Vec<u8>) -> Result<X509<'static>, Error> {
        let (spki, key_bits) = Self::parse_keys(&cert)?;

        Ok(X509 {
            cert: Cow::Owned(cert.into()),
            spki,
            key_bits,
        })
    }

    fn parse_keys(cert: &[u8]) -> Result<(Vec<u8>, Vec<u8>), Error> {
        let (rest, parsed) = x509_parser::parse_x509_certificate(cert).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't parse x509 certificate");

            let _ = err;

            Error::new(ErrorKind::Invalid, "x509 certificate")
        })?;

        debug_assert!(rest.is_empty());

        let spki = parsed.public_key();

        Ok((spki.raw.to_vec(), spki.subject_public_key.data.to_vec()))
    }

    /// The certificate DER bytes.
    pub fn der(&self) -> &[u8] {
        &self.cert
    }

    /// The subject public key as SPKI DER.
    pub fn key(&self) -> &[u8] {
        &self.spki
    }

    /// The raw subjectPublicKey bits (e.g. the SEC.1 point for EC keys).
    pub fn key_bits(&self) -> &[u8] {
        &self.key_bits
    }

    /// Return an owned instance of the certificate.
    pub fn into_owned(self) -> X509<'static> {
        X509 {
            cert: Cow::Owned(self.cert.into_owned()),
            spki: self.spki,
            key_bits: self.key_bits,
        }
    }
}

impl Serialize for X509<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.cert.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for X509<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let cert: Cow<'_, Bytes> = Deserialize::deserialize(deserializer)?;

        let (spki, key_bits) = Self::parse_keys(&cert).map_err(serde::de::Error::custom)?;

        Ok(Self {
            cert,
            spki,
            key_bits,
        })
    }
}

impl Debug for X509<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            cert,
            spki,
            key_bits: _,
        } = self;

        f.debug_struct("X509")
            .field("cert", &Hex::new(cert))
            .field("spki", &Hex::new(spki))
            .finish()
    }
}

impl PartialEq for X509<'_> {
    fn eq(&self, other: &Self) -> bool {
        // The parsed fields are derived from the DER bytes
        self.cert == other.cert
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    pub(crate) const CERT_ECC: &[u8] = include_bytes!("../assets/examples/x509-ecc-ca.der");
    pub(crate) const CERT_RSA: &[u8] = include_bytes!("../assets/examples/x509-rsa-ca.der");
    pub(crate) const PUB_KEY_ECC: &[u8] = include_bytes!("../assets/examples/ec-pub-key.der");
    pub(crate) const PUB_KEY_RSA: &[u8] = include_bytes!("../assets/examples/rsa-pub-key.der");

    pub(crate) fn create_cose_x509() -> CoseX509<'static> {
        let ecc = X509::parse(CERT_ECC).unwrap();

        CoseX509::One(ecc)
    }

    #[test]
    fn cose_x509_roundtrip() {
        let ecc = X509::parse(CERT_ECC).unwrap();
        let rsa = X509::parse(CERT_RSA).unwrap();
        let cases = [
            create_cose_x509(),
            CoseX509::Certs(OneOrMore::new(vec![ecc, rsa]).unwrap()),
        ];

        for case in cases {
            let mut buf = Vec::new();
            ciborium::into_writer(&case, &mut buf).unwrap();

            let res: CoseX509 = ciborium::from_reader(buf.as_slice()).unwrap();

            assert_eq!(res, case);
        }
    }

    #[test]
    fn cose_x509_leaf_key() {
        let ecc = X509::parse(CERT_ECC).unwrap();
        let rsa = X509::parse(CERT_RSA).unwrap();

        let cases = [
            (CoseX509::One(ecc.clone()), ecc.key().to_vec()),
            (CoseX509::One(rsa.clone()), rsa.key().to_vec()),
            (
                CoseX509::Certs(OneOrMore::new(vec![ecc.clone(), rsa]).unwrap()),
                ecc.key().to_vec(),
            ),
        ];

        for (case, exp) in cases {
            assert_eq!(case.cert_pub_key(), exp);
        }
    }

    #[test]
    fn x509_self_signed_spki_matches_pub_key() {
        let ecc = X509::parse(CERT_ECC).unwrap();
        let rsa = X509::parse(CERT_RSA).unwrap();

        assert_eq!(ecc.key(), PUB_KEY_ECC);
        assert_eq!(rsa.key(), PUB_KEY_RSA);
    }

    #[test]
    fn x509_key_bits_are_sec1_point() {
        let ecc = X509::parse(CERT_ECC).unwrap();

        // Uncompressed P-256 point
        assert_eq!(ecc.key_bits().len(), 65);
        assert_eq!(ecc.key_bits()[0], 0x04);
    }

    #[test]
    fn cose_x509_iter_and_len() {
        let ecc = X509::parse(CERT_ECC).unwrap();
        let rsa = X509::parse(CERT_RSA).unwrap();

        let chain = CoseX509::Certs(OneOrMore::new(vec![ecc.clone(), rsa.clone()]).unwrap());

        assert_eq!(chain.len(), 2);
        assert!(!chain.is_empty());

        let certs: Vec<_> = chain.iter().collect();
        assert_eq!(certs, [&ecc, &rsa]);

        let one = CoseX509::One(ecc.clone());
        assert_eq!(one.len(), 1);
        assert!(one.is_one());
        assert_eq!(one.leaf(), &ecc);
    }

    #[test]
    fn cose_x509_from_der_chain() {
        let one = CoseX509::from_der_chain(vec![CERT_ECC.to_vec()]).unwrap();
        assert!(one.is_one());

        let two = CoseX509::from_der_chain(vec![CERT_ECC.to_vec(), CERT_RSA.to_vec()]).unwrap();
        assert_eq!(two.len(), 2);

        let err = CoseX509::from_der_chain(vec![]).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn x509_parse_err() {
        let err = X509::parse(PUB_KEY_ECC).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }
}
