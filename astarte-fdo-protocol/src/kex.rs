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

//! Key exchange parameters, in either direction.
//!
//! For the ECDH suites each party contributes a public curve point and a
//! random value, packed as big-endian length-prefixed fields in a byte
//! string.

use std::borrow::Cow;
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_bytes::Bytes;

use crate::error::ErrorKind;
use crate::Error;

/// Parameters for a key exchange with ECC keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcdhParams<'a, const N: usize> {
    x: &'a [u8; N],
    y: &'a [u8; N],
    rand: &'a [u8],
}

impl<'a, const N: usize> EcdhParams<'a, N> {
    /// Return the x coordinate.
    pub fn x(&self) -> &'a [u8; N] {
        self.x
    }

    /// Return the y coordinate.
    pub fn y(&self) -> &'a [u8; N] {
        self.y
    }

    /// Return the random part.
    pub fn rand(&self) -> &'a [u8] {
        self.rand
    }

    /// Return the point as a SEC.1 uncompressed key.
    pub fn as_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + 2 * N);

        key.push(0x04);
        key.extend_from_slice(self.x);
        key.extend_from_slice(self.y);

        key
    }
}

impl<'a> EcdhParams<'a, 32> {
    /// Create the P-256 params.
    pub fn with_p256(x: &'a [u8; 32], y: &'a [u8; 32], rand: &'a [u8]) -> Self {
        Self { x, y, rand }
    }
}

impl<'a> EcdhParams<'a, 48> {
    /// Create the P-384 params.
    pub fn with_p384(x: &'a [u8; 48], y: &'a [u8; 48], rand: &'a [u8]) -> Self {
        Self { x, y, rand }
    }
}

impl<'a, const N: usize> TryFrom<&'a [u8]> for EcdhParams<'a, N> {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<EcdhParams<'_, N>, Self::Error> {
        let err = || Error::new(ErrorKind::Invalid, "for len prefixed slice EcdhParams");

        let (x, rest) = parse_len_prefixed_array(value).ok_or_else(err)?;
        let (y, rest) = parse_len_prefixed_array(rest).ok_or_else(err)?;
        let (rand, rest) = parse_len_prefixed_slice(rest).ok_or_else(err)?;

        if !rest.is_empty() {
            return Err(Error::new(
                ErrorKind::Invalid,
                "for remaining bytes in EcdhParams",
            ));
        }

        Ok(EcdhParams { x, y, rand })
    }
}

fn parse_len_prefixed_array<const N: usize>(bytes: &[u8]) -> Option<(&[u8; N], &[u8])> {
    let (slice, rest) = parse_len_prefixed_slice(bytes)?;

    let array = slice.try_into().ok()?;

    Some((array, rest))
}

fn parse_len_prefixed_slice(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let (blen, rest) = bytes.split_first_chunk::<2>()?;

    let len: usize = u16::from_be_bytes(*blen).into();

    let first = rest.get(..len)?;
    let second = rest.get(len..)?;

    Some((first, second))
}

fn pack_params<const N: usize>(params: EcdhParams<'_, N>) -> Result<Vec<u8>, Error> {
    let x_len =
        u16::try_from(params.x.len()).map_err(|_| Error::new(ErrorKind::OutOfRange, "x len"))?;
    let y_len =
        u16::try_from(params.y.len()).map_err(|_| Error::new(ErrorKind::OutOfRange, "y len"))?;
    let rand_len = u16::try_from(params.rand.len())
        .map_err(|_| Error::new(ErrorKind::OutOfRange, "rand len"))?;

    let mut buf = Vec::with_capacity(6 + 2 * N + params.rand.len());
    buf.extend_from_slice(&x_len.to_be_bytes());
    buf.extend_from_slice(params.x);
    buf.extend_from_slice(&y_len.to_be_bytes());
    buf.extend_from_slice(params.y);
    buf.extend_from_slice(&rand_len.to_be_bytes());
    buf.extend_from_slice(params.rand);

    Ok(buf)
}

/// Key exchange contribution from owner to device.
///
/// ```cddl
/// KeyExchange /= (
///     xAKeyExchange: bstr,
///     xBKeyExchange: bstr
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[repr(transparent)]
pub struct XAKeyExchange<'a>(pub(crate) Cow<'a, Bytes>);

impl XAKeyExchange<'static> {
    /// Create the exchange from [`EcdhParams`].
    pub fn create<const N: usize>(params: EcdhParams<'_, N>) -> Result<Self, Error> {
        pack_params(params).map(|buf| Self(Cow::Owned(buf.into())))
    }

    /// Wraps bytes already in the wire layout.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Cow::Owned(bytes.into()))
    }
}

impl XAKeyExchange<'_> {
    /// Returns the P-256 [`EcdhParams`] of the exchange.
    pub fn parse_ecdh_p256(&self) -> Result<EcdhParams<'_, 32>, Error> {
        EcdhParams::try_from(self.as_ref())
    }

    /// Returns the P-384 [`EcdhParams`] of the exchange.
    pub fn parse_ecdh_p384(&self) -> Result<EcdhParams<'_, 48>, Error> {
        EcdhParams::try_from(self.as_ref())
    }
}

impl AsRef<[u8]> for XAKeyExchange<'_> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Key exchange contribution from device to owner.
///
/// ```cddl
/// KeyExchange /= (
///     xAKeyExchange: bstr,
///     xBKeyExchange: bstr
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[repr(transparent)]
pub struct XBKeyExchange<'a>(pub(crate) Cow<'a, Bytes>);

impl XBKeyExchange<'static> {
    /// Create the exchange from [`EcdhParams`].
    pub fn create<const N: usize>(params: EcdhParams<'_, N>) -> Result<Self, Error> {
        pack_params(params).map(|buf| Self(Cow::Owned(buf.into())))
    }

    /// Wraps bytes already in the wire layout.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Cow::Owned(bytes.into()))
    }
}

impl XBKeyExchange<'_> {
    /// Returns the P-256 [`EcdhParams`] of the exchange.
    pub fn parse_ecdh_p256(&self) -> Result<EcdhParams<'_, 32>, Error> {
        EcdhParams::try_from(self.as_ref())
    }

    /// Returns the P-384 [`EcdhParams`] of the exchange.
    pub fn parse_ecdh_p384(&self) -> Result<EcdhParams<'_, 48>, Error> {
        EcdhParams::try_from(self.as_ref())
    }
}

impl AsRef<[u8]> for XBKeyExchange<'_> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// ```cddl
/// IVData = bstr
/// ```
pub type IvData<'a> = Cow<'a, Bytes>;

/// Session key exchange suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KexSuite {
    /// Diffie-Hellman with a standard NIST exponent and 2048-bit modulus
    /// (RFC3526, id 14). Preferred method for RSA2048RESTR Owner keys.
    DhKexId14,
    /// Diffie-Hellman with a standard NIST exponent and 3072-bit modulus
    /// (RFC3526, id 15). Preferred method for RSA 3072-bit Owner keys.
    DhKexId15,
    /// Asymmetric key exchange encrypting under an RSA2048RESTR Owner key.
    AsymKex2048,
    /// Asymmetric key exchange encrypting under an RSA 3072-bit Owner key.
    AsymKex3072,
    /// Standard Diffie-Hellman mechanism over ECC NIST P-256 (SECP256R1).
    Ecdh256,
    /// Standard Diffie-Hellman mechanism over ECC NIST P-384 (SECP384R1).
    Ecdh384,
}

impl KexSuite {
    /// The wire name of the suite.
    pub fn as_str(&self) -> &'static str {
        match self {
            KexSuite::DhKexId14 => "DHKEXid14",
            KexSuite::DhKexId15 => "DHKEXid15",
            KexSuite::AsymKex2048 => "ASYMKEX2048",
            KexSuite::AsymKex3072 => "ASYMKEX3072",
            KexSuite::Ecdh256 => "ECDH256",
            KexSuite::Ecdh384 => "ECDH384",
        }
    }
}

impl Display for KexSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for KexSuite {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = match s {
            "DHKEXid14" => KexSuite::DhKexId14,
            "DHKEXid15" => KexSuite::DhKexId15,
            "ASYMKEX2048" => KexSuite::AsymKex2048,
            "ASYMKEX3072" => KexSuite::AsymKex3072,
            "ECDH256" => KexSuite::Ecdh256,
            "ECDH384" => KexSuite::Ecdh384,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for KexSuite")),
        };

        Ok(value)
    }
}

/// Cipher suite for the encrypted TO2 channel, as a COSE algorithm id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
#[repr(i64)]
pub enum CipherSuite {
    /// AES-GCM with a 128-bit key.
    A128Gcm = coset::iana::Algorithm::A128GCM as i64,
    /// AES-GCM with a 256-bit key.
    A256Gcm = coset::iana::Algorithm::A256GCM as i64,
}

impl TryFrom<i64> for CipherSuite {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        let value = match value {
            1 => CipherSuite::A128Gcm,
            3 => CipherSuite::A256Gcm,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for CipherSuite")),
        };

        Ok(value)
    }
}

impl From<CipherSuite> for i64 {
    fn from(value: CipherSuite) -> Self {
        value as i64
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    pub(crate) fn p256_point() -> ([u8; 32], [u8; 32]) {
        ([0xaa; 32], [0xbb; 32])
    }

    #[test]
    fn xb_key_exchange_roundtrip() {
        let (x, y) = p256_point();

        let params = EcdhParams::with_p256(&x, &y, &[0xde, 0xad, 0xbe, 0xef]);

        let value = XBKeyExchange::create(params).unwrap();

        let mut buf = Vec::new();
        ciborium::into_writer(&value, &mut buf).unwrap();

        let res: XBKeyExchange = ciborium::from_reader(buf.as_slice()).unwrap();

        assert_eq!(res, value);
    }

    #[test]
    fn xa_key_exchange_param_roundtrip() {
        let (x, y) = p256_point();
        let params = EcdhParams::with_p256(&x, &y, &[0xde, 0xad, 0xbe, 0xef]);

        let xa = XAKeyExchange::create(params).unwrap();

        let res = xa.parse_ecdh_p256().unwrap();

        assert_eq!(res, params);
    }

    #[test]
    fn xb_key_exchange_param_roundtrip_p384() {
        let x = [3u8; 48];
        let y = [4u8; 48];
        let params = EcdhParams::with_p384(&x, &y, &[7, 8, 9]);

        let xb = XBKeyExchange::create(params).unwrap();

        let res = xb.parse_ecdh_p384().unwrap();

        assert_eq!(res, params);
    }

    #[test]
    fn ecc_params_as_key() {
        let (x, y) = p256_point();
        let params = EcdhParams::with_p256(&x, &y, &[0xde, 0xad]);

        let key = params.as_key();

        assert_eq!(key.len(), 65);
        assert_eq!(key[0], 0x04);
        assert_eq!(&key[1..33], &x);
        assert_eq!(&key[33..], &y);
    }

    #[test]
    fn kex_suite_roundtrip_str() {
        let cases = [
            KexSuite::DhKexId14,
            KexSuite::DhKexId15,
            KexSuite::AsymKex2048,
            KexSuite::AsymKex3072,
            KexSuite::Ecdh256,
            KexSuite::Ecdh384,
        ];

        for case in cases {
            let parsed: KexSuite = case.as_str().parse().unwrap();

            assert_eq!(parsed, case);
        }

        let err = "ECDH512".parse::<KexSuite>().unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn cipher_suite_roundtrip() {
        let cases = [CipherSuite::A128Gcm, CipherSuite::A256Gcm];

        for case in cases {
            let mut buf = Vec::new();
            ciborium::into_writer(&case, &mut buf).unwrap();

            let res: CipherSuite = ciborium::from_reader(buf.as_slice()).unwrap();

            assert_eq!(res, case);
        }

        let err = CipherSuite::try_from(2i64).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn ecdh_params_errors() {
        // Empty
        XAKeyExchange(Cow::Borrowed(Bytes::new(&[])))
            .parse_ecdh_p256()
            .unwrap_err();

        let x = &[1, 2, 3, 4];
        let y = &[5, 6, 7, 8];

        // Wrong prefix
        let mut buf: Vec<u8> = Vec::new();
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(x);
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(y);

        XAKeyExchange(Cow::Owned(buf.into()))
            .parse_ecdh_p256()
            .unwrap_err();

        // Missing rand
        let mut buf: Vec<u8> = Vec::new();
        buf.extend_from_slice(&4u16.to_be_bytes());
        buf.extend_from_slice(x);
        buf.extend_from_slice(&4u16.to_be_bytes());
        buf.extend_from_slice(y);

        XAKeyExchange(Cow::Owned(buf.into()))
            .parse_ecdh_p256()
            .unwrap_err();

        // Trailing bytes
        let (x, y) = p256_point();
        let mut buf = Vec::new();
        buf.extend_from_slice(&32u16.to_be_bytes());
        buf.extend_from_slice(&x);
        buf.extend_from_slice(&32u16.to_be_bytes());
        buf.extend_from_slice(&y);
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&[1, 2, 3]);

        XAKeyExchange(Cow::Owned(buf.into()))
            .parse_ecdh_p256()
            .unwrap_err();
    }
}
