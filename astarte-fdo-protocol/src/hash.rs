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

//! Protocol digests and keyed MACs.

use std::borrow::Cow;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use serde_bytes::Bytes;

use crate::cbor::Hex;
use crate::error::ErrorKind;
use crate::Error;

/// Crypto hash.
///
/// ```cddl
/// Hash = [
///     hashtype: int, ;; negative values possible
///     hash: bstr
/// ]
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Hash<'a> {
    alg: HashAlg,
    hash: Cow<'a, Bytes>,
}

impl<'a> Hash<'a> {
    /// Return an owned instance of the Hash.
    pub fn into_owned(self) -> Hash<'static> {
        Hash {
            alg: self.alg,
            hash: Cow::Owned(self.hash.into_owned()),
        }
    }

    /// Create a [`SHA256`](HashAlg::Sha256) digest.
    pub fn with_sha256(hash: Cow<'a, Bytes>) -> Option<Self> {
        (hash.len() == 32).then_some(Self {
            alg: HashAlg::Sha256,
            hash,
        })
    }

    /// Create a [`SHA384`](HashAlg::Sha384) digest.
    pub fn with_sha384(hash: Cow<'a, Bytes>) -> Option<Self> {
        (hash.len() == 48).then_some(Self {
            alg: HashAlg::Sha384,
            hash,
        })
    }

    /// Returns the [`HashAlg`].
    pub fn alg(&self) -> HashAlg {
        self.alg
    }
}

impl AsRef<[u8]> for Hash<'_> {
    fn as_ref(&self) -> &[u8] {
        &self.hash
    }
}

impl Debug for Hash<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self { alg, hash } = self;

        f.debug_struct("Hash")
            .field("alg", &alg)
            .field("hash", &Hex::new(hash))
            .finish()
    }
}

impl Serialize for Hash<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self { alg, hash } = self;

        (alg, hash).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Hash<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (alg, hash) = Deserialize::deserialize(deserializer)?;

        Ok(Self { alg, hash })
    }
}

/// A HMAC RFC2104 is encoded as a hash.
///
/// ```cddl
/// HMac = Hash
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HMac<'a>(Hash<'a>);

impl<'a> HMac<'a> {
    /// Create an [`HMAC-SHA256`](HashAlg::HmacSha256).
    pub fn with_sha256(hash: Cow<'a, Bytes>) -> Option<Self> {
        (hash.len() == 32).then_some(Self(Hash {
            alg: HashAlg::HmacSha256,
            hash,
        }))
    }

    /// Create an [`HMAC-SHA384`](HashAlg::HmacSha384).
    pub fn with_sha384(hash: Cow<'a, Bytes>) -> Option<Self> {
        (hash.len() == 48).then_some(Self(Hash {
            alg: HashAlg::HmacSha384,
            hash,
        }))
    }

    /// Return an owned instance of the HMac.
    pub fn into_owned(self) -> HMac<'static> {
        HMac(self.0.into_owned())
    }

    /// Return the hash algorithm.
    pub fn alg(&self) -> HashAlg {
        self.0.alg()
    }
}

impl AsRef<[u8]> for HMac<'_> {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl Serialize for HMac<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HMac<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hash = Hash::deserialize(deserializer)?;

        match hash.alg() {
            HashAlg::HmacSha256 | HashAlg::HmacSha384 => Ok(HMac(hash)),
            HashAlg::Sha256 | HashAlg::Sha384 => Err(serde::de::Error::custom(
                "invalid hashtype, not a hmac type",
            )),
        }
    }
}

/// ```cddl
/// hashtype = (
///     SHA256: -16,
///     SHA384: -43,
///     HMAC-SHA256: 5,
///     HMAC-SHA384: 6
/// )
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
#[repr(i8)]
pub enum HashAlg {
    /// SHA256 digest
    Sha256 = -16,
    /// SHA384 digest
    Sha384 = -43,
    /// HMAC-SHA256 keyed MAC
    HmacSha256 = 5,
    /// HMAC-SHA384 keyed MAC
    HmacSha384 = 6,
}

impl HashAlg {
    /// Check if the algorithm is an HMAC.
    pub fn is_hmac(&self) -> bool {
        match self {
            HashAlg::HmacSha256 | HashAlg::HmacSha384 => true,
            HashAlg::Sha256 | HashAlg::Sha384 => false,
        }
    }

    /// Check if the algorithm is a plain digest.
    pub fn is_hash(&self) -> bool {
        !self.is_hmac()
    }
}

impl TryFrom<i8> for HashAlg {
    type Error = Error;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        let value = match value {
            -16 => HashAlg::Sha256,
            -43 => HashAlg::Sha384,
            5 => HashAlg::HmacSha256,
            6 => HashAlg::HmacSha384,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for HashAlg")),
        };

        Ok(value)
    }
}

impl From<HashAlg> for i8 {
    fn from(value: HashAlg) -> Self {
        value as i8
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;

    use crate::tests::from_hex;

    use super::*;

    pub(crate) fn create_hash() -> Hash<'static> {
        // Not a digest of anything in particular
        Hash::with_sha256(Cow::Owned(
            from_hex("7424985ee56213b1b0f3699408ac88eae810e6e25596213fc62f1301f96b7d80").into(),
        ))
        .unwrap()
    }

    pub(crate) fn create_hmac() -> HMac<'static> {
        HMac::with_sha256(Cow::Owned(
            from_hex("7611e85222ca622f3fddf9ef93b7385754ce5e3381e778e9149f130e485974e1").into(),
        ))
        .unwrap()
    }

    #[test]
    fn hash_roundtrip() {
        let case = create_hash();

        let mut buf = Vec::new();
        ciborium::into_writer(&case, &mut buf).unwrap();

        let res: Hash = ciborium::from_reader(buf.as_slice()).unwrap();

        assert_eq!(res, case);
    }

    #[test]
    fn hmac_roundtrip() {
        let case = create_hmac();

        let mut buf = Vec::new();
        ciborium::into_writer(&case, &mut buf).unwrap();

        let res: HMac = ciborium::from_reader(buf.as_slice()).unwrap();

        assert_eq!(res, case);
    }

    #[test]
    fn hash_as_ref() {
        let case = create_hash();

        assert_eq!(
            case.as_ref(),
            from_hex("7424985ee56213b1b0f3699408ac88eae810e6e25596213fc62f1301f96b7d80"),
        );
    }

    #[test]
    fn hash_into_owned() {
        let case = create_hash();

        let owned: Hash<'static> = case.clone().into_owned();

        assert_eq!(owned, case);
    }

    #[test]
    fn hash_alg_roundtrip() {
        let cases = [
            HashAlg::Sha256,
            HashAlg::Sha384,
            HashAlg::HmacSha256,
            HashAlg::HmacSha384,
        ];

        for case in cases {
            let mut buf = Vec::new();
            ciborium::into_writer(&case, &mut buf).unwrap();

            let res: HashAlg = ciborium::from_reader(buf.as_slice()).unwrap();

            assert_eq!(res, case);
        }
    }

    #[test]
    fn hash_alg_try_from_error() {
        let err = HashAlg::try_from(42).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn hash_alg_is_hmac_or_hash() {
        let cases = [
            (HashAlg::Sha256, true, false),
            (HashAlg::Sha384, true, false),
            (HashAlg::HmacSha256, false, true),
            (HashAlg::HmacSha384, false, true),
        ];

        for (case, is_hash, is_hmac) in cases {
            assert_eq!(case.is_hash(), is_hash);
            assert_eq!(case.is_hmac(), is_hmac);
        }
    }

    #[test]
    fn hash_create_checks_length() {
        let long =
            from_hex("1f0da65eda5eafeb7d7aaee622980693452f4e50b33eca779c85b76cf779985ef3026afa46dfa0f5b0d23959b3471179");
        let short = from_hex("7424985ee56213b1b0f3699408ac88eae810e6e25596213fc62f1301f96b7d80");

        assert_eq!(Hash::with_sha256(Cow::Owned(long.clone().into())), None);
        assert_eq!(Hash::with_sha384(Cow::Owned(short.clone().into())), None);
        assert_eq!(HMac::with_sha256(Cow::Owned(long.clone().into())), None);
        assert_eq!(HMac::with_sha384(Cow::Owned(short.clone().into())), None);

        assert!(Hash::with_sha384(Cow::Owned(long.clone().into())).is_some());
        assert!(HMac::with_sha384(Cow::Owned(long.into())).is_some());

        let hash = Hash::with_sha256(Cow::Owned(short.clone().into())).unwrap();
        assert_eq!(hash.alg(), HashAlg::Sha256);

        let hmac = HMac::with_sha256(Cow::Owned(short.into())).unwrap();
        assert_eq!(hmac.alg(), HashAlg::HmacSha256);
    }

    #[test]
    fn hash_can_deserialize_hmac() {
        let case = create_hmac();

        let mut buf = Vec::new();
        ciborium::into_writer(&case, &mut buf).unwrap();

        let res: Hash = ciborium::from_reader(buf.as_slice()).unwrap();

        assert_eq!(res.alg(), HashAlg::HmacSha256);
    }

    #[test]
    fn hmac_cannot_deserialize_hash() {
        let case = create_hash();

        let mut buf = Vec::new();
        ciborium::into_writer(&case, &mut buf).unwrap();

        ciborium::from_reader::<HMac, _>(buf.as_slice()).unwrap_err();
    }
}
