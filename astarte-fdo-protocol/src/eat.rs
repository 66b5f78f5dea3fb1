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

//! Entity Attestation Token claims used by the device signatures.
//!
//! The device proves possession of its key in TO1.ProveToRV and
//! TO2.ProveDevice with a COSE Sign1 whose payload is an EAT claim set.

use ciborium::Value;
use serde_bytes::ByteArray;

use crate::error::ErrorKind;
use crate::types::{Guid, Nonce};
use crate::Error;

/// EAT nonce claim key.
pub const EAT_NONCE: i64 = 10;

/// EAT UEID claim key.
pub const EAT_UEID: i64 = 256;

/// FDO-specific EAT claim key.
pub const EAT_FDO: i64 = -257;

/// Unprotected header label for the EUPHNonce of TO2.ProveDevice.
pub const EUPH_NONCE: i64 = 256;

/// UEID type byte for a GUID based identity (EAT-RAND).
pub const EAT_RAND: u8 = 0x01;

/// EAT claim set of a device attestation.
///
/// ```cddl
/// EATPayloadBase //= (
///     EAT-NONCE: Nonce,
///     EAT-UEID:  bstr,       ;; EAT-RAND || Guid
///     EAT-FDO:   $EATPayloads
/// )
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EatPayload {
    nonce: Nonce,
    guid: Guid,
    fdo: Option<Value>,
}

impl EatPayload {
    /// Creates the claim set for the device identified by the guid.
    pub fn new(nonce: Nonce, guid: Guid) -> Self {
        Self {
            nonce,
            guid,
            fdo: None,
        }
    }

    /// Attaches an FDO-specific claim.
    pub fn with_fdo(mut self, fdo: Value) -> Self {
        self.fdo = Some(fdo);

        self
    }

    /// The nonce claim.
    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    /// The device guid from the UEID claim.
    pub fn guid(&self) -> &Guid {
        &self.guid
    }

    /// The FDO claim, when present.
    pub fn fdo(&self) -> Option<&Value> {
        self.fdo.as_ref()
    }

    /// Encode the claim set as a CBOR map.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut ueid = Vec::with_capacity(17);
        ueid.push(EAT_RAND);
        ueid.extend_from_slice(self.guid.as_slice());

        let mut map = vec![
            (
                Value::Integer(EAT_NONCE.into()),
                Value::Bytes(self.nonce.to_vec()),
            ),
            (Value::Integer(EAT_UEID.into()), Value::Bytes(ueid)),
        ];

        if let Some(fdo) = &self.fdo {
            map.push((Value::Integer(EAT_FDO.into()), fdo.clone()));
        }

        let mut buf = Vec::new();
        ciborium::into_writer(&Value::Map(map), &mut buf).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't encode the EAT payload");

            let _ = err;

            Error::new(ErrorKind::Encode, "the EAT payload")
        })?;

        Ok(buf)
    }

    /// Decode the claim set from a CBOR map.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        let value: Value = ciborium::from_reader(buf)
            .map_err(|_| Error::new(ErrorKind::Decode, "the EAT payload"))?;

        let map = value
            .as_map()
            .ok_or(Error::new(ErrorKind::Invalid, "EAT payload is not a map"))?;

        let mut nonce = None;
        let mut guid = None;
        let mut fdo = None;

        for (key, value) in map {
            let Some(key) = key.as_integer() else {
                continue;
            };

            if key == EAT_NONCE.into() {
                let bytes = value
                    .as_bytes()
                    .ok_or(Error::new(ErrorKind::Invalid, "EAT nonce claim"))?;

                let array: [u8; 16] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::new(ErrorKind::Invalid, "EAT nonce claim length"))?;

                nonce = Some(ByteArray::from(array));
            } else if key == EAT_UEID.into() {
                let bytes = value
                    .as_bytes()
                    .ok_or(Error::new(ErrorKind::Invalid, "EAT ueid claim"))?;

                let (first, rest) = bytes
                    .split_first()
                    .filter(|(first, _)| **first == EAT_RAND)
                    .ok_or(Error::new(ErrorKind::Invalid, "EAT ueid type"))?;

                debug_assert_eq!(*first, EAT_RAND);

                let array: [u8; 16] = rest
                    .try_into()
                    .map_err(|_| Error::new(ErrorKind::Invalid, "EAT ueid length"))?;

                guid = Some(Guid::new(array));
            } else if key == EAT_FDO.into() {
                fdo = Some(value.clone());
            }
        }

        let nonce = nonce.ok_or(Error::new(ErrorKind::Invalid, "EAT nonce claim missing"))?;
        let guid = guid.ok_or(Error::new(ErrorKind::Invalid, "EAT ueid claim missing"))?;

        Ok(Self { nonce, guid, fdo })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::types::tests::{create_guid, create_nonce};

    use super::*;

    #[test]
    fn eat_payload_roundtrip() {
        let cases = [
            EatPayload::new(create_nonce(), create_guid()),
            EatPayload::new(create_nonce(), create_guid())
                .with_fdo(Value::Array(vec![Value::Bytes(vec![1, 2, 3])])),
        ];

        for case in cases {
            let buf = case.encode().unwrap();

            let res = EatPayload::decode(&buf).unwrap();

            assert_eq!(res, case);
            assert_eq!(res.nonce(), &create_nonce());
            assert_eq!(res.guid(), &create_guid());
        }
    }

    #[test]
    fn eat_payload_fdo_claim() {
        let fdo = Value::Array(vec![Value::Bytes(vec![0xaa])]);

        let case = EatPayload::new(create_nonce(), create_guid()).with_fdo(fdo.clone());

        assert_eq!(case.fdo(), Some(&fdo));

        let plain = EatPayload::new(create_nonce(), create_guid());
        assert_eq!(plain.fdo(), None);
    }

    #[test]
    fn eat_payload_decode_errors() {
        // Not a map
        let mut buf = Vec::new();
        ciborium::into_writer(&Value::Array(vec![]), &mut buf).unwrap();
        EatPayload::decode(&buf).unwrap_err();

        // Missing claims
        let mut buf = Vec::new();
        ciborium::into_writer(&Value::Map(vec![]), &mut buf).unwrap();
        EatPayload::decode(&buf).unwrap_err();

        // Wrong ueid type byte
        let mut ueid = vec![0x02];
        ueid.extend_from_slice(create_guid().as_slice());
        let map = Value::Map(vec![
            (
                Value::Integer(EAT_NONCE.into()),
                Value::Bytes(create_nonce().to_vec()),
            ),
            (Value::Integer(EAT_UEID.into()), Value::Bytes(ueid)),
        ]);
        let mut buf = Vec::new();
        ciborium::into_writer(&map, &mut buf).unwrap();
        EatPayload::decode(&buf).unwrap_err();
    }
}
