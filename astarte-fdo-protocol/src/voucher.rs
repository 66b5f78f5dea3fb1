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

//! The Ownership Voucher is a structured digital document that links the
//! Manufacturer with the Owner.
//!
//! It is formed as an append-only chain of signed public keys. Each entry
//! is signed by the previous key holder and carries the hash of the
//! previous entry, the hash of the new owner's public key and the new
//! owner's public key itself: custody passes from the signer to the key in
//! the payload. The tail entry's key is the current owner.

use std::borrow::Cow;

use coset::{AsCborValue, CoseSign1};
use serde::{Deserialize, Serialize};

use crate::cbor::CborBstr;
use crate::error::ErrorKind;
use crate::hash::{HMac, Hash};
use crate::pubkey::PublicKey;
use crate::rv::RendezvousInfo;
use crate::types::{Guid, Protver};
use crate::x509::CoseX509;
use crate::Error;

/// Ownership Voucher top level structure.
///
/// ```cddl
/// OwnershipVoucher = [
///     OVProtVer:      protver,           ;; protocol version
///     OVHeaderTag:    bstr .cbor OVHeader,
///     OVHeaderHMac:   HMac,              ;; hmac[DCHmacSecret, OVHeader]
///     OVDevCertChain: X5CHAIN / null,
///     OVEntryArray:   [ * OVEntry ]
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OwnershipVoucher<'a> {
    pub(crate) prot_ver: Protver,
    pub(crate) header: CborBstr<'a, OvHeader<'a>>,
    pub(crate) header_hmac: HMac<'a>,
    pub(crate) dev_cert_chain: Option<CoseX509<'a>>,
    pub(crate) entries: Vec<OvEntry>,
}

impl<'a> OwnershipVoucher<'a> {
    /// Assembles a voucher from its parts.
    pub fn new(
        prot_ver: Protver,
        header: CborBstr<'a, OvHeader<'a>>,
        header_hmac: HMac<'a>,
        dev_cert_chain: Option<CoseX509<'a>>,
        entries: Vec<OvEntry>,
    ) -> Self {
        Self {
            prot_ver,
            header,
            header_hmac,
            dev_cert_chain,
            entries,
        }
    }

    /// The protocol version of the voucher.
    pub fn prot_ver(&self) -> Protver {
        self.prot_ver
    }

    /// The voucher header.
    pub fn header(&self) -> &CborBstr<'a, OvHeader<'a>> {
        &self.header
    }

    /// The HMAC over the header bytes, keyed by the device secret.
    pub fn header_hmac(&self) -> &HMac<'a> {
        &self.header_hmac
    }

    /// The device certificate chain, when the device key is certified.
    pub fn dev_cert_chain(&self) -> Option<&CoseX509<'a>> {
        self.dev_cert_chain.as_ref()
    }

    /// The ownership entries, oldest first.
    pub fn entries(&self) -> &[OvEntry] {
        &self.entries
    }

    /// Number of entries in the voucher.
    pub fn num_entries(&self) -> Result<u8, Error> {
        u8::try_from(self.entries.len())
            .map_err(|_| Error::new(ErrorKind::OutOfRange, "too many voucher entries"))
    }

    /// Appends an entry to the chain.
    ///
    /// Appending is the only permitted mutation of a voucher.
    pub fn push_entry(&mut self, entry: OvEntry) {
        self.entries.push(entry);
    }
}

impl Serialize for OwnershipVoucher<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            prot_ver,
            header,
            header_hmac,
            dev_cert_chain,
            entries,
        } = self;

        (prot_ver, header, header_hmac, dev_cert_chain, entries).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OwnershipVoucher<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (prot_ver, header, header_hmac, dev_cert_chain, entries) =
            Deserialize::deserialize(deserializer)?;

        Ok(Self {
            prot_ver,
            header,
            header_hmac,
            dev_cert_chain,
            entries,
        })
    }
}

/// Ownership Voucher header, also served during TO2.
///
/// The header is fixed at DI and never changes afterwards: its hash anchors
/// the first entry of the chain.
///
/// ```cddl
/// OVHeader = [
///     OVHProtVer:         protver,
///     OVGuid:             Guid,
///     OVRVInfo:           RendezvousInfo,
///     OVDeviceInfo:       tstr,
///     OVPubKey:           PublicKey,      ;; mfg public key
///     OVDevCertChainHash: Hash / null
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OvHeader<'a> {
    /// Protocol version
    pub ovh_prot_ver: Protver,
    /// Device GUID
    pub ov_guid: Guid,
    /// RendezvousInfo for the RVServer
    pub ov_rv_info: RendezvousInfo<'a>,
    /// Device info
    pub ov_device_info: Cow<'a, str>,
    /// Manufacturer public key
    pub ov_pub_key: PublicKey<'a>,
    /// Hash of the device certificate chain
    pub ov_dev_cert_chain_hash: Option<Hash<'a>>,
}

impl Serialize for OvHeader<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            ovh_prot_ver,
            ov_guid,
            ov_rv_info,
            ov_device_info,
            ov_pub_key,
            ov_dev_cert_chain_hash,
        } = self;

        (
            ovh_prot_ver,
            ov_guid,
            ov_rv_info,
            ov_device_info,
            ov_pub_key,
            ov_dev_cert_chain_hash,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OvHeader<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (ovh_prot_ver, ov_guid, ov_rv_info, ov_device_info, ov_pub_key, ov_dev_cert_chain_hash) =
            Deserialize::deserialize(deserializer)?;

        Ok(Self {
            ovh_prot_ver,
            ov_guid,
            ov_rv_info,
            ov_device_info,
            ov_pub_key,
            ov_dev_cert_chain_hash,
        })
    }
}

const SIGN_TAG: u64 = coset::iana::CborTag::CoseSign1 as u64;

/// A single custody transfer, as a tagged COSE Sign1.
///
/// ```cddl
/// OVEntry = CoseSignature
/// $COSEPayloads /= (
///     OVEntryPayload
/// )
/// ```
///
/// The entry is signed by the previous key holder (the manufacturer for
/// entry 0).
#[derive(Debug, Clone, PartialEq)]
pub struct OvEntry {
    pub(crate) entry: CoseSign1,
}

impl OvEntry {
    /// Wraps a signed entry.
    pub fn new(entry: CoseSign1) -> Self {
        Self { entry }
    }

    /// Returns the COSE Sign1 of the entry.
    pub fn sign(&self) -> &CoseSign1 {
        &self.entry
    }

    /// Return the raw payload bytes and the decoded [`OvEntryPayload`].
    ///
    /// The raw bytes are the exact input of the next entry's previous-hash
    /// link.
    pub fn payload(&self) -> Result<(&[u8], OvEntryPayload<'static>), Error> {
        let payload = self
            .entry
            .payload
            .as_deref()
            .ok_or(Error::new(ErrorKind::Invalid, "OVEntry payload is missing"))?;

        let value: OvEntryPayload<'static> = ciborium::from_reader(payload).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode OVEntry payload");

            let _ = err;

            Error::new(ErrorKind::Decode, "the OVEntry payload")
        })?;

        Ok((payload, value))
    }

    /// Encodes the entry to the bytes covered by the next previous-hash.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();

        ciborium::into_writer(self, &mut buf)
            .map_err(|_| Error::new(ErrorKind::Encode, "the OVEntry"))?;

        Ok(buf)
    }
}

impl Serialize for OvEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let value = self
            .entry
            .clone()
            .to_cbor_value()
            .map_err(serde::ser::Error::custom)?;

        ciborium::tag::Required::<_, SIGN_TAG>(value).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OvEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value =
            ciborium::tag::Accepted::<ciborium::Value, SIGN_TAG>::deserialize(deserializer)?;

        CoseSign1::from_cbor_value(value.0)
            .map(|entry| Self { entry })
            .map_err(serde::de::Error::custom)
    }
}

/// Payload of an [`OvEntry`].
///
/// ```cddl
/// OVEntryPayload = [
///     OVEHashPrevEntry: Hash,      ;; hash of the previous entry,
///                                  ;; or of OVHeader for entry 0
///     OVEHashPubKey:    Hash,      ;; hash of OVEPubKey
///     OVEPubKey:        PublicKey  ;; the new owner key
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OvEntryPayload<'a> {
    pub(crate) prev_hash: Hash<'a>,
    pub(crate) pub_key_hash: Hash<'a>,
    pub(crate) pub_key: PublicKey<'a>,
}

impl<'a> OvEntryPayload<'a> {
    /// Creates the payload transferring custody to `pub_key`.
    pub fn new(prev_hash: Hash<'a>, pub_key_hash: Hash<'a>, pub_key: PublicKey<'a>) -> Self {
        Self {
            prev_hash,
            pub_key_hash,
            pub_key,
        }
    }

    /// Hash of the previous entry, or of the header for entry 0.
    pub fn prev_hash(&self) -> &Hash<'a> {
        &self.prev_hash
    }

    /// Hash of the new owner public key.
    pub fn pub_key_hash(&self) -> &Hash<'a> {
        &self.pub_key_hash
    }

    /// The new owner public key.
    pub fn pub_key(&self) -> &PublicKey<'a> {
        &self.pub_key
    }

    /// Consumes the payload and returns the new owner public key.
    pub fn take_pub_key(self) -> PublicKey<'a> {
        self.pub_key
    }

    /// Encode the payload to the bytes covered by the entry signature.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();

        ciborium::into_writer(self, &mut buf)
            .map_err(|_| Error::new(ErrorKind::Encode, "the OVEntry payload"))?;

        Ok(buf)
    }
}

impl Serialize for OvEntryPayload<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            prev_hash,
            pub_key_hash,
            pub_key,
        } = self;

        (prev_hash, pub_key_hash, pub_key).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OvEntryPayload<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (prev_hash, pub_key_hash, pub_key) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            prev_hash,
            pub_key_hash,
            pub_key,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use coset::{CoseSign1Builder, HeaderBuilder};
    use pretty_assertions::assert_eq;

    use crate::hash::tests::{create_hash, create_hmac};
    use crate::pubkey::tests::create_pub_key;
    use crate::rv::tests::create_rv_info;
    use crate::tests::from_hex;
    use crate::types::tests::create_guid;
    use crate::types::PROTOCOL_VERSION;
    use crate::x509::tests::create_cose_x509;

    use super::*;

    pub(crate) fn create_ov_header() -> OvHeader<'static> {
        OvHeader {
            ovh_prot_ver: PROTOCOL_VERSION,
            ov_guid: create_guid(),
            ov_rv_info: create_rv_info(),
            ov_device_info: "astarte-fdo".into(),
            ov_pub_key: create_pub_key(),
            ov_dev_cert_chain_hash: Some(create_hash()),
        }
    }

    pub(crate) fn create_ov_entry_payload() -> OvEntryPayload<'static> {
        OvEntryPayload {
            prev_hash: Hash::with_sha256(Cow::Owned(
                from_hex("9be58b34344cfaab4b798288b7adedbbe451a2cf7cacf9b0d2aecef26cc0e1d1").into(),
            ))
            .unwrap(),
            pub_key_hash: Hash::with_sha256(Cow::Owned(
                from_hex("3443c6b88aeb31f50eceb9d8acf0591fb757dcf6e50b23b75d0fb9c00fba2d65").into(),
            ))
            .unwrap(),
            pub_key: create_pub_key(),
        }
    }

    pub(crate) fn create_ov_entry(payload: &OvEntryPayload) -> OvEntry {
        let buf = payload.encode().unwrap();

        // The signature is not valid, wire shape only
        let entry = CoseSign1Builder::new()
            .protected(
                HeaderBuilder::new()
                    .algorithm(coset::iana::Algorithm::ES256)
                    .build(),
            )
            .payload(buf)
            .signature(vec![0xab; 64])
            .build();

        OvEntry { entry }
    }

    pub(crate) fn create_voucher() -> OwnershipVoucher<'static> {
        OwnershipVoucher {
            prot_ver: PROTOCOL_VERSION,
            header: CborBstr::new(create_ov_header()),
            header_hmac: create_hmac(),
            dev_cert_chain: Some(create_cose_x509()),
            entries: vec![create_ov_entry(&create_ov_entry_payload())],
        }
    }

    #[test]
    fn ownership_voucher_roundtrip() {
        let case = create_voucher();

        let mut buf = Vec::new();
        ciborium::into_writer(&case, &mut buf).unwrap();

        let mut res: OwnershipVoucher = ciborium::from_reader(buf.as_slice()).unwrap();

        // For the diff
        res.entries[0].entry.protected.original_data = None;

        assert_eq!(res, case);
    }

    #[test]
    fn ov_header_roundtrip() {
        let case = create_ov_header();

        let mut buf = Vec::new();
        ciborium::into_writer(&case, &mut buf).unwrap();

        let res: OvHeader = ciborium::from_reader(buf.as_slice()).unwrap();

        assert_eq!(res, case);
    }

    #[test]
    fn ov_entry_roundtrip() {
        let payload = create_ov_entry_payload();
        let case = create_ov_entry(&payload);

        let buf = case.encode().unwrap();

        let mut res: OvEntry = ciborium::from_reader(buf.as_slice()).unwrap();

        // For the diff
        res.entry.protected.original_data = None;

        assert_eq!(res, case);
    }

    #[test]
    fn ov_entry_payload_decode() {
        let payload = create_ov_entry_payload();
        let case = create_ov_entry(&payload);

        let (raw, value) = case.payload().unwrap();

        assert_eq!(value, payload);
        assert_eq!(raw, payload.encode().unwrap());
    }

    #[test]
    fn ov_entry_payload_getters() {
        let case = create_ov_entry_payload();

        assert_eq!(*case.prev_hash(), case.prev_hash);
        assert_eq!(*case.pub_key_hash(), case.pub_key_hash);
        assert_eq!(*case.pub_key(), case.pub_key);
        assert_eq!(case.clone().take_pub_key(), case.pub_key);
    }

    #[test]
    fn ov_entry_payload_roundtrip() {
        let case = create_ov_entry_payload();

        let buf = case.encode().unwrap();

        let res: OvEntryPayload = ciborium::from_reader(buf.as_slice()).unwrap();

        assert_eq!(res, case);
    }

    #[test]
    fn voucher_getters() {
        let case = create_voucher();

        assert_eq!(case.prot_ver(), PROTOCOL_VERSION);
        assert_eq!(case.header().ov_guid, create_guid());
        assert_eq!(*case.header_hmac(), create_hmac());
        assert!(case.dev_cert_chain().is_some());
        assert_eq!(case.entries().len(), 1);
        assert_eq!(case.num_entries().unwrap(), 1);
    }

    #[test]
    fn voucher_push_entry() {
        let mut case = create_voucher();

        case.push_entry(create_ov_entry(&create_ov_entry_payload()));

        assert_eq!(case.entries().len(), 2);
    }

    #[test]
    fn ov_entry_missing_payload() {
        let entry = OvEntry {
            entry: CoseSign1Builder::new().signature(vec![0xab; 64]).build(),
        };

        let err = entry.payload().unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }
}
