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

//! Transfer Ownership Protocol 2 (TO2) messages, Types 60 to 71.
//!
//! TO2 is the interaction between the Device and the Owner Onboarding
//! Service where the transfer of ownership actually happens: the owner
//! proves custody through the voucher, the device proves possession of its
//! key, both derive a session key, stream ServiceInfo and finally commit
//! the replacement credential.

use std::borrow::Cow;
use std::io::Write;
use std::marker::PhantomData;

use coset::iana::{EnumI64, HeaderParameter};
use coset::{CoseSign1, Header, HeaderBuilder, Label};
use serde::{Deserialize, Serialize};

use crate::cbor::CborBstr;
use crate::error::ErrorKind;
use crate::flags::CapabilityFlags;
use crate::hash::{HMac, Hash};
use crate::kex::{CipherSuite, KexSuite, XAKeyExchange};
use crate::pubkey::PublicKey;
use crate::rv::RendezvousInfo;
use crate::serviceinfo::ServiceInfo;
use crate::sign_info::{EASigInfo, EBSigInfo};
use crate::types::{Guid, Msgtype, NonceTo2ProveDv, NonceTo2ProveOv, NonceTo2SetupDv};
use crate::voucher::{OvEntry, OvHeader};
use crate::Error;

use super::{ClientMessage, InitialMessage, Message};

/// Hello Device, Type 60.
///
/// From Device to Owner Onboarding Service, first message of TO2.
///
/// ```cddl
/// TO2.HelloDevice = [
///     maxDeviceMessageSize: uint16,
///     Guid,
///     NonceTO2ProveOV,
///     kexSuiteName:    tstr,
///     cipherSuiteName: CipherSuite,
///     eASigInfo,
///     ? CapabilityFlags
/// ]
/// ```
///
/// A `maxDeviceMessageSize` of zero indicates the default message size.
#[derive(Debug, Clone, PartialEq)]
pub struct HelloDevice<'a> {
    pub(crate) max_device_message_size: u16,
    pub(crate) guid: Guid,
    pub(crate) nonce: NonceTo2ProveOv,
    pub(crate) kex_suite_name: Cow<'a, str>,
    pub(crate) cipher_suite: CipherSuite,
    pub(crate) ea_sig_info: EASigInfo<'a>,
    pub(crate) flags: Option<CapabilityFlags<'a>>,
}

impl<'a> HelloDevice<'a> {
    /// Creates the message.
    pub fn new(
        max_device_message_size: u16,
        guid: Guid,
        nonce: NonceTo2ProveOv,
        kex_suite: KexSuite,
        cipher_suite: CipherSuite,
        ea_sig_info: EASigInfo<'a>,
        flags: Option<CapabilityFlags<'a>>,
    ) -> Self {
        Self {
            max_device_message_size,
            guid,
            nonce,
            kex_suite_name: kex_suite.as_str().into(),
            cipher_suite,
            ea_sig_info,
            flags,
        }
    }

    /// The maximum message size the device will accept, zero for default.
    pub fn max_device_message_size(&self) -> u16 {
        self.max_device_message_size
    }

    /// The device guid.
    pub fn guid(&self) -> Guid {
        self.guid
    }

    /// The nonce the owner must countersign in TO2.ProveOVHdr.
    pub fn nonce(&self) -> NonceTo2ProveOv {
        self.nonce
    }

    /// The proposed key exchange suite.
    pub fn kex_suite(&self) -> Result<KexSuite, Error> {
        self.kex_suite_name.parse()
    }

    /// The proposed cipher suite.
    pub fn cipher_suite(&self) -> CipherSuite {
        self.cipher_suite
    }

    /// The device attestation signature info.
    pub fn ea_sig_info(&self) -> &EASigInfo<'a> {
        &self.ea_sig_info
    }

    /// The declared capabilities.
    pub fn flags(&self) -> Option<&CapabilityFlags<'a>> {
        self.flags.as_ref()
    }
}

impl Serialize for HelloDevice<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            max_device_message_size,
            guid,
            nonce,
            kex_suite_name,
            cipher_suite,
            ea_sig_info,
            flags,
        } = self;

        match flags {
            Some(flags) => (
                max_device_message_size,
                guid,
                nonce,
                kex_suite_name,
                cipher_suite,
                ea_sig_info,
                flags,
            )
                .serialize(serializer),
            None => (
                max_device_message_size,
                guid,
                nonce,
                kex_suite_name,
                cipher_suite,
                ea_sig_info,
            )
                .serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for HelloDevice<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Default)]
        struct HelloDeviceVisitor<'a> {
            _marker: PhantomData<HelloDevice<'a>>,
        }

        impl<'de, 'a> serde::de::Visitor<'de> for HelloDeviceVisitor<'a> {
            type Value = HelloDevice<'a>;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(formatter, "expecting a TO2.HelloDevice CBOR sequence")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let exp = &"should be a sequence of at least 6 elements";

                let max_device_message_size = seq
                    .next_element::<u16>()?
                    .ok_or_else(|| serde::de::Error::invalid_length(0, exp))?;
                let guid = seq
                    .next_element::<Guid>()?
                    .ok_or_else(|| serde::de::Error::invalid_length(1, exp))?;
                let nonce = seq
                    .next_element::<NonceTo2ProveOv>()?
                    .ok_or_else(|| serde::de::Error::invalid_length(2, exp))?;
                let kex_suite_name = seq
                    .next_element::<Cow<'_, str>>()?
                    .ok_or_else(|| serde::de::Error::invalid_length(3, exp))?;
                let cipher_suite = seq
                    .next_element::<CipherSuite>()?
                    .ok_or_else(|| serde::de::Error::invalid_length(4, exp))?;
                let ea_sig_info = seq
                    .next_element::<EASigInfo>()?
                    .ok_or_else(|| serde::de::Error::invalid_length(5, exp))?;
                let flags = seq.next_element::<CapabilityFlags>()?;

                Ok(HelloDevice {
                    max_device_message_size,
                    guid,
                    nonce,
                    kex_suite_name,
                    cipher_suite,
                    ea_sig_info,
                    flags,
                })
            }
        }

        deserializer.deserialize_seq(HelloDeviceVisitor::default())
    }
}

impl Message for HelloDevice<'_> {
    const MSG_TYPE: Msgtype = 60;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_cbor(buf, "the TO2.HelloDevice")
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_cbor(self, writer, "the TO2.HelloDevice")
    }
}

impl ClientMessage for HelloDevice<'_> {
    type Response<'a> = ProveOvHdr;
}

impl InitialMessage for HelloDevice<'_> {}

/// Prove Ownership Voucher Header, Type 61.
///
/// From Owner Onboarding Service to Device. The owner returns the voucher
/// header, a fresh NonceTO2ProveDv, the key exchange first step and the
/// entry count, all signed with the current owner key.
///
/// ```cddl
/// TO2.ProveOVHdr = CoseSignature
/// TO2ProveOVHdrUnprotectedHeaders = (
///     CUPHNonce:       NonceTO2ProveDv,
///     CUPHOwnerPubKey: PublicKey
/// )
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProveOvHdr {
    pub(crate) sign: CoseSign1,
}

impl ProveOvHdr {
    /// Wraps the signed header.
    pub fn new(sign: CoseSign1) -> Self {
        Self { sign }
    }

    /// Returns the signed COSE.
    pub fn sign(&self) -> &CoseSign1 {
        &self.sign
    }

    /// Returns the decoded COSE payload.
    pub fn payload(&self) -> Result<ProveOvHdrPayload<'static>, Error> {
        let payload = self.sign.payload.as_deref().ok_or(Error::new(
            ErrorKind::Invalid,
            "the TO2.ProveOVHdr payload is missing",
        ))?;

        super::decode_cbor(payload, "the TO2.ProveOVHdr payload")
    }

    /// Returns the decoded unprotected header values.
    pub fn header(&self) -> Result<ProveOvHdrUnprotected<'static>, Error> {
        let pubkey = find_unprotected(&self.sign, HeaderParameter::CuphOwnerPubKey).ok_or(
            Error::new(ErrorKind::Invalid, "the CUPHOwnerPubKey is missing"),
        )?;

        let pubkey = pubkey.deserialized().map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode the CUPHOwnerPubKey");

            let _ = err;

            Error::new(ErrorKind::Decode, "the CUPHOwnerPubKey")
        })?;

        let nonce = find_unprotected(&self.sign, HeaderParameter::CuphNonce).ok_or(Error::new(
            ErrorKind::Invalid,
            "the CUPHNonce is missing",
        ))?;

        let nonce = nonce.deserialized().map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode the CUPHNonce");

            let _ = err;

            Error::new(ErrorKind::Decode, "the CUPHNonce")
        })?;

        Ok(ProveOvHdrUnprotected {
            cuph_nonce: nonce,
            cuph_owner_pubkey: pubkey,
        })
    }

    /// Builds the unprotected header for the owner side.
    pub fn unprotected_header(
        nonce: NonceTo2ProveDv,
        owner_pubkey: &PublicKey<'_>,
    ) -> Result<Header, Error> {
        let pubkey = ciborium::Value::serialized(owner_pubkey)
            .map_err(|_| Error::new(ErrorKind::Encode, "the CUPHOwnerPubKey"))?;
        let nonce = ciborium::Value::serialized(&nonce)
            .map_err(|_| Error::new(ErrorKind::Encode, "the CUPHNonce"))?;

        Ok(HeaderBuilder::new()
            .value(HeaderParameter::CuphOwnerPubKey.to_i64(), pubkey)
            .value(HeaderParameter::CuphNonce.to_i64(), nonce)
            .build())
    }
}

fn find_unprotected(sign: &CoseSign1, param: HeaderParameter) -> Option<&ciborium::Value> {
    let param = Label::Int(param.to_i64());

    sign.unprotected
        .rest
        .iter()
        .find_map(|(label, value)| (*label == param).then_some(value))
}

impl Message for ProveOvHdr {
    const MSG_TYPE: Msgtype = 61;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        let sign = super::decode_tagged_sign1(buf, "the TO2.ProveOVHdr")?;

        if sign.payload.is_none() {
            return Err(Error::new(
                ErrorKind::Invalid,
                "the TO2.ProveOVHdr payload is missing",
            ));
        }

        Ok(Self { sign })
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_tagged_sign1(&self.sign, writer, "the TO2.ProveOVHdr")
    }
}

/// Payload of [`ProveOvHdr`].
///
/// ```cddl
/// TO2ProveOVHdrPayload = [
///     OVHeader: bstr .cbor OVHeader,
///     NumOVEntries: uint8,
///     HMac,                  ;; Ownership Voucher "hmac" of hdr
///     NonceTO2ProveOV,       ;; nonce from TO2.HelloDevice
///     eBSigInfo,
///     xAKeyExchange,
///     helloDeviceHash: Hash, ;; hash of TO2.HelloDevice
///     maxOwnerMessageSize: uint16
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProveOvHdrPayload<'a> {
    /// Ownership Voucher header
    pub ov_header: CborBstr<'a, OvHeader<'a>>,
    /// Number of ownership voucher entries
    pub num_ov_entries: u8,
    /// Ownership Voucher "hmac" of hdr
    pub hmac: HMac<'a>,
    /// Nonce from TO2.HelloDevice
    pub nonce_to2_prove_ov: NonceTo2ProveOv,
    /// Device attestation signature info
    pub eb_sig_info: EBSigInfo<'a>,
    /// Key exchange first step
    pub xa_key_exchange: XAKeyExchange<'a>,
    /// Hash of the TO2.HelloDevice message
    pub hello_device_hash: Hash<'a>,
    /// Max owner message size
    pub max_owner_message_size: u16,
}

impl Serialize for ProveOvHdrPayload<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            ov_header,
            num_ov_entries,
            hmac,
            nonce_to2_prove_ov,
            eb_sig_info,
            xa_key_exchange,
            hello_device_hash,
            max_owner_message_size,
        } = self;

        (
            ov_header,
            num_ov_entries,
            hmac,
            nonce_to2_prove_ov,
            eb_sig_info,
            xa_key_exchange,
            hello_device_hash,
            max_owner_message_size,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ProveOvHdrPayload<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (
            ov_header,
            num_ov_entries,
            hmac,
            nonce_to2_prove_ov,
            eb_sig_info,
            xa_key_exchange,
            hello_device_hash,
            max_owner_message_size,
        ) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            ov_header,
            num_ov_entries,
            hmac,
            nonce_to2_prove_ov,
            eb_sig_info,
            xa_key_exchange,
            hello_device_hash,
            max_owner_message_size,
        })
    }
}

impl ProveOvHdrPayload<'_> {
    /// Encode the payload to the bytes covered by the owner signature.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();

        super::encode_cbor(self, &mut buf, "the TO2.ProveOVHdr payload")?;

        Ok(buf)
    }
}

/// Unprotected header values of [`ProveOvHdr`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProveOvHdrUnprotected<'a> {
    pub(crate) cuph_nonce: NonceTo2ProveDv,
    pub(crate) cuph_owner_pubkey: PublicKey<'a>,
}

impl<'a> ProveOvHdrUnprotected<'a> {
    /// The owner public key, as a convenience to the device.
    pub fn pubkey(&self) -> &PublicKey<'a> {
        &self.cuph_owner_pubkey
    }

    /// The nonce used below in TO2.ProveDevice and TO2.Done.
    pub fn nonce(&self) -> NonceTo2ProveDv {
        self.cuph_nonce
    }
}

/// Get OV Next Entry, Type 62.
///
/// From Device to Owner Onboarding Service.
///
/// ```cddl
/// TO2.GetOVNextEntry = [
///     OVEntryNum: uint8
/// ]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOvNextEntry {
    /// Requested entry index.
    pub entry_num: u8,
}

impl GetOvNextEntry {
    /// Creates the message.
    pub fn new(entry_num: u8) -> Self {
        Self { entry_num }
    }
}

impl Serialize for GetOvNextEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self { entry_num } = self;

        (entry_num,).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for GetOvNextEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (entry_num,) = Deserialize::deserialize(deserializer)?;

        Ok(Self { entry_num })
    }
}

impl Message for GetOvNextEntry {
    const MSG_TYPE: Msgtype = 62;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_cbor(buf, "the TO2.GetOVNextEntry")
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_cbor(self, writer, "the TO2.GetOVNextEntry")
    }
}

impl ClientMessage for GetOvNextEntry {
    type Response<'a> = OvNextEntry;
}

/// OV Next Entry, Type 63.
///
/// From Owner Onboarding Service to Device.
///
/// ```cddl
/// TO2.OVNextEntry = [
///     OVEntryNum: uint8,
///     OVEntry
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OvNextEntry {
    pub(crate) entry_num: u8,
    pub(crate) entry: OvEntry,
}

impl OvNextEntry {
    /// Creates the message.
    pub fn new(entry_num: u8, entry: OvEntry) -> Self {
        Self { entry_num, entry }
    }

    /// The entry index.
    pub fn num(&self) -> u8 {
        self.entry_num
    }

    /// The voucher entry.
    pub fn entry(&self) -> &OvEntry {
        &self.entry
    }

    /// Consumes the message and returns the entry.
    pub fn take_entry(self) -> OvEntry {
        self.entry
    }
}

impl Serialize for OvNextEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self { entry_num, entry } = self;

        (entry_num, entry).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OvNextEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (entry_num, entry) = Deserialize::deserialize(deserializer)?;

        Ok(Self { entry_num, entry })
    }
}

impl Message for OvNextEntry {
    const MSG_TYPE: Msgtype = 63;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_cbor(buf, "the TO2.OVNextEntry")
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_cbor(self, writer, "the TO2.OVNextEntry")
    }
}

/// Prove Device, Type 64.
///
/// From Device to Owner Onboarding Service: an EAT signed by the device
/// key. The nonce claim is the NonceTO2ProveDv from TO2.ProveOVHdr, the
/// FDO claim carries the xBKeyExchange and the unprotected header carries
/// the fresh NonceTO2SetupDv.
///
/// ```cddl
/// TO2.ProveDevice = EAToken
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProveDevice {
    pub(crate) token: CoseSign1,
}

impl ProveDevice {
    /// Wraps the signed token.
    pub fn new(token: CoseSign1) -> Self {
        Self { token }
    }

    /// The signed EAT.
    pub fn token(&self) -> &CoseSign1 {
        &self.token
    }

    /// The NonceTO2SetupDv from the unprotected header.
    pub fn setup_dv_nonce(&self) -> Result<NonceTo2SetupDv, Error> {
        let label = Label::Int(crate::eat::EUPH_NONCE);

        let nonce = self
            .token
            .unprotected
            .rest
            .iter()
            .find_map(|(l, value)| (*l == label).then_some(value))
            .ok_or(Error::new(ErrorKind::Invalid, "the EUPHNonce is missing"))?;

        nonce
            .deserialized()
            .map_err(|_| Error::new(ErrorKind::Decode, "the EUPHNonce"))
    }
}

impl Message for ProveDevice {
    const MSG_TYPE: Msgtype = 64;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_tagged_sign1(buf, "the TO2.ProveDevice").map(Self::new)
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_tagged_sign1(&self.token, writer, "the TO2.ProveDevice")
    }
}

impl ClientMessage for ProveDevice {
    type Response<'a> = SetupDevice;
}

/// Setup Device, Type 65.
///
/// From Owner Onboarding Service to Device, encrypted under the session
/// key. Carries the replacement credential values, signed by the owner2
/// key (the owner of the next incarnation).
///
/// ```cddl
/// TO2.SetupDevice = CoseSignature
/// TO2SetupDevicePayload = [
///     RendezvousInfo, ;; RendezvousInfo replacement
///     Guid,           ;; GUID replacement
///     NonceTO2SetupDv,
///     Owner2Key: PublicKey
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SetupDevice {
    pub(crate) sign: CoseSign1,
}

impl SetupDevice {
    /// Wraps the signed message.
    pub fn new(sign: CoseSign1) -> Self {
        Self { sign }
    }

    /// Returns the signed COSE.
    pub fn sign(&self) -> &CoseSign1 {
        &self.sign
    }

    /// Returns the decoded payload.
    pub fn payload(&self) -> Result<SetupDevicePayload<'static>, Error> {
        let payload = self.sign.payload.as_deref().ok_or(Error::new(
            ErrorKind::Invalid,
            "the TO2.SetupDevice payload is missing",
        ))?;

        super::decode_cbor(payload, "the TO2.SetupDevice payload")
    }
}

impl Message for SetupDevice {
    const MSG_TYPE: Msgtype = 65;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_tagged_sign1(buf, "the TO2.SetupDevice").map(Self::new)
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_tagged_sign1(&self.sign, writer, "the TO2.SetupDevice")
    }
}

/// Payload of [`SetupDevice`].
#[derive(Debug, Clone, PartialEq)]
pub struct SetupDevicePayload<'a> {
    /// Replacement rendezvous instructions.
    pub rv_info: RendezvousInfo<'a>,
    /// Replacement guid for the next incarnation.
    pub guid: Guid,
    /// Nonce from TO2.ProveDevice.
    pub nonce_setup_dv: NonceTo2SetupDv,
    /// The owner key of the next incarnation.
    pub owner2_key: PublicKey<'a>,
}

impl SetupDevicePayload<'_> {
    /// Encode the payload to the bytes covered by the owner2 signature.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();

        super::encode_cbor(self, &mut buf, "the TO2.SetupDevice payload")?;

        Ok(buf)
    }
}

impl Serialize for SetupDevicePayload<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            rv_info,
            guid,
            nonce_setup_dv,
            owner2_key,
        } = self;

        (rv_info, guid, nonce_setup_dv, owner2_key).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SetupDevicePayload<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (rv_info, guid, nonce_setup_dv, owner2_key) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            rv_info,
            guid,
            nonce_setup_dv,
            owner2_key,
        })
    }
}

/// Device Service Info Ready, Type 66.
///
/// From Device to Owner Onboarding Service, first encrypted device
/// message. Carries the replacement header HMAC (or null when credential
/// reuse is requested) and the maximum service info size the device will
/// accept.
///
/// ```cddl
/// TO2.DeviceServiceInfoReady = [
///     ReplacementHMac:            HMac / null,
///     maxOwnerServiceInfoSz:      uint16 / null
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceServiceInfoReady<'a> {
    pub(crate) replacement_hmac: Option<HMac<'a>>,
    pub(crate) max_owner_service_info_size: Option<u16>,
}

impl<'a> DeviceServiceInfoReady<'a> {
    /// Creates the message.
    pub fn new(replacement_hmac: Option<HMac<'a>>, max_owner_service_info_size: Option<u16>) -> Self {
        Self {
            replacement_hmac,
            max_owner_service_info_size,
        }
    }

    /// The HMAC over the replacement header, none for credential reuse.
    pub fn replacement_hmac(&self) -> Option<&HMac<'a>> {
        self.replacement_hmac.as_ref()
    }

    /// The device receive MTU, none for the default.
    pub fn max_owner_service_info_size(&self) -> Option<u16> {
        self.max_owner_service_info_size
    }
}

impl Serialize for DeviceServiceInfoReady<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            replacement_hmac,
            max_owner_service_info_size,
        } = self;

        (replacement_hmac, max_owner_service_info_size).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DeviceServiceInfoReady<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (replacement_hmac, max_owner_service_info_size) =
            Deserialize::deserialize(deserializer)?;

        Ok(Self {
            replacement_hmac,
            max_owner_service_info_size,
        })
    }
}

impl Message for DeviceServiceInfoReady<'_> {
    const MSG_TYPE: Msgtype = 66;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_cbor(buf, "the TO2.DeviceServiceInfoReady")
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_cbor(self, writer, "the TO2.DeviceServiceInfoReady")
    }
}

impl ClientMessage for DeviceServiceInfoReady<'_> {
    type Response<'a> = OwnerServiceInfoReady;
}

/// Owner Service Info Ready, Type 67.
///
/// From Owner Onboarding Service to Device.
///
/// ```cddl
/// TO2.OwnerServiceInfoReady = [
///     maxDeviceServiceInfoSz: uint16 / null
/// ]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerServiceInfoReady {
    pub(crate) max_device_service_info_size: Option<u16>,
}

impl OwnerServiceInfoReady {
    /// Creates the message.
    pub fn new(max_device_service_info_size: Option<u16>) -> Self {
        Self {
            max_device_service_info_size,
        }
    }

    /// The owner receive MTU, none for the default.
    pub fn max_device_service_info_size(&self) -> Option<u16> {
        self.max_device_service_info_size
    }
}

impl Serialize for OwnerServiceInfoReady {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            max_device_service_info_size,
        } = self;

        (max_device_service_info_size,).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OwnerServiceInfoReady {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (max_device_service_info_size,) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            max_device_service_info_size,
        })
    }
}

impl Message for OwnerServiceInfoReady {
    const MSG_TYPE: Msgtype = 67;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_cbor(buf, "the TO2.OwnerServiceInfoReady")
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_cbor(self, writer, "the TO2.OwnerServiceInfoReady")
    }
}

/// Device Service Info, Type 68.
///
/// From Device to Owner Onboarding Service, encrypted.
///
/// ```cddl
/// TO2.DeviceServiceInfo = [
///     IsMoreServiceInfo: bool,
///     ServiceInfo
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceServiceInfo<'a> {
    /// The device has more service info to send.
    pub is_more: bool,
    /// The key-value chunks of this turn.
    pub service_info: ServiceInfo<'a>,
}

impl<'a> DeviceServiceInfo<'a> {
    /// Creates the message.
    pub fn new(is_more: bool, service_info: ServiceInfo<'a>) -> Self {
        Self {
            is_more,
            service_info,
        }
    }
}

impl Serialize for DeviceServiceInfo<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            is_more,
            service_info,
        } = self;

        (is_more, service_info).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DeviceServiceInfo<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (is_more, service_info) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            is_more,
            service_info,
        })
    }
}

impl Message for DeviceServiceInfo<'_> {
    const MSG_TYPE: Msgtype = 68;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_cbor(buf, "the TO2.DeviceServiceInfo")
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_cbor(self, writer, "the TO2.DeviceServiceInfo")
    }
}

impl ClientMessage for DeviceServiceInfo<'_> {
    type Response<'a> = OwnerServiceInfo<'a>;
}

/// Owner Service Info, Type 69.
///
/// From Owner Onboarding Service to Device, encrypted.
///
/// ```cddl
/// TO2.OwnerServiceInfo = [
///     IsMoreServiceInfo: bool,
///     IsDone:            bool,
///     ServiceInfo
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerServiceInfo<'a> {
    /// The owner has more service info to send this round.
    pub is_more: bool,
    /// The owner has nothing further to contribute.
    pub is_done: bool,
    /// The key-value chunks of this turn.
    pub service_info: ServiceInfo<'a>,
}

impl<'a> OwnerServiceInfo<'a> {
    /// Creates the message.
    pub fn new(is_more: bool, is_done: bool, service_info: ServiceInfo<'a>) -> Self {
        Self {
            is_more,
            is_done,
            service_info,
        }
    }
}

impl Serialize for OwnerServiceInfo<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            is_more,
            is_done,
            service_info,
        } = self;

        (is_more, is_done, service_info).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OwnerServiceInfo<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (is_more, is_done, service_info) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            is_more,
            is_done,
            service_info,
        })
    }
}

impl Message for OwnerServiceInfo<'_> {
    const MSG_TYPE: Msgtype = 69;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_cbor(buf, "the TO2.OwnerServiceInfo")
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_cbor(self, writer, "the TO2.OwnerServiceInfo")
    }
}

/// Done, Type 70.
///
/// From Device to Owner Onboarding Service, encrypted. Echoes the
/// NonceTO2ProveDv proving the session key was alive at the end.
///
/// ```cddl
/// TO2.Done = [
///     NonceTO2ProveDv
/// ]
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Done {
    /// Nonce from TO2.ProveOVHdr.
    pub nonce: NonceTo2ProveDv,
}

impl Done {
    /// Creates the message.
    pub fn new(nonce: NonceTo2ProveDv) -> Self {
        Self { nonce }
    }
}

impl Serialize for Done {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self { nonce } = self;

        (nonce,).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Done {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (nonce,) = Deserialize::deserialize(deserializer)?;

        Ok(Self { nonce })
    }
}

impl Message for Done {
    const MSG_TYPE: Msgtype = 70;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_cbor(buf, "the TO2.Done")
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_cbor(self, writer, "the TO2.Done")
    }
}

impl ClientMessage for Done {
    type Response<'a> = Done2;
}

/// Done 2, Type 71.
///
/// From Owner Onboarding Service to Device, encrypted. Echoes the
/// NonceTO2SetupDv; the device commits the new credential on match.
///
/// ```cddl
/// TO2.Done2 = [
///     NonceTO2SetupDv
/// ]
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Done2 {
    /// Nonce from TO2.ProveDevice.
    pub nonce: NonceTo2SetupDv,
}

impl Done2 {
    /// Creates the message.
    pub fn new(nonce: NonceTo2SetupDv) -> Self {
        Self { nonce }
    }
}

impl Serialize for Done2 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self { nonce } = self;

        (nonce,).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Done2 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (nonce,) = Deserialize::deserialize(deserializer)?;

        Ok(Self { nonce })
    }
}

impl Message for Done2 {
    const MSG_TYPE: Msgtype = 71;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_cbor(buf, "the TO2.Done2")
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_cbor(self, writer, "the TO2.Done2")
    }
}

#[cfg(test)]
mod tests {
    use coset::CoseSign1Builder;
    use pretty_assertions::assert_eq;

    use crate::hash::tests::{create_hash, create_hmac};
    use crate::kex::tests::p256_point;
    use crate::kex::EcdhParams;
    use crate::pubkey::tests::create_pub_key;
    use crate::rv::tests::create_rv_info;
    use crate::serviceinfo::ServiceInfoKv;
    use crate::sign_info::{DeviceSgType, SigInfo};
    use crate::types::tests::{create_guid, create_nonce};
    use crate::voucher::tests::{create_ov_entry, create_ov_entry_payload, create_ov_header};

    use super::*;

    fn create_xa() -> XAKeyExchange<'static> {
        let (x, y) = p256_point();
        let params = EcdhParams::with_p256(&x, &y, &[0xde, 0xad, 0xbe, 0xef]);

        XAKeyExchange::create(params).unwrap()
    }

    #[test]
    fn hello_device_roundtrip() {
        let cases = [
            HelloDevice::new(
                1400,
                create_guid(),
                NonceTo2ProveOv(create_nonce()),
                KexSuite::Ecdh256,
                CipherSuite::A128Gcm,
                EASigInfo(SigInfo::new(DeviceSgType::StSecP256R1)),
                None,
            ),
            HelloDevice::new(
                0,
                create_guid(),
                NonceTo2ProveOv(create_nonce()),
                KexSuite::Ecdh384,
                CipherSuite::A256Gcm,
                EASigInfo(SigInfo::new(DeviceSgType::StSecP384R1)),
                Some(CapabilityFlags::with_delegate_support()),
            ),
        ];

        for hello in cases {
            let buf = hello.encode_vec().unwrap();

            let res = HelloDevice::decode(&buf).unwrap();

            assert_eq!(res, hello);
        }
    }

    #[test]
    fn hello_device_getters() {
        let hello = HelloDevice::new(
            1400,
            create_guid(),
            NonceTo2ProveOv(create_nonce()),
            KexSuite::Ecdh256,
            CipherSuite::A128Gcm,
            EASigInfo(SigInfo::new(DeviceSgType::StSecP256R1)),
            None,
        );

        assert_eq!(hello.max_device_message_size(), 1400);
        assert_eq!(hello.guid(), create_guid());
        assert_eq!(hello.nonce(), NonceTo2ProveOv(create_nonce()));
        assert_eq!(hello.kex_suite().unwrap(), KexSuite::Ecdh256);
        assert_eq!(hello.cipher_suite(), CipherSuite::A128Gcm);
        assert!(hello.flags().is_none());
    }

    fn create_prove_ov_hdr_payload() -> ProveOvHdrPayload<'static> {
        ProveOvHdrPayload {
            ov_header: CborBstr::new(create_ov_header()),
            num_ov_entries: 2,
            hmac: create_hmac(),
            nonce_to2_prove_ov: NonceTo2ProveOv(create_nonce()),
            eb_sig_info: EBSigInfo(SigInfo::new(DeviceSgType::StSecP256R1)),
            xa_key_exchange: create_xa(),
            hello_device_hash: create_hash(),
            max_owner_message_size: 1400,
        }
    }

    #[test]
    fn prove_ov_hdr_roundtrip() {
        let payload = create_prove_ov_hdr_payload();

        let unprotected = ProveOvHdr::unprotected_header(
            NonceTo2ProveDv(create_nonce()),
            &create_pub_key(),
        )
        .unwrap();

        let sign = CoseSign1Builder::new()
            .protected(
                coset::HeaderBuilder::new()
                    .algorithm(coset::iana::Algorithm::ES256)
                    .build(),
            )
            .unprotected(unprotected)
            .payload(payload.encode().unwrap())
            .signature(vec![0xab; 64])
            .build();

        let msg = ProveOvHdr::new(sign);

        let buf = msg.encode_vec().unwrap();

        let res = ProveOvHdr::decode(&buf).unwrap();

        assert_eq!(res.payload().unwrap(), payload);

        let hdr = res.header().unwrap();
        assert_eq!(hdr.nonce(), NonceTo2ProveDv(create_nonce()));
        assert_eq!(*hdr.pubkey(), create_pub_key());
    }

    #[test]
    fn prove_ov_hdr_missing_payload() {
        let sign = CoseSign1Builder::new().signature(vec![0xab; 64]).build();

        let buf = ProveOvHdr::new(sign).encode_vec().unwrap();

        let err = ProveOvHdr::decode(&buf).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn get_ov_next_entry_roundtrip() {
        let msg = GetOvNextEntry::new(1);

        let buf = msg.encode_vec().unwrap();

        let res = GetOvNextEntry::decode(&buf).unwrap();

        assert_eq!(res, msg);
    }

    #[test]
    fn ov_next_entry_roundtrip() {
        let entry = create_ov_entry(&create_ov_entry_payload());

        let msg = OvNextEntry::new(0, entry.clone());

        let buf = msg.encode_vec().unwrap();

        let mut res = OvNextEntry::decode(&buf).unwrap();
        res.entry.entry.protected.original_data = None;

        assert_eq!(res, msg);
        assert_eq!(res.num(), 0);
        assert_eq!(res.entry(), &entry);
        assert_eq!(res.take_entry(), entry);
    }

    #[test]
    fn prove_device_setup_nonce() {
        let nonce = NonceTo2SetupDv(create_nonce());

        let unprotected = HeaderBuilder::new()
            .value(
                crate::eat::EUPH_NONCE,
                ciborium::Value::serialized(&nonce).unwrap(),
            )
            .build();

        let token = CoseSign1Builder::new()
            .unprotected(unprotected)
            .payload(vec![0xa0])
            .signature(vec![0xab; 64])
            .build();

        let msg = ProveDevice::new(token);

        let buf = msg.encode_vec().unwrap();
        let res = ProveDevice::decode(&buf).unwrap();

        assert_eq!(res.setup_dv_nonce().unwrap(), nonce);
    }

    #[test]
    fn setup_device_roundtrip() {
        let payload = SetupDevicePayload {
            rv_info: create_rv_info(),
            guid: create_guid(),
            nonce_setup_dv: NonceTo2SetupDv(create_nonce()),
            owner2_key: create_pub_key(),
        };

        let sign = CoseSign1Builder::new()
            .payload(payload.encode().unwrap())
            .signature(vec![0xab; 64])
            .build();

        let msg = SetupDevice::new(sign);

        let buf = msg.encode_vec().unwrap();
        let res = SetupDevice::decode(&buf).unwrap();

        assert_eq!(res.payload().unwrap(), payload);
    }

    #[test]
    fn device_service_info_ready_roundtrip() {
        let cases = [
            DeviceServiceInfoReady::new(Some(create_hmac()), Some(1300)),
            DeviceServiceInfoReady::new(None, None),
        ];

        for msg in cases {
            let buf = msg.encode_vec().unwrap();

            let res = DeviceServiceInfoReady::decode(&buf).unwrap();

            assert_eq!(res, msg);
        }
    }

    #[test]
    fn owner_service_info_ready_roundtrip() {
        let cases = [
            OwnerServiceInfoReady::new(Some(1200)),
            OwnerServiceInfoReady::new(None),
        ];

        for msg in cases {
            let buf = msg.encode_vec().unwrap();

            let res = OwnerServiceInfoReady::decode(&buf).unwrap();

            assert_eq!(res, msg);
        }
    }

    #[test]
    fn service_info_messages_roundtrip() {
        let info = vec![ServiceInfoKv::encode("devmod:os".to_string(), &"Linux").unwrap()];

        let device = DeviceServiceInfo::new(true, info.clone());
        let buf = device.encode_vec().unwrap();
        let res = DeviceServiceInfo::decode(&buf).unwrap();
        assert_eq!(res, device);

        let owner = OwnerServiceInfo::new(false, true, info);
        let buf = owner.encode_vec().unwrap();
        let res = OwnerServiceInfo::decode(&buf).unwrap();
        assert_eq!(res, owner);
    }

    #[test]
    fn done_messages_roundtrip() {
        let done = Done::new(NonceTo2ProveDv(create_nonce()));
        let buf = done.encode_vec().unwrap();
        let res = Done::decode(&buf).unwrap();
        assert_eq!(res, done);

        let done2 = Done2::new(NonceTo2SetupDv(create_nonce()));
        let buf = done2.encode_vec().unwrap();
        let res = Done2::decode(&buf).unwrap();
        assert_eq!(res, done2);
    }
}
