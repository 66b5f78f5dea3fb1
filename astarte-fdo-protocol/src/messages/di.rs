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

//! Device Initialize Protocol (DI) messages, Types 10 to 13.
//!
//! The device sends its manufacturing info (including a CSR for the device
//! key); the manufacturer answers with a voucher header bound to a freshly
//! chosen GUID; the device returns its HMAC over the header, binding its
//! secret to the voucher.

use std::borrow::Cow;
use std::io::Write;

use serde::{Deserialize, Serialize};
use serde_bytes::Bytes;

use crate::cbor::CborBstr;
use crate::hash::HMac;
use crate::pubkey::{KeyEncoding, KeyType};
use crate::types::Msgtype;
use crate::voucher::OvHeader;
use crate::Error;

use super::{ClientMessage, InitialMessage, Message};

/// Manufacturing info sent by the device.
///
/// ```cddl
/// DeviceMfgInfo = [
///     pkType,
///     pkEnc,
///     serialNo:   tstr,
///     deviceInfo: tstr,
///     csr:        bstr  ;; CSR for the device key
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceMfgInfo<'a> {
    pub(crate) key_type: KeyType,
    pub(crate) key_enc: KeyEncoding,
    pub(crate) serial_no: Cow<'a, str>,
    pub(crate) device_info: Cow<'a, str>,
    pub(crate) csr: Cow<'a, Bytes>,
}

impl<'a> DeviceMfgInfo<'a> {
    /// Creates the manufacturing info.
    pub fn new(
        key_type: KeyType,
        key_enc: KeyEncoding,
        serial_no: Cow<'a, str>,
        device_info: Cow<'a, str>,
        csr: Cow<'a, Bytes>,
    ) -> Self {
        Self {
            key_type,
            key_enc,
            serial_no,
            device_info,
            csr,
        }
    }

    /// The device key type.
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// The requested public key encoding.
    pub fn key_enc(&self) -> KeyEncoding {
        self.key_enc
    }

    /// The device serial number.
    pub fn serial_no(&self) -> &str {
        &self.serial_no
    }

    /// The device info string.
    pub fn device_info(&self) -> &str {
        &self.device_info
    }

    /// The CSR for the device key, DER encoded.
    pub fn csr(&self) -> &[u8] {
        &self.csr
    }
}

impl Serialize for DeviceMfgInfo<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            key_type,
            key_enc,
            serial_no,
            device_info,
            csr,
        } = self;

        (key_type, key_enc, serial_no, device_info, csr).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DeviceMfgInfo<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (key_type, key_enc, serial_no, device_info, csr) =
            Deserialize::deserialize(deserializer)?;

        Ok(Self {
            key_type,
            key_enc,
            serial_no,
            device_info,
            csr,
        })
    }
}

/// App Start, Type 10.
///
/// From Device to Manufacturer.
///
/// ```cddl
/// DI.AppStart = [
///     DeviceMfgInfo: bstr .cbor DeviceMfgInfo
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AppStart<'a> {
    pub(crate) mfg_info: CborBstr<'a, DeviceMfgInfo<'a>>,
}

impl<'a> AppStart<'a> {
    /// Creates the message.
    pub fn new(mfg_info: DeviceMfgInfo<'a>) -> Self {
        Self {
            mfg_info: CborBstr::new(mfg_info),
        }
    }

    /// The device manufacturing info.
    pub fn mfg_info(&self) -> &DeviceMfgInfo<'a> {
        &self.mfg_info
    }
}

impl Serialize for AppStart<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self { mfg_info } = self;

        (mfg_info,).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AppStart<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (mfg_info,) = Deserialize::deserialize(deserializer)?;

        Ok(Self { mfg_info })
    }
}

impl Message for AppStart<'_> {
    const MSG_TYPE: Msgtype = 10;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_cbor(buf, "the DI.AppStart")
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_cbor(self, writer, "the DI.AppStart")
    }
}

impl ClientMessage for AppStart<'_> {
    type Response<'a> = SetCredentials<'a>;
}

impl InitialMessage for AppStart<'_> {}

/// Set Credentials, Type 11.
///
/// From Manufacturer to Device.
///
/// ```cddl
/// DI.SetCredentials = [
///     OVHeader: bstr .cbor OVHeader
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SetCredentials<'a> {
    /// The voucher header bound to the freshly chosen GUID.
    pub ov_header: CborBstr<'a, OvHeader<'a>>,
}

impl<'a> SetCredentials<'a> {
    /// Creates the message.
    pub fn new(ov_header: OvHeader<'a>) -> Self {
        Self {
            ov_header: CborBstr::new(ov_header),
        }
    }
}

impl Serialize for SetCredentials<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self { ov_header } = self;

        (ov_header,).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SetCredentials<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (ov_header,) = Deserialize::deserialize(deserializer)?;

        Ok(Self { ov_header })
    }
}

impl Message for SetCredentials<'_> {
    const MSG_TYPE: Msgtype = 11;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_cbor(buf, "the DI.SetCredentials")
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_cbor(self, writer, "the DI.SetCredentials")
    }
}

/// Set HMAC, Type 12.
///
/// From Device to Manufacturer. The HMAC binds the device's secret to the
/// voucher header.
///
/// ```cddl
/// DI.SetHMAC = [
///     Hmac
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SetHmac<'a> {
    /// HMAC over the header bytes.
    pub hmac: HMac<'a>,
}

impl<'a> SetHmac<'a> {
    /// Creates the message.
    pub fn new(hmac: HMac<'a>) -> Self {
        Self { hmac }
    }
}

impl Serialize for SetHmac<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self { hmac } = self;

        (hmac,).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SetHmac<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (hmac,) = Deserialize::deserialize(deserializer)?;

        Ok(Self { hmac })
    }
}

impl Message for SetHmac<'_> {
    const MSG_TYPE: Msgtype = 12;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_cbor(buf, "the DI.SetHMAC")
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_cbor(self, writer, "the DI.SetHMAC")
    }
}

impl ClientMessage for SetHmac<'_> {
    type Response<'a> = Done;
}

/// Done, Type 13.
///
/// From Manufacturer to Device, closes the DI protocol.
///
/// ```cddl
/// DI.Done = []
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Done;

impl Serialize for Done {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        [(); 0].serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Done {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let [] = <[(); 0]>::deserialize(deserializer)?;

        Ok(Self)
    }
}

impl Message for Done {
    const MSG_TYPE: Msgtype = 13;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_cbor(buf, "the DI.Done")
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_cbor(self, writer, "the DI.Done")
    }
}
