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

//! Transfer Ownership Protocol 0 (TO0) messages, Types 20 to 23.
//!
//! The Owner registers its current network addresses for a device GUID at
//! the Rendezvous Server. The registration (`to1d`) is signed by the Owner
//! key and stored for at most the accepted wait time.

use std::io::Write;

use coset::CoseSign1;
use serde::{Deserialize, Serialize};

use crate::cbor::CborBstr;
use crate::flags::CapabilityFlags;
use crate::types::{Msgtype, NonceTo0Sign};
use crate::voucher::OwnershipVoucher;
use crate::Error;

use super::{ClientMessage, InitialMessage, Message};

/// Hello, Type 20.
///
/// From Owner to Rendezvous Server.
///
/// ```cddl
/// TO0.Hello = [
///     ? CapabilityFlags
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Hello<'a> {
    pub(crate) flags: Option<CapabilityFlags<'a>>,
}

impl<'a> Hello<'a> {
    /// Creates the message declaring the given capabilities.
    pub fn new(flags: Option<CapabilityFlags<'a>>) -> Self {
        Self { flags }
    }

    /// The declared capabilities.
    pub fn flags(&self) -> Option<&CapabilityFlags<'a>> {
        self.flags.as_ref()
    }
}

impl Serialize for Hello<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match &self.flags {
            Some(flags) => (flags,).serialize(serializer),
            None => [(); 0].serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Hello<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Default)]
        struct HelloVisitor<'a> {
            _marker: std::marker::PhantomData<Hello<'a>>,
        }

        impl<'de, 'a> serde::de::Visitor<'de> for HelloVisitor<'a> {
            type Value = Hello<'a>;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(formatter, "expecting a TO0.Hello CBOR sequence")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let flags = seq.next_element::<CapabilityFlags>()?;

                Ok(Hello { flags })
            }
        }

        deserializer.deserialize_seq(HelloVisitor::default())
    }
}

impl Message for Hello<'_> {
    const MSG_TYPE: Msgtype = 20;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_cbor(buf, "the TO0.Hello")
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_cbor(self, writer, "the TO0.Hello")
    }
}

impl ClientMessage for Hello<'_> {
    type Response<'a> = HelloAck;
}

impl InitialMessage for Hello<'_> {}

/// Hello Ack, Type 21.
///
/// From Rendezvous Server to Owner, challenges the owner signature.
///
/// ```cddl
/// TO0.HelloAck = [
///     NonceTO0Sign
/// ]
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HelloAck {
    /// Nonce the Owner must sign into `to0d`.
    pub nonce: NonceTo0Sign,
}

impl HelloAck {
    /// Creates the message.
    pub fn new(nonce: NonceTo0Sign) -> Self {
        Self { nonce }
    }
}

impl Serialize for HelloAck {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self { nonce } = self;

        (nonce,).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HelloAck {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (nonce,) = Deserialize::deserialize(deserializer)?;

        Ok(Self { nonce })
    }
}

impl Message for HelloAck {
    const MSG_TYPE: Msgtype = 21;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_cbor(buf, "the TO0.HelloAck")
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_cbor(self, writer, "the TO0.HelloAck")
    }
}

/// The `to0d` object binds the voucher, the proposed wait time and the
/// rendezvous nonce under the `to1d` signature (through its hash).
///
/// ```cddl
/// to0d = [
///     OwnershipVoucher,
///     WaitSeconds:  uint32,
///     NonceTO0Sign: Nonce
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct To0d<'a> {
    pub(crate) voucher: OwnershipVoucher<'a>,
    pub(crate) wait_seconds: u32,
    pub(crate) nonce: NonceTo0Sign,
}

impl<'a> To0d<'a> {
    /// Creates the object.
    pub fn new(voucher: OwnershipVoucher<'a>, wait_seconds: u32, nonce: NonceTo0Sign) -> Self {
        Self {
            voucher,
            wait_seconds,
            nonce,
        }
    }

    /// The full ownership voucher of the device.
    pub fn voucher(&self) -> &OwnershipVoucher<'a> {
        &self.voucher
    }

    /// The proposed registration TTL in seconds.
    pub fn wait_seconds(&self) -> u32 {
        self.wait_seconds
    }

    /// The rendezvous nonce from TO0.HelloAck.
    pub fn nonce(&self) -> NonceTo0Sign {
        self.nonce
    }
}

impl Serialize for To0d<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            voucher,
            wait_seconds,
            nonce,
        } = self;

        (voucher, wait_seconds, nonce).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for To0d<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (voucher, wait_seconds, nonce) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            voucher,
            wait_seconds,
            nonce,
        })
    }
}

/// Owner Sign, Type 22.
///
/// From Owner to Rendezvous Server.
///
/// ```cddl
/// TO0.OwnerSign = [
///     to0d: bstr .cbor to0d,
///     to1d: CoseSignature   ;; To1dBlobPayload signed by the Owner key
/// ]
/// ```
///
/// The `to1d` payload carries the hash of the exact `to0d` bytes, so the
/// owner signature covers the voucher, the wait time and the nonce.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerSign<'a> {
    pub(crate) to0d: CborBstr<'a, To0d<'a>>,
    pub(crate) to1d: CoseSign1,
}

impl<'a> OwnerSign<'a> {
    /// Creates the message.
    pub fn new(to0d: CborBstr<'a, To0d<'a>>, to1d: CoseSign1) -> Self {
        Self { to0d, to1d }
    }

    /// The to0d object.
    pub fn to0d(&self) -> &CborBstr<'a, To0d<'a>> {
        &self.to0d
    }

    /// The signed redirect blob.
    pub fn to1d(&self) -> &CoseSign1 {
        &self.to1d
    }

    /// Consumes the message into its parts.
    pub fn into_parts(self) -> (CborBstr<'a, To0d<'a>>, CoseSign1) {
        (self.to0d, self.to1d)
    }
}

impl Serialize for OwnerSign<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use coset::AsCborValue;

        let Self { to0d, to1d } = self;

        let to1d = to1d
            .clone()
            .to_cbor_value()
            .map_err(serde::ser::Error::custom)?;
        let to1d = ciborium::tag::Required::<_, { coset::iana::CborTag::CoseSign1 as u64 }>(to1d);

        (to0d, to1d).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OwnerSign<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use coset::AsCborValue;

        let (to0d, to1d): (
            _,
            ciborium::tag::Accepted<ciborium::Value, { coset::iana::CborTag::CoseSign1 as u64 }>,
        ) = Deserialize::deserialize(deserializer)?;

        let to1d = CoseSign1::from_cbor_value(to1d.0).map_err(serde::de::Error::custom)?;

        Ok(Self { to0d, to1d })
    }
}

impl Message for OwnerSign<'_> {
    const MSG_TYPE: Msgtype = 22;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_cbor(buf, "the TO0.OwnerSign")
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_cbor(self, writer, "the TO0.OwnerSign")
    }
}

impl ClientMessage for OwnerSign<'_> {
    type Response<'a> = AcceptOwner;
}

/// Accept Owner, Type 23.
///
/// From Rendezvous Server to Owner: the registration was accepted and will
/// be served for at most `wait_seconds`.
///
/// ```cddl
/// TO0.AcceptOwner = [
///     WaitSeconds: uint32
/// ]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptOwner {
    /// The accepted registration TTL in seconds.
    pub wait_seconds: u32,
}

impl AcceptOwner {
    /// Creates the message.
    pub fn new(wait_seconds: u32) -> Self {
        Self { wait_seconds }
    }
}

impl Serialize for AcceptOwner {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self { wait_seconds } = self;

        (wait_seconds,).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AcceptOwner {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (wait_seconds,) = Deserialize::deserialize(deserializer)?;

        Ok(Self { wait_seconds })
    }
}

impl Message for AcceptOwner {
    const MSG_TYPE: Msgtype = 23;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_cbor(buf, "the TO0.AcceptOwner")
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_cbor(self, writer, "the TO0.AcceptOwner")
    }
}

#[cfg(test)]
mod tests {
    use coset::{CoseSign1Builder, HeaderBuilder};
    use pretty_assertions::assert_eq;

    use crate::types::tests::create_nonce;
    use crate::voucher::tests::create_voucher;

    use super::*;

    fn create_to1d() -> CoseSign1 {
        CoseSign1Builder::new()
            .protected(
                HeaderBuilder::new()
                    .algorithm(coset::iana::Algorithm::ES256)
                    .build(),
            )
            .payload(vec![0x80])
            .signature(vec![0xcd; 64])
            .build()
    }

    #[test]
    fn hello_roundtrip() {
        let cases = [
            Hello::new(None),
            Hello::new(Some(CapabilityFlags::with_delegate_support())),
        ];

        for msg in cases {
            let buf = msg.encode_vec().unwrap();

            let res = Hello::decode(&buf).unwrap();

            assert_eq!(res, msg);
        }
    }

    #[test]
    fn hello_flags() {
        let msg = Hello::new(Some(CapabilityFlags::with_delegate_support()));

        assert!(msg.flags().unwrap().supports_delegate());

        let empty = Hello::default();
        assert!(empty.flags().is_none());
    }

    #[test]
    fn hello_ack_roundtrip() {
        let msg = HelloAck::new(NonceTo0Sign(create_nonce()));

        let buf = msg.encode_vec().unwrap();

        let res = HelloAck::decode(&buf).unwrap();

        assert_eq!(res, msg);
    }

    #[test]
    fn owner_sign_roundtrip() {
        let to0d = To0d::new(create_voucher(), 3600, NonceTo0Sign(create_nonce()));

        let msg = OwnerSign::new(CborBstr::new(to0d), create_to1d());

        let buf = msg.encode_vec().unwrap();

        let res = OwnerSign::decode(&buf).unwrap();

        assert_eq!(res.to0d().wait_seconds(), 3600);
        assert_eq!(res.to0d().nonce(), NonceTo0Sign(create_nonce()));
        assert_eq!(res.to0d().voucher().entries().len(), 1);

        // Re-encoding preserves the signed bytes
        let buf2 = res.encode_vec().unwrap();
        assert_eq!(buf2, buf);
    }

    #[test]
    fn accept_owner_roundtrip() {
        let msg = AcceptOwner::new(1800);

        let buf = msg.encode_vec().unwrap();

        let res = AcceptOwner::decode(&buf).unwrap();

        assert_eq!(res, msg);
        assert_eq!(res.wait_seconds, 1800);
    }
}
