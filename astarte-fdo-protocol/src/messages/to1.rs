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

//! Transfer Ownership Protocol 1 (TO1) messages, Types 30 to 33.
//!
//! The device proves possession of its key over a rendezvous-supplied nonce
//! and receives the `to1d` blob registered by the Owner in TO0. The device
//! does not verify the owner signature at this point, it only uses the
//! embedded addresses to contact the owner.

use std::io::Write;

use coset::CoseSign1;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::flags::CapabilityFlags;
use crate::rv::To1dBlobPayload;
use crate::sign_info::{EASigInfo, EBSigInfo};
use crate::types::{Guid, Msgtype, NonceTo1Proof};
use crate::Error;

use super::{ClientMessage, InitialMessage, Message};

/// Hello RV, Type 30.
///
/// From Device to Rendezvous Server.
///
/// ```cddl
/// TO1.HelloRV = [
///     Guid,
///     eASigInfo,
///     ? CapabilityFlags
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct HelloRv<'a> {
    pub(crate) guid: Guid,
    pub(crate) ea_sig_info: EASigInfo<'a>,
    pub(crate) flags: Option<CapabilityFlags<'a>>,
}

impl<'a> HelloRv<'a> {
    /// Creates the message.
    pub fn new(guid: Guid, ea_sig_info: EASigInfo<'a>, flags: Option<CapabilityFlags<'a>>) -> Self {
        Self {
            guid,
            ea_sig_info,
            flags,
        }
    }

    /// The device guid being looked up.
    pub fn guid(&self) -> Guid {
        self.guid
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

impl Serialize for HelloRv<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            guid,
            ea_sig_info,
            flags,
        } = self;

        match flags {
            Some(flags) => (guid, ea_sig_info, flags).serialize(serializer),
            None => (guid, ea_sig_info).serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for HelloRv<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Default)]
        struct HelloRvVisitor<'a> {
            _marker: std::marker::PhantomData<HelloRv<'a>>,
        }

        impl<'de, 'a> serde::de::Visitor<'de> for HelloRvVisitor<'a> {
            type Value = HelloRv<'a>;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(formatter, "expecting a TO1.HelloRV CBOR sequence")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let exp = &"should be a sequence of at least 2 elements";

                let guid = seq
                    .next_element::<Guid>()?
                    .ok_or_else(|| serde::de::Error::invalid_length(0, exp))?;

                let ea_sig_info = seq
                    .next_element::<EASigInfo>()?
                    .ok_or_else(|| serde::de::Error::invalid_length(1, exp))?;

                let flags = seq.next_element::<CapabilityFlags>()?;

                Ok(HelloRv {
                    guid,
                    ea_sig_info,
                    flags,
                })
            }
        }

        deserializer.deserialize_seq(HelloRvVisitor::default())
    }
}

impl Message for HelloRv<'_> {
    const MSG_TYPE: Msgtype = 30;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_cbor(buf, "the TO1.HelloRV")
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_cbor(self, writer, "the TO1.HelloRV")
    }
}

impl ClientMessage for HelloRv<'_> {
    type Response<'a> = HelloRvAck<'a>;
}

impl InitialMessage for HelloRv<'_> {}

/// Hello RV Ack, Type 31.
///
/// From Rendezvous Server to Device, challenges the device signature.
///
/// ```cddl
/// TO1.HelloRVAck = [
///     NonceTO1Proof,
///     eBSigInfo
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct HelloRvAck<'a> {
    /// Nonce the device must sign into the EAT of TO1.ProveToRV.
    pub nonce: NonceTo1Proof,
    /// The accepted signature info.
    pub eb_sig_info: EBSigInfo<'a>,
}

impl<'a> HelloRvAck<'a> {
    /// Creates the message.
    pub fn new(nonce: NonceTo1Proof, eb_sig_info: EBSigInfo<'a>) -> Self {
        Self { nonce, eb_sig_info }
    }
}

impl Serialize for HelloRvAck<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self { nonce, eb_sig_info } = self;

        (nonce, eb_sig_info).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HelloRvAck<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (nonce, eb_sig_info) = Deserialize::deserialize(deserializer)?;

        Ok(Self { nonce, eb_sig_info })
    }
}

impl Message for HelloRvAck<'_> {
    const MSG_TYPE: Msgtype = 31;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_cbor(buf, "the TO1.HelloRVAck")
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_cbor(self, writer, "the TO1.HelloRVAck")
    }
}

/// Prove To RV, Type 32.
///
/// From Device to Rendezvous Server: an EAT signed by the device key whose
/// nonce claim is the NonceTO1Proof from TO1.HelloRVAck.
///
/// ```cddl
/// TO1.ProveToRV = EAToken
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProveToRv {
    pub(crate) token: CoseSign1,
}

impl ProveToRv {
    /// Wraps the signed token.
    pub fn new(token: CoseSign1) -> Self {
        Self { token }
    }

    /// The signed EAT.
    pub fn token(&self) -> &CoseSign1 {
        &self.token
    }
}

impl Message for ProveToRv {
    const MSG_TYPE: Msgtype = 32;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_tagged_sign1(buf, "the TO1.ProveToRV").map(Self::new)
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_tagged_sign1(&self.token, writer, "the TO1.ProveToRV")
    }
}

impl ClientMessage for ProveToRv {
    type Response<'a> = RvRedirect;
}

/// RV Redirect, Type 33.
///
/// From Rendezvous Server to Device: the `to1d` blob registered by the
/// Owner during TO0.
///
/// ```cddl
/// TO1.RVRedirect = to1d
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RvRedirect {
    pub(crate) to1d: CoseSign1,
}

impl RvRedirect {
    /// Wraps the signed blob.
    pub fn new(to1d: CoseSign1) -> Self {
        Self { to1d }
    }

    /// The signed blob, to be verified against the owner key during TO2.
    pub fn to1d(&self) -> &CoseSign1 {
        &self.to1d
    }

    /// Decodes the blob payload carrying the owner addresses.
    pub fn blob(&self) -> Result<To1dBlobPayload<'static>, Error> {
        let payload = self
            .to1d
            .payload
            .as_deref()
            .ok_or(Error::new(ErrorKind::Invalid, "to1d payload is missing"))?;

        super::decode_cbor(payload, "the to1d payload")
    }
}

impl Message for RvRedirect {
    const MSG_TYPE: Msgtype = 33;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_tagged_sign1(buf, "the TO1.RVRedirect").map(Self::new)
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_tagged_sign1(&self.to1d, writer, "the TO1.RVRedirect")
    }
}

#[cfg(test)]
mod tests {
    use coset::{CoseSign1Builder, HeaderBuilder};
    use pretty_assertions::assert_eq;

    use crate::hash::tests::create_hash;
    use crate::rv::tests::create_rv_to2_addr;
    use crate::sign_info::{DeviceSgType, SigInfo};
    use crate::types::tests::{create_guid, create_nonce};

    use super::*;

    #[test]
    fn hello_rv_roundtrip() {
        let cases = [
            HelloRv::new(
                create_guid(),
                EASigInfo(SigInfo::new(DeviceSgType::StSecP256R1)),
                None,
            ),
            HelloRv::new(
                create_guid(),
                EASigInfo(SigInfo::new(DeviceSgType::StSecP384R1)),
                Some(CapabilityFlags::with_delegate_support()),
            ),
        ];

        for msg in cases {
            let buf = msg.encode_vec().unwrap();

            let res = HelloRv::decode(&buf).unwrap();

            assert_eq!(res, msg);
            assert_eq!(res.guid(), create_guid());
        }
    }

    #[test]
    fn hello_rv_ack_roundtrip() {
        let msg = HelloRvAck::new(
            NonceTo1Proof(create_nonce()),
            EBSigInfo(SigInfo::new(DeviceSgType::StSecP256R1)),
        );

        let buf = msg.encode_vec().unwrap();

        let res = HelloRvAck::decode(&buf).unwrap();

        assert_eq!(res, msg);
    }

    #[test]
    fn prove_to_rv_roundtrip() {
        let token = CoseSign1Builder::new()
            .protected(
                HeaderBuilder::new()
                    .algorithm(coset::iana::Algorithm::ES256)
                    .build(),
            )
            .payload(vec![0xa0])
            .signature(vec![0xee; 64])
            .build();

        let msg = ProveToRv::new(token);

        let buf = msg.encode_vec().unwrap();

        let mut res = ProveToRv::decode(&buf).unwrap();
        res.token.protected.original_data = None;

        assert_eq!(res, msg);
    }

    #[test]
    fn rv_redirect_blob() {
        let payload = To1dBlobPayload::new(create_rv_to2_addr(), create_hash());

        let mut buf = Vec::new();
        ciborium::into_writer(&payload, &mut buf).unwrap();

        let to1d = CoseSign1Builder::new()
            .protected(
                HeaderBuilder::new()
                    .algorithm(coset::iana::Algorithm::ES256)
                    .build(),
            )
            .payload(buf)
            .signature(vec![0xee; 64])
            .build();

        let msg = RvRedirect::new(to1d);

        let blob = msg.blob().unwrap();

        assert_eq!(blob, payload);

        let wire = msg.encode_vec().unwrap();
        let res = RvRedirect::decode(&wire).unwrap();

        assert_eq!(res.blob().unwrap(), payload);
    }

    #[test]
    fn rv_redirect_missing_payload() {
        let to1d = CoseSign1Builder::new().signature(vec![0xee; 64]).build();

        let msg = RvRedirect::new(to1d);

        let err = msg.blob().unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }
}
