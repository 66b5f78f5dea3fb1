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

//! Rendezvous server: TO0 registration and TO1 lookup.
//!
//! TO0 stores the owner's signed redirect blob (`to1d`) under the device
//! GUID after verifying the voucher chain, the blob signature and the
//! freshness nonce; the registration expires with its TTL. TO1 challenges
//! the device with a nonce, verifies the device EAT against the voucher's
//! device certificate chain and serves the stored blob.

use std::time::{Duration, Instant};

use astarte_fdo_protocol::eat::EatPayload;
use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::messages::to0::{AcceptOwner, Hello, HelloAck, OwnerSign};
use astarte_fdo_protocol::messages::to1::{HelloRv, HelloRvAck, ProveToRv, RvRedirect};
use astarte_fdo_protocol::messages::Message;
use astarte_fdo_protocol::pubkey::PublicKey;
use astarte_fdo_protocol::rv::To1dBlobPayload;
use astarte_fdo_protocol::sign_info::EBSigInfo;
use astarte_fdo_protocol::types::{Guid, Msgtype, NonceTo0Sign, NonceTo1Proof};
use astarte_fdo_protocol::Error;
use aws_lc_rs::rand::SystemRandom;
use coset::CoseSign1;
use tracing::{debug, info, warn};

use crate::crypto::{self, random_nonce};
use crate::delegate::{self, DelegateFunction};
use crate::store::{MemorySessionStore, RendezvousBlob, RendezvousBlobStore, SessionStore};
use crate::transport::{Reply, Responder, SessionToken};
use crate::voucher;
use crate::SessionConfig;

enum RvSession {
    To0 {
        nonce: NonceTo0Sign,
        started: Instant,
    },
    To1 {
        guid: Guid,
        nonce: NonceTo1Proof,
        started: Instant,
    },
}

/// Rendezvous service running the server side of TO0 and TO1.
pub struct RendezvousService<B> {
    blobs: B,
    sessions: MemorySessionStore<RvSession>,
    config: SessionConfig,
    rng: SystemRandom,
}

impl<B> RendezvousService<B>
where
    B: RendezvousBlobStore,
{
    /// Creates the service over a blob store.
    pub fn new(blobs: B, config: SessionConfig) -> Self {
        Self {
            blobs,
            sessions: MemorySessionStore::new(),
            config,
            rng: SystemRandom::new(),
        }
    }

    /// The blob store of the service.
    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    fn to0_hello(&mut self, body: &[u8]) -> Result<Reply, Error> {
        let msg = Hello::decode(body)?;

        if let Some(flags) = msg.flags() {
            debug!(
                delegate = flags.supports_delegate(),
                "owner capability flags"
            );
        }

        let nonce = NonceTo0Sign(random_nonce(&self.rng)?);

        let token = self.sessions.create(RvSession::To0 {
            nonce,
            started: Instant::now(),
        })?;

        Ok(Reply {
            msg_type: HelloAck::MSG_TYPE,
            body: HelloAck::new(nonce).encode_vec()?,
            token: Some(token),
        })
    }

    fn owner_sign(&mut self, body: &[u8], token: Option<&SessionToken>) -> Result<Reply, Error> {
        let token = token.ok_or(Error::new(ErrorKind::Invalid, "missing session token"))?;

        let (nonce, started) = match self.sessions.take(token)? {
            RvSession::To0 { nonce, started } => (nonce, started),
            RvSession::To1 { .. } => {
                return Err(Error::new(
                    ErrorKind::UnexpectedMessage,
                    "session is in TO1",
                ))
            }
        };

        if started.elapsed() > self.config.turn_timeout {
            return Err(Error::new(ErrorKind::Unavailable, "session deadline"));
        }

        let msg = OwnerSign::decode(body)?;

        let to0d_bytes = msg.to0d().bytes()?.to_vec();
        let (to0d, to1d) = msg.into_parts();
        let to0d = to0d.into_inner();

        // Freshness of the registration
        if to0d.nonce() != nonce {
            return Err(Error::new(ErrorKind::Verify, "to0d nonce mismatch"));
        }

        // Unbroken custody from the manufacturer to the signer
        let owner_key = voucher::verify(to0d.voucher())?;

        // The to1d payload must cover the exact to0d bytes
        let blob = decode_to1d(&to1d)?;
        crypto::verify_hash(blob.to0d_hash(), &to0d_bytes)?;

        verify_owner_signature(&to1d, &owner_key, DelegateFunction::Redirect)?;

        let guid = to0d.voucher().header().ov_guid;

        let device_key = device_verification_key(to0d.voucher())?;

        let wait_seconds = to0d.wait_seconds().min(self.config.wait_seconds);

        self.blobs.store(
            guid,
            RendezvousBlob {
                to1d,
                device_key,
            },
            Duration::from_secs(wait_seconds.into()),
        )?;

        info!(%guid, wait_seconds, "owner registered");

        Ok(Reply {
            msg_type: AcceptOwner::MSG_TYPE,
            body: AcceptOwner::new(wait_seconds).encode_vec()?,
            token: Some(token.clone()),
        })
    }

    fn to1_hello(&mut self, body: &[u8]) -> Result<Reply, Error> {
        let msg = HelloRv::decode(body)?;

        let guid = msg.guid();

        // Never serve an expired registration
        if self.blobs.load(&guid)?.is_none() {
            warn!(%guid, "no owner registration for the guid");

            return Err(Error::new(ErrorKind::NotFound, "owner for the guid"));
        }

        let nonce = NonceTo1Proof(random_nonce(&self.rng)?);

        let token = self.sessions.create(RvSession::To1 {
            guid,
            nonce,
            started: Instant::now(),
        })?;

        let reply = HelloRvAck::new(nonce, EBSigInfo(msg.ea_sig_info().0.clone()));

        Ok(Reply {
            msg_type: HelloRvAck::MSG_TYPE,
            body: reply.encode_vec()?,
            token: Some(token),
        })
    }

    fn prove_to_rv(&mut self, body: &[u8], token: Option<&SessionToken>) -> Result<Reply, Error> {
        let token = token.ok_or(Error::new(ErrorKind::Invalid, "missing session token"))?;

        let (guid, nonce, started) = match self.sessions.take(token)? {
            RvSession::To1 {
                guid,
                nonce,
                started,
            } => (guid, nonce, started),
            RvSession::To0 { .. } => {
                return Err(Error::new(
                    ErrorKind::UnexpectedMessage,
                    "session is in TO0",
                ))
            }
        };

        if started.elapsed() > self.config.turn_timeout {
            return Err(Error::new(ErrorKind::Unavailable, "session deadline"));
        }

        let msg = ProveToRv::decode(body)?;

        let blob = self
            .blobs
            .load(&guid)?
            .ok_or(Error::new(ErrorKind::NotFound, "owner for the guid"))?;

        // Proof of possession of the device key
        crypto::verify_cose_sign1(msg.token(), &blob.device_key)?;

        let payload = msg
            .token()
            .payload
            .as_deref()
            .ok_or(Error::new(ErrorKind::Invalid, "EAT payload is missing"))?;
        let eat = EatPayload::decode(payload)?;

        if *eat.nonce() != nonce.0 {
            return Err(Error::new(ErrorKind::Verify, "EAT nonce mismatch"));
        }

        if *eat.guid() != guid {
            return Err(Error::new(ErrorKind::Verify, "EAT guid mismatch"));
        }

        info!(%guid, "serving the owner redirect");

        Ok(Reply {
            msg_type: RvRedirect::MSG_TYPE,
            body: RvRedirect::new(blob.to1d).encode_vec()?,
            token: Some(token.clone()),
        })
    }
}

impl<B> Responder for RendezvousService<B>
where
    B: RendezvousBlobStore,
{
    fn respond(
        &mut self,
        msg_type: Msgtype,
        body: &[u8],
        token: Option<&SessionToken>,
    ) -> Result<Reply, Error> {
        match msg_type {
            Hello::MSG_TYPE => self.to0_hello(body),
            OwnerSign::MSG_TYPE => self.owner_sign(body, token),
            HelloRv::MSG_TYPE => self.to1_hello(body),
            ProveToRv::MSG_TYPE => self.prove_to_rv(body, token),
            _ => Err(Error::new(
                ErrorKind::UnexpectedMessage,
                "for the rendezvous service",
            )),
        }
    }
}

use crate::voucher::device_verification_key;

fn decode_to1d(to1d: &CoseSign1) -> Result<To1dBlobPayload<'static>, Error> {
    let payload = to1d
        .payload
        .as_deref()
        .ok_or(Error::new(ErrorKind::Invalid, "to1d payload is missing"))?;

    ciborium::from_reader(payload).map_err(|_| Error::new(ErrorKind::Decode, "the to1d payload"))
}

/// Verifies the owner signature on a blob, through a delegate chain when
/// one is attached.
///
/// A delegate signs with the leaf key and attaches its chain as the
/// `CUPHOwnerPubKey` unprotected header; the chain must be anchored at
/// the voucher owner key and scoped to the function.
pub(crate) fn verify_owner_signature(
    sign: &CoseSign1,
    owner_key: &PublicKey<'_>,
    function: DelegateFunction,
) -> Result<(), Error> {
    match unprotected_pub_key(sign)? {
        Some(presented) if !presented.same_key(owner_key) => {
            let chain = presented.chain().ok_or(Error::new(
                ErrorKind::Verify,
                "presented key is not the owner and not a chain",
            ))?;

            delegate::verify_chain(chain, Some(owner_key), Some(function), None)?;

            debug!(function = %function, "delegate chain authorized");

            crypto::verify_cose_sign1(sign, &presented)
        }
        _ => crypto::verify_cose_sign1(sign, owner_key),
    }
}

fn unprotected_pub_key(sign: &CoseSign1) -> Result<Option<PublicKey<'static>>, Error> {
    use coset::iana::EnumI64;

    let label = coset::Label::Int(coset::iana::HeaderParameter::CuphOwnerPubKey.to_i64());

    let Some(value) = sign
        .unprotected
        .rest
        .iter()
        .find_map(|(l, value)| (*l == label).then_some(value))
    else {
        return Ok(None);
    };

    value
        .deserialized::<PublicKey>()
        .map(|key| Some(key.into_owned()))
        .map_err(|_| Error::new(ErrorKind::Decode, "the presented owner key"))
}

#[cfg(test)]
mod tests {
    use astarte_fdo_protocol::cbor::CborBstr;
    use astarte_fdo_protocol::messages::to0::To0d;
    use astarte_fdo_protocol::sign_info::{DeviceSgType, SigInfo};
    use pretty_assertions::assert_eq;

    use crate::crypto::{Signer, SoftwareSigner};
    use crate::store::MemoryRendezvousBlobStore;
    use crate::voucher::tests::test_voucher;

    use super::*;

    #[test]
    fn to1_hello_unknown_guid() {
        let mut service =
            RendezvousService::new(MemoryRendezvousBlobStore::new(), SessionConfig::default());

        let msg = HelloRv::new(
            Guid::new([9; 16]),
            astarte_fdo_protocol::sign_info::EASigInfo(SigInfo::new(DeviceSgType::StSecP256R1)),
            None,
        );

        let err = service
            .respond(HelloRv::MSG_TYPE, &msg.encode_vec().unwrap(), None)
            .unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn owner_sign_rejects_stale_nonce() {
        let mut service =
            RendezvousService::new(MemoryRendezvousBlobStore::new(), SessionConfig::default());

        let reply = service
            .respond(Hello::MSG_TYPE, &Hello::new(None).encode_vec().unwrap(), None)
            .unwrap();
        let token = reply.token.unwrap();

        let mfg = SoftwareSigner::generate_p256().unwrap();
        let owner = SoftwareSigner::generate_p256().unwrap();
        let voucher = test_voucher(&mfg, &owner);

        // Wrong nonce: not the one from HelloAck
        let to0d = To0d::new(voucher, 600, NonceTo0Sign([0u8; 16].into()));
        let to0d = CborBstr::new(to0d);

        let blob = To1dBlobPayload::new(
            astarte_fdo_protocol::rv::RvTo2Addr::new(vec![
                astarte_fdo_protocol::rv::RvTo2AddrEntry::new(
                    None,
                    Some("owner.example".into()),
                    8043,
                    astarte_fdo_protocol::types::TransportProtocol::Http,
                ),
            ])
            .unwrap(),
            crypto::hash(
                astarte_fdo_protocol::hash::HashAlg::Sha256,
                to0d.bytes().unwrap(),
            )
            .unwrap(),
        );

        let mut payload = Vec::new();
        ciborium::into_writer(&blob, &mut payload).unwrap();

        let to1d = owner
            .cose_sign(coset::HeaderBuilder::new(), payload)
            .unwrap();

        let msg = OwnerSign::new(to0d, to1d);

        let err = service
            .respond(
                OwnerSign::MSG_TYPE,
                &msg.encode_vec().unwrap(),
                Some(&token),
            )
            .unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Verify);
    }

    #[test]
    fn owner_sign_requires_a_token() {
        let mut service =
            RendezvousService::new(MemoryRendezvousBlobStore::new(), SessionConfig::default());

        let err = service
            .respond(OwnerSign::MSG_TYPE, &[0x80], None)
            .unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn repeated_token_is_rejected() {
        let mut service =
            RendezvousService::new(MemoryRendezvousBlobStore::new(), SessionConfig::default());

        let reply = service
            .respond(Hello::MSG_TYPE, &Hello::new(None).encode_vec().unwrap(), None)
            .unwrap();
        let token = reply.token.unwrap();

        // First use consumes the session even on failure
        let _ = service.respond(OwnerSign::MSG_TYPE, &[0x80], Some(&token));

        let err = service
            .respond(OwnerSign::MSG_TYPE, &[0x80], Some(&token))
            .unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn owner_signature_with_delegate_chain() {
        use crate::delegate::tests::generate_chain_for;

        let chain = generate_chain_for(&[DelegateFunction::Redirect], "", "", "");

        let payload = b"signed by the delegate leaf".to_vec();

        let presented = PublicKey::with_x5chain(
            astarte_fdo_protocol::pubkey::KeyType::Secp384R1,
            chain.chain.clone(),
        );

        use coset::iana::EnumI64;

        let unprotected = coset::HeaderBuilder::new().value(
            coset::iana::HeaderParameter::CuphOwnerPubKey.to_i64(),
            ciborium::Value::serialized(&presented).unwrap(),
        );

        let sign = chain.leaf_key.cose_sign(unprotected, payload).unwrap();

        let owner_key = chain.root_key.public_key().unwrap();

        verify_owner_signature(&sign, &owner_key, DelegateFunction::Redirect).unwrap();

        // The same chain is not scoped for onboarding
        let err =
            verify_owner_signature(&sign, &owner_key, DelegateFunction::Onboard).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::Verify);
    }
}
