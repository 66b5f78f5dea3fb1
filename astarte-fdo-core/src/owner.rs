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

//! Owner Onboarding Service: the server side of TO2 and the TO0
//! registration client.
//!
//! A TO2 session walks a fixed sequence: the voucher header and its
//! entries are served and countersigned, the device proves possession of
//! its key, both sides derive the session key, ServiceInfo streams until
//! both signal completion and the replacement voucher is committed. Any
//! failed turn removes the session; a new one restarts from HelloDevice.
//!
//! When a delegate is configured, the service signs with the delegate
//! leaf key and presents the chain, which devices and rendezvous servers
//! verify against the voucher owner key.

use std::time::Instant;

use astarte_fdo_protocol::cbor::CborBstr;
use astarte_fdo_protocol::eat::EatPayload;
use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::hash::HMac;
use astarte_fdo_protocol::kex::XBKeyExchange;
use astarte_fdo_protocol::messages::to0;
use astarte_fdo_protocol::messages::to2::{
    DeviceServiceInfo, DeviceServiceInfoReady, Done, Done2, GetOvNextEntry, HelloDevice,
    OvNextEntry, OwnerServiceInfo, OwnerServiceInfoReady, ProveDevice, ProveOvHdr,
    ProveOvHdrPayload, SetupDevice, SetupDevicePayload,
};
use astarte_fdo_protocol::messages::Message;
use astarte_fdo_protocol::pubkey::PublicKey;
use astarte_fdo_protocol::rv::{RendezvousInfo, RvTo2Addr, To1dBlobPayload};
use astarte_fdo_protocol::sign_info::EBSigInfo;
use astarte_fdo_protocol::types::{
    Guid, Msgtype, NonceTo2ProveDv, NonceTo2SetupDv, PROTOCOL_VERSION,
};
use astarte_fdo_protocol::voucher::{OvHeader, OwnershipVoucher};
use astarte_fdo_protocol::x509::CoseX509;
use astarte_fdo_protocol::Error;
use aws_lc_rs::rand::{SecureRandom, SystemRandom};
use coset::HeaderBuilder;
use tracing::{debug, info};

use crate::crypto::{self, OwnerKeyExchange, SessionKeys, Signer, SoftwareSigner};
use crate::serviceinfo::{OwnerModules, MESSAGE_OVERHEAD};
use crate::store::{MemorySessionStore, SessionStore, VoucherStore};
use crate::transport::{Client, Reply, Responder, SessionToken, Transport};
use crate::voucher::{self, device_verification_key, sign_entry};
use crate::SessionConfig;

/// Delegate identity the owner acts through.
pub struct OwnerDelegate {
    /// Signer for the delegate leaf key.
    pub signer: SoftwareSigner,
    /// The certificate chain, leaf first, anchored at the owner key.
    pub chain: CoseX509<'static>,
}

enum To2Step {
    Entries { next: u8 },
    ProveDevice,
    DeviceReady,
    ServiceInfo,
    Done,
}

struct Replacement {
    header: CborBstr<'static, OvHeader<'static>>,
    hmac: Option<HMac<'static>>,
}

struct To2Session {
    guid: Guid,
    step: To2Step,
    nonce_prove_dv: NonceTo2ProveDv,
    kex: Option<OwnerKeyExchange>,
    keys: Option<SessionKeys>,
    nonce_setup_dv: Option<NonceTo2SetupDv>,
    replacement: Option<Replacement>,
    modules: OwnerModules,
    si_mtu: usize,
    started: Instant,
}

type ModulesFactory = Box<dyn Fn() -> OwnerModules + Send>;

/// Owner Onboarding Service.
pub struct OwnerService<S, V> {
    signer: S,
    delegate: Option<OwnerDelegate>,
    rv_info: RendezvousInfo<'static>,
    vouchers: V,
    sessions: MemorySessionStore<To2Session>,
    modules: ModulesFactory,
    config: SessionConfig,
    rng: SystemRandom,
}

impl<S, V> OwnerService<S, V>
where
    S: Signer,
    V: VoucherStore,
{
    /// Creates the service.
    ///
    /// `rv_info` is handed to devices as the replacement rendezvous
    /// instructions; `modules` builds the per-session ServiceInfo module
    /// registry.
    pub fn new(
        signer: S,
        rv_info: RendezvousInfo<'static>,
        vouchers: V,
        modules: ModulesFactory,
        config: SessionConfig,
    ) -> Self {
        Self {
            signer,
            delegate: None,
            rv_info,
            vouchers,
            sessions: MemorySessionStore::new(),
            modules,
            config,
            rng: SystemRandom::new(),
        }
    }

    /// Acts through a delegate chain instead of the bare owner key.
    pub fn with_delegate(mut self, delegate: OwnerDelegate) -> Self {
        self.delegate = Some(delegate);

        self
    }

    /// The voucher store of the service.
    pub fn vouchers(&self) -> &V {
        &self.vouchers
    }

    /// The key presented to the peers: the delegate chain, or the owner
    /// key itself.
    fn presented_key(&self) -> Result<PublicKey<'static>, Error> {
        match &self.delegate {
            Some(delegate) => Ok(PublicKey::with_x5chain(
                delegate.signer.key_type(),
                delegate.chain.clone(),
            )),
            None => self.signer.public_key(),
        }
    }

    fn sign(&self, unprotected: HeaderBuilder, payload: Vec<u8>) -> Result<coset::CoseSign1, Error> {
        match &self.delegate {
            Some(delegate) => delegate.signer.cose_sign(unprotected, payload),
            None => self.signer.cose_sign(unprotected, payload),
        }
    }

    /// Registers the owner addresses for the device at a rendezvous
    /// server (the TO0 protocol).
    ///
    /// Returns the TTL granted by the rendezvous server.
    pub fn register_owner<T>(
        &self,
        transport: T,
        guid: &Guid,
        addresses: RvTo2Addr<'static>,
    ) -> Result<u32, Error>
    where
        T: Transport,
    {
        let voucher = self
            .vouchers
            .get(guid)?
            .ok_or(Error::new(ErrorKind::NotFound, "voucher for the guid"))?;

        let mut client = Client::new(transport);

        let ack = client.send(&to0::Hello::new(Some(self.config.flags.clone())))?;

        let to0d = CborBstr::new(to0::To0d::new(
            voucher,
            self.config.wait_seconds,
            ack.nonce,
        ));

        let alg = crypto::hash_algorithm(self.signer.key_type());
        let to0d_hash = crypto::hash(alg, to0d.bytes()?)?;

        let blob = To1dBlobPayload::new(addresses, to0d_hash);

        let mut payload = Vec::new();
        ciborium::into_writer(&blob, &mut payload)
            .map_err(|_| Error::new(ErrorKind::Encode, "the to1d payload"))?;

        let unprotected = self.unprotected_with_key()?;

        let to1d = self.sign(unprotected, payload)?;

        let accept = client.send(&to0::OwnerSign::new(to0d, to1d))?;

        info!(%guid, wait_seconds = accept.wait_seconds, "registered at the rendezvous");

        Ok(accept.wait_seconds)
    }

    // Attaches the presented key when acting through a delegate, so the
    // verifier can walk the chain.
    fn unprotected_with_key(&self) -> Result<HeaderBuilder, Error> {
        use coset::iana::EnumI64;

        let Some(_) = &self.delegate else {
            return Ok(HeaderBuilder::new());
        };

        let presented = self.presented_key()?;

        let value = ciborium::Value::serialized(&presented)
            .map_err(|_| Error::new(ErrorKind::Encode, "the presented key"))?;

        Ok(HeaderBuilder::new().value(
            coset::iana::HeaderParameter::CuphOwnerPubKey.to_i64(),
            value,
        ))
    }

    fn hello_device(&mut self, body: &[u8]) -> Result<Reply, Error> {
        let msg = HelloDevice::decode(body)?;

        let guid = msg.guid();

        let voucher = self
            .vouchers
            .get(&guid)?
            .ok_or(Error::new(ErrorKind::NotFound, "voucher for the guid"))?;

        // The chain must end at the key this service holds
        let owner_key = voucher::verify(&voucher)?;
        if self.delegate.is_none() && !owner_key.same_key(&self.signer.public_key()?) {
            return Err(Error::new(ErrorKind::Invalid, "voucher owned by another key"));
        }

        let kex_suite = msg.kex_suite()?;
        let cipher = msg.cipher_suite();

        let kex = OwnerKeyExchange::create(kex_suite, cipher, &self.rng)?;

        let nonce_prove_dv = NonceTo2ProveDv(crypto::random_nonce(&self.rng)?);

        let alg = crypto::hash_algorithm(self.signer.key_type());

        let payload = ProveOvHdrPayload {
            ov_header: voucher.header().clone(),
            num_ov_entries: voucher.num_entries()?,
            hmac: voucher.header_hmac().clone(),
            nonce_to2_prove_ov: msg.nonce(),
            eb_sig_info: EBSigInfo(msg.ea_sig_info().0.clone()),
            xa_key_exchange: kex.xa()?,
            hello_device_hash: crypto::hash(alg, body)?,
            max_owner_message_size: self.config.max_message_size,
        };

        let unprotected = {
            use coset::iana::EnumI64;

            let presented = ciborium::Value::serialized(&self.presented_key()?)
                .map_err(|_| Error::new(ErrorKind::Encode, "the presented key"))?;

            let nonce = ciborium::Value::serialized(&nonce_prove_dv)
                .map_err(|_| Error::new(ErrorKind::Encode, "the CUPHNonce"))?;

            HeaderBuilder::new()
                .value(
                    coset::iana::HeaderParameter::CuphOwnerPubKey.to_i64(),
                    presented,
                )
                .value(coset::iana::HeaderParameter::CuphNonce.to_i64(), nonce)
        };

        let sign = self.sign(unprotected, payload.encode()?)?;

        let session = To2Session {
            guid,
            step: To2Step::Entries { next: 0 },
            nonce_prove_dv,
            kex: Some(kex),
            keys: None,
            nonce_setup_dv: None,
            replacement: None,
            modules: (self.modules)(),
            si_mtu: usize::from(self.config.max_message_size),
            started: Instant::now(),
        };

        let token = self.sessions.create(session)?;

        info!(%guid, "TO2 session started");

        Ok(Reply {
            msg_type: ProveOvHdr::MSG_TYPE,
            body: ProveOvHdr::new(sign).encode_vec()?,
            token: Some(token),
        })
    }

    fn session(&self, token: Option<&SessionToken>) -> Result<(SessionToken, To2Session), Error> {
        let token = token.ok_or(Error::new(ErrorKind::Invalid, "missing session token"))?;

        let session = self.sessions.take(token)?;

        if session.started.elapsed() > self.config.turn_timeout {
            return Err(Error::new(ErrorKind::Unavailable, "session deadline"));
        }

        Ok((token.clone(), session))
    }

    fn get_ov_next_entry(
        &mut self,
        body: &[u8],
        token: Option<&SessionToken>,
    ) -> Result<Reply, Error> {
        let (token, mut session) = self.session(token)?;

        let To2Step::Entries { next } = session.step else {
            return Err(Error::new(ErrorKind::UnexpectedMessage, "for this session"));
        };

        let msg = GetOvNextEntry::decode(body)?;

        if msg.entry_num != next {
            return Err(Error::new(ErrorKind::Invalid, "entry number out of order"));
        }

        let voucher = self
            .vouchers
            .get(&session.guid)?
            .ok_or(Error::new(ErrorKind::NotFound, "voucher for the guid"))?;

        let entry = voucher
            .entries()
            .get(usize::from(msg.entry_num))
            .ok_or(Error::new(ErrorKind::Invalid, "entry number out of range"))?
            .clone();

        let last = usize::from(msg.entry_num) + 1 == voucher.entries().len();

        session.step = if last {
            To2Step::ProveDevice
        } else {
            To2Step::Entries { next: next + 1 }
        };
        session.started = Instant::now();

        let reply = OvNextEntry::new(msg.entry_num, entry);

        self.sessions.store(&token, session)?;

        Ok(Reply {
            msg_type: OvNextEntry::MSG_TYPE,
            body: reply.encode_vec()?,
            token: Some(token),
        })
    }

    fn prove_device(&mut self, body: &[u8], token: Option<&SessionToken>) -> Result<Reply, Error> {
        let (token, mut session) = self.session(token)?;

        if !matches!(session.step, To2Step::ProveDevice) {
            return Err(Error::new(ErrorKind::UnexpectedMessage, "for this session"));
        }

        let msg = ProveDevice::decode(body)?;

        let voucher = self
            .vouchers
            .get(&session.guid)?
            .ok_or(Error::new(ErrorKind::NotFound, "voucher for the guid"))?;

        // Proof of possession of the device key
        let device_key = device_verification_key(&voucher)?;
        crypto::verify_cose_sign1(msg.token(), &device_key)?;

        let payload = msg
            .token()
            .payload
            .as_deref()
            .ok_or(Error::new(ErrorKind::Invalid, "EAT payload is missing"))?;
        let eat = EatPayload::decode(payload)?;

        if *eat.nonce() != session.nonce_prove_dv.0 {
            return Err(Error::new(ErrorKind::Verify, "EAT nonce mismatch"));
        }

        if *eat.guid() != session.guid {
            return Err(Error::new(ErrorKind::Verify, "EAT guid mismatch"));
        }

        let xb = eat_key_exchange(&eat)?;

        let nonce_setup_dv = msg.setup_dv_nonce()?;

        let kex = session
            .kex
            .take()
            .ok_or(Error::new(ErrorKind::Invalid, "key exchange already done"))?;

        let keys = kex.finish(&xb)?;

        // Replacement credential values for the next incarnation
        let mut guid = [0u8; 16];
        self.rng
            .fill(&mut guid)
            .map_err(|_| Error::new(ErrorKind::Crypto, "to generate the replacement guid"))?;
        let replacement_guid = Guid::new(guid);

        let owner2_key = self.signer.public_key()?;

        let replacement_header = OvHeader {
            ovh_prot_ver: PROTOCOL_VERSION,
            ov_guid: replacement_guid,
            ov_rv_info: self.rv_info.clone(),
            ov_device_info: voucher.header().ov_device_info.clone().into_owned().into(),
            ov_pub_key: owner2_key.clone(),
            ov_dev_cert_chain_hash: voucher
                .header()
                .ov_dev_cert_chain_hash
                .clone()
                .map(|hash| hash.into_owned()),
        };

        let setup = SetupDevicePayload {
            rv_info: self.rv_info.clone(),
            guid: replacement_guid,
            nonce_setup_dv,
            owner2_key,
        };

        // Owner2 signs the replacement values
        let sign = self.signer.cose_sign(HeaderBuilder::new(), setup.encode()?)?;

        let reply = SetupDevice::new(sign).encode_vec()?;
        let reply = keys.encrypt(&self.rng, &reply)?;

        session.keys = Some(keys);
        session.nonce_setup_dv = Some(nonce_setup_dv);
        session.replacement = Some(Replacement {
            header: CborBstr::new(replacement_header),
            hmac: None,
        });
        session.step = To2Step::DeviceReady;
        session.started = Instant::now();

        debug!(guid = %session.guid, %replacement_guid, "device proven, session key derived");

        self.sessions.store(&token, session)?;

        Ok(Reply {
            msg_type: SetupDevice::MSG_TYPE,
            body: reply,
            token: Some(token),
        })
    }

    fn decrypt_in<M>(session: &To2Session, body: &[u8]) -> Result<M, Error>
    where
        M: Message,
    {
        let keys = session
            .keys
            .as_ref()
            .ok_or(Error::new(ErrorKind::Invalid, "session key is missing"))?;

        let plain = keys.decrypt(body)?;

        M::decode(&plain)
    }

    fn encrypt_out<M>(&self, session: &To2Session, msg: &M) -> Result<Vec<u8>, Error>
    where
        M: Message,
    {
        let keys = session
            .keys
            .as_ref()
            .ok_or(Error::new(ErrorKind::Invalid, "session key is missing"))?;

        keys.encrypt(&self.rng, &msg.encode_vec()?)
    }

    fn device_ready(&mut self, body: &[u8], token: Option<&SessionToken>) -> Result<Reply, Error> {
        let (token, mut session) = self.session(token)?;

        if !matches!(session.step, To2Step::DeviceReady) {
            return Err(Error::new(ErrorKind::UnexpectedMessage, "for this session"));
        }

        let msg: DeviceServiceInfoReady = Self::decrypt_in(&session, body)?;

        if let Some(replacement) = &mut session.replacement {
            replacement.hmac = msg.replacement_hmac().cloned().map(HMac::into_owned);
        }

        // Effective chunk budget: the smaller of the two MTUs, minus the
        // protocol overhead
        let device_mtu = msg
            .max_owner_service_info_size()
            .unwrap_or(self.config.max_message_size);
        session.si_mtu = usize::from(device_mtu.min(self.config.max_message_size))
            .saturating_sub(MESSAGE_OVERHEAD);

        let reply = OwnerServiceInfoReady::new(Some(self.config.max_message_size));
        let reply = self.encrypt_out(&session, &reply)?;

        session.step = To2Step::ServiceInfo;
        session.started = Instant::now();

        debug!(si_mtu = session.si_mtu, "service info ready");

        self.sessions.store(&token, session)?;

        Ok(Reply {
            msg_type: OwnerServiceInfoReady::MSG_TYPE,
            body: reply,
            token: Some(token),
        })
    }

    fn device_service_info(
        &mut self,
        body: &[u8],
        token: Option<&SessionToken>,
    ) -> Result<Reply, Error> {
        let (token, mut session) = self.session(token)?;

        if !matches!(session.step, To2Step::ServiceInfo) {
            return Err(Error::new(ErrorKind::UnexpectedMessage, "for this session"));
        }

        let msg: DeviceServiceInfo = Self::decrypt_in(&session, body)?;

        session.modules.handle_device_info(&msg.service_info)?;

        let reply = if msg.is_more {
            // The device holds the channel
            OwnerServiceInfo::new(false, false, Vec::new())
        } else {
            let (info, is_more, is_done) = session.modules.produce(session.si_mtu)?;

            if is_done {
                session.step = To2Step::Done;
            }

            OwnerServiceInfo::new(is_more, is_done, info)
        };

        let reply = self.encrypt_out(&session, &reply)?;

        session.started = Instant::now();
        self.sessions.store(&token, session)?;

        Ok(Reply {
            msg_type: OwnerServiceInfo::MSG_TYPE,
            body: reply,
            token: Some(token),
        })
    }

    fn done(&mut self, body: &[u8], token: Option<&SessionToken>) -> Result<Reply, Error> {
        let (token, mut session) = self.session(token)?;

        if !matches!(session.step, To2Step::Done) {
            return Err(Error::new(ErrorKind::UnexpectedMessage, "for this session"));
        }

        let msg: Done = Self::decrypt_in(&session, body)?;

        if msg.nonce != session.nonce_prove_dv {
            return Err(Error::new(ErrorKind::Verify, "TO2.Done nonce mismatch"));
        }

        let nonce_setup_dv = session
            .nonce_setup_dv
            .ok_or(Error::new(ErrorKind::Invalid, "setup nonce is missing"))?;

        // Commit the replacement voucher, unless the device requested
        // credential reuse
        if let Some(replacement) = session.replacement.take() {
            if let Some(hmac) = replacement.hmac {
                let voucher = self
                    .vouchers
                    .get(&session.guid)?
                    .ok_or(Error::new(ErrorKind::NotFound, "voucher for the guid"))?;

                let owner2_key = self.signer.public_key()?;

                let alg = crypto::hash_algorithm(self.signer.key_type());

                let entry = sign_entry(
                    alg,
                    &self.signer,
                    replacement.header.bytes()?,
                    &owner2_key,
                )?;

                let replacement_guid = replacement.header.ov_guid;

                let replacement_voucher = OwnershipVoucher::new(
                    PROTOCOL_VERSION,
                    replacement.header,
                    hmac,
                    voucher.dev_cert_chain().cloned().map(CoseX509::into_owned),
                    vec![entry],
                );

                self.vouchers.insert(replacement_voucher)?;

                info!(old = %session.guid, new = %replacement_guid, "replacement voucher committed");
            }
        }

        let reply = Done2::new(nonce_setup_dv);
        let reply = self.encrypt_out(&session, &reply)?;

        self.sessions.remove(&token)?;

        info!(guid = %session.guid, "TO2 finished");

        Ok(Reply {
            msg_type: Done2::MSG_TYPE,
            body: reply,
            token: Some(token),
        })
    }
}

impl<S, V> Responder for OwnerService<S, V>
where
    S: Signer,
    V: VoucherStore,
{
    fn respond(
        &mut self,
        msg_type: Msgtype,
        body: &[u8],
        token: Option<&SessionToken>,
    ) -> Result<Reply, Error> {
        match msg_type {
            HelloDevice::MSG_TYPE => self.hello_device(body),
            GetOvNextEntry::MSG_TYPE => self.get_ov_next_entry(body, token),
            ProveDevice::MSG_TYPE => self.prove_device(body, token),
            DeviceServiceInfoReady::MSG_TYPE => self.device_ready(body, token),
            DeviceServiceInfo::MSG_TYPE => self.device_service_info(body, token),
            Done::MSG_TYPE => self.done(body, token),
            _ => Err(Error::new(
                ErrorKind::UnexpectedMessage,
                "for the owner service",
            )),
        }
    }
}

/// The device key exchange contribution from the EAT FDO claim.
fn eat_key_exchange(eat: &EatPayload) -> Result<XBKeyExchange<'static>, Error> {
    let fdo = eat
        .fdo()
        .ok_or(Error::new(ErrorKind::Invalid, "EAT FDO claim is missing"))?;

    let xb = fdo
        .as_array()
        .and_then(|array| array.first())
        .and_then(|value| value.as_bytes())
        .ok_or(Error::new(ErrorKind::Invalid, "EAT FDO claim layout"))?;

    Ok(XBKeyExchange::from_bytes(xb.clone()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::store::MemoryVoucherStore;
    use crate::voucher::tests::test_rv_info;

    use super::*;

    fn service() -> OwnerService<SoftwareSigner, MemoryVoucherStore> {
        OwnerService::new(
            SoftwareSigner::generate_p256().unwrap(),
            test_rv_info(),
            MemoryVoucherStore::new(),
            Box::new(OwnerModules::new),
            SessionConfig::default(),
        )
    }

    #[test]
    fn hello_device_unknown_guid() {
        let mut service = service();

        let hello = HelloDevice::new(
            1300,
            Guid::new([3; 16]),
            astarte_fdo_protocol::types::NonceTo2ProveOv([1u8; 16].into()),
            astarte_fdo_protocol::kex::KexSuite::Ecdh256,
            astarte_fdo_protocol::kex::CipherSuite::A128Gcm,
            astarte_fdo_protocol::sign_info::EASigInfo(
                astarte_fdo_protocol::sign_info::SigInfo::new(
                    astarte_fdo_protocol::sign_info::DeviceSgType::StSecP256R1,
                ),
            ),
            None,
        );

        let err = service
            .respond(HelloDevice::MSG_TYPE, &hello.encode_vec().unwrap(), None)
            .unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn get_entry_requires_a_session() {
        let mut service = service();

        let msg = GetOvNextEntry::new(0);

        let err = service
            .respond(GetOvNextEntry::MSG_TYPE, &msg.encode_vec().unwrap(), None)
            .unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn unexpected_message_type() {
        let mut service = service();

        let err = service.respond(10, &[0x80], None).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::UnexpectedMessage);
    }
}
