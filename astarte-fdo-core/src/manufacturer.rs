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

//! Manufacturer side of the Device Initialize protocol.
//!
//! On DI.AppStart the service chooses a fresh GUID, certifies the device
//! key from the CSR and answers with the voucher header; on DI.SetHMAC it
//! assembles the voucher (header, device HMAC, device certificate chain
//! and entry 0 transferring custody to the initial owner) and persists it.

use std::time::Instant;

use astarte_fdo_protocol::cbor::CborBstr;
use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::messages::di::{AppStart, Done, SetCredentials, SetHmac};
use astarte_fdo_protocol::messages::Message;
use astarte_fdo_protocol::pubkey::{KeyType, PublicKey};
use astarte_fdo_protocol::rv::RendezvousInfo;
use astarte_fdo_protocol::types::{Guid, Msgtype, PROTOCOL_VERSION};
use astarte_fdo_protocol::voucher::{OvHeader, OwnershipVoucher};
use astarte_fdo_protocol::x509::CoseX509;
use astarte_fdo_protocol::Error;
use aws_lc_rs::rand::{SecureRandom, SystemRandom};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyUsagePurpose,
};
use tracing::{error, info};
use x509_parser::prelude::FromDer;

use crate::crypto::{self, Signer, SoftwareSigner};
use crate::store::{MemorySessionStore, SessionStore, VoucherStore};
use crate::transport::{Reply, Responder, SessionToken};
use crate::voucher::sign_entry;
use crate::SessionConfig;

const CA_COMMON_NAME: &str = "FDO Device CA";

struct DiSession {
    header: CborBstr<'static, OvHeader<'static>>,
    chain: CoseX509<'static>,
    started: Instant,
}

/// Manufacturer service running the server side of DI.
pub struct ManufacturerService<S, V> {
    signer: S,
    owner_key: Option<PublicKey<'static>>,
    ca: SoftwareSigner,
    ca_cert: Vec<u8>,
    rv_info: RendezvousInfo<'static>,
    vouchers: V,
    sessions: MemorySessionStore<DiSession>,
    config: SessionConfig,
    rng: SystemRandom,
}

impl<S, V> ManufacturerService<S, V>
where
    S: Signer,
    V: VoucherStore,
{
    /// Creates the service.
    ///
    /// `signer` holds the manufacturer key that anchors every voucher;
    /// `rv_info` is baked into each header.
    pub fn new(
        signer: S,
        rv_info: RendezvousInfo<'static>,
        vouchers: V,
        config: SessionConfig,
    ) -> Result<Self, Error> {
        let ca = SoftwareSigner::generate_p256()?;

        let ca_cert = Self::self_signed_ca(&ca)?;

        Ok(Self {
            signer,
            owner_key: None,
            ca,
            ca_cert,
            rv_info,
            vouchers,
            sessions: MemorySessionStore::new(),
            config,
            rng: SystemRandom::new(),
        })
    }

    /// Transfers custody to a named initial owner instead of the
    /// manufacturer itself.
    pub fn with_initial_owner(mut self, owner_key: PublicKey<'static>) -> Self {
        self.owner_key = Some(owner_key);

        self
    }

    /// The voucher store of the service.
    pub fn vouchers(&self) -> &V {
        &self.vouchers
    }

    fn self_signed_ca(ca: &SoftwareSigner) -> Result<Vec<u8>, Error> {
        let mut params = CertificateParams::new([]).map_err(|err| {
            error!(error = %err, "couldn't create ca parameters");

            Error::new(ErrorKind::Crypto, "to create ca parameters")
        })?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, CA_COMMON_NAME);
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
        ];

        let bridge = ca.rcgen_key()?;

        let cert = params.self_signed(&bridge).map_err(|err| {
            error!(error = %err, "couldn't self sign the ca certificate");

            Error::new(ErrorKind::Crypto, "to self sign the ca certificate")
        })?;

        Ok(cert.der().to_vec())
    }

    fn sign_device_cert(&self, key_type: KeyType, csr: &[u8]) -> Result<Vec<u8>, Error> {
        let (_, parsed) =
            x509_parser::certification_request::X509CertificationRequest::from_der(csr).map_err(
                |err| {
                    error!(error = %err, "couldn't parse the device csr");

                    Error::new(ErrorKind::Invalid, "the device csr")
                },
            )?;

        let common_name = parsed
            .certification_request_info
            .subject
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("fdo-device")
            .to_string();

        let subject = SubjectKey {
            bits: parsed
                .certification_request_info
                .subject_pki
                .subject_public_key
                .data
                .to_vec(),
            alg: match key_type {
                KeyType::Secp256R1 => &rcgen::PKCS_ECDSA_P256_SHA256,
                KeyType::Secp384R1 => &rcgen::PKCS_ECDSA_P384_SHA384,
                KeyType::Rsa2048Restr | KeyType::RsaPkcs | KeyType::RsaPss => {
                    return Err(Error::new(ErrorKind::Invalid, "device key type"))
                }
            },
        };

        let mut params = CertificateParams::new([]).map_err(|err| {
            error!(error = %err, "couldn't create device cert parameters");

            Error::new(ErrorKind::Crypto, "to create device cert parameters")
        })?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        params.distinguished_name = dn;
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];

        let mut issuer_params = CertificateParams::new([]).map_err(|err| {
            error!(error = %err, "couldn't create issuer parameters");

            Error::new(ErrorKind::Crypto, "to create issuer parameters")
        })?;

        let mut issuer_dn = DistinguishedName::new();
        issuer_dn.push(DnType::CommonName, CA_COMMON_NAME);
        issuer_params.distinguished_name = issuer_dn;
        issuer_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        issuer_params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
        ];

        let issuer = Issuer::new(issuer_params, self.ca.rcgen_key()?);

        let cert = params.signed_by(&subject, &issuer).map_err(|err| {
            error!(error = %err, "couldn't sign the device certificate");

            Error::new(ErrorKind::Crypto, "to sign the device certificate")
        })?;

        Ok(cert.der().to_vec())
    }

    fn app_start(&mut self, body: &[u8]) -> Result<Reply, Error> {
        let msg = AppStart::decode(body)?;

        let mfg_info = msg.mfg_info();

        let device_cert = self.sign_device_cert(mfg_info.key_type(), mfg_info.csr())?;

        let mut chain_hash_input =
            Vec::with_capacity(device_cert.len() + self.ca_cert.len());
        chain_hash_input.extend_from_slice(&device_cert);
        chain_hash_input.extend_from_slice(&self.ca_cert);

        let alg = crypto::hash_algorithm(self.signer.key_type());
        let chain_hash = crypto::hash(alg, &chain_hash_input)?;

        let chain = CoseX509::from_der_chain(vec![device_cert, self.ca_cert.clone()])?;

        let mut guid = [0u8; 16];
        self.rng
            .fill(&mut guid)
            .map_err(|_| Error::new(ErrorKind::Crypto, "to generate the guid"))?;
        let guid = Guid::new(guid);

        let header = OvHeader {
            ovh_prot_ver: PROTOCOL_VERSION,
            ov_guid: guid,
            ov_rv_info: self.rv_info.clone(),
            ov_device_info: mfg_info.device_info().to_string().into(),
            ov_pub_key: self.signer.public_key()?,
            ov_dev_cert_chain_hash: Some(chain_hash),
        };

        let header = CborBstr::new(header);

        let reply = SetCredentials {
            ov_header: clone_header(&header)?,
        };

        let token = self.sessions.create(DiSession {
            header,
            chain,
            started: Instant::now(),
        })?;

        info!(%guid, "device initialization started");

        Ok(Reply {
            msg_type: SetCredentials::MSG_TYPE,
            body: reply.encode_vec()?,
            token: Some(token),
        })
    }

    fn set_hmac(&mut self, body: &[u8], token: Option<&SessionToken>) -> Result<Reply, Error> {
        let token = token.ok_or(Error::new(ErrorKind::Invalid, "missing session token"))?;

        let session = self.sessions.take(token)?;

        if session.started.elapsed() > self.config.turn_timeout {
            return Err(Error::new(ErrorKind::Unavailable, "session deadline"));
        }

        let msg = SetHmac::decode(body)?;

        let owner_key = match &self.owner_key {
            Some(key) => key.clone(),
            None => self.signer.public_key()?,
        };

        let alg = crypto::hash_algorithm(self.signer.key_type());

        let entry = sign_entry(alg, &self.signer, session.header.bytes()?, &owner_key)?;

        let guid = session.header.ov_guid;

        let voucher = OwnershipVoucher::new(
            PROTOCOL_VERSION,
            session.header,
            msg.hmac.into_owned(),
            Some(session.chain),
            vec![entry],
        );

        self.vouchers.insert(voucher)?;

        info!(%guid, "voucher created");

        Ok(Reply {
            msg_type: Done::MSG_TYPE,
            body: Done.encode_vec()?,
            token: Some(token.clone()),
        })
    }
}

impl<S, V> Responder for ManufacturerService<S, V>
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
            AppStart::MSG_TYPE => self.app_start(body),
            SetHmac::MSG_TYPE => self.set_hmac(body, token),
            _ => Err(Error::new(
                ErrorKind::UnexpectedMessage,
                "for the manufacturer service",
            )),
        }
    }
}

// Re-encodes through the cached bytes so both copies serialize the same.
fn clone_header(
    header: &CborBstr<'static, OvHeader<'static>>,
) -> Result<CborBstr<'static, OvHeader<'static>>, Error> {
    let bytes = header.bytes()?;

    ciborium::from_reader::<OvHeader<'static>, _>(bytes.as_ref().as_ref())
        .map(CborBstr::new)
        .map_err(|_| Error::new(ErrorKind::Decode, "the voucher header"))
}

/// A certified key the service does not hold the private half of.
struct SubjectKey {
    bits: Vec<u8>,
    alg: &'static rcgen::SignatureAlgorithm,
}

impl rcgen::PublicKeyData for SubjectKey {
    fn der_bytes(&self) -> &[u8] {
        &self.bits
    }

    fn algorithm(&self) -> &'static rcgen::SignatureAlgorithm {
        self.alg
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::store::MemoryVoucherStore;
    use crate::voucher::tests::test_rv_info;
    use crate::voucher::verify;

    use super::*;

    fn service() -> ManufacturerService<SoftwareSigner, MemoryVoucherStore> {
        ManufacturerService::new(
            SoftwareSigner::generate_p256().unwrap(),
            test_rv_info(),
            MemoryVoucherStore::new(),
            SessionConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn di_issues_a_verifiable_voucher() {
        let mut service = service();

        let device = SoftwareSigner::generate_p256().unwrap();
        let csr = device.csr("device-model").unwrap();

        let app_start = AppStart::new(astarte_fdo_protocol::messages::di::DeviceMfgInfo::new(
            KeyType::Secp256R1,
            astarte_fdo_protocol::pubkey::KeyEncoding::X509,
            "SN-1".into(),
            "device-model".into(),
            std::borrow::Cow::Owned(csr.into()),
        ));

        let reply = service
            .respond(AppStart::MSG_TYPE, &app_start.encode_vec().unwrap(), None)
            .unwrap();

        assert_eq!(reply.msg_type, SetCredentials::MSG_TYPE);
        let token = reply.token.clone().unwrap();

        let creds = SetCredentials::decode(&reply.body).unwrap();

        let hmac = crypto::hmac_sign(
            astarte_fdo_protocol::hash::HashAlg::HmacSha256,
            &[0x42; 32],
            creds.ov_header.bytes().unwrap(),
        )
        .unwrap();

        let set_hmac = SetHmac::new(hmac);

        let reply = service
            .respond(
                SetHmac::MSG_TYPE,
                &set_hmac.encode_vec().unwrap(),
                Some(&token),
            )
            .unwrap();

        assert_eq!(reply.msg_type, Done::MSG_TYPE);

        // The stored voucher verifies and is owned by the manufacturer key
        let guid = creds.ov_header.ov_guid;
        let voucher = service.vouchers().get(&guid).unwrap().unwrap();

        let owner = verify(&voucher).unwrap();
        assert!(owner.same_key(&service.signer.public_key().unwrap()));

        // The device certificate chain carries the device key
        let chain = voucher.dev_cert_chain().unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.leaf().key_bits(), device.public_point().unwrap());
    }

    #[test]
    fn set_hmac_requires_a_session() {
        let mut service = service();

        let hmac = crypto::hmac_sign(
            astarte_fdo_protocol::hash::HashAlg::HmacSha256,
            &[0x42; 32],
            b"header",
        )
        .unwrap();

        let msg = SetHmac::new(hmac);

        let err = service
            .respond(SetHmac::MSG_TYPE, &msg.encode_vec().unwrap(), None)
            .unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn unexpected_message_type() {
        let mut service = service();

        let err = service.respond(60, &[0x80], None).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::UnexpectedMessage);
    }
}
