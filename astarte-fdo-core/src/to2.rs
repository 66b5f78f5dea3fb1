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

//! Transfer Ownership Protocol 2 (TO2), device side.
//!
//! The device verifies the voucher custody chain entry by entry, proves
//! possession of its key, derives the session key, streams ServiceInfo
//! and finally commits the replacement credential. When the owner acts
//! through a delegate chain, the chain must be anchored at the voucher
//! owner key and scoped to onboarding.
//!
//! Failure at any step is fatal to the session; a failure on one owner
//! address permits trying the next one returned by TO1.

use std::borrow::Cow;

use astarte_fdo_protocol::credential::DeviceCredential;
use astarte_fdo_protocol::eat::{EatPayload, EUPH_NONCE};
use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::kex::{CipherSuite, KexSuite};
use astarte_fdo_protocol::messages::to2::{
    DeviceServiceInfo, DeviceServiceInfoReady, Done, GetOvNextEntry, HelloDevice, ProveDevice,
    SetupDevicePayload,
};
use astarte_fdo_protocol::messages::Message;
use astarte_fdo_protocol::pubkey::{KeyType, PublicKey};
use astarte_fdo_protocol::rv::RvTo2AddrEntry;
use astarte_fdo_protocol::sign_info::{EASigInfo, SigInfo};
use astarte_fdo_protocol::types::{NonceTo2SetupDv, PROTOCOL_VERSION};
use astarte_fdo_protocol::voucher::OvHeader;
use astarte_fdo_protocol::Error;
use aws_lc_rs::rand::SystemRandom;
use coset::HeaderBuilder;
use serde_bytes::ByteBuf;
use tracing::{debug, error, info, warn};

use crate::crypto::{
    self, signature_algorithm, DeviceKeyExchange, SessionKeys, Signer, SoftwareSigner,
};
use crate::delegate::{self, DelegateFunction};
use crate::serviceinfo::devmod::DevmodInfo;
use crate::serviceinfo::{DeviceModules, MESSAGE_OVERHEAD};
use crate::to1::LookupOutcome;
use crate::transport::{Client, Transport};
use crate::voucher::ChainVerifier;
use crate::SessionConfig;

/// Result of a successful onboarding.
#[derive(Debug)]
pub struct OnboardOutcome {
    /// The committed device credential.
    pub credential: DeviceCredential<'static>,
    /// Whether the owner granted credential reuse.
    pub reused: bool,
}

/// Runs TO2 against the owner found by TO1.
///
/// Iterates the owner addresses: a failing address permits trying the
/// next one; the exhaustion of all addresses is a transfer failure.
/// `module_factory` builds a fresh ServiceInfo registry per attempt.
pub fn onboard<T, F>(
    creds: &DeviceCredential<'_>,
    lookup: &LookupOutcome,
    devmod: &DevmodInfo,
    module_factory: &dyn Fn() -> DeviceModules,
    config: &SessionConfig,
    mut connect: F,
) -> Result<OnboardOutcome, Error>
where
    T: Transport,
    F: FnMut(&RvTo2AddrEntry<'_>) -> Result<T, Error>,
{
    let signer = device_signer(creds)?;

    let addresses = lookup.addresses()?;

    for (idx, addr) in addresses.iter().enumerate() {
        let transport = match connect(addr) {
            Ok(transport) => transport,
            Err(err) => {
                warn!(idx, error = %err, "couldn't reach the owner");

                continue;
            }
        };

        let modules = module_factory();

        match run(creds, lookup, &signer, devmod, modules, config, transport) {
            Ok(outcome) => return Ok(outcome),
            Err(err) => {
                error!(idx, error = %err, "onboarding attempt failed");
            }
        }
    }

    Err(Error::new(ErrorKind::Unavailable, "transfer failed"))
}

fn device_signer(creds: &DeviceCredential<'_>) -> Result<SoftwareSigner, Error> {
    SoftwareSigner::from_pkcs8(KeyType::Secp256R1, &creds.dc_private_key)
        .or_else(|_| SoftwareSigner::from_pkcs8(KeyType::Secp384R1, &creds.dc_private_key))
        .map_err(|_| Error::new(ErrorKind::Credential, "device private key"))
}

fn run<T>(
    creds: &DeviceCredential<'_>,
    lookup: &LookupOutcome,
    signer: &SoftwareSigner,
    devmod: &DevmodInfo,
    mut modules: DeviceModules,
    config: &SessionConfig,
    transport: T,
) -> Result<OnboardOutcome, Error>
where
    T: Transport,
{
    let rng = SystemRandom::new();
    let mut client = Client::new(transport);

    // 1. HelloDevice / ProveOVHdr
    let nonce_prove_ov =
        astarte_fdo_protocol::types::NonceTo2ProveOv(crypto::random_nonce(&rng)?);

    let sg_type = {
        use coset::iana::EnumI64;

        astarte_fdo_protocol::sign_info::DeviceSgType::try_from(
            signature_algorithm(signer.key_type(), false).to_i64(),
        )?
    };

    let hello = HelloDevice::new(
        config.max_message_size,
        creds.dc_guid,
        nonce_prove_ov,
        KexSuite::Ecdh256,
        CipherSuite::A128Gcm,
        EASigInfo(SigInfo::new(sg_type)),
        Some(config.flags.clone()),
    );

    let hello_bytes = hello.encode_vec()?;

    let prove_ov = client.send(&hello)?;

    info!("TO2.HelloDevice sent");

    let payload = prove_ov.payload()?;
    let hdr = prove_ov.header()?;

    // The redirect blob and the header proof are signed by the key the
    // owner presents
    if let Some(redirect) = lookup.redirect() {
        crypto::verify_cose_sign1(redirect.to1d(), hdr.pubkey())
            .inspect_err(|_| error!("couldn't verify the TO1 redirect signature"))?;

        info!("TO2.ProveOVHdr redirect verified");
    }

    crypto::verify_cose_sign1(prove_ov.sign(), hdr.pubkey())
        .inspect_err(|_| error!("couldn't verify the TO2.ProveOVHdr signature"))?;

    if payload.nonce_to2_prove_ov != nonce_prove_ov {
        return Err(Error::new(ErrorKind::Verify, "proof nonce mismatch"));
    }

    // The voucher header must be the one this credential was bound to
    let mut buf = Vec::new();
    ciborium::into_writer(&payload.ov_header.ov_pub_key, &mut buf)
        .map_err(|_| Error::new(ErrorKind::Encode, "the manufacturer public key"))?;
    crypto::verify_hash(&creds.dc_pub_key_hash, &buf)
        .inspect_err(|_| error!("manufacturer key hash mismatch"))?;

    crypto::hmac_verify(
        &creds.dc_hmac_secret,
        &payload.hmac,
        payload.ov_header.bytes()?,
    )
    .inspect_err(|_| error!("voucher header hmac mismatch"))?;

    crypto::verify_hash(&payload.hello_device_hash, &hello_bytes)
        .inspect_err(|_| error!("hello device hash mismatch"))?;

    info!("TO2.ProveOVHdr verified");

    // 2. GetOVNextEntry: extend the running custody verification
    if payload.num_ov_entries == 0 {
        return Err(Error::new(ErrorKind::Verify, "empty voucher chain"));
    }

    let mut verifier = ChainVerifier::start(&payload.ov_header)?;

    for num in 0..payload.num_ov_entries {
        let entry = client.send(&GetOvNextEntry::new(num))?;

        if entry.num() != num {
            return Err(Error::new(ErrorKind::Invalid, "entry number out of order"));
        }

        verifier.verify_entry(entry.entry())?;

        debug!(num, "voucher entry verified");
    }

    let owner_key = verifier.into_owner_key();

    verify_presented_owner(&owner_key, hdr.pubkey())?;

    info!("voucher custody chain verified");

    // 3. ProveDevice / SetupDevice
    let kex = DeviceKeyExchange::create(KexSuite::Ecdh256, CipherSuite::A128Gcm, &rng)?;

    let xb = kex.xb()?;

    let keys = kex.finish(&payload.xa_key_exchange)?;

    let nonce_setup_dv = NonceTo2SetupDv(crypto::random_nonce(&rng)?);

    let eat = EatPayload::new(hdr.nonce().0, creds.dc_guid).with_fdo(ciborium::Value::Array(
        vec![ciborium::Value::Bytes(xb.as_ref().to_vec())],
    ));

    let unprotected = HeaderBuilder::new().value(
        EUPH_NONCE,
        ciborium::Value::serialized(&nonce_setup_dv)
            .map_err(|_| Error::new(ErrorKind::Encode, "the EUPHNonce"))?,
    );

    let token = signer.cose_sign(unprotected, eat.encode()?)?;

    let setup = client.send_expect_encrypted(&keys, &ProveDevice::new(token))?;

    info!("TO2.ProveDevice succeeded");

    let setup_payload = setup.payload()?;

    crypto::verify_cose_sign1(setup.sign(), &setup_payload.owner2_key)
        .inspect_err(|_| error!("couldn't verify the TO2.SetupDevice signature"))?;

    if setup_payload.nonce_setup_dv != nonce_setup_dv {
        return Err(Error::new(ErrorKind::Verify, "setup nonce mismatch"));
    }

    info!("TO2.SetupDevice verified");

    // 4. DeviceServiceInfoReady / OwnerServiceInfoReady
    let reused = is_credential_reuse(creds, &setup_payload)?;

    let replacement_hmac = if reused {
        None
    } else {
        let header = replacement_header(creds, &payload.ov_header, &setup_payload)?;

        let mut buf = Vec::new();
        ciborium::into_writer(&header, &mut buf)
            .map_err(|_| Error::new(ErrorKind::Encode, "the replacement header"))?;

        let alg = crypto::hmac_algorithm(signer.key_type());

        Some(crypto::hmac_sign(alg, &creds.dc_hmac_secret, &buf)?)
    };

    let ready = DeviceServiceInfoReady::new(replacement_hmac, Some(config.max_message_size));

    let owner_ready = client.send_encrypted(&keys, &rng, &ready)?;

    // 5. ServiceInfo streaming
    let owner_mtu = owner_ready
        .max_device_service_info_size()
        .unwrap_or(config.max_message_size);
    let si_mtu = usize::from(owner_mtu.min(config.max_message_size))
        .saturating_sub(MESSAGE_OVERHEAD);

    info!(si_mtu, "TO2.DeviceServiceInfoReady done");

    modules.push_chunks(devmod.chunks(&modules.names())?);

    stream_service_info(&mut client, &keys, &rng, &mut modules, si_mtu)?;

    info!("TO2.OwnerServiceInfo done");

    // 6. Done / Done2
    let done = client.send_encrypted(&keys, &rng, &Done::new(hdr.nonce()))?;

    if done.nonce != nonce_setup_dv {
        return Err(Error::new(ErrorKind::Verify, "done nonce mismatch"));
    }

    info!("TO2.Done finished");

    let credential = if reused {
        owned_credential(creds)?
    } else {
        commit_credential(creds, signer, &setup_payload)?
    };

    Ok(OnboardOutcome { credential, reused })
}

/// Checks the presented key against the verified voucher owner.
///
/// A differing key must be a delegate chain anchored at the voucher
/// owner and scoped to onboarding.
fn verify_presented_owner(
    owner_key: &PublicKey<'static>,
    presented: &PublicKey<'_>,
) -> Result<(), Error> {
    if owner_key.same_key(presented) {
        return Ok(());
    }

    let Some(chain) = presented.chain() else {
        debug!(k1 = ?owner_key, k2 = ?presented, "final key mismatch");

        return Err(Error::new(ErrorKind::Verify, "final owner key mismatch"));
    };

    delegate::verify_chain(chain, Some(owner_key), Some(DelegateFunction::Onboard), None)?;

    info!("delegate chain authorized for onboarding");

    Ok(())
}

fn stream_service_info<T>(
    client: &mut Client<T>,
    keys: &SessionKeys,
    rng: &SystemRandom,
    modules: &mut DeviceModules,
    si_mtu: usize,
) -> Result<(), Error>
where
    T: Transport,
{
    loop {
        let (info, is_more) = modules.produce(si_mtu)?;

        let msg = DeviceServiceInfo::new(is_more, info);

        let owner_info = client.send_encrypted(keys, rng, &msg)?;

        debug!(
            len = owner_info.service_info.len(),
            is_done = owner_info.is_done,
            "TO2.OwnerServiceInfo received"
        );

        modules.handle_owner_info(&owner_info.service_info, si_mtu)?;

        if owner_info.is_done && !is_more {
            return Ok(());
        }
    }
}

fn is_credential_reuse(
    creds: &DeviceCredential<'_>,
    setup: &SetupDevicePayload<'_>,
) -> Result<bool, Error> {
    if setup.guid != creds.dc_guid {
        return Ok(false);
    }

    let mut buf = Vec::new();
    ciborium::into_writer(&setup.owner2_key, &mut buf)
        .map_err(|_| Error::new(ErrorKind::Encode, "the owner2 key"))?;

    Ok(crypto::verify_hash(&creds.dc_pub_key_hash, &buf).is_ok())
}

// Mirrors the header the owner builds for the replacement voucher; the
// two must encode identically for the HMAC to verify later.
fn replacement_header(
    creds: &DeviceCredential<'_>,
    ov_header: &OvHeader<'_>,
    setup: &SetupDevicePayload<'_>,
) -> Result<OvHeader<'static>, Error> {
    Ok(OvHeader {
        ovh_prot_ver: PROTOCOL_VERSION,
        ov_guid: setup.guid,
        ov_rv_info: clone_encoded(&setup.rv_info)?,
        ov_device_info: creds.dc_device_info.clone().into_owned().into(),
        ov_pub_key: setup.owner2_key.clone().into_owned(),
        ov_dev_cert_chain_hash: ov_header
            .ov_dev_cert_chain_hash
            .clone()
            .map(|hash| hash.into_owned()),
    })
}

fn commit_credential(
    creds: &DeviceCredential<'_>,
    signer: &SoftwareSigner,
    setup: &SetupDevicePayload<'_>,
) -> Result<DeviceCredential<'static>, Error> {
    let mut buf = Vec::new();
    ciborium::into_writer(&setup.owner2_key, &mut buf)
        .map_err(|_| Error::new(ErrorKind::Encode, "the owner2 key"))?;

    let alg = crypto::hash_algorithm(signer.key_type());
    let pub_key_hash = crypto::hash(alg, &buf)?;

    Ok(DeviceCredential {
        // Onboarding remains dormant until re-enabled
        dc_active: false,
        dc_prot_ver: PROTOCOL_VERSION,
        dc_hmac_secret: Cow::Owned(ByteBuf::from(creds.dc_hmac_secret.to_vec())),
        dc_device_info: creds.dc_device_info.clone().into_owned().into(),
        dc_guid: setup.guid,
        dc_rv_info: clone_encoded(&setup.rv_info)?,
        dc_pub_key_hash: pub_key_hash,
        dc_private_key: Cow::Owned(ByteBuf::from(creds.dc_private_key.to_vec())),
    })
}

fn owned_credential(creds: &DeviceCredential<'_>) -> Result<DeviceCredential<'static>, Error> {
    let buf = creds.encode()?;

    DeviceCredential::decode(&buf)
}

// Round-trips through the encoding to detach the borrowed lifetime.
fn clone_encoded(
    rv_info: &astarte_fdo_protocol::rv::RendezvousInfo<'_>,
) -> Result<astarte_fdo_protocol::rv::RendezvousInfo<'static>, Error> {
    let mut buf = Vec::new();

    ciborium::into_writer(rv_info, &mut buf)
        .map_err(|_| Error::new(ErrorKind::Encode, "the rendezvous info"))?;

    ciborium::from_reader(buf.as_slice())
        .map_err(|_| Error::new(ErrorKind::Decode, "the rendezvous info"))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::crypto::SoftwareSigner;
    use crate::delegate::tests::generate_chain;

    use super::*;

    #[test]
    fn presented_owner_must_match_or_delegate() {
        let owner = SoftwareSigner::generate_p256().unwrap();
        let other = SoftwareSigner::generate_p256().unwrap();

        let owner_key = owner.public_key().unwrap();

        // Same key passes
        verify_presented_owner(&owner_key, &owner.public_key().unwrap()).unwrap();

        // A different bare key fails
        let err =
            verify_presented_owner(&owner_key, &other.public_key().unwrap()).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::Verify);

        // A delegate chain anchored at the owner passes
        let chain = generate_chain("", "", "");
        let root_key = chain.root_key.public_key().unwrap();

        let presented = PublicKey::with_x5chain(
            chain.leaf_key.key_type(),
            chain.chain.clone(),
        );

        verify_presented_owner(&root_key, &presented).unwrap();

        // The same chain anchored elsewhere fails
        let err = verify_presented_owner(&owner_key, &presented).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::Verify);
    }

    #[test]
    fn device_signer_detects_the_curve() {
        let p256 = SoftwareSigner::generate_p256().unwrap();
        let p384 = SoftwareSigner::generate_p384().unwrap();

        for signer in [p256, p384] {
            let creds = DeviceCredential {
                dc_active: true,
                dc_prot_ver: PROTOCOL_VERSION,
                dc_hmac_secret: Cow::Owned(vec![0; 32].into()),
                dc_device_info: "dev".into(),
                dc_guid: astarte_fdo_protocol::types::Guid::new([0; 16]),
                dc_rv_info: crate::voucher::tests::test_rv_info(),
                dc_pub_key_hash: crypto::hash(
                    astarte_fdo_protocol::hash::HashAlg::Sha256,
                    b"key",
                )
                .unwrap(),
                dc_private_key: Cow::Owned(signer.pkcs8().to_vec().into()),
            };

            let loaded = device_signer(&creds).unwrap();

            assert_eq!(loaded.key_type(), signer.key_type());
            assert_eq!(
                loaded.public_point().unwrap(),
                signer.public_point().unwrap()
            );
        }
    }
}
