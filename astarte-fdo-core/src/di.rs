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

//! Device Initialize Protocol (DI), device side.
//!
//! The protocol embeds the ownership and manufacturing credentials into
//! the newly created device. The device sends its manufacturing info with
//! a CSR for its key, receives the voucher header bound to a fresh GUID
//! and answers with its HMAC over the header, binding its secret to the
//! voucher. The outcome is the device credential.

use std::borrow::Cow;

use astarte_fdo_protocol::credential::DeviceCredential;
use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::messages::di::{AppStart, DeviceMfgInfo, SetHmac};
use astarte_fdo_protocol::pubkey::KeyEncoding;
use astarte_fdo_protocol::types::PROTOCOL_VERSION;
use astarte_fdo_protocol::Error;
use serde_bytes::ByteBuf;
use tracing::{debug, info};

use crate::crypto::{self, Signer, SoftwareSigner};
use crate::transport::{Client, Transport};

const HMAC_SECRET_LEN: usize = 32;

/// Runs DI against a manufacturer and returns the device credential.
///
/// `signer` holds the device key; its CSR travels in the manufacturing
/// info so the manufacturer can certify it.
pub fn initialize<T>(
    transport: T,
    signer: &SoftwareSigner,
    serial_no: &str,
    device_info: &str,
) -> Result<DeviceCredential<'static>, Error>
where
    T: Transport,
{
    let mut client = Client::new(transport);

    let csr = signer.csr(device_info)?;

    let mfg_info = DeviceMfgInfo::new(
        signer.key_type(),
        KeyEncoding::X509,
        serial_no.to_string().into(),
        device_info.to_string().into(),
        Cow::Owned(csr.into()),
    );

    debug!(serial_no, device_info, "starting device initialization");

    let creds = client.send(&AppStart::new(mfg_info))?;

    info!("DI.AppStart successful");

    let header = creds.ov_header;

    // Hash of the manufacturer key, checked against the voucher during TO2
    let mut buf = Vec::new();
    ciborium::into_writer(&header.ov_pub_key, &mut buf)
        .map_err(|_| Error::new(ErrorKind::Encode, "the manufacturer public key"))?;

    let alg = crypto::hash_algorithm(signer.key_type());
    let pub_key_hash = crypto::hash(alg, &buf)?;

    let secret = signer.random_secret(HMAC_SECRET_LEN)?;

    let hmac_alg = crypto::hmac_algorithm(signer.key_type());
    let hmac = crypto::hmac_sign(hmac_alg, &secret, header.bytes()?)?;

    client.send(&SetHmac::new(hmac))?;

    info!(guid = %header.ov_guid, "DI.Done successful");

    Ok(DeviceCredential {
        dc_active: true,
        dc_prot_ver: PROTOCOL_VERSION,
        dc_hmac_secret: Cow::Owned(ByteBuf::from(secret.to_vec())),
        dc_device_info: header.ov_device_info.clone().into_owned().into(),
        dc_guid: header.ov_guid,
        dc_rv_info: clone_rv_info(&header.ov_rv_info)?,
        dc_pub_key_hash: pub_key_hash,
        dc_private_key: Cow::Owned(ByteBuf::from(signer.pkcs8().to_vec())),
    })
}

// Round-trips through the encoding to detach the borrowed lifetime.
fn clone_rv_info(
    rv_info: &astarte_fdo_protocol::rv::RendezvousInfo<'_>,
) -> Result<astarte_fdo_protocol::rv::RendezvousInfo<'static>, Error> {
    let mut buf = Vec::new();

    ciborium::into_writer(rv_info, &mut buf)
        .map_err(|_| Error::new(ErrorKind::Encode, "the rendezvous info"))?;

    ciborium::from_reader(buf.as_slice())
        .map_err(|_| Error::new(ErrorKind::Decode, "the rendezvous info"))
}
