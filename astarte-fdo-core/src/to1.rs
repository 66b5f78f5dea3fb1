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

//! Transfer Ownership Protocol 1 (TO1), device side.
//!
//! The device walks its rendezvous directives in order until one of them
//! yields the owner addresses: either through a rendezvous server lookup
//! (prove possession of the device key over a nonce, receive the signed
//! `to1d` blob), or directly when a directive carries the bypass flag.
//! A failing directive permits advancing to the next one; only the
//! exhaustion of all directives is a failure.

use astarte_fdo_protocol::credential::DeviceCredential;
use astarte_fdo_protocol::eat::EatPayload;
use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::messages::to1::{HelloRv, ProveToRv, RvRedirect};
use astarte_fdo_protocol::rv::{
    RendezvousDirective, RvTo2Addr, RvTo2AddrEntry, RvVariable,
};
use astarte_fdo_protocol::sign_info::{EASigInfo, SigInfo};
use astarte_fdo_protocol::types::{DnsAddress, IpAddress, Port, TransportProtocol};
use astarte_fdo_protocol::Error;
use coset::HeaderBuilder;
use tracing::{debug, info, warn};

use crate::crypto::{signature_algorithm, Signer, SoftwareSigner};
use crate::transport::{Client, Transport};
use crate::SessionConfig;

/// Where TO1 found the owner.
#[derive(Debug)]
pub enum LookupOutcome {
    /// The rendezvous served the owner-signed redirect blob.
    Redirect(RvRedirect),
    /// A bypass directive pointed straight at the owner.
    Bypass(RvTo2Addr<'static>),
}

impl LookupOutcome {
    /// The owner addresses to try for TO2.
    pub fn addresses(&self) -> Result<RvTo2Addr<'static>, Error> {
        match self {
            LookupOutcome::Redirect(redirect) => {
                let blob = redirect.blob()?;

                Ok(blob.take_rv())
            }
            LookupOutcome::Bypass(addrs) => Ok(addrs.clone()),
        }
    }

    /// The redirect blob, absent on a bypass.
    pub fn redirect(&self) -> Option<&RvRedirect> {
        match self {
            LookupOutcome::Redirect(redirect) => Some(redirect),
            LookupOutcome::Bypass(_) => None,
        }
    }
}

/// Runs TO1 for the device, iterating the credential's rendezvous
/// directives.
///
/// `connect` opens a transport towards the rendezvous server described by
/// a directive; returning an error skips to the next directive.
pub fn lookup<T, F>(
    creds: &DeviceCredential<'_>,
    signer: &SoftwareSigner,
    config: &SessionConfig,
    mut connect: F,
) -> Result<LookupOutcome, Error>
where
    T: Transport,
    F: FnMut(&RendezvousDirective<'_>) -> Result<T, Error>,
{
    for (idx, directive) in creds.dc_rv_info.iter().enumerate() {
        if applies_to_owner_only(directive) {
            debug!(idx, "skipping owner-only directive");

            continue;
        }

        if let Some(addrs) = bypass_addresses(directive)? {
            info!(idx, "bypass directive, contacting the owner directly");

            return Ok(LookupOutcome::Bypass(addrs));
        }

        let transport = match connect(directive) {
            Ok(transport) => transport,
            Err(err) => {
                warn!(idx, error = %err, "couldn't reach the rendezvous server");

                continue;
            }
        };

        match lookup_once(creds, signer, config, transport) {
            Ok(redirect) => return Ok(LookupOutcome::Redirect(redirect)),
            Err(err) => {
                warn!(idx, error = %err, "rendezvous lookup failed");
            }
        }
    }

    Err(Error::new(
        ErrorKind::Unavailable,
        "every rendezvous directive failed",
    ))
}

fn lookup_once<T>(
    creds: &DeviceCredential<'_>,
    signer: &SoftwareSigner,
    config: &SessionConfig,
    transport: T,
) -> Result<RvRedirect, Error>
where
    T: Transport,
{
    let mut client = Client::new(transport);

    let sg_type = device_sg_type(signer)?;

    let hello = HelloRv::new(
        creds.dc_guid,
        EASigInfo(SigInfo::new(sg_type)),
        Some(config.flags.clone()),
    );

    let ack = client.send(&hello)?;

    info!("TO1.HelloRV successful");

    let eat = EatPayload::new(ack.nonce.0, creds.dc_guid);

    let token = signer.cose_sign(HeaderBuilder::new(), eat.encode()?)?;

    let redirect = client.send(&ProveToRv::new(token))?;

    info!("TO1.ProveToRV successful");

    Ok(redirect)
}

fn device_sg_type(
    signer: &SoftwareSigner,
) -> Result<astarte_fdo_protocol::sign_info::DeviceSgType, Error> {
    use coset::iana::EnumI64;

    let alg = signature_algorithm(signer.key_type(), false);

    astarte_fdo_protocol::sign_info::DeviceSgType::try_from(alg.to_i64())
}

fn applies_to_owner_only(directive: &RendezvousDirective<'_>) -> bool {
    directive
        .iter()
        .any(|instr| instr.rv_variable == RvVariable::OwnerOnly)
}

/// Builds direct owner addresses from a bypass directive, when present.
fn bypass_addresses(
    directive: &RendezvousDirective<'_>,
) -> Result<Option<RvTo2Addr<'static>>, Error> {
    if !directive
        .iter()
        .any(|instr| instr.rv_variable == RvVariable::Bypass)
    {
        return Ok(None);
    }

    let mut ip: Option<IpAddress> = None;
    let mut dns: Option<String> = None;
    let mut port: Port = 80;
    let mut protocol = TransportProtocol::Http;

    for instr in directive.iter() {
        match instr.rv_variable {
            RvVariable::IPAddress => ip = Some(instr.value()?),
            RvVariable::Dns => dns = Some(instr.value()?),
            RvVariable::DevPort => port = instr.value()?,
            RvVariable::Protocol => {
                let value: astarte_fdo_protocol::rv::RvProtocolValue = instr.value()?;

                protocol = match value {
                    astarte_fdo_protocol::rv::RvProtocolValue::Https => TransportProtocol::Https,
                    _ => TransportProtocol::Http,
                };
            }
            _ => {}
        }
    }

    if ip.is_none() && dns.is_none() {
        return Err(Error::new(
            ErrorKind::Invalid,
            "bypass directive without an address",
        ));
    }

    let entry = RvTo2AddrEntry::new(ip, dns.map(DnsAddress::Owned), port, protocol);

    RvTo2Addr::new(vec![entry])
        .map(Some)
        .ok_or(Error::new(ErrorKind::Invalid, "bypass addresses"))
}
