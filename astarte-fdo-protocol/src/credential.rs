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

//! The Device Credential holds the values which must be persisted in the
//! Device to prepare it for onboarding.
//!
//! It is created during DI and mutated only by a successful TO2, which
//! rotates the GUID, the rendezvous instructions and the owner key hash.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_bytes::Bytes;

use crate::error::ErrorKind;
use crate::hash::Hash;
use crate::rv::RendezvousInfo;
use crate::types::{Guid, Protver};
use crate::Error;

/// Persisted device credentials after DI.
///
/// The stored guid, rendezvous info and key hash fields are updated during
/// the TO2 protocol, see TO2.SetupDevice. The blob also holds the private
/// device state: the HMAC secret and the device signing key. Both require
/// confidentiality.
///
/// This encoding is device-local, it never travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCredential<'a> {
    /// Indicates whether onboarding is active.
    ///
    /// Initialized to true at DI; set to false once TO2 succeeds so
    /// onboarding remains dormant until re-enabled.
    pub dc_active: bool,
    /// Specifies the protocol version.
    pub dc_prot_ver: Protver,
    /// Secret used to HMAC the voucher header.
    ///
    /// Initialized with a random value by the Device during DI.
    pub dc_hmac_secret: Cow<'a, Bytes>,
    /// Device info string chosen by the manufacturer.
    pub dc_device_info: Cow<'a, str>,
    /// Current device GUID, replaced on each successful TO2.
    pub dc_guid: Guid,
    /// Instructions on how to find the Rendezvous Server.
    pub dc_rv_info: RendezvousInfo<'a>,
    /// Hash of the manufacturer public key.
    ///
    /// Must match the hash of `OVHeader.OVPubKey`; replaced on each
    /// successful TO2 with the hash of the new owner key.
    pub dc_pub_key_hash: Hash<'a>,
    /// Device signing key, PKCS#8 DER.
    pub dc_private_key: Cow<'a, Bytes>,
}

impl DeviceCredential<'_> {
    /// Encode the credential for persistence.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();

        ciborium::into_writer(self, &mut buf).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't encode the device credential");

            let _ = err;

            Error::new(ErrorKind::Credential, "encoding the device credential")
        })?;

        Ok(buf)
    }

    /// Decode a persisted credential.
    pub fn decode(buf: &[u8]) -> Result<DeviceCredential<'static>, Error> {
        ciborium::from_reader(buf).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode the device credential");

            let _ = err;

            Error::new(ErrorKind::Credential, "decoding the device credential")
        })
    }
}
