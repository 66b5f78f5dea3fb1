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

#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

//! Protocol runtime for FIDO Device Onboard.
//!
//! This crate implements the four protocol phases on both the client and
//! the server side:
//!
//! - [`di`]: the device obtains its initial credential from the
//!   [`manufacturer`], which emits the ownership voucher;
//! - TO0 ([`owner`]): the owner registers its network addresses for a
//!   device GUID at the [`rendezvous`] server;
//! - [`to1`]: the device looks the owner up at the rendezvous server;
//! - [`to2`]: the device and the [`owner`] run the actual ownership
//!   transfer, including the ServiceInfo stream and the credential
//!   rotation.
//!
//! The sessions are single threaded and progress message by message over a
//! pluggable [`transport`]; the voucher chain rules live in [`voucher`] and
//! the delegate certificate rules in [`delegate`].

pub mod crypto;
pub mod delegate;
pub mod di;
pub mod manufacturer;
pub mod owner;
pub mod rendezvous;
pub mod serviceinfo;
pub mod store;
pub mod to1;
pub mod to2;
pub mod transport;
pub mod voucher;

pub use astarte_fdo_protocol;
pub use astarte_fdo_protocol::Error;

use std::time::Duration;

use astarte_fdo_protocol::flags::CapabilityFlags;

/// Per-session configuration shared by clients and services.
///
/// The capability flags are a value carried here rather than process-wide
/// state.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum protocol message size this side will accept.
    pub max_message_size: u16,
    /// TTL granted to TO0 registrations, in seconds.
    pub wait_seconds: u32,
    /// Deadline for a single protocol turn; an expired session aborts.
    pub turn_timeout: Duration,
    /// Optional features declared in the hello messages.
    pub flags: CapabilityFlags<'static>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_message_size: 1300,
            wait_seconds: 3600,
            turn_timeout: Duration::from_secs(60),
            flags: CapabilityFlags::with_delegate_support(),
        }
    }
}
