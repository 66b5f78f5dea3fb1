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

//! Wire model for the FIDO Device Onboard protocols.
//!
//! This crate contains the canonical CBOR structures, the COSE envelopes and
//! the typed messages exchanged during Device Initialize (DI), Transfer
//! Ownership 0, 1 and 2 (TO0, TO1, TO2). It performs no I/O and no
//! cryptography: signing, verification and the protocol state machines live
//! in `astarte-fdo-core`.
//!
//! You can find the protocol specification
//! [here](https://fidoalliance.org/specs/FDO/FIDO-Device-Onboard-PS-v1.1-20220419/FIDO-Device-Onboard-PS-v1.1-20220419.html).

pub mod cbor;
pub mod credential;
pub mod eat;
pub mod error;
pub mod flags;
pub mod hash;
pub mod kex;
pub mod messages;
pub mod pubkey;
pub mod rv;
pub mod serviceinfo;
pub mod sign_info;
pub mod types;
pub mod voucher;
pub mod x509;

pub use self::error::Error;
