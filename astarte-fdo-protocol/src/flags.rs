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

//! Capability flags declaring optional protocol features.
//!
//! The flags are an open-ended bitfield appended to the hello messages of
//! TO0, TO1 and TO2; vendor-unique strings may follow the bitfield. Both
//! parts are optional on the wire, an absent value means no optional
//! feature is supported.

use std::borrow::Cow;
use std::fmt::Debug;
use std::marker::PhantomData;

use serde::de::Visitor;
use serde::{Deserialize, Serialize};
use serde_bytes::Bytes;

/// Bit 0 of the first flag byte: the delegate sub-protocol is supported.
pub const DELEGATE_SUPPORT_FLAG: u8 = 0x01;

/// Optional feature flags exchanged in TO0, TO1 and TO2.
///
/// ```cddl
/// CapabilityFlags = [
///     Flags:         bstr,
///     ? VendorUnique: [ * tstr ]
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapabilityFlags<'a> {
    flags: Cow<'a, Bytes>,
    vendor_unique: Vec<Cow<'a, str>>,
}

impl<'a> CapabilityFlags<'a> {
    /// Creates the flags from the raw bitfield.
    pub fn new(flags: Cow<'a, Bytes>) -> Self {
        Self {
            flags,
            vendor_unique: Vec::new(),
        }
    }

    /// Flags with delegate support set.
    pub fn with_delegate_support() -> CapabilityFlags<'static> {
        CapabilityFlags {
            flags: Cow::Owned(vec![DELEGATE_SUPPORT_FLAG].into()),
            vendor_unique: Vec::new(),
        }
    }

    /// Appends a vendor-unique string.
    pub fn push_vendor_unique(&mut self, value: Cow<'a, str>) {
        self.vendor_unique.push(value);
    }

    /// The raw flag bytes.
    pub fn flags(&self) -> &[u8] {
        &self.flags
    }

    /// The vendor-unique strings.
    pub fn vendor_unique(&self) -> &[Cow<'a, str>] {
        &self.vendor_unique
    }

    /// Whether the delegate sub-protocol is supported.
    pub fn supports_delegate(&self) -> bool {
        self.flags
            .first()
            .is_some_and(|first| first & DELEGATE_SUPPORT_FLAG != 0)
    }

    /// Return an owned instance of the flags.
    pub fn into_owned(self) -> CapabilityFlags<'static> {
        CapabilityFlags {
            flags: Cow::Owned(self.flags.into_owned()),
            vendor_unique: self
                .vendor_unique
                .into_iter()
                .map(|s| Cow::Owned(s.into_owned()))
                .collect(),
        }
    }
}

impl Serialize for CapabilityFlags<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            flags,
            vendor_unique,
        } = self;

        if vendor_unique.is_empty() {
            (flags,).serialize(serializer)
        } else {
            (flags, vendor_unique).serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for CapabilityFlags<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Default)]
        struct FlagsVisitor<'a> {
            _marker: PhantomData<CapabilityFlags<'a>>,
        }

        impl<'de, 'a> Visitor<'de> for FlagsVisitor<'a> {
            type Value = CapabilityFlags<'a>;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(formatter, "expecting a CapabilityFlags CBOR sequence")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let flags = seq
                    .next_element::<Cow<'_, Bytes>>()?
                    .ok_or_else(|| serde::de::Error::invalid_length(0, &"at least the flags"))?;

                let vendor_unique = seq
                    .next_element::<Vec<Cow<'_, str>>>()?
                    .unwrap_or_default();

                Ok(CapabilityFlags {
                    flags,
                    vendor_unique,
                })
            }
        }

        deserializer.deserialize_seq(FlagsVisitor::default())
    }
}
