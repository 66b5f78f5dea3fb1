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

//! ServiceInfo key-value pairs.
//!
//! The ServiceInfo type is a collection of key-value pairs exchanged between
//! the Management Service (on the owner side) and the Management Agent (on
//! the Device side), using the FIDO Device Onboard encrypted channel as a
//! transport. Keys have the form `module:command`.

use std::borrow::Cow;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_bytes::Bytes;

use crate::error::ErrorKind;
use crate::Error;

/// ```cddl
/// ServiceInfo = [
///     * ServiceInfoKV
/// ]
/// ```
pub type ServiceInfo<'a> = Vec<ServiceInfoKv<'a>>;

/// ```cddl
/// ServiceInfoKV = [
///     ServiceInfoKey: tstr,
///     ServiceInfoVal: bstr .cbor any
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfoKv<'a> {
    pub(crate) key: Cow<'a, str>,
    pub(crate) value: Cow<'a, Bytes>,
}

impl<'a> ServiceInfoKv<'a> {
    /// Creates a borrowed service info key value.
    pub fn new(key: &'a str, value: &'a [u8]) -> Self {
        Self {
            key: Cow::Borrowed(key),
            value: Cow::Borrowed(Bytes::new(value)),
        }
    }

    /// Creates an owned key value, CBOR encoding the value.
    pub fn encode<T>(key: String, value: &T) -> Result<ServiceInfoKv<'static>, Error>
    where
        T: Serialize,
    {
        let mut buf = Vec::new();

        ciborium::into_writer(value, &mut buf).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't encode service info value");

            let _ = err;

            Error::new(ErrorKind::Encode, "service info value")
        })?;

        Ok(ServiceInfoKv {
            key: Cow::Owned(key),
            value: Cow::Owned(buf.into()),
        })
    }

    /// Return the service info key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Splits the key into `(module, command)`.
    pub fn module_command(&self) -> Result<(&str, &str), Error> {
        self.key
            .split_once(':')
            .ok_or(Error::new(ErrorKind::Module, "service info key"))
    }

    /// Return the service info value bytes.
    pub fn value_as_bytes(&self) -> &Bytes {
        self.value.as_ref()
    }

    /// Return the decoded service info value.
    pub fn value<T>(&self) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        ciborium::from_reader::<T, &[u8]>(self.value.as_ref()).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode service info value");

            let _ = err;

            Error::new(ErrorKind::Decode, "service info value")
        })
    }

    /// Return an owned instance of the pair.
    pub fn into_owned(self) -> ServiceInfoKv<'static> {
        ServiceInfoKv {
            key: Cow::Owned(self.key.into_owned()),
            value: Cow::Owned(self.value.into_owned()),
        }
    }
}

impl Serialize for ServiceInfoKv<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self { key, value } = self;

        (key, value).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ServiceInfoKv<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (key, value) = Deserialize::deserialize(deserializer)?;

        Ok(Self { key, value })
    }
}

/// Well known command activating or deactivating a module.
pub const ACTIVE_COMMAND: &str = "active";

/// Device [`ServiceInfo`] devmod module name.
///
/// The "devmod" module implements a set of messages to the FIDO Device
/// Onboard Owner that identify the capabilities of the device. All devmod
/// messages are sent by the Device in the first Device ServiceInfo.
pub const DEVMOD_MODULE: &str = "devmod";

/// Keys of the devmod module.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Devmod<'a> {
    /// Indicates the module is active. Devmod is required on all devices.
    Active,
    /// OS name (e.g., Linux).
    Os(Cow<'a, str>),
    /// Architecture name / instruction set (e.g., X86_64).
    Arch(Cow<'a, str>),
    /// Version of OS (e.g., "Ubuntu* 16.0.4LTS").
    Version(Cow<'a, str>),
    /// Model specifier for this Device, manufacturer specific.
    Device(Cow<'a, str>),
    /// Filename separator, that works to make lists of file names.
    Sep(Cow<'a, str>),
    /// Machine formats that can be interpreted by this device, in
    /// preference order, separated by the "sep" value.
    Bin(Cow<'a, str>),
    /// Number of modules supported by this Device.
    Nummodules(usize),
    /// Enumerates the modules supported by this Device.
    ///
    /// `[index, count, module names...]`
    Modules(Vec<Cow<'a, str>>),
}

impl Devmod<'_> {
    /// Returns the ServiceInfo key for the entry.
    pub fn key(&self) -> &'static str {
        match self {
            Devmod::Active => "devmod:active",
            Devmod::Os(_) => "devmod:os",
            Devmod::Arch(_) => "devmod:arch",
            Devmod::Version(_) => "devmod:version",
            Devmod::Device(_) => "devmod:device",
            Devmod::Sep(_) => "devmod:sep",
            Devmod::Bin(_) => "devmod:bin",
            Devmod::Nummodules(_) => "devmod:nummodules",
            Devmod::Modules(_) => "devmod:modules",
        }
    }

    /// Encode the entry as a [`ServiceInfoKv`].
    pub fn to_kv(&self) -> Result<ServiceInfoKv<'static>, Error> {
        let key = self.key().to_string();

        match self {
            Devmod::Active => ServiceInfoKv::encode(key, &true),
            Devmod::Os(value)
            | Devmod::Arch(value)
            | Devmod::Version(value)
            | Devmod::Device(value)
            | Devmod::Sep(value)
            | Devmod::Bin(value) => ServiceInfoKv::encode(key, value),
            Devmod::Nummodules(value) => ServiceInfoKv::encode(key, value),
            Devmod::Modules(names) => {
                let mut list = vec![
                    ciborium::Value::Integer(0.into()),
                    ciborium::Value::Integer(names.len().into()),
                ];
                list.extend(
                    names
                        .iter()
                        .map(|name| ciborium::Value::Text(name.to_string())),
                );

                ServiceInfoKv::encode(key, &ciborium::Value::Array(list))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn service_info_roundtrip() {
        let cases = [
            ServiceInfo::new(),
            vec![ServiceInfoKv::encode("devmod:os".to_string(), &"Linux").unwrap()],
        ];

        for case in cases {
            let mut buf = Vec::new();
            ciborium::into_writer(&case, &mut buf).unwrap();

            let res: ServiceInfo = ciborium::from_reader(buf.as_slice()).unwrap();

            assert_eq!(res, case);
        }
    }

    #[test]
    fn service_info_kv_value() {
        let kv = ServiceInfoKv::encode("devmod:os".to_string(), &"Linux").unwrap();

        let value: String = kv.value().unwrap();

        assert_eq!(value, "Linux");
        assert_eq!(kv.key(), "devmod:os");

        kv.value::<u64>().unwrap_err();
    }

    #[test]
    fn service_info_kv_module_command() {
        let kv = ServiceInfoKv::new("fdo.payload:data", &[]);

        assert_eq!(kv.module_command().unwrap(), ("fdo.payload", "data"));

        let bad = ServiceInfoKv::new("no-colon", &[]);
        let err = bad.module_command().unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Module);
    }

    #[test]
    fn devmod_keys() {
        let cases = [
            (Devmod::Active, "devmod:active"),
            (Devmod::Os("Linux".into()), "devmod:os"),
            (Devmod::Arch("x86_64".into()), "devmod:arch"),
            (Devmod::Version("6.1".into()), "devmod:version"),
            (Devmod::Device("astarte-fdo".into()), "devmod:device"),
            (Devmod::Sep(":".into()), "devmod:sep"),
            (Devmod::Bin("x86_64".into()), "devmod:bin"),
            (Devmod::Nummodules(1), "devmod:nummodules"),
            (
                Devmod::Modules(vec!["fdo.payload".into()]),
                "devmod:modules",
            ),
        ];

        for (case, exp) in cases {
            assert_eq!(case.key(), exp);

            let kv = case.to_kv().unwrap();
            assert_eq!(kv.key(), exp);
        }
    }

    #[test]
    fn devmod_active_value() {
        let kv = Devmod::Active.to_kv().unwrap();

        let active: bool = kv.value().unwrap();

        assert!(active);
    }
}
