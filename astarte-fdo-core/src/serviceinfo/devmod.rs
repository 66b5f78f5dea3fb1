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

//! The devmod module: device identity sent in the first device
//! ServiceInfo message.

use astarte_fdo_protocol::serviceinfo::{Devmod, ServiceInfoKv};
use astarte_fdo_protocol::Error;

/// Static device description advertised through devmod.
#[derive(Debug, Clone)]
pub struct DevmodInfo {
    /// OS name (e.g. Linux).
    pub os: String,
    /// Architecture name (e.g. x86_64).
    pub arch: String,
    /// OS version.
    pub version: String,
    /// Device model, manufacturer specific.
    pub device: String,
    /// Filename list separator.
    pub sep: String,
    /// Interpretable machine formats.
    pub bin: String,
}

impl Default for DevmodInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            version: String::new(),
            device: "astarte-fdo".to_string(),
            sep: ":".to_string(),
            bin: std::env::consts::ARCH.to_string(),
        }
    }
}

impl DevmodInfo {
    /// The full devmod chunk set, including the module enumeration.
    pub fn chunks(&self, modules: &[String]) -> Result<Vec<ServiceInfoKv<'static>>, Error> {
        let names: Vec<_> = modules.iter().map(|name| name.clone().into()).collect();

        let entries = [
            Devmod::Active,
            Devmod::Os(self.os.clone().into()),
            Devmod::Arch(self.arch.clone().into()),
            Devmod::Version(self.version.clone().into()),
            Devmod::Device(self.device.clone().into()),
            Devmod::Sep(self.sep.clone().into()),
            Devmod::Bin(self.bin.clone().into()),
            Devmod::Nummodules(modules.len()),
            Devmod::Modules(names),
        ];

        entries.iter().map(Devmod::to_kv).collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn devmod_chunks_are_complete() {
        let info = DevmodInfo::default();

        let chunks = info
            .chunks(&["fdo.payload".to_string(), "fdo.download".to_string()])
            .unwrap();

        let keys: Vec<_> = chunks.iter().map(|kv| kv.key().to_string()).collect();

        assert_eq!(
            keys,
            [
                "devmod:active",
                "devmod:os",
                "devmod:arch",
                "devmod:version",
                "devmod:device",
                "devmod:sep",
                "devmod:bin",
                "devmod:nummodules",
                "devmod:modules",
            ]
        );

        let num: usize = chunks[7].value().unwrap();
        assert_eq!(num, 2);
    }
}
