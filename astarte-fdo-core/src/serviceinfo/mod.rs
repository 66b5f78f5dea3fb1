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

//! ServiceInfo stream: module contracts, registry and the cooperative
//! scheduler.
//!
//! Each side keeps a registry of modules, invoked in registration order.
//! The scheduler is single threaded and pull based: a module produces
//! chunks until the outgoing buffer would exceed the peer MTU or every
//! module reports done and not blocking. A single key-value whose encoded
//! size exceeds the MTU is a module protocol error before anything is
//! buffered; larger payloads are chunked by the modules themselves.
//!
//! The well known `module:active` key activates or deactivates a module;
//! the registry calls `transition` on each flip.

use std::collections::VecDeque;

use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::serviceinfo::{ServiceInfo, ServiceInfoKv, ACTIVE_COMMAND};
use astarte_fdo_protocol::Error;
use serde::Serialize;
use tracing::{debug, warn};

pub mod devmod;
pub mod payload;

/// Protocol overhead subtracted from the negotiated message size when
/// computing the effective chunk budget.
pub const MESSAGE_OVERHEAD: usize = 64;

/// Device side of a ServiceInfo module.
pub trait DeviceModule {
    /// Called when the module is switched on or off by an `active` key.
    fn transition(&mut self, active: bool) -> Result<(), Error>;

    /// Consume one incoming key-value; replies go through the responder.
    fn receive(
        &mut self,
        command: &str,
        body: &[u8],
        respond: &mut Responder<'_>,
    ) -> Result<(), Error>;

    /// Proactively produce chunks when the peer is not speaking.
    ///
    /// Returning without writing anything yields the turn.
    fn yield_info(&mut self, respond: &mut Responder<'_>) -> Result<(), Error>;
}

/// Owner side of a ServiceInfo module.
pub trait OwnerModule {
    /// Called when the module is switched on or off.
    fn transition(&mut self, active: bool) -> Result<(), Error>;

    /// Consume one incoming key-value from the device.
    fn handle_info(&mut self, command: &str, body: &[u8]) -> Result<(), Error>;

    /// Proactively produce chunks.
    ///
    /// Returns `(block_peer, module_done)`: with `block_peer` the peer
    /// must send a message before this module produces more; with
    /// `module_done` the module has nothing further to contribute.
    fn produce_info(&mut self, producer: &mut Producer<'_>) -> Result<(bool, bool), Error>;
}

/// Write side handed to modules, scoped to the module name and checked
/// against the peer MTU.
///
/// Chunks land in the registry queue; the scheduler cuts messages at the
/// chunk boundary that would overflow the peer MTU.
pub struct Producer<'a> {
    module: &'a str,
    mtu: usize,
    queue: &'a mut VecDeque<ServiceInfoKv<'static>>,
    wrote: bool,
}

impl Producer<'_> {
    /// Queue a chunk with a CBOR encodable value.
    pub fn write_chunk<T>(&mut self, command: &str, value: &T) -> Result<(), Error>
    where
        T: Serialize,
    {
        let kv = ServiceInfoKv::encode(format!("{}:{command}", self.module), value)?;

        self.push(kv)
    }

    /// Queue a chunk with an already CBOR encoded value.
    fn push(&mut self, kv: ServiceInfoKv<'static>) -> Result<(), Error> {
        if kv_size(&kv)? > self.mtu {
            return Err(Error::new(
                ErrorKind::Module,
                "service info value exceeds the peer MTU",
            ));
        }

        self.queue.push_back(kv);
        self.wrote = true;

        Ok(())
    }

    /// The MTU a single chunk must fit in.
    pub fn mtu(&self) -> usize {
        self.mtu
    }
}

/// Responder handed to device modules.
///
/// Same contract as [`Producer`]: replies are routed back to the peer
/// module of the same name, with a command of the module's choosing.
pub type Responder<'a> = Producer<'a>;

fn kv_size(kv: &ServiceInfoKv<'_>) -> Result<usize, Error> {
    let mut buf = Vec::new();

    ciborium::into_writer(kv, &mut buf)
        .map_err(|_| Error::new(ErrorKind::Encode, "service info chunk"))?;

    Ok(buf.len())
}

struct OwnerEntry {
    name: String,
    module: Box<dyn OwnerModule + Send>,
    activated: bool,
    blocked: bool,
    done: bool,
}

/// Registry and scheduler for the owner side.
///
/// Modules are registered once per session and invoked in a stable
/// registration order.
pub struct OwnerModules {
    modules: Vec<OwnerEntry>,
    queue: VecDeque<ServiceInfoKv<'static>>,
}

impl OwnerModules {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            queue: VecDeque::new(),
        }
    }

    /// Registers a module under its name.
    pub fn register<M>(&mut self, name: impl Into<String>, module: M)
    where
        M: OwnerModule + Send + 'static,
    {
        self.modules.push(OwnerEntry {
            name: name.into(),
            module: Box::new(module),
            activated: false,
            blocked: false,
            done: false,
        });
    }

    /// Dispatches the device chunks to the registered modules.
    pub fn handle_device_info(&mut self, info: &ServiceInfo<'_>) -> Result<(), Error> {
        for kv in info {
            let (module, command) = kv.module_command()?;

            let Some(entry) = self.modules.iter_mut().find(|entry| entry.name == module) else {
                warn!(module, command, "service info for an unknown module");

                continue;
            };

            // A device message unblocks waiting producers
            entry.blocked = false;

            entry
                .module
                .handle_info(command, kv.value_as_bytes())
                .map_err(|err| {
                    warn!(module, command, error = %err, "owner module failed");

                    err
                })?;
        }

        Ok(())
    }

    /// Produces the next owner message within the MTU.
    ///
    /// Returns the chunks, whether more chunks are already pending and
    /// whether every module is done.
    pub fn produce(&mut self, mtu: usize) -> Result<(ServiceInfo<'static>, bool, bool), Error> {
        loop {
            let mut progressed = false;

            for entry in &mut self.modules {
                if entry.done || entry.blocked {
                    continue;
                }

                if !entry.activated {
                    // Owner activates the peer device module first
                    let kv = ServiceInfoKv::encode(
                        format!("{}:{ACTIVE_COMMAND}", entry.name),
                        &true,
                    )?;
                    self.queue.push_back(kv);

                    entry.activated = true;
                    entry.module.transition(true)?;
                    progressed = true;
                }

                let mut producer = Producer {
                    module: &entry.name,
                    mtu,
                    queue: &mut self.queue,
                    wrote: false,
                };

                let (blocked, done) = entry.module.produce_info(&mut producer)?;

                progressed |= producer.wrote;
                entry.blocked = blocked;
                entry.done = done;
            }

            if !progressed || message_size(&self.queue)? >= mtu {
                break;
            }
        }

        let message = drain_within(&mut self.queue, mtu)?;

        let is_more = !self.queue.is_empty();
        let is_done = self.queue.is_empty() && self.modules.iter().all(|entry| entry.done);

        debug!(
            chunks = message.len(),
            is_more, is_done, "owner service info produced"
        );

        Ok((message, is_more, is_done))
    }
}

impl Default for OwnerModules {
    fn default() -> Self {
        Self::new()
    }
}

struct DeviceEntry {
    name: String,
    module: Box<dyn DeviceModule + Send>,
    active: bool,
}

/// Registry and scheduler for the device side.
pub struct DeviceModules {
    modules: Vec<DeviceEntry>,
    queue: VecDeque<ServiceInfoKv<'static>>,
}

impl DeviceModules {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            queue: VecDeque::new(),
        }
    }

    /// Registers a module under its name.
    pub fn register<M>(&mut self, name: impl Into<String>, module: M)
    where
        M: DeviceModule + Send + 'static,
    {
        self.modules.push(DeviceEntry {
            name: name.into(),
            module: Box::new(module),
            active: false,
        });
    }

    /// Names of the registered modules, for devmod.
    pub fn names(&self) -> Vec<String> {
        self.modules.iter().map(|entry| entry.name.clone()).collect()
    }

    /// Dispatches the owner chunks to the registered modules.
    pub fn handle_owner_info(&mut self, info: &ServiceInfo<'_>, mtu: usize) -> Result<(), Error> {
        for kv in info {
            let (module, command) = kv.module_command()?;

            let Some(entry) = self.modules.iter_mut().find(|entry| entry.name == module) else {
                warn!(module, command, "service info for an unknown module");

                continue;
            };

            if command == ACTIVE_COMMAND {
                let active: bool = kv.value()?;

                if active != entry.active {
                    entry.active = active;
                    entry.module.transition(active)?;
                }

                continue;
            }

            if !entry.active {
                warn!(module, command, "service info for an inactive module");

                continue;
            }

            let mut respond = Responder {
                module: &entry.name,
                mtu,
                queue: &mut self.queue,
                wrote: false,
            };

            entry
                .module
                .receive(command, kv.value_as_bytes(), &mut respond)
                .map_err(|err| {
                    warn!(module, command, error = %err, "device module failed");

                    err
                })?;
        }

        Ok(())
    }

    /// Produces the next device message within the MTU.
    ///
    /// Returns the chunks and whether more are already pending.
    pub fn produce(&mut self, mtu: usize) -> Result<(ServiceInfo<'static>, bool), Error> {
        loop {
            let mut progressed = false;

            for entry in &mut self.modules {
                if !entry.active {
                    continue;
                }

                let mut respond = Responder {
                    module: &entry.name,
                    mtu,
                    queue: &mut self.queue,
                    wrote: false,
                };

                entry.module.yield_info(&mut respond)?;

                progressed |= respond.wrote;
            }

            if !progressed || message_size(&self.queue)? >= mtu {
                break;
            }
        }

        let message = drain_within(&mut self.queue, mtu)?;

        let is_more = !self.queue.is_empty();

        Ok((message, is_more))
    }

    /// Queues chunks produced outside the module callbacks (devmod).
    pub(crate) fn push_chunks(&mut self, chunks: Vec<ServiceInfoKv<'static>>) {
        self.queue.extend(chunks);
    }
}

impl Default for DeviceModules {
    fn default() -> Self {
        Self::new()
    }
}

fn message_size(queue: &VecDeque<ServiceInfoKv<'static>>) -> Result<usize, Error> {
    queue.iter().try_fold(0, |acc, kv| Ok(acc + kv_size(kv)?))
}

/// Moves chunks from the queue into a message, cutting at the boundary
/// that would overflow the MTU.
fn drain_within(
    queue: &mut VecDeque<ServiceInfoKv<'static>>,
    mtu: usize,
) -> Result<ServiceInfo<'static>, Error> {
    let mut message = Vec::new();
    let mut used = 0;

    while let Some(kv) = queue.front() {
        let size = kv_size(kv)?;

        if used + size > mtu && !message.is_empty() {
            break;
        }

        if used + size > mtu {
            // A single oversized chunk can never be sent
            return Err(Error::new(
                ErrorKind::Module,
                "service info chunk exceeds the MTU",
            ));
        }

        used += size;
        message.push(queue.pop_front().expect("checked front"));
    }

    Ok(message)
}
