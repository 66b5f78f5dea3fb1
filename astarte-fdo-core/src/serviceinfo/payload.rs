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

//! The `fdo.payload` module pair: owner-to-device delivery of an
//! arbitrary MIME payload.
//!
//! A transfer is framed as `begin` / `data`+`ack` / `end` / `result`; the
//! module chunks its own data on top of the one-KV-per-chunk base
//! protocol, so payloads larger than the MTU stream through. A transfer
//! interrupted mid-stream is cancelled and leaves no partial payload
//! behind.

use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::Error;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use tracing::{debug, warn};

use super::{DeviceModule, OwnerModule, Producer, Responder};

/// Module name on both sides.
pub const PAYLOAD_MODULE: &str = "fdo.payload";

/// Default data chunk size, bounded by the MTU at send time.
const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Error codes of the payload module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadErrorCode {
    /// Unknown MIME type.
    UnknownMimeType = 1,
    /// Invalid message format.
    InvalidFormat = 2,
    /// Invalid content.
    InvalidContent = 3,
    /// Unable to apply the payload.
    UnableToApply = 4,
    /// Unsupported feature.
    UnsupportedFeature = 5,
    /// Transfer error.
    TransferError = 6,
    /// Resource error.
    ResourceError = 7,
}

/// Consumer of delivered payloads on the device.
pub trait PayloadHandler {
    /// Checks if the device supports the given MIME type.
    fn supports_mime_type(&self, mime_type: &str) -> bool;

    /// Prepares to receive a payload.
    fn begin_payload(
        &mut self,
        mime_type: &str,
        name: Option<&str>,
        size: Option<u64>,
        metadata: &FxHashMap<String, String>,
    ) -> Result<(), Error>;

    /// Processes a data chunk.
    fn receive_chunk(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Finalizes and applies the payload.
    fn end_payload(&mut self) -> Result<PayloadOutcome, Error>;

    /// Aborts the current transfer, dropping any partial data.
    fn cancel_payload(&mut self);
}

/// Result of applying a payload on the device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PayloadOutcome {
    /// Whether the payload was applied.
    pub success: bool,
    /// Operator message.
    pub message: Option<String>,
    /// Output of the application, when any.
    pub output: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BeginMessage {
    mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<FxHashMap<String, String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResultMessage {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorInfoMessage {
    code: u8,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// Device side of `fdo.payload`.
pub struct PayloadDevice<H> {
    handler: H,
    receiving: bool,
    total: u64,
    expected: Option<u64>,
}

impl<H> PayloadDevice<H> {
    /// Creates the module over a payload handler.
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            receiving: false,
            total: 0,
            expected: None,
        }
    }

    /// The wrapped handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }
}

impl<H> PayloadDevice<H>
where
    H: PayloadHandler,
{
    fn reset(&mut self) {
        if self.receiving {
            self.handler.cancel_payload();
        }

        self.receiving = false;
        self.total = 0;
        self.expected = None;
    }

    fn send_error(
        &mut self,
        respond: &mut Responder<'_>,
        code: PayloadErrorCode,
        message: &str,
        details: Option<String>,
    ) -> Result<(), Error> {
        respond.write_chunk(
            "error",
            &ErrorInfoMessage {
                code: code as u8,
                message: message.to_string(),
                details,
            },
        )?;

        Err(Error::new(ErrorKind::Module, "payload transfer failed"))
    }

    fn handle(
        &mut self,
        command: &str,
        body: &[u8],
        respond: &mut Responder<'_>,
    ) -> Result<(), Error> {
        match command {
            "begin" => {
                let begin: BeginMessage = decode(body)?;

                if !self.handler.supports_mime_type(&begin.mime_type) {
                    return self.send_error(
                        respond,
                        PayloadErrorCode::UnknownMimeType,
                        "mime type not supported",
                        None,
                    );
                }

                let metadata = begin.metadata.unwrap_or_default();

                if self
                    .handler
                    .begin_payload(
                        &begin.mime_type,
                        begin.name.as_deref(),
                        begin.size,
                        &metadata,
                    )
                    .is_err()
                {
                    return self.send_error(
                        respond,
                        PayloadErrorCode::UnableToApply,
                        "failed to prepare for the payload",
                        None,
                    );
                }

                self.receiving = true;
                self.total = 0;
                self.expected = begin.size;

                respond.write_chunk("ready", &true)
            }
            "data" => {
                if !self.receiving {
                    return self.send_error(
                        respond,
                        PayloadErrorCode::TransferError,
                        "not ready to receive data",
                        Some("begin first".to_string()),
                    );
                }

                let data: ByteBuf = decode(body)?;

                if self.handler.receive_chunk(&data).is_err() {
                    self.receiving = false;

                    return self.send_error(
                        respond,
                        PayloadErrorCode::UnableToApply,
                        "failed to process the chunk",
                        None,
                    );
                }

                self.total += data.len() as u64;

                respond.write_chunk("ack", &self.total)
            }
            "end" => {
                if !self.receiving {
                    return self.send_error(
                        respond,
                        PayloadErrorCode::TransferError,
                        "no active transfer",
                        None,
                    );
                }

                if self.expected.is_some_and(|expected| expected != self.total) {
                    self.reset();

                    return self.send_error(
                        respond,
                        PayloadErrorCode::TransferError,
                        "size mismatch",
                        None,
                    );
                }

                self.receiving = false;

                let outcome = match self.handler.end_payload() {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        return self.send_error(
                            respond,
                            PayloadErrorCode::UnableToApply,
                            "failed to apply the payload",
                            None,
                        );
                    }
                };

                respond.write_chunk(
                    "result",
                    &ResultMessage {
                        success: outcome.success,
                        message: outcome.message,
                        output: outcome.output,
                    },
                )
            }
            other => {
                warn!(command = other, "unknown payload command");

                Ok(())
            }
        }
    }
}

impl<H> DeviceModule for PayloadDevice<H>
where
    H: PayloadHandler,
{
    fn transition(&mut self, active: bool) -> Result<(), Error> {
        if !active {
            self.reset();
        }

        Ok(())
    }

    fn receive(
        &mut self,
        command: &str,
        body: &[u8],
        respond: &mut Responder<'_>,
    ) -> Result<(), Error> {
        let res = self.handle(command, body, respond);

        if res.is_err() {
            self.reset();
        }

        res
    }

    fn yield_info(&mut self, _respond: &mut Responder<'_>) -> Result<(), Error> {
        Ok(())
    }
}

/// A payload queued for delivery to the device.
#[derive(Debug, Clone)]
pub struct PayloadToSend {
    /// MIME type of the payload.
    pub mime_type: String,
    /// Payload name.
    pub name: Option<String>,
    /// The data to transfer.
    pub data: Vec<u8>,
    /// Free-form metadata.
    pub metadata: FxHashMap<String, String>,
}

/// Last error reported by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadErrorInfo {
    /// The payload error code.
    pub code: u8,
    /// Operator message.
    pub message: String,
    /// Extra details.
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OwnerStep {
    Begin,
    Data,
    End,
    AwaitResult,
}

/// Owner side of `fdo.payload`.
pub struct PayloadOwner {
    payloads: Vec<PayloadToSend>,
    index: usize,
    step: OwnerStep,
    bytes_sent: usize,
    chunk_size: usize,
    last_error: Option<PayloadErrorInfo>,
}

impl PayloadOwner {
    /// Creates the module with nothing queued.
    pub fn new() -> Self {
        Self {
            payloads: Vec::new(),
            index: 0,
            step: OwnerStep::Begin,
            bytes_sent: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            last_error: None,
        }
    }

    /// Queues a payload for delivery.
    pub fn add_payload(&mut self, payload: PayloadToSend) {
        self.payloads.push(payload);
    }

    /// Overrides the data chunk size.
    pub fn set_chunk_size(&mut self, size: usize) {
        self.chunk_size = size.max(1);
    }

    /// The last error reported by the device.
    pub fn last_error(&self) -> Option<&PayloadErrorInfo> {
        self.last_error.as_ref()
    }

    fn current(&self) -> Option<&PayloadToSend> {
        self.payloads.get(self.index)
    }
}

impl Default for PayloadOwner {
    fn default() -> Self {
        Self::new()
    }
}

impl OwnerModule for PayloadOwner {
    fn transition(&mut self, active: bool) -> Result<(), Error> {
        if !active {
            self.step = OwnerStep::Begin;
            self.bytes_sent = 0;
        }

        Ok(())
    }

    fn handle_info(&mut self, command: &str, body: &[u8]) -> Result<(), Error> {
        match command {
            "active" => {
                let active: bool = decode(body)?;

                debug!(active, "payload device active status");

                Ok(())
            }
            "ready" => {
                let ready: bool = decode(body)?;

                if !ready {
                    return Err(Error::new(ErrorKind::Module, "device not ready for payload"));
                }

                self.step = OwnerStep::Data;

                Ok(())
            }
            "ack" => {
                let received: u64 = decode(body)?;

                if received != self.bytes_sent as u64 {
                    return Err(Error::new(ErrorKind::Module, "payload ack mismatch"));
                }

                Ok(())
            }
            "result" => {
                let result: ResultMessage = decode(body)?;

                if result.success {
                    debug!(message = ?result.message, "payload applied");
                } else {
                    warn!(message = ?result.message, "payload application failed");
                }

                self.index += 1;
                self.step = OwnerStep::Begin;
                self.bytes_sent = 0;

                Ok(())
            }
            "error" => {
                let info: ErrorInfoMessage = decode(body)?;

                self.last_error = Some(PayloadErrorInfo {
                    code: info.code,
                    message: info.message,
                    details: info.details,
                });

                self.step = OwnerStep::Begin;
                self.bytes_sent = 0;
                self.index += 1;

                Err(Error::new(ErrorKind::Module, "payload device error"))
            }
            other => {
                warn!(command = other, "unknown payload command");

                Ok(())
            }
        }
    }

    fn produce_info(&mut self, producer: &mut Producer<'_>) -> Result<(bool, bool), Error> {
        let Some(payload) = self.current() else {
            return Ok((false, true));
        };

        match self.step {
            OwnerStep::Begin => {
                let begin = BeginMessage {
                    mime_type: payload.mime_type.clone(),
                    name: payload.name.clone(),
                    size: Some(payload.data.len() as u64),
                    metadata: (!payload.metadata.is_empty()).then(|| payload.metadata.clone()),
                };

                producer.write_chunk("begin", &begin)?;

                self.bytes_sent = 0;

                // Wait for the device to report ready
                Ok((true, false))
            }
            OwnerStep::Data => {
                if self.bytes_sent >= payload.data.len() {
                    self.step = OwnerStep::End;

                    return Ok((false, false));
                }

                // Keep a margin under the MTU for the key and framing
                let bound = self.chunk_size.min(producer.mtu().saturating_sub(64)).max(1);

                let end = (self.bytes_sent + bound).min(payload.data.len());
                let chunk = ByteBuf::from(payload.data[self.bytes_sent..end].to_vec());

                producer.write_chunk("data", &chunk)?;

                self.bytes_sent = end;

                // Ack cadence of one: wait before the next chunk
                Ok((true, false))
            }
            OwnerStep::End => {
                producer.write_chunk("end", &true)?;

                self.step = OwnerStep::AwaitResult;

                Ok((true, false))
            }
            OwnerStep::AwaitResult => Ok((true, false)),
        }
    }
}

fn decode<T>(body: &[u8]) -> Result<T, Error>
where
    T: serde::de::DeserializeOwned,
{
    ciborium::from_reader(body).map_err(|err| {
        warn!(error = %err, "couldn't decode payload message");

        Error::new(ErrorKind::Module, "payload message body")
    })
}

/// In-memory payload handler collecting completed transfers.
#[derive(Debug, Default)]
pub struct MemoryPayloadHandler {
    partial: Option<PartialPayload>,
    completed: Vec<CompletedPayload>,
}

#[derive(Debug)]
struct PartialPayload {
    mime_type: String,
    name: Option<String>,
    data: Vec<u8>,
}

/// A payload fully received by [`MemoryPayloadHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPayload {
    /// MIME type of the payload.
    pub mime_type: String,
    /// Payload name.
    pub name: Option<String>,
    /// The delivered bytes.
    pub data: Vec<u8>,
}

impl MemoryPayloadHandler {
    /// Creates an empty handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// The fully delivered payloads.
    pub fn completed(&self) -> &[CompletedPayload] {
        &self.completed
    }

    /// Whether a transfer is in flight.
    pub fn has_partial(&self) -> bool {
        self.partial.is_some()
    }
}

impl PayloadHandler for MemoryPayloadHandler {
    fn supports_mime_type(&self, mime_type: &str) -> bool {
        !mime_type.is_empty()
    }

    fn begin_payload(
        &mut self,
        mime_type: &str,
        name: Option<&str>,
        _size: Option<u64>,
        _metadata: &FxHashMap<String, String>,
    ) -> Result<(), Error> {
        self.partial = Some(PartialPayload {
            mime_type: mime_type.to_string(),
            name: name.map(str::to_string),
            data: Vec::new(),
        });

        Ok(())
    }

    fn receive_chunk(&mut self, data: &[u8]) -> Result<(), Error> {
        let partial = self
            .partial
            .as_mut()
            .ok_or(Error::new(ErrorKind::Module, "no transfer in flight"))?;

        partial.data.extend_from_slice(data);

        Ok(())
    }

    fn end_payload(&mut self) -> Result<PayloadOutcome, Error> {
        let partial = self
            .partial
            .take()
            .ok_or(Error::new(ErrorKind::Module, "no transfer in flight"))?;

        self.completed.push(CompletedPayload {
            mime_type: partial.mime_type,
            name: partial.name,
            data: partial.data,
        });

        Ok(PayloadOutcome {
            success: true,
            message: None,
            output: None,
        })
    }

    fn cancel_payload(&mut self) {
        self.partial = None;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::serviceinfo::{DeviceModules, OwnerModules};

    use super::*;

    fn roundtrip(data: Vec<u8>, mtu: usize) -> usize {
        let mut owner_side = OwnerModules::new();
        let mut owner = PayloadOwner::new();
        owner.add_payload(PayloadToSend {
            mime_type: "application/octet-stream".to_string(),
            name: Some("blob.bin".to_string()),
            data,
            metadata: FxHashMap::default(),
        });
        owner_side.register(PAYLOAD_MODULE, owner);

        let mut device_side = DeviceModules::new();
        device_side.register(PAYLOAD_MODULE, PayloadDevice::new(MemoryPayloadHandler::new()));

        let mut rounds = 0;

        loop {
            rounds += 1;
            assert!(rounds < 100, "transfer does not converge");

            let (owner_info, _is_more, is_done) = owner_side.produce(mtu).unwrap();

            device_side.handle_owner_info(&owner_info, mtu).unwrap();

            let (device_info, _more) = device_side.produce(mtu).unwrap();

            owner_side.handle_device_info(&device_info).unwrap();

            if is_done && owner_info.is_empty() && device_info.is_empty() {
                break;
            }
        }

        rounds
    }

    #[test]
    fn transfer_through_the_scheduler_terminates() {
        let rounds = roundtrip(vec![0xab; 4096], 1200);

        // Ack cadence of one forces several rounds
        assert!(rounds > 3);
    }

    #[test]
    fn transfer_delivers_all_bytes_in_order() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();

        let mut owner = PayloadOwner::new();
        owner.set_chunk_size(1366);
        owner.add_payload(PayloadToSend {
            mime_type: "application/octet-stream".to_string(),
            name: Some("blob.bin".to_string()),
            data: data.clone(),
            metadata: FxHashMap::default(),
        });

        let mut device = PayloadDevice::new(MemoryPayloadHandler::new());

        let mut queue = std::collections::VecDeque::new();
        let mtu = 1500;

        let mut data_chunks = 0;
        let mut guard = 0;

        loop {
            guard += 1;
            assert!(guard < 50, "transfer does not converge");

            let mut producer = Producer {
                module: PAYLOAD_MODULE,
                mtu,
                queue: &mut queue,
                wrote: false,
            };

            let (_blocked, done) = owner.produce_info(&mut producer).unwrap();

            let mut replies = std::collections::VecDeque::new();

            while let Some(kv) = queue.pop_front() {
                let (_, command) = kv.module_command().unwrap();

                if command == "data" {
                    data_chunks += 1;
                }

                let mut respond = Responder {
                    module: PAYLOAD_MODULE,
                    mtu,
                    queue: &mut replies,
                    wrote: false,
                };

                device
                    .receive(command, kv.value_as_bytes(), &mut respond)
                    .unwrap();
            }

            while let Some(kv) = replies.pop_front() {
                let (_, command) = kv.module_command().unwrap();

                owner.handle_info(command, kv.value_as_bytes()).unwrap();
            }

            if done && owner.current().is_none() {
                break;
            }
        }

        // 4096 bytes in chunks of 1366: three data chunks
        assert_eq!(data_chunks, 3);

        let completed = device.handler().completed();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].data, data);
        assert_eq!(completed[0].name.as_deref(), Some("blob.bin"));
        assert!(!device.handler().has_partial());
    }

    #[test]
    fn interrupted_transfer_leaves_no_partial() {
        let mut device = PayloadDevice::new(MemoryPayloadHandler::new());

        let mut queue = std::collections::VecDeque::new();
        let mtu = 1500;

        let begin = BeginMessage {
            mime_type: "application/octet-stream".to_string(),
            name: Some("blob.bin".to_string()),
            size: Some(4096),
            metadata: None,
        };
        let mut body = Vec::new();
        ciborium::into_writer(&begin, &mut body).unwrap();

        let mut respond = Responder {
            module: PAYLOAD_MODULE,
            mtu,
            queue: &mut queue,
            wrote: false,
        };
        device.receive("begin", &body, &mut respond).unwrap();

        let mut body = Vec::new();
        ciborium::into_writer(&ByteBuf::from(vec![1u8; 1024]), &mut body).unwrap();
        let mut respond = Responder {
            module: PAYLOAD_MODULE,
            mtu,
            queue: &mut queue,
            wrote: false,
        };
        device.receive("data", &body, &mut respond).unwrap();

        assert!(device.handler().has_partial());

        // The session dies mid-stream: the module is deactivated
        device.transition(false).unwrap();

        assert!(!device.handler().has_partial());
        assert!(device.handler().completed().is_empty());
    }

    #[test]
    fn end_with_size_mismatch_is_a_transfer_error() {
        let mut device = PayloadDevice::new(MemoryPayloadHandler::new());

        let mut queue = std::collections::VecDeque::new();

        let begin = BeginMessage {
            mime_type: "application/octet-stream".to_string(),
            name: None,
            size: Some(100),
            metadata: None,
        };
        let mut body = Vec::new();
        ciborium::into_writer(&begin, &mut body).unwrap();

        let mut respond = Responder {
            module: PAYLOAD_MODULE,
            mtu: 1500,
            queue: &mut queue,
            wrote: false,
        };
        device.receive("begin", &body, &mut respond).unwrap();

        let mut body = Vec::new();
        ciborium::into_writer(&true, &mut body).unwrap();
        let mut respond = Responder {
            module: PAYLOAD_MODULE,
            mtu: 1500,
            queue: &mut queue,
            wrote: false,
        };

        let err = device.receive("end", &body, &mut respond).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Module);
        assert!(!device.handler().has_partial());

        // The device queued an error report with the transfer-error code
        let error_kv = queue.pop_back().unwrap();
        assert_eq!(error_kv.key(), "fdo.payload:error");

        let info: ErrorInfoMessage = error_kv.value().unwrap();
        assert_eq!(info.code, PayloadErrorCode::TransferError as u8);
    }
}
