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

//! Typed protocol messages.
//!
//! Each protocol phase is a fixed sequence of request/response pairs; the
//! carrier presents a `(message type, body)` pair per turn. The message
//! types are:
//!
//! | Phase | Types |
//! |-------|-------|
//! | DI    | 10-13 |
//! | TO0   | 20-23 |
//! | TO1   | 30-33 |
//! | TO2   | 60-71 |
//! | Error | 255   |

use std::io::Write;

use crate::error::ErrorKind;
use crate::types::Msgtype;
use crate::Error;

pub mod di;
pub mod error_message;
pub mod to0;
pub mod to1;
pub mod to2;

/// Serialize and deserialize a message.
pub trait Message: Sized {
    /// A message type, which acts to identify the message body.
    const MSG_TYPE: Msgtype;

    /// Decodes a message from a buffer.
    fn decode(buf: &[u8]) -> Result<Self, Error>;

    /// Encode a message into the writer.
    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write;

    /// Encode the message into a fresh buffer.
    fn encode_vec(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;

        Ok(buf)
    }
}

/// Message sent from a protocol client to a server.
pub trait ClientMessage: Message {
    /// Response to this message.
    type Response<'a>: Message;
}

/// Initial message in a protocol (DI, TO0, TO1, or TO2).
///
/// This message doesn't carry a session token; the server issues one in the
/// response.
pub trait InitialMessage: ClientMessage {}

pub(crate) fn decode_cbor<T>(buf: &[u8], ctx: &'static str) -> Result<T, Error>
where
    T: serde::de::DeserializeOwned,
{
    ciborium::from_reader(buf).map_err(|err| {
        #[cfg(feature = "tracing")]
        tracing::error!(error = %err, ctx, "couldn't decode message");

        let _ = err;

        Error::new(ErrorKind::Decode, ctx)
    })
}

pub(crate) fn encode_cbor<T, W>(value: &T, writer: &mut W, ctx: &'static str) -> Result<(), Error>
where
    T: serde::Serialize,
    W: Write,
{
    ciborium::into_writer(value, writer).map_err(|err| {
        #[cfg(feature = "tracing")]
        tracing::error!(error = %err, ctx, "couldn't encode message");

        let _ = err;

        Error::new(ErrorKind::Encode, ctx)
    })
}

pub(crate) fn decode_tagged_sign1(buf: &[u8], ctx: &'static str) -> Result<coset::CoseSign1, Error> {
    use coset::TaggedCborSerializable;

    coset::CoseSign1::from_tagged_slice(buf).map_err(|err| {
        #[cfg(feature = "tracing")]
        tracing::error!(error = %err, ctx, "couldn't decode COSE Sign1");

        let _ = err;

        Error::new(ErrorKind::Decode, ctx)
    })
}

pub(crate) fn encode_tagged_sign1<W>(
    sign: &coset::CoseSign1,
    writer: &mut W,
    ctx: &'static str,
) -> Result<(), Error>
where
    W: Write,
{
    use coset::TaggedCborSerializable;

    sign.clone()
        .to_tagged_vec()
        .map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, ctx, "couldn't encode COSE Sign1");

            let _ = err;

            Error::new(ErrorKind::Encode, ctx)
        })
        .and_then(|buf| {
            writer
                .write_all(&buf)
                .map_err(|_| Error::new(ErrorKind::Write, ctx))
        })
}
