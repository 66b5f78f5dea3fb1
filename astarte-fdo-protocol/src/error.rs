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

//! Error returned by the library.
//!
//! Verification failures ([`ErrorKind::Verify`]) are kept distinct from
//! shape and format errors ([`ErrorKind::Decode`], [`ErrorKind::Invalid`]):
//! the former may indicate an attack, the latter version skew.

use std::fmt::Display;

/// Error for the protocol.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    ctx: &'static str,
}

impl Error {
    /// Create a new error with the given context.
    pub const fn new(kind: ErrorKind, ctx: &'static str) -> Self {
        Self { kind, ctx }
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Returns the static context string.
    pub fn ctx(&self) -> &'static str {
        self.ctx
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.ctx)
    }
}

impl std::error::Error for Error {}

/// Operation for which the [`Error`] was generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Couldn't encode data.
    Encode,
    /// Couldn't decode data.
    Decode,
    /// A value is out of range.
    OutOfRange,
    /// A value is invalid.
    Invalid,
    /// A signature, HMAC or digest did not verify.
    Verify,
    /// The device credential is missing or unreadable.
    Credential,
    /// A resource (GUID, voucher, session) was not found.
    NotFound,
    /// A resource is temporarily unavailable.
    Unavailable,
    /// A message type that is not valid for the current protocol state.
    UnexpectedMessage,
    /// A ServiceInfo module failed or violated its contract.
    Module,
    /// Couldn't complete crypto operation.
    Crypto,
    /// Couldn't write data.
    Write,
    /// Couldn't complete io operation.
    Io,
    /// An error message was received from the other end.
    Message,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Encode => write!(f, "couldn't encode"),
            ErrorKind::Decode => write!(f, "couldn't decode"),
            ErrorKind::OutOfRange => write!(f, "value out of range"),
            ErrorKind::Invalid => write!(f, "invalid value"),
            ErrorKind::Verify => write!(f, "couldn't verify"),
            ErrorKind::Credential => write!(f, "unreadable credential"),
            ErrorKind::NotFound => write!(f, "not found"),
            ErrorKind::Unavailable => write!(f, "temporarily unavailable"),
            ErrorKind::UnexpectedMessage => write!(f, "unexpected message type"),
            ErrorKind::Module => write!(f, "service info module failed"),
            ErrorKind::Crypto => write!(f, "couldn't complete crypto operation"),
            ErrorKind::Write => write!(f, "couldn't write"),
            ErrorKind::Io => write!(f, "couldn't complete io operation"),
            ErrorKind::Message => write!(f, "couldn't process message"),
        }
    }
}
