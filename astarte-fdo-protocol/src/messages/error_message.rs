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

//! Error message, Type 255.
//!
//! The error message is a "catch-all" whenever processing cannot continue.
//! This includes protocol errors and any trust or security violations.
//! Receipt of an error message terminates the session.

use std::borrow::Cow;
use std::fmt::Display;
use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::types::Msgtype;
use crate::Error;

use super::Message;

/// The error message indicates that the previous protocol message could not
/// be processed.
///
/// ```cddl
/// ErrorMessage = [
///     EMErrorCode: uint16,
///     EMPrevMsgID: uint8,
///     EMErrorStr:  tstr,
///     EMErrorTs:   timestamp / null,
///     EMErrorCID:  correlationId / null
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage<'a> {
    error_code: u16,
    prev_msg_id: u8,
    error_str: Cow<'a, str>,
    error_ts: Option<Timestamp<'a>>,
    error_cid: Option<u128>,
}

impl<'a> ErrorMessage<'a> {
    /// Creates a new error message.
    pub fn new(
        error_code: ErrorCode,
        prev_msg_id: u8,
        error_str: Cow<'a, str>,
        error_ts: Option<Timestamp<'a>>,
        error_cid: Option<u128>,
    ) -> Self {
        Self {
            error_code: error_code.into(),
            prev_msg_id,
            error_str,
            error_ts,
            error_cid,
        }
    }

    /// Builds the wire error for a library [`Error`] raised while handling
    /// the message type `prev_msg_id`.
    pub fn from_error(err: &Error, prev_msg_id: Msgtype) -> ErrorMessage<'static> {
        ErrorMessage {
            error_code: ErrorCode::from_kind(err.kind()).into(),
            prev_msg_id: prev_msg_id.try_into().unwrap_or(u8::MAX),
            error_str: Cow::Owned(err.to_string()),
            error_ts: None,
            error_cid: None,
        }
    }

    /// Returns the error code as a number.
    pub fn error_code(&self) -> u16 {
        self.error_code
    }

    /// Returns the message type that triggered the error.
    pub fn prev_msg_id(&self) -> u8 {
        self.prev_msg_id
    }

    /// Returns the operator string.
    pub fn error_str(&self) -> &str {
        &self.error_str
    }

    /// Returns the correlation id, when present.
    pub fn correlation_id(&self) -> Option<u128> {
        self.error_cid
    }

    /// Returns the code if it's a known error code.
    pub fn known_code(&self) -> Option<ErrorCode> {
        let code = match self.error_code {
            1 => ErrorCode::InvalidToken,
            2 => ErrorCode::InvalidOwnershipVoucher,
            3 => ErrorCode::InvalidOwnerSignBody,
            4 => ErrorCode::InvalidIpAddress,
            5 => ErrorCode::InvalidGuid,
            6 => ErrorCode::ResourceNotFound,
            100 => ErrorCode::MessageBodyError,
            101 => ErrorCode::InvalidMessageError,
            102 => ErrorCode::CredReuseError,
            500 => ErrorCode::InternalServerError,
            _ => return None,
        };

        Some(code)
    }
}

impl Display for ErrorMessage<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(code) = self.known_code() {
            write!(f, "error_code: {code}")?;
        } else {
            write!(f, "error_code: {}", self.error_code)?;
        }

        write!(
            f,
            ", prev_msg_id: {}, error_str: {:?}, error_ts: {:?}, cid: {:?}",
            self.prev_msg_id, self.error_str, self.error_ts, self.error_cid
        )
    }
}

impl Serialize for ErrorMessage<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            error_code,
            prev_msg_id,
            error_str,
            error_ts,
            error_cid,
        } = self;

        let error_ts = error_ts.as_ref().map(ciborium::tag::Required::<_, 6>);

        (error_code, prev_msg_id, error_str, error_ts, error_cid).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ErrorMessage<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (error_code, prev_msg_id, error_str, error_ts, error_cid) =
            Deserialize::deserialize(deserializer)?;

        let error_ts: Option<ciborium::tag::Accepted<Timestamp, 6>> = error_ts;

        Ok(Self {
            error_code,
            prev_msg_id,
            error_str,
            error_ts: error_ts.map(|t| t.0),
            error_cid,
        })
    }
}

impl Message for ErrorMessage<'_> {
    const MSG_TYPE: Msgtype = 255;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        super::decode_cbor(buf, "the ErrorMessage")
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        super::encode_cbor(self, writer, "the ErrorMessage")
    }
}

/// The "EMErrorCode" in the ErrorMessage is an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum ErrorCode {
    /// Session token is missing, invalid or expired.
    InvalidToken = 1,
    /// One of the Ownership Voucher verification checks has failed.
    InvalidOwnershipVoucher = 2,
    /// Verification of the signature of an owner message failed.
    InvalidOwnerSignBody = 3,
    /// Bytes provided in the request do not represent a valid IP address.
    InvalidIpAddress = 4,
    /// Bytes provided in the request do not represent a proper GUID.
    InvalidGuid = 5,
    /// The resource for the GUID is not found, or has expired.
    ResourceNotFound = 6,
    /// Message body is structurally unsound.
    MessageBodyError = 100,
    /// Message structurally sound, but failed validation tests.
    ///
    /// The nonce didn't match, a signature, hash or mac didn't verify, an
    /// index is out of bounds, or the message type is not valid in the
    /// current protocol state.
    InvalidMessageError = 101,
    /// Credential reuse rejected.
    CredReuseError = 102,
    /// Something went wrong which couldn't be classified otherwise.
    InternalServerError = 500,
}

impl ErrorCode {
    /// Maps a library error kind onto its wire code.
    pub fn from_kind(kind: &ErrorKind) -> Self {
        match kind {
            ErrorKind::Encode | ErrorKind::Decode | ErrorKind::OutOfRange => {
                ErrorCode::MessageBodyError
            }
            ErrorKind::Invalid
            | ErrorKind::Verify
            | ErrorKind::UnexpectedMessage
            | ErrorKind::Module => ErrorCode::InvalidMessageError,
            ErrorKind::Credential => ErrorCode::InvalidToken,
            ErrorKind::NotFound => ErrorCode::ResourceNotFound,
            ErrorKind::Unavailable
            | ErrorKind::Crypto
            | ErrorKind::Write
            | ErrorKind::Io
            | ErrorKind::Message => ErrorCode::InternalServerError,
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::InvalidToken => write!(f, "INVALID_TOKEN"),
            ErrorCode::InvalidOwnershipVoucher => write!(f, "INVALID_OWNERSHIP_VOUCHER"),
            ErrorCode::InvalidOwnerSignBody => write!(f, "INVALID_OWNER_SIGN_BODY"),
            ErrorCode::InvalidIpAddress => write!(f, "INVALID_IP_ADDRESS"),
            ErrorCode::InvalidGuid => write!(f, "INVALID_GUID"),
            ErrorCode::ResourceNotFound => write!(f, "RESOURCE_NOT_FOUND"),
            ErrorCode::MessageBodyError => write!(f, "MESSAGE_BODY_ERROR"),
            ErrorCode::InvalidMessageError => write!(f, "INVALID_MESSAGE_ERROR"),
            ErrorCode::CredReuseError => write!(f, "CRED_REUSE_ERROR"),
            ErrorCode::InternalServerError => write!(f, "INTERNAL_SERVER_ERROR"),
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(value: ErrorCode) -> Self {
        value as u16
    }
}

/// Timestamp of an [`ErrorMessage`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp<'a> {
    /// Utc date time string.
    UtcStr(Cow<'a, str>),
    /// Seconds from 1970-01-01T00:00:00Z.
    UtcInt(u64),
    /// Device-local seconds from 1970-01-01.
    TimeT(u64),
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn error_message_roundtrip() {
        let cases = [
            ErrorMessage::new(
                ErrorCode::InternalServerError,
                60,
                "some error".into(),
                None,
                None,
            ),
            ErrorMessage::new(
                ErrorCode::ResourceNotFound,
                30,
                "unknown guid".into(),
                Some(Timestamp::TimeT(1700000000)),
                Some(42),
            ),
        ];

        for error_msg in cases {
            let mut buf = Vec::new();
            error_msg.encode(&mut buf).unwrap();

            let res = ErrorMessage::decode(&buf).unwrap();

            assert_eq!(res, error_msg);
        }
    }

    #[test]
    fn error_message_known_code_roundtrip() {
        let error_codes = [
            ErrorCode::InvalidToken,
            ErrorCode::InvalidOwnershipVoucher,
            ErrorCode::InvalidOwnerSignBody,
            ErrorCode::InvalidIpAddress,
            ErrorCode::InvalidGuid,
            ErrorCode::ResourceNotFound,
            ErrorCode::MessageBodyError,
            ErrorCode::InvalidMessageError,
            ErrorCode::CredReuseError,
            ErrorCode::InternalServerError,
        ];

        for code in error_codes {
            let error_msg = ErrorMessage::new(code, 60, "some error".into(), None, None);

            assert_eq!(error_msg.known_code(), Some(code));
            assert_eq!(u16::from(code), error_msg.error_code());
        }
    }

    #[test]
    fn error_message_from_error() {
        let cases = [
            (ErrorKind::Decode, ErrorCode::MessageBodyError),
            (ErrorKind::Verify, ErrorCode::InvalidMessageError),
            (ErrorKind::UnexpectedMessage, ErrorCode::InvalidMessageError),
            (ErrorKind::NotFound, ErrorCode::ResourceNotFound),
            (ErrorKind::Credential, ErrorCode::InvalidToken),
            (ErrorKind::Unavailable, ErrorCode::InternalServerError),
            (ErrorKind::Io, ErrorCode::InternalServerError),
        ];

        for (kind, code) in cases {
            let err = Error::new(kind, "ctx");

            let msg = ErrorMessage::from_error(&err, 60);

            assert_eq!(msg.known_code(), Some(code));
            assert_eq!(msg.prev_msg_id(), 60);
            assert_eq!(msg.error_str(), err.to_string());
        }
    }

    #[test]
    fn error_message_display() {
        let error_msg = ErrorMessage::new(
            ErrorCode::InternalServerError,
            60,
            "some error".into(),
            None,
            None,
        );

        assert_eq!(
            error_msg.to_string(),
            "error_code: INTERNAL_SERVER_ERROR, prev_msg_id: 60, error_str: \"some error\", error_ts: None, cid: None"
        );
    }
}
