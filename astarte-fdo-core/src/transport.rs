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

//! Message carrier abstraction.
//!
//! The carrier is request/response with typed messages: each request
//! carries an integer message type, each response either the next message
//! type or an error envelope. An opaque session token threads state
//! between turns: the server issues it on the first response, the client
//! echoes it on every later request. Nothing here mandates HTTP.

use astarte_fdo_protocol::cbor::Hex;
use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::messages::error_message::ErrorMessage;
use astarte_fdo_protocol::messages::{ClientMessage, Message};
use astarte_fdo_protocol::types::Msgtype;
use astarte_fdo_protocol::Error;
use aws_lc_rs::rand::SecureRandom;
use tracing::{error, trace};

use crate::crypto::SessionKeys;

/// Opaque session token issued by a server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    /// Creates a fresh random token.
    pub fn random(rng: &dyn SecureRandom) -> Result<Self, Error> {
        let mut bytes = [0u8; 16];

        rng.fill(&mut bytes)
            .map_err(|_| Error::new(ErrorKind::Crypto, "to generate session token"))?;

        Ok(Self(Hex::new(&bytes).to_string()))
    }

    /// The token value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A single carrier response.
#[derive(Debug)]
pub struct Reply {
    /// The message type of the body.
    pub msg_type: Msgtype,
    /// The encoded message body.
    pub body: Vec<u8>,
    /// The session token, issued on the first response.
    pub token: Option<SessionToken>,
}

/// Client side of the carrier.
pub trait Transport {
    /// Sends one message and returns the server reply.
    fn send(
        &mut self,
        msg_type: Msgtype,
        body: &[u8],
        token: Option<&SessionToken>,
    ) -> Result<Reply, Error>;
}

/// Server side of the carrier: one request/response turn.
///
/// A service returns `Err` on any fatal protocol error; the carrier turns
/// it into the wire [`ErrorMessage`].
pub trait Responder {
    /// Handles one request and produces the reply.
    fn respond(
        &mut self,
        msg_type: Msgtype,
        body: &[u8],
        token: Option<&SessionToken>,
    ) -> Result<Reply, Error>;
}

impl<R> Responder for &mut R
where
    R: Responder,
{
    fn respond(
        &mut self,
        msg_type: Msgtype,
        body: &[u8],
        token: Option<&SessionToken>,
    ) -> Result<Reply, Error> {
        (**self).respond(msg_type, body, token)
    }
}

/// Shared access to one service from several transports, for in-process
/// setups where the client and multiple peers live in the same thread.
impl<R> Responder for &std::cell::RefCell<R>
where
    R: Responder,
{
    fn respond(
        &mut self,
        msg_type: Msgtype,
        body: &[u8],
        token: Option<&SessionToken>,
    ) -> Result<Reply, Error> {
        self.borrow_mut().respond(msg_type, body, token)
    }
}

/// Couples a client directly to a [`Responder`], for embedding and tests.
#[derive(Debug)]
pub struct InProcess<R> {
    service: R,
}

impl<R> InProcess<R> {
    /// Wraps the service.
    pub fn new(service: R) -> Self {
        Self { service }
    }
}

impl<R> Transport for InProcess<R>
where
    R: Responder,
{
    fn send(
        &mut self,
        msg_type: Msgtype,
        body: &[u8],
        token: Option<&SessionToken>,
    ) -> Result<Reply, Error> {
        match self.service.respond(msg_type, body, token) {
            Ok(reply) => Ok(reply),
            Err(err) => {
                // The failing side emits the wire error envelope
                let msg = ErrorMessage::from_error(&err, msg_type);

                error!(error = %err, "service failed, sending error message");

                Ok(Reply {
                    msg_type: ErrorMessage::MSG_TYPE,
                    body: msg.encode_vec()?,
                    token: token.cloned(),
                })
            }
        }
    }
}

/// Typed client over a [`Transport`].
///
/// Checks the reply message type against the expected response, surfaces
/// wire error messages and keeps the session token between turns.
pub struct Client<T> {
    transport: T,
    token: Option<SessionToken>,
}

impl<T> Client<T>
where
    T: Transport,
{
    /// Creates a client with no session.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            token: None,
        }
    }

    /// Sends a message and decodes the typed response.
    pub fn send<M>(&mut self, msg: &M) -> Result<M::Response<'static>, Error>
    where
        M: ClientMessage,
    {
        let body = msg.encode_vec()?;

        let reply = self.round_trip(M::MSG_TYPE, &body)?;

        Self::parse::<M::Response<'static>>(&reply)
    }

    /// Sends an encrypted message and decrypts the typed response.
    pub fn send_encrypted<M>(
        &mut self,
        keys: &SessionKeys,
        rng: &aws_lc_rs::rand::SystemRandom,
        msg: &M,
    ) -> Result<M::Response<'static>, Error>
    where
        M: ClientMessage,
    {
        let plain = msg.encode_vec()?;

        let body = keys.encrypt(rng, &plain)?;

        let reply = self.round_trip(M::MSG_TYPE, &body)?;

        Self::check_type::<M::Response<'static>>(&reply)?;

        let plain = keys.decrypt(&reply.body)?;

        <M::Response<'static> as Message>::decode(&plain)
    }

    /// Sends a plaintext message whose response is encrypted.
    pub fn send_expect_encrypted<M>(
        &mut self,
        keys: &SessionKeys,
        msg: &M,
    ) -> Result<M::Response<'static>, Error>
    where
        M: ClientMessage,
    {
        let body = msg.encode_vec()?;

        let reply = self.round_trip(M::MSG_TYPE, &body)?;

        Self::check_type::<M::Response<'static>>(&reply)?;

        let plain = keys.decrypt(&reply.body)?;

        <M::Response<'static> as Message>::decode(&plain)
    }

    fn round_trip(&mut self, msg_type: Msgtype, body: &[u8]) -> Result<Reply, Error> {
        trace!(msg_type, len = body.len(), "sending message");

        let reply = self.transport.send(msg_type, body, self.token.as_ref())?;

        match (&self.token, &reply.token) {
            (None, Some(token)) => self.token = Some(token.clone()),
            (Some(mine), Some(theirs)) if mine != theirs => {
                return Err(Error::new(ErrorKind::Invalid, "session token changed"));
            }
            _ => {}
        }

        Ok(reply)
    }

    fn check_type<M>(reply: &Reply) -> Result<(), Error>
    where
        M: Message,
    {
        if reply.msg_type == ErrorMessage::MSG_TYPE {
            let msg = ErrorMessage::decode(&reply.body)?;

            error!(%msg, "error message received");

            return Err(Error::new(ErrorKind::Message, "error message received"));
        }

        if reply.msg_type != M::MSG_TYPE {
            error!(
                expected = M::MSG_TYPE,
                received = reply.msg_type,
                "response message type mismatch"
            );

            return Err(Error::new(
                ErrorKind::UnexpectedMessage,
                "response message type",
            ));
        }

        Ok(())
    }

    fn parse<M>(reply: &Reply) -> Result<M, Error>
    where
        M: Message,
    {
        Self::check_type::<M>(reply)?;

        M::decode(&reply.body)
    }
}
