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

//! Rendezvous instructions and the owner redirect blob.
//!
//! [`RendezvousInfo`] tells the Device and the Owner how to find the
//! Rendezvous Server: the outer directives are tried in order until one
//! succeeds, the instructions inside a directive combine. [`RvTo2Addr`] is
//! the list of Owner addresses served back to the device during TO1.

use std::borrow::Cow;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use serde_bytes::Bytes;

use crate::cbor::{CborBstr, OneOrMore};
use crate::error::ErrorKind;
use crate::hash::Hash;
use crate::types::{DnsAddress, IpAddress, Port, TransportProtocol};
use crate::Error;

/// ```cddl
/// RendezvousInfo = [
///     + RendezvousDirective
/// ]
/// ```
pub type RendezvousInfo<'a> = OneOrMore<RendezvousDirective<'a>>;

/// ```cddl
/// RendezvousDirective = [
///     + RendezvousInstr
/// ]
/// ```
pub type RendezvousDirective<'a> = OneOrMore<RendezvousInstr<'a>>;

/// ```cddl
/// RendezvousInstr = [
///     RVVariable,
///     RVValue
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RendezvousInstr<'a> {
    /// Identifies the type to decode for [`rv_value`](Self::rv_value).
    pub rv_variable: RvVariable,
    /// Instruction to contact the Rendezvous Server.
    pub rv_value: RvValue<'a>,
}

impl RendezvousInstr<'_> {
    /// Builds an instruction from the variable and an encodable value.
    pub fn encode<T>(rv_variable: RvVariable, value: &T) -> Result<RendezvousInstr<'static>, Error>
    where
        T: Serialize,
    {
        let bytes = CborBstr::new(value).bytes()?.clone().into_owned();

        Ok(RendezvousInstr {
            rv_variable,
            rv_value: Cow::Owned(bytes),
        })
    }

    /// Decodes the value of the instruction.
    pub fn value<T>(&self) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        ciborium::from_reader(self.rv_value.as_ref().as_ref()).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode rendezvous value");

            let _ = err;

            Error::new(ErrorKind::Decode, "rendezvous instruction value")
        })
    }
}

impl Serialize for RendezvousInstr<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            rv_variable,
            rv_value,
        } = self;

        (rv_variable, rv_value).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RendezvousInstr<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (rv_variable, rv_value) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            rv_variable,
            rv_value,
        })
    }
}

/// ```cddl
/// RVVariable /= (
///     RVDevOnly     => 0,
///     RVOwnerOnly   => 1,
///     RVIPAddress   => 2,
///     RVDevPort     => 3,
///     RVOwnerPort   => 4,
///     RVDns         => 5,
///     RVSvCertHash  => 6,
///     RVClCertHash  => 7,
///     RVUserInput   => 8,
///     RVWifiSsid    => 9,
///     RVWifiPw      => 10,
///     RVMedium      => 11,
///     RVProtocol    => 12,
///     RVDelaysec    => 13,
///     RVBypass      => 14,
///     RVExtRV       => 15
/// )
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum RvVariable {
    /// Instruction only applies on the Device.
    DevOnly = 0,
    /// Instruction only applies on the Owner.
    OwnerOnly = 1,
    /// IP address
    IPAddress = 2,
    /// Port for the Device, based on protocol.
    DevPort = 3,
    /// Port for the Owner, based on protocol.
    OwnerPort = 4,
    /// DNS name
    Dns = 5,
    /// TLS Server cert hash
    SvCertHash = 6,
    /// TLS CA cert hash
    ClCertHash = 7,
    /// User input
    UserInput = 8,
    /// Wireless SSID
    WifiSsid = 9,
    /// Wireless password
    WifiPw = 10,
    /// Network medium
    Medium = 11,
    /// Protocol
    Protocol = 12,
    /// Delay before the next attempt, in seconds.
    Delaysec = 13,
    /// Skip TO1 entirely and contact the Owner directly.
    Bypass = 14,
    /// External RV
    ExtRV = 15,
}

impl Debug for RvVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DevOnly => write!(f, "RVDevOnly(0)"),
            Self::OwnerOnly => write!(f, "RVOwnerOnly(1)"),
            Self::IPAddress => write!(f, "RVIPAddress(2)"),
            Self::DevPort => write!(f, "RVDevPort(3)"),
            Self::OwnerPort => write!(f, "RVOwnerPort(4)"),
            Self::Dns => write!(f, "RVDns(5)"),
            Self::SvCertHash => write!(f, "RVSvCertHash(6)"),
            Self::ClCertHash => write!(f, "RVClCertHash(7)"),
            Self::UserInput => write!(f, "RVUserInput(8)"),
            Self::WifiSsid => write!(f, "RVWifiSsid(9)"),
            Self::WifiPw => write!(f, "RVWifiPw(10)"),
            Self::Medium => write!(f, "RVMedium(11)"),
            Self::Protocol => write!(f, "RVProtocol(12)"),
            Self::Delaysec => write!(f, "RVDelaysec(13)"),
            Self::Bypass => write!(f, "RVBypass(14)"),
            Self::ExtRV => write!(f, "RVExtRV(15)"),
        }
    }
}

impl TryFrom<u8> for RvVariable {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let value = match value {
            0 => Self::DevOnly,
            1 => Self::OwnerOnly,
            2 => Self::IPAddress,
            3 => Self::DevPort,
            4 => Self::OwnerPort,
            5 => Self::Dns,
            6 => Self::SvCertHash,
            7 => Self::ClCertHash,
            8 => Self::UserInput,
            9 => Self::WifiSsid,
            10 => Self::WifiPw,
            11 => Self::Medium,
            12 => Self::Protocol,
            13 => Self::Delaysec,
            14 => Self::Bypass,
            15 => Self::ExtRV,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for RVVariable")),
        };

        Ok(value)
    }
}

impl From<RvVariable> for u8 {
    fn from(value: RvVariable) -> Self {
        value as u8
    }
}

/// ```cddl
/// RVProtocolValue /= (
///     RVProtRest    => 0,
///     RVProtHttp    => 1,
///     RVProtHttps   => 2,
///     RVProtTcp     => 3,
///     RVProtTls     => 4,
///     RVProtCoapTcp => 5,
///     RVProtCoapUdp => 6
/// )
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum RvProtocolValue {
    /// First supported protocol from HTTPS, HTTP, CoAP UDP, CoAP TCP.
    Rest = 0,
    /// HTTP over TCP
    Http = 1,
    /// HTTP over TLS, if supported
    Https = 2,
    /// Bare TCP, if supported
    Tcp = 3,
    /// Bare TLS, if supported
    Tls = 4,
    /// CoAP protocol over TCP, if supported
    CoapTcp = 5,
    /// CoAP protocol over UDP, if supported
    CoapUdp = 6,
}

impl TryFrom<u8> for RvProtocolValue {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let value = match value {
            0 => RvProtocolValue::Rest,
            1 => RvProtocolValue::Http,
            2 => RvProtocolValue::Https,
            3 => RvProtocolValue::Tcp,
            4 => RvProtocolValue::Tls,
            5 => RvProtocolValue::CoapTcp,
            6 => RvProtocolValue::CoapUdp,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for RVProtocolValue")),
        };

        Ok(value)
    }
}

impl From<RvProtocolValue> for u8 {
    fn from(value: RvProtocolValue) -> Self {
        value as u8
    }
}

/// ```cddl
/// RVValue = bstr .cbor any
/// ```
pub type RvValue<'a> = Cow<'a, Bytes>;

/// ```cddl
/// RVTO2Addr = [ + RVTO2AddrEntry ]
/// ```
///
/// Addresses the Owner is currently reachable at for TO2.
pub type RvTo2Addr<'a> = OneOrMore<RvTo2AddrEntry<'a>>;

/// ```cddl
/// RVTO2AddrEntry = [
///     RVIP:       IPAddress / null,
///     RVDNS:      DNSAddress / null,
///     RVPort:     Port,
///     RVProtocol: TransportProtocol
/// ]
/// ```
///
/// At least one of `RVIP` and `RVDNS` must be present.
#[derive(Debug, Clone, PartialEq)]
pub struct RvTo2AddrEntry<'a> {
    pub(crate) rv_ip: Option<IpAddress>,
    pub(crate) rv_dns: Option<DnsAddress<'a>>,
    pub(crate) rv_port: Port,
    pub(crate) rv_protocol: TransportProtocol,
}

impl<'a> RvTo2AddrEntry<'a> {
    /// Create the address entry.
    pub fn new(
        rv_ip: Option<IpAddress>,
        rv_dns: Option<DnsAddress<'a>>,
        rv_port: Port,
        rv_protocol: TransportProtocol,
    ) -> Self {
        Self {
            rv_ip,
            rv_dns,
            rv_port,
            rv_protocol,
        }
    }

    /// Returns the IP address.
    pub fn rv_ip(&self) -> Option<&IpAddress> {
        self.rv_ip.as_ref()
    }

    /// Returns the DNS name.
    pub fn rv_dns(&self) -> Option<&str> {
        self.rv_dns.as_deref()
    }

    /// Returns the port.
    pub fn rv_port(&self) -> Port {
        self.rv_port
    }

    /// Returns the transport protocol.
    pub fn rv_protocol(&self) -> TransportProtocol {
        self.rv_protocol
    }
}

impl Serialize for RvTo2AddrEntry<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            rv_ip,
            rv_dns,
            rv_port,
            rv_protocol,
        } = self;

        (rv_ip, rv_dns, rv_port, rv_protocol).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RvTo2AddrEntry<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (rv_ip, rv_dns, rv_port, rv_protocol) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            rv_ip,
            rv_dns,
            rv_port,
            rv_protocol,
        })
    }
}

/// Payload of the `to1d` blob, signed by the Owner key and served to the
/// device by the Rendezvous Server.
///
/// ```cddl
/// To1dBlobPayload = [
///     to1dRV:       RVTO2Addr,
///     to1dTo0dHash: Hash
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct To1dBlobPayload<'a> {
    pub(crate) to1d_rv: RvTo2Addr<'a>,
    pub(crate) to1d_to0d_hash: Hash<'a>,
}

impl<'a> To1dBlobPayload<'a> {
    /// Create the blob payload.
    pub fn new(to1d_rv: RvTo2Addr<'a>, to1d_to0d_hash: Hash<'a>) -> Self {
        Self {
            to1d_rv,
            to1d_to0d_hash,
        }
    }

    /// The Owner addresses.
    pub fn rv(&self) -> &RvTo2Addr<'a> {
        &self.to1d_rv
    }

    /// Consumes the payload and returns the Owner addresses.
    pub fn take_rv(self) -> RvTo2Addr<'a> {
        self.to1d_rv
    }

    /// Hash of the `to0d` object of the same TO0 message.
    pub fn to0d_hash(&self) -> &Hash<'a> {
        &self.to1d_to0d_hash
    }
}

impl Serialize for To1dBlobPayload<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            to1d_rv,
            to1d_to0d_hash,
        } = self;

        (to1d_rv, to1d_to0d_hash).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for To1dBlobPayload<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (to1d_rv, to1d_to0d_hash) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            to1d_rv,
            to1d_to0d_hash,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use pretty_assertions::assert_eq;

    use crate::hash::tests::create_hash;

    use super::*;

    pub(crate) fn create_rv_info() -> RendezvousInfo<'static> {
        let ip = RendezvousInstr::encode(
            RvVariable::IPAddress,
            &IpAddress::from(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        )
        .unwrap();

        let port = RendezvousInstr::encode(RvVariable::DevPort, &8080u16).unwrap();

        RendezvousInfo::new(vec![RendezvousDirective::new(vec![ip, port]).unwrap()]).unwrap()
    }

    pub(crate) fn create_rv_to2_addr() -> RvTo2Addr<'static> {
        RvTo2Addr::new(vec![RvTo2AddrEntry::new(
            Some(IpAddress::from(IpAddr::V4(Ipv4Addr::LOCALHOST))),
            Some("owner.example".into()),
            8043,
            TransportProtocol::Http,
        )])
        .unwrap()
    }

    #[test]
    fn rendezvous_info_roundtrip() {
        let case = create_rv_info();

        let mut buf = Vec::new();
        ciborium::into_writer(&case, &mut buf).unwrap();

        let res: RendezvousInfo = ciborium::from_reader(buf.as_slice()).unwrap();

        assert_eq!(res, case);
    }

    #[test]
    fn rendezvous_instr_value() {
        let instr = RendezvousInstr::encode(RvVariable::DevPort, &8080u16).unwrap();

        let port: u16 = instr.value().unwrap();

        assert_eq!(port, 8080);

        instr.value::<String>().unwrap_err();
    }

    #[test]
    fn rv_variable_roundtrip() {
        for value in 0..=15u8 {
            let case = RvVariable::try_from(value).unwrap();

            let mut buf = Vec::new();
            ciborium::into_writer(&case, &mut buf).unwrap();

            let res: RvVariable = ciborium::from_reader(buf.as_slice()).unwrap();

            assert_eq!(res, case);
            assert_eq!(u8::from(res), value);
        }
    }

    #[test]
    fn rv_variable_err() {
        let err = RvVariable::try_from(16).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn rv_protocol_value_roundtrip() {
        for value in 0..=6u8 {
            let case = RvProtocolValue::try_from(value).unwrap();

            let mut buf = Vec::new();
            ciborium::into_writer(&case, &mut buf).unwrap();

            let res: RvProtocolValue = ciborium::from_reader(buf.as_slice()).unwrap();

            assert_eq!(res, case);
        }

        let err = RvProtocolValue::try_from(7).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn rv_to2_addr_roundtrip() {
        let case = create_rv_to2_addr();

        let mut buf = Vec::new();
        ciborium::into_writer(&case, &mut buf).unwrap();

        let res: RvTo2Addr = ciborium::from_reader(buf.as_slice()).unwrap();

        assert_eq!(res, case);

        let entry = res.first();
        assert_eq!(entry.rv_port(), 8043);
        assert_eq!(entry.rv_dns(), Some("owner.example"));
        assert_eq!(entry.rv_protocol(), TransportProtocol::Http);
        assert!(entry.rv_ip().is_some());
    }

    #[test]
    fn to1d_blob_payload_roundtrip() {
        let case = To1dBlobPayload::new(create_rv_to2_addr(), create_hash());

        let mut buf = Vec::new();
        ciborium::into_writer(&case, &mut buf).unwrap();

        let res: To1dBlobPayload = ciborium::from_reader(buf.as_slice()).unwrap();

        assert_eq!(res, case);
        assert_eq!(res.to0d_hash(), &create_hash());
        assert_eq!(res.rv(), &create_rv_to2_addr());
        assert_eq!(res.take_rv(), create_rv_to2_addr());
    }
}
