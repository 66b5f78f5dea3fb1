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

//! Delegate sub-protocol: OID-scoped certificate chains by which the owner
//! key authorizes subordinates.
//!
//! A delegate chain is a list of X.509 certificates, leaf first, each
//! signed by the next one; the root is anchored by the voucher's current
//! owner key. Certificates carry function OIDs under the delegate arc
//! (onboard, redirect, upload, claim, provision, extend), and optionally a
//! named identifier (leaf) or identifier constraints (CA). A child
//! identifier must be permitted by every ancestor that declares
//! constraints; `*` matches within a comma separated term.
//!
//! Certificate expiration and revocation are not checked at this layer;
//! they are the responsibility of the deploying operator.

use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::pubkey::PublicKey;
use astarte_fdo_protocol::x509::CoseX509;
use astarte_fdo_protocol::Error;
use rcgen::{
    BasicConstraints, CertificateParams, CustomExtension, DistinguishedName, DnType, IsCa, Issuer,
    KeyUsagePurpose,
};
use tracing::{debug, error};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::crypto::{key_bits, software::OwnedRcgenKey};

/// Delegate arc: 1.3.6.1.4.1.45724.3, DER encoded.
const OID_DELEGATE_BASE: &[u8] = &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0xe5, 0x1c, 0x03];

/// Component form of the delegate arc, for certificate generation.
const OID_DELEGATE_BASE_COMPONENTS: &[u64] = &[1, 3, 6, 1, 4, 1, 45724, 3];

/// Functions a delegate certificate may be scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegateFunction {
    /// Run TO2 against devices.
    Onboard,
    /// Register redirect blobs at the rendezvous (TO0).
    Redirect,
    /// Upload vouchers.
    Upload,
    /// Claim vouchers.
    Claim,
    /// Provision devices.
    Provision,
    /// Extend vouchers.
    Extend,
}

impl DelegateFunction {
    fn arc(&self) -> u64 {
        match self {
            DelegateFunction::Onboard => 1,
            DelegateFunction::Redirect => 2,
            DelegateFunction::Upload => 3,
            DelegateFunction::Claim => 4,
            DelegateFunction::Provision => 5,
            DelegateFunction::Extend => 6,
        }
    }

    /// DER encoded OID of the function extension.
    fn oid_bytes(&self) -> Vec<u8> {
        let mut oid = OID_DELEGATE_BASE.to_vec();
        oid.push(1);
        oid.push(self.arc() as u8);

        oid
    }

    /// OID components of the function extension.
    pub fn oid_components(&self) -> [u64; 10] {
        let mut components = [0u64; 10];
        components[..8].copy_from_slice(OID_DELEGATE_BASE_COMPONENTS);
        components[8] = 1;
        components[9] = self.arc();

        components
    }

    /// The function name, as used in operator tooling.
    pub fn as_str(&self) -> &'static str {
        match self {
            DelegateFunction::Onboard => "onboard",
            DelegateFunction::Redirect => "redirect",
            DelegateFunction::Upload => "upload",
            DelegateFunction::Claim => "claim",
            DelegateFunction::Provision => "provision",
            DelegateFunction::Extend => "extend",
        }
    }
}

impl std::fmt::Display for DelegateFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn oid_identifier() -> Vec<u8> {
    let mut oid = OID_DELEGATE_BASE.to_vec();
    oid.push(2);

    oid
}

fn oid_identifier_constraints() -> Vec<u8> {
    let mut oid = OID_DELEGATE_BASE.to_vec();
    oid.push(3);

    oid
}

/// Whether `name` is matched by at least one term of `permitted`.
///
/// Spaces are ignored; terms are comma separated; `*` matches any
/// substring within a term.
pub fn is_permitted_identifier(name: &str, permitted: &str) -> bool {
    let name: String = name.chars().filter(|c| !c.is_whitespace()).collect();
    let permitted: String = permitted.chars().filter(|c| !c.is_whitespace()).collect();

    permitted
        .split(',')
        .any(|pattern| wildcard_match(pattern, &name))
}

/// Whether every term of `child` is permitted by at least one term of
/// `parent`.
pub fn is_permitted_identifier_rule(child: &str, parent: &str) -> bool {
    let child: String = child.chars().filter(|c| !c.is_whitespace()).collect();
    let parent: String = parent.chars().filter(|c| !c.is_whitespace()).collect();

    child.split(',').all(|term| {
        parent
            .split(',')
            .any(|pattern| wildcard_match(pattern, term))
    })
}

/// Glob-style match where `*` stands for any (possibly empty) substring.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == text,
        Some((prefix, rest)) => {
            let Some(text) = text.strip_prefix(prefix) else {
                return false;
            };

            if rest.is_empty() {
                return true;
            }

            (0..=text.len())
                .filter(|idx| text.is_char_boundary(*idx))
                .any(|idx| wildcard_match(rest, &text[idx..]))
        }
    }
}

struct ParsedCert<'a> {
    cert: X509Certificate<'a>,
}

impl<'a> ParsedCert<'a> {
    fn parse(der: &'a [u8]) -> Result<Self, Error> {
        let (rest, cert) = X509Certificate::from_der(der).map_err(|err| {
            error!(error = %err, "couldn't parse delegate certificate");

            Error::new(ErrorKind::Invalid, "delegate certificate")
        })?;

        if !rest.is_empty() {
            return Err(Error::new(
                ErrorKind::Invalid,
                "trailing bytes after delegate certificate",
            ));
        }

        Ok(Self { cert })
    }

    fn extension_value(&self, oid: &[u8]) -> Option<&[u8]> {
        self.cert
            .extensions()
            .iter()
            .find(|ext| ext.oid.as_bytes() == oid)
            .map(|ext| ext.value)
    }

    fn identifier(&self) -> String {
        self.extension_str(&oid_identifier())
    }

    fn identifier_constraints(&self) -> String {
        self.extension_str(&oid_identifier_constraints())
    }

    fn extension_str(&self, oid: &[u8]) -> String {
        self.extension_value(oid)
            .map(|value| {
                String::from_utf8_lossy(value)
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn has_function(&self, function: DelegateFunction) -> bool {
        self.extension_value(&function.oid_bytes()).is_some()
    }

    fn common_name(&self) -> &str {
        self.cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or_default()
    }

    fn issuer_common_name(&self) -> &str {
        self.cert
            .issuer()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or_default()
    }

    fn digital_signature(&self) -> bool {
        self.cert
            .key_usage()
            .ok()
            .flatten()
            .is_some_and(|ku| ku.value.digital_signature())
    }

    fn cert_sign(&self) -> bool {
        self.cert
            .key_usage()
            .ok()
            .flatten()
            .is_some_and(|ku| ku.value.key_cert_sign())
    }

    fn basic_constraints_valid(&self) -> bool {
        matches!(self.cert.basic_constraints(), Ok(Some(_)))
    }

    fn is_ca(&self) -> bool {
        self.cert
            .basic_constraints()
            .ok()
            .flatten()
            .is_some_and(|bc| bc.value.ca)
    }

    fn key_bits(&self) -> Vec<u8> {
        self.cert.public_key().subject_public_key.data.to_vec()
    }

    /// Verifies this certificate's signature against the issuer key bits.
    fn verify_signed_by(&self, issuer_bits: &[u8]) -> Result<(), Error> {
        // Signature algorithm OIDs, DER encoded
        const ECDSA_SHA256: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x02];
        const ECDSA_SHA384: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x03];
        const RSA_SHA256: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0b];
        const RSA_SHA384: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0c];

        let oid = self.cert.signature_algorithm.algorithm.as_bytes();

        let alg: &'static dyn aws_lc_rs::signature::VerificationAlgorithm = if oid == ECDSA_SHA256 {
            &aws_lc_rs::signature::ECDSA_P256_SHA256_ASN1
        } else if oid == ECDSA_SHA384 {
            &aws_lc_rs::signature::ECDSA_P384_SHA384_ASN1
        } else if oid == RSA_SHA256 {
            &aws_lc_rs::signature::RSA_PKCS1_2048_8192_SHA256
        } else if oid == RSA_SHA384 {
            &aws_lc_rs::signature::RSA_PKCS1_3072_8192_SHA384
        } else {
            return Err(Error::new(
                ErrorKind::Verify,
                "unsupported certificate signature algorithm",
            ));
        };

        let tbs = self.cert.tbs_certificate.as_ref();
        let signature: &[u8] = &self.cert.signature_value.data;

        aws_lc_rs::signature::UnparsedPublicKey::new(alg, issuer_bits)
            .verify(tbs, signature)
            .map_err(|_| Error::new(ErrorKind::Verify, "delegate certificate signature"))
    }
}

/// Verifies a delegate chain, optionally anchored at the owner key and
/// scoped to a function.
///
/// The chain is ordered leaf first. When `owner_key` is given it acts as
/// the trust anchor for the root certificate, standing in for a
/// certificate the owner does not have. When `function` is given, every
/// certificate in the chain (the root included) must carry the function
/// OID. `named_owner` scopes the whole chain: the root constraints, if
/// any, must fall within it.
pub fn verify_chain(
    chain: &CoseX509<'_>,
    owner_key: Option<&PublicKey<'_>>,
    function: Option<DelegateFunction>,
    named_owner: Option<&str>,
) -> Result<(), Error> {
    let ders: Vec<&[u8]> = chain.iter().map(|cert| cert.der()).collect();

    if ders.is_empty() {
        return Err(Error::new(ErrorKind::Verify, "empty delegate chain"));
    }

    let mut certs = Vec::with_capacity(ders.len());
    for der in &ders {
        certs.push(ParsedCert::parse(der)?);
    }

    let mut prev_owner = String::new();

    for (idx, cert) in certs.iter().enumerate() {
        let constraints = if idx == 0 {
            cert.identifier()
        } else {
            cert.identifier_constraints()
        };

        debug!(idx, subject = cert.common_name(), %constraints, "walking delegate chain");

        let mut next = String::new();

        if !constraints.is_empty() {
            // Walking leaf to root: a child identifier must be permitted
            // by the parent constraints
            if !prev_owner.is_empty() && !is_permitted_identifier_rule(&prev_owner, &constraints) {
                return Err(Error::new(
                    ErrorKind::Verify,
                    "identifier not permitted by ancestor constraints",
                ));
            }

            next = constraints;
        }

        if idx != 0 && prev_owner.is_empty() && !next.is_empty() {
            return Err(Error::new(
                ErrorKind::Verify,
                "constraints declared but no identifier below",
            ));
        }

        prev_owner = next;

        match certs.get(idx + 1) {
            Some(parent) => {
                cert.verify_signed_by(&parent.key_bits())?;

                if cert.issuer_common_name() != parent.common_name() {
                    return Err(Error::new(
                        ErrorKind::Verify,
                        "issuer does not match the parent subject",
                    ));
                }
            }
            None => {
                // Root: anchor at the owner key when one is supplied
                if let Some(owner_key) = owner_key {
                    let bits = key_bits(owner_key)?;

                    cert.verify_signed_by(&bits)?;
                }
            }
        }

        if let Some(function) = function {
            if !cert.has_function(function) {
                return Err(Error::new(
                    ErrorKind::Verify,
                    "function permission missing on a chain certificate",
                ));
            }
        }

        if !cert.digital_signature() {
            return Err(Error::new(
                ErrorKind::Verify,
                "certificate without digital signature usage",
            ));
        }

        if !cert.basic_constraints_valid() {
            return Err(Error::new(
                ErrorKind::Verify,
                "certificate without basic constraints",
            ));
        }

        // The leaf does not need to be a CA, every other entry does
        if idx != 0 {
            if !cert.is_ca() {
                return Err(Error::new(ErrorKind::Verify, "intermediate is not a CA"));
            }

            if !cert.cert_sign() {
                return Err(Error::new(
                    ErrorKind::Verify,
                    "intermediate without cert sign usage",
                ));
            }
        }
    }

    // A chain scoped to one tenant cannot be used for another: the root
    // constraints must fall within the expected named owner
    if let Some(named_owner) = named_owner {
        let root_constraints = certs
            .last()
            .map(|cert| cert.identifier_constraints())
            .unwrap_or_default();

        if !root_constraints.is_empty()
            && !is_permitted_identifier_rule(&root_constraints, named_owner)
        {
            return Err(Error::new(
                ErrorKind::Verify,
                "root constraints exceed the named owner scope",
            ));
        }
    }

    Ok(())
}

/// The named identifier declared by the chain leaf, when present.
pub fn chain_identifier(chain: &CoseX509<'_>) -> Result<Option<String>, Error> {
    let leaf = ParsedCert::parse(chain.leaf().der())?;

    let identifier = leaf.identifier();

    Ok((!identifier.is_empty()).then_some(identifier))
}

/// Position of a certificate in a delegate chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegateTier {
    /// Cannot sign other certificates.
    Leaf,
    /// Intermediate CA.
    Intermediate,
    /// Root CA.
    Root,
}

/// Generates a delegate certificate.
///
/// For a CA (root or intermediate) `ident` is an identifier constraint
/// set; for a leaf it is a named identifier. The subject key is certified
/// and the certificate is signed by the issuer key.
pub fn generate_delegate(
    issuer_key: OwnedRcgenKey,
    tier: DelegateTier,
    subject_key: &OwnedRcgenKey,
    subject: &str,
    issuer: &str,
    functions: &[DelegateFunction],
    ident: &str,
) -> Result<Vec<u8>, Error> {
    let mut params = CertificateParams::new([]).map_err(|err| {
        error!(error = %err, "couldn't create certificate parameters");

        Error::new(ErrorKind::Crypto, "to create certificate parameters")
    })?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, subject);
    params.distinguished_name = dn;

    match tier {
        DelegateTier::Leaf => {
            params.is_ca = IsCa::ExplicitNoCa;
            params.key_usages = vec![KeyUsagePurpose::DigitalSignature];

            if !ident.is_empty() {
                params.custom_extensions.push(custom_extension(
                    &[1, 3, 6, 1, 4, 1, 45724, 3, 2],
                    ident.as_bytes().to_vec(),
                ));
            }
        }
        DelegateTier::Intermediate | DelegateTier::Root => {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.key_usages = vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyCertSign,
            ];

            if !ident.is_empty() {
                params.custom_extensions.push(custom_extension(
                    &[1, 3, 6, 1, 4, 1, 45724, 3, 3],
                    ident.as_bytes().to_vec(),
                ));
            }
        }
    }

    for function in functions {
        params
            .custom_extensions
            .push(custom_extension(&function.oid_components(), Vec::new()));
    }

    let mut issuer_params = CertificateParams::new([]).map_err(|err| {
        error!(error = %err, "couldn't create issuer parameters");

        Error::new(ErrorKind::Crypto, "to create issuer parameters")
    })?;

    let mut issuer_dn = DistinguishedName::new();
    issuer_dn.push(DnType::CommonName, issuer);
    issuer_params.distinguished_name = issuer_dn;
    issuer_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    issuer_params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
    ];

    let issuer = Issuer::new(issuer_params, issuer_key);

    let cert = params.signed_by(subject_key, &issuer).map_err(|err| {
        error!(error = %err, "couldn't sign delegate certificate");

        Error::new(ErrorKind::Crypto, "to sign delegate certificate")
    })?;

    Ok(cert.der().to_vec())
}

fn custom_extension(oid: &[u64], content: Vec<u8>) -> CustomExtension {
    CustomExtension::from_oid_content(oid, content)
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;

    use crate::crypto::{Signer, SoftwareSigner};

    use super::*;

    #[test]
    fn identifier_matching() {
        let cases = [
            ("test", "test", true),
            ("test", "test2", false),
            ("test", "test,test1,test2", true),
            ("test3", "test,test1,test2", false),
            ("DNS:example.com", "DNS:  example.com", true),
            ("DNS:example.com", "DNS:  Example.com", false),
            ("DNS:test.example.com", "DNS:meco.com,DNS: *.example.com", true),
            ("DNS:example.com", "ID:112233", false),
            ("ID:112233", "DNS:*.example.com,ID:112233", true),
            ("DNS:112233", "DNS:*.example.com,ID:112233", false),
            ("DNS:mydom.example.com", "DNS:*.example.com,ID:112233", true),
        ];

        for (name, rules, exp) in cases {
            assert_eq!(
                is_permitted_identifier(name, rules),
                exp,
                "{name} -> {rules}"
            );
        }
    }

    #[test]
    fn identifier_rules() {
        let cases = [
            ("test", "test", true),
            ("test", "test1,test2", false),
            ("test1", "test1,test2", true),
            ("test2", "test1,test2", true),
            ("test1,test2", "test1", false),
            ("joe.test1", "*.test1,*.test2", true),
            ("joe.test2", "*.test1,*.test2", true),
            ("joe.test3", "*.test1,*.test2", false),
            ("DNS:subsub.sub.dom", "DNS:*.dom", true),
            ("DNS:sub.dom", "DNS:*.dom", true),
            ("DNS:subsub.sub.dom", "DNS:*.sub.dom", true),
            ("DNS:*.sub.dom", "DNS:*.dom", true),
            ("DNS:*.dom", "DNS:*.sub.dom", false),
            ("DNS:*.sub.dom", "DNS:*.dom , DNS: *.dom2", true),
            ("DNS:*.sub.dom2", "DNS:*.dom , DNS: *.dom2", true),
            ("DNS:*.sub1.dom", "DNS:*.sub1.dom , DNS: *.sub2.dom", true),
            ("DNS:*.sub2.dom", "DNS:*.sub1.dom , DNS: *.sub2.dom", true),
            ("DNS:*.sub3.dom", "DNS:*.sub1.dom , DNS: *.sub2.dom", false),
            ("ID:1234-1111", "ID:*-1111", true),
            ("ID:1234-1112", "ID:*-1111", false),
            ("ID:*-1111", "ID:*-1111", true),
            ("ID:*-1112", "ID:*-1111", false),
        ];

        for (child, parent, exp) in cases {
            assert_eq!(
                is_permitted_identifier_rule(child, parent),
                exp,
                "{child} -> {parent}"
            );
        }
    }

    #[test]
    fn identifier_laws() {
        assert!(is_permitted_identifier("x", "x"));

        // Disjunction over the rule terms
        assert_eq!(
            is_permitted_identifier("x", "a,b"),
            is_permitted_identifier("x", "a") || is_permitted_identifier("x", "b")
        );
        assert!(is_permitted_identifier("a", "a,b"));
        assert!(is_permitted_identifier("b", "a,b"));

        // Wildcard matches any sequence within a term
        assert!(is_permitted_identifier("abcdef", "a*f"));
        assert!(is_permitted_identifier("af", "a*f"));
    }

    /// Chain of root, intermediate and leaf with the given identifier
    /// extensions, all scoped to onboard.
    pub(crate) struct TestChain {
        pub root_key: SoftwareSigner,
        pub leaf_key: SoftwareSigner,
        pub chain: CoseX509<'static>,
    }

    pub(crate) fn generate_chain(root: &str, inter: &str, leaf: &str) -> TestChain {
        generate_chain_for(&[DelegateFunction::Onboard], root, inter, leaf)
    }

    pub(crate) fn generate_chain_for(
        functions: &[DelegateFunction],
        root: &str,
        inter: &str,
        leaf: &str,
    ) -> TestChain {
        let root_key = SoftwareSigner::generate_p384().unwrap();
        let inter_key = SoftwareSigner::generate_p384().unwrap();
        let leaf_key = SoftwareSigner::generate_p384().unwrap();

        let root_cert = generate_delegate(
            root_key.rcgen_key().unwrap(),
            DelegateTier::Root,
            &root_key.rcgen_key().unwrap(),
            "Test Root CA",
            "Test Root CA",
            functions,
            root,
        )
        .unwrap();

        let inter_cert = generate_delegate(
            root_key.rcgen_key().unwrap(),
            DelegateTier::Intermediate,
            &inter_key.rcgen_key().unwrap(),
            "Test Intermediate CA",
            "Test Root CA",
            functions,
            inter,
        )
        .unwrap();

        let leaf_cert = generate_delegate(
            inter_key.rcgen_key().unwrap(),
            DelegateTier::Leaf,
            &leaf_key.rcgen_key().unwrap(),
            "Test Leaf",
            "Test Intermediate CA",
            functions,
            leaf,
        )
        .unwrap();

        let chain = CoseX509::from_der_chain(vec![leaf_cert, inter_cert, root_cert]).unwrap();

        TestChain {
            root_key,
            leaf_key,
            chain,
        }
    }

    fn verify_generated(
        prev: &str,
        root: &str,
        inter: &str,
        leaf: &str,
    ) -> Result<(), Error> {
        let test = generate_chain(root, inter, leaf);

        let owner = test.root_key.public_key().unwrap();

        let named = (!prev.is_empty()).then_some(prev);

        verify_chain(
            &test.chain,
            Some(&owner),
            Some(DelegateFunction::Onboard),
            named,
        )
    }

    #[test]
    fn delegate_ident_chains() {
        let cases = [
            ("DNS:example.com", "", "", "DNS:example.com", true),
            ("DNS:1.example.com", "", "", "DNS:*.example.com", true),
            ("", "", "", "DNS:*.example.com", true),
            ("", "DNS:example.com", "", "", false),
            ("", "DNS:cocacola.com", "", "DNS:pepsi.com", false),
            ("", "", "DNS:cocacola.com", "DNS:pepsi.com", false),
            ("", "DNS:cocacola.com", "DNS:pepsi.com", "", false),
            ("", "", "DNS:*.dom", "DNS:*.sub.dom", true),
            ("", "", "DNS:*.example.com", "DNS:*.onboard.example.com", true),
            (
                "",
                "",
                "DNS:*.example22.com",
                "DNS:*.onboard.example.com",
                false,
            ),
            (
                "test",
                "",
                "DNS:*.example22.com",
                "DNS:*.onboard.example.com",
                false,
            ),
            ("", "DNS:*.dom", "DNS:*.sub.dom", "DNS:srv.sub.dom", true),
            (
                "",
                "DNS:*.sub.dom1,DNS:*.sub.dom2",
                "DNS:*.sub.sub.dom1",
                "DNS:srv.sub.sub.dom1",
                true,
            ),
            (
                "",
                "DNS:*.sub.dom1,DNS:*.sub.dom2",
                "DNS:*.sub.sub.dom2",
                "DNS:srv.sub.sub.dom2",
                true,
            ),
            (
                "",
                "DNS:*.sub.dom1,DNS:*.sub.dom2",
                "DNS:*.sub.sub.dom1",
                "DNS:srv.sub.sub.dom2",
                false,
            ),
            (
                "",
                "DNS:*.sub.dom1,DNS:*.sub.dom2",
                "DNS:*.sub.sub.dom1,DNS:*.sub.sub.dom2",
                "DNS:srv.sub.sub.dom2",
                true,
            ),
            ("DNS:*.dom", "DNS:*.dom", "DNS:*.sub.dom", "DNS:srv.sub.dom", true),
            (
                "DNS:*.bad",
                "DNS:*.dom",
                "DNS:*.sub.dom",
                "DNS:srv.sub.dom",
                false,
            ),
            (
                "DNS:*.dom",
                "DNS:*.sub.dom",
                "DNS:*.sub.sub.dom",
                "DNS:srv.sub.sub.dom",
                true,
            ),
        ];

        for (prev, root, inter, leaf, exp) in cases {
            let res = verify_generated(prev, root, inter, leaf);

            assert_eq!(
                res.is_ok(),
                exp,
                "prev={prev:?} root={root:?} inter={inter:?} leaf={leaf:?}: {res:?}"
            );
        }
    }

    #[test]
    fn function_oid_required_everywhere() {
        // Chain scoped to redirect does not verify for onboard
        let test = generate_chain_for(&[DelegateFunction::Redirect], "", "", "");

        let owner = test.root_key.public_key().unwrap();

        let err = verify_chain(
            &test.chain,
            Some(&owner),
            Some(DelegateFunction::Onboard),
            None,
        )
        .unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Verify);

        // Without a function to check the same chain verifies
        verify_chain(&test.chain, Some(&owner), None, None).unwrap();
    }

    #[test]
    fn chain_rejects_wrong_anchor() {
        let test = generate_chain("", "", "DNS:srv.example.com");

        let other = SoftwareSigner::generate_p384().unwrap();

        let err = verify_chain(
            &test.chain,
            Some(&other.public_key().unwrap()),
            Some(DelegateFunction::Onboard),
            None,
        )
        .unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Verify);
    }

    #[test]
    fn chain_identifier_reads_the_leaf() {
        let test = generate_chain("", "", "DNS:srv.example.com");

        let identifier = chain_identifier(&test.chain).unwrap();

        assert_eq!(identifier.as_deref(), Some("DNS:srv.example.com"));

        let unnamed = generate_chain("", "", "");
        assert_eq!(chain_identifier(&unnamed.chain).unwrap(), None);
    }

    #[test]
    fn delegate_function_names() {
        let cases = [
            (DelegateFunction::Onboard, "onboard"),
            (DelegateFunction::Redirect, "redirect"),
            (DelegateFunction::Upload, "upload"),
            (DelegateFunction::Claim, "claim"),
            (DelegateFunction::Provision, "provision"),
            (DelegateFunction::Extend, "extend"),
        ];

        for (function, exp) in cases {
            assert_eq!(function.to_string(), exp);
        }
    }
}
