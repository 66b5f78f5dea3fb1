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

//! Ownership voucher engine: creation, extension and chain verification.
//!
//! Every entry transfers custody from its signer to the key in its
//! payload. Verification walks the chain entry by entry: the signature
//! must verify against the previous holder's key, the previous-hash link
//! must match the previous entry's exact bytes (the header bytes for
//! entry 0) and the payload key hash must match the payload key. The same
//! incremental walk serves the device during TO2.GetOVNextEntry.

use std::borrow::Cow;

use astarte_fdo_protocol::cbor::CborBstr;
use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::hash::{Hash, HashAlg};
use astarte_fdo_protocol::pubkey::PublicKey;
use astarte_fdo_protocol::voucher::{OvEntry, OvEntryPayload, OvHeader, OwnershipVoucher};
use astarte_fdo_protocol::Error;
use coset::HeaderBuilder;

use crate::crypto::{self, Signer};

/// Hash of the encoded form of a public key.
pub fn pub_key_hash(alg: HashAlg, key: &PublicKey<'_>) -> Result<Hash<'static>, Error> {
    let mut buf = Vec::new();

    ciborium::into_writer(key, &mut buf)
        .map_err(|_| Error::new(ErrorKind::Encode, "public key"))?;

    crypto::hash(alg, &buf)
}

/// Hash of the header bytes, the anchor of the first entry.
pub fn header_hash(
    alg: HashAlg,
    header: &CborBstr<'_, OvHeader<'_>>,
) -> Result<Hash<'static>, Error> {
    crypto::hash(alg, header.bytes()?)
}

/// Builds and signs a single voucher entry.
///
/// `prev` are the exact bytes the previous-hash link must cover; `signer`
/// must be the previous key holder.
pub fn sign_entry<S>(
    alg: HashAlg,
    signer: &S,
    prev: &[u8],
    new_owner: &PublicKey<'_>,
) -> Result<OvEntry, Error>
where
    S: Signer,
{
    let payload = OvEntryPayload::new(
        crypto::hash(alg, prev)?,
        pub_key_hash(alg, new_owner)?,
        new_owner.clone(),
    );

    let buf = payload.encode()?;

    let sign = signer.cose_sign(HeaderBuilder::new(), buf)?;

    Ok(OvEntry::new(sign))
}

/// Extends the voucher by appending an entry transferring custody to
/// `new_owner`.
///
/// The signer must hold the key of the current tail entry; appending is
/// the only permitted mutation, the chain is never truncated or
/// reordered. Returns the extended voucher, leaving the input untouched so
/// the caller can perform an atomic replace-if-current on its store.
pub fn extend<S>(
    voucher: &OwnershipVoucher<'_>,
    signer: &S,
    new_owner: &PublicKey<'_>,
) -> Result<OwnershipVoucher<'static>, Error>
where
    S: Signer,
{
    let tail = voucher
        .entries()
        .last()
        .ok_or(Error::new(ErrorKind::Invalid, "voucher without entries"))?;

    let (_, tail_payload) = tail.payload()?;

    if !tail_payload.pub_key().same_key(&signer.public_key()?) {
        return Err(Error::new(
            ErrorKind::Invalid,
            "signer is not the current owner",
        ));
    }

    let alg = crypto::hash_algorithm(signer.key_type());

    let prev = tail.encode()?;

    let entry = sign_entry(alg, signer, &prev, new_owner)?;

    let mut extended = clone_owned(voucher)?;
    extended.push_entry(entry);

    Ok(extended)
}

// Round-trips through the encoding to detach the borrowed lifetimes.
fn clone_owned(voucher: &OwnershipVoucher<'_>) -> Result<OwnershipVoucher<'static>, Error> {
    let mut buf = Vec::new();

    ciborium::into_writer(voucher, &mut buf)
        .map_err(|_| Error::new(ErrorKind::Encode, "the voucher"))?;

    ciborium::from_reader(buf.as_slice()).map_err(|_| Error::new(ErrorKind::Decode, "the voucher"))
}

/// Incremental verification of a voucher chain, entry by entry.
///
/// Used both for full voucher verification and by the device while it
/// fetches entries one at a time during TO2.
#[derive(Debug)]
pub struct ChainVerifier {
    pub_key: PublicKey<'static>,
    prev: Vec<u8>,
}

impl ChainVerifier {
    /// Starts the walk at the voucher header.
    pub fn start(header: &CborBstr<'_, OvHeader<'_>>) -> Result<Self, Error> {
        let pub_key = header.ov_pub_key.clone().into_owned();

        let prev = header.bytes()?.to_vec();

        Ok(Self { pub_key, prev })
    }

    /// Verifies one entry and advances the walk.
    pub fn verify_entry(&mut self, entry: &OvEntry) -> Result<(), Error> {
        // Signed by the previous key holder
        crypto::verify_cose_sign1(entry.sign(), &self.pub_key)?;

        let (_, payload) = entry.payload()?;

        // The previous-hash link covers the exact previous bytes
        crypto::verify_hash(payload.prev_hash(), &self.prev)?;

        // The payload key hash matches the payload key
        let key_hash = pub_key_hash(payload.pub_key_hash().alg(), payload.pub_key())?;
        if key_hash.as_ref() != payload.pub_key_hash().as_ref() {
            return Err(Error::new(ErrorKind::Verify, "entry public key hash"));
        }

        self.prev = entry.encode()?;
        self.pub_key = payload.take_pub_key().into_owned();

        Ok(())
    }

    /// Finishes the walk and returns the current owner key.
    pub fn into_owner_key(self) -> PublicKey<'static> {
        self.pub_key
    }

    /// The key custody currently points at.
    pub fn owner_key(&self) -> &PublicKey<'static> {
        &self.pub_key
    }
}

/// Verifies the whole voucher chain and returns the current owner key.
///
/// An empty chain, a broken hash link or a signature that does not verify
/// against the previous holder's key all reject the voucher.
pub fn verify(voucher: &OwnershipVoucher<'_>) -> Result<PublicKey<'static>, Error> {
    if voucher.entries().is_empty() {
        return Err(Error::new(ErrorKind::Verify, "empty voucher chain"));
    }

    let mut verifier = ChainVerifier::start(voucher.header())?;

    for entry in voucher.entries() {
        verifier.verify_entry(entry)?;
    }

    Ok(verifier.into_owner_key())
}

/// The key verifying device attestations: the leaf of the voucher's
/// device certificate chain.
pub fn device_verification_key(
    voucher: &OwnershipVoucher<'_>,
) -> Result<PublicKey<'static>, Error> {
    use astarte_fdo_protocol::pubkey::KeyType;

    let chain = voucher.dev_cert_chain().ok_or(Error::new(
        ErrorKind::Invalid,
        "voucher without a device certificate chain",
    ))?;

    let leaf = chain.leaf();

    let key_type = match leaf.key_bits().len() {
        65 => KeyType::Secp256R1,
        97 => KeyType::Secp384R1,
        _ => return Err(Error::new(ErrorKind::Invalid, "device key type")),
    };

    Ok(PublicKey::with_x509(
        key_type,
        Cow::Owned(leaf.key().to_vec().into()),
    ))
}

/// The current owner key: the payload key of the tail entry.
///
/// Does not verify the chain; use [`verify`] when trust matters.
pub fn current_owner_key(voucher: &OwnershipVoucher<'_>) -> Result<PublicKey<'static>, Error> {
    let tail = voucher
        .entries()
        .last()
        .ok_or(Error::new(ErrorKind::Verify, "empty voucher chain"))?;

    let (_, payload) = tail.payload()?;

    Ok(payload.take_pub_key().into_owned())
}

#[cfg(test)]
pub(crate) mod tests {
    use astarte_fdo_protocol::hash::HMac;
    use astarte_fdo_protocol::rv::{RendezvousDirective, RendezvousInfo, RendezvousInstr, RvVariable};
    use astarte_fdo_protocol::types::{Guid, PROTOCOL_VERSION};
    use astarte_fdo_protocol::voucher::OvHeader;
    use pretty_assertions::assert_eq;

    use crate::crypto::SoftwareSigner;

    use super::*;

    pub(crate) fn test_rv_info() -> RendezvousInfo<'static> {
        let port = RendezvousInstr::encode(RvVariable::DevPort, &8080u16).unwrap();

        RendezvousInfo::new(vec![RendezvousDirective::new(vec![port]).unwrap()]).unwrap()
    }

    pub(crate) fn test_header(mfg: &SoftwareSigner) -> CborBstr<'static, OvHeader<'static>> {
        CborBstr::new(OvHeader {
            ovh_prot_ver: PROTOCOL_VERSION,
            ov_guid: Guid::new([7; 16]),
            ov_rv_info: test_rv_info(),
            ov_device_info: "astarte-fdo".into(),
            ov_pub_key: mfg.public_key().unwrap(),
            ov_dev_cert_chain_hash: None,
        })
    }

    /// Voucher with entry 0 transferring custody from the manufacturer to
    /// the first owner.
    pub(crate) fn test_voucher(
        mfg: &SoftwareSigner,
        owner: &SoftwareSigner,
    ) -> OwnershipVoucher<'static> {
        let header = test_header(mfg);

        let alg = crypto::hash_algorithm(mfg.key_type());

        let entry = sign_entry(
            alg,
            mfg,
            header.bytes().unwrap(),
            &owner.public_key().unwrap(),
        )
        .unwrap();

        let hmac = crypto::hmac_sign(
            crypto::hmac_algorithm(mfg.key_type()),
            &[0x11; 32],
            header.bytes().unwrap(),
        )
        .unwrap();

        OwnershipVoucher::new(PROTOCOL_VERSION, header, hmac, None, vec![entry])
    }

    #[test]
    fn verify_fresh_voucher() {
        let mfg = SoftwareSigner::generate_p256().unwrap();
        let owner = SoftwareSigner::generate_p256().unwrap();

        let voucher = test_voucher(&mfg, &owner);

        let key = verify(&voucher).unwrap();

        assert!(key.same_key(&owner.public_key().unwrap()));
        assert!(current_owner_key(&voucher)
            .unwrap()
            .same_key(&owner.public_key().unwrap()));
    }

    #[test]
    fn extend_keeps_the_chain_valid() {
        let mfg = SoftwareSigner::generate_p256().unwrap();
        let owner = SoftwareSigner::generate_p256().unwrap();
        let next = SoftwareSigner::generate_p256().unwrap();

        let voucher = test_voucher(&mfg, &owner);

        let extended = extend(&voucher, &owner, &next.public_key().unwrap()).unwrap();

        assert_eq!(extended.entries().len(), 2);

        let key = verify(&extended).unwrap();
        assert!(key.same_key(&next.public_key().unwrap()));

        // The original is untouched
        assert_eq!(voucher.entries().len(), 1);
        verify(&voucher).unwrap();
    }

    #[test]
    fn extend_tail_links() {
        let mfg = SoftwareSigner::generate_p256().unwrap();
        let owner = SoftwareSigner::generate_p256().unwrap();
        let next = SoftwareSigner::generate_p256().unwrap();

        let voucher = test_voucher(&mfg, &owner);
        let prior_tail = voucher.entries().last().unwrap().encode().unwrap();

        let extended = extend(&voucher, &owner, &next.public_key().unwrap()).unwrap();

        let tail = extended.entries().last().unwrap();

        // Signed by the previous owner
        crypto::verify_cose_sign1(tail.sign(), &owner.public_key().unwrap()).unwrap();

        let (_, payload) = tail.payload().unwrap();

        // Previous-hash covers the prior tail bytes
        crypto::verify_hash(payload.prev_hash(), &prior_tail).unwrap();

        // Payload key hash matches the new owner key
        let exp = pub_key_hash(HashAlg::Sha256, &next.public_key().unwrap()).unwrap();
        assert_eq!(payload.pub_key_hash().as_ref(), exp.as_ref());
    }

    #[test]
    fn extend_requires_current_owner() {
        let mfg = SoftwareSigner::generate_p256().unwrap();
        let owner = SoftwareSigner::generate_p256().unwrap();
        let intruder = SoftwareSigner::generate_p256().unwrap();
        let next = SoftwareSigner::generate_p256().unwrap();

        let voucher = test_voucher(&mfg, &owner);

        let err = extend(&voucher, &intruder, &next.public_key().unwrap()).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn verify_rejects_empty_chain() {
        let mfg = SoftwareSigner::generate_p256().unwrap();

        let header = test_header(&mfg);
        let hmac = HMac::with_sha256(Cow::Owned(vec![0x22; 32].into())).unwrap();

        let voucher = OwnershipVoucher::new(PROTOCOL_VERSION, header, hmac, None, vec![]);

        let err = verify(&voucher).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Verify);
        assert_eq!(
            *current_owner_key(&voucher).unwrap_err().kind(),
            ErrorKind::Verify
        );
    }

    #[test]
    fn verify_rejects_broken_hash_link() {
        let mfg = SoftwareSigner::generate_p256().unwrap();
        let owner = SoftwareSigner::generate_p256().unwrap();
        let next = SoftwareSigner::generate_p256().unwrap();

        let voucher = test_voucher(&mfg, &owner);

        // Entry whose previous-hash covers the wrong bytes
        let alg = crypto::hash_algorithm(owner.key_type());
        let bad = sign_entry(alg, &owner, b"not the tail", &next.public_key().unwrap()).unwrap();

        let mut broken = clone_owned(&voucher).unwrap();
        broken.push_entry(bad);

        let err = verify(&broken).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Verify);
    }

    #[test]
    fn verify_rejects_wrong_signer() {
        let mfg = SoftwareSigner::generate_p256().unwrap();
        let owner = SoftwareSigner::generate_p256().unwrap();
        let intruder = SoftwareSigner::generate_p256().unwrap();
        let next = SoftwareSigner::generate_p256().unwrap();

        let voucher = test_voucher(&mfg, &owner);

        let prev = voucher.entries().last().unwrap().encode().unwrap();
        let alg = crypto::hash_algorithm(intruder.key_type());
        let forged = sign_entry(alg, &intruder, &prev, &next.public_key().unwrap()).unwrap();

        let mut broken = clone_owned(&voucher).unwrap();
        broken.push_entry(forged);

        let err = verify(&broken).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Verify);
    }

    #[test]
    fn chain_verifier_incremental() {
        let mfg = SoftwareSigner::generate_p256().unwrap();
        let owner = SoftwareSigner::generate_p256().unwrap();
        let next = SoftwareSigner::generate_p256().unwrap();

        let voucher = test_voucher(&mfg, &owner);
        let extended = extend(&voucher, &owner, &next.public_key().unwrap()).unwrap();

        let mut verifier = ChainVerifier::start(extended.header()).unwrap();

        assert!(verifier
            .owner_key()
            .same_key(&mfg.public_key().unwrap()));

        for entry in extended.entries() {
            verifier.verify_entry(entry).unwrap();
        }

        assert!(verifier
            .into_owner_key()
            .same_key(&next.public_key().unwrap()));
    }
}
