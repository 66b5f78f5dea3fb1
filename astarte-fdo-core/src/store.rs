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

//! Persistent state behind the services, as narrow interfaces with
//! transactional semantics on single-record updates.
//!
//! The in-memory implementations mediate their own concurrency with a
//! mutex; sessions otherwise share no mutable state.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::pubkey::{KeyType, PublicKey};
use astarte_fdo_protocol::types::Guid;
use astarte_fdo_protocol::voucher::OwnershipVoucher;
use astarte_fdo_protocol::x509::CoseX509;
use astarte_fdo_protocol::Error;
use coset::CoseSign1;
use rustc_hash::FxHashMap;
use zeroize::Zeroizing;

use crate::transport::SessionToken;

/// Vouchers indexed by GUID.
pub trait VoucherStore {
    /// Stores a voucher under its GUID.
    fn insert(&self, voucher: OwnershipVoucher<'static>) -> Result<(), Error>;

    /// Loads the voucher for the GUID.
    fn get(&self, guid: &Guid) -> Result<Option<OwnershipVoucher<'static>>, Error>;

    /// Atomically replaces the voucher, only when the stored record still
    /// equals `current`.
    ///
    /// Prevents lost updates on concurrent owner transfers; a conflict is
    /// an [`ErrorKind::Unavailable`] error.
    fn replace_if_current(
        &self,
        current: &OwnershipVoucher<'static>,
        next: OwnershipVoucher<'static>,
    ) -> Result<(), Error>;

    /// Removes the voucher for the GUID.
    fn remove(&self, guid: &Guid) -> Result<(), Error>;
}

/// In-memory [`VoucherStore`], optionally preserving replaced vouchers.
#[derive(Debug, Default)]
pub struct MemoryVoucherStore {
    inner: Mutex<FxHashMap<Guid, OwnershipVoucher<'static>>>,
    preserve_replaced: bool,
    history: Mutex<Vec<OwnershipVoucher<'static>>>,
}

impl MemoryVoucherStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store retaining a history of replaced vouchers.
    pub fn with_history() -> Self {
        Self {
            preserve_replaced: true,
            ..Self::default()
        }
    }

    /// The replaced vouchers, oldest first.
    pub fn history(&self) -> Vec<OwnershipVoucher<'static>> {
        self.history.lock().expect("poisoned lock").clone()
    }
}

impl VoucherStore for MemoryVoucherStore {
    fn insert(&self, voucher: OwnershipVoucher<'static>) -> Result<(), Error> {
        let guid = voucher.header().ov_guid;

        self.inner
            .lock()
            .expect("poisoned lock")
            .insert(guid, voucher);

        Ok(())
    }

    fn get(&self, guid: &Guid) -> Result<Option<OwnershipVoucher<'static>>, Error> {
        Ok(self.inner.lock().expect("poisoned lock").get(guid).cloned())
    }

    fn replace_if_current(
        &self,
        current: &OwnershipVoucher<'static>,
        next: OwnershipVoucher<'static>,
    ) -> Result<(), Error> {
        let guid = current.header().ov_guid;

        let mut inner = self.inner.lock().expect("poisoned lock");

        let stored = inner
            .get(&guid)
            .ok_or(Error::new(ErrorKind::NotFound, "voucher for the guid"))?;

        if stored != current {
            return Err(Error::new(
                ErrorKind::Unavailable,
                "voucher changed concurrently",
            ));
        }

        let replaced = inner.insert(guid, next);

        if self.preserve_replaced {
            if let Some(replaced) = replaced {
                self.history.lock().expect("poisoned lock").push(replaced);
            }
        }

        Ok(())
    }

    fn remove(&self, guid: &Guid) -> Result<(), Error> {
        self.inner.lock().expect("poisoned lock").remove(guid);

        Ok(())
    }
}

/// Signing keys indexed by key type.
#[derive(Debug, Default)]
pub struct KeyStore<S> {
    keys: FxHashMap<KeyType, S>,
}

impl<S> KeyStore<S> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            keys: FxHashMap::default(),
        }
    }

    /// Stores the signer for a key type.
    pub fn insert(&mut self, key_type: KeyType, signer: S) {
        self.keys.insert(key_type, signer);
    }

    /// The signer for the key type.
    pub fn get(&self, key_type: KeyType) -> Result<&S, Error> {
        self.keys
            .get(&key_type)
            .ok_or(Error::new(ErrorKind::NotFound, "signer for the key type"))
    }
}

/// The blob registered at the rendezvous server during TO0.
#[derive(Debug, Clone)]
pub struct RendezvousBlob {
    /// The `to1d` object, signed by the owner key.
    pub to1d: CoseSign1,
    /// Verification key for the device EAT of TO1, from the voucher's
    /// device certificate chain.
    pub device_key: PublicKey<'static>,
}

/// Rendezvous blobs indexed by GUID, with a TTL.
pub trait RendezvousBlobStore {
    /// Stores the blob for the GUID, expiring after `ttl`.
    fn store(&self, guid: Guid, blob: RendezvousBlob, ttl: Duration) -> Result<(), Error>;

    /// Loads the blob for the GUID; an expired registration is never
    /// served.
    fn load(&self, guid: &Guid) -> Result<Option<RendezvousBlob>, Error>;
}

/// In-memory [`RendezvousBlobStore`].
#[derive(Debug, Default)]
pub struct MemoryRendezvousBlobStore {
    inner: Mutex<FxHashMap<Guid, (RendezvousBlob, Instant)>>,
}

impl MemoryRendezvousBlobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RendezvousBlobStore for MemoryRendezvousBlobStore {
    fn store(&self, guid: Guid, blob: RendezvousBlob, ttl: Duration) -> Result<(), Error> {
        let expires = Instant::now()
            .checked_add(ttl)
            .ok_or(Error::new(ErrorKind::OutOfRange, "blob ttl"))?;

        self.inner
            .lock()
            .expect("poisoned lock")
            .insert(guid, (blob, expires));

        Ok(())
    }

    fn load(&self, guid: &Guid) -> Result<Option<RendezvousBlob>, Error> {
        let mut inner = self.inner.lock().expect("poisoned lock");

        let Some((_, expires)) = inner.get(guid) else {
            return Ok(None);
        };

        if *expires <= Instant::now() {
            inner.remove(guid);

            return Ok(None);
        }

        Ok(inner.get(guid).map(|(blob, _)| blob.clone()))
    }
}

/// A named delegate: the leaf private key and the full certificate chain.
pub struct DelegateEntry {
    /// PKCS#8 DER of the leaf key.
    pub leaf_key: Zeroizing<Vec<u8>>,
    /// The certificate chain, leaf first.
    pub chain: CoseX509<'static>,
}

/// Delegate chains indexed by a human assigned name.
pub trait DelegateStore {
    /// Stores the entry under the name.
    fn store(&self, name: String, entry: DelegateEntry) -> Result<(), Error>;

    /// Loads the entry for the name.
    fn load(&self, name: &str) -> Result<Option<DelegateEntry>, Error>;
}

/// In-memory [`DelegateStore`].
#[derive(Default)]
pub struct MemoryDelegateStore {
    inner: Mutex<FxHashMap<String, DelegateEntry>>,
}

impl MemoryDelegateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DelegateStore for MemoryDelegateStore {
    fn store(&self, name: String, entry: DelegateEntry) -> Result<(), Error> {
        self.inner.lock().expect("poisoned lock").insert(name, entry);

        Ok(())
    }

    fn load(&self, name: &str) -> Result<Option<DelegateEntry>, Error> {
        let inner = self.inner.lock().expect("poisoned lock");

        let entry = inner.get(name).map(|entry| DelegateEntry {
            leaf_key: entry.leaf_key.clone(),
            chain: entry.chain.clone(),
        });

        Ok(entry)
    }
}

/// Per-session server state, indexed by an opaque token.
///
/// Reading a session removes it from the store; writing commits
/// atomically. A turn that fails between the two leaves no session
/// behind, which is the abort-on-failure rule of the protocols.
pub trait SessionStore<S> {
    /// Creates a session and returns its fresh token.
    fn create(&self, state: S) -> Result<SessionToken, Error>;

    /// Takes the session out of the store.
    fn take(&self, token: &SessionToken) -> Result<S, Error>;

    /// Writes the session back.
    fn store(&self, token: &SessionToken, state: S) -> Result<(), Error>;

    /// Drops the session.
    fn remove(&self, token: &SessionToken) -> Result<(), Error>;
}

/// In-memory [`SessionStore`].
pub struct MemorySessionStore<S> {
    rng: aws_lc_rs::rand::SystemRandom,
    inner: Mutex<FxHashMap<SessionToken, S>>,
}

impl<S> MemorySessionStore<S> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            rng: aws_lc_rs::rand::SystemRandom::new(),
            inner: Mutex::new(FxHashMap::default()),
        }
    }
}

impl<S> Default for MemorySessionStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SessionStore<S> for MemorySessionStore<S> {
    fn create(&self, state: S) -> Result<SessionToken, Error> {
        let token = SessionToken::random(&self.rng)?;

        self.inner
            .lock()
            .expect("poisoned lock")
            .insert(token.clone(), state);

        Ok(token)
    }

    fn take(&self, token: &SessionToken) -> Result<S, Error> {
        self.inner
            .lock()
            .expect("poisoned lock")
            .remove(token)
            .ok_or(Error::new(ErrorKind::Invalid, "unknown session token"))
    }

    fn store(&self, token: &SessionToken, state: S) -> Result<(), Error> {
        self.inner
            .lock()
            .expect("poisoned lock")
            .insert(token.clone(), state);

        Ok(())
    }

    fn remove(&self, token: &SessionToken) -> Result<(), Error> {
        self.inner.lock().expect("poisoned lock").remove(token);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::crypto::{Signer, SoftwareSigner};
    use crate::voucher::tests::test_voucher;
    use crate::voucher::{extend, verify};

    use super::*;

    #[test]
    fn voucher_store_roundtrip() {
        let mfg = SoftwareSigner::generate_p256().unwrap();
        let owner = SoftwareSigner::generate_p256().unwrap();

        let store = MemoryVoucherStore::new();
        let voucher = test_voucher(&mfg, &owner);
        let guid = voucher.header().ov_guid;

        store.insert(voucher.clone()).unwrap();

        let loaded = store.get(&guid).unwrap().unwrap();
        assert_eq!(loaded, voucher);

        store.remove(&guid).unwrap();
        assert!(store.get(&guid).unwrap().is_none());
    }

    #[test]
    fn voucher_replace_if_current() {
        let mfg = SoftwareSigner::generate_p256().unwrap();
        let owner = SoftwareSigner::generate_p256().unwrap();
        let next = SoftwareSigner::generate_p256().unwrap();

        let store = MemoryVoucherStore::with_history();
        let voucher = test_voucher(&mfg, &owner);
        let guid = voucher.header().ov_guid;

        store.insert(voucher.clone()).unwrap();

        let extended = extend(&voucher, &owner, &next.public_key().unwrap()).unwrap();

        store.replace_if_current(&voucher, extended.clone()).unwrap();

        verify(&store.get(&guid).unwrap().unwrap()).unwrap();

        // Replaying the same replace conflicts: the record moved on
        let err = store.replace_if_current(&voucher, extended).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::Unavailable);

        // The replaced voucher is preserved
        assert_eq!(store.history().len(), 1);
        assert_eq!(store.history()[0], voucher);
    }

    #[test]
    fn key_store_by_type() {
        let mut store = KeyStore::new();

        store.insert(
            KeyType::Secp256R1,
            SoftwareSigner::generate_p256().unwrap(),
        );

        store.get(KeyType::Secp256R1).unwrap();

        let err = store.get(KeyType::Secp384R1).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn rendezvous_blob_ttl() {
        let owner = SoftwareSigner::generate_p256().unwrap();

        let store = MemoryRendezvousBlobStore::new();
        let guid = Guid::new([1; 16]);

        let blob = RendezvousBlob {
            to1d: coset::CoseSign1Builder::new()
                .signature(vec![0xab; 64])
                .build(),
            device_key: owner.public_key().unwrap(),
        };

        store
            .store(guid, blob.clone(), Duration::from_secs(60))
            .unwrap();
        assert!(store.load(&guid).unwrap().is_some());

        // Zero TTL expires immediately
        store.store(guid, blob, Duration::from_secs(0)).unwrap();
        assert!(store.load(&guid).unwrap().is_none());

        // Unknown guid
        assert!(store.load(&Guid::new([2; 16])).unwrap().is_none());
    }

    #[test]
    fn delegate_store_by_name() {
        let owner = SoftwareSigner::generate_p256().unwrap();

        let store = MemoryDelegateStore::new();

        let chain = crate::delegate::tests::generate_chain("", "", "DNS:srv.example.com").chain;

        store
            .store(
                "onboarding".to_string(),
                DelegateEntry {
                    leaf_key: Zeroizing::new(owner.pkcs8().to_vec()),
                    chain: chain.clone(),
                },
            )
            .unwrap();

        let entry = store.load("onboarding").unwrap().unwrap();
        assert_eq!(entry.chain, chain);
        assert_eq!(entry.leaf_key.as_slice(), owner.pkcs8());

        assert!(store.load("unknown").unwrap().is_none());
    }

    #[test]
    fn session_store_take_is_single_use() {
        let store = MemorySessionStore::new();

        let token = store.create(41u32).unwrap();

        let state = store.take(&token).unwrap();
        assert_eq!(state, 41);

        // The token was consumed
        let err = store.take(&token).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::Invalid);

        // Writing back revives it
        store.store(&token, 42).unwrap();
        assert_eq!(store.take(&token).unwrap(), 42);
    }

    #[test]
    fn session_tokens_are_unique() {
        let store = MemorySessionStore::new();

        let first = store.create(1u8).unwrap();
        let second = store.create(2u8).unwrap();

        assert_ne!(first, second);
    }
}
