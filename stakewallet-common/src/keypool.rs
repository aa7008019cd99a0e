//! Pre-generated key pool
//!
//! Keys are handed out oldest first. A reserved key stays in the durable
//! pool until it is kept, so a crash between reservation and commit does
//! not lose it; a returned key goes back to the in-memory set.
//!
//! [`ReserveKey`] wraps one reservation and returns the key when dropped
//! unless [`ReserveKey::keep_key`] was called.

use bitcoin::PublicKey;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{WalletError, WalletResult};
use crate::interfaces::{HdChainState, KeyPoolEntry, KeyStore, PersistentStore};

pub struct KeyPool {
    target_size: usize,
    entries: Mutex<BTreeMap<u64, KeyPoolEntry>>,
    hd_chain: Mutex<HdChainState>,
    keys: Arc<dyn KeyStore>,
    store: Arc<dyn PersistentStore>,
}

impl KeyPool {
    pub fn new(
        keys: Arc<dyn KeyStore>,
        store: Arc<dyn PersistentStore>,
        target_size: usize,
    ) -> Self {
        Self {
            target_size,
            entries: Mutex::new(BTreeMap::new()),
            hd_chain: Mutex::new(HdChainState::default()),
            keys,
            store,
        }
    }

    /// Keys currently available for reservation
    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn hd_chain_state(&self) -> HdChainState {
        *self.hd_chain.lock()
    }

    /// Derive a key and advance the persisted chain counter
    fn generate(&self) -> WalletResult<Option<PublicKey>> {
        let Some(pubkey) = self.keys.generate_key() else {
            return Ok(None);
        };
        let mut hd_chain = self.hd_chain.lock();
        hd_chain.external_counter += 1;
        self.store.write_hd_chain_state(&hd_chain)?;
        Ok(Some(pubkey))
    }

    /// Erase every pool entry and write `target_size` fresh keys at indices 1..=n.
    ///
    /// Returns false when the key store is locked and no keys were written.
    pub fn new_pool(&self) -> WalletResult<bool> {
        let mut entries = self.entries.lock();
        for index in entries.keys() {
            self.store.erase_pool_entry(*index)?;
        }
        entries.clear();

        for i in 0..self.target_size {
            let index = i as u64 + 1;
            let Some(pubkey) = self.generate()? else {
                log::warn!("Key store locked, new key pool stopped at {} keys", i);
                return Ok(i > 0);
            };
            let entry = KeyPoolEntry {
                pubkey,
                created: Utc::now().timestamp(),
            };
            self.store.write_key_pool_entry(index, &entry)?;
            entries.insert(index, entry);
        }
        log::info!("Wrote {} new keys to the key pool", self.target_size);
        Ok(true)
    }

    /// Fill the pool up to `size` (or the configured size) plus one.
    ///
    /// Returns the number of keys added; a locked key store adds none.
    pub fn top_up(&self, size: Option<usize>) -> WalletResult<usize> {
        let target = size.filter(|s| *s > 0).unwrap_or(self.target_size);
        let mut entries = self.entries.lock();
        let mut added = 0;

        while entries.len() < target + 1 {
            let end = entries.keys().next_back().map_or(1, |last| last + 1);
            let Some(pubkey) = self.generate()? else {
                break;
            };
            let entry = KeyPoolEntry {
                pubkey,
                created: Utc::now().timestamp(),
            };
            self.store.write_key_pool_entry(end, &entry)?;
            entries.insert(end, entry);
            added += 1;
            log::trace!("Key pool added key {}, size={}", end, entries.len());
        }
        Ok(added)
    }

    /// Take the oldest key out of the in-memory pool
    ///
    /// # Errors
    /// * `WalletError::KeyPoolExhausted` - the pool is empty and cannot be refilled
    /// * `WalletError::UnknownPoolKey` - the oldest entry names a key the store lacks
    pub fn reserve(&self) -> WalletResult<(u64, KeyPoolEntry)> {
        self.top_up(None)?;

        let mut entries = self.entries.lock();
        let (index, entry) = entries.pop_first().ok_or(WalletError::KeyPoolExhausted)?;
        if !self.keys.have_key(&entry.pubkey.pubkey_hash()) {
            return Err(WalletError::UnknownPoolKey(index));
        }
        log::debug!("Key pool reserve {}", index);
        Ok((index, entry))
    }

    /// Remove a reserved key from the durable pool
    pub fn keep(&self, index: u64) -> WalletResult<()> {
        self.store.erase_pool_entry(index)?;
        log::debug!("Key pool keep {}", index);
        Ok(())
    }

    /// Put a reserved key back
    pub fn return_key(&self, index: u64, entry: KeyPoolEntry) {
        self.entries.lock().insert(index, entry);
        log::debug!("Key pool return {}", index);
    }

    /// Take a key for permanent use, deriving one directly if the pool is empty
    pub fn get_key_from_pool(&self) -> WalletResult<PublicKey> {
        match self.reserve() {
            Ok((index, entry)) => {
                self.keep(index)?;
                Ok(entry.pubkey)
            }
            Err(WalletError::KeyPoolExhausted) => {
                self.generate()?.ok_or(WalletError::KeyPoolExhausted)
            }
            Err(e) => Err(e),
        }
    }

    /// Start a reservation
    pub fn reserve_key(self: &Arc<Self>) -> ReserveKey {
        ReserveKey {
            pool: Arc::clone(self),
            reserved: None,
        }
    }
}

/// A key held for a transaction under construction
pub struct ReserveKey {
    pool: Arc<KeyPool>,
    reserved: Option<(u64, KeyPoolEntry)>,
}

impl ReserveKey {
    /// Reserve a key on first use, then keep returning the same one
    pub fn get_reserved_key(&mut self) -> WalletResult<PublicKey> {
        if let Some((_, entry)) = &self.reserved {
            return Ok(entry.pubkey);
        }
        let (index, entry) = self.pool.reserve()?;
        let pubkey = entry.pubkey;
        self.reserved = Some((index, entry));
        Ok(pubkey)
    }

    pub fn is_reserved(&self) -> bool {
        self.reserved.is_some()
    }

    /// Consume the key permanently
    pub fn keep_key(&mut self) -> WalletResult<()> {
        if let Some((index, _)) = self.reserved.take() {
            self.pool.keep(index)?;
        }
        Ok(())
    }

    /// Hand the key back to the pool
    pub fn return_key(&mut self) {
        if let Some((index, entry)) = self.reserved.take() {
            self.pool.return_key(index, entry);
        }
    }
}

impl Drop for ReserveKey {
    fn drop(&mut self) {
        self.return_key();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MemoryStore, MockKeyStore};

    fn pool(size: usize) -> (Arc<KeyPool>, Arc<MockKeyStore>, Arc<MemoryStore>) {
        let keys = Arc::new(MockKeyStore::new());
        let store = Arc::new(MemoryStore::new());
        let pool = Arc::new(KeyPool::new(keys.clone(), store.clone(), size));
        (pool, keys, store)
    }

    #[test]
    fn test_new_pool_writes_sequential_indices() {
        let (pool, _, store) = pool(3);
        pool.top_up(None).unwrap();
        assert!(pool.new_pool().unwrap());
        assert_eq!(store.pool_indices(), vec![1, 2, 3]);
        assert_eq!(pool.hd_chain_state().external_counter, 7);
        assert_eq!(store.hd_chain(), pool.hd_chain_state());
    }

    #[test]
    fn test_top_up_keeps_one_spare() {
        let (pool, _, store) = pool(2);
        assert_eq!(pool.top_up(None).unwrap(), 3);
        assert_eq!(pool.top_up(None).unwrap(), 0);
        assert_eq!(store.pool_indices(), vec![1, 2, 3]);
    }

    #[test]
    fn test_reserve_oldest_then_keep() {
        let (pool, _, store) = pool(2);
        let (index, _) = pool.reserve().unwrap();
        assert_eq!(index, 1);
        assert_eq!(pool.size(), 2);
        assert_eq!(store.pool_indices(), vec![1, 2, 3]);

        pool.keep(index).unwrap();
        assert_eq!(store.pool_indices(), vec![2, 3]);
    }

    #[test]
    fn test_reserve_key_guard_returns_on_drop() {
        let (pool, _, _) = pool(1);
        {
            let mut reserve = pool.reserve_key();
            let first = reserve.get_reserved_key().unwrap();
            assert_eq!(reserve.get_reserved_key().unwrap(), first);
            assert_eq!(pool.size(), 1);
        }
        assert_eq!(pool.size(), 2);

        let mut kept = pool.reserve_key();
        kept.get_reserved_key().unwrap();
        kept.keep_key().unwrap();
        assert!(!kept.is_reserved());
        drop(kept);
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn test_locked_store_exhausts_pool() {
        let (pool, keys, _) = pool(1);
        keys.set_locked(true);
        assert!(matches!(pool.reserve(), Err(WalletError::KeyPoolExhausted)));
        assert!(matches!(
            pool.get_key_from_pool(),
            Err(WalletError::KeyPoolExhausted)
        ));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let (pool, keys, _) = pool(1);
        pool.top_up(None).unwrap();
        let oldest = pool.entries.lock().values().next().unwrap().pubkey;
        keys.forget_key(&oldest.pubkey_hash());
        assert!(matches!(pool.reserve(), Err(WalletError::UnknownPoolKey(1))));
    }

    #[test]
    fn test_write_failure_surfaces() {
        let (pool, _, store) = pool(1);
        store.set_fail_writes(true);
        assert!(matches!(
            pool.top_up(None),
            Err(WalletError::Persistence(_))
        ));
    }
}
