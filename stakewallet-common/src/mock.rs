//! In-memory collaborators for testing
//!
//! # WARNING: FOR TESTING PURPOSES ONLY
//!
//! These fakes keep everything in memory, sign with placeholder script
//! bytes and accept whatever the test tells them to accept. They exist so
//! the wallet engine can be exercised without a node, a key store or a
//! database.

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::{
    Address, BlockHash, Network, OutPoint, PubkeyHash, PublicKey, Script, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Txid, Witness,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::StorageError;
use crate::interfaces::{
    ChainIndex, HdChainState, KeyPoolEntry, KeyStore, PersistentStore, Relay, ScannedTransaction,
    ScriptEngine, SpentPosition, TxIndex,
};
use crate::types::{BlockRef, IsMine};
use crate::wallet_tx::WalletTransaction;

/// Length of the placeholder signature script the mock signer writes
pub const FAKE_SIGNATURE_LEN: usize = 107;

/// Build a version-1 transaction spending `inputs` and paying `outputs`
pub fn test_tx(inputs: &[OutPoint], outputs: &[(u64, ScriptBuf)]) -> Transaction {
    Transaction {
        version: 1,
        lock_time: LockTime::ZERO,
        input: inputs
            .iter()
            .map(|previous_output| TxIn {
                previous_output: *previous_output,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs
            .iter()
            .map(|(value, script)| TxOut {
                value: *value,
                script_pubkey: script.clone(),
            })
            .collect(),
    }
}

/// A transaction funded from a foreign outpoint derived from `nonce`, so
/// every nonce yields a distinct txid
pub fn funding_tx(nonce: u32, outputs: &[(u64, ScriptBuf)]) -> Transaction {
    let mut bytes = [0xab; 32];
    bytes[..4].copy_from_slice(&nonce.to_le_bytes());
    let foreign = OutPoint::new(Txid::from_byte_array(bytes), nonce);
    test_tx(&[foreign], outputs)
}

/// A block hash derived from `n`
pub fn test_block_hash(n: u32) -> BlockHash {
    let mut bytes = [0x11; 32];
    bytes[..4].copy_from_slice(&n.to_le_bytes());
    BlockHash::from_byte_array(bytes)
}

/// Pay-to-pubkey-hash script for a key derived from `n`
pub fn test_script(n: u32) -> ScriptBuf {
    ScriptBuf::new_p2pkh(&test_pubkey(n).pubkey_hash())
}

/// Deterministic public key derived from `n`
pub fn test_pubkey(n: u32) -> PublicKey {
    let secp = Secp256k1::new();
    let mut bytes = [0x01; 32];
    bytes[28..].copy_from_slice(&n.to_be_bytes());
    let secret = SecretKey::from_slice(&bytes).expect("valid secret key bytes");
    PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &secret))
}

/// Script ownership oracle backed by a lookup table
#[derive(Default)]
pub struct MockScriptEngine {
    ownership: RwLock<HashMap<ScriptBuf, IsMine>>,
}

impl MockScriptEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure a spendable script
    pub fn with_spendable(self, script: ScriptBuf) -> Self {
        self.set_ownership(script, IsMine::Spendable);
        self
    }

    /// Configure a watch-only script
    pub fn with_watch_only(self, script: ScriptBuf) -> Self {
        self.set_ownership(script, IsMine::WatchOnly);
        self
    }

    pub fn set_ownership(&self, script: ScriptBuf, mine: IsMine) {
        self.ownership.write().insert(script, mine);
    }
}

impl ScriptEngine for MockScriptEngine {
    fn classify_ownership(&self, script: &Script) -> IsMine {
        self.ownership
            .read()
            .get(script)
            .copied()
            .unwrap_or(IsMine::No)
    }

    fn extract_destination(&self, script: &Script) -> Option<Address> {
        Address::from_script(script, Network::Bitcoin).ok()
    }
}

/// Key store that derives deterministic keys and writes placeholder signatures
pub struct MockKeyStore {
    next_key: AtomicU64,
    keys: RwLock<HashSet<PubkeyHash>>,
    locked: AtomicBool,
    refuse: RwLock<HashSet<ScriptBuf>>,
    scripts: Option<Arc<MockScriptEngine>>,
}

impl Default for MockKeyStore {
    fn default() -> Self {
        Self {
            next_key: AtomicU64::new(1000),
            keys: RwLock::new(HashSet::new()),
            locked: AtomicBool::new(false),
            refuse: RwLock::new(HashSet::new()),
            scripts: None,
        }
    }
}

impl MockKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every generated key's P2PKH script as spendable with `scripts`
    pub fn with_script_engine(mut self, scripts: Arc<MockScriptEngine>) -> Self {
        self.scripts = Some(scripts);
        self
    }

    /// Make `sign` fail for inputs locked by `script`
    pub fn refuse_to_sign(&self, script: ScriptBuf) {
        self.refuse.write().insert(script);
    }

    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    pub fn forget_key(&self, key_id: &PubkeyHash) {
        self.keys.write().remove(key_id);
    }
}

impl KeyStore for MockKeyStore {
    fn generate_key(&self) -> Option<PublicKey> {
        if self.locked.load(Ordering::SeqCst) {
            return None;
        }
        let n = self.next_key.fetch_add(1, Ordering::SeqCst) as u32;
        let key = test_pubkey(n);
        self.keys.write().insert(key.pubkey_hash());
        if let Some(scripts) = &self.scripts {
            scripts.set_ownership(ScriptBuf::new_p2pkh(&key.pubkey_hash()), IsMine::Spendable);
        }
        Some(key)
    }

    fn sign(&self, tx: &mut Transaction, input_index: usize, prev_script: &Script) -> bool {
        if self.refuse.read().contains(prev_script) {
            return false;
        }
        match tx.input.get_mut(input_index) {
            Some(txin) => {
                txin.script_sig = ScriptBuf::from_bytes(vec![0x30; FAKE_SIGNATURE_LEN]);
                true
            }
            None => false,
        }
    }

    fn have_key(&self, key_id: &PubkeyHash) -> bool {
        self.keys.read().contains(key_id)
    }
}

#[derive(Default)]
struct ChainState {
    best_height: u32,
    blocks: HashMap<BlockHash, u32>,
    adjusted_time: i64,
    time_best_received: i64,
    tx_index: HashMap<Txid, TxIndex>,
    transactions: HashMap<Txid, Transaction>,
    scanned: Vec<ScannedTransaction>,
    invalid: HashSet<Txid>,
}

/// Chain index held in memory
#[derive(Default)]
pub struct MemoryChainIndex {
    state: RwLock<ChainState>,
}

impl MemoryChainIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_best_height(self, height: u32) -> Self {
        self.set_best_height(height);
        self
    }

    pub fn with_time(self, time: i64) -> Self {
        self.set_time(time);
        self
    }

    pub fn set_best_height(&self, height: u32) {
        self.state.write().best_height = height;
    }

    /// Set both the adjusted time and the time the best block arrived
    pub fn set_time(&self, time: i64) {
        let mut state = self.state.write();
        state.adjusted_time = time;
        state.time_best_received = time;
    }

    pub fn set_adjusted_time(&self, time: i64) {
        self.state.write().adjusted_time = time;
    }

    pub fn set_time_best_received(&self, time: i64) {
        self.state.write().time_best_received = time;
    }

    /// Put a block on the main chain
    pub fn add_block(&self, hash: BlockHash, height: u32) {
        self.state.write().blocks.insert(hash, height);
    }

    /// Take a block off the main chain
    pub fn disconnect_block(&self, hash: &BlockHash) {
        self.state.write().blocks.remove(hash);
    }

    /// Record `tx` as confirmed in a new main-chain block at `height`
    pub fn confirm(&self, tx: &Transaction, height: u32, time: i64) -> BlockRef {
        let block = BlockRef::new(test_block_hash(height), height);
        let mut state = self.state.write();
        state.blocks.insert(block.hash, height);
        let txid = tx.txid();
        state.transactions.insert(txid, tx.clone());
        state.tx_index.insert(
            txid,
            TxIndex {
                spent: vec![None; tx.output.len()],
            },
        );
        for txin in &tx.input {
            if let Some(index) = state.tx_index.get_mut(&txin.previous_output.txid) {
                if let Some(slot) = index.spent.get_mut(txin.previous_output.vout as usize) {
                    *slot = Some(SpentPosition { txid, height });
                }
            }
        }
        state.scanned.push(ScannedTransaction {
            tx: tx.clone(),
            time,
            block,
        });
        block
    }

    pub fn set_tx_index(&self, txid: Txid, index: TxIndex) {
        self.state.write().tx_index.insert(txid, index);
    }

    /// Overwrite one authoritative marker
    pub fn set_index_spent(&self, outpoint: &OutPoint, spent_by: Option<SpentPosition>) {
        let mut state = self.state.write();
        if let Some(index) = state.tx_index.get_mut(&outpoint.txid) {
            if let Some(slot) = index.spent.get_mut(outpoint.vout as usize) {
                *slot = spent_by;
            }
        }
    }

    /// Make `revalidate` fail for `txid`
    pub fn set_invalid(&self, txid: Txid) {
        self.state.write().invalid.insert(txid);
    }
}

impl ChainIndex for MemoryChainIndex {
    fn best_height(&self) -> u32 {
        self.state.read().best_height
    }

    fn main_chain_height(&self, block: &BlockHash) -> Option<u32> {
        self.state.read().blocks.get(block).copied()
    }

    fn adjusted_time(&self) -> i64 {
        self.state.read().adjusted_time
    }

    fn time_best_received(&self) -> i64 {
        self.state.read().time_best_received
    }

    fn read_tx_index(&self, txid: &Txid) -> Option<TxIndex> {
        self.state.read().tx_index.get(txid).cloned()
    }

    fn read_transaction(&self, txid: &Txid) -> Option<Transaction> {
        self.state.read().transactions.get(txid).cloned()
    }

    fn contains_tx(&self, txid: &Txid) -> bool {
        self.state.read().tx_index.contains_key(txid)
    }

    fn revalidate(&self, tx: &Transaction) -> bool {
        !self.state.read().invalid.contains(&tx.txid())
    }

    fn transactions_from_height(&self, height: u32) -> Vec<ScannedTransaction> {
        let state = self.state.read();
        state
            .scanned
            .iter()
            .filter(|s| s.block.height >= height && state.blocks.contains_key(&s.block.hash))
            .cloned()
            .collect()
    }
}

/// Durable store held in memory, with switchable write failures
#[derive(Default)]
pub struct MemoryStore {
    transactions: Mutex<HashMap<Txid, WalletTransaction>>,
    pool: Mutex<BTreeMap<u64, KeyPoolEntry>>,
    hd_chain: Mutex<HdChainState>,
    fail_writes: AtomicBool,
    fail_on: Mutex<HashSet<Txid>>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make writes of one transaction fail
    pub fn fail_writes_for(&self, txid: Txid) {
        self.fail_on.lock().insert(txid);
    }

    pub fn transaction(&self, txid: &Txid) -> Option<WalletTransaction> {
        self.transactions.lock().get(txid).cloned()
    }

    pub fn pool_indices(&self) -> Vec<u64> {
        self.pool.lock().keys().copied().collect()
    }

    pub fn hd_chain(&self) -> HdChainState {
        *self.hd_chain.lock()
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self, key: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::write_failed(key, "store configured to fail"));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl PersistentStore for MemoryStore {
    fn write_transaction(&self, wtx: &WalletTransaction) -> Result<(), StorageError> {
        if self.fail_on.lock().contains(&wtx.txid()) {
            return Err(StorageError::write_failed(wtx.txid().to_string(), "injected failure"));
        }
        self.check("tx")?;
        self.transactions.lock().insert(wtx.txid(), wtx.clone());
        Ok(())
    }

    fn erase_transaction(&self, txid: &Txid) -> Result<(), StorageError> {
        self.check("tx")?;
        self.transactions.lock().remove(txid);
        Ok(())
    }

    fn write_key_pool_entry(&self, index: u64, entry: &KeyPoolEntry) -> Result<(), StorageError> {
        self.check("pool")?;
        self.pool.lock().insert(index, entry.clone());
        Ok(())
    }

    fn erase_pool_entry(&self, index: u64) -> Result<(), StorageError> {
        self.check("pool")?;
        self.pool.lock().remove(&index);
        Ok(())
    }

    fn write_hd_chain_state(&self, state: &HdChainState) -> Result<(), StorageError> {
        self.check("hdchain")?;
        *self.hd_chain.lock() = *state;
        Ok(())
    }
}

/// Memory pool that records what it was given
#[derive(Default)]
pub struct MockRelay {
    reject: AtomicBool,
    pool: Mutex<Vec<Txid>>,
    relayed: Mutex<Vec<Txid>>,
    removed: Mutex<Vec<Txid>>,
}

impl MockRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn accepted(&self) -> Vec<Txid> {
        self.pool.lock().clone()
    }

    pub fn relayed(&self) -> Vec<Txid> {
        self.relayed.lock().clone()
    }

    pub fn removed(&self) -> Vec<Txid> {
        self.removed.lock().clone()
    }
}

impl Relay for MockRelay {
    fn accept_to_pool(&self, tx: &Transaction) -> bool {
        if self.reject.load(Ordering::SeqCst) {
            return false;
        }
        self.pool.lock().push(tx.txid());
        true
    }

    fn relay(&self, tx: &Transaction) {
        self.relayed.lock().push(tx.txid());
    }

    fn remove(&self, txid: &Txid) {
        self.pool.lock().retain(|t| t != txid);
        self.removed.lock().push(*txid);
    }
}
