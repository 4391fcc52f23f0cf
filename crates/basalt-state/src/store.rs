//! # State Store
//!
//! Transactional key-value store over the `A`/`C`/`S` namespaces, persisted
//! as a checksummed snapshot file in the store's directory.
//!
//! The in-memory base is an ordered map, so traversal order (and therefore
//! the state digest) is a pure function of content. Writes inside a
//! transaction land in an overlay that reads observe; `commit` folds the
//! overlay into the base and rewrites the snapshot atomically (temp file +
//! rename), `rollback` drops it.

use crate::errors::StoreError;
use crate::record::{
    account_key, contract_key, decode_account, decode_contract, decode_storage_slot,
    decode_storage_value, encode_account, encode_contract, encode_storage_value, storage_key,
    storage_prefix, AccountState, ContractState, NS_ACCOUNT, NS_CONTRACT, NS_STORAGE,
};
use basalt_primitives::{sha256, Address, Word256};
use fs2::FileExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Snapshot container magic.
const SNAPSHOT_MAGIC: &[u8; 8] = b"BSLTSTAT";
/// Snapshot container version.
const SNAPSHOT_VERSION: u32 = 1;
/// Snapshot file name inside the store directory.
const SNAPSHOT_FILE: &str = "state.db";
/// Lock file name inside the store directory.
const LOCK_FILE: &str = "state.lock";

/// Point-in-time statistics snapshot.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct StoreStats {
    /// Materialized account records.
    pub accounts: u64,
    /// Contract metadata records.
    pub contracts: u64,
    /// Storage-slot records.
    pub storage_entries: u64,
    /// Record reads served since open.
    pub reads: u64,
    /// Record writes accepted since open.
    pub writes: u64,
    /// Committed transactions since open.
    pub commits: u64,
    /// Rolled-back transactions since open.
    pub rollbacks: u64,
}

/// Deterministic block-hash derivation served to the VM's BLOCKHASH opcode.
///
/// Lives in the state layer so the VM carries no synthetic hashing of its
/// own; the derivation is part of the replay contract.
#[must_use]
pub fn derive_block_hash(number: u64) -> [u8; 32] {
    let mut input = Vec::with_capacity(17);
    input.extend_from_slice(b"blockhash");
    input.extend_from_slice(&number.to_be_bytes());
    sha256(&input)
}

/// Persistent, transactional world-state store.
pub struct StateStore {
    dir: PathBuf,
    base: BTreeMap<Vec<u8>, Vec<u8>>,
    overlay: Option<BTreeMap<Vec<u8>, Vec<u8>>>,
    _lock: File,
    reads: u64,
    writes: u64,
    commits: u64,
    rollbacks: u64,
}

impl StateStore {
    /// Opens (or creates) a store rooted at `dir`.
    ///
    /// Takes an exclusive lock on the directory for the store's lifetime and
    /// loads the snapshot if one exists.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory cannot be prepared or locked, `Corrupt`
    /// if an existing snapshot fails verification.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        FileExt::try_lock_exclusive(&lock)?;

        let base = load_snapshot(&dir.join(SNAPSHOT_FILE))?;
        debug!(dir = %dir.display(), records = base.len(), "state store opened");

        Ok(Self {
            dir,
            base,
            overlay: None,
            _lock: lock,
            reads: 0,
            writes: 0,
            commits: 0,
            rollbacks: 0,
        })
    }

    /// The directory this store persists into.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // =========================================================================
    // RAW ACCESS
    // =========================================================================

    fn get_raw(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        self.reads += 1;
        if let Some(overlay) = &self.overlay {
            if let Some(value) = overlay.get(key) {
                return Some(value.clone());
            }
        }
        self.base.get(key).cloned()
    }

    fn put_raw(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError> {
        self.writes += 1;
        match &mut self.overlay {
            Some(overlay) => {
                overlay.insert(key, value);
                Ok(())
            }
            None => {
                // Outside a transaction writes apply and persist immediately.
                self.base.insert(key, value);
                self.flush()
            }
        }
    }

    fn flush(&self) -> Result<(), StoreError> {
        let path = self.dir.join(SNAPSHOT_FILE);
        let tmp = self.dir.join(format!("{SNAPSHOT_FILE}.tmp"));
        write_snapshot(&tmp, &self.base)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    // =========================================================================
    // ACCOUNTS
    // =========================================================================

    /// Reads an account, defaulting to the zero-valued state.
    ///
    /// # Errors
    ///
    /// Returns `Corrupt` if a persisted record fails to decode.
    pub fn get_account(&mut self, address: &Address) -> Result<AccountState, StoreError> {
        match self.get_raw(&account_key(address)) {
            Some(data) => decode_account(&data),
            None => Ok(AccountState::default()),
        }
    }

    /// Writes an account record.
    ///
    /// # Errors
    ///
    /// Returns `Io` if persistence fails.
    pub fn set_account(
        &mut self,
        address: &Address,
        state: &AccountState,
    ) -> Result<(), StoreError> {
        self.put_raw(account_key(address), encode_account(state))
    }

    /// Reads a balance (zero for unknown addresses).
    ///
    /// # Errors
    ///
    /// Returns `Corrupt` if a persisted record fails to decode.
    pub fn get_balance(&mut self, address: &Address) -> Result<Word256, StoreError> {
        Ok(self.get_account(address)?.balance)
    }

    /// Writes a balance, materializing the account if needed. Keeps the
    /// contract record's mirrored balance in sync.
    ///
    /// # Errors
    ///
    /// Returns `Io` if persistence fails, `Corrupt` on record decode failure.
    pub fn set_balance(&mut self, address: &Address, balance: Word256) -> Result<(), StoreError> {
        let mut account = self.get_account(address)?;
        account.balance = balance;
        self.set_account(address, &account)?;

        if let Some(mut contract) = self.get_contract(address)? {
            contract.balance = balance;
            self.set_contract(address, &contract)?;
        }
        Ok(())
    }

    /// Reads a nonce (zero for unknown addresses).
    ///
    /// # Errors
    ///
    /// Returns `Corrupt` if a persisted record fails to decode.
    pub fn get_nonce(&mut self, address: &Address) -> Result<u64, StoreError> {
        Ok(self.get_account(address)?.nonce)
    }

    /// Writes a nonce.
    ///
    /// # Errors
    ///
    /// Returns `Io` if persistence fails, `Corrupt` on record decode failure.
    pub fn set_nonce(&mut self, address: &Address, nonce: u64) -> Result<(), StoreError> {
        let mut account = self.get_account(address)?;
        account.nonce = nonce;
        self.set_account(address, &account)
    }

    /// Increments a nonce and returns the new value.
    ///
    /// # Errors
    ///
    /// Returns `Io` if persistence fails, `Corrupt` on record decode failure.
    pub fn increment_nonce(&mut self, address: &Address) -> Result<u64, StoreError> {
        let mut account = self.get_account(address)?;
        account.nonce += 1;
        let nonce = account.nonce;
        self.set_account(address, &account)?;
        Ok(nonce)
    }

    // =========================================================================
    // CONTRACTS
    // =========================================================================

    /// Reads a contract record, if one exists.
    ///
    /// # Errors
    ///
    /// Returns `Corrupt` if a persisted record fails to decode.
    pub fn get_contract(&mut self, address: &Address) -> Result<Option<ContractState>, StoreError> {
        match self.get_raw(&contract_key(address)) {
            Some(data) => Ok(Some(decode_contract(&data)?)),
            None => Ok(None),
        }
    }

    /// Writes a contract record.
    ///
    /// # Errors
    ///
    /// Returns `Io` if persistence fails.
    pub fn set_contract(
        &mut self,
        address: &Address,
        state: &ContractState,
    ) -> Result<(), StoreError> {
        self.put_raw(contract_key(address), encode_contract(state))
    }

    /// True if a deployed (not self-destructed) contract lives at `address`.
    ///
    /// # Errors
    ///
    /// Returns `Corrupt` if a persisted record fails to decode.
    pub fn contract_exists(&mut self, address: &Address) -> Result<bool, StoreError> {
        Ok(self.get_contract(address)?.is_some_and(|c| c.deployed))
    }

    /// Deploys a contract: persists its code and marks the account as a
    /// contract account. Balance and nonce mirror the account record.
    ///
    /// # Errors
    ///
    /// Returns `Io` if persistence fails, `Corrupt` on record decode failure.
    pub fn deploy_contract(
        &mut self,
        address: &Address,
        code: Vec<u8>,
        deployer: &Address,
        deployment_block: u64,
    ) -> Result<(), StoreError> {
        let mut account = self.get_account(address)?;
        account.is_contract = true;
        self.set_account(address, &account)?;

        let contract = ContractState {
            code,
            balance: account.balance,
            nonce: account.nonce,
            deployed: true,
            deployment_block,
            deployer: *deployer,
        };
        debug!(%address, %deployer, block = deployment_block, "contract deployed");
        self.set_contract(address, &contract)
    }

    // =========================================================================
    // STORAGE
    // =========================================================================

    /// Reads a storage slot (zero when unset).
    ///
    /// # Errors
    ///
    /// Returns `Corrupt` if a persisted record fails to decode.
    pub fn get_storage(&mut self, address: &Address, slot: &Word256) -> Result<Word256, StoreError> {
        match self.get_raw(&storage_key(address, slot)) {
            Some(data) => decode_storage_value(&data),
            None => Ok(Word256::ZERO),
        }
    }

    /// Writes a storage slot.
    ///
    /// # Errors
    ///
    /// Returns `Io` if persistence fails.
    pub fn set_storage(
        &mut self,
        address: &Address,
        slot: &Word256,
        value: Word256,
    ) -> Result<(), StoreError> {
        self.put_raw(storage_key(address, slot), encode_storage_value(&value))
    }

    /// Collects a contract's storage as a sparse map, ascending by slot.
    ///
    /// # Errors
    ///
    /// Returns `Corrupt` if a persisted record fails to decode.
    pub fn contract_storage(
        &mut self,
        address: &Address,
    ) -> Result<BTreeMap<Word256, Word256>, StoreError> {
        let prefix = storage_prefix(address);
        let mut out = BTreeMap::new();

        let base_entries: Vec<(Vec<u8>, Vec<u8>)> = self
            .base
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in base_entries {
            out.insert(decode_storage_slot(&key)?, decode_storage_value(&value)?);
        }

        if let Some(overlay) = &self.overlay {
            let overlay_entries: Vec<(Vec<u8>, Vec<u8>)> = overlay
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (key, value) in overlay_entries {
                out.insert(decode_storage_slot(&key)?, decode_storage_value(&value)?);
            }
        }

        self.reads += 1;
        Ok(out)
    }

    // =========================================================================
    // TRANSACTIONS
    // =========================================================================

    /// Opens a transaction. Subsequent writes buffer in the overlay.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyInTransaction` if one is open.
    pub fn begin(&mut self) -> Result<(), StoreError> {
        if self.overlay.is_some() {
            return Err(StoreError::AlreadyInTransaction);
        }
        self.overlay = Some(BTreeMap::new());
        debug!("transaction opened");
        Ok(())
    }

    /// Applies the buffered writes atomically and persists the snapshot.
    ///
    /// # Errors
    ///
    /// Returns `NotInTransaction` without a prior `begin`, `Io` on
    /// persistence failure.
    pub fn commit(&mut self) -> Result<(), StoreError> {
        let overlay = self.overlay.take().ok_or(StoreError::NotInTransaction)?;
        let buffered = overlay.len();
        for (key, value) in overlay {
            self.base.insert(key, value);
        }
        self.flush()?;
        self.commits += 1;
        debug!(records = buffered, "transaction committed");
        Ok(())
    }

    /// Discards the buffered writes.
    ///
    /// # Errors
    ///
    /// Returns `NotInTransaction` without a prior `begin`.
    pub fn rollback(&mut self) -> Result<(), StoreError> {
        let overlay = self.overlay.take().ok_or(StoreError::NotInTransaction)?;
        self.rollbacks += 1;
        if !overlay.is_empty() {
            warn!(discarded = overlay.len(), "transaction rolled back");
        }
        Ok(())
    }

    /// True while a transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.overlay.is_some()
    }

    // =========================================================================
    // DIGEST & STATISTICS
    // =========================================================================

    /// SHA-256 over the ordered traversal of all committed records.
    ///
    /// Each record contributes `key_len:4 BE ‖ key ‖ val_len:4 BE ‖ value`.
    /// Namespace order A < C < S falls out of byte order, so two stores with
    /// the same logical content always produce the same digest.
    #[must_use]
    pub fn state_digest(&self) -> [u8; 32] {
        let mut stream = Vec::new();
        for (key, value) in &self.base {
            stream.extend_from_slice(&(key.len() as u32).to_be_bytes());
            stream.extend_from_slice(key);
            stream.extend_from_slice(&(value.len() as u32).to_be_bytes());
            stream.extend_from_slice(value);
        }
        sha256(&stream)
    }

    /// Current statistics (committed records only).
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            reads: self.reads,
            writes: self.writes,
            commits: self.commits,
            rollbacks: self.rollbacks,
            ..StoreStats::default()
        };
        for key in self.base.keys() {
            match key.first() {
                Some(&NS_ACCOUNT) => stats.accounts += 1,
                Some(&NS_CONTRACT) => stats.contracts += 1,
                Some(&NS_STORAGE) => stats.storage_entries += 1,
                _ => {}
            }
        }
        stats
    }
}

// =============================================================================
// SNAPSHOT I/O
// =============================================================================

fn write_snapshot(path: &Path, base: &BTreeMap<Vec<u8>, Vec<u8>>) -> Result<(), StoreError> {
    let mut body = Vec::new();
    body.extend_from_slice(SNAPSHOT_MAGIC);
    body.extend_from_slice(&SNAPSHOT_VERSION.to_be_bytes());
    body.extend_from_slice(&(base.len() as u32).to_be_bytes());
    for (key, value) in base {
        body.extend_from_slice(&(key.len() as u32).to_be_bytes());
        body.extend_from_slice(key);
        body.extend_from_slice(&(value.len() as u32).to_be_bytes());
        body.extend_from_slice(value);
    }
    let crc = crc32fast::hash(&body);
    body.extend_from_slice(&crc.to_be_bytes());

    let mut file = File::create(path)?;
    file.write_all(&body)?;
    file.sync_all()?;
    Ok(())
}

fn load_snapshot(path: &Path) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, StoreError> {
    let corrupt = |what: &str| StoreError::Corrupt(format!("snapshot: {what}"));

    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => return Err(err.into()),
    };
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;

    if data.len() < 20 {
        return Err(corrupt("truncated header"));
    }
    let (body, crc_bytes) = data.split_at(data.len() - 4);
    let expected = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    if crc32fast::hash(body) != expected {
        return Err(corrupt("checksum mismatch"));
    }
    if &body[..8] != SNAPSHOT_MAGIC {
        return Err(corrupt("bad magic"));
    }
    let version = u32::from_be_bytes([body[8], body[9], body[10], body[11]]);
    if version != SNAPSHOT_VERSION {
        return Err(corrupt("unsupported version"));
    }
    let count = u32::from_be_bytes([body[12], body[13], body[14], body[15]]) as usize;

    let mut base = BTreeMap::new();
    let mut pos = 16;
    for _ in 0..count {
        let key = read_chunk(body, &mut pos).ok_or_else(|| corrupt("truncated key"))?;
        let value = read_chunk(body, &mut pos).ok_or_else(|| corrupt("truncated value"))?;
        base.insert(key, value);
    }
    if pos != body.len() {
        return Err(corrupt("trailing bytes"));
    }
    Ok(base)
}

fn read_chunk(data: &[u8], pos: &mut usize) -> Option<Vec<u8>> {
    if data.len() < *pos + 4 {
        return None;
    }
    let len =
        u32::from_be_bytes([data[*pos], data[*pos + 1], data[*pos + 2], data[*pos + 3]]) as usize;
    *pos += 4;
    if data.len() < *pos + len {
        return None;
    }
    let chunk = data[*pos..*pos + len].to_vec();
    *pos += len;
    Some(chunk)
}

// =============================================================================
// TESTS
// =============================================================================
