//! # State Store Adapter
//!
//! Implements the VM's outbound ports against a [`StateStore`]. The adapter
//! borrows the store for one execution, so every write lands in whatever
//! transaction the manager has open.

use crate::errors::VmError;
use crate::ports::{BlockHashes, StateAccess};
use basalt_primitives::{Address, Word256};
use basalt_state::{derive_block_hash, StateStore};
use tracing::debug;

/// How many blocks below the current one BLOCKHASH can see.
const BLOCKHASH_WINDOW: u64 = 256;

/// Port implementation over a borrowed state store.
pub struct StoreHost<'a> {
    store: &'a mut StateStore,
    current_block: u64,
}

impl<'a> StoreHost<'a> {
    /// Wraps a store for one execution at `current_block`.
    pub fn new(store: &'a mut StateStore, current_block: u64) -> Self {
        Self {
            store,
            current_block,
        }
    }
}

impl StateAccess for StoreHost<'_> {
    fn storage_get(&mut self, contract: &Address, slot: &Word256) -> Result<Word256, VmError> {
        Ok(self.store.get_storage(contract, slot)?)
    }

    fn storage_set(
        &mut self,
        contract: &Address,
        slot: &Word256,
        value: Word256,
    ) -> Result<(), VmError> {
        Ok(self.store.set_storage(contract, slot, value)?)
    }

    fn self_destruct(
        &mut self,
        contract: &Address,
        beneficiary: &Address,
    ) -> Result<(), VmError> {
        let balance = self.store.get_balance(contract)?;
        if !balance.is_zero() {
            let dest = self.store.get_balance(beneficiary)?;
            self.store
                .set_balance(beneficiary, dest.wrapping_add(balance))?;
            self.store.set_balance(contract, Word256::ZERO)?;
        }
        if let Some(mut state) = self.store.get_contract(contract)? {
            state.deployed = false;
            self.store.set_contract(contract, &state)?;
        }
        debug!(%contract, %beneficiary, "contract self-destructed");
        Ok(())
    }
}

impl BlockHashes for StoreHost<'_> {
    fn block_hash(&mut self, number: u64) -> Option<[u8; 32]> {
        if number >= self.current_block
            || number < self.current_block.saturating_sub(BLOCKHASH_WINDOW)
        {
            return None;
        }
        Some(derive_block_hash(number))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_store() -> (StateStore, PathBuf) {
        let dir = std::env::temp_dir()
            .join("basalt-vm-adapter-tests")
            .join(uuid::Uuid::new_v4().to_string());
        (StateStore::open(&dir).unwrap(), dir)
    }

    fn addr(byte: u8) -> Address {
        Address::new([byte; 20])
    }

    #[test]
    fn test_storage_round_trip_through_port() {
        let (mut store, dir) = temp_store();
        let contract = addr(1);
        let slot = Word256::from_u64(3);
        {
            let mut host = StoreHost::new(&mut store, 1);
            assert_eq!(host.storage_get(&contract, &slot).unwrap(), Word256::ZERO);
            host.storage_set(&contract, &slot, Word256::from_u64(9)).unwrap();
            assert_eq!(
                host.storage_get(&contract, &slot).unwrap(),
                Word256::from_u64(9)
            );
        }
        drop(store);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_self_destruct_transfers_and_undeploys() {
        let (mut store, dir) = temp_store();
        let contract = addr(2);
        let beneficiary = addr(3);

        store
            .deploy_contract(&contract, vec![0x00], &addr(9), 0)
            .unwrap();
        store.set_balance(&contract, Word256::from_u64(70)).unwrap();
        store.set_balance(&beneficiary, Word256::from_u64(5)).unwrap();

        {
            let mut host = StoreHost::new(&mut store, 1);
            host.self_destruct(&contract, &beneficiary).unwrap();
        }

        assert_eq!(store.get_balance(&contract).unwrap(), Word256::ZERO);
        assert_eq!(
            store.get_balance(&beneficiary).unwrap(),
            Word256::from_u64(75)
        );
        assert!(!store.contract_exists(&contract).unwrap());
        // Code survives for replay.
        assert_eq!(store.get_contract(&contract).unwrap().unwrap().code, vec![0x00]);
        drop(store);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_block_hash_window() {
        let (mut store, dir) = temp_store();
        let mut host = StoreHost::new(&mut store, 300);

        assert!(host.block_hash(299).is_some());
        assert!(host.block_hash(44).is_some()); // 300 - 256
        assert!(host.block_hash(43).is_none()); // too old
        assert!(host.block_hash(300).is_none()); // current block
        assert!(host.block_hash(400).is_none()); // future

        // Same query, same hash.
        assert_eq!(host.block_hash(100), host.block_hash(100));
        drop(host);
        drop(store);
        let _ = std::fs::remove_dir_all(dir);
    }
}
