//! # Contract Manager
//!
//! Orchestrates deployment and call transactions against the VM and the
//! state store: nonce management, deterministic address derivation, gas
//! prepayment and refund, value transfer, and transactional commit/rollback.
//!
//! Every entry point holds the store mutex from the start of its transaction
//! to commit or rollback. Nothing here is a process-wide singleton: hosts own
//! a [`CoreHandle`] and pass it where it is needed.

use crate::adapter::StoreHost;
use crate::context::{BlockContext, ExecutionContext, ExecutionResult};
use crate::errors::ManagerError;
use crate::vm::{validate_bytecode, VirtualMachine};
use basalt_primitives::{derive_address, Address, Word256};
use basalt_state::{StateStore, StoreError};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Maximum deployable bytecode size in bytes.
pub const MAX_CODE_SIZE: usize = 24_576;

/// A deployment transaction from the transaction layer.
#[derive(Clone, Debug)]
pub struct DeploymentTransaction {
    /// Deploying account.
    pub deployer: Address,
    /// Contract bytecode.
    pub code: Vec<u8>,
    /// Gas budget.
    pub gas_limit: u64,
    /// Gas price.
    pub gas_price: u64,
    /// Value endowed to the new contract.
    pub value: Word256,
}

/// A call transaction from the transaction layer.
#[derive(Clone, Debug)]
pub struct CallTransaction {
    /// Calling account.
    pub caller: Address,
    /// Target contract.
    pub contract: Address,
    /// Call payload.
    pub input_data: Vec<u8>,
    /// Gas budget.
    pub gas_limit: u64,
    /// Gas price.
    pub gas_price: u64,
    /// Value transferred to the contract.
    pub value: Word256,
}

/// Outcome of a successful deployment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeploymentReceipt {
    /// Derived contract address.
    pub contract_address: Address,
    /// Gas charged for the deployment (the full prepaid limit; constructors
    /// are not executed).
    pub gas_used: u64,
}

/// Manager statistics snapshot.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ManagerStats {
    /// Successful deployments.
    pub total_deployments: u64,
    /// Calls that reached the VM.
    pub total_calls: u64,
    /// Gas charged across deployments and calls.
    pub total_gas_used: u64,
}

/// Contract lifecycle manager. Owns the VM, shares the state store.
pub struct ContractManager {
    store: Arc<Mutex<StateStore>>,
    vm: VirtualMachine,
    block: BlockContext,
    total_deployments: u64,
    total_calls: u64,
    total_gas_used: u64,
}

impl ContractManager {
    /// Creates a manager over a shared store.
    #[must_use]
    pub fn new(store: Arc<Mutex<StateStore>>) -> Self {
        Self {
            store,
            vm: VirtualMachine::new(),
            block: BlockContext::default(),
            total_deployments: 0,
            total_calls: 0,
            total_gas_used: 0,
        }
    }

    /// Sets the block context used for subsequent executions.
    pub fn set_block_context(&mut self, block: BlockContext) {
        self.block = block;
    }

    /// The current block context.
    #[must_use]
    pub fn block_context(&self) -> BlockContext {
        self.block
    }

    fn lock_store(&self) -> MutexGuard<'_, StateStore> {
        self.store.lock().expect("state store mutex poisoned")
    }

    // =========================================================================
    // DEPLOYMENT
    // =========================================================================

    /// Deploys a contract.
    ///
    /// Pre-checks run before any state is touched; the nonce increment,
    /// address derivation, gas debit, value transfer, and code persistence
    /// then happen inside one store transaction, so a failed deployment
    /// leaves no trace, not even the nonce bump.
    ///
    /// # Errors
    ///
    /// `InvalidBytecode`, `ContractExists`, `InsufficientBalance`, or a
    /// store failure; in every case the transaction is rolled back.
    pub fn deploy(
        &mut self,
        tx: &DeploymentTransaction,
    ) -> Result<DeploymentReceipt, ManagerError> {
        if tx.code.is_empty() {
            return Err(ManagerError::InvalidBytecode("empty bytecode".to_string()));
        }
        if tx.code.len() > MAX_CODE_SIZE {
            return Err(ManagerError::InvalidBytecode(format!(
                "code is {} bytes, limit is {MAX_CODE_SIZE}",
                tx.code.len()
            )));
        }
        validate_bytecode(&tx.code)
            .map_err(|err| ManagerError::InvalidBytecode(err.to_string()))?;

        // Lock through the field so the guard does not pin all of `self`.
        let mut store = self.store.lock().expect("state store mutex poisoned");
        store.begin()?;
        match Self::deploy_in_transaction(&mut store, tx, self.block.number) {
            Ok(address) => {
                store.commit()?;
                self.total_deployments += 1;
                self.total_gas_used += tx.gas_limit;
                debug!(%address, deployer = %tx.deployer, "deployment committed");
                Ok(DeploymentReceipt {
                    contract_address: address,
                    gas_used: tx.gas_limit,
                })
            }
            Err(err) => {
                rollback_quietly(&mut store);
                warn!(deployer = %tx.deployer, error = %err, "deployment failed");
                Err(err)
            }
        }
    }

    fn deploy_in_transaction(
        store: &mut StateStore,
        tx: &DeploymentTransaction,
        block_number: u64,
    ) -> Result<Address, ManagerError> {
        let nonce = store.increment_nonce(&tx.deployer)?;
        let address = derive_address(&tx.deployer, nonce);

        if store.contract_exists(&address)? {
            return Err(ManagerError::ContractExists(address));
        }

        Self::debit_gas(store, &tx.deployer, tx.gas_limit, tx.gas_price)?;
        if !tx.value.is_zero() {
            Self::transfer(store, &tx.deployer, &address, tx.value)?;
        }
        store.deploy_contract(&address, tx.code.clone(), &tx.deployer, block_number)?;
        Ok(address)
    }

    // =========================================================================
    // CALLS
    // =========================================================================

    /// Calls a deployed contract.
    ///
    /// Gas prepayment and value transfer commit first and survive a failed
    /// execution; storage changes ride a second transaction that commits
    /// only when the VM reports success. Unused gas is refunded on success.
    ///
    /// # Errors
    ///
    /// `ContractNotFound`, `InsufficientBalance`, or a store failure. VM
    /// failures are not errors here: they come back as an unsuccessful
    /// [`ExecutionResult`].
    pub fn call(&mut self, tx: &CallTransaction) -> Result<ExecutionResult, ManagerError> {
        let mut store = self.store.lock().expect("state store mutex poisoned");

        if !store.contract_exists(&tx.contract)? {
            return Err(ManagerError::ContractNotFound(tx.contract));
        }
        let contract_state = store
            .get_contract(&tx.contract)?
            .ok_or(ManagerError::ContractNotFound(tx.contract))?;

        // Gas and value accounting commit up front: they persist even when
        // the execution afterwards fails.
        store.begin()?;
        let prepay = Self::debit_gas(&mut store, &tx.caller, tx.gas_limit, tx.gas_price)
            .and_then(|()| {
                if tx.value.is_zero() {
                    Ok(())
                } else {
                    Self::transfer(&mut store, &tx.caller, &tx.contract, tx.value)
                }
            });
        if let Err(err) = prepay {
            rollback_quietly(&mut store);
            return Err(err);
        }
        store.commit()?;

        let context = ExecutionContext {
            code: contract_state.code,
            input_data: tx.input_data.clone(),
            caller: tx.caller,
            contract: tx.contract,
            gas_limit: tx.gas_limit,
            gas_price: tx.gas_price,
            value: tx.value,
            block: self.block,
        };

        store.begin()?;
        let result = {
            let mut host = StoreHost::new(&mut store, self.block.number);
            self.vm.execute(&context, &mut host)
        };

        if result.success {
            let unused = tx.gas_limit - result.gas_used;
            let refund = Word256::from_u64(unused).wrapping_mul(Word256::from_u64(tx.gas_price));
            if !refund.is_zero() {
                let balance = store.get_balance(&tx.caller)?;
                store.set_balance(&tx.caller, balance.wrapping_add(refund))?;
            }
            store.commit()?;
        } else {
            store.rollback()?;
            debug!(contract = %tx.contract, error = ?result.error, "call rolled back");
        }

        self.total_calls += 1;
        self.total_gas_used += result.gas_used;
        Ok(result)
    }

    // =========================================================================
    // QUERIES & STATISTICS
    // =========================================================================

    /// Balance of any address.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn balance(&self, address: &Address) -> Result<Word256, ManagerError> {
        Ok(self.lock_store().get_balance(address)?)
    }

    /// Nonce of any address.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn nonce(&self, address: &Address) -> Result<u64, ManagerError> {
        Ok(self.lock_store().get_nonce(address)?)
    }

    /// True if a deployed contract lives at `address`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn contract_exists(&self, address: &Address) -> Result<bool, ManagerError> {
        Ok(self.lock_store().contract_exists(address)?)
    }

    /// Manager statistics.
    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            total_deployments: self.total_deployments,
            total_calls: self.total_calls,
            total_gas_used: self.total_gas_used,
        }
    }

    /// VM statistics.
    #[must_use]
    pub fn vm_stats(&self) -> crate::context::VmStats {
        self.vm.stats()
    }

    // =========================================================================
    // BALANCE PLUMBING
    // =========================================================================

    fn debit_gas(
        store: &mut StateStore,
        payer: &Address,
        gas_limit: u64,
        gas_price: u64,
    ) -> Result<(), ManagerError> {
        let cost = Word256::from_u64(gas_limit).wrapping_mul(Word256::from_u64(gas_price));
        let balance = store.get_balance(payer)?;
        if balance < cost {
            return Err(ManagerError::InsufficientBalance {
                required: cost,
                available: balance,
            });
        }
        store.set_balance(payer, balance.wrapping_sub(cost))?;
        Ok(())
    }

    fn transfer(
        store: &mut StateStore,
        from: &Address,
        to: &Address,
        value: Word256,
    ) -> Result<(), ManagerError> {
        let from_balance = store.get_balance(from)?;
        if from_balance < value {
            return Err(ManagerError::InsufficientBalance {
                required: value,
                available: from_balance,
            });
        }
        store.set_balance(from, from_balance.wrapping_sub(value))?;
        let to_balance = store.get_balance(to)?;
        store.set_balance(to, to_balance.wrapping_add(value))?;
        Ok(())
    }
}

fn rollback_quietly(store: &mut StateStore) {
    if let Err(err) = store.rollback() {
        warn!(error = %err, "rollback after failure also failed");
    }
}

// =============================================================================
// CORE HANDLE
// =============================================================================

/// The host-facing bundle: one store, one manager. Hosts that want a
/// singleton own it at their boundary; the core never does.
pub struct CoreHandle {
    /// Shared state store.
    pub store: Arc<Mutex<StateStore>>,
    /// The lifecycle manager bound to that store.
    pub manager: ContractManager,
}

impl CoreHandle {
    /// Opens a store at `dir` and wires a manager over it.
    ///
    /// # Errors
    ///
    /// Propagates store open failures.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = Arc::new(Mutex::new(StateStore::open(dir)?));
        let manager = ContractManager::new(Arc::clone(&store));
        Ok(Self { store, manager })
    }

    /// Digest of the committed state.
    #[must_use]
    pub fn state_digest(&self) -> [u8; 32] {
        self.store
            .lock()
            .expect("state store mutex poisoned")
            .state_digest()
    }

    /// Credits `amount` to `address` outside any transaction. Host-side
    /// funding hook for genesis allocations and tests.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn fund(&self, address: &Address, amount: Word256) -> Result<(), StoreError> {
        let mut store = self.store.lock().expect("state store mutex poisoned");
        let balance = store.get_balance(address)?;
        store.set_balance(address, balance.wrapping_add(amount))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// PUSH1 5, PUSH1 3, ADD, PUSH1 0, MSTORE, PUSH1 32, PUSH1 0, RETURN
    const ADD_PROGRAM: [u8; 13] = [
        0x60, 0x05, 0x60, 0x03, 0x01, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xF3,
    ];

    fn temp_handle() -> (CoreHandle, PathBuf) {
        let dir = std::env::temp_dir()
            .join("basalt-manager-tests")
            .join(uuid::Uuid::new_v4().to_string());
        (CoreHandle::open(&dir).unwrap(), dir)
    }

    fn addr(byte: u8) -> Address {
        Address::new([byte; 20])
    }

    fn deploy_tx(deployer: Address, code: Vec<u8>) -> DeploymentTransaction {
        DeploymentTransaction {
            deployer,
            code,
            gas_limit: 100_000,
            gas_price: 1,
            value: Word256::ZERO,
        }
    }

    fn call_tx(caller: Address, contract: Address) -> CallTransaction {
        CallTransaction {
            caller,
            contract,
            input_data: Vec::new(),
            gas_limit: 100_000,
            gas_price: 1,
            value: Word256::ZERO,
        }
    }

    #[test]
    fn test_deploy_derives_address_from_incremented_nonce() {
        let (mut handle, dir) = temp_handle();
        let deployer = addr(1);
        handle.fund(&deployer, Word256::from_u64(1_000_000)).unwrap();

        let receipt = handle.manager.deploy(&deploy_tx(deployer, ADD_PROGRAM.to_vec())).unwrap();
        assert_eq!(receipt.contract_address, derive_address(&deployer, 1));
        assert_eq!(receipt.gas_used, 100_000);
        assert_eq!(handle.manager.nonce(&deployer).unwrap(), 1);
        assert!(handle.manager.contract_exists(&receipt.contract_address).unwrap());

        // The full limit was billed.
        assert_eq!(
            handle.manager.balance(&deployer).unwrap(),
            Word256::from_u64(900_000)
        );
        drop(handle);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_deploy_rejects_bad_bytecode_without_state_change() {
        let (mut handle, dir) = temp_handle();
        let deployer = addr(2);
        handle.fund(&deployer, Word256::from_u64(1_000_000)).unwrap();

        let err = handle.manager.deploy(&deploy_tx(deployer, Vec::new()));
        assert!(matches!(err, Err(ManagerError::InvalidBytecode(_))));

        let err = handle.manager.deploy(&deploy_tx(deployer, vec![0x60])); // truncated PUSH
        assert!(matches!(err, Err(ManagerError::InvalidBytecode(_))));

        let err = handle.manager.deploy(&deploy_tx(deployer, vec![0x00; MAX_CODE_SIZE + 1]));
        assert!(matches!(err, Err(ManagerError::InvalidBytecode(_))));

        // No nonce bump, no billing.
        assert_eq!(handle.manager.nonce(&deployer).unwrap(), 0);
        assert_eq!(
            handle.manager.balance(&deployer).unwrap(),
            Word256::from_u64(1_000_000)
        );
        drop(handle);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_deploy_insufficient_balance_rolls_back_nonce() {
        let (mut handle, dir) = temp_handle();
        let deployer = addr(3);
        // No funding at all.
        let err = handle.manager.deploy(&deploy_tx(deployer, ADD_PROGRAM.to_vec()));
        assert!(matches!(err, Err(ManagerError::InsufficientBalance { .. })));
        assert_eq!(handle.manager.nonce(&deployer).unwrap(), 0);
        drop(handle);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_deploy_transfers_value_to_contract() {
        let (mut handle, dir) = temp_handle();
        let deployer = addr(4);
        handle.fund(&deployer, Word256::from_u64(1_000_000)).unwrap();

        let mut tx = deploy_tx(deployer, ADD_PROGRAM.to_vec());
        tx.value = Word256::from_u64(500);
        let receipt = handle.manager.deploy(&tx).unwrap();

        assert_eq!(
            handle.manager.balance(&receipt.contract_address).unwrap(),
            Word256::from_u64(500)
        );
        assert_eq!(
            handle.manager.balance(&deployer).unwrap(),
            Word256::from_u64(1_000_000 - 100_000 - 500)
        );
        drop(handle);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_call_executes_and_refunds_unused_gas() {
        let (mut handle, dir) = temp_handle();
        let deployer = addr(5);
        handle.fund(&deployer, Word256::from_u64(1_000_000)).unwrap();

        let receipt = handle.manager.deploy(&deploy_tx(deployer, ADD_PROGRAM.to_vec())).unwrap();
        let balance_before_call = handle.manager.balance(&deployer).unwrap();

        let result = handle
            .manager
            .call(&call_tx(deployer, receipt.contract_address))
            .unwrap();
        assert!(result.success);
        assert_eq!(result.return_data.len(), 32);
        assert_eq!(result.return_data[31], 0x08);

        // Only the gas actually used stays billed.
        assert_eq!(
            handle.manager.balance(&deployer).unwrap(),
            balance_before_call.wrapping_sub(Word256::from_u64(result.gas_used))
        );
        drop(handle);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_call_unknown_contract() {
        let (mut handle, dir) = temp_handle();
        let err = handle.manager.call(&call_tx(addr(6), addr(7)));
        assert!(matches!(err, Err(ManagerError::ContractNotFound(_))));
        drop(handle);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_failed_call_keeps_gas_but_rolls_back_storage() {
        let (mut handle, dir) = temp_handle();
        let deployer = addr(8);
        handle.fund(&deployer, Word256::from_u64(10_000_000)).unwrap();

        // PUSH1 1, PUSH1 0, SSTORE, then REVERT with empty payload.
        let code = vec![0x60, 0x01, 0x60, 0x00, 0x55, 0x60, 0x00, 0x60, 0x00, 0xFD];
        let receipt = handle.manager.deploy(&deploy_tx(deployer, code)).unwrap();

        let digest_before = handle.state_digest();
        let balance_before = handle.manager.balance(&deployer).unwrap();

        let result = handle
            .manager
            .call(&call_tx(deployer, receipt.contract_address))
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Revert"));

        // Storage rolled back: the only state difference is the gas debit.
        let slot = {
            let mut store = handle.store.lock().unwrap();
            store
                .get_storage(&receipt.contract_address, &Word256::ZERO)
                .unwrap()
        };
        assert_eq!(slot, Word256::ZERO);
        assert_ne!(handle.state_digest(), digest_before); // gas was billed
        assert_eq!(
            handle.manager.balance(&deployer).unwrap(),
            balance_before.wrapping_sub(Word256::from_u64(100_000))
        );
        drop(handle);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_call_persists_storage_on_success() {
        let (mut handle, dir) = temp_handle();
        let deployer = addr(9);
        handle.fund(&deployer, Word256::from_u64(10_000_000)).unwrap();

        // PUSH1 42, PUSH1 7, SSTORE, STOP
        let code = vec![0x60, 0x2A, 0x60, 0x07, 0x55, 0x00];
        let receipt = handle.manager.deploy(&deploy_tx(deployer, code)).unwrap();
        let result = handle
            .manager
            .call(&call_tx(deployer, receipt.contract_address))
            .unwrap();
        assert!(result.success);

        let mut store = handle.store.lock().unwrap();
        assert_eq!(
            store
                .get_storage(&receipt.contract_address, &Word256::from_u64(7))
                .unwrap(),
            Word256::from_u64(42)
        );
        drop(store);
        drop(handle);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_stats_track_activity() {
        let (mut handle, dir) = temp_handle();
        let deployer = addr(10);
        handle.fund(&deployer, Word256::from_u64(10_000_000)).unwrap();

        let receipt = handle.manager.deploy(&deploy_tx(deployer, ADD_PROGRAM.to_vec())).unwrap();
        handle
            .manager
            .call(&call_tx(deployer, receipt.contract_address))
            .unwrap();

        let stats = handle.manager.stats();
        assert_eq!(stats.total_deployments, 1);
        assert_eq!(stats.total_calls, 1);
        assert!(stats.total_gas_used > 100_000);

        let vm_stats = handle.manager.vm_stats();
        assert_eq!(vm_stats.total_executions, 1);
        drop(handle);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_second_deployment_gets_fresh_address() {
        let (mut handle, dir) = temp_handle();
        let deployer = addr(11);
        handle.fund(&deployer, Word256::from_u64(10_000_000)).unwrap();

        let first = handle.manager.deploy(&deploy_tx(deployer, ADD_PROGRAM.to_vec())).unwrap();
        let second = handle.manager.deploy(&deploy_tx(deployer, ADD_PROGRAM.to_vec())).unwrap();
        assert_ne!(first.contract_address, second.contract_address);
        assert_eq!(second.contract_address, derive_address(&deployer, 2));
        drop(handle);
        let _ = std::fs::remove_dir_all(dir);
    }
}
