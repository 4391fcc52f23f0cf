//! # basalt-harness
//!
//! Determinism replay harness: builds N fully independent core instances
//! (VM + state store + manager), each in its own state directory, runs the
//! same input on all of them, and asserts that every `ExecutionResult` and
//! every state digest came out byte-identical.
//!
//! Divergence here means the replication contract is broken (two validators
//! fed the same block would disagree), so the comparison is strict:
//! field-by-field over results, byte-for-byte over digests.

#![warn(missing_docs)]
#![warn(clippy::all)]

use basalt_primitives::{Address, Word256};
use basalt_state::StoreError;
use basalt_vm::{
    CallTransaction, CoreHandle, DeploymentTransaction, ExecutionContext, ExecutionResult,
    StoreHost, Transaction, VirtualMachine,
};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Default number of instances, matching the usual validator-triple setup.
pub const DEFAULT_INSTANCES: usize = 3;

/// The fixed actor the harness deploys and calls from.
#[must_use]
pub fn harness_actor() -> Address {
    Address::new([0xD0; 20])
}

/// Result of one replay comparison.
#[derive(Clone, Debug)]
pub struct DeterminismReport {
    /// True when every result and every digest matched.
    pub identical: bool,
    /// One result per instance (for transaction sequences, the last one).
    pub results: Vec<ExecutionResult>,
    /// One state digest per instance.
    pub digests: Vec<[u8; 32]>,
    /// Human-readable description of the first mismatch, if any.
    pub divergence: Option<String>,
}

/// N independent core instances replaying the same inputs.
pub struct DeterminismHarness {
    handles: Vec<CoreHandle>,
    root: PathBuf,
}

impl DeterminismHarness {
    /// Builds `instances` isolated cores under a fresh temp directory.
    ///
    /// # Errors
    ///
    /// Propagates store open failures.
    pub fn new(instances: usize) -> Result<Self, StoreError> {
        let root = std::env::temp_dir()
            .join("basalt-determinism")
            .join(uuid::Uuid::new_v4().to_string());
        Self::with_root(instances, root)
    }

    /// Builds `instances` isolated cores under `root`.
    ///
    /// # Errors
    ///
    /// Propagates store open failures.
    pub fn with_root(instances: usize, root: PathBuf) -> Result<Self, StoreError> {
        let mut handles = Vec::with_capacity(instances);
        for i in 0..instances {
            handles.push(CoreHandle::open(root.join(format!("instance-{i}")))?);
        }
        debug!(instances, root = %root.display(), "determinism harness ready");
        Ok(Self { handles, root })
    }

    /// Number of instances.
    #[must_use]
    pub fn instances(&self) -> usize {
        self.handles.len()
    }

    /// Credits `amount` to `address` on every instance.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn fund_all(&self, address: &Address, amount: Word256) -> Result<(), StoreError> {
        for handle in &self.handles {
            handle.fund(address, amount)?;
        }
        Ok(())
    }

    // =========================================================================
    // REPLAY OPERATIONS
    // =========================================================================

    /// Executes raw bytecode on every instance with a default context,
    /// committing state effects when the run succeeds.
    pub fn run_bytecode(&mut self, code: &[u8], gas_limit: u64) -> DeterminismReport {
        let context = ExecutionContext {
            code: code.to_vec(),
            gas_limit,
            contract: harness_actor(),
            caller: harness_actor(),
            ..ExecutionContext::default()
        };

        let mut results = Vec::with_capacity(self.handles.len());
        for handle in &mut self.handles {
            let mut store = handle.store.lock().expect("state store mutex poisoned");
            let result = match store.begin() {
                Ok(()) => {
                    let result = {
                        let mut host = StoreHost::new(&mut store, context.block.number);
                        VirtualMachine::new().execute(&context, &mut host)
                    };
                    let outcome = if result.success {
                        store.commit()
                    } else {
                        store.rollback()
                    };
                    if let Err(err) = outcome {
                        ExecutionResult::failure(err.tag(), Vec::new(), result.gas_used)
                    } else {
                        result
                    }
                }
                Err(err) => ExecutionResult::failure(err.tag(), Vec::new(), 0),
            };
            results.push(vec![result]);
        }
        self.compare(results)
    }

    /// Deploys `code` from the harness actor on every instance. The
    /// synthesized result carries the contract address as return data.
    pub fn run_deployment(
        &mut self,
        code: &[u8],
        gas_limit: u64,
        gas_price: u64,
        funding: Word256,
    ) -> DeterminismReport {
        let tx = DeploymentTransaction {
            deployer: harness_actor(),
            code: code.to_vec(),
            gas_limit,
            gas_price,
            value: Word256::ZERO,
        };

        let mut results = Vec::with_capacity(self.handles.len());
        for handle in &mut self.handles {
            if let Err(err) = handle.fund(&tx.deployer, funding) {
                results.push(vec![ExecutionResult::failure(err.tag(), Vec::new(), 0)]);
                continue;
            }
            results.push(vec![deployment_result(handle, &tx)]);
        }
        self.compare(results)
    }

    /// Deploys `code` and then calls it with `input` on every instance,
    /// comparing the call results.
    pub fn run_deploy_then_call(
        &mut self,
        code: &[u8],
        input: &[u8],
        gas_limit: u64,
        gas_price: u64,
        funding: Word256,
    ) -> DeterminismReport {
        let actor = harness_actor();
        let deploy = DeploymentTransaction {
            deployer: actor,
            code: code.to_vec(),
            gas_limit,
            gas_price,
            value: Word256::ZERO,
        };

        let mut results = Vec::with_capacity(self.handles.len());
        for handle in &mut self.handles {
            if let Err(err) = handle.fund(&actor, funding) {
                results.push(vec![ExecutionResult::failure(err.tag(), Vec::new(), 0)]);
                continue;
            }
            let outcome = match handle.manager.deploy(&deploy) {
                Ok(receipt) => {
                    let call = CallTransaction {
                        caller: actor,
                        contract: receipt.contract_address,
                        input_data: input.to_vec(),
                        gas_limit,
                        gas_price,
                        value: Word256::ZERO,
                    };
                    match handle.manager.call(&call) {
                        Ok(result) => result,
                        Err(err) => ExecutionResult::failure(err.tag(), Vec::new(), 0),
                    }
                }
                Err(err) => ExecutionResult::failure(err.tag(), Vec::new(), 0),
            };
            results.push(vec![outcome]);
        }
        self.compare(results)
    }

    /// Applies an encoded transaction sequence to every instance and
    /// compares every per-transaction result plus the final digests.
    pub fn run_transactions(&mut self, transactions: &[Transaction]) -> DeterminismReport {
        let mut results = Vec::with_capacity(self.handles.len());
        for handle in &mut self.handles {
            let mut instance_results = Vec::with_capacity(transactions.len());
            for tx in transactions {
                let outcome = match tx {
                    Transaction::Deploy(deploy) => deployment_result(handle, deploy),
                    Transaction::Call(call) => match handle.manager.call(call) {
                        Ok(result) => result,
                        Err(err) => ExecutionResult::failure(err.tag(), Vec::new(), 0),
                    },
                };
                instance_results.push(outcome);
            }
            results.push(instance_results);
        }
        self.compare(results)
    }

    // =========================================================================
    // COMPARISON
    // =========================================================================

    fn compare(&self, per_instance: Vec<Vec<ExecutionResult>>) -> DeterminismReport {
        let digests: Vec<[u8; 32]> = self.handles.iter().map(CoreHandle::state_digest).collect();

        let mut divergence = None;
        if let Some(first) = per_instance.first() {
            for (i, other) in per_instance.iter().enumerate().skip(1) {
                if other != first {
                    divergence = Some(format!("instance {i} produced different results"));
                    break;
                }
            }
        }
        if divergence.is_none() {
            if let Some(first) = digests.first() {
                for (i, digest) in digests.iter().enumerate().skip(1) {
                    if digest != first {
                        divergence = Some(format!(
                            "instance {i} state digest {} != {}",
                            hex::encode(digest),
                            hex::encode(first)
                        ));
                        break;
                    }
                }
            }
        }

        if let Some(reason) = &divergence {
            warn!(%reason, "determinism violation detected");
        }

        let results = per_instance
            .into_iter()
            .filter_map(|mut list| list.pop())
            .collect();
        DeterminismReport {
            identical: divergence.is_none(),
            results,
            digests,
            divergence,
        }
    }
}

fn deployment_result(handle: &mut CoreHandle, tx: &DeploymentTransaction) -> ExecutionResult {
    match handle.manager.deploy(tx) {
        Ok(receipt) => ExecutionResult::success(
            receipt.contract_address.as_bytes().to_vec(),
            receipt.gas_used,
        ),
        Err(err) => ExecutionResult::failure(err.tag(), Vec::new(), 0),
    }
}

impl Drop for DeterminismHarness {
    fn drop(&mut self) {
        // Release the store locks before sweeping the directories.
        self.handles.clear();
        if let Err(err) = fs::remove_dir_all(&self.root) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(root = %self.root.display(), error = %err, "failed to sweep harness root");
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
