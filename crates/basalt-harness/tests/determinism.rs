//! Determinism and atomicity properties across independent instances.

use basalt_harness::{harness_actor, DeterminismHarness, DEFAULT_INSTANCES};
use basalt_primitives::Word256;
use basalt_vm::{CallTransaction, DeploymentTransaction, Transaction};

/// PUSH1 5, PUSH1 3, ADD, PUSH1 0, MSTORE, PUSH1 32, PUSH1 0, RETURN
const ADD_PROGRAM: [u8; 13] = [
    0x60, 0x05, 0x60, 0x03, 0x01, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xF3,
];

/// PUSH1 42, PUSH1 7, SSTORE, STOP. Leaves a persistent storage write.
const SSTORE_PROGRAM: [u8; 6] = [0x60, 0x2A, 0x60, 0x07, 0x55, 0x00];

/// SSTORE then REVERT. Persistent effects must be rolled back.
const SSTORE_THEN_REVERT: [u8; 10] = [0x60, 0x01, 0x60, 0x00, 0x55, 0x60, 0x00, 0x60, 0x00, 0xFD];

#[test]
fn deploy_then_call_replays_identically_across_three_instances() {
    let mut harness = DeterminismHarness::new(DEFAULT_INSTANCES).unwrap();
    let report = harness.run_deploy_then_call(
        &ADD_PROGRAM,
        &[],
        100_000,
        1,
        Word256::from_u64(1_000_000),
    );

    assert!(report.identical, "{:?}", report.divergence);
    assert_eq!(report.results.len(), 3);
    assert_eq!(report.digests.len(), 3);

    for result in &report.results {
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.return_data.len(), 32);
        assert_eq!(result.return_data[31], 0x08);
    }
    assert_eq!(report.digests[0], report.digests[1]);
    assert_eq!(report.digests[1], report.digests[2]);
}

#[test]
fn storage_writes_replay_identically() {
    let mut harness = DeterminismHarness::new(DEFAULT_INSTANCES).unwrap();
    let report = harness.run_deploy_then_call(
        &SSTORE_PROGRAM,
        &[],
        100_000,
        1,
        Word256::from_u64(1_000_000),
    );
    assert!(report.identical, "{:?}", report.divergence);
    assert!(report.results[0].success);
}

#[test]
fn reverted_executions_replay_identically() {
    let mut harness = DeterminismHarness::new(DEFAULT_INSTANCES).unwrap();
    let report = harness.run_deploy_then_call(
        &SSTORE_THEN_REVERT,
        &[],
        100_000,
        1,
        Word256::from_u64(1_000_000),
    );
    assert!(report.identical, "{:?}", report.divergence);
    assert!(!report.results[0].success);
    assert_eq!(report.results[0].error.as_deref(), Some("Revert"));
}

#[test]
fn transaction_sequences_replay_identically() {
    let mut harness = DeterminismHarness::new(DEFAULT_INSTANCES).unwrap();
    let actor = harness_actor();
    harness
        .fund_all(&actor, Word256::from_u64(10_000_000))
        .unwrap();

    // The deployment address is a pure function of (deployer, nonce), so the
    // follow-up call can be authored ahead of time.
    let contract = basalt_primitives::derive_address(&actor, 1);
    let transactions = vec![
        Transaction::Deploy(DeploymentTransaction {
            deployer: actor,
            code: SSTORE_PROGRAM.to_vec(),
            gas_limit: 100_000,
            gas_price: 1,
            value: Word256::ZERO,
        }),
        Transaction::Call(CallTransaction {
            caller: actor,
            contract,
            input_data: Vec::new(),
            gas_limit: 100_000,
            gas_price: 1,
            value: Word256::ZERO,
        }),
        Transaction::Call(CallTransaction {
            caller: actor,
            contract,
            input_data: Vec::new(),
            gas_limit: 100_000,
            gas_price: 1,
            value: Word256::ZERO,
        }),
    ];

    let report = harness.run_transactions(&transactions);
    assert!(report.identical, "{:?}", report.divergence);
    // The final call succeeded everywhere.
    for result in &report.results {
        assert!(result.success, "{:?}", result.error);
    }
}

#[test]
fn wire_encoded_transactions_round_trip_into_the_harness() {
    let actor = harness_actor();
    let deploy = Transaction::Deploy(DeploymentTransaction {
        deployer: actor,
        code: ADD_PROGRAM.to_vec(),
        gas_limit: 100_000,
        gas_price: 1,
        value: Word256::ZERO,
    });

    // Encode and decode as the transaction layer would hand them over.
    let decoded = Transaction::decode(&deploy.encode()).unwrap();

    let mut harness = DeterminismHarness::new(2).unwrap();
    harness
        .fund_all(&actor, Word256::from_u64(1_000_000))
        .unwrap();
    let report = harness.run_transactions(std::slice::from_ref(&decoded));
    assert!(report.identical, "{:?}", report.divergence);
    assert!(report.results[0].success);
}

#[test]
fn failed_execution_leaves_no_storage_behind() {
    let mut harness = DeterminismHarness::new(1).unwrap();

    // Run the revert program twice; if the first run leaked storage, the
    // second would see a nonzero slot and charge different SSTORE gas,
    // changing gas_used.
    let first = harness.run_bytecode(&SSTORE_THEN_REVERT, 100_000);
    let digest_after_first = first.digests[0];
    let second = harness.run_bytecode(&SSTORE_THEN_REVERT, 100_000);

    assert_eq!(first.results[0].gas_used, second.results[0].gas_used);
    assert_eq!(digest_after_first, second.digests[0]);
}

#[test]
fn gas_exhaustion_is_deterministic() {
    let mut harness = DeterminismHarness::new(DEFAULT_INSTANCES).unwrap();
    let report = harness.run_bytecode(&ADD_PROGRAM, 5);
    assert!(report.identical, "{:?}", report.divergence);
    for result in &report.results {
        assert_eq!(result.error.as_deref(), Some("OutOfGas"));
        assert_eq!(result.gas_used, 5);
    }
}
