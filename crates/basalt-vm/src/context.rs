//! # Execution Entities
//!
//! The immutable inputs and structured outputs of one VM execution, plus the
//! VM's tuning knobs and statistics snapshots.

use basalt_primitives::{Address, Word256};
use serde::Serialize;

/// Block-level fields visible to executing code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockContext {
    /// Current block number.
    pub number: u64,
    /// Current block timestamp.
    pub timestamp: u64,
    /// Block coinbase address.
    pub coinbase: Address,
}

/// Everything one execution can observe. Immutable for its duration.
#[derive(Clone, Debug, Default)]
pub struct ExecutionContext {
    /// Contract bytecode.
    pub code: Vec<u8>,
    /// Input data for the call.
    pub input_data: Vec<u8>,
    /// Caller address.
    pub caller: Address,
    /// Executing contract address.
    pub contract: Address,
    /// Gas budget.
    pub gas_limit: u64,
    /// Gas price the caller pays.
    pub gas_price: u64,
    /// Value transferred with the call.
    pub value: Word256,
    /// Block fields.
    pub block: BlockContext,
}

/// VM tuning knobs.
#[derive(Clone, Copy, Debug)]
pub struct VmConfig {
    /// Optional instruction-count cap. Purely a DoS guard: gas is the
    /// semantic bound, and replayed blocks must not depend on this value.
    pub max_instructions: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_instructions: None,
        }
    }
}

/// Outcome of one execution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    /// True if the program halted normally.
    pub success: bool,
    /// RETURN or REVERT payload.
    pub return_data: Vec<u8>,
    /// Gas consumed. Equals the full limit on `OutOfGas`.
    pub gas_used: u64,
    /// Machine-readable failure tag, None on success.
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Builds a successful result.
    #[must_use]
    pub fn success(return_data: Vec<u8>, gas_used: u64) -> Self {
        Self {
            success: true,
            return_data,
            gas_used,
            error: None,
        }
    }

    /// Builds a failed result.
    #[must_use]
    pub fn failure(tag: &str, return_data: Vec<u8>, gas_used: u64) -> Self {
        Self {
            success: false,
            return_data,
            gas_used,
            error: Some(tag.to_string()),
        }
    }
}

/// VM statistics snapshot.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct VmStats {
    /// Executions completed (successfully or not).
    pub total_executions: u64,
    /// Gas consumed across all executions.
    pub total_gas_used: u64,
    /// Instructions dispatched across all executions.
    pub total_instructions: u64,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_constructors() {
        let ok = ExecutionResult::success(vec![1, 2], 30);
        assert!(ok.success);
        assert_eq!(ok.gas_used, 30);
        assert!(ok.error.is_none());

        let err = ExecutionResult::failure("OutOfGas", Vec::new(), 5);
        assert!(!err.success);
        assert_eq!(err.error.as_deref(), Some("OutOfGas"));
    }

    #[test]
    fn test_stats_serialize() {
        let stats = VmStats {
            total_executions: 1,
            total_gas_used: 30,
            total_instructions: 8,
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"total_gas_used\":30"));
    }
}
