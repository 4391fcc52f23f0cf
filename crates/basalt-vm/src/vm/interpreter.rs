//! # Interpreter
//!
//! Single-threaded fetch-decode-execute over validated bytecode. Gas is
//! debited before dispatch; handlers that need more (memory expansion,
//! storage writes) charge the remainder before touching anything, so a
//! failed instruction never leaves partial effects behind.
//!
//! Bit-identical results across instances are the whole point: no wall
//! clock, no randomness, no iteration over unordered containers.

use crate::context::{ExecutionContext, ExecutionResult, VmConfig, VmStats};
use crate::errors::VmError;
use crate::ports::{BlockHashes, StateAccess};
use crate::vm::gas::{costs, OPCODE_GAS};
use crate::vm::memory::Memory;
use crate::vm::opcodes::Opcode;
use crate::vm::stack::Stack;
use basalt_primitives::{keccak256, Address, Word256};
use std::collections::HashSet;
use tracing::{debug, warn};

// =============================================================================
// BYTECODE VALIDATION
// =============================================================================

/// Scans bytecode once before execution.
///
/// Every byte must decode to a known opcode; PUSH immediates must fit within
/// the code and are skipped (they are data, not instructions). The returned
/// set holds every position that may be jumped to.
///
/// # Errors
///
/// Returns `InvalidInstruction` for an unknown byte or a truncated PUSH.
pub fn validate_bytecode(code: &[u8]) -> Result<HashSet<usize>, VmError> {
    let mut jump_dests = HashSet::new();
    let mut i = 0usize;
    while i < code.len() {
        let byte = code[i];
        let opcode = Opcode::from_byte(byte).ok_or(VmError::InvalidInstruction(byte))?;
        if opcode == Opcode::JumpDest {
            jump_dests.insert(i);
        }
        if let Some(size) = opcode.push_size() {
            if i + 1 + size > code.len() {
                return Err(VmError::InvalidInstruction(byte));
            }
            i += size;
        }
        i += 1;
    }
    Ok(jump_dests)
}

// =============================================================================
// INTERPRETER
// =============================================================================

/// Per-execution machine state.
pub struct Interpreter<'a, H>
where
    H: StateAccess + BlockHashes,
{
    /// Execution context (immutable).
    context: &'a ExecutionContext,
    /// Contract bytecode.
    code: &'a [u8],
    /// Program counter.
    pc: usize,
    /// Execution stack.
    stack: Stack,
    /// Execution memory.
    memory: Memory,
    /// RETURN/REVERT payload.
    return_data: Vec<u8>,
    /// Gas left. Never exceeds the context's limit.
    gas_remaining: u64,
    /// Set by terminating opcodes.
    halted: bool,
    /// State and block-hash access.
    host: &'a mut H,
    /// Valid jump targets from validation.
    jump_dests: HashSet<usize>,
    /// Instructions dispatched so far.
    instructions: u64,
    /// Optional DoS guard.
    max_instructions: Option<u64>,
}

impl<'a, H> Interpreter<'a, H>
where
    H: StateAccess + BlockHashes,
{
    /// Builds an interpreter over validated code.
    pub fn new(
        context: &'a ExecutionContext,
        host: &'a mut H,
        jump_dests: HashSet<usize>,
        config: VmConfig,
    ) -> Self {
        Self {
            context,
            code: &context.code,
            pc: 0,
            stack: Stack::new(),
            memory: Memory::new(),
            return_data: Vec::new(),
            gas_remaining: context.gas_limit,
            halted: false,
            host,
            jump_dests,
            instructions: 0,
            max_instructions: config.max_instructions,
        }
    }

    /// Runs to completion or failure.
    ///
    /// # Errors
    ///
    /// Any [`VmError`]; the caller maps it into the execution result.
    pub fn run(&mut self) -> Result<(), VmError> {
        while !self.halted && self.pc < self.code.len() {
            if let Some(cap) = self.max_instructions {
                if self.instructions >= cap {
                    return Err(VmError::InstructionLimit(self.instructions));
                }
            }
            let byte = self.code[self.pc];
            let opcode = Opcode::from_byte(byte).ok_or(VmError::InvalidInstruction(byte))?;
            self.charge(OPCODE_GAS[byte as usize])?;
            self.instructions += 1;
            self.step(opcode)?;
        }
        Ok(())
    }

    /// Debits gas, failing when the budget cannot cover `amount`.
    fn charge(&mut self, amount: u64) -> Result<(), VmError> {
        if amount > self.gas_remaining {
            self.gas_remaining = 0;
            return Err(VmError::OutOfGas);
        }
        self.gas_remaining -= amount;
        Ok(())
    }

    /// Charges memory expansion for `[offset, offset + len)` and grows
    /// memory, returning the offset as usize. Zero-length accesses are free
    /// and touch nothing.
    fn charge_memory(&mut self, offset: Word256, len: u64) -> Result<usize, VmError> {
        if len == 0 {
            return Ok(0);
        }
        // An offset beyond u64 needs more expansion gas than can exist.
        let Ok(offset) = offset.to_u64() else {
            self.gas_remaining = 0;
            return Err(VmError::OutOfGas);
        };
        let end = u128::from(offset) + u128::from(len);
        let cost = self.memory.expansion_cost(end);
        if cost > u128::from(self.gas_remaining) {
            self.gas_remaining = 0;
            return Err(VmError::OutOfGas);
        }
        self.gas_remaining -= cost as u64;
        self.memory.expand(end)?;
        Ok(offset as usize)
    }

    /// Pops a length operand. Lengths beyond u64 can never be paid for.
    fn pop_len(&mut self) -> Result<u64, VmError> {
        let word = self.stack.pop()?;
        word.to_u64().map_err(|_| {
            self.gas_remaining = 0;
            VmError::OutOfGas
        })
    }

    /// Redirects the program counter to a validated JUMPDEST.
    fn jump_to(&mut self, destination: Word256) -> Result<(), VmError> {
        if let Ok(dest) = destination.to_u64() {
            let dest = dest as usize;
            if self.jump_dests.contains(&dest) {
                self.pc = dest;
                return Ok(());
            }
        }
        Err(VmError::InvalidJump { destination })
    }

    /// Executes one opcode. The program counter already points past it.
    #[allow(clippy::too_many_lines)]
    fn step(&mut self, opcode: Opcode) -> Result<(), VmError> {
        self.pc += 1;

        match opcode {
            // =================================================================
            // STOP & ARITHMETIC
            // =================================================================
            Opcode::Stop => {
                self.halted = true;
            }

            Opcode::Add => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                self.stack.push(a.wrapping_add(b))?;
            }

            Opcode::Mul => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                self.stack.push(a.wrapping_mul(b))?;
            }

            Opcode::Sub => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                self.stack.push(a.wrapping_sub(b))?;
            }

            Opcode::Div => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                self.stack.push(a.div(b))?;
            }

            Opcode::Mod => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                self.stack.push(a.rem(b))?;
            }

            // =================================================================
            // COMPARISON & BITWISE
            // =================================================================
            Opcode::Lt => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                self.stack.push(bool_word(a < b))?;
            }

            Opcode::Gt => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                self.stack.push(bool_word(a > b))?;
            }

            Opcode::Eq => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                self.stack.push(bool_word(a == b))?;
            }

            Opcode::IsZero => {
                let a = self.stack.pop()?;
                self.stack.push(bool_word(a.is_zero()))?;
            }

            Opcode::And => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                self.stack.push(a & b)?;
            }

            Opcode::Or => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                self.stack.push(a | b)?;
            }

            Opcode::Xor => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                self.stack.push(a ^ b)?;
            }

            Opcode::Not => {
                let a = self.stack.pop()?;
                self.stack.push(!a)?;
            }

            Opcode::Shl => {
                let shift = self.stack.pop()?;
                let value = self.stack.pop()?;
                let result = match shift.to_u64() {
                    Ok(s) if s < 256 => value.shl(s as u32),
                    _ => Word256::ZERO,
                };
                self.stack.push(result)?;
            }

            Opcode::Shr => {
                let shift = self.stack.pop()?;
                let value = self.stack.pop()?;
                let result = match shift.to_u64() {
                    Ok(s) if s < 256 => value.shr(s as u32),
                    _ => Word256::ZERO,
                };
                self.stack.push(result)?;
            }

            Opcode::Sar => {
                let shift = self.stack.pop()?;
                let value = self.stack.pop()?;
                self.stack.push(sar(value, shift))?;
            }

            // =================================================================
            // HASHING
            // =================================================================
            Opcode::Sha3 => {
                let offset = self.stack.pop()?;
                let len = self.pop_len()?;
                let offset = self.charge_memory(offset, len)?;
                let data = self.memory.read_bytes(offset, len as usize);
                self.stack.push(Word256::from_be_bytes(keccak256(&data)))?;
            }

            // =================================================================
            // ENVIRONMENT
            // =================================================================
            Opcode::Address => {
                self.stack.push(self.context.contract.to_word())?;
            }

            Opcode::Caller => {
                self.stack.push(self.context.caller.to_word())?;
            }

            Opcode::CallValue => {
                self.stack.push(self.context.value)?;
            }

            Opcode::CallDataLoad => {
                let offset = self.stack.pop()?;
                let mut out = [0u8; 32];
                copy_padded(&self.context.input_data, offset, &mut out);
                self.stack.push(Word256::from_be_bytes(out))?;
            }

            Opcode::CallDataSize => {
                self.stack
                    .push(Word256::from_u64(self.context.input_data.len() as u64))?;
            }

            Opcode::CallDataCopy => {
                let dest = self.stack.pop()?;
                let src = self.stack.pop()?;
                let len = self.pop_len()?;
                let dest = self.charge_memory(dest, len)?;
                let mut buf = vec![0u8; len as usize];
                copy_padded(&self.context.input_data, src, &mut buf);
                self.memory.write_bytes(dest, &buf);
            }

            Opcode::CodeSize => {
                self.stack.push(Word256::from_u64(self.code.len() as u64))?;
            }

            Opcode::CodeCopy => {
                let dest = self.stack.pop()?;
                let src = self.stack.pop()?;
                let len = self.pop_len()?;
                let dest = self.charge_memory(dest, len)?;
                let mut buf = vec![0u8; len as usize];
                copy_padded(self.code, src, &mut buf);
                self.memory.write_bytes(dest, &buf);
            }

            Opcode::GasPrice => {
                self.stack.push(Word256::from_u64(self.context.gas_price))?;
            }

            // =================================================================
            // BLOCK INFORMATION
            // =================================================================
            Opcode::BlockHash => {
                let number = self.stack.pop()?;
                let hash = number
                    .to_u64()
                    .ok()
                    .and_then(|n| self.host.block_hash(n))
                    .map_or(Word256::ZERO, Word256::from_be_bytes);
                self.stack.push(hash)?;
            }

            Opcode::Coinbase => {
                self.stack.push(self.context.block.coinbase.to_word())?;
            }

            Opcode::Timestamp => {
                self.stack
                    .push(Word256::from_u64(self.context.block.timestamp))?;
            }

            Opcode::Number => {
                self.stack.push(Word256::from_u64(self.context.block.number))?;
            }

            Opcode::GasLimit => {
                self.stack.push(Word256::from_u64(self.context.gas_limit))?;
            }

            // =================================================================
            // STACK, MEMORY, STORAGE
            // =================================================================
            Opcode::Pop => {
                self.stack.pop()?;
            }

            Opcode::MLoad => {
                let offset = self.stack.pop()?;
                let offset = self.charge_memory(offset, 32)?;
                let word = self.memory.read_word(offset);
                self.stack.push(Word256::from_be_bytes(word))?;
            }

            Opcode::MStore => {
                let offset = self.stack.pop()?;
                let value = self.stack.pop()?;
                let offset = self.charge_memory(offset, 32)?;
                self.memory.write_word(offset, &value.to_be_bytes());
            }

            Opcode::MStore8 => {
                let offset = self.stack.pop()?;
                let value = self.stack.pop()?;
                let offset = self.charge_memory(offset, 1)?;
                self.memory.write_byte(offset, value.to_be_bytes()[31]);
            }

            Opcode::SLoad => {
                let slot = self.stack.pop()?;
                let value = self.host.storage_get(&self.context.contract, &slot)?;
                self.stack.push(value)?;
            }

            Opcode::SStore => {
                let slot = self.stack.pop()?;
                let value = self.stack.pop()?;
                // Writing a zero slot nonzero is the expensive case; anything
                // else (including zero over zero) charges the reset rate.
                let current = self.host.storage_get(&self.context.contract, &slot)?;
                let gas = if current.is_zero() && !value.is_zero() {
                    costs::SSTORE_SET
                } else {
                    costs::SSTORE_RESET
                };
                self.charge(gas)?;
                self.host.storage_set(&self.context.contract, &slot, value)?;
            }

            // =================================================================
            // CONTROL FLOW
            // =================================================================
            Opcode::Jump => {
                let destination = self.stack.pop()?;
                self.jump_to(destination)?;
            }

            Opcode::JumpI => {
                let destination = self.stack.pop()?;
                let condition = self.stack.pop()?;
                if !condition.is_zero() {
                    self.jump_to(destination)?;
                }
            }

            Opcode::Pc => {
                self.stack.push(Word256::from_u64((self.pc - 1) as u64))?;
            }

            Opcode::MSize => {
                self.stack.push(Word256::from_u64(self.memory.len() as u64))?;
            }

            Opcode::Gas => {
                self.stack.push(Word256::from_u64(self.gas_remaining))?;
            }

            Opcode::JumpDest => {
                // Marker only.
            }

            // =================================================================
            // PUSH
            // =================================================================
            Opcode::Push0 => {
                self.stack.push(Word256::ZERO)?;
            }

            Opcode::Push1
            | Opcode::Push2
            | Opcode::Push3
            | Opcode::Push4
            | Opcode::Push5
            | Opcode::Push6
            | Opcode::Push7
            | Opcode::Push8
            | Opcode::Push9
            | Opcode::Push10
            | Opcode::Push11
            | Opcode::Push12
            | Opcode::Push13
            | Opcode::Push14
            | Opcode::Push15
            | Opcode::Push16
            | Opcode::Push17
            | Opcode::Push18
            | Opcode::Push19
            | Opcode::Push20
            | Opcode::Push21
            | Opcode::Push22
            | Opcode::Push23
            | Opcode::Push24
            | Opcode::Push25
            | Opcode::Push26
            | Opcode::Push27
            | Opcode::Push28
            | Opcode::Push29
            | Opcode::Push30
            | Opcode::Push31
            | Opcode::Push32 => {
                // Validation guarantees the immediates are present.
                let size = opcode.push_size().unwrap_or(0);
                let mut bytes = [0u8; 32];
                bytes[32 - size..].copy_from_slice(&self.code[self.pc..self.pc + size]);
                self.stack.push(Word256::from_be_bytes(bytes))?;
                self.pc += size;
            }

            // =================================================================
            // DUP & SWAP
            // =================================================================
            Opcode::Dup1 => self.stack.dup(0)?,
            Opcode::Dup2 => self.stack.dup(1)?,
            Opcode::Dup3 => self.stack.dup(2)?,
            Opcode::Dup4 => self.stack.dup(3)?,
            Opcode::Dup5 => self.stack.dup(4)?,
            Opcode::Dup6 => self.stack.dup(5)?,
            Opcode::Dup7 => self.stack.dup(6)?,
            Opcode::Dup8 => self.stack.dup(7)?,

            Opcode::Swap1 => self.stack.swap(1)?,
            Opcode::Swap2 => self.stack.swap(2)?,
            Opcode::Swap3 => self.stack.swap(3)?,
            Opcode::Swap4 => self.stack.swap(4)?,
            Opcode::Swap5 => self.stack.swap(5)?,
            Opcode::Swap6 => self.stack.swap(6)?,
            Opcode::Swap7 => self.stack.swap(7)?,
            Opcode::Swap8 => self.stack.swap(8)?,

            // =================================================================
            // TERMINATION
            // =================================================================
            Opcode::Return => {
                let offset = self.stack.pop()?;
                let len = self.pop_len()?;
                let offset = self.charge_memory(offset, len)?;
                self.return_data = self.memory.read_bytes(offset, len as usize);
                self.halted = true;
            }

            Opcode::Revert => {
                let offset = self.stack.pop()?;
                let len = self.pop_len()?;
                let offset = self.charge_memory(offset, len)?;
                self.return_data = self.memory.read_bytes(offset, len as usize);
                return Err(VmError::Revert);
            }

            Opcode::Invalid => {
                return Err(VmError::InvalidInstruction(Opcode::Invalid as u8));
            }

            Opcode::SelfDestruct => {
                let beneficiary = Address::from_word(self.stack.pop()?);
                self.host
                    .self_destruct(&self.context.contract, &beneficiary)?;
                self.halted = true;
            }
        }

        Ok(())
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn bool_word(value: bool) -> Word256 {
    if value {
        Word256::ONE
    } else {
        Word256::ZERO
    }
}

/// Arithmetic shift right: fills with the sign bit.
fn sar(value: Word256, shift: Word256) -> Word256 {
    let negative = value.bit(255);
    match shift.to_u64() {
        Ok(s) if s < 256 => {
            let s = s as u32;
            let shifted = value.shr(s);
            if negative && s > 0 {
                shifted | Word256::MAX.shl(256 - s)
            } else {
                shifted
            }
        }
        _ => {
            if negative {
                Word256::MAX
            } else {
                Word256::ZERO
            }
        }
    }
}

/// Copies from `source` at `offset` into `out`, zero-filling out of range.
fn copy_padded(source: &[u8], offset: Word256, out: &mut [u8]) {
    let Ok(start) = offset.to_u64() else {
        return; // Entirely out of range; out is already zeroed.
    };
    for (i, byte) in out.iter_mut().enumerate() {
        let pos = u128::from(start) + i as u128;
        if pos < source.len() as u128 {
            *byte = source[pos as usize];
        }
    }
}

// =============================================================================
// VIRTUAL MACHINE
// =============================================================================

/// The long-lived VM: configuration plus cumulative statistics. Per-execution
/// state lives in [`Interpreter`].
#[derive(Debug, Default)]
pub struct VirtualMachine {
    config: VmConfig,
    total_executions: u64,
    total_gas_used: u64,
    total_instructions: u64,
}

impl VirtualMachine {
    /// Creates a VM with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a VM with explicit configuration.
    #[must_use]
    pub fn with_config(config: VmConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Validates and executes `context.code`, reporting the outcome.
    ///
    /// Never panics and never leaks an error: every failure becomes a tagged
    /// `ExecutionResult`. On `OutOfGas` the full limit is reported consumed;
    /// every other failure reports gas up to the failing instruction.
    pub fn execute<H>(&mut self, context: &ExecutionContext, host: &mut H) -> ExecutionResult
    where
        H: StateAccess + BlockHashes,
    {
        let result = match validate_bytecode(&context.code) {
            Ok(jump_dests) => {
                let mut interp = Interpreter::new(context, host, jump_dests, self.config);
                let outcome = interp.run();
                let gas_used = context.gas_limit - interp.gas_remaining;
                self.total_instructions += interp.instructions;

                match outcome {
                    Ok(()) => {
                        ExecutionResult::success(std::mem::take(&mut interp.return_data), gas_used)
                    }
                    Err(VmError::OutOfGas) => {
                        ExecutionResult::failure(VmError::OutOfGas.tag(), Vec::new(), context.gas_limit)
                    }
                    Err(VmError::Revert) => ExecutionResult::failure(
                        VmError::Revert.tag(),
                        std::mem::take(&mut interp.return_data),
                        gas_used,
                    ),
                    Err(err) => {
                        warn!(error = %err, pc = interp.pc, "execution failed");
                        ExecutionResult::failure(err.tag(), Vec::new(), gas_used)
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "bytecode validation failed");
                ExecutionResult::failure(err.tag(), Vec::new(), 0)
            }
        };

        self.total_executions += 1;
        self.total_gas_used += result.gas_used;
        debug!(
            success = result.success,
            gas_used = result.gas_used,
            "execution finished"
        );
        result
    }

    /// Cumulative statistics.
    #[must_use]
    pub fn stats(&self) -> VmStats {
        VmStats {
            total_executions: self.total_executions,
            total_gas_used: self.total_gas_used,
            total_instructions: self.total_instructions,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
