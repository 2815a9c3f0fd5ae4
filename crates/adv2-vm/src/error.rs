//! Runtime error and outcome types.
//!
//! `VmError` covers faults that mean the bytecode stream itself cannot be
//! trusted (bad opcode, overflowed stack, out-of-range address) — these are
//! bugs in the compiler or a corrupted image, never something adv2 source
//! can trigger through normal control flow. A `throw` with no matching
//! handler is not a fault; it is reported through `ExecResult::UncaughtThrow`
//! instead, since `main` exiting via an uncaught exception is an ordinary
//! (if unusual) program outcome.

use adv2_bytecode::DecodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("stack overflow")]
    StackOverflow,

    #[error("stack underflow (malformed bytecode)")]
    StackUnderflow,

    #[error("invalid memory address {0}")]
    InvalidAddress(i32),

    #[error("invalid code offset {0}")]
    InvalidCodeOffset(i32),

    #[error("unknown trap number {0}")]
    UnknownTrap(u8),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// How a `run` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecResult {
    /// Execution reached `HALT` (the normal path: `main` returned, unwinding
    /// through the bootstrap return address into the sentinel halt at code
    /// offset 0).
    Halted,
    /// A `throw` unwound past every active `try`, all the way out of `main`.
    /// Carries the thrown value.
    UncaughtThrow(i32),
}
