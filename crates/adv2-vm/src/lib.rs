//! Stack-based bytecode interpreter for adv2 images.
//!
//! [`Vm`] owns the loaded image's segments plus the run state (evaluation
//! stack, frame pointer, exception-handler chain, program counter) and
//! [`Vm::run`] drives it to completion against caller-supplied `Read`/`Write`
//! streams for `TRAP GET_CHAR`/`PUT_CHAR`/`PRINT_*`.

mod error;
mod interp;

pub use error::{ExecResult, VmError};
pub use interp::{Vm, DEFAULT_STACK_SLOTS};
