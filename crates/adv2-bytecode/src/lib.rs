//! Opcode table and binary image format shared by the adv2 compiler and
//! virtual machine. Neither of those crates depends on the other; both
//! depend only on this one, so an image produced by any conforming
//! compiler runs on any conforming VM.

pub mod disasm;
pub mod encoder;
pub mod image;
pub mod opcode;

pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use image::{Image, ImageError, ImageHeader, HEADER_LEN};
pub use opcode::{trap, Opcode};

/// `NIL` is the universal "no value" / "no object" sentinel. Data-segment
/// offset 0 is reserved so no valid object ever has offset 0.
pub const NIL: i32 = 0;

/// Top bit of a property tag marks it `shared` (inherited by lookup, not
/// copied into subclass headers).
pub const P_SHARED: u32 = 0x8000_0000;
