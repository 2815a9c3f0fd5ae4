//! Single-instruction decoding shared by the compiler's `-d` debug listing
//! and the VM's `-d` trace mode. Neither of those features belongs to the
//! opcode table conceptually, but the decoding logic they both need does,
//! so it lives here rather than being duplicated in `adv2-compiler` and
//! `adv2-vm`.

use crate::encoder::{BytecodeReader, DecodeError};
use crate::opcode::Opcode;

/// The operand of a decoded instruction, already widened to `i32` for
/// display regardless of its wire width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    None,
    Signed(i32),
    Unsigned(u32),
}

/// One decoded instruction: its opcode, operand (if any), the offset it
/// started at, and the offset of the instruction immediately following it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub offset: usize,
    pub opcode: Opcode,
    pub operand: Operand,
    pub next_offset: usize,
}

/// Decode the single instruction starting at `offset` in `code`.
pub fn decode_one(code: &[u8], offset: usize) -> Result<DecodedInstruction, DecodeError> {
    let mut reader = BytecodeReader::at(code, offset);
    let opcode = reader.read_opcode()?;
    let operand = match opcode {
        Opcode::Brt | Opcode::Brtsc | Opcode::Brf | Opcode::Brfsc | Opcode::Br | Opcode::Try => {
            Operand::Signed(reader.read_i16()? as i32)
        }
        Opcode::Lit | Opcode::Daddr => Operand::Signed(reader.read_i32()?),
        Opcode::Slit | Opcode::Laddr => Operand::Signed(reader.read_i8()? as i32),
        Opcode::Frame | Opcode::Call | Opcode::Send | Opcode::Trap => {
            Operand::Unsigned(reader.read_u8()? as u32)
        }
        _ => Operand::None,
    };
    Ok(DecodedInstruction { offset, opcode, operand, next_offset: reader.position() })
}

/// Decode every instruction in `code` from offset 0 to the end, for a
/// static debug listing. Stops at the first decode error.
pub fn decode_all(code: &[u8]) -> Result<Vec<DecodedInstruction>, DecodeError> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let insn = decode_one(code, offset)?;
        offset = insn.next_offset;
        out.push(insn);
    }
    Ok(out)
}

impl std::fmt::Display for DecodedInstruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.operand {
            Operand::None => write!(f, "{:06}  {}", self.offset, self.opcode.name()),
            Operand::Signed(v) => write!(f, "{:06}  {} {}", self.offset, self.opcode.name(), v),
            Operand::Unsigned(v) => write!(f, "{:06}  {} {}", self.offset, self.opcode.name(), v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::BytecodeWriter;

    #[test]
    fn decodes_operand_widths() {
        let mut w = BytecodeWriter::new();
        w.emit_opcode(Opcode::Lit);
        w.emit_i32(-7);
        w.emit_opcode(Opcode::Br);
        w.emit_i16(12);
        w.emit_opcode(Opcode::Dup);
        let code = w.into_bytes();

        let all = decode_all(&code).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].opcode, Opcode::Lit);
        assert_eq!(all[0].operand, Operand::Signed(-7));
        assert_eq!(all[1].opcode, Opcode::Br);
        assert_eq!(all[1].operand, Operand::Signed(12));
        assert_eq!(all[2].opcode, Opcode::Dup);
        assert_eq!(all[2].operand, Operand::None);
        assert_eq!(all[2].next_offset, code.len());
    }

    #[test]
    fn display_formats_mnemonic_and_operand() {
        let mut w = BytecodeWriter::new();
        w.emit_opcode(Opcode::Slit);
        w.emit_i8(5);
        let code = w.into_bytes();
        let insn = decode_one(&code, 0).unwrap();
        assert_eq!(insn.to_string(), "000000  SLIT 5");
    }
}
