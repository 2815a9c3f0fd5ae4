//! The stack-based bytecode interpreter.
//!
//! Grounded directly in the reference `Execute()` loop: a stack-cache
//! design where the top of the evaluation stack lives in a `tos` register
//! and everything below it lives in `mem`, addressed through `sp`/`fp`.
//! Every opcode case below is a line-for-line port of its C counterpart,
//! adapted to indices into `mem`/`data`/`code` instead of raw pointers —
//! the rewrite's pointer-free addressing applies to the VM's own internals
//! as much as to the image format.
//!
//! Two address spaces flow through `LOAD`/`STORE`/`LOADB`/`STOREB`: a
//! non-negative value is a data-segment byte offset, and a negative value
//! is a stack slot produced by `LADDR` (`encode_stack_addr`/
//! `decode_stack_addr`). This mirrors the reference interpreter's trick of
//! reusing one pointer-sized value to mean either kind of address, without
//! resorting to raw pointers to do it.

use std::io::{Read, Write};
use std::ops::ControlFlow;

use adv2_bytecode::disasm::{decode_one, Operand};
use adv2_bytecode::{Image, Opcode, NIL, P_SHARED};

use crate::error::{ExecResult, VmError};

/// Default evaluation stack depth, in 32-bit slots (64 KiB). Generous for
/// an adventure-game program; `with_stack_slots` can raise or lower it.
pub const DEFAULT_STACK_SLOTS: usize = 16_384;

/// A loaded image plus its mutable run state.
pub struct Vm {
    data: Vec<u8>,
    code: Vec<u8>,
    mem: Vec<i32>,
    sp: usize,
    fp: usize,
    tos: i32,
    efp: Option<usize>,
    pc: usize,
    device: i32,
}

impl Vm {
    pub fn new(image: &Image) -> Self {
        Self::with_stack_slots(image, DEFAULT_STACK_SLOTS)
    }

    pub fn with_stack_slots(image: &Image, stack_slots: usize) -> Self {
        Vm {
            data: image.data.clone(),
            code: image.code.clone(),
            mem: vec![0; stack_slots],
            sp: stack_slots,
            fp: stack_slots,
            tos: 0,
            efp: None,
            pc: image.main_function as usize,
            device: 0,
        }
    }

    /// The last device id selected by `TRAP SET_DEVICE`. Exposed for hosts
    /// that want to route `GET_CHAR`/`PUT_CHAR` to more than one stream;
    /// this interpreter itself only has one input and one output.
    pub fn device(&self) -> i32 {
        self.device
    }

    // ----- stack primitives (mirror Push/Pop/Top/Reserve/Drop/CPush) -----

    fn push(&mut self, value: i32) -> Result<(), VmError> {
        if self.sp == 0 {
            return Err(VmError::StackOverflow);
        }
        self.sp -= 1;
        self.mem[self.sp] = value;
        Ok(())
    }

    fn pop(&mut self) -> Result<i32, VmError> {
        let value = *self.mem.get(self.sp).ok_or(VmError::StackUnderflow)?;
        self.sp += 1;
        Ok(value)
    }

    fn top(&self) -> Result<i32, VmError> {
        self.mem.get(self.sp).copied().ok_or(VmError::StackUnderflow)
    }

    /// `mem[sp + above]`, read-only (used for the saved-fp slot one above
    /// the current top without disturbing `sp`).
    fn peek(&self, above: usize) -> Result<i32, VmError> {
        self.mem.get(self.sp + above).copied().ok_or(VmError::StackUnderflow)
    }

    fn reserve(&mut self, n: usize) -> Result<(), VmError> {
        if self.sp < n {
            return Err(VmError::StackOverflow);
        }
        self.sp -= n;
        Ok(())
    }

    fn drop_n(&mut self, n: usize) -> Result<(), VmError> {
        let new_sp = self.sp + n;
        if new_sp > self.mem.len() {
            return Err(VmError::StackUnderflow);
        }
        self.sp = new_sp;
        Ok(())
    }

    fn frame_index(&self, k: i32) -> Result<usize, VmError> {
        let idx = self.fp as i64 + k as i64;
        if idx < 0 || idx as usize >= self.mem.len() {
            return Err(VmError::InvalidAddress(k));
        }
        Ok(idx as usize)
    }

    fn encode_stack_addr(index: usize) -> i32 {
        !(index as i32)
    }

    fn decode_stack_addr(value: i32) -> usize {
        (!value) as usize
    }

    // ----- data segment access -----

    fn read_data_word(&self, offset: i32) -> Result<i32, VmError> {
        let off = offset as u32 as usize;
        let bytes = self.data.get(off..off + 4).ok_or(VmError::InvalidAddress(offset))?;
        Ok(i32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn write_data_word(&mut self, offset: i32, value: i32) -> Result<(), VmError> {
        let off = offset as u32 as usize;
        let end = off.checked_add(4).filter(|&e| e <= self.data.len());
        let Some(end) = end else { return Err(VmError::InvalidAddress(offset)) };
        self.data[off..end].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    fn read_data_byte(&self, offset: i32) -> Result<i32, VmError> {
        let off = offset as u32 as usize;
        self.data.get(off).copied().map(|b| b as i32).ok_or(VmError::InvalidAddress(offset))
    }

    fn write_data_byte(&mut self, offset: i32, value: i32) -> Result<(), VmError> {
        let off = offset as u32 as usize;
        let slot = self.data.get_mut(off).ok_or(VmError::InvalidAddress(offset))?;
        *slot = value as u8;
        Ok(())
    }

    fn read_cstr(&self, addr: i32) -> Result<Vec<u8>, VmError> {
        let start = addr as u32 as usize;
        let data = self.data.get(start..).ok_or(VmError::InvalidAddress(addr))?;
        let len = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        Ok(data[..len].to_vec())
    }

    /// Word load through either a data-segment offset or a stack address.
    fn read_mem(&self, addr: i32) -> Result<i32, VmError> {
        if addr < 0 {
            let idx = Self::decode_stack_addr(addr);
            self.mem.get(idx).copied().ok_or(VmError::InvalidAddress(addr))
        } else {
            self.read_data_word(addr)
        }
    }

    fn write_mem(&mut self, addr: i32, value: i32) -> Result<(), VmError> {
        if addr < 0 {
            let idx = Self::decode_stack_addr(addr);
            let slot = self.mem.get_mut(idx).ok_or(VmError::InvalidAddress(addr))?;
            *slot = value;
            Ok(())
        } else {
            self.write_data_word(addr, value)
        }
    }

    // ----- object/property lookup (GetPropertyAddr) -----

    /// Walk the `class` chain starting at `object`, looking for a property
    /// whose tag matches `selector` once `P_SHARED` is masked off. Returns
    /// the data-segment offset of the *value* word, not the slot itself —
    /// `SEND` dereferences it for a method's code offset, `PADDR` hands it
    /// back directly for a later `LOAD`/`STORE`.
    fn get_property_addr(&self, object: i32, selector: i32) -> Result<Option<i32>, VmError> {
        let selector = selector as u32;
        let mut obj = object;
        while obj != NIL {
            let n_props = self.read_data_word(obj + 4)? as u32;
            for i in 0..n_props {
                let slot = obj + 8 + (i as i32) * 8;
                let tag = self.read_data_word(slot)? as u32;
                if tag & !P_SHARED == selector {
                    return Ok(Some(slot + 4));
                }
            }
            obj = self.read_data_word(obj)?;
        }
        Ok(None)
    }

    /// Unwind to the nearest enclosing `try` handler, carrying `value`. No
    /// handler means the throw escapes `main` entirely.
    fn throw(&mut self, value: i32) -> Result<ControlFlow<ExecResult>, VmError> {
        let Some(efp) = self.efp else {
            return Ok(ControlFlow::Break(ExecResult::UncaughtThrow(value)));
        };
        self.sp = efp;
        let saved_efp = self.pop()?;
        let saved_fp = self.pop()?;
        let handler_pc = self.pop()?;
        // The fourth saved word (the pre-`TRY` `tos`) is deliberately left
        // in place here; the catch prologue's trailing DROP recovers it.
        self.efp = if saved_efp < 0 { None } else { Some(saved_efp as usize) };
        self.fp = saved_fp as usize;
        self.pc = handler_pc as usize;
        self.tos = value;
        Ok(ControlFlow::Continue(()))
    }

    /// Run until `HALT`, an uncaught `throw`, or a fault.
    pub fn run<R: Read, W: Write>(
        &mut self,
        input: &mut R,
        output: &mut W,
        mut trace: Option<&mut dyn Write>,
    ) -> Result<ExecResult, VmError> {
        loop {
            let insn = decode_one(&self.code, self.pc)?;
            if let Some(w) = trace.as_deref_mut() {
                writeln!(w, "{}  ; sp={} fp={} tos={}", insn, self.sp, self.fp, self.tos)?;
            }
            self.pc = insn.next_offset;

            match insn.opcode {
                Opcode::Halt => return Ok(ExecResult::Halted),

                Opcode::Brt => {
                    let target = branch_target(insn);
                    let cond = self.tos;
                    self.tos = self.pop()?;
                    if cond != 0 {
                        self.pc = target;
                    }
                }
                Opcode::Brf => {
                    let target = branch_target(insn);
                    let cond = self.tos;
                    self.tos = self.pop()?;
                    if cond == 0 {
                        self.pc = target;
                    }
                }
                Opcode::Brtsc => {
                    if self.tos != 0 {
                        self.pc = branch_target(insn);
                    }
                }
                Opcode::Brfsc => {
                    if self.tos == 0 {
                        self.pc = branch_target(insn);
                    }
                }
                Opcode::Br => self.pc = branch_target(insn),

                Opcode::Not => self.tos = if self.tos == 0 { 1 } else { 0 },
                Opcode::Neg => self.tos = self.tos.wrapping_neg(),

                Opcode::Add => {
                    let a = self.pop()?;
                    self.tos = a.wrapping_add(self.tos);
                }
                Opcode::Sub => {
                    let a = self.pop()?;
                    self.tos = a.wrapping_sub(self.tos);
                }
                Opcode::Mul => {
                    let a = self.pop()?;
                    self.tos = a.wrapping_mul(self.tos);
                }
                Opcode::Div => {
                    let a = self.pop()?;
                    self.tos = if self.tos == 0 { 0 } else { a.wrapping_div(self.tos) };
                }
                Opcode::Rem => {
                    let a = self.pop()?;
                    self.tos = if self.tos == 0 { 0 } else { a.wrapping_rem(self.tos) };
                }

                Opcode::Bnot => self.tos = !self.tos,
                Opcode::Band => {
                    let a = self.pop()?;
                    self.tos = a & self.tos;
                }
                Opcode::Bor => {
                    let a = self.pop()?;
                    self.tos = a | self.tos;
                }
                Opcode::Bxor => {
                    let a = self.pop()?;
                    self.tos = a ^ self.tos;
                }
                Opcode::Shl => {
                    let a = self.pop()?;
                    self.tos = a.wrapping_shl(self.tos as u32);
                }
                Opcode::Shr => {
                    let a = self.pop()?;
                    self.tos = a.wrapping_shr(self.tos as u32);
                }

                Opcode::Lt => {
                    let a = self.pop()?;
                    self.tos = (a < self.tos) as i32;
                }
                Opcode::Le => {
                    let a = self.pop()?;
                    self.tos = (a <= self.tos) as i32;
                }
                Opcode::Eq => {
                    let a = self.pop()?;
                    self.tos = (a == self.tos) as i32;
                }
                Opcode::Ne => {
                    let a = self.pop()?;
                    self.tos = (a != self.tos) as i32;
                }
                Opcode::Ge => {
                    let a = self.pop()?;
                    self.tos = (a >= self.tos) as i32;
                }
                Opcode::Gt => {
                    let a = self.pop()?;
                    self.tos = (a > self.tos) as i32;
                }

                Opcode::Lit | Opcode::Daddr => {
                    let imm = operand_i32(insn.operand);
                    self.push(self.tos)?;
                    self.tos = imm;
                }
                Opcode::Slit => {
                    let imm = operand_i32(insn.operand);
                    self.push(self.tos)?;
                    self.tos = imm;
                }

                Opcode::Load => self.tos = self.read_mem(self.tos)?,
                Opcode::Loadb => self.tos = self.read_byte_addr(self.tos)?,
                Opcode::Store => {
                    let addr = self.pop()?;
                    self.write_mem(addr, self.tos)?;
                }
                Opcode::Storeb => {
                    let addr = self.pop()?;
                    self.write_byte_addr(addr, self.tos)?;
                }

                Opcode::Laddr => {
                    let k = operand_i32(insn.operand);
                    let idx = self.frame_index(k)?;
                    self.push(self.tos)?;
                    self.tos = Self::encode_stack_addr(idx);
                }
                Opcode::Index => {
                    let base = self.pop()?;
                    self.tos = base.wrapping_add(self.tos.wrapping_mul(4));
                }
                Opcode::Bindex => {
                    let base = self.pop()?;
                    self.tos = base.wrapping_add(self.tos);
                }

                Opcode::Call => {
                    let callee = self.tos;
                    self.tos = self.pc as i32;
                    self.pc = callee as u32 as usize;
                }
                Opcode::Frame => {
                    let n = operand_i32(insn.operand) as usize;
                    let old_fp = self.fp as i32;
                    self.fp = self.sp;
                    self.reserve(n)?;
                    self.mem[self.sp] = old_fp;
                }
                Opcode::Return | Opcode::Returnz => {
                    if insn.opcode == Opcode::Returnz {
                        self.push(self.tos)?;
                        self.tos = 0;
                    }
                    let ret_pc = self.top()?;
                    let saved_fp = self.peek(1)?;
                    self.sp = self.fp;
                    let ret_pc_usize = ret_pc as u32 as usize;
                    let argc = if ret_pc_usize == 0 {
                        0
                    } else {
                        *self
                            .code
                            .get(ret_pc_usize - 1)
                            .ok_or(VmError::InvalidCodeOffset(ret_pc))? as usize
                    };
                    self.drop_n(argc)?;
                    self.fp = saved_fp as u32 as usize;
                    self.pc = ret_pc_usize;
                }

                Opcode::Drop => self.tos = self.pop()?,
                Opcode::Dup => self.push(self.tos)?,
                Opcode::Tuck => {
                    let b = self.tos;
                    let a = self.pop()?;
                    self.push(b)?;
                    self.push(a)?;
                    self.tos = b;
                }
                Opcode::Swap => {
                    let mem_top = self.top()?;
                    self.mem[self.sp] = self.tos;
                    self.tos = mem_top;
                }

                Opcode::Trap => self.do_trap(operand_i32(insn.operand) as u8, input, output)?,

                Opcode::Send => {
                    let selector = self.tos;
                    self.tos = self.pc as i32;
                    let receiver = self.top()?;
                    let class_base = self.peek(1)?;
                    let search_from = if class_base != NIL { class_base } else { receiver };
                    match self.get_property_addr(search_from, selector)? {
                        Some(value_addr) => {
                            let method_pc = self.read_data_word(value_addr)?;
                            self.pc = method_pc as u32 as usize;
                        }
                        None => {
                            if let ControlFlow::Break(result) = self.throw(1)? {
                                return Ok(result);
                            }
                        }
                    }
                }
                Opcode::Paddr => {
                    let tag = self.tos;
                    let object = self.pop()?;
                    match self.get_property_addr(object, tag)? {
                        Some(value_addr) => self.tos = value_addr,
                        None => {
                            if let ControlFlow::Break(result) = self.throw(1)? {
                                return Ok(result);
                            }
                        }
                    }
                }
                Opcode::Class => self.tos = self.read_data_word(self.tos)?,

                Opcode::Try => {
                    let handler_pc = branch_target(insn) as i32;
                    self.push(self.tos)?;
                    self.push(handler_pc)?;
                    self.push(self.fp as i32)?;
                    let encoded_efp = self.efp.map(|i| i as i32).unwrap_or(-1);
                    self.push(encoded_efp)?;
                    self.efp = Some(self.sp);
                }
                Opcode::Tryexit => {
                    let encoded_efp = self.pop()?;
                    let saved_fp = self.pop()?;
                    self.drop_n(1)?;
                    self.tos = self.pop()?;
                    self.efp = if encoded_efp < 0 { None } else { Some(encoded_efp as usize) };
                    self.fp = saved_fp as usize;
                }
                Opcode::Throw => {
                    let value = self.tos;
                    if let ControlFlow::Break(result) = self.throw(value)? {
                        return Ok(result);
                    }
                }
            }
        }
    }

    fn read_byte_addr(&self, addr: i32) -> Result<i32, VmError> {
        if addr < 0 {
            return Err(VmError::InvalidAddress(addr));
        }
        self.read_data_byte(addr)
    }

    fn write_byte_addr(&mut self, addr: i32, value: i32) -> Result<(), VmError> {
        if addr < 0 {
            return Err(VmError::InvalidAddress(addr));
        }
        self.write_data_byte(addr, value)
    }

    fn do_trap<R: Read, W: Write>(
        &mut self,
        trap_no: u8,
        input: &mut R,
        output: &mut W,
    ) -> Result<(), VmError> {
        use adv2_bytecode::trap;
        match trap_no {
            trap::GET_CHAR => {
                self.push(self.tos)?;
                let mut buf = [0u8; 1];
                let n = input.read(&mut buf)?;
                self.tos = if n == 0 { -1 } else { buf[0] as i32 };
            }
            trap::PUT_CHAR => {
                output.write_all(&[self.tos as u8])?;
                self.tos = self.pop()?;
            }
            trap::PRINT_STR => {
                let bytes = self.read_cstr(self.tos)?;
                output.write_all(&bytes)?;
                self.tos = self.pop()?;
            }
            trap::PRINT_INT => {
                write!(output, "{}", self.tos)?;
                self.tos = self.pop()?;
            }
            trap::PRINT_TAB => output.write_all(b"\t")?,
            trap::PRINT_NEWLINE => output.write_all(b"\n")?,
            trap::PRINT_FLUSH => output.flush()?,
            trap::SET_DEVICE => {
                self.device = self.tos;
                self.tos = self.pop()?;
            }
            other => return Err(VmError::UnknownTrap(other)),
        }
        Ok(())
    }
}

fn operand_i32(operand: Operand) -> i32 {
    match operand {
        Operand::Signed(v) => v,
        Operand::Unsigned(v) => v as i32,
        Operand::None => 0,
    }
}

/// PC-relative branch offsets are relative to the position right after the
/// 16-bit offset field, matching `patch_branch`'s `target - (slot + 2)`.
fn branch_target(insn: adv2_bytecode::disasm::DecodedInstruction) -> usize {
    let offset = operand_i32(insn.operand) as i64;
    (insn.next_offset as i64 + offset) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use adv2_bytecode::encoder::BytecodeWriter;

    fn image_from(mut w: BytecodeWriter, main_at: u32) -> Image {
        Image { data: vec![0u8; 16], strings: Vec::new(), code: w.into_bytes(), main_function: main_at }
    }

    #[test]
    fn halts_on_sentinel() {
        // main() { } -- an empty body, just FRAME then an implicit return.
        let mut w = BytecodeWriter::new();
        w.emit_opcode(Opcode::Halt); // offset 0, the bootstrap return target
        let main_at = w.offset() as u32;
        w.emit_opcode(Opcode::Frame);
        w.emit_u8(1);
        w.emit_opcode(Opcode::Returnz);
        let image = image_from(w, main_at);
        let mut vm = Vm::new(&image);
        let mut input = std::io::empty();
        let mut output = Vec::new();
        let result = vm.run(&mut input, &mut output, None).unwrap();
        assert_eq!(result, ExecResult::Halted);
    }

    #[test]
    fn arithmetic_and_print_int() {
        // main() { print 2 + 3; return; }
        let mut w = BytecodeWriter::new();
        w.emit_opcode(Opcode::Halt);
        let main_at = w.offset() as u32;
        w.emit_opcode(Opcode::Frame);
        w.emit_u8(1);
        w.emit_opcode(Opcode::Slit);
        w.emit_i8(2);
        w.emit_opcode(Opcode::Slit);
        w.emit_i8(3);
        w.emit_opcode(Opcode::Add);
        w.emit_opcode(Opcode::Trap);
        w.emit_u8(adv2_bytecode::trap::PRINT_INT);
        w.emit_opcode(Opcode::Returnz);
        let image = image_from(w, main_at);
        let mut vm = Vm::new(&image);
        let mut input = std::io::empty();
        let mut output = Vec::new();
        let result = vm.run(&mut input, &mut output, None).unwrap();
        assert_eq!(result, ExecResult::Halted);
        assert_eq!(output, b"5");
    }

    #[test]
    fn uncaught_throw_is_reported_not_panicked() {
        let mut w = BytecodeWriter::new();
        w.emit_opcode(Opcode::Halt);
        let main_at = w.offset() as u32;
        w.emit_opcode(Opcode::Frame);
        w.emit_u8(1);
        w.emit_opcode(Opcode::Slit);
        w.emit_i8(42);
        w.emit_opcode(Opcode::Throw);
        let image = image_from(w, main_at);
        let mut vm = Vm::new(&image);
        let mut input = std::io::empty();
        let mut output = Vec::new();
        let result = vm.run(&mut input, &mut output, None).unwrap();
        assert_eq!(result, ExecResult::UncaughtThrow(42));
    }

    #[test]
    fn stack_address_encoding_round_trips() {
        assert_eq!(Vm::decode_stack_addr(Vm::encode_stack_addr(0)), 0);
        assert_eq!(Vm::decode_stack_addr(Vm::encode_stack_addr(17)), 17);
        assert!(Vm::encode_stack_addr(0) < 0, "stack addresses must be negative");
    }
}
