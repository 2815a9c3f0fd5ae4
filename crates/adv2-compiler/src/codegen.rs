//! Code generator and image builder: walks the resolved AST produced by
//! [`crate::semant`] and emits an `adv2_bytecode::Image`.
//!
//! Grounded in `adv2gen.c`'s `code_*` functions for instruction selection and
//! the branch-fixup technique, and in `adv2com.c`'s `StoreInitializer`/
//! `PlaceStrings`/`ConnectAll` for data-segment layout and the parent/
//! sibling/child wiring pass. Unlike the C compiler (which interleaves
//! parsing and code generation in one pass and therefore needs a live
//! Symbol/Fixup table to patch forward references as they resolve), this
//! generator runs after semantic analysis has already resolved every name,
//! so every data-segment address is known before a single instruction is
//! emitted. Only code-segment addresses of functions and methods are still
//! forward-referenced (a function can call one declared later); those are
//! collected as patch sites during emission and resolved once every body's
//! final position in the concatenated code segment is known — the same
//! "patch later" idea as the original's `Fixup` list, just finite and
//! computed in two passes instead of threaded through the buffer.

use rustc_hash::FxHashMap;

use adv2_bytecode::encoder::BytecodeWriter;
use adv2_bytecode::{opcode::trap, Image, Opcode, NIL, P_SHARED};

use crate::ast::*;
use crate::error::CompileError;
use crate::semant::layout::PropertyValue;
use crate::semant::{GlobalKind, ResolvedFunction, SemanticResult, CHILD_TAG, PARENT_TAG, SIBLING_TAG};

/// One line of `asm { ... }` compiles to exactly one 32-bit word, mirroring
/// `PasmAssemble1(char *line, uint32_t *pValue)` from the reference
/// assembler (itself a line-at-a-time assembler for a different target, but
/// the one-word-per-line contract is what `asm` blocks borrow from it).
pub trait LineAssembler {
    fn assemble(&self, line: &str) -> Result<u32, String>;
}

/// Recognizes only `nop` (assembles to the all-zero word) and
/// `long <constant-expression>` (a decimal or `0x`-prefixed hex integer).
/// Anything else is rejected — real opcode mnemonics are out of scope for a
/// stub, the point is to let a program splice a handful of raw words into
/// its own code without inventing a full inline assembler.
#[derive(Debug, Default)]
pub struct StubAssembler;

impl LineAssembler for StubAssembler {
    fn assemble(&self, line: &str) -> Result<u32, String> {
        let line = line.trim();
        if line == "nop" {
            return Ok(0);
        }
        if let Some(rest) = line.strip_prefix("long") {
            let rest = rest.trim();
            let value = parse_int_literal(rest).ok_or_else(|| format!("bad integer `{rest}`"))?;
            return Ok(value as u32);
        }
        Err(format!("unrecognized asm line `{line}`"))
    }
}

fn parse_int_literal(s: &str) -> Option<i64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2).ok()
    } else {
        s.parse::<i64>().ok()
    }
}

/// Generate an image using the default [`StubAssembler`].
pub fn generate(result: &SemanticResult) -> Result<Image, Vec<CompileError>> {
    generate_with(result, &StubAssembler)
}

pub fn generate_with(
    result: &SemanticResult,
    asm: &dyn LineAssembler,
) -> Result<Image, Vec<CompileError>> {
    let mut errors = Vec::new();

    let mut data_layout = match layout_data(result) {
        Ok(layout) => layout,
        Err(mut errs) => {
            errors.append(&mut errs);
            return Err(errors);
        }
    };

    connect_objects(result, &mut data_layout);

    let code = match emit_code(result, &data_layout, asm) {
        Ok(code) => code,
        Err(mut errs) => {
            errors.append(&mut errs);
            return Err(errors);
        }
    };

    if let Err(mut errs) = apply_pending_data_patches(&mut data_layout, &code) {
        errors.append(&mut errs);
    }

    let Some(main_function) = code.function_base.get(&main_index(result)).copied() else {
        errors.push(CompileError::MissingMain);
        return Err(errors);
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(Image {
        data: data_layout.data,
        strings: Vec::new(),
        code: code.bytes,
        main_function,
    })
}

fn apply_pending_data_patches(
    layout: &mut DataLayout,
    code: &CodeOutput,
) -> Result<(), Vec<CompileError>> {
    let mut errors = Vec::new();
    for (offset, reference) in &layout.pending {
        let target = match reference {
            CodeRef::Function(index) => code.function_base.get(index).copied(),
            CodeRef::Method(obj_index, tag) => code.method_base.get(&(*obj_index, *tag)).copied(),
        };
        match target {
            Some(value) => write_u32(&mut layout.data, *offset, value),
            None => errors.push(CompileError::UndefinedSymbol { name: "<function>".to_string() }),
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn main_index(result: &SemanticResult) -> u32 {
    match result.globals.get("main").map(|s| &s.kind) {
        Some(GlobalKind::Function { index }) => *index,
        _ => u32::MAX,
    }
}

// ===========================================================================
// Data-segment layout
// ===========================================================================

/// Reference to something only resolvable once code has been laid out: a
/// function value or a method value stored in an object property.
#[derive(Debug, Clone, Copy)]
enum CodeRef {
    Function(u32),
    Method(usize, u32),
}

struct DataLayout {
    data: Vec<u8>,
    variable_base: u32,
    byte_region_base: u32,
    object_offset: Vec<u32>,
    string_offset: Vec<u32>,
    /// Byte offsets into `data` that still hold a placeholder zero because
    /// they reference a function or method; patched once code is laid out.
    pending: Vec<(u32, CodeRef)>,
}

const RESERVED_ZERO_WORD: u32 = 4;

fn layout_data(result: &SemanticResult) -> Result<DataLayout, Vec<CompileError>> {
    let mut errors = Vec::new();
    let mut data: Vec<u8> = vec![0u8; RESERVED_ZERO_WORD as usize];

    let variable_base = data.len() as u32;
    data.resize(data.len() + result.globals.variable_count as usize * 4, 0);

    let byte_region_base = data.len() as u32;
    let byte_region_len = (result.globals.byte_region_size as usize + 3) & !3;
    data.resize(data.len() + byte_region_len, 0);
    write_byte_globals(result, &mut data, byte_region_base);

    let mut object_offset = Vec::with_capacity(result.objects.len());
    for object in &result.objects {
        let offset = data.len() as u32;
        object_offset.push(offset);
        data.extend_from_slice(&0u32.to_be_bytes()); // class, patched below
        data.extend_from_slice(&(object.properties.len() as u32).to_be_bytes());
        for _ in &object.properties {
            data.extend_from_slice(&0u32.to_be_bytes()); // tag
            data.extend_from_slice(&0u32.to_be_bytes()); // value
        }
    }

    let mut string_offset = Vec::with_capacity(result.strings.ordered().len());
    for bytes in result.strings.ordered() {
        let offset = data.len() as u32;
        string_offset.push(offset);
        data.extend_from_slice(bytes);
        data.push(0);
    }

    let mut layout = DataLayout {
        data,
        variable_base,
        byte_region_base,
        object_offset,
        string_offset,
        pending: Vec::new(),
    };

    // Fill in each object's class pointer and property tag/value pairs, now
    // that every object and string has a final offset.
    for (index, object) in result.objects.iter().enumerate() {
        let header_offset = layout.object_offset[index];
        let class_offset = match &object.class_name {
            Some(name) => match result.globals.get(name) {
                Some(sym) => match sym.kind {
                    GlobalKind::Object { index: parent_idx } => layout.object_offset[parent_idx as usize],
                    _ => 0,
                },
                None => {
                    errors.push(CompileError::UndefinedSymbol { name: name.clone() });
                    0
                }
            },
            None => 0,
        };
        write_u32(&mut layout.data, header_offset, class_offset);

        for (slot_index, slot) in object.properties.iter().enumerate() {
            let slot_offset = header_offset + 8 + slot_index as u32 * 8;
            write_u32(&mut layout.data, slot_offset, slot.tag);
            match &slot.value {
                PropertyValue::Method(_) => {
                    layout.pending.push((slot_offset + 4, CodeRef::Method(index, slot.tag)));
                }
                PropertyValue::Const(expr) => match resolve_const_value(result, &layout, expr) {
                    Ok(ConstValue::Immediate(v)) => write_u32(&mut layout.data, slot_offset + 4, v as u32),
                    Ok(ConstValue::Function(f)) => {
                        layout.pending.push((slot_offset + 4, CodeRef::Function(f)));
                    }
                    Err(e) => errors.push(e),
                },
            }
        }
    }

    if errors.is_empty() {
        Ok(layout)
    } else {
        Err(errors)
    }
}

fn write_byte_globals(result: &SemanticResult, data: &mut [u8], byte_region_base: u32) {
    for (slot, init) in result.globals.byte_arrays() {
        let start = (byte_region_base + slot) as usize;
        data[start..start + init.len()].copy_from_slice(init);
    }
}

enum ConstValue {
    Immediate(i32),
    Function(u32),
}

fn resolve_const_value(
    result: &SemanticResult,
    layout: &DataLayout,
    expr: &Expr,
) -> Result<ConstValue, CompileError> {
    match expr {
        Expr::Number(n, _) => Ok(ConstValue::Immediate(*n)),
        Expr::Str(bytes, span) => {
            let id = result.strings.index_of(bytes).ok_or(CompileError::ConstantExpected { span: *span })?;
            Ok(ConstValue::Immediate(layout.string_offset[id as usize] as i32))
        }
        Expr::Ident(name, _) => resolve_ident_const(result, layout, name)
            .ok_or_else(|| CompileError::UndefinedSymbol { name: name.clone() }),
        _ => Err(CompileError::ConstantExpected { span: expr.span() }),
    }
}

fn resolve_ident_const(result: &SemanticResult, layout: &DataLayout, name: &str) -> Option<ConstValue> {
    if name == "nil" {
        return Some(ConstValue::Immediate(NIL));
    }
    match &result.globals.get(name)?.kind {
        GlobalKind::Constant(n) => Some(ConstValue::Immediate(*n)),
        GlobalKind::Variable { slot } => Some(ConstValue::Immediate((layout.variable_base + slot * 4) as i32)),
        GlobalKind::ByteArray { slot, .. } => {
            Some(ConstValue::Immediate((layout.byte_region_base + slot) as i32))
        }
        GlobalKind::Object { index } => Some(ConstValue::Immediate(layout.object_offset[*index as usize] as i32)),
        GlobalKind::Function { index } => Some(ConstValue::Function(*index)),
    }
}

fn write_u32(data: &mut [u8], offset: u32, value: u32) {
    data[offset as usize..offset as usize + 4].copy_from_slice(&value.to_be_bytes());
}

/// Link every object with a non-NIL `_parent` property into its parent's
/// child/sibling chain. Walked in reverse declaration order so that, once
/// finished, `_child` points at the *first*-declared child and `_sibling`
/// threads forward through the rest in declaration order — matching
/// `ConnectAll`, which walks `c->objects` (a list built by prepending, so
/// its head is the most recently declared object).
fn connect_objects(result: &SemanticResult, layout: &mut DataLayout) {
    // Reserved ahead of any user declaration in `semant::analyze`, so these
    // are always present once any object exists.
    let parent_tag = result.tags.get(PARENT_TAG).expect("reserved by semant::analyze");
    let sibling_tag = result.tags.get(SIBLING_TAG).expect("reserved by semant::analyze");
    let child_tag = result.tags.get(CHILD_TAG).expect("reserved by semant::analyze");

    for index in (0..result.objects.len()).rev() {
        let header_offset = layout.object_offset[index];
        let Some(parent_value) = get_property(&layout.data, header_offset, parent_tag) else {
            continue;
        };
        if parent_value == 0 {
            continue;
        }
        let parent_offset = parent_value as u32;
        let Some(child_value) = get_property(&layout.data, parent_offset, child_tag) else {
            continue;
        };
        set_property(&mut layout.data, header_offset, sibling_tag, child_value);
        set_property(&mut layout.data, parent_offset, child_tag, header_offset as i32);
    }
}

fn get_property(data: &[u8], object_offset: u32, tag: u32) -> Option<i32> {
    let n_properties = read_u32(data, object_offset + 4);
    for i in 0..n_properties {
        let slot_offset = object_offset + 8 + i * 8;
        let slot_tag = read_u32(data, slot_offset) & !P_SHARED;
        if slot_tag == tag {
            return Some(read_u32(data, slot_offset + 4) as i32);
        }
    }
    None
}

fn set_property(data: &mut [u8], object_offset: u32, tag: u32, value: i32) -> bool {
    let n_properties = read_u32(data, object_offset + 4);
    for i in 0..n_properties {
        let slot_offset = object_offset + 8 + i * 8;
        let slot_tag = read_u32(data, slot_offset) & !P_SHARED;
        if slot_tag == tag {
            write_u32(data, slot_offset + 4, value as u32);
            return true;
        }
    }
    false
}

fn read_u32(data: &[u8], offset: u32) -> u32 {
    let o = offset as usize;
    u32::from_be_bytes([data[o], data[o + 1], data[o + 2], data[o + 3]])
}

// ===========================================================================
// Code-segment emission
// ===========================================================================

struct CodeOutput {
    bytes: Vec<u8>,
    function_base: FxHashMap<u32, u32>,
    method_base: FxHashMap<(usize, u32), u32>,
}

/// `code_*` forward-referencing a function or method still unplaced: patch
/// site expressed as an absolute offset into the final concatenated code
/// segment (computed once every body's base offset is known).
struct PendingCodePatch {
    at: u32,
    target: CodeRef,
}

fn emit_code(
    result: &SemanticResult,
    layout: &DataLayout,
    asm: &dyn LineAssembler,
) -> Result<CodeOutput, Vec<CompileError>> {
    let mut errors = Vec::new();

    // codeBase[0..2] = a fake zero-argument CALL's argument byte followed by
    // HALT, so the initial `tos` (the "return address" for main) points at
    // a clean halt.
    let mut bytes: Vec<u8> = vec![0x00, Opcode::Halt.to_u8()];
    let mut function_base: FxHashMap<u32, u32> = FxHashMap::default();
    let mut method_base: FxHashMap<(usize, u32), u32> = FxHashMap::default();
    let mut patches: Vec<PendingCodePatch> = Vec::new();

    for (index, resolved) in result.functions.iter().enumerate() {
        match emit_function_body(result, layout, resolved, asm) {
            Ok(body) => {
                let base = bytes.len() as u32;
                function_base.insert(index as u32, base);
                for local in body.patches {
                    patches.push(PendingCodePatch { at: base + local.at, target: local.target });
                }
                bytes.extend_from_slice(&body.bytes);
            }
            Err(mut errs) => errors.append(&mut errs),
        }
    }

    for (obj_index, object) in result.objects.iter().enumerate() {
        for slot in &object.properties {
            let PropertyValue::Method(_) = &slot.value else { continue };
            let Some(resolved) = result.methods.get(&(obj_index, slot.tag_name.clone())) else { continue };
            match emit_function_body(result, layout, resolved, asm) {
                Ok(body) => {
                    let base = bytes.len() as u32;
                    method_base.insert((obj_index, slot.tag), base);
                    for local in body.patches {
                        patches.push(PendingCodePatch { at: base + local.at, target: local.target });
                    }
                    bytes.extend_from_slice(&body.bytes);
                }
                Err(mut errs) => errors.append(&mut errs),
            }
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    for patch in &patches {
        let target = match patch.target {
            CodeRef::Function(index) => function_base.get(&index).copied(),
            CodeRef::Method(obj_index, tag) => method_base.get(&(obj_index, tag)).copied(),
        };
        match target {
            Some(offset) => {
                let at = patch.at as usize;
                bytes[at..at + 4].copy_from_slice(&(offset as i32).to_be_bytes());
            }
            None => errors.push(CompileError::UndefinedSymbol { name: "<function>".to_string() }),
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(CodeOutput { bytes, function_base, method_base })
}

struct FunctionBody {
    bytes: Vec<u8>,
    /// Byte offsets (relative to this body's own start) of LIT operands that
    /// need a function/method's final code offset patched in.
    patches: Vec<PendingCodePatch>,
}

/// Per-function codegen state.
struct FnCtx<'a> {
    result: &'a SemanticResult,
    data: &'a DataLayout,
    asm: &'a dyn LineAssembler,
    locals: &'a crate::semant::FunctionLocals,
    is_method: bool,
    writer: BytecodeWriter,
    patches: Vec<PendingCodePatch>,
    blocks: Vec<LoopBlock>,
    /// Live try-nesting depth at the current point of emission (1 = inside
    /// the outermost active `try`). Mirrors `semant::collect_locals_stmt`'s
    /// counter so a catch binding's slot lines up with what `FunctionLocals`
    /// reserved for it.
    try_depth: u32,
    /// Catch bindings currently in scope, name alongside the try-nesting
    /// depth their slot lives at, innermost last.
    catch_scopes: Vec<(String, u32)>,
    errors: Vec<CompileError>,
}

struct LoopBlock {
    continue_known: Option<i64>,
    continue_patches: Vec<usize>,
    break_patches: Vec<usize>,
}

fn emit_function_body(
    result: &SemanticResult,
    layout: &DataLayout,
    resolved: &ResolvedFunction,
    asm: &dyn LineAssembler,
) -> Result<FunctionBody, Vec<CompileError>> {
    let mut ctx = FnCtx {
        result,
        data: layout,
        asm,
        locals: &resolved.locals,
        is_method: resolved.def.is_method,
        writer: BytecodeWriter::new(),
        patches: Vec::new(),
        blocks: Vec::new(),
        try_depth: 0,
        catch_scopes: Vec::new(),
        errors: Vec::new(),
    };

    ctx.writer.emit_opcode(Opcode::Frame);
    ctx.writer.emit_u8(resolved.locals.frame_slots() as u8 + 1);

    for (slot, local) in resolved.def.locals.iter().enumerate() {
        if let Some(init) = &local.init {
            ctx.writer.emit_opcode(Opcode::Laddr);
            ctx.writer.emit_i8(-(slot as i32) as i8 - 1);
            ctx.code_rvalue(init);
            ctx.writer.emit_opcode(Opcode::Store);
            ctx.writer.emit_opcode(Opcode::Drop);
        }
    }

    for stmt in &resolved.def.body {
        ctx.code_statement(stmt);
    }
    ctx.writer.emit_opcode(Opcode::Returnz);

    if ctx.errors.is_empty() {
        Ok(FunctionBody { bytes: ctx.writer.into_bytes(), patches: ctx.patches })
    } else {
        Err(ctx.errors)
    }
}

/// Whether an expression left an address on the stack still needing a
/// `LOAD`/`STORE` (word) or `LOADB`/`STOREB` (byte) to become an rvalue —
/// the Rust stand-in for the C compiler's `PVAL` descriptor.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Addr {
    Word,
    Byte,
}

impl<'a> FnCtx<'a> {
    fn arg_slot(&self, name: &str) -> Option<i8> {
        self.locals.arg_slot(name).map(|i| i as i8 + if self.is_method { 2 } else { 0 })
    }

    fn code_statement(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(e) => {
                self.code_rvalue(e);
                self.writer.emit_opcode(Opcode::Drop);
            }
            Stmt::If { cond, then_branch, else_branch } => self.code_if(cond, then_branch, else_branch.as_deref()),
            Stmt::While { cond, body } => self.code_while(cond, body),
            Stmt::DoWhile { body, cond } => self.code_dowhile(body, cond),
            Stmt::For { init, cond, step, body } => self.code_for(init.as_ref(), cond.as_ref(), step.as_ref(), body),
            Stmt::Return(value, _) => {
                match value {
                    Some(e) => self.code_rvalue(e),
                    None => {
                        self.writer.emit_opcode(Opcode::Slit);
                        self.writer.emit_i8(0);
                    }
                }
                self.writer.emit_opcode(Opcode::Return);
            }
            Stmt::Break(_) => self.code_break_or_continue(true),
            Stmt::Continue(_) => self.code_break_or_continue(false),
            Stmt::Block(stmts) => {
                for s in stmts {
                    self.code_statement(s);
                }
            }
            Stmt::Print { items, newline, .. } => {
                for item in items {
                    match item {
                        PrintItem::Tab => {
                            self.writer.emit_opcode(Opcode::Trap);
                            self.writer.emit_u8(trap::PRINT_TAB);
                        }
                        PrintItem::Value(expr) => {
                            if self.is_string_valued(expr) {
                                self.code_rvalue(expr);
                                self.writer.emit_opcode(Opcode::Trap);
                                self.writer.emit_u8(trap::PRINT_STR);
                            } else {
                                self.code_rvalue(expr);
                                self.writer.emit_opcode(Opcode::Trap);
                                self.writer.emit_u8(trap::PRINT_INT);
                            }
                        }
                    }
                }
                if *newline {
                    self.writer.emit_opcode(Opcode::Trap);
                    self.writer.emit_u8(trap::PRINT_NEWLINE);
                } else {
                    self.writer.emit_opcode(Opcode::Trap);
                    self.writer.emit_u8(trap::PRINT_FLUSH);
                }
            }
            Stmt::Try { body, catch, finally, .. } => self.code_try(body, catch.as_ref(), finally.as_deref()),
            Stmt::Throw(e, _) => {
                self.code_rvalue(e);
                self.writer.emit_opcode(Opcode::Throw);
            }
            Stmt::Asm { lines, .. } => {
                for (line, span) in lines {
                    match self.asm.assemble(line) {
                        Ok(word) => self.writer.emit_i32(word as i32),
                        Err(reason) => self.errors.push(CompileError::AsmError { reason, span: *span }),
                    }
                }
            }
            Stmt::Empty => {}
        }
    }

    fn is_string_valued(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Str(..) => true,
            Expr::Ident(name, _) => {
                matches!(self.result.globals.get(name).map(|s| &s.kind), Some(GlobalKind::ByteArray { .. }))
            }
            _ => false,
        }
    }

    fn code_if(&mut self, cond: &Expr, then_branch: &Stmt, else_branch: Option<&Stmt>) {
        self.code_rvalue(cond);
        self.writer.emit_opcode(Opcode::Brf);
        let nxt = self.writer.offset();
        self.writer.emit_i16(0);
        self.code_statement(then_branch);
        if let Some(else_branch) = else_branch {
            self.writer.emit_opcode(Opcode::Br);
            let end = self.writer.offset();
            self.writer.emit_i16(0);
            self.patch_branch(nxt, self.writer.offset());
            self.code_statement(else_branch);
            self.patch_branch(end, self.writer.offset());
        } else {
            self.patch_branch(nxt, self.writer.offset());
        }
    }

    fn code_while(&mut self, cond: &Expr, body: &Stmt) {
        let top = self.writer.offset();
        self.blocks.push(LoopBlock {
            continue_known: Some(top as i64),
            continue_patches: Vec::new(),
            break_patches: Vec::new(),
        });
        self.code_rvalue(cond);
        self.writer.emit_opcode(Opcode::Brf);
        let end_slot = self.writer.offset();
        self.writer.emit_i16(0);
        self.code_statement(body);
        self.writer.emit_opcode(Opcode::Br);
        let back_slot = self.writer.offset();
        self.writer.emit_i16(0);
        self.patch_branch(back_slot, top);
        self.patch_branch(end_slot, self.writer.offset());
        let block = self.blocks.pop().unwrap();
        let end = self.writer.offset();
        for slot in block.break_patches {
            self.patch_branch(slot, end);
        }
    }

    fn code_dowhile(&mut self, body: &Stmt, cond: &Expr) {
        let top = self.writer.offset();
        self.blocks.push(LoopBlock { continue_known: None, continue_patches: Vec::new(), break_patches: Vec::new() });
        self.code_statement(body);
        let continue_target = self.writer.offset();
        let block = self.blocks.pop().unwrap();
        for slot in &block.continue_patches {
            self.patch_branch(*slot, continue_target);
        }
        self.code_rvalue(cond);
        self.writer.emit_opcode(Opcode::Brt);
        let back_slot = self.writer.offset();
        self.writer.emit_i16(0);
        self.patch_branch(back_slot, top);
        let end = self.writer.offset();
        for slot in block.break_patches {
            self.patch_branch(slot, end);
        }
    }

    fn code_for(&mut self, init: Option<&ForInit>, cond: Option<&Expr>, step: Option<&Expr>, body: &Stmt) {
        match init {
            Some(ForInit::Expr(e)) => {
                self.code_rvalue(e);
                self.writer.emit_opcode(Opcode::Drop);
            }
            Some(ForInit::VarDecl(decls)) => {
                for decl in decls {
                    if let Some(init_expr) = &decl.init {
                        let slot = self.locals.local_slot(&decl.name).expect("local registered by semant");
                        self.writer.emit_opcode(Opcode::Laddr);
                        self.writer.emit_i8(-(slot as i32) as i8 - 1);
                        self.code_rvalue(init_expr);
                        self.writer.emit_opcode(Opcode::Store);
                        self.writer.emit_opcode(Opcode::Drop);
                    }
                }
            }
            None => {}
        }

        let top = self.writer.offset();
        let continue_known = if step.is_none() { Some(top as i64) } else { None };
        self.blocks.push(LoopBlock { continue_known, continue_patches: Vec::new(), break_patches: Vec::new() });

        let mut end_slot = None;
        if let Some(cond) = cond {
            self.code_rvalue(cond);
            self.writer.emit_opcode(Opcode::Brf);
            let slot = self.writer.offset();
            self.writer.emit_i16(0);
            end_slot = Some(slot);
        }

        self.code_statement(body);

        if let Some(step) = step {
            let continue_target = self.writer.offset();
            let block = self.blocks.last().unwrap();
            for slot in block.continue_patches.clone() {
                self.patch_branch(slot, continue_target);
            }
            self.code_rvalue(step);
            self.writer.emit_opcode(Opcode::Drop);
        }

        self.writer.emit_opcode(Opcode::Br);
        let back_slot = self.writer.offset();
        self.writer.emit_i16(0);
        self.patch_branch(back_slot, top);

        let block = self.blocks.pop().unwrap();
        let end = self.writer.offset();
        if let Some(slot) = end_slot {
            self.patch_branch(slot, end);
        }
        for slot in block.break_patches {
            self.patch_branch(slot, end);
        }
    }

    fn code_break_or_continue(&mut self, is_break: bool) {
        let Some(block) = self.blocks.last_mut() else { return };
        self.writer.emit_opcode(Opcode::Br);
        let slot = self.writer.offset();
        self.writer.emit_i16(0);
        if is_break {
            block.break_patches.push(slot);
        } else if let Some(target) = block.continue_known {
            drop(block);
            self.patch_branch(slot, target as usize);
        } else {
            block.continue_patches.push(slot);
        }
    }

    fn code_try(&mut self, body: &Stmt, catch: Option<&(String, Box<Stmt>)>, finally: Option<&Stmt>) {
        self.try_depth += 1;
        let depth = self.try_depth;

        self.writer.emit_opcode(Opcode::Try);
        let catch_slot = self.writer.offset();
        self.writer.emit_i16(0);
        self.code_statement(body);
        self.writer.emit_opcode(Opcode::Tryexit);
        self.writer.emit_opcode(Opcode::Br);
        let finally_slot = self.writer.offset();
        self.writer.emit_i16(0);

        if let Some((name, handler)) = catch {
            self.patch_branch(catch_slot, self.writer.offset());
            let slot = self.locals.catch_slot(depth);
            self.writer.emit_opcode(Opcode::Laddr);
            self.writer.emit_i8(-(slot as i32) as i8 - 1);
            self.writer.emit_opcode(Opcode::Swap);
            self.writer.emit_opcode(Opcode::Store);
            self.writer.emit_opcode(Opcode::Drop);
            self.catch_scopes.push((name.clone(), depth));
            self.code_statement(handler);
            self.catch_scopes.pop();
        }

        self.patch_branch(finally_slot, self.writer.offset());
        if let Some(finally) = finally {
            self.code_statement(finally);
        }
        self.try_depth -= 1;
    }

    fn patch_branch(&mut self, slot: usize, target: usize) {
        let offset = target as i64 - (slot as i64 + 2);
        self.writer.patch_i16(slot, offset as i16);
    }

    /// Evaluate `expr` for its value, loading through any address it left
    /// behind (the C compiler's `rvalue`).
    fn code_rvalue(&mut self, expr: &Expr) {
        if let Some(addr) = self.code_expr(expr) {
            self.emit_load(addr);
        }
    }

    /// Evaluate `expr` as something that must leave a loadable/storable
    /// address on the stack (the C compiler's `code_lvalue`/`chklvalue`).
    fn code_lvalue(&mut self, expr: &Expr) -> Addr {
        match self.code_expr(expr) {
            Some(addr) => addr,
            None => {
                self.errors.push(CompileError::ConstantExpected { span: expr.span() });
                Addr::Word
            }
        }
    }

    fn emit_load(&mut self, addr: Addr) {
        self.writer.emit_opcode(match addr {
            Addr::Word => Opcode::Load,
            Addr::Byte => Opcode::Loadb,
        });
    }

    fn emit_store(&mut self, addr: Addr) {
        self.writer.emit_opcode(match addr {
            Addr::Word => Opcode::Store,
            Addr::Byte => Opcode::Storeb,
        });
    }

    /// Generate code for `expr`, returning `Some(addr)` if it left an
    /// address on the stack still needing a load/store, or `None` if it
    /// already produced a plain value.
    fn code_expr(&mut self, expr: &Expr) -> Option<Addr> {
        match expr {
            Expr::Number(n, _) => {
                self.emit_int_literal(*n);
                None
            }
            Expr::Str(bytes, _) => {
                let id = self.result.strings.index_of(bytes).expect("interned by semant");
                let offset = self.data.string_offset[id as usize];
                self.writer.emit_opcode(Opcode::Lit);
                self.writer.emit_i32(offset as i32);
                None
            }
            Expr::Ident(name, _) => self.code_ident(name),
            Expr::Unary { op, expr, .. } => {
                self.code_rvalue(expr);
                self.writer.emit_opcode(match op {
                    UnOp::Neg => Opcode::Neg,
                    UnOp::Not => Opcode::Not,
                    UnOp::BitNot => Opcode::Bnot,
                });
                None
            }
            Expr::Binary { op, lhs, rhs, .. } => {
                self.code_rvalue(lhs);
                self.code_rvalue(rhs);
                self.writer.emit_opcode(binop_opcode(*op));
                None
            }
            Expr::LogicalOr(terms, _) => {
                self.code_shortcircuit(Opcode::Brtsc, terms);
                None
            }
            Expr::LogicalAnd(terms, _) => {
                self.code_shortcircuit(Opcode::Brfsc, terms);
                None
            }
            Expr::Ternary { cond, then_expr, else_expr, .. } => {
                self.code_rvalue(cond);
                self.writer.emit_opcode(Opcode::Brf);
                let nxt = self.writer.offset();
                self.writer.emit_i16(0);
                self.code_rvalue(then_expr);
                self.writer.emit_opcode(Opcode::Br);
                let end = self.writer.offset();
                self.writer.emit_i16(0);
                self.patch_branch(nxt, self.writer.offset());
                self.code_rvalue(else_expr);
                self.patch_branch(end, self.writer.offset());
                None
            }
            Expr::Assign { op, target, value, .. } => {
                // STORE consumes (addr, value) from the top of the stack;
                // TUCK leaves a copy of the stored value behind so the
                // assignment can itself be used as a value (`x = y = 5;`).
                if *op == AssignOp::Assign {
                    let addr = self.code_lvalue(target);
                    self.code_rvalue(value);
                    self.writer.emit_opcode(Opcode::Tuck);
                    self.emit_store(addr);
                } else {
                    let addr = self.code_lvalue(target);
                    self.writer.emit_opcode(Opcode::Dup);
                    self.emit_load(addr);
                    self.code_rvalue(value);
                    self.writer.emit_opcode(compound_opcode(*op));
                    self.writer.emit_opcode(Opcode::Tuck);
                    self.emit_store(addr);
                }
                None
            }
            Expr::PreIncDec { inc, target, .. } => {
                let addr = self.code_lvalue(target);
                self.writer.emit_opcode(Opcode::Dup);
                self.emit_load(addr);
                self.writer.emit_opcode(Opcode::Slit);
                self.writer.emit_i8(if *inc { 1 } else { -1 });
                self.writer.emit_opcode(Opcode::Add);
                self.writer.emit_opcode(Opcode::Tuck);
                self.emit_store(addr);
                None
            }
            Expr::PostIncDec { inc, target, .. } => {
                let addr = self.code_lvalue(target);
                self.writer.emit_opcode(Opcode::Dup);
                self.emit_load(addr);
                self.writer.emit_opcode(Opcode::Tuck);
                self.writer.emit_opcode(Opcode::Slit);
                self.writer.emit_i8(if *inc { 1 } else { -1 });
                self.writer.emit_opcode(Opcode::Add);
                self.emit_store(addr);
                None
            }
            Expr::Index { base, index, .. } => {
                let byte = self.is_byte_addressed(base);
                self.code_rvalue(base);
                self.code_rvalue(index);
                self.writer.emit_opcode(if byte { Opcode::Bindex } else { Opcode::Index });
                Some(if byte { Addr::Byte } else { Addr::Word })
            }
            Expr::Call { callee, args, .. } => {
                for arg in args.iter().rev() {
                    self.code_rvalue(arg);
                }
                self.code_rvalue(callee);
                self.writer.emit_opcode(Opcode::Call);
                self.writer.emit_u8(args.len() as u8);
                None
            }
            Expr::Send { object, selector, args, .. } => {
                // Stack on entry to SEND: [args..., class-base, receiver,
                // selector]. `class-base` is where property lookup starts;
                // `receiver` is what gets bound as the callee's `self`. A
                // plain send starts the search at the receiver's own class
                // (class-base = NIL tells the VM "use receiver.class");
                // `super` keeps the same receiver but starts one class
                // higher, so class-base is explicitly `self.class`.
                for arg in args.iter().rev() {
                    self.code_rvalue(arg);
                }
                match object {
                    Some(recv) => {
                        self.writer.emit_opcode(Opcode::Slit);
                        self.writer.emit_i8(NIL as i8);
                        self.code_rvalue(recv);
                    }
                    None => {
                        self.emit_self();
                        self.writer.emit_opcode(Opcode::Class);
                        self.emit_self();
                    }
                }
                self.code_send_selector(selector);
                self.writer.emit_opcode(Opcode::Send);
                self.writer.emit_u8(args.len() as u8 + 2);
                None
            }
            Expr::PropertyRef { object, tag, .. } => {
                self.code_rvalue(object);
                self.code_selector(tag);
                self.writer.emit_opcode(Opcode::Paddr);
                Some(Addr::Word)
            }
        }
    }

    fn emit_self(&mut self) {
        self.writer.emit_opcode(Opcode::Laddr);
        self.writer.emit_i8(0);
        self.writer.emit_opcode(Opcode::Load);
    }

    fn code_selector(&mut self, selector: &Selector) {
        match selector {
            Selector::Name(name) => {
                let tag = self.resolve_tag(name);
                self.emit_int_literal(tag as i32);
            }
            Selector::Expr(e) => self.code_rvalue(e),
        }
    }

    /// `[ object selector args... ]`: a bare identifier selector names a
    /// property tag directly (`look` means "the `look` property", not a
    /// variable read), anything else is an ordinary runtime value.
    fn code_send_selector(&mut self, selector: &Expr) {
        match selector {
            Expr::Ident(name, _) => {
                let tag = self.resolve_tag(name);
                self.emit_int_literal(tag as i32);
            }
            other => self.code_rvalue(other),
        }
    }

    fn resolve_tag(&mut self, name: &str) -> u32 {
        // `_loc` is a plain alias for `_parent`, same mechanism as any other
        // `def NAME = expr;` constant.
        let lookup = if name == "_loc" { PARENT_TAG } else { name };
        match self.result.tags.get(lookup) {
            Some(tag) => tag,
            None => {
                self.errors.push(CompileError::UndefinedSymbol { name: name.to_string() });
                0
            }
        }
    }

    fn is_byte_addressed(&self, base: &Expr) -> bool {
        match base {
            Expr::Ident(name, _) => {
                matches!(self.result.globals.get(name).map(|s| &s.kind), Some(GlobalKind::ByteArray { .. }))
            }
            Expr::Index { .. } => false,
            _ => false,
        }
    }

    fn emit_int_literal(&mut self, n: i32) {
        if (-128..=127).contains(&n) {
            self.writer.emit_opcode(Opcode::Slit);
            self.writer.emit_i8(n as i8);
        } else {
            self.writer.emit_opcode(Opcode::Lit);
            self.writer.emit_i32(n);
        }
    }

    fn code_shortcircuit(&mut self, op: Opcode, terms: &[Expr]) {
        let mut iter = terms.iter();
        let first = iter.next().expect("non-empty chain");
        self.code_rvalue(first);
        let mut end_slots = Vec::new();
        for term in iter {
            self.writer.emit_opcode(op);
            let slot = self.writer.offset();
            self.writer.emit_i16(0);
            end_slots.push(slot);
            self.code_rvalue(term);
        }
        let end = self.writer.offset();
        for slot in end_slots {
            self.patch_branch(slot, end);
        }
    }

    fn code_ident(&mut self, name: &str) -> Option<Addr> {
        if name == "self" && self.is_method {
            self.writer.emit_opcode(Opcode::Laddr);
            self.writer.emit_i8(0);
            return Some(Addr::Word);
        }
        if let Some((_, depth)) = self.catch_scopes.iter().rev().find(|(n, _)| n == name) {
            let slot = self.locals.catch_slot(*depth);
            self.writer.emit_opcode(Opcode::Laddr);
            self.writer.emit_i8(-(slot as i32) as i8 - 1);
            return Some(Addr::Word);
        }
        if let Some(offset) = self.arg_slot(name) {
            self.writer.emit_opcode(Opcode::Laddr);
            self.writer.emit_i8(offset);
            return Some(Addr::Word);
        }
        if let Some(slot) = self.locals.local_slot(name) {
            self.writer.emit_opcode(Opcode::Laddr);
            self.writer.emit_i8(-(slot as i32) as i8 - 1);
            return Some(Addr::Word);
        }
        if name == "nil" {
            self.emit_int_literal(NIL);
            return None;
        }
        match self.result.globals.get(name).map(|s| s.kind.clone()) {
            Some(GlobalKind::Constant(n)) => {
                self.emit_int_literal(n);
                None
            }
            Some(GlobalKind::Variable { slot }) => {
                let addr = self.data.variable_base + slot * 4;
                self.writer.emit_opcode(Opcode::Lit);
                self.writer.emit_i32(addr as i32);
                Some(Addr::Word)
            }
            Some(GlobalKind::ByteArray { slot, .. }) => {
                let addr = self.data.byte_region_base + slot;
                self.writer.emit_opcode(Opcode::Lit);
                self.writer.emit_i32(addr as i32);
                None
            }
            Some(GlobalKind::Object { index }) => {
                let addr = self.data.object_offset[index as usize];
                self.writer.emit_opcode(Opcode::Lit);
                self.writer.emit_i32(addr as i32);
                None
            }
            Some(GlobalKind::Function { index }) => {
                self.writer.emit_opcode(Opcode::Lit);
                let at = self.writer.offset();
                self.writer.emit_i32(0);
                self.patches.push(PendingCodePatch { at: at as u32, target: CodeRef::Function(index) });
                None
            }
            None => {
                self.errors.push(CompileError::UndefinedSymbol { name: name.to_string() });
                None
            }
        }
    }
}

fn binop_opcode(op: BinOp) -> Opcode {
    match op {
        BinOp::Add => Opcode::Add,
        BinOp::Sub => Opcode::Sub,
        BinOp::Mul => Opcode::Mul,
        BinOp::Div => Opcode::Div,
        BinOp::Rem => Opcode::Rem,
        BinOp::BitAnd => Opcode::Band,
        BinOp::BitOr => Opcode::Bor,
        BinOp::BitXor => Opcode::Bxor,
        BinOp::Shl => Opcode::Shl,
        BinOp::Shr => Opcode::Shr,
        BinOp::Lt => Opcode::Lt,
        BinOp::Le => Opcode::Le,
        BinOp::Eq => Opcode::Eq,
        BinOp::Ne => Opcode::Ne,
        BinOp::Ge => Opcode::Ge,
        BinOp::Gt => Opcode::Gt,
    }
}

fn compound_opcode(op: AssignOp) -> Opcode {
    match op {
        AssignOp::Assign => unreachable!("handled separately"),
        AssignOp::Add => Opcode::Add,
        AssignOp::Sub => Opcode::Sub,
        AssignOp::Mul => Opcode::Mul,
        AssignOp::Div => Opcode::Div,
        AssignOp::Rem => Opcode::Rem,
        AssignOp::BitAnd => Opcode::Band,
        AssignOp::BitOr => Opcode::Bor,
        AssignOp::BitXor => Opcode::Bxor,
        AssignOp::Shl => Opcode::Shl,
        AssignOp::Shr => Opcode::Shr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adv2_bytecode::disasm;

    fn compile_ok(src: &str) -> Image {
        crate::compile(src).unwrap_or_else(|errs| panic!("compile failed: {errs:?}"))
    }

    #[test]
    fn print_with_trailing_dollar_emits_flush_not_newline() {
        let image = compile_ok(r#"def main() { print "x" $; return 0; }"#);
        let insns = disasm::decode_all(&image.code).unwrap();
        let traps: Vec<_> = insns
            .iter()
            .filter(|i| i.opcode == Opcode::Trap)
            .map(|i| match i.operand {
                disasm::Operand::Unsigned(v) => v,
                other => panic!("unexpected trap operand {other:?}"),
            })
            .collect();
        assert!(traps.contains(&(trap::PRINT_FLUSH as u32)));
        assert!(!traps.contains(&(trap::PRINT_NEWLINE as u32)));
    }

    #[test]
    fn print_with_trailing_comma_emits_flush_not_newline() {
        let image = compile_ok(r#"def main() { print "x", ; return 0; }"#);
        let insns = disasm::decode_all(&image.code).unwrap();
        let traps: Vec<_> = insns
            .iter()
            .filter(|i| i.opcode == Opcode::Trap)
            .map(|i| match i.operand {
                disasm::Operand::Unsigned(v) => v,
                other => panic!("unexpected trap operand {other:?}"),
            })
            .collect();
        assert!(traps.contains(&(trap::PRINT_FLUSH as u32)));
        assert!(!traps.contains(&(trap::PRINT_NEWLINE as u32)));
    }

    #[test]
    fn plain_print_emits_newline_not_flush() {
        let image = compile_ok(r#"def main() { print "x"; return 0; }"#);
        let insns = disasm::decode_all(&image.code).unwrap();
        let traps: Vec<_> = insns
            .iter()
            .filter(|i| i.opcode == Opcode::Trap)
            .map(|i| match i.operand {
                disasm::Operand::Unsigned(v) => v,
                other => panic!("unexpected trap operand {other:?}"),
            })
            .collect();
        assert!(traps.contains(&(trap::PRINT_NEWLINE as u32)));
        assert!(!traps.contains(&(trap::PRINT_FLUSH as u32)));
    }

    #[test]
    fn nested_try_reserves_one_frame_slot_per_depth() {
        let image = compile_ok(
            r#"
            def main() {
              try {
                try { throw 1; } catch (inner) { print inner; }
              } catch (outer) { print outer; }
              return 0;
            }
            "#,
        );
        let insns = disasm::decode_all(&image.code).unwrap();
        let frame = insns.iter().find(|i| i.opcode == Opcode::Frame).unwrap();
        // No ordinary locals, two nested try levels, plus the fixed +1.
        assert_eq!(frame.operand, disasm::Operand::Unsigned(3));
    }
}
