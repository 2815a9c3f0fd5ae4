//! Semantic analysis: symbol resolution, local-slot assignment, object and
//! property layout, and string interning. Runs after parsing and before
//! codegen; it does not rewrite the AST, it builds the tables codegen walks
//! the AST alongside.

pub mod layout;

use std::collections::HashSet;

use rustc_hash::FxHashMap;

use crate::ast::*;
use crate::error::CompileError;
use crate::token::Span;
use layout::{ObjectLayout, PropertyValue, TagTable};

#[derive(Debug, Clone)]
pub enum GlobalKind {
    Constant(i32),
    /// Slot index within the globals data block (one word per slot).
    Variable { slot: u32 },
    /// Slot index within the byte-addressed globals region.
    ByteArray { slot: u32, len: u32, init: Vec<u8> },
    Function { index: u32 },
    Object { index: u32 },
}

#[derive(Debug, Clone)]
pub struct GlobalSymbol {
    pub kind: GlobalKind,
}

#[derive(Debug, Default)]
pub struct GlobalTable {
    by_name: FxHashMap<String, GlobalSymbol>,
    pub variable_count: u32,
    pub byte_region_size: u32,
}

impl GlobalTable {
    pub fn get(&self, name: &str) -> Option<&GlobalSymbol> {
        self.by_name.get(name)
    }

    /// Every global, name alongside kind — for the `-s` symbol table dump.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &GlobalSymbol)> {
        self.by_name.iter().map(|(name, sym)| (name.as_str(), sym))
    }

    /// Every byte-addressed global's region-relative slot and initializer,
    /// for splicing into the byte-array region of the data segment.
    pub fn byte_arrays(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.by_name.values().filter_map(|s| match &s.kind {
            GlobalKind::ByteArray { slot, init, .. } => Some((*slot, init.as_slice())),
            _ => None,
        })
    }

    fn define(
        &mut self,
        name: &str,
        span: Span,
        kind: GlobalKind,
        prior_class: &'static str,
    ) -> Result<(), CompileError> {
        if self.by_name.contains_key(name) {
            return Err(CompileError::Redefinition { name: name.to_string(), prior_class, span });
        }
        self.by_name.insert(name.to_string(), GlobalSymbol { kind });
        Ok(())
    }
}

/// Flat, per-function local/argument slot assignment. Both `var` declared
/// at the top of the function and `for (var ...)` inline declarations share
/// one flat namespace, in first-encounter order.
///
/// `catch (e)` bindings are not part of this namespace: they get their own
/// slots past the end of `locals`, one per live try-nesting depth rather
/// than one per name, so two sibling (non-nested) `try`/`catch` blocks can
/// both bind `e` without colliding — only nested trys need distinct slots,
/// since only those can have more than one catch binding live at once.
#[derive(Debug, Default, Clone)]
pub struct FunctionLocals {
    pub params: Vec<String>,
    pub locals: Vec<String>,
    /// Deepest live `try` nesting reached anywhere in the function body.
    pub max_try_depth: u32,
}

impl FunctionLocals {
    pub fn arg_slot(&self, name: &str) -> Option<u32> {
        self.params.iter().position(|p| p == name).map(|i| i as u32)
    }

    pub fn local_slot(&self, name: &str) -> Option<u32> {
        self.locals.iter().position(|p| p == name).map(|i| i as u32)
    }

    /// Slot for a `catch` binding at live try-nesting `depth` (1 = outermost
    /// live try). Sits right after the ordinary locals; depth 1 and depth 1
    /// of an unrelated sibling try share the same slot, since they are never
    /// live at the same time.
    pub fn catch_slot(&self, depth: u32) -> u32 {
        self.locals.len() as u32 + depth - 1
    }

    /// Total stack slots a `FRAME` needs to reserve for this function:
    /// ordinary locals plus one per live try-nesting level.
    pub fn frame_slots(&self) -> u32 {
        self.locals.len() as u32 + self.max_try_depth
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedFunction {
    pub def: FunctionDef,
    pub locals: FunctionLocals,
}

pub struct SemanticResult {
    pub globals: GlobalTable,
    pub tags: TagTable,
    pub objects: Vec<ObjectLayout>,
    pub functions: Vec<ResolvedFunction>,
    /// Method bodies, keyed by (object index in `objects`, property tag name).
    pub methods: FxHashMap<(usize, String), ResolvedFunction>,
    pub strings: StringInterner,
}

/// Deduplicates string literal bytes; each unique string gets one stable
/// index, assigned in first-seen order, matching the way they eventually
/// lay out contiguously at the tail of the data segment.
#[derive(Debug, Default)]
pub struct StringInterner {
    by_bytes: FxHashMap<Vec<u8>, u32>,
    order: Vec<Vec<u8>>,
}

impl StringInterner {
    pub fn intern(&mut self, bytes: &[u8]) -> u32 {
        if let Some(&id) = self.by_bytes.get(bytes) {
            return id;
        }
        let id = self.order.len() as u32;
        self.by_bytes.insert(bytes.to_vec(), id);
        self.order.push(bytes.to_vec());
        id
    }

    pub fn ordered(&self) -> &[Vec<u8>] {
        &self.order
    }

    pub fn index_of(&self, bytes: &[u8]) -> Option<u32> {
        self.by_bytes.get(bytes).copied()
    }
}

/// The three built-in properties that wire objects into a parent/sibling/
/// child tree. Reserved before anything else so their tag numbers (0, 1, 2)
/// never shift no matter what a program declares first, matching the
/// original's `AddProperty(c, "_parent")` trio run ahead of parsing.
pub const PARENT_TAG: &str = "_parent";
pub const SIBLING_TAG: &str = "_sibling";
pub const CHILD_TAG: &str = "_child";

pub fn analyze(program: &Program) -> Result<SemanticResult, Vec<CompileError>> {
    let mut errors = Vec::new();
    let mut globals = GlobalTable::default();
    let mut tags = TagTable::new();
    let mut strings = StringInterner::default();
    let mut functions: Vec<ResolvedFunction> = Vec::new();
    let mut object_defs: Vec<&ObjectDef> = Vec::new();

    // The `_parent`/`_sibling`/`_child` built-ins claim the first three tag
    // numbers, and `_loc` is a plain constant alias for `_parent` — same
    // mechanism as any other `def NAME = expr;`.
    let parent_tag = tags.reserve(PARENT_TAG);
    tags.reserve(SIBLING_TAG);
    tags.reserve(CHILD_TAG);
    if let Err(e) = globals.define(
        "_loc",
        Span::default(),
        GlobalKind::Constant(parent_tag as i32),
        "constant",
    ) {
        errors.push(e);
    }

    // Pass 0: property reservations get first claim on tag numbers.
    for decl in &program.decls {
        if let Decl::PropertyReserve { names, .. } = decl {
            for name in names {
                tags.reserve(name);
            }
        }
    }

    // Pass 1: register every top-level name so forward references (a
    // function calling one declared later, an object naming itself in a
    // method body) resolve regardless of textual order.
    for decl in &program.decls {
        match decl {
            Decl::Const { name, value, span } => match fold_or_err(value, &mut errors) {
                Some(n) => {
                    if let Err(e) = globals.define(name, *span, GlobalKind::Constant(n), "constant") {
                        errors.push(e);
                    }
                }
                None => {}
            },
            Decl::Global { bindings, span } => {
                for (name, init) in bindings {
                    let value = match init {
                        Some(expr) => fold_or_err(expr, &mut errors),
                        None => Some(0),
                    };
                    if value.is_none() {
                        continue;
                    }
                    let slot = globals.variable_count;
                    globals.variable_count += 1;
                    if let Err(e) =
                        globals.define(name, *span, GlobalKind::Variable { slot }, "variable")
                    {
                        errors.push(e);
                    }
                }
            }
            Decl::ByteGlobal { name, size, init, span } => {
                let init_bytes = match init {
                    ByteInit::None => Vec::new(),
                    ByteInit::FromString(bytes) => bytes.clone(),
                };
                let len = match size {
                    Some(expr) => match fold_or_err(expr, &mut errors) {
                        Some(n) if n >= 0 => n as u32,
                        Some(_) => {
                            errors.push(CompileError::ConstantExpected { span: expr.span() });
                            continue;
                        }
                        None => continue,
                    },
                    None => init_bytes.len() as u32,
                };
                let slot = globals.byte_region_size;
                globals.byte_region_size += len.max(init_bytes.len() as u32);
                if let Err(e) = globals.define(
                    name,
                    *span,
                    GlobalKind::ByteArray { slot, len, init: init_bytes },
                    "byte array",
                ) {
                    errors.push(e);
                }
            }
            Decl::Function(fd) => {
                let index = functions.len() as u32;
                match collect_locals(fd) {
                    Ok(locals) => {
                        if let Err(e) = globals.define(
                            &fd.name,
                            fd.span,
                            GlobalKind::Function { index },
                            "function",
                        ) {
                            errors.push(e);
                        }
                        functions.push(ResolvedFunction { def: fd.clone(), locals });
                    }
                    Err(mut errs) => errors.append(&mut errs),
                }
            }
            Decl::Object(def) => {
                object_defs.push(def);
            }
            Decl::PropertyReserve { .. } => {}
        }
    }

    let objects = match layout::build_objects(&object_defs, &mut tags) {
        Ok(objects) => objects,
        Err(mut errs) => {
            errors.append(&mut errs);
            Vec::new()
        }
    };

    for (index, def) in objects.iter().enumerate() {
        if let Err(e) =
            globals.define(&def.name, Span::default(), GlobalKind::Object { index: index as u32 }, "object")
        {
            // Objects are already uniqueness-checked by `build_objects`'s
            // by-name map, but a name collision with a non-object global
            // (a function or constant reusing the same identifier) is only
            // caught here.
            errors.push(e);
        }
    }

    let mut methods = FxHashMap::default();
    for (obj_index, object) in objects.iter().enumerate() {
        for slot in &object.properties {
            match &slot.value {
                PropertyValue::Method(fd) => match collect_locals(fd) {
                    Ok(locals) => {
                        methods.insert(
                            (obj_index, slot.tag_name.clone()),
                            ResolvedFunction { def: fd.clone(), locals },
                        );
                    }
                    Err(mut errs) => errors.append(&mut errs),
                },
                PropertyValue::Const(Expr::Str(bytes, _)) => {
                    strings.intern(bytes);
                }
                PropertyValue::Const(Expr::Ident(name, _)) => {
                    if globals.get(name).is_none() {
                        errors.push(CompileError::UndefinedSymbol { name: name.clone() });
                    }
                }
                PropertyValue::Const(_) => {}
            }
        }
    }

    // Pass 2: walk every body, resolving identifiers and checking
    // control-flow nesting rules.
    for resolved in &functions {
        check_function(resolved, &globals, &mut strings, false, &mut errors);
    }
    for resolved in methods.values() {
        check_function(resolved, &globals, &mut strings, true, &mut errors);
    }

    if !globals.get("main").map(|s| matches!(s.kind, GlobalKind::Function { .. })).unwrap_or(false) {
        errors.push(CompileError::MissingMain);
    }

    if errors.is_empty() {
        Ok(SemanticResult { globals, tags, objects, functions, methods, strings })
    } else {
        Err(errors)
    }
}

fn fold_or_err(expr: &Expr, errors: &mut Vec<CompileError>) -> Option<i32> {
    match expr {
        Expr::Number(n, _) => Some(*n),
        _ => {
            errors.push(CompileError::ConstantExpected { span: expr.span() });
            None
        }
    }
}

/// Flattens a function's locals: the explicit `var` section first, then any
/// `for (var ...)` inline declarations in the order their loops appear in
/// the body. Every local shares one flat namespace per function, so the
/// same name declared twice (even across nested loops) is a redefinition.
fn collect_locals(def: &FunctionDef) -> Result<FunctionLocals, Vec<CompileError>> {
    let mut errors = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut locals = Vec::new();

    for param in &def.params {
        if !seen.insert(param.clone()) {
            errors.push(CompileError::AlreadyDefined { name: param.clone(), span: def.span });
        }
    }

    for local in &def.locals {
        if seen.insert(local.name.clone()) {
            locals.push(local.name.clone());
        } else {
            errors.push(CompileError::AlreadyDefined { name: local.name.clone(), span: def.span });
        }
    }

    let mut try_depth = 0u32;
    let mut max_try_depth = 0u32;
    for stmt in &def.body {
        collect_locals_stmt(stmt, &mut seen, &mut locals, &mut try_depth, &mut max_try_depth, &mut errors);
    }

    if errors.is_empty() {
        Ok(FunctionLocals { params: def.params.clone(), locals, max_try_depth })
    } else {
        Err(errors)
    }
}

fn collect_locals_stmt(
    stmt: &Stmt,
    seen: &mut HashSet<String>,
    locals: &mut Vec<String>,
    try_depth: &mut u32,
    max_try_depth: &mut u32,
    errors: &mut Vec<CompileError>,
) {
    match stmt {
        Stmt::If { then_branch, else_branch, .. } => {
            collect_locals_stmt(then_branch, seen, locals, try_depth, max_try_depth, errors);
            if let Some(e) = else_branch {
                collect_locals_stmt(e, seen, locals, try_depth, max_try_depth, errors);
            }
        }
        Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => {
            collect_locals_stmt(body, seen, locals, try_depth, max_try_depth, errors);
        }
        Stmt::For { init, body, .. } => {
            if let Some(ForInit::VarDecl(decls)) = init {
                for decl in decls {
                    if seen.insert(decl.name.clone()) {
                        locals.push(decl.name.clone());
                    } else {
                        errors.push(CompileError::AlreadyDefined {
                            name: decl.name.clone(),
                            span: Span::default(),
                        });
                    }
                }
            }
            collect_locals_stmt(body, seen, locals, try_depth, max_try_depth, errors);
        }
        Stmt::Block(stmts) => {
            for s in stmts {
                collect_locals_stmt(s, seen, locals, try_depth, max_try_depth, errors);
            }
        }
        Stmt::Try { body, catch, finally, .. } => {
            // Catch-bound names are not added to `seen`/`locals`: they get a
            // slot keyed by live try-nesting depth instead of by name, so
            // sibling (non-nested) try blocks can reuse the same name and
            // the same slot.
            *try_depth += 1;
            *max_try_depth = (*max_try_depth).max(*try_depth);
            collect_locals_stmt(body, seen, locals, try_depth, max_try_depth, errors);
            if let Some((_, handler)) = catch {
                collect_locals_stmt(handler, seen, locals, try_depth, max_try_depth, errors);
            }
            if let Some(f) = finally {
                collect_locals_stmt(f, seen, locals, try_depth, max_try_depth, errors);
            }
            *try_depth -= 1;
        }
        Stmt::Expr(_)
        | Stmt::Return(..)
        | Stmt::Break(_)
        | Stmt::Continue(_)
        | Stmt::Print { .. }
        | Stmt::Throw(..)
        | Stmt::Asm { .. }
        | Stmt::Empty => {}
    }
}

fn check_function(
    resolved: &ResolvedFunction,
    globals: &GlobalTable,
    strings: &mut StringInterner,
    in_method: bool,
    errors: &mut Vec<CompileError>,
) {
    let mut loop_depth = 0u32;
    let mut catch_scopes: Vec<String> = Vec::new();
    for stmt in &resolved.def.body {
        check_stmt(stmt, resolved, globals, strings, in_method, &mut loop_depth, &mut catch_scopes, errors);
    }
}

fn check_stmt(
    stmt: &Stmt,
    f: &ResolvedFunction,
    globals: &GlobalTable,
    strings: &mut StringInterner,
    in_method: bool,
    loop_depth: &mut u32,
    catch_scopes: &mut Vec<String>,
    errors: &mut Vec<CompileError>,
) {
    match stmt {
        Stmt::Expr(e) => check_expr(e, f, globals, strings, in_method, catch_scopes, errors),
        Stmt::If { cond, then_branch, else_branch } => {
            check_expr(cond, f, globals, strings, in_method, catch_scopes, errors);
            check_stmt(then_branch, f, globals, strings, in_method, loop_depth, catch_scopes, errors);
            if let Some(e) = else_branch {
                check_stmt(e, f, globals, strings, in_method, loop_depth, catch_scopes, errors);
            }
        }
        Stmt::While { cond, body } => {
            check_expr(cond, f, globals, strings, in_method, catch_scopes, errors);
            *loop_depth += 1;
            check_stmt(body, f, globals, strings, in_method, loop_depth, catch_scopes, errors);
            *loop_depth -= 1;
        }
        Stmt::DoWhile { body, cond } => {
            *loop_depth += 1;
            check_stmt(body, f, globals, strings, in_method, loop_depth, catch_scopes, errors);
            *loop_depth -= 1;
            check_expr(cond, f, globals, strings, in_method, catch_scopes, errors);
        }
        Stmt::For { init, cond, step, body } => {
            match init {
                Some(ForInit::Expr(e)) => check_expr(e, f, globals, strings, in_method, catch_scopes, errors),
                Some(ForInit::VarDecl(decls)) => {
                    for decl in decls {
                        if let Some(init_expr) = &decl.init {
                            check_expr(init_expr, f, globals, strings, in_method, catch_scopes, errors);
                        }
                    }
                }
                None => {}
            }
            if let Some(c) = cond {
                check_expr(c, f, globals, strings, in_method, catch_scopes, errors);
            }
            if let Some(s) = step {
                check_expr(s, f, globals, strings, in_method, catch_scopes, errors);
            }
            *loop_depth += 1;
            check_stmt(body, f, globals, strings, in_method, loop_depth, catch_scopes, errors);
            *loop_depth -= 1;
        }
        Stmt::Return(value, _) => {
            if let Some(e) = value {
                check_expr(e, f, globals, strings, in_method, catch_scopes, errors);
            }
        }
        Stmt::Break(span) => {
            if *loop_depth == 0 {
                errors.push(CompileError::BreakOutsideLoop { span: *span });
            }
        }
        Stmt::Continue(span) => {
            if *loop_depth == 0 {
                errors.push(CompileError::ContinueOutsideLoop { span: *span });
            }
        }
        Stmt::Block(stmts) => {
            for s in stmts {
                check_stmt(s, f, globals, strings, in_method, loop_depth, catch_scopes, errors);
            }
        }
        Stmt::Print { items, .. } => {
            for item in items {
                if let PrintItem::Value(e) = item {
                    check_expr(e, f, globals, strings, in_method, catch_scopes, errors);
                }
            }
        }
        Stmt::Try { body, catch, finally, .. } => {
            check_stmt(body, f, globals, strings, in_method, loop_depth, catch_scopes, errors);
            if let Some((name, handler)) = catch {
                catch_scopes.push(name.clone());
                check_stmt(handler, f, globals, strings, in_method, loop_depth, catch_scopes, errors);
                catch_scopes.pop();
            }
            if let Some(fin) = finally {
                check_stmt(fin, f, globals, strings, in_method, loop_depth, catch_scopes, errors);
            }
        }
        Stmt::Throw(e, _) => check_expr(e, f, globals, strings, in_method, catch_scopes, errors),
        Stmt::Asm { .. } | Stmt::Empty => {}
    }
}

fn check_expr(
    expr: &Expr,
    f: &ResolvedFunction,
    globals: &GlobalTable,
    strings: &mut StringInterner,
    in_method: bool,
    catch_scopes: &[String],
    errors: &mut Vec<CompileError>,
) {
    match expr {
        Expr::Number(..) => {}
        Expr::Str(bytes, _) => {
            strings.intern(bytes);
        }
        Expr::Ident(name, _) => {
            if name == "self" && in_method {
                // Bound to the implicit receiver slot at codegen time; not
                // a declared local or global.
            } else if catch_scopes.iter().any(|n| n == name) {
                // Bound by an enclosing `catch`; lives past the end of the
                // ordinary locals, resolved by try-nesting depth in codegen.
            } else if f.locals.arg_slot(name).is_none()
                && f.locals.local_slot(name).is_none()
                && globals.get(name).is_none()
                && name != "nil"
            {
                errors.push(CompileError::UndefinedSymbol { name: name.clone() });
            }
        }
        Expr::Unary { expr, .. } => check_expr(expr, f, globals, strings, in_method, catch_scopes, errors),
        Expr::Binary { lhs, rhs, .. } => {
            check_expr(lhs, f, globals, strings, in_method, catch_scopes, errors);
            check_expr(rhs, f, globals, strings, in_method, catch_scopes, errors);
        }
        Expr::LogicalAnd(terms, _) | Expr::LogicalOr(terms, _) => {
            for t in terms {
                check_expr(t, f, globals, strings, in_method, catch_scopes, errors);
            }
        }
        Expr::Ternary { cond, then_expr, else_expr, .. } => {
            check_expr(cond, f, globals, strings, in_method, catch_scopes, errors);
            check_expr(then_expr, f, globals, strings, in_method, catch_scopes, errors);
            check_expr(else_expr, f, globals, strings, in_method, catch_scopes, errors);
        }
        Expr::Assign { target, value, .. } => {
            check_expr(target, f, globals, strings, in_method, catch_scopes, errors);
            check_expr(value, f, globals, strings, in_method, catch_scopes, errors);
        }
        Expr::PreIncDec { target, .. } | Expr::PostIncDec { target, .. } => {
            check_expr(target, f, globals, strings, in_method, catch_scopes, errors);
        }
        Expr::Index { base, index, .. } => {
            check_expr(base, f, globals, strings, in_method, catch_scopes, errors);
            check_expr(index, f, globals, strings, in_method, catch_scopes, errors);
        }
        Expr::Call { callee, args, .. } => {
            check_expr(callee, f, globals, strings, in_method, catch_scopes, errors);
            for a in args {
                check_expr(a, f, globals, strings, in_method, catch_scopes, errors);
            }
        }
        Expr::Send { object, selector, args, span } => {
            match object {
                Some(obj) => check_expr(obj, f, globals, strings, in_method, catch_scopes, errors),
                None => {
                    if !in_method {
                        errors.push(CompileError::SuperOutsideMethod { span: *span });
                    }
                }
            }
            // A bare identifier selector names a property tag, not a
            // local/global value — `look` in `[obj look]` is resolved
            // against the tag table at codegen time, not here. Anything
            // else (a computed selector expression) is checked normally.
            if !matches!(selector.as_ref(), Expr::Ident(..)) {
                check_expr(selector, f, globals, strings, in_method, catch_scopes, errors);
            }
            for a in args {
                check_expr(a, f, globals, strings, in_method, catch_scopes, errors);
            }
        }
        Expr::PropertyRef { object, tag, .. } => {
            check_expr(object, f, globals, strings, in_method, catch_scopes, errors);
            if let Selector::Expr(e) = tag {
                check_expr(e, f, globals, strings, in_method, catch_scopes, errors);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::lexer::Lexer;

    fn analyze_src(src: &str) -> Result<SemanticResult, Vec<CompileError>> {
        let tokens = Lexer::new(src).tokenize().unwrap();
        let program = Parser::new(tokens, src).parse_program().unwrap();
        analyze(&program)
    }

    #[test]
    fn resolves_simple_program() {
        let result = analyze_src("def main() { var x = 1; return x; }").unwrap();
        assert_eq!(result.functions.len(), 1);
        assert_eq!(result.functions[0].locals.locals, vec!["x".to_string()]);
    }

    #[test]
    fn missing_main_is_an_error() {
        let err = analyze_src("def other() { return 0; }").unwrap_err();
        assert!(err.iter().any(|e| matches!(e, CompileError::MissingMain)));
    }

    #[test]
    fn undefined_identifier_is_reported() {
        let err = analyze_src("def main() { return unknown_name; }").unwrap_err();
        assert!(err.iter().any(|e| matches!(e, CompileError::UndefinedSymbol { .. })));
    }

    #[test]
    fn break_outside_loop_is_reported() {
        let err = analyze_src("def main() { break; return 0; }").unwrap_err();
        assert!(err.iter().any(|e| matches!(e, CompileError::BreakOutsideLoop { .. })));
    }

    #[test]
    fn for_loop_var_becomes_flat_local() {
        let result =
            analyze_src("def main() { for (var i = 0; i < 10; i = i + 1) { } return 0; }").unwrap();
        assert_eq!(result.functions[0].locals.locals, vec!["i".to_string()]);
    }

    #[test]
    fn sibling_catch_blocks_may_reuse_the_same_binding_name() {
        let src = r#"
            def main() {
              try { throw 1; } catch (e) { print e; }
              try { throw 2; } catch (e) { print e; }
              return 0;
            }
        "#;
        let result = analyze_src(src).unwrap();
        assert!(result.functions[0].locals.locals.is_empty());
        assert_eq!(result.functions[0].locals.max_try_depth, 1);
    }

    #[test]
    fn nested_try_catch_needs_two_depth_slots() {
        let src = r#"
            def main() {
              try {
                try { throw 1; } catch (inner) { print inner; }
              } catch (outer) { print outer; }
              return 0;
            }
        "#;
        let result = analyze_src(src).unwrap();
        assert_eq!(result.functions[0].locals.max_try_depth, 2);
    }

    #[test]
    fn object_names_resolve_as_globals() {
        let src = "object base { x: 1; } def main() { return base; }";
        let result = analyze_src(src).unwrap();
        assert_eq!(result.objects.len(), 1);
        assert!(matches!(result.globals.get("base").unwrap().kind, GlobalKind::Object { .. }));
    }

    #[test]
    fn super_outside_method_is_reported() {
        let err = analyze_src("def main() { [super look]; return 0; }").unwrap_err();
        assert!(err.iter().any(|e| matches!(e, CompileError::SuperOutsideMethod { .. })));
    }

    #[test]
    fn string_literals_are_interned_once() {
        let result = analyze_src(r#"def main() { print "hi"; print "hi"; return 0; }"#).unwrap();
        assert_eq!(result.strings.ordered().len(), 1);
    }
}
