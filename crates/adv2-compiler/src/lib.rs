//! Front end and code generator for the adv2 adventure language: lexer,
//! parser, semantic analyzer, and bytecode emitter. Produces an
//! `adv2_bytecode::Image` from adv2 source text.

pub mod ast;
pub mod codegen;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod semant;
pub mod token;

use adv2_bytecode::Image;
use error::CompileError;
use lexer::Lexer;
use parser::Parser;

/// Maximum `include` nesting depth before `IncludeDepthExceeded` is raised,
/// guarding against an include cycle running away.
const MAX_INCLUDE_DEPTH: usize = 16;

/// Reads file contents for `include "FILE";` splicing. The CLI supplies a
/// filesystem-backed implementation; tests can supply an in-memory one.
pub trait IncludeResolver {
    fn read(&self, path: &str) -> Result<String, String>;
}

/// Splices `include "FILE";` directives into `source` before lexing,
/// recursively, depth-first, replacing each directive with the named
/// file's full (and itself already-spliced) contents.
pub fn preprocess_includes(
    source: &str,
    resolver: &dyn IncludeResolver,
) -> Result<String, CompileError> {
    preprocess_includes_at_depth(source, resolver, 0)
}

fn preprocess_includes_at_depth(
    source: &str,
    resolver: &dyn IncludeResolver,
    depth: usize,
) -> Result<String, CompileError> {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(pos) = rest.find("include") {
        let (before, after_kw) = rest.split_at(pos);
        let after_kw = &after_kw[b"include".len()..];
        let trimmed = after_kw.trim_start();
        let Some(quote_rest) = trimmed.strip_prefix('"') else {
            out.push_str(before);
            out.push_str("include");
            rest = after_kw;
            continue;
        };
        let Some(end) = quote_rest.find('"') else {
            out.push_str(before);
            out.push_str("include");
            rest = after_kw;
            continue;
        };
        let path = &quote_rest[..end];
        let after_path = quote_rest[end + 1..].trim_start();
        let Some(after_semi) = after_path.strip_prefix(';') else {
            out.push_str(before);
            out.push_str("include");
            rest = after_kw;
            continue;
        };

        if depth + 1 >= MAX_INCLUDE_DEPTH {
            return Err(CompileError::IncludeDepthExceeded {
                path: path.to_string(),
                span: token::Span::default(),
            });
        }
        out.push_str(before);
        let included = resolver.read(path).map_err(|reason| CompileError::IncludeFailed {
            path: path.to_string(),
            reason,
            span: token::Span::default(),
        })?;
        let spliced = preprocess_includes_at_depth(&included, resolver, depth + 1)?;
        out.push_str(&spliced);
        rest = after_semi;
    }
    out.push_str(rest);
    Ok(out)
}

/// Parse adv2 source into an AST, without running semantic analysis or
/// codegen. `file_name` is used only for error rendering.
pub fn parse(source: &str) -> Result<ast::Program, Vec<CompileError>> {
    let tokens = Lexer::new(source).tokenize().map_err(|lex_errors| {
        lex_errors
            .into_iter()
            .map(|e| CompileError::Syntax {
                found: e.message,
                expected: "a valid token".to_string(),
                span: e.span,
            })
            .collect::<Vec<_>>()
    })?;
    Parser::new(tokens, source).parse_program()
}

/// Render a batch of compile errors as caret-annotated diagnostic text.
pub fn render(file_name: &str, source: &str, errors: &[CompileError]) -> String {
    error::render_errors(file_name, source, errors)
}

/// Run the full pipeline — parse, analyze, generate — using the default
/// `asm { ... }` assembler. This is what `adv2c` calls once `include`
/// splicing has already produced a single self-contained source string.
pub fn compile(source: &str) -> Result<Image, Vec<CompileError>> {
    compile_with(source, &codegen::StubAssembler)
}

/// Like [`compile`], but with a caller-supplied `asm { ... }` line assembler
/// in place of the built-in [`codegen::StubAssembler`].
pub fn compile_with(
    source: &str,
    asm: &dyn codegen::LineAssembler,
) -> Result<Image, Vec<CompileError>> {
    let program = parse(source)?;
    let result = semant::analyze(&program)?;
    codegen::generate_with(&result, asm)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MapResolver(std::collections::HashMap<&'static str, &'static str>);

    impl IncludeResolver for MapResolver {
        fn read(&self, path: &str) -> Result<String, String> {
            self.0.get(path).map(|s| s.to_string()).ok_or_else(|| "not found".to_string())
        }
    }

    #[test]
    fn splices_single_include() {
        let mut files = std::collections::HashMap::new();
        files.insert("consts.adv", "def MAX = 10;\n");
        let resolver = MapResolver(files);
        let source = r#"include "consts.adv"; def main() { return MAX; }"#;
        let out = preprocess_includes(source, &resolver).unwrap();
        assert!(out.contains("def MAX = 10;"));
        assert!(!out.contains("include"));
    }

    #[test]
    fn splices_nested_includes() {
        let mut files = std::collections::HashMap::new();
        files.insert("a.adv", r#"include "b.adv";"#);
        files.insert("b.adv", "def X = 1;\n");
        let resolver = MapResolver(files);
        let out = preprocess_includes(r#"include "a.adv";"#, &resolver).unwrap();
        assert!(out.contains("def X = 1;"));
    }

    #[test]
    fn missing_include_reports_failure() {
        let resolver = MapResolver(std::collections::HashMap::new());
        let err = preprocess_includes(r#"include "missing.adv";"#, &resolver).unwrap_err();
        assert!(matches!(err, CompileError::IncludeFailed { .. }));
    }

    #[test]
    fn parses_simple_program() {
        let prog = parse("def main() { return 0; }").unwrap();
        assert_eq!(prog.decls.len(), 1);
    }

    #[test]
    fn compile_produces_a_runnable_image() {
        let image = compile("def main() { return 2 + 3; }").unwrap();
        assert!(image.code.len() > 0);
        assert!((image.main_function as usize) < image.code.len());
    }

    #[test]
    fn compile_reports_semantic_errors() {
        let errs = compile("def main() { return undefined_name; }").unwrap_err();
        assert!(!errs.is_empty());
    }
}
