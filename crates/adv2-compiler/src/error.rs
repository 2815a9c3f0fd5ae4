//! Compile-time error kinds and caret-style rendering.

use crate::token::Span;
use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFile;
use codespan_reporting::term::{self, termcolor::Buffer};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error("unexpected token: {found}, expected {expected}")]
    Syntax { found: String, expected: String, span: Span },

    #[error("unterminated string literal")]
    UnterminatedString { span: Span },

    #[error("unterminated comment")]
    UnterminatedComment { span: Span },

    #[error("`{name}` is already defined as a {prior_class}")]
    Redefinition { name: String, prior_class: &'static str, span: Span },

    #[error("`{name}` redefines an already-defined symbol")]
    AlreadyDefined { name: String, span: Span },

    #[error("object `{name}` has too many properties")]
    TooManyProperties { name: String, span: Span },

    #[error("division by zero in constant expression")]
    ConstantDivideByZero { span: Span },

    #[error("constant expression expected")]
    ConstantExpected { span: Span },

    #[error("`{name}` is already a shared property on the parent class and cannot be overwritten as non-shared")]
    SharedPropertyConflict { name: String, span: Span },

    #[error("`super` may only be used inside a method")]
    SuperOutsideMethod { span: Span },

    #[error("data segment exhausted")]
    DataSegmentFull,

    #[error("code segment exhausted")]
    CodeSegmentFull,

    #[error("string segment exhausted")]
    StringSegmentFull,

    #[error("undefined symbol `{name}` referenced but never defined")]
    UndefinedSymbol { name: String },

    #[error("no function named `main` with storage class function")]
    MissingMain,

    #[error("`break` used outside a loop")]
    BreakOutsideLoop { span: Span },

    #[error("`continue` used outside a loop")]
    ContinueOutsideLoop { span: Span },

    #[error("include depth exceeded (possible cycle) including `{path}`")]
    IncludeDepthExceeded { path: String, span: Span },

    #[error("cannot include `{path}`: {reason}")]
    IncludeFailed { path: String, reason: String, span: Span },

    #[error("invalid assembly line: {reason}")]
    AsmError { reason: String, span: Span },
}

impl CompileError {
    pub fn span(&self) -> Option<Span> {
        use CompileError::*;
        match self {
            Syntax { span, .. }
            | UnterminatedString { span }
            | UnterminatedComment { span }
            | Redefinition { span, .. }
            | AlreadyDefined { span, .. }
            | TooManyProperties { span, .. }
            | ConstantDivideByZero { span }
            | ConstantExpected { span }
            | SharedPropertyConflict { span, .. }
            | SuperOutsideMethod { span }
            | BreakOutsideLoop { span }
            | ContinueOutsideLoop { span }
            | IncludeDepthExceeded { span, .. }
            | IncludeFailed { span, .. }
            | AsmError { span, .. } => Some(*span),
            DataSegmentFull | CodeSegmentFull | StringSegmentFull | UndefinedSymbol { .. } | MissingMain => None,
        }
    }
}

/// Render a batch of errors as file name, line number, and a caret under
/// the offending token.
pub fn render_errors(file_name: &str, source: &str, errors: &[CompileError]) -> String {
    let file = SimpleFile::new(file_name, source);
    let mut buffer = Buffer::no_color();
    let config = term::Config::default();

    for err in errors {
        let diagnostic = match err.span() {
            Some(span) => Diagnostic::error()
                .with_message(err.to_string())
                .with_labels(vec![Label::primary((), span.start..span.end)]),
            None => Diagnostic::error().with_message(err.to_string()),
        };
        let _ = term::emit(&mut buffer, &config, &file, &diagnostic);
    }

    String::from_utf8_lossy(buffer.as_slice()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_caret_under_span() {
        let src = "def main() { x }";
        let span = Span::new(13, 14, 1, 14);
        let errors = vec![CompileError::UndefinedSymbol { name: "x".to_string() }
            .clone()];
        // UndefinedSymbol has no span by design (reported at link time); use
        // a spanned variant to exercise the caret path instead.
        let spanned = vec![CompileError::ConstantExpected { span }];
        let rendered = render_errors("t.adv", src, &spanned);
        assert!(rendered.contains("t.adv"));
        let _ = errors;
    }
}
