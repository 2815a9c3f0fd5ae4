//! Lexer for the adv2 language, built on `logos`.
//!
//! Keywords are not overridable; identifiers are case-sensitive. `//` line
//! comments and `/* ... */` block comments (which may span lines) are
//! skipped. Single-character punctuation that isn't one of the recognized
//! multi-character operators is returned by the caller as its own token
//! carrying the raw ASCII byte.

use crate::token::{Span, Token};
use logos::Logos;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+")]
enum Raw {
    #[token("\n")]
    Newline,

    #[regex(r"//[^\n]*", logos::skip)]
    LineComment,

    #[token("/*", lex_block_comment)]
    BlockComment,

    #[token("def")]
    Def,
    #[token("var")]
    Var,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("do")]
    Do,
    #[token("while")]
    While,
    #[token("continue")]
    Continue,
    #[token("break")]
    Break,
    #[token("return")]
    Return,
    #[token("object")]
    Object,
    #[token("class")]
    Class,
    #[token("property")]
    Property,
    #[token("method")]
    Method,
    #[token("shared")]
    Shared,
    #[token("super")]
    Super,
    #[token("try")]
    Try,
    #[token("catch")]
    Catch,
    #[token("finally")]
    Finally,
    #[token("throw")]
    Throw,
    #[token("byte")]
    Byte,
    #[token("asm")]
    Asm,
    #[token("print")]
    Print,
    #[token("println")]
    Println,
    #[token("include")]
    Include,

    #[token("<<=")]
    ShlEq,
    #[token(">>=")]
    ShrEq,
    #[token("<=")]
    Le,
    #[token("==")]
    EqEq,
    #[token("!=")]
    Ne,
    #[token(">=")]
    Ge,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("%=")]
    PercentEq,
    #[token("&=")]
    AndEq,
    #[token("|=")]
    OrEq,
    #[token("^=")]
    CaretEq,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Identifier(String),

    #[regex(r"0[xX][0-9a-fA-F]+", parse_hex)]
    #[regex(r"0[bB][01]+", parse_binary)]
    #[regex(r"[0-9]+", parse_decimal)]
    Number(i32),

    #[token("\"", lex_string)]
    String(Vec<u8>),

    // Any other single ASCII byte is returned verbatim as punctuation.
    #[regex(r".", |lex| lex.slice().as_bytes()[0])]
    Punct(u8),
}

fn lex_block_comment(lex: &mut logos::Lexer<Raw>) -> logos::Skip {
    let remainder = lex.remainder();
    if let Some(end) = remainder.find("*/") {
        lex.bump(end + 2);
    } else {
        lex.bump(remainder.len());
    }
    logos::Skip
}

fn parse_hex(lex: &mut logos::Lexer<Raw>) -> Option<i32> {
    i64::from_str_radix(&lex.slice()[2..], 16).ok().map(|v| v as i32)
}

fn parse_binary(lex: &mut logos::Lexer<Raw>) -> Option<i32> {
    i64::from_str_radix(&lex.slice()[2..], 2).ok().map(|v| v as i32)
}

fn parse_decimal(lex: &mut logos::Lexer<Raw>) -> Option<i32> {
    lex.slice().parse::<i64>().ok().map(|v| v as i32)
}

fn lex_string(lex: &mut logos::Lexer<Raw>) -> Result<Vec<u8>, ()> {
    let remainder = lex.remainder();
    let mut bytes = Vec::new();
    let mut chars = remainder.char_indices();
    loop {
        match chars.next() {
            None => return Err(()),
            Some((i, '"')) => {
                lex.bump(i + 1);
                return Ok(bytes);
            }
            Some((_, '\\')) => match chars.next() {
                Some((_, 'n')) => bytes.push(b'\n'),
                Some((_, 't')) => bytes.push(b'\t'),
                Some((_, 'r')) => bytes.push(b'\r'),
                Some((_, '\\')) => bytes.push(b'\\'),
                Some((_, '"')) => bytes.push(b'"'),
                Some((_, '0')) => bytes.push(0),
                Some((_, other)) => {
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
                }
                None => return Err(()),
            },
            Some((_, c)) => {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

pub struct Lexer<'a> {
    source: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { source }
    }

    pub fn tokenize(self) -> Result<Vec<(Token, Span)>, Vec<LexError>> {
        let mut raw = Raw::lexer(self.source);
        let mut out = Vec::new();
        let mut errors = Vec::new();
        let mut line = 1u32;
        let mut column = 1u32;
        let mut last_end = 0usize;

        while let Some(result) = raw.next() {
            let range = raw.span();
            for c in self.source[last_end..range.start].chars() {
                if c == '\n' {
                    line += 1;
                    column = 1;
                } else {
                    column += 1;
                }
            }
            let start_line = line;
            let start_col = column;
            for c in self.source[range.start..range.end].chars() {
                if c == '\n' {
                    line += 1;
                    column = 1;
                } else {
                    column += 1;
                }
            }
            last_end = range.end;
            let span = Span::new(range.start, range.end, start_line, start_col);

            match result {
                Ok(Raw::Newline) => out.push((Token::Eol, span)),
                Ok(Raw::LineComment) | Ok(Raw::BlockComment) => {}
                Ok(Raw::Def) => out.push((Token::Def, span)),
                Ok(Raw::Var) => out.push((Token::Var, span)),
                Ok(Raw::If) => out.push((Token::If, span)),
                Ok(Raw::Else) => out.push((Token::Else, span)),
                Ok(Raw::For) => out.push((Token::For, span)),
                Ok(Raw::Do) => out.push((Token::Do, span)),
                Ok(Raw::While) => out.push((Token::While, span)),
                Ok(Raw::Continue) => out.push((Token::Continue, span)),
                Ok(Raw::Break) => out.push((Token::Break, span)),
                Ok(Raw::Return) => out.push((Token::Return, span)),
                Ok(Raw::Object) => out.push((Token::Object, span)),
                Ok(Raw::Class) => out.push((Token::Class, span)),
                Ok(Raw::Property) => out.push((Token::Property, span)),
                Ok(Raw::Method) => out.push((Token::Method, span)),
                Ok(Raw::Shared) => out.push((Token::Shared, span)),
                Ok(Raw::Super) => out.push((Token::Super, span)),
                Ok(Raw::Try) => out.push((Token::Try, span)),
                Ok(Raw::Catch) => out.push((Token::Catch, span)),
                Ok(Raw::Finally) => out.push((Token::Finally, span)),
                Ok(Raw::Throw) => out.push((Token::Throw, span)),
                Ok(Raw::Byte) => out.push((Token::Byte, span)),
                Ok(Raw::Asm) => out.push((Token::Asm, span)),
                Ok(Raw::Print) => out.push((Token::Print, span)),
                Ok(Raw::Println) => out.push((Token::Println, span)),
                Ok(Raw::Include) => out.push((Token::Include, span)),
                Ok(Raw::ShlEq) => out.push((Token::ShlEq, span)),
                Ok(Raw::ShrEq) => out.push((Token::ShrEq, span)),
                Ok(Raw::Le) => out.push((Token::Le, span)),
                Ok(Raw::EqEq) => out.push((Token::EqEq, span)),
                Ok(Raw::Ne) => out.push((Token::Ne, span)),
                Ok(Raw::Ge) => out.push((Token::Ge, span)),
                Ok(Raw::Shl) => out.push((Token::Shl, span)),
                Ok(Raw::Shr) => out.push((Token::Shr, span)),
                Ok(Raw::AndAnd) => out.push((Token::AndAnd, span)),
                Ok(Raw::OrOr) => out.push((Token::OrOr, span)),
                Ok(Raw::PlusPlus) => out.push((Token::PlusPlus, span)),
                Ok(Raw::MinusMinus) => out.push((Token::MinusMinus, span)),
                Ok(Raw::PlusEq) => out.push((Token::PlusEq, span)),
                Ok(Raw::MinusEq) => out.push((Token::MinusEq, span)),
                Ok(Raw::StarEq) => out.push((Token::StarEq, span)),
                Ok(Raw::SlashEq) => out.push((Token::SlashEq, span)),
                Ok(Raw::PercentEq) => out.push((Token::PercentEq, span)),
                Ok(Raw::AndEq) => out.push((Token::AndEq, span)),
                Ok(Raw::OrEq) => out.push((Token::OrEq, span)),
                Ok(Raw::CaretEq) => out.push((Token::CaretEq, span)),
                Ok(Raw::Identifier(s)) => out.push((Token::Identifier(s), span)),
                Ok(Raw::Number(n)) => out.push((Token::Number(n), span)),
                Ok(Raw::String(b)) => out.push((Token::String(b), span)),
                Ok(Raw::Punct(b)) => out.push((Token::Punct(b), span)),
                Err(()) => errors.push(LexError {
                    message: format!("unexpected character near byte {}", range.start),
                    span,
                }),
            }
        }

        let eof_span = Span::new(self.source.len(), self.source.len(), line, column);
        out.push((Token::Eof, eof_span));

        if errors.is_empty() {
            Ok(out)
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Token> {
        Lexer::new(src).tokenize().unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        let t = toks("def foo");
        assert_eq!(t[0], Token::Def);
        assert_eq!(t[1], Token::Identifier("foo".to_string()));
    }

    #[test]
    fn numbers_decimal_hex_binary() {
        assert_eq!(toks("42")[0], Token::Number(42));
        assert_eq!(toks("0x2A")[0], Token::Number(42));
        assert_eq!(toks("0b101010")[0], Token::Number(42));
    }

    #[test]
    fn multi_char_operators_prefer_longest_match() {
        assert_eq!(toks("<<=")[0], Token::ShlEq);
        assert_eq!(toks("<<")[0], Token::Shl);
        assert_eq!(toks("<=")[0], Token::Le);
    }

    #[test]
    fn string_literal_with_escapes() {
        let t = toks(r#""a\nb""#);
        assert_eq!(t[0], Token::String(vec![b'a', b'\n', b'b']));
    }

    #[test]
    fn block_comment_spans_lines() {
        let t = toks("/* a\nb */ def");
        assert_eq!(t[0], Token::Def);
    }

    #[test]
    fn single_char_punctuation_carries_ascii_value() {
        assert_eq!(toks("{")[0], Token::Punct(b'{'));
        assert_eq!(toks("[")[0], Token::Punct(b'['));
    }
}
