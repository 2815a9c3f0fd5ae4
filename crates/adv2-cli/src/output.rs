//! Shared colored output helpers for the `adv2c`/`adv2vm` binaries.
//!
//! A thin `termcolor` wrapper so both binaries format errors and banners
//! the same way instead of duplicating `ColorSpec` boilerplate.

use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// `NO_COLOR` always wins; otherwise auto-detect whether stderr is a TTY.
pub fn resolve_color_choice() -> ColorChoice {
    if std::env::var_os("NO_COLOR").is_some() {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    }
}

/// Print a single `error: {message}` line to stderr in bold red, matching
/// the "message on standard error" exit-code contract of the CLI front ends.
pub fn print_error(message: &str) {
    let mut stderr = StandardStream::stderr(resolve_color_choice());
    let mut spec = ColorSpec::new();
    spec.set_fg(Some(Color::Red)).set_bold(true);
    let _ = stderr.set_color(&spec);
    let _ = write!(stderr, "error");
    let _ = stderr.reset();
    let _ = writeln!(stderr, ": {message}");
}

/// Print pre-rendered caret diagnostics (already multi-line) without extra
/// decoration — `codespan_reporting` has already done the styling work.
pub fn print_diagnostics(rendered: &str) {
    eprint!("{rendered}");
}
