//! Shared support for the `adv2c` and `adv2vm` command-line front ends.
//!
//! File I/O for images and the command-line front ends themselves stays
//! out of the compiler/VM core; this crate is exactly that external
//! collaborator, wiring a filesystem-backed `include` resolver, the
//! `-t TEMPLATE` packager hook, and a symbol-table dump around the two
//! library crates.

pub mod output;

use std::fs;
use std::path::{Path, PathBuf};

use adv2_compiler::semant::{GlobalKind, SemanticResult};
use adv2_compiler::IncludeResolver;

/// Resolves `include "FILE";` paths against the directory of the file that
/// contains the directive, the way a C preprocessor's `#include "..."`
/// does. `base_dir` is the directory of the top-level source file; nested
/// includes are resolved relative to that same directory (a single search
/// directory, not a per-file include stack).
pub struct FsIncludeResolver {
    base_dir: PathBuf,
}

impl FsIncludeResolver {
    pub fn new(source_path: &Path) -> Self {
        let base_dir = source_path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self { base_dir }
    }
}

impl IncludeResolver for FsIncludeResolver {
    fn read(&self, path: &str) -> Result<String, String> {
        let full = self.base_dir.join(path);
        fs::read_to_string(&full).map_err(|e| format!("{}: {e}", full.display()))
    }
}

/// The fixed 8-byte placeholder `adv2-cli`'s `-t` packager looks for inside
/// a template file, after which the compiled image bytes are spliced in.
/// A generalized, caller-supplied template stands in for a hardcoded
/// platform-specific header.
pub const TEMPLATE_MAGIC: &[u8; 8] = b"ADV2TPL\0";

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template `{0}` does not contain the ADV2TPL\\0 placeholder")]
    MagicNotFound(String),
}

/// Splice `image_bytes` into `template_bytes` immediately after the first
/// occurrence of [`TEMPLATE_MAGIC`], keeping everything before it (the
/// host-specific header) and dropping the magic marker itself.
pub fn apply_template(
    template_path: &str,
    template_bytes: &[u8],
    image_bytes: &[u8],
) -> Result<Vec<u8>, TemplateError> {
    let pos = template_bytes
        .windows(TEMPLATE_MAGIC.len())
        .position(|w| w == TEMPLATE_MAGIC)
        .ok_or_else(|| TemplateError::MagicNotFound(template_path.to_string()))?;
    let mut out = Vec::with_capacity(pos + image_bytes.len());
    out.extend_from_slice(&template_bytes[..pos]);
    out.extend_from_slice(image_bytes);
    Ok(out)
}

/// Render the `-s` symbol table dump: one line per global, in declaration-
/// independent (hash-map iteration) order, grouped by storage class.
pub fn render_symbol_table(result: &SemanticResult) -> String {
    let mut lines = Vec::new();
    let mut entries: Vec<(&str, &GlobalKind)> =
        result.globals.iter().map(|(name, sym)| (name, &sym.kind)).collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    for (name, kind) in entries {
        let line = match kind {
            GlobalKind::Constant(value) => format!("constant  {name} = {value}"),
            GlobalKind::Variable { slot } => format!("variable  {name} @ slot {slot}"),
            GlobalKind::ByteArray { slot, len, .. } => {
                format!("byte[]    {name} @ slot {slot}, {len} bytes")
            }
            GlobalKind::Function { index } => format!("function  {name} #{index}"),
            GlobalKind::Object { index } => format!("object    {name} #{index}"),
        };
        lines.push(line);
    }

    let mut tags: Vec<(&str, u32)> = result.tags.iter().collect();
    tags.sort_by_key(|(_, tag)| *tag);
    if !tags.is_empty() {
        lines.push(String::new());
        lines.push("properties:".to_string());
        for (name, tag) in tags {
            lines.push(format!("  {name} = {tag}"));
        }
    }

    lines.join("\n") + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_splice_finds_magic_and_drops_it() {
        let mut template = b"HDR-BYTES".to_vec();
        template.extend_from_slice(TEMPLATE_MAGIC);
        template.extend_from_slice(b"TRAILER");
        let image = b"\x01\x02\x03";
        let out = apply_template("t.bin", &template, image).unwrap();
        assert_eq!(out, b"HDR-BYTES\x01\x02\x03");
    }

    #[test]
    fn template_without_magic_is_an_error() {
        let template = b"no placeholder here".to_vec();
        let err = apply_template("t.bin", &template, b"\x00").unwrap_err();
        assert!(matches!(err, TemplateError::MagicNotFound(_)));
    }

    #[test]
    fn symbol_table_renders_sorted_entries() {
        let program = adv2_compiler::parse("def main() { return 0; } var g; def C = 5;").unwrap();
        let result = adv2_compiler::semant::analyze(&program).unwrap();
        let dump = render_symbol_table(&result);
        assert!(dump.contains("function  main"));
        assert!(dump.contains("variable  g"));
        assert!(dump.contains("constant  C = 5"));
    }
}
