//! Object and property layout: assigns a global tag number to every
//! property name, and works out each object's final property list by
//! copying a parent's non-shared properties forward and leaving shared
//! ones to be found at runtime by walking the `class` chain.
//!
//! Grounded in `ObjectHdr { class, nProperties, properties[] }` from the
//! reference image format and the legacy `addprop`/`setprop` sketch that
//! copies a class's properties into a new object except those flagged
//! shared.

use std::collections::HashSet;

use rustc_hash::FxHashMap;

use crate::ast::{Expr, FunctionDef, MemberValue, ObjectDef};
use crate::error::CompileError;

/// Mirrors `adv2_bytecode::P_SHARED`; kept local so this module doesn't
/// need to depend on the bytecode crate just for one constant.
pub const SHARED_FLAG: u32 = 0x8000_0000;

/// Guards against runaway inheritance chains; not a wire-format limit
/// (`ObjectHdr.nProperties` is a full word), just a sanity bound.
pub const MAX_PROPERTIES_PER_OBJECT: usize = 1024;

/// A property's compile-time value. Resolved fully only at codegen time,
/// once the final data layout (and therefore every object's and string's
/// address) is known — a property may point at another object or an
/// interned string, not just hold a bare integer.
#[derive(Debug, Clone)]
pub enum PropertyValue {
    Const(Expr),
    Method(FunctionDef),
}

#[derive(Debug, Clone)]
pub struct PropertySlot {
    pub tag_name: String,
    /// Tag number with `SHARED_FLAG` set when the property is shared.
    pub tag: u32,
    pub value: PropertyValue,
}

impl PropertySlot {
    pub fn is_shared(&self) -> bool {
        self.tag & SHARED_FLAG != 0
    }
}

#[derive(Debug, Clone)]
pub struct ObjectLayout {
    pub name: String,
    pub class_name: Option<String>,
    pub properties: Vec<PropertySlot>,
}

/// Assigns a stable tag number per property name, first-come first-served.
/// `property NAME, ...;` reservations are fed in before any object is laid
/// out so that a property referenced dynamically (by a computed selector)
/// gets the same tag number regardless of which object declares it first.
#[derive(Debug, Default)]
pub struct TagTable {
    by_name: FxHashMap<String, u32>,
    next: u32,
}

impl TagTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, name: &str) -> u32 {
        if let Some(&tag) = self.by_name.get(name) {
            return tag;
        }
        let tag = self.next;
        self.next += 1;
        self.by_name.insert(name.to_string(), tag);
        tag
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// Every reserved tag, name alongside number — for the `-s` symbol table
    /// dump.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.by_name.iter().map(|(name, &tag)| (name.as_str(), tag))
    }
}

/// Lays out every `object`/subclass declaration in the program, in
/// declaration order (a subclass must textually follow its superclass, the
/// same single-pass constraint the rest of the language follows).
pub fn build_objects(
    object_defs: &[&ObjectDef],
    tags: &mut TagTable,
) -> Result<Vec<ObjectLayout>, Vec<CompileError>> {
    let mut by_name: FxHashMap<String, usize> = FxHashMap::default();
    let mut layouts: Vec<ObjectLayout> = Vec::new();
    let mut errors = Vec::new();

    for def in object_defs {
        match build_one(def, &by_name, &layouts, tags) {
            Ok(layout) => {
                by_name.insert(def.name.clone(), layouts.len());
                layouts.push(layout);
            }
            Err(mut errs) => errors.append(&mut errs),
        }
    }

    if errors.is_empty() {
        Ok(layouts)
    } else {
        Err(errors)
    }
}

fn build_one(
    def: &ObjectDef,
    by_name: &FxHashMap<String, usize>,
    layouts: &[ObjectLayout],
    tags: &mut TagTable,
) -> Result<ObjectLayout, Vec<CompileError>> {
    let mut errors = Vec::new();

    let parent = match &def.class_name {
        Some(class_name) => match by_name.get(class_name) {
            Some(&idx) => Some(&layouts[idx]),
            None => {
                errors.push(CompileError::UndefinedSymbol { name: class_name.clone() });
                None
            }
        },
        None => None,
    };

    // Every shared property name anywhere in the ancestor chain: a
    // subclass may never redeclare one of these as its own, shared or not.
    let mut shared_ancestor_names: HashSet<String> = HashSet::new();
    if let Some(parent) = parent {
        for slot in &parent.properties {
            if slot.is_shared() {
                shared_ancestor_names.insert(slot.tag_name.clone());
            }
        }
    }

    let own_names: HashSet<&str> = def.members.iter().map(|m| m.tag_name.as_str()).collect();

    let mut properties = Vec::new();
    if let Some(parent) = parent {
        for slot in &parent.properties {
            if slot.is_shared() {
                continue;
            }
            if own_names.contains(slot.tag_name.as_str()) {
                continue;
            }
            properties.push(slot.clone());
        }
    }

    for member in &def.members {
        if shared_ancestor_names.contains(&member.tag_name) {
            errors.push(CompileError::SharedPropertyConflict {
                name: member.tag_name.clone(),
                span: member.span,
            });
            continue;
        }
        let base_tag = tags.reserve(&member.tag_name);
        let tag = if member.shared { base_tag | SHARED_FLAG } else { base_tag };
        let value = match &member.value {
            MemberValue::Method(fd) => PropertyValue::Method(fd.clone()),
            MemberValue::Const(expr) => match expr {
                Expr::Number(..) | Expr::Str(..) | Expr::Ident(..) => {
                    PropertyValue::Const(expr.clone())
                }
                _ => {
                    errors.push(CompileError::ConstantExpected { span: expr.span() });
                    continue;
                }
            },
        };
        let slot = PropertySlot { tag_name: member.tag_name.clone(), tag, value };
        match properties.iter_mut().find(|s| s.tag_name == member.tag_name) {
            Some(existing) => *existing = slot,
            None => properties.push(slot),
        }
    }

    if properties.len() > MAX_PROPERTIES_PER_OBJECT {
        errors.push(CompileError::TooManyProperties { name: def.name.clone(), span: def.span });
    }

    if errors.is_empty() {
        Ok(ObjectLayout { name: def.name.clone(), class_name: def.class_name.clone(), properties })
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ObjectMember;
    use crate::token::Span;

    fn member(shared: bool, tag: &str, value: MemberValue) -> ObjectMember {
        ObjectMember { shared, tag_name: tag.to_string(), value, span: Span::default() }
    }

    fn const_expr(n: i32) -> Expr {
        Expr::Number(n, Span::default())
    }

    #[test]
    fn shared_property_is_not_copied_to_subclass() {
        let mut tags = TagTable::new();
        let base = ObjectDef {
            class_name: None,
            name: "base".to_string(),
            members: vec![member(true, "desc", MemberValue::Const(const_expr(1)))],
            span: Span::default(),
        };
        let derived = ObjectDef {
            class_name: Some("base".to_string()),
            name: "derived".to_string(),
            members: vec![member(false, "hp", MemberValue::Const(const_expr(10)))],
            span: Span::default(),
        };
        let layouts = build_objects(&[&base, &derived], &mut tags).unwrap();
        assert_eq!(layouts[0].properties.len(), 1);
        assert_eq!(layouts[1].properties.len(), 1);
        assert_eq!(layouts[1].properties[0].tag_name, "hp");
    }

    #[test]
    fn non_shared_property_is_copied_to_subclass() {
        let mut tags = TagTable::new();
        let base = ObjectDef {
            class_name: None,
            name: "base".to_string(),
            members: vec![member(false, "hp", MemberValue::Const(const_expr(5)))],
            span: Span::default(),
        };
        let derived = ObjectDef {
            class_name: Some("base".to_string()),
            name: "derived".to_string(),
            members: vec![],
            span: Span::default(),
        };
        let layouts = build_objects(&[&base, &derived], &mut tags).unwrap();
        assert_eq!(layouts[1].properties.len(), 1);
        assert_eq!(layouts[1].properties[0].tag_name, "hp");
        assert!(!layouts[1].properties[0].is_shared());
    }

    #[test]
    fn repeated_own_property_name_overwrites_in_place() {
        let mut tags = TagTable::new();
        let obj = ObjectDef {
            class_name: None,
            name: "foo".to_string(),
            members: vec![
                member(false, "hp", MemberValue::Const(const_expr(5))),
                member(false, "hp", MemberValue::Const(const_expr(10))),
            ],
            span: Span::default(),
        };
        let layouts = build_objects(&[&obj], &mut tags).unwrap();
        assert_eq!(layouts[0].properties.len(), 1);
        match &layouts[0].properties[0].value {
            PropertyValue::Const(Expr::Number(n, _)) => assert_eq!(*n, 10),
            other => panic!("expected overwritten constant, got {other:?}"),
        }
    }

    #[test]
    fn overriding_a_shared_property_is_an_error() {
        let mut tags = TagTable::new();
        let base = ObjectDef {
            class_name: None,
            name: "base".to_string(),
            members: vec![member(true, "hp", MemberValue::Const(const_expr(5)))],
            span: Span::default(),
        };
        let derived = ObjectDef {
            class_name: Some("base".to_string()),
            name: "derived".to_string(),
            members: vec![member(false, "hp", MemberValue::Const(const_expr(1)))],
            span: Span::default(),
        };
        let err = build_objects(&[&base, &derived], &mut tags).unwrap_err();
        assert!(matches!(err[0], CompileError::SharedPropertyConflict { .. }));
    }

    #[test]
    fn tags_are_stable_across_objects_with_same_property_name() {
        let mut tags = TagTable::new();
        let a = ObjectDef {
            class_name: None,
            name: "a".to_string(),
            members: vec![member(false, "x", MemberValue::Const(const_expr(1)))],
            span: Span::default(),
        };
        let b = ObjectDef {
            class_name: None,
            name: "b".to_string(),
            members: vec![member(false, "x", MemberValue::Const(const_expr(2)))],
            span: Span::default(),
        };
        let layouts = build_objects(&[&a, &b], &mut tags).unwrap();
        assert_eq!(layouts[0].properties[0].tag, layouts[1].properties[0].tag);
    }

    #[test]
    fn undefined_superclass_is_reported() {
        let mut tags = TagTable::new();
        let derived = ObjectDef {
            class_name: Some("missing".to_string()),
            name: "derived".to_string(),
            members: vec![],
            span: Span::default(),
        };
        let err = build_objects(&[&derived], &mut tags).unwrap_err();
        assert!(matches!(err[0], CompileError::UndefinedSymbol { .. }));
    }
}
