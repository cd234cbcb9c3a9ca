//! Generic parameter renaming.
//!
//! Generated code refers to generic parameters by canonical names derived
//! from their `(depth, index)` position, so that declarations written with
//! different parameter names line up. Renaming never mutates a TypeSpec; it
//! builds and returns a new tree.

use std::collections::HashMap;

use crate::decl::FunctionDeclaration;
use crate::entity::{GenericContext, GenericIndex};
use crate::types::TypeSpec;

/// Prefix protocols use to refer to their own associated types.
const SELF_PATH: &str = "Self.";

const DEPTH_LETTERS: &[u8] = b"TUVWABCDEFGHIJKLMN";

/// Canonical name for the generic at `index`: a depth letter followed by the
/// position, `T0`, `T1`, `U0`. Returns `None` past the deepest supported scope.
pub fn canonical_generic_name(index: GenericIndex) -> Option<String> {
    let letter = *DEPTH_LETTERS.get(index.depth)?;
    Some(format!("{}{}", letter as char, index.index))
}

/// Rewrites generic references in a context to their canonical names.
#[derive(Debug, Clone)]
pub struct GenericRenamer {
    names: HashMap<String, String>,
}

impl GenericRenamer {
    pub fn new(ctx: &GenericContext) -> Self {
        let mut names = HashMap::new();
        for (index, name) in ctx.iter() {
            // Inner scopes shadow outer ones; `depth_and_index` already
            // resolves to the innermost declaration.
            if let Some(resolved) = ctx.depth_and_index(name) {
                if resolved == index {
                    if let Some(canonical) = canonical_generic_name(index) {
                        names.insert(name.to_string(), canonical);
                    }
                }
            }
        }
        Self { names }
    }

    /// The canonical name for a generic parameter, if it is one.
    pub fn canonical(&self, name: &str) -> Option<&str> {
        self.names.get(name).map(String::as_str)
    }

    pub fn rename(&self, spec: &TypeSpec) -> TypeSpec {
        spec.map_named(&mut |named| {
            if !named.generic_args.is_empty() {
                return None;
            }
            if let Some(canonical) = self.names.get(&named.name) {
                return Some(TypeSpec::named(canonical.clone()));
            }
            if let Some(associated) = named.name.strip_prefix(SELF_PATH) {
                if let Some(canonical) = self.names.get(associated) {
                    return Some(TypeSpec::named(canonical.clone()));
                }
            }
            // Associated type paths keep their tail: `T.Element` -> `T0.Element`.
            let (head, tail) = named.name.split_once('.')?;
            self.names
                .get(head)
                .map(|canonical| TypeSpec::named(format!("{canonical}.{tail}")))
        })
    }

    /// A copy of `func` with every generic reference in its signature renamed.
    pub fn rename_member(&self, func: &FunctionDeclaration) -> FunctionDeclaration {
        map_signature(func, |spec| self.rename(spec))
    }
}

/// Substitute whole types for generic parameter names.
pub fn substitute(spec: &TypeSpec, bindings: &HashMap<String, TypeSpec>) -> TypeSpec {
    spec.map_named(&mut |named| {
        if named.generic_args.is_empty() {
            bindings.get(&named.name).cloned()
        } else {
            None
        }
    })
}

/// A copy of an inherited member with its owner's generic parameters bound.
/// The member's own generic parameters shadow the bindings.
pub fn substitute_member(func: &FunctionDeclaration, bindings: &HashMap<String, TypeSpec>) -> FunctionDeclaration {
    if bindings.is_empty() {
        return func.clone();
    }
    let mut visible = bindings.clone();
    for generic in &func.generics {
        visible.remove(&generic.name);
    }
    map_signature(func, |spec| substitute(spec, &visible))
}

fn map_signature(func: &FunctionDeclaration, f: impl Fn(&TypeSpec) -> TypeSpec) -> FunctionDeclaration {
    let mut mapped = func.clone();
    for param in mapped.parameters.iter_mut().chain(mapped.receiver.as_mut()) {
        param.ty = f(&param.ty);
    }
    mapped.return_type = f(&func.return_type);
    mapped
}
