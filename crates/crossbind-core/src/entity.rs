//! Entity classification and generic contexts.
//!
//! Classification is always relative to a declaring context: a name that
//! matches one of the context's generic parameters is generic even when a
//! concrete type of the same name exists in the fact base.

use std::fmt;

use crate::decl::{FunctionDeclaration, TypeDeclaration, TypeKind};
use crate::facts::FactBase;
use crate::types::{TypeSpec, DYNAMIC_SELF};

/// What a type spec denotes for marshaling purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Class,
    Struct,
    Enum,
    /// Enum without payloads, represented as its raw integer.
    TrivialEnum,
    Protocol,
    ProtocolList,
    Tuple,
    Closure,
    /// The dynamic `Self` type of the declaring context.
    DynamicSelf,
    /// Generic parameter, empty tuple, or unknown name.
    None,
}

impl EntityKind {
    /// Struct, non-trivial enum, or tuple: laid out in native memory.
    pub fn has_native_layout(self) -> bool {
        matches!(self, EntityKind::Struct | EntityKind::Enum | EntityKind::Tuple)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Class => "class",
            EntityKind::Struct => "struct",
            EntityKind::Enum => "enum",
            EntityKind::TrivialEnum => "trivial enum",
            EntityKind::Protocol => "protocol",
            EntityKind::ProtocolList => "protocol list",
            EntityKind::Tuple => "tuple",
            EntityKind::Closure => "closure",
            EntityKind::DynamicSelf => "Self",
            EntityKind::None => "none",
        };
        write!(f, "{name}")
    }
}

/// Standard library value types the fact base need not declare.
fn builtin_entity(name: &str) -> Option<EntityKind> {
    match name {
        "Swift.String" | "Swift.Array" | "Swift.Dictionary" | "Swift.Set"
        | "Swift.Character" | "Swift.UnsafeMutablePointer" | "Swift.UnsafeRawPointer"
        | "Swift.OpaquePointer" => Some(EntityKind::Struct),
        "Swift.Optional" => Some(EntityKind::Enum),
        "Swift.Error" => Some(EntityKind::Protocol),
        _ if TypeSpec::named(name).is_blittable() => Some(EntityKind::Struct),
        _ => None,
    }
}

/// Position of a generic parameter: `depth` counts enclosing scopes that
/// declare generics (outermost is 0), `index` is the position in its scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenericIndex {
    pub depth: usize,
    pub index: usize,
}

/// The generic parameters visible from a declaration, outermost scope first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenericContext {
    scopes: Vec<Vec<String>>,
}

impl GenericContext {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from explicit scopes, outermost first. Scopes without generics
    /// do not count towards depth.
    pub fn from_scopes<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = Vec<S>>,
        S: Into<String>,
    {
        Self {
            scopes: scopes
                .into_iter()
                .map(|scope| scope.into_iter().map(Into::into).collect::<Vec<String>>())
                .filter(|scope| !scope.is_empty())
                .collect(),
        }
    }

    /// Generics visible inside a type: its own and those of enclosing types.
    pub fn for_type(decl: &TypeDeclaration, facts: &FactBase) -> Self {
        let mut chain = vec![decl];
        let mut current = decl;
        while let Some(parent) = current.parent.as_deref().and_then(|p| facts.lookup_type(p)) {
            chain.push(parent);
            current = parent;
        }
        Self::from_scopes(
            chain
                .into_iter()
                .rev()
                .map(|d| d.generics.iter().map(|g| g.name.clone()).collect::<Vec<_>>()),
        )
    }

    /// Generics visible inside a function: its owner's, then its own.
    pub fn for_function(func: &FunctionDeclaration, facts: &FactBase) -> Self {
        let mut ctx = match facts.owner_of(func) {
            Some(owner) => Self::for_type(owner, facts),
            None => Self::empty(),
        };
        ctx.push_scope(func.generics.iter().map(|g| g.name.clone()).collect());
        ctx
    }

    /// Add an innermost scope.
    pub fn push_scope(&mut self, scope: Vec<String>) {
        if !scope.is_empty() {
            self.scopes.push(scope);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Total number of generic parameters across all scopes.
    pub fn len(&self) -> usize {
        self.scopes.iter().map(Vec::len).sum()
    }

    /// Position of a generic parameter, searching the innermost scope first.
    pub fn depth_and_index(&self, name: &str) -> Option<GenericIndex> {
        self.scopes.iter().enumerate().rev().find_map(|(depth, scope)| {
            scope
                .iter()
                .position(|g| g == name)
                .map(|index| GenericIndex { depth, index })
        })
    }

    /// Whether `name` is a generic parameter or an associated type path
    /// rooted at one (`T.Element`).
    pub fn is_generic_name(&self, name: &str) -> bool {
        let head = name.split('.').next().unwrap_or(name);
        self.depth_and_index(name).is_some() || self.depth_and_index(head).is_some()
    }

    /// Whether `spec` is a bare reference to a generic parameter.
    pub fn is_generic(&self, spec: &TypeSpec) -> bool {
        matches!(spec, TypeSpec::Named(n) if n.generic_args.is_empty() && self.is_generic_name(&n.name))
    }

    /// Whether any part of `spec` references a generic parameter.
    pub fn references_generic(&self, spec: &TypeSpec) -> bool {
        spec.any_named(&|n| self.is_generic_name(&n.name))
    }

    /// All generic parameters, outermost scope first.
    pub fn iter(&self) -> impl Iterator<Item = (GenericIndex, &str)> {
        self.scopes.iter().enumerate().flat_map(|(depth, scope)| {
            scope
                .iter()
                .enumerate()
                .map(move |(index, name)| (GenericIndex { depth, index }, name.as_str()))
        })
    }
}

/// Classify `spec` as seen from `ctx`.
pub fn classify(spec: &TypeSpec, ctx: &GenericContext, facts: &FactBase) -> EntityKind {
    match spec {
        TypeSpec::Tuple(elements) if elements.is_empty() => EntityKind::None,
        TypeSpec::Tuple(_) => EntityKind::Tuple,
        TypeSpec::Closure(_) => EntityKind::Closure,
        TypeSpec::ProtocolList(_) => EntityKind::ProtocolList,
        TypeSpec::Named(named) => {
            if named.name == DYNAMIC_SELF {
                return EntityKind::DynamicSelf;
            }
            if ctx.is_generic_name(&named.name) {
                return EntityKind::None;
            }
            match facts.lookup_type(&named.name) {
                Some(decl) => match decl.kind {
                    TypeKind::Class => EntityKind::Class,
                    TypeKind::Struct => EntityKind::Struct,
                    TypeKind::Enum if decl.is_trivial => EntityKind::TrivialEnum,
                    TypeKind::Enum => EntityKind::Enum,
                    TypeKind::Protocol => EntityKind::Protocol,
                },
                None => builtin_entity(&named.name).unwrap_or(EntityKind::None),
            }
        }
    }
}
