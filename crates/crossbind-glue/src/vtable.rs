//! Virtual member collection and vtable slot layout.
//!
//! A class contributes the overridable members of its whole superclass
//! chain, root first. A protocol contributes the requirements of every
//! protocol it inherits, depth-first in declaration order, then its own.
//! The first occurrence of a member shape wins, so a member re-declared
//! further down the chain never gets a second slot and slot indices stay
//! stable across runs over the same graph.
//!
//! Members inherited from a generic superclass are rewritten with the
//! arguments the subclass binds, and requirements of protocols with
//! associated types are rewritten to canonical generic names, so every
//! slot signature is resolved against the owner's own generic context.

use std::collections::{HashMap, HashSet};

use crossbind_core::decl::MemberShape;
use crossbind_core::hash::{content_hash, hash_hex};
use crossbind_core::rename::{substitute, substitute_member};
use crossbind_core::{
    ClosureType, CoreError, FactBase, FunctionDeclaration, GenericContext, GenericRenamer, TypeDeclaration, TypeKind,
    TypeSpec,
};
use tracing::{debug, warn};

use crate::config::{ConflictPolicy, NamingConfig};
use crate::diagnostic::{DiagnosticSink, ErrorCode};
use crate::error::{GlueError, Result};
use crate::strategy::{AbiContext, ReceiverKind};

/// Protocols of the standard library that carry no overridable requirements.
const STANDARD_PREFIX: &str = "Swift.";

/// One function-pointer slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub index: usize,
    /// Field name, `func{index}` by default.
    pub name: String,
    pub member: FunctionDeclaration,
    /// C-convention type of the stored function pointer.
    pub signature: ClosureType,
}

/// Ordered slots of one class or protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VTableLayout {
    /// Qualified name of the class or protocol.
    pub owner: String,
    pub receiver: ReceiverKind,
    pub slots: Vec<Slot>,
}

impl VTableLayout {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The slot holding `member`, matched by shape.
    pub fn slot_for(&self, member: &FunctionDeclaration) -> Option<&Slot> {
        let shape = member.shape_key();
        self.slots.iter().find(|s| s.member.shape_key() == shape)
    }

    /// SHA-256 over owner, slot names, and slot signatures.
    pub fn fingerprint(&self) -> Result<String> {
        let slots: Vec<(&str, String)> = self
            .slots
            .iter()
            .map(|s| (s.name.as_str(), TypeSpec::Closure(s.signature.clone()).to_string()))
            .collect();
        let hash = content_hash(&(&self.owner, slots))?;
        Ok(hash_hex(&hash))
    }
}

/// Collects virtual members and lays out slots.
pub struct VTableBuilder<'a> {
    facts: &'a FactBase,
    naming: &'a NamingConfig,
    policy: ConflictPolicy,
}

impl<'a> VTableBuilder<'a> {
    pub fn new(facts: &'a FactBase, naming: &'a NamingConfig, policy: ConflictPolicy) -> Self {
        Self { facts, naming, policy }
    }

    /// Overridable members of `class` and its superclasses, root first.
    /// Inherited signatures have the superclass generics bound.
    pub fn class_members(&self, class: &TypeDeclaration) -> Result<Vec<FunctionDeclaration>> {
        let mut chain = vec![(class, HashMap::new())];
        let mut seen = HashSet::from([class.qualified_name()]);
        let mut current = class;
        let mut bindings = HashMap::new();
        while let Some(parent) = self.facts.superclass_of(current)? {
            if !seen.insert(parent.qualified_name()) {
                return Err(GlueError::Core(CoreError::InvalidFactBase {
                    detail: format!("superclass cycle through '{}'", parent.qualified_name()),
                }));
            }
            bindings = superclass_bindings(current, parent, &bindings)?;
            chain.push((parent, bindings.clone()));
            current = parent;
        }

        let mut shapes = HashSet::new();
        let mut members = Vec::new();
        for (decl, bindings) in chain.iter().rev() {
            for member in decl.members.iter().filter(|m| is_overridable(m)) {
                let member = substitute_member(member, bindings);
                if shapes.insert(member.shape_key()) {
                    members.push(member);
                }
            }
        }
        Ok(members)
    }

    /// Requirements of `protocol` and everything it inherits. Unrelated
    /// protocols declaring the same member are resolved by the configured
    /// [`ConflictPolicy`].
    pub fn protocol_members(
        &self,
        protocol: &TypeDeclaration,
        diags: &mut dyn DiagnosticSink,
    ) -> Result<Vec<FunctionDeclaration>> {
        let mut walk = ProtocolWalk {
            builder: self,
            visited: HashSet::new(),
            origins: HashMap::new(),
            members: Vec::new(),
            ancestry: HashMap::new(),
        };
        walk.visit(protocol, diags)?;
        let associated = self.associated_types(protocol)?;
        if associated.is_empty() {
            return Ok(walk.members);
        }
        let renamer = GenericRenamer::new(&GenericContext::from_scopes(vec![associated]));
        Ok(walk.members.iter().map(|m| renamer.rename_member(m)).collect())
    }

    /// Associated types of `protocol` and the protocols it inherits,
    /// ancestors first.
    pub fn associated_types(&self, protocol: &TypeDeclaration) -> Result<Vec<String>> {
        let mut visited = HashSet::new();
        let mut names = Vec::new();
        self.collect_associated(protocol, &mut visited, &mut names)?;
        Ok(names)
    }

    fn collect_associated(
        &self,
        protocol: &TypeDeclaration,
        visited: &mut HashSet<String>,
        names: &mut Vec<String>,
    ) -> Result<()> {
        if !visited.insert(protocol.qualified_name()) {
            return Ok(());
        }
        for parent in inherited_protocols(self.facts, protocol)? {
            self.collect_associated(parent, visited, names)?;
        }
        for generic in &protocol.generics {
            if !names.contains(&generic.name) {
                names.push(generic.name.clone());
            }
        }
        Ok(())
    }

    /// Generic parameters slot signatures of `owner` are resolved against.
    /// Protocols with associated types use canonical names, matching the
    /// rewritten requirements.
    pub fn owner_generics(&self, owner: &TypeDeclaration) -> Result<GenericContext> {
        if owner.kind != TypeKind::Protocol {
            return Ok(GenericContext::for_type(owner, self.facts));
        }
        let associated = self.associated_types(owner)?;
        let renamer = GenericRenamer::new(&GenericContext::from_scopes(vec![associated.clone()]));
        let canonical: Vec<String> = associated
            .iter()
            .filter_map(|name| renamer.canonical(name).map(str::to_string))
            .collect();
        Ok(GenericContext::from_scopes(vec![canonical]))
    }

    /// Assign slots, placing each setter directly after its getter.
    pub fn layout(
        &self,
        owner: &TypeDeclaration,
        members: &[FunctionDeclaration],
        receiver: ReceiverKind,
    ) -> Result<VTableLayout> {
        let mut ordered: Vec<&FunctionDeclaration> = Vec::with_capacity(members.len());
        let mut placed = vec![false; members.len()];
        for (i, member) in members.iter().enumerate() {
            if placed[i] {
                continue;
            }
            if member.is_setter() && members.iter().any(|getter| member.is_setter_for(getter)) {
                continue;
            }
            placed[i] = true;
            ordered.push(member);
            if member.is_getter() {
                let setter = members
                    .iter()
                    .enumerate()
                    .find(|(j, candidate)| !placed[*j] && candidate.is_setter_for(member));
                if let Some((j, setter)) = setter {
                    placed[j] = true;
                    ordered.push(setter);
                }
            }
        }

        let generics = self.owner_generics(owner)?;
        let mut slots = Vec::with_capacity(ordered.len());
        for (index, member) in ordered.into_iter().enumerate() {
            let abi = AbiContext::for_member_of(self.facts, &generics, member);
            let signature = abi.slot_signature(member, receiver)?;
            let name = self.naming.slot_name(index);
            debug!(owner = %owner.qualified_name(), slot = %name, member = %member, "assigned slot");
            slots.push(Slot {
                index,
                name,
                member: member.clone(),
                signature,
            });
        }
        Ok(VTableLayout {
            owner: owner.qualified_name(),
            receiver,
            slots,
        })
    }
}

/// Generic arguments `class` binds for the generic parameters of `parent`,
/// expressed in terms of the subclass.
fn superclass_bindings(
    class: &TypeDeclaration,
    parent: &TypeDeclaration,
    outer: &HashMap<String, TypeSpec>,
) -> Result<HashMap<String, TypeSpec>> {
    let args = class
        .superclass
        .as_ref()
        .and_then(TypeSpec::as_named)
        .map(|n| n.generic_args.as_slice())
        .unwrap_or_default();
    if args.len() != parent.generics.len() {
        return Err(GlueError::Core(CoreError::InvalidFactBase {
            detail: format!(
                "'{}' binds {} generic arguments of '{}', which declares {}",
                class.qualified_name(),
                args.len(),
                parent.qualified_name(),
                parent.generics.len()
            ),
        }));
    }
    Ok(parent
        .generics
        .iter()
        .zip(args)
        .map(|(generic, arg)| (generic.name.clone(), substitute(arg, outer)))
        .collect())
}

fn is_usable(member: &FunctionDeclaration) -> bool {
    !member.is_deprecated && !member.is_unavailable
}

fn is_overridable(member: &FunctionDeclaration) -> bool {
    is_usable(member)
        && !member.is_static
        && !member.is_constructor
        && !member.is_materializer()
        && !member.is_operator
        && !member.is_final
        && !member.is_extension
        && member.access.is_public_or_open()
}

fn is_requirement(member: &FunctionDeclaration) -> bool {
    is_usable(member) && !member.is_static && !member.is_constructor && !member.is_materializer()
}

struct ProtocolWalk<'w, 'a> {
    builder: &'w VTableBuilder<'a>,
    visited: HashSet<String>,
    /// Protocol that contributed each kept member.
    origins: HashMap<MemberShape, String>,
    members: Vec<FunctionDeclaration>,
    ancestry: HashMap<String, HashSet<String>>,
}

impl<'w, 'a> ProtocolWalk<'w, 'a> {
    fn visit(&mut self, protocol: &TypeDeclaration, diags: &mut dyn DiagnosticSink) -> Result<()> {
        let name = protocol.qualified_name();
        if !self.visited.insert(name.clone()) {
            return Ok(());
        }
        for parent in self.parents(protocol)? {
            self.visit(parent, diags)?;
        }
        for member in protocol.members.iter().filter(|m| is_requirement(m)) {
            let shape = member.shape_key();
            let Some(first) = self.origins.get(&shape).cloned() else {
                self.origins.insert(shape, name.clone());
                self.members.push(member.clone());
                continue;
            };
            if self.is_ancestor(&first, &name)? || self.is_ancestor(&name, &first)? {
                continue;
            }
            match self.builder.policy {
                ConflictPolicy::Warn => {
                    warn!(member = %member.name, first = %first, second = %name, "duplicate protocol member");
                    diags.warn(
                        ErrorCode::W5001,
                        format!(
                            "'{}' is declared by unrelated protocols '{first}' and '{name}'; keeping '{first}'",
                            member.name
                        ),
                    );
                }
                ConflictPolicy::Reject => {
                    return Err(GlueError::internal(
                        ErrorCode::G3005,
                        format!(
                            "'{}' is declared by unrelated protocols '{first}' and '{name}'",
                            member.name
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    fn parents(&self, protocol: &TypeDeclaration) -> Result<Vec<&'a TypeDeclaration>> {
        inherited_protocols(self.builder.facts, protocol)
    }

    /// Whether `ancestor` is `protocol` or one of the protocols it inherits.
    fn is_ancestor(&mut self, ancestor: &str, protocol: &str) -> Result<bool> {
        if ancestor == protocol {
            return Ok(true);
        }
        if !self.ancestry.contains_key(protocol) {
            let mut all = HashSet::new();
            let mut stack = vec![self.builder.facts.resolve_type(protocol)?];
            while let Some(decl) = stack.pop() {
                for parent in self.parents(decl)? {
                    if all.insert(parent.qualified_name()) {
                        stack.push(parent);
                    }
                }
            }
            self.ancestry.insert(protocol.to_string(), all);
        }
        Ok(self.ancestry.get(protocol).is_some_and(|all| all.contains(ancestor)))
    }
}

/// Inherited protocols in declaration order. Unknown standard library
/// protocols are skipped.
fn inherited_protocols<'a>(facts: &'a FactBase, protocol: &TypeDeclaration) -> Result<Vec<&'a TypeDeclaration>> {
    let mut parents = Vec::new();
    for inherited in &protocol.inherits {
        let Some(named) = inherited.as_named() else {
            continue;
        };
        match facts.lookup_type(&named.name) {
            Some(decl) if decl.kind == TypeKind::Protocol => parents.push(decl),
            Some(decl) => {
                return Err(GlueError::internal(
                    ErrorCode::G3004,
                    format!(
                        "protocol '{}' inherits non-protocol '{}'",
                        protocol.qualified_name(),
                        decl.qualified_name()
                    ),
                ))
            }
            None if named.name.starts_with(STANDARD_PREFIX) => {}
            None => {
                return Err(GlueError::UnresolvedReference {
                    name: named.name.clone(),
                })
            }
        }
    }
    Ok(parents)
}
