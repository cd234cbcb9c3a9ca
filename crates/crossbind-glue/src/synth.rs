//! Virtual dispatch synthesis.
//!
//! For a class being subclassed, the synthesizer emits:
//!
//! - a vtable struct with one optional function-pointer field per slot,
//! - the stored table (or, for generic classes, a table cache keyed by the
//!   runtime type tokens of the bound generic parameters) and its installer,
//! - one host receiver per slot, called by native code through the table,
//! - a subclass whose constructors set a per-instance initialization guard
//!   and whose overrides dispatch through a slot only when the guard is set
//!   and the slot is non-nil, falling back to a super trampoline otherwise.
//!
//! Protocols get the same table and installer. Their members are added to
//! the open placeholder type through a conformance extension; members with
//! a default implementation fall back to it through the generated wrapper
//! and members without one always dispatch through their slot. Protocols
//! with associated types cannot be conformed to by the placeholder, so they
//! get a proxy class generic over the associated types instead, whose table
//! is keyed like that of a generic class.
//!
//! Declarations for a unit are collected first and only pushed to the sink
//! once the whole unit succeeds.

use crossbind_core::code::{
    Arg, Block, Callee, CodeSink, Decl, Expr, FunctionDef, FunctionKind, MemberRef, Modifiers,
    Param, RuntimeOp, Stmt, StorageDef, TypeDef, TypeDefKind, VTableDef,
};
use crossbind_core::types::{DICTIONARY, OPTIONAL, UNSAFE_MUTABLE_POINTER};
use crossbind_core::{
    FactBase, FunctionDeclaration, GenericContext, IdentifierScope, TypeDeclaration, TypeKind,
    TypeSpec,
};
use tracing::{debug, warn};

use crate::config::GlueConfig;
use crate::correlate::{Correlation, Correlator};
use crate::diagnostic::{DiagnosticSink, ErrorCode};
use crate::error::{GlueError, Result};
use crate::marshal_to_host::HostMarshaler;
use crate::marshal_to_native::{marshal_to_native, NativeCall};
use crate::registry::ObjectRegistry;
use crate::strategy::{bind_parameters, check_member, member_ref, AbiContext, ReceiverKind};
use crate::vtable::{Slot, VTableBuilder, VTableLayout};

/// Key type of generic vtable caches.
const TYPE_CACHE_KEY: &str = "GlueRuntime.TypeCacheKey";
/// Parameter type of installer type tokens.
const TYPE_TOKEN: &str = "Any.Type";

/// Generated bodies for one overridable member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedMember {
    /// Index of the member's vtable slot.
    pub slot: usize,
    pub member: FunctionDeclaration,
    /// Unconditional call of the base implementation; absent for protocol
    /// requirements without a default implementation.
    pub super_body: Option<FunctionDef>,
    /// Dispatching override.
    pub override_body: FunctionDef,
    /// Host function native code calls through the slot.
    pub receiver: FunctionDef,
}

/// Result of synthesizing one class or protocol.
#[derive(Debug, Clone)]
pub struct SynthesizedUnit {
    pub layout: VTableLayout,
    pub members: Vec<SynthesizedMember>,
    /// Members whose generation failed recoverably. Their slots remain in
    /// the layout.
    pub skipped: Vec<String>,
}

impl SynthesizedUnit {
    pub fn member(&self, name: &str) -> Option<&SynthesizedMember> {
        self.members.iter().find(|m| m.member.name == name)
    }
}

/// Names shared by every declaration of one unit.
struct UnitNames {
    vtable: String,
    storage: String,
    installer: String,
    getter: String,
    /// Generic parameters keying the table cache, outermost first.
    key_generics: Vec<String>,
    /// Generic context slot signatures are resolved against.
    generics: GenericContext,
}

impl UnitNames {
    fn is_generic(&self) -> bool {
        !self.key_generics.is_empty()
    }
}

pub struct Synthesizer<'a> {
    facts: &'a FactBase,
    config: &'a GlueConfig,
    registry: &'a dyn ObjectRegistry,
}

impl<'a> Synthesizer<'a> {
    pub fn new(facts: &'a FactBase, config: &'a GlueConfig, registry: &'a dyn ObjectRegistry) -> Self {
        Self {
            facts,
            config,
            registry,
        }
    }

    /// Synthesize a class or protocol by qualified name.
    pub fn synthesize(
        &self,
        qualified: &str,
        sink: &mut dyn CodeSink,
        diags: &mut dyn DiagnosticSink,
    ) -> Result<SynthesizedUnit> {
        match self.facts.resolve_type(qualified)?.kind {
            TypeKind::Protocol => self.synthesize_protocol(qualified, sink, diags),
            _ => self.synthesize_class(qualified, sink, diags),
        }
    }

    pub fn synthesize_class(
        &self,
        qualified: &str,
        sink: &mut dyn CodeSink,
        diags: &mut dyn DiagnosticSink,
    ) -> Result<SynthesizedUnit> {
        let class = self.facts.resolve_type(qualified)?;
        if class.kind != TypeKind::Class {
            return Err(GlueError::internal(
                ErrorCode::G3004,
                format!("'{qualified}' is a {:?}, not a class", class.kind),
            ));
        }
        if class.is_final {
            return Err(GlueError::unsupported(
                ErrorCode::G2006,
                qualified,
                "final classes cannot be subclassed",
            ));
        }

        let naming = &self.config.naming;
        let builder = VTableBuilder::new(self.facts, naming, self.config.synthesis.protocol_conflicts);
        let members = builder.class_members(class)?;
        let layout = builder.layout(class, &members, ReceiverKind::Handle)?;
        let names = self.unit_names(class, builder.owner_generics(class)?);
        debug!(class = %qualified, slots = layout.len(), "synthesizing subclass");

        let mut decls = self.table_decls(&layout, &names);
        let mut type_members = vec![Decl::Storage(StorageDef {
            name: naming.init_guard.clone(),
            ty: TypeSpec::named("Swift.Bool"),
            is_static: false,
            initial: Some(Expr::bool(false)),
        })];
        for ctor in class.members.iter().filter(|m| m.is_constructor && m.access.is_public_or_open()) {
            type_members.push(Decl::Function(self.subclass_constructor(ctor)));
        }

        let mut unit = SynthesizedUnit {
            layout,
            members: Vec::new(),
            skipped: Vec::new(),
        };
        let mut receivers = Vec::new();
        for slot in &unit.layout.slots {
            match self.class_member(slot, &names) {
                Ok(synthesized) => {
                    if let Some(super_body) = &synthesized.super_body {
                        type_members.push(Decl::Function(super_body.clone()));
                    }
                    type_members.push(Decl::Function(synthesized.override_body.clone()));
                    receivers.push(Decl::Function(synthesized.receiver.clone()));
                    unit.members.push(synthesized);
                }
                Err(err) if err.is_recoverable() => skip(slot, &err, &mut unit.skipped, diags),
                Err(err) => return Err(err),
            }
        }

        decls.extend(receivers);
        decls.push(Decl::Type(TypeDef {
            name: format!("{}{}", naming.subclass_prefix, class.terminus()),
            kind: TypeDefKind::Subclass,
            base: class.as_type_spec(),
            generics: class.generics.iter().map(|g| g.name.clone()).collect(),
            members: type_members,
        }));
        for decl in decls {
            sink.push_decl(decl);
        }
        Ok(unit)
    }

    pub fn synthesize_protocol(
        &self,
        qualified: &str,
        sink: &mut dyn CodeSink,
        diags: &mut dyn DiagnosticSink,
    ) -> Result<SynthesizedUnit> {
        let protocol = self.facts.resolve_type(qualified)?;
        if protocol.kind != TypeKind::Protocol {
            return Err(GlueError::internal(
                ErrorCode::G3004,
                format!("'{qualified}' is a {:?}, not a protocol", protocol.kind),
            ));
        }

        let naming = &self.config.naming;
        let builder = VTableBuilder::new(self.facts, naming, self.config.synthesis.protocol_conflicts);
        let associated = builder.associated_types(protocol)?;
        let receiver = if associated.is_empty() {
            ReceiverKind::Existential
        } else {
            ReceiverKind::Handle
        };
        let members = builder.protocol_members(protocol, diags)?;
        let layout = builder.layout(protocol, &members, receiver)?;
        let names = self.unit_names(protocol, builder.owner_generics(protocol)?);
        debug!(protocol = %qualified, slots = layout.len(), associated = associated.len(), "synthesizing protocol");

        let mut decls = self.table_decls(&layout, &names);
        let mut unit = SynthesizedUnit {
            layout,
            members: Vec::new(),
            skipped: Vec::new(),
        };
        let mut type_members = Vec::new();
        if receiver == ReceiverKind::Handle {
            type_members.push(Decl::Function(proxy_constructor()));
        }
        let mut receivers = Vec::new();
        for slot in &unit.layout.slots {
            match self.protocol_member(slot, &names, receiver) {
                Ok(synthesized) => {
                    if let Some(super_body) = &synthesized.super_body {
                        type_members.push(Decl::Function(super_body.clone()));
                    }
                    type_members.push(Decl::Function(synthesized.override_body.clone()));
                    receivers.push(Decl::Function(synthesized.receiver.clone()));
                    unit.members.push(synthesized);
                }
                Err(err) if err.is_recoverable() => skip(slot, &err, &mut unit.skipped, diags),
                Err(err) => return Err(err),
            }
        }

        decls.extend(receivers);
        let conformance = match receiver {
            ReceiverKind::Existential => TypeDef {
                name: naming.placeholder.clone(),
                kind: TypeDefKind::Extension,
                base: protocol.as_type_spec(),
                generics: Vec::new(),
                members: type_members,
            },
            ReceiverKind::Handle => TypeDef {
                name: format!("{}{}", naming.proxy_prefix, protocol.terminus()),
                kind: TypeDefKind::Proxy,
                base: protocol.as_type_spec(),
                generics: names.key_generics.clone(),
                members: type_members,
            },
        };
        decls.push(Decl::Type(conformance));
        for decl in decls {
            sink.push_decl(decl);
        }
        Ok(unit)
    }

    fn unit_names(&self, owner: &TypeDeclaration, generics: GenericContext) -> UnitNames {
        let naming = &self.config.naming;
        let vtable = format!("{}{}", owner.terminus(), naming.vtable_suffix);
        let key_generics: Vec<String> = generics.iter().map(|(_, name)| name.to_string()).collect();
        let storage = if key_generics.is_empty() {
            format!("{}{}", owner.terminus(), naming.vtable_variable)
        } else {
            format!("{}{}", owner.terminus(), naming.cache_suffix)
        };
        UnitNames {
            installer: format!("set{vtable}"),
            getter: format!("get{vtable}"),
            vtable,
            storage,
            key_generics,
            generics,
        }
    }

    /// Vtable struct, table storage, installer, and for generic owners the
    /// keyed getter.
    fn table_decls(&self, layout: &VTableLayout, names: &UnitNames) -> Vec<Decl> {
        let vtable_ty = TypeSpec::named(names.vtable.clone());
        let slots = layout
            .slots
            .iter()
            .map(|slot| {
                let ctx = AbiContext::for_member_of(self.facts, &names.generics, &slot.member);
                (slot.name.clone(), opaque_generics(&TypeSpec::Closure(slot.signature.clone()), ctx.generics()))
            })
            .collect();
        let mut decls = vec![Decl::VTable(VTableDef {
            name: names.vtable.clone(),
            slots,
        })];

        let uvt = "uvt";
        let table = Expr::runtime(
            RuntimeOp::Pointee,
            vec![Expr::runtime(
                RuntimeOp::BitCast(TypeSpec::pointer_to(vtable_ty.clone())),
                vec![Expr::var(uvt)],
            )],
        );
        let mut params = vec![Param::new(uvt, TypeSpec::raw_pointer())];
        let token_params: Vec<String> = (0..names.key_generics.len()).map(|i| format!("t{i}")).collect();
        params.extend(token_params.iter().map(|t| Param::new(t.clone(), TypeSpec::named(TYPE_TOKEN))));
        let key = Expr::runtime(RuntimeOp::TypeKey, token_params.iter().map(Expr::var).collect());

        if names.is_generic() {
            let cache_ty = TypeSpec::generic_named(
                DICTIONARY,
                vec![TypeSpec::named(TYPE_CACHE_KEY), vtable_ty.clone()],
            );
            decls.push(Decl::Storage(StorageDef {
                name: names.storage.clone(),
                initial: Some(Expr::function(cache_ty.to_string(), vec![])),
                ty: cache_ty,
                is_static: false,
            }));
            decls.push(Decl::Function(free_function(
                &names.installer,
                params,
                TypeSpec::empty(),
                vec![Stmt::assign(Expr::var(names.storage.clone()).index(key.clone()), table)],
            )));
            decls.push(Decl::Function(free_function(
                &names.getter,
                token_params.iter().map(|t| Param::new(t.clone(), TypeSpec::named(TYPE_TOKEN))).collect(),
                TypeSpec::generic_named(OPTIONAL, vec![vtable_ty]),
                vec![Stmt::ret(Expr::var(names.storage.clone()).index(key))],
            )));
        } else {
            decls.push(Decl::Storage(StorageDef {
                name: names.storage.clone(),
                initial: Some(Expr::function(names.vtable.clone(), vec![])),
                ty: vtable_ty,
                is_static: false,
            }));
            decls.push(Decl::Function(free_function(
                &names.installer,
                params,
                TypeSpec::empty(),
                vec![Stmt::assign(Expr::var(names.storage.clone()), table)],
            )));
        }
        decls
    }

    fn class_member(&self, slot: &Slot, names: &UnitNames) -> Result<SynthesizedMember> {
        let member = &slot.member;
        check_member(member)?;
        debug!(member = %member, slot = slot.index, "synthesizing override");
        let abi = AbiContext::for_member_of(self.facts, &names.generics, member);

        let mut scope = IdentifierScope::with_reserved(["self"]);
        let locals = bind_parameters(member, &mut scope);
        let super_name = self.super_name(member);
        let super_body = self.method_def(
            member,
            super_name.clone(),
            FunctionKind::Method,
            Modifiers::default(),
            &locals,
            forward(Expr::call(Callee::Super(member_ref(member)), forward_args(member, &locals)), member),
        );

        let vt = scope.mint("vt");
        let mut body = vec![Stmt::let_(vt.clone(), self.fetch_table(names))];
        let guard = Expr::SelfRef.field(self.config.naming.init_guard.clone());
        let (cond, table) = table_condition(names, &vt, guard);
        let slot_expr = table.clone().field(slot.name.clone());
        let call = NativeCall::slot(member, slot_expr.clone().force_unwrap(), ReceiverKind::Handle, &locals);
        let dispatch = marshal_to_native(&call, &abi, &mut scope)?.into_block();
        let fallback = forward(
            Expr::call(
                Callee::Member(Box::new(Expr::SelfRef), MemberRef::Method(super_name)),
                forward_args(member, &locals),
            ),
            member,
        );
        body.push(Stmt::If {
            cond: cond.and(slot_expr.not_nil()),
            then: dispatch,
            otherwise: Some(fallback),
        });
        let override_body = self.method_def(
            member,
            member_ref(member).name().to_string(),
            override_kind(member),
            override_modifiers(),
            &locals,
            body,
        );

        let receiver = self.receiver(member, &abi, slot, names, ReceiverKind::Handle)?;
        Ok(SynthesizedMember {
            slot: slot.index,
            member: member.clone(),
            super_body: Some(super_body),
            override_body,
            receiver,
        })
    }

    /// A conformance member. Default implementations are reachable only
    /// through the placeholder extension; proxy classes always dispatch
    /// through their slot.
    fn protocol_member(&self, slot: &Slot, names: &UnitNames, receiver: ReceiverKind) -> Result<SynthesizedMember> {
        let member = &slot.member;
        check_member(member)?;
        debug!(member = %member, slot = slot.index, "synthesizing conformance member");
        let abi = AbiContext::for_member_of(self.facts, &names.generics, member);

        let mut scope = IdentifierScope::with_reserved(["self"]);
        let locals = bind_parameters(member, &mut scope);
        let super_name = self.super_name(member);
        let super_body = if member.has_default_impl && receiver == ReceiverKind::Existential {
            let wrapper = match Correlator::new(self.facts, &self.config.naming).correlate(member)? {
                Correlation::Match(wrapper) => wrapper,
                Correlation::NoMatch => {
                    return Err(GlueError::StructuralMismatch {
                        member: member.qualified_name(),
                        detail: "no wrapper for the default implementation".to_string(),
                    })
                }
            };
            let mut wrapper_scope = IdentifierScope::with_reserved(["self"]);
            let wrapper_locals = bind_parameters(member, &mut wrapper_scope);
            let call = NativeCall::wrapper(
                member,
                wrapper.name.clone(),
                Some(ReceiverKind::Existential),
                &wrapper_locals,
            );
            let body = marshal_to_native(&call, &abi, &mut wrapper_scope)?.into_block();
            Some(self.method_def(
                member,
                super_name.clone(),
                FunctionKind::Method,
                Modifiers::default(),
                &wrapper_locals,
                body,
            ))
        } else {
            None
        };

        let vt = scope.mint("vt");
        let mut body = vec![Stmt::let_(vt.clone(), self.fetch_table(names))];
        let table = if names.is_generic() {
            Expr::var(vt).force_unwrap()
        } else {
            Expr::var(vt)
        };
        let slot_expr = table.field(slot.name.clone());
        let call = NativeCall::slot(member, slot_expr.clone().force_unwrap(), receiver, &locals);
        let dispatch = marshal_to_native(&call, &abi, &mut scope)?.into_block();
        if super_body.is_some() {
            let fallback = forward(
                Expr::call(
                    Callee::Member(Box::new(Expr::SelfRef), MemberRef::Method(super_name)),
                    forward_args(member, &locals),
                ),
                member,
            );
            body.push(Stmt::If {
                cond: slot_expr.not_nil(),
                then: dispatch,
                otherwise: Some(fallback),
            });
        } else {
            body.extend(dispatch);
        }
        let override_body = self.method_def(
            member,
            member_ref(member).name().to_string(),
            override_kind(member),
            Modifiers {
                is_public: true,
                ..Modifiers::default()
            },
            &locals,
            body,
        );

        let receiver = self.receiver(member, &abi, slot, names, receiver)?;
        Ok(SynthesizedMember {
            slot: slot.index,
            member: member.clone(),
            super_body,
            override_body,
            receiver,
        })
    }

    fn receiver(
        &self,
        member: &FunctionDeclaration,
        abi: &AbiContext<'_>,
        slot: &Slot,
        names: &UnitNames,
        kind: ReceiverKind,
    ) -> Result<FunctionDef> {
        HostMarshaler::new(abi, self.registry).receiver(member, kind, &format!("{}_{}", names.vtable, slot.name))
    }

    /// The stored table, or the cached table for the bound generic types.
    fn fetch_table(&self, names: &UnitNames) -> Expr {
        if names.is_generic() {
            Expr::function(
                names.getter.clone(),
                names
                    .key_generics
                    .iter()
                    .map(|g| Arg::new(Expr::TypeToken(TypeSpec::named(g.clone()))))
                    .collect(),
            )
        } else {
            Expr::var(names.storage.clone())
        }
    }

    fn super_name(&self, member: &FunctionDeclaration) -> String {
        let prefix = &self.config.naming.super_prefix;
        match (member.is_subscript, member.is_getter(), member.is_setter()) {
            (true, true, _) => format!("{prefix}subscript_get"),
            (true, _, true) => format!("{prefix}subscript_set"),
            (false, true, _) => format!("{prefix}get_{}", member.name),
            (false, _, true) => format!("{prefix}set_{}", member.name),
            _ => format!("{prefix}{}", member.name),
        }
    }

    fn subclass_constructor(&self, ctor: &FunctionDeclaration) -> FunctionDef {
        let mut scope = IdentifierScope::with_reserved(["self"]);
        let locals = bind_parameters(ctor, &mut scope);
        let body = vec![
            Stmt::Expr(Expr::call(Callee::Super(MemberRef::Constructor), forward_args(ctor, &locals)).maybe_try(ctor.throws)),
            Stmt::assign(
                Expr::SelfRef.field(self.config.naming.init_guard.clone()),
                Expr::bool(true),
            ),
        ];
        FunctionDef {
            name: "init".to_string(),
            kind: FunctionKind::Constructor,
            modifiers: override_modifiers(),
            generics: ctor.generics.iter().map(|g| g.name.clone()).collect(),
            params: params(ctor, &locals),
            returns: TypeSpec::empty(),
            throws: ctor.throws,
            body,
        }
    }

    fn method_def(
        &self,
        member: &FunctionDeclaration,
        name: String,
        kind: FunctionKind,
        modifiers: Modifiers,
        locals: &[String],
        body: Block,
    ) -> FunctionDef {
        FunctionDef {
            name,
            kind,
            modifiers,
            generics: member.generics.iter().map(|g| g.name.clone()).collect(),
            params: params(member, locals),
            returns: member.return_type.clone(),
            throws: member.throws,
            body,
        }
    }
}

fn skip(slot: &Slot, err: &GlueError, skipped: &mut Vec<String>, diags: &mut dyn DiagnosticSink) {
    let member = slot.member.qualified_name();
    warn!(member = %member, slot = slot.index, error = %err, "skipping member");
    diags.record(err);
    skipped.push(member);
}

/// Guard condition and table expression of a class override. Generic
/// tables may be missing for the bound key.
fn table_condition(names: &UnitNames, vt: &str, guard: Expr) -> (Expr, Expr) {
    if names.is_generic() {
        (
            guard.and(Expr::var(vt).not_nil()),
            Expr::var(vt).force_unwrap(),
        )
    } else {
        (guard, Expr::var(vt))
    }
}

/// Host code creates proxy class instances directly.
fn proxy_constructor() -> FunctionDef {
    FunctionDef {
        name: "init".to_string(),
        kind: FunctionKind::Constructor,
        modifiers: Modifiers {
            is_public: true,
            ..Modifiers::default()
        },
        generics: Vec::new(),
        params: Vec::new(),
        returns: TypeSpec::empty(),
        throws: false,
        body: Block::new(),
    }
}

fn override_kind(member: &FunctionDeclaration) -> FunctionKind {
    if member.is_getter() {
        FunctionKind::Getter
    } else if member.is_setter() {
        FunctionKind::Setter
    } else {
        FunctionKind::Method
    }
}

fn override_modifiers() -> Modifiers {
    Modifiers {
        is_public: true,
        is_override: true,
        ..Modifiers::default()
    }
}

fn free_function(name: &str, params: Vec<Param>, returns: TypeSpec, body: Block) -> FunctionDef {
    FunctionDef {
        name: name.to_string(),
        kind: FunctionKind::Free,
        modifiers: Modifiers {
            is_public: true,
            ..Modifiers::default()
        },
        generics: Vec::new(),
        params,
        returns,
        throws: false,
        body,
    }
}

fn params(member: &FunctionDeclaration, locals: &[String]) -> Vec<Param> {
    member
        .parameters
        .iter()
        .zip(locals)
        .map(|(p, local)| Param {
            name: local.clone(),
            ty: p.ty.clone(),
            inout: p.inout,
        })
        .collect()
}

fn forward_args(member: &FunctionDeclaration, locals: &[String]) -> Vec<Arg> {
    member
        .parameters
        .iter()
        .zip(locals)
        .map(|(p, local)| {
            let value = if p.inout {
                Expr::AddressOf(local.clone())
            } else {
                Expr::var(local.clone())
            };
            match p.name.as_str() {
                "" => Arg::new(value),
                label => Arg::labeled(label, value),
            }
        })
        .collect()
}

/// Forward a call, returning its value when the member has one.
fn forward(call: Expr, member: &FunctionDeclaration) -> Block {
    let call = call.maybe_try(member.throws);
    if member.returns_value() {
        vec![Stmt::ret(call)]
    } else {
        vec![Stmt::Expr(call)]
    }
}

trait MaybeTry {
    fn maybe_try(self, throws: bool) -> Self;
}

impl MaybeTry for Expr {
    fn maybe_try(self, throws: bool) -> Self {
        if throws {
            self.try_()
        } else {
            self
        }
    }
}

/// Replace generic operands in a slot type with raw pointers, so one table
/// struct serves every instantiation.
fn opaque_generics(spec: &TypeSpec, ctx: &GenericContext) -> TypeSpec {
    spec.map_named(&mut |n| {
        let generic_pointer = n.name == UNSAFE_MUTABLE_POINTER
            && n.generic_args.len() == 1
            && ctx.references_generic(&n.generic_args[0]);
        (generic_pointer || (n.generic_args.is_empty() && ctx.is_generic_name(&n.name)))
            .then(TypeSpec::raw_pointer)
    })
}
