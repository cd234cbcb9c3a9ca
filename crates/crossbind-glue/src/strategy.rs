//! ABI rules shared by both marshaling engines.
//!
//! Every type crossing a vtable slot or wrapper boundary is assigned a
//! [`MarshalStrategy`] from its entity kind. The strategy fixes the ABI
//! operand type and whether the member needs a hidden leading return
//! pointer.

use crossbind_core::code::MemberRef;
use crossbind_core::{
    classify, ClosureType, EntityKind, FactBase, FunctionDeclaration, GenericContext,
    IdentifierScope, Parameter, TypeSpec,
};

use crate::diagnostic::ErrorCode;
use crate::error::{GlueError, Result};

/// How a value of one type crosses the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarshalStrategy {
    /// Blittable scalar, passed by value.
    Direct,
    /// Class instance, passed as an opaque object handle.
    Handle,
    /// Trivial enum, reinterpreted as its raw integer.
    BitCast,
    /// Struct, non-trivial enum, or tuple in native layout, passed by address.
    Layout,
    /// Protocol existential container, passed by address.
    Existential,
    /// Protocol composition, passed by address.
    ProtocolList,
    /// Function-pointer pair behind an opaque pointer.
    Closure,
    /// Generic parameter, converted with its runtime type token.
    TypeToken,
    /// The dynamic `Self` type; an object handle.
    DynamicSelf,
    /// No value.
    Void,
}

impl MarshalStrategy {
    /// The native convention needs an addressable operand.
    pub fn passes_by_address(self) -> bool {
        matches!(
            self,
            MarshalStrategy::Layout
                | MarshalStrategy::Existential
                | MarshalStrategy::ProtocolList
                | MarshalStrategy::TypeToken
        )
    }

    /// Rewritten to `UnsafeMutablePointer<T>` in wrapper signatures.
    pub fn forced_by_reference(self) -> bool {
        matches!(
            self,
            MarshalStrategy::Layout | MarshalStrategy::Existential | MarshalStrategy::TypeToken
        )
    }

    /// Returned through a hidden leading pointer.
    pub fn returns_through_pointer(self) -> bool {
        self.forced_by_reference()
            || matches!(
                self,
                MarshalStrategy::Closure | MarshalStrategy::ProtocolList | MarshalStrategy::DynamicSelf
            )
    }
}

/// Pick the strategy for `spec` as seen from `ctx`.
pub fn select_strategy(spec: &TypeSpec, ctx: &GenericContext, facts: &FactBase) -> Result<MarshalStrategy> {
    if spec.is_empty_tuple() {
        return Ok(MarshalStrategy::Void);
    }
    if spec.is_blittable() {
        return Ok(MarshalStrategy::Direct);
    }
    if ctx.is_generic(spec) {
        return Ok(MarshalStrategy::TypeToken);
    }
    let strategy = match classify(spec, ctx, facts) {
        EntityKind::Class => MarshalStrategy::Handle,
        EntityKind::TrivialEnum => MarshalStrategy::BitCast,
        EntityKind::Struct | EntityKind::Enum | EntityKind::Tuple => MarshalStrategy::Layout,
        EntityKind::Protocol => MarshalStrategy::Existential,
        EntityKind::ProtocolList => MarshalStrategy::ProtocolList,
        EntityKind::Closure => MarshalStrategy::Closure,
        EntityKind::DynamicSelf => MarshalStrategy::DynamicSelf,
        EntityKind::None => {
            return Err(GlueError::UnresolvedReference {
                name: spec.to_string(),
            })
        }
    };
    Ok(strategy)
}

/// How the receiver of a slot or wrapper call is passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverKind {
    /// Object handle of a class instance.
    Handle,
    /// Address of an existential container.
    Existential,
}

/// Facts and generic scope for marshaling one member.
#[derive(Debug, Clone)]
pub struct AbiContext<'a> {
    facts: &'a FactBase,
    generics: GenericContext,
}

impl<'a> AbiContext<'a> {
    pub fn new(facts: &'a FactBase, generics: GenericContext) -> Self {
        Self { facts, generics }
    }

    /// Context for a member: its owner's generics, then its own.
    pub fn for_member(facts: &'a FactBase, func: &FunctionDeclaration) -> Self {
        Self::new(facts, GenericContext::for_function(func, facts))
    }

    /// Context for a member seen from `owner`, whose generics may differ
    /// from the declaring type's once inherited signatures are bound.
    pub fn for_member_of(facts: &'a FactBase, owner: &GenericContext, func: &FunctionDeclaration) -> Self {
        let mut generics = owner.clone();
        generics.push_scope(func.generics.iter().map(|g| g.name.clone()).collect());
        Self::new(facts, generics)
    }

    pub fn facts(&self) -> &'a FactBase {
        self.facts
    }

    pub fn generics(&self) -> &GenericContext {
        &self.generics
    }

    pub fn strategy(&self, spec: &TypeSpec) -> Result<MarshalStrategy> {
        select_strategy(spec, &self.generics, self.facts)
    }

    /// Whether the member returns through a hidden leading pointer: it
    /// throws, or its return type cannot be returned by value.
    pub fn has_hidden_return(&self, func: &FunctionDeclaration) -> Result<bool> {
        if func.throws {
            return Ok(true);
        }
        Ok(self.strategy(&func.return_type)?.returns_through_pointer())
    }

    /// Raw representation of a trivial enum.
    pub fn raw_type(&self, spec: &TypeSpec) -> TypeSpec {
        spec.as_named()
            .and_then(|n| self.facts.lookup_type(&n.name))
            .and_then(|decl| decl.raw_type.clone())
            .unwrap_or_else(|| TypeSpec::named("Swift.Int"))
    }

    /// The type of a value once converted to its ABI form.
    pub fn abi_value_type(&self, spec: &TypeSpec) -> Result<TypeSpec> {
        let ty = match self.strategy(spec)? {
            MarshalStrategy::Direct
            | MarshalStrategy::Layout
            | MarshalStrategy::Existential
            | MarshalStrategy::ProtocolList
            | MarshalStrategy::TypeToken => spec.clone(),
            MarshalStrategy::Handle | MarshalStrategy::DynamicSelf | MarshalStrategy::Closure => {
                TypeSpec::raw_pointer()
            }
            MarshalStrategy::BitCast => self.raw_type(spec),
            MarshalStrategy::Void => TypeSpec::empty(),
        };
        Ok(ty)
    }

    /// The ABI operand type of a parameter.
    pub fn abi_param_type(&self, param: &Parameter) -> Result<TypeSpec> {
        let strategy = self.strategy(&param.ty)?;
        if strategy.passes_by_address() {
            Ok(TypeSpec::pointer_to(param.ty.clone()))
        } else if param.inout {
            Ok(TypeSpec::pointer_to(self.abi_value_type(&param.ty)?))
        } else {
            self.abi_value_type(&param.ty)
        }
    }

    /// Type of the hidden return pointer, if the member has one. Throwing
    /// members point at the tri-state `(value, error, flag)` tuple.
    pub fn hidden_return_type(&self, func: &FunctionDeclaration) -> Result<Option<TypeSpec>> {
        if !self.has_hidden_return(func)? {
            return Ok(None);
        }
        let value = self.abi_value_type(&func.return_type)?;
        if func.throws {
            Ok(Some(TypeSpec::pointer_to(TypeSpec::throwing_result(value))))
        } else {
            Ok(Some(TypeSpec::pointer_to(value)))
        }
    }

    /// Function type of the vtable slot for `func`: receiver, hidden return
    /// pointer if any, then the parameters.
    pub fn slot_signature(&self, func: &FunctionDeclaration, receiver: ReceiverKind) -> Result<ClosureType> {
        let mut args = vec![receiver_type(func, receiver)];
        if let Some(hidden) = self.hidden_return_type(func)? {
            args.push(hidden);
        }
        for param in &func.parameters {
            args.push(self.abi_param_type(param)?);
        }
        let returns = if self.has_hidden_return(func)? {
            TypeSpec::empty()
        } else {
            self.abi_value_type(&func.return_type)?
        };
        Ok(ClosureType::new(args, returns))
    }
}

/// ABI type of the receiver operand.
pub fn receiver_type(func: &FunctionDeclaration, receiver: ReceiverKind) -> TypeSpec {
    match (receiver, func.parent.as_deref()) {
        (ReceiverKind::Existential, Some(owner)) => TypeSpec::pointer_to(TypeSpec::named(owner)),
        _ => TypeSpec::raw_pointer(),
    }
}

/// Reject async members.
pub fn check_member(func: &FunctionDeclaration) -> Result<()> {
    if func.is_async {
        return Err(GlueError::unsupported(
            ErrorCode::G2005,
            func.qualified_name(),
            "async members cannot be marshaled",
        ));
    }
    Ok(())
}

/// Reject closures the engines cannot marshal: async, or carrying another
/// closure in an argument or return position.
pub fn check_closure(closure: &ClosureType, member: &FunctionDeclaration) -> Result<()> {
    if closure.is_async {
        return Err(GlueError::unsupported(
            ErrorCode::G2002,
            member.qualified_name(),
            format!("async closure {}", TypeSpec::Closure(closure.clone())),
        ));
    }
    let nested = closure
        .argument_types()
        .iter()
        .chain(std::iter::once(closure.return_type.as_ref()))
        .any(|t| matches!(t, TypeSpec::Closure(_)));
    if nested {
        return Err(GlueError::unsupported(
            ErrorCode::G2001,
            member.qualified_name(),
            format!("closure nested in {}", TypeSpec::Closure(closure.clone())),
        ));
    }
    Ok(())
}

/// How generated code names the member.
pub fn member_ref(func: &FunctionDeclaration) -> MemberRef {
    match (func.is_subscript, func.is_getter(), func.is_setter()) {
        (true, true, _) => MemberRef::SubscriptGetter,
        (true, _, true) => MemberRef::SubscriptSetter,
        (false, true, _) => MemberRef::Getter(func.name.clone()),
        (false, _, true) => MemberRef::Setter(func.name.clone()),
        _ if func.is_constructor => MemberRef::Constructor,
        _ => MemberRef::Method(func.name.clone()),
    }
}

/// Reserve a local name for each parameter: its own name, or `arg{i}` when
/// it has none.
pub fn bind_parameters(func: &FunctionDeclaration, scope: &mut IdentifierScope) -> Vec<String> {
    func.parameters
        .iter()
        .enumerate()
        .map(|(i, p)| {
            if p.name.is_empty() {
                scope.mint(&format!("arg{i}"))
            } else {
                scope.mint(&p.name)
            }
        })
        .collect()
}
