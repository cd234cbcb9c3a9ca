//! Engine B: calling through a native vtable slot or wrapper.
//!
//! Produces the statements an override body (or a super trampoline that
//! forwards to a generated wrapper) uses to pack its arguments into ABI
//! form, invoke the function pointer, and unpack the result or error.
//! Scratch storage is always released: generic buffers and closure
//! adapters through `defer`, return buffers by move-out-then-deallocate.

use crossbind_core::code::{Arg, Callee, Expr, MarshaledCall, RuntimeOp, Stmt};
use crossbind_core::{FunctionDeclaration, IdentifierScope, Parameter, TypeSpec};

use crate::error::Result;
use crate::strategy::{check_closure, check_member, AbiContext, MarshalStrategy, ReceiverKind};

/// Position of the hidden return pointer relative to the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentOrder {
    /// `(receiver, return, args...)`, used by vtable slots.
    ReceiverFirst,
    /// `(return, receiver, args...)`, used by generated wrappers.
    ReturnFirst,
}

/// One call into native code.
#[derive(Debug, Clone)]
pub struct NativeCall<'a> {
    pub member: &'a FunctionDeclaration,
    pub target: Callee,
    pub receiver: Option<ReceiverKind>,
    pub order: ArgumentOrder,
    /// Locals holding the member's parameters, in declaration order.
    pub arguments: &'a [String],
}

impl<'a> NativeCall<'a> {
    /// Call through a vtable slot.
    pub fn slot(
        member: &'a FunctionDeclaration,
        slot: Expr,
        receiver: ReceiverKind,
        arguments: &'a [String],
    ) -> Self {
        Self {
            member,
            target: Callee::Pointer(Box::new(slot)),
            receiver: Some(receiver),
            order: ArgumentOrder::ReceiverFirst,
            arguments,
        }
    }

    /// Call a generated wrapper function.
    pub fn wrapper(
        member: &'a FunctionDeclaration,
        name: impl Into<String>,
        receiver: Option<ReceiverKind>,
        arguments: &'a [String],
    ) -> Self {
        Self {
            member,
            target: Callee::Function(name.into()),
            receiver,
            order: ArgumentOrder::ReturnFirst,
            arguments,
        }
    }
}

/// Marshal `call`. `scope` must already hold the caller's parameter names.
pub fn marshal_to_native(
    call: &NativeCall<'_>,
    abi: &AbiContext<'_>,
    scope: &mut IdentifierScope,
) -> Result<MarshaledCall> {
    let member = call.member;
    check_member(member)?;
    let mut out = MarshaledCall::default();
    let mut write_backs = Vec::new();

    let receiver = match call.receiver {
        None => None,
        Some(ReceiverKind::Handle) => Some(Expr::runtime(RuntimeOp::ToHandle, vec![Expr::SelfRef])),
        Some(ReceiverKind::Existential) => {
            let copy = scope.mint("selfCopy");
            let owner = member.parent.as_deref().map(TypeSpec::named).unwrap_or_default();
            out.pre.push(Stmt::var(copy.clone(), owner, Expr::SelfRef));
            Some(Expr::AddressOf(copy))
        }
    };

    let result = match abi.hidden_return_type(member)? {
        Some(pointer) => {
            let name = scope.mint("result");
            let storage = pointer.pointee().cloned().unwrap_or_default();
            out.pre
                .push(Stmt::let_(name.clone(), Expr::runtime(RuntimeOp::Allocate(storage), vec![])));
            Some(name)
        }
        None => None,
    };

    let mut operands = Vec::new();
    for (param, local) in member.parameters.iter().zip(call.arguments) {
        operands.push(pack_argument(param, local, member, abi, scope, &mut out, &mut write_backs)?);
    }

    let mut args = Vec::new();
    let hidden = result.as_ref().map(|r| Expr::var(r.clone()));
    match call.order {
        ArgumentOrder::ReceiverFirst => args.extend(receiver.into_iter().chain(hidden)),
        ArgumentOrder::ReturnFirst => args.extend(hidden.into_iter().chain(receiver)),
    }
    args.extend(operands);
    let invoke = Expr::call(call.target.clone(), args.into_iter().map(Arg::new).collect());

    let ret = &member.return_type;
    let strategy = abi.strategy(ret)?;
    match result {
        None if strategy == MarshalStrategy::Void => {
            out.call.push(Stmt::Expr(invoke));
            out.post.extend(write_backs);
        }
        None => {
            let value = scope.mint("value");
            out.call.push(Stmt::let_(value.clone(), invoke));
            out.post.extend(write_backs);
            out.post.push(Stmt::ret(unpack(Expr::var(value), ret, strategy, member)?));
        }
        Some(result) if !member.throws => {
            let value = scope.mint("value");
            out.call.push(Stmt::Expr(invoke));
            let moved = Expr::runtime(RuntimeOp::Move, vec![Expr::var(result.clone())]);
            out.post.push(Stmt::let_(value.clone(), unpack(moved, ret, strategy, member)?));
            out.post.push(deallocate(&result));
            out.post.extend(write_backs);
            out.post.push(Stmt::ret(Expr::var(value)));
        }
        Some(result) => {
            out.call.push(Stmt::Expr(invoke));
            let error = scope.mint("error");
            out.post.push(Stmt::If {
                cond: Expr::runtime(RuntimeOp::ResultIsError, vec![Expr::var(result.clone())]),
                then: vec![
                    Stmt::let_(
                        error.clone(),
                        Expr::runtime(RuntimeOp::ResultTakeError, vec![Expr::var(result.clone())]),
                    ),
                    deallocate(&result),
                    Stmt::Throw(Expr::var(error)),
                ],
                otherwise: None,
            });
            if strategy == MarshalStrategy::Void {
                out.post.push(deallocate(&result));
                out.post.extend(write_backs);
            } else {
                let value = scope.mint("value");
                let taken = Expr::runtime(RuntimeOp::ResultTakeValue, vec![Expr::var(result.clone())]);
                out.post.push(Stmt::let_(value.clone(), unpack(taken, ret, strategy, member)?));
                out.post.push(deallocate(&result));
                out.post.extend(write_backs);
                out.post.push(Stmt::ret(Expr::var(value)));
            }
        }
    }
    Ok(out)
}

fn deallocate(name: &str) -> Stmt {
    Stmt::Expr(Expr::runtime(RuntimeOp::Deallocate, vec![Expr::var(name)]))
}

/// Convert one argument to its ABI operand, adding setup to `out.pre` and
/// inout write-backs to `write_backs`.
fn pack_argument(
    param: &Parameter,
    local: &str,
    member: &FunctionDeclaration,
    abi: &AbiContext<'_>,
    scope: &mut IdentifierScope,
    out: &mut MarshaledCall,
    write_backs: &mut Vec<Stmt>,
) -> Result<Expr> {
    let ty = &param.ty;
    let value = Expr::var(local);
    let operand = match abi.strategy(ty)? {
        MarshalStrategy::Direct | MarshalStrategy::Void if param.inout => Expr::AddressOf(local.to_string()),
        MarshalStrategy::Direct | MarshalStrategy::Void => value,
        strategy @ (MarshalStrategy::Handle | MarshalStrategy::DynamicSelf | MarshalStrategy::BitCast) => {
            let (to_abi, from_abi, abi_ty) = if strategy == MarshalStrategy::BitCast {
                let raw = abi.raw_type(ty);
                (RuntimeOp::BitCast(raw.clone()), RuntimeOp::BitCast(ty.clone()), raw)
            } else {
                (RuntimeOp::ToHandle, RuntimeOp::FromHandle(ty.clone()), TypeSpec::raw_pointer())
            };
            let converted = Expr::runtime(to_abi, vec![value]);
            if !param.inout {
                return Ok(converted);
            }
            let temp = scope.mint(&format!("{local}Abi"));
            out.pre.push(Stmt::var(temp.clone(), abi_ty, converted));
            write_backs.push(Stmt::assign(
                Expr::var(local),
                Expr::runtime(from_abi, vec![Expr::var(temp.clone())]),
            ));
            Expr::AddressOf(temp)
        }
        MarshalStrategy::Layout | MarshalStrategy::Existential | MarshalStrategy::ProtocolList => {
            if param.inout {
                Expr::AddressOf(local.to_string())
            } else {
                let copy = scope.mint(&format!("{local}Copy"));
                out.pre.push(Stmt::var(copy.clone(), ty.clone(), value));
                Expr::AddressOf(copy)
            }
        }
        MarshalStrategy::TypeToken if param.inout => Expr::AddressOf(local.to_string()),
        MarshalStrategy::TypeToken => {
            let buffer = scope.mint(&format!("{local}Buffer"));
            out.pre.push(Stmt::let_(
                buffer.clone(),
                Expr::runtime(RuntimeOp::Allocate(ty.clone()), vec![]),
            ));
            out.pre.push(Stmt::Expr(Expr::runtime(
                RuntimeOp::Initialize,
                vec![Expr::var(buffer.clone()), value],
            )));
            out.pre.push(Stmt::Defer(vec![
                Stmt::Expr(Expr::runtime(RuntimeOp::Deinitialize, vec![Expr::var(buffer.clone())])),
                deallocate(&buffer),
            ]));
            Expr::var(buffer)
        }
        MarshalStrategy::Closure => {
            let closure = ty.as_closure().cloned().unwrap_or_else(|| {
                crossbind_core::ClosureType::new(Vec::new(), TypeSpec::empty())
            });
            check_closure(&closure, member)?;
            let adapter = scope.mint(&format!("{local}Adapter"));
            out.pre.push(Stmt::let_(
                adapter.clone(),
                Expr::runtime(RuntimeOp::ClosureToNative(closure), vec![value]),
            ));
            out.pre.push(Stmt::Defer(vec![deallocate(&adapter)]));
            Expr::var(adapter)
        }
    };
    Ok(operand)
}

/// Convert a value read back from native code to the caller's type.
fn unpack(value: Expr, ty: &TypeSpec, strategy: MarshalStrategy, member: &FunctionDeclaration) -> Result<Expr> {
    let expr = match strategy {
        MarshalStrategy::Handle | MarshalStrategy::DynamicSelf => {
            Expr::runtime(RuntimeOp::FromHandle(ty.clone()), vec![value])
        }
        MarshalStrategy::BitCast => Expr::runtime(RuntimeOp::BitCast(ty.clone()), vec![value]),
        MarshalStrategy::Closure => match ty.as_closure() {
            Some(closure) => {
                check_closure(closure, member)?;
                Expr::runtime(RuntimeOp::NativeToClosure(closure.clone()), vec![value])
            }
            None => value,
        },
        MarshalStrategy::Direct
        | MarshalStrategy::Layout
        | MarshalStrategy::Existential
        | MarshalStrategy::ProtocolList
        | MarshalStrategy::TypeToken
        | MarshalStrategy::Void => value,
    };
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbind_core::code::render;
    use crossbind_core::decl::GenericParameter;
    use crossbind_core::{FactBase, GenericContext};
    use pretty_assertions::assert_eq;

    const FACTS: &str = r#"
[[modules]]
name = "M"

[[modules.types]]
name = "C"
kind = "class"

[[modules.types]]
name = "S"
kind = "struct"

[[modules.types]]
name = "P"
kind = "protocol"
"#;

    fn t(s: &str) -> TypeSpec {
        TypeSpec::parse(s).unwrap()
    }

    fn member(params: Vec<Parameter>, returns: &str, throws: bool) -> FunctionDeclaration {
        FunctionDeclaration {
            parent: Some("M.C".into()),
            module: "M".into(),
            throws,
            ..FunctionDeclaration::new("f", params, t(returns))
        }
    }

    fn marshal(func: &FunctionDeclaration, facts: &FactBase, generics: GenericContext) -> String {
        let abi = AbiContext::new(facts, generics);
        let mut scope = IdentifierScope::with_reserved(["self"]);
        let names = crate::strategy::bind_parameters(func, &mut scope);
        let call = NativeCall::slot(func, Expr::var("vt").field("func0").force_unwrap(), ReceiverKind::Handle, &names);
        render(&marshal_to_native(&call, &abi, &mut scope).unwrap().into_block())
    }

    #[test]
    fn blittable_value_return() {
        let facts = FactBase::parse_toml(FACTS).unwrap();
        let func = member(vec![Parameter::new("x", t("Swift.Int"))], "Swift.Int", false);
        assert_eq!(
            marshal(&func, &facts, GenericContext::empty()),
            "let value = vt.func0!(toHandle(self), x)\nreturn value"
        );
    }

    #[test]
    fn throwing_void_branches_on_flag() {
        let facts = FactBase::parse_toml(FACTS).unwrap();
        let func = member(vec![], "()", true);
        assert_eq!(
            marshal(&func, &facts, GenericContext::empty()),
            "\
let result = allocate<((), Swift.Error, Swift.Bool)>()
vt.func0!(toHandle(self), result)
if resultIsError(result) {
    let error = resultTakeError(result)
    deallocate(result)
    throw error
}
deallocate(result)"
        );
    }

    #[test]
    fn throwing_class_return_moves_value_before_release() {
        let facts = FactBase::parse_toml(FACTS).unwrap();
        let func = member(vec![], "M.C", true);
        let text = marshal(&func, &facts, GenericContext::empty());
        assert!(text.starts_with(
            "let result = allocate<(Swift.UnsafeRawPointer, Swift.Error, Swift.Bool)>()"
        ));
        assert!(text.ends_with(
            "let value = fromHandle<M.C>(resultTakeValue(result))\ndeallocate(result)\nreturn value"
        ));
    }

    #[test]
    fn generic_argument_uses_scoped_buffer() {
        let facts = FactBase::parse_toml(FACTS).unwrap();
        let mut func = member(vec![Parameter::new("x", t("T"))], "T", false);
        func.generics.push(GenericParameter::new("T"));
        assert_eq!(
            marshal(&func, &facts, GenericContext::from_scopes(vec![vec!["T"]])),
            "\
let result = allocate<T>()
let xBuffer = allocate<T>()
initialize(xBuffer, x)
defer {
    deinitialize(xBuffer)
    deallocate(xBuffer)
}
vt.func0!(toHandle(self), result, xBuffer)
let value = move(result)
deallocate(result)
return value"
        );
    }

    #[test]
    fn struct_protocol_and_inout_class_arguments() {
        let facts = FactBase::parse_toml(FACTS).unwrap();
        let func = member(
            vec![
                Parameter::new("s", t("M.S")),
                Parameter::new("p", t("M.P")),
                Parameter::inout("c", t("M.C")),
            ],
            "()",
            false,
        );
        assert_eq!(
            marshal(&func, &facts, GenericContext::empty()),
            "\
var sCopy: M.S = s
var pCopy: M.P = p
var cAbi: Swift.UnsafeRawPointer = toHandle(c)
vt.func0!(toHandle(self), &sCopy, &pCopy, &cAbi)
c = fromHandle<M.C>(cAbi)"
        );
    }

    #[test]
    fn closure_adapter_released_by_defer() {
        let facts = FactBase::parse_toml(FACTS).unwrap();
        let func = member(vec![Parameter::new("done", t("(Swift.Int) -> ()"))], "()", false);
        assert_eq!(
            marshal(&func, &facts, GenericContext::empty()),
            "\
let doneAdapter = closureToNative<(Swift.Int) -> ()>(done)
defer {
    deallocate(doneAdapter)
}
vt.func0!(toHandle(self), doneAdapter)"
        );
    }

    #[test]
    fn wrapper_order_puts_return_first() {
        let facts = FactBase::parse_toml(FACTS).unwrap();
        let func = FunctionDeclaration {
            parent: Some("M.P".into()),
            ..member(vec![], "M.S", false)
        };
        let abi = AbiContext::new(&facts, GenericContext::empty());
        let mut scope = IdentifierScope::with_reserved(["self"]);
        let call = NativeCall::wrapper(&func, "GlueWrapping.glue_MDPDf", Some(ReceiverKind::Existential), &[]);
        let text = render(&marshal_to_native(&call, &abi, &mut scope).unwrap().into_block());
        assert_eq!(
            text,
            "\
var selfCopy: M.P = self
let result = allocate<M.S>()
GlueWrapping.glue_MDPDf(result, &selfCopy)
let value = move(result)
deallocate(result)
return value"
        );
    }

    #[test]
    fn nested_closure_is_unsupported() {
        let facts = FactBase::parse_toml(FACTS).unwrap();
        let func = member(vec![Parameter::new("f", t("((Swift.Int) -> ()) -> ()"))], "()", false);
        let abi = AbiContext::new(&facts, GenericContext::empty());
        let mut scope = IdentifierScope::new();
        let names = vec!["f".to_string()];
        let call = NativeCall::slot(&func, Expr::var("slot"), ReceiverKind::Handle, &names);
        let err = marshal_to_native(&call, &abi, &mut scope).unwrap_err();
        assert_eq!(err.code(), crate::diagnostic::ErrorCode::G2001);
    }
}
