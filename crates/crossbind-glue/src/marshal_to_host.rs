//! Engine A: receiving a native vtable call in host code.
//!
//! For one slot, builds the function the installer stores in the table: it
//! unpacks the ABI operands, resolves the receiver through the object
//! registry, calls the host member, and writes the result or the thrown
//! error back through the hidden return pointer.

use crossbind_core::code::{
    Arg, Block, Callee, Expr, FunctionDef, FunctionKind, Lambda, Modifiers, Param, RuntimeOp, Stmt,
};
use crossbind_core::{ClosureType, FunctionDeclaration, IdentifierScope, TypeSpec};

use crate::diagnostic::ErrorCode;
use crate::error::{GlueError, Result};
use crate::registry::ObjectRegistry;
use crate::strategy::{
    bind_parameters, check_closure, check_member, member_ref, receiver_type, AbiContext,
    MarshalStrategy, ReceiverKind,
};

/// Builds slot receivers for one owner.
pub struct HostMarshaler<'a> {
    abi: &'a AbiContext<'a>,
    registry: &'a dyn ObjectRegistry,
}

impl<'a> HostMarshaler<'a> {
    pub fn new(abi: &'a AbiContext<'a>, registry: &'a dyn ObjectRegistry) -> Self {
        Self { abi, registry }
    }

    /// The receiver function for `member`'s slot, named `name`.
    pub fn receiver(&self, member: &FunctionDeclaration, receiver: ReceiverKind, name: &str) -> Result<FunctionDef> {
        check_member(member)?;
        let mut scope = IdentifierScope::new();
        let this = scope.mint("this");
        let hidden = self.abi.hidden_return_type(member)?;
        let retval = hidden.as_ref().map(|_| scope.mint("retval"));
        let locals = bind_parameters(member, &mut scope);

        let mut params = vec![Param::new(this.clone(), receiver_type(member, receiver))];
        if let (Some(ty), Some(name)) = (&hidden, &retval) {
            params.push(Param::new(name.clone(), ty.clone()));
        }
        for (param, local) in member.parameters.iter().zip(&locals) {
            params.push(Param::new(local.clone(), self.abi.abi_param_type(param)?));
        }

        let mut body = Block::new();
        let owner = self.owner_type(member);
        let target = scope.mint("target");
        let resolved = match receiver {
            ReceiverKind::Handle => self.registry.proxy_for_handle(Expr::var(this), &owner),
            ReceiverKind::Existential => self.registry.interface_for_existential(Expr::var(this), &owner),
        };
        body.push(Stmt::let_(target.clone(), resolved));

        let mut args = Vec::new();
        let mut write_backs = Vec::new();
        for (param, local) in member.parameters.iter().zip(&locals) {
            let strategy = self.abi.strategy(&param.ty)?;
            let value = if param.inout {
                let host = scope.mint(&format!("{local}Value"));
                body.push(Stmt::var(host.clone(), param.ty.clone(), self.read(Expr::var(local.clone()), &param.ty, strategy, member)?));
                if let Some(stmt) = self.write(Expr::var(host.clone()), &param.ty, strategy, Expr::var(local.clone()))? {
                    write_backs.push(stmt);
                }
                Expr::AddressOf(host)
            } else {
                self.unpack_argument(local, &param.ty, strategy, member, &mut scope)?
            };
            args.push(match param.name.as_str() {
                "" => Arg::new(value),
                label => Arg::labeled(label, value),
            });
        }
        let invoke = Expr::call(
            Callee::Member(Box::new(Expr::var(target)), member_ref(member)),
            args,
        );

        let ret = &member.return_type;
        let ret_strategy = self.abi.strategy(ret)?;
        let returns = match (&retval, member.throws) {
            (Some(retval), true) => {
                let error = scope.mint("error");
                let mut attempt = Block::new();
                if ret_strategy == MarshalStrategy::Void {
                    attempt.push(Stmt::Expr(invoke.try_()));
                    attempt.extend(write_backs);
                } else {
                    let value = scope.mint("value");
                    attempt.push(Stmt::let_(value.clone(), invoke.try_()));
                    attempt.extend(write_backs);
                    let slot = Expr::runtime(RuntimeOp::ResultValueSlot, vec![Expr::var(retval.clone())]);
                    attempt.extend(self.write(Expr::var(value), ret, ret_strategy, slot)?);
                }
                attempt.push(Stmt::Expr(Expr::runtime(
                    RuntimeOp::ResultSetNotThrown,
                    vec![Expr::var(retval.clone())],
                )));
                body.push(Stmt::TryCatch {
                    body: attempt,
                    error: error.clone(),
                    handler: vec![Stmt::Expr(Expr::runtime(
                        RuntimeOp::ResultSetError,
                        vec![
                            Expr::var(retval.clone()),
                            Expr::runtime(RuntimeOp::ErrorFromException, vec![Expr::var(error)]),
                        ],
                    ))],
                });
                TypeSpec::empty()
            }
            (Some(retval), false) => {
                let value = scope.mint("value");
                body.push(Stmt::let_(value.clone(), invoke));
                body.extend(write_backs);
                body.extend(self.write(Expr::var(value), ret, ret_strategy, Expr::var(retval.clone()))?);
                TypeSpec::empty()
            }
            (None, _) if ret_strategy == MarshalStrategy::Void => {
                body.push(Stmt::Expr(invoke));
                body.extend(write_backs);
                TypeSpec::empty()
            }
            (None, _) => {
                let value = scope.mint("value");
                body.push(Stmt::let_(value.clone(), invoke));
                body.extend(write_backs);
                body.push(Stmt::ret(self.to_abi(Expr::var(value), ret, ret_strategy, member)?));
                self.abi.abi_value_type(ret)?
            }
        };

        Ok(FunctionDef {
            name: name.to_string(),
            kind: FunctionKind::Free,
            modifiers: Modifiers {
                is_public: true,
                ..Modifiers::default()
            },
            generics: self.abi.generics().iter().map(|(_, g)| g.to_string()).collect(),
            params,
            returns,
            throws: false,
            body,
        })
    }

    fn owner_type(&self, member: &FunctionDeclaration) -> TypeSpec {
        let parent = member.parent.as_deref().unwrap_or_default();
        self.abi
            .facts()
            .lookup_type(parent)
            .map(|decl| decl.as_type_spec())
            .unwrap_or_else(|| TypeSpec::named(parent))
    }

    fn unpack_argument(
        &self,
        local: &str,
        ty: &TypeSpec,
        strategy: MarshalStrategy,
        member: &FunctionDeclaration,
        scope: &mut IdentifierScope,
    ) -> Result<Expr> {
        let operand = Expr::var(local);
        match strategy {
            MarshalStrategy::Direct | MarshalStrategy::Void => Ok(operand),
            MarshalStrategy::Handle | MarshalStrategy::DynamicSelf => Ok(self.registry.proxy_for_handle(operand, ty)),
            MarshalStrategy::BitCast => Ok(Expr::runtime(RuntimeOp::BitCast(ty.clone()), vec![operand])),
            MarshalStrategy::Closure => match ty.as_closure() {
                Some(closure) => self.thunk(operand, closure, member, scope),
                None => Ok(operand),
            },
            MarshalStrategy::Layout
            | MarshalStrategy::Existential
            | MarshalStrategy::ProtocolList
            | MarshalStrategy::TypeToken => self.read(operand, ty, strategy, member),
        }
    }

    /// Read a host value from a pointer to its ABI form.
    /// Read a native value at `pointer` into host form. Protocol
    /// compositions have no host representation, whether passed by value or
    /// inout.
    fn read(&self, pointer: Expr, ty: &TypeSpec, strategy: MarshalStrategy, member: &FunctionDeclaration) -> Result<Expr> {
        let pointee = || Expr::runtime(RuntimeOp::Pointee, vec![pointer.clone()]);
        let expr = match strategy {
            MarshalStrategy::Direct | MarshalStrategy::Void => pointee(),
            MarshalStrategy::Handle | MarshalStrategy::DynamicSelf => self.registry.proxy_for_handle(pointee(), ty),
            MarshalStrategy::BitCast => Expr::runtime(RuntimeOp::BitCast(ty.clone()), vec![pointee()]),
            MarshalStrategy::Layout => Expr::runtime(RuntimeOp::NativeToHost(ty.clone()), vec![pointer]),
            MarshalStrategy::Existential => self.registry.interface_for_existential(pointer, ty),
            MarshalStrategy::ProtocolList => {
                return Err(GlueError::unsupported(
                    ErrorCode::G2003,
                    member.qualified_name(),
                    format!("protocol composition {ty}"),
                ))
            }
            MarshalStrategy::TypeToken => Expr::runtime(
                RuntimeOp::NativeToHostByToken,
                vec![pointer, Expr::TypeToken(ty.clone())],
            ),
            MarshalStrategy::Closure => {
                return Err(GlueError::unsupported(
                    ErrorCode::G2001,
                    member.qualified_name(),
                    format!("closure {ty} passed by reference"),
                ))
            }
        };
        Ok(expr)
    }

    /// Write a host value to `dest` in ABI form.
    fn write(&self, value: Expr, ty: &TypeSpec, strategy: MarshalStrategy, dest: Expr) -> Result<Option<Stmt>> {
        let initialize = |v: Expr| Expr::runtime(RuntimeOp::Initialize, vec![dest.clone(), v]);
        let expr = match strategy {
            MarshalStrategy::Void => return Ok(None),
            MarshalStrategy::Direct => initialize(value),
            MarshalStrategy::Handle | MarshalStrategy::DynamicSelf => {
                initialize(self.registry.handle_for_proxy(value))
            }
            MarshalStrategy::BitCast => {
                initialize(Expr::runtime(RuntimeOp::BitCast(self.abi.raw_type(ty)), vec![value]))
            }
            MarshalStrategy::Closure => {
                let closure = ty.as_closure().cloned().unwrap_or_else(|| ClosureType::new(Vec::new(), TypeSpec::empty()));
                initialize(Expr::runtime(RuntimeOp::ClosureToNative(closure), vec![value]))
            }
            MarshalStrategy::Layout => Expr::runtime(RuntimeOp::HostToNative(ty.clone()), vec![value, dest]),
            MarshalStrategy::Existential | MarshalStrategy::ProtocolList => {
                self.registry.existential_for_interface(value, ty, dest)
            }
            MarshalStrategy::TypeToken => Expr::runtime(
                RuntimeOp::HostToNativeByToken,
                vec![value, Expr::TypeToken(ty.clone()), dest],
            ),
        };
        Ok(Some(Stmt::Expr(expr)))
    }

    /// A host value returned by value across the boundary.
    fn to_abi(&self, value: Expr, ty: &TypeSpec, strategy: MarshalStrategy, member: &FunctionDeclaration) -> Result<Expr> {
        match strategy {
            MarshalStrategy::Direct | MarshalStrategy::Void => Ok(value),
            MarshalStrategy::Handle | MarshalStrategy::DynamicSelf => Ok(self.registry.handle_for_proxy(value)),
            MarshalStrategy::BitCast => Ok(Expr::runtime(RuntimeOp::BitCast(self.abi.raw_type(ty)), vec![value])),
            other => Err(GlueError::internal(
                ErrorCode::G3004,
                format!("{} returns {ty} by value with strategy {other:?}", member.qualified_name()),
            )),
        }
    }

    /// A host closure forwarding to the native function pair behind `pair`,
    /// marshaling its own arguments and result in the opposite direction.
    fn thunk(&self, pair: Expr, closure: &ClosureType, member: &FunctionDeclaration, scope: &mut IdentifierScope) -> Result<Expr> {
        check_closure(closure, member)?;
        let function = Expr::runtime(RuntimeOp::NativeToClosure(closure.clone()), vec![pair]);
        let mut body = Block::new();
        let mut params = Vec::new();
        let mut operands = Vec::new();

        let ret = closure.return_type.as_ref();
        let ret_strategy = self.abi.strategy(ret)?;
        let hidden = closure.throws || ret_strategy.returns_through_pointer();
        let result = if hidden {
            let value_ty = self.abi.abi_value_type(ret)?;
            let storage = if closure.throws { TypeSpec::throwing_result(value_ty) } else { value_ty };
            let name = scope.mint("closureResult");
            body.push(Stmt::let_(name.clone(), Expr::runtime(RuntimeOp::Allocate(storage), vec![])));
            Some(name)
        } else {
            None
        };

        for ty in closure.argument_types() {
            let name = scope.mint("p");
            params.push(Param::new(name.clone(), ty.clone()));
            let strategy = self.abi.strategy(ty)?;
            let operand = match strategy {
                MarshalStrategy::Direct | MarshalStrategy::Void => Expr::var(name),
                MarshalStrategy::Handle | MarshalStrategy::DynamicSelf => {
                    self.registry.handle_for_proxy(Expr::var(name))
                }
                MarshalStrategy::BitCast => {
                    Expr::runtime(RuntimeOp::BitCast(self.abi.raw_type(ty)), vec![Expr::var(name)])
                }
                MarshalStrategy::Closure => {
                    return Err(GlueError::unsupported(
                        ErrorCode::G2001,
                        member.qualified_name(),
                        "closure argument of a closure",
                    ))
                }
                MarshalStrategy::Layout
                | MarshalStrategy::Existential
                | MarshalStrategy::ProtocolList
                | MarshalStrategy::TypeToken => {
                    let buffer = scope.mint(&format!("{name}Buffer"));
                    body.push(Stmt::let_(
                        buffer.clone(),
                        Expr::runtime(RuntimeOp::Allocate(ty.clone()), vec![]),
                    ));
                    body.extend(self.write(Expr::var(name), ty, strategy, Expr::var(buffer.clone()))?);
                    body.push(Stmt::Defer(vec![
                        Stmt::Expr(Expr::runtime(RuntimeOp::Deinitialize, vec![Expr::var(buffer.clone())])),
                        Stmt::Expr(Expr::runtime(RuntimeOp::Deallocate, vec![Expr::var(buffer.clone())])),
                    ]));
                    Expr::var(buffer)
                }
            };
            operands.push(operand);
        }

        let mut args: Vec<Arg> = result.iter().map(|r| Arg::new(Expr::var(r.clone()))).collect();
        args.extend(operands.into_iter().map(Arg::new));
        let invoke = Expr::call(Callee::Pointer(Box::new(function)), args);
        let release = |name: &str| Stmt::Expr(Expr::runtime(RuntimeOp::Deallocate, vec![Expr::var(name)]));

        match result {
            None if ret_strategy == MarshalStrategy::Void => body.push(Stmt::Expr(invoke)),
            None => {
                let converted = match ret_strategy {
                    MarshalStrategy::Handle | MarshalStrategy::DynamicSelf => self.registry.proxy_for_handle(invoke, ret),
                    MarshalStrategy::BitCast => Expr::runtime(RuntimeOp::BitCast(ret.clone()), vec![invoke]),
                    _ => invoke,
                };
                body.push(Stmt::ret(converted));
            }
            Some(result) => {
                body.push(Stmt::Expr(invoke));
                if closure.throws {
                    let error = scope.mint("closureError");
                    body.push(Stmt::If {
                        cond: Expr::runtime(RuntimeOp::ResultIsError, vec![Expr::var(result.clone())]),
                        then: vec![
                            Stmt::let_(
                                error.clone(),
                                Expr::runtime(RuntimeOp::ResultTakeError, vec![Expr::var(result.clone())]),
                            ),
                            release(&result),
                            Stmt::Throw(Expr::var(error)),
                        ],
                        otherwise: None,
                    });
                }
                if ret_strategy == MarshalStrategy::Void {
                    body.push(release(&result));
                } else {
                    let value = scope.mint("closureValue");
                    let slot = if closure.throws {
                        Expr::runtime(RuntimeOp::ResultValueSlot, vec![Expr::var(result.clone())])
                    } else {
                        Expr::var(result.clone())
                    };
                    body.push(Stmt::let_(value.clone(), self.read(slot, ret, ret_strategy, member)?));
                    body.push(release(&result));
                    body.push(Stmt::ret(Expr::var(value)));
                }
            }
        }

        Ok(Expr::Lambda(Box::new(Lambda {
            params,
            returns: ret.clone(),
            throws: closure.throws,
            body,
        })))
    }
}
