//! Neutral code model for generated glue.
//!
//! Generated bodies are trees of [`Stmt`] and [`Expr`]; calls into the
//! support runtime are explicit [`RuntimeOp`] values so the printer for a
//! concrete target can map each one. Nothing here knows about a target
//! syntax; [`fmt::Display`] renders a pseudo-code view for diagnostics.

use std::fmt;

use crate::types::{ClosureType, TypeSpec};

/// A sequence of statements.
pub type Block = Vec<Stmt>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Str(String),
}

/// A member of a type, as addressed from generated code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberRef {
    Method(String),
    Getter(String),
    Setter(String),
    SubscriptGetter,
    SubscriptSetter,
    Constructor,
}

impl MemberRef {
    pub fn name(&self) -> &str {
        match self {
            MemberRef::Method(n) | MemberRef::Getter(n) | MemberRef::Setter(n) => n,
            MemberRef::SubscriptGetter | MemberRef::SubscriptSetter => "subscript",
            MemberRef::Constructor => "init",
        }
    }
}

/// Operations provided by the support runtime linked into both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeOp {
    /// `(ptr) -> ptr`: uninitialized storage for one value of the type.
    Allocate(TypeSpec),
    /// `(ptr, value)`
    Initialize,
    /// `(ptr) -> value`, leaving the storage uninitialized.
    Move,
    /// `(ptr) -> value`, copying.
    Pointee,
    /// `(ptr)`
    Deinitialize,
    /// `(ptr)`
    Deallocate,
    /// `(object) -> raw pointer`
    ToHandle,
    /// `(raw pointer) -> T`
    FromHandle(TypeSpec),
    /// `(value) -> T`, reinterpreting bits.
    BitCast(TypeSpec),
    /// `(ptr) -> host value`: copy native layout into a statically typed host value.
    NativeToHost(TypeSpec),
    /// `(value, ptr)`: copy a host value into native layout.
    HostToNative(TypeSpec),
    /// `(ptr, token) -> host value` for a type known only by runtime token.
    NativeToHostByToken,
    /// `(value, token, ptr)`
    HostToNativeByToken,
    /// `(ptr) -> Bool`: the discriminator of a tri-state result.
    ResultIsError,
    /// `(ptr) -> error`: the error slot; only valid when the flag is set.
    ResultTakeError,
    /// `(ptr) -> value`: the value slot; only valid when the flag is clear.
    ResultTakeValue,
    /// `(ptr) -> ptr`: address of the value slot, for writing a result in place.
    ResultValueSlot,
    /// `(ptr)`: clear the flag once the value slot holds the result.
    ResultSetNotThrown,
    /// `(ptr, error)`: write error and set the flag as one unit.
    ResultSetError,
    /// `(exception) -> error`: package a host exception for the native side.
    ErrorFromException,
    /// `(closure) -> ptr`: adapt a closure to the native function-pointer pair.
    ClosureToNative(ClosureType),
    /// `(pair) -> closure`: wrap a native function-pointer pair as a closure.
    NativeToClosure(ClosureType),
    /// `(token...) -> key`: a vtable cache key from runtime type identities.
    TypeKey,
    /// `(handle) -> proxy` via the object registry.
    ProxyForHandle(TypeSpec),
    /// `(container) -> interface proxy` via the object registry.
    InterfaceForExistential(TypeSpec),
    /// `(value, ptr)`: write an existential container for a host value.
    ExistentialForInterface(TypeSpec),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callee {
    Runtime(RuntimeOp),
    /// A free function by name.
    Function(String),
    /// A member of the receiver expression.
    Member(Box<Expr>, MemberRef),
    /// The base-class implementation of a member.
    Super(MemberRef),
    /// Call through a function pointer.
    Pointer(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arg {
    pub label: Option<String>,
    pub value: Expr,
}

impl Arg {
    pub fn new(value: Expr) -> Self {
        Self { label: None, value }
    }

    pub fn labeled(label: impl Into<String>, value: Expr) -> Self {
        Self {
            label: Some(label.into()),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub callee: Callee,
    pub args: Vec<Arg>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: TypeSpec,
    pub inout: bool,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: TypeSpec) -> Self {
        Self {
            name: name.into(),
            ty,
            inout: false,
        }
    }
}

/// An inline function value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lambda {
    pub params: Vec<Param>,
    pub returns: TypeSpec,
    pub throws: bool,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Var(String),
    Lit(Literal),
    Nil,
    /// The receiver of the enclosing member.
    SelfRef,
    /// A type used as a runtime token.
    TypeToken(TypeSpec),
    /// Address of an addressable local.
    AddressOf(String),
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unwrap(Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    NotNil(Box<Expr>),
    Tuple(Vec<Expr>),
    Call(Box<Call>),
    Try(Box<Expr>),
    Lambda(Box<Lambda>),
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn bool(value: bool) -> Self {
        Expr::Lit(Literal::Bool(value))
    }

    pub fn field(self, name: impl Into<String>) -> Self {
        Expr::Field(Box::new(self), name.into())
    }

    pub fn index(self, key: Expr) -> Self {
        Expr::Index(Box::new(self), Box::new(key))
    }

    pub fn force_unwrap(self) -> Self {
        Expr::Unwrap(Box::new(self))
    }

    pub fn not_nil(self) -> Self {
        Expr::NotNil(Box::new(self))
    }

    pub fn and(self, other: Expr) -> Self {
        Expr::And(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Self {
        Expr::Not(Box::new(self))
    }

    pub fn try_(self) -> Self {
        Expr::Try(Box::new(self))
    }

    pub fn call(callee: Callee, args: Vec<Arg>) -> Self {
        Expr::Call(Box::new(Call { callee, args }))
    }

    /// A runtime operation with positional arguments.
    pub fn runtime(op: RuntimeOp, args: Vec<Expr>) -> Self {
        Expr::call(Callee::Runtime(op), args.into_iter().map(Arg::new).collect())
    }

    pub fn function(name: impl Into<String>, args: Vec<Arg>) -> Self {
        Expr::call(Callee::Function(name.into()), args)
    }

    pub fn as_call(&self) -> Option<&Call> {
        match self {
            Expr::Call(call) => Some(call),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    Let {
        name: String,
        ty: Option<TypeSpec>,
        value: Expr,
    },
    /// An addressable mutable local.
    Var {
        name: String,
        ty: Option<TypeSpec>,
        value: Expr,
    },
    Assign {
        target: Expr,
        value: Expr,
    },
    Expr(Expr),
    Return(Option<Expr>),
    If {
        cond: Expr,
        then: Block,
        otherwise: Option<Block>,
    },
    Throw(Expr),
    /// Runs when the enclosing block exits, in reverse registration order.
    Defer(Block),
    TryCatch {
        body: Block,
        error: String,
        handler: Block,
    },
}

impl Stmt {
    pub fn let_(name: impl Into<String>, value: Expr) -> Self {
        Stmt::Let {
            name: name.into(),
            ty: None,
            value,
        }
    }

    pub fn let_typed(name: impl Into<String>, ty: TypeSpec, value: Expr) -> Self {
        Stmt::Let {
            name: name.into(),
            ty: Some(ty),
            value,
        }
    }

    pub fn var(name: impl Into<String>, ty: TypeSpec, value: Expr) -> Self {
        Stmt::Var {
            name: name.into(),
            ty: Some(ty),
            value,
        }
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        Stmt::Assign { target, value }
    }

    pub fn ret(value: Expr) -> Self {
        Stmt::Return(Some(value))
    }
}

/// Statements produced for one marshaled call.
///
/// `pre` prepares ABI operands, `call` performs the invocation (and for
/// value-returning members ends in a return), `post` releases or writes
/// back. Splicing `pre ++ call ++ post` into a body yields the full call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarshaledCall {
    pub pre: Block,
    pub call: Block,
    pub post: Block,
}

impl MarshaledCall {
    pub fn into_block(self) -> Block {
        let mut block = self.pre;
        block.extend(self.call);
        block.extend(self.post);
        block
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub is_public: bool,
    pub is_override: bool,
    pub is_static: bool,
    pub is_required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Free,
    Method,
    Getter,
    Setter,
    Constructor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDef {
    pub name: String,
    pub kind: FunctionKind,
    pub modifiers: Modifiers,
    pub generics: Vec<String>,
    pub params: Vec<Param>,
    pub returns: TypeSpec,
    pub throws: bool,
    pub body: Block,
}

/// A table of function-pointer slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VTableDef {
    pub name: String,
    pub slots: Vec<(String, TypeSpec)>,
}

/// A stored variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageDef {
    pub name: String,
    pub ty: TypeSpec,
    pub is_static: bool,
    pub initial: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeDefKind {
    /// A subclass overriding a native class.
    Subclass,
    /// A proxy type standing in for a protocol conformance.
    Proxy,
    /// An extension of the type named `name` adding a conformance to `base`.
    Extension,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    pub name: String,
    pub kind: TypeDefKind,
    /// Superclass, conformed protocol, or the extended type.
    pub base: TypeSpec,
    pub generics: Vec<String>,
    pub members: Vec<Decl>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decl {
    Function(FunctionDef),
    VTable(VTableDef),
    Storage(StorageDef),
    Type(TypeDef),
}

impl Decl {
    pub fn name(&self) -> &str {
        match self {
            Decl::Function(f) => &f.name,
            Decl::VTable(v) => &v.name,
            Decl::Storage(s) => &s.name,
            Decl::Type(t) => &t.name,
        }
    }
}

/// Ordered destination for generated declarations.
pub trait CodeSink {
    fn push_decl(&mut self, decl: Decl);
}

impl CodeSink for Vec<Decl> {
    fn push_decl(&mut self, decl: Decl) {
        self.push(decl);
    }
}

// --- Pseudo-code rendering ---

fn join<T: fmt::Display>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{label}: {}", self.value),
            None => write!(f, "{}", self.value),
        }
    }
}

impl fmt::Display for RuntimeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeOp::Allocate(t) => write!(f, "allocate<{t}>"),
            RuntimeOp::Initialize => write!(f, "initialize"),
            RuntimeOp::Move => write!(f, "move"),
            RuntimeOp::Pointee => write!(f, "pointee"),
            RuntimeOp::Deinitialize => write!(f, "deinitialize"),
            RuntimeOp::Deallocate => write!(f, "deallocate"),
            RuntimeOp::ToHandle => write!(f, "toHandle"),
            RuntimeOp::FromHandle(t) => write!(f, "fromHandle<{t}>"),
            RuntimeOp::BitCast(t) => write!(f, "bitCast<{t}>"),
            RuntimeOp::NativeToHost(t) => write!(f, "nativeToHost<{t}>"),
            RuntimeOp::HostToNative(t) => write!(f, "hostToNative<{t}>"),
            RuntimeOp::NativeToHostByToken => write!(f, "nativeToHostByToken"),
            RuntimeOp::HostToNativeByToken => write!(f, "hostToNativeByToken"),
            RuntimeOp::ResultIsError => write!(f, "resultIsError"),
            RuntimeOp::ResultTakeError => write!(f, "resultTakeError"),
            RuntimeOp::ResultTakeValue => write!(f, "resultTakeValue"),
            RuntimeOp::ResultValueSlot => write!(f, "resultValueSlot"),
            RuntimeOp::ResultSetNotThrown => write!(f, "resultSetNotThrown"),
            RuntimeOp::ResultSetError => write!(f, "resultSetError"),
            RuntimeOp::ErrorFromException => write!(f, "errorFromException"),
            RuntimeOp::ClosureToNative(c) => {
                write!(f, "closureToNative<{}>", TypeSpec::Closure(c.clone()))
            }
            RuntimeOp::NativeToClosure(c) => {
                write!(f, "nativeToClosure<{}>", TypeSpec::Closure(c.clone()))
            }
            RuntimeOp::TypeKey => write!(f, "typeKey"),
            RuntimeOp::ProxyForHandle(t) => write!(f, "registry.proxyForHandle<{t}>"),
            RuntimeOp::InterfaceForExistential(t) => {
                write!(f, "registry.interfaceForExistential<{t}>")
            }
            RuntimeOp::ExistentialForInterface(t) => {
                write!(f, "registry.existentialForInterface<{t}>")
            }
        }
    }
}

fn render_member(f: &mut fmt::Formatter<'_>, target: &str, member: &MemberRef, args: &[Arg]) -> fmt::Result {
    match member {
        MemberRef::Method(name) => write!(f, "{target}.{name}({})", join(args)),
        MemberRef::Getter(name) => write!(f, "{target}.{name}"),
        MemberRef::Setter(name) => match args.split_first() {
            Some((value, _)) => write!(f, "{target}.{name} = {}", value.value),
            None => write!(f, "{target}.{name} = ?"),
        },
        MemberRef::SubscriptGetter => write!(f, "{target}[{}]", join(args)),
        MemberRef::SubscriptSetter => match args.split_first() {
            Some((value, rest)) => write!(f, "{target}[{}] = {}", join(rest), value.value),
            None => write!(f, "{target}[] = ?"),
        },
        MemberRef::Constructor => write!(f, "{target}.init({})", join(args)),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Lit(Literal::Bool(b)) => write!(f, "{b}"),
            Expr::Lit(Literal::Int(i)) => write!(f, "{i}"),
            Expr::Lit(Literal::Str(s)) => write!(f, "{s:?}"),
            Expr::Nil => write!(f, "nil"),
            Expr::SelfRef => write!(f, "self"),
            Expr::TypeToken(t) => write!(f, "{t}.self"),
            Expr::AddressOf(name) => write!(f, "&{name}"),
            Expr::Field(base, name) => write!(f, "{base}.{name}"),
            Expr::Index(base, key) => write!(f, "{base}[{key}]"),
            Expr::Unwrap(inner) => write!(f, "{inner}!"),
            Expr::Not(inner) => write!(f, "!{inner}"),
            Expr::And(a, b) => write!(f, "{a} && {b}"),
            Expr::NotNil(inner) => write!(f, "{inner} != nil"),
            Expr::Tuple(items) => write!(f, "({})", join(items)),
            Expr::Try(inner) => write!(f, "try {inner}"),
            Expr::Lambda(lambda) => {
                let params: Vec<String> =
                    lambda.params.iter().map(|p| format!("{}: {}", p.name, p.ty)).collect();
                write!(f, "{{ ({}) -> {} in ", params.join(", "), lambda.returns)?;
                for stmt in &lambda.body {
                    write!(f, "{}; ", stmt.to_string().replace('\n', " "))?;
                }
                write!(f, "}}")
            }
            Expr::Call(call) => match &call.callee {
                Callee::Runtime(op) => write!(f, "{op}({})", join(&call.args)),
                Callee::Function(name) => write!(f, "{name}({})", join(&call.args)),
                Callee::Pointer(target) => write!(f, "{target}({})", join(&call.args)),
                Callee::Super(member) => render_member(f, "super", member, &call.args),
                Callee::Member(target, member) => {
                    render_member(f, &target.to_string(), member, &call.args)
                }
            },
        }
    }
}

fn render_block(block: &[Stmt], indent: usize, lines: &mut Vec<String>) {
    for stmt in block {
        render_stmt(stmt, indent, lines);
    }
}

fn render_stmt(stmt: &Stmt, indent: usize, lines: &mut Vec<String>) {
    let pad = "    ".repeat(indent);
    match stmt {
        Stmt::Let { name, ty, value } | Stmt::Var { name, ty, value } => {
            let keyword = if matches!(stmt, Stmt::Let { .. }) { "let" } else { "var" };
            match ty {
                Some(ty) => lines.push(format!("{pad}{keyword} {name}: {ty} = {value}")),
                None => lines.push(format!("{pad}{keyword} {name} = {value}")),
            }
        }
        Stmt::Assign { target, value } => lines.push(format!("{pad}{target} = {value}")),
        Stmt::Expr(expr) => lines.push(format!("{pad}{expr}")),
        Stmt::Return(Some(value)) => lines.push(format!("{pad}return {value}")),
        Stmt::Return(None) => lines.push(format!("{pad}return")),
        Stmt::Throw(value) => lines.push(format!("{pad}throw {value}")),
        Stmt::If {
            cond,
            then,
            otherwise,
        } => {
            lines.push(format!("{pad}if {cond} {{"));
            render_block(then, indent + 1, lines);
            if let Some(otherwise) = otherwise {
                lines.push(format!("{pad}}} else {{"));
                render_block(otherwise, indent + 1, lines);
            }
            lines.push(format!("{pad}}}"));
        }
        Stmt::Defer(body) => {
            lines.push(format!("{pad}defer {{"));
            render_block(body, indent + 1, lines);
            lines.push(format!("{pad}}}"));
        }
        Stmt::TryCatch {
            body,
            error,
            handler,
        } => {
            lines.push(format!("{pad}do {{"));
            render_block(body, indent + 1, lines);
            lines.push(format!("{pad}}} catch {error} {{"));
            render_block(handler, indent + 1, lines);
            lines.push(format!("{pad}}}"));
        }
    }
}

/// Render a block as pseudo-code, one statement per line.
pub fn render(block: &[Stmt]) -> String {
    let mut lines = Vec::new();
    render_block(block, 0, &mut lines);
    lines.join("\n")
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = Vec::new();
        render_stmt(self, 0, &mut lines);
        write!(f, "{}", lines.join("\n"))
    }
}

fn render_decl(decl: &Decl, indent: usize, lines: &mut Vec<String>) {
    let pad = "    ".repeat(indent);
    match decl {
        Decl::Function(func) => {
            let mut head = String::new();
            if func.modifiers.is_public {
                head.push_str("public ");
            }
            if func.modifiers.is_required {
                head.push_str("required ");
            }
            if func.modifiers.is_override {
                head.push_str("override ");
            }
            if func.modifiers.is_static {
                head.push_str("static ");
            }
            let keyword = match func.kind {
                FunctionKind::Constructor => "init",
                FunctionKind::Getter => "get",
                FunctionKind::Setter => "set",
                FunctionKind::Free | FunctionKind::Method => "func",
            };
            let generics = if func.generics.is_empty() {
                String::new()
            } else {
                format!("<{}>", func.generics.join(", "))
            };
            let params: Vec<String> = func
                .params
                .iter()
                .map(|p| {
                    let inout = if p.inout { "inout " } else { "" };
                    format!("{}: {inout}{}", p.name, p.ty)
                })
                .collect();
            let throws = if func.throws { " throws" } else { "" };
            let returns = if func.returns.is_empty_tuple() {
                String::new()
            } else {
                format!(" -> {}", func.returns)
            };
            lines.push(format!(
                "{pad}{head}{keyword} {}{generics}({}){throws}{returns} {{",
                func.name,
                params.join(", ")
            ));
            render_block(&func.body, indent + 1, lines);
            lines.push(format!("{pad}}}"));
        }
        Decl::VTable(vtable) => {
            lines.push(format!("{pad}struct {} {{", vtable.name));
            for (name, ty) in &vtable.slots {
                lines.push(format!("{pad}    var {name}: ({ty})?"));
            }
            lines.push(format!("{pad}}}"));
        }
        Decl::Storage(storage) => {
            let keyword = if storage.is_static { "static var" } else { "var" };
            match &storage.initial {
                Some(initial) => lines.push(format!(
                    "{pad}{keyword} {}: {} = {initial}",
                    storage.name, storage.ty
                )),
                None => lines.push(format!("{pad}{keyword} {}: {}", storage.name, storage.ty)),
            }
        }
        Decl::Type(def) => {
            let keyword = match def.kind {
                TypeDefKind::Subclass => "class",
                TypeDefKind::Proxy => "class",
                TypeDefKind::Extension => "extension",
            };
            let generics = if def.generics.is_empty() {
                String::new()
            } else {
                format!("<{}>", def.generics.join(", "))
            };
            match def.kind {
                TypeDefKind::Extension => lines.push(format!("{pad}{keyword} {}: {} {{", def.name, def.base)),
                _ => lines.push(format!("{pad}{keyword} {}{generics}: {} {{", def.name, def.base)),
            }
            for member in &def.members {
                render_decl(member, indent + 1, lines);
            }
            lines.push(format!("{pad}}}"));
        }
    }
}

impl fmt::Display for Decl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = Vec::new();
        render_decl(self, 0, &mut lines);
        write!(f, "{}", lines.join("\n"))
    }
}
