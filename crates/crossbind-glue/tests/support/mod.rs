//! A small evaluator for generated glue.
//!
//! Stands in for both runtimes at once. Native code is modeled by Rust
//! closures that read and write evaluator memory, host classes by method
//! tables keyed by member, and the support runtime's operations act on a
//! heap that counts every allocation and release so tests can check that
//! scratch storage is freed exactly once.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use crossbind_core::code::{
    Call, Callee, Decl, Expr, FunctionDef, FunctionKind, Lambda, Literal, MemberRef, RuntimeOp, Stmt,
    TypeDef, TypeDefKind,
};
use crossbind_core::types::DICTIONARY;
use crossbind_core::{FactBase, TypeSpec};

pub const SHAPES: &str = include_str!("../fixtures/shapes.toml");

pub fn shapes() -> FactBase {
    FactBase::parse_toml(SHAPES).expect("shapes fixture parses")
}

/// Route generator logs to the test harness; `RUST_LOG=crossbind_glue=debug`
/// shows slot assignment and skipped members.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `Ok` with the returned value, or `Err` with the thrown error.
pub type Outcome = Result<Value, Value>;

pub type Native = Rc<dyn Fn(&mut Machine, Vec<Value>) -> Outcome>;

pub fn native(f: impl Fn(&mut Machine, Vec<Value>) -> Outcome + 'static) -> Native {
    Rc::new(f)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ptr {
    cell: usize,
    /// Element of a tuple cell, for result slots.
    elem: Option<usize>,
}

#[derive(Clone)]
pub enum Value {
    Unit,
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
    Error(String),
    Ptr(Ptr),
    Obj(usize),
    Type(String),
    Key(Vec<String>),
    Tuple(Vec<Value>),
    Record(BTreeMap<String, Value>),
    Map(BTreeMap<Vec<String>, Value>),
    Func(Native),
}

impl Value {
    pub fn error(message: &str) -> Self {
        Value::Error(message.to_string())
    }

    pub fn record<const N: usize>(fields: [(&str, Value); N]) -> Self {
        Value::Record(fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    /// A tri-state result as native code writes it.
    pub fn result(value: Value, error: Value, thrown: bool) -> Self {
        Value::Tuple(vec![value, error, Value::Bool(thrown)])
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            other => panic!("expected a Bool, found {other:?}"),
        }
    }

    pub fn as_int(&self) -> i64 {
        match self {
            Value::Int(i) => *i,
            other => panic!("expected an Int, found {other:?}"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) | (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b))
            | (Value::Error(a), Value::Error(b))
            | (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Ptr(a), Value::Ptr(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => a == b,
            (Value::Key(a), Value::Key(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Func(a), Value::Func(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Error(e) => write!(f, "error({e})"),
            Value::Ptr(p) => match p.elem {
                Some(elem) => write!(f, "&cell{}.{elem}", p.cell),
                None => write!(f, "&cell{}", p.cell),
            },
            Value::Obj(id) => write!(f, "obj#{id}"),
            Value::Type(t) => write!(f, "{t}.self"),
            Value::Key(k) => write!(f, "key{k:?}"),
            Value::Tuple(items) => f.debug_tuple("").field(items).finish(),
            Value::Record(fields) => f.debug_map().entries(fields).finish(),
            Value::Map(entries) => f.debug_map().entries(entries).finish(),
            Value::Func(_) => write!(f, "<func>"),
        }
    }
}

struct Cell {
    value: Option<Value>,
    /// Created by `allocate` and owed a `deallocate`.
    counted: bool,
    live: bool,
}

struct Object {
    class: String,
    fields: HashMap<String, Value>,
    /// Bound generic parameters of the instance.
    bindings: HashMap<String, String>,
}

enum Flow {
    Normal,
    Return(Value),
    Throw(Value),
}

struct Frame {
    scopes: Vec<HashMap<String, usize>>,
    receiver: Option<Value>,
    bindings: HashMap<String, String>,
}

impl Frame {
    fn new(receiver: Option<Value>, bindings: HashMap<String, String>) -> Self {
        Self {
            scopes: vec![HashMap::new()],
            receiver,
            bindings,
        }
    }

    fn bind(&mut self, name: &str, cell: usize) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), cell);
        }
    }

    fn lookup(&self, name: &str) -> Option<usize> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name).copied())
    }

    fn captured(&self) -> HashMap<String, usize> {
        let mut env = HashMap::new();
        for scope in &self.scopes {
            env.extend(scope.iter().map(|(k, v)| (k.clone(), *v)));
        }
        env
    }

    fn type_name(&self, spec: &TypeSpec) -> String {
        match spec {
            TypeSpec::Named(named) if named.generic_args.is_empty() => self
                .bindings
                .get(&named.name)
                .cloned()
                .unwrap_or_else(|| named.name.clone()),
            other => other.to_string(),
        }
    }
}

fn member_key(member: &MemberRef) -> String {
    match member {
        MemberRef::Method(name) => name.clone(),
        MemberRef::Getter(name) => format!("get {name}"),
        MemberRef::Setter(name) => format!("set {name}"),
        MemberRef::SubscriptGetter => "get subscript".to_string(),
        MemberRef::SubscriptSetter => "set subscript".to_string(),
        MemberRef::Constructor => "init".to_string(),
    }
}

fn implements(def: &FunctionDef, member: &MemberRef) -> bool {
    match member {
        MemberRef::Method(name) => def.kind == FunctionKind::Method && &def.name == name,
        MemberRef::Getter(name) => def.kind == FunctionKind::Getter && &def.name == name,
        MemberRef::Setter(name) => def.kind == FunctionKind::Setter && &def.name == name,
        MemberRef::SubscriptGetter => def.kind == FunctionKind::Getter && def.name == "subscript",
        MemberRef::SubscriptSetter => def.kind == FunctionKind::Setter && def.name == "subscript",
        MemberRef::Constructor => def.kind == FunctionKind::Constructor,
    }
}

fn find_member<'t>(def: &'t TypeDef, member: &MemberRef) -> Option<&'t FunctionDef> {
    def.members.iter().find_map(|decl| match decl {
        Decl::Function(f) if implements(f, member) => Some(f),
        _ => None,
    })
}

fn pointer(value: &Value) -> Ptr {
    match value {
        Value::Ptr(p) => *p,
        other => panic!("expected a pointer, found {other:?}"),
    }
}

fn element(value: &Value, index: usize) -> Value {
    let p = pointer(value);
    Value::Ptr(Ptr {
        cell: p.cell,
        elem: Some(index),
    })
}

fn key_of(value: &Value) -> Vec<String> {
    match value {
        Value::Key(key) => key.clone(),
        other => panic!("expected a type key, found {other:?}"),
    }
}

/// Evaluator state: memory, loaded declarations, and the doubles standing
/// in for native code and host classes.
#[derive(Default)]
pub struct Machine {
    cells: Vec<Cell>,
    objects: Vec<Object>,
    globals: HashMap<String, usize>,
    functions: HashMap<String, FunctionDef>,
    vtables: HashSet<String>,
    classes: HashMap<String, TypeDef>,
    natives: HashMap<String, Native>,
    bases: HashMap<String, Native>,
    host_methods: HashMap<(String, String), Native>,
    proxies: HashMap<usize, usize>,
    pub allocations: usize,
    pub deallocations: usize,
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_decls(decls: &[Decl]) -> Self {
        let mut machine = Self::new();
        machine.load(decls);
        machine
    }

    pub fn load(&mut self, decls: &[Decl]) {
        for decl in decls {
            match decl {
                Decl::Function(f) => {
                    self.functions.insert(f.name.clone(), f.clone());
                }
                Decl::VTable(v) => {
                    self.vtables.insert(v.name.clone());
                }
                Decl::Storage(s) => {
                    let value = match &s.initial {
                        Some(initial) => self.eval_detached(initial),
                        None => Value::Nil,
                    };
                    let cell = self.local(value);
                    self.globals.insert(s.name.clone(), cell);
                }
                // Extensions of one placeholder type accumulate members.
                Decl::Type(t) if t.kind == TypeDefKind::Extension => match self.classes.get_mut(&t.name) {
                    Some(existing) => existing.members.extend(t.members.iter().cloned()),
                    None => {
                        self.classes.insert(t.name.clone(), t.clone());
                    }
                },
                Decl::Type(t) => {
                    self.classes.insert(t.name.clone(), t.clone());
                }
            }
        }
    }

    /// A free function standing in for a generated wrapper.
    pub fn define(&mut self, name: &str, f: Native) {
        self.natives.insert(name.to_string(), f);
    }

    /// The native base-class implementation of `member`. Receives the
    /// receiver first.
    pub fn on_base(&mut self, member: MemberRef, f: Native) {
        self.bases.insert(member_key(&member), f);
    }

    /// A member of a host class. Receives the receiver first.
    pub fn on_host(&mut self, class: &str, member: MemberRef, f: Native) {
        self.host_methods.insert((class.to_string(), member_key(&member)), f);
    }

    pub fn host_object(&mut self, class: &str) -> Value {
        self.objects.push(Object {
            class: class.to_string(),
            fields: HashMap::new(),
            bindings: HashMap::new(),
        });
        Value::Obj(self.objects.len() - 1)
    }

    /// Make `proxy` the registry's answer for `handle`.
    pub fn register_proxy(&mut self, handle: &Value, proxy: &Value) {
        match (handle, proxy) {
            (Value::Obj(h), Value::Obj(p)) => {
                self.proxies.insert(*h, *p);
            }
            other => panic!("proxies map objects to objects, got {other:?}"),
        }
    }

    /// An instance of a generated type with its stored fields initialized
    /// but no constructor run.
    pub fn instantiate(&mut self, class: &str, bindings: &[(&str, &str)]) -> Value {
        let def = self.classes.get(class).cloned().unwrap_or_else(|| panic!("no type {class}"));
        let mut fields = HashMap::new();
        for member in &def.members {
            if let Decl::Storage(s) = member {
                let value = match &s.initial {
                    Some(initial) => self.eval_detached(initial),
                    None => Value::Nil,
                };
                fields.insert(s.name.clone(), value);
            }
        }
        self.objects.push(Object {
            class: class.to_string(),
            fields,
            bindings: bindings.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        });
        Value::Obj(self.objects.len() - 1)
    }

    pub fn construct(&mut self, class: &str, bindings: &[(&str, &str)], args: Vec<Value>) -> Outcome {
        let object = self.instantiate(class, bindings);
        self.call_member(object.clone(), &MemberRef::Constructor, args)?;
        Ok(object)
    }

    pub fn field(&self, object: &Value, name: &str) -> Value {
        match object {
            Value::Obj(id) => self.objects[*id].fields.get(name).cloned().unwrap_or(Value::Nil),
            Value::Record(fields) => fields.get(name).cloned().unwrap_or(Value::Nil),
            other => panic!("no field {name} on {other:?}"),
        }
    }

    pub fn global(&self, name: &str) -> Value {
        let cell = self.globals.get(name).copied().unwrap_or_else(|| panic!("no global {name}"));
        self.load_cell(cell)
    }

    pub fn call_method(&mut self, target: &Value, name: &str, args: Vec<Value>) -> Outcome {
        self.call_member(target.clone(), &MemberRef::Method(name.to_string()), args)
    }

    pub fn call_member(&mut self, target: Value, member: &MemberRef, args: Vec<Value>) -> Outcome {
        let Value::Obj(id) = target else {
            panic!("member call on {target:?}");
        };
        let class = self.objects[id].class.clone();
        let def = self.classes.get(&class).and_then(|t| find_member(t, member)).cloned();
        if let Some(def) = def {
            let bindings = self.objects[id].bindings.clone();
            return self.invoke(&def, Some(target), bindings, args);
        }
        let key = (class, member_key(member));
        let f = self
            .host_methods
            .get(&key)
            .cloned()
            .unwrap_or_else(|| panic!("{} has no member {}", key.0, key.1));
        let mut all = vec![target];
        all.extend(args);
        f(self, all)
    }

    pub fn call_function(&mut self, name: &str, args: Vec<Value>) -> Outcome {
        if let Some(def) = self.functions.get(name).cloned() {
            return self.invoke(&def, None, HashMap::new(), args);
        }
        if self.vtables.contains(name) {
            return Ok(Value::Record(BTreeMap::new()));
        }
        if name.starts_with(DICTIONARY) {
            return Ok(Value::Map(BTreeMap::new()));
        }
        let f = self.natives.get(name).cloned().unwrap_or_else(|| panic!("no function {name}"));
        f(self, args)
    }

    /// Build a native table from `slots` and hand it to `installer`. Slots
    /// not listed stay nil.
    pub fn install(&mut self, installer: &str, slots: Vec<(&str, Native)>, tokens: Vec<Value>) {
        let table = Value::Record(slots.into_iter().map(|(name, f)| (name.to_string(), Value::Func(f))).collect());
        let uvt = self.alloc_native(table);
        let mut args = vec![uvt];
        args.extend(tokens);
        if let Err(e) = self.call_function(installer, args) {
            panic!("installer threw {e:?}");
        }
    }

    /// Storage owned by native code; not counted.
    pub fn alloc_native(&mut self, value: Value) -> Value {
        Value::Ptr(Ptr {
            cell: self.local(value),
            elem: None,
        })
    }

    pub fn read(&self, p: &Value) -> Value {
        let p = pointer(p);
        let cell = &self.cells[p.cell];
        assert!(cell.live, "read of freed cell {}", p.cell);
        let value = cell
            .value
            .as_ref()
            .unwrap_or_else(|| panic!("read of uninitialized cell {}", p.cell));
        match (p.elem, value) {
            (None, value) => value.clone(),
            (Some(i), Value::Tuple(items)) => items[i].clone(),
            (Some(i), other) => panic!("element {i} of non-tuple {other:?}"),
        }
    }

    pub fn write(&mut self, p: &Value, value: Value) {
        let p = pointer(p);
        let cell = &mut self.cells[p.cell];
        assert!(cell.live, "write to freed cell {}", p.cell);
        match p.elem {
            None => cell.value = Some(value),
            Some(i) => {
                let slot = cell
                    .value
                    .get_or_insert_with(|| Value::result(Value::Unit, Value::Nil, false));
                match slot {
                    Value::Tuple(items) => items[i] = value,
                    other => panic!("element {i} of non-tuple {other:?}"),
                }
            }
        }
    }

    /// Counted allocations not yet released.
    pub fn live_allocations(&self) -> usize {
        self.cells.iter().filter(|c| c.counted && c.live).count()
    }

    fn local(&mut self, value: Value) -> usize {
        self.cells.push(Cell {
            value: Some(value),
            counted: false,
            live: true,
        });
        self.cells.len() - 1
    }

    fn allocate(&mut self, value: Option<Value>) -> Value {
        self.allocations += 1;
        self.cells.push(Cell {
            value,
            counted: true,
            live: true,
        });
        Value::Ptr(Ptr {
            cell: self.cells.len() - 1,
            elem: None,
        })
    }

    fn deallocate(&mut self, p: &Value) {
        let p = pointer(p);
        assert!(p.elem.is_none(), "deallocating an interior pointer");
        let cell = &mut self.cells[p.cell];
        assert!(cell.counted, "deallocating storage that was never allocated");
        assert!(cell.live, "double free of cell {}", p.cell);
        cell.live = false;
        self.deallocations += 1;
    }

    fn take(&mut self, p: &Value) -> Value {
        let value = self.read(p);
        self.cells[pointer(p).cell].value = None;
        value
    }

    fn load_cell(&self, cell: usize) -> Value {
        let cell = &self.cells[cell];
        assert!(cell.live, "load of freed storage");
        cell.value.clone().unwrap_or_else(|| panic!("load of uninitialized storage"))
    }

    fn resolve(&self, frame: &Frame, name: &str) -> usize {
        frame
            .lookup(name)
            .or_else(|| self.globals.get(name).copied())
            .unwrap_or_else(|| panic!("unbound name {name}"))
    }

    fn proxy(&self, handle: &Value) -> Value {
        match handle {
            Value::Obj(id) => Value::Obj(self.proxies.get(id).copied().unwrap_or(*id)),
            other => other.clone(),
        }
    }

    fn call_base(&mut self, receiver: Value, member: &MemberRef, args: Vec<Value>) -> Outcome {
        let Some(f) = self.bases.get(&member_key(member)).cloned() else {
            if *member == MemberRef::Constructor {
                return Ok(Value::Unit);
            }
            panic!("no base implementation of {}", member_key(member));
        };
        let mut all = vec![receiver];
        all.extend(args);
        f(self, all)
    }

    fn eval_detached(&mut self, expr: &Expr) -> Value {
        let mut frame = Frame::new(None, HashMap::new());
        match self.eval(&mut frame, expr) {
            Ok(value) => value,
            Err(e) => panic!("initializer threw {e:?}"),
        }
    }

    fn invoke(
        &mut self,
        def: &FunctionDef,
        receiver: Option<Value>,
        bindings: HashMap<String, String>,
        args: Vec<Value>,
    ) -> Outcome {
        assert_eq!(def.params.len(), args.len(), "arity of {}", def.name);
        let mut frame = Frame::new(receiver, bindings);
        for (param, arg) in def.params.iter().zip(args) {
            let cell = self.local(arg);
            frame.bind(&param.name, cell);
        }
        match self.exec_block(&mut frame, &def.body) {
            Flow::Normal => Ok(Value::Unit),
            Flow::Return(value) => Ok(value),
            Flow::Throw(error) => Err(error),
        }
    }

    fn closure(&self, frame: &Frame, lambda: &Lambda) -> Native {
        let lambda = lambda.clone();
        let env = frame.captured();
        let receiver = frame.receiver.clone();
        let bindings = frame.bindings.clone();
        Rc::new(move |machine: &mut Machine, args: Vec<Value>| {
            let mut frame = Frame {
                scopes: vec![env.clone(), HashMap::new()],
                receiver: receiver.clone(),
                bindings: bindings.clone(),
            };
            for (param, arg) in lambda.params.iter().zip(args) {
                let cell = machine.local(arg);
                frame.bind(&param.name, cell);
            }
            match machine.exec_block(&mut frame, &lambda.body) {
                Flow::Normal => Ok(Value::Unit),
                Flow::Return(value) => Ok(value),
                Flow::Throw(error) => Err(error),
            }
        })
    }

    fn exec_block(&mut self, frame: &mut Frame, block: &[Stmt]) -> Flow {
        frame.scopes.push(HashMap::new());
        let mut deferred: Vec<&[Stmt]> = Vec::new();
        let mut flow = Flow::Normal;
        for stmt in block {
            if let Stmt::Defer(body) = stmt {
                deferred.push(body);
                continue;
            }
            flow = self.exec(frame, stmt);
            if !matches!(flow, Flow::Normal) {
                break;
            }
        }
        for body in deferred.into_iter().rev() {
            if let Flow::Throw(e) = self.exec_block(frame, body) {
                panic!("deferred block threw {e:?}");
            }
        }
        frame.scopes.pop();
        flow
    }

    fn exec(&mut self, frame: &mut Frame, stmt: &Stmt) -> Flow {
        match stmt {
            Stmt::Let { name, value, .. } | Stmt::Var { name, value, .. } => match self.eval(frame, value) {
                Ok(value) => {
                    let cell = self.local(value);
                    frame.bind(name, cell);
                    Flow::Normal
                }
                Err(e) => Flow::Throw(e),
            },
            Stmt::Assign { target, value } => match self.eval(frame, value) {
                Ok(value) => self.assign(frame, target, value),
                Err(e) => Flow::Throw(e),
            },
            Stmt::Expr(expr) => match self.eval(frame, expr) {
                Ok(_) => Flow::Normal,
                Err(e) => Flow::Throw(e),
            },
            Stmt::Return(None) => Flow::Return(Value::Unit),
            Stmt::Return(Some(expr)) => match self.eval(frame, expr) {
                Ok(value) => Flow::Return(value),
                Err(e) => Flow::Throw(e),
            },
            Stmt::If { cond, then, otherwise } => match self.eval(frame, cond) {
                Ok(c) if c.as_bool() => self.exec_block(frame, then),
                Ok(_) => match otherwise {
                    Some(otherwise) => self.exec_block(frame, otherwise),
                    None => Flow::Normal,
                },
                Err(e) => Flow::Throw(e),
            },
            Stmt::Throw(expr) => match self.eval(frame, expr) {
                Ok(value) | Err(value) => Flow::Throw(value),
            },
            Stmt::Defer(_) => unreachable!("defer is collected by its block"),
            Stmt::TryCatch { body, error, handler } => match self.exec_block(frame, body) {
                Flow::Throw(e) => {
                    frame.scopes.push(HashMap::new());
                    let cell = self.local(e);
                    frame.bind(error, cell);
                    let flow = self.exec_block(frame, handler);
                    frame.scopes.pop();
                    flow
                }
                other => other,
            },
        }
    }

    fn assign(&mut self, frame: &mut Frame, target: &Expr, value: Value) -> Flow {
        match target {
            Expr::Var(name) => {
                let cell = self.resolve(frame, name);
                self.cells[cell].value = Some(value);
            }
            Expr::Index(base, key) => {
                let Expr::Var(name) = &**base else {
                    panic!("indexed assignment into {base}");
                };
                let key = match self.eval(frame, key) {
                    Ok(key) => key_of(&key),
                    Err(e) => return Flow::Throw(e),
                };
                let cell = self.resolve(frame, name);
                match self.cells[cell].value.as_mut() {
                    Some(Value::Map(map)) => {
                        map.insert(key, value);
                    }
                    other => panic!("indexed assignment into {other:?}"),
                }
            }
            Expr::Field(base, field) => match self.eval(frame, base) {
                Ok(Value::Obj(id)) => {
                    self.objects[id].fields.insert(field.clone(), value);
                }
                Ok(other) => panic!("field assignment on {other:?}"),
                Err(e) => return Flow::Throw(e),
            },
            other => panic!("cannot assign to {other}"),
        }
        Flow::Normal
    }

    fn eval(&mut self, frame: &mut Frame, expr: &Expr) -> Outcome {
        let value = match expr {
            Expr::Var(name) => {
                let cell = self.resolve(frame, name);
                self.load_cell(cell)
            }
            Expr::Lit(Literal::Bool(b)) => Value::Bool(*b),
            Expr::Lit(Literal::Int(i)) => Value::Int(*i),
            Expr::Lit(Literal::Str(s)) => Value::Str(s.clone()),
            Expr::Nil => Value::Nil,
            Expr::SelfRef => frame.receiver.clone().unwrap_or_else(|| panic!("self outside a member")),
            Expr::TypeToken(spec) => Value::Type(frame.type_name(spec)),
            Expr::AddressOf(name) => Value::Ptr(Ptr {
                cell: self.resolve(frame, name),
                elem: None,
            }),
            Expr::Field(base, name) => {
                let base = self.eval(frame, base)?;
                self.field(&base, name)
            }
            Expr::Index(base, key) => {
                let base = self.eval(frame, base)?;
                let key = key_of(&self.eval(frame, key)?);
                match base {
                    Value::Map(map) => map.get(&key).cloned().unwrap_or(Value::Nil),
                    other => panic!("index into {other:?}"),
                }
            }
            Expr::Unwrap(inner) => match self.eval(frame, inner)? {
                Value::Nil => panic!("unexpectedly found nil unwrapping {inner}"),
                value => value,
            },
            Expr::Not(inner) => Value::Bool(!self.eval(frame, inner)?.as_bool()),
            Expr::And(a, b) => Value::Bool(self.eval(frame, a)?.as_bool() && self.eval(frame, b)?.as_bool()),
            Expr::NotNil(inner) => Value::Bool(self.eval(frame, inner)? != Value::Nil),
            Expr::Tuple(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(frame, item)?);
                }
                Value::Tuple(values)
            }
            Expr::Call(call) => return self.eval_call(frame, call),
            Expr::Try(inner) => return self.eval(frame, inner),
            Expr::Lambda(lambda) => Value::Func(self.closure(frame, lambda)),
        };
        Ok(value)
    }

    fn eval_args(&mut self, frame: &mut Frame, call: &Call) -> Result<Vec<Value>, Value> {
        let mut values = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            values.push(self.eval(frame, &arg.value)?);
        }
        Ok(values)
    }

    fn eval_call(&mut self, frame: &mut Frame, call: &Call) -> Outcome {
        match &call.callee {
            Callee::Member(target, member) => {
                let target = self.eval(frame, target)?;
                let args = self.eval_args(frame, call)?;
                self.call_member(target, member, args)
            }
            Callee::Pointer(target) => {
                let target = self.eval(frame, target)?;
                let args = self.eval_args(frame, call)?;
                match target {
                    Value::Func(f) => f(self, args),
                    other => panic!("call through {other:?}"),
                }
            }
            Callee::Super(member) => {
                let receiver = frame.receiver.clone().unwrap_or_else(|| panic!("super outside a member"));
                let args = self.eval_args(frame, call)?;
                self.call_base(receiver, member, args)
            }
            Callee::Function(name) => {
                let args = self.eval_args(frame, call)?;
                self.call_function(name, args)
            }
            Callee::Runtime(op) => {
                let args = self.eval_args(frame, call)?;
                Ok(self.runtime(op, args))
            }
        }
    }

    fn runtime(&mut self, op: &RuntimeOp, args: Vec<Value>) -> Value {
        match op {
            RuntimeOp::Allocate(_) => self.allocate(None),
            RuntimeOp::Initialize => {
                self.write(&args[0], args[1].clone());
                Value::Unit
            }
            RuntimeOp::Move => self.take(&args[0]),
            RuntimeOp::Pointee | RuntimeOp::NativeToHost(_) | RuntimeOp::NativeToHostByToken => self.read(&args[0]),
            RuntimeOp::Deinitialize => {
                let p = pointer(&args[0]);
                self.cells[p.cell].value = None;
                Value::Unit
            }
            RuntimeOp::Deallocate => {
                self.deallocate(&args[0]);
                Value::Unit
            }
            RuntimeOp::ToHandle
            | RuntimeOp::FromHandle(_)
            | RuntimeOp::BitCast(_)
            | RuntimeOp::ErrorFromException => args[0].clone(),
            RuntimeOp::HostToNative(_) | RuntimeOp::ExistentialForInterface(_) => {
                self.write(&args[1], args[0].clone());
                Value::Unit
            }
            RuntimeOp::HostToNativeByToken => {
                self.write(&args[2], args[0].clone());
                Value::Unit
            }
            RuntimeOp::ResultIsError => self.read(&element(&args[0], 2)),
            RuntimeOp::ResultTakeError => self.read(&element(&args[0], 1)),
            RuntimeOp::ResultTakeValue => self.read(&element(&args[0], 0)),
            RuntimeOp::ResultValueSlot => element(&args[0], 0),
            RuntimeOp::ResultSetNotThrown => {
                self.write(&element(&args[0], 2), Value::Bool(false));
                Value::Unit
            }
            RuntimeOp::ResultSetError => {
                self.write(&element(&args[0], 1), args[1].clone());
                self.write(&element(&args[0], 2), Value::Bool(true));
                Value::Unit
            }
            RuntimeOp::ClosureToNative(_) => self.allocate(Some(args[0].clone())),
            RuntimeOp::NativeToClosure(_) => match &args[0] {
                Value::Ptr(_) => self.read(&args[0]),
                other => other.clone(),
            },
            RuntimeOp::TypeKey => Value::Key(
                args.iter()
                    .map(|a| match a {
                        Value::Type(t) => t.clone(),
                        other => panic!("type key from {other:?}"),
                    })
                    .collect(),
            ),
            RuntimeOp::ProxyForHandle(_) => self.proxy(&args[0]),
            RuntimeOp::InterfaceForExistential(_) => {
                let container = self.read(&args[0]);
                self.proxy(&container)
            }
        }
    }
}
