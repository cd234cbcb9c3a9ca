//! The TypeSpec tree.
//!
//! Every type crossing the boundary is described by a [`TypeSpec`]: a closed
//! tagged union of named types, tuples, closures, and protocol compositions.
//! TypeSpecs are immutable facts; helpers that need a different shape
//! (generic renaming, pointer wrapping) build and return new nodes.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::parse::parse_type_spec;

/// Name of the mutable typed pointer used for by-reference values.
pub const UNSAFE_MUTABLE_POINTER: &str = "Swift.UnsafeMutablePointer";
/// Name of the untyped pointer used for receivers and vtable blobs.
pub const UNSAFE_RAW_POINTER: &str = "Swift.UnsafeRawPointer";
/// Name of the opaque pointer carrying closure context.
pub const OPAQUE_POINTER: &str = "Swift.OpaquePointer";
/// Name of the native error existential.
pub const ERROR: &str = "Swift.Error";
/// Name of the native boolean.
pub const BOOL: &str = "Swift.Bool";
/// Name of the native optional.
pub const OPTIONAL: &str = "Swift.Optional";
/// Name of the native array.
pub const ARRAY: &str = "Swift.Array";
/// Name of the native dictionary.
pub const DICTIONARY: &str = "Swift.Dictionary";
/// The dynamic `Self` type.
pub const DYNAMIC_SELF: &str = "Self";

const INTEGRAL_TYPES: &[&str] = &[
    "Swift.Int",
    "Swift.UInt",
    "Swift.Int8",
    "Swift.UInt8",
    "Swift.Int16",
    "Swift.UInt16",
    "Swift.Int32",
    "Swift.UInt32",
    "Swift.Int64",
    "Swift.UInt64",
];

const FLOATING_POINT_TYPES: &[&str] = &["Swift.Float", "Swift.Double", "CoreGraphics.CGFloat"];

/// A nominal type reference, possibly with bound generic arguments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamedType {
    /// Fully qualified name (`Module.Type`), or a bare generic parameter name.
    pub name: String,
    /// Bound generic arguments, in declaration order.
    pub generic_args: Vec<TypeSpec>,
}

impl NamedType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            generic_args: Vec::new(),
        }
    }

    pub fn with_args(name: impl Into<String>, generic_args: Vec<TypeSpec>) -> Self {
        Self {
            name: name.into(),
            generic_args,
        }
    }

    /// The module prefix of the name, if it is qualified.
    pub fn module(&self) -> Option<&str> {
        self.name.split_once('.').map(|(module, _)| module)
    }

    /// The last path component of the name.
    pub fn terminus(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

/// A function type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClosureType {
    /// Argument list; a tuple for zero or several arguments.
    pub arguments: Box<TypeSpec>,
    pub return_type: Box<TypeSpec>,
    pub throws: bool,
    pub is_async: bool,
}

impl ClosureType {
    pub fn new(arguments: Vec<TypeSpec>, return_type: TypeSpec) -> Self {
        Self {
            arguments: Box::new(TypeSpec::Tuple(arguments)),
            return_type: Box::new(return_type),
            throws: false,
            is_async: false,
        }
    }

    /// The argument types, un-tupled.
    pub fn argument_types(&self) -> &[TypeSpec] {
        self.arguments.tuple_elements()
    }

    pub fn argument_count(&self) -> usize {
        self.argument_types().len()
    }

    pub fn returns_value(&self) -> bool {
        !self.return_type.is_empty_tuple()
    }

    /// `() -> ()`
    pub fn is_void_on_void(&self) -> bool {
        self.argument_types().is_empty() && !self.returns_value()
    }
}

/// A type description.
///
/// Serialized as its textual form (`Swift.Int`, `(Swift.Int) throws -> Swift.Bool`,
/// `Mod.P & Mod.Q`), which is also what [`TypeSpec::parse`] accepts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TypeSpec {
    /// A nominal type: class, struct, enum, protocol, or generic parameter.
    Named(NamedType),
    /// A tuple. The empty tuple denotes "no value".
    Tuple(Vec<TypeSpec>),
    /// A function type.
    Closure(ClosureType),
    /// A protocol composition, kept as an ordered set.
    ProtocolList(BTreeSet<NamedType>),
}

impl TypeSpec {
    /// Parse the textual form of a type.
    pub fn parse(input: &str) -> crate::error::Result<Self> {
        parse_type_spec(input)
    }

    /// The empty tuple.
    pub fn empty() -> Self {
        TypeSpec::Tuple(Vec::new())
    }

    pub fn named(name: impl Into<String>) -> Self {
        TypeSpec::Named(NamedType::new(name))
    }

    pub fn generic_named(name: impl Into<String>, generic_args: Vec<TypeSpec>) -> Self {
        TypeSpec::Named(NamedType::with_args(name, generic_args))
    }

    pub fn tuple(elements: Vec<TypeSpec>) -> Self {
        TypeSpec::Tuple(elements)
    }

    pub fn closure(arguments: Vec<TypeSpec>, return_type: TypeSpec, throws: bool) -> Self {
        TypeSpec::Closure(ClosureType {
            throws,
            ..ClosureType::new(arguments, return_type)
        })
    }

    pub fn protocol_list<I>(protocols: I) -> Self
    where
        I: IntoIterator<Item = NamedType>,
    {
        TypeSpec::ProtocolList(protocols.into_iter().collect())
    }

    /// `Swift.UnsafeMutablePointer<inner>`
    pub fn pointer_to(inner: TypeSpec) -> Self {
        TypeSpec::generic_named(UNSAFE_MUTABLE_POINTER, vec![inner])
    }

    pub fn raw_pointer() -> Self {
        TypeSpec::named(UNSAFE_RAW_POINTER)
    }

    pub fn opaque_pointer() -> Self {
        TypeSpec::named(OPAQUE_POINTER)
    }

    /// The tri-state result tuple `(value, Swift.Error, Swift.Bool)` written by
    /// throwing calls.
    pub fn throwing_result(value: TypeSpec) -> Self {
        TypeSpec::Tuple(vec![value, TypeSpec::named(ERROR), TypeSpec::named(BOOL)])
    }

    /// Whether this is the empty tuple. This is the one place "no value" is
    /// recognized; everything else asks here.
    pub fn is_empty_tuple(&self) -> bool {
        matches!(self, TypeSpec::Tuple(elements) if elements.is_empty())
    }

    pub fn as_named(&self) -> Option<&NamedType> {
        match self {
            TypeSpec::Named(named) => Some(named),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&ClosureType> {
        match self {
            TypeSpec::Closure(closure) => Some(closure),
            _ => None,
        }
    }

    /// Whether this is a named type with exactly the given name and no arguments.
    pub fn is_named(&self, name: &str) -> bool {
        matches!(self, TypeSpec::Named(n) if n.name == name && n.generic_args.is_empty())
    }

    pub fn is_dynamic_self(&self) -> bool {
        self.is_named(DYNAMIC_SELF)
    }

    /// Elements of a tuple, or this type alone.
    pub fn tuple_elements(&self) -> &[TypeSpec] {
        match self {
            TypeSpec::Tuple(elements) => elements,
            other => std::slice::from_ref(other),
        }
    }

    pub fn is_integral(&self) -> bool {
        self.as_named()
            .is_some_and(|n| n.generic_args.is_empty() && INTEGRAL_TYPES.contains(&n.name.as_str()))
    }

    pub fn is_floating_point(&self) -> bool {
        self.as_named().is_some_and(|n| {
            n.generic_args.is_empty() && FLOATING_POINT_TYPES.contains(&n.name.as_str())
        })
    }

    pub fn is_boolean(&self) -> bool {
        self.is_named(BOOL)
    }

    /// Scalars passed by value on both sides of the boundary.
    pub fn is_blittable(&self) -> bool {
        self.is_integral() || self.is_floating_point() || self.is_boolean()
    }

    /// The pointee of `Swift.UnsafeMutablePointer<T>`.
    pub fn pointee(&self) -> Option<&TypeSpec> {
        match self {
            TypeSpec::Named(n) if n.name == UNSAFE_MUTABLE_POINTER && n.generic_args.len() == 1 => {
                n.generic_args.first()
            }
            _ => None,
        }
    }

    /// Equality that tolerates a value having been rewritten as a pointer to
    /// itself for ABI reasons: `UnsafeMutablePointer<T>` equals `T`.
    pub fn eq_ignoring_reference(&self, other: &TypeSpec) -> bool {
        if self == other {
            return true;
        }
        if self.pointee().is_some_and(|inner| inner == other) {
            return true;
        }
        other.pointee().is_some_and(|inner| inner == self)
    }

    /// Rebuild this type, replacing every named node for which `f` returns a
    /// substitute. Nodes without a substitute are rebuilt with their generic
    /// arguments mapped recursively.
    pub fn map_named<F>(&self, f: &mut F) -> TypeSpec
    where
        F: FnMut(&NamedType) -> Option<TypeSpec>,
    {
        match self {
            TypeSpec::Named(named) => match f(named) {
                Some(replacement) => replacement,
                None => TypeSpec::Named(NamedType {
                    name: named.name.clone(),
                    generic_args: named.generic_args.iter().map(|a| a.map_named(f)).collect(),
                }),
            },
            TypeSpec::Tuple(elements) => {
                TypeSpec::Tuple(elements.iter().map(|e| e.map_named(f)).collect())
            }
            TypeSpec::Closure(closure) => TypeSpec::Closure(ClosureType {
                arguments: Box::new(closure.arguments.map_named(f)),
                return_type: Box::new(closure.return_type.map_named(f)),
                throws: closure.throws,
                is_async: closure.is_async,
            }),
            TypeSpec::ProtocolList(protocols) => TypeSpec::ProtocolList(
                protocols
                    .iter()
                    .map(|p| match TypeSpec::Named(p.clone()).map_named(f) {
                        TypeSpec::Named(renamed) => renamed,
                        _ => p.clone(),
                    })
                    .collect(),
            ),
        }
    }

    /// Whether any named node satisfies `pred`.
    pub fn any_named<F>(&self, pred: &F) -> bool
    where
        F: Fn(&NamedType) -> bool,
    {
        match self {
            TypeSpec::Named(named) => {
                pred(named) || named.generic_args.iter().any(|a| a.any_named(pred))
            }
            TypeSpec::Tuple(elements) => elements.iter().any(|e| e.any_named(pred)),
            TypeSpec::Closure(closure) => {
                closure.arguments.any_named(pred) || closure.return_type.any_named(pred)
            }
            TypeSpec::ProtocolList(protocols) => protocols.iter().any(pred),
        }
    }
}

impl fmt::Display for NamedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.generic_args.is_empty() {
            write!(f, "<")?;
            for (i, arg) in self.generic_args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{arg}")?;
            }
            write!(f, ">")?;
        }
        Ok(())
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSpec::Named(named) => write!(f, "{named}"),
            TypeSpec::Tuple(elements) => {
                write!(f, "(")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, ")")
            }
            TypeSpec::Closure(closure) => {
                match closure.arguments.as_ref() {
                    args @ TypeSpec::Tuple(_) => write!(f, "{args}")?,
                    other => write!(f, "({other})")?,
                }
                if closure.is_async {
                    write!(f, " async")?;
                }
                if closure.throws {
                    write!(f, " throws")?;
                }
                write!(f, " -> {}", closure.return_type)
            }
            TypeSpec::ProtocolList(protocols) if protocols.is_empty() => write!(f, "Any"),
            TypeSpec::ProtocolList(protocols) => {
                for (i, protocol) in protocols.iter().enumerate() {
                    if i > 0 {
                        write!(f, " & ")?;
                    }
                    write!(f, "{protocol}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::str::FromStr for TypeSpec {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_type_spec(s)
    }
}

impl TryFrom<String> for TypeSpec {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_type_spec(&value)
    }
}

impl From<TypeSpec> for String {
    fn from(value: TypeSpec) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> TypeSpec {
        TypeSpec::parse(s).unwrap()
    }

    #[test]
    fn empty_tuple_is_no_value() {
        assert!(TypeSpec::empty().is_empty_tuple());
        assert!(!t("(Swift.Int)").is_empty_tuple());
        assert!(!t("Swift.Int").is_empty_tuple());
    }

    #[test]
    fn scalar_predicates() {
        assert!(t("Swift.Int32").is_integral());
        assert!(t("CoreGraphics.CGFloat").is_floating_point());
        assert!(t("Swift.Bool").is_boolean());
        assert!(t("Swift.Double").is_blittable());
        assert!(!t("Swift.String").is_blittable());
        assert!(!t("Swift.Optional<Swift.Int>").is_blittable());
    }

    #[test]
    fn reference_invariant_equality() {
        let int = t("Swift.Int");
        let ptr = TypeSpec::pointer_to(int.clone());
        assert_ne!(int, ptr);
        assert!(int.eq_ignoring_reference(&ptr));
        assert!(ptr.eq_ignoring_reference(&int));
        assert!(!ptr.eq_ignoring_reference(&t("Swift.Bool")));
        assert!(!TypeSpec::pointer_to(ptr.clone()).eq_ignoring_reference(&int));
    }

    #[test]
    fn protocol_list_is_ordered_set() {
        assert_eq!(t("M.Q & M.P"), t("M.P & M.Q & M.P"));
        assert_eq!(t("M.Q & M.P").to_string(), "M.P & M.Q");
    }

    #[test]
    fn map_named_builds_new_tree() {
        let original = t("(T, Swift.Array<T>) -> T");
        let renamed = original.map_named(&mut |n| {
            (n.name == "T").then(|| TypeSpec::named("T0"))
        });
        assert_eq!(renamed, t("(T0, Swift.Array<T0>) -> T0"));
        assert_eq!(original, t("(T, Swift.Array<T>) -> T"));
    }

    #[test]
    fn closure_arguments_untupled() {
        let spec = t("(Swift.Int, Swift.Bool) throws -> Swift.String");
        let closure = spec.as_closure().unwrap();
        assert_eq!(closure.argument_count(), 2);
        assert!(closure.throws);
        assert!(closure.returns_value());
        assert!(t("() -> ()").as_closure().unwrap().is_void_on_void());
    }

    #[test]
    fn serde_uses_text_form() {
        let spec = t("Swift.Dictionary<Swift.String, Swift.Int>");
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, "\"Swift.Dictionary<Swift.String, Swift.Int>\"");
        let back: TypeSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn named_terminus_and_module() {
        let named = NamedType::new("Shapes.Geometry.Circle");
        assert_eq!(named.terminus(), "Circle");
        assert_eq!(named.module(), Some("Shapes"));
        assert_eq!(NamedType::new("T").module(), None);
    }
}
