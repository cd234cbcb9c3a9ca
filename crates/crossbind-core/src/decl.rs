//! Declarations produced by upstream reflection.
//!
//! Functions, parameters, generic parameters, and type declarations are
//! plain serde structs so fixtures can be written as TOML. The generator
//! treats them as immutable facts.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::TypeSpec;

impl Default for TypeSpec {
    /// The empty tuple: "no value".
    fn default() -> Self {
        TypeSpec::empty()
    }
}

/// Which accessor of a property or subscript a function implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accessor {
    /// A plain method, constructor, or free function.
    #[default]
    None,
    Getter,
    Setter,
    /// Yields storage in place; never given a vtable slot.
    Materializer,
}

/// Declared visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Private,
    Internal,
    #[default]
    Public,
    Open,
}

impl Access {
    pub fn is_public_or_open(self) -> bool {
        matches!(self, Access::Public | Access::Open)
    }
}

/// A single function parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parameter {
    /// Public (argument label) name; empty when unlabeled.
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeSpec,
    #[serde(default)]
    pub inout: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>, ty: TypeSpec) -> Self {
        Self {
            name: name.into(),
            ty,
            inout: false,
        }
    }

    pub fn inout(name: impl Into<String>, ty: TypeSpec) -> Self {
        Self {
            inout: true,
            ..Self::new(name, ty)
        }
    }
}

/// A generic parameter declared on a type or function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenericParameter {
    pub name: String,
    #[serde(default)]
    pub constraints: Vec<TypeSpec>,
}

impl GenericParameter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraints: Vec::new(),
        }
    }
}

/// A function, method, constructor, or accessor.
///
/// For accessors `name` is the property name (`subscript` for subscripts).
/// A setter's first parameter is the new value; subscript index parameters
/// follow it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    /// Owning module; filled in from the enclosing module on load.
    #[serde(default)]
    pub module: String,
    /// Qualified name of the owning type, or none for top-level functions.
    #[serde(default)]
    pub parent: Option<String>,
    /// Optional explicit receiver parameter.
    #[serde(default)]
    pub receiver: Option<Parameter>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default, rename = "returns")]
    pub return_type: TypeSpec,
    #[serde(default)]
    pub accessor: Accessor,
    #[serde(default)]
    pub is_subscript: bool,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_operator: bool,
    #[serde(default)]
    pub is_constructor: bool,
    #[serde(default)]
    pub is_extension: bool,
    #[serde(default)]
    pub throws: bool,
    #[serde(default)]
    pub is_variadic: bool,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub access: Access,
    /// Protocol requirement that has a default implementation in an extension.
    #[serde(default)]
    pub has_default_impl: bool,
    #[serde(default)]
    pub is_deprecated: bool,
    /// Marked unavailable on every platform.
    #[serde(default)]
    pub is_unavailable: bool,
    /// Disambiguation code assigned when the wrapper was generated.
    #[serde(default)]
    pub reference_code: Option<u32>,
    #[serde(default)]
    pub generics: Vec<GenericParameter>,
}

impl FunctionDeclaration {
    /// A plain method or free function with the given signature.
    pub fn new(name: impl Into<String>, parameters: Vec<Parameter>, return_type: TypeSpec) -> Self {
        Self {
            name: name.into(),
            parameters,
            return_type,
            ..Default::default()
        }
    }

    pub fn is_property(&self) -> bool {
        self.accessor != Accessor::None && !self.is_subscript
    }

    pub fn is_getter(&self) -> bool {
        self.accessor == Accessor::Getter
    }

    pub fn is_setter(&self) -> bool {
        self.accessor == Accessor::Setter
    }

    pub fn is_materializer(&self) -> bool {
        self.accessor == Accessor::Materializer
    }

    pub fn returns_value(&self) -> bool {
        !self.return_type.is_empty_tuple()
    }

    /// Instance members take a receiver across the boundary.
    pub fn is_instance_member(&self) -> bool {
        self.parent.is_some() && !self.is_static && !self.is_constructor
    }

    /// The module or owning type, whichever scopes this function.
    pub fn owner_name(&self) -> &str {
        self.parent.as_deref().unwrap_or(&self.module)
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.owner_name(), self.name)
    }

    /// The new-value parameter of a setter.
    pub fn new_value(&self) -> Option<&Parameter> {
        if self.is_setter() {
            self.parameters.first()
        } else {
            None
        }
    }

    /// Parameters other than a setter's new value.
    pub fn index_parameters(&self) -> &[Parameter] {
        if self.is_setter() && !self.parameters.is_empty() {
            &self.parameters[1..]
        } else {
            &self.parameters
        }
    }

    /// Whether `other` is the setter paired with this getter.
    pub fn is_setter_for(&self, getter: &FunctionDeclaration) -> bool {
        self.is_setter()
            && getter.is_getter()
            && self.name == getter.name
            && self.is_subscript == getter.is_subscript
            && self.is_static == getter.is_static
            && self.new_value().map(|p| &p.ty) == Some(&getter.return_type)
            && self.index_parameters().iter().map(|p| &p.ty).eq(getter.parameters.iter().map(|p| &p.ty))
    }

    /// Name and shape used to recognise a member re-declared further down an
    /// inheritance chain.
    pub fn shape_key(&self) -> MemberShape {
        MemberShape {
            name: self.name.clone(),
            accessor: self.accessor,
            is_subscript: self.is_subscript,
            parameters: self.parameters.iter().map(|p| (p.name.clone(), p.ty.clone())).collect(),
            return_type: self.return_type.clone(),
            throws: self.throws,
        }
    }
}

impl fmt::Display for FunctionDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.accessor {
            Accessor::Getter => write!(f, "get ")?,
            Accessor::Setter => write!(f, "set ")?,
            Accessor::Materializer => write!(f, "materialize ")?,
            Accessor::None => {}
        }
        write!(f, "{}(", self.qualified_name())?;
        for (i, param) in self.parameters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let name = if param.name.is_empty() { "_" } else { &param.name };
            write!(f, "{name}: ")?;
            if param.inout {
                write!(f, "inout ")?;
            }
            write!(f, "{}", param.ty)?;
        }
        write!(f, ")")?;
        if self.throws {
            write!(f, " throws")?;
        }
        if self.returns_value() {
            write!(f, " -> {}", self.return_type)?;
        }
        Ok(())
    }
}

/// Identity of a member for de-duplication across an inheritance walk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberShape {
    pub name: String,
    pub accessor: Accessor,
    pub is_subscript: bool,
    pub parameters: Vec<(String, TypeSpec)>,
    pub return_type: TypeSpec,
    pub throws: bool,
}

/// The nominal kind of a type declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    Class,
    Struct,
    Enum,
    Protocol,
}

/// A nominal type declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDeclaration {
    /// Name within the module; nested types use `Outer.Inner`.
    pub name: String,
    #[serde(default)]
    pub module: String,
    pub kind: TypeKind,
    /// Qualified name of the enclosing type for nested declarations.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub generics: Vec<GenericParameter>,
    /// Superclass of a class.
    #[serde(default)]
    pub superclass: Option<TypeSpec>,
    /// Inherited protocols (protocols) or conformances (other kinds).
    #[serde(default)]
    pub inherits: Vec<TypeSpec>,
    /// Raw representation of an enum.
    #[serde(default)]
    pub raw_type: Option<TypeSpec>,
    /// An enum without payload cases, represented as a plain integer.
    #[serde(default)]
    pub is_trivial: bool,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub access: Access,
    #[serde(default)]
    pub members: Vec<FunctionDeclaration>,
}

impl TypeDeclaration {
    pub fn new(module: impl Into<String>, name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            kind,
            parent: None,
            generics: Vec::new(),
            superclass: None,
            inherits: Vec::new(),
            raw_type: None,
            is_trivial: false,
            is_final: false,
            access: Access::Public,
            members: Vec::new(),
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }

    /// The last path component of the name.
    pub fn terminus(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    pub fn has_generics(&self) -> bool {
        !self.generics.is_empty()
    }

    pub fn as_type_spec(&self) -> TypeSpec {
        TypeSpec::generic_named(
            self.qualified_name(),
            self.generics.iter().map(|g| TypeSpec::named(g.name.clone())).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn getter(name: &str, ty: &str) -> FunctionDeclaration {
        FunctionDeclaration {
            accessor: Accessor::Getter,
            parent: Some("M.C".into()),
            ..FunctionDeclaration::new(name, vec![], TypeSpec::parse(ty).unwrap())
        }
    }

    fn setter(name: &str, ty: &str) -> FunctionDeclaration {
        FunctionDeclaration {
            accessor: Accessor::Setter,
            parent: Some("M.C".into()),
            ..FunctionDeclaration::new(
                name,
                vec![Parameter::new("newValue", TypeSpec::parse(ty).unwrap())],
                TypeSpec::empty(),
            )
        }
    }

    #[test]
    fn setter_pairs_with_getter() {
        let get = getter("radius", "Swift.Double");
        assert!(setter("radius", "Swift.Double").is_setter_for(&get));
        assert!(!setter("radius", "Swift.Int").is_setter_for(&get));
        assert!(!setter("area", "Swift.Double").is_setter_for(&get));
    }

    #[test]
    fn property_kinds() {
        let get = getter("radius", "Swift.Double");
        assert!(get.is_property());
        assert!(get.is_instance_member());
        let sub = FunctionDeclaration {
            is_subscript: true,
            ..getter("subscript", "Swift.Int")
        };
        assert!(!sub.is_property());
    }

    #[test]
    fn display_signature() {
        let func = FunctionDeclaration {
            parent: Some("Shapes.Shape".into()),
            throws: true,
            ..FunctionDeclaration::new(
                "scale",
                vec![
                    Parameter::new("by", TypeSpec::named("Swift.Double")),
                    Parameter::inout("", TypeSpec::named("Swift.Int")),
                ],
                TypeSpec::named("Swift.Bool"),
            )
        };
        assert_eq!(
            func.to_string(),
            "Shapes.Shape.scale(by: Swift.Double, _: inout Swift.Int) throws -> Swift.Bool"
        );
    }

    #[test]
    fn deserialize_from_toml() {
        let func: FunctionDeclaration = toml::from_str(
            r#"
name = "f"
returns = "Swift.Int"
throws = true
reference_code = 7

[[parameters]]
name = "x"
type = "Swift.Int"
"#,
        )
        .unwrap();
        assert_eq!(func.return_type, TypeSpec::named("Swift.Int"));
        assert!(func.throws);
        assert_eq!(func.reference_code, Some(7));
        assert_eq!(func.parameters[0].ty, TypeSpec::named("Swift.Int"));
        assert_eq!(func.accessor, Accessor::None);
    }
}
