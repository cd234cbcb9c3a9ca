//! The read-only fact base populated by upstream reflection.
//!
//! A fact base is a list of modules, each holding type declarations and
//! top-level functions (the separately generated wrapper functions live in
//! their own module). It is loaded once, normalized, and then only queried.
//!
//! ```toml
//! [[modules]]
//! name = "Shapes"
//!
//! [[modules.types]]
//! name = "Shape"
//! kind = "class"
//!
//! [[modules.types.members]]
//! name = "area"
//! returns = "Swift.Double"
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::decl::{FunctionDeclaration, TypeDeclaration, TypeKind};
use crate::error::{CoreError, Result};
use crate::types::TypeSpec;

/// Declarations belonging to one module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleFacts {
    pub name: String,
    #[serde(default)]
    pub types: Vec<TypeDeclaration>,
    #[serde(default)]
    pub functions: Vec<FunctionDeclaration>,
}

impl ModuleFacts {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Top-level functions with exactly this name.
    pub fn functions_named<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a FunctionDeclaration> + 'a {
        self.functions.iter().filter(move |f| f.name == name)
    }
}

#[derive(Debug, Deserialize)]
struct FactFile {
    #[serde(default)]
    modules: Vec<ModuleFacts>,
}

/// Indexed, immutable view over reflected modules.
#[derive(Debug, Clone, Default)]
pub struct FactBase {
    modules: Vec<ModuleFacts>,
    types: HashMap<String, (usize, usize)>,
}

impl FactBase {
    /// Build a fact base, filling in module and parent back-references and
    /// indexing types by qualified name.
    pub fn new(mut modules: Vec<ModuleFacts>) -> Result<Self> {
        let mut types = HashMap::new();
        for (module_index, module) in modules.iter_mut().enumerate() {
            if module.name.is_empty() {
                return Err(CoreError::InvalidFactBase {
                    detail: "module name is required".to_string(),
                });
            }
            for (type_index, decl) in module.types.iter_mut().enumerate() {
                decl.module = module.name.clone();
                let qualified = decl.qualified_name();
                for member in &mut decl.members {
                    member.module = module.name.clone();
                    member.parent = Some(qualified.clone());
                }
                if types.insert(qualified.clone(), (module_index, type_index)).is_some() {
                    return Err(CoreError::InvalidFactBase {
                        detail: format!("type '{qualified}' is declared more than once"),
                    });
                }
            }
            for func in &mut module.functions {
                func.module = module.name.clone();
            }
        }
        Ok(Self { modules, types })
    }

    /// Parse a fact base from TOML.
    pub fn parse_toml(input: &str) -> Result<Self> {
        let file: FactFile = toml::from_str(input)?;
        Self::new(file.modules)
    }

    /// Parse a fact base from JSON.
    pub fn parse_json(input: &str) -> Result<Self> {
        let file: FactFile = serde_json::from_str(input)?;
        Self::new(file.modules)
    }

    /// Load a `.toml` or `.json` fact base file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::parse_toml(&content),
            Some("json") => Self::parse_json(&content),
            other => Err(CoreError::UnsupportedFormat {
                extension: other.unwrap_or_default().to_string(),
            }),
        }
    }

    pub fn modules(&self) -> &[ModuleFacts] {
        &self.modules
    }

    pub fn module(&self, name: &str) -> Option<&ModuleFacts> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// All type declarations, in module then declaration order.
    pub fn types(&self) -> impl Iterator<Item = &TypeDeclaration> {
        self.modules.iter().flat_map(|m| m.types.iter())
    }

    pub fn lookup_type(&self, qualified_name: &str) -> Option<&TypeDeclaration> {
        let &(module, index) = self.types.get(qualified_name)?;
        self.modules.get(module)?.types.get(index)
    }

    /// Like [`lookup_type`](Self::lookup_type), but a missing type is an error.
    pub fn resolve_type(&self, qualified_name: &str) -> Result<&TypeDeclaration> {
        self.lookup_type(qualified_name)
            .ok_or_else(|| CoreError::UnresolvedType {
                name: qualified_name.to_string(),
            })
    }

    /// Resolve the declaration a named type spec refers to.
    pub fn resolve_spec(&self, spec: &TypeSpec) -> Result<&TypeDeclaration> {
        match spec.as_named() {
            Some(named) => self.resolve_type(&named.name),
            None => Err(CoreError::UnresolvedType {
                name: spec.to_string(),
            }),
        }
    }

    /// The declaration owning a member, if any.
    pub fn owner_of(&self, func: &FunctionDeclaration) -> Option<&TypeDeclaration> {
        func.parent.as_deref().and_then(|p| self.lookup_type(p))
    }

    /// The superclass declaration of a class. A named but unknown superclass
    /// is an error.
    pub fn superclass_of(&self, decl: &TypeDeclaration) -> Result<Option<&TypeDeclaration>> {
        match (&decl.kind, &decl.superclass) {
            (TypeKind::Class, Some(spec)) => self.resolve_spec(spec).map(Some),
            _ => Ok(None),
        }
    }
}
