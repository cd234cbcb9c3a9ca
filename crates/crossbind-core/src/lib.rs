//! Shared vocabulary for crossbind glue generation.
//!
//! Describes the types and declarations reflected from the native side and
//! the neutral code model generated glue is expressed in.
//!
//! ## Modules
//!
//! - [`types`]: The TypeSpec tree and its equality notions
//! - [`parse`]: Textual TypeSpec parser
//! - [`decl`]: Function, parameter, and type declarations
//! - [`facts`]: Read-only fact base loaded from TOML or JSON
//! - [`entity`]: Entity classification and generic contexts
//! - [`rename`]: Canonical generic renaming and substitution
//! - [`ident`]: Per-body identifier scopes
//! - [`code`]: Neutral statements, declarations, and the output sink
//! - [`hash`]: Content hashing for generated layouts

pub mod code;
pub mod decl;
pub mod entity;
pub mod error;
pub mod facts;
pub mod hash;
pub mod ident;
pub mod parse;
pub mod rename;
pub mod types;

pub use code::{Block, CodeSink, Decl, Expr, MarshaledCall, RuntimeOp, Stmt};
pub use decl::{Accessor, FunctionDeclaration, Parameter, TypeDeclaration, TypeKind};
pub use entity::{classify, EntityKind, GenericContext, GenericIndex};
pub use error::CoreError;
pub use facts::{FactBase, ModuleFacts};
pub use ident::IdentifierScope;
pub use rename::GenericRenamer;
pub use types::{ClosureType, NamedType, TypeSpec};
