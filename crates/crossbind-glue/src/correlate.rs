//! Wrapper correlation.
//!
//! Wrapper functions are generated separately and reflected back into the
//! fact base in the wrapper module. Given an original member, the
//! correlator finds the one wrapper that forwards to it: first by the
//! reference-coded name, then by name plus a structural comparison of the
//! signatures after the wrapper's ABI rewrites (receiver and hidden return
//! pointer prepended, by-reference types wrapped in pointers, closures
//! decomposed into pointer pairs).

use crossbind_core::types::OPAQUE_POINTER;
use crossbind_core::{
    classify, ClosureType, EntityKind, FactBase, FunctionDeclaration, GenericContext, Parameter,
    TypeSpec,
};
use tracing::trace;

use crate::config::NamingConfig;
use crate::diagnostic::ErrorCode;
use crate::error::{ErrorKind, GlueError, Result};
use crate::strategy::{select_strategy, AbiContext};

/// Stand-in for every generic reference during comparison.
const ERASED: &str = "_";

/// Outcome of a wrapper search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation<'a> {
    Match(&'a FunctionDeclaration),
    NoMatch,
}

impl<'a> Correlation<'a> {
    pub fn is_match(&self) -> bool {
        matches!(self, Correlation::Match(_))
    }

    pub fn wrapper(&self) -> Option<&'a FunctionDeclaration> {
        match *self {
            Correlation::Match(wrapper) => Some(wrapper),
            Correlation::NoMatch => None,
        }
    }
}

/// Names the wrapper generated for a member.
///
/// Free functions: `{prefix}{Module}F{name}`. Members:
/// `{prefix}{Owner}{marker}{name}` with dots in the owner replaced by `D`
/// and the marker `D` (declared in the type), `E` (declared in an
/// extension), or `Z` (static). Accessors use `G`, `S`, or `M` and name
/// subscripts `subscript`. Constructors end in the owner's terminus.
#[derive(Debug, Clone, Copy)]
pub struct WrapperNaming<'a> {
    naming: &'a NamingConfig,
}

impl<'a> WrapperNaming<'a> {
    pub fn new(naming: &'a NamingConfig) -> Self {
        Self { naming }
    }

    pub fn wrapper_name(&self, func: &FunctionDeclaration) -> String {
        let prefix = &self.naming.wrapper_prefix;
        let Some(owner) = func.parent.as_deref() else {
            return format!("{prefix}{}F{}", mangle_owner(&func.module), func.name);
        };
        let owner_part = mangle_owner(owner);
        if func.is_constructor {
            let terminus = owner.rsplit('.').next().unwrap_or(owner);
            let marker = if func.is_extension { 'E' } else { 'D' };
            return format!("{prefix}{owner_part}{marker}{terminus}");
        }
        let marker = if func.is_getter() {
            'G'
        } else if func.is_setter() {
            'S'
        } else if func.is_materializer() {
            'M'
        } else if func.is_static {
            'Z'
        } else if func.is_extension {
            'E'
        } else {
            'D'
        };
        let name = if func.is_subscript { "subscript" } else { func.name.as_str() };
        format!("{prefix}{owner_part}{marker}{name}")
    }

    /// `{name}{code:08}`, the disambiguated name of an overloaded wrapper.
    pub fn with_reference_code(name: &str, code: u32) -> String {
        format!("{name}{code:08}")
    }
}

fn mangle_owner(owner: &str) -> String {
    owner.replace('.', "D")
}

/// Finds the wrapper for an original member.
pub struct Correlator<'a> {
    facts: &'a FactBase,
    naming: &'a NamingConfig,
}

impl<'a> Correlator<'a> {
    pub fn new(facts: &'a FactBase, naming: &'a NamingConfig) -> Self {
        Self { facts, naming }
    }

    /// Find the wrapper under its conventional name.
    pub fn correlate(&self, func: &FunctionDeclaration) -> Result<Correlation<'a>> {
        let name = WrapperNaming::new(self.naming).wrapper_name(func);
        self.correlate_named(func, &name)
    }

    /// Find the wrapper for `func` among wrappers called `wrapper_name`.
    ///
    /// A member carrying a reference code is matched by coded name alone,
    /// and more than one such wrapper is an internal error. Otherwise every
    /// candidate with the plain name is compared structurally and the first
    /// compatible one wins.
    pub fn correlate_named(&self, func: &FunctionDeclaration, wrapper_name: &str) -> Result<Correlation<'a>> {
        let Some(module) = self.facts.module(&self.naming.wrapper_module) else {
            trace!(module = %self.naming.wrapper_module, "wrapper module absent");
            return Ok(Correlation::NoMatch);
        };

        if let Some(code) = func.reference_code {
            let coded = WrapperNaming::with_reference_code(wrapper_name, code);
            let found: Vec<&'a FunctionDeclaration> = module.functions.iter().filter(|f| f.name == coded).collect();
            return match found.as_slice() {
                [] => {
                    trace!(wrapper = %coded, "no wrapper with reference code");
                    Ok(Correlation::NoMatch)
                }
                [wrapper] => Ok(Correlation::Match(*wrapper)),
                _ => Err(GlueError::internal(
                    ErrorCode::G3001,
                    format!("{} wrappers named '{coded}' for {func}", found.len()),
                )),
            };
        }

        let original = AbiContext::for_member(self.facts, func);
        let skip = self.abi_prefix_len(func, &original)?;
        for candidate in module.functions.iter().filter(|f| f.name == wrapper_name) {
            let pair = Pair::new(self.facts, func, &original, candidate);
            if !pair.parameters_match(skip)? {
                trace!(wrapper = %candidate, skip, "parameters differ");
                continue;
            }
            if !func.is_constructor && !pair.returns_match()? {
                trace!(wrapper = %candidate, "return types differ");
                continue;
            }
            trace!(member = %func, wrapper = %candidate, "correlated");
            return Ok(Correlation::Match(candidate));
        }
        Ok(Correlation::NoMatch)
    }

    /// Leading wrapper parameters with no counterpart in the original.
    fn abi_prefix_len(&self, func: &FunctionDeclaration, original: &AbiContext<'_>) -> Result<usize> {
        if func.is_constructor {
            // Class constructors return the new handle; value types are
            // initialized through a pointer.
            let kind = classify(&func.return_type, original.generics(), self.facts);
            return Ok(if kind == EntityKind::Class { 0 } else { 1 });
        }
        let receiver = usize::from(func.parent.is_some() && !func.is_static);
        let hidden = usize::from(original.has_hidden_return(func)?);
        Ok(receiver + hidden)
    }
}

/// An original member and one candidate wrapper, each with its own
/// generic scope.
struct Pair<'p> {
    facts: &'p FactBase,
    func: &'p FunctionDeclaration,
    original: &'p AbiContext<'p>,
    wrapper: &'p FunctionDeclaration,
    wrapper_generics: GenericContext,
}

impl<'p> Pair<'p> {
    fn new(
        facts: &'p FactBase,
        func: &'p FunctionDeclaration,
        original: &'p AbiContext<'p>,
        wrapper: &'p FunctionDeclaration,
    ) -> Self {
        Self {
            facts,
            func,
            original,
            wrapper,
            wrapper_generics: GenericContext::for_function(wrapper, facts),
        }
    }

    fn parameters_match(&self, skip: usize) -> Result<bool> {
        let Some(wrapped) = self.wrapper.parameters.get(skip..) else {
            return Ok(false);
        };
        if wrapped.len() != self.func.parameters.len() {
            return Ok(false);
        }
        // Property accessors name their new value differently on each side.
        let compare_names = !self.func.is_property();
        for (wrap, orig) in wrapped.iter().zip(&self.func.parameters) {
            if let (TypeSpec::Closure(wrap_closure), TypeSpec::Closure(orig_closure)) = (&wrap.ty, &orig.ty) {
                if !self.wrapped_closures_match(wrap_closure, orig_closure)? {
                    return Ok(false);
                }
                continue;
            }
            if !self.simple_types_match(&wrap.ty, &orig.ty)? {
                return Ok(false);
            }
            if compare_names && !names_agree(wrap, orig) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Generic-ness must agree; a wrapper type rewritten to a pointer
    /// matches its pointee.
    fn simple_types_match(&self, wrap: &TypeSpec, orig: &TypeSpec) -> Result<bool> {
        let wrap_generic = self.wrapper_generics.is_generic(wrap);
        if wrap_generic != self.original.generics().is_generic(orig) {
            return Ok(false);
        }
        let wrap_erased = erase(wrap, &self.wrapper_generics);
        let orig_erased = erase(orig, self.original.generics());
        if wrap_generic {
            return Ok(wrap_erased == orig_erased);
        }
        // A wrapper mentioning an unknown type is some other overload.
        let strategy = match select_strategy(wrap, &self.wrapper_generics, self.facts) {
            Ok(strategy) => strategy,
            Err(err) if err.kind() == ErrorKind::UnresolvedReference => {
                trace!(wrapper_type = %wrap, error = %err, "wrapper type does not resolve");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        if strategy.forced_by_reference() {
            return Ok(wrap_erased.eq_ignoring_reference(&orig_erased));
        }
        Ok(wrap_erased == orig_erased)
    }

    fn types_match(&self, wrap: &TypeSpec, orig: &TypeSpec) -> bool {
        erase(wrap, &self.wrapper_generics) == erase(orig, self.original.generics())
    }

    fn type_lists_match(&self, wrap: &[TypeSpec], orig: &[TypeSpec]) -> bool {
        wrap.len() == orig.len() && wrap.iter().zip(orig).all(|(w, o)| self.types_match(w, o))
    }

    /// A closure parameter in the wrapper is
    /// `([returnSlot,] [argsTuple,] Swift.OpaquePointer) -> ()`, where the
    /// return slot points at the value (or the throwing result tuple) and
    /// the args tuple pointer carries the original arguments.
    fn wrapped_closures_match(&self, wrap: &ClosureType, orig: &ClosureType) -> Result<bool> {
        let member = self.func.qualified_name();
        let args = wrap.argument_types();
        if args.is_empty() || args.len() > 3 {
            return Err(GlueError::internal(
                ErrorCode::G3003,
                format!(
                    "wrapper closure for {member} takes {} arguments, expected 1 to 3",
                    args.len()
                ),
            ));
        }
        if !args[args.len() - 1].is_named(OPAQUE_POINTER) {
            return Ok(false);
        }
        if orig.argument_count() > 0 {
            if args.len() < 2 {
                return Ok(false);
            }
            let Some(packed) = args[args.len() - 2].pointee() else {
                return Ok(false);
            };
            if !self.type_lists_match(packed.tuple_elements(), orig.argument_types()) {
                return Ok(false);
            }
        }

        if orig.is_async {
            return Err(GlueError::unsupported(
                ErrorCode::G2002,
                member,
                "async closure parameter",
            ));
        }
        if orig.throws {
            if !orig.returns_value() {
                return Err(GlueError::unsupported(
                    ErrorCode::G2004,
                    member,
                    "throwing closure parameter without a return value",
                ));
            }
            let value = match args[0].pointee() {
                Some(TypeSpec::Tuple(elements)) if elements.len() == 3 => &elements[0],
                _ => return Ok(false),
            };
            return Ok(self.types_match(value, &orig.return_type));
        }

        if !orig.returns_value() {
            let expected = if orig.argument_count() > 0 { 2 } else { 1 };
            return Ok(args.len() == expected);
        }
        match args[0].pointee() {
            Some(value) => Ok(self.types_match(value, &orig.return_type)),
            None => Ok(false),
        }
    }

    fn returns_match(&self) -> Result<bool> {
        let orig = &self.func.return_type;
        let wrap = if self.original.has_hidden_return(self.func)? {
            self.hidden_return_value()?
        } else {
            &self.wrapper.return_type
        };
        if self.wrapper_generics.is_generic(wrap) != self.original.generics().is_generic(orig) {
            return Ok(false);
        }
        match (wrap, orig) {
            (TypeSpec::Closure(wrap_closure), TypeSpec::Closure(orig_closure)) => {
                Ok(self.closure_types_match(wrap_closure, orig_closure))
            }
            _ => Ok(self.types_match(wrap, orig)),
        }
    }

    /// The value type behind the wrapper's leading return pointer.
    fn hidden_return_value(&self) -> Result<&'p TypeSpec> {
        let shape_error = |detail: &str| {
            GlueError::internal(
                ErrorCode::G3002,
                format!("wrapper {} for {}: {detail}", self.wrapper.name, self.func),
            )
        };
        let first = self
            .wrapper
            .parameters
            .first()
            .ok_or_else(|| shape_error("missing return pointer parameter"))?;
        if first.name.is_empty() {
            return Err(shape_error("return pointer parameter is unnamed"));
        }
        let pointee = first
            .ty
            .pointee()
            .ok_or_else(|| shape_error("return parameter is not a mutable pointer"))?;
        if !self.func.throws {
            return Ok(pointee);
        }
        match pointee {
            TypeSpec::Tuple(elements) if elements.len() == 3 => Ok(&elements[0]),
            _ => Err(shape_error("throwing return is not a result tuple")),
        }
    }

    /// A returned closure is wrapped as
    /// `(UnsafeMutablePointer<R>, UnsafeMutablePointer<(args)>) -> ()`.
    fn closure_types_match(&self, wrap: &ClosureType, orig: &ClosureType) -> bool {
        if wrap.returns_value() {
            return false;
        }
        if orig.is_void_on_void() && wrap.is_void_on_void() {
            return true;
        }
        let args = wrap.argument_types();
        let mut args_index = Some(0);
        if orig.returns_value() {
            if args.is_empty() || args.len() > 2 {
                return false;
            }
            let Some(mut value) = args[0].pointee() else {
                return false;
            };
            if orig.throws {
                match value {
                    TypeSpec::Tuple(elements) if elements.len() == 3 => value = &elements[0],
                    _ => return false,
                }
            }
            if !self.types_match(value, &orig.return_type) {
                return false;
            }
            args_index = (orig.argument_count() > 0).then_some(1);
        }
        match args_index {
            Some(index) => {
                if args.len() != index + 1 {
                    return false;
                }
                match args[index].pointee() {
                    Some(packed) => self.type_lists_match(packed.tuple_elements(), orig.argument_types()),
                    None => false,
                }
            }
            None => true,
        }
    }
}

fn names_agree(wrap: &Parameter, orig: &Parameter) -> bool {
    wrap.name.is_empty() || orig.name.is_empty() || wrap.name == orig.name
}

fn erase(spec: &TypeSpec, ctx: &GenericContext) -> TypeSpec {
    spec.map_named(&mut |n| {
        (n.generic_args.is_empty() && ctx.is_generic_name(&n.name)).then(|| TypeSpec::named(ERASED))
    })
}
