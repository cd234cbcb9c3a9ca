//! Wrapper correlation against the shapes fixture and generated shapes.

mod support;

use crossbind_core::{FactBase, FunctionDeclaration, ModuleFacts, Parameter, TypeDeclaration, TypeKind, TypeSpec};
use crossbind_glue::{Correlation, Correlator, GlueConfig, WrapperNaming};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn member<'f>(facts: &'f FactBase, owner: &str, name: &str) -> &'f FunctionDeclaration {
    facts
        .resolve_type(owner)
        .unwrap()
        .members
        .iter()
        .find(|m| m.name == name)
        .unwrap_or_else(|| panic!("{owner} has no member {name}"))
}

fn correlated(facts: &FactBase, owner: &str, name: &str) -> Option<String> {
    let config = GlueConfig::default();
    let correlator = Correlator::new(facts, &config.naming);
    correlator
        .correlate(member(facts, owner, name))
        .unwrap()
        .wrapper()
        .map(|w| w.name.clone())
}

#[test]
fn fixture_members_find_their_wrappers() {
    support::init_tracing();
    let facts = support::shapes();
    // Receiver only.
    assert_eq!(correlated(&facts, "Shapes.Shape", "scale").as_deref(), Some("glue_ShapesDShapeDscale"));
    // Result pointer and receiver, for a throwing member and a struct return.
    assert_eq!(correlated(&facts, "Shapes.Shape", "measure").as_deref(), Some("glue_ShapesDShapeDmeasure"));
    assert_eq!(correlated(&facts, "Shapes.Shape", "center").as_deref(), Some("glue_ShapesDShapeDcenter"));
    // Generic parameters correspond under different names.
    assert_eq!(correlated(&facts, "Shapes.Shape", "identity").as_deref(), Some("glue_ShapesDShapeDidentity"));
    assert_eq!(
        correlated(&facts, "Shapes.Drawable", "describe").as_deref(),
        Some("glue_ShapesDDrawableDdescribe")
    );
}

#[test]
fn members_without_wrappers_do_not_match() {
    let facts = support::shapes();
    assert_eq!(correlated(&facts, "Shapes.Drawable", "draw"), None);
    assert_eq!(correlated(&facts, "Shapes.Circle", "area"), None);
}

#[test]
fn unrelated_declaration_is_no_match() {
    let facts = support::shapes();
    let config = GlueConfig::default();
    let correlator = Correlator::new(&facts, &config.naming);
    let area = member(&facts, "Shapes.Shape", "area");

    let result = correlator.correlate_named(area, "glue_ShapesDShapeDscale").unwrap();
    assert_eq!(result, Correlation::NoMatch);
}

/// A class `M.C` owning `original`, and a wrapper module holding `wrapper`.
fn facts_for(original: FunctionDeclaration, wrapper: FunctionDeclaration) -> FactBase {
    let mut class = TypeDeclaration::new("M", "C", TypeKind::Class);
    class.members.push(original);
    let mut module = ModuleFacts::new("M");
    module.types.push(class);
    let mut glue = ModuleFacts::new("GlueWrapping");
    glue.functions.push(wrapper);
    FactBase::new(vec![module, glue]).unwrap()
}

fn int_params(count: usize) -> Vec<Parameter> {
    (0..count)
        .map(|i| Parameter::new(format!("p{i}"), TypeSpec::named("Swift.Int")))
        .collect()
}

proptest! {
    #[test]
    fn wrapper_with_abi_prefix_matches(arity in 0usize..4, throws in any::<bool>(), is_static in any::<bool>()) {
        let original = FunctionDeclaration {
            throws,
            is_static,
            ..FunctionDeclaration::new("op", int_params(arity), TypeSpec::named("Swift.Int"))
        };

        let mut parameters = Vec::new();
        if throws {
            parameters.push(Parameter::new(
                "retval",
                TypeSpec::parse("Swift.UnsafeMutablePointer<(Swift.Int, Swift.Error, Swift.Bool)>").unwrap(),
            ));
        }
        if !is_static {
            parameters.push(Parameter::new("this", TypeSpec::named("M.C")));
        }
        parameters.extend(int_params(arity));
        let returns = if throws { TypeSpec::empty() } else { TypeSpec::named("Swift.Int") };

        let config = GlueConfig::default();
        let name = WrapperNaming::new(&config.naming).wrapper_name(&FunctionDeclaration {
            parent: Some("M.C".into()),
            ..original.clone()
        });
        let wrapper = FunctionDeclaration::new(name.clone(), parameters, returns);
        let facts = facts_for(original, wrapper);
        let correlator = Correlator::new(&facts, &config.naming);
        let op = member(&facts, "M.C", "op");

        let found = correlator.correlate(op).unwrap();
        prop_assert_eq!(found.wrapper().map(|w| w.name.as_str()), Some(name.as_str()));

        let unrelated = FunctionDeclaration {
            parent: Some("M.C".into()),
            throws,
            is_static,
            ..FunctionDeclaration::new("other", int_params(arity + 1), TypeSpec::named("Swift.Int"))
        };
        let missed = correlator.correlate_named(&unrelated, &name);
        prop_assert!(matches!(missed, Ok(Correlation::NoMatch)));
    }
}
