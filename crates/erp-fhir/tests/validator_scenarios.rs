//! End-to-end validator scenarios over a small, self-contained profile
//! world.

use std::collections::BTreeSet;

use erp_fhir::model::Element;
use erp_fhir::repository::{load, Cardinality, FhirStructureRepository, ViewSpec};
use erp_fhir::validator::{FhirPathValidator, Severity, ValidatorOptions};
use proptest::prelude::*;
use serde_json::{json, Value};

fn sliceable_profile() -> Value {
    json!({
        "resourceType": "StructureDefinition",
        "url": "http://example.org/fhir/StructureDefinition/Sliceable",
        "version": "1.0",
        "name": "Sliceable",
        "type": "Sliceable",
        "kind": "resource",
        "snapshot": {"element": [
            {"path": "Sliceable", "min": 0, "max": "*"},
            {"path": "Sliceable.id", "min": 0, "max": "1", "type": [{"code": "string"}]},
            {"path": "Sliceable.meta", "min": 0, "max": "1", "type": [{"code": "Meta"}]},
            {"path": "Sliceable.note", "min": 0, "max": "1", "type": [{"code": "string"}]},
            {"path": "Sliceable.sliced", "min": 0, "max": "*", "base": {"max": "*"},
             "type": [{"code": "Coding"}],
             "slicing": {"ordered": false, "rules": "closed",
                         "discriminator": [{"type": "value", "path": "system"}]}},
            {"path": "Sliceable.sliced", "sliceName": "alpha", "min": 0, "max": "2",
             "type": [{"code": "Coding"}]},
            {"path": "Sliceable.sliced.system", "min": 1, "max": "1",
             "type": [{"code": "uri"}], "fixedUri": "http://example.org/system/alpha"},
            {"path": "Sliceable.sliced.code", "min": 0, "max": "1", "type": [{"code": "code"}]},
            {"path": "Sliceable.sliced", "sliceName": "beta", "min": 0, "max": "1",
             "type": [{"code": "Coding"}]},
            {"path": "Sliceable.sliced.system", "min": 1, "max": "1",
             "type": [{"code": "uri"}], "fixedUri": "http://example.org/system/beta"},
            {"path": "Sliceable.sliced.code", "min": 0, "max": "1", "type": [{"code": "code"}]}
        ]}
    })
}

fn meta_type() -> Value {
    json!({
        "resourceType": "StructureDefinition",
        "url": "http://hl7.org/fhir/StructureDefinition/Meta",
        "version": "4.0.1",
        "name": "Meta",
        "type": "Meta",
        "kind": "complex-type",
        "snapshot": {"element": [
            {"path": "Meta", "min": 0, "max": "*"},
            {"path": "Meta.profile", "min": 0, "max": "*", "base": {"max": "*"},
             "type": [{"code": "canonical"}]}
        ]}
    })
}

fn coding_type() -> Value {
    json!({
        "resourceType": "StructureDefinition",
        "url": "http://hl7.org/fhir/StructureDefinition/Coding",
        "version": "4.0.1",
        "name": "Coding",
        "type": "Coding",
        "kind": "complex-type",
        "snapshot": {"element": [
            {"path": "Coding", "min": 0, "max": "*"},
            {"path": "Coding.system", "min": 0, "max": "1", "type": [{"code": "uri"}]},
            {"path": "Coding.code", "min": 0, "max": "1", "type": [{"code": "code"}]}
        ]}
    })
}

fn strict_note_profile() -> Value {
    // constrains Sliceable: note becomes mandatory
    json!({
        "resourceType": "StructureDefinition",
        "url": "http://example.org/fhir/StructureDefinition/StrictNote",
        "version": "1.0",
        "name": "StrictNote",
        "type": "Sliceable",
        "kind": "resource",
        "derivation": "constraint",
        "baseDefinition": "http://example.org/fhir/StructureDefinition/Sliceable",
        "snapshot": {"element": [
            {"path": "Sliceable", "min": 0, "max": "*",
             "constraint": [{"key": "sn-1", "severity": "error",
                             "human": "note must not equal id",
                             "expression": "note.empty() or note != id"}]},
            {"path": "Sliceable.id", "min": 0, "max": "1", "type": [{"code": "string"}]},
            {"path": "Sliceable.meta", "min": 0, "max": "1", "type": [{"code": "Meta"}]},
            {"path": "Sliceable.note", "min": 1, "max": "1", "type": [{"code": "string"}]},
            {"path": "Sliceable.sliced", "min": 0, "max": "*", "base": {"max": "*"},
             "type": [{"code": "Coding"}]}
        ]}
    })
}

fn repo() -> FhirStructureRepository {
    load(
        vec![
            sliceable_profile(),
            meta_type(),
            coding_type(),
            strict_note_profile(),
        ],
        Vec::<ViewSpec>::new(),
    )
    .expect("test repository loads")
}

fn validate(repo: &FhirStructureRepository, document: &Value) -> erp_fhir::ValidationResults {
    let element = Element::resource_root(repo, document).expect("resource root");
    FhirPathValidator::validate(&element, "Sliceable", ValidatorOptions::default())
}

fn errors(results: &erp_fhir::ValidationResults) -> Vec<String> {
    results
        .results()
        .iter()
        .filter(|f| f.severity == Severity::Error)
        .map(|f| format!("{}: {}", f.element_full_path, f.message))
        .collect()
}

#[test]
fn accepts_well_formed_document() {
    let repo = repo();
    let document = json!({
        "resourceType": "Sliceable",
        "id": "ok-1",
        "sliced": [
            {"system": "http://example.org/system/alpha", "code": "a"},
            {"system": "http://example.org/system/beta"}
        ]
    });
    let results = validate(&repo, &document);
    assert!(
        results.highest_severity() < Severity::Error,
        "unexpected findings: {}",
        results.summary(Severity::Warning)
    );
}

#[test]
fn closed_slicing_rejects_unmatched_entry() {
    let repo = repo();
    let document = json!({
        "resourceType": "Sliceable",
        "sliced": [
            {"system": "http://example.org/system/alpha"},
            {"system": "http://example.org/system/unknown"},
            {"system": "http://example.org/system/beta"}
        ]
    });
    let results = validate(&repo, &document);
    let errors = errors(&results);
    assert_eq!(errors.len(), 1, "all errors: {errors:?}");
    assert_eq!(
        errors[0],
        "Sliceable.sliced[1]: element doesn't match any slice in closed slicing"
    );
}

#[test]
fn slice_cardinality_is_enforced() {
    let repo = repo();
    let document = json!({
        "resourceType": "Sliceable",
        "sliced": [
            {"system": "http://example.org/system/alpha"},
            {"system": "http://example.org/system/alpha"},
            {"system": "http://example.org/system/alpha"}
        ]
    });
    let results = validate(&repo, &document);
    assert_eq!(results.highest_severity(), Severity::Error);
    assert!(
        results
            .summary(Severity::Error)
            .contains("too many occurrences"),
        "summary: {}",
        results.summary(Severity::Debug)
    );
}

#[test]
fn undefined_sub_element_is_an_error() {
    let repo = repo();
    let document = json!({
        "resourceType": "Sliceable",
        "mystery": true
    });
    let results = validate(&repo, &document);
    let errors = errors(&results);
    assert!(
        errors
            .iter()
            .any(|e| e.contains("undefined sub element: mystery")),
        "all errors: {errors:?}"
    );
}

#[test]
fn fixed_value_mismatch_fails_slice_membership() {
    let repo = repo();
    // matches neither slice because the system differs from both fixed
    // values; under closed slicing this must fail
    let document = json!({
        "resourceType": "Sliceable",
        "sliced": [{"system": "http://example.org/other"}]
    });
    let results = validate(&repo, &document);
    assert_eq!(results.highest_severity(), Severity::Error);
}

#[test]
fn meta_profile_is_picked_up_and_enforced() {
    let repo = repo();
    let document = json!({
        "resourceType": "Sliceable",
        "meta": {"profile": ["http://example.org/fhir/StructureDefinition/StrictNote"]},
        "id": "x"
    });
    // StrictNote requires note 1..1
    let element = Element::resource_root(&repo, &document).expect("resource root");
    let results = FhirPathValidator::validate_with_profiles(
        &element,
        "Sliceable",
        &BTreeSet::new(),
        ValidatorOptions::default(),
    );
    assert_eq!(
        results.highest_severity(),
        Severity::Error,
        "summary: {}",
        results.summary(Severity::Debug)
    );
    assert!(results
        .summary(Severity::Error)
        .contains("missing mandatory element"));
}

#[test]
fn unknown_meta_profile_is_reported() {
    let repo = repo();
    let document = json!({
        "resourceType": "Sliceable",
        "meta": {"profile": ["http://example.org/fhir/StructureDefinition/DoesNotExist"]}
    });
    let results = validate(&repo, &document);
    assert!(results
        .summary(Severity::Error)
        .contains("Unknown profile: http://example.org/fhir/StructureDefinition/DoesNotExist"));
}

#[test]
fn constraint_violation_reports_key_and_human_text() {
    let repo = repo();
    let document = json!({
        "resourceType": "Sliceable",
        "meta": {"profile": ["http://example.org/fhir/StructureDefinition/StrictNote"]},
        "id": "same",
        "note": "same"
    });
    let results = validate(&repo, &document);
    let summary = results.summary(Severity::Error);
    assert!(summary.contains("sn-1"), "summary: {summary}");
    assert!(summary.contains("note must not equal id"), "summary: {summary}");
}

#[test]
fn constraint_passes_when_satisfied() {
    let repo = repo();
    let document = json!({
        "resourceType": "Sliceable",
        "meta": {"profile": ["http://example.org/fhir/StructureDefinition/StrictNote"]},
        "id": "one",
        "note": "different"
    });
    let results = validate(&repo, &document);
    assert!(
        results.highest_severity() < Severity::Error,
        "summary: {}",
        results.summary(Severity::Debug)
    );
}

#[test]
fn cardinality_boundary_exactly_min_passes_min_minus_one_fails() {
    let repo = repo();
    let good = json!({
        "resourceType": "Sliceable",
        "meta": {"profile": ["http://example.org/fhir/StructureDefinition/StrictNote"]},
        "note": "present"
    });
    assert!(validate(&repo, &good).highest_severity() < Severity::Error);

    let bad = json!({
        "resourceType": "Sliceable",
        "meta": {"profile": ["http://example.org/fhir/StructureDefinition/StrictNote"]}
    });
    let results = validate(&repo, &bad);
    assert_eq!(results.highest_severity(), Severity::Error);
}

#[test]
fn date_validity_is_checked() {
    let date_repo = load(
        vec![json!({
            "resourceType": "StructureDefinition",
            "url": "http://example.org/fhir/StructureDefinition/Dated",
            "version": "1.0",
            "name": "Dated",
            "type": "Dated",
            "kind": "resource",
            "snapshot": {"element": [
                {"path": "Dated", "min": 0, "max": "*"},
                {"path": "Dated.on", "min": 0, "max": "1", "type": [{"code": "date"}]}
            ]}
        })],
        Vec::<ViewSpec>::new(),
    )
    .expect("repo loads");
    let bad = json!({"resourceType": "Dated", "on": "2015-02-29"});
    let element = Element::resource_root(&date_repo, &bad).expect("root");
    let results = FhirPathValidator::validate(&element, "Dated", ValidatorOptions::default());
    assert_eq!(
        results.highest_severity(),
        Severity::Error,
        "summary: {}",
        results.summary(Severity::Debug)
    );

    let good = json!({"resourceType": "Dated", "on": "2016-02-29"});
    let element = Element::resource_root(&date_repo, &good).expect("root");
    let results = FhirPathValidator::validate(&element, "Dated", ValidatorOptions::default());
    assert!(results.highest_severity() < Severity::Error);
}

#[test]
fn required_binding_rejects_foreign_code() {
    let bound_repo = load(
        vec![
            json!({
                "resourceType": "CodeSystem",
                "url": "http://example.org/cs/status",
                "content": "complete",
                "concept": [{"code": "open"}, {"code": "closed"}]
            }),
            json!({
                "resourceType": "ValueSet",
                "url": "http://example.org/vs/status",
                "compose": {"include": [{"system": "http://example.org/cs/status"}]}
            }),
            json!({
                "resourceType": "StructureDefinition",
                "url": "http://example.org/fhir/StructureDefinition/Statused",
                "version": "1.0",
                "name": "Statused",
                "type": "Statused",
                "kind": "resource",
                "snapshot": {"element": [
                    {"path": "Statused", "min": 0, "max": "*"},
                    {"path": "Statused.status", "min": 0, "max": "1",
                     "type": [{"code": "code"}],
                     "binding": {"strength": "required",
                                 "valueSet": "http://example.org/vs/status"}}
                ]}
            }),
        ],
        Vec::<ViewSpec>::new(),
    )
    .expect("repo loads");

    let bad = json!({"resourceType": "Statused", "status": "unknown"});
    let element = Element::resource_root(&bound_repo, &bad).expect("root");
    let results = FhirPathValidator::validate(&element, "Statused", ValidatorOptions::default());
    assert_eq!(results.highest_severity(), Severity::Error);
    assert!(results
        .summary(Severity::Error)
        .contains("not allowed for ValueSet binding"));

    let good = json!({"resourceType": "Statused", "status": "open"});
    let element = Element::resource_root(&bound_repo, &good).expect("root");
    let results = FhirPathValidator::validate(&element, "Statused", ValidatorOptions::default());
    assert!(results.highest_severity() < Severity::Error);
}

proptest! {
    #[test]
    fn expression_parser_never_panics(source in "[a-zA-Z0-9.()'=! |<>]{0,48}") {
        let _ = erp_fhir::path::parse(&source);
    }

    #[test]
    fn counts_within_bounds_never_produce_findings(min in 0u32..4, extra in 0u32..4, offset in 0u32..4) {
        let cardinality = Cardinality { min, max: Some(min + extra) };
        let count = min + offset.min(extra);
        let results = cardinality.check(count as usize, "Resource.field", None);
        prop_assert!(results.results().is_empty(), "{}", results.summary(Severity::Debug));
    }

    #[test]
    fn counts_outside_bounds_always_produce_findings(min in 1u32..4, extra in 0u32..4) {
        let cardinality = Cardinality { min, max: Some(min + extra) };
        let below = cardinality.check((min - 1) as usize, "Resource.field", None);
        prop_assert_eq!(below.highest_severity(), Severity::Error);
        let above = cardinality.check((min + extra + 1) as usize, "Resource.field", None);
        prop_assert_eq!(above.highest_severity(), Severity::Error);
    }
}

#[test]
fn missing_code_system_degrades_binding_to_warning() {
    let bound_repo = load(
        vec![
            json!({
                "resourceType": "ValueSet",
                "url": "http://example.org/vs/unresolvable",
                "compose": {"include": [{"system": "http://example.org/cs/absent"}]}
            }),
            json!({
                "resourceType": "StructureDefinition",
                "url": "http://example.org/fhir/StructureDefinition/Loose",
                "version": "1.0",
                "name": "Loose",
                "type": "Loose",
                "kind": "resource",
                "snapshot": {"element": [
                    {"path": "Loose", "min": 0, "max": "*"},
                    {"path": "Loose.status", "min": 0, "max": "1",
                     "type": [{"code": "code"}],
                     "binding": {"strength": "required",
                                 "valueSet": "http://example.org/vs/unresolvable"}}
                ]}
            }),
        ],
        Vec::<ViewSpec>::new(),
    )
    .expect("repo loads");
    let document = json!({"resourceType": "Loose", "status": "whatever"});
    let element = Element::resource_root(&bound_repo, &document).expect("root");
    let results = FhirPathValidator::validate(&element, "Loose", ValidatorOptions::default());
    assert_eq!(results.highest_severity(), Severity::Warning);
    assert!(results
        .summary(Severity::Warning)
        .contains("Cannot validate ValueSet binding"));
}
