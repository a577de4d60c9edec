//! Enforcement of slicing rules and slice order.
//!
//! Whenever the set validator processes an occurrence of a sliced field
//! it reports either `found_sliced` (the occurrence matched a slice) or
//! `found_unsliced`. The checker enforces the slicing rule (`open`,
//! `closed`, `openAtEnd`, `reportOther`), order for `ordered` slicings,
//! and per-slice cardinality at finalization.

use std::collections::BTreeSet;

use crate::repository::{FhirStructureRepository, Pet, Slicing, SlicingRules};
use crate::validator::{Severity, ValidationResults};

#[derive(Debug)]
struct SliceData {
    profile: usize,
    count: usize,
}

#[derive(Debug)]
pub(crate) struct SlicingChecker {
    ordered: bool,
    rules: SlicingRules,
    slices: Vec<SliceData>,
    last_idx: usize,
    /// An unmatched occurrence has been seen.
    done: bool,
    unmatched_full_name: String,
    results: ValidationResults,
    base_profile: String,
    affected: BTreeSet<Pet>,
}

impl SlicingChecker {
    pub(crate) fn new(
        base_profile: String,
        slicing: &Slicing,
        rule_override: Option<SlicingRules>,
    ) -> Self {
        Self {
            ordered: slicing.ordered,
            rules: rule_override.unwrap_or(slicing.rules),
            slices: slicing
                .slices
                .iter()
                .map(|slice| SliceData {
                    profile: slice.profile,
                    count: 0,
                })
                .collect(),
            last_idx: 0,
            done: false,
            unmatched_full_name: String::new(),
            results: ValidationResults::new(),
            base_profile,
            affected: BTreeSet::new(),
        }
    }

    pub(crate) fn add_affected_validator(&mut self, key: Pet) {
        self.affected.insert(key);
    }

    pub(crate) fn affected_validators(&self) -> &BTreeSet<Pet> {
        &self.affected
    }

    pub(crate) fn found_sliced(
        &mut self,
        repo: &FhirStructureRepository,
        slice_profile: usize,
        full_element_name: &str,
    ) {
        let Some(idx) = self.slices.iter().position(|s| s.profile == slice_profile) else {
            return;
        };
        self.slices[idx].count += 1;
        let slice_sd = repo.structure(slice_profile);
        if self.rules == SlicingRules::OpenAtEnd && self.done {
            self.results.add(
                Severity::Error,
                format!(
                    "element matching slice {} after unmatched element {} in Slicing with rule openAtEnd",
                    slice_sd.name, self.unmatched_full_name
                ),
                full_element_name.to_string(),
                Some(slice_sd.key()),
            );
        }
        if self.ordered && idx < self.last_idx {
            self.results.add(
                Severity::Error,
                "slicing out of order".to_string(),
                full_element_name.to_string(),
                Some(self.base_profile.clone()),
            );
        }
        self.last_idx = idx;
    }

    pub(crate) fn found_unsliced(&mut self, full_element_name: &str) {
        self.unmatched_full_name = full_element_name.to_string();
        match self.rules {
            SlicingRules::Open => return,
            SlicingRules::ReportOther => {
                self.results.add(
                    Severity::UnslicedWarning,
                    "element doesn't belong to any slice.".to_string(),
                    full_element_name.to_string(),
                    Some(self.base_profile.clone()),
                );
            }
            SlicingRules::Closed => {
                self.results.add(
                    Severity::Error,
                    "element doesn't match any slice in closed slicing".to_string(),
                    full_element_name.to_string(),
                    Some(self.base_profile.clone()),
                );
            }
            SlicingRules::OpenAtEnd => {}
        }
        self.done = true;
    }

    /// Per-slice cardinality against the number of assigned occurrences.
    pub(crate) fn finalize(&mut self, repo: &FhirStructureRepository, element_full_path: &str) {
        for slice in &self.slices {
            let slice_sd = repo.structure(slice.profile);
            let root = &slice_sd.elements[0];
            let name = format!("{element_full_path}.{}", root.field_name);
            let key = slice_sd.key();
            self.results
                .append(root.cardinality.check(slice.count, &name, Some(&key)));
        }
    }

    pub(crate) fn results(&self) -> ValidationResults {
        self.results.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{load, ViewSpec};
    use serde_json::json;

    fn repo_with_slices() -> FhirStructureRepository {
        load(
            vec![json!({
                "resourceType": "StructureDefinition",
                "url": "http://example.org/fhir/StructureDefinition/Sliceable",
                "version": "1.0",
                "name": "Sliceable",
                "type": "Sliceable",
                "kind": "resource",
                "snapshot": {"element": [
                    {"path": "Sliceable", "min": 0, "max": "*"},
                    {"path": "Sliceable.sliced", "min": 0, "max": "*", "base": {"max": "*"},
                     "type": [{"code": "Coding"}],
                     "slicing": {"ordered": true, "rules": "closed",
                                 "discriminator": [{"type": "value", "path": "system"}]}},
                    {"path": "Sliceable.sliced", "sliceName": "first", "min": 0, "max": "2",
                     "type": [{"code": "Coding"}]},
                    {"path": "Sliceable.sliced.system", "min": 1, "max": "1",
                     "type": [{"code": "uri"}], "fixedUri": "http://example.org/a"},
                    {"path": "Sliceable.sliced", "sliceName": "second", "min": 1, "max": "1",
                     "type": [{"code": "Coding"}]}
                ]}
            })],
            Vec::<ViewSpec>::new(),
        )
        .expect("slice repo loads")
    }

    fn checker(repo: &FhirStructureRepository, rule_override: Option<SlicingRules>) -> SlicingChecker {
        let sd_idx = repo
            .find_definition_by_url("http://example.org/fhir/StructureDefinition/Sliceable", None)
            .expect("profile present");
        let sd = repo.structure(sd_idx);
        let element = &sd.elements[sd.find_element("Sliceable.sliced").expect("sliced element")];
        SlicingChecker::new(
            sd.key(),
            element.slicing.as_ref().expect("slicing present"),
            rule_override,
        )
    }

    #[test]
    fn closed_slicing_rejects_unmatched() {
        let repo = repo_with_slices();
        let mut checker = checker(&repo, None);
        checker.found_unsliced("Sliceable.sliced[1]");
        let results = checker.results();
        assert_eq!(results.results().len(), 1);
        let finding = &results.results()[0];
        assert_eq!(finding.severity, Severity::Error);
        assert_eq!(
            finding.message,
            "element doesn't match any slice in closed slicing"
        );
        assert_eq!(finding.element_full_path, "Sliceable.sliced[1]");
    }

    #[test]
    fn report_other_downgrades_to_unsliced_warning() {
        let repo = repo_with_slices();
        let mut checker = checker(&repo, Some(SlicingRules::ReportOther));
        checker.found_unsliced("Sliceable.sliced[0]");
        let results = checker.results();
        let finding = &results.results()[0];
        assert_eq!(finding.severity, Severity::UnslicedWarning);
        assert_eq!(finding.message, "element doesn't belong to any slice.");
    }

    #[test]
    fn open_at_end_rejects_matching_after_unmatched() {
        let repo = repo_with_slices();
        let mut checker = checker(&repo, Some(SlicingRules::OpenAtEnd));
        let first_slice = repo
            .structure(
                repo.find_definition_by_url(
                    "http://example.org/fhir/StructureDefinition/Sliceable",
                    None,
                )
                .unwrap(),
            )
            .elements
            .iter()
            .find(|e| e.name == "Sliceable.sliced")
            .and_then(|e| e.slicing.as_ref())
            .map(|s| s.slices[0].profile)
            .expect("slice profile");
        checker.found_sliced(&repo, first_slice, "Sliceable.sliced[0]");
        checker.found_unsliced("Sliceable.sliced[1]");
        checker.found_sliced(&repo, first_slice, "Sliceable.sliced[2]");
        let results = checker.results();
        assert_eq!(results.results().len(), 1);
        assert!(results.results()[0]
            .message
            .contains("after unmatched element Sliceable.sliced[1]"));
    }

    #[test]
    fn ordered_slicing_rejects_regression() {
        let repo = repo_with_slices();
        let mut checker = checker(&repo, Some(SlicingRules::Open));
        let slicing = repo
            .structure(
                repo.find_definition_by_url(
                    "http://example.org/fhir/StructureDefinition/Sliceable",
                    None,
                )
                .unwrap(),
            )
            .elements
            .iter()
            .find(|e| e.name == "Sliceable.sliced")
            .and_then(|e| e.slicing.clone())
            .expect("slicing");
        let first = slicing.slices[0].profile;
        let second = slicing.slices[1].profile;
        checker.found_sliced(&repo, second, "Sliceable.sliced[0]");
        checker.found_sliced(&repo, first, "Sliceable.sliced[1]");
        let results = checker.results();
        assert_eq!(results.results().len(), 1);
        assert_eq!(results.results()[0].message, "slicing out of order");
    }

    #[test]
    fn finalize_checks_slice_cardinality() {
        let repo = repo_with_slices();
        let mut checker = checker(&repo, None);
        // slice "second" has min 1 and no occurrence
        checker.finalize(&repo, "Sliceable.sliced");
        let results = checker.results();
        assert_eq!(results.highest_severity(), Severity::Error);
        assert!(results
            .results()
            .iter()
            .any(|f| f.message.contains("missing mandatory element")));
    }
}
