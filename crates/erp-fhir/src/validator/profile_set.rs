//! Validation of one element against several profiles in parallel.
//!
//! Each [`ProfileSetValidator`] handles a single element. For every
//! sub-field a child instance is created via [`ProfileSetValidator::
//! sub_field`]; the parent keeps the occurrence counters and slice
//! checkers of its children, so child processing reports its counter and
//! slice effects back through [`ChildEffects`] instead of holding a
//! parent pointer.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::Element;
use crate::repository::{FhirStructureRepository, Kind, Pet, SlicingRules};
use crate::validator::profile_validator::{
    map_key_to_string, CounterData, CounterKey, ProfileValidator,
};
use crate::validator::slicing::SlicingChecker;
use crate::validator::{FhirPathValidator, Severity, ValidationResults};

/// Slice bookkeeping produced while processing a child element.
#[derive(Debug)]
pub(crate) enum SliceEvent {
    /// The element matched a slice of the checker at `checker`.
    Sliced {
        checker: Pet,
        slice_profile: usize,
        path: String,
    },
    /// The element matched no slice.
    Unsliced { checker: Pet, path: String },
}

/// Effects a child's `process` run has on its parent.
#[derive(Debug, Default)]
pub(crate) struct ChildEffects {
    /// Counters to register: `(key, owning validator, element def)`.
    registrations: Vec<(CounterKey, Pet, Pet)>,
    /// Counters to increment once.
    increments: BTreeSet<CounterKey>,
    /// Slice checker events in document order.
    slice_events: Vec<SliceEvent>,
}

/// Validates one element against all profiles that apply to it.
pub(crate) struct ProfileSetValidator<'a> {
    repo: &'a FhirStructureRepository,
    root_validator: ProfileValidator<'a>,
    validators: BTreeMap<Pet, ProfileValidator<'a>>,
    include_in_result: BTreeSet<Pet>,
    child_counters: BTreeMap<CounterKey, CounterData>,
    slice_checkers: BTreeMap<Pet, SlicingChecker>,
    element_in_parent: Option<Pet>,
    results: ValidationResults,
}

impl<'a> ProfileSetValidator<'a> {
    /// Set validator for a top-level element and an explicit profile
    /// set.
    pub(crate) fn new_root(
        repo: &'a FhirStructureRepository,
        root: Pet,
        def_ptrs: &BTreeSet<Pet>,
        _options: &super::ValidatorOptions,
    ) -> Self {
        let mut set = Self {
            repo,
            root_validator: ProfileValidator::new(repo, root),
            validators: BTreeMap::new(),
            include_in_result: BTreeSet::new(),
            child_counters: BTreeMap::new(),
            slice_checkers: BTreeMap::new(),
            element_in_parent: None,
            results: ValidationResults::new(),
        };
        for def_ptr in def_ptrs {
            set.validators
                .entry(*def_ptr)
                .or_insert_with(|| ProfileValidator::new(repo, *def_ptr));
            set.include_in_result.insert(*def_ptr);
        }
        set.validators
            .entry(root)
            .or_insert_with(|| ProfileValidator::new(repo, root));
        set.include_in_result.insert(root);
        set
    }

    pub(crate) fn root_pointer(&self) -> Pet {
        self.root_validator.def_ptr()
    }

    pub(crate) fn is_resource(&self, repo: &FhirStructureRepository) -> bool {
        let root = self.root_pointer();
        root.is_root() && matches!(repo.profile(root).kind, Kind::Resource)
    }

    pub(crate) fn is_array(&self, repo: &FhirStructureRepository) -> bool {
        self.element_in_parent
            .map(|pet| repo.element(pet).is_array)
            .unwrap_or(false)
    }

    /// Retype root-level validators to the resource type observed in the
    /// document.
    pub(crate) fn typecast(&mut self, repo: &FhirStructureRepository, type_profile: usize) {
        self.root_validator.typecast(type_profile);
        let ancestor_url = repo.structure(type_profile).url.clone();
        for validator in self.validators.values_mut() {
            let def_ptr = validator.def_ptr();
            if !def_ptr.is_root() || repo.is_derived_from(def_ptr.profile, &ancestor_url) {
                continue;
            }
            validator.typecast(type_profile);
        }
    }

    /// Add the document-claimed profiles (`meta.profile`) at a resource
    /// node; each must derive from the observed resource type.
    pub(crate) fn add_profiles(
        &mut self,
        repo: &FhirStructureRepository,
        profiles: &BTreeSet<Pet>,
    ) {
        debug_assert!(
            self.root_pointer().is_root(),
            "cannot add profiles below a resource root"
        );
        let root_url = repo.profile(self.root_pointer()).url.clone();
        for profile in profiles {
            if repo.is_derived_from(profile.profile, &root_url) {
                self.include_in_result.insert(*profile);
                self.validators
                    .entry(*profile)
                    .or_insert_with(|| ProfileValidator::new(self.repo, *profile));
            }
        }
    }

    /// Create the child set validator for a named sub-field, wiring its
    /// counters and slice checkers into this (parent) instance.
    pub(crate) fn sub_field(
        &mut self,
        validator: &FhirPathValidator<'a>,
        name: &str,
    ) -> Option<ProfileSetValidator<'a>> {
        let root_list = self.repo.sub_definitions(self.root_pointer(), name);
        let sub_root = *root_list.last()?;
        let mut child = ProfileSetValidator {
            repo: self.repo,
            root_validator: ProfileValidator::new(self.repo, sub_root),
            validators: BTreeMap::new(),
            include_in_result: BTreeSet::new(),
            child_counters: BTreeMap::new(),
            slice_checkers: BTreeMap::new(),
            element_in_parent: self.repo.sub_field(self.root_pointer(), name),
            results: ValidationResults::new(),
        };
        for parent_validator in self.validators.values_mut() {
            let sub_validators = parent_validator.sub_field_validators(name);
            for (key, sub_validator) in sub_validators {
                match child.validators.get_mut(&key) {
                    Some(existing) => existing.merge(sub_validator),
                    None => {
                        child.validators.insert(key, sub_validator);
                    }
                }
            }
        }
        self.register_counters(child.validators.values());
        self.create_slice_checkers(validator, &child);
        Some(child)
    }

    /// Register cardinality counters for the given child validators.
    fn register_counters<'v>(
        &mut self,
        validators: impl Iterator<Item = &'v ProfileValidator<'a>>,
    ) where
        'a: 'v,
    {
        for validator in validators {
            let def_ptr = validator.def_ptr();
            let is_array = self.repo.element(def_ptr).is_array;
            if !self.repo.cardinality(def_ptr).is_constraint(is_array) {
                continue;
            }
            let key = validator.counter_key();
            for parent_key in validator.parent_keys() {
                self.child_counters
                    .entry(key.clone())
                    .or_default()
                    .element_map
                    .insert(parent_key, def_ptr);
            }
        }
    }

    fn create_slice_checkers(
        &mut self,
        validator: &FhirPathValidator<'a>,
        child: &ProfileSetValidator<'a>,
    ) {
        let repo = self.repo;
        let check_extension = validator.options().report_unknown_extensions
            && validator.extension_root() == Some(child.root_pointer());
        let rule_override = check_extension.then_some(SlicingRules::ReportOther);
        let mut extension_checked = false;
        for child_validator in child.validators.values() {
            let def_ptr = child_validator.def_ptr();
            let element = repo.element(def_ptr);
            if !element.has_slices() {
                continue;
            }
            extension_checked = true;
            let slicing = element.slicing.as_ref().expect("has_slices checked");
            let newly_created = !self.slice_checkers.contains_key(&def_ptr);
            let checker = self.slice_checkers.entry(def_ptr).or_insert_with(|| {
                tracing::trace!(
                    checker = %map_key_to_string(repo, def_ptr),
                    "adding slice checker"
                );
                SlicingChecker::new(repo.profile(def_ptr).key(), slicing, rule_override)
            });
            for parent_key in child_validator.parent_keys() {
                checker.add_affected_validator(parent_key);
            }
            if newly_created {
                let is_array = element.is_array;
                let mut slice_counters = Vec::new();
                for slice in &slicing.slices {
                    let slice_root = Pet::root(slice.profile);
                    let root_element = repo.element(slice_root);
                    if !root_element.cardinality.is_constraint(is_array) {
                        continue;
                    }
                    let key = CounterKey {
                        name: root_element.field_name.clone(),
                        slice: slice.name.clone(),
                    };
                    for parent_key in child_validator.parent_keys() {
                        slice_counters.push((key.clone(), parent_key, slice_root));
                    }
                }
                for (key, parent_key, slice_root) in slice_counters {
                    self.child_counters
                        .entry(key)
                        .or_default()
                        .element_map
                        .insert(parent_key, slice_root);
                }
            }
        }
        if check_extension && !extension_checked {
            // no extension slices defined here: fall back to the generic
            // Element.extension slicing so unknown extensions still get
            // reported
            if let Some(extension_def) = validator.element_extension() {
                if let Some(slicing) = &repo.element(extension_def).slicing {
                    let key = child.root_pointer();
                    let checker = self.slice_checkers.entry(key).or_insert_with(|| {
                        SlicingChecker::new(repo.profile(key).key(), slicing, rule_override)
                    });
                    checker.add_affected_validator(self.root_validator.key());
                }
            }
        }
    }

    /// Run all per-profile checks on the element. The returned effects
    /// must be applied to the parent set validator.
    pub(crate) fn process(
        &mut self,
        _validator: &FhirPathValidator<'a>,
        element: &Element<'a>,
        element_full_path: &str,
    ) -> ChildEffects {
        let mut effects = ChildEffects::default();
        if element.has_value() {
            self.child_counters
                .entry(CounterKey {
                    name: "value".to_string(),
                    slice: String::new(),
                })
                .or_default()
                .count += 1;
        }
        let mut to_validate = std::mem::take(&mut self.validators);
        while !to_validate.is_empty() {
            let mut added = BTreeMap::new();
            for (_key, validator) in to_validate.iter_mut() {
                let outcome = validator.process(element, element_full_path);
                if outcome.slice_profiles.len() > 1 {
                    let names: Vec<String> = outcome
                        .slice_profiles
                        .iter()
                        .map(|profile| self.repo.structure(*profile).name.clone())
                        .collect();
                    self.results.add(
                        Severity::Error,
                        format!("element belongs to more than one slice: [{}]", names.join(", ")),
                        element_full_path.to_string(),
                        Some(self.repo.profile(validator.def_ptr()).key()),
                    );
                }
                if outcome.slice_profiles.is_empty() {
                    effects.slice_events.push(SliceEvent::Unsliced {
                        checker: validator.def_ptr(),
                        path: element_full_path.to_string(),
                    });
                } else {
                    for slice_profile in &outcome.slice_profiles {
                        effects.slice_events.push(SliceEvent::Sliced {
                            checker: validator.def_ptr(),
                            slice_profile: *slice_profile,
                            path: element_full_path.to_string(),
                        });
                    }
                }
                for (key, extra) in outcome.extra_validators {
                    if !self.validators.contains_key(&key) && !added.contains_key(&key) {
                        added.insert(key, extra);
                    }
                }
            }
            self.validators.append(&mut to_validate);
            // counters of validators discovered during processing are
            // registered with the parent
            for validator in added.values() {
                let def_ptr = validator.def_ptr();
                let is_array = self.repo.element(def_ptr).is_array;
                if !self.repo.cardinality(def_ptr).is_constraint(is_array) {
                    continue;
                }
                let key = validator.counter_key();
                for parent_key in validator.parent_keys() {
                    effects
                        .registrations
                        .push((key.clone(), parent_key, def_ptr));
                }
            }
            to_validate = added;
        }
        for validator in self.validators.values() {
            effects.increments.insert(validator.counter_key());
        }
        effects
    }

    /// Apply a child's counter and slice effects.
    pub(crate) fn apply_child_effects(&mut self, effects: ChildEffects) {
        for (key, parent_key, def_ptr) in effects.registrations {
            self.child_counters
                .entry(key)
                .or_default()
                .element_map
                .insert(parent_key, def_ptr);
        }
        for key in effects.increments {
            if let Some(counter) = self.child_counters.get_mut(&key) {
                counter.count += 1;
            }
        }
        for event in effects.slice_events {
            match event {
                SliceEvent::Sliced {
                    checker,
                    slice_profile,
                    path,
                } => {
                    if let Some(found) = self.slice_checkers.get_mut(&checker) {
                        found.found_sliced(self.repo, slice_profile, &path);
                    }
                }
                SliceEvent::Unsliced { checker, path } => {
                    if let Some(found) = self.slice_checkers.get_mut(&checker) {
                        found.found_unsliced(&path);
                    }
                }
            }
        }
    }

    /// Check counters and slice rules of the children, then propagate
    /// failures across dependent profiles.
    pub(crate) fn finalize(&mut self, element_full_path: &str) {
        for (key, counter) in &self.child_counters {
            counter.check(self.repo, &mut self.validators, key, element_full_path);
        }
        let checkers = std::mem::take(&mut self.slice_checkers);
        for (_key, mut checker) in checkers {
            checker.finalize(self.repo, element_full_path);
            let results = checker.results();
            for affected in checker.affected_validators() {
                if let Some(validator) = self.validators.get_mut(affected) {
                    validator.append_results(results.clone());
                }
            }
        }
        self.propagate_failures();
    }

    fn propagate_failures(&mut self) {
        let mut failed: BTreeSet<Pet> = self
            .validators
            .iter()
            .filter(|(_, v)| v.failed())
            .map(|(key, _)| *key)
            .collect();
        let mut new_failed = failed.clone();
        while !new_failed.is_empty() {
            let batch = std::mem::take(&mut new_failed);
            for failure in batch {
                for (key, validator) in self.validators.iter_mut() {
                    validator.notify_failed(failure);
                    if validator.failed() && failed.insert(*key) {
                        new_failed.insert(*key);
                        tracing::trace!(
                            validator = %map_key_to_string(self.repo, *key),
                            cause = %map_key_to_string(self.repo, failure),
                            "failed due to dependency"
                        );
                    }
                }
            }
        }
        for validator in self.validators.values_mut() {
            validator.finalize();
        }
    }

    /// Findings of this node: the tracked result profiles plus the
    /// set-level findings.
    pub(crate) fn results(&self) -> ValidationResults {
        let mut results = ValidationResults::new();
        for key in &self.include_in_result {
            if let Some(validator) = self.validators.get(key) {
                results.merge(&validator.results());
            }
        }
        results.merge(&self.results);
        results
    }
}
