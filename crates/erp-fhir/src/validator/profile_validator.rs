//! Validation of a single element against a single profile.
//!
//! A [`ProfileValidator`] owns the per-profile checks of one node:
//! constraints, fixed/pattern values, terminology bindings, and slice
//! detection. Findings live in a [`ValidationData`] shared through
//! `Rc<RefCell<..>>` with the validators that spawned it, so failures
//! bubble to every affected parent when the node finalizes. Nothing of
//! this state leaves the validation run.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::model::{Element, ElementKind};
use crate::path;
use crate::repository::{
    Binding, BindingStrength, FhirStructureRepository, Pet, ValueSet,
};
use crate::validator::{Severity, ValidationResults};

pub(crate) type SharedData = Rc<RefCell<ValidationData>>;

// ---------------------------------------------------------------------------
// ValidationData
// ---------------------------------------------------------------------------

/// Findings and failure state shared across the validators that watch
/// the same profile.
#[derive(Debug)]
pub(crate) struct ValidationData {
    map_key: Pet,
    results: ValidationResults,
    failed: bool,
}

impl ValidationData {
    pub(crate) fn new(map_key: Pet) -> SharedData {
        Rc::new(RefCell::new(Self {
            map_key,
            results: ValidationResults::new(),
            failed: false,
        }))
    }

    pub(crate) fn map_key(&self) -> Pet {
        self.map_key
    }

    pub(crate) fn add(
        &mut self,
        severity: Severity,
        message: String,
        element_full_path: String,
        profile: Option<String>,
    ) {
        if severity >= Severity::Error {
            self.failed = true;
        }
        self.results.add(severity, message, element_full_path, profile);
    }

    pub(crate) fn add_constraint(
        &mut self,
        severity: Severity,
        key: String,
        human: String,
        element_full_path: String,
        profile: Option<String>,
    ) {
        if severity >= Severity::Error {
            self.failed = true;
        }
        self.results
            .add_constraint(severity, key, human, element_full_path, profile);
    }

    pub(crate) fn append(&mut self, results: ValidationResults) {
        if results.highest_severity() >= Severity::Error {
            self.failed = true;
        }
        self.results.merge(&results);
    }

    pub(crate) fn merge(&mut self, other: &ValidationData) {
        self.failed = self.failed || other.failed;
        self.results.merge(&other.results);
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.failed
    }

    pub(crate) fn fail(&mut self) {
        self.failed = true;
    }

    pub(crate) fn results(&self) -> ValidationResults {
        self.results.clone()
    }
}

// ---------------------------------------------------------------------------
// ProfileSolver
// ---------------------------------------------------------------------------

/// Tracks "require one" groups: when an element declares several
/// allowed profiles, one of them validating cleanly is enough.
#[derive(Debug, Default)]
pub(crate) struct ProfileSolver {
    solvers: Vec<RequireOneSolver>,
    failed: bool,
}

#[derive(Debug)]
struct RequireOneSolver {
    failed: bool,
    good: BTreeMap<Pet, SharedData>,
    rejected: BTreeMap<Pet, SharedData>,
}

impl RequireOneSolver {
    fn fail(&mut self, key: Pet) -> bool {
        if let Some(data) = self.good.remove(&key) {
            self.rejected.insert(key, data);
            self.failed = self.good.is_empty();
        }
        self.failed
    }

    fn collect_results(&self) -> ValidationResults {
        let mut results = ValidationResults::new();
        let source = if self.failed { &self.rejected } else { &self.good };
        for data in source.values() {
            results.merge(&data.borrow().results());
        }
        results
    }
}

impl ProfileSolver {
    pub(crate) fn require_one(&mut self, candidates: BTreeMap<Pet, SharedData>) {
        debug_assert!(!candidates.is_empty(), "require-one set must not be empty");
        self.solvers.push(RequireOneSolver {
            failed: false,
            good: candidates,
            rejected: BTreeMap::new(),
        });
    }

    pub(crate) fn merge(&mut self, other: &mut ProfileSolver) {
        self.solvers.append(&mut other.solvers);
        self.failed = self.failed || other.failed;
    }

    /// Mark the candidate identified by `key` as failed. Returns whether
    /// any require-one group is now exhausted.
    pub(crate) fn fail(&mut self, key: Pet) -> bool {
        for solver in &mut self.solvers {
            if solver.fail(key) {
                self.failed = true;
            }
        }
        self.failed
    }

    pub(crate) fn failed(&self) -> bool {
        self.failed
    }

    pub(crate) fn collect_results(&self) -> ValidationResults {
        let mut results = ValidationResults::new();
        for solver in &self.solvers {
            results.merge(&solver.collect_results());
        }
        results
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Key of an occurrence counter: field name plus slice name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct CounterKey {
    pub(crate) name: String,
    pub(crate) slice: String,
}

impl std::fmt::Display for CounterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)?;
        if !self.slice.is_empty() {
            write!(f, ":{}", self.slice)?;
        }
        Ok(())
    }
}

/// Count plus the element definitions to check it against, per parent
/// validator.
#[derive(Debug, Default)]
pub(crate) struct CounterData {
    pub(crate) element_map: BTreeMap<Pet, Pet>,
    pub(crate) count: usize,
}

impl CounterData {
    /// Check the recorded count against every registered cardinality and
    /// deliver findings to the owning validators.
    pub(crate) fn check(
        &self,
        repo: &FhirStructureRepository,
        validators: &mut BTreeMap<Pet, ProfileValidator<'_>>,
        key: &CounterKey,
        element_full_path: &str,
    ) {
        for (map_key, def) in &self.element_map {
            let mut sub_path = format!("{element_full_path}.{}", key.name);
            if repo.element(*def).is_array {
                sub_path.push_str("[*]");
            }
            if !key.slice.is_empty() {
                sub_path.push(':');
                sub_path.push_str(&key.slice);
            }
            let results = repo.cardinality(*def).check(
                self.count,
                &sub_path,
                Some(repo.profile(*def).key()).as_deref(),
            );
            if let Some(validator) = validators.get_mut(map_key) {
                validator.append_results(results);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ProfileValidator
// ---------------------------------------------------------------------------

/// Result of processing one element under one profile.
#[derive(Debug, Default)]
pub(crate) struct ProcessingResult<'a> {
    /// Slice profiles the element was detected to belong to.
    pub(crate) slice_profiles: Vec<usize>,
    /// Additional validators to merge into the set (slices and
    /// `type.profile` candidates).
    pub(crate) extra_validators: BTreeMap<Pet, ProfileValidator<'a>>,
}

/// Validates one element against one profile position.
#[derive(Debug)]
pub(crate) struct ProfileValidator<'a> {
    repo: &'a FhirStructureRepository,
    data: SharedData,
    parent_data: Vec<SharedData>,
    def_ptr: Pet,
    slice_name: String,
    solver: ProfileSolver,
}

impl<'a> ProfileValidator<'a> {
    pub(crate) fn new(repo: &'a FhirStructureRepository, def_ptr: Pet) -> Self {
        Self::with_parents(repo, def_ptr, def_ptr, Vec::new(), String::new())
    }

    pub(crate) fn with_parents(
        repo: &'a FhirStructureRepository,
        map_key: Pet,
        def_ptr: Pet,
        parent_data: Vec<SharedData>,
        slice_name: String,
    ) -> Self {
        Self {
            repo,
            data: ValidationData::new(map_key),
            parent_data,
            def_ptr,
            slice_name,
            solver: ProfileSolver::default(),
        }
    }

    pub(crate) fn def_ptr(&self) -> Pet {
        self.def_ptr
    }

    pub(crate) fn key(&self) -> Pet {
        self.data.borrow().map_key()
    }

    pub(crate) fn data(&self) -> SharedData {
        self.data.clone()
    }

    pub(crate) fn parent_keys(&self) -> Vec<Pet> {
        self.parent_data
            .iter()
            .map(|data| data.borrow().map_key())
            .collect()
    }

    pub(crate) fn counter_key(&self) -> CounterKey {
        CounterKey {
            name: self.repo.element(self.def_ptr).field_name.clone(),
            slice: self.slice_name.clone(),
        }
    }

    pub(crate) fn slice_name(&self) -> &str {
        &self.slice_name
    }

    pub(crate) fn typecast(&mut self, target_profile: usize) {
        self.def_ptr = Pet::root(target_profile);
    }

    pub(crate) fn merge(&mut self, mut other: ProfileValidator<'a>) {
        debug_assert_eq!(
            self.def_ptr.profile, other.def_ptr.profile,
            "cannot merge validators for different profiles"
        );
        debug_assert_eq!(
            self.slice_name, other.slice_name,
            "cannot merge validators for different slices"
        );
        for data in other.parent_data.drain(..) {
            if !self
                .parent_data
                .iter()
                .any(|existing| Rc::ptr_eq(existing, &data))
            {
                self.parent_data.push(data);
            }
        }
        self.solver.merge(&mut other.solver);
        if !Rc::ptr_eq(&self.data, &other.data) {
            let other_data = other.data.borrow();
            self.data.borrow_mut().merge(&other_data);
        }
    }

    pub(crate) fn append_results(&mut self, results: ValidationResults) {
        self.data.borrow_mut().append(results);
    }

    pub(crate) fn notify_failed(&mut self, key: Pet) {
        if self.solver.fail(key) {
            self.data.borrow_mut().fail();
        }
    }

    pub(crate) fn failed(&self) -> bool {
        self.data.borrow().is_failed() || self.solver.failed()
    }

    pub(crate) fn results(&self) -> ValidationResults {
        self.data.borrow().results()
    }

    /// Fold solver results in and deliver everything to the parents.
    pub(crate) fn finalize(&mut self) {
        let solver_results = self.solver.collect_results();
        self.data.borrow_mut().append(solver_results);
        for parent in &self.parent_data {
            if Rc::ptr_eq(parent, &self.data) {
                continue;
            }
            let own = self.data.borrow();
            parent.borrow_mut().merge(&own);
        }
    }

    fn profile_key(&self) -> Option<String> {
        Some(self.repo.profile(self.def_ptr).key())
    }

    // -- per-node checks -----------------------------------------------

    /// Run all checks of this profile position on the element and detect
    /// slice membership.
    pub(crate) fn process(
        &mut self,
        element: &Element<'a>,
        element_full_path: &str,
    ) -> ProcessingResult<'a> {
        self.check_constraints(element, element_full_path);
        self.check_binding(element, element_full_path);
        self.check_value(element, element_full_path);
        self.check_primitive(element, element_full_path);

        let definition = self.repo.element(self.def_ptr);
        let Some(slicing) = &definition.slicing else {
            return ProcessingResult::default();
        };
        let mut result = ProcessingResult::default();
        for slice in &slicing.slices {
            if !element.test_slice_condition(&slice.condition) {
                continue;
            }
            result.slice_profiles.push(slice.profile);
            let slice_root = Pet::root(slice.profile);
            let mut slice_validator = ProfileValidator::with_parents(
                self.repo,
                slice_root,
                slice_root,
                self.parent_data.clone(),
                slice.name.clone(),
            );
            let nested = slice_validator.process(element, element_full_path);
            debug_assert!(
                nested.slice_profiles.is_empty(),
                "slice root cannot be sliced again"
            );
            for (key, validator) in nested.extra_validators {
                result.extra_validators.insert(key, validator);
            }
            slice_validator.data.borrow_mut().add(
                Severity::Debug,
                format!("detected slice: {}", slice.name),
                element_full_path.to_string(),
                slice_validator.profile_key(),
            );
            let slice_profiles = self.repo.element(slice_root).profiles.clone();
            if !slice_profiles.is_empty() {
                let mut candidates = BTreeMap::new();
                for url in &slice_profiles {
                    match self.repo.find_definition_by_url(url, None) {
                        Some(profile) => {
                            let pet = Pet::root(profile);
                            let validator = ProfileValidator::new(self.repo, pet);
                            candidates.insert(pet, validator.data());
                            result.extra_validators.insert(pet, validator);
                        }
                        None => slice_validator.data.borrow_mut().add(
                            Severity::Error,
                            format!("failed to resolve profile: {url}"),
                            element_full_path.to_string(),
                            slice_validator.profile_key(),
                        ),
                    }
                }
                if !candidates.is_empty() {
                    slice_validator.solver.require_one(candidates);
                }
            }
            result
                .extra_validators
                .insert(slice_validator.key(), slice_validator);
        }
        result
    }

    /// Validators for a named sub-field of this position.
    ///
    /// The map may contain independent validators for `type.profile`
    /// candidates; the sub-field validator then requires one of them to
    /// succeed.
    pub(crate) fn sub_field_validators(
        &mut self,
        name: &str,
    ) -> BTreeMap<Pet, ProfileValidator<'a>> {
        let mut result = BTreeMap::new();
        let Some(sub) = self.repo.sub_field(self.def_ptr, name) else {
            let definition = self.repo.element(self.def_ptr);
            if !definition.is_backbone() {
                tracing::trace!(
                    profile = %self.repo.profile(self.def_ptr).key(),
                    element = %definition.name,
                    field = name,
                    "abandoning profile for unknown field"
                );
                return result;
            }
            // a backbone that does not know the field forbids it
            if let Some(base) = self.base_sub_field(name) {
                let forbidden = Pet {
                    forbidden: true,
                    ..base
                };
                let key = self.def_ptr;
                let validator = ProfileValidator::with_parents(
                    self.repo,
                    key,
                    forbidden,
                    vec![self.data.clone()],
                    self.slice_name.clone(),
                );
                result.insert(key, validator);
            }
            return result;
        };

        let mut profile_candidates: BTreeMap<Pet, SharedData> = BTreeMap::new();
        for url in &self.repo.element(sub).profiles {
            let Some(profile) = self.repo.find_definition_by_url(url, None) else {
                self.data.borrow_mut().add(
                    Severity::Error,
                    format!("failed to resolve profile: {url}"),
                    String::new(),
                    self.profile_key(),
                );
                continue;
            };
            let pet = Pet::root(profile);
            let validator = ProfileValidator::new(self.repo, pet);
            profile_candidates.insert(pet, validator.data());
            result.insert(pet, validator);
        }
        for def_ptr in self.repo.sub_definitions(self.def_ptr, name) {
            let mut validator = ProfileValidator::with_parents(
                self.repo,
                def_ptr,
                def_ptr,
                vec![self.data.clone()],
                String::new(),
            );
            if !profile_candidates.is_empty() {
                validator.solver.require_one(profile_candidates.clone());
            }
            result.insert(def_ptr, validator);
        }
        result
    }

    /// Resolve a field under the element's base type chain, for the
    /// forbidden-field bookkeeping of backbones.
    fn base_sub_field(&self, name: &str) -> Option<Pet> {
        let type_id = &self.repo.element(self.def_ptr).type_id;
        let base = self.repo.find_type_by_id(type_id)?;
        self.repo.sub_field(Pet::root(base), name)
    }

    fn check_constraints(&mut self, element: &Element<'a>, element_full_path: &str) {
        let constraints = self.repo.element(self.def_ptr).constraints.clone();
        for constraint in &constraints {
            let evaluated = path::evaluate(&constraint.parsed, *element);
            if path::singleton_bool(&evaluated) == Some(false) {
                tracing::trace!(
                    path = element_full_path,
                    key = %constraint.key,
                    expression = %constraint.expression,
                    "constraint violated"
                );
                self.data.borrow_mut().add_constraint(
                    constraint.severity,
                    constraint.key.clone(),
                    constraint.human.clone(),
                    element_full_path.to_string(),
                    self.profile_key(),
                );
            }
        }
    }

    fn check_value(&mut self, element: &Element<'a>, element_full_path: &str) {
        let definition = self.repo.element(self.def_ptr);
        if let Some(fixed) = &definition.fixed {
            let fixed_element = Element::from_literal(self.repo, self.def_ptr, fixed);
            if !element.equals(&fixed_element) {
                self.data.borrow_mut().add(
                    Severity::Error,
                    format!(
                        "value must match fixed value: {fixed} (but is {})",
                        element.json()
                    ),
                    element_full_path.to_string(),
                    self.profile_key(),
                );
            }
        }
        if let Some(pattern) = &definition.pattern {
            let pattern_element = Element::from_literal(self.repo, self.def_ptr, pattern);
            if !element.matches(&pattern_element) {
                self.data.borrow_mut().add(
                    Severity::Error,
                    format!(
                        "value must match pattern value: {pattern} (but is {})",
                        element.json()
                    ),
                    element_full_path.to_string(),
                    self.profile_key(),
                );
            }
        }
    }

    /// Lexical checks of primitive values: date/time types must parse
    /// and denote existing civil instants; strings must not be empty.
    fn check_primitive(&mut self, element: &Element<'a>, element_full_path: &str) {
        if !element.has_value() {
            return;
        }
        let kind = self.repo.element(self.def_ptr).type_id.as_str();
        let parse_problem: Option<String> = match crate::model::classify_type(kind) {
            ElementKind::Date => element.as_date().err().map(|e| e.to_string()),
            ElementKind::DateTime => element.as_date_time().err().map(|e| e.to_string()),
            ElementKind::Time => element.as_time().err().map(|e| e.to_string()),
            ElementKind::String => match element.as_string() {
                Some(text) if text.is_empty() => Some("value must not be empty".to_string()),
                _ => None,
            },
            ElementKind::Integer => match element.as_int() {
                None => Some(format!("not an integer value: {}", element.json())),
                Some(_) => None,
            },
            ElementKind::Decimal => match element.as_decimal() {
                None => Some(format!("not a decimal value: {}", element.json())),
                Some(_) => None,
            },
            ElementKind::Boolean => match element.as_boolean() {
                None => Some(format!("not a boolean value: {}", element.json())),
                Some(_) => None,
            },
            _ => None,
        };
        if let Some(problem) = parse_problem {
            self.data.borrow_mut().add(
                Severity::Error,
                problem,
                element_full_path.to_string(),
                self.profile_key(),
            );
        }
    }

    fn check_binding(&mut self, element: &Element<'a>, element_full_path: &str) {
        let definition = self.repo.element(self.def_ptr);
        let Some(binding) = definition.binding.clone() else {
            return;
        };
        if matches!(
            binding.strength,
            BindingStrength::Example | BindingStrength::Preferred
        ) {
            return;
        }
        let Some(value_set) = self
            .repo
            .find_value_set(&binding.value_set_url, binding.value_set_version.as_deref())
        else {
            self.data.borrow_mut().add(
                Severity::Warning,
                format!("Unresolved ValueSet binding: {}", binding.value_set_url),
                element_full_path.to_string(),
                self.profile_key(),
            );
            return;
        };
        let expansion = value_set.expansion(self.repo);
        if !expansion.warnings.is_empty() {
            self.data.borrow_mut().add(
                Severity::Warning,
                expansion.warnings.join("; "),
                element_full_path.to_string(),
                self.profile_key(),
            );
        }
        if !expansion.can_validate {
            self.data.borrow_mut().add(
                Severity::Warning,
                "Cannot validate ValueSet binding".to_string(),
                element_full_path.to_string(),
                self.profile_key(),
            );
            return;
        }
        self.validate_binding(element, &binding, value_set, element_full_path);
    }

    fn validate_binding(
        &mut self,
        element: &Element<'a>,
        binding: &Binding,
        value_set: &ValueSet,
        element_full_path: &str,
    ) {
        let severity = if binding.strength == BindingStrength::Required {
            Severity::Error
        } else {
            Severity::Debug
        };
        match element.kind() {
            ElementKind::Structured => {
                let type_id = self.repo.element(self.def_ptr).type_id.clone();
                match type_id.as_str() {
                    "CodeableConcept" => {
                        for coding in element.sub_elements("coding") {
                            self.check_coding_binding(
                                &coding,
                                value_set,
                                element_full_path,
                                severity,
                            );
                        }
                    }
                    "Coding" => {
                        self.check_coding_binding(element, value_set, element_full_path, severity)
                    }
                    other => self.data.borrow_mut().add(
                        Severity::Error,
                        format!("Unsupported Structured type for Binding: {other}"),
                        element_full_path.to_string(),
                        self.profile_key(),
                    ),
                }
            }
            _ => {
                let code = element.as_string().unwrap_or_default();
                if !value_set.contains_code(self.repo, &code) {
                    self.data.borrow_mut().add(
                        severity,
                        format!(
                            "Value {code} not allowed for ValueSet binding, allowed are {}",
                            value_set.codes_to_string(self.repo)
                        ),
                        element_full_path.to_string(),
                        self.profile_key(),
                    );
                }
            }
        }
    }

    fn check_coding_binding(
        &mut self,
        coding: &Element<'a>,
        value_set: &ValueSet,
        element_full_path: &str,
        severity: Severity,
    ) {
        let systems = coding.sub_elements("system");
        let codes = coding.sub_elements("code");
        if systems.len() == 1 && codes.len() == 1 {
            let system = systems[0].as_string().unwrap_or_default();
            let code = codes[0].as_string().unwrap_or_default();
            if !value_set.contains(self.repo, &system, &code) {
                self.data.borrow_mut().add(
                    severity,
                    format!(
                        "Code {code} with system {system} not allowed for ValueSet binding, \
                         allowed are {}",
                        value_set.codes_to_string(self.repo)
                    ),
                    element_full_path.to_string(),
                    self.profile_key(),
                );
            }
        } else {
            self.data.borrow_mut().add(
                severity,
                "Expected exactly one system and one code sub-element".to_string(),
                element_full_path.to_string(),
                self.profile_key(),
            );
        }
    }
}

/// `(url|version@element)` rendering of a validator key, for logs.
pub(crate) fn map_key_to_string(repo: &FhirStructureRepository, key: Pet) -> String {
    format!(
        "({}@{})",
        repo.profile(key).key(),
        repo.element(key).original_name
    )
}
