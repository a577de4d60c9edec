//! The profile validator.
//!
//! [`FhirPathValidator`] drives a depth-first walk over an
//! [`Element`](crate::model::Element) tree. At every node a
//! [`ProfileSetValidator`](profile_set::ProfileSetValidator) tracks all
//! profiles that apply simultaneously; findings accumulate in a
//! [`ValidationResults`] whose highest severity decides pass or fail.
//! Reference integrity of bundles and contained resources runs as a
//! second pass after the structural walk.

mod profile_set;
mod profile_validator;
mod reference;
mod slicing;

pub use reference::{AnchorType, ReferenceContext, ReferenceFinder, ReferenceInfo, ResourceInfo};

use std::collections::BTreeSet;
use std::fmt;

use crate::model::Element;
use crate::repository::{FhirStructureRepository, Pet};
use profile_set::ProfileSetValidator;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Severity of a finding; the order is part of the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Diagnostic trace, never surfaced.
    Debug = 0,
    /// Informational finding.
    Info = 1,
    /// A problem that does not reject the document.
    Warning = 2,
    /// An element not claimed by any slice under `reportOther` slicing.
    UnslicedWarning = 3,
    /// The document is rejected.
    Error = 4,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::UnslicedWarning => "unslicedWarning",
            Self::Error => "error",
        };
        f.write_str(text)
    }
}

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

/// One finding of a validation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Severity of the finding.
    pub severity: Severity,
    /// Constraint key when the finding stems from a constraint.
    pub key: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// Full path of the element the finding is anchored at.
    pub element_full_path: String,
    /// `url|version` of the originating profile, when known.
    pub profile: Option<String>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.element_full_path.is_empty() {
            write!(f, "{}: ", self.element_full_path)?;
        }
        write!(f, "{}: ", self.severity)?;
        if let Some(key) = &self.key {
            write!(f, "{key}: ")?;
        }
        f.write_str(&self.message)
    }
}

/// The ordered log of findings of one validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResults {
    results: Vec<ValidationError>,
}

impl ValidationResults {
    /// An empty result list.
    pub fn new() -> Self {
        Self::default()
    }

    /// All findings, in the order they were produced.
    pub fn results(&self) -> &[ValidationError] {
        &self.results
    }

    /// Append a plain finding.
    pub fn add(
        &mut self,
        severity: Severity,
        message: String,
        element_full_path: String,
        profile: Option<String>,
    ) {
        self.results.push(ValidationError {
            severity,
            key: None,
            message,
            element_full_path,
            profile,
        });
    }

    /// Append a constraint finding.
    pub fn add_constraint(
        &mut self,
        severity: Severity,
        key: String,
        human: String,
        element_full_path: String,
        profile: Option<String>,
    ) {
        self.results.push(ValidationError {
            severity,
            key: Some(key),
            message: human,
            element_full_path,
            profile,
        });
    }

    /// Append all findings of another list.
    pub fn append(&mut self, other: ValidationResults) {
        self.results.extend(other.results);
    }

    /// Merge another list, skipping findings already present. Data that
    /// bubbles up through several profile validators must not be
    /// reported twice.
    pub fn merge(&mut self, other: &ValidationResults) {
        for finding in &other.results {
            if !self.results.contains(finding) {
                self.results.push(finding.clone());
            }
        }
    }

    /// The highest severity present; `Debug` when empty.
    pub fn highest_severity(&self) -> Severity {
        self.results
            .iter()
            .map(|r| r.severity)
            .max()
            .unwrap_or(Severity::Debug)
    }

    /// Render all findings at or above `min_severity`, one per `"; "`
    /// separated segment, each suffixed with its originating profile.
    pub fn summary(&self, min_severity: Severity) -> String {
        let mut out = String::new();
        for finding in &self.results {
            if finding.severity < min_severity {
                continue;
            }
            out.push_str(&finding.to_string());
            if let Some(profile) = &finding.profile {
                out.push_str(&format!(" (from profile: {profile})"));
            }
            out.push_str("; ");
        }
        out
    }

    /// Map an error-level outcome to the boundary error the caller
    /// translates to a 400 response; passing runs yield `None`.
    pub fn boundary_error(&self) -> Option<erp_error::ErpError> {
        if self.highest_severity() < Severity::Error {
            return None;
        }
        Some(erp_error::ErpError::new(
            erp_error::ErrorCode::ValidationFailed,
            self.summary(Severity::Error),
        ))
    }

    /// Log every finding through `tracing` at a level matching its
    /// severity.
    pub fn dump_to_log(&self) {
        for finding in &self.results {
            match finding.severity {
                Severity::Debug => tracing::trace!(finding = %finding),
                Severity::Info => tracing::debug!(finding = %finding),
                Severity::Warning | Severity::UnslicedWarning => {
                    tracing::info!(finding = %finding)
                }
                Severity::Error => tracing::warn!(finding = %finding),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configurable severities of the reference checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportLevels {
    /// A bundled resource not reachable from the composition anchor.
    pub unreferenced_bundled_resource: Severity,
    /// A contained resource not referenced by its container.
    pub unreferenced_contained_resource: Severity,
    /// A must-resolve reference without a literal, resolvable target.
    pub mandatory_resolvable_reference_failure: Severity,
}

impl Default for ReportLevels {
    fn default() -> Self {
        Self {
            unreferenced_bundled_resource: Severity::Warning,
            unreferenced_contained_resource: Severity::Warning,
            mandatory_resolvable_reference_failure: Severity::Error,
        }
    }
}

/// Options of a validation run.
#[derive(Debug, Clone, Default)]
pub struct ValidatorOptions {
    /// Report extensions unknown at their position with
    /// [`Severity::UnslicedWarning`].
    pub report_unknown_extensions: bool,
    /// Accept Composition.author references without a literal target.
    pub allow_non_literal_author_reference: bool,
    /// Skip the reference-integrity pass when `false`.
    pub validate_references: bool,
    /// Severities of the reference checks.
    pub levels: ReportLevels,
}

impl ValidatorOptions {
    /// The options used by the service by default: references are
    /// checked, unknown extensions are not reported.
    pub fn standard() -> Self {
        Self {
            report_unknown_extensions: false,
            allow_non_literal_author_reference: false,
            validate_references: true,
            levels: ReportLevels::default(),
        }
    }

    /// Derive options from the deployed configuration keys.
    pub fn from_core(config: &erp_config::CoreConfig) -> Self {
        Self {
            report_unknown_extensions: config.report_unknown_extensions
                != erp_config::ReportUnknownExtensions::Off,
            allow_non_literal_author_reference: config.allowed_non_literal_author_reference,
            validate_references: true,
            levels: ReportLevels::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// FhirPathValidator
// ---------------------------------------------------------------------------

/// Validates an element tree against all applicable profiles.
pub struct FhirPathValidator<'a> {
    repo: &'a FhirStructureRepository,
    options: ValidatorOptions,
    /// Root of the `Extension` type definition, for unknown-extension
    /// reporting.
    extension_root: Option<Pet>,
    /// `#Element.extension` with its generic slicing.
    element_extension: Option<Pet>,
    result: ValidationResults,
}

impl<'a> FhirPathValidator<'a> {
    /// Validate an element against the profiles claimed by the document
    /// (`meta.profile`) and its resource type.
    pub fn validate(
        element: &Element<'a>,
        element_full_path: &str,
        options: ValidatorOptions,
    ) -> ValidationResults {
        let mut validator = Self::create(element.repo(), options);
        validator.validate_internal(element, element_full_path);
        validator.finish(element, element_full_path)
    }

    /// Validate an element against an explicit set of profiles plus the
    /// profiles claimed by the document.
    pub fn validate_with_profiles(
        element: &Element<'a>,
        element_full_path: &str,
        profile_urls: &BTreeSet<String>,
        options: ValidatorOptions,
    ) -> ValidationResults {
        let mut validator = Self::create(element.repo(), options);
        let mut pets = BTreeSet::new();
        for url in profile_urls {
            match element.repo().find_definition_by_url(url, None) {
                Some(profile) => {
                    pets.insert(Pet::root(profile));
                }
                None => validator.result.add(
                    Severity::Error,
                    format!("profile unknown: {url}"),
                    element_full_path.to_string(),
                    None,
                ),
            }
        }
        for pet in validator.profiles_of(element, element_full_path) {
            pets.insert(pet);
        }
        let mut set =
            ProfileSetValidator::new_root(validator.repo, element.pet(), &pets, &validator.options);
        validator.validate_element(element, &mut set, None, element_full_path);
        validator.finish(element, element_full_path)
    }

    fn create(repo: &'a FhirStructureRepository, options: ValidatorOptions) -> Self {
        let extension_root = repo.find_type_by_id("Extension").map(Pet::root);
        let element_extension = repo.resolve_base_content_reference("#Element.extension");
        if options.report_unknown_extensions && (extension_root.is_none()
            || element_extension
                .map(|pet| repo.element(pet).slicing.is_none())
                .unwrap_or(true))
        {
            tracing::warn!(
                "unknown-extension reporting needs the Extension definition and \
                 a sliced Element.extension; reporting stays off"
            );
        }
        Self {
            repo,
            options,
            extension_root,
            element_extension,
            result: ValidationResults::new(),
        }
    }

    pub(crate) fn options(&self) -> &ValidatorOptions {
        &self.options
    }

    pub(crate) fn extension_root(&self) -> Option<Pet> {
        self.extension_root
    }

    pub(crate) fn element_extension(&self) -> Option<Pet> {
        self.element_extension
    }

    fn finish(mut self, element: &Element<'a>, element_full_path: &str) -> ValidationResults {
        if self.options.validate_references {
            let finder_result = ReferenceFinder::find(
                element,
                BTreeSet::new(),
                &self.options,
                element_full_path,
            );
            self.result.append(finder_result);
        }
        self.result
    }

    fn validate_internal(&mut self, element: &Element<'a>, element_full_path: &str) {
        let element_name = self.repo.element(element.pet()).name.clone();
        let mut pets: BTreeSet<Pet> = BTreeSet::new();
        for profile_pet in self.profiles_of(element, element_full_path) {
            let profile = self.repo.structure(profile_pet.profile);
            match profile.find_element(&element_name) {
                Some(idx) => {
                    pets.insert(Pet {
                        profile: profile_pet.profile,
                        element: idx,
                        forbidden: false,
                    });
                }
                None => self.result.add(
                    Severity::Error,
                    format!("{} no such element: {element_name}", profile.key()),
                    element_full_path.to_string(),
                    Some(profile.key()),
                ),
            }
        }
        let mut set =
            ProfileSetValidator::new_root(self.repo, element.pet(), &pets, &self.options);
        self.validate_element(element, &mut set, None, element_full_path);
    }

    /// Recursive walk: per-node checks, sub-element descent, counters
    /// and slice checkers, then finalization and result collection.
    fn validate_element(
        &mut self,
        element: &Element<'a>,
        set: &mut ProfileSetValidator<'a>,
        parent: Option<&mut ProfileSetValidator<'a>>,
        element_full_path: &str,
    ) {
        let effects = set.process(self, element, element_full_path);
        if let Some(parent) = parent {
            parent.apply_child_effects(effects);
        }
        self.validate_all_sub_elements(element, set, element_full_path);
        set.finalize(element_full_path);
        self.result.append(set.results());
    }

    fn validate_all_sub_elements(
        &mut self,
        element: &Element<'a>,
        set: &mut ProfileSetValidator<'a>,
        element_full_path: &str,
    ) {
        let defined = self.repo.sub_elements(set.root_pointer());
        let mut unprocessed: BTreeSet<String> =
            element.sub_element_names().into_iter().collect();
        for def_pet in defined {
            let field_name = self.repo.element(def_pet).field_name.clone();
            let doc_names: Vec<String> = if let Some(stem) = field_name.strip_suffix("[x]") {
                let concrete: Vec<String> = unprocessed
                    .iter()
                    .filter(|n| {
                        n.strip_prefix(stem)
                            .map(|rest| {
                                !rest.is_empty()
                                    && rest.chars().next().is_some_and(char::is_uppercase)
                            })
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect();
                if concrete.is_empty() {
                    vec![field_name.clone()]
                } else {
                    concrete
                }
            } else {
                vec![field_name.clone()]
            };
            for doc_name in doc_names {
                let sub_full_path = format!("{element_full_path}.{doc_name}");
                let exists = unprocessed.remove(&doc_name);
                if !exists {
                    // still needed: counters for absent mandatory fields
                    if let Some(mut sub) = set.sub_field(self, &doc_name) {
                        sub.finalize(&sub_full_path);
                        self.result.append(sub.results());
                    }
                    continue;
                }
                let sub_elements = element.sub_elements(&doc_name);
                self.process_sub_elements(
                    element,
                    &doc_name,
                    &sub_elements,
                    set,
                    &sub_full_path,
                );
            }
        }
        if !unprocessed.is_empty() {
            let names: Vec<&str> = unprocessed.iter().map(String::as_str).collect();
            self.result.add(
                Severity::Error,
                format!("undefined sub element: {}", names.join(", ")),
                element_full_path.to_string(),
                Some(self.repo.profile(element.pet()).key()),
            );
        }
    }

    fn process_sub_elements(
        &mut self,
        element: &Element<'a>,
        sub_name: &str,
        sub_elements: &[Element<'a>],
        set: &mut ProfileSetValidator<'a>,
        sub_full_path_base: &str,
    ) {
        let mut idx = 0usize;
        for sub_element in sub_elements {
            let Some(mut sub_set) = set.sub_field(self, sub_name) else {
                self.result.add(
                    Severity::Error,
                    format!(
                        "{} field resolution failed: {sub_name}",
                        self.repo.profile(set.root_pointer()).key()
                    ),
                    sub_full_path_base.to_string(),
                    None,
                );
                return;
            };
            let is_array = sub_set.is_array(self.repo);
            let mut full_sub_name = sub_full_path_base.to_string();
            if is_array {
                full_sub_name.push_str(&format!("[{idx}]"));
                idx += 1;
            }
            if sub_set.is_resource(self.repo) && sub_element.is_resource() {
                let resource_type = sub_element.resource_type().unwrap_or_default().to_string();
                full_sub_name.push_str(&format!("{{{resource_type}}}"));
                let Some(resource_def) = self.repo.find_type_by_id(&resource_type) else {
                    self.result.add(
                        Severity::Error,
                        format!("resourceType unknown: {resource_type}"),
                        full_sub_name.clone(),
                        None,
                    );
                    continue;
                };
                self.result.add(
                    Severity::Debug,
                    format!("resource is: {resource_type}"),
                    full_sub_name.clone(),
                    Some(self.repo.structure(resource_def).key()),
                );
                sub_set.typecast(self.repo, resource_def);
                let profiles = self.profiles_of(sub_element, &full_sub_name);
                sub_set.add_profiles(self.repo, &profiles);
                self.validate_element(sub_element, &mut sub_set, Some(&mut *set), &full_sub_name);
            } else {
                self.validate_element(sub_element, &mut sub_set, Some(&mut *set), &full_sub_name);
            }
        }
    }

    /// Resolve `meta.profile` entries, reporting unknown URLs.
    fn profiles_of(&mut self, element: &Element<'a>, element_full_path: &str) -> BTreeSet<Pet> {
        let mut pets = BTreeSet::new();
        for url in element.profiles() {
            let (bare_url, version) = match url.split_once('|') {
                Some((u, v)) => (u.to_string(), Some(v.to_string())),
                None => (url.clone(), None),
            };
            match self
                .repo
                .find_definition_by_url(&bare_url, version.as_deref())
            {
                Some(profile) => {
                    pets.insert(Pet::root(profile));
                }
                None => self.result.add(
                    Severity::Error,
                    format!("Unknown profile: {url}"),
                    element_full_path.to_string(),
                    None,
                ),
            }
        }
        pets
    }
}
