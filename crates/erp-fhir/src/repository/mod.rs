//! The immutable profile repository.
//!
//! [`FhirStructureRepository`] owns every loaded StructureDefinition,
//! CodeSystem, and ValueSet. Profiles and their elements are addressed by
//! plain indices ([`Pet`] — profiled element type info), so validator
//! state stays `Copy` and the repository can be shared read-only between
//! workers without any synchronization.

mod loader;
mod terminology;

pub use loader::{load, ViewSpec};
pub use terminology::{CodeSystem, Expansion, ValueSet};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

use crate::path::Expression;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fatal problems while building the repository; the service must not
/// start with a partially loaded profile set.
#[derive(Debug, thiserror::Error)]
pub enum ProfileLoadError {
    /// A source document could not be parsed.
    #[error("cannot parse profile source: {0}")]
    Parse(String),
    /// Two sources define the same `(url, version)` pair.
    #[error("duplicate definition: {url}|{version}")]
    DuplicateDefinition {
        /// Canonical URL.
        url: String,
        /// Version of the duplicate.
        version: String,
    },
    /// Two elements within one profile share a path.
    #[error("duplicate element path in {url}: {path}")]
    DuplicateElementPath {
        /// Profile URL.
        url: String,
        /// Offending element path.
        path: String,
    },
    /// A baseDefinition chain never reaches a root.
    #[error("cycle in baseDefinition chain at {url}")]
    BaseCycle {
        /// Profile URL on the cycle.
        url: String,
    },
    /// A referenced definition is missing.
    #[error("unresolved reference from {referrer}: {target}")]
    Unresolved {
        /// The referring profile.
        referrer: String,
        /// The missing URL.
        target: String,
    },
    /// A constraint expression failed to parse.
    #[error("constraint {key} of {url} does not parse: {reason}")]
    ConstraintParse {
        /// Constraint key.
        key: String,
        /// Profile URL.
        url: String,
        /// Parser message.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Structure definition model
// ---------------------------------------------------------------------------

/// Kind of a StructureDefinition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// `primitive-type`
    PrimitiveType,
    /// `complex-type`
    ComplexType,
    /// `resource`
    Resource,
    /// `logical`
    Logical,
    /// Synthesized profile representing one slice of a sliced element.
    Slice,
}

/// Derivation of a StructureDefinition from its base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Derivation {
    /// Defines a new type.
    Specialization,
    /// Constrains an existing type.
    Constraint,
    /// Base definition without a derivation.
    Basetype,
}

/// Cardinality bounds of an element; `max == None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cardinality {
    /// Minimum number of occurrences.
    pub min: u32,
    /// Maximum number of occurrences, `None` for `*`.
    pub max: Option<u32>,
}

impl Cardinality {
    /// Whether this cardinality can reject anything for the given shape.
    pub fn is_constraint(&self, is_array: bool) -> bool {
        if is_array {
            self.min > 0 || self.max.is_some()
        } else {
            self.min > 0 || self.max == Some(0)
        }
    }

    /// Check a count against the bounds, producing findings on violation.
    pub fn check(
        &self,
        count: usize,
        element_full_path: &str,
        profile: Option<&str>,
    ) -> crate::validator::ValidationResults {
        let mut results = crate::validator::ValidationResults::new();
        if (count as u64) < u64::from(self.min) {
            results.add(
                crate::validator::Severity::Error,
                format!("missing mandatory element (cardinality {})", self),
                element_full_path.to_string(),
                profile.map(str::to_string),
            );
        }
        if let Some(max) = self.max {
            if count as u64 > u64::from(max) {
                results.add(
                    crate::validator::Severity::Error,
                    format!("too many occurrences: {count} (cardinality {})", self),
                    element_full_path.to_string(),
                    profile.map(str::to_string),
                );
            }
        }
        results
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "{}..{}", self.min, max),
            None => write!(f, "{}..*", self.min),
        }
    }
}

/// Strength of a terminology binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingStrength {
    /// Must come from the value set.
    Required,
    /// Should come from the value set; other codes are tolerated.
    Extensible,
    /// Preferred but not checked.
    Preferred,
    /// Documentation only; never checked.
    Example,
}

/// A terminology binding on an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Binding strength.
    pub strength: BindingStrength,
    /// Canonical URL of the bound value set.
    pub value_set_url: String,
    /// Version pinned in the canonical, when present.
    pub value_set_version: Option<String>,
}

/// A single constraint from `ElementDefinition.constraint`.
#[derive(Debug, Clone)]
pub struct Constraint {
    /// Constraint key, e.g. `dom-6`.
    pub key: String,
    /// Severity the constraint reports with.
    pub severity: crate::validator::Severity,
    /// Human-readable description.
    pub human: String,
    /// FHIRPath source text.
    pub expression: String,
    /// Expression compiled at load time.
    pub parsed: Expression,
}

/// Discriminator kinds of a slicing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscriminatorType {
    /// Match on a fixed or bound value.
    Value,
    /// Match on a pattern value.
    Pattern,
    /// Match on presence or absence.
    Exists,
    /// Match on the type of the element.
    Type,
    /// Match on a declared profile (not evaluated; never matches).
    Profile,
}

/// A slicing discriminator: type plus a dotted path relative to the
/// sliced element (`$this` for the element itself).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discriminator {
    /// How the discriminating value is compared.
    pub kind: DiscriminatorType,
    /// Path evaluated against each candidate element.
    pub path: String,
}

/// Rules applied to elements matching no slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlicingRules {
    /// Additional content is allowed anywhere.
    Open,
    /// No additional content is allowed.
    Closed,
    /// Additional content only after the defined slices.
    OpenAtEnd,
    /// Additional content is allowed but reported.
    ReportOther,
}

/// One check of a slice's discriminator condition: a path relative to the
/// sliced element plus the comparison applied there.
#[derive(Debug, Clone)]
pub enum SliceCheck {
    /// Every element at the path must equal the value.
    Equals(JsonValue),
    /// Every element at the path must match the pattern.
    Matches(JsonValue),
    /// Elements at the path must (or must not) exist.
    Exists(bool),
    /// The element's type must equal the given type id.
    IsType(String),
}

/// The compiled discriminator condition of one slice; all checks must
/// hold. A slice with no derivable checks never matches.
#[derive(Debug, Clone, Default)]
pub struct SliceCondition {
    /// `(path segments, check)` pairs; an empty path means `$this`.
    pub checks: Vec<(Vec<String>, SliceCheck)>,
}

/// One named slice; its constraints live in a synthesized profile.
#[derive(Debug, Clone)]
pub struct Slice {
    /// Slice name.
    pub name: String,
    /// Index of the synthesized per-slice StructureDefinition.
    pub profile: usize,
    /// Discriminator condition compiled at load time.
    pub condition: SliceCondition,
}

/// Slicing descriptor of a repeating element.
#[derive(Debug, Clone)]
pub struct Slicing {
    /// Whether slice order is significant.
    pub ordered: bool,
    /// Rule for unmatched elements.
    pub rules: SlicingRules,
    /// Discriminators, in declaration order.
    pub discriminators: Vec<Discriminator>,
    /// Slices, in declaration order.
    pub slices: Vec<Slice>,
}

/// One element definition within a StructureDefinition.
#[derive(Debug, Clone)]
pub struct FhirElement {
    /// Dotted path within the profile, e.g. `Bundle.entry.resource`.
    pub name: String,
    /// Original path including slice suffixes, for messages.
    pub original_name: String,
    /// Last path segment; `value[x]` keeps the `[x]` marker.
    pub field_name: String,
    /// Declared type code, e.g. `Quantity`; empty for the root of
    /// primitives' value.
    pub type_id: String,
    /// `contentReference` target (leading `#` stripped), when present.
    pub content_reference: Option<String>,
    /// Cardinality bounds.
    pub cardinality: Cardinality,
    /// Whether the base definition allows repetition.
    pub is_array: bool,
    /// Profiles from `type.profile` — "require one" semantics.
    pub profiles: Vec<String>,
    /// Allowed `targetProfile` URLs on Reference elements.
    pub reference_target_profiles: Vec<String>,
    /// Fixed value, when declared.
    pub fixed: Option<JsonValue>,
    /// Pattern value, when declared.
    pub pattern: Option<JsonValue>,
    /// Terminology binding, when declared.
    pub binding: Option<Binding>,
    /// Constraints with compiled expressions.
    pub constraints: Vec<Constraint>,
    /// Slicing descriptor, when this element is sliced.
    pub slicing: Option<Slicing>,
    /// Name of the slice this element heads, when synthesized.
    pub slice_name: Option<String>,
}

impl FhirElement {
    /// Whether the element is a backbone (inline) structure.
    pub fn is_backbone(&self) -> bool {
        self.type_id == "BackboneElement" || self.type_id == "Element"
    }

    /// Whether the element defines slices.
    pub fn has_slices(&self) -> bool {
        self.slicing
            .as_ref()
            .map(|s| !s.slices.is_empty())
            .unwrap_or(false)
    }
}

/// One StructureDefinition, identified by `(url, version)`.
#[derive(Debug, Clone)]
pub struct StructureDefinition {
    /// Canonical URL.
    pub url: String,
    /// Version.
    pub version: String,
    /// Name (for slices: the slice name).
    pub name: String,
    /// The type this definition describes, e.g. `Bundle`.
    pub type_id: String,
    /// Kind of the definition.
    pub kind: Kind,
    /// Derivation from the base.
    pub derivation: Derivation,
    /// Canonical URL of the base definition.
    pub base_definition: Option<String>,
    /// Ordered element definitions; index 0 is the root.
    pub elements: Vec<FhirElement>,
}

impl StructureDefinition {
    /// `url|version` as used in messages.
    pub fn key(&self) -> String {
        format!("{}|{}", self.url, self.version)
    }

    /// Find an element by its dotted path.
    pub fn find_element(&self, path: &str) -> Option<usize> {
        self.elements.iter().position(|e| e.name == path)
    }
}

// ---------------------------------------------------------------------------
// Pet — profiled element type info
// ---------------------------------------------------------------------------

/// A position inside the repository: *which profile's view* of *which
/// element* applies. `forbidden` marks a synthetic zero-cardinality view
/// used when a profile does not know a sub-field of a backbone element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pet {
    /// Index of the StructureDefinition.
    pub profile: usize,
    /// Index of the element within the profile.
    pub element: usize,
    /// Forces cardinality `0..0` regardless of the element's own bounds.
    pub forbidden: bool,
}

impl Pet {
    /// Pet at the root element of a profile.
    pub fn root(profile: usize) -> Self {
        Self {
            profile,
            element: 0,
            forbidden: false,
        }
    }

    /// Whether this Pet points at a profile root.
    pub fn is_root(&self) -> bool {
        self.element == 0
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// A filter over `(url, version)` pairs, selected per reference timestamp.
#[derive(Debug, Clone)]
pub struct RepositoryView {
    /// View name, for diagnostics.
    pub name: String,
    resolved: BTreeMap<String, usize>,
}

impl RepositoryView {
    /// Resolve a canonical URL to the structure index this view selects.
    pub fn resolve(&self, url: &str) -> Option<usize> {
        self.resolved.get(url).copied()
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// The frozen repository. All access after [`loader`] finishes is
/// read-only.
#[derive(Debug)]
pub struct FhirStructureRepository {
    pub(crate) structures: Vec<StructureDefinition>,
    pub(crate) by_url_version: BTreeMap<(String, String), usize>,
    pub(crate) by_type_id: BTreeMap<String, usize>,
    pub(crate) code_systems: BTreeMap<String, CodeSystem>,
    pub(crate) value_sets: BTreeMap<String, ValueSet>,
    pub(crate) views: Vec<(Option<DateTime<Utc>>, RepositoryView)>,
    pub(crate) default_view: RepositoryView,
}

impl FhirStructureRepository {
    /// The StructureDefinition at `idx`.
    pub fn structure(&self, idx: usize) -> &StructureDefinition {
        &self.structures[idx]
    }

    /// The element a [`Pet`] points at.
    pub fn element(&self, pet: Pet) -> &FhirElement {
        &self.structures[pet.profile].elements[pet.element]
    }

    /// The profile a [`Pet`] points into.
    pub fn profile(&self, pet: Pet) -> &StructureDefinition {
        &self.structures[pet.profile]
    }

    /// Effective cardinality of a [`Pet`], honoring the `forbidden` flag.
    pub fn cardinality(&self, pet: Pet) -> Cardinality {
        if pet.forbidden {
            Cardinality { min: 0, max: Some(0) }
        } else {
            self.element(pet).cardinality
        }
    }

    /// Look up a definition by URL under the default view, or with an
    /// explicit version.
    pub fn find_definition_by_url(&self, url: &str, version: Option<&str>) -> Option<usize> {
        match version {
            Some(v) => self
                .by_url_version
                .get(&(url.to_string(), v.to_string()))
                .copied(),
            None => self.default_view.resolve(url),
        }
    }

    /// Look up a type definition (`kind` resource/complex/primitive) by
    /// its type id, e.g. `Bundle`.
    pub fn find_type_by_id(&self, type_id: &str) -> Option<usize> {
        self.by_type_id.get(type_id).copied()
    }

    /// The default view: latest version per URL.
    pub fn default_view(&self) -> &RepositoryView {
        &self.default_view
    }

    /// The view applicable at the given reference time. When several view
    /// windows cover the instant, the latest window start wins; views
    /// sharing a start fall to the lexically greatest view name (the
    /// version tag of the profile bundle).
    pub fn view_for(&self, reference: DateTime<Utc>) -> &RepositoryView {
        self.views
            .iter()
            .filter(|(start, _)| start.map(|s| s <= reference).unwrap_or(true))
            .max_by(|(start_a, view_a), (start_b, view_b)| {
                start_a
                    .cmp(start_b)
                    .then_with(|| view_a.name.cmp(&view_b.name))
            })
            .map(|(_, view)| view)
            .unwrap_or(&self.default_view)
    }

    /// A value set by canonical URL.
    pub fn find_value_set(&self, url: &str, version: Option<&str>) -> Option<&ValueSet> {
        let value_set = self.value_sets.get(url)?;
        if let Some(v) = version {
            if value_set.version.as_deref() != Some(v) {
                return None;
            }
        }
        Some(value_set)
    }

    /// A code system by canonical URL.
    pub fn find_code_system(&self, url: &str) -> Option<&CodeSystem> {
        self.code_systems.get(url)
    }

    /// Whether `child` is (transitively) derived from the definition with
    /// the given canonical URL. A definition counts as derived from
    /// itself.
    pub fn is_derived_from(&self, child: usize, ancestor_url: &str) -> bool {
        let mut current = Some(child);
        while let Some(idx) = current {
            let sd = &self.structures[idx];
            if sd.url == ancestor_url {
                return true;
            }
            current = sd
                .base_definition
                .as_deref()
                .and_then(|base| self.default_view.resolve(base));
        }
        false
    }

    /// Resolve a `contentReference` of the form `#Type.path` against the
    /// base type definitions.
    pub fn resolve_base_content_reference(&self, reference: &str) -> Option<Pet> {
        let stripped = reference.strip_prefix('#')?;
        let type_id = stripped.split('.').next()?;
        let profile = self.find_type_by_id(type_id)?;
        let element = self.structures[profile].find_element(stripped)?;
        Some(Pet {
            profile,
            element,
            forbidden: false,
        })
    }

    // -- Pet navigation ------------------------------------------------

    /// Resolve the profile's own definition of a named sub-field,
    /// following contentReference and type hops.
    pub fn sub_field(&self, pet: Pet, name: &str) -> Option<Pet> {
        let base = self.navigation_base(pet)?;
        self.find_child(base, name).map(|(pet, _)| pet)
    }

    /// All profile views applying to a named sub-field: the in-profile
    /// definition plus the root of its type's own definition. For choice
    /// fields (`value[x]`) the type resolved from the field name wins.
    pub fn sub_definitions(&self, pet: Pet, name: &str) -> Vec<Pet> {
        let mut result = Vec::new();
        let Some(base) = self.navigation_base(pet) else {
            return result;
        };
        let Some((child, choice_type)) = self.find_child(base, name) else {
            return result;
        };
        result.push(child);
        let type_id = choice_type.unwrap_or_else(|| self.element(child).type_id.clone());
        if !type_id.is_empty() && !type_id.contains(',') {
            if let Some(type_profile) = self.find_type_by_id(&type_id) {
                let type_root = Pet::root(type_profile);
                if type_root != child && !self.has_children(child) {
                    result.push(type_root);
                }
            }
        }
        result
    }

    /// Direct sub-element definitions of a Pet, in definition order.
    pub fn sub_elements(&self, pet: Pet) -> Vec<Pet> {
        let Some(base) = self.navigation_base(pet) else {
            return Vec::new();
        };
        let sd = &self.structures[base.profile];
        let parent_path = &sd.elements[base.element].name;
        let prefix = format!("{parent_path}.");
        let mut children = Vec::new();
        for (idx, element) in sd.elements.iter().enumerate() {
            if let Some(rest) = element.name.strip_prefix(prefix.as_str()) {
                if !rest.contains('.') && element.slice_name.is_none() {
                    children.push(Pet {
                        profile: base.profile,
                        element: idx,
                        forbidden: false,
                    });
                }
            }
        }
        children
    }

    /// Where navigation below `pet` actually happens: the element itself
    /// when it has in-profile children, its contentReference target, or
    /// the root of its type's definition.
    fn navigation_base(&self, pet: Pet) -> Option<Pet> {
        let element = self.element(pet);
        if self.has_children(pet) {
            return Some(pet);
        }
        if let Some(reference) = &element.content_reference {
            let target = self.structures[pet.profile].find_element(reference)?;
            return Some(Pet {
                profile: pet.profile,
                element: target,
                forbidden: false,
            });
        }
        if !element.type_id.is_empty() {
            if let Some(type_profile) = self.find_type_by_id(&element.type_id) {
                let root = Pet::root(type_profile);
                if root != pet {
                    return Some(root);
                }
            }
        }
        Some(pet)
    }

    fn has_children(&self, pet: Pet) -> bool {
        let sd = &self.structures[pet.profile];
        let prefix = format!("{}.", sd.elements[pet.element].name);
        sd.elements.iter().any(|e| e.name.starts_with(&prefix))
    }

    /// Find a child element by JSON field name. The second tuple slot is
    /// the concrete type resolved from a choice field name.
    fn find_child(&self, base: Pet, name: &str) -> Option<(Pet, Option<String>)> {
        let sd = &self.structures[base.profile];
        let parent_path = &sd.elements[base.element].name;
        let wanted = format!("{parent_path}.{name}");
        if let Some(idx) = sd
            .elements
            .iter()
            .position(|e| e.name == wanted && e.slice_name.is_none())
        {
            return Some((
                Pet {
                    profile: base.profile,
                    element: idx,
                    forbidden: false,
                },
                None,
            ));
        }
        // choice elements: valueQuantity matches value[x] when Quantity is
        // among the declared types
        let choice_path = format!("{parent_path}.");
        for (idx, element) in sd.elements.iter().enumerate() {
            if element.slice_name.is_some() || !element.field_name.ends_with("[x]") {
                continue;
            }
            let Some(rest) = element.name.strip_prefix(choice_path.as_str()) else {
                continue;
            };
            if rest.contains('.') {
                continue;
            }
            let stem = &element.field_name[..element.field_name.len() - 3];
            if let Some(type_part) = name.strip_prefix(stem) {
                if !type_part.is_empty() && type_part.chars().next().is_some_and(char::is_uppercase)
                {
                    if let Some(resolved) = resolve_choice_type(&element.type_id, type_part) {
                        return Some((
                            Pet {
                                profile: base.profile,
                                element: idx,
                                forbidden: false,
                            },
                            Some(resolved),
                        ));
                    }
                }
            }
        }
        None
    }
}

/// A choice field suffix matches a declared type when they are equal
/// ignoring the case of the first letter (`valueDate` → `date`). Returns
/// the declared type code on match.
fn resolve_choice_type(declared: &str, suffix: &str) -> Option<String> {
    declared.split(',').map(str::trim).find_map(|candidate| {
        let first = candidate.chars().next()?;
        let matches = candidate == suffix
            || (first.to_ascii_uppercase() == suffix.chars().next()?
                && candidate.len() == suffix.len()
                && candidate[1..] == suffix[1..]);
        matches.then(|| candidate.to_string())
    })
}
