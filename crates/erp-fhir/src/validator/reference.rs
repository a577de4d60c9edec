//! Reference integrity of bundles and contained resources.
//!
//! The [`ReferenceFinder`] walks a resource tree and records every
//! resource and outgoing reference in a [`ReferenceContext`]; resources
//! are arena-allocated and addressed by index, so cyclic reference nets
//! need no cyclic data structures. Finalization marks anchors (the
//! composition of a document bundle, containers of contained
//! resources), computes anchor reachability as a monotone fixed point
//! over a bitset, and reports unreferenced or unresolvable targets.

use std::collections::BTreeSet;
use std::fmt;

use crate::model::{Element, Identity};
use crate::repository::{FhirStructureRepository, Kind, Pet};
use crate::validator::{Severity, ValidationResults, ValidatorOptions};

// ---------------------------------------------------------------------------
// AnchorType
// ---------------------------------------------------------------------------

/// Bitset of anchors a resource is (or must be) reachable from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnchorType(u8);

impl AnchorType {
    /// Not anchored.
    pub const NONE: Self = Self(0);
    /// Reachable from a containing DomainResource.
    pub const CONTAINED: Self = Self(0b01);
    /// Reachable from the document composition.
    pub const COMPOSITION: Self = Self(0b10);
    /// Both anchors.
    pub const ALL: Self = Self(0b11);

    /// Set union.
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Set intersection.
    pub fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Complement within the two known anchor bits.
    pub fn complement(self) -> Self {
        Self(!self.0 & Self::ALL.0)
    }

    /// Whether no bit is set.
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Whether all bits of `other` are present.
    pub fn covers(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl fmt::Display for AnchorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match *self {
            Self::NONE => "none",
            Self::CONTAINED => "contained",
            Self::COMPOSITION => "composition",
            _ => "all",
        };
        f.write_str(text)
    }
}

// ---------------------------------------------------------------------------
// Context records
// ---------------------------------------------------------------------------

/// One outgoing reference.
#[derive(Debug)]
pub struct ReferenceInfo {
    /// Identity of the referenced resource, empty for non-literal
    /// references.
    pub identity: Identity,
    /// Path of the reference element in the document.
    pub element_full_path: String,
    /// Dotted path relative to the containing resource, e.g.
    /// `.section.entry`.
    pub local_path: String,
    /// JSON of the referencing element, for messages.
    pub rendering: String,
    /// Allowed target profiles per declaring profile.
    pub target_profile_sets: Vec<(usize, BTreeSet<usize>)>,
    /// Set when the reference sits on a must-resolve composition path.
    pub must_be_resolvable: bool,
}

/// One recorded resource.
#[derive(Debug)]
pub struct ResourceInfo {
    /// Identity other references resolve against.
    pub identity: Identity,
    /// Path of the resource in the document.
    pub element_full_path: String,
    /// Resource type definition index.
    pub type_profile: Option<usize>,
    /// Claimed profiles (resolved), for target-profile checks.
    pub claimed_profiles: BTreeSet<usize>,
    /// Anchors this resource itself provides.
    pub anchor_type: AnchorType,
    /// Anchors this resource must be reachable from.
    pub reference_requirement: AnchorType,
    /// Anchors this resource is reachable from (computed).
    pub referenced_by_anchor: AnchorType,
    /// Outgoing references.
    pub reference_targets: Vec<ReferenceInfo>,
    /// Indices of directly contained resources.
    pub contained: Vec<usize>,
    /// Set for the composition of a document bundle.
    pub is_composition_in_document: bool,
}

/// All resources and references of one validation context.
#[derive(Debug, Default)]
pub struct ReferenceContext {
    resources: Vec<ResourceInfo>,
}

impl ReferenceContext {
    /// The recorded resources.
    pub fn resources(&self) -> &[ResourceInfo] {
        &self.resources
    }

    /// Anchor marking, reachability closure, and reporting.
    pub fn finalize(
        &mut self,
        repo: &FhirStructureRepository,
        options: &ValidatorOptions,
    ) -> ValidationResults {
        let mut results = ValidationResults::new();
        if !options.validate_references {
            return results;
        }
        self.mark_contained_anchors();
        let anchored: Vec<usize> = self
            .resources
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.anchor_type.is_none())
            .map(|(idx, _)| idx)
            .collect();
        for idx in anchored {
            let anchor = self.resources[idx].anchor_type;
            self.follow_references(anchor, idx);
        }
        for idx in 0..self.resources.len() {
            self.check_missing_reference(idx, options, &mut results);
            self.check_missing_resolution(idx, options, &mut results);
            self.check_target_profiles(idx, repo, &mut results);
        }
        results
    }

    fn mark_contained_anchors(&mut self) {
        for idx in 0..self.resources.len() {
            let mut contained_hits = Vec::new();
            for contained_idx in &self.resources[idx].contained {
                let contained_identity = &self.resources[*contained_idx].identity;
                let referenced = self.resources[idx]
                    .reference_targets
                    .iter()
                    .any(|target| target.identity.matches(contained_identity));
                if referenced {
                    contained_hits.push(*contained_idx);
                }
            }
            for hit in contained_hits {
                let anchor = self.resources[hit].anchor_type;
                self.resources[hit].anchor_type = anchor.union(AnchorType::CONTAINED);
            }
        }
    }

    /// Monotone fixed point: anchors propagate along resolvable
    /// references. Terminates because the bitset only ever grows.
    fn follow_references(&mut self, anchor: AnchorType, idx: usize) {
        let info = &self.resources[idx];
        let anchor = anchor
            .union(info.referenced_by_anchor)
            .union(info.anchor_type);
        if info.referenced_by_anchor.covers(anchor) {
            return;
        }
        self.resources[idx].referenced_by_anchor = anchor;
        let targets: Vec<Identity> = self.resources[idx]
            .reference_targets
            .iter()
            .map(|t| t.identity.clone())
            .collect();
        for target in targets {
            if target.is_empty() {
                continue;
            }
            for other in 0..self.resources.len() {
                if other == idx || !self.resources[other].identity.matches(&target) {
                    continue;
                }
                let next = self.resources[other]
                    .referenced_by_anchor
                    .union(anchor)
                    .union(self.resources[other].anchor_type);
                if next != self.resources[other].referenced_by_anchor {
                    self.follow_references(next, other);
                }
            }
        }
    }

    fn check_missing_reference(
        &self,
        idx: usize,
        options: &ValidatorOptions,
        results: &mut ValidationResults,
    ) {
        let resource = &self.resources[idx];
        let missing = resource
            .referenced_by_anchor
            .complement()
            .intersect(resource.reference_requirement);
        if missing == AnchorType::ALL {
            results.add(
                options
                    .levels
                    .unreferenced_bundled_resource
                    .max(options.levels.unreferenced_contained_resource),
                format!(
                    "Missing reference chain from Container and Composition: {}",
                    resource.identity
                ),
                resource.element_full_path.clone(),
                None,
            );
        } else if missing == AnchorType::COMPOSITION {
            results.add(
                options.levels.unreferenced_bundled_resource,
                format!("Missing reference chain from Composition: {}", resource.identity),
                resource.element_full_path.clone(),
                None,
            );
        } else if missing == AnchorType::CONTAINED {
            results.add(
                options.levels.unreferenced_contained_resource,
                format!("Missing reference chain from Container: {}", resource.identity),
                resource.element_full_path.clone(),
                None,
            );
        }
    }

    fn check_missing_resolution(
        &mut self,
        idx: usize,
        options: &ValidatorOptions,
        results: &mut ValidationResults,
    ) {
        const MUST_RESOLVE: &[&str] = &[
            ".subject",
            ".encounter",
            ".author",
            ".attester.party",
            ".custodian",
            ".event.detail",
            ".section.author",
            ".section.focus",
            ".section.entry",
        ];
        if !self.resources[idx].is_composition_in_document {
            return;
        }
        let identities: Vec<Identity> =
            self.resources.iter().map(|r| r.identity.clone()).collect();
        let resource = &mut self.resources[idx];
        for target in &mut resource.reference_targets {
            if !MUST_RESOLVE.contains(&target.local_path.as_str()) {
                continue;
            }
            target.must_be_resolvable = true;
            if target.identity.is_empty() {
                if options.allow_non_literal_author_reference && target.local_path == ".author" {
                    continue;
                }
                results.add(
                    options.levels.mandatory_resolvable_reference_failure,
                    format!(
                        "reference is not literal or invalid but must be resolvable: {}",
                        target.rendering
                    ),
                    target.element_full_path.clone(),
                    None,
                );
            } else if !identities.iter().any(|id| id.matches(&target.identity)) {
                results.add(
                    options.levels.unreferenced_bundled_resource,
                    format!("reference must be resolvable: {}", target.identity),
                    target.element_full_path.clone(),
                    None,
                );
            }
        }
    }

    /// Intersect the allowed target profiles of each reference with the
    /// actual profile set of the referent.
    fn check_target_profiles(
        &self,
        idx: usize,
        repo: &FhirStructureRepository,
        results: &mut ValidationResults,
    ) {
        for target in &self.resources[idx].reference_targets {
            if target.identity.is_empty() {
                continue;
            }
            let Some(referent) = self
                .resources
                .iter()
                .find(|r| r.identity.matches(&target.identity))
            else {
                continue;
            };
            let mut actual: BTreeSet<usize> = referent.claimed_profiles.clone();
            if let Some(type_profile) = referent.type_profile {
                actual.insert(type_profile);
            }
            for (source_profile, allowed) in &target.target_profile_sets {
                if allowed.is_empty() {
                    continue;
                }
                let matches = allowed.iter().any(|allowed_idx| {
                    let allowed_url = &repo.structure(*allowed_idx).url;
                    actual
                        .iter()
                        .any(|actual_idx| repo.is_derived_from(*actual_idx, allowed_url))
                });
                if matches {
                    continue;
                }
                let allowed_urls: Vec<String> = allowed
                    .iter()
                    .map(|i| format!("\"{}\"", repo.structure(*i).url))
                    .collect();
                let referent_key = referent
                    .type_profile
                    .map(|i| repo.structure(i).key())
                    .unwrap_or_else(|| target.identity.to_string());
                results.add(
                    Severity::Error,
                    format!(
                        "Non of the allowed Target Profiles [{}] matches type: {referent_key}",
                        allowed_urls.join(", ")
                    ),
                    target.element_full_path.clone(),
                    Some(repo.structure(*source_profile).key()),
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ReferenceFinder
// ---------------------------------------------------------------------------

/// Walks the document tree and records resources and references.
pub struct ReferenceFinder<'a> {
    repo: &'a FhirStructureRepository,
    context: ReferenceContext,
    results: ValidationResults,
}

#[derive(Clone)]
struct WalkContext {
    resource: usize,
    resource_path: String,
    follow_bundle_entry: bool,
    is_document_bundle: bool,
    bundle_entry_index: Option<usize>,
    full_url: Option<String>,
}

impl<'a> ReferenceFinder<'a> {
    /// Record and verify the reference context of a top-level resource,
    /// returning all findings.
    pub fn find(
        element: &Element<'a>,
        mut profiles: BTreeSet<Pet>,
        options: &ValidatorOptions,
        element_full_path: &str,
    ) -> ValidationResults {
        let repo = element.repo();
        if profiles.is_empty() {
            profiles.insert(element.pet());
        }
        let mut finder = Self {
            repo,
            context: ReferenceContext::default(),
            results: ValidationResults::new(),
        };
        let type_profile = element
            .resource_type()
            .and_then(|t| repo.find_type_by_id(t));
        let identity = Identity {
            url: element
                .resource_type()
                .zip(element.resource_id())
                .map(|(t, id)| format!("{t}/{id}")),
            contained_id: None,
        };
        let claimed_profiles = finder.resolve_profiles(element, element_full_path);
        let root = finder.push_resource(ResourceInfo {
            identity,
            element_full_path: element_full_path.to_string(),
            type_profile,
            claimed_profiles,
            anchor_type: AnchorType::NONE,
            reference_requirement: AnchorType::NONE,
            referenced_by_anchor: AnchorType::NONE,
            reference_targets: Vec::new(),
            contained: Vec::new(),
            is_composition_in_document: false,
        });
        let is_bundle = element.resource_type() == Some("Bundle");
        let context = WalkContext {
            resource: root,
            resource_path: String::new(),
            follow_bundle_entry: true,
            is_document_bundle: is_bundle && is_document_bundle(element),
            bundle_entry_index: None,
            full_url: None,
        };
        profiles.extend(finder.profile_pets_of(element, element_full_path));
        finder.walk(element, &profiles, context, element_full_path);
        let mut results = finder.results;
        results.append(finder.context.finalize(repo, options));
        results
    }

    fn push_resource(&mut self, info: ResourceInfo) -> usize {
        self.context.resources.push(info);
        self.context.resources.len() - 1
    }

    fn resolve_profiles(
        &mut self,
        element: &Element<'a>,
        element_full_path: &str,
    ) -> BTreeSet<usize> {
        let mut found = BTreeSet::new();
        for url in element.profiles() {
            let (bare, version) = match url.split_once('|') {
                Some((u, v)) => (u.to_string(), Some(v.to_string())),
                None => (url.clone(), None),
            };
            match self.repo.find_definition_by_url(&bare, version.as_deref()) {
                Some(idx) => {
                    found.insert(idx);
                }
                None => self.results.add(
                    Severity::Debug,
                    format!("undefined profile: {url}"),
                    element_full_path.to_string(),
                    None,
                ),
            }
        }
        found
    }

    fn profile_pets_of(
        &mut self,
        element: &Element<'a>,
        element_full_path: &str,
    ) -> BTreeSet<Pet> {
        self.resolve_profiles(element, element_full_path)
            .into_iter()
            .map(Pet::root)
            .collect()
    }

    fn walk(
        &mut self,
        element: &Element<'a>,
        pets: &BTreeSet<Pet>,
        context: WalkContext,
        element_full_path: &str,
    ) {
        let mut pets = pets.clone();
        self.add_slice_profiles(element, &mut pets);
        if pets
            .iter()
            .any(|pet| self.repo.element(*pet).type_id == "Reference")
        {
            self.process_reference(element, &pets, &context, element_full_path);
        }
        for sub_name in element.sub_element_names() {
            let sub_pets = self.sub_profile_element_types(&pets, &sub_name);
            if sub_pets.is_empty() {
                self.results.add(
                    Severity::Debug,
                    format!("undefined subfield: {sub_name}"),
                    element_full_path.to_string(),
                    None,
                );
                continue;
            }
            let element_type = self.element_type(&sub_pets);
            if !context.follow_bundle_entry && element_type == ElementType::BundledResource {
                continue;
            }
            let is_array = sub_pets
                .iter()
                .next()
                .map(|pet| self.repo.element(*pet).is_array)
                .unwrap_or(false);
            let sub_path_base = format!("{element_full_path}.{sub_name}");
            for (idx, sub_element) in element.sub_elements(&sub_name).iter().enumerate() {
                let mut sub_full_path = sub_path_base.clone();
                if is_array {
                    sub_full_path.push_str(&format!("[{idx}]"));
                }
                let mut sub_context = context.clone();
                if element_type == ElementType::BundleEntry {
                    sub_context.bundle_entry_index = Some(idx);
                    sub_context.full_url = sub_element
                        .sub_elements("fullUrl")
                        .first()
                        .and_then(Element::as_string);
                }
                if sub_element.is_resource() {
                    self.process_resource(
                        sub_element,
                        &sub_pets,
                        element_type,
                        sub_context,
                        &sub_full_path,
                    );
                } else {
                    sub_context.resource_path =
                        format!("{}.{sub_name}", context.resource_path);
                    self.walk(sub_element, &sub_pets, sub_context, &sub_full_path);
                }
            }
        }
    }

    fn process_resource(
        &mut self,
        element: &Element<'a>,
        all_sub_pets: &BTreeSet<Pet>,
        element_type: ElementType,
        context: WalkContext,
        element_full_path: &str,
    ) {
        let resource_type = element.resource_type().unwrap_or_default().to_string();
        let full_path = format!("{element_full_path}{{{resource_type}}}");
        let Some(resource_def) = self.repo.find_type_by_id(&resource_type) else {
            self.results.add(
                Severity::Debug,
                format!("undefined resource type: {resource_type}"),
                full_path,
                None,
            );
            return;
        };
        let mut resource_pets: BTreeSet<Pet> = all_sub_pets
            .iter()
            .filter(|pet| {
                pet.is_root()
                    && self
                        .repo
                        .is_derived_from(resource_def, &self.repo.structure(pet.profile).url)
            })
            .copied()
            .collect();
        resource_pets.extend(self.profile_pets_of(element, &full_path));
        if resource_pets.is_empty() {
            resource_pets.insert(Pet::root(resource_def));
        }
        let handling = resource_handling(element_type, &context);
        let is_bundle = resource_type == "Bundle";
        let is_composition = !is_bundle && resource_type == "Composition";
        if handling == ResourceHandling::ExpectedComposition && !is_composition {
            self.results.add(
                Severity::Error,
                "First resource in Bundle of type document must be a Composition".to_string(),
                full_path.clone(),
                None,
            );
        }
        let is_anchor = handling == ResourceHandling::ExpectedComposition && is_composition;
        let identity = match handling {
            ResourceHandling::Contained => Identity {
                url: None,
                contained_id: element.resource_id().map(str::to_string),
            },
            _ => Identity {
                url: context.full_url.clone().or_else(|| {
                    element
                        .resource_id()
                        .map(|id| format!("{resource_type}/{id}"))
                }),
                contained_id: None,
            },
        };
        let claimed = self.resolve_profiles(element, &full_path);
        let info = ResourceInfo {
            identity,
            element_full_path: full_path.clone(),
            type_profile: Some(resource_def),
            claimed_profiles: claimed,
            anchor_type: if is_anchor {
                AnchorType::COMPOSITION
            } else {
                AnchorType::NONE
            },
            reference_requirement: match handling {
                ResourceHandling::Contained => AnchorType::CONTAINED,
                ResourceHandling::MustBeReferencedFromAnchor => AnchorType::COMPOSITION,
                _ => AnchorType::NONE,
            },
            referenced_by_anchor: AnchorType::NONE,
            reference_targets: Vec::new(),
            contained: Vec::new(),
            is_composition_in_document: is_anchor,
        };
        let new_idx = self.push_resource(info);
        if handling == ResourceHandling::Contained {
            self.context.resources[context.resource]
                .contained
                .push(new_idx);
        }
        let sub_context = WalkContext {
            resource: new_idx,
            resource_path: String::new(),
            follow_bundle_entry: context.follow_bundle_entry && !is_bundle,
            is_document_bundle: if is_bundle {
                is_document_bundle(element)
            } else {
                context.is_document_bundle
            },
            bundle_entry_index: None,
            full_url: None,
        };
        self.walk(element, &resource_pets, sub_context, &full_path);
    }

    fn process_reference(
        &mut self,
        element: &Element<'a>,
        pets: &BTreeSet<Pet>,
        context: &WalkContext,
        element_full_path: &str,
    ) {
        let identity = reference_identity(element);
        let rendering = element.json().to_string();
        let mut target_profile_sets = Vec::new();
        for pet in pets {
            let mut allowed = BTreeSet::new();
            for url in &self.repo.element(*pet).reference_target_profiles {
                match self.repo.find_definition_by_url(url, None) {
                    Some(idx) => {
                        allowed.insert(idx);
                    }
                    None => self.results.add(
                        Severity::Debug,
                        format!("profile not found: {url}"),
                        element_full_path.to_string(),
                        Some(self.repo.structure(pet.profile).key()),
                    ),
                }
            }
            self.check_reference_type(element, *pet, &allowed, element_full_path);
            target_profile_sets.push((pet.profile, allowed));
        }
        self.context.resources[context.resource]
            .reference_targets
            .push(ReferenceInfo {
                identity,
                element_full_path: element_full_path.to_string(),
                local_path: context.resource_path.clone(),
                rendering,
                target_profile_sets,
                must_be_resolvable: false,
            });
    }

    /// Check an explicit `Reference.type` against the allowed target
    /// profiles.
    fn check_reference_type(
        &mut self,
        element: &Element<'a>,
        pet: Pet,
        allowed: &BTreeSet<usize>,
        element_full_path: &str,
    ) {
        let Some(declared) = element
            .sub_elements("type")
            .first()
            .and_then(Element::as_string)
        else {
            return;
        };
        let type_path = format!("{element_full_path}.type");
        let source_key = Some(self.repo.structure(pet.profile).key());
        let resolved = if declared.contains("://") {
            match self.repo.find_definition_by_url(&declared, None) {
                Some(idx) if self.repo.structure(idx).kind == Kind::Logical => Some(idx),
                Some(_) => {
                    self.results.add(
                        Severity::Error,
                        "Urls only allowed for Logical Models.".to_string(),
                        type_path.clone(),
                        source_key.clone(),
                    );
                    self.repo.find_definition_by_url(&declared, None)
                }
                None => {
                    self.results.add(
                        Severity::Error,
                        format!("Unknown type: {declared}"),
                        type_path,
                        source_key,
                    );
                    return;
                }
            }
        } else {
            match self.repo.find_type_by_id(&declared) {
                Some(idx) => Some(idx),
                None => {
                    self.results.add(
                        Severity::Error,
                        format!("Unknown type: {declared}"),
                        type_path,
                        source_key,
                    );
                    return;
                }
            }
        };
        let Some(resolved) = resolved else { return };
        if allowed.is_empty() {
            return;
        }
        let matches = allowed.iter().any(|allowed_idx| {
            self.repo
                .is_derived_from(resolved, &self.repo.structure(*allowed_idx).url)
        });
        if !matches {
            let allowed_urls: Vec<String> = allowed
                .iter()
                .map(|i| format!("\"{}\"", self.repo.structure(*i).url))
                .collect();
            self.results.add(
                Severity::Error,
                format!(
                    "Non of the allowed Target Profiles [{}] matches type: {}",
                    allowed_urls.join(", "),
                    self.repo.structure(resolved).key()
                ),
                type_path,
                source_key,
            );
        }
    }

    fn add_slice_profiles(&mut self, element: &Element<'a>, pets: &mut BTreeSet<Pet>) {
        let mut additions = BTreeSet::new();
        for pet in pets.iter() {
            let Some(slicing) = &self.repo.element(*pet).slicing else {
                continue;
            };
            for slice in &slicing.slices {
                if element.test_slice_condition(&slice.condition) {
                    additions.insert(Pet::root(slice.profile));
                }
            }
        }
        pets.extend(additions);
    }

    fn sub_profile_element_types(&self, pets: &BTreeSet<Pet>, name: &str) -> BTreeSet<Pet> {
        let mut result = BTreeSet::new();
        for pet in pets {
            result.extend(self.repo.sub_definitions(*pet, name));
        }
        result
    }

    fn element_type(&self, pets: &BTreeSet<Pet>) -> ElementType {
        for pet in pets {
            let profile = self.repo.structure(pet.profile);
            let element = self.repo.element(*pet);
            if profile.kind == Kind::Resource && profile.type_id == "Bundle" {
                let relative = element
                    .name
                    .strip_prefix(&profile.type_id)
                    .map(|rest| rest.trim_start_matches('.'))
                    .unwrap_or("");
                if relative == "entry" {
                    return ElementType::BundleEntry;
                }
                if relative == "entry.resource" {
                    return ElementType::BundledResource;
                }
            }
            if element.field_name == "contained"
                && matches!(profile.kind, Kind::Resource)
            {
                return ElementType::ContainedResource;
            }
        }
        ElementType::Other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementType {
    BundleEntry,
    BundledResource,
    ContainedResource,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceHandling {
    Contained,
    ExpectedComposition,
    MustBeReferencedFromAnchor,
    Other,
}

fn resource_handling(element_type: ElementType, context: &WalkContext) -> ResourceHandling {
    match element_type {
        ElementType::BundledResource if context.is_document_bundle => {
            if context.bundle_entry_index == Some(0) {
                ResourceHandling::ExpectedComposition
            } else {
                ResourceHandling::MustBeReferencedFromAnchor
            }
        }
        ElementType::ContainedResource => ResourceHandling::Contained,
        _ => ResourceHandling::Other,
    }
}

fn is_document_bundle(element: &Element<'_>) -> bool {
    element
        .sub_elements("type")
        .first()
        .and_then(Element::as_string)
        .map(|t| t == "document")
        .unwrap_or(false)
}

fn reference_identity(element: &Element<'_>) -> Identity {
    let Some(reference) = element
        .sub_elements("reference")
        .first()
        .and_then(Element::as_string)
    else {
        return Identity::default();
    };
    if let Some(fragment) = reference.strip_prefix('#') {
        return Identity {
            url: None,
            contained_id: Some(fragment.to_string()),
        };
    }
    Identity {
        url: Some(reference),
        contained_id: None,
    }
}
