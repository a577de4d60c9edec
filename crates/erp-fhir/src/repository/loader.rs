//! Two-pass loader building a [`FhirStructureRepository`] from JSON
//! sources.
//!
//! Pass one parses every source (order does not matter) and synthesizes
//! per-slice StructureDefinitions. Pass two resolves cross-profile
//! references, rejects duplicates and baseDefinition cycles, and freezes
//! the repository. Constraint expressions are compiled here; a parse
//! failure aborts the load.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use super::terminology::{CodeSystem, ComposeFilter, ComposeRule, Concept, ValueSet};
use super::{
    Binding, BindingStrength, Cardinality, Constraint, Derivation, Discriminator,
    DiscriminatorType, FhirElement, FhirStructureRepository, Kind, ProfileLoadError,
    RepositoryView, Slice, SliceCheck, SliceCondition, Slicing, SlicingRules,
    StructureDefinition,
};
use crate::path;
use crate::validator::Severity;

/// A named profile view with an optional validity start; at validation
/// time the view with the latest start not after the reference instant
/// wins.
#[derive(Debug, Clone)]
pub struct ViewSpec {
    /// View name, for diagnostics.
    pub name: String,
    /// Start of validity; `None` means "always applicable".
    pub start: Option<DateTime<Utc>>,
    /// Version pins per canonical URL; unpinned URLs fall back to the
    /// latest loaded version.
    pub pins: Vec<(String, String)>,
}

/// Load a repository from parsed JSON documents plus view definitions.
pub fn load(
    sources: impl IntoIterator<Item = JsonValue>,
    views: Vec<ViewSpec>,
) -> Result<FhirStructureRepository, ProfileLoadError> {
    let mut builder = Builder::default();
    for source in sources {
        builder.add_source(source)?;
    }
    builder.finish(views)
}

#[derive(Default)]
struct Builder {
    structures: Vec<StructureDefinition>,
    code_systems: BTreeMap<String, CodeSystem>,
    value_sets: BTreeMap<String, ValueSet>,
}

impl Builder {
    fn add_source(&mut self, source: JsonValue) -> Result<(), ProfileLoadError> {
        match source.get("resourceType").and_then(JsonValue::as_str) {
            Some("StructureDefinition") => self.add_structure_definition(&source),
            Some("CodeSystem") => self.add_code_system(&source),
            Some("ValueSet") => self.add_value_set(&source),
            Some("Bundle") => {
                let entries = source
                    .get("entry")
                    .and_then(JsonValue::as_array)
                    .cloned()
                    .unwrap_or_default();
                for entry in entries {
                    if let Some(resource) = entry.get("resource") {
                        self.add_source(resource.clone())?;
                    }
                }
                Ok(())
            }
            other => Err(ProfileLoadError::Parse(format!(
                "unsupported resourceType: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }

    fn add_structure_definition(&mut self, source: &JsonValue) -> Result<(), ProfileLoadError> {
        let sd: SdSource = serde_json::from_value(source.clone())
            .map_err(|e| ProfileLoadError::Parse(e.to_string()))?;
        let elements_source = sd
            .snapshot
            .as_ref()
            .or(sd.differential.as_ref())
            .map(|list| list.element.as_slice())
            .unwrap_or(&[]);
        let version = sd.version.clone().unwrap_or_default();
        let kind = match sd.kind.as_str() {
            "primitive-type" => Kind::PrimitiveType,
            "complex-type" => Kind::ComplexType,
            "resource" => Kind::Resource,
            "logical" => Kind::Logical,
            other => {
                return Err(ProfileLoadError::Parse(format!(
                    "unknown StructureDefinition.kind: {other}"
                )))
            }
        };
        let derivation = match sd.derivation.as_deref() {
            Some("specialization") => Derivation::Specialization,
            Some("constraint") => Derivation::Constraint,
            None => Derivation::Basetype,
            Some(other) => {
                return Err(ProfileLoadError::Parse(format!(
                    "unknown StructureDefinition.derivation: {other}"
                )))
            }
        };

        let parsed: Vec<FhirElement> = elements_source
            .iter()
            .map(|e| self.parse_element(&sd.url, e))
            .collect::<Result<_, _>>()?;

        let (main_elements, slice_groups) = partition_slices(parsed);

        let mut main_elements = main_elements;
        // synthesize one StructureDefinition per slice; indices are known
        // because slices append in order behind the already loaded ones
        let mut slices_by_parent: BTreeMap<String, Vec<Slice>> = BTreeMap::new();
        let mut pending: Vec<StructureDefinition> = Vec::new();
        for group in slice_groups {
            let head = &group.elements[0];
            let slice_name = group.name.clone();
            let profile_index = self.structures.len() + 1 + pending.len();
            let slice_sd = StructureDefinition {
                url: format!("{}#{}:{}", sd.url, head.name, slice_name),
                version: version.clone(),
                name: slice_name.clone(),
                type_id: head.type_id.clone(),
                kind: Kind::Slice,
                derivation: Derivation::Constraint,
                base_definition: None,
                elements: group.elements,
            };
            slices_by_parent
                .entry(head_path(&slice_sd))
                .or_default()
                .push(Slice {
                    name: slice_name,
                    profile: profile_index,
                    condition: SliceCondition::default(),
                });
            pending.push(slice_sd);
        }
        for element in &mut main_elements {
            if let Some(slices) = slices_by_parent.remove(&element.name) {
                match &mut element.slicing {
                    Some(slicing) => slicing.slices = slices,
                    None => {
                        // slices without a slicing descriptor keep the
                        // default open rule
                        element.slicing = Some(Slicing {
                            ordered: false,
                            rules: SlicingRules::Open,
                            discriminators: Vec::new(),
                            slices,
                        });
                    }
                }
            }
        }
        if let Some((path, _)) = slices_by_parent.into_iter().next() {
            return Err(ProfileLoadError::Parse(format!(
                "slice head without base element: {path} in {}",
                sd.url
            )));
        }

        let main = StructureDefinition {
            url: sd.url,
            version,
            name: sd.name.unwrap_or_default(),
            type_id: sd.type_id,
            kind,
            derivation,
            base_definition: sd.base_definition,
            elements: main_elements,
        };
        self.structures.push(main);
        self.structures.append(&mut pending);
        Ok(())
    }

    fn parse_element(
        &self,
        url: &str,
        source: &ElementSource,
    ) -> Result<FhirElement, ProfileLoadError> {
        let path_text = source.path.clone();
        let field_name = path_text.rsplit('.').next().unwrap_or(&path_text).to_string();
        let max = match source.max.as_deref() {
            None | Some("*") => None,
            Some(number) => Some(number.parse::<u32>().map_err(|_| {
                ProfileLoadError::Parse(format!("bad max cardinality at {path_text}: {number:?}"))
            })?),
        };
        let base_max = source.base.as_ref().and_then(|b| b.max.as_deref());
        let is_array = match base_max {
            Some("*") => true,
            Some(number) => number.parse::<u32>().map(|n| n > 1).unwrap_or(false),
            None => matches!(source.max.as_deref(), None | Some("*"))
                || max.map(|m| m > 1).unwrap_or(false),
        };
        let type_id = match source.types.len() {
            0 => String::new(),
            1 => source.types[0].code.clone(),
            _ => source
                .types
                .iter()
                .map(|t| t.code.as_str())
                .collect::<Vec<_>>()
                .join(","),
        };
        let profiles = source
            .types
            .iter()
            .flat_map(|t| t.profile.iter().cloned())
            .collect();
        let reference_target_profiles = source
            .types
            .iter()
            .flat_map(|t| t.target_profile.iter().cloned())
            .collect();
        let (fixed, pattern) = fixed_and_pattern(&source.extra);
        let binding = source
            .binding
            .as_ref()
            .and_then(|b| b.value_set.as_ref().map(|vs| (b, vs)))
            .map(|(b, vs)| {
                let (vs_url, vs_version) = match vs.split_once('|') {
                    Some((u, v)) => (u.to_string(), Some(v.to_string())),
                    None => (vs.clone(), None),
                };
                Ok(Binding {
                    strength: match b.strength.as_str() {
                        "required" => BindingStrength::Required,
                        "extensible" => BindingStrength::Extensible,
                        "preferred" => BindingStrength::Preferred,
                        "example" => BindingStrength::Example,
                        other => {
                            return Err(ProfileLoadError::Parse(format!(
                                "unknown binding strength at {path_text}: {other}"
                            )))
                        }
                    },
                    value_set_url: vs_url,
                    value_set_version: vs_version,
                })
            })
            .transpose()?;
        let constraints = source
            .constraint
            .iter()
            .map(|c| {
                let parsed = path::parse(&c.expression).map_err(|e| {
                    ProfileLoadError::ConstraintParse {
                        key: c.key.clone(),
                        url: url.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Constraint {
                    key: c.key.clone(),
                    severity: match c.severity.as_str() {
                        "warning" => Severity::Warning,
                        _ => Severity::Error,
                    },
                    human: c.human.clone(),
                    expression: c.expression.clone(),
                    parsed,
                })
            })
            .collect::<Result<Vec<_>, ProfileLoadError>>()?;
        let slicing = source.slicing.as_ref().map(|s| Slicing {
            ordered: s.ordered.unwrap_or(false),
            rules: match s.rules.as_deref() {
                Some("closed") => SlicingRules::Closed,
                Some("openAtEnd") => SlicingRules::OpenAtEnd,
                _ => SlicingRules::Open,
            },
            discriminators: s
                .discriminator
                .iter()
                .map(|d| Discriminator {
                    kind: match d.kind.as_str() {
                        "pattern" => DiscriminatorType::Pattern,
                        "exists" => DiscriminatorType::Exists,
                        "type" => DiscriminatorType::Type,
                        "profile" => DiscriminatorType::Profile,
                        _ => DiscriminatorType::Value,
                    },
                    path: d.path.clone(),
                })
                .collect(),
            slices: Vec::new(),
        });
        let original_name = match &source.slice_name {
            Some(slice) => format!("{path_text}:{slice}"),
            None => path_text.clone(),
        };
        Ok(FhirElement {
            name: path_text,
            original_name,
            field_name,
            type_id,
            content_reference: source
                .content_reference
                .as_ref()
                .map(|r| r.trim_start_matches('#').to_string()),
            cardinality: Cardinality {
                min: source.min.unwrap_or(0),
                max,
            },
            is_array,
            profiles,
            reference_target_profiles,
            fixed,
            pattern,
            binding,
            constraints,
            slicing,
            slice_name: source.slice_name.clone(),
        })
    }

    fn add_code_system(&mut self, source: &JsonValue) -> Result<(), ProfileLoadError> {
        let cs: CodeSystemSource = serde_json::from_value(source.clone())
            .map_err(|e| ProfileLoadError::Parse(e.to_string()))?;
        let mut concepts = Vec::new();
        collect_concepts(&cs.concept, None, &mut concepts);
        let complete = matches!(cs.content.as_deref(), Some("complete") | None);
        let system = CodeSystem {
            url: cs.url.clone(),
            version: cs.version,
            concepts,
            complete,
        };
        if self.code_systems.insert(cs.url.clone(), system).is_some() {
            return Err(ProfileLoadError::DuplicateDefinition {
                url: cs.url,
                version: "<CodeSystem>".to_string(),
            });
        }
        Ok(())
    }

    fn add_value_set(&mut self, source: &JsonValue) -> Result<(), ProfileLoadError> {
        let vs: ValueSetSource = serde_json::from_value(source.clone())
            .map_err(|e| ProfileLoadError::Parse(e.to_string()))?;
        let convert = |rules: &[ComposeRuleSource]| -> Vec<ComposeRule> {
            rules
                .iter()
                .map(|r| ComposeRule {
                    system: r.system.clone(),
                    codes: r.concept.iter().map(|c| c.code.clone()).collect(),
                    filters: r
                        .filter
                        .iter()
                        .filter_map(|f| match (f.property.as_str(), f.op.as_str()) {
                            ("concept", "is-a") => Some(ComposeFilter::IsA(f.value.clone())),
                            ("concept", "is-not-a") => Some(ComposeFilter::IsNotA(f.value.clone())),
                            _ => None,
                        })
                        .collect(),
                    value_sets: r.value_set.clone(),
                })
                .collect()
        };
        let (includes, excludes) = match &vs.compose {
            Some(compose) => (convert(&compose.include), convert(&compose.exclude)),
            None => (Vec::new(), Vec::new()),
        };
        let value_set = ValueSet {
            url: vs.url.clone(),
            version: vs.version,
            includes,
            excludes,
            expansion: OnceLock::new(),
        };
        if self.value_sets.insert(vs.url.clone(), value_set).is_some() {
            return Err(ProfileLoadError::DuplicateDefinition {
                url: vs.url,
                version: "<ValueSet>".to_string(),
            });
        }
        Ok(())
    }

    fn finish(self, view_specs: Vec<ViewSpec>) -> Result<FhirStructureRepository, ProfileLoadError> {
        let mut by_url_version = BTreeMap::new();
        let mut latest_by_url: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_type_id = BTreeMap::new();
        for (idx, sd) in self.structures.iter().enumerate() {
            let key = (sd.url.clone(), sd.version.clone());
            if by_url_version.insert(key, idx).is_some() {
                return Err(ProfileLoadError::DuplicateDefinition {
                    url: sd.url.clone(),
                    version: sd.version.clone(),
                });
            }
            let mut seen_paths = BTreeSet::new();
            for element in &sd.elements {
                if !seen_paths.insert((element.name.clone(), element.slice_name.clone())) {
                    return Err(ProfileLoadError::DuplicateElementPath {
                        url: sd.url.clone(),
                        path: element.name.clone(),
                    });
                }
            }
            match latest_by_url.get(&sd.url) {
                Some(&existing) if self.structures[existing].version >= sd.version => {}
                _ => {
                    latest_by_url.insert(sd.url.clone(), idx);
                }
            }
            if sd.kind != Kind::Slice && sd.derivation != Derivation::Constraint {
                by_type_id.entry(sd.type_id.clone()).or_insert(idx);
            }
        }

        // baseDefinition chains must terminate
        for sd in &self.structures {
            let mut seen = BTreeSet::new();
            let mut current = Some(sd);
            while let Some(s) = current {
                if !seen.insert(s.url.clone()) {
                    return Err(ProfileLoadError::BaseCycle { url: sd.url.clone() });
                }
                current = match s.base_definition.as_deref() {
                    None => None,
                    Some(base) => match latest_by_url.get(base) {
                        Some(&idx) => Some(&self.structures[idx]),
                        None => {
                            return Err(ProfileLoadError::Unresolved {
                                referrer: s.url.clone(),
                                target: base.to_string(),
                            })
                        }
                    },
                };
            }
        }

        let default_view = RepositoryView {
            name: "default".to_string(),
            resolved: latest_by_url.clone(),
        };
        let mut views = Vec::new();
        for spec in view_specs {
            let mut resolved = latest_by_url.clone();
            for (url, version) in &spec.pins {
                let key = (url.clone(), version.clone());
                match by_url_version.get(&key) {
                    Some(&idx) => {
                        resolved.insert(url.clone(), idx);
                    }
                    None => {
                        return Err(ProfileLoadError::Unresolved {
                            referrer: format!("view {}", spec.name),
                            target: format!("{url}|{version}"),
                        })
                    }
                }
            }
            views.push((
                spec.start,
                RepositoryView {
                    name: spec.name,
                    resolved,
                },
            ));
        }

        let mut repo = FhirStructureRepository {
            structures: self.structures,
            by_url_version,
            by_type_id,
            code_systems: self.code_systems,
            value_sets: self.value_sets,
            views,
            default_view,
        };
        compile_slice_conditions(&mut repo);
        Ok(repo)
    }
}

fn head_path(slice_sd: &StructureDefinition) -> String {
    slice_sd.elements[0].name.clone()
}

/// Split the raw element list into the main profile elements and one
/// group per slice (head plus its children).
fn partition_slices(elements: Vec<FhirElement>) -> (Vec<FhirElement>, Vec<SliceGroup>) {
    let mut main = Vec::new();
    let mut groups: Vec<SliceGroup> = Vec::new();
    let mut active: Option<(String, String)> = None; // (head path, prefix)
    for element in elements {
        let mut in_active_group = false;
        let mut leave_group = false;
        if let Some((head, prefix)) = &active {
            if element.name.starts_with(prefix.as_str()) {
                in_active_group = true;
            } else if !(element.name == *head && element.slice_name.is_some()) {
                leave_group = true;
            }
        }
        if in_active_group {
            groups
                .last_mut()
                .expect("active slice implies a group")
                .elements
                .push(element);
            continue;
        }
        if leave_group {
            active = None;
        }
        if let Some(slice_name) = element.slice_name.clone() {
            active = Some((element.name.clone(), format!("{}.", element.name)));
            groups.push(SliceGroup {
                name: slice_name,
                elements: vec![element],
            });
            continue;
        }
        main.push(element);
    }
    (main, groups)
}

struct SliceGroup {
    name: String,
    elements: Vec<FhirElement>,
}

/// Derive each slice's discriminator condition from the slicing
/// descriptor and the slice profile's fixed/pattern values.
fn compile_slice_conditions(repo: &mut FhirStructureRepository) {
    let mut updates: Vec<(usize, usize, usize, SliceCondition)> = Vec::new();
    for (sd_idx, sd) in repo.structures.iter().enumerate() {
        for (el_idx, element) in sd.elements.iter().enumerate() {
            let Some(slicing) = &element.slicing else { continue };
            for (slice_idx, slice) in slicing.slices.iter().enumerate() {
                let condition =
                    build_condition(repo, &slicing.discriminators, slice.profile, &sd.url);
                updates.push((sd_idx, el_idx, slice_idx, condition));
            }
        }
    }
    for (sd_idx, el_idx, slice_idx, condition) in updates {
        let slicing = repo.structures[sd_idx].elements[el_idx]
            .slicing
            .as_mut()
            .expect("slicing present");
        slicing.slices[slice_idx].condition = condition;
    }
}

fn build_condition(
    repo: &FhirStructureRepository,
    discriminators: &[Discriminator],
    slice_profile: usize,
    parent_url: &str,
) -> SliceCondition {
    let slice_sd = &repo.structures[slice_profile];
    let root_path = &slice_sd.elements[0].name;
    let mut checks = Vec::new();
    for discriminator in discriminators {
        let segments: Vec<String> = if discriminator.path == "$this" {
            Vec::new()
        } else {
            discriminator.path.split('.').map(str::to_string).collect()
        };
        let target_path = if segments.is_empty() {
            root_path.clone()
        } else {
            format!("{root_path}.{}", segments.join("."))
        };
        let target = slice_sd.find_element(&target_path);
        match discriminator.kind {
            DiscriminatorType::Value | DiscriminatorType::Pattern => {
                let Some(target_idx) = target else {
                    tracing::warn!(
                        profile = parent_url,
                        slice = %slice_sd.name,
                        path = %discriminator.path,
                        "discriminator path not found in slice"
                    );
                    continue;
                };
                let target_element = &slice_sd.elements[target_idx];
                if let Some(fixed) = &target_element.fixed {
                    checks.push((segments, SliceCheck::Equals(fixed.clone())));
                } else if let Some(pattern) = &target_element.pattern {
                    checks.push((segments, SliceCheck::Matches(pattern.clone())));
                } else {
                    tracing::warn!(
                        profile = parent_url,
                        slice = %slice_sd.name,
                        path = %discriminator.path,
                        "discriminator target has neither fixed nor pattern value"
                    );
                }
            }
            DiscriminatorType::Exists => {
                let required = match target {
                    Some(idx) => {
                        let cardinality = slice_sd.elements[idx].cardinality;
                        if cardinality.max == Some(0) {
                            Some(false)
                        } else if cardinality.min > 0 {
                            Some(true)
                        } else {
                            None
                        }
                    }
                    None => Some(false),
                };
                if let Some(required) = required {
                    checks.push((segments, SliceCheck::Exists(required)));
                }
            }
            DiscriminatorType::Type => {
                if let Some(idx) = target {
                    let type_id = slice_sd.elements[idx].type_id.clone();
                    checks.push((segments, SliceCheck::IsType(type_id)));
                }
            }
            DiscriminatorType::Profile => {
                tracing::warn!(
                    profile = parent_url,
                    slice = %slice_sd.name,
                    "profile discriminators are not evaluated"
                );
            }
        }
    }
    SliceCondition { checks }
}

fn fixed_and_pattern(
    extra: &serde_json::Map<String, JsonValue>,
) -> (Option<JsonValue>, Option<JsonValue>) {
    let mut fixed = None;
    let mut pattern = None;
    for (key, value) in extra {
        if let Some(rest) = key.strip_prefix("fixed") {
            if rest.chars().next().is_some_and(char::is_uppercase) {
                fixed = Some(value.clone());
            }
        } else if let Some(rest) = key.strip_prefix("pattern") {
            if rest.chars().next().is_some_and(char::is_uppercase) {
                pattern = Some(value.clone());
            }
        }
    }
    (fixed, pattern)
}

fn collect_concepts(sources: &[ConceptSource], parent: Option<usize>, out: &mut Vec<Concept>) {
    for source in sources {
        let idx = out.len();
        out.push(Concept {
            code: source.code.clone(),
            parent,
        });
        collect_concepts(&source.concept, Some(idx), out);
    }
}

// ---------------------------------------------------------------------------
// Source shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SdSource {
    url: String,
    version: Option<String>,
    name: Option<String>,
    #[serde(rename = "type")]
    type_id: String,
    kind: String,
    derivation: Option<String>,
    #[serde(rename = "baseDefinition")]
    base_definition: Option<String>,
    snapshot: Option<ElementListSource>,
    differential: Option<ElementListSource>,
}

#[derive(Debug, Deserialize)]
struct ElementListSource {
    element: Vec<ElementSource>,
}

#[derive(Debug, Deserialize)]
struct ElementSource {
    path: String,
    #[serde(rename = "sliceName")]
    slice_name: Option<String>,
    min: Option<u32>,
    max: Option<String>,
    #[serde(rename = "type", default)]
    types: Vec<TypeSource>,
    #[serde(rename = "contentReference")]
    content_reference: Option<String>,
    base: Option<BaseSource>,
    binding: Option<BindingSource>,
    #[serde(default)]
    constraint: Vec<ConstraintSource>,
    slicing: Option<SlicingSource>,
    #[serde(flatten)]
    extra: serde_json::Map<String, JsonValue>,
}

#[derive(Debug, Deserialize)]
struct TypeSource {
    code: String,
    #[serde(default)]
    profile: Vec<String>,
    #[serde(rename = "targetProfile", default)]
    target_profile: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BaseSource {
    max: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BindingSource {
    strength: String,
    #[serde(rename = "valueSet")]
    value_set: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConstraintSource {
    key: String,
    severity: String,
    #[serde(default)]
    human: String,
    expression: String,
}

#[derive(Debug, Deserialize)]
struct SlicingSource {
    ordered: Option<bool>,
    rules: Option<String>,
    #[serde(default)]
    discriminator: Vec<DiscriminatorSource>,
}

#[derive(Debug, Deserialize)]
struct DiscriminatorSource {
    #[serde(rename = "type")]
    kind: String,
    path: String,
}

#[derive(Debug, Deserialize)]
struct CodeSystemSource {
    url: String,
    version: Option<String>,
    content: Option<String>,
    #[serde(default)]
    concept: Vec<ConceptSource>,
}

#[derive(Debug, Deserialize)]
struct ConceptSource {
    code: String,
    #[serde(default)]
    concept: Vec<ConceptSource>,
}

#[derive(Debug, Deserialize)]
struct ValueSetSource {
    url: String,
    version: Option<String>,
    compose: Option<ComposeSource>,
}

#[derive(Debug, Deserialize)]
struct ComposeSource {
    #[serde(default)]
    include: Vec<ComposeRuleSource>,
    #[serde(default)]
    exclude: Vec<ComposeRuleSource>,
}

#[derive(Debug, Deserialize)]
struct ComposeRuleSource {
    system: Option<String>,
    #[serde(default)]
    concept: Vec<ConceptRefSource>,
    #[serde(default)]
    filter: Vec<FilterSource>,
    #[serde(rename = "valueSet", default)]
    value_set: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ConceptRefSource {
    code: String,
}

#[derive(Debug, Deserialize)]
struct FilterSource {
    property: String,
    op: String,
    value: String,
}
