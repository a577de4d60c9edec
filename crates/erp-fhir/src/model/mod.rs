//! The polymorphic element model the validator walks.
//!
//! An [`Element`] is a thin view over a parsed JSON document (or a
//! profile-defined literal value) plus the [`Pet`] naming the profile
//! position that applies to it. Elements are cheap to clone and never
//! outlive the document or repository they borrow from; the tree is
//! acyclic by construction.

mod xml;

pub use xml::{xml_to_json, XmlError};

use serde_json::Value as JsonValue;

use crate::repository::{FhirStructureRepository, Pet, SliceCheck, SliceCondition};
use erp_time::{FhirDate, FhirDateTime, FhirTime};
use std::fmt;
use std::str::FromStr;

/// Primitive classification of an element, derived from its declared
/// type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// `boolean`
    Boolean,
    /// `integer`, `positiveInt`, `unsignedInt`
    Integer,
    /// `decimal`
    Decimal,
    /// string-like primitives (`string`, `code`, `uri`, `id`, ...)
    String,
    /// `date`
    Date,
    /// `dateTime`, `instant`
    DateTime,
    /// `time`
    Time,
    /// `Quantity` and its specializations
    Quantity,
    /// everything else
    Structured,
}

/// Identity of a resource or reference target within a validation
/// context.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Identity {
    /// Full or relative URL (`https://...`, `urn:uuid:...`, `Type/id`).
    pub url: Option<String>,
    /// Contained-resource fragment id (`#x` with the `#` stripped).
    pub contained_id: Option<String>,
}

impl Identity {
    /// Whether this identity carries no usable information.
    pub fn is_empty(&self) -> bool {
        self.url.is_none() && self.contained_id.is_none()
    }

    /// Whether two identities address the same resource. Relative RESTful
    /// references match full URLs by path suffix.
    pub fn matches(&self, other: &Identity) -> bool {
        if let (Some(a), Some(b)) = (&self.contained_id, &other.contained_id) {
            if a == b {
                return true;
            }
        }
        if let (Some(a), Some(b)) = (&self.url, &other.url) {
            if a == b {
                return true;
            }
            let relative_matches = |full: &str, relative: &str| {
                full.ends_with(relative)
                    && full[..full.len() - relative.len()].ends_with('/')
            };
            if relative_matches(a, b) || relative_matches(b, a) {
                return true;
            }
        }
        false
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.url, &self.contained_id) {
            (Some(url), _) => f.write_str(url),
            (None, Some(id)) => write!(f, "#{id}"),
            (None, None) => f.write_str("<no identity>"),
        }
    }
}

/// A node of the document under validation.
#[derive(Clone, Copy)]
pub struct Element<'a> {
    repo: &'a FhirStructureRepository,
    pet: Pet,
    value: &'a JsonValue,
    /// The `_field` sibling object carrying id/extensions of a primitive.
    primitive: Option<&'a JsonValue>,
}

impl<'a> Element<'a> {
    /// View the root of a parsed resource document.
    ///
    /// The starting profile is the resource type's own definition.
    pub fn resource_root(
        repo: &'a FhirStructureRepository,
        document: &'a JsonValue,
    ) -> Result<Self, String> {
        let resource_type = document
            .get("resourceType")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| "document has no resourceType".to_string())?;
        let profile = repo
            .find_type_by_id(resource_type)
            .ok_or_else(|| format!("resourceType unknown: {resource_type}"))?;
        Ok(Self {
            repo,
            pet: Pet::root(profile),
            value: document,
            primitive: None,
        })
    }

    /// View a profile-defined literal (fixed or pattern value) as an
    /// element so it can be compared structurally.
    pub fn from_literal(
        repo: &'a FhirStructureRepository,
        pet: Pet,
        value: &'a JsonValue,
    ) -> Self {
        Self {
            repo,
            pet,
            value,
            primitive: None,
        }
    }

    /// The repository this element resolves definitions against.
    pub fn repo(&self) -> &'a FhirStructureRepository {
        self.repo
    }

    /// The profile position applying to this element.
    pub fn pet(&self) -> Pet {
        self.pet
    }

    /// The raw JSON node.
    pub fn json(&self) -> &'a JsonValue {
        self.value
    }

    /// Primitive classification derived from the declared type.
    pub fn kind(&self) -> ElementKind {
        let type_id = &self.repo.element(self.pet).type_id;
        classify_type(type_id)
    }

    /// `resourceType` of this node, when it is a resource.
    pub fn resource_type(&self) -> Option<&'a str> {
        self.value.get("resourceType").and_then(JsonValue::as_str)
    }

    /// Whether this node is a resource.
    pub fn is_resource(&self) -> bool {
        self.resource_type().is_some()
    }

    /// Profile URLs claimed in `meta.profile`.
    pub fn profiles(&self) -> Vec<String> {
        self.value
            .get("meta")
            .and_then(|meta| meta.get("profile"))
            .and_then(JsonValue::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(JsonValue::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The resource `id`, when present.
    pub fn resource_id(&self) -> Option<&'a str> {
        self.value.get("id").and_then(JsonValue::as_str)
    }

    /// Whether the node carries a primitive value.
    pub fn has_value(&self) -> bool {
        matches!(
            self.value,
            JsonValue::Bool(_) | JsonValue::Number(_) | JsonValue::String(_)
        )
    }

    /// Names of all present sub-fields in stable order, with the
    /// `_field` primitive-extension convention already merged.
    pub fn sub_element_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut push = |name: &str| {
            let effective = name.strip_prefix('_').unwrap_or(name);
            if effective != "resourceType" && !names.iter().any(|n| n == effective) {
                names.push(effective.to_string());
            }
        };
        if let JsonValue::Object(map) = self.value {
            for key in map.keys() {
                push(key);
            }
        }
        if let Some(JsonValue::Object(map)) = self.primitive {
            for key in map.keys() {
                push(key);
            }
        }
        names
    }

    /// Whether a named sub-field is present.
    pub fn has_sub_element(&self, name: &str) -> bool {
        self.lookup(name).is_some() || self.lookup_primitive(name).is_some()
    }

    /// All occurrences of a named sub-field.
    pub fn sub_elements(&self, name: &str) -> Vec<Element<'a>> {
        let sub_pet = self.repo.sub_field(self.pet, name).unwrap_or(self.pet);
        let value = self.lookup(name);
        let primitive = self.lookup_primitive(name);
        let mut result = Vec::new();
        match (value, primitive) {
            (Some(JsonValue::Array(items)), primitives) => {
                let primitive_items = match primitives {
                    Some(JsonValue::Array(p)) => Some(p),
                    _ => None,
                };
                for (idx, item) in items.iter().enumerate() {
                    let sibling = primitive_items
                        .and_then(|p| p.get(idx))
                        .filter(|v| !v.is_null());
                    if item.is_null() {
                        if let Some(sibling) = sibling {
                            result.push(Element {
                                repo: self.repo,
                                pet: sub_pet,
                                value: sibling,
                                primitive: None,
                            });
                        }
                        continue;
                    }
                    result.push(Element {
                        repo: self.repo,
                        pet: sub_pet,
                        value: item,
                        primitive: sibling,
                    });
                }
            }
            (Some(single), primitive) => {
                result.push(Element {
                    repo: self.repo,
                    pet: sub_pet,
                    value: single,
                    primitive: primitive.filter(|v| !v.is_null()),
                });
            }
            (None, Some(primitive_only)) => {
                result.push(Element {
                    repo: self.repo,
                    pet: sub_pet,
                    value: primitive_only,
                    primitive: None,
                });
            }
            (None, None) => {}
        }
        result
    }

    fn lookup(&self, name: &str) -> Option<&'a JsonValue> {
        self.value.get(name)
    }

    fn lookup_primitive(&self, name: &str) -> Option<&'a JsonValue> {
        if let Some(found) = self.value.get(format!("_{name}")) {
            return Some(found);
        }
        self.primitive.and_then(|p| p.get(name))
    }

    // -- typed accessors -----------------------------------------------

    /// String form of a primitive value.
    pub fn as_string(&self) -> Option<String> {
        match self.value {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Bool(b) => Some(b.to_string()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Integer value.
    pub fn as_int(&self) -> Option<i64> {
        self.value.as_i64()
    }

    /// Decimal value.
    pub fn as_decimal(&self) -> Option<f64> {
        self.value.as_f64()
    }

    /// Boolean value.
    pub fn as_boolean(&self) -> Option<bool> {
        self.value.as_bool()
    }

    /// Parsed and validated `date` value.
    pub fn as_date(&self) -> Result<FhirDate, erp_time::TimeError> {
        let text = self
            .value
            .as_str()
            .ok_or_else(|| erp_time::TimeError::Format("not a string".to_string()))?;
        FhirDate::from_str(text)
    }

    /// Parsed and validated `time` value.
    pub fn as_time(&self) -> Result<FhirTime, erp_time::TimeError> {
        let text = self
            .value
            .as_str()
            .ok_or_else(|| erp_time::TimeError::Format("not a string".to_string()))?;
        FhirTime::from_str(text)
    }

    /// Parsed and validated `dateTime` value.
    pub fn as_date_time(&self) -> Result<FhirDateTime, erp_time::TimeError> {
        let text = self
            .value
            .as_str()
            .ok_or_else(|| erp_time::TimeError::Format("not a string".to_string()))?;
        FhirDateTime::from_str(text)
    }

    /// `(value, unit)` of a Quantity node.
    pub fn as_quantity(&self) -> Option<(f64, String)> {
        let value = self.value.get("value")?.as_f64()?;
        let unit = self
            .value
            .get("unit")
            .or_else(|| self.value.get("code"))
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        Some((value, unit.to_string()))
    }

    // -- structural comparison -----------------------------------------

    /// Structural equality against another element.
    pub fn equals(&self, other: &Element<'_>) -> bool {
        json_equals(self.value, other.value)
    }

    /// Pattern match: every field present in `pattern` must be present
    /// here and equal; additional fields are allowed.
    pub fn matches(&self, pattern: &Element<'_>) -> bool {
        json_matches(self.value, pattern.value)
    }

    /// Evaluate a compiled slice condition against this element.
    pub fn test_slice_condition(&self, condition: &SliceCondition) -> bool {
        if condition.checks.is_empty() {
            return false;
        }
        condition.checks.iter().all(|(path, check)| {
            let targets = self.navigate(path);
            match check {
                SliceCheck::Exists(required) => targets.is_empty() != *required,
                SliceCheck::Equals(expected) => {
                    !targets.is_empty()
                        && targets.iter().all(|t| json_equals(t.value, expected))
                }
                SliceCheck::Matches(expected) => {
                    !targets.is_empty()
                        && targets.iter().all(|t| json_matches(t.value, expected))
                }
                SliceCheck::IsType(type_id) => match type_id.as_str() {
                    "" => false,
                    wanted => targets.iter().all(|t| {
                        t.resource_type().map(|rt| rt == wanted).unwrap_or_else(|| {
                            self.repo.element(t.pet).type_id == wanted
                        })
                    }),
                },
            }
        })
    }

    fn navigate(&self, path: &[String]) -> Vec<Element<'a>> {
        let mut current = vec![*self];
        for segment in path {
            let mut next = Vec::new();
            for element in current {
                next.extend(element.sub_elements(segment));
            }
            current = next;
            if current.is_empty() {
                break;
            }
        }
        current
    }
}

impl fmt::Debug for Element<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Element({})", self.value)
    }
}

/// Classify a declared type id into the primitive families the
/// validator distinguishes.
pub fn classify_type(type_id: &str) -> ElementKind {
    match type_id {
        "boolean" => ElementKind::Boolean,
        "integer" | "positiveInt" | "unsignedInt" | "integer64" => ElementKind::Integer,
        "decimal" => ElementKind::Decimal,
        "date" => ElementKind::Date,
        "dateTime" | "instant" => ElementKind::DateTime,
        "time" => ElementKind::Time,
        "Quantity" | "Age" | "Distance" | "Duration" | "Count" | "MoneyQuantity"
        | "SimpleQuantity" => ElementKind::Quantity,
        "string" | "code" | "uri" | "url" | "canonical" | "id" | "markdown" | "oid" | "uuid"
        | "base64Binary" | "xhtml" => ElementKind::String,
        _ => ElementKind::Structured,
    }
}

/// Structural JSON equality with numeric comparison for numbers.
pub fn json_equals(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => {
            x.as_f64().zip(y.as_f64()).map(|(x, y)| x == y).unwrap_or(false)
        }
        (JsonValue::Object(x), JsonValue::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map(|w| json_equals(v, w)).unwrap_or(false))
        }
        (JsonValue::Array(x), JsonValue::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(v, w)| json_equals(v, w))
        }
        _ => a == b,
    }
}

/// Pattern semantics: every item of `pattern` must be present in `value`;
/// objects recurse, array items must each find a matching element.
pub fn json_matches(value: &JsonValue, pattern: &JsonValue) -> bool {
    match (value, pattern) {
        (JsonValue::Object(v), JsonValue::Object(p)) => p
            .iter()
            .all(|(k, pv)| v.get(k).map(|vv| json_matches(vv, pv)).unwrap_or(false)),
        (JsonValue::Array(v), JsonValue::Array(p)) => p
            .iter()
            .all(|pv| v.iter().any(|vv| json_matches(vv, pv))),
        _ => json_equals(value, pattern),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_matching() {
        let full = Identity {
            url: Some("https://erp.example.de/Task/123".to_string()),
            contained_id: None,
        };
        let relative = Identity {
            url: Some("Task/123".to_string()),
            contained_id: None,
        };
        let other = Identity {
            url: Some("Task/124".to_string()),
            contained_id: None,
        };
        assert!(full.matches(&relative));
        assert!(relative.matches(&full));
        assert!(!full.matches(&other));
        // suffix match requires a path boundary
        let trap = Identity {
            url: Some("https://erp.example.de/MyTask/123".to_string()),
            contained_id: None,
        };
        assert!(!trap.matches(&relative));
    }

    #[test]
    fn identity_contained() {
        let a = Identity {
            url: None,
            contained_id: Some("pat1".to_string()),
        };
        let b = Identity {
            url: Some("ignored".to_string()),
            contained_id: Some("pat1".to_string()),
        };
        assert!(a.matches(&b));
        assert!(a.is_empty() == false);
        assert_eq!(a.to_string(), "#pat1");
    }

    #[test]
    fn json_equality_is_numeric() {
        assert!(json_equals(&json!(1.0), &json!(1)));
        assert!(!json_equals(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
        assert!(json_equals(&json!([1, 2]), &json!([1, 2])));
        assert!(!json_equals(&json!([1, 2]), &json!([2, 1])));
    }

    #[test]
    fn pattern_matching_allows_extra_fields() {
        let value = json!({"system": "sys", "code": "c", "display": "ignored"});
        assert!(json_matches(&value, &json!({"system": "sys", "code": "c"})));
        assert!(!json_matches(&value, &json!({"system": "other"})));
        // array pattern items each need a match
        let coding = json!({"coding": [{"system": "a"}, {"system": "b"}]});
        assert!(json_matches(&coding, &json!({"coding": [{"system": "b"}]})));
        assert!(!json_matches(&coding, &json!({"coding": [{"system": "c"}]})));
    }
}
