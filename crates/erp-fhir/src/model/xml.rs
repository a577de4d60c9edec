//! FHIR XML ingestion.
//!
//! XML documents are mapped onto the same JSON document model the
//! validator walks, following the standard FHIR XML↔JSON mapping:
//! `value` attributes become primitives, repeated elements become arrays,
//! child elements below a value-carrying element land in the `_field`
//! sibling, and the narrative `div` is kept as an opaque string. Because
//! the XML form does not distinguish number, boolean, and string
//! primitives, conversion consults the profile repository for the
//! declared type at each position.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{json, Map, Value as JsonValue};

use crate::model::{classify_type, ElementKind};
use crate::repository::{FhirStructureRepository, Pet};

/// The FHIR XML namespace.
pub const FHIR_NS: &str = "http://hl7.org/fhir";

/// Errors while reading a FHIR XML document.
#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    /// Malformed XML.
    #[error("cannot read XML: {0}")]
    Read(String),
    /// The document root is not a known resource.
    #[error("unknown root resource: {0}")]
    UnknownResource(String),
}

#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    value_attr: Option<String>,
    id_attr: Option<String>,
    url_attr: Option<String>,
    children: Vec<XmlNode>,
    /// Raw inner XML for narrative (`div`) nodes.
    raw: Option<String>,
}

/// Convert a FHIR XML document into its JSON form.
pub fn xml_to_json(
    repo: &FhirStructureRepository,
    xml: &str,
) -> Result<JsonValue, XmlError> {
    let root = parse_tree(xml)?;
    let profile = repo
        .find_type_by_id(&root.name)
        .ok_or_else(|| XmlError::UnknownResource(root.name.clone()))?;
    let mut object = convert_children(repo, Pet::root(profile), &root);
    object.insert("resourceType".to_string(), json!(root.name));
    Ok(JsonValue::Object(object))
}

fn parse_tree(xml: &str) -> Result<XmlNode, XmlError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;
    loop {
        match reader.read_event().map_err(|e| XmlError::Read(e.to_string()))? {
            Event::Start(start) => {
                let name = String::from_utf8_lossy(local_name(start.name().as_ref())).to_string();
                let mut node = XmlNode {
                    name,
                    ..XmlNode::default()
                };
                for attr in start.attributes().flatten() {
                    let key = String::from_utf8_lossy(local_name(attr.key.as_ref())).to_string();
                    let value = attr
                        .unescape_value()
                        .map_err(|e| XmlError::Read(e.to_string()))?
                        .to_string();
                    match key.as_str() {
                        "value" => node.value_attr = Some(value),
                        "id" => node.id_attr = Some(value),
                        "url" => node.url_attr = Some(value),
                        _ => {}
                    }
                }
                if node.name == "div" {
                    let raw = reader
                        .read_text(start.name())
                        .map_err(|e| XmlError::Read(e.to_string()))?;
                    node.raw = Some(raw.to_string());
                    attach(&mut stack, &mut root, node);
                } else {
                    stack.push(node);
                }
            }
            Event::Empty(start) => {
                let name = String::from_utf8_lossy(local_name(start.name().as_ref())).to_string();
                let mut node = XmlNode {
                    name,
                    ..XmlNode::default()
                };
                for attr in start.attributes().flatten() {
                    let key = String::from_utf8_lossy(local_name(attr.key.as_ref())).to_string();
                    let value = attr
                        .unescape_value()
                        .map_err(|e| XmlError::Read(e.to_string()))?
                        .to_string();
                    match key.as_str() {
                        "value" => node.value_attr = Some(value),
                        "id" => node.id_attr = Some(value),
                        "url" => node.url_attr = Some(value),
                        _ => {}
                    }
                }
                attach(&mut stack, &mut root, node);
            }
            Event::End(_) => {
                let node = stack.pop().ok_or_else(|| {
                    XmlError::Read("unbalanced end tag".to_string())
                })?;
                attach(&mut stack, &mut root, node);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    root.ok_or_else(|| XmlError::Read("empty document".to_string()))
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => *root = Some(node),
    }
}

fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|b| *b == b':') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

/// Convert the children of an XML node into a JSON object, consulting
/// the repository for primitive types and resource boundaries.
fn convert_children(
    repo: &FhirStructureRepository,
    pet: Pet,
    node: &XmlNode,
) -> Map<String, JsonValue> {
    let mut object = Map::new();
    // group repeated elements, keeping first-occurrence document order
    let mut buckets: Vec<(String, Vec<&XmlNode>)> = Vec::new();
    for child in &node.children {
        match buckets.iter_mut().find(|(name, _)| *name == child.name) {
            Some((_, bucket)) => bucket.push(child),
            None => buckets.push((child.name.clone(), vec![child])),
        }
    }
    for (name, bucket) in &buckets {
        let resolved = repo.sub_field(pet, name);
        let sub_pet = resolved.unwrap_or(pet);
        let is_array = match resolved {
            Some(found) => repo.element(found).is_array,
            // unresolved fields (unknown extensions) stay arrays when
            // repeated; `extension` itself is always repeating
            None => name == "extension" || name == "modifierExtension",
        };
        let mut values = Vec::new();
        let mut siblings = Vec::new();
        let mut any_sibling = false;
        for child in bucket.iter().copied() {
            let (value, sibling) = convert_node(repo, sub_pet, child, resolved.is_some());
            any_sibling |= sibling.is_some();
            values.push(value);
            siblings.push(sibling.unwrap_or(JsonValue::Null));
        }
        if is_array || values.len() > 1 {
            object.insert(name.clone(), JsonValue::Array(values));
            if any_sibling {
                object.insert(format!("_{name}"), JsonValue::Array(siblings));
            }
        } else {
            let value = values.remove(0);
            if !value.is_null() {
                object.insert(name.clone(), value);
            }
            let sibling = siblings.remove(0);
            if !sibling.is_null() {
                object.insert(format!("_{name}"), sibling);
            }
        }
    }
    object
}

/// Convert one XML node. For primitives the first slot is the typed
/// value and the second the `_field` sibling; structures land entirely
/// in the first slot.
fn convert_node(
    repo: &FhirStructureRepository,
    pet: Pet,
    node: &XmlNode,
    known: bool,
) -> (JsonValue, Option<JsonValue>) {
    if let Some(raw) = &node.raw {
        return (json!(raw), None);
    }
    let element = repo.element(pet);
    let kind = if known {
        classify_type(&element.type_id)
    } else if node.value_attr.is_some() && node.children.is_empty() && node.url_attr.is_none() {
        ElementKind::String
    } else {
        ElementKind::Structured
    };
    // a contained resource appears as a single child element naming the
    // resource type
    if kind == ElementKind::Structured
        && node.value_attr.is_none()
        && node.children.len() == 1
        && repo.find_type_by_id(&node.children[0].name).is_some()
        && (element.type_id == "Resource" || element.type_id.is_empty() || node.name == "contained" || node.name == "resource")
    {
        let resource = &node.children[0];
        let profile = repo
            .find_type_by_id(&resource.name)
            .expect("checked above");
        let mut object = convert_children(repo, Pet::root(profile), resource);
        object.insert("resourceType".to_string(), json!(resource.name));
        return (JsonValue::Object(object), None);
    }
    match (kind, &node.value_attr) {
        (ElementKind::Structured, _) => {
            let mut object = convert_children(repo, pet, node);
            if let Some(id) = &node.id_attr {
                object.insert("id".to_string(), json!(id));
            }
            if let Some(url) = &node.url_attr {
                object.insert("url".to_string(), json!(url));
            }
            (JsonValue::Object(object), None)
        }
        (_, value) => {
            let primitive = match value {
                Some(text) => typed_primitive(kind, text),
                None => JsonValue::Null,
            };
            let mut sibling = convert_children(repo, pet, node);
            if let Some(id) = &node.id_attr {
                sibling.insert("id".to_string(), json!(id));
            }
            let sibling = if sibling.is_empty() {
                None
            } else {
                Some(JsonValue::Object(sibling))
            };
            (primitive, sibling)
        }
    }
}

/// Interpret a primitive's text per its declared type; values that do
/// not parse stay strings so validation reports them.
fn typed_primitive(kind: ElementKind, text: &str) -> JsonValue {
    match kind {
        ElementKind::Boolean => match text {
            "true" => json!(true),
            "false" => json!(false),
            other => json!(other),
        },
        ElementKind::Integer => text
            .parse::<i64>()
            .map(|n| json!(n))
            .unwrap_or_else(|_| json!(text)),
        ElementKind::Decimal => text
            .parse::<f64>()
            .map(|n| json!(n))
            .unwrap_or_else(|_| json!(text)),
        _ => json!(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{load, ViewSpec};
    use serde_json::json;

    fn mini_repo() -> FhirStructureRepository {
        let sources = vec![
            json!({
                "resourceType": "StructureDefinition",
                "url": "http://hl7.org/fhir/StructureDefinition/Patient",
                "version": "4.0.1",
                "name": "Patient",
                "type": "Patient",
                "kind": "resource",
                "snapshot": {"element": [
                    {"path": "Patient", "min": 0, "max": "*"},
                    {"path": "Patient.id", "min": 0, "max": "1", "type": [{"code": "id"}]},
                    {"path": "Patient.active", "min": 0, "max": "1", "type": [{"code": "boolean"}]},
                    {"path": "Patient.name", "min": 0, "max": "*", "base": {"max": "*"},
                     "type": [{"code": "HumanName"}]},
                    {"path": "Patient.multipleBirthInteger", "min": 0, "max": "1",
                     "type": [{"code": "integer"}]}
                ]}
            }),
            json!({
                "resourceType": "StructureDefinition",
                "url": "http://hl7.org/fhir/StructureDefinition/HumanName",
                "version": "4.0.1",
                "name": "HumanName",
                "type": "HumanName",
                "kind": "complex-type",
                "snapshot": {"element": [
                    {"path": "HumanName", "min": 0, "max": "*"},
                    {"path": "HumanName.family", "min": 0, "max": "1", "type": [{"code": "string"}]},
                    {"path": "HumanName.given", "min": 0, "max": "*", "base": {"max": "*"},
                     "type": [{"code": "string"}]}
                ]}
            }),
        ];
        load(sources, Vec::<ViewSpec>::new()).expect("mini repo loads")
    }

    #[test]
    fn maps_primitives_and_arrays() {
        let repo = mini_repo();
        let xml = r#"<Patient xmlns="http://hl7.org/fhir">
            <id value="p1"/>
            <active value="true"/>
            <multipleBirthInteger value="2"/>
            <name>
                <family value="Fuchs"/>
                <given value="Anna"/>
                <given value="Marie"/>
            </name>
        </Patient>"#;
        let converted = xml_to_json(&repo, xml).expect("converts");
        assert_eq!(
            converted,
            json!({
                "resourceType": "Patient",
                "id": "p1",
                "active": true,
                "multipleBirthInteger": 2,
                "name": [{"family": "Fuchs", "given": ["Anna", "Marie"]}]
            })
        );
    }

    #[test]
    fn maps_primitive_extension_to_sibling() {
        let repo = mini_repo();
        let xml = r#"<Patient xmlns="http://hl7.org/fhir">
            <name>
                <family value="Königsstein">
                    <extension url="http://hl7.org/fhir/StructureDefinition/humanname-own-name">
                        <valueString value="Königsstein"/>
                    </extension>
                </family>
            </name>
        </Patient>"#;
        let converted = xml_to_json(&repo, xml).expect("converts");
        let name = &converted["name"][0];
        assert_eq!(name["family"], json!("Königsstein"));
        assert!(name["_family"]["extension"].is_array() || name["_family"]["extension"].is_object());
    }

    #[test]
    fn rejects_unknown_root() {
        let repo = mini_repo();
        let err = xml_to_json(&repo, r#"<Unknown xmlns="http://hl7.org/fhir"/>"#).unwrap_err();
        assert!(matches!(err, XmlError::UnknownResource(_)));
    }
}
