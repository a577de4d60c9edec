//! Pure FHIRPath evaluation over [`Element`]s.
//!
//! Evaluation follows the FHIRPath collection semantics: everything is a
//! collection, missing fields are empty collections, and boolean logic
//! is three-valued (empty = unknown). The evaluator never fails; inputs
//! outside the supported subset simply produce empty collections.

use crate::model::{Element, ElementKind};

use super::{BinOp, Expr, Literal, Step};

/// One item of a collection: an element of the document or a computed
/// primitive.
#[derive(Debug, Clone)]
pub enum Value<'a> {
    /// A document node.
    Element(Element<'a>),
    /// Boolean.
    Boolean(bool),
    /// Integer.
    Integer(i64),
    /// Decimal.
    Decimal(f64),
    /// String.
    String(String),
    /// Date/time literal kept lexically.
    Date(String),
}

/// An ordered collection of values.
pub type Collection<'a> = Vec<Value<'a>>;

/// Evaluate an expression with the given context element.
pub fn evaluate<'a>(expr: &Expr, context: Element<'a>) -> Collection<'a> {
    eval(expr, context)
}

fn eval<'a>(expr: &Expr, context: Element<'a>) -> Collection<'a> {
    match expr {
        Expr::Literal(literal) => literal_value(literal).map(|v| vec![v]).unwrap_or_default(),
        Expr::Invocation { head, steps } => {
            let mut current = match head {
                Some(inner) => eval(inner, context),
                None => vec![Value::Element(context)],
            };
            for (idx, step) in steps.iter().enumerate() {
                let is_first_context_step = head.is_none() && idx == 0;
                current = apply_step(step, current, context, is_first_context_step);
            }
            current
        }
        Expr::Binary(op, lhs, rhs) => {
            let left = eval(lhs, context);
            let right = eval(rhs, context);
            binary(*op, left, right)
        }
    }
}

fn literal_value<'a>(literal: &Literal) -> Option<Value<'a>> {
    match literal {
        Literal::Empty => None,
        Literal::Boolean(b) => Some(Value::Boolean(*b)),
        Literal::Integer(i) => Some(Value::Integer(*i)),
        Literal::Decimal(d) => Some(Value::Decimal(*d)),
        Literal::String(s) => Some(Value::String(s.clone())),
        Literal::Date(d) => Some(Value::Date(d.clone())),
    }
}

fn apply_step<'a>(
    step: &Step,
    input: Collection<'a>,
    context: Element<'a>,
    first_context_step: bool,
) -> Collection<'a> {
    match step {
        Step::Field(name) if name == "$this" => input,
        Step::Field(name) => {
            let mut output = Vec::new();
            for item in &input {
                let Value::Element(element) = item else {
                    continue;
                };
                // a leading identifier naming the context type refers to
                // the context itself
                if first_context_step && names_context(element, name) {
                    output.push(item.clone());
                    continue;
                }
                output.extend(
                    element
                        .sub_elements(name)
                        .into_iter()
                        .map(Value::Element),
                );
            }
            output
        }
        Step::Index(idx) => input.into_iter().nth(*idx).map(|v| vec![v]).unwrap_or_default(),
        Step::Function { name, args } => apply_function(name, args, input, context),
    }
}

fn names_context(element: &Element<'_>, name: &str) -> bool {
    if element.resource_type() == Some(name) {
        return true;
    }
    let definition = element.repo().element(element.pet());
    definition.name == name
}

fn apply_function<'a>(
    name: &str,
    args: &[Expr],
    input: Collection<'a>,
    context: Element<'a>,
) -> Collection<'a> {
    match (name, args.len()) {
        ("exists", 0) => vec![Value::Boolean(!input.is_empty())],
        ("exists", 1) => {
            let found = input
                .iter()
                .any(|item| predicate_holds(&args[0], item, context));
            vec![Value::Boolean(found)]
        }
        ("empty", 0) => vec![Value::Boolean(input.is_empty())],
        ("count", 0) => vec![Value::Integer(input.len() as i64)],
        ("first", 0) => input.into_iter().next().map(|v| vec![v]).unwrap_or_default(),
        ("not", 0) => match singleton_bool(&input) {
            Some(b) => vec![Value::Boolean(!b)],
            None => Vec::new(),
        },
        ("where", 1) => input
            .into_iter()
            .filter(|item| predicate_holds(&args[0], item, context))
            .collect(),
        ("all", 1) => {
            let all = input
                .iter()
                .all(|item| predicate_holds(&args[0], item, context));
            vec![Value::Boolean(all)]
        }
        ("ofType", 1) => {
            let Some(wanted) = type_argument(&args[0]) else {
                return Vec::new();
            };
            input
                .into_iter()
                .filter(|item| matches_type(item, &wanted))
                .collect()
        }
        ("extension", 1) => {
            let url = eval(&args[0], context);
            let Some(url) = as_string_value(url.first()) else {
                return Vec::new();
            };
            let mut output = Vec::new();
            for item in &input {
                let Value::Element(element) = item else { continue };
                for extension in element.sub_elements("extension") {
                    let matches = extension
                        .sub_elements("url")
                        .first()
                        .and_then(Element::as_string)
                        .map(|u| u == url)
                        .unwrap_or(false);
                    if matches {
                        output.push(Value::Element(extension));
                    }
                }
            }
            output
        }
        ("children", 0) => {
            let mut output = Vec::new();
            for item in &input {
                let Value::Element(element) = item else { continue };
                for name in element.sub_element_names() {
                    output.extend(
                        element
                            .sub_elements(&name)
                            .into_iter()
                            .map(Value::Element),
                    );
                }
            }
            output
        }
        ("hasValue", 0) => {
            let has = matches!(input.first(), Some(Value::Element(e)) if e.has_value())
                || matches!(
                    input.first(),
                    Some(Value::Boolean(_) | Value::Integer(_) | Value::Decimal(_)
                        | Value::String(_) | Value::Date(_))
                );
            vec![Value::Boolean(has && input.len() == 1)]
        }
        // reference resolution happens in the reference-context pass;
        // inside expressions it contributes nothing
        ("resolve", 0) => Vec::new(),
        ("trace", _) => input,
        _ => {
            tracing::debug!(function = name, "unsupported FHIRPath function");
            Vec::new()
        }
    }
}

fn predicate_holds<'a>(criteria: &Expr, item: &Value<'a>, context: Element<'a>) -> bool {
    let scoped = match item {
        Value::Element(element) => eval(criteria, *element),
        // primitives cannot be navigated further; evaluate against the
        // outer context so comparisons with $this still work
        _ => eval(criteria, context),
    };
    singleton_bool(&scoped).unwrap_or(!scoped.is_empty())
}

fn type_argument(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Invocation { head: None, steps } => match steps.as_slice() {
            [Step::Field(name)] => Some(name.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn matches_type(item: &Value<'_>, wanted: &str) -> bool {
    match item {
        Value::Element(element) => {
            if element.resource_type() == Some(wanted) {
                return true;
            }
            let type_id = &element.repo().element(element.pet()).type_id;
            type_id == wanted || type_id.eq_ignore_ascii_case(wanted)
        }
        Value::Boolean(_) => wanted.eq_ignore_ascii_case("boolean"),
        Value::Integer(_) => wanted.eq_ignore_ascii_case("integer"),
        Value::Decimal(_) => wanted.eq_ignore_ascii_case("decimal"),
        Value::String(_) => wanted.eq_ignore_ascii_case("string"),
        Value::Date(_) => wanted.eq_ignore_ascii_case("dateTime"),
    }
}

fn binary<'a>(op: BinOp, left: Collection<'a>, right: Collection<'a>) -> Collection<'a> {
    match op {
        BinOp::Union => {
            let mut result = left;
            for item in right {
                if !result.iter().any(|existing| value_equals(existing, &item) == Some(true)) {
                    result.push(item);
                }
            }
            result
        }
        BinOp::Eq | BinOp::Ne => {
            if left.is_empty() || right.is_empty() {
                return Vec::new();
            }
            let equal = left.len() == right.len()
                && left
                    .iter()
                    .zip(&right)
                    .all(|(a, b)| value_equals(a, b) == Some(true));
            let result = if op == BinOp::Eq { equal } else { !equal };
            vec![Value::Boolean(result)]
        }
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let (Some(a), Some(b)) = (left.first(), right.first()) else {
                return Vec::new();
            };
            let Some(ordering) = value_compare(a, b) else {
                return Vec::new();
            };
            let result = match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                BinOp::Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            vec![Value::Boolean(result)]
        }
        BinOp::In => {
            let Some(needle) = left.first() else {
                return Vec::new();
            };
            let found = right
                .iter()
                .any(|item| value_equals(needle, item) == Some(true));
            vec![Value::Boolean(found)]
        }
        BinOp::Contains => {
            let Some(needle) = right.first() else {
                return Vec::new();
            };
            let found = left
                .iter()
                .any(|item| value_equals(needle, item) == Some(true));
            vec![Value::Boolean(found)]
        }
        BinOp::And => three_valued(left, right, |a, b| match (a, b) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        }),
        BinOp::Or => three_valued(left, right, |a, b| match (a, b) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        }),
        BinOp::Xor => three_valued(left, right, |a, b| match (a, b) {
            (Some(a), Some(b)) => Some(a ^ b),
            _ => None,
        }),
        BinOp::Implies => three_valued(left, right, |a, b| match (a, b) {
            (Some(false), _) => Some(true),
            (Some(true), b) => b,
            (None, Some(true)) => Some(true),
            (None, _) => None,
        }),
    }
}

fn three_valued<'a>(
    left: Collection<'a>,
    right: Collection<'a>,
    combine: impl Fn(Option<bool>, Option<bool>) -> Option<bool>,
) -> Collection<'a> {
    match combine(singleton_bool(&left), singleton_bool(&right)) {
        Some(result) => vec![Value::Boolean(result)],
        None => Vec::new(),
    }
}

/// Singleton evaluation of a collection in boolean context: a lone
/// boolean keeps its value, any other singleton counts as `true`, empty
/// is unknown.
pub fn singleton_bool(collection: &Collection<'_>) -> Option<bool> {
    match collection.as_slice() {
        [] => None,
        [Value::Boolean(b)] => Some(*b),
        [Value::Element(element)] => Some(element.as_boolean().unwrap_or(true)),
        _ => Some(true),
    }
}

fn as_string_value(value: Option<&Value<'_>>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Date(d) => Some(d.clone()),
        Value::Element(e) => e.as_string(),
        Value::Boolean(b) => Some(b.to_string()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Decimal(d) => Some(d.to_string()),
    }
}

fn as_number(value: &Value<'_>) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Decimal(d) => Some(*d),
        Value::Element(e) => match e.kind() {
            ElementKind::Integer => e.as_int().map(|i| i as f64),
            ElementKind::Decimal => e.as_decimal(),
            _ => None,
        },
        _ => None,
    }
}

fn value_equals(a: &Value<'_>, b: &Value<'_>) -> Option<bool> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return Some(x == y);
    }
    match (a, b) {
        (Value::Element(x), Value::Element(y)) => Some(x.equals(y)),
        (Value::Boolean(x), Value::Boolean(y)) => Some(x == y),
        (Value::Boolean(x), Value::Element(e)) | (Value::Element(e), Value::Boolean(x)) => {
            e.as_boolean().map(|b| b == *x)
        }
        _ => {
            let (x, y) = (as_string_value(Some(a))?, as_string_value(Some(b))?);
            Some(x == y)
        }
    }
}

fn value_compare(a: &Value<'_>, b: &Value<'_>) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    let date_kind = |v: &Value<'_>| match v {
        Value::Date(_) => true,
        Value::Element(e) => matches!(
            e.kind(),
            ElementKind::Date | ElementKind::DateTime | ElementKind::Time
        ),
        _ => false,
    };
    if date_kind(a) || date_kind(b) {
        let (x, y) = (as_string_value(Some(a))?, as_string_value(Some(b))?);
        let (dx, dy) = (
            x.parse::<erp_time::FhirDateTime>().ok()?,
            y.parse::<erp_time::FhirDateTime>().ok()?,
        );
        return dx.partial_cmp(&dy);
    }
    let (x, y) = (as_string_value(Some(a))?, as_string_value(Some(b))?);
    Some(x.cmp(&y))
}
