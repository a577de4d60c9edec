//! The FHIRPath expression engine.
//!
//! Expressions are parsed once — at profile load for constraints, or via
//! the request-scoped [`ExpressionCache`] for discriminators — and
//! evaluated against [`Element`](crate::model::Element)s. Evaluation is
//! pure and deterministic: missing fields produce empty collections,
//! never errors.

mod eval;
mod parser;

pub use eval::{evaluate, singleton_bool, Collection, Value};

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// A compiled FHIRPath expression; cheap to clone and share.
pub type Expression = Arc<Expr>;

/// Parse an expression into its compiled form.
pub fn parse(source: &str) -> Result<Expression, PathError> {
    parser::parse(source).map(Arc::new)
}

/// Parse failure; fatal when raised during profile load.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("FHIRPath parse error in {source_text:?}: {message}")]
pub struct PathError {
    /// The offending source text.
    pub source_text: String,
    /// What went wrong.
    pub message: String,
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

/// Literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `{}` — the empty collection.
    Empty,
    /// `true` / `false`
    Boolean(bool),
    /// Integer literal.
    Integer(i64),
    /// Decimal literal.
    Decimal(f64),
    /// Single-quoted string literal.
    String(String),
    /// `@...` date/time literal, kept lexically.
    Date(String),
}

/// One step of an invocation chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Member navigation.
    Field(String),
    /// Function call.
    Function {
        /// Function name.
        name: String,
        /// Argument expressions.
        args: Vec<Expr>,
    },
    /// `[n]` indexer.
    Index(usize),
}

/// Binary operators, in FHIRPath precedence groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `|`
    Union,
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `in`
    In,
    /// `contains`
    Contains,
    /// `and`
    And,
    /// `or`
    Or,
    /// `xor`
    Xor,
    /// `implies`
    Implies,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Union => "|",
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "in",
            Self::Contains => "contains",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Implies => "implies",
        };
        f.write_str(text)
    }
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal value.
    Literal(Literal),
    /// Navigation/invocation chain. `head` is `None` when the chain
    /// starts from the evaluation context (`$this` or a leading field).
    Invocation {
        /// Parenthesized or literal head of the chain.
        head: Option<Box<Expr>>,
        /// Steps applied in order.
        steps: Vec<Step>,
    },
    /// Binary operation.
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

// ---------------------------------------------------------------------------
// Request-scoped parse cache
// ---------------------------------------------------------------------------

/// An append-only parse cache keyed by source text. Lookups after
/// insertion share the compiled expression.
#[derive(Debug, Default)]
pub struct ExpressionCache {
    entries: Mutex<HashMap<String, Expression>>,
}

impl ExpressionCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the compiled form, parsing on first use.
    pub fn get_or_parse(&self, source: &str) -> Result<Expression, PathError> {
        let mut entries = self.entries.lock().expect("expression cache poisoned");
        if let Some(found) = entries.get(source) {
            return Ok(found.clone());
        }
        let compiled = parse(source)?;
        entries.insert(source.to_string(), compiled.clone());
        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_returns_shared_instances() {
        let cache = ExpressionCache::new();
        let a = cache.get_or_parse("name.exists()").expect("parses");
        let b = cache.get_or_parse("name.exists()").expect("parses");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn cache_propagates_parse_errors() {
        let cache = ExpressionCache::new();
        assert!(cache.get_or_parse("name.(").is_err());
    }
}
