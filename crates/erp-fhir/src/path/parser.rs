//! nom-based parser for the FHIRPath subset used by profile constraints
//! and slicing discriminators.
//!
//! Precedence, tightest first: invocation chains, union `|`,
//! comparisons, equality, membership (`in`/`contains`), `and`,
//! `xor`/`or`, `implies`.

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_while, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{all_consuming, map, opt, recognize, value, verify},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use super::{BinOp, Expr, Literal, PathError, Step};

pub(super) fn parse(source: &str) -> Result<Expr, PathError> {
    match all_consuming(delimited(multispace0, expression, multispace0))(source) {
        Ok((_, expr)) => Ok(expr),
        Err(err) => Err(PathError {
            source_text: source.to_string(),
            message: err.to_string(),
        }),
    }
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn expression(input: &str) -> IResult<&str, Expr> {
    implies_expr(input)
}

fn implies_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = or_expr(input)?;
    let (input, rest) = many0(preceded(ws(keyword("implies")), or_expr))(input)?;
    // `implies` is right-associative
    let mut all = vec![first];
    all.extend(rest);
    let mut result = all.pop().expect("at least one operand");
    while let Some(lhs) = all.pop() {
        result = Expr::Binary(BinOp::Implies, Box::new(lhs), Box::new(result));
    }
    Ok((input, result))
}

fn or_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(pair(
        ws(alt((
            value(BinOp::Or, keyword("or")),
            value(BinOp::Xor, keyword("xor")),
        ))),
        and_expr,
    ))(input)?;
    Ok((input, fold_left(first, rest)))
}

fn and_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = membership_expr(input)?;
    let (input, rest) = many0(pair(
        ws(value(BinOp::And, keyword("and"))),
        membership_expr,
    ))(input)?;
    Ok((input, fold_left(first, rest)))
}

fn membership_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = equality_expr(input)?;
    let (input, rest) = many0(pair(
        ws(alt((
            value(BinOp::In, keyword("in")),
            value(BinOp::Contains, keyword("contains")),
        ))),
        equality_expr,
    ))(input)?;
    Ok((input, fold_left(first, rest)))
}

fn equality_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = comparison_expr(input)?;
    let (input, rest) = many0(pair(
        ws(alt((
            value(BinOp::Ne, tag("!=")),
            value(BinOp::Eq, tag("=")),
        ))),
        comparison_expr,
    ))(input)?;
    Ok((input, fold_left(first, rest)))
}

fn comparison_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = union_expr(input)?;
    let (input, rest) = many0(pair(
        ws(alt((
            value(BinOp::Le, tag("<=")),
            value(BinOp::Ge, tag(">=")),
            value(BinOp::Lt, tag("<")),
            value(BinOp::Gt, tag(">")),
        ))),
        union_expr,
    ))(input)?;
    Ok((input, fold_left(first, rest)))
}

fn union_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = invocation_expr(input)?;
    let (input, rest) = many0(pair(
        ws(value(BinOp::Union, tag("|"))),
        invocation_expr,
    ))(input)?;
    Ok((input, fold_left(first, rest)))
}

fn fold_left(first: Expr, rest: Vec<(BinOp, Expr)>) -> Expr {
    rest.into_iter().fold(first, |lhs, (op, rhs)| {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    })
}

/// A chain: optional head (literal or parenthesized expression) followed
/// by `.`-separated steps and indexers.
fn invocation_expr(input: &str) -> IResult<&str, Expr> {
    alt((headed_chain, bare_chain))(input)
}

fn headed_chain(input: &str) -> IResult<&str, Expr> {
    let (input, head) = alt((
        delimited(ws(char('(')), expression, ws(char(')'))),
        map(literal, Expr::Literal),
    ))(input)?;
    let (input, steps) = many0(chain_step_after_head)(input)?;
    if steps.is_empty() {
        return Ok((input, head));
    }
    Ok((
        input,
        Expr::Invocation {
            head: Some(Box::new(head)),
            steps,
        },
    ))
}

fn bare_chain(input: &str) -> IResult<&str, Expr> {
    let (input, first) = first_step(input)?;
    let (input, mut steps) = many0(chain_step_after_head)(input)?;
    steps.insert(0, first);
    Ok((input, Expr::Invocation { head: None, steps }))
}

fn first_step(input: &str) -> IResult<&str, Step> {
    alt((
        // `$this` refers to the context element
        value(Step::Field("$this".to_string()), tag("$this")),
        function_step,
        map(identifier, |name| Step::Field(name.to_string())),
    ))(input)
}

fn chain_step_after_head(input: &str) -> IResult<&str, Step> {
    alt((
        preceded(ws(char('.')), alt((function_step, member_step))),
        index_step,
    ))(input)
}

fn member_step(input: &str) -> IResult<&str, Step> {
    map(identifier, |name| Step::Field(name.to_string()))(input)
}

fn function_step(input: &str) -> IResult<&str, Step> {
    let (input, (name, args)) = pair(
        identifier,
        delimited(
            ws(char('(')),
            separated_list0(ws(char(',')), expression),
            ws(char(')')),
        ),
    )(input)?;
    Ok((
        input,
        Step::Function {
            name: name.to_string(),
            args,
        },
    ))
}

fn index_step(input: &str) -> IResult<&str, Step> {
    map(
        delimited(ws(char('[')), digit1, ws(char(']'))),
        |digits: &str| Step::Index(digits.parse().unwrap_or(0)),
    )(input)
}

/// Identifiers; backtick-delimited forms allow reserved words as field
/// names. Keywords are excluded from the plain form.
fn identifier(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('`'), is_not("`"), char('`')),
        verify(plain_identifier, |name: &str| {
            !matches!(
                name,
                "and" | "or" | "xor" | "implies" | "in" | "contains" | "true" | "false"
            )
        }),
    ))(input)
}

fn plain_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    verify(plain_identifier, move |name: &str| name == word)
}

fn literal(input: &str) -> IResult<&str, Literal> {
    alt((
        value(Literal::Empty, pair(ws(char('{')), char('}'))),
        value(Literal::Boolean(true), keyword("true")),
        value(Literal::Boolean(false), keyword("false")),
        date_literal,
        number_literal,
        string_literal,
    ))(input)
}

fn string_literal(input: &str) -> IResult<&str, Literal> {
    let (input, text) = delimited(
        char('\''),
        opt(escaped_transform(
            is_not("\\'"),
            '\\',
            alt((
                value('\'', char('\'')),
                value('\\', char('\\')),
                value('/', char('/')),
                value('\n', char('n')),
                value('\t', char('t')),
                value('\r', char('r')),
                value('`', char('`')),
            )),
        )),
        char('\''),
    )(input)?;
    Ok((input, Literal::String(text.unwrap_or_default())))
}

fn number_literal(input: &str) -> IResult<&str, Literal> {
    let (rest, text) = recognize(tuple((digit1, opt(pair(char('.'), digit1)))))(input)?;
    if text.contains('.') {
        let parsed = text.parse::<f64>().map_err(|_| {
            nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Float))
        })?;
        Ok((rest, Literal::Decimal(parsed)))
    } else {
        let parsed = text.parse::<i64>().map_err(|_| {
            nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
        })?;
        Ok((rest, Literal::Integer(parsed)))
    }
}

fn date_literal(input: &str) -> IResult<&str, Literal> {
    let (rest, text) = preceded(
        char('@'),
        recognize(take_while1(|c: char| {
            c.is_ascii_digit() || matches!(c, '-' | ':' | 'T' | '+' | 'Z' | '.')
        })),
    )(input)?;
    Ok((rest, Literal::Date(text.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Expr {
        parse(source).unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn parses_plain_navigation() {
        let expr = parse_ok("name.family");
        match expr {
            Expr::Invocation { head: None, steps } => {
                assert_eq!(
                    steps,
                    vec![
                        Step::Field("name".to_string()),
                        Step::Field("family".to_string())
                    ]
                );
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_function_with_predicate() {
        let expr = parse_ok("coding.where(system = 'http://loinc.org').exists()");
        let Expr::Invocation { steps, .. } = expr else {
            panic!("expected invocation");
        };
        assert_eq!(steps.len(), 3);
        assert!(matches!(&steps[1], Step::Function { name, args } if name == "where" && args.len() == 1));
        assert!(matches!(&steps[2], Step::Function { name, args } if name == "exists" && args.is_empty()));
    }

    #[test]
    fn precedence_implies_is_loosest() {
        let expr = parse_ok("a.exists() implies b.exists() and c.exists()");
        assert!(matches!(expr, Expr::Binary(BinOp::Implies, _, _)));
    }

    #[test]
    fn precedence_union_binds_tighter_than_equality() {
        let expr = parse_ok("a | b = c");
        let Expr::Binary(BinOp::Eq, lhs, _) = expr else {
            panic!("expected equality at the top");
        };
        assert!(matches!(*lhs, Expr::Binary(BinOp::Union, _, _)));
    }

    #[test]
    fn parses_literals() {
        assert_eq!(parse("true").unwrap(), Expr::Literal(Literal::Boolean(true)));
        assert_eq!(parse("42").unwrap(), Expr::Literal(Literal::Integer(42)));
        assert_eq!(parse("4.5").unwrap(), Expr::Literal(Literal::Decimal(4.5)));
        assert_eq!(
            parse("'text'").unwrap(),
            Expr::Literal(Literal::String("text".to_string()))
        );
        assert_eq!(parse("{}").unwrap(), Expr::Literal(Literal::Empty));
        assert_eq!(
            parse("@2024-01-01").unwrap(),
            Expr::Literal(Literal::Date("2024-01-01".to_string()))
        );
    }

    #[test]
    fn parses_escaped_identifier_and_string() {
        let expr = parse_ok("`div`.exists()");
        let Expr::Invocation { steps, .. } = expr else {
            panic!("expected invocation");
        };
        assert_eq!(steps[0], Step::Field("div".to_string()));
        assert_eq!(
            parse(r"'it\'s'").unwrap(),
            Expr::Literal(Literal::String("it's".to_string()))
        );
    }

    #[test]
    fn parses_extension_helper() {
        parse_ok("extension('http://example.org/x').value.exists()");
    }

    #[test]
    fn parses_parenthesized_head() {
        parse_ok("(name | alias).count() = 2");
    }

    #[test]
    fn parses_indexer() {
        let expr = parse_ok("entry[0].resource");
        let Expr::Invocation { steps, .. } = expr else {
            panic!("expected invocation");
        };
        assert!(matches!(steps[1], Step::Index(0)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("name.(").is_err());
        assert!(parse("= b").is_err());
        assert!(parse("a = ").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn real_constraint_expressions() {
        parse_ok("contained.contained.empty()");
        parse_ok("contained.meta.versionId.empty() and contained.meta.lastUpdated.empty()");
        parse_ok("(count() = 1) or (code.exists())");
        parse_ok("value.empty() or code!=component.code");
        parse_ok("text.`div`.exists()");
        parse_ok("identifier.where(use = 'official').exists() implies name.exists()");
    }
}
