use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_till, take_while, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{cut, value},
    error::ErrorKind,
    multi::many0,
    sequence::pair,
};

use crate::ast::{Value, is_symbol_char, parse_number_literal};
pub use crate::ParseConfig;
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

type NomError<'a> = nom::error::Error<&'a str>;

/// Fail without backtracking into other alternatives
fn fail<T>(input: &str, code: ErrorKind) -> IResult<&str, T> {
    Err(nom::Err::Failure(NomError::new(input, code)))
}

/// Convert nom parsing errors to user-friendly parse errors
fn to_parse_error(input: &str, error: nom::Err<NomError<'_>>) -> ParseError {
    let e = match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => e,
        nom::Err::Incomplete(_) => {
            return ParseError::from_message(ParseErrorKind::Incomplete, "Incomplete input");
        }
    };
    let position = input.len().saturating_sub(e.input.len());
    let found = e.input.chars().take(10).collect::<String>();
    let found = (!found.is_empty()).then_some(found);

    let (kind, message) = match e.code {
        ErrorKind::TooLarge => (
            ParseErrorKind::TooDeeplyNested,
            format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
        ),
        ErrorKind::Not => (
            ParseErrorKind::Unsupported,
            format!("Unsupported syntax at position {position}"),
        ),
        ErrorKind::Eof => (
            ParseErrorKind::Incomplete,
            "Unexpected end of input".to_owned(),
        ),
        _ if e.input.trim().is_empty() => (
            ParseErrorKind::Incomplete,
            "Unexpected end of input".to_owned(),
        ),
        _ => (
            ParseErrorKind::InvalidSyntax,
            format!("Invalid syntax at position {position}"),
        ),
    };
    ParseError::with_context(kind, message, input, position, found)
}

fn line_comment(input: &str) -> IResult<&str, ()> {
    value((), pair(char(';'), take_till(|c| c == '\n'))).parse(input)
}

/// Whitespace and, when enabled, comments between data
fn skip_atmosphere(input: &str, config: ParseConfig) -> &str {
    let skipped = if config.handle_comments {
        value((), many0(alt((value((), multispace1), line_comment)))).parse(input)
    } else {
        value((), multispace0).parse(input)
    };
    skipped.map_or(input, |(rest, ())| rest)
}

/// Number or symbol. A token that reads as a number is a number.
fn parse_atom(input: &str) -> IResult<&str, Value> {
    let (rest, token) = take_while1(is_symbol_char).parse(input)?;
    if let Some(n) = parse_number_literal(token) {
        return Ok((rest, Value::number(n)));
    }
    if token == "." {
        return fail(input, ErrorKind::Char);
    }
    Ok((rest, Value::symbol(token)))
}

/// `#t`, `#f`, `#true`, `#false`, `#x` hex numbers and `#(` vectors
fn parse_hash(input: &str, config: ParseConfig, depth: usize) -> IResult<&str, Value> {
    let (rest, _) = char('#').parse(input)?;
    if rest.starts_with('(') {
        return parse_sequence(rest, ('(', ')'), Shape::Vector, config, depth);
    }

    let (after, name) = take_while(is_symbol_char).parse(rest)?;
    match name {
        "t" | "true" => Ok((after, Value::boolean(true))),
        "f" | "false" => Ok((after, Value::boolean(false))),
        _ if name.starts_with(['x', 'X']) => match parse_number_literal(&input[..=name.len()]) {
            Some(n) => Ok((after, Value::number(n))),
            None => fail(input, ErrorKind::HexDigit),
        },
        // character literals and every other `#` form
        _ => fail(input, ErrorKind::Not),
    }
}

/// Parse a string literal. Unknown escapes stand for the escaped character.
fn parse_string(input: &str) -> IResult<&str, Value> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut text = String::new();

    loop {
        let mut chars = remaining.chars();
        match chars.next() {
            Some('"') => return Ok((chars.as_str(), Value::string(text))),
            Some('\\') => match chars.next() {
                Some('n') => text.push('\n'),
                Some('t') => text.push('\t'),
                Some('r') => text.push('\r'),
                Some(other) => text.push(other),
                None => return fail(chars.as_str(), ErrorKind::Eof),
            },
            Some(ch) => text.push(ch),
            None => return fail(remaining, ErrorKind::Eof),
        }
        remaining = chars.as_str();
    }
}

/// `'x`, `` `x ``, `,x`, `,@x` expand to their two-element list forms
fn parse_quoted(input: &str, config: ParseConfig, depth: usize) -> IResult<&str, Value> {
    let (rest, name) = alt((
        value("unquote-splicing", tag(",@")),
        value("quote", char('\'')),
        value("quasiquote", char('`')),
        value("unquote", char(',')),
    ))
    .parse(input)?;
    let (rest, datum) = cut(|input| parse_datum(input, config, depth + 1)).parse(rest)?;
    Ok((rest, Value::list([Value::symbol(name), datum])))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Shape {
    /// Dotted tails allowed
    List,
    Vector,
}

/// A lone `.` followed by a delimiter
fn at_dot(input: &str) -> bool {
    input
        .strip_prefix('.')
        .is_some_and(|rest| rest.chars().next().is_none_or(|c| !is_symbol_char(c)))
}

/// Elements between `open` and `close`
fn parse_sequence(
    input: &str,
    (open, close): (char, char),
    shape: Shape,
    config: ParseConfig,
    depth: usize,
) -> IResult<&str, Value> {
    let (mut input, _) = char(open).parse(input)?;
    let mut items = Vec::new();

    loop {
        input = skip_atmosphere(input, config);
        if input.is_empty() {
            return fail(input, ErrorKind::Eof);
        }
        if let Some(rest) = input.strip_prefix(close) {
            let value = match shape {
                Shape::List => Value::list(items),
                Shape::Vector => Value::vector(items),
            };
            return Ok((rest, value));
        }
        if shape == Shape::List && !items.is_empty() && at_dot(input) {
            let (rest, tail) =
                cut(|input| parse_datum(input, config, depth + 1)).parse(&input[1..])?;
            let rest = skip_atmosphere(rest, config);
            if rest.is_empty() {
                return fail(rest, ErrorKind::Eof);
            }
            let (rest, _) = cut(char(close)).parse(rest)?;
            return Ok((rest, Value::list_with_tail(items, tail)));
        }
        let (rest, item) = cut(|input| parse_datum(input, config, depth + 1)).parse(input)?;
        items.push(item);
        input = rest;
    }
}

/// Parse one datum, skipping leading whitespace and comments
fn parse_datum(input: &str, config: ParseConfig, depth: usize) -> IResult<&str, Value> {
    if depth >= MAX_PARSE_DEPTH {
        return fail(input, ErrorKind::TooLarge);
    }
    let input = skip_atmosphere(input, config);
    if input.is_empty() {
        return Err(nom::Err::Error(NomError::new(input, ErrorKind::Eof)));
    }
    alt((
        |input| parse_quoted(input, config, depth),
        |input| parse_sequence(input, ('(', ')'), Shape::List, config, depth),
        |input| parse_sequence(input, ('[', ']'), Shape::Vector, config, depth),
        |input| parse_hash(input, config, depth),
        parse_string,
        parse_atom,
    ))
    .parse(input)
}

/// Parse exactly one datum from input with the default configuration.
pub fn parse_scheme(input: &str) -> Result<Value, Error> {
    parse_scheme_with_config(input, ParseConfig::default())
}

/// Parse exactly one datum; anything but whitespace and comments after it is
/// a `TrailingContent` error.
pub fn parse_scheme_with_config(input: &str, config: ParseConfig) -> Result<Value, Error> {
    let (rest, datum) =
        parse_datum(input, config, 0).map_err(|e| Error::ParseError(to_parse_error(input, e)))?;
    let rest = skip_atmosphere(rest, config);
    if rest.is_empty() {
        Ok(datum)
    } else {
        let position = input.len() - rest.len();
        Err(Error::ParseError(ParseError::with_context(
            ParseErrorKind::TrailingContent,
            format!("Unexpected remaining input at position {position}"),
            input,
            position,
            Some(rest.chars().take(10).collect()),
        )))
    }
}

/// Parse every top-level datum in `input`, in order.
pub fn parse_program(input: &str) -> Result<Vec<Value>, Error> {
    parse_program_with_config(input, ParseConfig::default())
}

pub fn parse_program_with_config(input: &str, config: ParseConfig) -> Result<Vec<Value>, Error> {
    let mut forms = Vec::new();
    let mut remaining = skip_atmosphere(input, config);
    while !remaining.is_empty() {
        let (rest, datum) = parse_datum(remaining, config, 0)
            .map_err(|e| Error::ParseError(to_parse_error(input, e)))?;
        forms.push(datum);
        remaining = skip_atmosphere(rest, config);
    }
    tracing::trace!(forms = forms.len(), "program read");
    Ok(forms)
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{nil, sym, val};

    /// Test result variants for comprehensive parsing tests
    #[derive(Debug)]
    enum ParseTestResult {
        Success(Value),           // Parsing should succeed with this value
        Printed(&'static str),    // Should succeed and print exactly like this
        Kind(ParseErrorKind),     // Parsing should fail with this kind
        AnyError,                 // Parsing should fail (any error)
    }
    use ParseTestResult::*;

    /// Helper for successful parse test cases
    fn success<T: Into<Value>>(value: T) -> ParseTestResult {
        Success(value.into())
    }

    fn quoted(name: &str, datum: Value) -> ParseTestResult {
        Success(val(vec![sym(name), datum]))
    }

    /// Run parse tests with round-trip validation of the printed form
    fn run_parse_tests(test_cases: Vec<(&str, ParseTestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let test_id = format!("Parse test #{} ({input:?})", i + 1);
            let result = parse_scheme(input);

            match (result, expected) {
                (Ok(actual), Success(expected_val)) => {
                    assert_eq!(actual, *expected_val, "{test_id}: value mismatch");

                    // display -> parse -> display should be identical
                    let displayed = format!("{actual}");
                    let reparsed = parse_scheme(&displayed).unwrap_or_else(|e| {
                        panic!("{test_id}: round-trip parse failed for '{displayed}': {e:?}")
                    });
                    assert_eq!(
                        displayed,
                        format!("{reparsed}"),
                        "{test_id}: round-trip display mismatch"
                    );
                }
                (Ok(actual), Printed(expected_text)) => {
                    assert_eq!(actual.to_string(), *expected_text, "{test_id}");
                }
                (Err(_), AnyError) => {}
                (Err(Error::ParseError(err)), Kind(kind)) => {
                    assert_eq!(err.kind, *kind, "{test_id}: {err}");
                }
                (Err(err), Kind(kind)) => {
                    panic!("{test_id}: expected parse error of kind {kind:?}, got {err:?}");
                }
                (Ok(actual), AnyError | Kind(_)) => {
                    panic!("{test_id}: expected error, got {actual:?}");
                }
                (Err(err), Success(_) | Printed(_)) => {
                    panic!("{test_id}: expected success, got error {err:?}");
                }
            }
        }
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_parser_comprehensive() {
        let test_cases = vec![
            // ===== NUMBER PARSING =====
            ("42", success(42)),
            ("-5", success(-5)),
            ("+7", success(7)),
            ("0", success(0)),
            ("3.14", success(3.14)),
            ("-0.5", success(-0.5)),
            (".5", success(0.5)),
            ("1e3", success(1000)),
            ("2.5e-1", success(0.25)),
            // Hexadecimal numbers
            ("#x1A", success(26)),
            ("#X1a", success(26)),
            ("#xff", success(255)),
            ("#x-10", success(-16)),
            ("#xG", Kind(ParseErrorKind::InvalidSyntax)),
            ("#x", Kind(ParseErrorKind::InvalidSyntax)),
            // Tokens that do not read as numbers are symbols
            ("123abc", success(sym("123abc"))),
            ("1+", success(sym("1+"))),
            ("...", success(sym("..."))),
            // ===== SYMBOL PARSING =====
            ("foo", success(sym("foo"))),
            ("+", success(sym("+"))),
            ("-", success(sym("-"))),
            (">=", success(sym(">="))),
            ("set-car!", success(sym("set-car!"))),
            ("null?", success(sym("null?"))),
            ("string->symbol", success(sym("string->symbol"))),
            ("a.b", success(sym("a.b"))),
            ("%$&:^_~@", success(sym("%$&:^_~@"))),
            ("var123", success(sym("var123"))),
            ("λ", success(sym("λ"))),
            // ===== BOOLEAN PARSING =====
            ("#t", success(true)),
            ("#f", success(false)),
            ("#true", success(true)),
            ("#false", success(false)),
            ("#T", Kind(ParseErrorKind::Unsupported)),
            // ===== UNSUPPORTED HASH SYNTAX =====
            ("#\\a", Kind(ParseErrorKind::Unsupported)),
            ("#\\space", Kind(ParseErrorKind::Unsupported)),
            ("#u8(1 2)", Kind(ParseErrorKind::Unsupported)),
            ("#", Kind(ParseErrorKind::Unsupported)),
            // ===== STRING PARSING =====
            ("\"hello\"", success("hello")),
            ("\"hello world\"", success("hello world")),
            (r#""hello\nworld""#, success("hello\nworld")),
            (r#""tab\there""#, success("tab\there")),
            (r#""carriage\rreturn""#, success("carriage\rreturn")),
            (r#""quote\"test""#, success("quote\"test")),
            (r#""backslash\\test""#, success("backslash\\test")),
            // Unknown escapes stand for the escaped character
            (r#""other\qchar""#, success("otherqchar")),
            ("\"\"", success("")),
            ("\"a ; not a comment\"", success("a ; not a comment")),
            (r#""unterminated"#, Kind(ParseErrorKind::Incomplete)),
            (r#""unterminated\"#, Kind(ParseErrorKind::Incomplete)),
            // ===== LIST PARSING =====
            ("()", success(nil())),
            ("(   )", success(nil())),
            ("(42)", success([42])),
            ("(1 2 3)", success([1, 2, 3])),
            (
                "(1 hello \"world\" #t)",
                success(vec![val(1), sym("hello"), val("world"), val(true)]),
            ),
            ("((1 2) (3 4))", success([[1, 2], [3, 4]])),
            ("(((1)))", success([val([val([val(1)])])])),
            ("( 1   2\t\n3 )", success([1, 2, 3])),
            // Dotted tails
            ("(1 . 2)", Success(Value::cons(val(1), val(2)))),
            (
                "(a b . c)",
                Success(Value::list_with_tail(vec![sym("a"), sym("b")], sym("c"))),
            ),
            ("(1 . (2 3))", success([1, 2, 3])),
            ("(. 1)", Kind(ParseErrorKind::InvalidSyntax)),
            ("(1 . 2 3)", Kind(ParseErrorKind::InvalidSyntax)),
            ("(1 .", Kind(ParseErrorKind::Incomplete)),
            ("(1 . 2", Kind(ParseErrorKind::Incomplete)),
            // ===== VECTORS =====
            ("#(1 2 3)", Printed("#(1 2 3)")),
            ("#()", Printed("#()")),
            ("[1 (2) \"x\"]", Printed("#(1 (2) \"x\")")),
            ("#(1 . 2)", Kind(ParseErrorKind::InvalidSyntax)),
            ("#(1 2", Kind(ParseErrorKind::Incomplete)),
            ("[1 2)", Kind(ParseErrorKind::InvalidSyntax)),
            // ===== QUOTE PARSING =====
            ("'foo", quoted("quote", sym("foo"))),
            ("'(1 2 3)", quoted("quote", val([1, 2, 3]))),
            ("'()", quoted("quote", nil())),
            ("''a", quoted("quote", val(vec![sym("quote"), sym("a")]))),
            (
                "`(a ,b)",
                quoted(
                    "quasiquote",
                    val(vec![sym("a"), val(vec![sym("unquote"), sym("b")])]),
                ),
            ),
            (",@xs", quoted("unquote-splicing", sym("xs"))),
            ("(quote foo)", quoted("quote", sym("foo"))),
            ("'", Kind(ParseErrorKind::Incomplete)),
            // ===== WHITESPACE AND COMMENTS =====
            ("  42  ", success(42)),
            ("\t#t\n", success(true)),
            ("; leading comment\n42", success(42)),
            ("42 ; trailing comment", success(42)),
            ("(1 ; inside\n 2)", success([1, 2])),
            ("(1 ; unterminated list", Kind(ParseErrorKind::Incomplete)),
            // ===== GENERAL ERROR CASES =====
            ("(1 2 3", Kind(ParseErrorKind::Incomplete)),
            ("((1 2)", Kind(ParseErrorKind::Incomplete)),
            ("(+ 1 (- 2", Kind(ParseErrorKind::Incomplete)),
            ("", Kind(ParseErrorKind::Incomplete)),
            ("   ", Kind(ParseErrorKind::Incomplete)),
            (")", Kind(ParseErrorKind::InvalidSyntax)),
            (".", Kind(ParseErrorKind::InvalidSyntax)),
            ("1 2", Kind(ParseErrorKind::TrailingContent)),
            ("1 2 3)", Kind(ParseErrorKind::TrailingContent)),
            ("(1 2))", Kind(ParseErrorKind::TrailingContent)),
            ("(+ 1 2) (+ 3 4)", Kind(ParseErrorKind::TrailingContent)),
        ];

        run_parse_tests(test_cases);
    }

    #[test]
    fn test_symbols_are_fresh() {
        let list = parse_scheme("(a a)").unwrap();
        let first = list.car();
        let second = list.cdr().car();
        assert!(first.is_eqv(&second));
        assert!(!first.is_eq(&second));
    }

    #[test]
    fn test_comments_can_be_disabled() {
        let config = ParseConfig {
            handle_comments: false,
        };
        assert!(parse_scheme_with_config("42", config).is_ok());
        let err = parse_scheme_with_config("; note\n42", config).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Parse);
        assert!(parse_scheme_with_config("\"; fine\"", config).is_ok());
    }

    #[test]
    fn test_parse_program() {
        let forms = parse_program("(define x 1) ; comment\n x\n'(a b)").unwrap();
        assert_eq!(forms.len(), 3);
        assert_eq!(forms[1], sym("x"));
        assert!(parse_program("").unwrap().is_empty());
        assert!(parse_program("  ; only a comment").unwrap().is_empty());

        let err = parse_program("(define x 1) (oops").unwrap_err();
        assert!(err.is_incomplete_input());
    }

    #[test]
    fn test_error_context() {
        let Error::ParseError(err) = parse_scheme("(list 1 2) )").unwrap_err() else {
            panic!("expected a parse error");
        };
        assert_eq!(err.kind, ParseErrorKind::TrailingContent);
        assert_eq!(err.found.as_deref(), Some(")"));
        assert!(err.context.unwrap().contains("(list 1 2)"));

        let Error::ParseError(err) = parse_scheme("#\\x").unwrap_err() else {
            panic!("expected a parse error");
        };
        assert_eq!(err.found.as_deref(), Some("#\\x"));
    }

    #[test]
    fn test_parser_depth_limits() {
        let parens_under_limit = format!(
            "{}unbound{}",
            "(".repeat(MAX_PARSE_DEPTH - 1),
            ")".repeat(MAX_PARSE_DEPTH - 1)
        );
        let quotes_under_limit = format!("{}unbound", "'".repeat(MAX_PARSE_DEPTH - 1));
        let deep_parens_at_limit = format!(
            "{}1{}",
            "(".repeat(MAX_PARSE_DEPTH),
            ")".repeat(MAX_PARSE_DEPTH)
        );
        let deep_quotes_at_limit = format!("{}a", "'".repeat(MAX_PARSE_DEPTH));
        let deep_vectors_at_limit = format!("{}]", "[".repeat(MAX_PARSE_DEPTH + 1));

        run_parse_tests(vec![
            (
                deep_parens_at_limit.as_str(),
                Kind(ParseErrorKind::TooDeeplyNested),
            ),
            (
                deep_quotes_at_limit.as_str(),
                Kind(ParseErrorKind::TooDeeplyNested),
            ),
            (
                deep_vectors_at_limit.as_str(),
                Kind(ParseErrorKind::TooDeeplyNested),
            ),
        ]);

        assert!(
            parse_scheme(&parens_under_limit).is_ok(),
            "Parens just under depth limit should parse successfully"
        );
        assert!(
            parse_scheme(&quotes_under_limit).is_ok(),
            "Quotes just under depth limit should parse successfully"
        );
    }
}
