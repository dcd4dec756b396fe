//! S-expression reader
//!
//! Turns text into substrate values so instruction trees can be written by
//! hand:
//!
//! ```
//! use lispvm::Vm;
//! use lispvm::reader::parse_sexpr;
//! use lispvm::value::val;
//!
//! let tree = parse_sexpr("((get-global +) (push 5) (push 3) (call 2))").unwrap();
//! assert_eq!(Vm::new().run_expr(tree).unwrap(), val(8));
//! ```
//!
//! Supported syntax: integers with an optional sign, `#t` / `#f`, symbols,
//! proper lists, dotted pairs `(a . b)`, `'x` for `(quote x)`, and `;` line
//! comments. This is a reader only; nothing here compiles source code.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1, multispace1, not_line_ending},
    combinator::{cut, opt, recognize, value},
    error::ErrorKind,
    multi::many0_count,
    sequence::{delimited, pair, preceded},
};

use crate::value::{NumberType, Value, sym};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Characters allowed in symbols besides alphanumerics
const SYMBOL_SPECIAL_CHARS: &str = "+-*/<>=!?_$%&:.^~@";

fn is_symbol_char(c: char) -> bool {
    c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c)
}

/// Valid: not the lone dot, no leading digit, no sign-then-digit prefix
fn is_valid_symbol(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        None => false,
        Some(first) if first.is_ascii_digit() => false,
        Some('+' | '-') if chars.next().is_some_and(|c| c.is_ascii_digit()) => false,
        Some(_) => name != ".",
    }
}

fn failure<T>(input: &str, code: ErrorKind) -> IResult<&str, T> {
    Err(nom::Err::Failure(nom::error::Error::new(input, code)))
}

fn backtrack<T>(input: &str, code: ErrorKind) -> IResult<&str, T> {
    Err(nom::Err::Error(nom::error::Error::new(input, code)))
}

/// Skip whitespace and `;` comments
fn ws(input: &str) -> IResult<&str, ()> {
    value(
        (),
        many0_count(alt((
            multispace1,
            recognize(pair(char(';'), not_line_ending)),
        ))),
    )
    .parse(input)
}

/// Parse an integer with optional sign
fn parse_number(input: &str) -> IResult<&str, Value> {
    let (rest, digits) =
        recognize(pair(opt(alt((char('-'), char('+')))), digit1)).parse(input)?;

    // "12abc" is not a number followed by a symbol
    if rest.starts_with(is_symbol_char) {
        return backtrack(input, ErrorKind::Verify);
    }

    match digits.parse::<NumberType>() {
        Ok(n) => Ok((rest, Value::Number(n))),
        Err(_) => failure(input, ErrorKind::Digit),
    }
}

/// Parse a boolean (#t or #f)
fn parse_bool(input: &str) -> IResult<&str, Value> {
    let (rest, b) = alt((value(true, tag("#t")), value(false, tag("#f")))).parse(input)?;
    if rest.starts_with(is_symbol_char) {
        return backtrack(input, ErrorKind::Tag);
    }
    Ok((rest, Value::Bool(b)))
}

/// Parse a symbol (identifier)
fn parse_symbol(input: &str) -> IResult<&str, Value> {
    let (rest, name) = take_while1(is_symbol_char).parse(input)?;
    if is_valid_symbol(name) {
        Ok((rest, sym(name)))
    } else {
        backtrack(input, ErrorKind::Alpha)
    }
}

/// Parse quoted expression ('expr -> (quote expr))
fn parse_quote(input: &str, depth: usize) -> IResult<&str, Value> {
    let (input, _) = char('\'').parse(input)?;
    let (input, quoted) = cut(preceded(ws, |i| parse_datum(i, depth + 1))).parse(input)?;
    Ok((input, Value::list([sym("quote"), quoted])))
}

/// Parse a proper or dotted list. Once the opening paren is consumed, any
/// failure inside is final.
fn parse_list(input: &str, depth: usize) -> IResult<&str, Value> {
    let (mut input, _) = char('(').parse(input)?;
    let mut items = Vec::new();

    loop {
        let (rest, _) = ws(input)?;
        if rest.is_empty() {
            return failure(rest, ErrorKind::Eof);
        }
        if let Some(rest) = rest.strip_prefix(')') {
            return Ok((rest, Value::list(items)));
        }
        if let Some(after_dot) = rest.strip_prefix('.')
            && !after_dot.starts_with(is_symbol_char)
        {
            if items.is_empty() {
                return failure(rest, ErrorKind::Char);
            }
            let (after_tail, tail) =
                cut(preceded(ws, |i| parse_datum(i, depth + 1))).parse(after_dot)?;
            let (after_tail, _) = ws(after_tail)?;
            return match after_tail.strip_prefix(')') {
                Some(rest) => Ok((rest, Value::list_with_tail(items, tail))),
                None if after_tail.is_empty() => failure(after_tail, ErrorKind::Eof),
                None => failure(after_tail, ErrorKind::Char),
            };
        }

        let (rest, item) = cut(|i| parse_datum(i, depth + 1)).parse(rest)?;
        items.push(item);
        input = rest;
    }
}

/// Parse one datum at the current position (no leading whitespace)
fn parse_datum(input: &str, depth: usize) -> IResult<&str, Value> {
    if depth >= MAX_PARSE_DEPTH {
        return failure(input, ErrorKind::TooLarge);
    }
    alt((
        |i| parse_quote(i, depth),
        |i| parse_list(i, depth),
        parse_number,
        parse_bool,
        parse_symbol,
    ))
    .parse(input)
}

/// Convert nom parsing errors to structured parse errors
fn convert_error(input: &str, error: nom::Err<nom::error::Error<&str>>) -> Error {
    let parse_error = match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let offset = input.len().saturating_sub(e.input.len());
            let (kind, message) = match e.code {
                ErrorKind::TooLarge => (
                    ParseErrorKind::TooDeeplyNested,
                    format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
                ),
                _ if e.input.is_empty() => (
                    ParseErrorKind::Incomplete,
                    "Unexpected end of input".to_owned(),
                ),
                ErrorKind::Digit => (
                    ParseErrorKind::InvalidSyntax,
                    format!("Integer literal out of range at position {offset}"),
                ),
                ErrorKind::Char => (
                    ParseErrorKind::InvalidSyntax,
                    format!("Malformed dotted pair at position {offset}"),
                ),
                _ => {
                    let near: String = e.input.chars().take(10).collect();
                    (
                        ParseErrorKind::InvalidSyntax,
                        format!("Invalid syntax near '{near}'"),
                    )
                }
            };
            ParseError::with_context(kind, message, input, offset)
        }
        nom::Err::Incomplete(_) => {
            ParseError::from_message(ParseErrorKind::Incomplete, "Incomplete input")
        }
    };
    Error::ParseError(parse_error)
}

/// Parse exactly one datum, allowing surrounding whitespace and comments.
pub fn parse_sexpr(input: &str) -> Result<Value, Error> {
    match delimited(ws, |i| parse_datum(i, 0), ws).parse(input) {
        Ok(("", value)) => Ok(value),
        Ok((remaining, _)) => Err(Error::ParseError(ParseError::with_context(
            ParseErrorKind::TrailingContent,
            "Unexpected remaining input",
            input,
            input.len() - remaining.len(),
        ))),
        Err(e) => Err(convert_error(input, e)),
    }
}

/// Parse a sequence of data and return them as one list. An instruction
/// tree can be written as its instructions one after another:
///
/// ```
/// use lispvm::reader::parse_program;
///
/// let tree = parse_program("(push #t) ; test\n(if ((push 1)) ((push 2)))").unwrap();
/// assert_eq!(tree.to_string(), "((push #t) (if ((push 1)) ((push 2))))");
/// ```
pub fn parse_program(input: &str) -> Result<Value, Error> {
    let mut forms = Vec::new();
    let mut rest = input;
    loop {
        let (after_ws, _) = ws(rest).map_err(|e| convert_error(input, e))?;
        if after_ws.is_empty() {
            break;
        }
        let (after, form) = parse_datum(after_ws, 0).map_err(|e| convert_error(input, e))?;
        forms.push(form);
        rest = after;
    }
    Ok(Value::list(forms))
}
