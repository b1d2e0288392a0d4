//! Caps string parser using winnow.
//!
//! # Syntax
//!
//! ```text
//! ANY
//! EMPTY
//! video/x-raw, width=(int)[ 1, 1920 ], format=(string){ I420, NV12 }; image/jpeg
//! ```
//!
//! - Structures are separated by `;`, fields by `,`
//! - A field value may carry a type annotation: `(int)`, `(double)`,
//!   `(fraction)`, `(string)`, `(boolean)` (short forms `i`, `d`, `f`, `s`, `b`)
//! - Without an annotation the type is inferred from the text
//! - `[ min, max ]` is an inclusive range, `{ a, b }` a list

use winnow::Parser;
use winnow::ascii::multispace0;
use winnow::combinator::{alt, delimited, opt, preceded, separated};
use winnow::error::ContextError;
use winnow::token::{any, none_of, take_while};

use super::structure::Structure;
use super::value::{CapsValue, Fraction, Value, ValueType, is_bare_char};
use super::Caps;
use crate::error::{Error, Result};

type WResult<T> = std::result::Result<T, ContextError>;

/// A scalar token before typing.
enum Token {
    Quoted(String),
    Bare(String),
}

/// Parse a caps description.
pub(crate) fn parse_caps(input: &str) -> Result<Caps> {
    caps.parse(input.trim())
        .map_err(|e| Error::CapsParse(format!("{input:?}: {e}")))
}

fn caps(input: &mut &str) -> WResult<Caps> {
    alt((
        "ANY".map(|_| Caps::new_any()),
        "EMPTY".map(|_| Caps::new_empty()),
        structure_list,
    ))
    .parse_next(input)
}

fn structure_list(input: &mut &str) -> WResult<Caps> {
    let structures: Vec<Structure> = separated(1.., structure, sep(';')).parse_next(input)?;
    let _ = opt(sep(';')).parse_next(input)?;
    multispace0.parse_next(input)?;
    Ok(Caps::from_structures(structures))
}

/// Whitespace, a separator character, whitespace.
fn sep<'a>(c: char) -> impl Parser<&'a str, (), ContextError> {
    (multispace0, c, multispace0).void()
}

fn structure(input: &mut &str) -> WResult<Structure> {
    let name: &str = take_while(1.., is_bare_char).parse_next(input)?;
    let fields: Vec<(String, CapsValue)> =
        winnow::combinator::repeat(0.., preceded(sep(','), field)).parse_next(input)?;

    let mut structure = Structure::new(name);
    for (name, value) in fields {
        structure.set(name, value);
    }
    Ok(structure)
}

fn field(input: &mut &str) -> WResult<(String, CapsValue)> {
    let name: &str = take_while(1.., |c: char| c.is_alphanumeric() || c == '_' || c == '-')
        .parse_next(input)?;
    sep('=').parse_next(input)?;
    let hint = opt(type_annotation).parse_next(input)?;
    multispace0.parse_next(input)?;
    let value = constraint(hint).parse_next(input)?;
    Ok((name.to_string(), value))
}

fn type_annotation(input: &mut &str) -> WResult<ValueType> {
    let name: &str = delimited(
        ('(', multispace0),
        take_while(1.., |c: char| c.is_ascii_alphabetic()),
        (multispace0, ')'),
    )
    .parse_next(input)?;
    match name {
        "int" | "i" => Ok(ValueType::Int),
        "double" | "d" | "float" | "f" => Ok(ValueType::Double),
        "fraction" => Ok(ValueType::Fraction),
        "string" | "str" | "s" => Ok(ValueType::Str),
        "boolean" | "bool" | "b" => Ok(ValueType::Bool),
        _ => Err(ContextError::new()),
    }
}

fn constraint<'a>(hint: Option<ValueType>) -> impl Parser<&'a str, CapsValue, ContextError> {
    move |input: &mut &'a str| {
        alt((
            range(hint),
            list(hint),
            scalar(hint).map(CapsValue::Fixed),
        ))
        .parse_next(input)
    }
}

fn range<'a>(hint: Option<ValueType>) -> impl Parser<&'a str, CapsValue, ContextError> {
    move |input: &mut &'a str| {
        let (min, max) = delimited(
            ('[', multispace0),
            (scalar(hint), preceded(sep(','), scalar(hint))),
            (multispace0, ']'),
        )
        .parse_next(input)?;
        if !min.value_type().is_ordered() || min.value_type() != max.value_type() {
            return Err(ContextError::new());
        }
        Ok(CapsValue::Range { min, max })
    }
}

fn list<'a>(hint: Option<ValueType>) -> impl Parser<&'a str, CapsValue, ContextError> {
    move |input: &mut &'a str| {
        let items: Vec<CapsValue> = delimited(
            ('{', multispace0),
            separated(
                1..,
                alt((range(hint), scalar(hint).map(CapsValue::Fixed))),
                sep(','),
            ),
            (multispace0, '}'),
        )
        .parse_next(input)?;
        Ok(match items.len() {
            1 => items.into_iter().next().unwrap_or(CapsValue::List(Vec::new())),
            _ => CapsValue::List(items),
        })
    }
}

fn scalar<'a>(hint: Option<ValueType>) -> impl Parser<&'a str, Value, ContextError> {
    move |input: &mut &'a str| {
        let token = alt((
            quoted.map(Token::Quoted),
            take_while(1.., is_bare_char).map(|s: &str| Token::Bare(s.to_string())),
        ))
        .parse_next(input)?;
        typed_value(token, hint).ok_or_else(ContextError::new)
    }
}

fn quoted(input: &mut &str) -> WResult<String> {
    let _ = '"'.parse_next(input)?;
    let mut out = String::new();
    loop {
        let c: WResult<char> = alt((preceded('\\', any), none_of('"'))).parse_next(input);
        match c {
            Ok(c) => out.push(c),
            Err(_) => break,
        }
    }
    let _ = '"'.parse_next(input)?;
    Ok(out)
}

/// Convert a raw token to a value of the annotated (or inferred) type.
fn typed_value(token: Token, hint: Option<ValueType>) -> Option<Value> {
    let (text, quoted) = match token {
        Token::Quoted(s) => (s, true),
        Token::Bare(s) => (s, false),
    };
    match hint {
        Some(ValueType::Str) => Some(Value::Str(text)),
        Some(ValueType::Int) => text.parse().ok().map(Value::Int),
        Some(ValueType::Double) => text.parse().ok().map(Value::Double),
        Some(ValueType::Fraction) => parse_fraction(&text).map(Value::Fraction),
        Some(ValueType::Bool) => parse_bool(&text).map(Value::Bool),
        None if quoted => Some(Value::Str(text)),
        None => Some(infer_value(text)),
    }
}

fn infer_value(text: String) -> Value {
    if let Some(b) = parse_bool(&text).filter(|_| !text.starts_with(|c: char| c.is_ascii_digit())) {
        return Value::Bool(b);
    }
    if let Ok(i) = text.parse::<i64>() {
        return Value::Int(i);
    }
    if text.contains('/') {
        if let Some(f) = parse_fraction(&text) {
            return Value::Fraction(f);
        }
    }
    if let Ok(d) = text.parse::<f64>() {
        return Value::Double(d);
    }
    Value::Str(text)
}

fn parse_fraction(text: &str) -> Option<Fraction> {
    match text.split_once('/') {
        Some((n, d)) => {
            let den: i32 = d.trim().parse().ok()?;
            (den != 0).then_some(Fraction::new(n.trim().parse().ok()?, den))
        }
        None => Some(Fraction::new(text.trim().parse().ok()?, 1)),
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}
