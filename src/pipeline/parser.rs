//! Launch description parser using winnow.
//!
//! Grammar for launch lines:
//!
//! ```text
//! datasrc num-buffers=3 ! identity ! nullsink
//! appsrc ! "video/x-raw, width=(int)320" ! appsink name=out
//! datasrc ! tee name=t  t. ! queue ! nullsink  t. ! queue ! nullsink
//! ```
//!
//! # Syntax
//!
//! - Items of a chain are separated by `!`; chains are separated by whitespace
//! - An element is a type name followed by `name=value` properties
//! - A caps item is a media type (`type/subtype`) with optional fields,
//!   running up to the next `!`, or any quoted string; it becomes a capsfilter
//! - `name.` refers to an element defined elsewhere, `name.pad` to one of its
//!   pads
//! - Values can be quoted strings, numbers, booleans or bare words

use winnow::Parser;
use winnow::ascii::{alpha1, digit1, multispace0, multispace1};
use winnow::combinator::{alt, delimited, opt, repeat, separated};
use winnow::error::ContextError;
use winnow::token::{take_till, take_while};

use crate::element::PropertyValue;
use crate::error::{Error, Result};

type WResult<T> = std::result::Result<T, ContextError>;

/// A parsed element with its type and properties.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedElement {
    /// The element type name (e.g., "datasrc", "identity").
    pub factory: String,
    /// Properties as key-value pairs, in order.
    pub properties: Vec<(String, PropertyValue)>,
}

impl ParsedElement {
    /// Value of the `name` property, if given.
    pub fn instance_name(&self) -> Option<String> {
        self.properties
            .iter()
            .find(|(key, _)| key == "name")
            .map(|(_, value)| value.as_string())
    }
}

/// One item of a chain.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedItem {
    /// A new element.
    Element(ParsedElement),
    /// A caps string, filtered by a capsfilter.
    Caps(String),
    /// A reference to a named element, optionally to one of its pads.
    Reference {
        /// Element name.
        element: String,
        /// Pad name.
        pad: Option<String>,
    },
}

/// Items linked one after the other.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedChain {
    /// Items in order from upstream to downstream.
    pub items: Vec<ParsedItem>,
}

/// A parsed launch description.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPipeline {
    /// Chains in order of appearance.
    pub chains: Vec<ParsedChain>,
}

/// Parse a launch description.
///
/// # Example
///
/// ```rust
/// use mediaflow::pipeline::parser::{ParsedItem, parse_description};
///
/// let parsed = parse_description("datasrc num-buffers=10 ! identity ! nullsink").unwrap();
/// assert_eq!(parsed.chains[0].items.len(), 3);
/// assert!(matches!(&parsed.chains[0].items[0], ParsedItem::Element(e) if e.factory == "datasrc"));
/// ```
pub fn parse_description(input: &str) -> Result<ParsedPipeline> {
    description
        .parse(input.trim())
        .map_err(|e| Error::Parse(format!("{input:?}: {e}")))
}

/// Parse a complete description.
fn description(input: &mut &str) -> WResult<ParsedPipeline> {
    let chains = separated(1.., chain, multispace1).parse_next(input)?;

    // Trailing garbage is an error.
    multispace0.parse_next(input)?;
    if !input.is_empty() {
        return Err(ContextError::new());
    }

    Ok(ParsedPipeline { chains })
}

/// Parse a chain of items.
fn chain(input: &mut &str) -> WResult<ParsedChain> {
    let items = separated(1.., item, link_separator).parse_next(input)?;
    Ok(ParsedChain { items })
}

/// Parse one item; caps and references are tried before elements.
fn item(input: &mut &str) -> WResult<ParsedItem> {
    alt((
        quoted_string.map(ParsedItem::Caps),
        bare_caps.map(ParsedItem::Caps),
        reference,
        element.map(ParsedItem::Element),
    ))
    .parse_next(input)
}

/// Parse an element (type + optional properties).
fn element(input: &mut &str) -> WResult<ParsedElement> {
    let factory: &str = identifier.parse_next(input)?;
    let properties: Vec<(String, PropertyValue)> = repeat(0.., property).parse_next(input)?;

    Ok(ParsedElement {
        factory: factory.to_string(),
        properties,
    })
}

/// Parse `name.` or `name.pad`.
fn reference(input: &mut &str) -> WResult<ParsedItem> {
    let (element, _, pad) = (identifier, '.', opt(identifier)).parse_next(input)?;
    Ok(ParsedItem::Reference {
        element: element.to_string(),
        pad: pad.map(str::to_string),
    })
}

/// Parse unquoted caps: a media type and everything up to the next `!`.
fn bare_caps(input: &mut &str) -> WResult<String> {
    let text: &str = (identifier, '/', take_till(0.., '!'))
        .take()
        .parse_next(input)?;
    Ok(text.trim_end().to_string())
}

/// The `!` between two elements.
fn link_separator(input: &mut &str) -> WResult<()> {
    let _ = multispace0.parse_next(input)?;
    let _ = '!'.parse_next(input)?;
    let _ = multispace0.parse_next(input)?;
    Ok(())
}

/// Parse an identifier (element type, element name or property name).
fn identifier<'a>(input: &mut &'a str) -> WResult<&'a str> {
    (
        alt((alpha1::<_, ContextError>, "_")),
        take_while(0.., |c: char| c.is_alphanumeric() || c == '_' || c == '-'),
    )
        .take()
        .parse_next(input)
}

/// `key=value` after an element name.
fn property(input: &mut &str) -> WResult<(String, PropertyValue)> {
    // Only `ident =` is a property; anything else leaves the input
    // untouched for the element-name parser.
    let checkpoint = *input;
    let _ = multispace1.parse_next(input)?;

    let key: &str = match identifier.parse_next(input) {
        Ok(k) => k,
        Err(_) => {
            *input = checkpoint;
            return Err(ContextError::new());
        }
    };

    let _ = multispace0.parse_next(input)?;

    if input.starts_with('=') {
        let _ = '='.parse_next(input)?;
    } else {
        // Bare word, rewind.
        *input = checkpoint;
        return Err(ContextError::new());
    }

    let _ = multispace0.parse_next(input)?;
    let value = property_value.parse_next(input)?;

    Ok((key.to_string(), value))
}

/// Typed property value, tried from most to least specific.
fn property_value(input: &mut &str) -> WResult<PropertyValue> {
    alt((
        quoted_string.map(PropertyValue::String),
        boolean.map(PropertyValue::Bool),
        float.map(PropertyValue::Float),
        integer.map(PropertyValue::Integer),
        bare_string.map(PropertyValue::String),
    ))
    .parse_next(input)
}

/// Single or double quoted text.
fn quoted_string(input: &mut &str) -> WResult<String> {
    alt((
        delimited('"', take_till(0.., '"'), '"'),
        delimited('\'', take_till(0.., '\''), '\''),
    ))
    .map(|s: &str| s.to_string())
    .parse_next(input)
}

/// Parse a boolean that is not the prefix of a longer word.
fn boolean(input: &mut &str) -> WResult<bool> {
    let value = alt((
        "true".map(|_| true),
        "false".map(|_| false),
        "yes".map(|_| true),
        "no".map(|_| false),
    ))
    .parse_next(input)?;
    if input.starts_with(|c: char| !c.is_whitespace() && c != '!') {
        return Err(ContextError::new());
    }
    Ok(value)
}

/// Parse an integer.
fn integer(input: &mut &str) -> WResult<i64> {
    let negative = opt('-').parse_next(input)?;
    let digits: &str = digit1.parse_next(input)?;

    // Make sure this is the whole value (no decimal point or suffix follows)
    if input.starts_with(|c: char| !c.is_whitespace() && c != '!') {
        return Err(ContextError::new());
    }

    let value: i64 = digits.parse().map_err(|_| ContextError::new())?;

    Ok(if negative.is_some() { -value } else { value })
}

/// Parse a float.
fn float(input: &mut &str) -> WResult<f64> {
    let text: &str = (opt('-'), digit1, '.', digit1).take().parse_next(input)?;
    text.parse().map_err(|_| ContextError::new())
}

/// Unquoted text up to whitespace or `!`.
fn bare_string(input: &mut &str) -> WResult<String> {
    take_while(1.., |c: char| !c.is_whitespace() && c != '!' && c != '=')
        .map(|s: &str| s.to_string())
        .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elements(parsed: &ParsedPipeline) -> Vec<&ParsedElement> {
        parsed
            .chains
            .iter()
            .flat_map(|c| &c.items)
            .filter_map(|item| match item {
                ParsedItem::Element(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_parse_simple_element() {
        let result = parse_description("nullsink").unwrap();
        let elements = elements(&result);
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].factory, "nullsink");
        assert!(elements[0].properties.is_empty());
    }

    #[test]
    fn test_parse_element_with_property() {
        let result = parse_description("datasrc num-buffers=100").unwrap();
        let elements = elements(&result);
        assert_eq!(elements[0].properties.len(), 1);
        assert_eq!(elements[0].properties[0].0, "num-buffers");
        assert_eq!(elements[0].properties[0].1, PropertyValue::Integer(100));
    }

    #[test]
    fn test_parse_chain() {
        let result = parse_description("datasrc ! identity ! nullsink").unwrap();
        assert_eq!(result.chains.len(), 1);
        let names: Vec<_> = elements(&result).iter().map(|e| e.factory.clone()).collect();
        assert_eq!(names, vec!["datasrc", "identity", "nullsink"]);
    }

    #[test]
    fn test_parse_quoted_and_typed_values() {
        let result =
            parse_description(r#"appsrc stream-id="a b" rate=1.5 offset=-100 live=true"#).unwrap();
        let props = &elements(&result)[0].properties;
        assert_eq!(props[0].1, PropertyValue::String("a b".to_string()));
        assert_eq!(props[1].1, PropertyValue::Float(1.5));
        assert_eq!(props[2].1, PropertyValue::Integer(-100));
        assert_eq!(props[3].1, PropertyValue::Bool(true));
    }

    #[test]
    fn test_bare_word_starting_with_keyword() {
        let result = parse_description("queue leaky=downstream mode=none2").unwrap();
        let props = &elements(&result)[0].properties;
        assert_eq!(props[0].1, PropertyValue::String("downstream".to_string()));
        assert_eq!(props[1].1, PropertyValue::String("none2".to_string()));
    }

    #[test]
    fn test_parse_bare_caps() {
        let result =
            parse_description("appsrc ! video/x-raw, width=(int)[1, 10] ! appsink").unwrap();
        let items = &result.chains[0].items;
        assert_eq!(items.len(), 3);
        assert_eq!(
            items[1],
            ParsedItem::Caps("video/x-raw, width=(int)[1, 10]".to_string())
        );
    }

    #[test]
    fn test_parse_quoted_caps() {
        let result = parse_description(r#"appsrc ! "audio/x-raw, rate=48000" ! appsink"#).unwrap();
        assert_eq!(
            result.chains[0].items[1],
            ParsedItem::Caps("audio/x-raw, rate=48000".to_string())
        );
    }

    #[test]
    fn test_parse_references() {
        let result =
            parse_description("datasrc ! tee name=t  t. ! queue ! nullsink  t.src_1 ! nullsink")
                .unwrap();
        assert_eq!(result.chains.len(), 3);
        assert_eq!(
            result.chains[1].items[0],
            ParsedItem::Reference {
                element: "t".to_string(),
                pad: None
            }
        );
        assert_eq!(
            result.chains[2].items[0],
            ParsedItem::Reference {
                element: "t".to_string(),
                pad: Some("src_1".to_string())
            }
        );
        let tee = elements(&result)[1];
        assert_eq!(tee.instance_name().as_deref(), Some("t"));
    }

    #[test]
    fn test_parse_no_spaces() {
        let result = parse_description("a!b!c").unwrap();
        assert_eq!(result.chains[0].items.len(), 3);
    }

    #[test]
    fn test_parse_extra_spaces() {
        let result = parse_description("  a   !   b   !   c  ").unwrap();
        assert_eq!(result.chains.len(), 1);
        assert_eq!(result.chains[0].items.len(), 3);
    }

    #[test]
    fn test_parse_empty_fails() {
        assert!(parse_description("").is_err());
    }

    #[test]
    fn test_parse_just_link_fails() {
        assert!(matches!(parse_description("!"), Err(Error::Parse(_))));
        assert!(parse_description("a ! ").is_err());
    }
}
