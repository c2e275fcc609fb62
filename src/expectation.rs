//! Expectations
//!
//! An [`Expectation`] describes one or more subsequent lines of output. Its
//! text form is the expression, optionally followed by a parenthesized
//! modifier:
//!
//! ```text
//! <expectation> ::= <expression> | <expression> " (" <modifier> ")"
//! <modifier>    ::= <kind> | <quantifier> | <kind> <quantifier>
//! <kind>        ::= "equal" | "eq" | "no-eol" | "escaped" | "esc"
//!                 | "glob" | "gl" | "regex" | "re"
//! <quantifier>  ::= "?" | "*" | "+"
//! ```
//!
//! A modifier that is only a quantifier implies `equal`, and a kind without
//! a quantifier matches exactly one line.

use std::fmt;

use regex::bytes::{Regex, RegexBuilder};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::escaping;
use crate::output::Line;

/// Size limit for compiled expectation regexes
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Markers that turn a glob expression into an escaped glob expression
const ESCAPED_GLOB_MARKERS: &[&str] = &[" (escaped)", " (esc)"];

/// How a line is compared with the expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Byte-exact equality, line must end in a newline
    Equal,
    /// Byte-exact equality, line must NOT end in a newline
    EqualNoEol,
    /// Equality after resolving escape sequences in the expression
    Escaped,
    /// Wildcard match (`*`, `?`) against the whole line
    Glob,
    /// Regular expression match against the whole line
    Regex,
}

impl Kind {
    /// Resolve a kind from its long or short name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "equal" | "eq" => Some(Kind::Equal),
            "no-eol" => Some(Kind::EqualNoEol),
            "escaped" | "esc" => Some(Kind::Escaped),
            "glob" | "gl" => Some(Kind::Glob),
            "regex" | "re" => Some(Kind::Regex),
            _ => None,
        }
    }

    /// The canonical (long) name
    pub fn name(&self) -> &'static str {
        match self {
            Kind::Equal => "equal",
            Kind::EqualNoEol => "no-eol",
            Kind::Escaped => "escaped",
            Kind::Glob => "glob",
            Kind::Regex => "regex",
        }
    }
}

/// How many subsequent lines an expectation may consume
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Quantifier {
    /// Exactly one line
    #[default]
    One,
    /// `?`: zero or one line
    Optional,
    /// `*`: zero or more lines
    Any,
    /// `+`: one or more lines
    AtLeastOne,
}

impl Quantifier {
    pub fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            '?' => Some(Quantifier::Optional),
            '*' => Some(Quantifier::Any),
            '+' => Some(Quantifier::AtLeastOne),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Quantifier::One => "",
            Quantifier::Optional => "?",
            Quantifier::Any => "*",
            Quantifier::AtLeastOne => "+",
        }
    }

    /// Whether zero consumed lines satisfy the quantifier
    pub fn is_optional(&self) -> bool {
        matches!(self, Quantifier::Optional | Quantifier::Any)
    }

    /// Whether more than one line may be consumed
    pub fn is_multiline(&self) -> bool {
        matches!(self, Quantifier::Any | Quantifier::AtLeastOne)
    }
}

/// The compiled line predicate of an expectation
#[derive(Debug, Clone)]
enum Rule {
    Equal(Vec<u8>),
    EqualNoEol(Vec<u8>),
    Escaped(Vec<u8>),
    Glob(Regex),
    Regex(Regex),
}

impl Rule {
    fn compile(kind: Kind, expression: &str) -> Result<Self> {
        Ok(match kind {
            Kind::Equal => Rule::Equal(expression.as_bytes().to_vec()),
            Kind::EqualNoEol => Rule::EqualNoEol(expression.as_bytes().to_vec()),
            Kind::Escaped => Rule::Escaped(escaping::decode(expression)?),
            Kind::Glob => Rule::Glob(compile_glob(expression)?),
            Kind::Regex => Rule::Regex(compile_regex(&format!("^(?:{})$", expression))?),
        })
    }

    fn matches(&self, line: &Line) -> bool {
        match self {
            Rule::Equal(expected) => line.terminated && line.content() == &expected[..],
            Rule::EqualNoEol(expected) => !line.terminated && line.bytes == *expected,
            Rule::Escaped(expected) => {
                let raw = line.bytes.strip_suffix(b"\n").unwrap_or(&line.bytes);
                raw == &expected[..]
            }
            // `?` is one character, invalid sequences are matched as U+FFFD
            Rule::Glob(re) => re.is_match(String::from_utf8_lossy(line.content()).as_bytes()),
            Rule::Regex(re) => re.is_match(line.content()),
        }
    }
}

fn compile_regex(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| Error::expectation(format!("invalid regex {:?}: {}", pattern, e)))
}

/// Translate a glob expression into an anchored regex. An expression ending
/// in an `(escaped)` marker is decoded first, so wildcards apply to the
/// decoded text.
fn compile_glob(expression: &str) -> Result<Regex> {
    let pattern = match strip_escaped_marker(expression) {
        Some(escaped) => {
            let decoded = escaping::decode(escaped)?;
            String::from_utf8(decoded).map_err(|_| {
                Error::expectation(format!("escaped glob {:?} is not valid UTF-8", expression))
            })?
        }
        None => expression.to_string(),
    };

    let mut re = String::from("^");
    let mut buf = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '*' => re.push_str("(?s-u:.*)"),
            '?' => re.push_str("(?s:.)"),
            c => re.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    re.push('$');
    compile_regex(&re)
}

fn strip_escaped_marker(expression: &str) -> Option<&str> {
    ESCAPED_GLOB_MARKERS
        .iter()
        .find_map(|marker| expression.strip_suffix(marker))
}

/// One declarative rule about one or more lines of output
#[derive(Debug, Clone)]
pub struct Expectation {
    pub kind: Kind,
    pub quantifier: Quantifier,
    pub expression: String,
    rule: Rule,
}

impl Expectation {
    /// Create an expectation from its components
    pub fn new(kind: Kind, quantifier: Quantifier, expression: impl Into<String>) -> Result<Self> {
        let expression = expression.into();
        if kind == Kind::EqualNoEol && quantifier != Quantifier::One {
            return Err(Error::expectation(format!(
                "no-eol expectation {:?} cannot have quantifier {:?}: it only describes the last line",
                expression,
                quantifier.symbol()
            )));
        }
        let rule = Rule::compile(kind, &expression)?;
        Ok(Self { kind, quantifier, expression, rule })
    }

    /// Shorthand for an `equal` expectation that matches exactly one line
    pub fn equal(expression: impl Into<String>) -> Result<Self> {
        Self::new(Kind::Equal, Quantifier::One, expression)
    }

    /// Parse an expectation from its text form. A trailing newline is ignored.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line
            .strip_suffix("\r\n")
            .or_else(|| line.strip_suffix('\n'))
            .unwrap_or(line);
        match split_modifier(line) {
            Some((expression, kind, quantifier)) => Self::new(kind, quantifier, expression),
            None => Self::equal(line),
        }
    }

    /// Whether the given line satisfies this expectation's predicate
    pub fn matches(&self, line: &Line) -> bool {
        self.rule.matches(line)
    }

    /// Render to the canonical text form, which parses back to an equal
    /// expectation
    pub fn to_expression_string(&self) -> String {
        match (self.kind, self.quantifier) {
            (Kind::Equal, Quantifier::One) => {
                if split_modifier(&self.expression).is_some() {
                    format!("{} (equal)", self.expression)
                } else {
                    self.expression.clone()
                }
            }
            (Kind::Equal, q) => format!("{} ({})", self.expression, q.symbol()),
            (kind, q) => format!("{} ({}{})", self.expression, kind.name(), q.symbol()),
        }
    }
}

/// Split `expression (modifier)` into its parts. Returns `None` when the
/// line does not end in a valid modifier.
fn split_modifier(line: &str) -> Option<(&str, Kind, Quantifier)> {
    let inner = line.strip_suffix(')')?;
    let open = inner.rfind(" (")?;
    let expression = &inner[..open];
    let modifier = &inner[open + 2..];

    let (kind_name, quantifier) = match modifier.chars().last().and_then(Quantifier::from_symbol) {
        Some(q) => (&modifier[..modifier.len() - 1], q),
        None => (modifier, Quantifier::One),
    };
    let kind = match kind_name {
        "" if quantifier == Quantifier::One => return None,
        "" => Kind::Equal,
        name => Kind::from_name(name)?,
    };
    Some((expression, kind, quantifier))
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_expression_string())
    }
}

impl PartialEq for Expectation {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.quantifier == other.quantifier
            && self.expression == other.expression
    }
}

impl Eq for Expectation {}

impl Serialize for Expectation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_expression_string())
    }
}

impl<'de> Deserialize<'de> for Expectation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Expectation::parse(&text).map_err(serde::de::Error::custom)
    }
}
