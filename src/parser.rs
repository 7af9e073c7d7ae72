// src/parser.rs
use std::fmt;

use log::{debug, trace};
use once_cell::sync::Lazy;
use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use regex::Regex;
use serde::Serialize;

use crate::errors::ParserError;

#[derive(Parser)]
#[grammar = "parser.pest"]
struct HeaderParser;

/// Anything starting with `<target>[, <target>] in ` is treated as a loop
/// header; everything else never reaches the grammar. Target tokens are
/// left loose so the grammar reports bad identifiers as syntax errors.
static FOR_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\(?\s*[^\s,()=]+(\s*,\s*[^\s,()=]+)*\s*\)?\s+in\b").expect("valid regex")
});

/// `directive="body"` as found in a marker payload.
static PAYLOAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*(?P<directive>[^=\s]+)\s*=(?P<body>.*)$").expect("valid regex")
});

// --- Expression types ---

/// A dotted chain such as `object.mylist`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributePath {
    path: String,
    #[serde(skip)]
    segments: Vec<String>,
}

impl AttributePath {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            segments: path.split('.').map(str::to_string).collect(),
        }
    }

    pub fn get_root(&self) -> &str {
        &self.segments[0]
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// A function-style reference. Only `enumerate` has loop semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Call {
    pub name: String,
    pub args: Vec<Iterable>,
    pub kwargs: Vec<(String, Iterable)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum Iterable {
    Name(String),
    AttributePath(AttributePath),
    Call(Call),
}

impl Iterable {
    /// The identifier the expression is rooted at, if it is a plain reference.
    pub fn root(&self) -> Option<&str> {
        match self {
            Iterable::Name(name) => Some(name),
            Iterable::AttributePath(path) => Some(path.get_root()),
            Iterable::Call(_) => None,
        }
    }
}

impl fmt::Display for Iterable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Iterable::Name(name) => f.write_str(name),
            Iterable::AttributePath(path) => write!(f, "{}", path),
            Iterable::Call(call) => {
                let mut args: Vec<String> = call.args.iter().map(|a| a.to_string()).collect();
                args.extend(call.kwargs.iter().map(|(k, v)| format!("{}={}", k, v)));
                write!(f, "{}({})", call.name, args.join(", "))
            }
        }
    }
}

/// Names bound by a loop: `value` or `index, value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LoopTarget {
    Single(String),
    Pair(String, String),
}

impl fmt::Display for LoopTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopTarget::Single(name) => f.write_str(name),
            LoopTarget::Pair(first, second) => write!(f, "{}, {}", first, second),
        }
    }
}

/// A parsed `<target> in <iterable>` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopHeader {
    pub target: LoopTarget,
    pub iterable: Iterable,
}

/// What a loop binds per element, after `enumerate` has been unwrapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopMapping {
    pub var: LoopTarget,
    pub iterable: Iterable,
}

impl LoopHeader {
    pub fn mapping(&self, header: &str) -> Result<LoopMapping, ParserError> {
        match &self.iterable {
            Iterable::Call(call) => match (&self.target, call.args.as_slice()) {
                (LoopTarget::Pair(_, value), [arg @ (Iterable::Name(_) | Iterable::AttributePath(_))])
                    if call.name == "enumerate" && call.kwargs.is_empty() =>
                {
                    Ok(LoopMapping { var: LoopTarget::Single(value.clone()), iterable: arg.clone() })
                }
                _ => Err(ParserError::NotImplemented(header.to_string())),
            },
            iterable => Ok(LoopMapping { var: self.target.clone(), iterable: iterable.clone() }),
        }
    }
}

/// A marker payload once decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Instruction {
    Loop { header: String, parsed: LoopHeader },
    Conditional { expression: String },
}

impl Instruction {
    /// Engine directive name (`for` / `if`).
    pub fn directive(&self) -> &'static str {
        match self {
            Instruction::Loop { .. } => "for",
            Instruction::Conditional { .. } => "if",
        }
    }

    /// Text handed verbatim to the rendering engine.
    pub fn body(&self) -> &str {
        match self {
            Instruction::Loop { header, .. } => header,
            Instruction::Conditional { expression } => expression,
        }
    }
}

// --- Public entry points ---

/// Parses a loop header of the shape `<target> in <iterable>`.
pub fn parse_loop_header(header: &str) -> Result<LoopHeader, ParserError> {
    trace!("Parsing loop header: {:?}", header);
    let mut pairs = HeaderParser::parse(Rule::loop_header, header).map_err(|e| syntax_error(header, e))?;
    let root = pairs.next().ok_or_else(|| syntax_error_msg(header, "empty header"))?;

    let mut target = None;
    let mut iterable = None;
    for pair in root.into_inner() {
        match pair.as_rule() {
            Rule::target => target = Some(build_target(pair, header)?),
            Rule::call | Rule::attribute_path | Rule::name => iterable = Some(build_iterable(pair, header)?),
            _ => (),
        }
    }

    match (target, iterable) {
        (Some(target), Some(iterable)) => {
            debug!("Parsed loop header {:?} -> target {}, iterable {}", header, target, iterable);
            Ok(LoopHeader { target, iterable })
        }
        _ => Err(syntax_error_msg(header, "incomplete loop header")),
    }
}

/// Parses a bare iterable reference, including general calls.
pub fn parse_iterable(expression: &str) -> Result<Iterable, ParserError> {
    let mut pairs =
        HeaderParser::parse(Rule::iterable_expression, expression).map_err(|e| syntax_error(expression, e))?;
    let root = pairs.next().ok_or_else(|| syntax_error_msg(expression, "empty expression"))?;
    root.into_inner()
        .find(|p| matches!(p.as_rule(), Rule::call | Rule::attribute_path | Rule::name))
        .ok_or_else(|| syntax_error_msg(expression, "missing iterable"))
        .and_then(|pair| build_iterable(pair, expression))
}

/// Decodes a loop header into the variable it binds per element and the
/// iterable it walks. `i, v in enumerate(x)` binds `v` over `x`.
pub fn decode_loop(header: &str) -> Result<LoopMapping, ParserError> {
    if !FOR_SHAPE.is_match(header) {
        return Err(ParserError::NotImplemented(header.to_string()));
    }
    parse_loop_header(header)?.mapping(header)
}

/// Decodes a marker payload such as `for="line in items"` or `if="x"`.
pub fn decode_instruction(payload: &str) -> Result<Instruction, ParserError> {
    let captures = PAYLOAD
        .captures(payload)
        .ok_or_else(|| syntax_error_msg(payload, "expected directive=\"body\""))?;
    let body = captures["body"].trim().trim_matches('"').to_string();

    match &captures["directive"] {
        "for" => {
            let parsed = parse_loop_header(&body)?;
            Ok(Instruction::Loop { header: body, parsed })
        }
        "if" => Ok(Instruction::Conditional { expression: body }),
        _ => Err(ParserError::NotImplemented(payload.to_string())),
    }
}

// --- Pair conversion ---

fn build_target(pair: Pair<Rule>, header: &str) -> Result<LoopTarget, ParserError> {
    let names: Vec<String> = pair.into_inner().map(|p| p.as_str().to_string()).collect();
    match names.as_slice() {
        [single] => Ok(LoopTarget::Single(single.clone())),
        [first, second] => Ok(LoopTarget::Pair(first.clone(), second.clone())),
        _ => Err(syntax_error_msg(header, "expected one or two loop variables")),
    }
}

fn build_iterable(pair: Pair<Rule>, header: &str) -> Result<Iterable, ParserError> {
    match pair.as_rule() {
        Rule::name => Ok(Iterable::Name(pair.as_str().to_string())),
        Rule::attribute_path => Ok(Iterable::AttributePath(AttributePath::new(pair.as_str()))),
        Rule::call => {
            let mut inner = pair.into_inner();
            let name = inner
                .next()
                .filter(|p| p.as_rule() == Rule::identifier)
                .ok_or_else(|| syntax_error_msg(header, "call without a name"))?
                .as_str()
                .to_string();

            let mut args = Vec::new();
            let mut kwargs = Vec::new();
            for arg in inner {
                match arg.as_rule() {
                    Rule::keyword_argument => {
                        let mut kw = arg.into_inner();
                        let key = kw
                            .next()
                            .ok_or_else(|| syntax_error_msg(header, "keyword argument without a name"))?
                            .as_str()
                            .to_string();
                        let value = kw
                            .next()
                            .ok_or_else(|| syntax_error_msg(header, "keyword argument without a value"))?;
                        kwargs.push((key, build_iterable(value, header)?));
                    }
                    _ => args.push(build_iterable(arg, header)?),
                }
            }
            Ok(Iterable::Call(Call { name, args, kwargs }))
        }
        rule => Err(syntax_error_msg(header, &format!("unexpected rule {:?}", rule))),
    }
}

fn syntax_error(text: &str, err: pest::error::Error<Rule>) -> ParserError {
    ParserError::Syntax { text: text.to_string(), reason: err.variant.message().into_owned() }
}

fn syntax_error_msg(text: &str, reason: &str) -> ParserError {
    ParserError::Syntax { text: text.to_string(), reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Iterable {
        Iterable::Name(s.to_string())
    }

    fn path(s: &str) -> Iterable {
        Iterable::AttributePath(AttributePath::new(s))
    }

    #[test]
    fn simple_for_variables() {
        let header = parse_loop_header("i in toto").unwrap();
        assert_eq!(header.target, LoopTarget::Single("i".into()));
        assert_eq!(header.iterable, name("toto"));
    }

    #[test]
    fn tuple_for_variables() {
        let header = parse_loop_header("i, j in toto").unwrap();
        assert_eq!(header.target, LoopTarget::Pair("i".into(), "j".into()));

        let parenthesised = parse_loop_header("(i, j) in toto").unwrap();
        assert_eq!(parenthesised.target, header.target);
    }

    #[test]
    fn dotted_iterable_keeps_root() {
        let mapping = decode_loop("i in test.myattr.other_attr").unwrap();
        assert_eq!(mapping.var, LoopTarget::Single("i".into()));
        assert_eq!(mapping.iterable.to_string(), "test.myattr.other_attr");
        assert_eq!(mapping.iterable.root(), Some("test"));
        match mapping.iterable {
            Iterable::AttributePath(p) => assert_eq!(p.get_root(), "test"),
            other => panic!("expected attribute path, got {:?}", other),
        }
    }

    #[test]
    fn enumerate_discards_index() {
        let mapping = decode_loop("i, j in enumerate(list)").unwrap();
        assert_eq!(mapping.var, LoopTarget::Single("j".into()));
        assert_eq!(mapping.iterable, name("list"));

        let mapping = decode_loop("i, j in enumerate(object.mylist)").unwrap();
        assert_eq!(mapping.var, LoopTarget::Single("j".into()));
        assert_eq!(mapping.iterable, path("object.mylist"));
    }

    #[test]
    fn keyword_like_prefixes_are_identifiers() {
        let mapping = decode_loop("index in inventory").unwrap();
        assert_eq!(mapping.var, LoopTarget::Single("index".into()));
        assert_eq!(mapping.iterable, name("inventory"));
    }

    #[test]
    fn non_for_headers_are_not_implemented() {
        for header in ["i == 0", "item.InvoiceRef=='#1234'", "", "not x"] {
            assert_eq!(decode_loop(header), Err(ParserError::NotImplemented(header.to_string())));
        }
    }

    #[test]
    fn other_calls_are_not_loop_drivers() {
        assert!(matches!(decode_loop("i in sorted(items)"), Err(ParserError::NotImplemented(_))));
        assert!(matches!(decode_loop("i in enumerate(items)"), Err(ParserError::NotImplemented(_))));
        assert!(matches!(decode_loop("i, j in enumerate(a, b)"), Err(ParserError::NotImplemented(_))));
    }

    #[test]
    fn malformed_headers_are_syntax_errors() {
        for header in ["i in ", "i in a..b", "i in a.b(c)", "i, j, k in x", "i in 3", "é in x", "aé in x", "1 in x"] {
            match decode_loop(header) {
                Err(ParserError::Syntax { text, .. }) => assert_eq!(text, header),
                other => panic!("expected syntax error for {:?}, got {:?}", header, other),
            }
        }
    }

    #[test]
    fn general_call_expression() {
        let iterable = parse_iterable("sorted(items, key=item.rank)").unwrap();
        match &iterable {
            Iterable::Call(call) => {
                assert_eq!(call.name, "sorted");
                assert_eq!(call.args, vec![name("items")]);
                assert_eq!(call.kwargs, vec![("key".to_string(), path("item.rank"))]);
            }
            other => panic!("expected call, got {:?}", other),
        }
        assert_eq!(iterable.to_string(), "sorted(items, key=item.rank)");
    }

    #[test]
    fn decodes_marker_payloads() {
        let loop_instruction = decode_instruction("for=\"line in items\"").unwrap();
        assert_eq!(loop_instruction.directive(), "for");
        assert_eq!(loop_instruction.body(), "line in items");

        let conditional = decode_instruction("if=\"item.InvoiceRef=='#1234'\"").unwrap();
        assert_eq!(conditional, Instruction::Conditional { expression: "item.InvoiceRef=='#1234'".into() });

        assert!(matches!(decode_instruction("with=\"x=1\""), Err(ParserError::NotImplemented(_))));
        assert!(matches!(decode_instruction("for"), Err(ParserError::Syntax { .. })));
        assert!(matches!(decode_instruction("for=\"line of items\""), Err(ParserError::Syntax { .. })));
    }
}
