//! variable substitution
//!
//! [Vars] holds a variable namespace (itself a document tree) and resolves
//! `${...}` placeholders embedded in string scalars:
//!
//! ```text
//! ${alt1|alt2|'literal'}
//! ```
//!
//! Alternatives are tried left to right, first one that resolves wins.
//! A bare dotted path is a variable reference, a single- or double-quoted
//! string is a constant that always resolves. When the whole string is one
//! placeholder the resolved node itself is spliced in (lists and dicts
//! included), otherwise the scalar's string form is concatenated into the
//! surrounding text. No alternative resolving surfaces the
//! [Error::NoMatch] sentinel.
//!
//! A `Vars` can carry a processors attachment under a designated top-level
//! prefix. A reference whose first path segment equals that prefix copies
//! the attachment onto the substitution result, where
//! [crate::render::render_inputs] later picks it up.
use crate::ast::Ast;
use crate::error::Error;
use crate::node::{Node, Processors};

/// A variable context for one rendering pass.
#[derive(Debug, Clone)]
pub struct Vars {
    tree: Ast,
    processors_key: Option<String>,
    processors: Option<Processors>,
}

impl Vars {
    pub fn new(mapping: serde_json::Value) -> Result<Vars, Error> {
        Ok(Vars {
            tree: Ast::from_value(mapping)?,
            processors_key: None,
            processors: None,
        })
    }

    pub fn with_processors(
        mapping: serde_json::Value,
        processors_key: impl Into<String>,
        processors: Processors,
    ) -> Result<Vars, Error> {
        Ok(Vars {
            tree: Ast::from_value(mapping)?,
            processors_key: Some(processors_key.into()),
            processors: Some(processors),
        })
    }

    /// Resolves a dotted path against the variable tree. A path landing on
    /// a key yields the key's value.
    pub fn lookup(&self, selector: &str) -> Option<&Node> {
        let node = self.tree.lookup(selector)?;
        Some(node.key_value().unwrap_or(node))
    }

    /// Substitutes every placeholder in `value`, returning the resulting
    /// node.
    pub fn replace(&self, value: &str) -> Result<Node, Error> {
        let mut out = String::new();
        let mut attach = false;
        let mut rest = value;

        while let Some(start) = rest.find("${") {
            let inner_start = start + 2;
            let end = find_closing(&rest[inner_start..])
                .ok_or_else(|| Error::parse("missing ending }"))?;
            let expression = &rest[inner_start..inner_start + end];
            let alternatives = parse_alternatives(expression)?;

            let whole_string = start == 0 && inner_start + end + 1 == value.len() && out.is_empty();
            let resolved = self.resolve(&alternatives)?;

            match resolved {
                Resolved::Literal(text) => {
                    if whole_string {
                        return Ok(Node::str(text));
                    }
                    out.push_str(&rest[..start]);
                    out.push_str(&text);
                }
                Resolved::Reference { node, carries } => {
                    if whole_string {
                        let mut node = node.clone();
                        if carries {
                            if let Some(processors) = &self.processors {
                                node = node.with_processors(processors.clone());
                            }
                        }
                        return Ok(node);
                    }
                    if !node.is_scalar() {
                        // a collection cannot be stringified into text
                        return Err(Error::NoMatch);
                    }
                    out.push_str(&rest[..start]);
                    out.push_str(&node.to_string());
                    attach = attach || carries;
                }
            }
            rest = &rest[inner_start + end + 1..];
        }

        out.push_str(rest);
        let mut node = Node::str(out);
        if attach {
            if let Some(processors) = &self.processors {
                node = node.with_processors(processors.clone());
            }
        }
        Ok(node)
    }

    fn resolve(&self, alternatives: &[Alt]) -> Result<Resolved<'_>, Error> {
        for alternative in alternatives {
            match alternative {
                Alt::Literal(text) => return Ok(Resolved::Literal(text.clone())),
                Alt::Path(path) => {
                    if let Some(node) = self.lookup(path) {
                        let carries = self
                            .processors_key
                            .as_deref()
                            .is_some_and(|key| first_segment(path) == key);
                        return Ok(Resolved::Reference { node, carries });
                    }
                }
            }
        }
        Err(Error::NoMatch)
    }
}

enum Resolved<'a> {
    Literal(String),
    Reference { node: &'a Node, carries: bool },
}

#[derive(Debug, PartialEq)]
enum Alt {
    Path(String),
    Literal(String),
}

fn first_segment(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

/// Byte offset of the `}` closing the placeholder body starting at the
/// beginning of `s`, skipping over quoted sections.
fn find_closing(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match quote {
            Some(q) => match c {
                '\\' => escaped = true,
                _ if c == q => quote = None,
                _ => {}
            },
            None => match c {
                '\'' | '"' => quote = Some(c),
                '\\' => escaped = true,
                '}' => return Some(i),
                _ => {}
            },
        }
    }
    None
}

/// Splits a placeholder body into its ordered alternatives.
fn parse_alternatives(expression: &str) -> Result<Vec<Alt>, Error> {
    let mut alternatives = Vec::new();
    let mut chars = expression.chars().peekable();

    loop {
        // leading whitespace outside quotes is insignificant
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        match chars.peek().copied() {
            Some(q @ ('\'' | '"')) => {
                chars.next();
                let mut literal = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some(escaped) => literal.push(escaped),
                            None => {
                                return Err(Error::parse(format!(
                                    "invalid variable: {expression}"
                                )))
                            }
                        },
                        _ if c == q => {
                            closed = true;
                            break;
                        }
                        _ => literal.push(c),
                    }
                }
                if !closed {
                    return Err(Error::parse(format!("invalid variable: {expression}")));
                }
                alternatives.push(Alt::Literal(literal));

                // only whitespace may follow up to the next separator
                while chars.peek().is_some_and(|c| c.is_whitespace()) {
                    chars.next();
                }
                match chars.next() {
                    None => break,
                    Some('|') => continue,
                    Some(_) => {
                        return Err(Error::parse(format!("invalid variable: {expression}")))
                    }
                }
            }
            Some(_) => {
                let mut path = String::new();
                let mut ended = false;
                while let Some(c) = chars.next() {
                    match c {
                        '|' => {
                            ended = true;
                            break;
                        }
                        '\\' => {
                            if chars.peek() == Some(&'|') {
                                return Err(Error::parse("variable pipe cannot be escaped"));
                            }
                            path.push(c);
                        }
                        _ => path.push(c),
                    }
                }
                let path = path.trim().to_string();
                validate_path(&path, expression)?;
                alternatives.push(Alt::Path(path));
                if !ended {
                    break;
                }
            }
            None => {
                // empty alternative, e.g. `${}` or `${a|}`
                return Err(Error::parse(format!("invalid variable: {expression}")));
            }
        }
    }

    Ok(alternatives)
}

fn validate_path(path: &str, expression: &str) -> Result<(), Error> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(Error::parse(format!("invalid variable: {expression}")));
    }
    let valid = path
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(Error::parse(format!("invalid variable: {expression}")));
    }
    Ok(())
}

/// Evaluates a reserved `condition` expression to a boolean.
///
/// Supported forms: the literals `true` and `false`, equality comparisons
/// `lhs == rhs` / `lhs != rhs`, and `contains(haystack, needle)` testing
/// list membership or substring containment. Operands are quoted literals,
/// numbers, booleans, `${...}` placeholders or bare variable paths.
pub fn eval_condition(expression: &str, vars: &Vars) -> Result<bool, Error> {
    let trimmed = expression.trim();
    match trimmed {
        "true" => return Ok(true),
        "false" => return Ok(false),
        _ => {}
    }

    if let Some(body) = trimmed
        .strip_prefix("contains(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let (haystack, needle) = split_once_outside_quotes(body, ',').ok_or_else(|| {
            Error::condition(expression, "contains takes two arguments")
        })?;
        let Some(needle) = eval_operand(needle, vars)? else {
            return Ok(false);
        };
        return match operand_node(haystack, vars)? {
            None => Ok(false),
            Some(node) => match node.as_list() {
                Some(items) => Ok(items.iter().any(|item| item.to_string() == needle)),
                None => match node.as_str() {
                    Some(text) => Ok(text.contains(&needle)),
                    None => Err(Error::condition(
                        expression,
                        "contains expects a list or a string",
                    )),
                },
            },
        };
    }

    for (separator, negate) in [("==", false), ("!=", true)] {
        if let Some((lhs, rhs)) = split_once_outside_quotes(trimmed, '=')
            .and_then(|_| split_str_outside_quotes(trimmed, separator))
        {
            let lhs = eval_operand(lhs, vars)?;
            let rhs = eval_operand(rhs, vars)?;
            let equal = match (lhs, rhs) {
                (Some(l), Some(r)) => l == r,
                (None, None) => true,
                _ => false,
            };
            return Ok(equal != negate);
        }
    }

    if trimmed.starts_with("${") && trimmed.ends_with('}') {
        // a bare placeholder resolving to a boolean (or its string form)
        return match operand_node_owned(trimmed, vars)? {
            None => Ok(false),
            Some(node) => {
                if let Some(b) = node.as_bool() {
                    return Ok(b);
                }
                match node.as_str() {
                    Some("true") => Ok(true),
                    Some("false") => Ok(false),
                    _ => Err(Error::condition(expression, "expected a boolean")),
                }
            }
        };
    }

    Err(Error::condition(expression, "unsupported expression"))
}

/// Resolves an operand to its comparison string. `Ok(None)` means an
/// unresolvable variable reference.
fn eval_operand(operand: &str, vars: &Vars) -> Result<Option<String>, Error> {
    Ok(operand_node_owned(operand, vars)?.map(|node| node.to_string()))
}

/// Resolves an operand to the node it references, without stringifying,
/// so collections survive for containment checks.
fn operand_node<'a>(operand: &str, vars: &'a Vars) -> Result<Option<&'a Node>, Error> {
    let operand = operand.trim();
    if let Some(inner) = operand
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        for alternative in parse_alternatives(inner)? {
            match alternative {
                Alt::Path(path) => {
                    if let Some(node) = vars.lookup(&path) {
                        return Ok(Some(node));
                    }
                }
                // a literal alternative has no node form here
                Alt::Literal(_) => return Ok(None),
            }
        }
        return Ok(None);
    }
    Ok(vars.lookup(operand))
}

fn operand_node_owned(operand: &str, vars: &Vars) -> Result<Option<Node>, Error> {
    let operand = operand.trim();

    if let Some(stripped) = strip_quotes(operand) {
        return Ok(Some(Node::str(stripped)));
    }
    match operand {
        "true" => return Ok(Some(Node::bool(true))),
        "false" => return Ok(Some(Node::bool(false))),
        _ => {}
    }
    if let Ok(i) = operand.parse::<i64>() {
        return Ok(Some(Node::int(i)));
    }
    if let Ok(f) = operand.parse::<f64>() {
        return Ok(Some(Node::float(f)));
    }
    if let Some(inner) = operand
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        for alternative in parse_alternatives(inner)? {
            match alternative {
                Alt::Path(path) => {
                    if let Some(node) = vars.lookup(&path) {
                        return Ok(Some(node.clone()));
                    }
                }
                Alt::Literal(text) => return Ok(Some(Node::str(text))),
            }
        }
        return Ok(None);
    }

    validate_path(operand, operand)?;
    Ok(vars.lookup(operand).cloned())
}

fn strip_quotes(text: &str) -> Option<String> {
    let mut chars = text.chars();
    let first = chars.next()?;
    if !matches!(first, '\'' | '"') || !text.ends_with(first) || text.len() < 2 {
        return None;
    }
    Some(text[1..text.len() - 1].to_string())
}

fn split_once_outside_quotes(text: &str, separator: char) -> Option<(&str, &str)> {
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                _ if c == separator => return Some((&text[..i], &text[i + c.len_utf8()..])),
                _ => {}
            },
        }
    }
    None
}

fn split_str_outside_quotes<'a>(text: &'a str, separator: &str) -> Option<(&'a str, &'a str)> {
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                _ if text[i..].starts_with(separator) => {
                    return Some((&text[..i], &text[i + separator.len()..]))
                }
                _ => {}
            },
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn vars(value: serde_json::Value) -> Vars {
        Vars::new(value).unwrap()
    }

    #[test]
    fn replace_plain_text_passes_through() {
        let v = vars(json!({}));
        assert_eq!(v.replace("no placeholders here").unwrap().as_str(), Some("no placeholders here"));
    }

    #[test]
    fn replace_embedded_reference() {
        let v = vars(json!({"data": {"path": "/var/lib"}}));
        let node = v.replace("${data.path}/state").unwrap();
        assert_eq!(node.as_str(), Some("/var/lib/state"));
    }

    #[test]
    fn replace_fallback_chain_first_match_wins() {
        let v = vars(json!({"second": "two"}));
        let node = v.replace("${missing|second|'fallback'}").unwrap();
        assert_eq!(node.as_str(), Some("two"));
    }

    #[test]
    fn replace_literal_fallback_always_resolves() {
        let v = vars(json!({}));
        assert_eq!(
            v.replace("${missing|'literal value'}").unwrap().as_str(),
            Some("literal value")
        );
        assert_eq!(
            v.replace("${missing|\"double\"}").unwrap().as_str(),
            Some("double")
        );
    }

    #[test]
    fn replace_escaped_quote_inside_literal() {
        let v = vars(json!({}));
        assert_eq!(
            v.replace(r"${'it\'s fine'}").unwrap().as_str(),
            Some("it's fine")
        );
    }

    #[test]
    fn replace_whitespace_outside_quotes_is_stripped() {
        let v = vars(json!({"a": {"b": "x"}}));
        assert_eq!(v.replace("${ a.b | 'lit' }").unwrap().as_str(), Some("x"));
        assert_eq!(
            v.replace("${ missing | ' padded ' }").unwrap().as_str(),
            Some(" padded ")
        );
    }

    #[test]
    fn replace_whole_string_splices_collections() {
        let v = vars(json!({"hosts": ["a:9200", "b:9200"]}));
        let node = v.replace("${hosts}").unwrap();
        assert_eq!(node.to_value(), json!(["a:9200", "b:9200"]));
    }

    #[test]
    fn replace_embedded_collection_is_no_match() {
        let v = vars(json!({"hosts": ["a:9200"]}));
        let err = v.replace("prefix ${hosts}").unwrap_err();
        assert!(err.is_no_match());
    }

    #[test]
    fn replace_no_alternative_is_no_match() {
        let v = vars(json!({}));
        assert!(v.replace("${missing.path}").unwrap_err().is_no_match());
        assert!(v.replace("${a|b|c}").unwrap_err().is_no_match());
    }

    #[test]
    fn replace_missing_closing_brace_is_parse_error() {
        let v = vars(json!({}));
        let err = v.replace("${unterminated").unwrap_err();
        assert_eq!(err.to_string(), "variable parse failed: missing ending }");
    }

    #[test]
    fn replace_escaped_pipe_is_parse_error() {
        let v = vars(json!({}));
        let err = v.replace(r"${a\|b}").unwrap_err();
        assert_eq!(
            err.to_string(),
            "variable parse failed: variable pipe cannot be escaped"
        );
    }

    #[test]
    fn replace_trailing_dot_is_parse_error() {
        let v = vars(json!({"a": {"b": 1}}));
        assert!(matches!(v.replace("${a.b.}").unwrap_err(), Error::Parse(_)));
        assert!(matches!(v.replace("${.a}").unwrap_err(), Error::Parse(_)));
    }

    #[test]
    fn replace_stringifies_numbers_inline() {
        let v = vars(json!({"n": 1, "f": 1.5, "b": true}));
        assert_eq!(v.replace("v${n}").unwrap().as_str(), Some("v1"));
        assert_eq!(v.replace("v${f}").unwrap().as_str(), Some("v1.5"));
        assert_eq!(v.replace("v${b}").unwrap().as_str(), Some("vtrue"));
    }

    #[test]
    fn replace_multiple_placeholders() {
        let v = vars(json!({"a": "1", "b": "2"}));
        assert_eq!(v.replace("${a}-${b}").unwrap().as_str(), Some("1-2"));
    }

    #[test]
    fn processors_carried_for_prefixed_references() {
        let processors: Processors = vec![json!({"add_fields": {"fields": {"id": "abc"}}})];
        let v = Vars::with_processors(
            json!({"dynamic": {"host": "web-01"}, "static": {"host": "db-01"}}),
            "dynamic",
            processors.clone(),
        )
        .unwrap();

        let node = v.replace("${dynamic.host}").unwrap();
        assert_eq!(node.processors(), Some(&processors));

        let node = v.replace("${static.host}").unwrap();
        assert_eq!(node.processors(), None);

        let node = v.replace("name-${dynamic.host}").unwrap();
        assert_eq!(node.as_str(), Some("name-web-01"));
        assert_eq!(node.processors(), Some(&processors));
    }

    #[test]
    fn condition_literals() {
        let v = vars(json!({}));
        assert!(eval_condition("true", &v).unwrap());
        assert!(!eval_condition("false", &v).unwrap());
    }

    #[test]
    fn condition_equality() {
        let v = vars(json!({"host": {"platform": "linux"}, "port": 9200}));
        assert!(eval_condition("${host.platform} == 'linux'", &v).unwrap());
        assert!(!eval_condition("${host.platform} == 'windows'", &v).unwrap());
        assert!(eval_condition("${host.platform} != 'windows'", &v).unwrap());
        assert!(eval_condition("port == 9200", &v).unwrap());
    }

    #[test]
    fn condition_contains() {
        let v = vars(json!({"host": {"labels": ["web", "prod"], "name": "web-01"}}));
        assert!(eval_condition("contains(${host.labels}, 'prod')", &v).unwrap());
        assert!(!eval_condition("contains(${host.labels}, 'dev')", &v).unwrap());
        assert!(eval_condition("contains(${host.name}, 'web')", &v).unwrap());
        assert!(!eval_condition("contains(${missing}, 'x')", &v).unwrap());
    }

    #[test]
    fn condition_bare_placeholder() {
        let v = vars(json!({"service": {"enabled": true}}));
        assert!(eval_condition("${service.enabled}", &v).unwrap());
        assert!(!eval_condition("${service.missing}", &v).unwrap());
        assert!(eval_condition("${service.missing|'true'}", &v).unwrap());
    }

    #[test]
    fn condition_unsupported_expression_errors() {
        let v = vars(json!({}));
        assert!(matches!(
            eval_condition("arbitrary nonsense", &v),
            Err(Error::Condition { .. })
        ));
    }
}
