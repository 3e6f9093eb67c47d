//! node representation
//!
//! A configuration document is held in memory as a tree of [Node]s. The tree
//! contains the following shapes
//! - dict (order-preserving "map", where every child is a key node)
//! - key (a name / value pair, only ever found inside a dict)
//! - list (order-significant sequence of values)
//! - string, int, uint, float, bool (scalar leaves)
//!
//! Additionally:
//! - there is no `null` node. A `null` in the source value is dropped by the
//!   loader instead of being stored.
//! - dict keys are sorted lexicographically at load time so that two maps
//!   with the same content produce the same tree (and the same hash)
//!   regardless of input order.
//! - a dotted key in the source map (`"a.b.c": v` with a map value) is
//!   de-normalized into nested dicts, merging with any structure that
//!   already exists under the same prefix.
//! - every node can carry an attached [Processors] list as a side channel.
//!   Processors never take part in hashing or serialization of the node
//!   itself; they surface through [Node::processors] and are merged into
//!   rendered output by [crate::render::render_inputs].
use crate::error::Error;
use crate::vars::Vars;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::Serializer;
use sha2::{Digest, Sha256};
use std::fmt;

/// The reserved key name that is evaluated to a boolean during
/// [Node::apply]. A false result removes the enclosing dict entirely.
pub const CONDITION_KEY: &str = "condition";

/// An attached list of processors.
///
/// Each entry is a generic processor definition (usually a single-key map)
/// in the same generic-value form the loader accepts.
pub type Processors = Vec<serde_json::Value>;

/// A node in the configuration tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) kind: Kind,
    pub(crate) processors: Option<Processors>,
}

/// All possible node shapes.
#[derive(Debug, Clone)]
pub enum Kind {
    /// Ordered sequence of key nodes. Anything else in here is a programming
    /// error.
    Dict(Vec<Node>),
    /// Ordered sequence of values.
    List(Vec<Node>),
    /// A name / value pair inside a dict.
    Key { name: String, value: Option<Box<Node>> },
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl Node {
    pub fn dict(children: Vec<Node>) -> Self {
        Kind::Dict(children).into()
    }

    pub fn list(items: Vec<Node>) -> Self {
        Kind::List(items).into()
    }

    pub fn key(name: impl Into<String>, value: Option<Node>) -> Self {
        Kind::Key {
            name: name.into(),
            value: value.map(Box::new),
        }
        .into()
    }

    pub fn str(value: impl Into<String>) -> Self {
        Kind::Str(value.into()).into()
    }

    pub fn int(value: i64) -> Self {
        Kind::Int(value).into()
    }

    pub fn uint(value: u64) -> Self {
        Kind::UInt(value).into()
    }

    pub fn float(value: f64) -> Self {
        Kind::Float(value).into()
    }

    pub fn bool(value: bool) -> Self {
        Kind::Bool(value).into()
    }

    pub fn with_processors(mut self, processors: Processors) -> Self {
        self.processors = Some(processors);
        self
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match &self.kind {
            Kind::Dict(_) => "dict",
            Kind::List(_) => "list",
            Kind::Key { .. } => "key",
            Kind::Str(_) => "string",
            Kind::Int(_) => "int",
            Kind::UInt(_) => "uint",
            Kind::Float(_) => "float",
            Kind::Bool(_) => "bool",
        }
    }

    /// Structural lookup of a single path segment.
    ///
    /// Dicts match a child key by name, lists match a string-encoded index
    /// (bounds checked, anything unparsable is "not found") and keys
    /// delegate into their value. Scalars never match.
    pub fn find(&self, segment: &str) -> Option<&Node> {
        match &self.kind {
            Kind::Dict(children) => children
                .iter()
                .find(|child| child.key_name() == Some(segment)),
            Kind::List(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            Kind::Key { value, .. } => value.as_deref().and_then(|v| v.find(segment)),
            _ => None,
        }
    }

    pub fn find_mut(&mut self, segment: &str) -> Option<&mut Node> {
        match &mut self.kind {
            Kind::Dict(children) => children
                .iter_mut()
                .find(|child| child.key_name() == Some(segment)),
            Kind::List(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(move |i| items.get_mut(i)),
            Kind::Key { value, .. } => value.as_deref_mut().and_then(|v| v.find_mut(segment)),
            _ => None,
        }
    }

    /// Name of a key node.
    pub fn key_name(&self) -> Option<&str> {
        match &self.kind {
            Kind::Key { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Value of a key node.
    pub fn key_value(&self) -> Option<&Node> {
        match &self.kind {
            Kind::Key { value, .. } => value.as_deref(),
            _ => None,
        }
    }

    pub fn key_value_mut(&mut self) -> Option<&mut Node> {
        match &mut self.kind {
            Kind::Key { value, .. } => value.as_deref_mut(),
            _ => None,
        }
    }

    pub(crate) fn set_key_value(&mut self, new_value: Option<Node>) {
        if let Kind::Key { value, .. } = &mut self.kind {
            *value = new_value.map(Box::new);
        }
    }

    pub fn as_dict(&self) -> Option<&[Node]> {
        match &self.kind {
            Kind::Dict(children) => Some(children),
            _ => None,
        }
    }

    pub fn as_dict_mut(&mut self) -> Option<&mut Vec<Node>> {
        match &mut self.kind {
            Kind::Dict(children) => Some(children),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Node]> {
        match &self.kind {
            Kind::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Node>> {
        match &mut self.kind {
            Kind::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            Kind::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.kind {
            Kind::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self.kind,
            Kind::Str(_) | Kind::Int(_) | Kind::UInt(_) | Kind::Float(_) | Kind::Bool(_)
        )
    }

    /// Content hash of the node.
    ///
    /// Containers return a sha256 digest over their children in declared
    /// order, key nodes digest their name plus value, scalars contribute
    /// their raw representation. Numeric scalars hash their decimal string,
    /// so `int 1`, `uint 1` and `float 1.0` hash identically. Attached
    /// processors never contribute.
    pub fn hash(&self) -> Vec<u8> {
        match &self.kind {
            Kind::Dict(children) | Kind::List(children) => {
                let mut hasher = Sha256::new();
                for child in children {
                    hasher.update(child.hash());
                }
                hasher.finalize().to_vec()
            }
            Kind::Key { name, value } => {
                let mut hasher = Sha256::new();
                hasher.update(name.as_bytes());
                if let Some(value) = value {
                    hasher.update(value.hash());
                }
                hasher.finalize().to_vec()
            }
            Kind::Str(value) => value.as_bytes().to_vec(),
            Kind::Int(value) => value.to_string().into_bytes(),
            Kind::UInt(value) => value.to_string().into_bytes(),
            Kind::Float(value) => format_float(*value).into_bytes(),
            Kind::Bool(value) => vec![u8::from(*value)],
        }
    }

    /// Applies the variable context, returning the substituted node.
    ///
    /// `Ok(None)` means the node is omitted from the output: a dict whose
    /// `condition` key evaluated to false, or a key whose value resolved to
    /// nothing.
    pub fn apply(&self, vars: &Vars) -> Result<Option<Node>, Error> {
        match &self.kind {
            Kind::Dict(children) => {
                let mut nodes = Vec::with_capacity(children.len());
                for child in children {
                    let Kind::Key { name, value } = &child.kind else {
                        debug_assert!(false, "dict child is not a key");
                        continue;
                    };
                    if name == CONDITION_KEY {
                        if !eval_condition_node(value.as_deref(), vars)? {
                            // condition failed, the whole dict is removed
                            return Ok(None);
                        }
                        // condition passed but is never part of the output
                        continue;
                    }
                    if let Some(applied) = child.apply(vars)? {
                        nodes.push(applied);
                    }
                }
                Ok(Some(Node::dict(nodes)))
            }
            Kind::List(items) => {
                let mut nodes = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(applied) = item.apply(vars)? {
                        nodes.push(applied);
                    }
                }
                Ok(Some(Node::list(nodes)))
            }
            Kind::Key { name, value } => match value {
                None => Ok(Some(self.clone())),
                Some(value) => Ok(value
                    .apply(vars)?
                    .map(|applied| Node::key(name.clone(), Some(applied)))),
            },
            Kind::Str(value) => vars.replace(value).map(Some),
            Kind::Int(_) | Kind::UInt(_) | Kind::Float(_) | Kind::Bool(_) => {
                Ok(Some(self.clone()))
            }
        }
    }

    /// Any attached processors, either on the node itself or on the first
    /// child (depth-first) that carries some.
    pub fn processors(&self) -> Option<&Processors> {
        if let Some(processors) = &self.processors {
            return Some(processors);
        }
        match &self.kind {
            Kind::Dict(children) | Kind::List(children) => {
                children.iter().find_map(|child| child.processors())
            }
            Kind::Key { value, .. } => value.as_deref().and_then(|v| v.processors()),
            _ => None,
        }
    }

    /// Renders the node to a generic value, the inverse of [load].
    pub fn to_value(&self) -> serde_json::Value {
        match &self.kind {
            Kind::Dict(children) => serde_json::Value::Object(
                children
                    .iter()
                    .filter_map(|child| match &child.kind {
                        Kind::Key { name, value } => Some((
                            name.clone(),
                            value
                                .as_deref()
                                .map(Node::to_value)
                                .unwrap_or(serde_json::Value::Null),
                        )),
                        _ => None,
                    })
                    .collect(),
            ),
            Kind::List(items) => {
                serde_json::Value::Array(items.iter().map(Node::to_value).collect())
            }
            Kind::Key { name, value } => {
                let mut map = serde_json::Map::new();
                map.insert(
                    name.clone(),
                    value
                        .as_deref()
                        .map(Node::to_value)
                        .unwrap_or(serde_json::Value::Null),
                );
                serde_json::Value::Object(map)
            }
            Kind::Str(value) => serde_json::Value::String(value.clone()),
            Kind::Int(value) => serde_json::Value::from(*value),
            Kind::UInt(value) => serde_json::Value::from(*value),
            Kind::Float(value) => serde_json::Value::from(*value),
            Kind::Bool(value) => serde_json::Value::from(*value),
        }
    }
}

fn eval_condition_node(value: Option<&Node>, vars: &Vars) -> Result<bool, Error> {
    match value.map(|v| &v.kind) {
        Some(Kind::Bool(result)) => Ok(*result),
        Some(Kind::Str(expression)) => crate::vars::eval_condition(expression, vars),
        Some(_) | None => Err(Error::condition(
            CONDITION_KEY,
            "condition value must be a boolean or a string",
        )),
    }
}

impl From<Kind> for Node {
    fn from(kind: Kind) -> Self {
        Node {
            kind,
            processors: None,
        }
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Node::str(value)
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Node::str(value)
    }
}

impl From<i64> for Node {
    fn from(value: i64) -> Self {
        Node::int(value)
    }
}

impl From<u64> for Node {
    fn from(value: u64) -> Self {
        Node::uint(value)
    }
}

impl From<f64> for Node {
    fn from(value: f64) -> Self {
        Node::float(value)
    }
}

impl From<bool> for Node {
    fn from(value: bool) -> Self {
        Node::bool(value)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Dict(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{{{child}}}")?;
                }
                Ok(())
            }
            Kind::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Kind::Key { name, value } => match value {
                Some(value) => write!(f, "{name}:{value}"),
                None => write!(f, "{name}:nil"),
            },
            Kind::Str(value) => f.write_str(value),
            Kind::Int(value) => write!(f, "{value}"),
            Kind::UInt(value) => write!(f, "{value}"),
            Kind::Float(value) => f.write_str(&format_float(*value)),
            Kind::Bool(value) => f.write_str(if *value { "true" } else { "false" }),
        }
    }
}

impl serde::ser::Serialize for Node {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match &self.kind {
            Kind::Dict(children) => {
                let mut ser = serializer.serialize_map(Some(children.len()))?;
                for child in children {
                    if let Kind::Key { name, value } = &child.kind {
                        ser.serialize_entry(name, &value.as_deref())?;
                    }
                }
                ser.end()
            }
            Kind::List(items) => {
                let mut ser = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    ser.serialize_element(item)?;
                }
                ser.end()
            }
            Kind::Key { name, value } => {
                let mut ser = serializer.serialize_map(Some(1))?;
                ser.serialize_entry(name, &value.as_deref())?;
                ser.end()
            }
            Kind::Str(value) => serializer.serialize_str(value),
            Kind::Int(value) => serializer.serialize_i64(*value),
            Kind::UInt(value) => serializer.serialize_u64(*value),
            Kind::Float(value) => serializer.serialize_f64(*value),
            Kind::Bool(value) => serializer.serialize_bool(*value),
        }
    }
}

/// Decimal rendering without an exponent so that a whole float and the
/// equal integer produce the same text (and therefore the same hash).
fn format_float(value: f64) -> String {
    if value.is_finite() && value == value.trunc() && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    format!("{value}")
}

/// Converts a generic value into a node.
///
/// `null` yields `Ok(None)` and is dropped by the caller rather than
/// stored. Maps load as dicts with keys sorted lexicographically and
/// dotted map keys de-normalized (see [module docs](self)).
pub(crate) fn load(value: serde_json::Value) -> Result<Option<Node>, Error> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Bool(b) => Ok(Some(Node::bool(b))),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Some(Node::int(i)))
            } else if let Some(u) = n.as_u64() {
                Ok(Some(Node::uint(u)))
            } else {
                // serde_json numbers are i64, u64 or f64; nothing else
                Ok(Some(Node::float(n.as_f64().unwrap_or_default())))
            }
        }
        serde_json::Value::String(s) => Ok(Some(Node::str(s))),
        serde_json::Value::Array(items) => load_list(items).map(Some),
        serde_json::Value::Object(map) => load_map(map).map(Some),
    }
}

pub(crate) fn load_list(items: Vec<serde_json::Value>) -> Result<Node, Error> {
    let mut nodes = Vec::with_capacity(items.len());
    for item in items {
        if let Some(node) = load(item)? {
            nodes.push(node);
        }
    }
    Ok(Node::list(nodes))
}

pub(crate) fn load_map(map: serde_json::Map<String, serde_json::Value>) -> Result<Node, Error> {
    let mut entries: Vec<(String, serde_json::Value)> = map.into_iter().collect();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut children: Vec<Node> = Vec::with_capacity(entries.len());
    for (name, value) in entries {
        let Some(loaded) = load(value)? else { continue };

        // Only map values de-normalize their dotted key; scalar and list
        // values keep the compact dotted name (rules rely on that, see the
        // data_stream handling in the rule engine).
        if !matches!(loaded.kind, Kind::Dict(_)) || !name.contains('.') {
            if matches!(loaded.kind, Kind::Dict(_)) {
                merge_dotted(&mut children, &[&name], loaded);
            } else {
                children.push(Node::key(name, Some(loaded)));
            }
            continue;
        }

        let segments: Vec<&str> = name.split('.').collect();
        merge_dotted(&mut children, &segments, loaded);
    }
    Ok(Node::dict(children))
}

/// Attaches a dict value under a (possibly dotted) key path, descending
/// into structure that already exists instead of duplicating it.
fn merge_dotted(children: &mut Vec<Node>, segments: &[&str], value: Node) {
    let position = children
        .iter()
        .position(|child| child.key_name() == Some(segments[0]));

    let Some(position) = position else {
        children.push(Node::key(segments[0], Some(wrap_segments(&segments[1..], value))));
        return;
    };

    let Some(existing) = children[position].key_value_mut() else {
        // existing key with no value: data under it has nowhere to go
        return;
    };

    if segments.len() == 1 {
        // full path already exists, merge the dict contents
        if let (Some(target), Kind::Dict(incoming)) = (existing.as_dict_mut(), value.kind) {
            target.extend(incoming);
        }
        return;
    }

    match existing.as_dict_mut() {
        Some(inner) => merge_dotted(inner, &segments[1..], value),
        // descending through a non-dict value drops the remainder
        None => {}
    }
}

fn wrap_segments(segments: &[&str], value: Node) -> Node {
    match segments.split_last() {
        None => value,
        Some((last, rest)) => {
            let mut node = Node::dict(vec![Node::key(*last, Some(value))]);
            for segment in rest.iter().rev() {
                node = Node::dict(vec![Node::key(*segment, Some(node))]);
            }
            node
        }
    }
}

/// Stable sort of dict children by key name.
pub(crate) fn sort_keys(children: &mut [Node]) {
    children.sort_by(|a, b| a.key_name().cmp(&b.key_name()));
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vars::Vars;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn must_load(value: serde_json::Value) -> Node {
        load(value).unwrap().unwrap()
    }

    #[test]
    fn load_sorts_dict_keys() {
        let node = must_load(json!({"b": 1, "a": 2, "c": 3}));
        assert_eq!(node.to_string(), "{a:2},{b:1},{c:3}");
    }

    #[test]
    fn load_drops_null_values() {
        let node = must_load(json!({"keep": 1, "drop": null}));
        assert_eq!(node.to_string(), "{keep:1}");
    }

    #[test]
    fn load_denormalizes_dotted_map_keys() {
        let node = must_load(json!({
            "inputs.x": {"ssl": {"certificate": "/etc/ssl/my.crt"}}
        }));
        assert_eq!(
            node.to_value(),
            json!({"inputs": {"x": {"ssl": {"certificate": "/etc/ssl/my.crt"}}}})
        );
    }

    #[test]
    fn load_merges_dotted_map_keys_with_existing_structure() {
        let node = must_load(json!({
            "inputs": {
                "x": {"ssl": {"ca": ["ca1", "ca2"]}},
                "x.ssl": {"certificate": "/etc/ssl/my.crt"}
            }
        }));
        assert_eq!(
            node.to_value(),
            json!({"inputs": {"x": {"ssl": {
                "ca": ["ca1", "ca2"],
                "certificate": "/etc/ssl/my.crt"
            }}}})
        );
    }

    #[test]
    fn load_keeps_compact_keys_for_scalar_values() {
        let node = must_load(json!({"data_stream.namespace": "ns"}));
        assert!(node.find("data_stream.namespace").is_some());
        assert!(node.find("data_stream").is_none());
    }

    #[test]
    fn find_list_by_index() {
        let node = must_load(json!(["a", "b"]));
        assert_eq!(node.find("1").unwrap().as_str(), Some("b"));
        assert!(node.find("2").is_none());
        assert!(node.find("-1").is_none());
        assert!(node.find("x").is_none());
    }

    #[test]
    fn hash_is_stable() {
        let node = must_load(json!({"a": [1, 2], "b": {"c": true}}));
        assert_eq!(node.hash(), node.hash());
    }

    #[test]
    fn hash_ignores_map_input_order() {
        let a = must_load(json!({"a": 1, "b": 2}));
        let b = must_load(json!({"b": 2, "a": 1}));
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn hash_is_sensitive_to_list_order() {
        let a = must_load(json!(["x", "y"]));
        let b = must_load(json!(["y", "x"]));
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn numerically_equal_scalars_hash_identically() {
        assert_eq!(Node::int(1).hash(), Node::float(1.0).hash());
        assert_eq!(Node::int(1).hash(), Node::uint(1).hash());
        assert_ne!(Node::bool(true).hash(), Node::bool(false).hash());
    }

    #[test]
    fn apply_replaces_embedded_variables() {
        let vars = Vars::new(json!({"var1": {"key1": "value1"}})).unwrap();
        let node = must_load(json!({"paths": ["/var/log/${var1.key1}"]}));
        let applied = node.apply(&vars).unwrap().unwrap();
        assert_eq!(applied.to_value(), json!({"paths": ["/var/log/value1"]}));
    }

    #[test]
    fn apply_stringifies_numeric_variables_inline() {
        let vars = Vars::new(json!({"var1": {"key1": 1}})).unwrap();
        let node = must_load(json!({"paths": ["/var/log/${var1.key1}"]}));
        let applied = node.apply(&vars).unwrap().unwrap();
        assert_eq!(applied.to_value(), json!({"paths": ["/var/log/1"]}));
    }

    #[test]
    fn condition_false_removes_enclosing_dict() {
        let vars = Vars::new(json!({})).unwrap();
        for condition in [json!(false), json!("false")] {
            let node = must_load(json!({
                "inputs": [
                    {"type": "logfile", "paths": ["/var/log/syslog"]},
                    {"type": "logfile", "paths": ["/var/log/other"], "condition": condition}
                ]
            }));
            let applied = node.apply(&vars).unwrap().unwrap();
            assert_eq!(
                applied.to_value(),
                json!({"inputs": [{"paths": ["/var/log/syslog"], "type": "logfile"}]})
            );
        }
    }

    #[test]
    fn condition_true_is_removed_from_output() {
        let vars = Vars::new(json!({})).unwrap();
        for condition in [json!(true), json!("true")] {
            let node = must_load(json!({
                "inputs": [{"type": "logfile", "condition": condition}]
            }));
            let applied = node.apply(&vars).unwrap().unwrap();
            assert_eq!(applied.to_value(), json!({"inputs": [{"type": "logfile"}]}));
        }
    }

    #[test]
    fn condition_eval_against_vars() {
        let vars = Vars::new(json!({"host": {"labels": ["label1", "label2"]}})).unwrap();
        let node = must_load(json!({
            "inputs": [
                {"type": "a", "condition": "contains(${host.labels}, 'label2')"},
                {"type": "b", "condition": "contains(${host.labels}, 'missing')"}
            ]
        }));
        let applied = node.apply(&vars).unwrap().unwrap();
        assert_eq!(applied.to_value(), json!({"inputs": [{"type": "a"}]}));
    }

    #[test]
    fn processors_propagate_from_children() {
        let attachment: Processors = vec![json!({"add_fields": {"fields": {"a": 1}}})];
        let inner = Node::str("value").with_processors(attachment.clone());
        let node = Node::dict(vec![Node::key("k", Some(Node::list(vec![inner])))]);
        assert_eq!(node.processors(), Some(&attachment));
    }

    #[test]
    fn serialize_renders_generic_projection() {
        let node = must_load(json!({"b": [1, true, "x"], "a": {"c": 1.5}}));
        assert_eq!(
            serde_json::to_string(&node).unwrap(),
            r#"{"a":{"c":1.5},"b":[1,true,"x"]}"#
        );
    }
}
