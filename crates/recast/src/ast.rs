//! document tree
//!
//! [Ast] wraps the root [Node] of a configuration document and provides the
//! operations the rule engine builds on: dotted-selector lookup, sub-tree
//! extraction, insertion with intermediate-dict creation, combination of two
//! documents, content hashing and the generic-value projection.
//!
//! Selectors are dotted paths (`inputs.0.type`). Each segment resolves with
//! [Node::find], so list elements address by decimal index. A key that was
//! loaded in compact dotted form (see [crate::node]) is addressed by its
//! full compact name, not segment by segment.
use crate::error::Error;
use crate::node::{self, Kind, Node};
use crate::vars::Vars;
use base64::Engine;
use serde::Serializer;

const SELECTOR_SEP: char = '.';

/// A configuration document.
#[derive(Debug, Clone)]
pub struct Ast {
    root: Node,
}

impl Ast {
    /// Builds a document from a generic map.
    pub fn new(map: serde_json::Map<String, serde_json::Value>) -> Result<Ast, Error> {
        Ok(Ast {
            root: node::load_map(map)?,
        })
    }

    /// Builds a document from a generic value. The top level must be a map
    /// or an array.
    pub fn from_value(value: serde_json::Value) -> Result<Ast, Error> {
        match value {
            serde_json::Value::Object(map) => Ast::new(map),
            serde_json::Value::Array(items) => Ok(Ast {
                root: node::load_list(items)?,
            }),
            other => Err(Error::unexpected("collection", value_type_name(&other), "")),
        }
    }

    pub(crate) fn from_node(root: Node) -> Ast {
        Ast { root }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub(crate) fn root_mut(&mut self) -> &mut Node {
        &mut self.root
    }

    /// Consumes the document, handing out its root node.
    pub fn into_root(self) -> Node {
        self.root
    }

    /// Content hash of the whole document.
    pub fn hash(&self) -> Vec<u8> {
        self.root.hash()
    }

    /// Content hash, URL-safe base64 encoded.
    pub fn hash_str(&self) -> String {
        base64::engine::general_purpose::URL_SAFE.encode(self.root.hash())
    }

    /// Resolves a dotted selector to the node at that position.
    pub fn lookup(&self, selector: &str) -> Option<&Node> {
        let mut current = &self.root;
        for part in split_path(selector) {
            current = current.find(part)?;
        }
        Some(current)
    }

    pub(crate) fn lookup_mut(&mut self, selector: &str) -> Option<&mut Node> {
        let mut current = &mut self.root;
        for part in split_path(selector) {
            current = current.find_mut(part)?;
        }
        Some(current)
    }

    /// Resolves a dotted selector to a string value. Anything that is not a
    /// key holding a string resolves to `None`.
    pub fn lookup_string(&self, selector: &str) -> Option<&str> {
        self.lookup(selector)?.key_value()?.as_str()
    }

    /// Extracts the minimal sub-document spanning root to the selected
    /// node, preserving its ancestry shape.
    pub fn select(&self, selector: &str) -> Option<Ast> {
        let mut chain = Vec::new();
        let mut current = &self.root;
        for part in split_path(selector) {
            current = current.find(part)?;
            chain.push(current);
        }

        let Some(last) = chain.pop() else {
            return Some(Ast {
                root: Node::dict(Vec::new()),
            });
        };

        let mut acc = last.clone();
        for ancestor in chain.into_iter().rev() {
            let name = ancestor.key_name()?;
            acc = Node::key(name, Some(Node::dict(vec![acc])));
        }
        Some(Ast {
            root: Node::dict(vec![acc]),
        })
    }

    /// Attaches a node at the selector position, creating intermediate
    /// dicts along the way.
    ///
    /// When the target already holds a dict and `node` is a key, a
    /// same-named existing key is replaced and the dict re-sorted, so a
    /// repeated insert leaves exactly one key of that name.
    pub fn insert(&mut self, node: Node, to: &str) -> Result<(), Error> {
        let mut current = &mut self.root;
        for part in split_path(to) {
            current = step_or_create(current, part, to)?;
        }

        // a list element resolves to a dict, not a key
        if current.as_dict().is_some() {
            let Some(name) = node.key_name().map(str::to_string) else {
                return Err(Error::unexpected("key", node.type_name(), to));
            };
            if let Some(children) = current.as_dict_mut() {
                children.retain(|child| child.key_name() != Some(name.as_str()));
                children.push(node);
                node::sort_keys(children);
            }
            return Ok(());
        }

        if current.key_name().is_none() {
            return Err(Error::unexpected("key", current.type_name(), to));
        }

        match &node.kind {
            Kind::Dict(_) | Kind::List(_) => current.set_key_value(Some(node)),
            Kind::Key { name, .. } => {
                match current.key_value_mut().and_then(Node::as_dict_mut) {
                    None => current.set_key_value(Some(Node::dict(vec![node]))),
                    Some(children) => {
                        children.retain(|child| child.key_name() != Some(name.as_str()));
                        children.push(node);
                        node::sort_keys(children);
                    }
                }
            }
            _ => current.set_key_value(Some(Node::dict(vec![node]))),
        }
        Ok(())
    }

    /// Combines two documents with same-shaped roots. Dict roots append the
    /// other document's keys (a key present in both is an error), list
    /// roots concatenate.
    pub fn combine(mut self, other: Ast) -> Result<Ast, Error> {
        let own_type = self.root.type_name();
        match (&mut self.root.kind, other.root.kind) {
            (Kind::Dict(target), Kind::Dict(incoming)) => {
                for key in incoming {
                    let name = key.key_name().unwrap_or_default().to_string();
                    if target.iter().any(|c| c.key_name() == Some(name.as_str())) {
                        return Err(Error::DuplicateKey(name));
                    }
                    target.push(key);
                }
                Ok(self)
            }
            (Kind::List(target), Kind::List(incoming)) => {
                target.extend(incoming);
                Ok(self)
            }
            (_, incoming) => Err(Error::unexpected(
                own_type,
                Node::from(incoming).type_name(),
                "",
            )),
        }
    }

    /// Compares the element count under a selector. An unresolved selector
    /// counts as zero.
    pub fn count_comp(&self, selector: &str, compare: impl Fn(usize) -> bool) -> bool {
        let count = match self.lookup(selector) {
            None => 0,
            Some(node) => {
                let value = node.key_value().unwrap_or(node);
                match value.kind() {
                    Kind::Dict(children) => children.len(),
                    Kind::List(items) => items.len(),
                    _ => 1,
                }
            }
        };
        compare(count)
    }

    /// Substitutes the variable context throughout the document. A false
    /// root-level condition collapses the document to an empty dict.
    pub fn apply(&mut self, vars: &Vars) -> Result<(), Error> {
        self.root = self
            .root
            .apply(vars)?
            .unwrap_or_else(|| Node::dict(Vec::new()));
        Ok(())
    }

    /// Generic-value projection of the document.
    pub fn to_value(&self) -> serde_json::Value {
        self.root.to_value()
    }

    /// Generic-map projection. Errors when the root is not a dict.
    pub fn map(&self) -> Result<serde_json::Map<String, serde_json::Value>, Error> {
        match self.to_value() {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(Error::unexpected("dict", self.root.type_name(), "")),
        }
    }
}

/// Equality is content-hash equality.
impl PartialEq for Ast {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl serde::ser::Serialize for Ast {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.root.serialize(serializer)
    }
}

pub(crate) fn split_path(selector: &str) -> Vec<&str> {
    if selector.is_empty() {
        return Vec::new();
    }
    selector.split(SELECTOR_SEP).collect()
}

/// One step of an insert walk. Resolves `part` under `node`, creating the
/// missing structure the way an insert expects it.
fn step_or_create<'a>(node: &'a mut Node, part: &str, selector: &str) -> Result<&'a mut Node, Error> {
    let type_name = node.type_name();
    match &mut node.kind {
        Kind::Dict(children) => {
            match children.iter().position(|c| c.key_name() == Some(part)) {
                Some(i) => Ok(&mut children[i]),
                None => {
                    // insert at the sorted position so key order stays
                    // lexicographic without a full re-sort
                    let at = children
                        .iter()
                        .position(|c| c.key_name().is_some_and(|n| n > part))
                        .unwrap_or(children.len());
                    children.insert(at, Node::key(part, Some(Node::dict(Vec::new()))));
                    Ok(&mut children[at])
                }
            }
        }
        Kind::Key { value, .. } => match value {
            Some(value) => step_or_create(value, part, selector),
            None => Err(Error::unexpected("collection", "empty key", selector)),
        },
        Kind::List(items) => {
            match part.parse::<usize>().ok().filter(|&i| i < items.len()) {
                Some(i) => Ok(&mut items[i]),
                None => {
                    // indexing past the end appends a fresh dict, covering
                    // the index-zero-on-empty-list pattern
                    items.push(Node::dict(Vec::new()));
                    let last = items.len() - 1;
                    Ok(&mut items[last])
                }
            }
        }
        _ => Err(Error::unexpected("collection", type_name, selector)),
    }
}

fn value_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "list",
        serde_json::Value::Object(_) => "dict",
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ast(value: serde_json::Value) -> Ast {
        Ast::from_value(value).unwrap()
    }

    #[test]
    fn lookup_resolves_nested_paths() {
        let doc = ast(json!({"outputs": {"default": {"type": "es", "hosts": ["localhost"]}}}));
        assert_eq!(doc.lookup_string("outputs.default.type"), Some("es"));
        assert_eq!(
            doc.lookup("outputs.default.hosts.0").unwrap().as_str(),
            Some("localhost")
        );
        assert!(doc.lookup("outputs.missing").is_none());
    }

    #[test]
    fn lookup_string_rejects_non_strings() {
        let doc = ast(json!({"port": 9200}));
        assert_eq!(doc.lookup_string("port"), None);
    }

    #[test]
    fn select_preserves_ancestry_shape() {
        let doc = ast(json!({"inputs.x": {"ssl": {"certificate": "/etc/ssl/my.crt"}}}));
        let sub = doc.select("inputs.x.ssl").unwrap();
        assert_eq!(
            sub.to_value(),
            json!({"inputs": {"x": {"ssl": {"certificate": "/etc/ssl/my.crt"}}}})
        );
        assert!(doc.select("inputs.y").is_none());
    }

    #[test]
    fn insert_creates_intermediate_dicts() {
        let mut doc = ast(json!({"b": 1}));
        doc.insert(Node::key("leaf", Some(Node::str("v"))), "a.deep")
            .unwrap();
        assert_eq!(doc.to_value(), json!({"a": {"deep": {"leaf": "v"}}, "b": 1}));
    }

    #[test]
    fn insert_replaces_existing_key_exactly_once() {
        let mut doc = ast(json!({"dict": {"keep": true, "target": "old"}}));
        doc.insert(Node::key("target", Some(Node::str("new"))), "dict")
            .unwrap();
        doc.insert(Node::key("target", Some(Node::str("newer"))), "dict")
            .unwrap();
        assert_eq!(
            doc.to_value(),
            json!({"dict": {"keep": true, "target": "newer"}})
        );
    }

    #[test]
    fn insert_into_empty_list_appends_dict() {
        let mut doc = ast(json!({"inputs": []}));
        doc.insert(Node::key("type", Some(Node::str("logfile"))), "inputs.0")
            .unwrap();
        assert_eq!(doc.to_value(), json!({"inputs": [{"type": "logfile"}]}));
    }

    #[test]
    fn insert_into_list_element_replaces_same_named_key() {
        let mut doc = ast(json!({"inputs": [{"keep": 1, "type": "old"}]}));
        doc.insert(Node::key("type", Some(Node::str("new"))), "inputs.0")
            .unwrap();
        assert_eq!(doc.to_value(), json!({"inputs": [{"keep": 1, "type": "new"}]}));
    }

    #[test]
    fn insert_rejects_scalar_intermediates() {
        let mut doc = ast(json!({"leaf": "scalar"}));
        let err = doc
            .insert(Node::key("x", Some(Node::int(1))), "leaf.deeper")
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedType { .. }));
    }

    #[test]
    fn combine_dicts_errors_on_duplicate_key() {
        let a = ast(json!({"x": 1}));
        let b = ast(json!({"y": 2}));
        assert_eq!(a.clone().combine(b).unwrap().to_value(), json!({"x": 1, "y": 2}));

        let dup = ast(json!({"x": 9}));
        let err = a.combine(dup).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(key) if key == "x"));
    }

    #[test]
    fn combine_lists_concatenates() {
        let a = ast(json!(["a"]));
        let b = ast(json!(["b", "c"]));
        assert_eq!(a.combine(b).unwrap().to_value(), json!(["a", "b", "c"]));
    }

    #[test]
    fn combine_rejects_mismatched_roots() {
        let a = ast(json!({"x": 1}));
        let b = ast(json!(["x"]));
        assert!(a.combine(b).is_err());
    }

    #[test]
    fn count_comp_counts_container_elements() {
        let doc = ast(json!({"inputs": [1, 2, 3], "name": "x"}));
        assert!(doc.count_comp("inputs", |n| n == 3));
        assert!(doc.count_comp("name", |n| n == 1));
        assert!(doc.count_comp("missing", |n| n == 0));
    }

    #[test]
    fn hash_equality_ignores_input_order() {
        let a = ast(json!({"a": 1, "b": {"c": [true, "x"]}}));
        let b = ast(json!({"b": {"c": [true, "x"]}, "a": 1}));
        assert_eq!(a, b);
        assert_eq!(a.hash_str(), b.hash_str());

        let c = ast(json!({"a": 2, "b": {"c": [true, "x"]}}));
        assert!(a != c);
    }

    #[test]
    fn serialize_projects_to_generic_map() {
        let doc = ast(json!({"z": 1, "a": {"nested": [1, 2]}}));
        assert_eq!(
            serde_yaml::to_string(&doc).unwrap(),
            "a:\n  nested:\n  - 1\n  - 2\nz: 1\n"
        );
    }
}
