//! rule engine
//!
//! A [Rule] is a named, self-contained document rewrite. A [RuleList]
//! threads one [Ast] through a sequence of rules, each operating on the
//! result of the previous one, failing fast on the first error.
//!
//! Rule pipelines round-trip through a generic document form: a list of
//! single-key maps where the key is the rule name and the value is the
//! rule's own field set, e.g.
//!
//! ```yaml
//! - rename:
//!     from: inputs
//!     to: sources
//! - filter:
//!     selectors:
//!     - sources
//! ```
//!
//! An unknown rule name fails decoding. Rules that resolve a selector
//! treat an unresolved path as a silent no-op, only structural mismatches
//! (wrong node shape at a resolved path) are errors.
use crate::ast::Ast;
use crate::error::Error;
use crate::node::{self, Kind, Node};
use derive_new::new;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A dotted path into a document.
pub type Selector = String;

const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_DATASET: &str = "generic";

/// An ordered rule pipeline.
#[derive(Debug, Clone, Default)]
pub struct RuleList {
    rules: Vec<Rule>,
}

/// One pipeline entry on the wire: a single-key map keyed by the rule
/// name, not a YAML tag.
#[derive(Deserialize)]
struct TaggedRule(#[serde(with = "serde_yaml::with::singleton_map")] Rule);

impl Serialize for RuleList {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        struct Tagged<'a>(&'a Rule);
        impl Serialize for Tagged<'_> {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serde_yaml::with::singleton_map::serialize(self.0, serializer)
            }
        }
        serializer.collect_seq(self.rules.iter().map(Tagged))
    }
}

impl<'de> Deserialize<'de> for RuleList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entries = Vec::<TaggedRule>::deserialize(deserializer)?;
        Ok(RuleList {
            rules: entries.into_iter().map(|TaggedRule(rule)| rule).collect(),
        })
    }
}

impl RuleList {
    pub fn new(rules: Vec<Rule>) -> RuleList {
        RuleList { rules }
    }

    /// Applies every rule in order, feeding each the output of the
    /// previous one.
    pub fn apply(&self, ast: &mut Ast) -> Result<(), Error> {
        for rule in &self.rules {
            tracing::debug!(rule = rule.name(), "applying rule");
            rule.apply(ast).map_err(|source| Error::Rule {
                name: rule.name(),
                source: Box::new(source),
            })?;
        }
        Ok(())
    }
}

impl From<Vec<Rule>> for RuleList {
    fn from(rules: Vec<Rule>) -> Self {
        RuleList { rules }
    }
}

/// All available rewrite rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    SelectInto(SelectIntoRule),
    RemoveKey(RemoveKeyRule),
    MakeArray(MakeArrayRule),
    Copy(CopyRule),
    CopyToList(CopyToListRule),
    CopyAllToList(CopyAllToListRule),
    Rename(RenameRule),
    Translate(TranslateRule),
    TranslateWithRegexp(TranslateWithRegexpRule),
    Map(MapRule),
    Filter(FilterRule),
    FilterValues(FilterValuesRule),
    FilterValuesWithRegexp(FilterValuesWithRegexpRule),
    ExtractListItems(ExtractListItemRule),
    InjectIndex(InjectIndexRule),
    InjectStreamProcessor(InjectStreamProcessorRule),
    FixStream(FixStreamRule),
}

impl Rule {
    /// The rule's wire name, also used in error chains.
    pub fn name(&self) -> &'static str {
        match self {
            Rule::SelectInto(_) => "select_into",
            Rule::RemoveKey(_) => "remove_key",
            Rule::MakeArray(_) => "make_array",
            Rule::Copy(_) => "copy",
            Rule::CopyToList(_) => "copy_to_list",
            Rule::CopyAllToList(_) => "copy_all_to_list",
            Rule::Rename(_) => "rename",
            Rule::Translate(_) => "translate",
            Rule::TranslateWithRegexp(_) => "translate_with_regexp",
            Rule::Map(_) => "map",
            Rule::Filter(_) => "filter",
            Rule::FilterValues(_) => "filter_values",
            Rule::FilterValuesWithRegexp(_) => "filter_values_with_regexp",
            Rule::ExtractListItems(_) => "extract_list_items",
            Rule::InjectIndex(_) => "inject_index",
            Rule::InjectStreamProcessor(_) => "inject_stream_processor",
            Rule::FixStream(_) => "fix_stream",
        }
    }

    pub fn apply(&self, ast: &mut Ast) -> Result<(), Error> {
        match self {
            Rule::SelectInto(rule) => rule.apply(ast),
            Rule::RemoveKey(rule) => rule.apply(ast),
            Rule::MakeArray(rule) => rule.apply(ast),
            Rule::Copy(rule) => rule.apply(ast),
            Rule::CopyToList(rule) => rule.apply(ast),
            Rule::CopyAllToList(rule) => rule.apply(ast),
            Rule::Rename(rule) => rule.apply(ast),
            Rule::Translate(rule) => rule.apply(ast),
            Rule::TranslateWithRegexp(rule) => rule.apply(ast),
            Rule::Map(rule) => rule.apply(ast),
            Rule::Filter(rule) => rule.apply(ast),
            Rule::FilterValues(rule) => rule.apply(ast),
            Rule::FilterValuesWithRegexp(rule) => rule.apply(ast),
            Rule::ExtractListItems(rule) => rule.apply(ast),
            Rule::InjectIndex(rule) => rule.apply(ast),
            Rule::InjectStreamProcessor(rule) => rule.apply(ast),
            Rule::FixStream(rule) => rule.apply(ast),
        }
    }
}

/// How a copied node merges into a target that already has a node of the
/// same name. Unrecognized names fall back to appending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeStrategy {
    InsertBefore,
    InsertAfter,
    Replace,
    Noop,
}

impl MergeStrategy {
    fn from_name(name: &str) -> MergeStrategy {
        match name {
            "insert_before" => MergeStrategy::InsertBefore,
            "replace" => MergeStrategy::Replace,
            "noop" => MergeStrategy::Noop,
            _ => MergeStrategy::InsertAfter,
        }
    }

    fn inject(self, target: Vec<Node>, mut source: Vec<Node>) -> Vec<Node> {
        match self {
            MergeStrategy::InsertBefore => {
                source.extend(target);
                source
            }
            MergeStrategy::InsertAfter => {
                let mut target = target;
                target.extend(source);
                target
            }
            MergeStrategy::Replace => source,
            MergeStrategy::Noop => target,
        }
    }

    fn inject_item(self, target: Vec<Node>, item: Node) -> Vec<Node> {
        self.inject(target, vec![item])
    }
}

/// Gathers the nodes at a set of selectors into a new dict inserted at
/// `path`. Nothing is inserted when no selector resolves.
#[derive(Debug, Clone, Serialize, Deserialize, new)]
pub struct SelectIntoRule {
    pub selectors: Vec<Selector>,
    pub path: String,
}

impl SelectIntoRule {
    fn apply(&self, ast: &mut Ast) -> Result<(), Error> {
        let mut children = Vec::new();
        for selector in &self.selectors {
            if let Some(node) = ast.lookup(selector) {
                children.push(node.clone());
            }
        }
        if children.is_empty() {
            return Ok(());
        }
        ast.insert(Node::dict(children), &self.path)
    }
}

/// Removes one top-level key from the document.
#[derive(Debug, Clone, Serialize, Deserialize, new)]
pub struct RemoveKeyRule {
    pub key: String,
}

impl RemoveKeyRule {
    fn apply(&self, ast: &mut Ast) -> Result<(), Error> {
        if let Some(children) = ast.root_mut().as_dict_mut() {
            if let Some(i) = children
                .iter()
                .position(|child| child.key_name() == Some(self.key.as_str()))
            {
                children.remove(i);
            }
        }
        Ok(())
    }
}

/// Wraps the value at `item` into a single-element list inserted at `to`.
#[derive(Debug, Clone, Serialize, Deserialize, new)]
pub struct MakeArrayRule {
    pub item: Selector,
    pub to: String,
}

impl MakeArrayRule {
    fn apply(&self, ast: &mut Ast) -> Result<(), Error> {
        let list = match ast.lookup(&self.item).and_then(Node::key_value) {
            None => return Ok(()),
            Some(value) => Node::list(vec![value.clone()]),
        };
        ast.insert(list, &self.to)
    }
}

/// Copies the node at `from` to `to` with insert's replace semantics.
#[derive(Debug, Clone, Serialize, Deserialize, new)]
pub struct CopyRule {
    pub from: Selector,
    pub to: Selector,
}

impl CopyRule {
    fn apply(&self, ast: &mut Ast) -> Result<(), Error> {
        let Some(node) = ast.lookup(&self.from).cloned() else {
            return Ok(());
        };
        ast.insert(node, &self.to)
    }
}

/// Copies the node at `item` into every dict element of the list at `to`,
/// resolving name conflicts with the configured merge strategy.
#[derive(Debug, Clone, Serialize, Deserialize, new)]
pub struct CopyToListRule {
    pub item: Selector,
    pub to: String,
    #[serde(default)]
    pub on_conflict: String,
}

impl CopyToListRule {
    fn apply(&self, ast: &mut Ast) -> Result<(), Error> {
        let strategy = MergeStrategy::from_name(&self.on_conflict);

        let Some(source) = ast.lookup(&self.item).cloned() else {
            return Ok(());
        };
        let Some(target) = ast.lookup_mut(&self.to) else {
            return Ok(());
        };
        let Some(items) = target.key_value_mut().and_then(Node::as_list_mut) else {
            return Ok(());
        };

        for item in items.iter_mut() {
            let Some(children) = item.as_dict_mut() else {
                continue;
            };
            let conflict = children
                .iter()
                .position(|child| child.key_name() == Some(self.item.as_str()));
            match conflict {
                None => children.push(source.clone()),
                Some(i) => {
                    let incoming = match source.key_value().map(Node::kind) {
                        Some(Kind::Dict(nodes)) | Some(Kind::List(nodes)) => nodes.clone(),
                        Some(_) => source.key_value().cloned().into_iter().collect(),
                        None => continue,
                    };
                    let Some(existing) = children[i].key_value_mut() else {
                        continue;
                    };
                    if let Some(list) = existing.as_list_mut() {
                        let current = std::mem::take(list);
                        *list = strategy.inject(current, incoming);
                    } else if let Some(dict) = existing.as_dict_mut() {
                        // only key nodes can live inside a dict
                        let incoming: Vec<Node> = incoming
                            .into_iter()
                            .filter(|node| node.key_name().is_some())
                            .collect();
                        if incoming.is_empty() {
                            continue;
                        }
                        let current = std::mem::take(dict);
                        *dict = strategy.inject(current, incoming);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Copies every top-level node except a blocklist into the list at `to`.
#[derive(Debug, Clone, Serialize, Deserialize, new)]
pub struct CopyAllToListRule {
    pub to: String,
    #[serde(default)]
    pub except: Vec<String>,
    #[serde(default)]
    pub on_conflict: String,
}

impl CopyAllToListRule {
    fn apply(&self, ast: &mut Ast) -> Result<(), Error> {
        let names: Vec<String> = ast
            .root()
            .as_dict()
            .map(|children| {
                children
                    .iter()
                    .filter_map(Node::key_name)
                    .filter(|name| !self.except.iter().any(|e| e == name))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        for name in names {
            CopyToListRule {
                item: name,
                to: self.to.clone(),
                on_conflict: self.on_conflict.clone(),
            }
            .apply(ast)?;
        }
        Ok(())
    }
}

/// Renames the key resolved by `from` to a new name, keeping its value.
#[derive(Debug, Clone, Serialize, Deserialize, new)]
pub struct RenameRule {
    pub from: Selector,
    pub to: String,
}

impl RenameRule {
    fn apply(&self, ast: &mut Ast) -> Result<(), Error> {
        let Some(node) = ast.lookup_mut(&self.from) else {
            return Ok(());
        };
        let type_name = node.type_name();
        match &mut node.kind {
            Kind::Key { name, .. } => {
                *name = self.to.clone();
                Ok(())
            }
            _ => Err(Error::unexpected("key", type_name, &self.from)),
        }
    }
}

/// Replaces the value at `path` through a translation table.
#[derive(Debug, Clone, Serialize, Deserialize, new)]
pub struct TranslateRule {
    pub path: Selector,
    pub mapper: IndexMap<String, serde_json::Value>,
}

impl TranslateRule {
    fn apply(&self, ast: &mut Ast) -> Result<(), Error> {
        let Some(node) = ast.lookup_mut(&self.path) else {
            return Ok(());
        };
        if node.key_name().is_none() {
            return Err(Error::unexpected("key", node.type_name(), &self.path));
        }
        for (candidate, replacement) in &self.mapper {
            let matches = node.key_value().and_then(Node::as_str) == Some(candidate.as_str());
            if matches {
                node.set_key_value(node::load(replacement.clone())?);
            }
        }
        Ok(())
    }
}

/// Rewrites the string value at `path` through a regular expression,
/// `with` may reference capture groups.
#[derive(Debug, Clone, Serialize, Deserialize, new)]
pub struct TranslateWithRegexpRule {
    pub path: Selector,
    #[serde(with = "regex_string")]
    pub re: Regex,
    pub with: String,
}

impl TranslateWithRegexpRule {
    fn apply(&self, ast: &mut Ast) -> Result<(), Error> {
        let Some(node) = ast.lookup_mut(&self.path) else {
            return Ok(());
        };
        let type_name = node.type_name();
        let Some(candidate) = node.key_value().and_then(Node::as_str) else {
            return Err(Error::unexpected("string", type_name, &self.path));
        };
        let translated = self.re.replace_all(candidate, self.with.as_str()).into_owned();
        node.set_key_value(Some(Node::str(translated)));
        Ok(())
    }
}

/// Applies a nested rule pipeline to every element of the list (or to the
/// dict) at `path`.
#[derive(Debug, Clone, Serialize, Deserialize, new)]
pub struct MapRule {
    pub path: Selector,
    pub rules: RuleList,
}

impl MapRule {
    fn apply(&self, ast: &mut Ast) -> Result<(), Error> {
        let Some(node) = ast.lookup_mut(&self.path) else {
            return Ok(());
        };
        let type_name = node.type_name();
        let Some(value) = node.key_value_mut() else {
            return Err(Error::unexpected("key", type_name, &self.path));
        };

        if value.as_list().is_some() {
            if let Some(items) = value.as_list_mut() {
                for item in items.iter_mut() {
                    let owned = std::mem::replace(item, Node::dict(Vec::new()));
                    let mut sub = Ast::from_node(owned);
                    self.rules.apply(&mut sub)?;
                    *item = sub.into_root();
                }
            }
            Ok(())
        } else if value.as_dict().is_some() {
            let owned = std::mem::replace(value, Node::dict(Vec::new()));
            let mut sub = Ast::from_node(owned);
            self.rules.apply(&mut sub)?;
            *value = sub.into_root();
            Ok(())
        } else {
            Err(Error::unexpected("collection", value.type_name(), &self.path))
        }
    }
}

/// Reduces the document to the union of the given selector paths.
/// Selectors that do not resolve are omitted; none resolving leaves an
/// empty dict.
#[derive(Debug, Clone, Serialize, Deserialize, new)]
pub struct FilterRule {
    pub selectors: Vec<Selector>,
}

impl FilterRule {
    fn apply(&self, ast: &mut Ast) -> Result<(), Error> {
        let mut merged = Ast::from_node(Node::dict(Vec::new()));
        for selector in &self.selectors {
            let Some(sub) = ast.select(selector) else {
                continue;
            };
            merged = merged.combine(sub)?;
        }
        *ast = merged;
        Ok(())
    }
}

/// Keeps only the elements of the list at `selector` whose value at `key`
/// is one of `values`. Elements without the key pass through.
#[derive(Debug, Clone, Serialize, Deserialize, new)]
pub struct FilterValuesRule {
    pub selector: Selector,
    pub key: Selector,
    pub values: Vec<serde_json::Value>,
}

impl FilterValuesRule {
    fn apply(&self, ast: &mut Ast) -> Result<(), Error> {
        let Some(node) = ast.lookup_mut(&self.selector) else {
            return Ok(());
        };
        let type_name = node.type_name();
        let Some(items) = node.key_value_mut().and_then(Node::as_list_mut) else {
            return Err(Error::unexpected("list", type_name, &self.selector));
        };

        let mut kept = Vec::with_capacity(items.len());
        for item in items.drain(..) {
            let keep = match item.find(&self.key) {
                None => true,
                Some(found) => found
                    .key_value()
                    .is_some_and(|value| self.values.iter().any(|v| *v == value.to_value())),
            };
            if keep {
                kept.push(item);
            }
        }
        *items = kept;
        Ok(())
    }
}

/// Like [FilterValuesRule] but matching string values against a regular
/// expression. A non-string value at `key` is an error.
#[derive(Debug, Clone, Serialize, Deserialize, new)]
pub struct FilterValuesWithRegexpRule {
    pub selector: Selector,
    pub key: Selector,
    #[serde(with = "regex_string")]
    pub re: Regex,
}

impl FilterValuesWithRegexpRule {
    fn apply(&self, ast: &mut Ast) -> Result<(), Error> {
        let Some(node) = ast.lookup_mut(&self.selector) else {
            return Ok(());
        };
        let type_name = node.type_name();
        let Some(items) = node.key_value_mut().and_then(Node::as_list_mut) else {
            return Err(Error::unexpected("list", type_name, &self.selector));
        };

        let mut kept = Vec::with_capacity(items.len());
        for item in items.drain(..) {
            let keep = match item.find(&self.key) {
                None => true,
                Some(found) => {
                    let value = found.key_value().ok_or_else(|| {
                        Error::unexpected("string", "empty key", &self.key)
                    })?;
                    let Some(candidate) = value.as_str() else {
                        return Err(Error::unexpected("string", value.type_name(), &self.key));
                    };
                    self.re.is_match(candidate)
                }
            };
            if keep {
                kept.push(item);
            }
        }
        *items = kept;
        Ok(())
    }
}

/// Collects the child named `item` from every element of the list at
/// `path` into a flat list inserted at `to`. A child that is itself a
/// list contributes its elements individually.
#[derive(Debug, Clone, Serialize, Deserialize, new)]
pub struct ExtractListItemRule {
    pub path: Selector,
    pub item: String,
    pub to: String,
}

impl ExtractListItemRule {
    fn apply(&self, ast: &mut Ast) -> Result<(), Error> {
        let mut extracted = Vec::new();
        {
            let Some(node) = ast.lookup(&self.path) else {
                return Ok(());
            };
            let Some(items) = node.key_value().and_then(Node::as_list) else {
                return Ok(());
            };
            for element in items {
                let Some(value) = element.find(&self.item).and_then(Node::key_value) else {
                    continue;
                };
                match value.as_list() {
                    Some(inner) => extracted.extend(inner.iter().cloned()),
                    None => extracted.push(value.clone()),
                }
            }
        }
        ast.insert(Node::list(extracted), &self.to)
    }
}

/// Appends an `index` key to every stream of every input, in the
/// `{type}-{dataset}-{namespace}` form.
#[derive(Debug, Clone, Serialize, Deserialize, new)]
pub struct InjectIndexRule {
    #[serde(rename = "type")]
    pub index_type: String,
}

impl InjectIndexRule {
    fn apply(&self, ast: &mut Ast) -> Result<(), Error> {
        let Some(inputs) = ast.lookup_mut("inputs") else {
            return Ok(());
        };
        let Some(items) = inputs.key_value_mut().and_then(Node::as_list_mut) else {
            return Ok(());
        };

        for input in items.iter_mut() {
            let namespace = datastream_field(input, "data_stream.namespace", "namespace")
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
            let datastream_type = datastream_field(input, "data_stream.type", "type")
                .unwrap_or_else(|| self.index_type.clone());

            let Some(streams) = input
                .find_mut("streams")
                .and_then(Node::key_value_mut)
                .and_then(Node::as_list_mut)
            else {
                continue;
            };
            for stream in streams.iter_mut() {
                let dataset = datastream_field(stream, "data_stream.dataset", "dataset")
                    .unwrap_or_else(|| DEFAULT_DATASET.to_string());
                let Some(children) = stream.as_dict_mut() else {
                    continue;
                };
                children.push(Node::key(
                    "index",
                    Some(Node::str(format!("{datastream_type}-{dataset}-{namespace}"))),
                ));
            }
        }
        Ok(())
    }
}

/// Appends `add_fields` processors carrying the stream's datastream
/// coordinates and event dataset to every stream's `processors` list,
/// creating the list when absent.
#[derive(Debug, Clone, Serialize, Deserialize, new)]
pub struct InjectStreamProcessorRule {
    #[serde(rename = "type")]
    pub stream_type: String,
    #[serde(default)]
    pub on_conflict: String,
}

impl InjectStreamProcessorRule {
    fn apply(&self, ast: &mut Ast) -> Result<(), Error> {
        let strategy = MergeStrategy::from_name(&self.on_conflict);

        let Some(inputs) = ast.lookup_mut("inputs") else {
            return Ok(());
        };
        let Some(items) = inputs.key_value_mut().and_then(Node::as_list_mut) else {
            return Ok(());
        };

        for input in items.iter_mut() {
            let namespace = datastream_field(input, "data_stream.namespace", "namespace")
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
            let datastream_type = datastream_field(input, "data_stream.type", "type")
                .unwrap_or_else(|| self.stream_type.clone());

            let Some(streams) = input
                .find_mut("streams")
                .and_then(Node::key_value_mut)
                .and_then(Node::as_list_mut)
            else {
                continue;
            };
            for stream in streams.iter_mut() {
                let dataset = datastream_field(stream, "data_stream.dataset", "dataset")
                    .unwrap_or_else(|| DEFAULT_DATASET.to_string());
                let Some(children) = stream.as_dict_mut() else {
                    continue;
                };
                let processors = processors_list(children)?;

                let datastream_fields = add_fields_processor(
                    "data_stream",
                    vec![
                        Node::key("type", Some(Node::str(datastream_type.clone()))),
                        Node::key("namespace", Some(Node::str(namespace.clone()))),
                        Node::key("dataset", Some(Node::str(dataset.clone()))),
                    ],
                );
                let current = std::mem::take(processors);
                *processors = strategy.inject_item(current, datastream_fields);

                let event_fields = add_fields_processor(
                    "event",
                    vec![Node::key("dataset", Some(Node::str(dataset)))],
                );
                let current = std::mem::take(processors);
                *processors = strategy.inject_item(current, event_fields);
            }
        }
        Ok(())
    }
}

/// Fills in default datastream coordinates (`default` namespace on
/// inputs, `generic` dataset on streams) wherever absent or empty,
/// trying the compact dotted key before the nested form.
#[derive(Debug, Clone, Serialize, Deserialize, new)]
pub struct FixStreamRule {}

impl FixStreamRule {
    fn apply(&self, ast: &mut Ast) -> Result<(), Error> {
        let Some(inputs) = ast.lookup_mut("inputs") else {
            return Ok(());
        };
        let Some(items) = inputs.key_value_mut().and_then(Node::as_list_mut) else {
            return Ok(());
        };

        for input in items.iter_mut() {
            fill_datastream_default(
                input,
                "data_stream.namespace",
                "namespace",
                DEFAULT_NAMESPACE,
            );

            let Some(streams) = input
                .find_mut("streams")
                .and_then(Node::key_value_mut)
                .and_then(Node::as_list_mut)
            else {
                continue;
            };
            for stream in streams.iter_mut() {
                fill_datastream_default(stream, "data_stream.dataset", "dataset", DEFAULT_DATASET);
            }
        }
        Ok(())
    }
}

/// Reads a datastream coordinate from a dict node, compact dotted form
/// first, then the nested `data_stream` dict. Empty values count as
/// absent.
fn datastream_field(node: &Node, compact: &str, nested: &str) -> Option<String> {
    if let Some(value) = node.find(compact).and_then(Node::key_value) {
        let text = value.to_string();
        if !text.is_empty() {
            return Some(text);
        }
    }
    let nested_value = node
        .find("data_stream")
        .and_then(Node::key_value)
        .and_then(|dict| dict.find(nested))
        .and_then(Node::key_value)?;
    let text = nested_value.to_string();
    (!text.is_empty()).then_some(text)
}

/// Ensures a datastream coordinate is present and non-empty on a dict
/// node, writing `default` where needed.
fn fill_datastream_default(node: &mut Node, compact: &str, nested: &str, default: &str) {
    enum Target {
        Compact,
        Nested,
        Append,
        Nothing,
    }

    let target = if node.find(compact).is_some() {
        Target::Compact
    } else {
        match node.find("data_stream") {
            None => Target::Append,
            Some(ds) => match ds.key_value().and_then(Node::as_dict) {
                // data_stream holds something that is not a dict, leave it
                None => Target::Nothing,
                Some(children) => {
                    if children.iter().any(|c| c.key_name() == Some(nested)) {
                        Target::Nested
                    } else {
                        Target::Append
                    }
                }
            },
        }
    };

    match target {
        Target::Compact => {
            if let Some(key) = node.find_mut(compact) {
                default_if_empty(key, default);
            }
        }
        Target::Nested => {
            if let Some(key) = node.find_mut("data_stream").and_then(|ds| ds.find_mut(nested)) {
                default_if_empty(key, default);
            }
        }
        Target::Append => {
            if let Some(children) = node.as_dict_mut() {
                children.push(Node::key(compact, Some(Node::str(default))));
            }
        }
        Target::Nothing => {}
    }
}

fn default_if_empty(key: &mut Node, default: &str) {
    let empty = key.key_value().is_some_and(|v| v.to_string().is_empty());
    if empty {
        key.set_key_value(Some(Node::str(default)));
    }
}

fn add_fields_processor(target: &str, fields: Vec<Node>) -> Node {
    Node::dict(vec![Node::key(
        "add_fields",
        Some(Node::dict(vec![
            Node::key("target", Some(Node::str(target))),
            Node::key("fields", Some(Node::dict(fields))),
        ])),
    )])
}

/// Returns the mutable `processors` list of a dict, creating an empty one
/// when missing. A `processors` key holding anything else is an error.
fn processors_list(children: &mut Vec<Node>) -> Result<&mut Vec<Node>, Error> {
    let position = match children
        .iter()
        .position(|c| c.key_name() == Some("processors"))
    {
        Some(i) => i,
        None => {
            children.push(Node::key("processors", Some(Node::list(Vec::new()))));
            children.len() - 1
        }
    };
    let type_name = children[position]
        .key_value()
        .map(Node::type_name)
        .unwrap_or("empty key");
    children[position]
        .key_value_mut()
        .and_then(Node::as_list_mut)
        .ok_or_else(|| Error::unexpected("list", type_name, "processors"))
}

mod regex_string {
    use regex::Regex;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(re: &Regex, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(re.as_str())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Regex, D::Error>
    where
        D: Deserializer<'de>,
    {
        let pattern = String::deserialize(deserializer)?;
        Regex::new(&pattern).map_err(serde::de::Error::custom)
    }
}
