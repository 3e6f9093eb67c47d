//! input rendering
//!
//! [render_inputs] expands one input template list across many variable
//! contexts: one logical input definition referencing `${...}` variables
//! becomes one concrete input per matching context. Contexts where a
//! variable has no value skip that template element instead of failing,
//! and byte-identical results across contexts collapse to the first
//! occurrence.
use crate::error::Error;
use crate::node::{self, Node};
use crate::vars::Vars;
use std::collections::HashSet;

/// Renders `inputs` (a key wrapping a list of templates) once per entry
/// of `vars_array`, deduplicated by content hash.
///
/// Processors attached to a rendered element by a dynamic variable are
/// merged into the element's own `processors` list, after its declared
/// entries, creating the key when absent. An element whose `processors`
/// is not a list keeps it untouched.
pub fn render_inputs(inputs: &Node, vars_array: &[Vars]) -> Result<Node, Error> {
    let Some(template) = inputs.key_value().and_then(Node::as_list) else {
        let actual = inputs
            .key_value()
            .map(Node::type_name)
            .unwrap_or_else(|| inputs.type_name());
        return Err(Error::unexpected("list", actual, "inputs"));
    };

    let mut seen: HashSet<Vec<u8>> = HashSet::new();
    let mut rendered = Vec::new();

    for vars in vars_array {
        for element in template {
            let applied = match element.apply(vars) {
                Ok(Some(node)) => node,
                Ok(None) => continue,
                Err(e) if e.is_no_match() => continue,
                Err(e) => return Err(e),
            };
            if !seen.insert(applied.hash()) {
                // an earlier context already produced this exact input
                continue;
            }
            rendered.push(with_processors_merged(applied)?);
        }
    }

    Ok(Node::list(rendered))
}

fn with_processors_merged(mut element: Node) -> Result<Node, Error> {
    let Some(dynamic) = element.processors().cloned() else {
        return Ok(element);
    };
    let Some(children) = element.as_dict_mut() else {
        return Ok(element);
    };

    let mut loaded = Vec::with_capacity(dynamic.len());
    for processor in dynamic {
        if let Some(node) = node::load(processor)? {
            loaded.push(node);
        }
    }

    let existing = children
        .iter_mut()
        .find(|child| child.key_name() == Some("processors"));
    match existing {
        None => children.push(Node::key("processors", Some(Node::list(loaded)))),
        Some(key) => {
            if let Some(list) = key.key_value_mut().and_then(Node::as_list_mut) {
                list.extend(loaded);
            }
        }
    }
    Ok(element)
}
