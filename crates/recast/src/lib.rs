//! # recast - configuration transpiler
//!
//! `recast` reshapes generic configuration documents: one nested-map
//! document goes in, variables are substituted, a rule pipeline rewrites
//! the tree, and the result comes out as a generic document again.
//!
//! ## Introduction for developers
//!
//! Read this to understand how `recast` works internally.
//!
//! ### The node tree
//!
//! A document is held as a tree of [node::Node]s: dicts (ordered maps of
//! key nodes), lists, and scalar leaves. See [node] for the loading rules
//! (key sorting, dotted-key de-normalization, `null` dropping) and
//! [ast::Ast] for the operations built on top: selector lookup, sub-tree
//! selection, insertion, combination and content hashing.
//!
//! ### Variable substitution
//!
//! A [vars::Vars] context resolves `${...}` placeholders inside string
//! scalars. Applying a context walks the whole tree, substitutes every
//! placeholder and evaluates reserved `condition` keys, producing a new
//! tree. The old one is untouched, so one parsed document can be applied
//! against many contexts (see [render::render_inputs]).
//!
//! ```text
//! paths: ["/var/log/${host.name|'unknown'}.log"]
//! ```
//!
//! ### Rules and steps
//!
//! A [rules::RuleList] is an ordered pipeline of named rewrites (rename,
//! copy, translate, filter, inject, ...) threading one tree through each
//! rule in turn. [steps::StepList] is the filesystem-side counterpart,
//! confined to a root directory. Both round-trip through a generic
//! document form (a list of single-key maps keyed by the rule/step name),
//! so pipelines can live in configuration instead of code.
//!
//! ### Output
//!
//! [ast::Ast] serializes via [serde] into its generic-map projection, so
//! the finished tree goes straight to YAML or JSON.
pub mod ast;
pub mod error;
pub mod node;
pub mod render;
pub mod rules;
pub mod steps;
pub mod vars;
