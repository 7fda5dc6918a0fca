//! The selection tree: which keys to keep at each depth.
//
//  Built once by the query parser, then shared read-only (`Arc`) across
//  every engine that runs the query. Tagged variant, not a class hierarchy:
//  a terminal `Leaf` accepts whatever value sits at its key, a `Node`
//  carries the alias, the nested tree and the directive chain.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::directive::{self, Directive};
use crate::value::JsonValue;

/// Per-depth key predicate map, in query order.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    fields: IndexMap<String, Arc<SelectionNode>>,
}

impl Selection {
    pub fn new() -> Selection {
        Selection::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, node: SelectionNode) {
        self.fields.insert(key.into(), Arc::new(node));
    }

    pub fn get(&self, key: &str) -> Option<&Arc<SelectionNode>> {
        self.fields.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<SelectionNode>)> {
        self.fields.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

#[derive(Debug, Clone)]
pub enum SelectionNode {
    /// Accept any value at this key, project no children.
    Leaf,
    Node {
        alias: Option<String>,
        children: Option<Selection>,
        directives: Vec<Directive>,
    },
}

impl SelectionNode {
    pub fn node(
        alias: Option<String>,
        children: Option<Selection>,
        directives: Vec<Directive>,
    ) -> SelectionNode {
        SelectionNode::Node {
            alias,
            children,
            directives,
        }
    }

    /// Root node wrapping a field map.
    pub fn root(children: Selection) -> SelectionNode {
        SelectionNode::Node {
            alias: None,
            children: Some(children),
            directives: Vec::new(),
        }
    }

    pub fn alias(&self) -> Option<&str> {
        match self {
            SelectionNode::Leaf => None,
            SelectionNode::Node { alias, .. } => alias.as_deref(),
        }
    }

    pub fn children(&self) -> Option<&Selection> {
        match self {
            SelectionNode::Leaf => None,
            SelectionNode::Node { children, .. } => children.as_ref(),
        }
    }

    pub fn directives(&self) -> &[Directive] {
        match self {
            SelectionNode::Leaf => &[],
            SelectionNode::Node { directives, .. } => directives,
        }
    }

    /// Lookup of a nested key; `Leaf` projects no children.
    pub fn child(&self, key: &str) -> Option<Arc<SelectionNode>> {
        self.children().and_then(|c| c.get(key)).cloned()
    }

    /// The key under which a match at `source_key` is attached to its
    /// parent container.
    pub fn output_key(&self, source_key: &str) -> String {
        self.alias().unwrap_or(source_key).to_string()
    }

    /// Whether raw scalar values are kept when this selection governs the
    /// elements of an array. A node that names nested fields projects
    /// element *objects*; anything else keeps the elements themselves.
    pub fn permits_elements(&self) -> bool {
        match self.children() {
            Some(c) => c.is_empty(),
            None => true,
        }
    }

    pub fn has_default(&self) -> bool {
        self.directives().iter().any(|d| d.name == "default")
    }

    /// Run the directive chain over a value.
    pub fn transform(&self, value: JsonValue) -> JsonValue {
        directive::apply_chain(self.directives(), value)
    }
}
