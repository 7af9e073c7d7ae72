//! Arena-backed element tree.
//!
//! Elements follow the text/tail model: `text` is the character data before
//! the first child, `tail` the character data following the element inside
//! its parent. Nodes are never freed; detaching only unlinks them.

use std::fmt;

use crate::parser::Instruction;

pub mod namespaces;
mod xml;

pub use namespaces::{EngineNamespace, Namespaces};

pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A possibly prefixed name together with the namespace it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
    pub ns: Option<String>,
}

impl QName {
    pub fn local(local: &str) -> Self {
        Self { prefix: None, local: local.to_string(), ns: None }
    }

    pub fn prefixed(prefix: &str, local: &str, ns: &str) -> Self {
        Self { prefix: Some(prefix.to_string()), local: local.to_string(), ns: Some(ns.to_string()) }
    }

    pub fn is(&self, ns: &str, local: &str) -> bool {
        self.local == local && self.ns.as_deref() == Some(ns)
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{}:{}", prefix, self.local),
            None => f.write_str(&self.local),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

#[derive(Debug, Clone)]
struct Element {
    name: QName,
    attributes: Vec<Attribute>,
    text: Option<String>,
    tail: Option<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    scope: Option<Instruction>,
}

/// One XML fragment (content, styles, manifest, ...).
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Element>,
    root: NodeId,
    declaration: bool,
}

impl Document {
    pub fn new(root: QName) -> Self {
        let mut doc = Document { nodes: Vec::new(), root: NodeId(0), declaration: true };
        doc.root = doc.create_element(root);
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    // --- Node access ---

    pub fn name(&self, id: NodeId) -> &QName {
        &self.nodes[id.0].name
    }

    pub fn is(&self, id: NodeId, ns: &str, local: &str) -> bool {
        self.nodes[id.0].name.is(ns, local)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        self.nodes[id.0].text.as_deref()
    }

    pub fn set_text(&mut self, id: NodeId, text: Option<String>) {
        self.nodes[id.0].text = text;
    }

    pub fn tail(&self, id: NodeId) -> Option<&str> {
        self.nodes[id.0].tail.as_deref()
    }

    pub fn set_tail(&mut self, id: NodeId, tail: Option<String>) {
        self.nodes[id.0].tail = tail;
    }

    pub fn attributes(&self, id: NodeId) -> &[Attribute] {
        &self.nodes[id.0].attributes
    }

    pub fn attribute(&self, id: NodeId, ns: &str, local: &str) -> Option<&str> {
        self.nodes[id.0].attributes.iter().find(|a| a.name.is(ns, local)).map(|a| a.value.as_str())
    }

    pub fn has_attribute(&self, id: NodeId, ns: &str, local: &str) -> bool {
        self.attribute(id, ns, local).is_some()
    }

    /// Sets an attribute, replacing any existing one with the same namespace
    /// and local name. Attributes without a namespace also match on prefix.
    pub fn set_attribute(&mut self, id: NodeId, name: QName, value: &str) {
        let attributes = &mut self.nodes[id.0].attributes;
        match attributes.iter_mut().find(|a| {
            a.name.local == name.local && a.name.ns == name.ns && (name.ns.is_some() || a.name.prefix == name.prefix)
        }) {
            Some(existing) => existing.value = value.to_string(),
            None => attributes.push(Attribute { name, value: value.to_string() }),
        }
    }

    pub fn remove_attribute(&mut self, id: NodeId, ns: &str, local: &str) -> Option<String> {
        let attributes = &mut self.nodes[id.0].attributes;
        let position = attributes.iter().position(|a| a.name.is(ns, local))?;
        Some(attributes.remove(position).value)
    }

    /// Structured instruction attached to a scope element.
    pub fn scope(&self, id: NodeId) -> Option<&Instruction> {
        self.nodes[id.0].scope.as_ref()
    }

    pub(crate) fn set_scope(&mut self, id: NodeId, instruction: Instruction) {
        self.nodes[id.0].scope = Some(instruction);
    }

    /// All scope elements currently attached to the tree, in document order.
    pub fn scopes(&self) -> Vec<(NodeId, &Instruction)> {
        self.descendants(self.root)
            .into_iter()
            .filter_map(|id| self.scope(id).map(|instruction| (id, instruction)))
            .collect()
    }

    // --- Traversal ---

    /// `id` and everything below it, in document order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            result.push(current);
            stack.extend(self.nodes[current.0].children.iter().rev());
        }
        result
    }

    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|c| *c == id)
    }

    pub fn following_siblings(&self, id: NodeId) -> Vec<NodeId> {
        match (self.parent(id), self.index_in_parent(id)) {
            (Some(parent), Some(index)) => self.children(parent)[index + 1..].to_vec(),
            _ => Vec::new(),
        }
    }

    /// Parent, grandparent and so on up to the root.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut current = self.parent(id);
        while let Some(node) = current {
            result.push(node);
            current = self.parent(node);
        }
        result
    }

    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        self.ancestors(id).contains(&ancestor)
    }

    /// Concatenated character data of the subtree.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        if let Some(text) = self.text(id) {
            out.push_str(text);
        }
        for child in self.children(id) {
            self.collect_text(*child, out);
            if let Some(tail) = self.tail(*child) {
                out.push_str(tail);
            }
        }
    }

    // --- Mutation ---

    /// Creates a detached element.
    pub fn create_element(&mut self, name: QName) -> NodeId {
        self.nodes.push(Element {
            name,
            attributes: Vec::new(),
            text: None,
            tail: None,
            parent: None,
            children: Vec::new(),
            scope: None,
        });
        NodeId(self.nodes.len() - 1)
    }

    /// Creates a detached engine `span` declaring the engine namespace and
    /// carrying `prefix:<name>="<value>"` for each directive.
    pub fn create_engine_span(&mut self, prefix: &str, uri: &str, directives: &[(&str, &str)]) -> NodeId {
        let span = self.create_element(QName::local("span"));
        self.set_attribute(span, QName { prefix: Some("xmlns".to_string()), local: prefix.to_string(), ns: None }, uri);
        for (name, value) in directives {
            self.set_attribute(span, QName::prefixed(prefix, name, uri), value);
        }
        span
    }

    /// Moves `child` (with its tail) to the end of `parent`.
    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Unlinks `id` from its parent; its tail travels with it.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
    }

    /// Unlinks `id` but leaves its tail text in place, appended to the
    /// previous sibling's tail or to the parent's text.
    pub fn remove_keep_tail(&mut self, id: NodeId) {
        let tail = self.nodes[id.0].tail.take();
        if let (Some(parent), Some(index), Some(tail)) = (self.parent(id), self.index_in_parent(id), tail) {
            let target = if index == 0 { None } else { Some(self.children(parent)[index - 1]) };
            let slot = match target {
                Some(previous) => &mut self.nodes[previous.0].tail,
                None => &mut self.nodes[parent.0].text,
            };
            slot.get_or_insert_with(String::new).push_str(&tail);
        }
        self.detach(id);
    }

    /// Puts `new` at the position of `old`, detaching `old` (and its tail).
    pub fn replace(&mut self, old: NodeId, new: NodeId) {
        let Some(parent) = self.parent(old) else {
            return;
        };
        self.detach(new);
        if let Some(index) = self.index_in_parent(old) {
            self.nodes[parent.0].children[index] = new;
            self.nodes[new.0].parent = Some(parent);
            self.nodes[old.0].parent = None;
        }
    }
}
