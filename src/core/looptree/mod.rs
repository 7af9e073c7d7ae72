//! Nested loop scopes and the attribute references readable in each.
//!
//! Scopes live in an arena and refer to their parent by id. A loop whose
//! iterable starts with the variable bound by a loop still open around it
//! (`for b in a.children` inside `for a in items`) becomes a child of that
//! loop; any other loop is a root scope.

use log::{debug, trace};
use serde::Serialize;
use serde::ser::{SerializeStruct, Serializer};

use crate::errors::ParserError;
use crate::parser::{Iterable, LoopMapping, LoopTarget};

pub mod projector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ScopeId(usize);

/// One loop as seen by the tree builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopInstruction {
    /// Dotted iterable path, e.g. `document.items`.
    pub name: String,
    /// Variable bound to each element.
    pub var_from: String,
    /// Indices of the loops open around this one, outermost first.
    pub enclosing: Vec<usize>,
}

impl LoopInstruction {
    pub fn new(name: &str, var_from: &str) -> Self {
        Self { name: name.to_string(), var_from: var_from.to_string(), enclosing: Vec::new() }
    }

    pub fn nested_in(mut self, enclosing: &[usize]) -> Self {
        self.enclosing = enclosing.to_vec();
        self
    }

    /// Only single-variable loops over a plain reference drive iteration.
    pub fn from_mapping(mapping: &LoopMapping, header: &str) -> Result<Self, ParserError> {
        let var_from = match &mapping.var {
            LoopTarget::Single(var) => var.clone(),
            LoopTarget::Pair(..) => return Err(ParserError::NotImplemented(header.to_string())),
        };
        let name = match &mapping.iterable {
            Iterable::Name(name) => name.clone(),
            Iterable::AttributePath(path) => path.as_str().to_string(),
            Iterable::Call(_) => return Err(ParserError::NotImplemented(header.to_string())),
        };
        Ok(Self { name, var_from, enclosing: Vec::new() })
    }
}

/// A dotted attribute reference plus, for each place it is used, the
/// indices of the loops open there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldReference {
    pub path: String,
    pub uses: Vec<Vec<usize>>,
}

impl FieldReference {
    pub fn new(path: &str) -> Self {
        Self { path: path.to_string(), uses: Vec::new() }
    }

    pub fn used_within(mut self, enclosing: &[usize]) -> Self {
        self.uses.push(enclosing.to_vec());
        self
    }

    fn root(&self) -> &str {
        self.path.split('.').next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeNode {
    pub name: String,
    pub var_from: String,
    parent: Option<ScopeId>,
    children: Vec<ScopeId>,
    attributes: Vec<String>,
}

impl ScopeNode {
    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    pub fn children(&self) -> &[ScopeId] {
        &self.children
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Keys the projected list is stored under: the full path for a root
    /// scope, the leaf segment for a child.
    pub(crate) fn key_path(&self) -> Vec<&str> {
        match self.parent {
            Some(_) => self.name.rsplit('.').take(1).collect(),
            None => self.name.split('.').collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopTree {
    scopes: Vec<ScopeNode>,
    roots: Vec<ScopeId>,
    globals: Vec<String>,
}

impl LoopTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the forest from loops in document order plus the dotted
    /// references read by user fields.
    ///
    /// A loop's parent is the innermost loop open around it that binds the
    /// first segment of its iterable. Scopes sharing a name stay distinct
    /// entries.
    pub fn build(loops: &[LoopInstruction], references: &[FieldReference]) -> Self {
        let mut tree = LoopTree::new();
        let mut ids: Vec<ScopeId> = Vec::with_capacity(loops.len());

        for instruction in loops {
            let parent = match instruction.name.split_once('.') {
                Some((root, _)) => tree.innermost_binding(root, &instruction.enclosing, &ids),
                None => None,
            };
            let id = tree.add_scope(parent, &instruction.name, &instruction.var_from);
            ids.push(id);
        }

        for reference in references {
            tree.place_reference(reference, &ids);
        }

        debug!(
            "Built loop tree: {} scopes ({} roots), {} globals",
            tree.scopes.len(),
            tree.roots.len(),
            tree.globals.len()
        );
        tree
    }

    pub fn add_scope(&mut self, parent: Option<ScopeId>, name: &str, var_from: &str) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(ScopeNode {
            name: name.to_string(),
            var_from: var_from.to_string(),
            parent,
            children: Vec::new(),
            attributes: Vec::new(),
        });
        match parent {
            Some(parent) => self.scopes[parent.0].children.push(id),
            None => self.roots.push(id),
        }
        trace!("Scope {:?} '{}' as {} under {:?}", id, name, var_from, parent);
        id
    }

    pub fn add_attribute(&mut self, scope: ScopeId, path: &str) {
        self.scopes[scope.0].attributes.push(path.to_string());
    }

    pub fn add_global(&mut self, path: &str) {
        self.globals.push(path.to_string());
    }

    /// Innermost of the `enclosing` loops (indices into `ids`) bound to `var`.
    fn innermost_binding(&self, var: &str, enclosing: &[usize], ids: &[ScopeId]) -> Option<ScopeId> {
        enclosing
            .iter()
            .rev()
            .filter_map(|index| ids.get(*index).copied())
            .find(|id| self.scope(*id).var_from == var)
    }

    /// Attaches `reference` to the scope binding its root at each place it
    /// is used. References used nowhere inside such a scope fall back to
    /// [`LoopTree::attach_reference`].
    fn place_reference(&mut self, reference: &FieldReference, ids: &[ScopeId]) {
        let mut placed: Vec<ScopeId> = Vec::new();
        for enclosing in &reference.uses {
            if let Some(id) = self.innermost_binding(reference.root(), enclosing, ids) {
                if !placed.contains(&id) {
                    placed.push(id);
                }
            }
        }

        if placed.is_empty() {
            self.attach_reference(&reference.path);
            return;
        }
        for id in placed {
            trace!("Reference '{}' used in scope {:?}", reference.path, id);
            self.add_attribute(id, &reference.path);
        }
    }

    /// Attaches `reference` to the innermost scopes binding its root name,
    /// or records it as a global.
    pub fn attach_reference(&mut self, reference: &str) {
        let root = reference.split('.').next().unwrap_or_default();
        let candidates: Vec<ScopeId> = self.iter().filter(|(_, s)| s.var_from == root).map(|(id, _)| id).collect();
        let innermost: Vec<ScopeId> = candidates
            .iter()
            .copied()
            .filter(|id| !candidates.iter().any(|other| other != id && self.is_ancestor(*id, *other)))
            .collect();

        if innermost.is_empty() {
            trace!("Reference '{}' is global", reference);
            self.add_global(reference);
        } else {
            for id in innermost {
                trace!("Reference '{}' attached to scope {:?}", reference, id);
                self.add_attribute(id, reference);
            }
        }
    }

    pub fn scope(&self, id: ScopeId) -> &ScopeNode {
        &self.scopes[id.0]
    }

    pub fn roots(&self) -> &[ScopeId] {
        &self.roots
    }

    pub fn globals(&self) -> &[String] {
        &self.globals
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty() && self.globals.is_empty()
    }

    /// Scopes in creation (document) order.
    pub fn iter(&self) -> impl Iterator<Item = (ScopeId, &ScopeNode)> {
        self.scopes.iter().enumerate().map(|(i, s)| (ScopeId(i), s))
    }

    pub fn is_ancestor(&self, ancestor: ScopeId, id: ScopeId) -> bool {
        let mut current = self.scope(id).parent;
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.scope(parent).parent;
        }
        false
    }
}

struct ScopeView<'a> {
    tree: &'a LoopTree,
    id: ScopeId,
}

impl Serialize for ScopeView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let scope = self.tree.scope(self.id);
        let children: Vec<ScopeView> = scope.children.iter().map(|id| ScopeView { tree: self.tree, id: *id }).collect();
        let mut state = serializer.serialize_struct("Scope", 4)?;
        state.serialize_field("name", &scope.name)?;
        state.serialize_field("var_from", &scope.var_from)?;
        state.serialize_field("attributes", &scope.attributes)?;
        state.serialize_field("children", &children)?;
        state.end()
    }
}

impl Serialize for LoopTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let roots: Vec<ScopeView> = self.roots.iter().map(|id| ScopeView { tree: self, id: *id }).collect();
        let mut state = serializer.serialize_struct("LoopTree", 2)?;
        state.serialize_field("globals", &self.globals)?;
        state.serialize_field("scopes", &roots)?;
        state.end()
    }
}
