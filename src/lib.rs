use std::collections::{BTreeMap, HashMap};

use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::core::document::namespaces::ENGINE_URI;
use crate::core::document::{Document, EngineNamespace, Namespaces};
use crate::core::fields::{renew_list_ids, rewrite_user_fields, user_field_references};
use crate::core::looptree::projector::project;
use crate::core::looptree::{FieldReference, LoopInstruction, LoopTree};
use crate::core::markers::collapse::collapse;
use crate::core::markers::{DocumentOrder, MarkerId, MarkerPairs, locate, user_instructions};
use crate::parser::{Instruction, decode_instruction, decode_loop};

pub mod core;
pub mod types;
pub mod errors;
pub mod parser;
pub mod registry;
pub mod id;
mod tests;

pub use crate::core::fields::{format_float, format_percentage};
pub use crate::core::looptree::projector::UndefinedPolicy;
pub use errors::{ParserError, TemplateError};
pub use id::IdGenerator;
pub use registry::FieldRegistry;
pub use types::HostData;

/// Settings for one template.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TemplateOptions {
    /// Prefix of marker hrefs.
    pub marker_scheme: String,
    /// Prefix of user-field names.
    pub field_prefix: String,
    pub engine_prefix: String,
    pub engine_uri: String,
    pub undefined: UndefinedPolicy,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            marker_scheme: "py3o://".to_string(),
            field_prefix: "py3o.".to_string(),
            engine_prefix: "py".to_string(),
            engine_uri: ENGINE_URI.to_string(),
            undefined: UndefinedPolicy::Strict,
        }
    }
}

impl TemplateOptions {
    /// Reads options from JSON; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, TemplateError> {
        serde_json::from_str(json).map_err(|e| TemplateError::Config(e.to_string()))
    }

    pub fn set_marker_scheme(&mut self, scheme: &str) -> &mut Self {
        self.marker_scheme = scheme.to_string();
        self
    }

    pub fn set_field_prefix(&mut self, prefix: &str) -> &mut Self {
        self.field_prefix = prefix.to_string();
        self
    }

    pub fn set_engine_namespace(&mut self, prefix: &str, uri: &str) -> &mut Self {
        self.engine_prefix = prefix.to_string();
        self.engine_uri = uri.to_string();
        self
    }

    pub fn set_undefined_policy(&mut self, policy: UndefinedPolicy) -> &mut Self {
        self.undefined = policy;
        self
    }

    /// `true` selects the lenient policy.
    pub fn ignore_undefined_variables(&mut self, ignore: bool) -> &mut Self {
        self.undefined = if ignore { UndefinedPolicy::Lenient } else { UndefinedPolicy::Strict };
        self
    }

    pub fn build(&self) -> Self {
        self.clone()
    }
}

/// A set of loaded document fragments (content, styles, ...) compiled
/// together.
pub struct Template {
    documents: Vec<Document>,
    namespaces: Namespaces,
    options: TemplateOptions,
    error_stack: Vec<TemplateError>,
}

impl Template {
    pub fn new(documents: Vec<Document>, options: TemplateOptions) -> Self {
        let namespaces = Namespaces::for_documents(&documents, &options.engine_prefix, &options.engine_uri);
        Template { documents, namespaces, options, error_stack: Vec::new() }
    }

    /// Parses every fragment and builds a template from them.
    pub fn from_xml(fragments: &[&str], options: TemplateOptions) -> Result<Self, TemplateError> {
        let documents = fragments.iter().map(|xml| Document::parse(xml)).collect::<Result<Vec<_>, _>>()?;
        Ok(Template::new(documents, options))
    }

    pub fn options(&self) -> &TemplateOptions {
        &self.options
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn into_documents(self) -> Vec<Document> {
        self.documents
    }

    /// Errors recorded by failed compile passes.
    pub fn errors(&self) -> &[TemplateError] {
        &self.error_stack
    }

    // --- Introspection ---

    /// Instruction text of every marker, in document order.
    pub fn user_instructions(&self) -> Vec<String> {
        user_instructions(&self.documents, &self.namespaces, &self.options.marker_scheme)
    }

    /// Declared user-field names, prefix stripped.
    pub fn user_variables(&self) -> Vec<String> {
        FieldRegistry::collect(&self.documents, &self.namespaces, &self.options.field_prefix).names()
    }

    /// Bound variable → iterable for every loop marker that drives data.
    pub fn instructions_mapping(&self) -> Result<BTreeMap<String, String>, TemplateError> {
        let pairs = locate(&self.documents, &self.namespaces, &self.options.marker_scheme)?;
        let order = DocumentOrder::new(&self.documents);
        let (loops, _) = self.loop_instructions(&pairs, &order)?;
        Ok(loops.into_iter().map(|instruction| (instruction.var_from, instruction.name)).collect())
    }

    /// The loop tree the current markers and user fields describe.
    pub fn loop_tree(&self) -> Result<LoopTree, TemplateError> {
        let pairs = locate(&self.documents, &self.namespaces, &self.options.marker_scheme)?;
        let order = DocumentOrder::new(&self.documents);
        let (loops, indices) = self.loop_instructions(&pairs, &order)?;
        let references = self.field_references(&pairs, &order, &indices);
        Ok(LoopTree::build(&loops, &references))
    }

    /// Loops in document order, each with the indices of the loops open
    /// around it, plus the index of every loop opener. Loops binding
    /// something other than one variable over a plain reference render
    /// normally but are left out of the data tree.
    fn loop_instructions(
        &self,
        pairs: &MarkerPairs,
        order: &DocumentOrder,
    ) -> Result<(Vec<LoopInstruction>, HashMap<MarkerId, usize>), TemplateError> {
        let mut loops = Vec::new();
        let mut indices: HashMap<MarkerId, usize> = HashMap::new();

        for opener in &pairs.openers {
            let Instruction::Loop { header, .. } = decode_instruction(&opener.instruction)? else {
                continue;
            };
            let instruction = match decode_loop(&header).and_then(|mapping| LoopInstruction::from_mapping(&mapping, &header)) {
                Ok(instruction) => instruction,
                Err(ParserError::NotImplemented(_)) => {
                    warn!("Loop '{}' does not bind a single variable, leaving it out of the data tree", header);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let enclosing: Vec<usize> =
                pairs.enclosing(order, opener.id).iter().filter_map(|id| indices.get(id).copied()).collect();
            indices.insert(opener.id, loops.len());
            loops.push(instruction.nested_in(&enclosing));
        }
        Ok((loops, indices))
    }

    /// Declared user fields with the loops open at each place they are used.
    fn field_references(
        &self,
        pairs: &MarkerPairs,
        order: &DocumentOrder,
        indices: &HashMap<MarkerId, usize>,
    ) -> Vec<FieldReference> {
        let prefix = &self.options.field_prefix;
        let text_ns = self.namespaces.uri("text");
        let mut uses: Vec<(String, Vec<usize>)> = Vec::new();

        for (index, document) in self.documents.iter().enumerate() {
            for node in user_field_references(document, &self.namespaces, prefix) {
                let Some(name) = document.attribute(node, &text_ns, "name") else {
                    continue;
                };
                let enclosing = pairs
                    .enclosing(order, MarkerId { document: index, node })
                    .iter()
                    .filter_map(|id| indices.get(id).copied())
                    .collect();
                uses.push((name[prefix.len()..].to_string(), enclosing));
            }
        }

        self.user_variables()
            .iter()
            .map(|name| {
                uses.iter()
                    .filter(|(used, _)| used == name)
                    .fold(FieldReference::new(name), |reference, (_, enclosing)| reference.used_within(enclosing))
            })
            .collect()
    }

    // --- Passes ---

    /// Turns every marker pair into an engine scope and every user field
    /// into an engine expression. Returns the loop tree to project data with.
    ///
    /// The loop tree is built first, so malformed loop headers abort before
    /// any document is touched.
    pub fn compile(&mut self) -> Result<LoopTree, TemplateError> {
        match self.run_compile() {
            Ok(tree) => Ok(tree),
            Err(e) => {
                error!("Template compilation failed: {}", e);
                self.error_stack.push(e.clone());
                Err(e)
            }
        }
    }

    fn run_compile(&mut self) -> Result<LoopTree, TemplateError> {
        let tree = self.loop_tree()?;
        let pairs = locate(&self.documents, &self.namespaces, &self.options.marker_scheme)?;
        let engine = EngineNamespace { prefix: &self.options.engine_prefix, uri: &self.options.engine_uri };

        for opener in &pairs.openers {
            let closer = pairs.closer_for(opener)?;
            collapse(&mut self.documents, &self.namespaces, engine, opener, closer)?;
        }

        let registry = FieldRegistry::collect(&self.documents, &self.namespaces, &self.options.field_prefix);
        let mut rewritten = 0;
        for document in &mut self.documents {
            rewritten += rewrite_user_fields(document, &self.namespaces, &registry, &self.options.field_prefix, engine);
        }

        info!(
            "Compiled {} instructions and {} user fields across {} fragments",
            pairs.len(),
            rewritten,
            self.documents.len()
        );
        Ok(tree)
    }

    /// Projects host data along `tree` using the configured policy.
    pub fn project(&self, tree: &LoopTree, data: &dyn HostData) -> Result<Value, TemplateError> {
        debug!("Projecting data with policy {:?}", self.options.undefined);
        project(tree, data, self.options.undefined)
    }

    /// Gives every list a fresh `xml:id`; run on rendered output.
    pub fn renew_list_ids(&mut self) -> usize {
        let generator = IdGenerator::default();
        self.documents.iter_mut().map(|document| renew_list_ids(document, &self.namespaces, &generator)).sum()
    }
}
