use log::{debug, trace, warn};
use serde::Serialize;

use crate::core::document::{Document, Namespaces, NodeId};

/// A declared user field and the value type it was declared with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldInfo {
    pub name: String,
    pub value_type: String,
}

/// User-field declarations collected by the pre-pass of one compile call.
///
/// Names are stored without the field prefix and keep the order of their
/// first declaration; a later declaration of the same name only updates
/// its value type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldRegistry {
    fields: Vec<FieldInfo>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the declaration pre-pass over every fragment.
    pub fn collect(documents: &[Document], namespaces: &Namespaces, prefix: &str) -> Self {
        let text_ns = namespaces.uri("text");
        let office_ns = namespaces.uri("office");
        let mut registry = FieldRegistry::new();

        for document in documents {
            for declaration in user_field_declarations(document, namespaces, prefix) {
                let Some(full_name) = document.attribute(declaration, &text_ns, "name") else {
                    continue;
                };
                let value_type = document.attribute(declaration, &office_ns, "value-type").unwrap_or("string");
                registry.register(&full_name[prefix.len()..], value_type);
            }
        }

        debug!("Collected {} user field declarations", registry.len());
        registry
    }

    pub fn register(&mut self, name: &str, value_type: &str) {
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(existing) => {
                if existing.value_type != value_type {
                    warn!(
                        "User field '{}' redeclared as '{}' (was '{}')",
                        name, value_type, existing.value_type
                    );
                }
                existing.value_type = value_type.to_string();
            }
            None => {
                trace!("Registering user field '{}' of type '{}'", name, value_type);
                self.fields.push(FieldInfo { name: name.to_string(), value_type: value_type.to_string() });
            }
        }
    }

    pub fn value_type(&self, name: &str) -> Option<&str> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.value_type.as_str())
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// `text:user-field-decl` elements whose `text:name` starts with `prefix`.
pub fn user_field_declarations(document: &Document, namespaces: &Namespaces, prefix: &str) -> Vec<NodeId> {
    prefixed_elements(document, namespaces, "user-field-decl", prefix)
}

/// `text:<local>` elements whose `text:name` starts with `prefix`.
pub(crate) fn prefixed_elements(document: &Document, namespaces: &Namespaces, local: &str, prefix: &str) -> Vec<NodeId> {
    let text_ns = namespaces.uri("text");
    document
        .descendants(document.root())
        .into_iter()
        .filter(|id| document.is(*id, &text_ns, local))
        .filter(|id| document.attribute(*id, &text_ns, "name").is_some_and(|n| n.starts_with(prefix)))
        .collect()
}
