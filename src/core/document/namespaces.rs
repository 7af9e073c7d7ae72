use std::collections::BTreeMap;

use super::Document;

pub const ENGINE_URI: &str = "http://genshi.edgewall.org/";
pub const PY3O_URI: &str = "http://py3o.org/";

/// Prefix and URI of the rendering engine namespace that scope and field
/// elements are written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineNamespace<'a> {
    pub prefix: &'a str,
    pub uri: &'a str,
}

/// Prefix → URI table used to recognise markers and fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespaces {
    map: BTreeMap<String, String>,
}

impl Default for Namespaces {
    fn default() -> Self {
        let map = [
            ("text", "urn:text"),
            ("draw", "urn:draw"),
            ("table", "urn:table"),
            ("office", "urn:office"),
            ("xlink", "urn:xlink"),
            ("svg", "urn:svg"),
            ("manifest", "urn:manifest"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Namespaces { map }
    }
}

impl Namespaces {
    /// Defaults overlaid with the root declarations of every fragment, then
    /// the engine namespace and our own.
    pub fn for_documents<'a>(
        documents: impl IntoIterator<Item = &'a Document>,
        engine_prefix: &str,
        engine_uri: &str,
    ) -> Self {
        let mut namespaces = Namespaces::default();
        for document in documents {
            for (prefix, uri) in document.root_namespaces() {
                namespaces.insert(&prefix, &uri);
            }
        }
        namespaces.insert(engine_prefix, engine_uri);
        namespaces.insert("py3o", PY3O_URI);
        namespaces
    }

    pub fn insert(&mut self, prefix: &str, uri: &str) {
        self.map.insert(prefix.to_string(), uri.to_string());
    }

    pub fn get(&self, prefix: &str) -> Option<&str> {
        self.map.get(prefix).map(String::as_str)
    }

    /// URI for `prefix`; unknown prefixes map to `urn:<prefix>`.
    pub fn uri(&self, prefix: &str) -> String {
        self.get(prefix).map(str::to_string).unwrap_or_else(|| format!("urn:{}", prefix))
    }

    /// A prefix bound to `uri`, if any.
    pub fn prefix_for(&self, uri: &str) -> Option<&str> {
        self.map.iter().find(|(_, v)| v.as_str() == uri).map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
