use std::collections::HashMap;

use log::trace;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};

use super::{Attribute, Document, NodeId, QName, XML_NS};
use crate::errors::TemplateError;

fn xml_error(err: impl std::fmt::Display) -> TemplateError {
    TemplateError::Xml(err.to_string())
}

/// In-scope prefix bindings, one frame per open element.
struct NamespaceStack {
    frames: Vec<HashMap<String, String>>,
}

impl NamespaceStack {
    fn resolve(&self, prefix: Option<&str>) -> Option<String> {
        let key = prefix.unwrap_or("");
        if key == "xml" {
            return Some(XML_NS.to_string());
        }
        self.frames.iter().rev().find_map(|frame| frame.get(key).cloned())
    }
}

fn split_name(raw: &str) -> (Option<&str>, &str) {
    match raw.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, raw),
    }
}

impl Document {
    /// Parses an XML fragment into a new document.
    pub fn parse(xml: &str) -> Result<Document, TemplateError> {
        let mut reader = Reader::from_str(xml);
        let mut namespaces = NamespaceStack { frames: Vec::new() };
        let mut document: Option<Document> = None;
        let mut open: Vec<NodeId> = Vec::new();
        let mut declaration = false;

        loop {
            match reader.read_event().map_err(xml_error)? {
                Event::Decl(_) => declaration = true,
                Event::Start(start) => {
                    let id = open_element(&mut document, &mut namespaces, &open, &start)?;
                    open.push(id);
                }
                Event::Empty(start) => {
                    open_element(&mut document, &mut namespaces, &open, &start)?;
                    namespaces.frames.pop();
                }
                Event::End(_) => {
                    open.pop();
                    namespaces.frames.pop();
                }
                Event::Text(text) => {
                    let text = text.unescape().map_err(xml_error)?;
                    push_text(&mut document, &open, &text);
                }
                Event::CData(data) => {
                    let text = String::from_utf8_lossy(&data).into_owned();
                    push_text(&mut document, &open, &text);
                }
                Event::Eof => break,
                _ => (),
            }
        }

        let mut document = document.ok_or_else(|| TemplateError::Xml("document has no root element".to_string()))?;
        document.declaration = declaration;
        trace!("Parsed document with {} nodes", document.nodes.len());
        Ok(document)
    }

    /// `xmlns:*` declarations carried by the root element.
    pub fn root_namespaces(&self) -> Vec<(String, String)> {
        self.attributes(self.root)
            .iter()
            .filter(|a| a.name.prefix.as_deref() == Some("xmlns"))
            .map(|a| (a.name.local.clone(), a.value.clone()))
            .collect()
    }

    /// Prefix the root element declares for `uri`.
    pub fn declared_prefix(&self, uri: &str) -> Option<String> {
        self.root_namespaces().into_iter().find(|(_, declared)| declared == uri).map(|(prefix, _)| prefix)
    }

    /// Serialises the attached tree.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        if self.declaration {
            out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        }
        self.write_element(self.root, &mut out);
        out
    }

    fn write_element(&self, id: NodeId, out: &mut String) {
        let name = self.name(id).to_string();
        out.push('<');
        out.push_str(&name);
        for attribute in self.attributes(id) {
            out.push(' ');
            out.push_str(&attribute.name.to_string());
            out.push_str("=\"");
            out.push_str(&escape(attribute.value.as_str()));
            out.push('"');
        }

        let text = self.text(id).unwrap_or_default();
        if text.is_empty() && self.children(id).is_empty() {
            out.push_str("/>");
        } else {
            out.push('>');
            out.push_str(&escape(text));
            for child in self.children(id) {
                self.write_element(*child, out);
                if let Some(tail) = self.tail(*child) {
                    out.push_str(&escape(tail));
                }
            }
            out.push_str("</");
            out.push_str(&name);
            out.push('>');
        }
    }
}

fn open_element(
    document: &mut Option<Document>,
    namespaces: &mut NamespaceStack,
    open: &[NodeId],
    start: &BytesStart,
) -> Result<NodeId, TemplateError> {
    let raw_name = std::str::from_utf8(start.name().as_ref()).map_err(xml_error)?.to_string();

    let mut raw_attributes = Vec::new();
    let mut frame = HashMap::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(xml_error)?;
        let key = std::str::from_utf8(attribute.key.as_ref()).map_err(xml_error)?.to_string();
        let value = attribute.unescape_value().map_err(xml_error)?.into_owned();
        if key == "xmlns" {
            frame.insert(String::new(), value.clone());
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            frame.insert(prefix.to_string(), value.clone());
        }
        raw_attributes.push((key, value));
    }
    namespaces.frames.push(frame);

    let (prefix, local) = split_name(&raw_name);
    let name = QName {
        prefix: prefix.map(str::to_string),
        local: local.to_string(),
        ns: namespaces.resolve(prefix),
    };

    let attributes = raw_attributes
        .into_iter()
        .map(|(key, value)| {
            let (prefix, local) = split_name(&key);
            // Unprefixed attributes and declarations live in no namespace.
            let ns = match prefix {
                Some("xmlns") | None => None,
                Some(p) => namespaces.resolve(Some(p)),
            };
            Attribute {
                name: QName { prefix: prefix.map(str::to_string), local: local.to_string(), ns },
                value,
            }
        })
        .collect();

    let id = if let Some(doc) = document.as_mut() {
        let parent = *open.last().ok_or_else(|| TemplateError::Xml("multiple root elements".to_string()))?;
        let id = doc.create_element(name);
        doc.append(parent, id);
        doc.nodes[id.0].attributes = attributes;
        id
    } else {
        let doc = document.insert(Document::new(name));
        let root = doc.root;
        doc.nodes[root.0].attributes = attributes;
        root
    };
    Ok(id)
}

fn push_text(document: &mut Option<Document>, open: &[NodeId], text: &str) {
    let (Some(doc), Some(current)) = (document.as_mut(), open.last()) else {
        return;
    };
    let slot = match doc.children(*current).last().copied() {
        Some(last) => &mut doc.nodes[last.0].tail,
        None => &mut doc.nodes[current.0].text,
    };
    slot.get_or_insert_with(String::new).push_str(text);
}
