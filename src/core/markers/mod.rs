use std::collections::HashMap;

use log::{debug, trace};

use crate::core::document::{Document, Namespaces, NodeId};
use crate::errors::TemplateError;

pub mod collapse;

/// Identity of a node across fragments (marker links, user fields):
/// fragment index plus node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkerId {
    pub document: usize,
    pub node: NodeId,
}

/// A located instruction marker with its decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub id: MarkerId,
    /// Payload with the scheme prefix stripped and percent-decoding applied.
    pub instruction: String,
}

impl Marker {
    pub fn is_closer(&self) -> bool {
        self.instruction.starts_with('/')
    }
}

/// Openers in document order and the closer matched to each of them.
#[derive(Debug, Default)]
pub struct MarkerPairs {
    pub openers: Vec<Marker>,
    pub closers: HashMap<MarkerId, Marker>,
}

impl MarkerPairs {
    pub fn closer_for(&self, opener: &Marker) -> Result<&Marker, TemplateError> {
        self.closers
            .get(&opener.id)
            .ok_or_else(|| TemplateError::UnclosedInstruction(opener.instruction.clone()))
    }

    pub fn len(&self) -> usize {
        self.openers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.openers.is_empty()
    }

    /// Openers whose region contains `target`, outermost first.
    pub fn enclosing(&self, order: &DocumentOrder, target: MarkerId) -> Vec<MarkerId> {
        let Some(at) = order.position(target) else {
            return Vec::new();
        };
        self.openers
            .iter()
            .filter(|opener| {
                let end = self.closers.get(&opener.id).and_then(|closer| order.position(closer.id));
                matches!((order.position(opener.id), end), (Some(start), Some(end)) if start < at && at < end)
            })
            .map(|opener| opener.id)
            .collect()
    }
}

/// Position of every attached node across all fragments, in document order.
pub struct DocumentOrder {
    positions: Vec<HashMap<NodeId, usize>>,
}

impl DocumentOrder {
    pub fn new(documents: &[Document]) -> Self {
        let positions = documents
            .iter()
            .map(|document| {
                document.descendants(document.root()).into_iter().enumerate().map(|(i, id)| (id, i)).collect()
            })
            .collect();
        DocumentOrder { positions }
    }

    /// `(fragment, index)`; compares in reading order.
    pub fn position(&self, id: MarkerId) -> Option<(usize, usize)> {
        let index = self.positions.get(id.document)?.get(&id.node)?;
        Some((id.document, *index))
    }
}

/// Every `text:a` whose `xlink:href` starts with `scheme`, in document order.
pub fn find_marker_links(document: &Document, namespaces: &Namespaces, scheme: &str) -> Vec<NodeId> {
    let text_ns = namespaces.uri("text");
    let xlink_ns = namespaces.uri("xlink");
    document
        .descendants(document.root())
        .into_iter()
        .filter(|id| document.is(*id, &text_ns, "a"))
        .filter(|id| document.attribute(*id, &xlink_ns, "href").is_some_and(|href| href.starts_with(scheme)))
        .collect()
}

/// Text shown for a marker link: its own text, or the text of its first
/// child when the editor wrapped it in a span.
pub fn visible_text(document: &Document, link: NodeId) -> Option<&str> {
    match document.text(link) {
        Some(text) if !text.trim().is_empty() => Some(text),
        _ => document.children(link).first().map(|child| document.text(*child).unwrap_or_default()),
    }
}

/// Visible instruction text of every marker link, in document order.
pub fn user_instructions(documents: &[Document], namespaces: &Namespaces, scheme: &str) -> Vec<String> {
    documents
        .iter()
        .flat_map(|document| {
            find_marker_links(document, namespaces, scheme)
                .into_iter()
                .filter_map(|link| visible_text(document, link).map(str::to_string))
        })
        .collect()
}

/// Scans all fragments in order and pairs openers with closers using a
/// single stack shared across fragments.
pub fn locate(documents: &[Document], namespaces: &Namespaces, scheme: &str) -> Result<MarkerPairs, TemplateError> {
    let xlink_ns = namespaces.uri("xlink");
    let mut pairs = MarkerPairs::default();
    let mut open: Vec<Marker> = Vec::new();

    for (index, document) in documents.iter().enumerate() {
        for node in find_marker_links(document, namespaces, scheme) {
            let href = document.attribute(node, &xlink_ns, "href").unwrap_or_default();
            let instruction = percent_decode(&href[scheme.len()..]);
            let marker = Marker { id: MarkerId { document: index, node }, instruction };
            trace!("Found marker {:?} in fragment {}", marker.instruction, index);

            if marker.is_closer() {
                let opener = open.pop().ok_or_else(|| TemplateError::UnmatchedCloser(marker.instruction.clone()))?;
                pairs.closers.insert(opener.id, marker);
            } else {
                open.push(marker.clone());
                pairs.openers.push(marker);
            }
        }
    }

    if let Some(unclosed) = open.pop() {
        return Err(TemplateError::UnclosedInstruction(unclosed.instruction));
    }

    debug!("Located {} instruction pairs", pairs.len());
    Ok(pairs)
}

/// `%XX` decoding; invalid escapes are kept verbatim.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok().and_then(|h| u8::from_str_radix(h, 16).ok());
            if let Some(byte) = hex {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
