//! Rewrites a matched marker pair into a single engine scope element.

use log::{debug, warn};

use super::{Marker, visible_text};
use crate::core::document::{Document, EngineNamespace, Namespaces, NodeId};
use crate::errors::TemplateError;
use crate::parser::{Instruction, decode_instruction};

/// Whether the paragraphs holding the opening and closing links survive
/// the collapse. A paragraph is kept when the link is not its only child.
pub fn detect_keep_boundary(document: &Document, start: NodeId, end: NodeId, namespaces: &Namespaces) -> (bool, bool) {
    let text_ns = namespaces.uri("text");
    let keep = |link: NodeId| match document.parent(link) {
        Some(parent) if document.is(parent, &text_ns, "p") => document.children(parent).len() > 1,
        _ => false,
    };
    (keep(start), keep(end))
}

/// Replaces the sibling range `start..=end` with `scope`, moving every node
/// in between into it. Boundaries that are not kept are dropped; the text
/// following a dropped start boundary opens the scope and the text following
/// a dropped end boundary follows the scope.
pub fn move_siblings(
    document: &mut Document,
    start: NodeId,
    end: NodeId,
    scope: NodeId,
    keep_start_boundary: bool,
    keep_end_boundary: bool,
) {
    let between: Vec<NodeId> = document.following_siblings(start).into_iter().take_while(|n| *n != end).collect();

    document.replace(start, scope);
    if keep_start_boundary {
        document.append(scope, start);
    } else {
        let tail = document.tail(start).map(str::to_string);
        document.set_text(scope, tail);
    }

    for node in between {
        document.append(scope, node);
    }

    if keep_end_boundary {
        document.append(scope, end);
    } else {
        let tail = document.tail(end).map(str::to_string);
        document.detach(end);
        document.set_tail(scope, tail);
    }
}

/// Collapses the region delimited by `opener` and `closer` and returns the
/// new scope element.
///
/// All checks happen before the tree is touched, so a failing pair leaves
/// the document as it was.
pub fn collapse(
    documents: &mut [Document],
    namespaces: &Namespaces,
    engine: EngineNamespace,
    opener: &Marker,
    closer: &Marker,
) -> Result<NodeId, TemplateError> {
    let payload = opener.instruction.as_str();
    let unsupported = |reason: &str| TemplateError::UnsupportedContext {
        instruction: payload.to_string(),
        reason: reason.to_string(),
    };

    if opener.id.document != closer.id.document {
        return Err(unsupported("opening and closing markers are in different fragments"));
    }
    let document = documents
        .get_mut(opener.id.document)
        .ok_or_else(|| unsupported("marker refers to an unknown fragment"))?;
    let (link, closing_link) = (opener.id.node, closer.id.node);

    check_link_text(document, link, payload)?;
    let instruction = decode_instruction(payload)?;
    if closer.instruction.trim_start_matches('/') != instruction.directive() {
        warn!("Marker {:?} is closed by {:?}", payload, closer.instruction);
    }

    let table_ns = namespaces.uri("table");
    let text_ns = namespaces.uri("text");
    let parent = document.parent(link).ok_or_else(|| unsupported("marker is not attached"))?;
    let closing_parent = document.parent(closing_link).ok_or_else(|| unsupported("closing marker is not attached"))?;

    let (start_row, end_row, keep_start, keep_end) = match document.parent(parent) {
        Some(cell) if document.is(cell, &table_ns, "table-cell") => {
            let closing_cell = document
                .parent(closing_parent)
                .filter(|c| document.is(*c, &table_ns, "table-cell"))
                .ok_or_else(|| unsupported("closing marker is outside a table cell"))?;
            if cell == closing_cell {
                (parent, closing_parent, false, false)
            } else {
                let opening_row = document.parent(cell).ok_or_else(|| unsupported("cell is outside a row"))?;
                let closing_row =
                    document.parent(closing_cell).ok_or_else(|| unsupported("closing cell is outside a row"))?;
                (opening_row, closing_row, false, false)
            }
        }
        _ if document.is(parent, &text_ns, "p") => {
            if !document.is(closing_parent, &text_ns, "p") {
                return Err(unsupported("closing marker is not in a text paragraph"));
            }
            let (keep_start, keep_end) = detect_keep_boundary(document, link, closing_link, namespaces);
            (parent, closing_parent, keep_start, keep_end)
        }
        _ => return Err(unsupported("markers are only handled in tables or text paragraphs")),
    };

    if start_row == end_row {
        if !document.index_in_parent(link).zip(document.index_in_parent(closing_link)).is_some_and(|(s, e)| s < e) {
            return Err(unsupported("closing marker precedes its opener"));
        }
        let scope = scope_element(document, engine, &instruction);
        collapse_inline(document, link, closing_link, scope);
        debug!("Collapsed {:?} inline", payload);
        return Ok(scope);
    }

    let same_parent = document.parent(start_row).is_some() && document.parent(start_row) == document.parent(end_row);
    let ordered = document.index_in_parent(start_row).zip(document.index_in_parent(end_row)).is_some_and(|(s, e)| s < e);
    if !(same_parent && ordered) {
        return Err(unsupported("marker containers are not siblings"));
    }

    let scope = scope_element(document, engine, &instruction);
    document.remove_keep_tail(link);
    document.remove_keep_tail(closing_link);
    move_siblings(document, start_row, end_row, scope, keep_start, keep_end);

    debug!("Collapsed {:?} (keep start: {}, keep end: {})", payload, keep_start, keep_end);
    Ok(scope)
}

fn check_link_text(document: &Document, link: NodeId, payload: &str) -> Result<(), TemplateError> {
    match visible_text(document, link) {
        Some(text) if text == payload => Ok(()),
        Some(text) => Err(TemplateError::ContentMismatch(text.to_string())),
        None => Err(TemplateError::MissingLinkText(payload.to_string())),
    }
}

fn scope_element(document: &mut Document, engine: EngineNamespace, instruction: &Instruction) -> NodeId {
    let scope = document.create_engine_span(
        engine.prefix,
        engine.uri,
        &[("strip", "True"), (instruction.directive(), instruction.body())],
    );
    document.set_scope(scope, instruction.clone());
    scope
}

/// Both links share a container: the scope takes the opener's place and
/// swallows everything up to the closer.
fn collapse_inline(document: &mut Document, link: NodeId, closing_link: NodeId, scope: NodeId) {
    let between: Vec<NodeId> =
        document.following_siblings(link).into_iter().take_while(|n| *n != closing_link).collect();

    let opening_tail = document.tail(link).map(str::to_string);
    document.replace(link, scope);
    document.set_text(scope, opening_tail);
    for node in between {
        document.append(scope, node);
    }

    let closing_tail = document.tail(closing_link).map(str::to_string);
    document.detach(closing_link);
    document.set_tail(scope, closing_tail);
}
