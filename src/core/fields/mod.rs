//! User fields and post-render fixes that live outside the marker pairs.

use std::collections::HashSet;

use log::{debug, trace, warn};
use serde_json::Value;

use crate::core::document::{Document, EngineNamespace, Namespaces, NodeId, QName, XML_NS};
use crate::id::IdGenerator;
use crate::registry::{FieldRegistry, prefixed_elements};

/// `text:user-field-get` elements whose `text:name` starts with `prefix`.
pub fn user_field_references(document: &Document, namespaces: &Namespaces, prefix: &str) -> Vec<NodeId> {
    prefixed_elements(document, namespaces, "user-field-get", prefix)
}

/// Replaces every prefixed user-field reference with an engine span that
/// outputs the field's value. Returns the number of fields rewritten.
pub fn rewrite_user_fields(
    document: &mut Document,
    namespaces: &Namespaces,
    registry: &FieldRegistry,
    prefix: &str,
    engine: EngineNamespace,
) -> usize {
    let text_ns = namespaces.uri("text");
    let office_ns = namespaces.uri("office");
    let office = document
        .declared_prefix(&office_ns)
        .or_else(|| namespaces.prefix_for(&office_ns).map(str::to_string))
        .unwrap_or_else(|| "office".to_string());
    let fields = user_field_references(document, namespaces, prefix);

    for field in &fields {
        let field = *field;
        let Some(name) = document.attribute(field, &text_ns, "name").map(|n| n[prefix.len()..].to_string()) else {
            continue;
        };

        let mut value_type = match registry.value_type(&name) {
            Some(value_type) => value_type.to_string(),
            None => {
                warn!("User field '{}' is used but never declared, treating it as a string", name);
                "string".to_string()
            }
        };

        // The closest typed ancestor overrides the declaration.
        let typed = document.ancestors(field).into_iter().find(|a| document.has_attribute(*a, &office_ns, "value-type"));
        if let Some(node) = typed {
            if let Some(local) = document.attribute(node, &office_ns, "value-type") {
                value_type = local.to_string();
            }
        }

        let expression = match value_type.as_str() {
            "float" => {
                let holder = typed.or_else(|| {
                    std::iter::once(field)
                        .chain(document.ancestors(field))
                        .find(|n| document.has_attribute(*n, &office_ns, "value"))
                });
                if let Some(holder) = holder {
                    document.set_attribute(holder, QName::prefixed(&office, "value", &office_ns), &format!("${{{}}}", name));
                }
                format!("format_float({})", name)
            }
            "percentage" => {
                if let Some(node) = typed {
                    document.remove_attribute(node, &office_ns, "value");
                    document.set_attribute(node, QName::prefixed(&office, "value-type", &office_ns), "string");
                }
                format!("format_percentage({})", name)
            }
            _ => name.clone(),
        };

        trace!("User field '{}' ({}) -> {}", name, value_type, expression);
        let span = document.create_engine_span(engine.prefix, engine.uri, &[("strip", "True"), ("content", &expression)]);
        let tail = document.tail(field).map(str::to_string);
        document.replace(field, span);
        document.set_tail(span, tail);
    }

    debug!("Rewrote {} user fields", fields.len());
    fields.len()
}

/// Float values render with a decimal comma; anything else passes through.
pub fn format_float(value: &Value) -> Value {
    match value {
        Value::Number(number) if number.is_f64() => match number.as_f64() {
            Some(float) => Value::String(format!("{:?}", float).replace('.', ",")),
            None => value.clone(),
        },
        _ => value.clone(),
    }
}

/// `12.5` → `"12,50 %"`.
pub fn format_percentage(value: f64) -> String {
    format!("{:.2} %", value).replace('.', ",")
}

/// Gives every `text:list` a fresh `xml:id` so lists duplicated by
/// rendering stay unique. Returns the number of lists renamed.
pub fn renew_list_ids(document: &mut Document, namespaces: &Namespaces, generator: &IdGenerator) -> usize {
    let text_ns = namespaces.uri("text");
    let lists: Vec<NodeId> =
        document.descendants(document.root()).into_iter().filter(|id| document.is(*id, &text_ns, "list")).collect();

    let mut used = HashSet::new();
    for list in &lists {
        let id = generator.generate_unique(&used);
        document.set_attribute(*list, QName::prefixed("xml", "id", XML_NS), &format!("list{}", id));
        used.insert(id);
    }
    trace!("Renewed {} list ids", lists.len());
    lists.len()
}
