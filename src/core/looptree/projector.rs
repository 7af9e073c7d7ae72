use log::{debug, trace, warn};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{LoopTree, ScopeId};
use crate::errors::TemplateError;
use crate::types::HostData;

/// What to do when host data lacks a referenced path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UndefinedPolicy {
    /// Fail with `UnresolvedPath` / `NotIterable`.
    #[default]
    Strict,
    /// Substitute `""` for attributes and `[]` for loops.
    Lenient,
}

/// Names visible while resolving a path.
#[derive(Clone, Copy)]
enum Context<'a> {
    Root(&'a dyn HostData),
    Bound { var: &'a str, element: &'a dyn HostData },
}

impl<'a> Context<'a> {
    fn lookup(self, name: &str) -> Option<&'a dyn HostData> {
        match self {
            Context::Root(data) => data.get_attribute(name),
            Context::Bound { var, element } => (var == name).then_some(element),
        }
    }

    fn resolve(self, segments: &[&str]) -> Option<&'a dyn HostData> {
        let (first, rest) = segments.split_first()?;
        rest.iter().try_fold(self.lookup(first)?, |value, segment| value.get_attribute(segment))
    }
}

/// Walks `data` along `tree` and returns plain JSON shaped like the tree.
pub fn project(tree: &LoopTree, data: &dyn HostData, policy: UndefinedPolicy) -> Result<Value, TemplateError> {
    let context = Context::Root(data);
    let mut result = Value::Object(Map::new());

    for global in tree.globals() {
        let segments: Vec<&str> = global.split('.').collect();
        let value = resolve_attribute(context, global, &segments, policy)?;
        merge(&mut result, nest(&segments, value));
    }

    for root in tree.roots() {
        let scope = tree.scope(*root);
        let path = scope.key_path();
        let items = project_list(tree, *root, context, policy)?;
        merge(&mut result, nest(&path, Value::Array(items)));
    }

    debug!("Projected {} globals and {} root scopes", tree.globals().len(), tree.roots().len());
    Ok(result)
}

fn project_list(
    tree: &LoopTree,
    id: ScopeId,
    context: Context,
    policy: UndefinedPolicy,
) -> Result<Vec<Value>, TemplateError> {
    let scope = tree.scope(id);
    let segments: Vec<&str> = scope.name.split('.').collect();

    let Some(iterable) = context.resolve(&segments) else {
        return match policy {
            UndefinedPolicy::Strict => Err(TemplateError::UnresolvedPath(scope.name.clone())),
            UndefinedPolicy::Lenient => {
                warn!("Loop over '{}' is undefined, using an empty list", scope.name);
                Ok(Vec::new())
            }
        };
    };
    let Some(elements) = iterable.iterate() else {
        return match policy {
            UndefinedPolicy::Strict => Err(TemplateError::NotIterable(scope.name.clone())),
            UndefinedPolicy::Lenient => {
                warn!("'{}' is not iterable, using an empty list", scope.name);
                Ok(Vec::new())
            }
        };
    };

    trace!("Scope '{}' iterates {} elements", scope.name, elements.len());
    elements.into_iter().map(|element| project_element(tree, id, element, policy)).collect()
}

fn project_element(
    tree: &LoopTree,
    id: ScopeId,
    element: &dyn HostData,
    policy: UndefinedPolicy,
) -> Result<Value, TemplateError> {
    let scope = tree.scope(id);
    let plain = scope.attributes().is_empty() && scope.children().is_empty();
    if plain || scope.attributes().iter().any(|a| *a == scope.var_from) {
        return Ok(element.to_value());
    }

    let context = Context::Bound { var: &scope.var_from, element };
    let mut result = Value::Object(Map::new());

    for attribute in scope.attributes() {
        let segments: Vec<&str> = attribute.split('.').collect();
        let value = resolve_attribute(context, attribute, &segments, policy)?;
        merge(&mut result, nest(&segments[1..], value));
    }

    for child in scope.children() {
        let path = tree.scope(*child).key_path();
        let items = project_list(tree, *child, context, policy)?;
        merge(&mut result, nest(&path, Value::Array(items)));
    }

    Ok(result)
}

fn resolve_attribute(
    context: Context,
    path: &str,
    segments: &[&str],
    policy: UndefinedPolicy,
) -> Result<Value, TemplateError> {
    match (context.resolve(segments), policy) {
        (Some(value), _) => Ok(value.to_value()),
        (None, UndefinedPolicy::Strict) => Err(TemplateError::UnresolvedPath(path.to_string())),
        (None, UndefinedPolicy::Lenient) => {
            warn!("'{}' is undefined, using an empty string", path);
            Ok(Value::String(String::new()))
        }
    }
}

/// `["a", "b"], v` → `{"a": {"b": v}}`.
fn nest(segments: &[&str], value: Value) -> Value {
    segments.iter().rev().fold(value, |inner, key| {
        let mut map = Map::new();
        map.insert(key.to_string(), inner);
        Value::Object(map)
    })
}

/// Deep merge; arrays merge element-wise by index so a second scope over
/// the same list adds its keys to the maps of the first.
fn merge(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(target), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match target.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(target), Value::Array(incoming)) => {
            for (index, value) in incoming.into_iter().enumerate() {
                match target.get_mut(index) {
                    Some(existing) => merge(existing, value),
                    None => target.push(value),
                }
            }
        }
        (target, incoming) => *target = incoming,
    }
}
