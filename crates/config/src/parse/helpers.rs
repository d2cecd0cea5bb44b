//! Typed accessors for KDL child nodes.
//!
//! Configuration fields are written as child nodes with a single argument
//! (`port 80`). A missing node yields `Ok(None)`; a node whose argument has
//! the wrong type is an error rather than a silent fallback.

use anyhow::{anyhow, Result};
use kdl::{KdlNode, KdlValue};

/// Find a direct child node by name
fn child<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlNode> {
    node.children()?
        .nodes()
        .iter()
        .find(|n| n.name().value() == name)
}

/// Positional (unnamed) arguments of a node
fn args(node: &KdlNode) -> impl Iterator<Item = &KdlValue> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(|e| e.value())
}

/// First positional argument of a child node
fn first_arg<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlValue> {
    child(node, name).and_then(|c| args(c).next())
}

pub fn get_string_entry(node: &KdlNode, name: &str) -> Result<Option<String>> {
    match first_arg(node, name) {
        None => Ok(None),
        Some(value) => value
            .as_string()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| anyhow!("'{}' must be a string, got {}", name, value)),
    }
}

pub fn get_int_entry(node: &KdlNode, name: &str) -> Result<Option<i128>> {
    match first_arg(node, name) {
        None => Ok(None),
        Some(value) => value
            .as_integer()
            .map(Some)
            .ok_or_else(|| anyhow!("'{}' must be an integer, got {}", name, value)),
    }
}

pub fn get_bool_entry(node: &KdlNode, name: &str) -> Result<Option<bool>> {
    match first_arg(node, name) {
        None => Ok(None),
        Some(value) => value
            .as_bool()
            .map(Some)
            .ok_or_else(|| anyhow!("'{}' must be #true or #false, got {}", name, value)),
    }
}

/// All arguments of a child node as strings (`containers "a" "b"`)
pub fn get_string_list(node: &KdlNode, name: &str) -> Result<Option<Vec<String>>> {
    let Some(list) = child(node, name) else {
        return Ok(None);
    };

    args(list)
        .map(|value| {
            value
                .as_string()
                .map(str::to_string)
                .ok_or_else(|| anyhow!("'{}' entries must be strings, got {}", name, value))
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

/// Integer entry converted to a narrower type with a range check
pub fn get_ranged_entry<T>(node: &KdlNode, name: &str) -> Result<Option<T>>
where
    T: TryFrom<i128>,
{
    match get_int_entry(node, name)? {
        None => Ok(None),
        Some(raw) => T::try_from(raw)
            .map(Some)
            .map_err(|_| anyhow!("'{}' value {} is out of range", name, raw)),
    }
}
