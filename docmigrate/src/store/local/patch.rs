//! Partial document updates for the local store
//!
//! Paths are JSON pointers (`/address/city`, `/tags/0`, `/tags/-`). A patch is
//! all-or-nothing: operations run against a copy that replaces the stored
//! document only when every operation succeeded.

use crate::error::{Error, Result};
use crate::store::types::PatchOperation;
use serde_json::{Map, Value};

pub(crate) fn apply_patch(document: &Value, operations: &[PatchOperation]) -> Result<Value> {
    let mut patched = document.clone();
    for (index, operation) in operations.iter().enumerate() {
        apply_one(&mut patched, operation).map_err(|e| {
            e.with_context(format!(
                "patch operation #{} ({} {})",
                index,
                operation.name(),
                operation.path()
            ))
        })?;
    }
    Ok(patched)
}

fn split(path: &str) -> Result<(String, String)> {
    if !path.starts_with('/') || path.len() < 2 {
        return Err(Error::invalid_patch(format!(
            "Path must be a JSON pointer like '/field': '{}'",
            path
        )));
    }
    if path == "/id" {
        return Err(Error::invalid_patch("The document id cannot be patched"));
    }

    // rsplit_once always succeeds after the '/' check above
    let (parent, last) = path.rsplit_once('/').unwrap_or(("", path));
    let last = last.replace("~1", "/").replace("~0", "~");
    Ok((parent.to_string(), last))
}

fn parent_mut<'v>(document: &'v mut Value, parent: &str) -> Result<&'v mut Value> {
    document
        .pointer_mut(parent)
        .ok_or_else(|| Error::invalid_patch(format!("Parent path '{}' does not exist", parent)))
}

fn array_index(segment: &str, len: usize, allow_end: bool) -> Result<usize> {
    if segment == "-" && allow_end {
        return Ok(len);
    }
    let index: usize = segment
        .parse()
        .map_err(|_| Error::invalid_patch(format!("'{}' is not an array index", segment)))?;
    let limit = if allow_end { len } else { len.saturating_sub(1) };
    if index > limit || (!allow_end && len == 0) {
        return Err(Error::invalid_patch(format!(
            "Array index {} out of bounds (length {})",
            index, len
        )));
    }
    Ok(index)
}

fn object_or_array<'v>(value: &'v mut Value, path: &str) -> Result<Target<'v>> {
    match value {
        Value::Object(map) => Ok(Target::Object(map)),
        Value::Array(items) => Ok(Target::Array(items)),
        _ => Err(Error::invalid_patch(format!(
            "Parent of '{}' is neither an object nor an array",
            path
        ))),
    }
}

enum Target<'v> {
    Object(&'v mut Map<String, Value>),
    Array(&'v mut Vec<Value>),
}

fn apply_one(document: &mut Value, operation: &PatchOperation) -> Result<()> {
    let path = operation.path();
    let (parent, last) = split(path)?;
    let target = object_or_array(parent_mut(document, &parent)?, path)?;

    match (operation, target) {
        (PatchOperation::Add { value, .. }, Target::Object(map))
        | (PatchOperation::Set { value, .. }, Target::Object(map)) => {
            map.insert(last, value.clone());
        }
        (PatchOperation::Add { value, .. }, Target::Array(items)) => {
            let index = array_index(&last, items.len(), true)?;
            items.insert(index, value.clone());
        }
        (PatchOperation::Set { value, .. }, Target::Array(items)) => {
            let index = array_index(&last, items.len(), true)?;
            if index == items.len() {
                items.push(value.clone());
            } else {
                items[index] = value.clone();
            }
        }
        (PatchOperation::Replace { value, .. }, Target::Object(map)) => match map.get_mut(&last) {
            Some(slot) => *slot = value.clone(),
            None => {
                return Err(Error::invalid_patch(format!(
                    "Cannot replace missing property '{}'",
                    path
                )))
            }
        },
        (PatchOperation::Replace { value, .. }, Target::Array(items)) => {
            let index = array_index(&last, items.len(), false)?;
            items[index] = value.clone();
        }
        (PatchOperation::Remove { .. }, Target::Object(map)) => {
            if map.remove(&last).is_none() {
                return Err(Error::invalid_patch(format!(
                    "Cannot remove missing property '{}'",
                    path
                )));
            }
        }
        (PatchOperation::Remove { .. }, Target::Array(items)) => {
            let index = array_index(&last, items.len(), false)?;
            items.remove(index);
        }
        (PatchOperation::Increment { value, .. }, Target::Object(map)) => {
            let by = value.as_f64().ok_or_else(|| {
                Error::invalid_patch(format!("Increment value for '{}' is not a number", path))
            })?;
            let next = match map.get(&last) {
                None => value.clone(),
                Some(current) => increment(current, value, by, path)?,
            };
            map.insert(last, next);
        }
        (PatchOperation::Increment { value, .. }, Target::Array(items)) => {
            let index = array_index(&last, items.len(), false)?;
            let by = value.as_f64().ok_or_else(|| {
                Error::invalid_patch(format!("Increment value for '{}' is not a number", path))
            })?;
            let next = increment(&items[index], value, by, path)?;
            items[index] = next;
        }
    }

    Ok(())
}

fn increment(current: &Value, by_value: &Value, by: f64, path: &str) -> Result<Value> {
    if let (Some(a), Some(b)) = (current.as_i64(), by_value.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Ok(Value::from(sum));
        }
    }
    let a = current.as_f64().ok_or_else(|| {
        Error::invalid_patch(format!("Cannot increment non-numeric property '{}'", path))
    })?;
    serde_json::Number::from_f64(a + by)
        .map(Value::Number)
        .ok_or_else(|| Error::invalid_patch(format!("Increment of '{}' overflowed", path)))
}
