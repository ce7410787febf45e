//! Ordered field patches over run documents
//!
//! Paths are JSON Pointers (RFC 6901). `replace` sets the value at the path;
//! on arrays an index equal to the current length extends the array, so
//! writing a turn at its stage index is idempotent. `add` follows JSON Patch
//! insertion, with `-` meaning append.
//!
//! A patch list is applied to a copy of the document and only swapped in when
//! every operation succeeds.

use super::StoreError;
use crate::run::Run;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One field-level operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Replace { path: String, value: Value },
    Add { path: String, value: Value },
}

impl PatchOp {
    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        PatchOp::Replace {
            path: path.into(),
            value,
        }
    }

    pub fn add(path: impl Into<String>, value: Value) -> Self {
        PatchOp::Add {
            path: path.into(),
            value,
        }
    }

    /// `replace` with a serializable value
    pub fn set<T: Serialize>(path: impl Into<String>, value: &T) -> Result<Self, StoreError> {
        Ok(Self::replace(path, serde_json::to_value(value)?))
    }

    pub fn path(&self) -> &str {
        match self {
            PatchOp::Replace { path, .. } | PatchOp::Add { path, .. } => path,
        }
    }
}

/// Apply `ops` in order to a copy of `document`
pub fn apply_patch(document: &Value, ops: &[PatchOp]) -> Result<Value, StoreError> {
    let mut patched = document.clone();
    for op in ops {
        apply_one(&mut patched, op)?;
    }
    Ok(patched)
}

/// Apply `ops` and check the outcome is still a well-formed run
pub fn patch_run_document(document: &Value, ops: &[PatchOp]) -> Result<(Value, Run), StoreError> {
    let patched = apply_patch(document, ops)?;
    let run: Run = serde_json::from_value(patched.clone())
        .map_err(|e| StoreError::InvalidPatch(format!("patched document is not a run: {e}")))?;
    Ok((patched, run))
}

fn apply_one(document: &mut Value, op: &PatchOp) -> Result<(), StoreError> {
    let tokens = parse_pointer(op.path())?;
    let Some((last, parents)) = tokens.split_last() else {
        return Err(StoreError::InvalidPatch(
            "patching the document root is not supported".to_string(),
        ));
    };

    let mut target = document;
    for token in parents {
        target = child_mut(target, token).ok_or_else(|| {
            StoreError::InvalidPatch(format!("path {} does not exist", op.path()))
        })?;
    }

    match (op, target) {
        (PatchOp::Replace { value, .. }, Value::Object(map))
        | (PatchOp::Add { value, .. }, Value::Object(map)) => {
            map.insert(last.clone(), value.clone());
            Ok(())
        }
        (PatchOp::Replace { value, .. }, Value::Array(items)) => {
            let index = array_index(last, items.len(), op.path())?;
            if index < items.len() {
                items[index] = value.clone();
            } else {
                items.push(value.clone());
            }
            Ok(())
        }
        (PatchOp::Add { value, .. }, Value::Array(items)) => {
            let index = array_index(last, items.len(), op.path())?;
            items.insert(index, value.clone());
            Ok(())
        }
        _ => Err(StoreError::InvalidPatch(format!(
            "parent of {} is not a container",
            op.path()
        ))),
    }
}

fn parse_pointer(path: &str) -> Result<Vec<String>, StoreError> {
    let Some(rest) = path.strip_prefix('/') else {
        return Err(StoreError::InvalidPatch(format!(
            "path '{path}' must start with '/'"
        )));
    };
    Ok(rest
        .split('/')
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect())
}

fn child_mut<'a>(value: &'a mut Value, token: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(token),
        Value::Array(items) => token.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
        _ => None,
    }
}

/// Index for an array write; `-` and `len` both mean one past the end
fn array_index(token: &str, len: usize, path: &str) -> Result<usize, StoreError> {
    if token == "-" {
        return Ok(len);
    }
    match token.parse::<usize>() {
        Ok(index) if index <= len => Ok(index),
        Ok(index) => Err(StoreError::InvalidPatch(format!(
            "index {index} out of bounds for array of length {len} at {path}"
        ))),
        Err(_) => Err(StoreError::InvalidPatch(format!(
            "'{token}' is not an array index at {path}"
        ))),
    }
}
