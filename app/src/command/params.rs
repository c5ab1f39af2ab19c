use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use serde_json::{Map, Value};

use super::MappingError;

const KEY_SEPARATOR: char = '.';

/// Flattens nested command parameters into dotted keys, e.g.
/// `{"updateModeSettings": {"load": "small"}}` becomes `updateModeSettings.load = "small"`.
/// A dotted key that also results from nesting, as in `{"a.b": 1, "a": {"b": 2}}`, is rejected.
pub fn flatten(params: &Map<String, Value>) -> Result<BTreeMap<String, Value>, MappingError> {
    let mut flat = BTreeMap::new();
    flatten_into(&mut flat, None, params)?;
    Ok(flat)
}

fn flatten_into(
    flat: &mut BTreeMap<String, Value>,
    prefix: Option<&str>,
    params: &Map<String, Value>,
) -> Result<(), MappingError> {
    for (key, value) in params {
        let key = match prefix {
            Some(prefix) => format!("{}{}{}", prefix, KEY_SEPARATOR, key),
            None => key.clone(),
        };

        match value {
            Value::Object(nested) => flatten_into(flat, Some(key.as_str()), nested)?,
            Value::Array(_) => return Err(MappingError::UnsupportedParameter { key }),
            scalar => match flat.entry(key) {
                Entry::Vacant(entry) => {
                    entry.insert(scalar.clone());
                }
                Entry::Occupied(entry) => {
                    return Err(MappingError::DuplicateParameter { key: entry.key().clone() });
                }
            },
        }
    }

    Ok(())
}

/// Inverse of [`flatten`]. A dotted key wins over a scalar that sits on one of its prefixes.
pub fn unflatten(flat: impl IntoIterator<Item = (String, Value)>) -> Map<String, Value> {
    let mut root = Map::new();

    for (key, value) in flat {
        let mut segments: Vec<&str> = key.split(KEY_SEPARATOR).collect();
        let Some(leaf) = segments.pop() else {
            continue;
        };

        let mut node = &mut root;
        for segment in segments {
            let child = node
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));

            if !child.is_object() {
                *child = Value::Object(Map::new());
            }

            node = match child {
                Value::Object(map) => map,
                _ => unreachable!("replaced by an object above"),
            };
        }

        match node.get(leaf) {
            Some(Value::Object(_)) => {}
            _ => {
                node.insert(leaf.to_string(), value);
            }
        }
    }

    root
}
