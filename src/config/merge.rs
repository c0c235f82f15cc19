//! Field-by-field merging of configuration layers.
//!
//! Objects merge recursively; anything else in a higher layer replaces the
//! lower value. A `null` in a higher layer means "not set" and is skipped.

use serde_json::Value;

/// Merge `overlay` into `base` in place.
pub fn merge_into(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_into(slot, value),
                    None => {
                        if !value.is_null() {
                            base_map.insert(key, value);
                        }
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Merge layers lowest-priority first.
pub fn merge_layers(layers: impl IntoIterator<Item = Value>) -> Value {
    let mut merged = Value::Null;
    for layer in layers {
        if merged.is_null() {
            merged = layer;
        } else {
            merge_into(&mut merged, layer);
        }
    }
    merged
}
