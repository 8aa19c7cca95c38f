use serde_json::Value;

/// Deep-merge `overrides` over `base`
///
/// Objects present on both sides merge key by key, recursively. Anything
/// else (arrays, scalars, or an object meeting a non-object) is replaced
/// wholesale by the override.
pub fn deep_merge(base: &Value, overrides: &Value) -> Value {
    let mut merged = base.clone();
    merge_into(&mut merged, overrides.clone());
    merged
}

/// In-place form of [`deep_merge`]
pub fn merge_into(target: &mut Value, overrides: Value) {
    match (target, overrides) {
        (Value::Object(target), Value::Object(overrides)) => {
            for (key, value) in overrides {
                match target.get_mut(&key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, overrides) => *target = overrides,
    }
}
