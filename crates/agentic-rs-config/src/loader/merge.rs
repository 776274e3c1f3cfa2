//! Deep merge of JSON layers with requirement locks.

use serde_json::{Map, Value};

/// Merge `overlay` into `base`. Objects merge key by key; any other value
/// replaces what was there. Keys present as leaves in `locked` keep the
/// value already in `base`.
pub(super) fn merge_layer(base: &mut Value, overlay: &Value, locked: Option<&Value>) {
    let (Value::Object(target), Value::Object(source)) = (&mut *base, overlay) else {
        if locked.is_none() {
            *base = overlay.clone();
        }
        return;
    };
    let locked_map = match locked {
        Some(Value::Object(map)) => Some(map),
        Some(_) => return,
        None => None,
    };

    for (key, value) in source {
        match locked_map.and_then(|map| map.get(key)) {
            Some(nested @ Value::Object(_)) => {
                let slot = target
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                merge_layer(slot, value, Some(nested));
            }
            Some(_) => {}
            None => match target.get_mut(key) {
                Some(slot) => merge_layer(slot, value, None),
                None => {
                    target.insert(key.clone(), value.clone());
                }
            },
        }
    }
}
