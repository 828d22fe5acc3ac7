//! Message keys for published rows.

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

/// Key for the row's message: the natural key when it is a positive
/// integer, otherwise a unique placeholder.
///
/// The key is never empty; an empty key would send rows to an arbitrary
/// partition and lose per-key ordering.
pub fn message_key(row: &Value, key_field: &str) -> String {
    match row.get(key_field).and_then(positive_id) {
        Some(id) => id.to_string(),
        None => synthesize_key(),
    }
}

fn positive_id(value: &Value) -> Option<u64> {
    let id = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    (id > 0).then_some(id)
}

/// `temp_<unix millis>_<random>`, unique within and across runs.
pub fn synthesize_key() -> String {
    format!(
        "temp_{}_{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_natural_key() {
        assert_eq!(message_key(&json!({"booking_id": 42}), "booking_id"), "42");
        assert_eq!(message_key(&json!({"booking_id": " 7 "}), "booking_id"), "7");
    }

    #[test]
    fn test_unusable_keys_are_synthesized() {
        for row in [
            json!({}),
            json!({"booking_id": null}),
            json!({"booking_id": 0}),
            json!({"booking_id": -3}),
            json!({"booking_id": 1.5}),
            json!({"booking_id": ""}),
            json!({"booking_id": "abc"}),
        ] {
            let key = message_key(&row, "booking_id");
            assert!(key.starts_with("temp_"), "{row} -> {key}");
        }
    }

    #[test]
    fn test_synthesized_keys_are_unique() {
        let keys: HashSet<String> = (0..1000)
            .map(|_| message_key(&json!({"id": null}), "id"))
            .collect();
        assert_eq!(keys.len(), 1000);
        assert!(keys.iter().all(|k| !k.is_empty()));
    }
}
