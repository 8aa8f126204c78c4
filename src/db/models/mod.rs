use serde::Serializer;

pub mod external_system;
pub mod item;
pub mod user;

/// Serialize a JSON document stored as TEXT as the document itself.
/// Unparseable text is emitted as a plain string.
pub fn json_text<S: Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    match value {
        None => s.serialize_none(),
        Some(text) => match serde_json::from_str::<serde_json::Value>(text) {
            Ok(v) => s.serialize_some(&v),
            Err(_) => s.serialize_some(text),
        },
    }
}

/// Clamp `skip`/`limit` query parameters into `(offset, limit)`.
pub fn page_bounds(skip: Option<i64>, limit: Option<i64>, max: i64) -> (i64, i64) {
    let offset = skip.unwrap_or(0).max(0);
    let limit = limit.unwrap_or(max).clamp(1, max);
    (offset, limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_bounds_clamp() {
        assert_eq!(page_bounds(None, None, 100), (0, 100));
        assert_eq!(page_bounds(Some(-5), Some(0), 100), (0, 1));
        assert_eq!(page_bounds(Some(20), Some(500), 100), (20, 100));
    }

    #[test]
    fn json_text_emits_documents() {
        #[derive(serde::Serialize)]
        struct Row {
            #[serde(serialize_with = "json_text")]
            data: Option<String>,
        }
        let v = serde_json::to_value(Row { data: Some(r#"{"a":1}"#.to_string()) }).unwrap();
        assert_eq!(v["data"]["a"], 1);
        let v = serde_json::to_value(Row { data: None }).unwrap();
        assert!(v["data"].is_null());
    }
}
