// SPDX-License-Identifier: MIT OR Apache-2.0

//! Response sanitizer: strips sensitive labels from Prometheus-compatible
//! responses before they reach the caller.
//!
//! Operates on a buffered `Bytes` body only for the five sanitizable
//! path classes; every other path is passed through by the caller
//! without ever reaching this module.

use serde_json::Value;

use super::strategy::PathClass;

/// Removes `sensitive` labels from a Prometheus-compatible JSON response
/// body, per the path class. Returns the original bytes unchanged
/// (fail-open) if the body does not parse as JSON failure
/// semantics: "sanitizer parse failure falls through with the original
/// body".
pub fn sanitize(path_class: PathClass, label_name: &str, sensitive: &[String], body: &[u8]) -> Vec<u8> {
    let Ok(mut value) = serde_json::from_slice::<Value>(body) else {
        return body.to_vec();
    };

    match path_class {
        PathClass::Query | PathClass::QueryRange => strip_query_labels(&mut value, sensitive),
        PathClass::Series => strip_series_labels(&mut value, sensitive),
        PathClass::Labels => strip_labels_list(&mut value, sensitive),
        PathClass::LabelValues => null_sensitive_label_values(&mut value, label_name, sensitive),
        PathClass::Other => return body.to_vec(),
    }

    serde_json::to_vec(&value).unwrap_or_else(|_| body.to_vec())
}

fn is_sensitive(name: &str, sensitive: &[String]) -> bool {
    sensitive.iter().any(|s| s == name)
}

fn strip_object_labels(obj: &mut serde_json::Map<String, Value>, sensitive: &[String]) {
    for name in sensitive {
        obj.remove(name);
    }
}

/// `query`/`query_range`: remove named labels from every result's metric
/// map at `data.result[*].metric`.
fn strip_query_labels(value: &mut Value, sensitive: &[String]) {
    let Some(results) = value
    .pointer_mut("/data/result")
    .and_then(Value::as_array_mut)
    else {
        return;
    };
    for result in results {
        if let Some(metric) = result.get_mut("metric").and_then(Value::as_object_mut) {
            strip_object_labels(metric, sensitive);
        }
    }
}

/// `series`: remove named labels from every returned object at
/// `data[*]`.
fn strip_series_labels(value: &mut Value, sensitive: &[String]) {
    let Some(results) = value.pointer_mut("/data").and_then(Value::as_array_mut) else {
        return;
    };
    for entry in results {
        if let Some(obj) = entry.as_object_mut() {
            strip_object_labels(obj, sensitive);
        }
    }
}

/// `labels`: remove named labels from the returned list at `data`.
fn strip_labels_list(value: &mut Value, sensitive: &[String]) {
    let Some(data) = value.get_mut("data").and_then(Value::as_array_mut) else {
        return;
    };
    data.retain(|entry| match entry.as_str() {
            Some(name) => !is_sensitive(name, sensitive),
            None => true,
    });
}

/// `label/{name}/values`: if `{name}` is sensitive, replace the value list
/// with `null`; otherwise pass through.
fn null_sensitive_label_values(value: &mut Value, label_name: &str, sensitive: &[String]) {
    if !is_sensitive(label_name, sensitive) {
        return;
    }
    if let Some(obj) = value.as_object_mut() {
        obj.insert("data".to_string(), Value::Null);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENSITIVE: &[&str] = &["instance", "hostname"];

    fn sensitive_vec() -> Vec<String> {
        SENSITIVE.iter().map(|s| s.to_string()).collect()
    }

    /// `instance`/`hostname` are stripped; other labels pass through untouched.
    #[test]
    fn query_response_strips_sensitive_labels() {
        let body = serde_json::json!({
                "status": "success",
                "data": {
                    "resultType": "vector",
                    "result": [{
                            "metric": {
                                "job": "test",
                                "instance": "example:9010",
                                "hostname": "example",
                                "status": "200"
                            },
                            "value": [1700000000, "1"]
                    }]
                }
        });
        let bytes = serde_json::to_vec(&body).unwrap();
        let sanitized = sanitize(PathClass::Query, "", &sensitive_vec(), &bytes);
        let parsed: Value = serde_json::from_slice(&sanitized).unwrap();
        let metric = &parsed["data"]["result"][0]["metric"];
        assert!(metric.get("instance").is_none());
        assert!(metric.get("hostname").is_none());
        assert_eq!(metric["job"], "test");
        assert_eq!(metric["status"], "200");
    }

    #[test]
    fn label_values_nulled_for_sensitive_name() {
        let body = serde_json::json!({"status": "success", "data": ["example:9010", "other:9010"]});
        let bytes = serde_json::to_vec(&body).unwrap();
        let sanitized = sanitize(PathClass::LabelValues, "instance", &sensitive_vec(), &bytes);
        let parsed: Value = serde_json::from_slice(&sanitized).unwrap();
        assert!(parsed["data"].is_null());
    }

    #[test]
    fn label_values_preserved_for_non_sensitive_name() {
        let body = serde_json::json!({"status": "success", "data": ["a", "b"]});
        let bytes = serde_json::to_vec(&body).unwrap();
        let sanitized = sanitize(PathClass::LabelValues, "job", &sensitive_vec(), &bytes);
        let parsed: Value = serde_json::from_slice(&sanitized).unwrap();
        assert_eq!(parsed["data"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn labels_list_drops_sensitive_entries() {
        let body = serde_json::json!({"status": "success", "data": ["job", "instance", "hostname"]});
        let bytes = serde_json::to_vec(&body).unwrap();
        let sanitized = sanitize(PathClass::Labels, "", &sensitive_vec(), &bytes);
        let parsed: Value = serde_json::from_slice(&sanitized).unwrap();
        assert_eq!(parsed["data"], serde_json::json!(["job"]));
    }

    #[test]
    fn sanitizer_is_idempotent() {
        let body = serde_json::json!({
                "status": "success",
                "data": {"result": [{"metric": {"job": "test", "instance": "x"}, "value": [1, "1"]}]}
        });
        let bytes = serde_json::to_vec(&body).unwrap();
        let once = sanitize(PathClass::Query, "", &sensitive_vec(), &bytes);
        let twice = sanitize(PathClass::Query, "", &sensitive_vec(), &once);
        let once_parsed: Value = serde_json::from_slice(&once).unwrap();
        let twice_parsed: Value = serde_json::from_slice(&twice).unwrap();
        assert_eq!(once_parsed, twice_parsed);
    }

    #[test]
    fn unparseable_body_passes_through_unchanged() {
        let body = b"not json";
        let sanitized = sanitize(PathClass::Query, "", &sensitive_vec(), body);
        assert_eq!(sanitized, body);
    }
}
