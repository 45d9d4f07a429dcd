//! Translation of REST requests into RPC request messages.
//!
//! The request body (when the binding takes one) and the query string are
//! merged into one JSON object which is then deserialized into the message.
//! Query keys address fields by dotted path (`context.cluster=default`); a
//! key given more than once becomes a list. Field names may be written in
//! `snake_case` or `lowerCamelCase`.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::GatewayError;

/// Which part of the HTTP request carries the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestBody {
    /// Fields come from the query string only.
    None,
    /// The whole message is the JSON body (`body: "*"`).
    Whole,
}

/// Decode an RPC request message from a REST request.
pub fn decode_request<M: DeserializeOwned>(
    mode: RequestBody,
    params: &[(String, String)],
    body: &[u8],
) -> Result<M, GatewayError> {
    let mut root = match mode {
        RequestBody::Whole if !body.iter().all(u8::is_ascii_whitespace) => {
            match serde_json::from_slice::<Value>(body)
                .map_err(|e| GatewayError::BadRequest(format!("invalid request body: {e}")))?
            {
                Value::Object(map) => camel_case_keys(map),
                other => {
                    return Err(GatewayError::BadRequest(format!(
                        "request body must be a JSON object, got {other}"
                    )));
                }
            }
        }
        _ => Map::new(),
    };
    if mode == RequestBody::None {
        for (key, value) in params {
            insert_path(&mut root, key, value)?;
        }
    }
    serde_json::from_value(Value::Object(root))
        .map_err(|e| GatewayError::BadRequest(format!("invalid request: {e}")))
}

/// `page_size` -> `pageSize`; names already in camel case are unchanged.
pub fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = !out.is_empty();
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn camel_case_keys(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .map(|(key, value)| (camel_case(&key), camel_case_value(value)))
        .collect()
}

fn camel_case_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(camel_case_keys(map)),
        Value::Array(items) => Value::Array(items.into_iter().map(camel_case_value).collect()),
        other => other,
    }
}

fn insert_path(root: &mut Map<String, Value>, path: &str, value: &str) -> Result<(), GatewayError> {
    let invalid = || GatewayError::BadRequest(format!("invalid query parameter '{path}'"));
    let mut segments: Vec<String> = path.split('.').map(camel_case).collect();
    if segments.iter().any(String::is_empty) {
        return Err(invalid());
    }
    let Some(leaf) = segments.pop() else {
        return Err(invalid());
    };

    let mut node = root;
    for segment in segments {
        let entry = node
            .entry(segment)
            .or_insert_with(|| Value::Object(Map::new()));
        node = match entry {
            Value::Object(map) => map,
            _ => return Err(invalid()),
        };
    }

    let value = Value::String(value.to_string());
    match node.get_mut(&leaf) {
        None => {
            node.insert(leaf, value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing @ Value::String(_)) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        Some(_) => return Err(invalid()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubeapps_core::proto::packages::{AddPackageRepositoryRequest, GetAvailablePackageSummariesRequest};

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn names_are_camel_cased() {
        assert_eq!(camel_case("page_size"), "pageSize");
        assert_eq!(camel_case("pageSize"), "pageSize");
        assert_eq!(camel_case("available_package_ref"), "availablePackageRef");
        assert_eq!(camel_case("_private"), "private");
    }

    #[test]
    fn query_parameters_fill_nested_fields() {
        let request: GetAvailablePackageSummariesRequest = decode_request(
            RequestBody::None,
            &params(&[
                ("context.cluster", "default"),
                ("context.namespace", "kubeapps"),
                ("pagination_options.page_size", "10"),
                ("filterOptions.categories", "Database"),
                ("filterOptions.categories", "CMS"),
                ("unknownField", "ignored"),
            ]),
            b"",
        )
        .unwrap();

        let context = request.context.unwrap();
        assert_eq!((context.cluster.as_str(), context.namespace.as_str()), ("default", "kubeapps"));
        assert_eq!(request.pagination_options.unwrap().page_size, 10);
        assert_eq!(request.filter_options.unwrap().categories, vec!["Database", "CMS"]);
    }

    #[test]
    fn whole_body_ignores_unknown_fields() {
        let request: AddPackageRepositoryRequest = decode_request(
            RequestBody::Whole,
            &[],
            br#"{"name":"bitnami","namespace_scoped":true,"plugin":{"name":"helm.packages"},"extra":{"a":1}}"#,
        )
        .unwrap();
        assert_eq!(request.name, "bitnami");
        assert!(request.namespace_scoped);
        assert_eq!(request.plugin.unwrap().name, "helm.packages");
    }

    #[test]
    fn malformed_input_is_a_bad_request() {
        let err = decode_request::<AddPackageRepositoryRequest>(RequestBody::Whole, &[], b"[1]").unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));

        let err = decode_request::<GetAvailablePackageSummariesRequest>(
            RequestBody::None,
            &params(&[("context", "x"), ("context.cluster", "y")]),
            b"",
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }
}
