use bytes::Bytes;
use serde_json::Value;

use modelgate_core::RelayError;

/// Rewrite the `model` field when the channel remaps it. The untouched path
/// returns the original bytes so retries re-send a byte-identical body.
pub(crate) fn remap_model_in_body(
    body: &Bytes,
    origin_model: &str,
    upstream_model: &str,
) -> Result<Bytes, RelayError> {
    if origin_model == upstream_model {
        return Ok(body.clone());
    }
    let mut value: Value = serde_json::from_slice(body)
        .map_err(|err| RelayError::invalid_request(format!("malformed request: {err}")))?;
    if let Some(object) = value.as_object_mut() {
        object.insert("model".to_string(), Value::String(upstream_model.to_string()));
    }
    let rewritten = serde_json::to_vec(&value)
        .map_err(|err| RelayError::invalid_request(err.to_string()))?;
    Ok(Bytes::from(rewritten))
}

/// Join a base URL and path without doubling the separator.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_remap_returns_the_same_bytes() {
        let body = Bytes::from_static(br#"{"model":"m","messages":[]}"#);
        let out = remap_model_in_body(&body, "m", "m").unwrap();
        assert_eq!(out, body);
    }

    #[test]
    fn remap_rewrites_only_the_model_field() {
        let body = Bytes::from_static(br#"{"model":"m","temperature":0.5}"#);
        let out = remap_model_in_body(&body, "m", "upstream-m").unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["model"], "upstream-m");
        assert_eq!(value["temperature"], 0.5);
    }

    #[test]
    fn join_url_handles_trailing_slashes() {
        assert_eq!(
            join_url("https://api.example/", "/v1/chat/completions"),
            "https://api.example/v1/chat/completions"
        );
    }
}
