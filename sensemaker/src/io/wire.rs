//! Execution Boundary wire contract.
//!
//! A request is a single JSON document `{code, primary_source, parameters}`; a
//! response is `{result, error, kind, truncated}`. The same documents are used
//! in-process and across the isolation boundary over stdin/stdout, so both
//! strategies classify outcomes through [`classify_response`].

use std::collections::BTreeMap;
use std::io::{Read, Write};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::lessons::truncate_chars;
use crate::core::types::{ActionResult, ErrorKind};
use crate::io::datasets::{DataSource, DatasetRegistry};

/// One synthesized operation to run against a named data source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    pub primary_source: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

/// Response document. `error: null` with a `result` is the success shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WireResponse {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<String>,
    /// Structural error kind. Absent kinds are treated as `code`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(default)]
    pub truncated: bool,
}

impl WireResponse {
    pub fn ok(result: Value, truncated: bool) -> Self {
        Self {
            result,
            error: None,
            kind: None,
            truncated,
        }
    }

    pub fn err(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            result: Value::Null,
            error: Some(message.into()),
            kind: Some(kind),
            truncated: false,
        }
    }
}

/// Runs synthesized code against one data source.
///
/// An `Err` is a logic fault in the code. Faults around the evaluation (panics,
/// isolation, timeouts) are classified by the boundary, not the evaluator.
pub trait Evaluator {
    fn evaluate(
        &self,
        request: &ExecutionRequest,
        source: &DataSource,
        registry: &DatasetRegistry,
    ) -> Result<Value, String>;
}

/// Check a request against the registry before anything runs it.
///
/// Both boundary strategies apply the same rule: empty code and unknown sources
/// are `code` errors.
pub fn admit<'r>(
    request: &ExecutionRequest,
    registry: &'r DatasetRegistry,
) -> Result<&'r DataSource, WireResponse> {
    if request.code.trim().is_empty() {
        return Err(WireResponse::err(ErrorKind::Code, "no code provided"));
    }
    registry.get(&request.primary_source).ok_or_else(|| {
        let available = if registry.is_empty() {
            "none registered".to_string()
        } else {
            registry.names().join(", ")
        };
        WireResponse::err(
            ErrorKind::Code,
            format!(
                "unknown data source '{}' (available: {available})",
                request.primary_source
            ),
        )
    })
}

/// Evaluate a request and build the response document.
pub fn respond<E: Evaluator + ?Sized>(
    request: &ExecutionRequest,
    registry: &DatasetRegistry,
    evaluator: &E,
    char_limit: usize,
) -> WireResponse {
    let source = match admit(request, registry) {
        Ok(source) => source,
        Err(response) => return response,
    };
    match evaluator.evaluate(request, source, registry) {
        Ok(value) => {
            let (value, truncated) = truncate_value(value, char_limit);
            WireResponse::ok(value, truncated)
        }
        Err(message) => WireResponse::err(ErrorKind::Code, message),
    }
}

/// Serve exactly one request: read a document from `reader`, write one to `writer`.
///
/// An unparsable request is answered with a `code` error document rather than
/// failing, so the peer always receives a response.
pub fn serve<R: Read, W: Write, E: Evaluator + ?Sized>(
    mut reader: R,
    mut writer: W,
    registry: &DatasetRegistry,
    evaluator: &E,
    char_limit: usize,
) -> Result<()> {
    let mut raw = String::new();
    reader
        .read_to_string(&mut raw)
        .context("read request document")?;
    let response = match serde_json::from_str::<ExecutionRequest>(&raw) {
        Ok(request) => respond(&request, registry, evaluator, char_limit),
        Err(err) => WireResponse::err(ErrorKind::Code, format!("invalid request document: {err}")),
    };
    serde_json::to_writer(&mut writer, &response).context("write response document")?;
    writer.flush().context("flush response document")?;
    Ok(())
}

/// Parse a response document produced by the isolated environment.
pub fn decode_response(stdout: &[u8], char_limit: usize) -> ActionResult {
    match serde_json::from_slice::<WireResponse>(stdout) {
        Ok(response) => classify_response(response, char_limit),
        Err(err) => {
            let preview = truncate_chars(String::from_utf8_lossy(stdout).trim(), 500);
            warn!(err = %err, "unparsable response document");
            ActionResult::failure(
                ErrorKind::Environment,
                format!("sandbox returned invalid JSON ({err}): {preview}"),
            )
        }
    }
}

/// Map a response document onto an [`ActionResult`].
pub fn classify_response(response: WireResponse, char_limit: usize) -> ActionResult {
    if let Some(message) = response.error.filter(|m| !m.trim().is_empty()) {
        let kind = response.kind.unwrap_or(ErrorKind::Code);
        debug!(kind = kind.as_str(), "response carries an error");
        return ActionResult::failure(kind, message);
    }
    classify_value(response.result, response.truncated, char_limit)
}

/// Classify a successful evaluation value.
///
/// String values holding JSON are decoded first; empty outcomes are `Data`.
pub fn classify_value(value: Value, truncated: bool, char_limit: usize) -> ActionResult {
    let value = decode_embedded(value);
    if is_empty_outcome(&value) {
        return ActionResult::failure(ErrorKind::Data, "query returned no data (empty result)");
    }
    let (value, cut) = truncate_value(value, char_limit);
    if truncated || cut {
        ActionResult::truncated(value)
    } else {
        ActionResult::success(value)
    }
}

fn decode_embedded(value: Value) -> Value {
    match value {
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(decoded) => decoded,
            Err(_) => Value::String(text),
        },
        other => other,
    }
}

fn is_empty_outcome(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Cut a value whose JSON text exceeds `limit` characters down to a string.
pub fn truncate_value(value: Value, limit: usize) -> (Value, bool) {
    let text = match &value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    if text.chars().count() <= limit {
        return (value, false);
    }
    let cut: String = text.chars().take(limit).collect();
    (Value::String(cut), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    struct Echo;

    impl Evaluator for Echo {
        fn evaluate(
            &self,
            request: &ExecutionRequest,
            _source: &DataSource,
            _registry: &DatasetRegistry,
        ) -> Result<Value, String> {
            match request.code.as_str() {
                "boom" => Err("name 'boom' is not defined".to_string()),
                code => Ok(Value::String(code.to_string())),
            }
        }
    }

    fn registry() -> DatasetRegistry {
        DatasetRegistry::from_sources(
            "/data",
            vec![DataSource {
                name: "vitals".to_string(),
                path: PathBuf::from("vitals.csv"),
                description: String::new(),
            }],
        )
        .expect("registry")
    }

    fn request(code: &str, source: &str) -> ExecutionRequest {
        ExecutionRequest {
            code: code.to_string(),
            primary_source: source.to_string(),
            parameters: BTreeMap::new(),
        }
    }

    #[test]
    fn legacy_success_shape_decodes_embedded_json() {
        let raw = br#"{"result": "155.0", "error": null, "truncated": false}"#;
        assert_eq!(decode_response(raw, 5000), ActionResult::success(155.0));

        let raw = br#"{"result": "{\"uid\": \"test004\"}", "error": null}"#;
        assert_eq!(
            decode_response(raw, 5000),
            ActionResult::success(json!({"uid": "test004"}))
        );
    }

    #[test]
    fn empty_outcomes_are_data_failures() {
        for raw in [
            json!({"result": null, "error": null}),
            json!({"result": "[]", "error": null}),
            json!({"result": {}, "error": null}),
            json!({"result": "  ", "error": null}),
        ] {
            let result = classify_response(serde_json::from_value(raw).unwrap(), 100);
            assert_eq!(result.error_kind(), Some(ErrorKind::Data));
        }
    }

    #[test]
    fn errors_keep_their_structural_kind() {
        let raw = br#"{"result": null, "error": "Code execution failed: KeyError"}"#;
        assert_eq!(decode_response(raw, 100).error_kind(), Some(ErrorKind::Code));

        let raw = br#"{"error": "no datasets mounted", "kind": "environment"}"#;
        assert_eq!(
            decode_response(raw, 100).error_kind(),
            Some(ErrorKind::Environment)
        );
    }

    #[test]
    fn unparsable_responses_are_environment_failures() {
        let result = decode_response(b"Traceback (most recent call last)", 100);
        assert_eq!(result.error_kind(), Some(ErrorKind::Environment));
    }

    #[test]
    fn long_results_are_truncated_and_flagged() {
        let long = "x".repeat(50);
        let result = classify_value(Value::String(long), false, 10);
        assert_eq!(result, ActionResult::truncated("x".repeat(10)));
    }

    #[test]
    fn serve_answers_every_request_with_one_document() {
        let registry = registry();
        let cases = [
            (serde_json::to_string(&request("42", "vitals")).unwrap(), None),
            (
                serde_json::to_string(&request("boom", "vitals")).unwrap(),
                Some(ErrorKind::Code),
            ),
            (
                serde_json::to_string(&request("42", "labs")).unwrap(),
                Some(ErrorKind::Code),
            ),
            (
                serde_json::to_string(&request("", "vitals")).unwrap(),
                Some(ErrorKind::Code),
            ),
            ("not json".to_string(), Some(ErrorKind::Code)),
        ];
        for (input, expected) in cases {
            let mut out = Vec::new();
            serve(input.as_bytes(), &mut out, &registry, &Echo, 5000).expect("serve");
            let result = decode_response(&out, 5000);
            assert_eq!(result.error_kind(), expected, "{input}");
        }
    }

    #[test]
    fn unknown_source_lists_available_sources() {
        let response = respond(&request("1", "labs"), &registry(), &Echo, 100);
        assert_eq!(
            response.error.as_deref(),
            Some("unknown data source 'labs' (available: vitals)")
        );

        let empty = DatasetRegistry::new("/data");
        let rejected = admit(&request("1", "vitals"), &empty).unwrap_err();
        assert_eq!(rejected.kind, Some(ErrorKind::Code));
        assert_eq!(
            rejected.error.as_deref(),
            Some("unknown data source 'vitals' (available: none registered)")
        );
    }
}
