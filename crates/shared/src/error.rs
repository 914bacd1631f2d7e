use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error body returned by the segmentation service on non-2xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl ErrorBody {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }

    /// Extracts a non-empty `detail` from a raw response body, if it has one.
    ///
    /// Validation failures carry `detail` as a list of `{msg, ...}` objects; their
    /// messages are joined. Any other non-string detail is kept as compact JSON.
    pub fn detail_from_bytes(body: &[u8]) -> Option<String> {
        let parsed: RawErrorBody = serde_json::from_slice(body).ok()?;
        let detail = match parsed.detail? {
            Value::Null => return None,
            Value::String(text) => text,
            Value::Array(items) => join_messages(&items)
                .unwrap_or_else(|| Value::Array(items).to_string()),
            other => other.to_string(),
        };
        let detail = detail.trim();
        if detail.is_empty() || detail == "[]" || detail == "{}" {
            None
        } else {
            Some(detail.to_string())
        }
    }
}

#[derive(Deserialize)]
struct RawErrorBody {
    detail: Option<Value>,
}

fn join_messages(items: &[Value]) -> Option<String> {
    let messages = items
        .iter()
        .map(|item| item.get("msg").and_then(Value::as_str))
        .collect::<Option<Vec<_>>>()?;
    Some(messages.join("; "))
}

#[derive(Debug, Error)]
#[error("invalid segmentation result: {message}")]
pub struct ResultValidationError {
    pub message: String,
}

impl ResultValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
