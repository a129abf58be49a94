//! Message identifiers and output-line decoding.
//!
//! Messages are opaque JSON values. The relay only looks at the top-level
//! `id` field: it is the correlation identifier linking a request to the
//! response line the child eventually prints.

use std::fmt::{Display, Formatter};

use serde_json::Value;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Name of the correlation field in every message.
pub const ID_FIELD: &str = "id";

/// Correlation identifier of a request/response pair.
///
/// JSON-RPC allows string and numeric ids. Numeric ids are restricted to
/// integers representable as `i64`; anything else is not correlatable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Integer identifier, e.g. `"id": 7`.
    Number(i64),
    /// String identifier, e.g. `"id": "req-7"`.
    String(String),
}

impl MessageId {
    /// Convert a raw JSON `id` value, returning `None` for unsupported types.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Number(n) => n.as_i64().map(Self::Number),
            _ => None,
        }
    }

    /// Extract the identifier of a message, if it carries a usable one.
    #[must_use]
    pub fn of(message: &Value) -> Option<Self> {
        message.get(ID_FIELD).and_then(Self::from_value)
    }

    /// Generate a fresh string identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self::String(uuid::Uuid::new_v4().to_string())
    }

    /// JSON representation of the identifier.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::from(*n),
            Self::String(s) => Value::String(s.clone()),
        }
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// Return the identifier of an outbound request, assigning one if missing.
///
/// A missing or `null` id is replaced by a generated UUID string, written
/// back into `message`.
///
/// # Errors
///
/// Returns [`AppError::InvalidRequest`] when `message` is not a JSON object
/// or its `id` is neither a string nor an `i64`-range integer.
pub fn ensure_id(message: &mut Value) -> Result<MessageId> {
    let Some(object) = message.as_object_mut() else {
        return Err(AppError::InvalidRequest(
            "message must be a JSON object".into(),
        ));
    };

    match object.get(ID_FIELD) {
        None | Some(Value::Null) => {
            let id = MessageId::generate();
            object.insert(ID_FIELD.to_owned(), id.to_value());
            Ok(id)
        }
        Some(raw) => MessageId::from_value(raw).ok_or_else(|| {
            AppError::InvalidRequest(format!(
                "`id` must be a string or a 64-bit integer, got {raw}"
            ))
        }),
    }
}

/// Decode one framed output line into a JSON message.
///
/// # Errors
///
/// Returns [`AppError::MalformedOutput`] when the line is not valid JSON.
pub fn parse_output_line(line: &str) -> Result<Value> {
    serde_json::from_str(line).map_err(|e| AppError::MalformedOutput(format!("{e}")))
}

/// Decode a line, logging and discarding anything that is not JSON.
///
/// Blank lines yield `None` silently; other undecodable lines are treated as
/// diagnostic text and logged at `WARN`.
#[must_use]
pub fn decode_line(line: &str) -> Option<Value> {
    if line.trim().is_empty() {
        return None;
    }

    match parse_output_line(line) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, raw_line = %line, "dropping non-json child output");
            None
        }
    }
}

/// Log a decoded message that no pending request is waiting for.
pub(crate) fn log_uncorrelated(message: &Value) {
    match MessageId::of(message) {
        Some(id) => debug!(%id, "dropping response with no pending request"),
        None => debug!(
            method = message.get("method").and_then(serde_json::Value::as_str),
            "child emitted out-of-band message"
        ),
    }
}
