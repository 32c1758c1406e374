//! Shared envelope model and JSON codec for the exchange transport.
//!
//! Every transport frame carries exactly one UTF-8 JSON envelope. Outbound
//! envelopes are method calls tagged with a correlation id; inbound envelopes
//! are replies, told apart only by which fields are present:
//!
//! - `{"id", "result"}`: unary success or intermediate stream chunk
//! - `{"id", "result", "end": true}`: final stream chunk
//! - `{"id", "error": {"code", "message"}}`: failure
//!
//! Payloads (`params` / `result`) stay opaque `serde_json::Value`s at this layer.

pub mod codes;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Correlation id shared by a request and all of its replies.
pub type ExchangeId = u64;

/// Largest integer every JSON peer can represent exactly (2^53 - 1).
///
/// Id counters wrap back to 0 before reaching this value.
pub const MAX_SAFE_ID: ExchangeId = (1 << 53) - 1;

const FIELD_ID: &str = "id";
const FIELD_RESULT: &str = "result";
const FIELD_END: &str = "end";
const FIELD_ERROR: &str = "error";
const FIELD_CODE: &str = "code";
const FIELD_MESSAGE: &str = "message";

/// Error returned by the envelope codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
    /// The frame bytes are not valid UTF-8.
    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    /// The frame text is not valid JSON, or not a request shape.
    #[error("frame is not a valid JSON envelope: {0}")]
    Json(#[source] serde_json::Error),
    /// The envelope has no integer `id` field.
    #[error("envelope has no integer id")]
    MissingId,
}

/// An outbound method call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id assigned by the sender.
    pub id: ExchangeId,
    /// Remote method name, e.g. `"getModelList"`.
    pub method: String,
    /// Arbitrary JSON parameters.
    pub params: Value,
}

impl Request {
    /// Build a request envelope.
    pub fn new(id: ExchangeId, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

/// An inbound reply, already routed by id.
#[derive(Clone, Debug, PartialEq)]
pub struct Inbound {
    /// Correlation id of the request this replies to.
    pub id: ExchangeId,
    /// What the reply carries.
    pub reply: Reply,
}

/// Classified body of an inbound envelope.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// A `result` value. `end` is true only for a final stream chunk.
    Result { value: Value, end: bool },
    /// A server-reported failure.
    Error { code: i64, message: String },
    /// Neither a usable `result` nor a usable `error`.
    Malformed,
}

/// Encode a request into frame bytes.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode_request(request: &Request) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(request).map_err(CodecError::Encode)
}

/// Decode frame bytes into a request. Used by peers answering requests.
///
/// # Errors
///
/// Returns [`CodecError::Utf8`] or [`CodecError::Json`] for unreadable frames.
pub fn decode_request(bytes: &[u8]) -> Result<Request, CodecError> {
    let text = std::str::from_utf8(bytes)?;
    serde_json::from_str(text).map_err(CodecError::Json)
}

/// Encode a reply envelope for `id` into frame bytes.
///
/// [`Reply::Malformed`] encodes as a bare `{"id": ..}` envelope.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode_reply(id: ExchangeId, reply: &Reply) -> Result<Vec<u8>, CodecError> {
    let mut fields = Map::new();
    fields.insert(FIELD_ID.to_owned(), Value::from(id));
    match reply {
        Reply::Result { value, end } => {
            fields.insert(FIELD_RESULT.to_owned(), value.clone());
            if *end {
                fields.insert(FIELD_END.to_owned(), Value::Bool(true));
            }
        }
        Reply::Error { code, message } => {
            let mut error = Map::new();
            error.insert(FIELD_CODE.to_owned(), Value::from(*code));
            error.insert(FIELD_MESSAGE.to_owned(), Value::String(message.clone()));
            fields.insert(FIELD_ERROR.to_owned(), Value::Object(error));
        }
        Reply::Malformed => {}
    }
    serde_json::to_vec(&Value::Object(fields)).map_err(CodecError::Encode)
}

/// Decode frame bytes into an inbound reply.
///
/// An `error` field wins over `result` when both are present. A reply whose
/// `error` object lacks an integer `code` or string `message` is
/// [`Reply::Malformed`].
///
/// # Errors
///
/// Returns [`CodecError::Utf8`] / [`CodecError::Json`] for unreadable frames
/// and [`CodecError::MissingId`] when there is no integer `id` to route on.
pub fn decode_inbound(bytes: &[u8]) -> Result<Inbound, CodecError> {
    let text = std::str::from_utf8(bytes)?;
    let value: Value = serde_json::from_str(text).map_err(CodecError::Json)?;
    let Value::Object(mut fields) = value else {
        return Err(CodecError::MissingId);
    };
    let id = fields
        .get(FIELD_ID)
        .and_then(integer_id)
        .ok_or(CodecError::MissingId)?;
    Ok(Inbound {
        id,
        reply: classify(&mut fields),
    })
}

fn classify(fields: &mut Map<String, Value>) -> Reply {
    if let Some(error) = fields.remove(FIELD_ERROR) {
        return parse_error(&error).unwrap_or(Reply::Malformed);
    }
    if let Some(value) = fields.remove(FIELD_RESULT) {
        let end = fields
            .get(FIELD_END)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        return Reply::Result { value, end };
    }
    Reply::Malformed
}

fn parse_error(error: &Value) -> Option<Reply> {
    let code = error.get(FIELD_CODE).and_then(integer_code)?;
    let message = error.get(FIELD_MESSAGE).and_then(Value::as_str)?;
    Some(Reply::Error {
        code,
        message: message.to_owned(),
    })
}

/// JSON peers may send integral floats (`3.0`) for integers.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn integer_id(value: &Value) -> Option<ExchangeId> {
    if let Some(id) = value.as_u64() {
        return Some(id);
    }
    let float = value.as_f64()?;
    (float >= 0.0 && float.fract() == 0.0 && float <= MAX_SAFE_ID as f64).then_some(float as u64)
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn integer_code(value: &Value) -> Option<i64> {
    if let Some(code) = value.as_i64() {
        return Some(code);
    }
    let float = value.as_f64()?;
    (float.fract() == 0.0 && float.abs() <= MAX_SAFE_ID as f64).then_some(float as i64)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
