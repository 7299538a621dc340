//! Encoding of outbound calls and classification of inbound frames
//!
//! Inbound frames are parsed into a `serde_json::Value` first and then
//! matched by shape, in this order:
//!
//! 1. `method` present → notification (needs numeric `params.subscription`
//!    and a `params.result`)
//! 2. `error` present → failure (with or without an `id`)
//! 3. `id` and `result` present → confirmation when both are unsigned
//!    integers, otherwise a plain response
//!
//! Anything else is rejected as [`Error::InvalidFrame`].

use crate::error::{Error, JsonRpcErrorData, Result};
use crate::types::{Id, InboundFrame, JsonRpcRequest, Payload};
use serde::Serialize;
use serde_json::Value;

/// Encode any serializable value to a JSON string
pub fn encode<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Serialization(e.to_string()))
}

/// Encode a JSON-RPC request
pub fn encode_request(request: &JsonRpcRequest) -> Result<String> {
    encode(request)
}

/// Turn a transport payload into text
///
/// Binary frames must contain UTF-8.
pub fn decode_payload(payload: &Payload) -> Result<String> {
    match payload {
        Payload::Text(text) => Ok(text.clone()),
        Payload::Binary(bytes) => String::from_utf8(bytes.clone())
            .map_err(|e| Error::InvalidFrame(format!("binary payload is not UTF-8: {}", e))),
    }
}

/// Decode and classify a transport payload in one step
pub fn decode(payload: &Payload) -> Result<InboundFrame> {
    classify(&decode_payload(payload)?)
}

/// Classify a JSON text frame
pub fn classify(text: &str) -> Result<InboundFrame> {
    let value: Value =
        serde_json::from_str(text).map_err(|_| Error::JsonRpc(JsonRpcErrorData::parse_error()))?;

    let object = value
        .as_object()
        .ok_or_else(|| Error::InvalidFrame("expected a JSON object".to_string()))?;

    if let Some(method) = object.get("method").and_then(Value::as_str) {
        let params = object.get("params");
        let subscription = params
            .and_then(|p| p.get("subscription"))
            .and_then(Value::as_u64);
        let result = params.and_then(|p| p.get("result"));

        return match (subscription, result) {
            (Some(subscription), Some(result)) => Ok(InboundFrame::Notification {
                method: method.to_string(),
                subscription,
                result: result.clone(),
            }),
            _ => Err(Error::InvalidFrame(format!(
                "notification '{}' lacks a numeric subscription or a result",
                method
            ))),
        };
    }

    if let Some(error) = object.get("error") {
        let error: JsonRpcErrorData = serde_json::from_value(error.clone())
            .map_err(|e| Error::InvalidFrame(format!("malformed error object: {}", e)))?;
        let id = match object.get("id") {
            None | Some(Value::Null) => None,
            Some(id) => Some(parse_id(id)?),
        };
        return Ok(InboundFrame::Failure { id, error });
    }

    if let (Some(id), Some(result)) = (object.get("id"), object.get("result")) {
        let id = parse_id(id)?;
        return Ok(match (id.as_u64(), result.as_u64()) {
            (Some(request_id), Some(rpc_subscription_id)) => InboundFrame::Confirmation {
                request_id,
                rpc_subscription_id,
            },
            _ => InboundFrame::Response {
                id,
                result: result.clone(),
            },
        });
    }

    Err(Error::InvalidFrame("frame matches no known shape".to_string()))
}

fn parse_id(value: &Value) -> Result<Id> {
    serde_json::from_value(value.clone())
        .map_err(|e| Error::InvalidFrame(format!("unsupported id {}: {}", value, e)))
}
