//! Wire protocol for the nextmeet daemon socket.
//!
//! One compact JSON object per newline-terminated UTF-8 line. Three envelope
//! shapes travel over a connection:
//!
//! ```json
//! // Client -> Server
//! {"id": "1", "method": "get_next", "params": {"within_mins": 60}}
//!
//! // Server -> Client (exactly one of result/error)
//! {"id": "1", "result": {...}}
//! {"id": "1", "error": {"code": 404, "message": "unknown method: bogus"}}
//!
//! // Server -> Subscriber, unsolicited (no "id" field)
//! {"event": "next_changed", "data": {...}}
//! ```
//!
//! An empty line or end-of-stream means the connection is done. A line that
//! is not a JSON object is a decode error, and the stream is not
//! resynchronizable past one: the caller must close the connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NextmeetError, NextmeetResult};

fn empty_params() -> Value {
    Value::Object(serde_json::Map::new())
}

/// A client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default = "empty_params")]
    pub params: Value,
}

/// The error half of a response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i64,
    pub message: String,
}

/// A server response carrying exactly one of result or error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Ok { id: String, result: Value },
    Error { id: String, error: ErrorBody },
}

impl Response {
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Response::Ok {
            id: id.into(),
            result,
        }
    }

    pub fn error(id: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Response::Error {
            id: id.into(),
            error: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Response::Ok { id, .. } | Response::Error { id, .. } => id,
        }
    }
}

/// An unsolicited event pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Event {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Event {
            event: event.into(),
            data,
        }
    }
}

/// Anything a client can receive on its connection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ServerLine {
    Event(Event),
    Response(Response),
}

/// Encode a message as one compact JSON line, newline-terminated.
///
/// Compact serialization guarantees no embedded newlines.
pub fn to_json_line<T: Serialize>(msg: &T) -> NextmeetResult<String> {
    let mut line =
        serde_json::to_string(msg).map_err(|e| NextmeetError::Encode(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

fn decode_object(line: &str) -> NextmeetResult<Value> {
    let value: Value = serde_json::from_str(line.trim_end())
        .map_err(|e| NextmeetError::Decode(e.to_string()))?;
    if !value.is_object() {
        return Err(NextmeetError::Decode(format!(
            "expected a JSON object, got: {value}"
        )));
    }
    Ok(value)
}

/// Decode a request line. Fails with [`NextmeetError::Decode`] on anything
/// that is not a JSON object with `id` and `method` strings.
pub fn decode_request(line: &str) -> NextmeetResult<Request> {
    let value = decode_object(line)?;
    serde_json::from_value(value).map_err(|e| NextmeetError::Decode(e.to_string()))
}

/// Decode a server-to-client line into either a response or an event.
pub fn decode_server_line(line: &str) -> NextmeetResult<ServerLine> {
    let value = decode_object(line)?;
    serde_json::from_value(value).map_err(|e| NextmeetError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_roundtrip_is_identity() {
        let req = Request {
            id: "42".to_string(),
            method: "list".to_string(),
            params: json!({"limit": 3, "today_only": true}),
        };
        let line = to_json_line(&req).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(decode_request(&line).unwrap(), req);
    }

    #[test]
    fn test_request_params_default_to_empty_object() {
        let req = decode_request(r#"{"id":"1","method":"ping"}"#).unwrap();
        assert_eq!(req.params, json!({}));
    }

    #[test]
    fn test_response_roundtrip_is_identity() {
        let ok = Response::ok("1", json!({"version": "0.3.0"}));
        let line = to_json_line(&ok).unwrap();
        match decode_server_line(&line).unwrap() {
            ServerLine::Response(resp) => assert_eq!(resp, ok),
            other => panic!("expected response, got {other:?}"),
        }

        let err = Response::error("2", 404, "unknown method: bogus");
        let line = to_json_line(&err).unwrap();
        match decode_server_line(&line).unwrap() {
            ServerLine::Response(resp) => assert_eq!(resp, err),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_null_result_survives_roundtrip() {
        let resp = Response::ok("1", Value::Null);
        let line = to_json_line(&resp).unwrap();
        assert_eq!(line.trim_end(), r#"{"id":"1","result":null}"#);
        match decode_server_line(&line).unwrap() {
            ServerLine::Response(got) => assert_eq!(got, resp),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_event_is_distinguished_by_shape() {
        let evt = Event::new("next_changed", json!({"title": "Standup"}));
        let line = to_json_line(&evt).unwrap();
        match decode_server_line(&line).unwrap() {
            ServerLine::Event(got) => assert_eq!(got, evt),
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_json_is_a_decode_error() {
        assert!(matches!(
            decode_request("{not json"),
            Err(NextmeetError::Decode(_))
        ));
    }

    #[test]
    fn test_non_object_json_is_a_decode_error() {
        assert!(matches!(
            decode_request(r#""just a string""#),
            Err(NextmeetError::Decode(_))
        ));
        assert!(matches!(
            decode_request("[1,2,3]"),
            Err(NextmeetError::Decode(_))
        ));
    }

    #[test]
    fn test_missing_method_is_a_decode_error() {
        assert!(matches!(
            decode_request(r#"{"id":"1"}"#),
            Err(NextmeetError::Decode(_))
        ));
    }
}
