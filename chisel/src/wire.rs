//! Wire envelopes exchanged once per tick in each direction.
//!
//! A client sends an ordered `Vec<RequestEnvelope>`; the server answers with
//! an unordered `Vec<ResponseEnvelope>`, one entry per dispatched call.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{CallError, DispatchError, ErrorKind};
use crate::types::CallId;

/// A pending call stripped of its reply channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlation id, unique per batcher.
    pub id: CallId,
    /// Fully-qualified route name, e.g. `"eggs.ping"`.
    pub fqn: String,
    /// Opaque call payload.
    pub payload: Value,
}

/// Outcome of one dispatched call.
///
/// `ok == true` carries `data`; `ok == false` carries `err` and, when the
/// server knows it, the structured `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Id of the request this answers.
    pub id: CallId,
    /// Whether the call succeeded.
    pub ok: bool,
    /// Result value on success. A present `null` stays `Some(Value::Null)`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_value"
    )]
    pub data: Option<Value>,
    /// Stringified failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    /// Structured failure tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl ResponseEnvelope {
    /// Successful response.
    pub fn success(id: CallId, data: Value) -> Self {
        Self {
            id,
            ok: true,
            data: Some(data),
            err: None,
            kind: None,
        }
    }

    /// Failed response built from a dispatch error.
    pub fn failure(id: CallId, error: &DispatchError) -> Self {
        Self {
            id,
            ok: false,
            data: None,
            err: Some(error.to_string()),
            kind: Some(error.kind()),
        }
    }

    /// Convert to the outcome delivered to the caller.
    ///
    /// A successful envelope without `data` resolves to `Value::Null`; a
    /// failed envelope without `err` yields an empty message.
    pub fn into_result(self) -> Result<Value, CallError> {
        if self.ok {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(CallError::Remote {
                kind: self.kind,
                message: self.err.unwrap_or_default(),
            })
        }
    }
}

/// `Option<Value>` would read a present `null` as `None`.
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl From<(CallId, Result<Value, DispatchError>)> for ResponseEnvelope {
    fn from((id, outcome): (CallId, Result<Value, DispatchError>)) -> Self {
        match outcome {
            Ok(data) => ResponseEnvelope::success(id, data),
            Err(error) => ResponseEnvelope::failure(id, &error),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_success_envelope_omits_error_fields() {
        let env = ResponseEnvelope::success(1, json!(42));
        let json = serde_json::to_value(&env).expect("serialize");
        assert_eq!(json, json!({ "id": 1, "ok": true, "data": 42 }));
    }

    #[test]
    fn test_failure_envelope_carries_string_and_kind() {
        let env = ResponseEnvelope::failure(2, &DispatchError::BadRequest("eggs.ping".into()));
        let json = serde_json::to_value(&env).expect("serialize");
        assert_eq!(
            json,
            json!({ "id": 2, "ok": false, "err": "bad_request:eggs.ping", "kind": "bad_request" })
        );
    }

    #[test]
    fn test_decode_minimal_failure_without_kind() {
        let env: ResponseEnvelope =
            serde_json::from_value(json!({ "id": 9, "ok": false, "err": "legacy" }))
                .expect("deserialize");
        assert_eq!(
            env.into_result(),
            Err(CallError::Remote {
                kind: None,
                message: "legacy".to_string()
            })
        );
    }

    #[test]
    fn test_null_data_keeps_its_shape() {
        let env = ResponseEnvelope::success(4, Value::Null);
        let text = serde_json::to_string(&env).expect("serialize");
        assert_eq!(text, r#"{"id":4,"ok":true,"data":null}"#);

        let decoded: ResponseEnvelope = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(decoded.data, Some(Value::Null));
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_success_without_data_is_null() {
        let env: ResponseEnvelope =
            serde_json::from_value(json!({ "id": 1, "ok": true })).expect("deserialize");
        assert_eq!(env.into_result(), Ok(Value::Null));
    }

    #[test]
    fn test_from_outcome() {
        let ok: ResponseEnvelope = (5, Ok(json!("hi"))).into();
        assert!(ok.ok);
        let err: ResponseEnvelope = (6, Err(DispatchError::DuplicateNextInvocation)).into();
        assert_eq!(err.err.as_deref(), Some("mw_next_called_twice"));
        assert_eq!(err.kind, Some(ErrorKind::DuplicateNextInvocation));
    }
}
