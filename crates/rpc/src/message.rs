//! Wire message shapes shared by every transport.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::types::{RequestId, ResponseError, Version};

/// A call expecting a correlated [`Response`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
	/// Protocol version marker.
	pub v: Version,
	/// Correlation id.
	pub id: RequestId,
	/// Action method name.
	pub method: String,
	/// Call parameters.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub params: Option<JsonValue>,
}

impl Request {
	/// Creates a request.
	#[must_use]
	pub fn new(id: RequestId, method: impl Into<String>, params: Option<JsonValue>) -> Self {
		Self {
			v: Version,
			id,
			method: method.into(),
			params,
		}
	}
}

/// Reply to a [`Request`], carrying either `result` or `error`.
///
/// `result` distinguishes an absent member (`None`) from an explicit `null`
/// (`Some(JsonValue::Null)`); only the former leaves a tracked request pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
	/// Protocol version marker.
	pub v: Version,
	/// Id of the request being answered.
	pub id: RequestId,
	/// Success value.
	#[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
	pub result: Option<JsonValue>,
	/// Failure value.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ResponseError>,
}

impl Response {
	/// Creates a success response.
	#[must_use]
	pub fn ok(id: RequestId, result: JsonValue) -> Self {
		Self {
			v: Version,
			id,
			result: Some(result),
			error: None,
		}
	}

	/// Creates an error response.
	#[must_use]
	pub fn err(id: RequestId, error: ResponseError) -> Self {
		Self {
			v: Version,
			id,
			result: None,
			error: Some(error),
		}
	}
}

/// One-way message; carries no id and gets no reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
	/// Protocol version marker.
	pub v: Version,
	/// Action method name.
	pub method: String,
	/// Notification payload.
	#[serde(default)]
	pub params: JsonValue,
}

impl Notification {
	/// Creates a notification.
	#[must_use]
	pub fn new(method: impl Into<String>, params: JsonValue) -> Self {
		Self {
			v: Version,
			method: method.into(),
			params,
		}
	}
}

/// Any message exchanged between peers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
	/// An outbound or inbound call.
	Request(Request),
	/// A reply to an earlier call.
	Response(Response),
	/// A one-way message.
	Notification(Notification),
}

impl Message {
	/// Returns the correlation id, if this message carries one.
	#[must_use]
	pub fn id(&self) -> Option<&RequestId> {
		match self {
			Self::Request(req) => Some(&req.id),
			Self::Response(resp) => Some(&resp.id),
			Self::Notification(_) => None,
		}
	}

	/// Classifies and decodes a raw JSON value.
	///
	/// A `method` member with an `id` is a request, a `method` without one is a
	/// notification, and an `id` without a `method` is a response.
	///
	/// # Errors
	///
	/// Returns a decode error when the value matches none of the shapes.
	pub fn from_value(value: JsonValue) -> serde_json::Result<Self> {
		let (has_id, has_method) = match value.as_object() {
			Some(obj) => (obj.get("id").is_some_and(|id| !id.is_null()), obj.contains_key("method")),
			None => return Err(de::Error::custom("message must be a JSON object")),
		};
		match (has_id, has_method) {
			(true, true) => serde_json::from_value(value).map(Self::Request),
			(false, true) => serde_json::from_value(value).map(Self::Notification),
			(true, false) => serde_json::from_value(value).map(Self::Response),
			(false, false) => Err(de::Error::custom("message has neither `id` nor `method`")),
		}
	}
}

impl<'de> Deserialize<'de> for Message {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let value = JsonValue::deserialize(deserializer)?;
		Self::from_value(value).map_err(de::Error::custom)
	}
}

impl From<Request> for Message {
	fn from(req: Request) -> Self {
		Self::Request(req)
	}
}

impl From<Response> for Message {
	fn from(resp: Response) -> Self {
		Self::Response(resp)
	}
}

impl From<Notification> for Message {
	fn from(notif: Notification) -> Self {
		Self::Notification(notif)
	}
}

/// Maps any present member, `null` included, to `Some`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<JsonValue>, D::Error> {
	JsonValue::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use serde_json::json;

	use super::*;
	use crate::types::ErrorCode;

	#[test]
	fn request_wire_shape() {
		let req = Request::new(RequestId::Number(7), "dialog.open", Some(json!({ "path": "/tmp" })));
		assert_eq!(
			serde_json::to_value(&req).unwrap(),
			json!({ "v": "2.0", "id": 7, "method": "dialog.open", "params": { "path": "/tmp" } })
		);
	}

	#[test]
	fn null_result_is_present() {
		let resp: Response = serde_json::from_value(json!({ "v": "2.0", "id": "a", "result": null })).unwrap();
		assert_eq!(resp.result, Some(JsonValue::Null));

		let resp: Response = serde_json::from_value(json!({ "v": "2.0", "id": "a" })).unwrap();
		assert_eq!(resp.result, None);
		assert_eq!(resp.error, None);
	}

	#[test]
	fn error_response_wire_shape() {
		let resp = Response::err(
			RequestId::from("r1"),
			ResponseError::new(ErrorCode::INVALID_PARAMS, "bad").with_data(json!([1])),
		);
		assert_eq!(
			serde_json::to_value(&resp).unwrap(),
			json!({ "v": "2.0", "id": "r1", "error": { "code": -32602, "message": "bad", "data": [1] } })
		);
	}

	#[test]
	fn classify_messages() {
		let msg = Message::from_value(json!({ "v": "2.0", "id": 1, "method": "m" })).unwrap();
		assert!(matches!(msg, Message::Request(_)));

		let msg = Message::from_value(json!({ "v": "2.0", "method": "m", "params": [] })).unwrap();
		assert!(matches!(msg, Message::Notification(_)));
		assert_eq!(msg.id(), None);

		let msg = Message::from_value(json!({ "v": "2.0", "id": 1, "result": 3 })).unwrap();
		assert!(matches!(msg, Message::Response(_)));

		assert!(Message::from_value(json!({ "v": "2.0" })).is_err());
		assert!(Message::from_value(json!(null)).is_err());
	}

	#[test]
	fn wrong_version_rejected() {
		let err = serde_json::from_value::<Request>(json!({ "v": "1.0", "id": 1, "method": "m" }));
		assert!(err.is_err());
	}
}
