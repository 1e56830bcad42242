//! Identifiers, protocol version marker and wire errors.

use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value as JsonValue;

/// Protocol version marker carried in the `v` field of every message.
///
/// Always serializes as `"2.0"` and refuses to decode anything else.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version;

impl Version {
	/// The literal carried on the wire.
	pub const WIRE: &'static str = "2.0";
}

impl Serialize for Version {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(Self::WIRE)
	}
}

impl<'de> Deserialize<'de> for Version {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let raw = String::deserialize(deserializer)?;
		if raw == Self::WIRE {
			Ok(Self)
		} else {
			Err(de::Error::invalid_value(de::Unexpected::Str(&raw), &Self::WIRE))
		}
	}
}

/// Caller-chosen identifier correlating a request with its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
	/// Numeric id.
	Number(i64),
	/// String id.
	String(String),
}

impl RequestId {
	/// Generates a random, globally unique string id.
	#[must_use]
	pub fn fresh() -> Self {
		Self::String(uuid::Uuid::new_v4().to_string())
	}
}

impl fmt::Display for RequestId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Number(n) => write!(f, "{n}"),
			Self::String(s) => f.write_str(s),
		}
	}
}

impl From<i64> for RequestId {
	fn from(n: i64) -> Self {
		Self::Number(n)
	}
}

impl From<String> for RequestId {
	fn from(s: String) -> Self {
		Self::String(s)
	}
}

impl From<&str> for RequestId {
	fn from(s: &str) -> Self {
		Self::String(s.to_owned())
	}
}

/// Numeric wire error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
	/// The message could not be decoded.
	pub const PARSE_ERROR: Self = Self(-32700);
	/// The message is not a valid request object.
	pub const INVALID_REQUEST: Self = Self(-32600);
	/// No action is registered under the requested method.
	pub const METHOD_NOT_FOUND: Self = Self(-32601);
	/// Input or response data failed validation.
	pub const INVALID_PARAMS: Self = Self(-32602);
	/// A handler failed, or a request timed out.
	pub const INTERNAL_ERROR: Self = Self(-32603);
	/// The request was cancelled before a reply arrived.
	pub const REQUEST_CANCELLED: Self = Self(-32800);
}

impl fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<i32> for ErrorCode {
	fn from(code: i32) -> Self {
		Self(code)
	}
}

/// Wire error carried by an error response or synthesized locally on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct ResponseError {
	/// Error code.
	pub code: ErrorCode,
	/// Human-readable description.
	pub message: String,
	/// Optional structured detail.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<JsonValue>,
}

impl ResponseError {
	/// Creates an error without attached data.
	#[must_use]
	pub fn new(code: ErrorCode, message: impl fmt::Display) -> Self {
		Self {
			code,
			message: message.to_string(),
			data: None,
		}
	}

	/// Attaches structured detail to the error. `null` means no detail.
	#[must_use]
	pub fn with_data(mut self, data: JsonValue) -> Self {
		self.data = Some(data).filter(|d| !d.is_null());
		self
	}

	/// The error a tracker synthesizes when a request outlives its timeout.
	#[must_use]
	pub fn timed_out(id: &RequestId) -> Self {
		Self::new(ErrorCode::INTERNAL_ERROR, format_args!("Request timed out: {id}"))
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use serde_json::json;

	use super::*;

	#[test]
	fn null_data_is_no_data() {
		let err = ResponseError::new(ErrorCode::INTERNAL_ERROR, "x").with_data(JsonValue::Null);
		assert_eq!(err.data, None);

		let wire = serde_json::to_value(&err).unwrap();
		assert_eq!(wire, json!({ "code": -32603, "message": "x" }));
		assert_eq!(serde_json::from_value::<ResponseError>(wire).unwrap(), err);

		let err = err.with_data(json!([1]));
		assert_eq!(err.data, Some(json!([1])));
	}
}
