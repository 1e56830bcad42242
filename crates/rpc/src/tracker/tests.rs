use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::message::Response;

fn id(n: i64) -> RequestId {
	RequestId::Number(n)
}

#[tokio::test]
async fn resolve_settles_waiter() {
	let tracker = RequestTracker::new();
	let pending = tracker.track_request(1);
	assert!(tracker.is_pending(&id(1)));

	tracker.resolve_request(&id(1), json!({ "ok": true }));
	assert!(!tracker.is_pending(&id(1)));
	assert_eq!(pending.await, Ok(json!({ "ok": true })));
}

#[tokio::test]
async fn resolve_is_at_most_once() {
	let tracker = RequestTracker::new();
	let pending = tracker.track_request(1);

	tracker.resolve_request(&id(1), json!("first"));
	tracker.resolve_request(&id(1), json!("second"));
	tracker.reject_request(&id(1), ResponseError::new(ErrorCode::INTERNAL_ERROR, "late"));

	assert_eq!(pending.await, Ok(json!("first")));
	assert!(tracker.is_empty());
}

#[tokio::test]
async fn unknown_id_is_ignored() {
	let tracker = RequestTracker::new();
	tracker.resolve_request(&id(9), json!(1));
	tracker.reject_request(&id(9), ResponseError::new(ErrorCode::INTERNAL_ERROR, "x"));
	assert!(tracker.is_empty());
}

#[tokio::test]
async fn reject_carries_wire_error() {
	let tracker = RequestTracker::new();
	let pending = tracker.track_request("abc");
	let error = ResponseError::new(ErrorCode::INVALID_PARAMS, "nope");

	tracker.reject_request(&RequestId::from("abc"), error.clone());
	assert_eq!(pending.await, Err(TrackerError::Rejected(error)));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn times_out_with_internal_error() {
	let tracker = RequestTracker::with_timeout_ms(500);
	let pending = tracker.track_request("slow");
	tokio::task::yield_now().await;

	tokio::time::advance(Duration::from_millis(499)).await;
	tokio::task::yield_now().await;
	assert!(tracker.is_pending(&RequestId::from("slow")));

	tokio::time::advance(Duration::from_millis(1)).await;
	tokio::task::yield_now().await;
	assert!(!tracker.is_pending(&RequestId::from("slow")));

	let err = pending.await.unwrap_err().into_response_error();
	assert_eq!(err.code, ErrorCode::INTERNAL_ERROR);
	assert_eq!(err.message, "Request timed out: slow");
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn non_positive_timeout_expires_immediately() {
	let tracker = RequestTracker::with_timeout_ms(0);
	let pending = tracker.track_request(3);
	let err = pending.await.unwrap_err();
	assert_eq!(err, TrackerError::Rejected(ResponseError::timed_out(&id(3))));
	assert!(tracker.is_empty());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn retrack_abandons_previous_waiter() {
	let tracker = RequestTracker::with_timeout_ms(1_000);
	let first = tracker.track_request(1);
	let second = tracker.track_request(1);
	assert_eq!(tracker.len(), 1);

	assert_eq!(first.await, Err(TrackerError::Abandoned(id(1))));

	// The replaced entry's timer must not expire the new one early.
	tokio::time::advance(Duration::from_millis(999)).await;
	tokio::task::yield_now().await;
	assert!(tracker.is_pending(&id(1)));

	tracker.resolve_request(&id(1), json!(2));
	assert_eq!(second.await, Ok(json!(2)));
}

#[tokio::test]
async fn cancel_request_does_not_settle() {
	let tracker = RequestTracker::new();
	let pending = tracker.track_request(5);

	assert!(tracker.cancel_request(&id(5)));
	assert!(!tracker.cancel_request(&id(5)));
	assert!(tracker.is_empty());
	assert_eq!(pending.await, Err(TrackerError::Abandoned(id(5))));
}

#[tokio::test]
async fn cancel_all_rejects_everything() {
	let tracker = RequestTracker::new();
	let a = tracker.track_request(1);
	let b = tracker.track_request(2);

	tracker.cancel_all_requests(None);
	assert!(tracker.is_empty());
	let expected = TrackerError::Cancelled {
		reason: DEFAULT_CANCEL_REASON.to_owned(),
	};
	assert_eq!(a.await, Err(expected.clone()));
	assert_eq!(b.await, Err(expected));

	let c = tracker.track_request(3);
	tracker.cancel_all_requests(Some("peer disconnected"));
	let err = c.await.unwrap_err();
	assert_eq!(err.to_string(), "peer disconnected");
	assert_eq!(err.into_response_error().code, ErrorCode::REQUEST_CANCELLED);
}

#[tokio::test]
async fn handle_message_routes_by_member() {
	let tracker = RequestTracker::new();
	let ok = tracker.track_request(1);
	let null = tracker.track_request(2);
	let failed = tracker.track_request(3);
	let _untouched = tracker.track_request(4);
	let _null_error = tracker.track_request(5);
	let null_error_with_result = tracker.track_request(6);

	tracker.handle_message(&JsonValue::Null);
	tracker.handle_message(&json!({ "v": "2.0", "method": "note", "params": {} }));
	tracker.handle_message(&json!({ "v": "2.0", "id": 1, "result": 10 }));
	tracker.handle_message(&json!({ "v": "2.0", "id": 2, "result": null }));
	tracker.handle_message(&json!({ "v": "2.0", "id": 3, "error": { "code": -32602, "message": "bad" } }));
	tracker.handle_message(&json!({ "v": "2.0", "id": 4 }));
	tracker.handle_message(&json!({ "v": "2.0", "id": 5, "error": null }));
	tracker.handle_message(&json!({ "v": "2.0", "id": 6, "error": null, "result": "late" }));

	assert_eq!(ok.await, Ok(json!(10)));
	assert_eq!(null.await, Ok(JsonValue::Null));
	assert_eq!(
		failed.await,
		Err(TrackerError::Rejected(ResponseError::new(ErrorCode::INVALID_PARAMS, "bad")))
	);
	assert_eq!(null_error_with_result.await, Ok(json!("late")));

	let mut pending = tracker.pending_ids();
	pending.sort();
	assert_eq!(pending, vec![id(4), id(5)]);
}

#[tokio::test]
async fn malformed_error_still_rejects() {
	let tracker = RequestTracker::new();
	let pending = tracker.track_request(1);
	tracker.handle_message(&json!({ "id": 1, "error": "boom" }));

	let err = pending.await.unwrap_err().into_response_error();
	assert_eq!(err.code, ErrorCode::INTERNAL_ERROR);
	assert_eq!(err.data, Some(json!("boom")));
}

#[tokio::test]
async fn handle_response_typed() {
	let tracker = RequestTracker::new();
	let pending = tracker.track_request("t");
	tracker.handle_response(Response {
		v: crate::types::Version,
		id: RequestId::from("t"),
		result: None,
		error: None,
	});
	assert!(tracker.is_pending(&RequestId::from("t")));

	tracker.handle_response(Response::ok(RequestId::from("t"), json!([1, 2])));
	assert_eq!(pending.await, Ok(json!([1, 2])));
}
