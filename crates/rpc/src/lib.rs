//! Wire messages and outbound request correlation for tandem peers.
//!
//! This crate provides the transport-agnostic pieces both peers share:
//! * [`Request`], [`Response`], [`Notification`]: the wire message shapes, wrapped by [`Message`]
//! * [`ResponseError`] and [`ErrorCode`]: wire errors and the standard codes
//! * [`RequestTracker`]: correlates outbound request ids with replies under a bounded wait
//! * [`TrackerConfig`]: tracker settings, loadable from TOML
//!
//! Nothing here moves bytes. Transports hand decoded messages to
//! [`RequestTracker::handle_message`] and send what callers give them.

#![warn(missing_docs)]

pub mod config;
pub mod message;
pub mod tracker;
pub mod types;

pub use config::{ConfigError, TrackerConfig};
pub use message::{Message, Notification, Request, Response};
pub use serde_json::Value as JsonValue;
pub use tracker::{PendingRequest, RequestStatus, RequestTracker, TrackerError};
pub use types::{ErrorCode, RequestId, ResponseError, Version};
