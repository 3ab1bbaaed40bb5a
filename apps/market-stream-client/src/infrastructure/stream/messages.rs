//! Control Frame Types
//!
//! Wire format types for the control half of the feed protocol. Data frames
//! are decoded into [`crate::domain::event`] types by the codec.
//!
//! # Outbound
//!
//! ```json
//! {"method":"SUBSCRIBE","params":["ethusdc@trade","btcusdc@kline_1m"],"id":7}
//! {"method":"LIST_SUBSCRIPTIONS","id":8}
//! ```
//!
//! # Inbound
//!
//! ```json
//! {"result":null,"id":7}
//! {"result":["ethusdc@trade"],"id":8}
//! {"error":{"code":2,"msg":"Invalid request"},"id":9}
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Request ids are unique and increasing across every connection in the
/// process.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next control request id.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// =============================================================================
// Outbound
// =============================================================================

/// Control request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Method {
    /// Add streams.
    Subscribe,
    /// Remove streams.
    Unsubscribe,
    /// Ask the server which streams it is sending.
    ListSubscriptions,
}

impl Method {
    /// Wire name of the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::ListSubscriptions => "LIST_SUBSCRIPTIONS",
        }
    }
}

/// Outbound control frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    /// Request method.
    pub method: Method,

    /// Stream keys in canonical `symbol@streamType` form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<String>>,

    /// Request id.
    pub id: u64,
}

impl ControlRequest {
    /// Create a SUBSCRIBE request with a fresh id.
    #[must_use]
    pub fn subscribe(params: Vec<String>) -> Self {
        Self::with_params(Method::Subscribe, params)
    }

    /// Create an UNSUBSCRIBE request with a fresh id.
    #[must_use]
    pub fn unsubscribe(params: Vec<String>) -> Self {
        Self::with_params(Method::Unsubscribe, params)
    }

    /// Create a LIST_SUBSCRIPTIONS request with a fresh id.
    #[must_use]
    pub fn list_subscriptions() -> Self {
        Self {
            method: Method::ListSubscriptions,
            params: None,
            id: next_request_id(),
        }
    }

    fn with_params(method: Method, params: Vec<String>) -> Self {
        Self {
            method,
            params: Some(params),
            id: next_request_id(),
        }
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Error body of a rejected control request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlError {
    /// Server error code.
    #[serde(default)]
    pub code: i64,
    /// Human-readable message.
    #[serde(default)]
    pub msg: String,
}

/// Reply to a control request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    /// Request id being answered.
    pub id: u64,

    /// Result payload (`null` for SUBSCRIBE/UNSUBSCRIBE, a list of stream
    /// keys for LIST_SUBSCRIPTIONS).
    #[serde(default)]
    pub result: Option<serde_json::Value>,

    /// Present when the server rejected the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ControlError>,
}

impl ControlResponse {
    /// Whether the server rejected the request.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Stream keys listed in a LIST_SUBSCRIPTIONS result.
    #[must_use]
    pub fn listed_streams(&self) -> Vec<String> {
        self.result
            .as_ref()
            .and_then(serde_json::Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }
}
