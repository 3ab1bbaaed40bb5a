//! Feed Codec
//!
//! Decodes inbound text frames and encodes outbound control frames.
//!
//! Two inbound data shapes are accepted:
//!
//! - a raw event object carrying its discriminant in `e`;
//! - an envelope `{"stream":"<symbol>@<streamType>","data":<event>}`, whose
//!   stream key decides routing.
//!
//! Control replies (`{"result":..,"id":..}` or `{"error":..,"id":..}`) are
//! recognised separately. Every discriminant is resolved through
//! [`StreamKind::from_discriminant`]; anything missing from that table is a
//! decode error.

use serde_json::Value;

use crate::domain::event::{Event, StreamEvent};
use crate::domain::stream::{Scope, StreamKey, StreamKeyError, StreamKind};
use crate::infrastructure::stream::messages::{ControlRequest, ControlResponse};

/// Codec errors. Always recoverable: the frame is dropped.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is not a JSON object.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    /// Event object without an `e` field.
    #[error("missing event discriminant")]
    MissingDiscriminant,

    /// Discriminant not in the table.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// Envelope `stream` is not a valid stream key.
    #[error("invalid envelope stream: {0}")]
    InvalidStream(#[from] StreamKeyError),

    /// Envelope stream and event payload disagree.
    #[error("event type {event_type} does not belong to stream {stream}")]
    StreamMismatch {
        /// Envelope stream key.
        stream: String,
        /// Payload discriminant.
        event_type: String,
    },

    /// Event delivered on the wrong endpoint.
    #[error("{event_scope} event received on {feed_scope} feed")]
    ScopeMismatch {
        /// Scope of the feed that received the frame.
        feed_scope: Scope,
        /// Scope of the decoded event.
        event_scope: Scope,
    },
}

impl CodecError {
    /// Short error class (used as a metric label).
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::InvalidFormat(_) => "invalid_format",
            Self::MissingDiscriminant => "missing_discriminant",
            Self::UnknownEventType(_) => "unknown_event_type",
            Self::InvalidStream(_) => "invalid_stream",
            Self::StreamMismatch { .. } => "stream_mismatch",
            Self::ScopeMismatch { .. } => "scope_mismatch",
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Data event for the dispatcher.
    Event(StreamEvent),
    /// Reply to a control request.
    Control(ControlResponse),
}

/// JSON codec bound to one feed scope.
#[derive(Debug, Clone, Copy)]
pub struct JsonCodec {
    scope: Scope,
}

impl JsonCodec {
    /// Create a codec for a feed of the given scope.
    #[must_use]
    pub const fn new(scope: Scope) -> Self {
        Self { scope }
    }

    /// Scope events must belong to.
    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.scope
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid JSON, carries an unknown
    /// or missing discriminant, has an inconsistent envelope, or holds an
    /// event from the other scope.
    pub fn decode(&self, text: &str) -> Result<Inbound, CodecError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(object) = &value else {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}",
                preview(text)
            )));
        };

        if object.contains_key("id")
            && (object.contains_key("result") || object.contains_key("error"))
        {
            return Ok(Inbound::Control(serde_json::from_value(value)?));
        }

        let envelope = match (object.get("stream"), object.get("data")) {
            (Some(Value::String(stream)), Some(data)) => Some((stream.clone(), data.clone())),
            _ => None,
        };

        let event = match envelope {
            Some((stream, data)) => {
                let key: StreamKey = stream.parse()?;
                let event = decode_event(data)?;
                if key.stream_type().kind() != event.kind() {
                    return Err(CodecError::StreamMismatch {
                        stream,
                        event_type: event.event_type().to_owned(),
                    });
                }
                StreamEvent::enveloped(key, event)
            }
            None => StreamEvent::raw(decode_event(value)?),
        };

        if event.event.scope() != self.scope {
            return Err(CodecError::ScopeMismatch {
                feed_scope: self.scope,
                event_scope: event.event.scope(),
            });
        }

        Ok(Inbound::Event(event))
    }

    /// Encode a control request.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, request: &ControlRequest) -> Result<String, CodecError> {
        Ok(serde_json::to_string(request)?)
    }
}

/// Decode an event object by its `e` discriminant.
fn decode_event(value: Value) -> Result<Event, CodecError> {
    let discriminant = value
        .get("e")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingDiscriminant)?;
    let kind = StreamKind::from_discriminant(discriminant)
        .ok_or_else(|| CodecError::UnknownEventType(discriminant.to_owned()))?;

    let event = match kind {
        StreamKind::Trade => Event::Trade(serde_json::from_value(value)?),
        StreamKind::Depth => Event::Depth(serde_json::from_value(value)?),
        StreamKind::Kline => Event::Kline(serde_json::from_value(value)?),
        StreamKind::MiniTicker => Event::MiniTicker(serde_json::from_value(value)?),
        StreamKind::ExecutionReport => Event::ExecutionReport(serde_json::from_value(value)?),
        StreamKind::BalanceUpdate => Event::BalanceUpdate(serde_json::from_value(value)?),
    };
    Ok(event)
}

fn preview(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(50)
        .map_or(text.len(), |(index, _)| index);
    &text[..end]
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::domain::stream::StreamType;
    use crate::infrastructure::stream::messages::Method;

    const TRADE: &str =
        r#"{"e":"trade","E":1700000000000,"s":"ETHUSDC","t":42,"p":"2011.50","q":"0.25","m":true}"#;
    const MINI_TICKER: &str = r#"{"e":"24hrMiniTicker","E":1700000000000,"s":"ETHUSDC","c":"2011.5","o":"1990","h":"2030","l":"1985.25","v":"812.4","q":"1630000"}"#;
    const KLINE: &str = r#"{"e":"kline","E":1700000000000,"s":"BTCUSDC","k":{"t":1699999980000,"T":1700000039999,"i":"1m","o":"37000","h":"37010","l":"36990","c":"37005","v":"12.5","n":88,"x":false}}"#;
    const EXECUTION: &str = r#"{"e":"executionReport","E":1700000000000,"s":"ETHUSDC","c":"abc","S":"BUY","o":"LIMIT","x":"TRADE","X":"FILLED","i":9,"p":"2000","q":"1","l":"1","L":"2000","z":"1"}"#;
    const BALANCE: &str = r#"{"e":"balanceUpdate","E":1700000000000,"a":"USDC","d":"-25.5"}"#;

    fn market() -> JsonCodec {
        JsonCodec::new(Scope::Market)
    }

    fn user() -> JsonCodec {
        JsonCodec::new(Scope::User)
    }

    fn event(inbound: Inbound) -> StreamEvent {
        match inbound {
            Inbound::Event(event) => event,
            Inbound::Control(other) => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn decode_raw_trade() {
        let decoded = event(market().decode(TRADE).unwrap());

        assert_eq!(decoded.stream, None);
        assert_eq!(decoded.stream_type, StreamType::Trade);
        assert_eq!(decoded.symbol(), Some("ETHUSDC"));
    }

    #[test]
    fn decode_envelope_uses_stream_key() {
        let frame = format!(r#"{{"stream":"ethusdc@miniTicker","data":{MINI_TICKER}}}"#);
        let decoded = event(market().decode(&frame).unwrap());

        assert_eq!(decoded.stream, Some("ethusdc@miniTicker".parse().unwrap()));
        assert_eq!(decoded.stream_type, StreamType::MiniTicker);
        assert_eq!(decoded.event.event_type(), "24hrMiniTicker");
    }

    #[test]
    fn raw_kline_routes_by_interval() {
        let decoded = event(market().decode(KLINE).unwrap());
        assert_eq!(decoded.stream_type, StreamType::kline("1m").unwrap());
    }

    #[test_case(EXECUTION, StreamType::ExecutionReport ; "execution report")]
    #[test_case(BALANCE, StreamType::BalanceUpdate ; "balance update")]
    fn decode_user_events(frame: &str, expected: StreamType) {
        let decoded = event(user().decode(frame).unwrap());
        assert_eq!(decoded.stream_type, expected);
    }

    #[test]
    fn decode_control_responses() {
        let Inbound::Control(ack) = market().decode(r#"{"result":null,"id":1}"#).unwrap() else {
            panic!("expected control response");
        };
        assert_eq!(ack.id, 1);

        let Inbound::Control(rejected) = market()
            .decode(r#"{"error":{"code":2,"msg":"bad"},"id":2}"#)
            .unwrap()
        else {
            panic!("expected control response");
        };
        assert!(rejected.is_error());
    }

    #[test]
    fn missing_discriminant_is_rejected() {
        let err = market().decode(r#"{"E":1,"s":"ETHUSDC"}"#).unwrap_err();
        assert!(matches!(err, CodecError::MissingDiscriminant));
    }

    #[test_case(r#"{"e":"aggTrade","E":1}"# ; "unlisted discriminant")]
    #[test_case(r#"{"e":"outboundAccountPosition","E":1}"# ; "unlisted user discriminant")]
    fn unknown_discriminant_is_rejected(frame: &str) {
        let err = market().decode(frame).unwrap_err();
        assert!(matches!(err, CodecError::UnknownEventType(_)));
    }

    #[test_case("not json" ; "garbage")]
    #[test_case("[1,2,3]" ; "array")]
    #[test_case(r#"{"e":"trade","E":1}"# ; "missing fields")]
    fn malformed_frames_are_errors(frame: &str) {
        assert!(market().decode(frame).is_err());
    }

    #[test]
    fn envelope_kind_mismatch_is_rejected() {
        let frame = format!(r#"{{"stream":"ethusdc@trade","data":{MINI_TICKER}}}"#);
        let err = market().decode(&frame).unwrap_err();
        assert!(matches!(err, CodecError::StreamMismatch { .. }));
    }

    #[test]
    fn envelope_with_bad_stream_is_rejected() {
        let frame = format!(r#"{{"stream":"ethusdc","data":{TRADE}}}"#);
        let err = market().decode(&frame).unwrap_err();
        assert!(matches!(err, CodecError::InvalidStream(_)));
    }

    #[test]
    fn scope_mismatch_is_rejected() {
        let err = market().decode(BALANCE).unwrap_err();
        assert!(matches!(
            err,
            CodecError::ScopeMismatch {
                feed_scope: Scope::Market,
                event_scope: Scope::User,
            }
        ));
        assert!(user().decode(TRADE).is_err());
    }

    #[test]
    fn encode_request() {
        let request = ControlRequest {
            method: Method::Unsubscribe,
            params: Some(vec!["ethusdc@depth".into()]),
            id: 11,
        };
        assert_eq!(
            market().encode(&request).unwrap(),
            r#"{"method":"UNSUBSCRIBE","params":["ethusdc@depth"],"id":11}"#
        );
    }

    #[test]
    fn preview_respects_char_boundaries() {
        let text = "é".repeat(80);
        assert_eq!(preview(&text).chars().count(), 50);
        assert_eq!(preview("short"), "short");
    }
}
