use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::client::ClientEvent;
use crate::error::ProtocolError;
use crate::ids::CorrelationId;
use crate::server::ServerEvent;

const CORRELATION_KEY: &str = "correlationId";

/// A client event plus the optional correlation id the client uses to
/// reconcile optimistic state.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientFrame {
    pub correlation_id: Option<CorrelationId>,
    pub event: ClientEvent,
}

/// A server event. Broadcasts caused by a client action echo that action's
/// correlation id so the originator can match its pending operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerFrame {
    pub correlation_id: Option<CorrelationId>,
    pub event: ServerEvent,
}

impl ClientFrame {
    pub fn new(event: ClientEvent) -> Self {
        Self {
            correlation_id: None,
            event,
        }
    }

    pub fn correlated(event: ClientEvent, correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            event,
        }
    }

    /// Parses and validates a text frame. Anything outside the closed event
    /// set, or failing field validation, is rejected here.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let (correlation_id, event) = decode::<ClientEvent>(text)?;
        event.validate()?;
        Ok(Self {
            correlation_id,
            event,
        })
    }

    pub fn to_text(&self) -> Result<String, ProtocolError> {
        encode(&self.event, self.correlation_id)
    }
}

impl ServerFrame {
    pub fn new(event: ServerEvent) -> Self {
        Self {
            correlation_id: None,
            event,
        }
    }

    pub fn with_correlation(event: ServerEvent, correlation_id: Option<CorrelationId>) -> Self {
        Self {
            correlation_id,
            event,
        }
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let (correlation_id, event) = decode::<ServerEvent>(text)?;
        Ok(Self {
            correlation_id,
            event,
        })
    }

    pub fn to_text(&self) -> Result<String, ProtocolError> {
        encode(&self.event, self.correlation_id)
    }
}

fn encode<T: Serialize>(event: &T, correlation_id: Option<CorrelationId>) -> Result<String, ProtocolError> {
    let mut value =
        serde_json::to_value(event).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    if let (Some(id), Value::Object(map)) = (correlation_id, &mut value) {
        map.insert(CORRELATION_KEY.to_string(), Value::String(id.to_string()));
    }
    serde_json::to_string(&value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

fn decode<T: DeserializeOwned>(text: &str) -> Result<(Option<CorrelationId>, T), ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let Value::Object(mut map) = value else {
        return Err(ProtocolError::Malformed("frame is not a JSON object".to_string()));
    };

    let correlation_id = match map.remove(CORRELATION_KEY) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(
            Uuid::parse_str(&s)
                .map_err(|_| ProtocolError::Malformed(format!("invalid correlationId {s:?}")))?,
        ),
        Some(other) => {
            return Err(ProtocolError::Malformed(format!(
                "invalid correlationId {other}"
            )));
        }
    };

    let event_type = match map.get("type") {
        Some(Value::String(t)) => t.clone(),
        _ => return Err(ProtocolError::Malformed("missing event type".to_string())),
    };

    let event = match from_map::<T>(map.clone()) {
        Ok(event) => event,
        // Unit events sent with an empty payload object.
        Err(_) if is_empty_payload(&map) => {
            map.remove("data");
            from_map::<T>(map).map_err(|e| classify(&event_type, e))?
        }
        Err(e) => return Err(classify(&event_type, e)),
    };
    Ok((correlation_id, event))
}

fn from_map<T: DeserializeOwned>(map: Map<String, Value>) -> Result<T, serde_json::Error> {
    serde_json::from_value(Value::Object(map))
}

fn is_empty_payload(map: &Map<String, Value>) -> bool {
    matches!(map.get("data"), Some(Value::Object(data)) if data.is_empty())
}

fn classify(event_type: &str, err: serde_json::Error) -> ProtocolError {
    let reason = err.to_string();
    if reason.starts_with("unknown variant") {
        ProtocolError::UnknownEvent(event_type.to_string())
    } else {
        ProtocolError::InvalidPayload {
            event: event_type.to_string(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{JoinRoom, SubmitVote};
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn parses_join_room_with_camel_case_fields() {
        let frame = ClientFrame::parse(
            r#"{"type":"join_room","data":{"roomId":"abc123","userId":"u1","displayName":"Ada"}}"#,
        )
        .unwrap();
        assert_eq!(frame.correlation_id, None);
        match frame.event {
            ClientEvent::JoinRoom(JoinRoom { room_id, user_id, .. }) => {
                assert_eq!(room_id, "abc123");
                assert_eq!(user_id, "u1");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn keeps_correlation_id() {
        let id = Uuid::new_v4();
        let story = Uuid::new_v4();
        let text = format!(
            r#"{{"type":"submit_vote","data":{{"storyId":"{story}","value":"5"}},"correlationId":"{id}"}}"#
        );
        let frame = ClientFrame::parse(&text).unwrap();
        assert_eq!(frame.correlation_id, Some(id));
        assert_eq!(
            frame.event,
            ClientEvent::SubmitVote(SubmitVote {
                story_id: story,
                value: "5".to_string()
            })
        );
    }

    #[test]
    fn unit_events_accept_missing_or_empty_data() {
        assert_eq!(
            ClientFrame::parse(r#"{"type":"leave_room"}"#).unwrap().event,
            ClientEvent::LeaveRoom
        );
        assert_eq!(
            ClientFrame::parse(r#"{"type":"request_snapshot","data":{}}"#)
                .unwrap()
                .event,
            ClientEvent::RequestSnapshot
        );
    }

    #[test]
    fn rejects_unknown_type() {
        let err = ClientFrame::parse(r#"{"type":"drop_tables","data":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownEvent(t) if t == "drop_tables"));
    }

    #[test]
    fn rejects_missing_fields_and_failed_validation() {
        let err = ClientFrame::parse(r#"{"type":"create_story","data":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { .. }));

        let err = ClientFrame::parse(r#"{"type":"create_story","data":{"title":""}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { .. }));

        let err = ClientFrame::parse("[1,2,3]").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn timer_durations_share_the_seconds_range() {
        let story = Uuid::new_v4();
        for (event, field) in [("start_voting_session", "timerDuration"), ("start_timer", "duration")] {
            for (secs, ok) in [(0, false), (1, true), (3600, true), (3601, false)] {
                let text = json!({ "type": event, "data": { "storyId": story, field: secs } })
                    .to_string();
                assert_eq!(ClientFrame::parse(&text).is_ok(), ok, "{event} {secs}");
            }
        }
    }

    #[test]
    fn server_frames_carry_correlation_next_to_type() {
        let id = Uuid::new_v4();
        let frame = ServerFrame::with_correlation(
            ServerEvent::Error {
                kind: ErrorKind::Authorization,
                message: "nope".to_string(),
            },
            Some(id),
        );
        let text = frame.to_text().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["data"]["kind"], "authorization");
        assert_eq!(value["correlationId"], id.to_string());

        let back = ServerFrame::parse(&text).unwrap();
        assert_eq!(back, frame);
    }
}
