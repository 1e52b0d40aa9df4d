//! Client and relay message frames

use serde::ser::{Serialize, SerializeSeq, Serializer};
use serde_json::Value;
use thiserror::Error;

use crate::types::{Event, Filter};

/// A frame that cannot be dispatched
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON array with a command")]
    NotACommand,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("malformed {command}: {reason}")]
    Malformed {
        command: &'static str,
        reason: String,
    },
}

impl ProtocolError {
    fn malformed(command: &'static str, reason: impl ToString) -> Self {
        ProtocolError::Malformed {
            command,
            reason: reason.to_string(),
        }
    }
}

/// Client → relay
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Event(Event),
    Req { sub_id: String, filters: Vec<Filter> },
    Close { sub_id: String },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let frame = value.as_array().ok_or(ProtocolError::NotACommand)?;
        let command = frame
            .first()
            .and_then(Value::as_str)
            .ok_or(ProtocolError::NotACommand)?;

        match command {
            "EVENT" => {
                let event = frame
                    .get(1)
                    .ok_or_else(|| ProtocolError::malformed("EVENT", "missing event"))?;
                let event = serde_json::from_value(event.clone())
                    .map_err(|e| ProtocolError::malformed("EVENT", e))?;
                Ok(ClientMessage::Event(event))
            }
            "REQ" => {
                let sub_id = sub_id(frame, "REQ")?;
                let filters = frame[2..]
                    .iter()
                    .map(|f| serde_json::from_value(f.clone()))
                    .collect::<Result<Vec<Filter>, _>>()
                    .map_err(|e| ProtocolError::malformed("REQ", e))?;
                Ok(ClientMessage::Req { sub_id, filters })
            }
            "CLOSE" => Ok(ClientMessage::Close {
                sub_id: sub_id(frame, "CLOSE")?,
            }),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn sub_id(frame: &[Value], command: &'static str) -> Result<String, ProtocolError> {
    frame
        .get(1)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::malformed(command, "missing subscription id"))
}

impl Serialize for ClientMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ClientMessage::Event(event) => ("EVENT", event).serialize(serializer),
            ClientMessage::Req { sub_id, filters } => {
                let mut seq = serializer.serialize_seq(Some(2 + filters.len()))?;
                seq.serialize_element("REQ")?;
                seq.serialize_element(sub_id)?;
                for filter in filters {
                    seq.serialize_element(filter)?;
                }
                seq.end()
            }
            ClientMessage::Close { sub_id } => ("CLOSE", sub_id).serialize(serializer),
        }
    }
}

/// Relay → client
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event { sub_id: String, event: Event },
    Ok { event_id: String, accepted: bool, message: String },
    Eose { sub_id: String },
    Notice { message: String },
}

impl RelayMessage {
    pub fn ok(event_id: &str, accepted: bool, message: impl Into<String>) -> Self {
        RelayMessage::Ok {
            event_id: event_id.to_string(),
            accepted,
            message: message.into(),
        }
    }

    pub fn notice(message: impl Into<String>) -> Self {
        RelayMessage::Notice {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a relay frame (client side)
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let frame = value.as_array().ok_or(ProtocolError::NotACommand)?;
        let command = frame
            .first()
            .and_then(Value::as_str)
            .ok_or(ProtocolError::NotACommand)?;
        let text_at = |i: usize, command: &'static str| {
            frame
                .get(i)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| ProtocolError::malformed(command, format!("missing field {}", i)))
        };

        match command {
            "EVENT" => Ok(RelayMessage::Event {
                sub_id: text_at(1, "EVENT")?,
                event: serde_json::from_value(frame.get(2).cloned().unwrap_or(Value::Null))
                    .map_err(|e| ProtocolError::malformed("EVENT", e))?,
            }),
            "OK" => Ok(RelayMessage::Ok {
                event_id: text_at(1, "OK")?,
                accepted: frame
                    .get(2)
                    .and_then(Value::as_bool)
                    .ok_or_else(|| ProtocolError::malformed("OK", "missing status"))?,
                message: text_at(3, "OK").unwrap_or_default(),
            }),
            "EOSE" => Ok(RelayMessage::Eose {
                sub_id: text_at(1, "EOSE")?,
            }),
            "NOTICE" => Ok(RelayMessage::Notice {
                message: text_at(1, "NOTICE")?,
            }),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

impl Serialize for RelayMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RelayMessage::Event { sub_id, event } => ("EVENT", sub_id, event).serialize(serializer),
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => ("OK", event_id, accepted, message).serialize(serializer),
            RelayMessage::Eose { sub_id } => ("EOSE", sub_id).serialize(serializer),
            RelayMessage::Notice { message } => ("NOTICE", message).serialize(serializer),
        }
    }
}
