//! Outbound messages and their envelopes.

use serde_json::Value;

use crate::bus::Envelope;

/// What an application hands to [`Publisher::publish`](super::Publisher::publish).
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Nothing was supplied. Still sent, and rejected by the backend.
    Absent,
    Single(Value),
    /// Each element becomes its own envelope, in order.
    Batch(Vec<Value>),
}

impl Message {
    /// Build the envelopes for one send call.
    ///
    /// Batch elements get ids `"0"`, `"1"`, ... in input order; a single
    /// (or absent) message always gets id `"0"`.
    pub fn into_envelopes(self) -> Vec<Envelope> {
        match self {
            Message::Absent => vec![Envelope {
                id: "0".to_string(),
                body: None,
            }],
            Message::Single(body) => vec![Envelope {
                id: "0".to_string(),
                body: Some(body),
            }],
            Message::Batch(bodies) => bodies
                .into_iter()
                .enumerate()
                .map(|(index, body)| Envelope {
                    id: index.to_string(),
                    body: non_null(body),
                })
                .collect(),
        }
    }
}

fn non_null(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        other => Some(other),
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Message::Absent,
            Value::Array(items) => Message::Batch(items),
            other => Message::Single(other),
        }
    }
}

impl From<&str> for Message {
    fn from(value: &str) -> Self {
        Message::Single(Value::String(value.to_string()))
    }
}

impl From<String> for Message {
    fn from(value: String) -> Self {
        Message::Single(Value::String(value))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Message {
    fn from(values: Vec<T>) -> Self {
        Message::Batch(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Message>> From<Option<T>> for Message {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Message::Absent)
    }
}
