//! Stream events.

use serde::{Deserialize, Serialize};

use crate::value::AttributeValue;

/// An event flowing through a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Id of the stream the event belongs to.
    pub stream_id: String,
    /// Event time in milliseconds.
    pub timestamp: i64,
    /// Attribute values in stream definition order.
    pub data: Vec<AttributeValue>,
}

impl StreamEvent {
    /// Creates a new event.
    pub fn new(stream_id: impl Into<String>, timestamp: i64, data: Vec<AttributeValue>) -> Self {
        Self {
            stream_id: stream_id.into(),
            timestamp,
            data,
        }
    }

    /// Value at `index`, if present.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&AttributeValue> {
        self.data.get(index)
    }
}
