//! Pipeline item type and its broadcast encoding.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

/// An item flowing through a pipeline or written to the overlay.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw bytes, as read from a link.
    Bytes(Bytes),
    /// Text.
    Text(String),
    /// Structured value.
    Json(Value),
}

impl Payload {
    /// Build a structured payload from any serializable value.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Payload::Json)
    }

    /// Encode for broadcast.
    ///
    /// Bytes become their (lossy) UTF-8 decoding, text passes through and
    /// structured values are rendered as JSON.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            Payload::Bytes(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
            Payload::Text(text) => Ok(text.clone()),
            Payload::Json(value) => serde_json::to_string(value),
        }
    }

    /// Borrow the payload as text when it is text or valid UTF-8 bytes.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
            Payload::Json(_) => None,
        }
    }

    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Bytes(_) => "bytes",
            Payload::Text(_) => "text",
            Payload::Json(_) => "json",
        }
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(bytes))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}
