//! Envelope construction and the line-delimited-JSON wire codec, bit-exact
//! per spec.md §6.
//!
//! Grounded on `opentelemetry-http`'s request-building helpers
//! (`opentelemetry-http/src/lib.rs`) for the "serialize headers, serialize
//! body, hand to a pluggable transport" shape, and on
//! `opentelemetry_sdk::export::trace::SpanData` batching for the
//! multi-item-per-payload pattern.

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::Error;

/// The top-level envelope header line: `{"sent_at": ..., "dsn"?, "sdk"?,
/// "trace"?}`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct EnvelopeHeaders {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dsn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// An item's header line. `item_type` is always present; the rest are
/// populated only for the item types that need them (attachments).
#[derive(Clone, Debug, Default, Serialize)]
pub struct ItemHeaders {
    #[serde(rename = "type")]
    pub item_type: String,
    pub length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_type: Option<String>,
}

impl ItemHeaders {
    pub fn new(item_type: impl Into<String>, length: usize) -> Self {
        ItemHeaders {
            item_type: item_type.into(),
            length,
            filename: None,
            content_type: None,
            attachment_type: None,
        }
    }
}

/// An item's payload: either UTF-8 JSON/text, or raw bytes (attachments,
/// and anything binary that forces the whole envelope into byte-buffer
/// mode, per spec.md §6).
#[derive(Clone, Debug)]
pub enum ItemPayload {
    Json(JsonValue),
    Text(String),
    Binary(Vec<u8>),
}

impl ItemPayload {
    fn is_binary(&self) -> bool {
        matches!(self, ItemPayload::Binary(_))
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            ItemPayload::Json(v) => serde_json::to_vec(v).expect("json value serializes"),
            ItemPayload::Text(s) => s.as_bytes().to_vec(),
            ItemPayload::Binary(b) => b.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct EnvelopeItem {
    pub headers: ItemHeaders,
    pub payload: ItemPayload,
}

impl EnvelopeItem {
    pub fn json(item_type: impl Into<String>, payload: impl Serialize) -> Result<Self, Error> {
        let value = serde_json::to_value(payload)
            .map_err(|e| Error::Envelope(format!("item serialization: {e}")))?;
        let length = serde_json::to_vec(&value).map(|v| v.len()).unwrap_or(0);
        Ok(EnvelopeItem {
            headers: ItemHeaders::new(item_type, length),
            payload: ItemPayload::Json(value),
        })
    }

    pub fn attachment(
        filename: impl Into<String>,
        content_type: Option<String>,
        bytes: Vec<u8>,
    ) -> Self {
        let mut headers = ItemHeaders::new("attachment", bytes.len());
        headers.filename = Some(filename.into());
        headers.content_type = content_type;
        EnvelopeItem {
            headers,
            payload: ItemPayload::Binary(bytes),
        }
    }
}

/// `(headers, items[])`. Serializes to line-delimited UTF-8 JSON: a header
/// line, then for each item a header line and a payload line/blob.
#[derive(Clone, Debug, Default)]
pub struct Envelope {
    pub headers: EnvelopeHeaders,
    pub items: Vec<EnvelopeItem>,
}

impl Envelope {
    pub fn new(headers: EnvelopeHeaders) -> Self {
        Envelope {
            headers,
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, item: EnvelopeItem) {
        self.items.push(item);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True if any item carries a binary payload, in which case the whole
    /// envelope must be serialized as a byte buffer rather than a string
    /// (spec.md §6).
    pub fn has_binary_items(&self) -> bool {
        self.items.iter().any(|item| item.payload.is_binary())
    }

    /// Serializes the envelope to its line-delimited wire form.
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        let header_line = serde_json::to_vec(&self.headers)
            .map_err(|e| Error::Envelope(format!("header serialization: {e}")))?;
        out.extend_from_slice(&header_line);
        out.push(b'\n');

        for item in &self.items {
            let item_header_line = serde_json::to_vec(&item.headers)
                .map_err(|e| Error::Envelope(format!("item header serialization: {e}")))?;
            out.extend_from_slice(&item_header_line);
            out.push(b'\n');
            out.extend_from_slice(&item.payload.encode());
            out.push(b'\n');
        }
        Ok(out)
    }
}
