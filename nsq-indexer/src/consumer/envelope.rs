//! Message envelope types for the consumer.
//!
//! An envelope pairs a decoded message with its origin topic and the handle
//! used to acknowledge or requeue it, so the publisher never touches the
//! transport's native message type.

use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;
use nsq_indexer_repository::BulkIndexRequest;
use nsq_indexer_shared::index_name;
use serde_json::{Map, Value};

use crate::errors::IngestError;

/// Transport-specific handle that resolves one delivered message.
///
/// Both methods consume the handle, so a message is resolved at most once.
#[async_trait]
pub trait MessageHandle: Send {
    /// Acknowledge the message; it will not be redelivered.
    async fn finish(self: Box<Self>);

    /// Return the message to the transport for redelivery with the default backoff.
    async fn requeue(self: Box<Self>);
}

/// A decoded message on its way to the indexing backend.
pub struct Envelope {
    topic: String,
    document: Map<String, Value>,
    consumed_on: NaiveDate,
    handle: Box<dyn MessageHandle>,
}

impl Envelope {
    pub fn new(
        topic: impl Into<String>,
        document: Map<String, Value>,
        consumed_on: NaiveDate,
        handle: Box<dyn MessageHandle>,
    ) -> Self {
        Self {
            topic: topic.into(),
            document,
            consumed_on,
            handle,
        }
    }

    /// Origin topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The decoded message body.
    pub fn document(&self) -> &Map<String, Value> {
        &self.document
    }

    /// Local date on which the message was consumed.
    pub fn consumed_on(&self) -> NaiveDate {
        self.consumed_on
    }

    /// Destination index, `{topic}-{yy}.{mm}.{dd}`.
    pub fn index_name(&self) -> String {
        index_name(&self.topic, self.consumed_on)
    }

    /// One index-document operation for this envelope.
    pub fn to_bulk_request(&self) -> BulkIndexRequest {
        BulkIndexRequest::new(self.index_name(), self.document.clone())
    }

    /// Acknowledge the underlying message.
    pub async fn finish(self) {
        self.handle.finish().await;
    }

    /// Requeue the underlying message.
    pub async fn requeue(self) {
        self.handle.requeue().await;
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("topic", &self.topic)
            .field("consumed_on", &self.consumed_on)
            .field("fields", &self.document.len())
            .finish_non_exhaustive()
    }
}

/// Parse a raw message body into an indexable document.
///
/// Only JSON objects are accepted; arrays, scalars and malformed input are decode errors.
pub fn decode_document(body: &[u8]) -> Result<Map<String, Value>, IngestError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(document)) => Ok(document),
        Ok(other) => Err(IngestError::decode(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(IngestError::decode(e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
