//! Request and response types for bulk indexing.

use serde_json::{Map, Value};

use crate::errors::SearchIndexError;

/// A single index-document operation inside a bulk call.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkIndexRequest {
    /// Destination index name.
    pub index: String,
    /// The document body, a JSON object.
    pub document: Map<String, Value>,
}

impl BulkIndexRequest {
    pub fn new(index: impl Into<String>, document: Map<String, Value>) -> Self {
        Self {
            index: index.into(),
            document,
        }
    }
}

/// An item the backend rejected inside an otherwise successful bulk call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemFailure {
    /// Position of the item in the submitted request slice.
    pub position: usize,
    pub index: String,
    pub status: u16,
    pub reason: String,
}

/// Summary of a bulk call that the backend accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkIndexSummary {
    /// Total number of items in the call.
    pub total: usize,
    /// Number of items the backend indexed.
    pub succeeded: usize,
    /// Number of items the backend rejected.
    pub failed: usize,
    /// Server-side processing time, when reported.
    pub took_ms: Option<u64>,
    /// Details for each rejected item.
    pub failures: Vec<BulkItemFailure>,
}

impl BulkIndexSummary {
    /// Summary for a call where every item was indexed.
    pub fn all_succeeded(total: usize) -> Self {
        Self {
            total,
            succeeded: total,
            ..Default::default()
        }
    }

    /// Parse the JSON body of a bulk response.
    ///
    /// The body is expected to look like
    /// `{"took": 3, "errors": false, "items": [{"index": {"_index": "...", "status": 201}}]}`.
    pub fn from_response(body: &Value) -> Result<Self, SearchIndexError> {
        let items = body
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| SearchIndexError::parse("bulk response has no items array"))?;

        let took_ms = body.get("took").and_then(Value::as_u64);
        let mut failures = Vec::new();

        for (position, item) in items.iter().enumerate() {
            // Each item is keyed by its action name; only `index` is ever submitted.
            let Some(result) = item.get("index").or_else(|| item.as_object()?.values().next())
            else {
                continue;
            };

            let status = result
                .get("status")
                .and_then(Value::as_u64)
                .unwrap_or_default() as u16;

            if let Some(error) = result.get("error") {
                let reason = error
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                failures.push(BulkItemFailure {
                    position,
                    index: result
                        .get("_index")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    status,
                    reason,
                });
            }
        }

        let total = items.len();
        let failed = failures.len();
        Ok(Self {
            total,
            succeeded: total - failed,
            failed,
            took_ms,
            failures,
        })
    }
}
