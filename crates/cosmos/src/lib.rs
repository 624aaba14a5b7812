//! Bulk upsert into a Cosmos-style document store. The store client itself
//! is a collaborator behind [`DocumentStore`]; this crate owns document
//! preparation, bounded-concurrency fan-out, request-unit accounting, and
//! per-document error capture.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_CONCURRENCY: usize = 25;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CosmosError {
    #[error("rate limited by the store{}", retry_suffix(.retry_after_ms))]
    RateLimit { retry_after_ms: Option<u64> },

    #[error("document exceeds the store's size limit")]
    TooLarge,

    #[error("conflicting write for this document id")]
    Conflict,

    #[error("authentication to the store failed: {0}")]
    Auth(String),

    #[error("network failure talking to the store: {0}")]
    Network(String),

    #[error("document has no usable id: {0}")]
    IdEmpty(String),
}

fn retry_suffix(retry_after_ms: &Option<u64>) -> String {
    match retry_after_ms {
        Some(ms) => format!(" (retry after {ms}ms)"),
        None => String::new(),
    }
}

impl CosmosError {
    /// Whether the underlying client is expected to succeed on retry. The
    /// client retries rate limits itself; one that still surfaces is
    /// retryable by the caller. Size and conflict failures are terminal for
    /// the document.
    pub fn retryable(&self) -> bool {
        matches!(self, CosmosError::RateLimit { .. } | CosmosError::Network(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CosmosError::RateLimit { .. } => "RateLimit",
            CosmosError::TooLarge => "TooLarge",
            CosmosError::Conflict => "Conflict",
            CosmosError::Auth(_) => "Auth",
            CosmosError::Network(_) => "Network",
            CosmosError::IdEmpty(_) => "IDEmpty",
        }
    }
}

/// One successful upsert response.
#[derive(Debug, Clone, Copy)]
pub struct UpsertOutcome {
    pub ru_charge: f64,
    pub status_code: u16,
}

/// Client contract for the actual store. Implementations are expected to
/// retry rate limits internally with exponential backoff.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn upsert(
        &self,
        document: &Value,
        partition_key: &str,
    ) -> Result<UpsertOutcome, CosmosError>;
}

/// Returns a store-ready deep copy of `document`: an `id` derived from the
/// last IRI segment of `@id`, and a `partitionKey` from the explicit value
/// or the document `@type`. The input is never mutated.
pub fn prepare(document: &Value, partition_value: Option<&str>) -> Result<Value, CosmosError> {
    let object = document
        .as_object()
        .ok_or_else(|| CosmosError::IdEmpty("document is not an object".to_string()))?;

    let iri = object
        .get("@id")
        .and_then(Value::as_str)
        .ok_or_else(|| CosmosError::IdEmpty("document has no @id".to_string()))?;
    let id = iri
        .rsplit(['/', '#'])
        .next()
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| CosmosError::IdEmpty(format!("cannot derive an id from '{iri}'")))?;

    let partition = match partition_value {
        Some(value) => value.to_string(),
        None => object
            .get("@type")
            .and_then(Value::as_str)
            .unwrap_or("document")
            .to_string(),
    };

    let mut prepared = object.clone();
    prepared.insert("id".to_string(), Value::String(id.to_string()));
    prepared.insert("partitionKey".to_string(), Value::String(partition));
    Ok(Value::Object(prepared))
}

/// One failed document in a bulk result.
#[derive(Debug, Clone)]
pub struct BulkError {
    pub id: String,
    pub kind: &'static str,
    pub message: String,
    pub retryable: bool,
}

/// Aggregate outcome of a bulk upsert. Per-record ordering is not preserved;
/// counts and errors are.
#[derive(Debug, Default, Clone)]
pub struct BulkResult {
    pub succeeded: usize,
    pub failed: usize,
    pub total_ru: f64,
    pub errors: Vec<BulkError>,
}

impl BulkResult {
    /// Folds another batch's outcome into this one.
    pub fn merge(&mut self, other: BulkResult) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.total_ru += other.total_ru;
        self.errors.extend(other.errors);
    }
}

/// Upserts prepared documents with at most `concurrency` requests in flight.
/// Per-document failures are captured without failing the batch; an `Auth`
/// failure aborts immediately since every later request would fail the same
/// way. Workers observe `cancel` between upserts; in-flight requests finish.
pub async fn upsert_many(
    store: &dyn DocumentStore,
    documents: Vec<Value>,
    concurrency: usize,
    cancel: &CancellationToken,
) -> Result<BulkResult, CosmosError> {
    let concurrency = concurrency.max(1);
    let total = documents.len();

    let upserts = documents.into_iter().map(|document| async move {
        if cancel.is_cancelled() {
            return None;
        }
        let id = document
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let partition = document
            .get("partitionKey")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        Some((id, store.upsert(&document, &partition).await))
    });

    let mut result = BulkResult::default();
    let mut skipped = 0usize;
    let mut stream = futures::stream::iter(upserts).buffer_unordered(concurrency);
    while let Some(outcome) = stream.next().await {
        match outcome {
            None => skipped += 1,
            Some((_, Ok(outcome))) => {
                result.succeeded += 1;
                result.total_ru += outcome.ru_charge;
            }
            Some((id, Err(error @ CosmosError::Auth(_)))) => {
                // Credentials are bad for the whole batch, not one document.
                tracing::error!(id, "authentication failed during bulk upsert");
                return Err(error);
            }
            Some((id, Err(error))) => {
                tracing::warn!(id, error = %error, "document upsert failed");
                result.failed += 1;
                result.errors.push(BulkError {
                    id,
                    kind: error.kind(),
                    message: error.to_string(),
                    retryable: error.retryable(),
                });
            }
        }
    }

    if skipped > 0 {
        tracing::info!(skipped, total, "bulk upsert cancelled before completion");
    }
    tracing::info!(
        succeeded = result.succeeded,
        failed = result.failed,
        total_ru = result.total_ru,
        "bulk upsert finished"
    );
    Ok(result)
}
