//! Change-data-capture synchronizer.
//!
//! Projects catalog mutations from the change stream into the search index.
//! Records are applied one at a time in stream order, which preserves the
//! stream's per-key ordering; a failed record is logged and skipped.

use crate::config::KafkaConfig;
use crate::search_index::{SearchDocument, SearchIndex};
use anyhow::{Context, Result};
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Why a single change record could not be applied
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{kind:?} event for '{id}' carries no new image")]
    MissingImage { id: String, kind: EventKind },

    #[error("malformed change record: {0}")]
    MalformedRecord(String),

    #[error("search index rejected change for '{id}': {source}")]
    Index {
        id: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Kind of catalog mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum EventKind {
    #[serde(alias = "INSERT", alias = "insert")]
    Insert,
    #[serde(alias = "MODIFY", alias = "modify", alias = "update", alias = "UPDATE")]
    Modify,
    #[serde(alias = "REMOVE", alias = "remove", alias = "delete", alias = "DELETE")]
    Remove,
}

/// One catalog change as delivered by the stream
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawChangeRecord")]
pub struct ChangeRecord {
    pub event_kind: EventKind,
    pub keys: Map<String, Value>,
    pub new_image: Option<Map<String, Value>>,
}

/// Keys and row image nested under the stream's `dynamodb` envelope
#[derive(Debug, Deserialize)]
struct StreamImages {
    #[serde(default, alias = "Keys")]
    keys: Option<Map<String, Value>>,
    #[serde(default, alias = "NewImage", alias = "newImage")]
    new_image: Option<Map<String, Value>>,
}

/// Wire shape before the envelope is flattened away
#[derive(Debug, Deserialize)]
struct RawChangeRecord {
    #[serde(alias = "eventName", alias = "eventKind")]
    event_kind: EventKind,
    #[serde(default)]
    dynamodb: Option<StreamImages>,
    #[serde(flatten)]
    top_level: StreamImages,
}

impl TryFrom<RawChangeRecord> for ChangeRecord {
    type Error = String;

    fn try_from(raw: RawChangeRecord) -> Result<Self, Self::Error> {
        let (keys, new_image) = match raw.dynamodb {
            Some(nested) => (
                nested.keys.or(raw.top_level.keys),
                nested.new_image.or(raw.top_level.new_image),
            ),
            None => (raw.top_level.keys, raw.top_level.new_image),
        };
        let keys = keys.ok_or_else(|| format!("{:?} record carries no keys", raw.event_kind))?;

        Ok(Self {
            event_kind: raw.event_kind,
            keys,
            new_image,
        })
    }
}

impl ChangeRecord {
    /// Decode one element of a change batch
    pub fn from_value(value: &Value) -> Result<Self, SyncError> {
        Self::deserialize(value).map_err(|e| SyncError::MalformedRecord(e.to_string()))
    }
}

/// Unwrap typed attribute values (`{"S": "x"}`, `{"N": "1"}`, `{"L": [...]}`, ...)
/// and pass plain JSON through unchanged.
fn plain(value: &Value) -> Value {
    if let Value::Object(object) = value {
        if let (1, Some((tag, inner))) = (object.len(), object.iter().next()) {
            match (tag.as_str(), inner) {
                ("S", Value::String(_)) | ("BOOL", Value::Bool(_)) => return inner.clone(),
                ("N", Value::String(n)) => {
                    return n
                        .parse::<i64>()
                        .map(Value::from)
                        .unwrap_or_else(|_| Value::String(n.clone()))
                }
                ("SS", Value::Array(items)) | ("NS", Value::Array(items)) => {
                    return Value::Array(items.clone())
                }
                ("L", Value::Array(items)) => {
                    return Value::Array(items.iter().map(plain).collect())
                }
                ("NULL", _) => return Value::Null,
                _ => {}
            }
        }
    }
    value.clone()
}

fn string_field(map: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match map.get(*name).map(plain) {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl ChangeRecord {
    /// Catalog id of the affected row
    pub fn id(&self) -> Result<String, SyncError> {
        string_field(&self.keys, &["id"])
            .ok_or_else(|| SyncError::MalformedRecord("keys carry no 'id'".to_string()))
    }
}

impl SearchDocument {
    /// Project a catalog row image into a search document
    pub fn from_image(id: &str, image: &Map<String, Value>) -> Self {
        let labels = match image.get("labels").map(plain) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match plain(v) {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        let created_at = match image.get("created_at").map(plain) {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        };

        Self {
            id: id.to_string(),
            source: string_field(image, &["source"]),
            keyword: string_field(image, &["search_keyword", "keyword"]).unwrap_or_default(),
            labels,
            blob_key: string_field(image, &["blob_key", "s3_key"]),
            created_at,
        }
    }
}

/// What applying a record did to the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Upserted,
    Deleted,
}

/// Per-batch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub upserted: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Applies catalog change records to the search index
pub struct SearchSynchronizer {
    index: Arc<dyn SearchIndex>,
}

impl SearchSynchronizer {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }

    /// Apply one record: delete on remove, upsert from the new image otherwise
    pub async fn apply(&self, record: &ChangeRecord) -> Result<SyncAction, SyncError> {
        let id = record.id()?;

        match record.event_kind {
            EventKind::Remove => {
                self.index
                    .delete_document(&id)
                    .await
                    .map_err(|source| SyncError::Index {
                        id: id.clone(),
                        source,
                    })?;
                Ok(SyncAction::Deleted)
            }
            kind => {
                let image = record
                    .new_image
                    .as_ref()
                    .ok_or_else(|| SyncError::MissingImage {
                        id: id.clone(),
                        kind,
                    })?;
                let document = SearchDocument::from_image(&id, image);
                self.index
                    .upsert_document(&document)
                    .await
                    .map_err(|source| SyncError::Index {
                        id: id.clone(),
                        source,
                    })?;
                Ok(SyncAction::Upserted)
            }
        }
    }

    /// Decode and apply records in order; a failing record never stops the rest
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn apply_batch(&self, records: &[Value]) -> SyncReport {
        let mut report = SyncReport::default();

        for (position, value) in records.iter().enumerate() {
            let outcome = match ChangeRecord::from_value(value) {
                Ok(record) => self.apply(&record).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(SyncAction::Upserted) => report.upserted += 1,
                Ok(SyncAction::Deleted) => report.deleted += 1,
                Err(e) => {
                    error!(error = %e, position, "Failed to apply change record");
                    report.failed += 1;
                }
            }
        }

        metrics::counter!("catalog.sync.upserted").increment(report.upserted as u64);
        metrics::counter!("catalog.sync.deleted").increment(report.deleted as u64);
        metrics::counter!("catalog.sync.failed").increment(report.failed as u64);

        info!(
            upserted = report.upserted,
            deleted = report.deleted,
            failed = report.failed,
            "Change batch applied"
        );

        report
    }
}

/// Kafka consumer feeding the catalog change stream into the synchronizer
pub struct ChangeStreamConsumer {
    consumer: StreamConsumer,
    synchronizer: Arc<SearchSynchronizer>,
}

impl ChangeStreamConsumer {
    /// Create a new consumer subscribed to the change-stream topic
    pub fn new(config: &KafkaConfig, synchronizer: Arc<SearchSynchronizer>) -> Result<Self> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("max.poll.interval.ms", config.max_poll_interval_ms.to_string());

        if config.ssl_enabled {
            client_config.set("security.protocol", "SASL_SSL");
            if let Some(ref ca_location) = config.ssl_ca_location {
                client_config.set("ssl.ca.location", ca_location);
            }
        }

        if let (Some(ref username), Some(ref password)) =
            (&config.sasl_username, &config.sasl_password)
        {
            client_config
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);
        }

        let consumer: StreamConsumer = client_config
            .create()
            .context("Failed to create Kafka consumer")?;

        consumer
            .subscribe(&[&config.change_stream_topic])
            .context("Failed to subscribe to change stream topic")?;

        info!(
            topic = %config.change_stream_topic,
            group = %config.consumer_group,
            "Subscribed to catalog change stream"
        );

        Ok(Self {
            consumer,
            synchronizer,
        })
    }

    /// Consume until the stream ends or shutdown is requested
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Starting change stream consumer");

        let mut message_stream = self.consumer.stream();

        loop {
            let message_result = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = message_stream.next() => match next {
                    Some(result) => result,
                    None => break,
                },
            };

            match message_result {
                Ok(message) => {
                    match self.process_message(&message).await {
                        Ok(report) => debug!(?report, "Change message handled"),
                        Err(e) => {
                            // Undecodable payloads can never succeed; skip past them.
                            warn!(
                                error = %e,
                                partition = message.partition(),
                                offset = message.offset(),
                                "Skipping undecodable change message"
                            );
                            metrics::counter!("catalog.sync.undecodable").increment(1);
                        }
                    }
                    if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                        warn!(error = %e, "Failed to commit offset");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Kafka consumer error");
                    metrics::counter!("catalog.sync.kafka_errors").increment(1);
                }
            }
        }

        info!("Change stream consumer stopped");
        Ok(())
    }

    #[instrument(
        skip(self, message),
        fields(partition = message.partition(), offset = message.offset())
    )]
    async fn process_message(&self, message: &BorrowedMessage<'_>) -> Result<SyncReport> {
        let payload = message.payload().context("Message has no payload")?;
        let records = decode_payload(payload)?;
        Ok(self.synchronizer.apply_batch(&records).await)
    }
}

/// Split a change-stream message into its undecoded records.
///
/// A `Records` batch yields its elements; any other object is a single record.
/// Records are decoded one by one in [`SearchSynchronizer::apply_batch`] so a
/// malformed element only fails itself.
pub fn decode_payload(payload: &[u8]) -> Result<Vec<Value>> {
    let payload: Value =
        serde_json::from_slice(payload).context("Failed to deserialize change payload")?;

    match payload {
        Value::Object(mut object) => {
            match object.remove("Records").or_else(|| object.remove("records")) {
                Some(Value::Array(records)) => Ok(records),
                Some(_) => anyhow::bail!("Change payload 'Records' is not an array"),
                None => Ok(vec![Value::Object(object)]),
            }
        }
        _ => anyhow::bail!("Change payload is not a JSON object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySearchIndex;
    use crate::search_index::MockSearchIndex;
    use serde_json::json;
    use tokio_test::assert_ok;

    fn upsert(id: &str, keyword: &str) -> Value {
        json!({
            "event_kind": "INSERT",
            "keys": { "id": id, "source": "giphy" },
            "new_image": {
                "id": id,
                "source": "giphy",
                "search_keyword": keyword,
                "labels": ["Dog"],
                "blob_key": format!("lgtm/{id}.gif"),
                "status": "processed",
                "created_at": 1700000000
            }
        })
    }

    fn remove(id: &str) -> Value {
        json!({
            "event_kind": "REMOVE",
            "keys": { "id": id, "source": "giphy" }
        })
    }

    fn stream_record(event: &str, id: &str) -> Value {
        json!({
            "eventID": "1",
            "eventName": event,
            "eventSource": "aws:dynamodb",
            "dynamodb": {
                "Keys": { "id": { "S": id } },
                "NewImage": {
                    "id": { "S": id },
                    "keyword": { "S": "lgtm" },
                    "labels": { "L": [{ "S": "Dog" }] },
                    "s3_key": { "S": format!("lgtm/{id}.gif") },
                    "created_at": { "N": "1700000000" }
                },
                "StreamViewType": "NEW_IMAGE"
            }
        })
    }

    #[test]
    fn test_decode_stream_batch_with_typed_attributes() {
        let payload = json!({
            "Records": [{
                "eventName": "MODIFY",
                "Keys": { "id": { "S": "g1" }, "source": { "S": "giphy" } },
                "NewImage": {
                    "id": { "S": "g1" },
                    "keyword": { "S": "lgtm" },
                    "labels": { "L": [{ "S": "Dog" }, { "S": "Pet" }] },
                    "s3_key": { "S": "lgtm/g1.gif" },
                    "created_at": { "S": "1700000000" }
                }
            }]
        });

        let values = decode_payload(payload.to_string().as_bytes()).unwrap();
        assert_eq!(values.len(), 1);
        let record = ChangeRecord::from_value(&values[0]).unwrap();
        assert_eq!(record.event_kind, EventKind::Modify);
        assert_eq!(record.id().unwrap(), "g1");

        let document = SearchDocument::from_image("g1", record.new_image.as_ref().unwrap());
        assert_eq!(document.keyword, "lgtm");
        assert_eq!(document.labels, vec!["Dog", "Pet"]);
        assert_eq!(document.blob_key.as_deref(), Some("lgtm/g1.gif"));
        assert_eq!(document.created_at, Some(1_700_000_000));
    }

    #[test]
    fn test_decode_dynamodb_envelope() {
        let record = ChangeRecord::from_value(&stream_record("INSERT", "g1")).unwrap();
        assert_eq!(record.event_kind, EventKind::Insert);
        assert_eq!(record.id().unwrap(), "g1");

        let document = SearchDocument::from_image("g1", record.new_image.as_ref().unwrap());
        assert_eq!(document.blob_key.as_deref(), Some("lgtm/g1.gif"));
        assert_eq!(document.created_at, Some(1_700_000_000));

        let removal = ChangeRecord::from_value(&json!({
            "eventName": "REMOVE",
            "dynamodb": { "Keys": { "id": { "S": "g1" } } }
        }))
        .unwrap();
        assert_eq!(removal.event_kind, EventKind::Remove);
        assert!(removal.new_image.is_none());
    }

    #[test]
    fn test_decode_single_record() {
        let payload = json!({
            "eventKind": "delete",
            "keys": { "id": "g9" }
        });
        let values = decode_payload(payload.to_string().as_bytes()).unwrap();
        let record = ChangeRecord::from_value(&values[0]).unwrap();
        assert_eq!(record.event_kind, EventKind::Remove);
        assert!(decode_payload(b"not json").is_err());
        assert!(decode_payload(br#"{"Records": 3}"#).is_err());
    }

    #[test]
    fn test_record_without_keys_is_malformed() {
        let err = ChangeRecord::from_value(&json!({ "eventName": "REMOVE" })).unwrap_err();
        assert!(matches!(err, SyncError::MalformedRecord(_)));
    }

    #[tokio::test]
    async fn test_malformed_record_does_not_drop_batch() {
        let index = Arc::new(InMemorySearchIndex::new());
        let sync = SearchSynchronizer::new(index.clone());
        let payload = json!({
            "Records": [
                stream_record("INSERT", "g1"),
                stream_record("INSERT", "g2"),
                { "eventName": "TTL_EXPIRE", "dynamodb": { "Keys": { "id": { "S": "g3" } } } },
                { "eventName": "REMOVE" },
                stream_record("MODIFY", "g4")
            ]
        });

        let values = assert_ok!(decode_payload(payload.to_string().as_bytes()));
        let report = sync.apply_batch(&values).await;

        assert_eq!(report, SyncReport { upserted: 3, deleted: 0, failed: 2 });
        assert!(index.document("g1").is_some());
        assert!(index.document("g2").is_some());
        assert!(index.document("g3").is_none());
        assert!(index.document("g4").is_some());
    }

    #[tokio::test]
    async fn test_delete_of_absent_document_succeeds() {
        let index = Arc::new(InMemorySearchIndex::new());
        let sync = SearchSynchronizer::new(index.clone());

        let record = ChangeRecord::from_value(&remove("never-indexed")).unwrap();
        let action = assert_ok!(sync.apply(&record).await);
        assert_eq!(action, SyncAction::Deleted);
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_then_delete_leaves_no_document() {
        let index = Arc::new(InMemorySearchIndex::new());
        let sync = SearchSynchronizer::new(index.clone());

        let report = sync.apply_batch(&[upsert("g1", "lgtm"), remove("g1")]).await;
        assert_eq!(report, SyncReport { upserted: 1, deleted: 1, failed: 0 });
        assert!(index.document("g1").is_none());
    }

    #[tokio::test]
    async fn test_later_image_wins() {
        let index = Arc::new(InMemorySearchIndex::new());
        let sync = SearchSynchronizer::new(index.clone());

        sync.apply_batch(&[upsert("g1", "lgtm"), upsert("g1", "bravo")]).await;
        assert_eq!(index.document("g1").unwrap().keyword, "bravo");
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_batch() {
        let mut index = MockSearchIndex::new();
        index
            .expect_upsert_document()
            .withf(|doc| doc.id == "bad")
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("index is read-only")));
        index
            .expect_upsert_document()
            .withf(|doc| doc.id == "good")
            .times(1)
            .returning(|_| Ok(()));
        let sync = SearchSynchronizer::new(Arc::new(index));

        let missing_image = json!({
            "event_kind": "INSERT",
            "keys": { "id": "no-image" }
        });

        let report = sync
            .apply_batch(&[upsert("bad", "x"), missing_image, upsert("good", "y")])
            .await;

        assert_eq!(report, SyncReport { upserted: 1, deleted: 0, failed: 2 });
    }

    #[tokio::test]
    async fn test_missing_id_is_malformed() {
        let sync = SearchSynchronizer::new(Arc::new(InMemorySearchIndex::new()));
        let record = ChangeRecord::from_value(&json!({
            "event_kind": "REMOVE",
            "keys": { "source": "giphy" }
        }))
        .unwrap();

        let err = sync.apply(&record).await.unwrap_err();
        assert!(matches!(err, SyncError::MalformedRecord(_)));
    }
}
