//! Schema registry encoder service.
//!
//! Encodes each message of a batch against the latest registry schema for
//! its subject and frames the result in the registry wire format. A
//! background task keeps actively used schemas fresh and evicts abandoned
//! ones for the lifetime of the service.

use crate::config::EncoderConfig;
use crate::error::SchemaFlowError;
use crate::pipeline::BatchProcessor;
use crate::schema::cache::{CacheStats, SchemaCache};
use crate::schema::compiled::JsonMode;
use crate::schema::registry::RegistryClient;
use crate::schema::wire;
use crate::subject::{SubjectPattern, SubjectResolver};
use crate::types::MessageBatch;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SchemaRegistryEncoder {
    cache: Arc<SchemaCache>,
    subject: Arc<dyn SubjectResolver>,
    shutdown: watch::Sender<bool>,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl SchemaRegistryEncoder {
    /// Builds the encoder from configuration and starts the background
    /// refresher. The refresher runs until [`close`](Self::close).
    pub fn new(config: EncoderConfig) -> crate::Result<Self> {
        config.validate()?;
        let pattern = SubjectPattern::parse(&config.subject)?;
        Self::with_subject_resolver(config, Arc::new(pattern))
    }

    /// Same as [`new`](Self::new) but with an injected subject resolver,
    /// bypassing the configured pattern.
    pub fn with_subject_resolver(
        config: EncoderConfig,
        subject: Arc<dyn SubjectResolver>,
    ) -> crate::Result<Self> {
        let registry = RegistryClient::new(&config.url, config.tls.as_ref())?;
        let mode = if config.raw_json_mode {
            JsonMode::RawJson
        } else {
            JsonMode::AvroJson
        };
        let cache = Arc::new(SchemaCache::new(
            registry,
            mode,
            config.refresh_period(),
            config.purge_period(),
        ));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let refresher = tokio::spawn(run_refresher(
            cache.clone(),
            config.refresh_tick_period(),
            shutdown_rx,
        ));

        Ok(Self {
            cache,
            subject,
            shutdown,
            refresher: Mutex::new(Some(refresher)),
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Stops the refresher and clears the cache. Idempotent; fails with
    /// `Timeout` if the refresher does not stop within the deadline, in
    /// which case the cache is left untouched and the task is kept so a
    /// retry still awaits it.
    pub async fn close_with_timeout(&self, deadline: Duration) -> crate::Result<()> {
        let _ = self.shutdown.send(true);
        let handle = self.refresher.lock().take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(deadline, &mut handle).await {
                Ok(joined) => {
                    if let Err(e) = joined {
                        warn!("refresher task ended abnormally: {}", e);
                    }
                }
                Err(_) => {
                    *self.refresher.lock() = Some(handle);
                    return Err(SchemaFlowError::Timeout);
                }
            }
        }
        self.cache.clear();
        Ok(())
    }
}

#[async_trait]
impl BatchProcessor for SchemaRegistryEncoder {
    /// Encodes each message independently: a failure to resolve, encode,
    /// or frame marks that message and never aborts the batch.
    async fn process_batch(&self, mut batch: MessageBatch) -> crate::Result<Vec<MessageBatch>> {
        for index in 0..batch.len() {
            let subject = match self.subject.resolve(&batch, index) {
                Ok(subject) => subject,
                Err(e) => {
                    mark_failed(&mut batch, index, e);
                    continue;
                }
            };

            let (encoder, id) = match self.cache.resolve(&subject).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    mark_failed(&mut batch, index, e);
                    continue;
                }
            };

            let Some(msg) = batch.get_mut(index) else {
                continue;
            };
            match encoder.encode(msg) {
                Ok(encoded) => msg.set_bytes(wire::frame(id, &encoded)),
                Err(e) => msg.set_error(e),
            }
        }
        Ok(vec![batch])
    }

    async fn close(&self) -> crate::Result<()> {
        self.close_with_timeout(DEFAULT_CLOSE_TIMEOUT).await
    }
}

fn mark_failed(batch: &mut MessageBatch, index: usize, err: SchemaFlowError) {
    if let Some(msg) = batch.get_mut(index) {
        msg.set_error(err);
    }
}

async fn run_refresher(
    cache: Arc<SchemaCache>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // interval yields immediately on the first tick
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => cache.refresh_tick().await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("schema refresher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use warp::http::StatusCode;
    use warp::Filter;

    const USER_SCHEMA: &str = r#"{
        "type": "record",
        "name": "User",
        "fields": [{"name": "name", "type": "string"}]
    }"#;

    struct MockRegistry {
        schemas: SyncMutex<std::collections::HashMap<String, (u32, String)>>,
        hits: AtomicUsize,
    }

    impl MockRegistry {
        fn set_subject(&self, subject: &str, id: u32, schema: &str) {
            self.schemas
                .lock()
                .insert(subject.to_string(), (id, schema.to_string()));
        }
    }

    async fn mock_registry() -> (String, Arc<MockRegistry>) {
        let state = Arc::new(MockRegistry {
            schemas: SyncMutex::new(std::collections::HashMap::new()),
            hits: AtomicUsize::new(0),
        });

        let served = state.clone();
        let route = warp::path!("subjects" / String / "versions" / "latest").map(
            move |subject: String| {
                served.hits.fetch_add(1, Ordering::SeqCst);
                match served.schemas.lock().get(&subject) {
                    Some((id, schema)) => warp::reply::with_status(
                        serde_json::json!({ "schema": schema, "id": id }).to_string(),
                        StatusCode::OK,
                    ),
                    None => warp::reply::with_status(String::new(), StatusCode::NOT_FOUND),
                }
            },
        );
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        (format!("http://{}", addr), state)
    }

    fn encoder_config(base: &str, subject: &str) -> EncoderConfig {
        EncoderConfig {
            url: base.to_string(),
            subject: subject.to_string(),
            refresh_period_ms: 600_000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_batch_encodes_and_frames() {
        let (base, registry) = mock_registry().await;
        registry.set_subject("users-value", 9, USER_SCHEMA);

        let encoder = SchemaRegistryEncoder::new(encoder_config(&base, "users-value")).unwrap();
        let batch = MessageBatch::new(vec![Message::new(r#"{"name":"alice"}"#)]);
        let mut out = encoder.process_batch(batch).await.unwrap();
        let batch = out.remove(0);

        assert!(!batch[0].is_failed());
        let (id, payload) = wire::unframe(batch[0].as_bytes()).unwrap();
        assert_eq!(id, 9);
        assert!(!payload.is_empty());
        encoder.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_partial_batch_failure() {
        let (base, registry) = mock_registry().await;
        registry.set_subject("orders-value", 4, USER_SCHEMA);

        let encoder = SchemaRegistryEncoder::new(encoder_config(
            &base,
            "${meta:kafka_topic}-value",
        ))
        .unwrap();

        let batch = MessageBatch::new(vec![
            Message::new(r#"{"name":"alice"}"#).with_metadata("kafka_topic", "orders"),
            Message::new(r#"{"name":"bob"}"#).with_metadata("kafka_topic", "nonexistent"),
            Message::new(r#"{"name":"carol"}"#).with_metadata("kafka_topic", "orders"),
        ]);
        let mut out = encoder.process_batch(batch).await.unwrap();
        let batch = out.remove(0);

        let (id, _) = wire::unframe(batch[0].as_bytes()).unwrap();
        assert_eq!(id, 4);
        assert!(matches!(
            batch[1].error(),
            Some(SchemaFlowError::SubjectNotFound(_))
        ));
        let (id, _) = wire::unframe(batch[2].as_bytes()).unwrap();
        assert_eq!(id, 4);
        encoder.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unresolvable_subject_marks_message() {
        let (base, _registry) = mock_registry().await;
        let encoder = SchemaRegistryEncoder::new(encoder_config(
            &base,
            "${meta:kafka_topic}-value",
        ))
        .unwrap();

        let batch = MessageBatch::new(vec![Message::new(r#"{"name":"alice"}"#)]);
        let mut out = encoder.process_batch(batch).await.unwrap();
        let batch = out.remove(0);
        assert!(matches!(
            batch[0].error(),
            Some(SchemaFlowError::SubjectResolution(_))
        ));
        encoder.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_encode_failure_marks_message_only() {
        let (base, registry) = mock_registry().await;
        registry.set_subject("users-value", 2, USER_SCHEMA);

        let encoder = SchemaRegistryEncoder::new(encoder_config(&base, "users-value")).unwrap();
        let batch = MessageBatch::new(vec![
            Message::new(r#"{"wrong_field": true}"#),
            Message::new(r#"{"name":"dave"}"#),
        ]);
        let mut out = encoder.process_batch(batch).await.unwrap();
        let batch = out.remove(0);

        assert!(matches!(
            batch[0].error(),
            Some(SchemaFlowError::EncodeFailure(_))
        ));
        assert!(!batch[1].is_failed());
        encoder.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_repeat_batches_fetch_once() {
        let (base, registry) = mock_registry().await;
        registry.set_subject("users-value", 2, USER_SCHEMA);

        let encoder = SchemaRegistryEncoder::new(encoder_config(&base, "users-value")).unwrap();
        for _ in 0..3 {
            let batch = MessageBatch::new(vec![Message::new(r#"{"name":"alice"}"#)]);
            encoder.process_batch(batch).await.unwrap();
        }
        assert_eq!(registry.hits.load(Ordering::SeqCst), 1);
        assert_eq!(encoder.cache_stats().fetches, 1);
        encoder.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (base, registry) = mock_registry().await;
        registry.set_subject("users-value", 2, USER_SCHEMA);

        let encoder = SchemaRegistryEncoder::new(encoder_config(&base, "users-value")).unwrap();
        let batch = MessageBatch::new(vec![Message::new(r#"{"name":"alice"}"#)]);
        encoder.process_batch(batch).await.unwrap();

        encoder.close().await.unwrap();
        encoder.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_timeout_keeps_refresher_for_retry() {
        let (base, registry) = mock_registry().await;
        registry.set_subject("users-value", 2, USER_SCHEMA);

        let encoder = SchemaRegistryEncoder::new(encoder_config(&base, "users-value")).unwrap();
        let batch = MessageBatch::new(vec![Message::new(r#"{"name":"alice"}"#)]);
        encoder.process_batch(batch).await.unwrap();
        assert_eq!(encoder.cache.len(), 1);

        let err = encoder.close_with_timeout(Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, SchemaFlowError::Timeout));
        assert_eq!(encoder.cache.len(), 1);
        assert!(encoder.refresher.lock().is_some());

        encoder.close().await.unwrap();
        assert!(encoder.cache.is_empty());
        assert!(encoder.refresher.lock().is_none());
    }
}
