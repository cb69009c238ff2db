use crate::types::MessageBatch;
use async_trait::async_trait;

/// A pipeline component that transforms message batches. Implementations
/// attach per-message failures to the offending message instead of failing
/// the batch; a returned error means the processor itself is unusable.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process_batch(&self, batch: MessageBatch) -> crate::Result<Vec<MessageBatch>>;

    /// Releases any resources held by the processor. Must be idempotent.
    async fn close(&self) -> crate::Result<()>;
}

/// Passthrough processor, useful as a pipeline placeholder and in tests.
#[derive(Debug, Default)]
pub struct NoopProcessor;

#[async_trait]
impl BatchProcessor for NoopProcessor {
    async fn process_batch(&self, batch: MessageBatch) -> crate::Result<Vec<MessageBatch>> {
        Ok(vec![batch])
    }

    async fn close(&self) -> crate::Result<()> {
        Ok(())
    }
}
