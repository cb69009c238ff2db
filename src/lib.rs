pub mod config;
pub mod error;
pub mod pipeline;
pub mod schema;
pub mod subject;
pub mod types;

pub use config::{EncoderConfig, TlsClientConfig};
pub use error::{Result, SchemaFlowError};
pub use pipeline::BatchProcessor;
pub use schema::SchemaRegistryEncoder;
pub use types::{Message, MessageBatch};
